use super::*;
use crate::config::{DebateParams, ModelRoles};
use crate::ports::conversation_store::{
    ConversationSummary, InMemoryConversationStore, StoreError,
};
use crate::ports::llm_gateway::{GatewayError, StreamHandle};
use async_trait::async_trait;
use roundtable_domain::{ContextBudget, StreamEvent};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

// ==================== Scripted gateway ====================

enum Script {
    Reply(String),
    Fail(GatewayError),
    /// Some text, then a vendor error event.
    Partial(String, String),
    /// Some text, then silence until the call is cancelled.
    Hang(String),
    /// The reply, after holding the call open for a while.
    Slow(String, Duration),
}

#[derive(Default)]
struct ScriptedGateway {
    scripts: Mutex<HashMap<String, VecDeque<Script>>>,
    calls: Mutex<Vec<ChatRequest>>,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: Arc<AtomicUsize>,
}

impl ScriptedGateway {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn script(&self, model: &str, script: Script) {
        self.scripts
            .lock()
            .unwrap()
            .entry(model.to_string())
            .or_default()
            .push_back(script);
    }

    fn calls_to(&self, model: &str) -> Vec<ChatRequest> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.model == model)
            .cloned()
            .collect()
    }

    fn call_count(&self, model: &str) -> usize {
        self.calls_to(model).len()
    }

    /// User message of the latest call to `model`.
    fn last_prompt(&self, model: &str) -> String {
        self.calls_to(model)
            .last()
            .and_then(|r| r.messages.last())
            .map(|m| m.content.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl LlmGateway for ScriptedGateway {
    async fn stream(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> Result<StreamHandle, GatewayError> {
        let model = request.model.clone();
        let call_number = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(request);
            calls.iter().filter(|r| r.model == model).count()
        };
        let script = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&model)
            .and_then(|queue| queue.pop_front())
            .unwrap_or_else(|| Script::Reply(format!("{} answer #{}", model, call_number)));

        match script {
            Script::Reply(text) => Ok(StreamHandle::from_events(vec![
                StreamEvent::Content(text),
            ])),
            Script::Fail(error) => Err(error),
            Script::Partial(text, error) => Ok(StreamHandle::from_events(vec![
                StreamEvent::Content(text),
                StreamEvent::Error(error),
            ])),
            Script::Hang(text) => {
                let (tx, rx) = mpsc::channel(4);
                tx.send(StreamEvent::Content(text)).await.unwrap();
                tokio::spawn(async move {
                    cancel.cancelled().await;
                    drop(tx);
                });
                Ok(StreamHandle::new(rx))
            }
            Script::Slow(text, delay) => {
                let (tx, rx) = mpsc::channel(4);
                let in_flight = Arc::clone(&self.in_flight);
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(StreamEvent::Content(text)).await;
                    // Counted out before the stream closes and frees its slot.
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    drop(tx);
                });
                Ok(StreamHandle::new(rx))
            }
        }
    }
}

// ==================== Fixtures ====================

fn roles() -> ModelRoles {
    ModelRoles {
        participants: vec!["a".to_string(), "b".to_string(), "c".to_string()],
        judge: "judge".to_string(),
        synthesizer: "synth".to_string(),
        title: Some("titler".to_string()),
        summary: Some("summarizer".to_string()),
    }
}

fn params() -> DebateParams {
    DebateParams::default()
        .with_max_rounds(3)
        .with_generate_titles(false)
}

fn orchestrator(
    gateway: &Arc<ScriptedGateway>,
    params: DebateParams,
) -> (TurnOrchestrator<ScriptedGateway>, Arc<InMemoryConversationStore>) {
    let store = Arc::new(InMemoryConversationStore::new());
    let orchestrator = TurnOrchestrator::new(
        Arc::clone(gateway),
        store.clone(),
        OrchestratorConfig::new(roles(), params),
        Conversation::new(),
    );
    (orchestrator, store)
}

fn converged_reply() -> Script {
    Script::Reply(
        r#"{"converged": true, "confidence": 90, "reason": "All agree",
            "agreements": ["fast"], "disagreements": []}"#
            .to_string(),
    )
}

fn rate_limited() -> GatewayError {
    GatewayError::RateLimited {
        provider: "openrouter".to_string(),
        status: 429,
        body: "rate limit exceeded".to_string(),
    }
}

async fn wait_for(
    events: &mut broadcast::Receiver<TurnEvent>,
    matches: impl Fn(&TurnEvent) -> bool,
) -> TurnEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(event) if matches(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("event did not arrive")
}

// ==================== Debate ====================

#[tokio::test]
async fn test_debate_converges_at_round_two() {
    let gateway = ScriptedGateway::new();
    gateway.script("judge", converged_reply());
    let (orchestrator, store) = orchestrator(&gateway, params());

    let turn = orchestrator
        .start(TurnRequest::new("Is Rust fast?"))
        .await
        .unwrap();

    assert_eq!(turn.rounds.len(), 2);
    assert_eq!(turn.debate_metadata.total_rounds, 2);
    assert!(turn.debate_metadata.converged);
    assert_eq!(
        turn.termination_reason(),
        Some(TerminationReason::Converged)
    );
    assert!(turn.rounds[1].convergence_check.as_ref().unwrap().has_converged());
    assert_eq!(turn.answer(), Some("synth answer #1"));

    // Synthesis sees the final round only.
    let synth_prompt = gateway.last_prompt("synth");
    assert!(synth_prompt.contains("a answer #2"));
    assert!(!synth_prompt.contains("a answer #1"));
    assert!(synth_prompt.contains("(the participants converged)"));

    // Rebuttals see the other models' round-1 positions.
    let rebuttal = gateway.last_prompt("a");
    assert!(rebuttal.contains("Your previous position:\na answer #1"));
    assert!(rebuttal.contains("b answer #1"));

    let saved = store
        .load(&orchestrator.conversation_id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(saved.turns[0].answer(), Some("synth answer #1"));
    assert!(store.save_count() > 3);
}

#[tokio::test]
async fn test_all_models_fail_in_first_round() {
    let gateway = ScriptedGateway::new();
    for model in ["a", "b", "c"] {
        gateway.script(model, Script::Fail(rate_limited()));
    }
    let (orchestrator, _) = orchestrator(&gateway, params());

    let err = orchestrator
        .start(TurnRequest::new("q"))
        .await
        .unwrap_err();

    assert!(matches!(err, OrchestratorError::AllModelsFailed));
    assert_eq!(err.kind(), Some(ErrorKind::AllModelsFailed));
    let turn = orchestrator.snapshot().turns.pop().unwrap();
    assert_eq!(
        turn.termination_reason(),
        Some(TerminationReason::AllModelsFailed)
    );
    assert_eq!(turn.rounds[0].status, Status::Error);
    assert_eq!(gateway.call_count("judge"), 0);
    assert_eq!(gateway.call_count("synth"), 0);
    assert!(!orchestrator.is_running());
}

#[tokio::test]
async fn test_single_round_limit_skips_convergence() {
    let gateway = ScriptedGateway::new();
    let (orchestrator, _) = orchestrator(&gateway, params().with_max_rounds(1));

    let turn = orchestrator.start(TurnRequest::new("q")).await.unwrap();

    assert_eq!(turn.rounds.len(), 1);
    assert_eq!(gateway.call_count("judge"), 0);
    assert_eq!(
        turn.termination_reason(),
        Some(TerminationReason::MaxRoundsReached)
    );
    assert_eq!(turn.debate_metadata.total_rounds, 1);
}

#[tokio::test]
async fn test_no_convergence_checks_last_round() {
    let gateway = ScriptedGateway::new();
    let (orchestrator, _) = orchestrator(&gateway, params());

    let turn = orchestrator
        .start(TurnRequest::new("q").with_max_rounds(4))
        .await
        .unwrap();

    assert_eq!(turn.rounds.len(), 4);
    // Rounds 2 and 3 only.
    assert_eq!(gateway.call_count("judge"), 2);
    assert!(turn.rounds[3].convergence_check.is_none());
    assert_eq!(
        turn.termination_reason(),
        Some(TerminationReason::MaxRoundsReached)
    );
    assert_eq!(turn.rounds[2].label, "Rebuttal round 2");
}

#[tokio::test]
async fn test_malformed_convergence_reply_continues() {
    let gateway = ScriptedGateway::new();
    gateway.script("judge", Script::Reply("I think they mostly agree".into()));
    let (orchestrator, _) = orchestrator(&gateway, params());

    let turn = orchestrator.start(TurnRequest::new("q")).await.unwrap();

    assert_eq!(turn.rounds.len(), 3);
    let check = turn.rounds[1].convergence_check.as_ref().unwrap();
    assert_eq!(check.converged, Some(false));
    assert!(check.reason.starts_with("Could not parse"));
}

#[tokio::test]
async fn test_failed_model_carries_forward_previous_position() {
    let gateway = ScriptedGateway::new();
    gateway.script("b", Script::Reply("b holds firm".into()));
    gateway.script("b", Script::Fail(rate_limited()));
    let (orchestrator, _) = orchestrator(&gateway, params().with_max_rounds(2));

    let turn = orchestrator.start(TurnRequest::new("q")).await.unwrap();

    let carried = &turn.rounds[1].streams[1];
    assert!(carried.carried_forward);
    assert_eq!(carried.status, Status::Error);
    assert_eq!(carried.content, "b holds firm");
    assert!(carried.error.as_deref().unwrap().contains("previous round"));
    assert_eq!(turn.rounds[1].status, Status::Complete);
    assert!(gateway.last_prompt("synth").contains("b holds firm"));
}

#[tokio::test]
async fn test_partial_stream_error_keeps_text() {
    let gateway = ScriptedGateway::new();
    gateway.script("c", Script::Partial("half".into(), "overloaded".into()));
    let (orchestrator, _) = orchestrator(&gateway, params().with_max_rounds(1));

    let turn = orchestrator.start(TurnRequest::new("q")).await.unwrap();

    let stream = &turn.rounds[0].streams[2];
    assert_eq!(stream.status, Status::Error);
    assert_eq!(stream.content, "half");
    assert!(!stream.has_position());
    assert!(!gateway.last_prompt("synth").contains("half"));
}

// ==================== Ensemble & parallel ====================

#[tokio::test]
async fn test_ensemble_weights_only_answering_models() {
    let gateway = ScriptedGateway::new();
    gateway.script("b", Script::Fail(rate_limited()));
    gateway.script(
        "judge",
        Script::Reply(
            r#"{"confidence": 80, "outliers": [{"model": "c", "reason": "off"}],
                "agreementAreas": ["speed"], "modelWeights": {"a": 0.9, "b": 0.5, "c": 0.3}}"#
                .into(),
        ),
    );
    let (orchestrator, _) = orchestrator(&gateway, params());

    let turn = orchestrator
        .start(TurnRequest::new("q").with_mode(TurnMode::Ensemble))
        .await
        .unwrap();

    let vote = turn.ensemble_result.as_ref().unwrap();
    assert_eq!(vote.status, EnsembleStatus::Complete);
    assert_eq!(vote.confidence, 80);
    assert!(vote.model_weights.contains_key("a"));
    assert!(!vote.model_weights.contains_key("b"));
    assert!(vote.is_outlier("c"));
    assert_eq!(
        turn.termination_reason(),
        Some(TerminationReason::EnsembleVote)
    );
    assert_eq!(turn.rounds.len(), 1);
    assert_eq!(turn.rounds[0].label, "Independent answers");

    let synth_prompt = gateway.last_prompt("synth");
    assert!(synth_prompt.contains("(weight 0.90)"));
    assert!(synth_prompt.contains("[outlier]"));
    assert!(synth_prompt.contains("Judge confidence: 80%"));
}

#[tokio::test]
async fn test_ensemble_judge_failure_still_synthesizes() {
    let gateway = ScriptedGateway::new();
    gateway.script(
        "judge",
        Script::Fail(GatewayError::UpstreamHttp {
            provider: "openrouter".into(),
            status: 502,
            body: "bad gateway".into(),
        }),
    );
    let (orchestrator, _) = orchestrator(&gateway, params());

    let turn = orchestrator
        .start(TurnRequest::new("q").with_mode(TurnMode::Ensemble))
        .await
        .unwrap();

    let vote = turn.ensemble_result.as_ref().unwrap();
    assert_eq!(vote.status, EnsembleStatus::Error);
    assert_eq!(vote.confidence, roundtable_domain::NEUTRAL_CONFIDENCE);
    assert!(vote.error.as_deref().unwrap().contains("502"));
    assert_eq!(turn.answer(), Some("synth answer #1"));
}

#[tokio::test]
async fn test_unparseable_vote_uses_neutral_values() {
    let gateway = ScriptedGateway::new();
    gateway.script("judge", Script::Reply("They are all fine.".into()));
    let (orchestrator, _) = orchestrator(&gateway, params());

    let turn = orchestrator
        .start(TurnRequest::new("q").with_mode(TurnMode::Ensemble))
        .await
        .unwrap();

    let vote = turn.ensemble_result.as_ref().unwrap();
    assert_eq!(vote.status, EnsembleStatus::Complete);
    assert_eq!(vote.confidence, 50);
    assert!(vote.model_weights.is_empty());
    assert_eq!(vote.raw_analysis, "They are all fine.");
}

#[tokio::test]
async fn test_parallel_makes_no_judge_or_synthesis_calls() {
    let gateway = ScriptedGateway::new();
    let (orchestrator, _) = orchestrator(&gateway, params());

    let turn = orchestrator
        .start(TurnRequest::new("q").with_mode(TurnMode::Parallel))
        .await
        .unwrap();

    assert!(turn.synthesis.is_none());
    assert_eq!(gateway.call_count("judge"), 0);
    assert_eq!(gateway.call_count("synth"), 0);
    assert_eq!(
        turn.termination_reason(),
        Some(TerminationReason::ParallelOnly)
    );
    assert_eq!(turn.rounds[0].completed_count(), 3);
}

#[tokio::test]
async fn test_model_calls_respect_max_concurrency() {
    let gateway = ScriptedGateway::new();
    let models = ["a", "b", "c", "d"];
    for model in models {
        gateway.script(
            model,
            Script::Slow(format!("{} answer", model), Duration::from_millis(50)),
        );
    }
    let (orchestrator, _) = orchestrator(&gateway, params().with_max_concurrency(2));

    let turn = orchestrator
        .start(
            TurnRequest::new("q")
                .with_mode(TurnMode::Parallel)
                .with_models(models.iter().map(|m| m.to_string()).collect()),
        )
        .await
        .unwrap();

    assert_eq!(turn.rounds[0].completed_count(), 4);
    assert_eq!(gateway.peak_in_flight.load(Ordering::SeqCst), 2);
    assert_eq!(gateway.in_flight.load(Ordering::SeqCst), 0);
}

// ==================== Retry & continue ====================

#[tokio::test]
async fn test_retry_stream_reissues_one_call() {
    let gateway = ScriptedGateway::new();
    gateway.script("b", Script::Fail(rate_limited()));
    let (orchestrator, _) = orchestrator(&gateway, params());
    let first = orchestrator
        .start(TurnRequest::new("q").with_mode(TurnMode::Parallel))
        .await
        .unwrap();
    assert_eq!(first.rounds[0].streams[1].status, Status::Error);

    let turn = orchestrator.retry_stream(0, 1).await.unwrap();

    assert_eq!(gateway.call_count("a"), 1);
    assert_eq!(gateway.call_count("b"), 2);
    assert_eq!(gateway.call_count("c"), 1);
    assert_eq!(turn.rounds[0].streams[0], first.rounds[0].streams[0]);
    assert_eq!(turn.rounds[0].streams[2], first.rounds[0].streams[2]);
    assert_eq!(turn.rounds[0].streams[1].content, "b answer #2");
    assert_eq!(turn.rounds[0].streams[1].status, Status::Complete);
}

#[tokio::test]
async fn test_retry_stream_rejects_bad_indices() {
    let gateway = ScriptedGateway::new();
    let (orchestrator, _) = orchestrator(&gateway, params().with_max_rounds(1));
    orchestrator.start(TurnRequest::new("q")).await.unwrap();

    assert!(matches!(
        orchestrator.retry_stream(0, 7).await,
        Err(OrchestratorError::InvalidStream { round: 0, stream: 7 })
    ));
    assert!(matches!(
        orchestrator.retry_round(3).await,
        Err(OrchestratorError::InvalidRound(3))
    ));
}

#[tokio::test]
async fn test_retry_round_reruns_round_and_synthesis() {
    let gateway = ScriptedGateway::new();
    let (orchestrator, _) = orchestrator(&gateway, params().with_max_rounds(1));
    orchestrator.start(TurnRequest::new("q")).await.unwrap();

    let turn = orchestrator.retry_round(0).await.unwrap();

    for model in ["a", "b", "c", "synth"] {
        assert_eq!(gateway.call_count(model), 2, "{model}");
    }
    assert_eq!(turn.rounds[0].streams[0].content, "a answer #2");
    assert_eq!(turn.answer(), Some("synth answer #2"));
}

#[tokio::test]
async fn test_retrying_an_early_round_discards_later_rounds() {
    let gateway = ScriptedGateway::new();
    let (orchestrator, _) = orchestrator(&gateway, params().with_max_rounds(2));
    orchestrator.start(TurnRequest::new("q")).await.unwrap();

    let turn = orchestrator.retry_stream(0, 0).await.unwrap();

    assert_eq!(turn.rounds.len(), 2);
    assert_eq!(turn.rounds[0].streams[0].content, "a answer #3");
    assert_eq!(turn.rounds[0].streams[1].content, "b answer #1");
    // Round 2 was re-run with the new round-1 position.
    assert_eq!(gateway.call_count("b"), 3);
    assert!(gateway.last_prompt("b").contains("a answer #3"));
}

#[tokio::test]
async fn test_continue_after_synthesis_failure_reuses_rounds() {
    let gateway = ScriptedGateway::new();
    gateway.script(
        "synth",
        Script::Fail(GatewayError::InsufficientCredits {
            provider: "openrouter".into(),
            status: 402,
            body: "add credits".into(),
        }),
    );
    let (orchestrator, _) = orchestrator(&gateway, params().with_max_rounds(1));

    let err = orchestrator
        .start(TurnRequest::new("q"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::InsufficientCredits));
    let failed = orchestrator.snapshot().turns.pop().unwrap();
    assert_eq!(failed.synthesis.as_ref().unwrap().status, Status::Error);

    let turn = orchestrator.continue_from_checkpoint().await.unwrap();

    assert_eq!(gateway.call_count("a"), 1);
    assert_eq!(gateway.call_count("synth"), 2);
    assert_eq!(turn.answer(), Some("synth answer #2"));

    // Finished turns are returned as they are.
    let again = orchestrator.continue_from_checkpoint().await.unwrap();
    assert_eq!(again, turn);
    assert_eq!(gateway.call_count("synth"), 2);
}

#[tokio::test]
async fn test_continue_without_turn() {
    let gateway = ScriptedGateway::new();
    let (orchestrator, _) = orchestrator(&gateway, params());
    assert!(matches!(
        orchestrator.continue_from_checkpoint().await,
        Err(OrchestratorError::NoActiveTurn)
    ));
}

// ==================== Cancellation ====================

#[tokio::test]
async fn test_cancel_keeps_partials_and_continue_resumes() {
    let gateway = ScriptedGateway::new();
    gateway.script("a", Script::Hang("thinking".into()));
    let (orchestrator, _) = orchestrator(&gateway, params().with_max_rounds(1));
    let mut events = orchestrator.subscribe();

    let (result, ()) = tokio::join!(orchestrator.start(TurnRequest::new("q")), async {
        let mut delta_seen = false;
        let mut finished = 0;
        while !(delta_seen && finished == 2) {
            match wait_for(&mut events, |_| true).await {
                TurnEvent::StreamDelta { stream_index: 0, .. } => delta_seen = true,
                TurnEvent::StreamFinished { .. } => finished += 1,
                _ => {}
            }
        }
        orchestrator.cancel();
    });

    assert!(matches!(result, Err(OrchestratorError::Cancelled)));
    let turn = orchestrator.snapshot().turns.pop().unwrap();
    let stream = &turn.rounds[0].streams[0];
    assert_eq!(stream.status, Status::Error);
    assert_eq!(stream.error.as_deref(), Some("cancelled"));
    assert_eq!(stream.content, "thinking");
    assert_eq!(
        turn.termination_reason(),
        Some(TerminationReason::Cancelled)
    );
    assert_eq!(gateway.call_count("synth"), 0);

    let resumed = orchestrator.continue_from_checkpoint().await.unwrap();

    assert_eq!(gateway.call_count("a"), 2);
    assert_eq!(gateway.call_count("b"), 1);
    assert_eq!(resumed.rounds[0].streams[0].content, "a answer #2");
    assert_eq!(resumed.answer(), Some("synth answer #1"));
}

// ==================== Events & auxiliary calls ====================

#[tokio::test]
async fn test_event_order_for_single_model_turn() {
    let gateway = ScriptedGateway::new();
    let (orchestrator, _) = orchestrator(&gateway, params().with_max_rounds(1));
    let mut events = orchestrator.subscribe();

    orchestrator
        .start(TurnRequest::new("q").with_models(vec!["a".to_string()]))
        .await
        .unwrap();

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event.event_type());
    }
    assert_eq!(
        seen,
        vec![
            "turn_started",
            "round_started",
            "stream_started",
            "stream_delta",
            "stream_finished",
            "round_finished",
            "synthesis_started",
            "synthesis_delta",
            "synthesis_finished",
            "turn_finished",
        ]
    );
}

#[tokio::test]
async fn test_client_api_key_is_forwarded() {
    let gateway = ScriptedGateway::new();
    let store = Arc::new(InMemoryConversationStore::new());
    let config = OrchestratorConfig::new(roles(), params().with_max_rounds(1))
        .with_client_api_key(Some("sk-client".to_string()));
    let orchestrator =
        TurnOrchestrator::new(Arc::clone(&gateway), store, config, Conversation::new());

    orchestrator.start(TurnRequest::new("q")).await.unwrap();

    let calls = gateway.calls.lock().unwrap();
    assert!(!calls.is_empty());
    assert!(
        calls
            .iter()
            .all(|r| r.client_api_key.as_deref() == Some("sk-client"))
    );
}

#[tokio::test]
async fn test_no_models_is_rejected() {
    let gateway = ScriptedGateway::new();
    let (orchestrator, _) = orchestrator(&gateway, params());
    assert!(matches!(
        orchestrator
            .start(TurnRequest::new("q").with_models(vec![]))
            .await,
        Err(OrchestratorError::NoModels)
    ));
    assert!(orchestrator.snapshot().turns.is_empty());
}

#[tokio::test]
async fn test_title_generated_after_first_turn() {
    let gateway = ScriptedGateway::new();
    gateway.script(
        "titler",
        Script::Reply(r#"{"title": "Rust speed", "description": "Is Rust fast?"}"#.into()),
    );
    let (orchestrator, store) = orchestrator(
        &gateway,
        params().with_max_rounds(1).with_generate_titles(true),
    );
    let mut events = orchestrator.subscribe();

    orchestrator.start(TurnRequest::new("q")).await.unwrap();
    let event = wait_for(&mut events, |e| {
        matches!(e, TurnEvent::TitleUpdated { .. })
    })
    .await;

    assert_eq!(
        event,
        TurnEvent::TitleUpdated {
            title: "Rust speed".into(),
            description: "Is Rust fast?".into(),
        }
    );
    assert_eq!(orchestrator.snapshot().title, "Rust speed");
    let saved = store
        .load(&orchestrator.conversation_id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(saved.title, "Rust speed");
    assert!(gateway.last_prompt("titler").contains("synth answer #1"));
}

#[tokio::test]
async fn test_overflowing_history_is_summarized() {
    let gateway = ScriptedGateway::new();
    let params = params()
        .with_mode(TurnMode::Parallel)
        .with_context(ContextBudget::default().with_threshold_tokens(1));
    let (orchestrator, _) = orchestrator(&gateway, params);

    orchestrator.start(TurnRequest::new("first")).await.unwrap();
    orchestrator.start(TurnRequest::new("second")).await.unwrap();
    // The latest prior turn is always kept, so nothing is dropped yet.
    assert_eq!(gateway.call_count("summarizer"), 0);

    let mut events = orchestrator.subscribe();
    orchestrator.start(TurnRequest::new("third")).await.unwrap();
    let event = wait_for(&mut events, |e| {
        matches!(e, TurnEvent::SummaryUpdated { .. })
    })
    .await;

    assert_eq!(
        event,
        TurnEvent::SummaryUpdated {
            summarized_turn_count: 1
        }
    );
    let conversation = orchestrator.snapshot();
    assert_eq!(conversation.summarized_turn_count, 1);
    assert_eq!(
        conversation.running_summary.as_deref(),
        Some("summarizer answer #1")
    );
    assert!(gateway.last_prompt("summarizer").contains("User: first"));
    assert!(!gateway.last_prompt("summarizer").contains("User: second"));

    // The third turn's history was trimmed to the latest prior turn.
    let third = gateway.last_prompt("a");
    assert_eq!(third, "third");
    let history: Vec<String> = gateway.calls_to("a")[2]
        .messages
        .iter()
        .map(|m| m.content.clone())
        .collect();
    assert!(history.iter().any(|m| m == "second"));
    assert!(!history.iter().any(|m| m == "first"));
}

// ==================== Persistence ====================

/// In-memory store whose first save stalls, so a later save can overtake it.
#[derive(Default)]
struct StallingStore {
    inner: InMemoryConversationStore,
    saves: AtomicUsize,
}

#[async_trait]
impl ConversationStore for StallingStore {
    async fn load(&self, id: &str) -> Result<Option<Conversation>, StoreError> {
        self.inner.load(id).await
    }

    async fn save(&self, conversation: &Conversation) -> Result<(), StoreError> {
        if self.saves.fetch_add(1, Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        self.inner.save(conversation).await
    }

    async fn list(&self) -> Result<Vec<ConversationSummary>, StoreError> {
        self.inner.list().await
    }
}

#[tokio::test]
async fn test_background_save_lands_after_an_older_snapshot() {
    let gateway = ScriptedGateway::new();
    let store = Arc::new(StallingStore::default());
    let orchestrator = TurnOrchestrator::new(
        Arc::clone(&gateway),
        store.clone(),
        OrchestratorConfig::new(roles(), params()),
        Conversation::new(),
    );
    let id = orchestrator.snapshot().id;
    let background = orchestrator.background();

    tokio::join!(orchestrator.persist(), async {
        tokio::task::yield_now().await;
        background
            .commit(|conversation| {
                conversation.title = "Named".to_string();
                Some(TurnEvent::TitleUpdated {
                    title: "Named".to_string(),
                    description: String::new(),
                })
            })
            .await;
    });

    assert_eq!(store.saves.load(Ordering::SeqCst), 2);
    let saved = store.load(&id).await.unwrap().unwrap();
    assert_eq!(saved.title, "Named");
}
