//! Round execution: per-model messages, concurrent fan-out, settle-all fan-in.

use super::{OrchestratorError, TurnOrchestrator};
use crate::ports::llm_gateway::{GatewayError, LlmGateway};
use crate::ports::turn_events::TurnEvent;
use crate::use_cases::stream_reader::{StreamFailure, read_stream};
use roundtable_domain::{
    DebateMetadata, Message, PromptTemplate, Round, Status, StreamEvent, TerminationReason, Turn,
};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One stream to (re-)issue.
struct StreamJob {
    stream_index: usize,
    model: String,
    messages: Vec<Message>,
}

impl<G: LlmGateway + ?Sized + 'static> TurnOrchestrator<G> {
    /// Run the selected streams of a round, then settle it.
    ///
    /// Returns `Cancelled` if cancellation was observed and
    /// `AllModelsFailed` if no stream in the round completed.
    pub(super) async fn run_round(
        &self,
        round_index: usize,
        rerun: &[usize],
        history: &[Message],
        cancel: &CancellationToken,
    ) -> Result<(), OrchestratorError> {
        if cancel.is_cancelled() {
            return Err(OrchestratorError::Cancelled);
        }

        let (round_number, label, jobs) = self.with_turn(|turn| {
            let round = &turn.rounds[round_index];
            let jobs: Vec<StreamJob> = rerun
                .iter()
                .filter_map(|&stream_index| {
                    round.streams.get(stream_index).map(|stream| StreamJob {
                        stream_index,
                        model: stream.model.clone(),
                        messages: stream_messages(turn, round_index, stream_index, history),
                    })
                })
                .collect();
            (round.round_number, round.label.clone(), jobs)
        })?;

        self.emit(TurnEvent::RoundStarted {
            round_index,
            round_number,
            label,
        });

        if !jobs.is_empty() {
            info!(
                "Round {}: querying {} model(s)",
                round_number,
                jobs.len()
            );
            self.with_turn(|t| t.rounds[round_index].status = Status::Streaming)?;
            self.fan_out(round_index, jobs, cancel).await?;
        }

        if cancel.is_cancelled() {
            return Err(OrchestratorError::Cancelled);
        }

        self.settle_round(round_index).await
    }

    /// Issue every job concurrently and wait for all of them to settle.
    async fn fan_out(
        &self,
        round_index: usize,
        jobs: Vec<StreamJob>,
        cancel: &CancellationToken,
    ) -> Result<(), OrchestratorError> {
        let stall = self.config.params().effective_stall_timeout();
        let mut join_set = JoinSet::new();

        for job in jobs {
            let StreamJob {
                stream_index,
                model,
                messages,
            } = job;

            self.with_turn(|t| t.rounds[round_index].streams[stream_index].begin())?;
            self.emit(TurnEvent::StreamStarted {
                round_index,
                stream_index,
                model: model.clone(),
            });

            let gateway = Arc::clone(&self.gateway);
            let permits = Arc::clone(&self.permits);
            let events = self.events.clone();
            let cancel = cancel.clone();
            let request = self.request(&model, messages);

            join_set.spawn(async move {
                let result = match acquire(permits, &cancel).await {
                    Some(_permit) => {
                        read_stream(gateway.as_ref(), request, &cancel, stall, |event| {
                            if let Some(text) = event.text() {
                                let _ = events.send(TurnEvent::StreamDelta {
                                    round_index,
                                    stream_index,
                                    delta: text.to_string(),
                                    reasoning: matches!(event, StreamEvent::Reasoning(_)),
                                });
                            }
                        })
                        .await
                    }
                    None => Err(StreamFailure {
                        error: GatewayError::Cancelled,
                        partial: String::new(),
                        duration_ms: 0,
                    }),
                };
                (stream_index, model, result)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            let (stream_index, model, result) = match joined {
                Ok(settled) => settled,
                Err(e) => {
                    warn!("Stream task failed: {}", e);
                    continue;
                }
            };

            let event = self.with_turn(|t| {
                let stream = &mut t.rounds[round_index].streams[stream_index];
                match result {
                    Ok(outcome) => {
                        info!("Model {} responded ({} ms)", model, outcome.duration_ms);
                        stream.complete(
                            outcome.content,
                            outcome.reasoning,
                            outcome.usage,
                            outcome.duration_ms,
                        );
                    }
                    Err(failure) => {
                        let message = if failure.is_cancelled() {
                            "cancelled".to_string()
                        } else {
                            failure.error.to_string()
                        };
                        warn!("Model {} failed: {}", model, message);
                        stream.fail(message, failure.partial, Some(failure.duration_ms));
                    }
                }
                TurnEvent::StreamFinished {
                    round_index,
                    stream_index,
                    model,
                    status: stream.status,
                    error: stream.error.clone(),
                    duration_ms: stream.duration_ms,
                    carried_forward: false,
                }
            })?;
            self.emit(event);
            self.persist().await;
        }

        // A panicked task never reports back; its stream must still settle.
        self.with_turn(|t| {
            for stream in &mut t.rounds[round_index].streams {
                if stream.status == Status::Streaming {
                    stream.fail("stream task aborted", String::new(), None);
                }
            }
        })?;
        Ok(())
    }

    /// Carry forward failed models, decide the round's status, save.
    async fn settle_round(&self, round_index: usize) -> Result<(), OrchestratorError> {
        let (round_number, completed, total, carried) = self.with_turn(|turn| {
            let completed = turn.rounds[round_index]
                .streams
                .iter()
                .filter(|s| s.is_complete() && !s.content.trim().is_empty())
                .count();
            let carried = if completed > 0 {
                carry_forward(turn, round_index)
            } else {
                Vec::new()
            };
            let round = &mut turn.rounds[round_index];
            round.status = if completed > 0 {
                Status::Complete
            } else {
                Status::Error
            };
            if completed == 0 {
                turn.debate_metadata = DebateMetadata::terminated(
                    round.round_number,
                    TerminationReason::AllModelsFailed,
                );
            }
            let round = &turn.rounds[round_index];
            let carried: Vec<TurnEvent> = carried
                .into_iter()
                .map(|i| {
                    let stream = &round.streams[i];
                    TurnEvent::StreamFinished {
                        round_index,
                        stream_index: i,
                        model: stream.model.clone(),
                        status: stream.status,
                        error: stream.error.clone(),
                        duration_ms: stream.duration_ms,
                        carried_forward: true,
                    }
                })
                .collect();
            (round.round_number, completed, round.streams.len(), carried)
        })?;

        for event in carried {
            self.emit(event);
        }
        self.emit(TurnEvent::RoundFinished {
            round_index,
            status: if completed > 0 {
                Status::Complete
            } else {
                Status::Error
            },
            completed,
            total,
        });
        self.persist().await;

        if completed == 0 {
            warn!("Round {}: all models failed", round_number);
            return Err(OrchestratorError::AllModelsFailed);
        }
        debug!("Round {}: {}/{} completed", round_number, completed, total);
        Ok(())
    }

    /// Append the next debate round with the same model panel.
    pub(super) fn push_round(&self, round_index: usize) -> Result<(), OrchestratorError> {
        self.with_turn(|turn| {
            let models = turn.rounds[round_index - 1].models();
            let round_number = round_index as u32 + 1;
            turn.rounds.truncate(round_index);
            turn.rounds.push(Round::new(
                round_number,
                PromptTemplate::round_label(round_number),
                &models,
            ));
        })
    }
}

async fn acquire(
    permits: Arc<Semaphore>,
    cancel: &CancellationToken,
) -> Option<OwnedSemaphorePermit> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        permit = permits.acquire_owned() => permit.ok(),
    }
}

/// Give failed streams the model's previous-round position.
///
/// Returns the indices that were carried.
fn carry_forward(turn: &mut Turn, round_index: usize) -> Vec<usize> {
    let Some(previous_index) = round_index.checked_sub(1) else {
        return Vec::new();
    };
    let (before, rest) = turn.rounds.split_at_mut(round_index);
    let previous = &before[previous_index];
    let round = &mut rest[0];

    let mut carried = Vec::new();
    for (i, stream) in round.streams.iter_mut().enumerate() {
        if stream.status != Status::Error || stream.carried_forward {
            continue;
        }
        if let Some(prev) = previous.streams.get(i).filter(|p| p.has_position()) {
            stream.carry_forward(prev);
            carried.push(i);
        }
    }
    carried
}

/// Prompt for one stream: round-1 semantics for the first round and for
/// single-round modes, rebuttal semantics for later debate rounds.
pub(super) fn stream_messages(
    turn: &Turn,
    round_index: usize,
    stream_index: usize,
    history: &[Message],
) -> Vec<Message> {
    let user_content = initial_user_content(turn);

    let previous = round_index
        .checked_sub(1)
        .and_then(|i| turn.rounds.get(i));
    let Some(previous) = previous else {
        let mut messages = vec![Message::system(PromptTemplate::initial_system())];
        messages.extend_from_slice(history);
        messages.push(Message::user(user_content));
        return messages;
    };

    let own = previous
        .streams
        .get(stream_index)
        .filter(|s| s.has_position())
        .map(|s| s.content.as_str());
    let others: Vec<(String, String)> = previous
        .positions()
        .filter(|(i, _)| *i != stream_index)
        .map(|(_, s)| (s.model.clone(), s.content.clone()))
        .collect();
    let round_number = round_index as u32 + 1;

    let mut messages = vec![Message::system(PromptTemplate::rebuttal_system())];
    messages.extend_from_slice(history);
    messages.push(Message::user(format!(
        "{}\n\n---\n\n{}",
        user_content,
        PromptTemplate::rebuttal_prompt(&turn.user_prompt, round_number, own, &others)
    )));
    messages
}

/// The user prompt with attachments and web search context.
pub(super) fn initial_user_content(turn: &Turn) -> String {
    let mut content = PromptTemplate::initial_user(&turn.user_prompt, &turn.attachments);
    if let Some(search) = &turn.web_search {
        content.push_str("\n\n");
        content.push_str(&PromptTemplate::web_context(search));
    }
    content
}

/// `(model, content)` for every position in a round.
pub(super) fn positions(round: &Round) -> Vec<(String, String)> {
    round
        .positions()
        .map(|(_, s)| (s.model.clone(), s.content.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use roundtable_domain::{Role, TurnMode};

    fn debate_turn() -> Turn {
        let models = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let mut turn = Turn::new("Is Rust fast?", TurnMode::Debate);
        let mut round = Round::new(1, "Initial positions", &models);
        round.streams[0].complete("A says yes".into(), None, None, 1);
        round.streams[1].fail("boom", String::new(), None);
        round.streams[2].complete("C says mostly".into(), None, None, 1);
        turn.rounds.push(round);
        turn.rounds.push(Round::new(2, "Rebuttal round 1", &models));
        turn
    }

    #[test]
    fn test_round_one_messages_include_history() {
        let turn = debate_turn();
        let history = vec![Message::user("earlier"), Message::assistant("digest")];
        let messages = stream_messages(&turn, 0, 0, &history);
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[1].content, "earlier");
        assert_eq!(messages[3].content, "Is Rust fast?");
    }

    #[test]
    fn test_rebuttal_messages_use_previous_positions() {
        let turn = debate_turn();
        let messages = stream_messages(&turn, 1, 0, &[]);
        let prompt = &messages.last().unwrap().content;
        assert!(prompt.contains("Your previous position:\nA says yes"));
        assert!(prompt.contains("--- c ---\nC says mostly"));
        assert!(!prompt.contains("--- a ---"));
        assert!(!prompt.contains("--- b ---"));
    }

    #[test]
    fn test_rebuttal_for_model_without_position() {
        let turn = debate_turn();
        let messages = stream_messages(&turn, 1, 1, &[]);
        let prompt = &messages.last().unwrap().content;
        assert!(prompt.contains("did not give a usable answer"));
        assert!(prompt.contains("--- a ---"));
        assert!(prompt.contains("--- c ---"));
    }

    #[test]
    fn test_carry_forward_only_from_previous_position() {
        let mut turn = debate_turn();
        turn.rounds[1].streams[0].fail("rate limited", String::new(), None);
        turn.rounds[1].streams[1].fail("rate limited", String::new(), None);
        turn.rounds[1].streams[2].complete("C again".into(), None, None, 1);

        let carried = carry_forward(&mut turn, 1);
        assert_eq!(carried, vec![0]);
        let round = &turn.rounds[1];
        assert!(round.streams[0].carried_forward);
        assert_eq!(round.streams[0].content, "A says yes");
        assert_eq!(round.streams[0].status, Status::Error);
        assert!(!round.streams[1].carried_forward);

        // idempotent
        assert!(carry_forward(&mut turn, 1).is_empty());
    }

    #[test]
    fn test_first_round_never_carries() {
        let mut turn = debate_turn();
        assert!(carry_forward(&mut turn, 0).is_empty());
    }
}
