//! Turn orchestrator
//!
//! Owns one conversation and runs its active turn through the debate,
//! ensemble or parallel protocol.
//!
//! # State machine
//!
//! ```text
//! Idle ─▶ Round(1) ─▶ [Round(2..max)] ─▶ Synthesis ─▶ Terminal
//!            │              │                 │
//!            └── all failed ┴── cancelled ────┴──▶ Terminal (error)
//! ```
//!
//! Fresh start, whole-round retry, single-stream retry and "continue" are
//! the same transition: resume from a [`Checkpoint`] (round index plus the
//! stream indices to re-issue). Everything after the checkpoint (convergence
//! checks, further rounds, vote, synthesis) runs through one code path.
//!
//! # Events
//!
//! Every state transition is published as a [`TurnEvent`] on a broadcast
//! channel; see [`TurnOrchestrator::subscribe`].

mod auxiliary;
mod modes;
mod rounds;
mod synthesis;
#[cfg(test)]
mod tests;

use crate::config::OrchestratorConfig;
use crate::ports::conversation_store::{ConversationStore, StoreError};
use crate::ports::llm_gateway::{ChatRequest, LlmGateway};
use crate::ports::turn_events::TurnEvent;
use roundtable_domain::{
    Attachment, Conversation, DebateMetadata, EnsembleResult, EnsembleStatus, ErrorKind,
    HistoryWindow, Message, ModelStream, PromptTemplate, Round, Status, Synthesis,
    TerminationReason, Turn, TurnMode, WebSearchResult, build_history,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::{Semaphore, broadcast};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const EVENT_CAPACITY: usize = 1024;

/// Errors that end a turn command
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("No models selected")]
    NoModels,

    #[error("A turn is already running")]
    TurnInProgress,

    #[error("Conversation has no turn to resume")]
    NoActiveTurn,

    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("Round {0} does not exist")]
    InvalidRound(usize),

    #[error("Stream {stream} does not exist in round {round}")]
    InvalidStream { round: usize, stream: usize },

    #[error("All models failed to respond")]
    AllModelsFailed,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Synthesis failed: {message}")]
    SynthesisFailed { kind: ErrorKind, message: String },

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

impl OrchestratorError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, OrchestratorError::Cancelled)
    }

    /// Failure kind for turn-terminal errors
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            OrchestratorError::AllModelsFailed => Some(ErrorKind::AllModelsFailed),
            OrchestratorError::Cancelled => Some(ErrorKind::Cancelled),
            OrchestratorError::SynthesisFailed { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

/// Input for [`TurnOrchestrator::start`]
#[derive(Debug, Clone, Default)]
pub struct TurnRequest {
    pub prompt: String,
    pub attachments: Vec<Attachment>,
    /// Falls back to the configured mode
    pub mode: Option<TurnMode>,
    /// Falls back to the configured participants
    pub models: Option<Vec<String>>,
    /// Falls back to the configured round limit
    pub max_rounds: Option<u32>,
    pub web_search: Option<WebSearchResult>,
}

impl TurnRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn with_mode(mut self, mode: TurnMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn with_models(mut self, models: Vec<String>) -> Self {
        self.models = Some(models);
        self
    }

    pub fn with_max_rounds(mut self, max_rounds: u32) -> Self {
        self.max_rounds = Some(max_rounds);
        self
    }

    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }

    pub fn with_web_search(mut self, search: WebSearchResult) -> Self {
        self.web_search = Some(search);
        self
    }
}

/// Where a run resumes: a round and the streams in it to re-issue.
///
/// An empty `rerun` means the round's streams stand as they are.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    pub round_index: usize,
    pub rerun: Vec<usize>,
}

impl Checkpoint {
    pub fn whole_round(round_index: usize, stream_count: usize) -> Self {
        Self {
            round_index,
            rerun: (0..stream_count).collect(),
        }
    }
}

/// Clears the in-progress flag when a command returns.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Stateful orchestrator for one conversation
pub struct TurnOrchestrator<G: LlmGateway + ?Sized + 'static> {
    gateway: Arc<G>,
    store: Arc<dyn ConversationStore>,
    config: OrchestratorConfig,
    conversation: Arc<Mutex<Conversation>>,
    events: broadcast::Sender<TurnEvent>,
    cancel: Mutex<CancellationToken>,
    running: AtomicBool,
    /// Bumped on every new turn; stale background results compare against it.
    generation: Arc<AtomicU64>,
    permits: Arc<Semaphore>,
    /// Held from snapshot to stored, by every writer of this conversation
    save_lock: Arc<tokio::sync::Mutex<()>>,
}

impl<G: LlmGateway + ?Sized + 'static> TurnOrchestrator<G> {
    pub fn new(
        gateway: Arc<G>,
        store: Arc<dyn ConversationStore>,
        config: OrchestratorConfig,
        conversation: Conversation,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let permits = Arc::new(Semaphore::new(config.params().effective_max_concurrency()));
        Self {
            gateway,
            store,
            config,
            conversation: Arc::new(Mutex::new(conversation)),
            events,
            cancel: Mutex::new(CancellationToken::new()),
            running: AtomicBool::new(false),
            generation: Arc::new(AtomicU64::new(0)),
            permits,
            save_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Load `conversation_id` from the store, or begin a new conversation.
    pub async fn open(
        gateway: Arc<G>,
        store: Arc<dyn ConversationStore>,
        config: OrchestratorConfig,
        conversation_id: Option<&str>,
    ) -> Result<Self, OrchestratorError> {
        let conversation = match conversation_id {
            Some(id) => store
                .load(id)
                .await?
                .ok_or_else(|| OrchestratorError::ConversationNotFound(id.to_string()))?,
            None => Conversation::new(),
        };
        Ok(Self::new(gateway, store, config, conversation))
    }

    // ==================== Queries ====================

    /// Subscribe to state transitions from now on
    pub fn subscribe(&self) -> broadcast::Receiver<TurnEvent> {
        self.events.subscribe()
    }

    pub fn snapshot(&self) -> Conversation {
        self.lock().clone()
    }

    pub fn conversation_id(&self) -> String {
        self.lock().id.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    // ==================== Commands ====================

    /// Abort every in-flight call of the active turn
    pub fn cancel(&self) {
        let token = self.cancel.lock().unwrap_or_else(PoisonError::into_inner);
        info!("Cancelling active turn");
        token.cancel();
    }

    /// Run a new turn to its terminal state
    pub async fn start(&self, request: TurnRequest) -> Result<Turn, OrchestratorError> {
        let models = request
            .models
            .clone()
            .unwrap_or_else(|| self.config.models().participants.clone());
        if models.is_empty() {
            return Err(OrchestratorError::NoModels);
        }
        let _guard = self.begin()?;
        let cancel = self.fresh_token();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let mode = request.mode.unwrap_or(self.config.params().mode);
        let label = match mode {
            TurnMode::Debate => PromptTemplate::round_label(1),
            TurnMode::Ensemble => PromptTemplate::ensemble_label().to_string(),
            TurnMode::Parallel => PromptTemplate::parallel_label().to_string(),
        };
        let mut turn = Turn::new(request.prompt, mode).with_attachments(request.attachments);
        turn.web_search = request.web_search;
        turn.max_rounds = request.max_rounds;
        turn.rounds.push(Round::new(1, label, &models));
        if mode != TurnMode::Parallel {
            turn.synthesis = Some(Synthesis::pending(&self.config.models().synthesizer));
        }
        let turn_id = turn.id.clone();

        let (conversation_id, window) = {
            let mut conversation = self.lock();
            conversation.turns.push(turn);
            conversation.touch();
            let prior = conversation.turns.len() - 1;
            (
                conversation.id.clone(),
                build_history(&conversation, prior, &self.config.params().context),
            )
        };

        info!(
            "Starting {} turn {} with {} models",
            mode,
            turn_id,
            models.len()
        );
        self.emit(TurnEvent::TurnStarted {
            conversation_id,
            turn_id,
            mode,
            models: models.clone(),
        });
        self.persist().await;

        if window.needs_summary {
            self.spawn_summary(window.turns_to_summarize, generation);
        }

        self.drive(Checkpoint::whole_round(0, models.len()), window, &cancel)
            .await
    }

    /// Re-run every stream of `round_index` and everything after it
    pub async fn retry_round(&self, round_index: usize) -> Result<Turn, OrchestratorError> {
        let _guard = self.begin()?;
        let stream_count = self.stream_count(round_index)?;
        self.resume(Checkpoint::whole_round(round_index, stream_count))
            .await
    }

    /// Re-run one stream of `round_index`, leaving its siblings untouched
    pub async fn retry_stream(
        &self,
        round_index: usize,
        stream_index: usize,
    ) -> Result<Turn, OrchestratorError> {
        let _guard = self.begin()?;
        if stream_index >= self.stream_count(round_index)? {
            return Err(OrchestratorError::InvalidStream {
                round: round_index,
                stream: stream_index,
            });
        }
        self.resume(Checkpoint {
            round_index,
            rerun: vec![stream_index],
        })
        .await
    }

    /// Resume the active turn from its latest checkpoint.
    ///
    /// Streams in the last round that were left mid-flight or cancelled are
    /// re-issued; other settled streams are reused as they are. A turn that already finished
    /// is returned unchanged.
    pub async fn continue_from_checkpoint(&self) -> Result<Turn, OrchestratorError> {
        let _guard = self.begin()?;
        let checkpoint = {
            let conversation = self.lock();
            let turn = conversation
                .active_turn()
                .ok_or(OrchestratorError::NoActiveTurn)?;
            if is_finished(turn) {
                return Ok(turn.clone());
            }
            let round_index = turn
                .rounds
                .len()
                .checked_sub(1)
                .ok_or(OrchestratorError::InvalidRound(0))?;
            let rerun = turn.rounds[round_index]
                .streams
                .iter()
                .enumerate()
                .filter(|(_, s)| needs_rerun(s))
                .map(|(i, _)| i)
                .collect();
            Checkpoint { round_index, rerun }
        };
        self.resume(checkpoint).await
    }

    // ==================== Checkpoint transition ====================

    async fn resume(&self, checkpoint: Checkpoint) -> Result<Turn, OrchestratorError> {
        let cancel = self.fresh_token();
        let synthesizer = self.config.models().synthesizer.clone();

        let window = {
            let mut conversation = self.lock();
            let turn = conversation
                .active_turn_mut()
                .ok_or(OrchestratorError::NoActiveTurn)?;
            prepare_checkpoint(turn, &checkpoint, &synthesizer);
            conversation.touch();
            let prior = conversation.turns.len() - 1;
            build_history(&conversation, prior, &self.config.params().context)
        };

        info!(
            "Resuming from round {} (re-running {} stream(s))",
            checkpoint.round_index + 1,
            checkpoint.rerun.len()
        );
        self.persist().await;
        self.drive(checkpoint, window, &cancel).await
    }

    /// Run the active turn from `checkpoint` to a terminal state
    async fn drive(
        &self,
        checkpoint: Checkpoint,
        window: HistoryWindow,
        cancel: &CancellationToken,
    ) -> Result<Turn, OrchestratorError> {
        let mode = self.with_turn(|t| t.mode)?;
        let history = window.messages;

        let outcome = match mode {
            TurnMode::Debate => self.run_debate(checkpoint, &history, cancel).await,
            TurnMode::Ensemble => self.run_ensemble(checkpoint, &history, cancel).await,
            TurnMode::Parallel => self.run_parallel(checkpoint, &history, cancel).await,
        };

        let turn_id = self.with_turn(|t| t.id.clone())?;
        match &outcome {
            Ok(()) => {
                let metadata = self.with_turn(|t| t.debate_metadata.clone())?;
                info!(
                    "Turn {} finished after {} round(s): {:?}",
                    turn_id, metadata.total_rounds, metadata.termination_reason
                );
                self.emit(TurnEvent::TurnFinished { turn_id, metadata });
            }
            Err(e) => {
                if e.is_cancelled() {
                    self.with_turn(mark_cancelled)?;
                }
                warn!("Turn {} ended: {}", turn_id, e);
                self.emit(TurnEvent::TurnFailed {
                    turn_id,
                    kind: e.kind().unwrap_or(ErrorKind::UpstreamHttpError),
                    message: e.to_string(),
                });
            }
        }
        self.persist().await;

        outcome?;
        self.maybe_spawn_title();
        self.with_turn(|t| t.clone())
    }

    // ==================== State helpers ====================

    fn begin(&self) -> Result<RunningGuard<'_>, OrchestratorError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(OrchestratorError::TurnInProgress);
        }
        Ok(RunningGuard(&self.running))
    }

    fn fresh_token(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.cancel.lock().unwrap_or_else(PoisonError::into_inner) = token.clone();
        token
    }

    fn lock(&self) -> MutexGuard<'_, Conversation> {
        self.conversation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn with_turn<R>(&self, f: impl FnOnce(&mut Turn) -> R) -> Result<R, OrchestratorError> {
        let mut conversation = self.lock();
        conversation
            .active_turn_mut()
            .map(f)
            .ok_or(OrchestratorError::NoActiveTurn)
    }

    fn stream_count(&self, round_index: usize) -> Result<usize, OrchestratorError> {
        self.with_turn(|t| t.rounds.get(round_index).map(|r| r.streams.len()))?
            .ok_or(OrchestratorError::InvalidRound(round_index))
    }

    fn max_rounds(&self) -> Result<u32, OrchestratorError> {
        let default = self.config.params().effective_max_rounds();
        self.with_turn(|t| t.max_rounds.map(|m| m.max(1)).unwrap_or(default))
    }

    fn set_metadata(&self, metadata: DebateMetadata) -> Result<(), OrchestratorError> {
        self.with_turn(|t| t.debate_metadata = metadata)
    }

    fn request(&self, model: &str, messages: Vec<Message>) -> ChatRequest {
        ChatRequest::new(model, messages)
            .with_client_api_key(self.config.client_api_key().map(str::to_string))
    }

    fn emit(&self, event: TurnEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Save the conversation. Failures are logged, not fatal to the turn.
    async fn persist(&self) {
        self.lock().touch();
        save_latest(self.store.as_ref(), &self.conversation, &self.save_lock).await;
    }
}

/// Snapshot `conversation` and store it while holding `save_lock`, so saves
/// land in the order their snapshots were taken.
async fn save_latest(
    store: &dyn ConversationStore,
    conversation: &Mutex<Conversation>,
    save_lock: &tokio::sync::Mutex<()>,
) {
    let _saving = save_lock.lock().await;
    let snapshot = conversation
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();
    if let Err(e) = store.save(&snapshot).await {
        warn!("Failed to save conversation {}: {}", snapshot.id, e);
    }
}

/// Reset the turn for a resume from `checkpoint`.
fn prepare_checkpoint(turn: &mut Turn, checkpoint: &Checkpoint, synthesizer: &str) {
    turn.rounds.truncate(checkpoint.round_index + 1);
    turn.debate_metadata = DebateMetadata::default();
    turn.synthesis = match turn.mode {
        TurnMode::Parallel => None,
        _ => Some(Synthesis::pending(synthesizer)),
    };
    if !checkpoint.rerun.is_empty() {
        turn.ensemble_result = None;
    }

    if let Some(round) = turn.rounds.get_mut(checkpoint.round_index) {
        for &index in &checkpoint.rerun {
            if let Some(stream) = round.streams.get_mut(index) {
                stream.reset();
            }
        }
        if !checkpoint.rerun.is_empty() {
            round.status = Status::Pending;
            round.convergence_check = None;
        }
    }
}

/// Settle everything left in flight after a cancellation.
fn mark_cancelled(turn: &mut Turn) {
    turn.debate_metadata =
        DebateMetadata::terminated(turn.rounds.len() as u32, TerminationReason::Cancelled);

    for round in &mut turn.rounds {
        for stream in &mut round.streams {
            if !stream.status.is_settled() {
                let partial = std::mem::take(&mut stream.content);
                stream.fail("cancelled", partial, None);
            }
        }
        if !round.status.is_settled() {
            round.status = Status::Error;
        }
        if round.convergence_check.as_ref().is_some_and(|c| c.is_pending()) {
            round.convergence_check = None;
        }
    }

    if let Some(synthesis) = turn.synthesis.as_mut()
        && !synthesis.status.is_settled()
    {
        synthesis.status = Status::Error;
        synthesis.error = Some("cancelled".to_string());
    }

    if turn
        .ensemble_result
        .as_ref()
        .is_some_and(|r| r.status == EnsembleStatus::Analyzing)
    {
        turn.ensemble_result = Some(EnsembleResult::failed("cancelled"));
    }
}

fn needs_rerun(stream: &ModelStream) -> bool {
    !stream.status.is_settled()
        || (stream.status == Status::Error
            && !stream.carried_forward
            && stream.error.as_deref() == Some("cancelled"))
}

/// Terminal and nothing left to produce.
fn is_finished(turn: &Turn) -> bool {
    match turn.debate_metadata.termination_reason {
        None | Some(TerminationReason::Cancelled) => false,
        Some(TerminationReason::AllModelsFailed) => true,
        Some(_) => turn.mode == TurnMode::Parallel || turn.answer().is_some(),
    }
}
