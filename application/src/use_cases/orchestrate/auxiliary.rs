//! Background calls that never affect a turn's outcome: conversation titles
//! and running-summary folding.

use super::{TurnOrchestrator, save_latest};
use crate::ports::conversation_store::ConversationStore;
use crate::ports::llm_gateway::{ChatRequest, LlmGateway};
use crate::ports::turn_events::TurnEvent;
use crate::use_cases::stream_reader::read_stream;
use roundtable_domain::{Conversation, Message, PromptTemplate, parse_title_response, turn_digest};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What a detached task needs to call a model and write back.
pub(super) struct Background<G: LlmGateway + ?Sized> {
    gateway: Arc<G>,
    store: Arc<dyn ConversationStore>,
    conversation: Arc<Mutex<Conversation>>,
    events: broadcast::Sender<TurnEvent>,
    stall: Duration,
    save_lock: Arc<tokio::sync::Mutex<()>>,
}

impl<G: LlmGateway + ?Sized> Background<G> {
    async fn call(&self, request: ChatRequest) -> Option<String> {
        let model = request.model.clone();
        let cancel = CancellationToken::new();
        match read_stream(self.gateway.as_ref(), request, &cancel, self.stall, |_| {}).await {
            Ok(outcome) => Some(outcome.content).filter(|c| !c.trim().is_empty()),
            Err(failure) => {
                warn!("Background call to {} failed: {}", model, failure.error);
                None
            }
        }
    }

    /// Apply `f` under the lock; if it returns an event, publish it and save.
    pub(super) async fn commit(&self, f: impl FnOnce(&mut Conversation) -> Option<TurnEvent>) {
        let applied = {
            let mut conversation = self
                .conversation
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            f(&mut conversation).inspect(|_| conversation.touch())
        };
        let Some(event) = applied else {
            return;
        };
        let _ = self.events.send(event);
        save_latest(self.store.as_ref(), &self.conversation, &self.save_lock).await;
    }
}

impl<G: LlmGateway + ?Sized + 'static> TurnOrchestrator<G> {
    pub(super) fn background(&self) -> Background<G> {
        Background {
            gateway: Arc::clone(&self.gateway),
            store: Arc::clone(&self.store),
            conversation: Arc::clone(&self.conversation),
            events: self.events.clone(),
            stall: self.config.params().effective_stall_timeout(),
            save_lock: Arc::clone(&self.save_lock),
        }
    }

    /// Name the conversation after its first finished turn.
    pub(super) fn maybe_spawn_title(&self) {
        if !self.config.params().generate_titles {
            return;
        }
        let opening = {
            let conversation = self.lock();
            if conversation.turns.len() != 1 || conversation.has_title() {
                return;
            }
            conversation.active_turn().map(|turn| {
                let answer = turn
                    .answer()
                    .map(str::to_string)
                    .or_else(|| {
                        turn.final_round()
                            .and_then(|r| r.positions().next().map(|(_, s)| s.content.clone()))
                    })
                    .unwrap_or_default();
                (turn.user_prompt.clone(), answer)
            })
        };
        let Some((question, answer)) = opening else {
            return;
        };

        let request = self.request(
            self.config.models().title_model(),
            vec![
                Message::system(PromptTemplate::title_system()),
                Message::user(PromptTemplate::title_prompt(&question, &answer)),
            ],
        );
        let background = self.background();

        tokio::spawn(async move {
            let Some(reply) = background.call(request).await else {
                return;
            };
            let Some((title, description)) = parse_title_response(&reply) else {
                debug!("Title reply had no usable title");
                return;
            };
            background
                .commit(|conversation| {
                    if conversation.has_title() {
                        return None;
                    }
                    info!("Conversation titled: {}", title);
                    conversation.title = title.clone();
                    conversation.description = description.clone();
                    Some(TurnEvent::TitleUpdated { title, description })
                })
                .await;
        });
    }

    /// Fold the `count` oldest unsummarized turns into the running summary.
    ///
    /// The result is dropped if another turn started or the summary moved
    /// on while the call was in flight.
    pub(super) fn spawn_summary(&self, count: usize, generation: u64) {
        let excerpt_chars = self.config.params().context.position_excerpt_chars();
        let (base, existing, turns) = {
            let conversation = self.lock();
            let base = conversation.summarized_turn_count;
            let end = (base + count).min(conversation.turns.len().saturating_sub(1));
            let turns: Vec<(String, String)> = conversation
                .turns
                .get(base..end)
                .unwrap_or_default()
                .iter()
                .map(|t| (t.user_prompt.clone(), turn_digest(t, excerpt_chars)))
                .collect();
            (base, conversation.running_summary.clone(), turns)
        };
        if turns.is_empty() {
            return;
        }

        debug!("Summarizing {} turn(s) after the first {}", turns.len(), base);
        let request = self.request(
            self.config.models().summary_model(),
            vec![
                Message::system(PromptTemplate::summary_system()),
                Message::user(PromptTemplate::summary_prompt(existing.as_deref(), &turns)),
            ],
        );
        let folded = turns.len();
        let current = Arc::clone(&self.generation);
        let background = self.background();

        tokio::spawn(async move {
            let Some(summary) = background.call(request).await else {
                return;
            };
            background
                .commit(|conversation| {
                    if current.load(Ordering::SeqCst) != generation
                        || conversation.summarized_turn_count != base
                    {
                        debug!("Discarding stale summary");
                        return None;
                    }
                    conversation.running_summary = Some(summary.trim().to_string());
                    conversation.summarized_turn_count = base + folded;
                    Some(TurnEvent::SummaryUpdated {
                        summarized_turn_count: base + folded,
                    })
                })
                .await;
        });
    }
}
