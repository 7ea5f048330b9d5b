use super::{OrchestratorError, TurnOrchestrator};
use crate::ports::llm_gateway::LlmGateway;
use crate::ports::turn_events::TurnEvent;
use crate::use_cases::stream_reader::read_stream;
use chrono::Utc;
use roundtable_domain::{Message, Status, StreamEvent, Synthesis};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

impl<G: LlmGateway + ?Sized + 'static> TurnOrchestrator<G> {
    /// Stream the synthesizer's answer into `turn.synthesis`.
    pub(super) async fn run_synthesis(
        &self,
        messages: Vec<Message>,
        cancel: &CancellationToken,
    ) -> Result<(), OrchestratorError> {
        if cancel.is_cancelled() {
            return Err(OrchestratorError::Cancelled);
        }

        let model = self.with_turn(|t| {
            let synthesis = t
                .synthesis
                .get_or_insert_with(|| Synthesis::pending(&self.config.models().synthesizer));
            synthesis.status = Status::Streaming;
            synthesis.model.clone()
        })?;
        info!("Synthesizing with {}", model);
        self.emit(TurnEvent::SynthesisStarted {
            model: model.clone(),
        });

        let events = self.events.clone();
        let stall = self.config.params().effective_stall_timeout();
        let result = read_stream(
            self.gateway.as_ref(),
            self.request(&model, messages),
            cancel,
            stall,
            |event| {
                if let StreamEvent::Content(delta) = event {
                    let _ = events.send(TurnEvent::SynthesisDelta {
                        delta: delta.clone(),
                    });
                }
            },
        )
        .await;

        let (finished, outcome) = self.with_turn(|t| {
            let Some(synthesis) = t.synthesis.as_mut() else {
                return (
                    TurnEvent::SynthesisFinished {
                        status: Status::Error,
                        error: None,
                    },
                    Err(OrchestratorError::NoActiveTurn),
                );
            };
            let outcome = match result {
                Ok(done) => {
                    synthesis.content = done.content;
                    synthesis.usage = done.usage;
                    synthesis.duration_ms = Some(done.duration_ms);
                    synthesis.error = None;
                    synthesis.status = Status::Complete;
                    synthesis.completed_at = Some(Utc::now());
                    Ok(())
                }
                Err(failure) => {
                    synthesis.content = failure.partial.clone();
                    synthesis.duration_ms = Some(failure.duration_ms);
                    synthesis.status = Status::Error;
                    if failure.is_cancelled() {
                        synthesis.error = Some("cancelled".to_string());
                        Err(OrchestratorError::Cancelled)
                    } else {
                        warn!("Synthesis with {} failed: {}", synthesis.model, failure.error);
                        let message = failure.error.to_string();
                        synthesis.error = Some(message.clone());
                        Err(OrchestratorError::SynthesisFailed {
                            kind: failure.error.kind(),
                            message,
                        })
                    }
                }
            };
            (
                TurnEvent::SynthesisFinished {
                    status: synthesis.status,
                    error: synthesis.error.clone(),
                },
                outcome,
            )
        })?;

        self.emit(finished);
        self.persist().await;
        outcome
    }
}
