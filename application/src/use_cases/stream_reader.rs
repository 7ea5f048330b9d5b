//! Stream normalizer
//!
//! Reads a gateway event channel into accumulated content, merged reasoning
//! and the latest usage snapshot. A watchdog aborts the read when nothing
//! arrives within the stall window, both while waiting for the stream to
//! open and between events.

use crate::config::MIN_STALL_TIMEOUT;
use crate::ports::llm_gateway::{ChatRequest, GatewayError, LlmGateway};
use roundtable_domain::{StreamEvent, Usage, merge_reasoning};
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A stream that ended normally.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamOutcome {
    pub content: String,
    pub reasoning: Option<String>,
    pub usage: Option<Usage>,
    pub duration_ms: u64,
}

/// A stream that ended in error, with whatever text arrived first.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamFailure {
    pub error: GatewayError,
    pub partial: String,
    pub duration_ms: u64,
}

impl StreamFailure {
    pub fn is_cancelled(&self) -> bool {
        self.error.is_cancelled()
    }
}

#[derive(Default)]
struct Accumulator {
    content: String,
    reasoning: String,
    usage: Option<Usage>,
}

impl Accumulator {
    fn apply(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::Content(chunk) => self.content.push_str(chunk),
            StreamEvent::Reasoning(chunk) => {
                self.reasoning = merge_reasoning(&self.reasoning, chunk)
            }
            StreamEvent::Usage(usage) => self.usage = Some(usage.clone()),
            StreamEvent::Error(_) => {}
        }
    }
}

/// Run `request` through `gateway`, calling `on_event` for every event.
///
/// `stall` is raised to [`MIN_STALL_TIMEOUT`] when shorter.
pub async fn read_stream<G, F>(
    gateway: &G,
    request: ChatRequest,
    cancel: &CancellationToken,
    stall: Duration,
    mut on_event: F,
) -> Result<StreamOutcome, StreamFailure>
where
    G: LlmGateway + ?Sized,
    F: FnMut(&StreamEvent),
{
    let stall = stall.max(MIN_STALL_TIMEOUT);
    let started = Instant::now();
    let elapsed_ms = || started.elapsed().as_millis() as u64;
    let model = request.model.clone();

    let opened = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(GatewayError::Cancelled),
        opened = timeout(stall, gateway.stream(request, cancel.clone())) => {
            opened.unwrap_or(Err(GatewayError::StreamStalled(stall)))
        }
    };
    let mut handle = opened.map_err(|error| StreamFailure {
        error,
        partial: String::new(),
        duration_ms: elapsed_ms(),
    })?;

    let mut acc = Accumulator::default();
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(GatewayError::Cancelled),
            next = timeout(stall, handle.recv()) => {
                next.map_err(|_| GatewayError::StreamStalled(stall))
            }
        };

        let event = match next {
            Ok(Some(event)) => event,
            Ok(None) => break,
            Err(error) => {
                debug!("Stream for {} aborted: {}", model, error);
                return Err(StreamFailure {
                    error,
                    partial: acc.content,
                    duration_ms: elapsed_ms(),
                });
            }
        };

        on_event(&event);
        if let StreamEvent::Error(message) = event {
            return Err(StreamFailure {
                error: GatewayError::StreamError(message),
                partial: acc.content,
                duration_ms: elapsed_ms(),
            });
        }
        acc.apply(&event);
    }

    Ok(StreamOutcome {
        content: acc.content,
        reasoning: Some(acc.reasoning).filter(|r| !r.is_empty()),
        usage: acc.usage,
        duration_ms: elapsed_ms(),
    })
}
