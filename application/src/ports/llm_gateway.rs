//! LLM Gateway port
//!
//! Defines the interface for sending provider-agnostic chat requests.
//! Implementations live in the infrastructure layer: an in-process router
//! over the vendor adapters, or an HTTP client for a remote gateway.

use async_trait::async_trait;
use roundtable_domain::{ErrorKind, Message, StreamEvent, Usage, merge_reasoning};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Errors that can occur during gateway operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    #[error("{provider}: invalid or missing API key (HTTP {status}){}", detail(.body))]
    InvalidKey {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("{provider}: rate limited (HTTP {status}){}", detail(.body))]
    RateLimited {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("{provider}: insufficient credits (HTTP {status}){}", detail(.body))]
    InsufficientCredits {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("{provider} returned HTTP {status}: {body}")]
    UpstreamHttp {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("No data received for {}s", .0.as_secs())]
    StreamStalled(Duration),

    #[error("Stream error: {0}")]
    StreamError(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl GatewayError {
    /// Classify a non-2xx upstream response.
    pub fn from_status(provider: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        let provider = provider.into();
        let body = body.into();
        match ErrorKind::from_status(status) {
            ErrorKind::InvalidKey => GatewayError::InvalidKey {
                provider,
                status,
                body,
            },
            ErrorKind::RateLimit => GatewayError::RateLimited {
                provider,
                status,
                body,
            },
            ErrorKind::InsufficientCredits => GatewayError::InsufficientCredits {
                provider,
                status,
                body,
            },
            _ => GatewayError::UpstreamHttp {
                provider,
                status,
                body,
            },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::InvalidKey { .. } => ErrorKind::InvalidKey,
            GatewayError::RateLimited { .. } => ErrorKind::RateLimit,
            GatewayError::InsufficientCredits { .. } => ErrorKind::InsufficientCredits,
            GatewayError::UpstreamHttp { .. } | GatewayError::Transport(_) => {
                ErrorKind::UpstreamHttpError
            }
            GatewayError::StreamStalled(_) => ErrorKind::StreamStalled,
            GatewayError::StreamError(_) => ErrorKind::StreamError,
            GatewayError::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, GatewayError::Cancelled)
    }
}

fn detail(body: &str) -> String {
    if body.is_empty() {
        String::new()
    } else {
        format!(": {}", body)
    }
}

/// A provider-agnostic chat request
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    /// Opaque model id, resolved by the gateway
    pub model: String,
    pub messages: Vec<Message>,
    /// Overrides the configured credential of the resolved provider
    pub client_api_key: Option<String>,
    pub max_tokens: Option<u32>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            client_api_key: None,
            max_tokens: None,
        }
    }

    pub fn with_client_api_key(mut self, key: Option<String>) -> Self {
        self.client_api_key = key.filter(|k| !k.trim().is_empty());
        self
    }
}

/// Result of a non-streaming call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    pub content: String,
    pub reasoning: Option<String>,
    pub usage: Option<Usage>,
}

/// Handle for receiving streaming events from a model call.
///
/// The sender side closes the channel when the upstream stream ends.
/// A [`StreamEvent::Error`] is always the last event.
pub struct StreamHandle {
    pub receiver: mpsc::Receiver<StreamEvent>,
}

impl StreamHandle {
    pub fn new(receiver: mpsc::Receiver<StreamEvent>) -> Self {
        Self { receiver }
    }

    /// A handle that yields `events` and then ends.
    pub fn from_events(events: Vec<StreamEvent>) -> Self {
        let (tx, rx) = mpsc::channel(events.len().max(1));
        for event in events {
            // capacity covers every event
            let _ = tx.try_send(event);
        }
        Self::new(rx)
    }

    pub async fn recv(&mut self) -> Option<StreamEvent> {
        self.receiver.recv().await
    }

    /// Consume the stream into a single completion.
    ///
    /// No stall detection; use [`read_stream`](crate::use_cases::stream_reader::read_stream)
    /// when the watchdog matters.
    pub async fn collect(mut self) -> Result<Completion, GatewayError> {
        let mut completion = Completion::default();
        let mut reasoning = String::new();
        while let Some(event) = self.receiver.recv().await {
            match event {
                StreamEvent::Content(chunk) => completion.content.push_str(&chunk),
                StreamEvent::Reasoning(chunk) => reasoning = merge_reasoning(&reasoning, &chunk),
                StreamEvent::Usage(usage) => completion.usage = Some(usage),
                StreamEvent::Error(e) => return Err(GatewayError::StreamError(e)),
            }
        }
        if !reasoning.is_empty() {
            completion.reasoning = Some(reasoning);
        }
        Ok(completion)
    }
}

/// Gateway for model communication
///
/// `cancel` must abort the upstream transport as soon as it fires.
#[async_trait]
pub trait LlmGateway: Send + Sync {
    /// Start a streaming call
    async fn stream(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> Result<StreamHandle, GatewayError>;

    /// Run a call to completion.
    ///
    /// Default implementation streams and collects, so adapters only need
    /// to override this when the vendor has a cheaper non-streaming path.
    async fn complete(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> Result<Completion, GatewayError> {
        let handle = self.stream(request, cancel.clone()).await?;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(GatewayError::Cancelled),
            result = handle.collect() => result,
        }
    }
}
