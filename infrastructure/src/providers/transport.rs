//! Shared HTTP plumbing: send, classify non-2xx, pump the SSE body into a
//! [`StreamHandle`] channel.

use super::sse::{DONE_SENTINEL, SseDecoder};
use futures::StreamExt;
use roundtable_application::ports::llm_gateway::{GatewayError, StreamHandle};
use roundtable_domain::StreamEvent;
use roundtable_domain::util::excerpt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

const STREAM_BUFFER: usize = 256;
const ERROR_BODY_CHARS: usize = 1_000;

/// Turns one SSE `data` payload into normalized events.
pub trait EventDecoder: Send + 'static {
    fn decode(&mut self, payload: &str) -> Vec<StreamEvent>;

    /// Called for a `[DONE]` payload.
    fn done_sentinel(&mut self) {}

    /// Events to emit once the body ends.
    ///
    /// A decoder that never saw its terminator returns a
    /// [`StreamEvent::Error`] here, so a cut connection is not taken for a
    /// finished answer.
    fn finish(&mut self) -> Vec<StreamEvent> {
        Vec::new()
    }
}

/// The error for a body that closed before its terminator.
pub fn ended_early(source: &str, terminator: &str) -> StreamEvent {
    StreamEvent::Error(format!("{} stream ended without {}", source, terminator))
}

/// Send `request` and stream its body through `decoder`.
///
/// `source` names the upstream in errors. Cancelling `cancel` drops the
/// response, which closes the connection.
pub async fn open_stream<D: EventDecoder>(
    source: &str,
    request: reqwest::RequestBuilder,
    decoder: D,
    cancel: CancellationToken,
) -> Result<StreamHandle, GatewayError> {
    let response = send(request, &cancel).await?;

    let status = response.status();
    if !status.is_success() {
        let body = error_body(response, &cancel).await?;
        warn!("{} returned {}: {}", source, status, excerpt(&body, 200));
        return Err(GatewayError::from_status(
            source,
            status.as_u16(),
            excerpt(&body, ERROR_BODY_CHARS),
        ));
    }

    Ok(pump(source, response, decoder, cancel))
}

/// Send `request` unless `cancel` fires first.
pub async fn send(
    request: reqwest::RequestBuilder,
    cancel: &CancellationToken,
) -> Result<reqwest::Response, GatewayError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(GatewayError::Cancelled),
        sent = request.send() => sent.map_err(|e| GatewayError::Transport(e.to_string())),
    }
}

/// Read a failed response's body for the error message.
pub async fn error_body(
    response: reqwest::Response,
    cancel: &CancellationToken,
) -> Result<String, GatewayError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(GatewayError::Cancelled),
        body = response.text() => Ok(body.unwrap_or_default()),
    }
}

/// Spawn a task decoding `response`'s SSE body into a [`StreamHandle`].
pub fn pump<D: EventDecoder>(
    source: &str,
    response: reqwest::Response,
    mut decoder: D,
    cancel: CancellationToken,
) -> StreamHandle {
    let source = source.to_string();
    let (tx, rx) = mpsc::channel(STREAM_BUFFER);
    tokio::spawn(async move {
        let mut body = response.bytes_stream();
        let mut sse = SseDecoder::new();
        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("{} stream cancelled", source);
                    return;
                }
                chunk = body.next() => chunk,
            };
            match chunk {
                Some(Ok(bytes)) => {
                    for payload in sse.push(&bytes) {
                        if !forward(&tx, &mut decoder, &payload).await {
                            return;
                        }
                    }
                }
                Some(Err(e)) => {
                    let _ = tx
                        .send(StreamEvent::Error(format!("{} stream interrupted: {}", source, e)))
                        .await;
                    return;
                }
                None => break,
            }
        }

        if let Some(payload) = sse.finish()
            && !forward(&tx, &mut decoder, &payload).await
        {
            return;
        }
        for event in decoder.finish() {
            if tx.send(event).await.is_err() {
                return;
            }
        }
    });

    StreamHandle::new(rx)
}

/// Returns false once nothing more should be sent.
async fn forward<D: EventDecoder>(
    tx: &mpsc::Sender<StreamEvent>,
    decoder: &mut D,
    payload: &str,
) -> bool {
    if payload.trim() == DONE_SENTINEL {
        decoder.done_sentinel();
        return true;
    }
    for event in decoder.decode(payload) {
        let terminal = event.is_terminal();
        if tx.send(event).await.is_err() {
            trace!("Stream receiver dropped");
            return false;
        }
        if terminal {
            return false;
        }
    }
    true
}

/// Parse a payload, logging and skipping anything malformed.
pub fn parse_payload<T: serde::de::DeserializeOwned>(payload: &str) -> Option<T> {
    match serde_json::from_str(payload) {
        Ok(value) => Some(value),
        Err(e) => {
            trace!("Skipping undecodable stream payload ({}): {}", e, excerpt(payload, 120));
            None
        }
    }
}
