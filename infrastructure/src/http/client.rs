//! [`LlmGateway`] over a remote gateway's `POST /chat`.

use super::wire::{ChatBody, ErrorBody, WireEvent};
use crate::providers::transport::{
    EventDecoder, ended_early, error_body, parse_payload, pump, send,
};
use async_trait::async_trait;
use roundtable_application::ports::llm_gateway::{
    ChatRequest, GatewayError, LlmGateway, StreamHandle,
};
use roundtable_domain::util::excerpt;
use roundtable_domain::{ModelTarget, StreamEvent};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub struct HttpGatewayClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpGatewayClient {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    fn chat_url(&self) -> String {
        format!("{}/chat", self.base_url.trim_end_matches('/'))
    }
}

/// Map a non-2xx gateway reply back onto the error the gateway saw.
fn classify(status: u16, body: &str, model: &str) -> GatewayError {
    let (provider, message) = match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) if !parsed.provider.is_empty() => (parsed.provider, parsed.error),
        Ok(parsed) => (
            ModelTarget::parse(model).provider.as_str().to_string(),
            parsed.error,
        ),
        Err(_) => ("gateway".to_string(), excerpt(body, 1_000)),
    };
    // The gateway's text already names the classification; keep the upstream body.
    let marker = format!("(HTTP {}): ", status);
    let message = match message.split_once(&marker) {
        Some((_, upstream)) => upstream.to_string(),
        None => message,
    };
    GatewayError::from_status(provider, status, message)
}

#[async_trait]
impl LlmGateway for HttpGatewayClient {
    async fn stream(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> Result<StreamHandle, GatewayError> {
        debug!("gateway chat for {} via {}", request.model, self.base_url);
        let body = ChatBody {
            model: request.model.clone(),
            messages: request.messages,
            stream: true,
            client_api_key: request.client_api_key,
            max_tokens: request.max_tokens,
        };
        let http = self.client.post(self.chat_url()).json(&body);
        let response = send(http, &cancel).await?;

        let status = response.status();
        if !status.is_success() {
            let text = error_body(response, &cancel).await?;
            warn!("gateway returned {}: {}", status, excerpt(&text, 200));
            return Err(classify(status.as_u16(), &text, &request.model));
        }
        Ok(pump("gateway", response, WireDecoder::default(), cancel))
    }
}

/// Decodes the gateway's own SSE events.
///
/// Every gateway stream ends with `done` or `error`.
#[derive(Default)]
pub struct WireDecoder {
    saw_terminal: bool,
}

impl EventDecoder for WireDecoder {
    fn decode(&mut self, payload: &str) -> Vec<StreamEvent> {
        let Some(event) = parse_payload::<WireEvent>(payload) else {
            return Vec::new();
        };
        if matches!(event, WireEvent::Done { .. } | WireEvent::Error { .. }) {
            self.saw_terminal = true;
        }
        event.into_stream_event().into_iter().collect()
    }

    fn finish(&mut self) -> Vec<StreamEvent> {
        if self.saw_terminal {
            Vec::new()
        } else {
            vec![ended_early("gateway", "done")]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::sse::SseDecoder;
    use roundtable_domain::{ErrorKind, Usage};

    #[test]
    fn test_decodes_gateway_stream() {
        let raw = concat!(
            "data: {\"type\":\"reasoning\",\"delta\":\"hm\"}\n\n",
            ": keep-alive\n\n",
            "data: {\"type\":\"content\",\"delta\":\"Hi\"}\n\n",
            "data: {\"type\":\"done\",\"usage\":{\"promptTokens\":1,\"completionTokens\":1,\"totalTokens\":2}}\n\n",
        );
        let mut sse = SseDecoder::new();
        let mut decoder = WireDecoder::default();
        let events: Vec<StreamEvent> = sse
            .push(raw.as_bytes())
            .iter()
            .flat_map(|p| decoder.decode(p))
            .collect();
        assert!(decoder.finish().is_empty());
        assert_eq!(
            events,
            vec![
                StreamEvent::Reasoning("hm".into()),
                StreamEvent::Content("Hi".into()),
                StreamEvent::Usage(Usage::new(Some(1), Some(1))),
            ]
        );
    }

    #[test]
    fn test_done_without_usage_emits_nothing() {
        let mut decoder = WireDecoder::default();
        assert!(decoder.decode(r#"{"type":"done","usage":null}"#).is_empty());
        assert!(decoder.finish().is_empty());

        let mut decoder = WireDecoder::default();
        assert_eq!(
            decoder.decode(r#"{"type":"error","message":"boom"}"#),
            vec![StreamEvent::Error("boom".into())]
        );
        assert!(decoder.finish().is_empty());
    }

    #[test]
    fn test_body_closed_before_done_is_an_error() {
        let mut decoder = WireDecoder::default();
        assert_eq!(
            decoder.decode(r#"{"type":"content","delta":"half an ans"}"#),
            vec![StreamEvent::Content("half an ans".into())]
        );
        assert_eq!(
            decoder.finish(),
            vec![StreamEvent::Error("gateway stream ended without done".into())]
        );
    }

    #[test]
    fn test_classify_uses_error_body() {
        let err = classify(
            401,
            r#"{"error":"key revoked by org admin","provider":"anthropic","model":"anthropic:x"}"#,
            "anthropic:x",
        );
        assert_eq!(
            err,
            GatewayError::InvalidKey {
                provider: "anthropic".into(),
                status: 401,
                body: "key revoked by org admin".into(),
            }
        );

        let err = classify(
            429,
            r#"{"error":"openrouter: rate limited (HTTP 429): slow down","model":"gpt-4"}"#,
            "gpt-4",
        );
        assert_eq!(
            err,
            GatewayError::RateLimited {
                provider: "openrouter".into(),
                status: 429,
                body: "slow down".into(),
            }
        );

        let err = classify(500, "<html>oops</html>", "gpt-4");
        assert_eq!(err.kind(), ErrorKind::UpstreamHttpError);
        assert!(err.to_string().starts_with("gateway returned HTTP 500"));
    }

    #[tokio::test]
    async fn test_complete_fails_when_gateway_stream_is_cut() {
        use axum::response::sse::{Event, Sse};
        use axum::routing::post;
        use std::convert::Infallible;

        let app = axum::Router::new().route(
            "/chat",
            post(|| async {
                Sse::new(futures::stream::iter(vec![Ok::<_, Infallible>(
                    Event::default().data(r#"{"type":"content","delta":"half an ans"}"#),
                )]))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client = HttpGatewayClient::new(reqwest::Client::new(), format!("http://{}", addr));
        let result = client
            .complete(
                ChatRequest::new("gpt-4", vec![roundtable_domain::Message::user("hi")]),
                CancellationToken::new(),
            )
            .await;
        assert_eq!(
            result,
            Err(GatewayError::StreamError(
                "gateway stream ended without done".into()
            ))
        );
    }

    #[test]
    fn test_chat_url() {
        let client = HttpGatewayClient::new(reqwest::Client::new(), "http://localhost:8787/");
        assert_eq!(client.chat_url(), "http://localhost:8787/chat");
    }
}
