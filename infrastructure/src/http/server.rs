//! Gateway HTTP surface.
//!
//! | Route | Response |
//! |-------|----------|
//! | `POST /chat` | completion JSON, or SSE of [`WireEvent`]s when `stream` is set |
//! | `GET /models` | cached aggregator catalog |
//! | `GET /models/search` | filtered, paged catalog with `total` |
//! | `GET /providers` | which providers have a key |
//! | `GET /health` | liveness plus the provider map |

use super::catalog::{ModelCatalog, SearchQuery, search_models};
use super::wire::{ChatBody, CompletionBody, ErrorBody, WireEvent};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::Stream;
use roundtable_application::ports::llm_gateway::{
    ChatRequest, GatewayError, LlmGateway, StreamHandle,
};
use roundtable_application::{MIN_STALL_TIMEOUT, read_stream};
use roundtable_domain::{ModelTarget, Provider, StreamEvent, Usage};
use serde_json::json;
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("Server error: {0}")]
    Serve(#[from] std::io::Error),
}

#[derive(Clone)]
pub struct GatewayState {
    gateway: Arc<dyn LlmGateway>,
    catalog: Arc<ModelCatalog>,
    providers: Arc<BTreeMap<Provider, bool>>,
    stall: Duration,
}

impl GatewayState {
    pub fn new(
        gateway: Arc<dyn LlmGateway>,
        catalog: Arc<ModelCatalog>,
        providers: BTreeMap<Provider, bool>,
        stall: Duration,
    ) -> Self {
        Self {
            gateway,
            catalog,
            providers: Arc::new(providers),
            stall: stall.max(MIN_STALL_TIMEOUT),
        }
    }
}

pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/chat", post(chat))
        .route("/models", get(list_models))
        .route("/models/search", get(search))
        .route("/providers", get(providers))
        .route("/health", get(health))
        .with_state(state)
}

/// Serve until `shutdown` fires.
pub async fn serve(
    addr: SocketAddr,
    state: GatewayState,
    shutdown: CancellationToken,
) -> Result<(), ServerError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })?;
    info!("Gateway listening on {}", addr);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    info!("Gateway stopped");
    Ok(())
}

fn error_response(status: u16, error: String, provider: &str, model: &str) -> Response {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
    let body = ErrorBody {
        error,
        provider: provider.to_string(),
        model: model.to_string(),
    };
    (status, Json(body)).into_response()
}

fn gateway_error_response(error: &GatewayError, target: &ModelTarget, model: &str) -> Response {
    error_response(
        error.kind().http_status(),
        error.to_string(),
        target.provider.as_str(),
        model,
    )
}

async fn chat(State(state): State<GatewayState>, Json(body): Json<ChatBody>) -> Response {
    let target = ModelTarget::parse(&body.model);
    if body.messages.is_empty() {
        return error_response(
            400,
            "messages must not be empty".to_string(),
            target.provider.as_str(),
            &body.model,
        );
    }

    let mut request = ChatRequest::new(body.model.clone(), body.messages)
        .with_client_api_key(body.client_api_key);
    request.max_tokens = body.max_tokens;

    // Dropping the guard (client gone, handler finished) aborts the upstream call.
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();
    debug!(model = %body.model, stream = body.stream, "chat request");

    if !body.stream {
        let result = read_stream(
            state.gateway.as_ref(),
            request,
            &cancel,
            state.stall,
            |_| {},
        )
        .await;
        drop(guard);
        return match result {
            Ok(outcome) => Json(CompletionBody {
                content: outcome.content,
                reasoning: outcome.reasoning,
                usage: outcome.usage,
            })
            .into_response(),
            Err(failure) => {
                warn!(model = %body.model, "chat failed: {}", failure.error);
                gateway_error_response(&failure.error, &target, &body.model)
            }
        };
    }

    let opened = tokio::time::timeout(state.stall, state.gateway.stream(request, cancel.clone()))
        .await
        .unwrap_or(Err(GatewayError::StreamStalled(state.stall)));
    match opened {
        Ok(handle) => Sse::new(sse_events(handle, guard, state.stall))
            .keep_alive(KeepAlive::default())
            .into_response(),
        Err(error) => {
            warn!(model = %body.model, "chat stream failed to open: {}", error);
            gateway_error_response(&error, &target, &body.model)
        }
    }
}

struct SseState {
    handle: StreamHandle,
    _guard: DropGuard,
    stall: Duration,
    usage: Option<Usage>,
    finished: bool,
}

/// Gateway events as SSE, closed by exactly one `done` or `error`.
fn sse_events(
    handle: StreamHandle,
    guard: DropGuard,
    stall: Duration,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let state = SseState {
        handle,
        _guard: guard,
        stall,
        usage: None,
        finished: false,
    };
    futures::stream::unfold(state, |mut state| async move {
        if state.finished {
            return None;
        }
        let wire = loop {
            match tokio::time::timeout(state.stall, state.handle.recv()).await {
                Err(_) => {
                    state.finished = true;
                    break WireEvent::Error {
                        message: GatewayError::StreamStalled(state.stall).to_string(),
                    };
                }
                Ok(None) => {
                    state.finished = true;
                    break WireEvent::Done {
                        usage: state.usage.take(),
                    };
                }
                Ok(Some(StreamEvent::Usage(usage))) => state.usage = Some(usage),
                Ok(Some(StreamEvent::Content(delta))) => break WireEvent::Content { delta },
                Ok(Some(StreamEvent::Reasoning(delta))) => break WireEvent::Reasoning { delta },
                Ok(Some(StreamEvent::Error(message))) => {
                    state.finished = true;
                    break WireEvent::Error { message };
                }
            }
        };
        let event = Event::default()
            .json_data(&wire)
            .unwrap_or_else(|_| Event::default().data("{\"type\":\"error\"}"));
        Some((Ok(event), state))
    })
}

async fn list_models(State(state): State<GatewayState>) -> Response {
    match state.catalog.models().await {
        Ok(models) => Json(json!({ "data": models.as_slice() })).into_response(),
        Err(e) => error_response(e.kind().http_status(), e.to_string(), "openrouter", ""),
    }
}

async fn search(State(state): State<GatewayState>, Query(query): Query<SearchQuery>) -> Response {
    match state.catalog.models().await {
        Ok(models) => Json(search_models(&models, &query)).into_response(),
        Err(e) => error_response(e.kind().http_status(), e.to_string(), "openrouter", ""),
    }
}

async fn providers(State(state): State<GatewayState>) -> impl IntoResponse {
    Json(state.providers.as_ref().clone())
}

async fn health(State(state): State<GatewayState>) -> impl IntoResponse {
    Json(json!({ "ok": true, "providers": state.providers.as_ref() }))
}
