//! Streaming chat handlers.
//!
//! Two transports over the same bridge:
//!
//! - `POST /api/chat` streams the raw model output bytes as they arrive.
//! - `GET`/`POST /api/chat/streaming` wraps each chunk as an SSE record
//!   `data: {"content": <chunk>}\n\n`.
//!
//! In both, failures after the first byte has gone out are appended as a
//! final in-band `{"error": ...}` frame since the status line is already
//! committed.

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use serde::Deserialize;
use tokio::sync::mpsc;

use braid_core::events::BridgeEvent;
use braid_core::wire::{sse_frame, ChatRequest};

use crate::error::HttpError;
use crate::state::AppState;

/// Request body for the HTTP chat endpoints.
#[derive(Debug, Deserialize)]
pub struct ChatBody {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub prompt: String,
}

#[derive(Debug, Deserialize)]
pub struct StreamingQuery {
    pub model: Option<String>,
}

impl From<ChatBody> for ChatRequest {
    fn from(body: ChatBody) -> Self {
        Self {
            model: body.model,
            prompt: body.prompt,
        }
    }
}

/// `POST /api/chat` — raw chunked output.
pub async fn chat(
    State(state): State<AppState>,
    Json(body): Json<ChatBody>,
) -> Result<Response, HttpError> {
    let rx = start(&state, body.into()).await?;
    Ok(stream_response(rx, Framing::Raw))
}

/// `POST /api/chat/streaming` — SSE-framed output.
pub async fn chat_sse(
    State(state): State<AppState>,
    Json(body): Json<ChatBody>,
) -> Result<Response, HttpError> {
    let rx = start(&state, body.into()).await?;
    Ok(stream_response(rx, Framing::Sse))
}

/// `GET /api/chat/streaming?model=...` — SSE-framed output with no
/// prompt body; the model generates from an empty turn.
pub async fn chat_sse_get(
    State(state): State<AppState>,
    Query(query): Query<StreamingQuery>,
) -> Result<Response, HttpError> {
    let model = query
        .model
        .ok_or_else(|| HttpError::BadRequest("missing model parameter".into()))?;
    let request = ChatRequest {
        model,
        prompt: "\n".to_string(),
    };
    let rx = start(&state, request).await?;
    Ok(stream_response(rx, Framing::Sse))
}

async fn start(
    state: &AppState,
    request: ChatRequest,
) -> Result<mpsc::Receiver<BridgeEvent>, HttpError> {
    let (tx, rx) = mpsc::channel(64);
    state.bridge.start(request, tx).await?;
    Ok(rx)
}

#[derive(Clone, Copy)]
enum Framing {
    /// Chunk bytes verbatim.
    Raw,
    /// Each chunk as one `data:` record.
    Sse,
}

impl Framing {
    fn chunk(self, content: &str) -> Bytes {
        match self {
            Self::Raw => Bytes::copy_from_slice(content.as_bytes()),
            Self::Sse => {
                let json = serde_json::json!({ "content": content }).to_string();
                Bytes::from(sse_frame(&json))
            }
        }
    }

    fn error(self, message: &str) -> Bytes {
        let json = serde_json::json!({ "error": message }).to_string();
        match self {
            Self::Raw => Bytes::from(json),
            Self::Sse => Bytes::from(sse_frame(&json)),
        }
    }
}

/// Turn a bridge event stream into a chunked HTTP response.
///
/// The client aborting the request drops the body stream, which drops
/// the receiver; the bridge notices and drains on its own.
fn stream_response(mut rx: mpsc::Receiver<BridgeEvent>, framing: Framing) -> Response {
    let stream = async_stream::stream! {
        while let Some(event) = rx.recv().await {
            match event {
                BridgeEvent::Start { .. } => {}
                BridgeEvent::Chunk { content, .. } => {
                    yield Ok::<Bytes, std::io::Error>(framing.chunk(&content));
                }
                BridgeEvent::End { .. } => break,
                BridgeEvent::Failed { message, .. } => {
                    yield Ok(framing.error(&message));
                    break;
                }
            }
        }
    };

    match Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .body(Body::from_stream(stream))
    {
        Ok(response) => response,
        Err(e) => HttpError::Internal(format!("failed to build response: {e}")).into_response(),
    }
}
