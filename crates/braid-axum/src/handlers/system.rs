//! Telemetry endpoints.

use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use serde::Deserialize;
use tracing::warn;

use braid_core::telemetry::SystemSnapshot;
use braid_core::wire::sse_frame;

use crate::error::HttpError;
use crate::state::AppState;

const DEFAULT_STREAM_INTERVAL_MS: u64 = 5000;

/// `GET /api/system` — one snapshot as JSON.
pub async fn snapshot(
    State(state): State<AppState>,
) -> Result<Json<SystemSnapshot>, HttpError> {
    let snapshot = state
        .probe
        .sample()
        .await
        .map_err(|e| HttpError::Internal(e.to_string()))?;
    Ok(Json(snapshot))
}

#[derive(Debug, Deserialize)]
pub struct StreamBody {
    /// Milliseconds between ticks.
    pub interval: Option<u64>,
}

/// `POST /api/system/stream` — periodic telemetry ticks as SSE.
///
/// The stream runs until the client disconnects; dropping the response
/// body ends the loop. A tick whose sample fails is logged and skipped.
pub async fn stream(State(state): State<AppState>, Json(body): Json<StreamBody>) -> Response {
    let interval = Duration::from_millis(body.interval.unwrap_or(DEFAULT_STREAM_INTERVAL_MS));
    let probe = state.probe.clone();

    let stream = async_stream::stream! {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first interval tick fires immediately; match the original
        // cadence of waiting one full interval before the first sample.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match probe.tick().await {
                Ok(tick) => match serde_json::to_string(&tick) {
                    Ok(json) => yield Ok::<Bytes, std::io::Error>(Bytes::from(sse_frame(&json))),
                    Err(e) => warn!(error = %e, "failed to serialize telemetry tick"),
                },
                Err(e) => warn!(error = %e, "telemetry tick failed, skipping"),
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
