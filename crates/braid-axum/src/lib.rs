//! Axum web adapter for braid.
//!
//! Exposes the streaming chat bridge, host telemetry and the
//! multiplexed WebSocket channel over HTTP:
//!
//! - `POST /api/chat` — raw chunked generation output
//! - `GET`/`POST /api/chat/streaming` — SSE-framed generation output
//! - `GET /api/system` / `POST /api/system/stream` — telemetry
//! - `GET /api/ws` — the bidirectional envelope channel
//! - `GET`/`POST`/`DELETE /api/models` — model management
//!
//! [`bootstrap::start_server`] wires everything and serves it.

pub mod bootstrap;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod session;
pub mod state;
pub mod ws;

pub use bootstrap::{bootstrap, start_server, AxumContext, CorsConfig, ServerConfig};
pub use error::HttpError;
pub use session::{ConnectionHandle, SessionRegistry};
pub use state::AppState;
