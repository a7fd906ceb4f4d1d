//! Core domain types and port definitions for braid.
//!
//! This crate is the single source of truth for:
//!
//! - the wire protocol spoken over the WebSocket channel ([`wire`])
//! - host telemetry shapes ([`telemetry`])
//! - the event stream produced by the process bridge ([`events`])
//! - the error taxonomy ([`error`])
//! - ports implemented by the runtime and web adapters ([`ports`])
//!
//! It deliberately carries no adapter-specific dependencies: no HTTP
//! framework, no process handling, no system probing. Those live in
//! `braid-runtime` and `braid-axum` behind the ports defined here.

pub mod error;
pub mod events;
pub mod ports;
pub mod telemetry;
pub mod wire;

pub use error::{BridgeError, TelemetryError};
pub use events::BridgeEvent;
pub use ports::{ServiceProbe, SnapshotEmitter, TelemetryProbe};
pub use telemetry::{ServiceStatus, SystemSnapshot, TelemetryTick};
pub use wire::{ChatDelta, ChatRequest, ClientCommand, DecodeError, Envelope, EnvelopeKind};
