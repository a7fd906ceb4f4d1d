//! Error taxonomy shared across the workspace.

use thiserror::Error;

/// Failures starting or running a bridged generation.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The request was rejected before anything was spawned.
    #[error("invalid request: {0}")]
    InvalidInput(String),

    /// The inference service is not running on this host.
    #[error("inference service is not running")]
    UpstreamUnavailable,

    /// Spawning the inference process failed.
    #[error("failed to spawn inference process: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Failures sampling host telemetry.
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("failed to sample host telemetry: {0}")]
    Sample(String),
}
