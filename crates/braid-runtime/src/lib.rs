//! Runtime adapters for braid.
//!
//! Everything here touches the host: spawning and pumping the inference
//! process ([`bridge`]), sampling RAM/CPU/storage ([`telemetry`]),
//! pushing periodic snapshots ([`poller`]) and managing installed models
//! through the service's own CLI ([`ollama`]).

pub mod bridge;
pub mod ollama;
pub mod poller;
pub mod telemetry;

pub use bridge::{BridgeConfig, BridgeHandle, ChatBridge};
pub use ollama::{ModelInfo, OllamaCli, OllamaCliError};
pub use poller::StatsPoller;
pub use telemetry::SysinfoProbe;
