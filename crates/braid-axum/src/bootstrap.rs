//! Server bootstrap - the composition root.
//!
//! The only place where concrete runtime implementations are wired to
//! the ports the handlers consume.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use braid_core::ports::{ServiceProbe, SnapshotEmitter, TelemetryProbe};
use braid_runtime::{BridgeConfig, ChatBridge, OllamaCli, StatsPoller, SysinfoProbe};

use crate::session::SessionRegistry;

/// CORS configuration for the web server.
#[derive(Debug, Clone, Default)]
pub enum CorsConfig {
    /// Allow all origins (development mode).
    #[default]
    AllowAll,
    /// Allow specific origins (production mode).
    AllowOrigins(Vec<String>),
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port for the HTTP server.
    pub port: u16,
    /// Inference service binary, used for generation and model management.
    pub program: String,
    /// Process name probed to decide whether the service is up.
    pub service_name: String,
    /// Kill a generation whose stdout stays silent this long.
    pub idle_timeout: Duration,
    /// Cadence of the background telemetry broadcast.
    pub stats_interval: Duration,
    /// Optional path to static assets for SPA serving.
    pub static_dir: Option<PathBuf>,
    /// CORS configuration.
    pub cors: CorsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            program: "ollama".to_string(),
            service_name: "ollama".to_string(),
            idle_timeout: Duration::from_secs(300),
            stats_interval: Duration::from_secs(5),
            static_dir: None,
            cors: CorsConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Set the static directory for SPA serving.
    #[must_use]
    pub fn with_static_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.static_dir = Some(path.into());
        self
    }

    /// Set CORS to allow specific origins.
    #[must_use]
    pub fn with_allowed_origins(mut self, origins: Vec<String>) -> Self {
        self.cors = CorsConfig::AllowOrigins(origins);
        self
    }
}

/// All initialized services for the web server.
pub struct AxumContext {
    /// Process bridge for chat generations.
    pub bridge: Arc<ChatBridge>,
    /// Host telemetry source.
    pub probe: Arc<dyn TelemetryProbe>,
    /// Liveness probe for the inference service.
    pub service_probe: Arc<dyn ServiceProbe>,
    /// Live WebSocket connection set.
    pub registry: Arc<SessionRegistry>,
    /// Model management through the service CLI.
    pub models: OllamaCli,
    /// Background telemetry broadcaster.
    pub poller: Arc<StatsPoller>,
}

/// Wire all services together.
///
/// The stats poller is constructed but not started; [`start_server`]
/// starts it so tests can bootstrap without a background loop.
pub fn bootstrap(config: &ServerConfig) -> AxumContext {
    let sysinfo = Arc::new(SysinfoProbe::new(config.service_name.clone()));
    let probe: Arc<dyn TelemetryProbe> = sysinfo.clone();
    let service_probe: Arc<dyn ServiceProbe> = sysinfo;

    let bridge = Arc::new(ChatBridge::new(
        BridgeConfig {
            program: config.program.clone(),
            run_args: vec!["run".to_string()],
            idle_timeout: Some(config.idle_timeout),
        },
        Arc::clone(&service_probe),
    ));

    let registry = Arc::new(SessionRegistry::new(Arc::clone(&bridge), Arc::clone(&probe)));

    let emitter: Arc<dyn SnapshotEmitter> = Arc::clone(&registry) as Arc<dyn SnapshotEmitter>;
    let poller = Arc::new(StatsPoller::new(
        Arc::clone(&probe),
        emitter,
        config.stats_interval,
    ));

    let models = OllamaCli::new(config.program.clone());

    AxumContext {
        bridge,
        probe,
        service_probe,
        registry,
        models,
        poller,
    }
}

/// Start the web server on the configured port.
///
/// If `config.static_dir` is set, serves static assets with SPA
/// fallback in addition to the API.
pub async fn start_server(config: ServerConfig) -> Result<()> {
    use tokio::net::TcpListener;
    use tracing::info;

    let ctx = bootstrap(&config);
    ctx.poller.start().await;
    let poller = Arc::clone(&ctx.poller);

    let app = if let Some(ref static_dir) = config.static_dir {
        info!("serving static assets from {}", static_dir.display());
        crate::routes::create_spa_router(ctx, static_dir, &config.cors)
    } else {
        crate::routes::create_router(ctx, &config.cors)
    };

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("braid server listening on http://{addr}");

    let result = axum::serve(listener, app).await;
    poller.stop().await;
    result?;
    Ok(())
}
