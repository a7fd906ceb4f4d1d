//! CLI entry point - the composition root.

use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use braid_axum::{start_server, ServerConfig};
use braid_core::ports::TelemetryProbe;
use braid_runtime::SysinfoProbe;

#[derive(Parser)]
#[command(name = "braid")]
#[command(about = "Streaming chat and telemetry server for a local inference service")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the web server.
    Serve {
        /// Port for the HTTP server.
        #[arg(long, default_value_t = 3000, env = "BRAID_PORT")]
        port: u16,

        /// Inference service binary.
        #[arg(long, default_value = "ollama", env = "BRAID_PROGRAM")]
        program: String,

        /// Kill a generation whose output stays silent this many seconds.
        #[arg(long, default_value_t = 300, env = "BRAID_IDLE_TIMEOUT_SECS")]
        idle_timeout_secs: u64,

        /// Seconds between broadcast telemetry snapshots.
        #[arg(long, default_value_t = 5, env = "BRAID_STATS_INTERVAL_SECS")]
        stats_interval_secs: u64,

        /// Directory of built frontend assets to serve with SPA fallback.
        #[arg(long, env = "BRAID_STATIC_DIR")]
        static_dir: Option<std::path::PathBuf>,

        /// Restrict CORS to these origins; all origins allowed when absent.
        #[arg(long = "allow-origin")]
        allow_origins: Vec<String>,
    },

    /// Print one host telemetry snapshot as JSON.
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let Some(command) = cli.command else {
        use clap::CommandFactory;
        Cli::command().print_help()?;
        return Ok(());
    };

    match command {
        Commands::Serve {
            port,
            program,
            idle_timeout_secs,
            stats_interval_secs,
            static_dir,
            allow_origins,
        } => {
            let mut config = ServerConfig {
                port,
                service_name: program.clone(),
                program,
                idle_timeout: Duration::from_secs(idle_timeout_secs),
                stats_interval: Duration::from_secs(stats_interval_secs),
                ..ServerConfig::default()
            };
            if let Some(dir) = static_dir {
                config = config.with_static_dir(dir);
            }
            if !allow_origins.is_empty() {
                config = config.with_allowed_origins(allow_origins);
            }
            start_server(config).await?;
        }
        Commands::Stats => {
            let snapshot = SysinfoProbe::default().sample().await?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_parser_builds() {
        Cli::command().debug_assert();
    }

    #[test]
    fn serve_defaults_are_sane() {
        let cli = Cli::parse_from(["braid", "serve"]);
        match cli.command {
            Some(Commands::Serve { port, program, .. }) => {
                assert_eq!(port, 3000);
                assert_eq!(program, "ollama");
            }
            _ => panic!("expected serve"),
        }
    }
}
