use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tootle::{telemetry, ServiceContext};
use tootleconf::{Device, TootleConfig};

/// Real-time MIDI event streaming over WebSocket
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Config file, replacing ./tootle.toml
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the WebSocket server (default)
    Serve(ServeArgs),
    /// Print the effective configuration as TOML
    Config,
    /// Print a musical analysis of a MIDI file as JSON
    Analyze {
        /// Standard MIDI File to analyze
        file: PathBuf,
    },
}

#[derive(clap::Args, Debug, Default)]
struct ServeArgs {
    /// Address to bind
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Inference device (cuda or cpu)
    #[arg(long)]
    device: Option<Device>,

    /// Never fetch model files
    #[arg(long)]
    no_download: bool,

    /// OTLP gRPC endpoint for OpenTelemetry (e.g., "127.0.0.1:4317")
    #[arg(long)]
    otlp_endpoint: Option<String>,
}

impl ServeArgs {
    fn apply(self, config: &mut TootleConfig) {
        if let Some(host) = self.host {
            config.bind.host = host;
        }
        if let Some(port) = self.port {
            config.bind.port = port;
        }
        if let Some(device) = self.device {
            config.model.device = device;
        }
        if self.no_download {
            config.model.no_download = true;
        }
        if let Some(endpoint) = self.otlp_endpoint {
            config.telemetry.otlp_endpoint = endpoint;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (mut config, sources) = TootleConfig::load_with_sources_from(cli.config.as_deref())
        .context("Failed to load configuration")?;

    match cli.command.unwrap_or(Command::Serve(ServeArgs::default())) {
        Command::Config => {
            print!("{}", config.to_toml());
            Ok(())
        }
        Command::Analyze { file } => analyze(&config, &file),
        Command::Serve(args) => {
            args.apply(&mut config);
            telemetry::init(&config.telemetry).context("Failed to initialize telemetry")?;
            for file in &sources.files {
                tracing::info!(path = %file.display(), "loaded config file");
            }
            for var in &sources.env_overrides {
                tracing::debug!(var = %var, "config overridden from environment");
            }
            let result = serve(config).await;
            telemetry::shutdown();
            result
        }
    }
}

fn analyze(config: &TootleConfig, file: &std::path::Path) -> Result<()> {
    let bytes =
        std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let context = ServiceContext::from_config(config.clone())?;
    let analysis = midi_analysis::analyze_midi(&bytes, context.tokenizer())
        .with_context(|| format!("Failed to analyze {}", file.display()))?;
    println!("{}", serde_json::to_string_pretty(&analysis)?);
    Ok(())
}

async fn serve(config: TootleConfig) -> Result<()> {
    let addr = config.bind_addr();
    let context = Arc::new(ServiceContext::from_config(config)?);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("🎵 tootle listening on ws://{}", addr);
    tracing::info!("   Health: GET http://{}/health", addr);

    let shutdown_token = context.shutdown_token().clone();
    let server = tokio::spawn(tootle::serve(listener, context));

    // Handle both SIGINT (Ctrl+C) and SIGTERM (systemd, containers)
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received SIGINT (Ctrl+C), shutting down gracefully...");
        }
        _ = terminate() => {
            tracing::info!("Received SIGTERM, shutting down gracefully...");
        }
    }
    shutdown_token.cancel();

    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!("Server shutdown with error: {:?}", e),
        Err(e) => tracing::error!("Server task failed: {:?}", e),
    }
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn terminate() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        std::future::pending::<()>().await;
    }
}
