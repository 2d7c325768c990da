//! CLI entrypoint and subcommand orchestration.

mod config;
mod daemon;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use config::Config;
use gateway::{GatewayServer, UplinkHandler};
use gwpool::Pool;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Top-level command-line arguments for the loragate application.
#[derive(Parser)]
#[command(name = "loragate")]
#[command(about = "LoRaWAN gateway server", version = "0.1.0")]
struct Cli {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

/// CLI subcommands available in the application.
#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server
    Start,

    /// Print the effective configuration and exit
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    let level = cli.log_level.as_deref().unwrap_or(&config.log_level);
    init_tracing(level);

    match cli.command {
        Commands::Start => run_start(config).await,
        Commands::Config => print_config(&config),
    }
}

/// Installs the fmt subscriber; `RUST_LOG` wins over the configured level.
fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();
}

/// Run the gateway server until SIGINT/SIGTERM, then drain the pool.
async fn run_start(config: Config) -> anyhow::Result<()> {
    let pid_file = daemon::PidFile::new(
        config
            .pid_file
            .clone()
            .unwrap_or_else(daemon::PidFile::default_path),
    );
    if let Some(pid) = pid_file.existing_pid().await {
        warn!("stale PID file found (pid {pid}), overwriting");
    }
    pid_file.write().await?;

    let pool = Arc::new(Pool::new(config.send_timeout()));
    let handler: UplinkHandler = Arc::new(|id, frame| {
        Box::pin(async move {
            if frame.status_only() {
                info!(gateway = %id, "gateway status received");
            } else {
                info!(gateway = %id, messages = frame.message_count(), "uplink received");
            }
        })
    });

    let addr = config.listen_addr()?;
    let server = match (&config.tls_cert, &config.tls_key) {
        (Some(cert), Some(key)) => {
            let cert_pem = tokio::fs::read(cert).await?;
            let key_pem = tokio::fs::read(key).await?;
            GatewayServer::new_with_certs(addr, &cert_pem, &key_pem, Arc::clone(&pool), handler)?
        }
        _ => GatewayServer::new_self_signed(addr, Arc::clone(&pool), handler)?,
    };

    info!("starting gateway server");
    tokio::select! {
        _ = server.run() => {}
        _ = daemon::wait_for_shutdown() => {}
    }

    pool.shutdown();
    pid_file.remove().await;
    Ok(())
}

/// Render the effective configuration as TOML on stdout.
fn print_config(config: &Config) -> anyhow::Result<()> {
    let rendered = toml::to_string_pretty(config)?;
    println!("{rendered}");
    Ok(())
}
