use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::info;

use bay::api::{AppState, create_router};
use bay::config::Settings;
use bay::db::Database;
use bay::driver::build_driver;
use bay::history::HistoryRepository;
use bay::session::SessionRepository;
use bay::ship::{ShipClient, ShipRepository, ShipService, reaper, warm_pool};

#[derive(Debug, Parser)]
#[command(
    name = "bay",
    version,
    about = "Shipyard control plane: sandbox allocation for agent sessions",
    propagate_version = true
)]
struct Cli {
    /// Increase logging verbosity (stackable)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the HTTP API server
    Serve(ServeCommand),
    /// Print the effective configuration
    Config,
}

#[derive(Debug, Clone, Args)]
struct ServeCommand {
    /// Override the bind address
    #[arg(long)]
    host: Option<String>,
    /// Override the port
    #[arg(short, long)]
    port: Option<u16>,
}

fn init_logging(verbose: u8) {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("bay={level},tower_http={level}")));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .ok();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let settings = Settings::load().context("loading configuration")?;

    match cli.command {
        Command::Serve(cmd) => serve(settings, cmd).await,
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&settings)?);
            Ok(())
        }
    }
}

async fn serve(mut settings: Settings, cmd: ServeCommand) -> Result<()> {
    if let Some(host) = cmd.host {
        settings.host = host;
    }
    if let Some(port) = cmd.port {
        settings.port = port;
    }
    let settings = Arc::new(settings);

    info!(driver = ?settings.container_driver, "starting bay");

    let database = Database::open(&PathBuf::from(&settings.database_path)).await?;
    let driver = build_driver(&settings)
        .await
        .context("initializing container driver")?;
    let client = ShipClient::new(&settings);

    let service = Arc::new(ShipService::new(
        ShipRepository::new(database.pool().clone()),
        SessionRepository::new(database.pool().clone()),
        HistoryRepository::new(database.pool().clone()),
        driver,
        client,
        settings.clone(),
    ));

    let mut background = Vec::new();
    if settings.warm_pool_enabled {
        background.push(warm_pool::spawn(service.clone(), settings.clone()));
    } else {
        info!("warm pool is disabled");
    }
    background.push(reaper::spawn(service.clone(), settings.clone()));

    let state = AppState::new(service, settings.clone());
    let router = create_router(state);

    let addr: SocketAddr = format!("{}:{}", settings.host, settings.port)
        .parse()
        .context("parsing bind address")?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    info!(%addr, "bay listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    for task in background {
        task.abort();
    }
    info!("bay stopped");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
