//! ryoshu server: runs the poll loop and serves the job API.

mod auth;
mod error;
mod routes;
mod state;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use ryoshu::config::load_config_or_default;
use ryoshu::{Database, JobProgressBroadcaster, PollLoop};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use error::StartupError;
use state::AppState;

const DEFAULT_LOG_FILTER: &str = "ryoshu=info,ryoshu_server=info,tower_http=info";

#[derive(Debug, Parser)]
#[command(name = "ryoshu-server", version, about = "Receipt OCR worker and job API")]
struct Args {
    /// Path to the JSON config file. Defaults apply when omitted.
    #[arg(long, env = "RYOSHU_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = init_tracing(args.log_json) {
        eprintln!("{}", e);
        return ExitCode::FAILURE;
    }

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(json: bool) -> Result<(), StartupError> {
    tracing_log::LogTracer::init().map_err(|e| StartupError::Logging(e.to_string()))?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let output = if json {
        fmt::layer().json().boxed()
    } else {
        fmt::layer().boxed()
    };

    let subscriber = tracing_subscriber::registry().with(output).with(filter);
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| StartupError::Logging(e.to_string()))
}

async fn run(args: Args) -> Result<(), StartupError> {
    info!("Starting ryoshu-server v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config_or_default(args.config.as_deref())?;
    let db_path = config.resolved_database_path();
    let db = Database::open(&db_path)?;
    let broadcaster = JobProgressBroadcaster::default();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    ctrlc::set_handler(move || {
        info!("Shutdown requested");
        let _ = shutdown_tx.send(true);
    })?;

    let poll_loop = PollLoop::from_config(&config, db.clone(), broadcaster.clone())?;
    let worker = tokio::spawn(poll_loop.run(shutdown_rx.clone()));

    if config.auth.sessions.is_empty() {
        warn!("No sessions configured; every API request except /health will be rejected");
    }

    let state = AppState::new(&config, db, broadcaster, shutdown_rx.clone());
    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .map_err(|source| StartupError::Bind {
            addr: config.server.bind.clone(),
            source,
        })?;
    info!("Listening on http://{}", config.server.bind);

    let mut server_shutdown = shutdown_rx;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = server_shutdown.wait_for(|stop| *stop).await;
        })
        .await
        .map_err(StartupError::Serve)?;

    if let Err(e) = worker.await {
        error!("Poll loop task failed: {}", e);
    }

    info!("ryoshu-server stopped");
    Ok(())
}
