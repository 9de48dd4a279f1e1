//! Warden API server binary.
//!
//! Reads configuration from the environment (and `.env`), runs migrations,
//! starts the expired-token reaper and serves the HTTP API until Ctrl-C.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use warden_api::AppState;
use warden_api::config::ApiConfig;
use warden_core::clock::{Clock, SystemClock};
use warden_core::mail::Mailer;
use warden_core::mail::log::LogMailer;
use warden_core::mail::smtp::SmtpMailer;
use warden_core::reaper::{DEFAULT_REAP_INTERVAL, spawn_reaper};
use warden_core::store::Store;
use warden_core::store::postgres::PgStore;

/// CLI arguments for the API server. Flags override the environment.
#[derive(Parser, Debug)]
#[command(name = "warden_api_server", about = "Warden credential and session API")]
struct Args {
    /// Address to listen on.
    #[arg(long, env = "BIND_ADDR")]
    bind: Option<String>,

    /// PostgreSQL connection URL.
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Maximum number of database connections in the pool.
    #[arg(long, default_value_t = 10)]
    max_connections: u32,

    /// Seconds between expired-token sweeps.
    #[arg(long, default_value_t = DEFAULT_REAP_INTERVAL.as_secs())]
    reap_interval_secs: u64,
}

async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        return;
    }
    info!("shutdown requested");
    shutdown.cancel();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,warden_api=debug,warden_core=debug")
            }),
        )
        .init();

    let args = Args::parse();

    let mut config = ApiConfig::from_env()?;
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if let Some(url) = args.database_url {
        config.database_url = url;
    }

    info!(
        bind_addr = %config.bind_addr,
        max_connections = args.max_connections,
        "starting warden_api_server"
    );

    let pool = PgPoolOptions::new()
        .max_connections(args.max_connections)
        .acquire_timeout(Duration::from_secs(30))
        .connect(&config.database_url)
        .await?;

    info!("running database migrations");
    warden_api::migrate(&pool).await?;

    let mailer: Arc<dyn Mailer> = match &config.smtp {
        Some(smtp) => {
            info!(host = %smtp.host, port = smtp.port, "sending mail via SMTP");
            Arc::new(SmtpMailer::new(smtp)?)
        }
        None => {
            warn!("SMTP_HOST not set, outgoing mail will only be logged");
            Arc::new(LogMailer)
        }
    };
    let store: Arc<dyn Store> = Arc::new(PgStore::new(pool.clone()));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let shutdown = CancellationToken::new();

    let reaper = spawn_reaper(
        store.clone(),
        clock.clone(),
        Duration::from_secs(args.reap_interval_secs),
        shutdown.child_token(),
    );

    let bind_addr = config.bind_addr.clone();
    let state = AppState::new(config, store, mailer, clock)
        .with_pool(pool)
        .with_shutdown(shutdown.clone());
    let state_cleanup = state
        .github
        .as_ref()
        .map(|github| github.states().spawn_cleanup_task());

    let app = warden_api::router(state);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %listener.local_addr()?, "REST API listening");

    let serve_result = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
    .await;

    // Stop background work whichever way the server exited.
    shutdown.cancel();
    if let Some(task) = state_cleanup {
        task.abort();
    }
    if let Err(e) = reaper.await {
        warn!(error = %e, "reaper task ended abnormally");
    }

    serve_result?;
    info!("server stopped");
    Ok(())
}
