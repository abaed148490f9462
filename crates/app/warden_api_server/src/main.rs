//! Warden API server binary.
//!
//! Loads `.env`, validates configuration, connects to PostgreSQL (or an
//! in-memory store for local development), then serves the HTTP API until
//! Ctrl-C. Queued audit entries are written before the process exits.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};
use warden_api::config::ApiConfig;
use warden_core::audit::AuditRecorder;
use warden_core::seed::{ensure_superadmin, seed_defaults};
use warden_core::store::{AuthStore, MemoryStore, PgStore};

/// CLI arguments for the API server. Flags override the matching env vars.
#[derive(Parser, Debug)]
#[command(name = "warden_api_server", about = "Warden API server")]
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

    /// Serve from a seeded in-memory store instead of PostgreSQL. Data is lost on exit.
    #[arg(long, default_value_t = false)]
    in_memory: bool,

    /// Bootstrap superadmin for `--in-memory` mode.
    #[arg(long, env = "SUPERADMIN_EMAIL", requires = "superadmin_password")]
    superadmin_email: Option<String>,

    #[arg(long, env = "SUPERADMIN_PASSWORD", hide_env_values = true)]
    superadmin_password: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
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
    // Refuse to start without both token secrets.
    config.validate()?;

    let store: Arc<dyn AuthStore> = if args.in_memory {
        warn!("using in-memory store; all data is lost on exit");
        let store = MemoryStore::new();
        let report = seed_defaults(&store).await?;
        info!(?report, "seeded defaults");
        if let (Some(email), Some(password)) = (&args.superadmin_email, &args.superadmin_password)
        {
            let (user, created) = ensure_superadmin(&store, email, password).await?;
            info!(email = %user.email, created, "superadmin ready");
        }
        Arc::new(store)
    } else {
        info!(max_connections = args.max_connections, "connecting to database");
        let pool = PgPoolOptions::new()
            .max_connections(args.max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&config.database_url)
            .await?;

        info!("running database migrations");
        warden_core::migrate::migrate(&pool).await?;
        Arc::new(PgStore::new(pool))
    };

    if mails_to_log(&config, args.in_memory) {
        warn!("ZEPTO_* not configured; outgoing mail, including live tokens, is written to the log");
    }
    let mailer = config.mailer()?;
    let (audit, audit_worker) = AuditRecorder::spawn(store.clone(), config.audit_queue_capacity);

    let bind_addr = config.bind_addr.clone();
    let state = warden_api::AppState::new(store, mailer, audit, config);
    let app = warden_api::router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %listener.local_addr()?, "REST API listening");

    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await;

    info!("draining audit queue");
    audit_worker.shutdown().await;

    served?;
    Ok(())
}

/// True when a persistent deployment would write real mail (with live tokens) to the log.
fn mails_to_log(config: &ApiConfig, in_memory: bool) -> bool {
    config.zepto.is_none() && !in_memory
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
