//! HTTP server support (standalone + embeddable).
//!
//! - **Standalone**: `mindspero-billing-server` binary calls `run()`
//! - **Embedded**: host Axum app calls `router(state)` (and may nest it)

mod http;
mod http_auth;
mod http_errors;
mod http_parse;
mod http_types;
mod state;

pub use http::router;
pub use state::{
    build_state_from_env, build_state_with_pool, AppState, ReportingServiceType,
    SubscriptionLedgerType, WebhookProcessorType,
};

use crate::infrastructure::AppConfig;
use anyhow::Context;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Standalone entrypoint for the `mindspero-billing-server` binary.
pub async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,mindspero_billing=debug")),
        )
        .init();

    let config = AppConfig::from_env().context("load config")?;
    if config.admin_token.is_empty() {
        warn!("MINDSPERO_ADMIN_TOKEN is not set; admin endpoints are disabled");
    }
    let state = build_state_from_env(config.clone()).await?;

    // Dropping the scheduler stops the sweep, so keep it for the life of the server.
    let _scheduler = start_expiry_sweep(&state, &config.expiry_sweep_schedule).await?;

    let addr: SocketAddr = format!("{}:{}", config.server_host, config.server_port)
        .parse()
        .context("parse listen address")?;
    let listener = TcpListener::bind(addr).await.context("bind listener")?;

    info!(
        host = %config.server_host,
        port = config.server_port,
        "Server running"
    );
    info!(
        docs = %format!("http://{}:{}/docs", config.server_host, config.server_port),
        "API docs"
    );

    let app = router(state);
    axum::serve(listener, app).await.context("serve")?;
    Ok(())
}

/// Run `sweep_expired` on `schedule` (six-field cron, seconds first).
pub async fn start_expiry_sweep(state: &AppState, schedule: &str) -> anyhow::Result<JobScheduler> {
    let scheduler = JobScheduler::new().await.context("create scheduler")?;
    let ledger = state.ledger.clone();

    let job = Job::new_async(schedule, move |_id, _scheduler| {
        let ledger = ledger.clone();
        Box::pin(async move {
            match ledger.sweep_expired().await {
                Ok(expired) => info!(expired, "Expiry sweep finished"),
                Err(e) => error!(error = %e, "Expiry sweep failed"),
            }
        })
    })
    .context("create expiry sweep job")?;

    scheduler.add(job).await.context("schedule expiry sweep")?;
    scheduler.start().await.context("start scheduler")?;
    info!(schedule = %schedule, "Expiry sweep scheduled");

    Ok(scheduler)
}
