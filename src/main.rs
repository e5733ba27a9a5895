use std::sync::Arc;

use anyhow::Context;

use outreach_dispatch::api::{self, AppState};
use outreach_dispatch::channels::SenderRegistry;
use outreach_dispatch::config::AppConfig;
use outreach_dispatch::dispatch::{Dispatcher, RateLimiter, SystemClock};
use outreach_dispatch::scheduler;
use outreach_dispatch::store::{Database, LibSqlBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let config = AppConfig::from_env().context("Invalid configuration")?;
    config.logging.init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Outreach dispatch starting");

    // ── Database ─────────────────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(&config.server.db_path)
            .await
            .with_context(|| {
                format!("Failed to open database at {}", config.server.db_path.display())
            })?,
    );

    match db.fail_interrupted_sends().await {
        Ok(0) => {}
        Ok(n) => tracing::warn!(tasks = n, "Marked tasks interrupted mid-send as failed"),
        Err(e) => tracing::warn!("Failed to settle interrupted sends: {e}"),
    }

    // ── Senders ──────────────────────────────────────────────────────────
    let registry = Arc::new(SenderRegistry::from_config(
        Arc::clone(&db),
        config.composio,
        config.smtp,
        config.twilio,
        config.retry,
    ));

    // ── Dispatch ─────────────────────────────────────────────────────────
    let limiter = Arc::new(RateLimiter::new(
        Arc::clone(&db),
        config.rate_limits,
        Arc::new(SystemClock),
    ));
    tracing::info!(
        linkedin = config.rate_limits.linkedin_daily,
        email = config.rate_limits.email_daily,
        sms = config.rate_limits.sms_daily,
        policy = ?config.dispatch.count_policy,
        "Daily send caps"
    );

    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&db),
        registry,
        Arc::clone(&limiter),
        config.dispatch,
    ));

    let _scheduler = scheduler::spawn_dispatch_scheduler(
        Arc::clone(&dispatcher),
        Arc::clone(&db),
        config.scheduler,
    );

    // ── HTTP ─────────────────────────────────────────────────────────────
    if config.server.service_key.is_none() {
        tracing::warn!("OUTREACH_SERVICE_KEY not set, API is unauthenticated");
    }
    let state = AppState {
        dispatcher,
        db,
        limiter,
        service_key: config.server.service_key.map(Arc::new),
    };
    let app = api::router(state, &config.server.allowed_origins);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.server.port))
        .await
        .with_context(|| format!("Failed to bind port {}", config.server.port))?;
    tracing::info!(port = config.server.port, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutdown signal received");
        })
        .await
        .context("HTTP server error")?;

    Ok(())
}
