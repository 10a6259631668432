//! Tradegate server: webhook ingress + queue worker in one process.
//!
//! # Usage
//! ```sh
//! WEBHOOK_PASSPHRASE_V2=... ALPACA_KEY_ID=... ALPACA_SECRET_KEY=... cargo run
//! ```
//!
//! The worker polling loop and the HTTP surface share the same queue store;
//! the ingress additionally kicks the worker over HTTP when `WORKER_URL` is
//! set (typically pointing at this same process).

use anyhow::Result;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{Level, info};
use tracing_subscriber::prelude::*;

use tradegate::application::ingress::{IngressHandler, WorkerKicker};
use tradegate::application::risk_guard::RiskGuard;
use tradegate::application::worker::Worker;
use tradegate::config::{Config, CredentialResolver};
use tradegate::domain::clock::SystemClock;
use tradegate::domain::ports::BrokerProvider;
use tradegate::domain::repositories::QueueStore;
use tradegate::infrastructure::alpaca::AlpacaBrokerRegistry;
use tradegate::infrastructure::persistence::{Database, SqliteQueueStore};
use tradegate::interfaces::http::{AppState, router};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();

    info!("Tradegate {} starting...", env!("CARGO_PKG_VERSION"));

    let config = Arc::new(Config::from_env()?);
    info!(
        mode = config.trading_mode.as_str(),
        risk_guard_disabled = config.risk_guard_disabled,
        "Configuration loaded"
    );

    let database = Database::new(&config.database_url).await?;
    let store: Arc<dyn QueueStore> = Arc::new(SqliteQueueStore::new(database));
    let brokers: Arc<dyn BrokerProvider> = Arc::new(AlpacaBrokerRegistry::new(CredentialResolver));
    let clock = Arc::new(SystemClock);

    let risk_guard = Arc::new(RiskGuard::new(
        store.clone(),
        clock.clone(),
        config.risk_guard_disabled,
    ));

    let worker = Arc::new(Worker::new(
        store.clone(),
        brokers.clone(),
        risk_guard,
        clock.clone(),
        config.trading_mode,
        config.worker.poll_interval,
        config.worker.batch_limit,
    ));

    // Polling loop: the progress guarantee even when every kick fails.
    tokio::spawn(worker.clone().run());

    let kicker = match (&config.worker.url, &config.worker.secret) {
        (Some(url), Some(secret)) => Some(WorkerKicker::new(url, secret)),
        _ => {
            info!("WORKER_URL/WORKER_SECRET not set, relying on polling only");
            None
        }
    };

    let ingress = Arc::new(IngressHandler::new(
        store.clone(),
        clock,
        config.webhook.clone(),
        kicker,
    ));

    let app = router(AppState {
        config: config.clone(),
        store,
        ingress,
        worker,
        brokers,
    });

    let listener = TcpListener::bind(&config.bind_address).await?;
    info!("Listening on {}", config.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received. Exiting...");
        })
        .await?;

    Ok(())
}
