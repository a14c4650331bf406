use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use campaign_dispatch::{
    application::{
        handlers::{
            campaign_scheduler::CampaignScheduler, dispatch_worker::DispatchWorker,
            message_dispatcher::MessageDispatchHandler,
        },
        services::sender::Sender,
    },
    config::{Config, SenderConfig},
    infrastructure::{
        messaging::{
            http_sms::{HttpSmsConfig, HttpSmsSender},
            jetstream::JetstreamBroker,
            simulated::SimulatedSender,
        },
        repositories::postgres::{PostgresCampaignRepository, PostgresOutboundMessageRepository},
    },
    supervisor::supervise,
};
use sqlx::postgres::PgPoolOptions;
use tokio::{main, signal, sync::watch, task::JoinSet};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, prelude::*};

#[main]
async fn main() -> anyhow::Result<()> {
    let config = Config::try_parse()?;
    init_tracing(config.production);

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&config.database_url)
        .await
        .context("failed to connect to postgres")?;
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("failed to run migrations")?;

    let broker = JetstreamBroker::connect(&config.jetstream()).await?;
    broker.ping()?;
    let campaigns = PostgresCampaignRepository::new(pool.clone());
    let messages = PostgresOutboundMessageRepository::new(pool.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = JoinSet::new();

    if config.run_mode.runs_scheduler() {
        let scheduler = CampaignScheduler::new(
            campaigns.clone(),
            messages.clone(),
            broker.clone(),
            config.scheduler(),
        );
        let shutdown = shutdown_rx.clone();
        tasks.spawn(async move {
            scheduler.run_until(shutdown).await;
            Ok(())
        });
    }

    if config.run_mode.runs_worker() {
        let sender = build_sender(&config.sender)?;
        let handler = Arc::new(MessageDispatchHandler::new(
            messages.clone(),
            sender,
            config.dispatch(),
        ));
        let deliveries = broker.consume().await?;
        let worker = DispatchWorker::new(handler).with_shutdown_grace(config.shutdown_grace);
        let shutdown = shutdown_rx.clone();
        tasks.spawn(async move { worker.run(deliveries, shutdown).await });
    }

    info!(run_mode = ?config.run_mode, "campaign dispatch started");
    let outcome = supervise(tasks, shutdown_tx, wait_for_signal()).await;

    broker.close().await;
    pool.close().await;
    info!("campaign dispatch stopped");
    outcome
}

fn build_sender(config: &SenderConfig) -> anyhow::Result<Arc<dyn Sender>> {
    Ok(match config {
        SenderConfig::Simulated { success_rate } => {
            info!(success_rate, "using simulated sender");
            Arc::new(SimulatedSender::new(*success_rate, Duration::from_millis(500)))
        }
        SenderConfig::Http { endpoint, api_token } => {
            info!(endpoint = %endpoint, "using http sms sender");
            Arc::new(HttpSmsSender::new(HttpSmsConfig {
                endpoint: endpoint.clone(),
                api_token: api_token.clone(),
                timeout: Duration::from_secs(10),
            })?)
        }
    })
}

fn init_tracing(production: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn,async_nats=warn"));

    let result = if production {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(false)
                    .flatten_event(true),
            )
            .with(filter)
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .with(filter)
            .try_init()
    };

    if result.is_err() {
        warn!("tracing already initialized");
    }
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl+c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
