use clap::Parser;
use loyalty::accrual::http_client_factory;
use loyalty::adapters::{MemoryStore, PostgresStore};
use loyalty::cli::{Cli, Commands};
use loyalty::config::AppConfig;
use loyalty::coordination::{install_signal_handlers, GracefulShutdown, ShutdownSignal};
use loyalty::error::{LoyaltyError, Result};
use loyalty::persistence::OrderStore;
use loyalty::services::{AccrualService, HealthServer, HealthState, PendingQueue};
use std::sync::Arc;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod main_runtime;

use main_runtime::init_logging;

const DB_PROBE_INTERVAL: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load_from(&cli.config_dir).map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        LoyaltyError::from(e)
    })?;
    cli.apply(&mut config);

    let _log_guard = init_logging(&config.logging);

    if let Err(errors) = config.validate() {
        for e in &errors {
            error!("Invalid configuration: {}", e);
        }
        return Err(LoyaltyError::Validation(errors.join("; ")));
    }

    match cli.command() {
        Commands::Migrate => {
            let store = PostgresStore::from_config(&config.database).await?;
            store.migrate().await?;
            store.close().await;
            Ok(())
        }
        Commands::Run => run(config, cli.memory).await,
    }
}

async fn run(config: AppConfig, memory: bool) -> Result<()> {
    let shutdown = Arc::new(GracefulShutdown::from_config(&config.shutdown));
    install_signal_handlers(shutdown.clone())?;
    let cancel = shutdown.token();

    let (orders, postgres): (Arc<dyn OrderStore>, Option<PostgresStore>) = if memory {
        warn!("Using in-memory storage; orders are lost on exit");
        (Arc::new(MemoryStore::new()), None)
    } else {
        let store = PostgresStore::from_config(&config.database).await?;
        store.migrate().await?;
        (Arc::new(store.clone()), Some(store))
    };

    let queue = Arc::new(PendingQueue::new());
    let service = AccrualService::new(orders, http_client_factory(&config.accrual), queue.clone());

    let health = Arc::new(
        HealthState::new()
            .with_stats(service.stats())
            .with_queue(queue),
    );
    match &postgres {
        Some(store) => {
            health.record_db_check(store.ping().await.is_ok()).await;
            tokio::spawn(probe_database(store.clone(), health.clone(), cancel.clone()));
        }
        None => health.record_db_check(true).await,
    }

    let handle = match service
        .start(
            cancel.clone(),
            config.accrual.worker_count(),
            config.accrual.poll_interval(),
        )
        .await
    {
        Ok(handle) => handle,
        Err(e) => {
            error!("Failed to start accrual reconciliation: {}", e);
            if let Some(store) = &postgres {
                store.close().await;
            }
            return Err(e);
        }
    };

    let server = HealthServer::new(health, config.server.run_address.clone());
    let server_task = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = server.run(shutdown.token()).await {
                error!("Health server failed: {}", e);
                shutdown.request_shutdown(ShutdownSignal::Graceful);
            }
        })
    };

    let signal = shutdown.wait_for_request().await;
    info!("Stopping ({} shutdown)", signal);

    let result = shutdown
        .execute(handle.shutdown(), async {
            if let Some(store) = &postgres {
                store.close().await;
            }
        })
        .await;

    if let Err(e) = server_task.await {
        warn!("Health server task ended abnormally: {}", e);
    }

    result.map_err(|e| LoyaltyError::Internal(e.to_string()))
}

async fn probe_database(store: PostgresStore, health: Arc<HealthState>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(DB_PROBE_INTERVAL);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let ok = store.ping().await.is_ok();
                if !ok {
                    warn!("Database ping failed");
                }
                health.record_db_check(ok).await;
            }
        }
    }
}
