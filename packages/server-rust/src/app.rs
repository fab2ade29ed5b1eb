//! Process wiring: drivers, unit of work, one worker/handler pair per
//! queue-backed operation, the queue connection and the health endpoint,
//! all under one [`Butler`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use ledgerq_core::OperationCatalog;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::ledger::LedgerDriver;
use crate::network::{AppState, HealthServer, ShutdownController};
use crate::pipeline::{MessageHandler, QueueWorker, SavePool};
use crate::queue::{QueueConnection, QueueRunner};
use crate::storage::{build_driver, Driver, DriverRegistry};
use crate::supervisor::Butler;
use crate::uow::UnitOfWork;

/// What happened during shutdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Components aborted because they did not stop in time.
    pub stragglers: Vec<String>,
    /// Whether every in-flight batch finished.
    pub drained: bool,
}

impl ShutdownReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.stragglers.is_empty() && self.drained
    }
}

pub struct App {
    controller: Arc<ShutdownController>,
    uow: Arc<UnitOfWork>,
    pool: SavePool,
    butler: Butler,
    shutdown_timeout: Duration,
    health_port: u16,
}

impl App {
    /// Builds and starts every component. The process is `Ready` when this
    /// returns.
    ///
    /// # Errors
    ///
    /// Returns an error if the config does not match the catalog, a driver
    /// cannot be built, the queue cannot connect or subscribe, or the health
    /// endpoint cannot bind.
    pub async fn start(
        config: &ServerConfig,
        catalog: &OperationCatalog,
        queue: Arc<dyn QueueConnection>,
    ) -> anyhow::Result<Self> {
        config.validate_against(catalog)?;
        let storages = DriverRegistry::from_configs(&config.storages)?;
        let ledger = build_driver(&config.ledger).context("ledger driver")?;
        Self::start_with(config, catalog, queue, storages, ledger).await
    }

    /// Like [`start`](Self::start), with drivers built by the caller instead
    /// of from `config.storages` and `config.ledger`.
    ///
    /// # Errors
    ///
    /// Same as [`start`](Self::start), minus driver construction.
    pub async fn start_with(
        config: &ServerConfig,
        catalog: &OperationCatalog,
        queue: Arc<dyn QueueConnection>,
        storages: DriverRegistry,
        ledger: Arc<dyn Driver>,
    ) -> anyhow::Result<Self> {
        for op in catalog.iter() {
            if storages.get(&op.storage).is_none() {
                anyhow::bail!("operation {} refers to unknown storage {}", op.name, op.storage);
            }
        }

        let ledger = LedgerDriver::new(ledger, config.instance_id);
        let uow = Arc::new(UnitOfWork::new(ledger, Arc::new(storages)));

        let controller = Arc::new(ShutdownController::new());
        let pool = SavePool::new(
            Arc::clone(&uow),
            config.handler.max_in_flight_batches,
            Arc::clone(&controller),
        );
        let mut butler = Butler::new(Arc::clone(&controller));

        let mut health = HealthServer::new(
            config.health.clone(),
            AppState {
                shutdown: Arc::clone(&controller),
                uow: Some(Arc::clone(&uow)),
                instance_id: config.instance_id,
                start_time: Instant::now(),
            },
        );
        let health_port = health.start().await?;

        queue
            .connect()
            .await
            .with_context(|| format!("connect queue {}", queue.name()))?;

        let mut consumers = 0;
        for op in catalog.iter() {
            let Some(queue_name) = op.queue() else {
                warn!(operation = %op.name, "operation has no queue-backed transport, not consumed");
                continue;
            };
            let raw = queue.subscribe(queue_name, config.handler.channel_capacity)?;
            let (tx, rx) = mpsc::channel(config.handler.channel_capacity);
            let op = Arc::new(op.clone());

            butler.spawn(Box::new(QueueWorker::new(Arc::clone(&op), raw, tx)));
            butler.spawn(Box::new(MessageHandler::new(
                op,
                rx,
                config.handler.buffer_size,
                pool.clone(),
            )));
            consumers += 1;
        }

        butler.spawn(Box::new(QueueRunner::new(queue)));
        butler.spawn(Box::new(health));

        controller.set_ready();
        info!(
            instance_id = config.instance_id,
            operations = consumers,
            health_port,
            "ledgerq ready"
        );

        Ok(Self {
            controller,
            uow,
            pool,
            butler,
            shutdown_timeout: config.shutdown_timeout(),
            health_port,
        })
    }

    #[must_use]
    pub fn controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.controller)
    }

    #[must_use]
    pub fn unit_of_work(&self) -> Arc<UnitOfWork> {
        Arc::clone(&self.uow)
    }

    #[must_use]
    pub fn health_port(&self) -> u16 {
        self.health_port
    }

    /// Waits for shutdown, then stops components in order: consumers and
    /// handlers (which save what they buffered), the save pool, and finally
    /// the drivers.
    pub async fn wait(self) -> ShutdownReport {
        let stragglers = self.butler.wait(self.shutdown_timeout).await;

        if tokio::time::timeout(self.shutdown_timeout, self.pool.stop())
            .await
            .is_err()
        {
            warn!(in_flight = self.pool.in_flight(), "save pool did not drain in time");
        }
        let drained = self.controller.wait_for_batches(Duration::ZERO).await;

        self.uow.close().await;
        info!(drained, stragglers = stragglers.len(), "ledgerq stopped");
        ShutdownReport { stragglers, drained }
    }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("health_port", &self.health_port)
            .field("state", &self.controller.health_state())
            .finish_non_exhaustive()
    }
}
