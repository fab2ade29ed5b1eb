//! Supervision of long-running components.
//!
//! The [`Butler`] spawns every [`Supervised`] component on its own task and
//! waits for them at shutdown. A component that returns before shutdown was
//! requested, successfully or not, takes the whole process down with it.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::network::{shutdown_signalled, ShutdownController};

/// A long-running component.
#[async_trait]
pub trait Supervised: Send + 'static {
    /// Name used in logs and in the straggler report.
    fn name(&self) -> String;

    /// Runs until `shutdown` flips to `true` or the component has nothing
    /// left to do.
    async fn run(self: Box<Self>, shutdown: watch::Receiver<bool>) -> anyhow::Result<()>;
}

pub struct Butler {
    controller: Arc<ShutdownController>,
    tasks: JoinSet<()>,
    running: Arc<Mutex<BTreeSet<String>>>,
}

impl Butler {
    #[must_use]
    pub fn new(controller: Arc<ShutdownController>) -> Self {
        Self {
            controller,
            tasks: JoinSet::new(),
            running: Arc::new(Mutex::new(BTreeSet::new())),
        }
    }

    #[must_use]
    pub fn controller(&self) -> &Arc<ShutdownController> {
        &self.controller
    }

    pub fn spawn(&mut self, component: Box<dyn Supervised>) {
        let name = component.name();
        self.running.lock().insert(name.clone());

        let shutdown = self.controller.shutdown_receiver();
        let controller = Arc::clone(&self.controller);
        let running = Arc::clone(&self.running);

        self.tasks.spawn(async move {
            info!(component = %name, "component started");
            let result = component.run(shutdown).await;
            running.lock().remove(&name);

            match result {
                Ok(()) => info!(component = %name, "component stopped"),
                Err(e) => error!(component = %name, error = %e, "component failed"),
            }
            if !controller.is_shutting_down() {
                warn!(component = %name, "component exited before shutdown, stopping");
                controller.trigger_shutdown();
            }
        });
    }

    /// Names of components that have not returned yet, sorted.
    #[must_use]
    pub fn running(&self) -> Vec<String> {
        self.running.lock().iter().cloned().collect()
    }

    /// Waits for shutdown to be triggered, then up to `timeout` for every
    /// component to return. Components still running after that are aborted
    /// and returned.
    pub async fn wait(mut self, timeout: Duration) -> Vec<String> {
        let mut shutdown = self.controller.shutdown_receiver();
        shutdown_signalled(&mut shutdown).await;
        info!(components = self.tasks.len(), "shutdown requested, waiting for components");

        let joined = tokio::time::timeout(timeout, async {
            while let Some(result) = self.tasks.join_next().await {
                if let Err(e) = result {
                    if e.is_panic() {
                        error!(error = %e, "component panicked");
                    }
                }
            }
        })
        .await;

        if joined.is_ok() {
            return Vec::new();
        }

        let stragglers = self.running();
        warn!(components = ?stragglers, "components did not stop in time, aborting");
        self.tasks.abort_all();
        stragglers
    }
}

impl std::fmt::Debug for Butler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Butler")
            .field("running", &self.running())
            .finish_non_exhaustive()
    }
}
