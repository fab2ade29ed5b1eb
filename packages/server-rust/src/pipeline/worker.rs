use std::sync::Arc;

use async_trait::async_trait;
use ledgerq_core::{Message, Operation, RawMessage};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::network::shutdown_signalled;
use crate::supervisor::Supervised;

/// Consumes raw messages of one queue, decodes them against the operation
/// and forwards the valid ones to the operation's handler.
///
/// Invalid messages are logged and dropped; there is no dead-letter path.
pub struct QueueWorker {
    operation: Arc<Operation>,
    rx: mpsc::Receiver<RawMessage>,
    tx: mpsc::Sender<Message>,
}

impl QueueWorker {
    #[must_use]
    pub fn new(operation: Arc<Operation>, rx: mpsc::Receiver<RawMessage>, tx: mpsc::Sender<Message>) -> Self {
        Self { operation, rx, tx }
    }

    /// Decodes one raw message. Returns `None` if it was dropped.
    #[must_use]
    pub fn decode(&self, raw: &RawMessage) -> Option<Message> {
        match self.operation.decode(raw) {
            Ok(message) => Some(message),
            Err(e) => {
                warn!(
                    operation = %self.operation.name,
                    request_id = ?raw.get(ledgerq_core::schema::REQUEST_ID_FIELD),
                    error = %e,
                    "invalid message dropped"
                );
                metrics::counter!("ledgerq_messages_dropped_total", "reason" => "validation").increment(1);
                None
            }
        }
    }
}

impl QueueWorker {
    /// Stops accepting deliveries and forwards what was already delivered.
    async fn forward_remaining(&mut self) {
        self.rx.close();
        while let Some(raw) = self.rx.recv().await {
            let Some(message) = self.decode(&raw) else { continue };
            if self.tx.send(message).await.is_err() {
                metrics::counter!("ledgerq_messages_dropped_total", "reason" => "stopped").increment(1);
            }
        }
    }
}

#[async_trait]
impl Supervised for QueueWorker {
    fn name(&self) -> String {
        format!("worker:{}", self.operation.name)
    }

    async fn run(mut self: Box<Self>, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        loop {
            tokio::select! {
                raw = self.rx.recv() => {
                    let Some(raw) = raw else { break };
                    let Some(message) = self.decode(&raw) else { continue };
                    if self.tx.send(message).await.is_err() {
                        warn!(operation = %self.operation.name, "handler is gone, stopping worker");
                        break;
                    }
                }
                () = shutdown_signalled(&mut shutdown) => {
                    self.forward_remaining().await;
                    break;
                }
            }
        }
        debug!(operation = %self.operation.name, "worker stopped");
        Ok(())
    }
}
