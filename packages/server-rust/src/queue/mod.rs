//! Queue connections: where raw messages come from.
//!
//! A [`QueueConnection`] delivers already-decoded key/value messages on one
//! channel per subscribed queue. Transport details (framing, acks, topology)
//! stay behind the trait.

mod lines;
mod memory;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use ledgerq_core::RawMessage;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use crate::supervisor::Supervised;

pub use lines::{Envelope, LinesQueue};
pub use memory::MemoryQueue;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue {queue} already has a subscriber")]
    AlreadySubscribed { queue: String },
    #[error("no subscriber for queue {queue}")]
    UnknownQueue { queue: String },
    #[error("subscriber of queue {queue} is gone")]
    Closed { queue: String },
}

#[async_trait]
pub trait QueueConnection: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn connect(&self) -> anyhow::Result<()>;

    /// Channel of messages published to `queue`. One subscriber per queue.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::AlreadySubscribed`] for a second subscription.
    fn subscribe(&self, queue: &str, capacity: usize) -> Result<mpsc::Receiver<RawMessage>, QueueError>;

    /// Delivers messages until `shutdown` or the source is exhausted.
    async fn run(&self, shutdown: watch::Receiver<bool>) -> anyhow::Result<()>;

    /// Closes every subscription channel.
    async fn stop(&self) -> anyhow::Result<()>;
}

/// Subscription channels by queue name.
#[derive(Debug, Default)]
pub(crate) struct Subscriptions {
    senders: Mutex<HashMap<String, mpsc::Sender<RawMessage>>>,
}

impl Subscriptions {
    pub(crate) fn subscribe(&self, queue: &str, capacity: usize) -> Result<mpsc::Receiver<RawMessage>, QueueError> {
        let mut senders = self.senders.lock();
        if senders.contains_key(queue) {
            return Err(QueueError::AlreadySubscribed {
                queue: queue.to_string(),
            });
        }
        let (tx, rx) = mpsc::channel(capacity.max(1));
        senders.insert(queue.to_string(), tx);
        Ok(rx)
    }

    pub(crate) async fn deliver(&self, queue: &str, message: RawMessage) -> Result<(), QueueError> {
        let sender = self
            .senders
            .lock()
            .get(queue)
            .cloned()
            .ok_or_else(|| QueueError::UnknownQueue {
                queue: queue.to_string(),
            })?;
        sender.send(message).await.map_err(|_| QueueError::Closed {
            queue: queue.to_string(),
        })
    }

    pub(crate) fn close_all(&self) {
        self.senders.lock().clear();
    }
}

/// Runs a [`QueueConnection`] under the supervisor and stops it afterwards.
pub struct QueueRunner {
    connection: Arc<dyn QueueConnection>,
}

impl QueueRunner {
    #[must_use]
    pub fn new(connection: Arc<dyn QueueConnection>) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl Supervised for QueueRunner {
    fn name(&self) -> String {
        format!("queue:{}", self.connection.name())
    }

    async fn run(self: Box<Self>, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let result = self.connection.run(shutdown).await;
        self.connection.stop().await?;
        result
    }
}
