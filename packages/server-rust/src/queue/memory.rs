use async_trait::async_trait;
use ledgerq_core::RawMessage;
use tokio::sync::{mpsc, watch};

use super::{QueueConnection, QueueError, Subscriptions};
use crate::network::shutdown_signalled;

/// In-process queue; messages are pushed with [`publish`](Self::publish).
#[derive(Debug, Default)]
pub struct MemoryQueue {
    subscriptions: Subscriptions,
}

impl MemoryQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    ///
    /// Returns an error if nobody subscribed to `queue` or the subscriber is
    /// gone.
    pub async fn publish(&self, queue: &str, message: RawMessage) -> Result<(), QueueError> {
        self.subscriptions.deliver(queue, message).await
    }
}

#[async_trait]
impl QueueConnection for MemoryQueue {
    fn name(&self) -> &str {
        "memory"
    }

    async fn connect(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn subscribe(&self, queue: &str, capacity: usize) -> Result<mpsc::Receiver<RawMessage>, QueueError> {
        self.subscriptions.subscribe(queue, capacity)
    }

    async fn run(&self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        shutdown_signalled(&mut shutdown).await;
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.subscriptions.close_all();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ledgerq_core::Value;

    use super::*;

    #[tokio::test]
    async fn publishes_to_subscriber() {
        let queue = MemoryQueue::new();
        let mut rx = queue.subscribe("notes", 4).unwrap();

        let mut raw = RawMessage::new();
        raw.insert("title".into(), Value::from("a"));
        queue.publish("notes", raw.clone()).await.unwrap();

        assert_eq!(rx.recv().await, Some(raw));
    }

    #[tokio::test]
    async fn rejects_unknown_and_duplicate_queues() {
        let queue = MemoryQueue::new();
        let _rx = queue.subscribe("notes", 4).unwrap();

        assert!(matches!(queue.subscribe("notes", 4), Err(QueueError::AlreadySubscribed { .. })));
        assert!(matches!(
            queue.publish("other", RawMessage::new()).await,
            Err(QueueError::UnknownQueue { .. })
        ));
    }

    #[tokio::test]
    async fn stop_closes_channels() {
        let queue = MemoryQueue::new();
        let mut rx = queue.subscribe("notes", 4).unwrap();
        queue.stop().await.unwrap();
        assert!(rx.recv().await.is_none());
    }
}
