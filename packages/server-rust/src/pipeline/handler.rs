use std::sync::Arc;

use async_trait::async_trait;
use ledgerq_core::{Message, Operation};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info};

use super::buffer::{Buffer, BufferFull};
use super::pool::SavePool;
use crate::network::shutdown_signalled;
use crate::supervisor::Supervised;

/// Buffers decoded messages of one operation and hands batches to the
/// [`SavePool`].
///
/// A batch is due when the buffer is full or the upstream channel is
/// momentarily empty. Batches are saved concurrently, so there is no
/// ordering between batches, not even for the same entity.
pub struct MessageHandler {
    operation: Arc<Operation>,
    rx: mpsc::Receiver<Message>,
    buffer: Buffer<Message>,
    pool: SavePool,
}

impl MessageHandler {
    #[must_use]
    pub fn new(
        operation: Arc<Operation>,
        rx: mpsc::Receiver<Message>,
        buffer_size: usize,
        pool: SavePool,
    ) -> Self {
        Self {
            operation,
            rx,
            buffer: Buffer::new(buffer_size.max(1)),
            pool,
        }
    }

    /// Adds `message` and dispatches the buffer if it is now full or
    /// `should_save` is set.
    pub async fn handle(&mut self, message: Message, should_save: bool) {
        if self.buffer.is_full() {
            self.dispatch().await;
        }
        if let Err(BufferFull(message)) = self.buffer.add(message) {
            error!(operation = %self.operation.name, request_id = %message.request_id, "buffer is full, dropping message");
            metrics::counter!("ledgerq_messages_dropped_total", "reason" => "buffer_full").increment(1);
        }
        if self.buffer.is_full() || should_save {
            self.dispatch().await;
        }
    }

    async fn dispatch(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let batch = self.buffer.take();
        let size = batch.len();
        if let Err(e) = self.pool.submit(Arc::clone(&self.operation), batch).await {
            error!(operation = %self.operation.name, error = %e, "batch not saved");
            metrics::counter!("ledgerq_messages_dropped_total", "reason" => "stopped")
                .increment(u64::try_from(size).unwrap_or(u64::MAX));
        }
    }

    /// Messages waiting in the buffer.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

#[async_trait]
impl Supervised for MessageHandler {
    fn name(&self) -> String {
        format!("handler:{}", self.operation.name)
    }

    async fn run(mut self: Box<Self>, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        loop {
            tokio::select! {
                message = self.rx.recv() => match message {
                    Some(message) => {
                        let should_save = self.rx.is_empty();
                        self.handle(message, should_save).await;
                    }
                    None => break,
                },
                () = shutdown_signalled(&mut shutdown) => break,
            }
        }

        // The worker forwards what it still holds and then drops its
        // sender, which ends this drain.
        let mut drained = 0usize;
        while let Some(message) = self.rx.recv().await {
            drained += 1;
            self.handle(message, false).await;
        }
        self.dispatch().await;
        if drained > 0 {
            info!(operation = %self.operation.name, drained, "queued messages saved at shutdown");
        }
        debug!(operation = %self.operation.name, "handler stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::time::Duration;

    use ledgerq_core::{OperationCatalog, Value};
    use uuid::Uuid;

    use super::*;
    use crate::ledger::LedgerDriver;
    use crate::network::ShutdownController;
    use crate::storage::backends::MemoryBackend;
    use crate::storage::{Driver, DriverInfo, DriverRegistry, TxDriver};
    use crate::uow::UnitOfWork;

    fn driver(name: &str, backend: &MemoryBackend) -> Arc<dyn Driver> {
        Arc::new(TxDriver::new(
            DriverInfo {
                name: name.into(),
                table: String::new(),
                kind: "memory",
                address: "memory".into(),
                insert_timeout: Duration::from_secs(5),
                read_timeout: Duration::from_secs(5),
            },
            backend.clone(),
        ))
    }

    fn operation() -> Arc<Operation> {
        let catalog = OperationCatalog::from_yaml_str(
            r"
operations:
  - name: create_note
    type: create
    storage: main
    table: notes
    fields:
      request_id: {type: uuid, required: true}
      title: {type: string, required: true}
    request:
      type: rabbitmq
      rabbitmq:
        queue: notes.create
        message:
          operation: {type: string, required: true, value: create}
",
        )
        .unwrap();
        Arc::new(catalog.get("create_note").unwrap().clone())
    }

    fn message(op: &Operation, title: &str) -> Message {
        let mut raw = BTreeMap::new();
        raw.insert("operation".to_string(), Value::from("create"));
        raw.insert("request_id".to_string(), Value::String(Uuid::new_v4().to_string()));
        raw.insert("title".to_string(), Value::from(title));
        op.decode(&raw).unwrap()
    }

    fn setup(buffer_size: usize) -> (MessageHandler, mpsc::Sender<Message>, SavePool, MemoryBackend, MemoryBackend) {
        let data = MemoryBackend::new();
        let ledger = MemoryBackend::new();
        let registry = DriverRegistry::new();
        registry.insert(driver("main", &data));
        let uow = UnitOfWork::new(LedgerDriver::new(driver("ledger", &ledger), 1), Arc::new(registry));
        let pool = SavePool::new(Arc::new(uow), 4, Arc::new(ShutdownController::new()));
        let (tx, rx) = mpsc::channel(16);
        let handler = MessageHandler::new(operation(), rx, buffer_size, pool.clone());
        (handler, tx, pool, data, ledger)
    }

    fn transactions(ledger: &MemoryBackend) -> usize {
        ledger
            .committed()
            .iter()
            .filter(|s| s.sql.starts_with("INSERT INTO transactions.transactions"))
            .count()
    }

    #[tokio::test]
    async fn full_buffer_dispatches_one_batch() {
        let (mut handler, _tx, pool, data, ledger) = setup(3);
        let op = operation();

        handler.handle(message(&op, "a"), false).await;
        handler.handle(message(&op, "b"), false).await;
        assert_eq!(handler.pending(), 2);
        handler.handle(message(&op, "c"), false).await;
        assert_eq!(handler.pending(), 0);

        pool.stop().await;
        assert_eq!(data.committed().len(), 3);
        assert_eq!(transactions(&ledger), 1);
    }

    #[tokio::test]
    async fn drained_queue_dispatches_partial_batch() {
        let (mut handler, _tx, pool, data, ledger) = setup(10);
        let op = operation();

        handler.handle(message(&op, "a"), true).await;
        handler.handle(message(&op, "b"), true).await;
        assert_eq!(handler.pending(), 0);

        pool.stop().await;
        assert_eq!(data.committed().len(), 2);
        assert_eq!(transactions(&ledger), 2);
    }

    #[tokio::test]
    async fn shutdown_flushes_queued_messages() {
        let (handler, tx, pool, data, _ledger) = setup(10);
        let op = operation();
        for title in ["a", "b", "c"] {
            tx.send(message(&op, title)).await.unwrap();
        }

        let (_stop_tx, stop_rx) = watch::channel(true);
        let run = tokio::spawn(Box::new(handler).run(stop_rx));
        tokio::task::yield_now().await;
        tx.send(message(&op, "d")).await.unwrap();
        drop(tx);
        run.await.unwrap().unwrap();

        pool.stop().await;
        assert_eq!(data.committed().len(), 4);
    }

    #[tokio::test]
    async fn closed_channel_ends_the_loop() {
        let (handler, tx, pool, data, _ledger) = setup(10);
        let op = operation();
        tx.send(message(&op, "a")).await.unwrap();
        drop(tx);

        let (_stop_tx, stop_rx) = watch::channel(false);
        Box::new(handler).run(stop_rx).await.unwrap();

        pool.stop().await;
        assert_eq!(data.committed().len(), 1);
    }
}
