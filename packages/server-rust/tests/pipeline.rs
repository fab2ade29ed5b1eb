//! End-to-end: memory queue -> workers -> handlers -> save pool -> unit of
//! work -> memory storages, then a clean shutdown.

use std::sync::Arc;
use std::time::Duration;

use ledgerq_core::{OperationCatalog, RawMessage, Value};
use ledgerq_server::queue::{MemoryQueue, QueueConnection};
use ledgerq_server::storage::backends::MemoryBackend;
use ledgerq_server::storage::{Driver, DriverInfo, TxDriver};
use ledgerq_server::{App, DriverRegistry, ServerConfig};
use uuid::Uuid;

const CONFIG: &str = r"
instance_id: 7
handler:
  buffer_size: 2
  channel_capacity: 16
  max_in_flight_batches: 4
shutdown_timeout_ms: 5000
health:
  host: 127.0.0.1
  port: 0
ledger:
  name: ledger
  kind: memory
storages:
  - name: main
    kind: memory
";

const CATALOG: &str = r"
operations:
  - name: create_note
    type: create
    storage: main
    table: notes
    fields:
      request_id: {type: uuid, required: true}
      note_id: {type: uuid, required: true}
      title: {type: string, required: true}
    request:
      type: rabbitmq
      rabbitmq:
        queue: notes.create
        message:
          operation: {type: string, required: true, value: create}
  - name: update_note
    type: update
    storage: main
    table: notes
    fields:
      request_id: {type: uuid, required: true}
      note_id: {type: uuid, required: true}
      title: {type: string, required: true}
    where_conditions:
      note_id: {type: uuid, required: true}
    request:
      type: rabbitmq
      rabbitmq:
        queue: notes.update
        message:
          operation: {type: string, required: true, value: update}
";

struct Harness {
    app: App,
    queue: Arc<MemoryQueue>,
    data: MemoryBackend,
    ledger: MemoryBackend,
}

fn memory_driver(name: &str, backend: &MemoryBackend) -> Arc<dyn Driver> {
    Arc::new(TxDriver::new(
        DriverInfo {
            name: name.into(),
            table: String::new(),
            kind: "memory",
            address: "memory".into(),
            insert_timeout: Duration::from_secs(1),
            read_timeout: Duration::from_secs(1),
        },
        backend.clone(),
    ))
}

async fn start(data: MemoryBackend) -> Harness {
    let config = ServerConfig::from_yaml_str(CONFIG).unwrap();
    let catalog = OperationCatalog::from_yaml_str(CATALOG).unwrap();
    let ledger = MemoryBackend::new();

    let storages = DriverRegistry::new();
    storages.insert(memory_driver("main", &data));

    let queue = Arc::new(MemoryQueue::new());
    let connection: Arc<dyn QueueConnection> = queue.clone();
    let app = App::start_with(
        &config,
        &catalog,
        connection,
        storages,
        memory_driver("ledger", &ledger),
    )
    .await
    .unwrap();

    Harness {
        app,
        queue,
        data,
        ledger,
    }
}

fn create(title: &str) -> RawMessage {
    let mut raw = RawMessage::new();
    raw.insert("operation".into(), Value::from("create"));
    raw.insert("request_id".into(), Value::String(Uuid::new_v4().to_string()));
    raw.insert("note_id".into(), Value::String(Uuid::new_v4().to_string()));
    raw.insert("title".into(), Value::from(title));
    raw
}

fn update(note_id: &str, title: &str) -> RawMessage {
    let mut raw = RawMessage::new();
    raw.insert("operation".into(), Value::from("update"));
    raw.insert("request_id".into(), Value::String(Uuid::new_v4().to_string()));
    raw.insert("note_id".into(), Value::from(note_id));
    raw.insert("title".into(), Value::from(title));
    raw
}

fn count(backend: &MemoryBackend, prefix: &str) -> usize {
    backend
        .committed()
        .iter()
        .filter(|s| s.sql.starts_with(prefix))
        .count()
}

fn statuses(ledger: &MemoryBackend) -> Vec<Value> {
    ledger
        .committed()
        .into_iter()
        .filter(|s| s.sql.starts_with("UPDATE transactions.transactions"))
        .map(|s| s.args[0].clone())
        .collect()
}

async fn eventually(what: &str, check: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn saves_published_messages_and_records_the_ledger() {
    let h = start(MemoryBackend::new()).await;

    for i in 0..5 {
        h.queue.publish("notes.create", create(&format!("note {i}"))).await.unwrap();
    }
    // Fails validation: missing title.
    let mut invalid = create("x");
    invalid.remove("title");
    h.queue.publish("notes.create", invalid).await.unwrap();

    let data = h.data.clone();
    eventually("five inserts", || count(&data, "INSERT INTO notes") == 5).await;

    let ledger = h.ledger.clone();
    let data_batches = usize::try_from(h.data.stats().committed).unwrap();
    eventually("ledger results", || statuses(&ledger).len() == data_batches).await;

    h.app.controller().trigger_shutdown();
    let report = h.app.wait().await;
    assert!(report.is_clean(), "{report:?}");

    assert!(statuses(&h.ledger).iter().all(|s| *s == Value::from("success")));
    assert_eq!(count(&h.ledger, "INSERT INTO transactions.requests"), 5);
    assert_eq!(h.data.stats().rolled_back, 0);
    assert!(h.data.stats().closed);
    assert!(h.ledger.stats().closed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_batch_is_rolled_back_and_marked_failed() {
    let data = MemoryBackend::new();
    data.fail_exec_matching("UPDATE notes");
    let h = start(data).await;

    h.queue
        .publish("notes.update", update("123e4567-e89b-12d3-a456-426614174000", "renamed"))
        .await
        .unwrap();

    let ledger = h.ledger.clone();
    eventually("failed status", || statuses(&ledger) == vec![Value::from("failed")]).await;

    h.app.controller().trigger_shutdown();
    let report = h.app.wait().await;
    assert!(report.is_clean(), "{report:?}");

    assert_eq!(count(&h.data, "UPDATE notes"), 0);
    assert_eq!(h.data.stats().rolled_back, 1);
    assert_eq!(count(&h.ledger, "INSERT INTO transactions.requests"), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn buffered_messages_are_saved_on_shutdown() {
    let h = start(MemoryBackend::new()).await;
    h.queue.publish("notes.create", create("last")).await.unwrap();

    h.app.controller().trigger_shutdown();
    let report = h.app.wait().await;
    assert!(report.is_clean(), "{report:?}");

    assert_eq!(count(&h.data, "INSERT INTO notes"), 1);
    assert_eq!(statuses(&h.ledger), vec![Value::from("success")]);
}
