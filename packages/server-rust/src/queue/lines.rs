//! Newline-delimited JSON source, one envelope per line:
//!
//! ```text
//! {"queue": "notes.create", "message": {"operation": "create", "request_id": "…", …}}
//! ```

use async_trait::async_trait;
use ledgerq_core::message::raw_from_json;
use ledgerq_core::RawMessage;
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Stdin};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use super::{QueueConnection, QueueError, Subscriptions};
use crate::network::shutdown_signalled;

#[derive(Debug, Deserialize)]
pub struct Envelope {
    pub queue: String,
    pub message: serde_json::Value,
}

pub struct LinesQueue<R> {
    name: String,
    reader: Mutex<Option<R>>,
    subscriptions: Subscriptions,
}

impl LinesQueue<BufReader<Stdin>> {
    #[must_use]
    pub fn stdin() -> Self {
        Self::new("stdin", BufReader::new(tokio::io::stdin()))
    }
}

impl<R> LinesQueue<R>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    #[must_use]
    pub fn new(name: impl Into<String>, reader: R) -> Self {
        Self {
            name: name.into(),
            reader: Mutex::new(Some(reader)),
            subscriptions: Subscriptions::default(),
        }
    }

    async fn route(&self, line: &str) {
        let envelope: Envelope = match serde_json::from_str(line) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(source = %self.name, error = %e, "undecodable line dropped");
                metrics::counter!("ledgerq_messages_dropped_total", "reason" => "decode").increment(1);
                return;
            }
        };
        let Some(raw) = raw_from_json(envelope.message) else {
            warn!(source = %self.name, queue = %envelope.queue, "message is not an object, dropped");
            metrics::counter!("ledgerq_messages_dropped_total", "reason" => "decode").increment(1);
            return;
        };
        if let Err(e) = self.subscriptions.deliver(&envelope.queue, raw).await {
            warn!(source = %self.name, error = %e, "message dropped");
            metrics::counter!("ledgerq_messages_dropped_total", "reason" => "unroutable").increment(1);
        }
    }
}

#[async_trait]
impl<R> QueueConnection for LinesQueue<R>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> anyhow::Result<()> {
        if self.reader.lock().is_none() {
            anyhow::bail!("{} was already consumed", self.name);
        }
        Ok(())
    }

    fn subscribe(&self, queue: &str, capacity: usize) -> Result<mpsc::Receiver<RawMessage>, QueueError> {
        self.subscriptions.subscribe(queue, capacity)
    }

    async fn run(&self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let Some(reader) = self.reader.lock().take() else {
            anyhow::bail!("{} was already consumed", self.name);
        };
        let mut lines = reader.lines();

        loop {
            tokio::select! {
                line = lines.next_line() => match line? {
                    Some(line) if line.trim().is_empty() => {}
                    Some(line) => self.route(&line).await,
                    None => {
                        info!(source = %self.name, "end of input");
                        break;
                    }
                },
                () = shutdown_signalled(&mut shutdown) => break,
            }
        }
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.subscriptions.close_all();
        Ok(())
    }
}

impl<R> std::fmt::Debug for LinesQueue<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinesQueue").field("name", &self.name).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use ledgerq_core::Value;

    use super::*;

    #[tokio::test]
    async fn routes_lines_to_subscribers() {
        let input = concat!(
            "{\"queue\": \"notes\", \"message\": {\"title\": \"a\"}}\n",
            "\n",
            "not json\n",
            "{\"queue\": \"unknown\", \"message\": {\"title\": \"b\"}}\n",
            "{\"queue\": \"notes\", \"message\": [1, 2]}\n",
            "{\"queue\": \"notes\", \"message\": {\"title\": \"c\"}}\n",
        );
        let queue = LinesQueue::new("test", input.as_bytes());
        let mut rx = queue.subscribe("notes", 8).unwrap();
        queue.connect().await.unwrap();

        let (_stop_tx, stop_rx) = watch::channel(false);
        queue.run(stop_rx).await.unwrap();
        queue.stop().await.unwrap();

        let titles: Vec<Value> = std::iter::from_fn(|| rx.try_recv().ok())
            .filter_map(|raw| raw.get("title").cloned())
            .collect();
        assert_eq!(titles, vec![Value::from("a"), Value::from("c")]);
    }

    #[tokio::test]
    async fn input_can_only_be_consumed_once() {
        let queue = LinesQueue::new("test", "".as_bytes());
        let (_stop_tx, stop_rx) = watch::channel(false);
        queue.run(stop_rx.clone()).await.unwrap();
        assert!(queue.connect().await.is_err());
        assert!(queue.run(stop_rx).await.is_err());
    }
}
