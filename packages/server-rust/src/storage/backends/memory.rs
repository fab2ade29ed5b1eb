//! In-process backend.
//!
//! Statements executed inside a transaction are staged and only appended to
//! the committed log on commit. Failures can be injected per stage, which is
//! how the unit-of-work compensation paths are tested.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ledgerq_core::Statement;
use parking_lot::Mutex;

use crate::storage::tx_driver::TxBackend;

/// Stage of the native transaction lifecycle a failure can be injected at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Begin,
    Exec,
    Commit,
    Rollback,
}

/// Counters describing what the backend has done so far.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub begun: u64,
    pub committed: u64,
    pub rolled_back: u64,
    pub discarded: u64,
    pub closed: bool,
}

#[derive(Debug, Default)]
struct State {
    committed: Vec<Statement>,
    stats: MemoryStats,
    failures: Vec<(Stage, usize)>,
    exec_fail_on: Option<String>,
    exec_delay: Option<Duration>,
    begin_delay: Option<Duration>,
}

impl State {
    fn take_failure(&mut self, stage: Stage) -> bool {
        let Some(slot) = self
            .failures
            .iter_mut()
            .find(|(s, remaining)| *s == stage && *remaining > 0)
        else {
            return false;
        };
        slot.1 -= 1;
        true
    }
}

/// Native transaction of a [`MemoryBackend`]: the statements staged so far.
#[derive(Debug, Default)]
pub struct MemoryTx {
    staged: Vec<Statement>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<State>>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `times` calls at `stage` fail.
    pub fn fail(&self, stage: Stage, times: usize) {
        self.state.lock().failures.push((stage, times));
    }

    /// Makes every exec whose SQL contains `pattern` fail.
    pub fn fail_exec_matching(&self, pattern: impl Into<String>) {
        self.state.lock().exec_fail_on = Some(pattern.into());
    }

    /// Delays every exec, used to exercise driver timeouts.
    pub fn set_exec_delay(&self, delay: Duration) {
        self.state.lock().exec_delay = Some(delay);
    }

    /// Delays every begin, used to overlap concurrent begins of one id.
    pub fn set_begin_delay(&self, delay: Duration) {
        self.state.lock().begin_delay = Some(delay);
    }

    /// Statements of every committed transaction, in commit order.
    #[must_use]
    pub fn committed(&self) -> Vec<Statement> {
        self.state.lock().committed.clone()
    }

    #[must_use]
    pub fn stats(&self) -> MemoryStats {
        self.state.lock().stats.clone()
    }
}

#[async_trait]
impl TxBackend for MemoryBackend {
    type Tx = MemoryTx;

    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn begin(&self) -> anyhow::Result<MemoryTx> {
        let delay = self.state.lock().begin_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        if state.take_failure(Stage::Begin) {
            anyhow::bail!("injected begin failure");
        }
        state.stats.begun += 1;
        Ok(MemoryTx::default())
    }

    async fn exec(&self, tx: &mut MemoryTx, statement: &Statement) -> anyhow::Result<u64> {
        let delay = self.state.lock().exec_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        if state.take_failure(Stage::Exec) {
            anyhow::bail!("injected exec failure");
        }
        if let Some(pattern) = &state.exec_fail_on {
            if statement.sql.contains(pattern.as_str()) {
                anyhow::bail!("injected exec failure on {pattern:?}");
            }
        }
        tx.staged.push(statement.clone());
        Ok(1)
    }

    async fn commit(&self, tx: &mut MemoryTx) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        if state.take_failure(Stage::Commit) {
            anyhow::bail!("injected commit failure");
        }
        state.committed.append(&mut tx.staged);
        state.stats.committed += 1;
        Ok(())
    }

    async fn rollback(&self, tx: &mut MemoryTx) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        if state.take_failure(Stage::Rollback) {
            anyhow::bail!("injected rollback failure");
        }
        tx.staged.clear();
        state.stats.rolled_back += 1;
        Ok(())
    }

    async fn discard(&self, tx: MemoryTx) {
        drop(tx);
        self.state.lock().stats.discarded += 1;
    }

    async fn close(&self) {
        self.state.lock().stats.closed = true;
    }
}
