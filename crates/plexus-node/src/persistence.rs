//! Background writer for blocklist mutations.
//!
//! The blocklist applies every change in memory first and queues a
//! [`BlocklistWrite`]. This worker drains the queue in order and applies each
//! write to the durable backend, retrying failures with jittered exponential
//! backoff until they succeed. A later write is never applied before an
//! earlier one. Progress is reported through the blocklist's
//! [`StatusHandle`]; memory is never rolled back.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use plexus_core::constants::{PERSIST_RETRY_BASE_MS, PERSIST_RETRY_MAX_MS};
use plexus_core::error::PersistenceError;
use plexus_core::traits::BlocklistPersistence;
use plexus_network::{BlocklistWrite, StatusHandle};

use crate::node::now_ms;

/// Retry delays for failed writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_ms: u64,
    pub max_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_ms: PERSIST_RETRY_BASE_MS,
            max_ms: PERSIST_RETRY_MAX_MS,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based), before jitter.
    pub fn delay_ms(&self, attempt: u32) -> u64 {
        let shift = attempt.saturating_sub(1).min(63);
        self.base_ms
            .saturating_mul(1u64.checked_shl(shift).unwrap_or(u64::MAX))
            .min(self.max_ms)
    }

    /// Delay with up to 25% random jitter added, still capped at `max_ms`.
    fn jittered(&self, attempt: u32) -> Duration {
        let delay = self.delay_ms(attempt);
        let jitter = if delay >= 4 { rand::thread_rng().gen_range(0..=delay / 4) } else { 0 };
        Duration::from_millis(delay.saturating_add(jitter).min(self.max_ms))
    }
}

pub struct PersistenceWorker {
    backend: Arc<dyn BlocklistPersistence>,
    rx: mpsc::UnboundedReceiver<BlocklistWrite>,
    status: StatusHandle,
    retry: RetryPolicy,
}

impl PersistenceWorker {
    pub fn new(
        backend: Arc<dyn BlocklistPersistence>,
        rx: mpsc::UnboundedReceiver<BlocklistWrite>,
        status: StatusHandle,
        retry: RetryPolicy,
    ) -> Self {
        Self { backend, rx, status, retry }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Drain writes until every sender is dropped.
    pub async fn run(mut self) {
        info!("persistence: worker started");
        while let Some(write) = self.rx.recv().await {
            self.apply_with_retry(&write).await;
        }
        info!("persistence: queue closed; worker stopped");
    }

    async fn apply_with_retry(&self, write: &BlocklistWrite) {
        let mut attempt: u32 = 0;
        loop {
            match apply(self.backend.as_ref(), write).await {
                Ok(()) => {
                    self.status.write_succeeded(now_ms());
                    if attempt > 0 {
                        info!(attempts = attempt + 1, "persistence: write succeeded after retry");
                    } else {
                        debug!(?write, "persistence: write applied");
                    }
                    return;
                }
                Err(err) => {
                    attempt = attempt.saturating_add(1);
                    self.status.write_failed(&err);
                    let delay = self.retry.jittered(attempt);
                    warn!(%err, attempt, delay_ms = delay.as_millis() as u64, "persistence: write failed; retrying");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

async fn apply(backend: &dyn BlocklistPersistence, write: &BlocklistWrite) -> Result<(), PersistenceError> {
    match write {
        BlocklistWrite::Upsert(entry) => backend.save(entry).await,
        BlocklistWrite::Remove { peer_id, direction } => backend.remove(peer_id, *direction).await,
    }
}
