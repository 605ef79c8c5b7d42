//! In-memory [`BlocklistPersistence`] implementation.
//!
//! Used by tests and by nodes started without a data directory. Supports
//! injecting a number of failing writes so retry behaviour can be exercised.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::PersistenceError;
use crate::traits::BlocklistPersistence;
use crate::types::{BlocklistEntry, Direction, PeerId};

#[derive(Default)]
struct Inner {
    entries: BTreeMap<(PeerId, Direction), BlocklistEntry>,
    fail_next: usize,
    fail_load: bool,
    write_count: u64,
}

/// Blocklist storage backed by a `BTreeMap`.
#[derive(Default)]
pub struct MemoryBlocklistStore {
    inner: Mutex<Inner>,
}

impl MemoryBlocklistStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate the store, as if entries had been written by a previous run.
    pub fn with_entries(entries: impl IntoIterator<Item = BlocklistEntry>) -> Self {
        let store = Self::new();
        {
            let mut inner = store.inner.lock();
            for e in entries {
                inner.entries.insert((e.peer_id.clone(), e.direction), e);
            }
        }
        store
    }

    /// Make the next `n` writes fail with a storage error.
    pub fn fail_next_writes(&self, n: usize) {
        self.inner.lock().fail_next = n;
    }

    /// Make every subsequent `load` fail.
    pub fn fail_loads(&self, fail: bool) {
        self.inner.lock().fail_load = fail;
    }

    /// Current stored entries, ordered by key.
    pub fn entries(&self) -> Vec<BlocklistEntry> {
        self.inner.lock().entries.values().cloned().collect()
    }

    /// Number of successful writes (saves and removes).
    pub fn write_count(&self) -> u64 {
        self.inner.lock().write_count
    }

    fn take_failure(inner: &mut Inner) -> Result<(), PersistenceError> {
        if inner.fail_next > 0 {
            inner.fail_next -= 1;
            debug!(remaining = inner.fail_next, "memory_store: injected write failure");
            return Err(PersistenceError::Storage("injected failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl BlocklistPersistence for MemoryBlocklistStore {
    async fn load(&self) -> Result<Vec<BlocklistEntry>, PersistenceError> {
        let inner = self.inner.lock();
        if inner.fail_load {
            return Err(PersistenceError::Unavailable);
        }
        Ok(inner.entries.values().cloned().collect())
    }

    async fn save(&self, entry: &BlocklistEntry) -> Result<(), PersistenceError> {
        let mut inner = self.inner.lock();
        Self::take_failure(&mut inner)?;
        inner
            .entries
            .insert((entry.peer_id.clone(), entry.direction), entry.clone());
        inner.write_count += 1;
        Ok(())
    }

    async fn remove(&self, peer_id: &PeerId, direction: Direction) -> Result<(), PersistenceError> {
        let mut inner = self.inner.lock();
        Self::take_failure(&mut inner)?;
        inner.entries.remove(&(peer_id.clone(), direction));
        inner.write_count += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(peer: &str, direction: Direction) -> BlocklistEntry {
        BlocklistEntry {
            peer_id: PeerId::new(peer),
            direction,
            reason: None,
            added_at: 1,
        }
    }

    #[tokio::test]
    async fn save_then_load() {
        let store = MemoryBlocklistStore::new();
        store.save(&entry("a", Direction::Inbound)).await.unwrap();
        store.save(&entry("a", Direction::All)).await.unwrap();
        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.len(), 2);
    }

    #[tokio::test]
    async fn save_replaces_same_key() {
        let store = MemoryBlocklistStore::new();
        store.save(&entry("a", Direction::Inbound)).await.unwrap();
        let mut updated = entry("a", Direction::Inbound);
        updated.reason = Some("again".into());
        store.save(&updated).await.unwrap();
        assert_eq!(store.entries(), vec![updated]);
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let store = MemoryBlocklistStore::new();
        store.fail_next_writes(2);
        assert!(store.save(&entry("a", Direction::All)).await.is_err());
        assert!(store.save(&entry("a", Direction::All)).await.is_err());
        assert!(store.save(&entry("a", Direction::All)).await.is_ok());
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn remove_missing_key_is_ok() {
        let store = MemoryBlocklistStore::new();
        store.remove(&PeerId::new("nobody"), Direction::Outbound).await.unwrap();
    }

    #[tokio::test]
    async fn failing_load_reports_unavailable() {
        let store = MemoryBlocklistStore::with_entries([entry("a", Direction::All)]);
        store.fail_loads(true);
        assert_eq!(store.load().await, Err(PersistenceError::Unavailable));
    }
}
