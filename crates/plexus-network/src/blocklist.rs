//! Directional peer blocklist with asynchronous persistence.
//!
//! Entries are keyed by `(peer_id, direction)` and are never merged: an
//! explicit `inbound` entry stays even when an `all` entry for the same peer
//! already covers it, so removing the `all` entry later leaves the operator's
//! narrower intent in place.
//!
//! The in-memory map is authoritative. Every mutation is applied immediately
//! and then queued as a [`BlocklistWrite`] for the persistence worker.
//! Progress is published on a `watch` channel ([`StatusHandle`]); a failed
//! write is retried by the worker and never rolls back the in-memory state.

use std::collections::BTreeMap;
use std::sync::Arc;

use plexus_core::error::{BlocklistError, PersistenceError};
use plexus_core::types::{
    BlocklistEntry, BlocklistView, Direction, PeerId, PersistencePhase, PersistenceStatus, TimestampMs,
    TrafficDirection,
};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// A queued durable write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlocklistWrite {
    Upsert(BlocklistEntry),
    Remove { peer_id: PeerId, direction: Direction },
}

/// Shared publisher for [`PersistenceStatus`].
///
/// The store bumps `pending_writes` when it queues; the worker reports each
/// completion or failure through the same handle.
#[derive(Debug, Clone)]
pub struct StatusHandle {
    tx: Arc<watch::Sender<PersistenceStatus>>,
}

impl StatusHandle {
    fn new() -> Self {
        let (tx, _rx) = watch::channel(PersistenceStatus::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> watch::Receiver<PersistenceStatus> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> PersistenceStatus {
        self.tx.borrow().clone()
    }

    fn queued(&self) {
        self.tx.send_modify(|s| {
            s.pending_writes = s.pending_writes.saturating_add(1);
            if s.status != PersistencePhase::Error {
                s.status = PersistencePhase::Saving;
            }
        });
    }

    /// A queued write reached durable storage.
    pub fn write_succeeded(&self, now: TimestampMs) {
        self.tx.send_modify(|s| {
            s.pending_writes = s.pending_writes.saturating_sub(1);
            s.error = None;
            if s.pending_writes == 0 {
                s.status = PersistencePhase::Idle;
                s.last_synced_at = Some(now);
            } else {
                s.status = PersistencePhase::Saving;
            }
        });
    }

    /// A write attempt failed; it stays pending and will be retried.
    pub fn write_failed(&self, err: &PersistenceError) {
        self.tx.send_modify(|s| {
            s.status = PersistencePhase::Error;
            s.error = Some(err.to_string());
        });
    }

    /// A queued write can never be delivered (the worker is gone).
    pub fn write_dropped(&self, reason: &str) {
        self.tx.send_modify(|s| {
            s.pending_writes = s.pending_writes.saturating_sub(1);
            s.status = PersistencePhase::Error;
            s.error = Some(reason.to_string());
        });
    }

    /// The startup load finished. Writes queued while it ran keep the store saving.
    fn loaded(&self, now: TimestampMs) {
        self.tx.send_modify(|s| {
            s.error = None;
            if s.pending_writes > 0 {
                s.status = PersistencePhase::Saving;
            } else {
                s.status = PersistencePhase::Idle;
                s.last_synced_at = Some(now);
            }
        });
    }

    fn set_phase(&self, phase: PersistencePhase, error: Option<String>, synced: Option<TimestampMs>) {
        self.tx.send_modify(|s| {
            s.status = phase;
            s.error = error;
            if synced.is_some() {
                s.last_synced_at = synced;
            }
        });
    }
}

/// The blocklist. Wrap in a lock to share between transport callbacks.
pub struct BlocklistStore {
    entries: BTreeMap<(PeerId, Direction), BlocklistEntry>,
    writes: Option<mpsc::UnboundedSender<BlocklistWrite>>,
    status: StatusHandle,
}

impl BlocklistStore {
    /// A store with no durable backing. Mutations are never queued.
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            writes: None,
            status: StatusHandle::new(),
        }
    }

    /// A store that queues every mutation on `writes`.
    pub fn with_persistence(writes: mpsc::UnboundedSender<BlocklistWrite>) -> Self {
        Self {
            writes: Some(writes),
            ..Self::new()
        }
    }

    pub fn status_handle(&self) -> StatusHandle {
        self.status.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PersistenceStatus> {
        self.status.subscribe()
    }

    pub fn status(&self) -> PersistenceStatus {
        self.status.current()
    }

    /// Mark the start of the startup load.
    pub fn begin_load(&self) {
        self.status.set_phase(PersistencePhase::Loading, None, None);
    }

    /// Install entries read from durable storage. Loaded entries are not re-queued.
    pub fn finish_load(&mut self, loaded: Vec<BlocklistEntry>, now: TimestampMs) {
        let count = loaded.len();
        for entry in loaded {
            if entry.peer_id.is_empty() {
                warn!(?entry, "blocklist: skipping stored entry with empty peer id");
                continue;
            }
            self.entries.insert((entry.peer_id.clone(), entry.direction), entry);
        }
        self.status.loaded(now);
        info!(count, "blocklist: loaded entries");
    }

    /// The startup load failed; keep running with whatever is in memory.
    pub fn load_failed(&self, err: &PersistenceError) {
        warn!(%err, "blocklist: load failed");
        self.status.set_phase(PersistencePhase::Error, Some(err.to_string()), None);
    }

    /// Add or replace the entry for `(peer, direction)`.
    pub fn block(
        &mut self,
        peer: &PeerId,
        direction: Direction,
        reason: Option<String>,
        now: TimestampMs,
    ) -> Result<(), BlocklistError> {
        if peer.is_empty() {
            return Err(BlocklistError::EmptyPeerId);
        }
        let entry = BlocklistEntry {
            peer_id: peer.clone(),
            direction,
            reason,
            added_at: now,
        };
        let replaced = self
            .entries
            .insert((peer.clone(), direction), entry.clone())
            .is_some();
        info!(%peer, %direction, replaced, "blocklist: peer blocked");
        self.enqueue(BlocklistWrite::Upsert(entry));
        Ok(())
    }

    /// Remove the entry for `(peer, direction)`, or every entry for `peer`
    /// when `direction` is `None`. Returns how many entries were removed.
    pub fn unblock(&mut self, peer: &PeerId, direction: Option<Direction>) -> Result<usize, BlocklistError> {
        if peer.is_empty() {
            return Err(BlocklistError::EmptyPeerId);
        }
        let keys: Vec<(PeerId, Direction)> = match direction {
            Some(d) => vec![(peer.clone(), d)],
            None => self
                .entries
                .keys()
                .filter(|(p, _)| p == peer)
                .cloned()
                .collect(),
        };
        let mut removed = 0;
        for key in keys {
            if self.entries.remove(&key).is_some() {
                removed += 1;
                self.enqueue(BlocklistWrite::Remove {
                    peer_id: key.0,
                    direction: key.1,
                });
            }
        }
        if removed > 0 {
            info!(%peer, ?direction, removed, "blocklist: peer unblocked");
        } else {
            debug!(%peer, ?direction, "blocklist: unblock matched nothing");
        }
        Ok(removed)
    }

    /// `true` if an `all` entry or an entry for exactly `direction` exists.
    pub fn is_blocked(&self, peer: &PeerId, direction: TrafficDirection) -> bool {
        self.entries.contains_key(&(peer.clone(), Direction::All))
            || self.entries.contains_key(&(peer.clone(), direction.into()))
    }

    /// All entries, oldest first, ties broken by peer id then direction.
    pub fn entries(&self) -> Vec<BlocklistEntry> {
        let mut all: Vec<BlocklistEntry> = self.entries.values().cloned().collect();
        all.sort_by(|a, b| {
            a.added_at
                .cmp(&b.added_at)
                .then_with(|| a.peer_id.cmp(&b.peer_id))
                .then_with(|| a.direction.cmp(&b.direction))
        });
        all
    }

    /// Entries partitioned for display.
    pub fn list(&self) -> BlocklistView {
        partition(self.entries())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn enqueue(&self, write: BlocklistWrite) {
        let Some(tx) = &self.writes else {
            return;
        };
        self.status.queued();
        if tx.send(write).is_err() {
            warn!("blocklist: persistence worker stopped; write kept in memory only");
            self.status.write_dropped("persistence worker stopped");
        }
    }
}

impl Default for BlocklistStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Split entries into the display view. `all` keeps every entry; the
/// directional lists hold only entries with that exact direction.
pub fn partition(entries: Vec<BlocklistEntry>) -> BlocklistView {
    let inbound = entries
        .iter()
        .filter(|e| e.direction == Direction::Inbound)
        .cloned()
        .collect();
    let outbound = entries
        .iter()
        .filter(|e| e.direction == Direction::Outbound)
        .cloned()
        .collect();
    BlocklistView {
        all: entries,
        inbound,
        outbound,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(id: &str) -> PeerId {
        PeerId::new(id)
    }

    #[test]
    fn inbound_block_only_blocks_inbound() {
        let mut bl = BlocklistStore::new();
        bl.block(&p("x"), Direction::Inbound, None, 1).unwrap();
        assert!(bl.is_blocked(&p("x"), TrafficDirection::Inbound));
        assert!(!bl.is_blocked(&p("x"), TrafficDirection::Outbound));
    }

    #[test]
    fn all_block_blocks_both_directions() {
        let mut bl = BlocklistStore::new();
        bl.block(&p("x"), Direction::All, Some("abuse".into()), 1).unwrap();
        assert!(bl.is_blocked(&p("x"), TrafficDirection::Inbound));
        assert!(bl.is_blocked(&p("x"), TrafficDirection::Outbound));
    }

    #[test]
    fn explicit_entries_are_not_merged_into_all() {
        let mut bl = BlocklistStore::new();
        bl.block(&p("x"), Direction::All, None, 1).unwrap();
        bl.block(&p("x"), Direction::Inbound, None, 2).unwrap();
        assert_eq!(bl.len(), 2);

        bl.unblock(&p("x"), Some(Direction::All)).unwrap();
        assert!(bl.is_blocked(&p("x"), TrafficDirection::Inbound));
        assert!(!bl.is_blocked(&p("x"), TrafficDirection::Outbound));
    }

    #[test]
    fn block_same_key_upserts() {
        let mut bl = BlocklistStore::new();
        bl.block(&p("x"), Direction::Outbound, Some("first".into()), 1).unwrap();
        bl.block(&p("x"), Direction::Outbound, Some("second".into()), 5).unwrap();
        let entries = bl.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].reason.as_deref(), Some("second"));
        assert_eq!(entries[0].added_at, 5);
    }

    #[test]
    fn unblock_without_direction_removes_everything_for_peer() {
        let mut bl = BlocklistStore::new();
        bl.block(&p("x"), Direction::Inbound, None, 1).unwrap();
        bl.block(&p("x"), Direction::Outbound, None, 2).unwrap();
        bl.block(&p("y"), Direction::All, None, 3).unwrap();
        assert_eq!(bl.unblock(&p("x"), None).unwrap(), 2);
        assert_eq!(bl.len(), 1);
        assert!(bl.is_blocked(&p("y"), TrafficDirection::Inbound));
    }

    #[test]
    fn unblock_exact_direction_leaves_others() {
        let mut bl = BlocklistStore::new();
        bl.block(&p("x"), Direction::Inbound, None, 1).unwrap();
        bl.block(&p("x"), Direction::Outbound, None, 2).unwrap();
        assert_eq!(bl.unblock(&p("x"), Some(Direction::Inbound)).unwrap(), 1);
        assert!(!bl.is_blocked(&p("x"), TrafficDirection::Inbound));
        assert!(bl.is_blocked(&p("x"), TrafficDirection::Outbound));
        assert_eq!(bl.unblock(&p("x"), Some(Direction::All)).unwrap(), 0);
    }

    #[test]
    fn empty_peer_rejected() {
        let mut bl = BlocklistStore::new();
        assert_eq!(bl.block(&p(""), Direction::All, None, 1), Err(BlocklistError::EmptyPeerId));
        assert_eq!(bl.unblock(&p(" "), None), Err(BlocklistError::EmptyPeerId));
    }

    #[test]
    fn list_partitions_by_exact_direction() {
        let mut bl = BlocklistStore::new();
        bl.block(&p("a"), Direction::Inbound, None, 3).unwrap();
        bl.block(&p("b"), Direction::Outbound, None, 2).unwrap();
        bl.block(&p("c"), Direction::All, None, 1).unwrap();
        let view = bl.list();
        assert_eq!(view.all.len(), 3);
        assert_eq!(view.all[0].peer_id, p("c"), "oldest first");
        assert_eq!(view.inbound.len(), 1);
        assert_eq!(view.outbound.len(), 1);
        assert_eq!(view.inbound[0].peer_id, p("a"));
    }

    #[test]
    fn mutations_are_queued_for_persistence() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut bl = BlocklistStore::with_persistence(tx);
        bl.block(&p("a"), Direction::All, None, 1).unwrap();
        bl.unblock(&p("a"), None).unwrap();

        assert!(matches!(rx.try_recv().unwrap(), BlocklistWrite::Upsert(_)));
        assert_eq!(
            rx.try_recv().unwrap(),
            BlocklistWrite::Remove { peer_id: p("a"), direction: Direction::All }
        );
        let status = bl.status();
        assert_eq!(status.pending_writes, 2);
        assert_eq!(status.status, PersistencePhase::Saving);
    }

    #[test]
    fn status_returns_to_idle_when_writes_drain() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut bl = BlocklistStore::with_persistence(tx);
        let handle = bl.status_handle();
        let mut sub = bl.subscribe();

        bl.block(&p("a"), Direction::All, None, 1).unwrap();
        assert!(sub.has_changed().unwrap());
        handle.write_failed(&PersistenceError::Storage("disk full".into()));
        assert_eq!(bl.status().status, PersistencePhase::Error);
        assert_eq!(bl.status().pending_writes, 1);

        handle.write_succeeded(99);
        let status = sub.borrow_and_update().clone();
        assert_eq!(status.status, PersistencePhase::Idle);
        assert_eq!(status.pending_writes, 0);
        assert_eq!(status.last_synced_at, Some(99));
        assert_eq!(status.error, None);
    }

    #[test]
    fn failed_write_keeps_in_memory_state() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut bl = BlocklistStore::with_persistence(tx);
        bl.block(&p("a"), Direction::Inbound, None, 1).unwrap();
        bl.status_handle().write_failed(&PersistenceError::Unavailable);
        assert!(bl.is_blocked(&p("a"), TrafficDirection::Inbound));
    }

    #[test]
    fn closed_worker_marks_error_but_keeps_entry() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let mut bl = BlocklistStore::with_persistence(tx);
        bl.block(&p("a"), Direction::All, None, 1).unwrap();
        assert!(bl.is_blocked(&p("a"), TrafficDirection::Outbound));
        let status = bl.status();
        assert_eq!(status.status, PersistencePhase::Error);
        assert_eq!(status.pending_writes, 0);
    }

    #[test]
    fn load_installs_entries_without_queueing() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut bl = BlocklistStore::with_persistence(tx);
        bl.begin_load();
        assert_eq!(bl.status().status, PersistencePhase::Loading);
        bl.finish_load(
            vec![BlocklistEntry { peer_id: p("a"), direction: Direction::All, reason: None, added_at: 1 }],
            10,
        );
        assert!(bl.is_blocked(&p("a"), TrafficDirection::Inbound));
        assert!(rx.try_recv().is_err());
        assert_eq!(bl.status().last_synced_at, Some(10));
    }

    #[test]
    fn load_with_queued_writes_stays_saving() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut bl = BlocklistStore::with_persistence(tx);
        bl.begin_load();
        bl.block(&p("early"), Direction::Outbound, None, 2).unwrap();
        bl.finish_load(Vec::new(), 10);

        let status = bl.status();
        assert_eq!(status.status, PersistencePhase::Saving);
        assert_eq!(status.pending_writes, 1);
        assert_eq!(status.last_synced_at, None);

        bl.status_handle().write_succeeded(20);
        assert_eq!(bl.status().status, PersistencePhase::Idle);
        assert_eq!(bl.status().last_synced_at, Some(20));
    }
}
