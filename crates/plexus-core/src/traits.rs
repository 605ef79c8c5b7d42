//! Trait interfaces between crates.
//!
//! - [`BlocklistPersistence`]: durable key-value storage for blocklist
//!   entries (plexus-node implements it over RocksDB, [`crate::memory`]
//!   provides an in-memory version for tests).

use async_trait::async_trait;

use crate::error::PersistenceError;
use crate::types::{BlocklistEntry, Direction, PeerId};

/// Durable storage for blocklist entries, keyed by `(peer_id, direction)`.
///
/// Loaded once at startup; after that the control plane only writes. Writes
/// happen off the caller's path on the persistence worker, so implementations
/// may block briefly.
#[async_trait]
pub trait BlocklistPersistence: Send + Sync {
    /// Load every stored entry.
    async fn load(&self) -> Result<Vec<BlocklistEntry>, PersistenceError>;

    /// Insert or replace the entry for `(entry.peer_id, entry.direction)`.
    async fn save(&self, entry: &BlocklistEntry) -> Result<(), PersistenceError>;

    /// Delete the entry for `(peer_id, direction)`. Deleting a missing key is not an error.
    async fn remove(&self, peer_id: &PeerId, direction: Direction) -> Result<(), PersistenceError>;
}
