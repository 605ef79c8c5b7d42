//! RocksDB-backed blocklist persistence.
//!
//! Implements [`BlocklistPersistence`] with one column family of entries keyed
//! by `peer_id ‖ 0x00 ‖ direction` and a metadata column family holding the
//! schema version. Values are bincode-encoded [`BlocklistEntry`] records.

use std::path::Path;

use async_trait::async_trait;
use rocksdb::{ColumnFamilyDescriptor, IteratorMode, Options, DB};
use tracing::{debug, info};

use plexus_core::error::PersistenceError;
use plexus_core::traits::BlocklistPersistence;
use plexus_core::types::{BlocklistEntry, Direction, PeerId};

// --- Column family names ---

const CF_BLOCKLIST: &str = "blocklist";
const CF_METADATA: &str = "metadata";

const ALL_CFS: &[&str] = &[CF_BLOCKLIST, CF_METADATA];

const META_SCHEMA_VERSION: &[u8] = b"schema_version";
const SCHEMA_VERSION: u32 = 1;

/// Durable blocklist storage.
pub struct RocksBlocklistStore {
    db: DB,
}

impl RocksBlocklistStore {
    /// Open or create the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&db_opts, path.as_ref(), cf_descriptors).map_err(storage_err)?;
        let store = Self { db };
        store.check_schema()?;
        info!(path = %path.as_ref().display(), "storage: blocklist database opened");
        Ok(store)
    }

    /// Flush memtables to disk.
    pub fn flush(&self) -> Result<(), PersistenceError> {
        self.db.flush().map_err(storage_err)
    }

    /// Read every stored entry. Undecodable records are an error.
    pub fn read_all(&self) -> Result<Vec<BlocklistEntry>, PersistenceError> {
        let cf = self.cf_handle(CF_BLOCKLIST)?;
        let mut entries = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, value) = item.map_err(storage_err)?;
            let (entry, _): (BlocklistEntry, usize) =
                bincode::decode_from_slice(&value, bincode::config::standard())
                    .map_err(|e| PersistenceError::Encoding(e.to_string()))?;
            entries.push(entry);
        }
        Ok(entries)
    }

    pub fn put(&self, entry: &BlocklistEntry) -> Result<(), PersistenceError> {
        let cf = self.cf_handle(CF_BLOCKLIST)?;
        let value = bincode::encode_to_vec(entry, bincode::config::standard())
            .map_err(|e| PersistenceError::Encoding(e.to_string()))?;
        self.db
            .put_cf(cf, entry_key(&entry.peer_id, entry.direction), value)
            .map_err(storage_err)?;
        debug!(peer = %entry.peer_id, direction = %entry.direction, "storage: entry written");
        Ok(())
    }

    pub fn delete(&self, peer: &PeerId, direction: Direction) -> Result<(), PersistenceError> {
        let cf = self.cf_handle(CF_BLOCKLIST)?;
        self.db.delete_cf(cf, entry_key(peer, direction)).map_err(storage_err)?;
        debug!(%peer, %direction, "storage: entry deleted");
        Ok(())
    }

    fn check_schema(&self) -> Result<(), PersistenceError> {
        let cf = self.cf_handle(CF_METADATA)?;
        match self.db.get_cf(cf, META_SCHEMA_VERSION).map_err(storage_err)? {
            Some(bytes) => {
                let raw: [u8; 4] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| PersistenceError::Encoding("invalid schema version length".into()))?;
                let found = u32::from_le_bytes(raw);
                if found != SCHEMA_VERSION {
                    return Err(PersistenceError::Storage(format!(
                        "unsupported schema version {found}, expected {SCHEMA_VERSION}"
                    )));
                }
                Ok(())
            }
            None => self
                .db
                .put_cf(cf, META_SCHEMA_VERSION, SCHEMA_VERSION.to_le_bytes())
                .map_err(storage_err),
        }
    }

    fn cf_handle(&self, name: &str) -> Result<&rocksdb::ColumnFamily, PersistenceError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| PersistenceError::Storage(format!("missing column family: {name}")))
    }
}

#[async_trait]
impl BlocklistPersistence for RocksBlocklistStore {
    async fn load(&self) -> Result<Vec<BlocklistEntry>, PersistenceError> {
        self.read_all()
    }

    async fn save(&self, entry: &BlocklistEntry) -> Result<(), PersistenceError> {
        self.put(entry)
    }

    async fn remove(&self, peer: &PeerId, direction: Direction) -> Result<(), PersistenceError> {
        self.delete(peer, direction)
    }
}

/// `peer_id ‖ 0x00 ‖ direction`. Peer ids never contain NUL on the wire.
fn entry_key(peer: &PeerId, direction: Direction) -> Vec<u8> {
    let tag = match direction {
        Direction::Inbound => b'i',
        Direction::Outbound => b'o',
        Direction::All => b'a',
    };
    let mut key = Vec::with_capacity(peer.as_str().len() + 2);
    key.extend_from_slice(peer.as_str().as_bytes());
    key.push(0);
    key.push(tag);
    key
}

fn storage_err(e: rocksdb::Error) -> PersistenceError {
    PersistenceError::Storage(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (RocksBlocklistStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = RocksBlocklistStore::open(dir.path().join("blocklist")).unwrap();
        (store, dir)
    }

    fn entry(peer: &str, direction: Direction, added_at: u64) -> BlocklistEntry {
        BlocklistEntry {
            peer_id: PeerId::new(peer),
            direction,
            reason: Some("test".into()),
            added_at,
        }
    }

    #[test]
    fn empty_store_reads_nothing() {
        let (store, _dir) = temp_store();
        assert!(store.read_all().unwrap().is_empty());
    }

    #[test]
    fn put_then_read() {
        let (store, _dir) = temp_store();
        store.put(&entry("a", Direction::Inbound, 1)).unwrap();
        store.put(&entry("a", Direction::All, 2)).unwrap();
        let mut all = store.read_all().unwrap();
        all.sort_by_key(|e| e.added_at);
        assert_eq!(all, vec![entry("a", Direction::Inbound, 1), entry("a", Direction::All, 2)]);
    }

    #[test]
    fn put_same_key_overwrites() {
        let (store, _dir) = temp_store();
        store.put(&entry("a", Direction::Outbound, 1)).unwrap();
        store.put(&entry("a", Direction::Outbound, 9)).unwrap();
        let all = store.read_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].added_at, 9);
    }

    #[test]
    fn delete_removes_only_that_direction() {
        let (store, _dir) = temp_store();
        store.put(&entry("a", Direction::Inbound, 1)).unwrap();
        store.put(&entry("a", Direction::Outbound, 2)).unwrap();
        store.delete(&PeerId::new("a"), Direction::Inbound).unwrap();
        let all = store.read_all().unwrap();
        assert_eq!(all, vec![entry("a", Direction::Outbound, 2)]);
        // Deleting a missing key is fine.
        store.delete(&PeerId::new("zzz"), Direction::All).unwrap();
    }

    #[test]
    fn persistence_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blocklist");
        {
            let store = RocksBlocklistStore::open(&path).unwrap();
            store.put(&entry("p", Direction::All, 3)).unwrap();
            store.flush().unwrap();
        }
        let store = RocksBlocklistStore::open(&path).unwrap();
        assert_eq!(store.read_all().unwrap(), vec![entry("p", Direction::All, 3)]);
    }

    #[tokio::test]
    async fn trait_round_trip() {
        let (store, _dir) = temp_store();
        let e = entry("t", Direction::Inbound, 4);
        store.save(&e).await.unwrap();
        assert_eq!(store.load().await.unwrap(), vec![e.clone()]);
        store.remove(&e.peer_id, e.direction).await.unwrap();
        assert!(store.load().await.unwrap().is_empty());
    }

    #[test]
    fn keys_distinguish_prefix_peers() {
        assert_ne!(entry_key(&PeerId::new("ab"), Direction::All), entry_key(&PeerId::new("a"), Direction::All));
        assert_ne!(entry_key(&PeerId::new("a"), Direction::Inbound), entry_key(&PeerId::new("a"), Direction::All));
    }
}
