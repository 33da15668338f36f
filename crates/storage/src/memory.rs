//! MemoryStore: ordered in-memory KvStore with copy-on-write snapshots
//!
//! # Design Notes
//!
//! - **Ordered**: `BTreeMap<Vec<u8>, Vec<u8>>` gives prefix and range scans
//! - **Snapshots are `Arc` clones**: taking a view is O(1); the next write
//!   clones the map only while a view is still alive (`Arc::make_mut`)
//! - **Atomic batches**: a batch is applied under one write lock, so readers
//!   see all of it or none of it
//! - **Backup format**: 8-byte magic followed by a MessagePack entry list

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use cellar_core::{BatchOp, Error, KvStore, Result, SnapshotView};

const BACKUP_MAGIC: &[u8; 8] = b"CELLAR01";

type Map = BTreeMap<Vec<u8>, Vec<u8>>;

/// In-memory ordered key-value store
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<Arc<Map>>,
}

impl MemoryStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently stored
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Whether the store holds no keys
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

impl KvStore for MemoryStore {
    fn update(&self, batch: Vec<BatchOp>) -> Result<()> {
        let mut guard = self.data.write();
        let map = Arc::make_mut(&mut *guard);
        for op in batch {
            match op {
                BatchOp::Put { key, value } => {
                    map.insert(key, value);
                }
                BatchOp::Delete { key } => {
                    map.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn view(&self) -> Arc<dyn SnapshotView> {
        Arc::new(MemorySnapshot {
            data: Arc::clone(&*self.data.read()),
        })
    }

    fn backup(&self, writer: &mut dyn Write) -> Result<()> {
        let data = Arc::clone(&*self.data.read());
        let entries: Vec<(&Vec<u8>, &Vec<u8>)> = data.iter().collect();
        let body = rmp_serde::to_vec(&entries)?;
        writer.write_all(BACKUP_MAGIC)?;
        writer.write_all(&body)?;
        writer.flush()?;
        debug!(entries = entries.len(), bytes = body.len(), "Store backup written");
        Ok(())
    }

    fn load(&self, reader: &mut dyn Read) -> Result<()> {
        let mut raw = Vec::new();
        reader.read_to_end(&mut raw)?;
        let body = raw
            .strip_prefix(BACKUP_MAGIC.as_slice())
            .ok_or_else(|| Error::Corruption("backup magic mismatch".to_string()))?;
        let entries: Vec<(Vec<u8>, Vec<u8>)> = rmp_serde::from_slice(body)?;
        let count = entries.len();
        *self.data.write() = Arc::new(entries.into_iter().collect());
        debug!(entries = count, "Store loaded from backup");
        Ok(())
    }
}

/// Point-in-time view of a [`MemoryStore`]
#[derive(Debug, Clone)]
pub struct MemorySnapshot {
    data: Arc<Map>,
}

impl SnapshotView for MemorySnapshot {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.data.get(key).cloned()
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.data
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn scan_range(&self, start: &[u8], end: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        if start >= end {
            return Vec::new();
        }
        self.data
            .range(start.to_vec()..end.to_vec())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn first_in_range(&self, start: &[u8], end: &[u8]) -> Option<(Vec<u8>, Vec<u8>)> {
        if start >= end {
            return None;
        }
        self.data
            .range(start.to_vec()..end.to_vec())
            .next()
            .map(|(k, v)| (k.clone(), v.clone()))
    }
}
