//! Core traits for storage and snapshot abstraction
//!
//! This module defines the KvStore and SnapshotView traits that let the
//! upper layers run against any ordered key-value store that offers atomic
//! batches and point-in-time reads.

use std::io::{Read, Write};
use std::sync::Arc;

use crate::error::Result;

/// One mutation inside an atomic batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    /// Set `key` to `value`
    Put {
        /// Store key
        key: Vec<u8>,
        /// Bytes as they should land in the store
        value: Vec<u8>,
    },
    /// Remove `key` (no-op if absent)
    Delete {
        /// Store key
        key: Vec<u8>,
    },
}

impl BatchOp {
    /// Key this operation touches
    pub fn key(&self) -> &[u8] {
        match self {
            BatchOp::Put { key, .. } | BatchOp::Delete { key } => key,
        }
    }
}

/// Storage abstraction for the underlying ordered key-value store
///
/// Thread safety: All methods must be safe to call concurrently from
/// multiple threads (requires Send + Sync). The database only ever calls
/// `update` from its single writer.
pub trait KvStore: Send + Sync {
    /// Apply every operation of `batch` atomically.
    ///
    /// Either all operations become visible or none do.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch could not be committed.
    fn update(&self, batch: Vec<BatchOp>) -> Result<()>;

    /// Point-in-time read view.
    ///
    /// Writes committed after the call are not visible through the view.
    fn view(&self) -> Arc<dyn SnapshotView>;

    /// Write a full copy of the store to `writer`
    ///
    /// # Errors
    ///
    /// Returns an error on I/O or serialization failure.
    fn backup(&self, writer: &mut dyn Write) -> Result<()>;

    /// Replace the store's contents with a backup read from `reader`
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure or a malformed backup.
    fn load(&self, reader: &mut dyn Read) -> Result<()>;
}

/// Immutable point-in-time view of a store
pub trait SnapshotView: Send + Sync {
    /// Value stored under `key`
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;

    /// All entries whose key starts with `prefix`, in key order
    fn scan_prefix(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)>;

    /// Entries with `start <= key < end`, in key order
    fn scan_range(&self, start: &[u8], end: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)>;

    /// First entry with `key >= start` and `key < end`, if any
    fn first_in_range(&self, start: &[u8], end: &[u8]) -> Option<(Vec<u8>, Vec<u8>)> {
        self.scan_range(start, end).into_iter().next()
    }
}
