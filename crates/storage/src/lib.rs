//! Storage layer for Cellar
//!
//! This crate implements everything that touches stored bytes:
//! - MemoryStore: BTreeMap-based KvStore with copy-on-write snapshots
//! - Storage codec seam with the AES-256-GCM RecordCipher
//! - SecondaryIndex: encoded value → record ids, with range scans

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod index;
pub mod memory;

pub use codec::{RecordCipher, StorageCodec};
pub use index::{Direction, IndexChange, IndexDefinition, SecondaryIndex};
pub use memory::{MemorySnapshot, MemoryStore};
