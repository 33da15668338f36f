//! Database engine for Cellar
//!
//! This crate orchestrates all lower layers:
//! - Database: open/close, collection registry, backup and load
//! - Collection: records, secondary indexes, queries
//! - Query: concurrent filter evaluation under a deadline
//! - Background TTL sweep for records and files
//! - KV adapter and chunked file store over the same write path
//!
//! The engine is the only component that knows about:
//! - Collection metadata and index restore
//! - TTL bookkeeping
//! - Snapshot files in the data directory

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod collection;
pub mod database;
pub mod files;
pub mod kv;
pub mod query;
mod ttl;

pub use collection::{Collection, Record};
pub use database::{CellarConfig, Database};
pub use files::FileStore;
pub use kv::KvAdapter;
pub use query::Query;
