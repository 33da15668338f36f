//! CellarDB - embedded encrypted document store
//!
//! Records are encrypted per key with AES-256-GCM, indexed by typed
//! secondary indexes, and written through a single coalescing writer.
//!
//! # Quick Start
//!
//! ```ignore
//! use cellardb::{Database, Filter, Query, ValueType};
//!
//! let db = Database::open_in_memory([7u8; 32]).await?;
//! let users = db.use_collection("users").await?;
//! users.set_index("age", ValueType::Int, "age").await?;
//! users.put("u1", &serde_json::json!({"age": 30})).await?;
//!
//! let adults = Query::new().get(Filter::greater("age", 17));
//! let ids = users.query_ids(&adults).await?;
//! db.close().await?;
//! ```
//!
//! # Architecture
//!
//! - `cellar-core`: values, codec, selectors, filters, key layout, errors
//! - `cellar-storage`: in-memory store, record cipher, secondary index
//! - `cellar-concurrency`: the write coalescer
//! - `cellar-engine`: database, collections, queries, TTL, files

pub use cellar_core::{
    Document, Error, Filter, FilterOp, Result, Selector, Value, ValueType,
};
pub use cellar_engine::{
    CellarConfig, Collection, Database, FileStore, KvAdapter, Query, Record,
};
pub use cellar_storage::{Direction, IndexDefinition};
