//! Core types and traits for Cellar
//!
//! This crate defines the foundational types used throughout the system:
//! - Value / ValueType: typed scalars that can be indexed
//! - codec: order-preserving byte encoding of scalars
//! - Selector / Document: field-path resolution against structured records
//! - Filter: immutable query predicates
//! - keys: persisted key layout shared by every layer
//! - Traits: KvStore / SnapshotView over the underlying store
//! - Error: error type hierarchy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod error;
pub mod filter;
pub mod keys;
pub mod selector;
pub mod traits;
pub mod value;

pub use codec::{decode, encode};
pub use error::{Error, Result};
pub use filter::{Filter, FilterOp};
pub use keys::{CollectionId, IndexId};
pub use selector::{Document, Selector};
pub use traits::{BatchOp, KvStore, SnapshotView};
pub use value::{Value, ValueType};
