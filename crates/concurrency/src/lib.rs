//! Concurrency layer for Cellar
//!
//! This crate owns the write path:
//! - WriteTransaction / Operation: what a caller wants committed
//! - WriteCoalescer: the single writer task batching transactions into
//!   atomic, encrypted store updates
//! - WriteHandle: cloneable submission side with deadlines

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod coalescer;
pub mod transaction;

pub use coalescer::{Accumulator, CoalescerConfig, WriteCoalescer, WriteHandle};
pub use transaction::{Operation, WriteTransaction};
