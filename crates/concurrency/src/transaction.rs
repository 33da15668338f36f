//! Write transactions
//!
//! A `WriteTransaction` is the unit a caller hands to the coalescer: an
//! ordered list of operations, an optional precondition and the channel the
//! commit result is delivered on.
//!
//! Operations describe intent, not stored bytes. `Put` payloads are
//! encrypted, `Reindex` operations are resolved against the in-memory
//! index and `Retarget` operations against the store plus earlier writes
//! of the same batch, all by the writer at commit time.

use std::fmt;
use std::sync::Arc;

use cellar_core::Result;
use cellar_storage::SecondaryIndex;
use tokio::sync::oneshot;

/// One mutation inside a transaction
#[derive(Clone)]
pub enum Operation {
    /// Write `value` under `key`, encrypted for that key
    Put {
        /// Store key
        key: Vec<u8>,
        /// Plaintext payload
        value: Vec<u8>,
    },
    /// Remove `key`
    Delete {
        /// Store key
        key: Vec<u8>,
    },
    /// Move record `id` to `value` in `index`, or out of it when `None`
    Reindex {
        /// Target index
        index: Arc<SecondaryIndex>,
        /// Record id
        id: String,
        /// Encoded field value
        value: Option<Vec<u8>>,
    },
    /// Point the back-reference `ref_key` at a new TTL queue entry, or
    /// clear it when `None`. The queue entry it pointed at before is
    /// removed.
    Retarget {
        /// Back-reference key
        ref_key: Vec<u8>,
        /// New queue entry
        queue_key: Option<Vec<u8>>,
    },
}

impl Operation {
    /// Shorthand for [`Operation::Put`]
    pub fn put(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Operation::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Shorthand for [`Operation::Delete`]
    pub fn delete(key: impl Into<Vec<u8>>) -> Self {
        Operation::Delete { key: key.into() }
    }

    /// Shorthand for [`Operation::Reindex`]
    pub fn reindex(index: Arc<SecondaryIndex>, id: impl Into<String>, value: Option<Vec<u8>>) -> Self {
        Operation::Reindex {
            index,
            id: id.into(),
            value,
        }
    }

    /// Shorthand for [`Operation::Retarget`]
    pub fn retarget(ref_key: impl Into<Vec<u8>>, queue_key: Option<Vec<u8>>) -> Self {
        Operation::Retarget {
            ref_key: ref_key.into(),
            queue_key,
        }
    }

    /// Approximate bytes this operation contributes to a batch
    pub fn size(&self) -> usize {
        match self {
            Operation::Put { key, value } => key.len() + value.len(),
            Operation::Delete { key } => key.len(),
            Operation::Reindex { index, id, value } => {
                index.prefix().len() + id.len() + value.as_ref().map_or(0, Vec::len)
            }
            Operation::Retarget { ref_key, queue_key } => {
                ref_key.len() + queue_key.as_ref().map_or(0, |q| 2 * q.len())
            }
        }
    }
}

impl fmt::Debug for Operation {
    // Payloads stay out of logs
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Put { key, value } => f
                .debug_struct("Put")
                .field("key_len", &key.len())
                .field("value_len", &value.len())
                .finish(),
            Operation::Delete { key } => f.debug_struct("Delete").field("key_len", &key.len()).finish(),
            Operation::Reindex { index, id, value } => f
                .debug_struct("Reindex")
                .field("index", &index.name())
                .field("id", id)
                .field("present", &value.is_some())
                .finish(),
            Operation::Retarget { ref_key, queue_key } => f
                .debug_struct("Retarget")
                .field("ref_key_len", &ref_key.len())
                .field("scheduled", &queue_key.is_some())
                .finish(),
        }
    }
}

/// Operations committed together, plus the response channel
#[derive(Debug)]
pub struct WriteTransaction {
    pub(crate) operations: Vec<Operation>,
    pub(crate) require: Option<Vec<u8>>,
    pub(crate) response: oneshot::Sender<Result<()>>,
}

impl WriteTransaction {
    /// Package `operations` with the channel the result is sent on
    pub fn new(operations: Vec<Operation>, response: oneshot::Sender<Result<()>>) -> Self {
        Self {
            operations,
            require: None,
            response,
        }
    }

    /// Apply only if `key` still exists when the batch is committed
    pub fn require_key(mut self, key: Vec<u8>) -> Self {
        self.require = Some(key);
        self
    }

    /// Number of operations
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Whether the transaction carries no operations
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Total approximate size in bytes
    pub fn size(&self) -> usize {
        self.operations.iter().map(Operation::size).sum()
    }
}
