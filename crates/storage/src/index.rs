//! Secondary indexes
//!
//! A `SecondaryIndex` maps an encoded field value to the set of record ids
//! sharing that value. It keeps the map in memory, ordered by the encoded
//! bytes, and mirrors every entry into the store as an index-entry key so it
//! can be rebuilt on open.
//!
//! Only the write path mutates an index. Readers take the read lock and may
//! observe the state before or after a batch that is being committed.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use cellar_core::codec;
use cellar_core::keys::{self, CollectionId, IndexId};
use cellar_core::{BatchOp, Document, Result, Selector, Value, ValueType};

/// Traversal direction of a range scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Increasing encoded values
    Ascending,
    /// Decreasing encoded values
    Descending,
}

/// Persisted description of an index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDefinition {
    /// Index name, unique within its collection
    pub name: String,
    /// Field path the index is built over
    pub selector: Selector,
    /// Declared scalar type
    pub value_type: ValueType,
}

impl IndexDefinition {
    /// Describe an index
    pub fn new(name: impl Into<String>, value_type: ValueType, selector: impl Into<Selector>) -> Self {
        Self {
            name: name.into(),
            selector: selector.into(),
            value_type,
        }
    }
}

/// What one re-index of a record changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexChange {
    /// Values the id was removed from
    pub removed: Vec<Vec<u8>>,
    /// Value the id was added under
    pub inserted: Option<Vec<u8>>,
}

/// Ordered map: encoded value → record ids
#[derive(Debug)]
pub struct SecondaryIndex {
    definition: IndexDefinition,
    collection: String,
    prefix: Vec<u8>,
    max_results: usize,
    entries: RwLock<BTreeMap<Vec<u8>, BTreeSet<String>>>,
}

impl SecondaryIndex {
    /// Create an empty index owned by `collection`.
    ///
    /// `max_results` caps every scan.
    pub fn new(collection: &str, definition: IndexDefinition, max_results: usize) -> Self {
        let prefix = keys::index_prefix(
            CollectionId::from_name(collection),
            IndexId::from_name(&definition.name),
        );
        Self {
            definition,
            collection: collection.to_string(),
            prefix,
            max_results: max_results.max(1),
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    /// Index name
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    /// Field path
    pub fn selector(&self) -> &Selector {
        &self.definition.selector
    }

    /// Declared type
    pub fn value_type(&self) -> ValueType {
        self.definition.value_type
    }

    /// Persisted description
    pub fn definition(&self) -> &IndexDefinition {
        &self.definition
    }

    /// Name of the owning collection
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Store-key prefix of this index's entries
    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    /// Scan cap
    pub fn max_results(&self) -> usize {
        self.max_results
    }

    /// Encoded key for `doc`, or `None` if the record does not carry the field
    pub fn encode_document<D: Document + ?Sized>(&self, doc: &D) -> Option<Vec<u8>> {
        let value = self.selector().resolve(doc, self.value_type())?;
        codec::encode(&value).ok()
    }

    /// Encode a comparison value for this index.
    ///
    /// Fails with `WrongType` when the value cannot be expressed in the
    /// index's declared type.
    pub fn encode_value(&self, value: &Value) -> Result<Vec<u8>> {
        codec::encode_as(self.value_type(), value)
    }

    /// Add `id` under `encoded` (idempotent)
    pub fn put(&self, encoded: &[u8], id: &str) {
        self.entries
            .write()
            .entry(encoded.to_vec())
            .or_default()
            .insert(id.to_string());
    }

    /// Remove `id` from `encoded`; drops the value once its set is empty
    pub fn remove_id(&self, encoded: &[u8], id: &str) -> bool {
        let mut entries = self.entries.write();
        let Some(ids) = entries.get_mut(encoded) else {
            return false;
        };
        let removed = ids.remove(id);
        if ids.is_empty() {
            entries.remove(encoded);
        }
        removed
    }

    /// Sweep the whole index removing `id` wherever present.
    ///
    /// Returns the values it was removed from.
    pub fn remove_id_from_all(&self, id: &str) -> Vec<Vec<u8>> {
        let mut entries = self.entries.write();
        let mut removed = Vec::new();
        entries.retain(|encoded, ids| {
            if ids.remove(id) {
                removed.push(encoded.clone());
            }
            !ids.is_empty()
        });
        removed
    }

    /// Exact match
    pub fn get(&self, encoded: &[u8]) -> Option<Vec<String>> {
        self.entries
            .read()
            .get(encoded)
            .map(|ids| ids.iter().take(self.max_results).cloned().collect())
    }

    /// Whether `id` is stored under `encoded`
    pub fn contains(&self, encoded: &[u8], id: &str) -> bool {
        self.entries
            .read()
            .get(encoded)
            .is_some_and(|ids| ids.contains(id))
    }

    /// Ordered traversal starting at `from`.
    ///
    /// `limit` bounds the traversal on the far side. `keep_equal` decides
    /// whether values equal to `from` or `limit` are included. At most
    /// `max_results` ids are returned; running out of values early is not
    /// an error.
    pub fn range_scan(
        &self,
        from: &[u8],
        direction: Direction,
        limit: Option<&[u8]>,
        keep_equal: bool,
    ) -> Vec<String> {
        let edge = |b: &[u8]| {
            if keep_equal {
                Bound::Included(b.to_vec())
            } else {
                Bound::Excluded(b.to_vec())
            }
        };
        let near = edge(from);
        let far = limit.map_or(Bound::Unbounded, edge);

        let (low, high) = match direction {
            Direction::Ascending => (near, far),
            Direction::Descending => (far, near),
        };
        if !bounds_are_ordered(&low, &high) {
            return Vec::new();
        }

        let entries = self.entries.read();
        let range = entries.range::<Vec<u8>, _>((low, high));
        match direction {
            Direction::Ascending => collect_capped(range, self.max_results),
            Direction::Descending => collect_capped(range.rev(), self.max_results),
        }
    }

    /// Every id in the index, in value order, capped like a scan
    pub fn all(&self, direction: Direction) -> Vec<String> {
        let entries = self.entries.read();
        match direction {
            Direction::Ascending => collect_capped(entries.iter(), self.max_results),
            Direction::Descending => collect_capped(entries.iter().rev(), self.max_results),
        }
    }

    /// Number of distinct values
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the index has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Move `id` to `encoded` (or out of the index when `None`).
    ///
    /// Previous entries are removed before the new one is added, so the id
    /// is stored under at most one value afterwards.
    pub fn reindex(&self, id: &str, encoded: Option<Vec<u8>>) -> IndexChange {
        let removed = self.remove_id_from_all(id);
        if let Some(value) = &encoded {
            self.put(value, id);
        }
        IndexChange {
            removed,
            inserted: encoded,
        }
    }

    /// Undo a change made by [`reindex`](Self::reindex)
    pub fn revert(&self, id: &str, change: &IndexChange) {
        if let Some(value) = &change.inserted {
            self.remove_id(value, id);
        }
        for value in &change.removed {
            self.put(value, id);
        }
    }

    /// Store operations mirroring `change`
    pub fn batch_ops(&self, id: &str, change: &IndexChange) -> Vec<BatchOp> {
        let mut ops = Vec::with_capacity(change.removed.len() + 1);
        for value in &change.removed {
            if change.inserted.as_ref() != Some(value) {
                ops.push(BatchOp::Delete {
                    key: keys::index_entry_key(&self.prefix, value, id),
                });
            }
        }
        if let Some(value) = &change.inserted {
            if !change.removed.contains(value) {
                ops.push(BatchOp::Put {
                    key: keys::index_entry_key(&self.prefix, value, id),
                    value: Vec::new(),
                });
            }
        }
        ops
    }

    /// Restore one entry from a persisted index-entry key.
    ///
    /// Returns false if the key does not belong to this index.
    pub fn load_entry(&self, key: &[u8]) -> bool {
        match keys::split_index_entry(&self.prefix, key) {
            Some((encoded, id)) => {
                self.put(&encoded, &id);
                true
            }
            None => false,
        }
    }
}

fn bounds_are_ordered(low: &Bound<Vec<u8>>, high: &Bound<Vec<u8>>) -> bool {
    match (low, high) {
        (Bound::Included(l), Bound::Included(h)) => l <= h,
        (Bound::Included(l), Bound::Excluded(h))
        | (Bound::Excluded(l), Bound::Included(h))
        | (Bound::Excluded(l), Bound::Excluded(h)) => l < h,
        _ => true,
    }
}

fn collect_capped<'a, I>(iter: I, cap: usize) -> Vec<String>
where
    I: Iterator<Item = (&'a Vec<u8>, &'a BTreeSet<String>)>,
{
    iter.flat_map(|(_, ids)| ids.iter().cloned()).take(cap).collect()
}
