//! Collections
//!
//! A `Collection` is a named keyspace of records plus its secondary indexes.
//! Every mutation becomes one write transaction: the encrypted payload, a
//! re-index operation per index and any TTL bookkeeping are committed
//! together, so indexes never drift from the records they describe.
//!
//! Record writes hold the collection's gate in shared mode. Creating an
//! index or dropping the collection holds it exclusively, so a back-fill
//! never races with a concurrent put.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cellar_concurrency::Operation;
use cellar_core::keys::{self, CollectionId, IndexId, TtlTarget};
use cellar_core::{Error, Result, Selector, SnapshotView, ValueType};
use cellar_storage::{IndexDefinition, SecondaryIndex};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock as Gate;
use tracing::{debug, info, warn};

use crate::database::DbContext;
use crate::kv::KvAdapter;
use crate::query::{self, Query};
use crate::ttl;

/// Persisted description of a collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct CollectionMeta {
    pub(crate) name: String,
    pub(crate) indexes: Vec<IndexDefinition>,
}

/// A record returned by a query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Record id
    pub id: String,
    /// Decrypted payload
    pub payload: Vec<u8>,
}

impl Record {
    /// Deserialize a payload written with [`Collection::put`]
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

/// Named keyspace of records with secondary indexes
pub struct Collection {
    name: String,
    id: CollectionId,
    ctx: Arc<DbContext>,
    indexes: RwLock<Vec<Arc<SecondaryIndex>>>,
    gate: Gate<()>,
    dropped: AtomicBool,
}

impl Collection {
    pub(crate) fn new(ctx: Arc<DbContext>, name: &str, indexes: Vec<Arc<SecondaryIndex>>) -> Self {
        Self {
            name: name.to_string(),
            id: CollectionId::from_name(name),
            ctx,
            indexes: RwLock::new(indexes),
            gate: Gate::new(()),
            dropped: AtomicBool::new(false),
        }
    }

    /// Rebuild a collection and the contents of its indexes from `view`
    pub(crate) fn restore(ctx: Arc<DbContext>, meta: CollectionMeta, view: &dyn SnapshotView) -> Self {
        let limit = ctx.config.query_limit;
        let mut indexes = Vec::with_capacity(meta.indexes.len());
        for definition in meta.indexes {
            let index = SecondaryIndex::new(&meta.name, definition, limit);
            let mut entries = 0usize;
            for (key, _) in view.scan_prefix(index.prefix()) {
                if index.load_entry(&key) {
                    entries += 1;
                }
            }
            debug!(collection = %meta.name, index = index.name(), entries, "Index restored");
            indexes.push(Arc::new(index));
        }
        Self::new(ctx, &meta.name, indexes)
    }

    /// Collection name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn id(&self) -> CollectionId {
        self.id
    }

    fn check(&self) -> Result<()> {
        self.ctx.ensure_open()?;
        if self.dropped.load(Ordering::Acquire) {
            return Err(Error::not_found(format!("collection '{}'", self.name)));
        }
        Ok(())
    }

    fn check_id(&self, id: &str) -> Result<()> {
        self.check()?;
        if id.is_empty() {
            return Err(Error::EmptyId);
        }
        if id.len() > keys::MAX_NAME_LEN {
            return Err(Error::invalid_input("record id too long"));
        }
        Ok(())
    }

    // ========== Records ==========

    /// Store a structured record, serialized as JSON.
    ///
    /// Replaces any previous record with this id and cancels a pending
    /// expiry.
    pub async fn put<T: Serialize + ?Sized>(&self, id: &str, value: &T) -> Result<()> {
        let doc = serde_json::to_value(value)?;
        let payload = serde_json::to_vec(&doc)?;
        self.write_record(id, payload, Some(doc), None).await
    }

    /// Store a structured record that expires after `ttl`.
    pub async fn put_with_ttl<T: Serialize + ?Sized>(
        &self,
        id: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<()> {
        let doc = serde_json::to_value(value)?;
        let payload = serde_json::to_vec(&doc)?;
        self.write_record(id, payload, Some(doc), Some(ttl)).await
    }

    /// Store a binary payload verbatim. Binary records are not indexed.
    pub async fn put_bytes(&self, id: &str, payload: &[u8]) -> Result<()> {
        self.write_record(id, payload.to_vec(), None, None).await
    }

    async fn write_record(
        &self,
        id: &str,
        payload: Vec<u8>,
        doc: Option<serde_json::Value>,
        ttl: Option<Duration>,
    ) -> Result<()> {
        self.check_id(id)?;
        let expires_at = ttl.map(ttl::expiry_after).transpose()?;

        let _gate = self.gate.read().await;
        self.check()?;
        let indexes = self.indexes.read().clone();

        let mut ops = Vec::with_capacity(indexes.len() + 4);
        ops.push(Operation::put(keys::record_key(self.id, id), payload));
        for index in &indexes {
            let value = doc.as_ref().and_then(|d| index.encode_document(d));
            ops.push(Operation::reindex(Arc::clone(index), id, value));
        }

        let target = expires_at.map(|at| {
            (
                at,
                TtlTarget::Record {
                    collection: self.name.clone(),
                    id: id.to_string(),
                },
            )
        });
        ops.push(ttl::retarget(keys::ttl_ref_key(self.id, id), target));

        self.ctx.submit(ops).await?;
        if expires_at.is_some() {
            self.ctx.ttl_wake.notify_one();
        }
        Ok(())
    }

    /// Read a structured record.
    ///
    /// # Errors
    ///
    /// `NotFound` if there is no such record, a decryption error if it
    /// cannot be authenticated, `Serialization` if it is not valid JSON
    /// for `T`.
    pub async fn get<T: DeserializeOwned>(&self, id: &str) -> Result<T> {
        let payload = self.get_bytes(id).await?;
        Ok(serde_json::from_slice(&payload)?)
    }

    /// Read a record's payload.
    pub async fn get_bytes(&self, id: &str) -> Result<Vec<u8>> {
        self.check_id(id)?;
        let view = self.ctx.store.view();
        self.read_record(view.as_ref(), id)?
            .ok_or_else(|| Error::not_found(format!("{}/{}", self.name, id)))
    }

    fn read_record(&self, view: &dyn SnapshotView, id: &str) -> Result<Option<Vec<u8>>> {
        self.ctx.read(view, &keys::record_key(self.id, id))
    }

    /// Delete a record and every index entry that references it.
    ///
    /// Deleting a missing record is not an error.
    pub async fn delete(&self, id: &str) -> Result<()> {
        self.check_id(id)?;
        let _gate = self.gate.read().await;
        self.check()?;

        let mut ops = vec![Operation::delete(keys::record_key(self.id, id))];
        ops.extend(self.unindex_ops(id));
        ops.push(ttl::retarget(keys::ttl_ref_key(self.id, id), None));
        self.ctx.submit(ops).await
    }

    fn unindex_ops(&self, id: &str) -> Vec<Operation> {
        self.indexes
            .read()
            .iter()
            .map(|index| Operation::reindex(Arc::clone(index), id, None))
            .collect()
    }

    /// Remove a record whose TTL entry `queue_key` came due.
    ///
    /// Skipped when the record was rewritten since the entry was created.
    pub(crate) async fn expire(&self, id: &str, queue_key: Vec<u8>) -> Result<()> {
        let _gate = self.gate.read().await;
        let ref_key = keys::ttl_ref_key(self.id, id);
        let view = self.ctx.store.view();

        if !ttl::is_current(&self.ctx, view.as_ref(), &ref_key, &queue_key)? {
            let stale = vec![Operation::delete(queue_key.clone())];
            return self.ctx.submit_if_present(stale, queue_key).await;
        }

        let mut ops = vec![Operation::delete(keys::record_key(self.id, id))];
        ops.extend(self.unindex_ops(id));
        ops.push(Operation::delete(ref_key));
        ops.push(Operation::delete(queue_key.clone()));
        self.ctx.submit_if_present(ops, queue_key).await?;
        debug!(collection = %self.name, id, "Record expired");
        Ok(())
    }

    // ========== Indexes ==========

    /// Create an index over `selector`, back-filled from existing records.
    ///
    /// # Errors
    ///
    /// `NameAlreadyExists` if the collection already has an index with
    /// this name, `HashCollision` if the name derives the same id as
    /// another index of the collection.
    pub async fn set_index(
        &self,
        name: &str,
        value_type: ValueType,
        selector: impl Into<Selector>,
    ) -> Result<()> {
        self.check()?;
        let selector = selector.into();
        if name.is_empty() || selector.is_empty() {
            return Err(Error::invalid_input("index name and selector must not be empty"));
        }

        let _gate = self.gate.write().await;
        self.check()?;
        {
            let indexes = self.indexes.read();
            if indexes.iter().any(|i| i.name() == name) {
                return Err(Error::NameAlreadyExists(format!("{}.{}", self.name, name)));
            }
            let iid = IndexId::from_name(name);
            if let Some(other) = indexes.iter().find(|i| IndexId::from_name(i.name()) == iid) {
                return Err(Error::HashCollision(other.name().to_string(), name.to_string()));
            }
        }

        let definition = IndexDefinition::new(name, value_type, selector);
        let index = Arc::new(SecondaryIndex::new(
            &self.name,
            definition,
            self.ctx.config.query_limit,
        ));

        let view = self.ctx.store.view();
        let mut ops = Vec::new();
        for (key, sealed) in view.scan_prefix(&keys::record_prefix(self.id)) {
            let Some(id) = keys::record_id(self.id, &key) else {
                continue;
            };
            let payload = match self.ctx.decrypt(&key, &sealed) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(collection = %self.name, id = %id, error = %e, "Skipping unreadable record during back-fill");
                    continue;
                }
            };
            let Ok(doc) = serde_json::from_slice::<serde_json::Value>(&payload) else {
                continue;
            };
            if let Some(value) = index.encode_document(&doc) {
                ops.push(Operation::reindex(Arc::clone(&index), id, Some(value)));
            }
        }
        let backfilled = ops.len();

        let mut definitions = self.definitions();
        definitions.push(index.definition().clone());
        ops.push(self.meta_op(definitions)?);
        self.ctx.submit(ops).await?;

        self.indexes.write().push(index);
        info!(collection = %self.name, index = name, backfilled, "Index created");
        Ok(())
    }

    /// Definitions of every index, in creation order
    pub fn indexes(&self) -> Vec<IndexDefinition> {
        self.definitions()
    }

    fn definitions(&self) -> Vec<IndexDefinition> {
        self.indexes
            .read()
            .iter()
            .map(|i| i.definition().clone())
            .collect()
    }

    pub(crate) fn take_indexes(&self) -> Vec<Arc<SecondaryIndex>> {
        std::mem::take(&mut *self.indexes.write())
    }

    pub(crate) fn replace_indexes(&self, indexes: Vec<Arc<SecondaryIndex>>) {
        *self.indexes.write() = indexes;
    }

    fn meta_op(&self, indexes: Vec<IndexDefinition>) -> Result<Operation> {
        let meta = CollectionMeta {
            name: self.name.clone(),
            indexes,
        };
        Ok(Operation::put(
            keys::collection_meta_key(&self.name),
            rmp_serde::to_vec(&meta)?,
        ))
    }

    pub(crate) async fn persist_meta(&self) -> Result<()> {
        let op = self.meta_op(self.definitions())?;
        self.ctx.submit(vec![op]).await
    }

    // ========== Queries ==========

    /// Ids matching `query`
    pub async fn query_ids(&self, query: &Query) -> Result<Vec<String>> {
        self.check()?;
        let indexes = self.indexes.read().clone();
        query::execute(
            &indexes,
            query,
            self.ctx.config.default_query_limit,
            self.ctx.config.query_timeout(),
        )
        .await
    }

    /// Records matching `query`, decrypted.
    ///
    /// A record that cannot be read is logged and left out.
    pub async fn query(&self, query: &Query) -> Result<Vec<Record>> {
        let ids = self.query_ids(query).await?;
        let view = self.ctx.store.view();
        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            match self.read_record(view.as_ref(), &id) {
                Ok(Some(payload)) => records.push(Record { id, payload }),
                Ok(None) => debug!(collection = %self.name, id = %id, "Record removed before read"),
                Err(e) => warn!(collection = %self.name, id = %id, error = %e, "Dropping unreadable record from result"),
            }
        }
        Ok(records)
    }

    /// Adapter over this collection's key-value keyspace
    pub fn kv(&self) -> KvAdapter {
        KvAdapter::new(Arc::clone(&self.ctx), self.name.clone(), keys::kv_prefix(self.id))
    }

    /// Delete everything the collection owns, including its metadata.
    pub(crate) async fn drop_all(&self) -> Result<()> {
        let _gate = self.gate.write().await;
        let view = self.ctx.store.view();

        let mut ops = Vec::new();
        let ref_prefix = keys::ttl_ref_prefix(self.id);
        for (key, _) in view.scan_prefix(&keys::collection_prefix(self.id)) {
            if key.starts_with(&ref_prefix) {
                if let Some(queue_key) = self.ctx.read(view.as_ref(), &key)? {
                    ops.push(Operation::delete(queue_key));
                }
            }
            ops.push(Operation::delete(key));
        }
        ops.push(Operation::delete(keys::collection_meta_key(&self.name)));
        let removed = ops.len();
        self.ctx.submit(ops).await?;

        self.dropped.store(true, Ordering::Release);
        self.indexes.write().clear();
        debug!(collection = %self.name, removed, "Collection keyspace removed");
        Ok(())
    }
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.name)
            .field("indexes", &self.indexes.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use cellar_core::{BatchOp, Filter};
    use serde_json::json;

    async fn people() -> (Database, Arc<Collection>) {
        let db = Database::open_in_memory([5u8; 32]).await.unwrap();
        let people = db.use_collection("people").await.unwrap();
        people.set_index("age", ValueType::Int, "age").await.unwrap();
        for (id, age) in [("a", 10i64), ("b", 20), ("c", 30)] {
            people.put(id, &json!({ "age": age })).await.unwrap();
        }
        (db, people)
    }

    /// Overwrite a stored payload behind the writer's back
    fn tamper(coll: &Collection, id: &str, sealed: Vec<u8>) {
        coll.ctx
            .store
            .update(vec![BatchOp::Put {
                key: keys::record_key(coll.id, id),
                value: sealed,
            }])
            .unwrap();
    }

    #[tokio::test]
    async fn test_query_skips_unreadable_records() {
        let (_db, people) = people().await;
        tamper(&people, "b", vec![0u8; 40]);
        tamper(&people, "c", vec![1, 2]);

        assert!(matches!(people.get_bytes("b").await, Err(Error::AuthenticationFailed)));
        assert!(matches!(people.get_bytes("c").await, Err(Error::ContentTooShort { .. })));

        // the index still lists all three, the unreadable ones are dropped
        let query = Query::new().get(Filter::exists("age"));
        assert_eq!(people.query_ids(&query).await.unwrap(), vec!["a", "b", "c"]);
        let records = people.query(&query).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "a");
        let doc: serde_json::Value = records[0].decode().unwrap();
        assert_eq!(doc["age"], 10);
    }

    #[tokio::test]
    async fn test_payload_sealed_for_other_id_is_rejected() {
        let (_db, people) = people().await;
        let sealed = people
            .ctx
            .store
            .view()
            .get(&keys::record_key(people.id, "a"))
            .unwrap();
        tamper(&people, "b", sealed);

        assert!(matches!(people.get_bytes("b").await, Err(Error::AuthenticationFailed)));
        let records = people
            .query(&Query::new().get(Filter::greater("age", 5)))
            .await
            .unwrap();
        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }
}
