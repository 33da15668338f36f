//! Key-value adapter over a collection's KV keyspace
//!
//! Gives an ordered, encrypted key-value view to subsystems that index
//! their own structures (a full-text index, for instance) next to a
//! collection's records. Keys are stored in plaintext under the
//! collection's KV prefix; values go through the same cipher and writer
//! as records.

use std::sync::Arc;

use cellar_concurrency::Operation;
use cellar_core::{Error, Result};

use crate::database::DbContext;

/// Encrypted key-value access scoped to one collection
#[derive(Clone)]
pub struct KvAdapter {
    ctx: Arc<DbContext>,
    collection: String,
    prefix: Vec<u8>,
}

impl KvAdapter {
    pub(crate) fn new(ctx: Arc<DbContext>, collection: String, prefix: Vec<u8>) -> Self {
        Self {
            ctx,
            collection,
            prefix,
        }
    }

    /// Name of the owning collection
    pub fn collection(&self) -> &str {
        &self.collection
    }

    fn store_key(&self, key: &[u8]) -> Vec<u8> {
        let mut full = Vec::with_capacity(self.prefix.len() + key.len());
        full.extend_from_slice(&self.prefix);
        full.extend_from_slice(key);
        full
    }

    fn check_key(&self, key: &[u8]) -> Result<()> {
        self.ctx.ensure_open()?;
        if key.is_empty() {
            return Err(Error::EmptyId);
        }
        Ok(())
    }

    /// Value stored under `key`, if any
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.check_key(key)?;
        let view = self.ctx.store.view();
        self.ctx.read(view.as_ref(), &self.store_key(key))
    }

    /// Values for every key, read from one snapshot, in request order
    pub fn multi_get(&self, keys: &[&[u8]]) -> Result<Vec<Option<Vec<u8>>>> {
        self.ctx.ensure_open()?;
        let view = self.ctx.store.view();
        keys.iter()
            .map(|key| self.ctx.read(view.as_ref(), &self.store_key(key)))
            .collect()
    }

    /// Entries whose key starts with `prefix`, in key order
    pub fn prefix_iter(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.ctx.ensure_open()?;
        let view = self.ctx.store.view();
        let entries = view.scan_prefix(&self.store_key(prefix));
        self.open_entries(entries)
    }

    /// Entries with `start <= key < end`, in key order
    pub fn range_iter(&self, start: &[u8], end: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.ctx.ensure_open()?;
        if start >= end {
            return Ok(Vec::new());
        }
        let view = self.ctx.store.view();
        let entries = view.scan_range(&self.store_key(start), &self.store_key(end));
        self.open_entries(entries)
    }

    fn open_entries(&self, entries: Vec<(Vec<u8>, Vec<u8>)>) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        entries
            .into_iter()
            .map(|(key, sealed)| {
                let value = self.ctx.decrypt(&key, &sealed)?;
                Ok((key[self.prefix.len()..].to_vec(), value))
            })
            .collect()
    }

    /// Store `value` under `key`
    pub async fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_key(key)?;
        let op = Operation::put(self.store_key(key), value.to_vec());
        self.ctx.submit(vec![op]).await
    }

    /// Remove `key`; a missing key is not an error
    pub async fn delete(&self, key: &[u8]) -> Result<()> {
        self.check_key(key)?;
        self.ctx.submit(vec![Operation::delete(self.store_key(key))]).await
    }
}

impl std::fmt::Debug for KvAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvAdapter")
            .field("collection", &self.collection)
            .finish()
    }
}
