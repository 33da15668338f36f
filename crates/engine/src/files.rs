//! Chunked file storage
//!
//! A file is split into `file_chunk_size` chunks stored under
//! `[0x03] len file_id chunk_index`. Chunk indexes are big-endian so a
//! prefix scan returns them in order. An empty file is a single empty chunk.
//! Writing a file replaces every chunk of its previous version in the same
//! transaction.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use cellar_concurrency::Operation;
use cellar_core::keys::{self, TtlTarget};
use cellar_core::{Error, Result};
use tracing::debug;

use crate::database::DbContext;
use crate::ttl;

/// Chunked, encrypted file storage sharing the database's write path
#[derive(Clone)]
pub struct FileStore {
    ctx: Arc<DbContext>,
}

impl FileStore {
    pub(crate) fn new(ctx: Arc<DbContext>) -> Self {
        Self { ctx }
    }

    fn check_id(&self, id: &str) -> Result<()> {
        self.ctx.ensure_open()?;
        if id.is_empty() {
            return Err(Error::EmptyId);
        }
        if id.len() > keys::MAX_NAME_LEN {
            return Err(Error::invalid_input("file id too long"));
        }
        Ok(())
    }

    /// Store `data` as file `id`, replacing any previous content.
    pub async fn put_file(&self, id: &str, data: &[u8]) -> Result<()> {
        self.write_file(id, data, None).await
    }

    /// Store a file that expires after `ttl`.
    pub async fn put_file_with_ttl(&self, id: &str, data: &[u8], ttl: Duration) -> Result<()> {
        self.write_file(id, data, Some(ttl)).await
    }

    async fn write_file(&self, id: &str, data: &[u8], ttl: Option<Duration>) -> Result<()> {
        self.check_id(id)?;
        let expires_at = ttl.map(ttl::expiry_after).transpose()?;

        let chunk_size = self.ctx.config.file_chunk_size;
        let chunks: Vec<&[u8]> = if data.is_empty() {
            vec![data]
        } else {
            data.chunks(chunk_size).collect()
        };
        let count = u32::try_from(chunks.len())
            .map_err(|_| Error::invalid_input("file has too many chunks"))?;

        let mut ops = Vec::with_capacity(chunks.len() + 3);
        let mut written = HashSet::with_capacity(chunks.len());
        for (index, chunk) in (0..count).zip(chunks) {
            let key = keys::file_chunk_key(id, index);
            written.insert(key.clone());
            ops.push(Operation::put(key, chunk.to_vec()));
        }

        let view = self.ctx.store.view();
        for (key, _) in view.scan_prefix(&keys::file_prefix(id)) {
            if !written.contains(&key) {
                ops.push(Operation::delete(key));
            }
        }

        let target = expires_at.map(|at| (at, TtlTarget::File { id: id.to_string() }));
        ops.push(ttl::retarget(keys::file_ttl_ref_key(id), target));

        self.ctx.submit(ops).await?;
        if expires_at.is_some() {
            self.ctx.ttl_wake.notify_one();
        }
        debug!(file = id, chunks = count, bytes = data.len(), "File written");
        Ok(())
    }

    /// Content of file `id`
    ///
    /// # Errors
    ///
    /// `NotFound` if no such file exists, a decryption error if any chunk
    /// cannot be authenticated.
    pub async fn read_file(&self, id: &str) -> Result<Vec<u8>> {
        self.check_id(id)?;
        let view = self.ctx.store.view();
        let chunks = view.scan_prefix(&keys::file_prefix(id));
        if chunks.is_empty() {
            return Err(Error::not_found(format!("file '{}'", id)));
        }
        let mut data = Vec::new();
        for (key, sealed) in chunks {
            data.extend_from_slice(&self.ctx.decrypt(&key, &sealed)?);
        }
        Ok(data)
    }

    /// Remove file `id`; a missing file is not an error
    pub async fn delete_file(&self, id: &str) -> Result<()> {
        self.check_id(id)?;
        let mut ops = chunk_deletes(&self.ctx, id);
        ops.push(ttl::retarget(keys::file_ttl_ref_key(id), None));
        self.ctx.submit(ops).await
    }
}

impl std::fmt::Debug for FileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStore").finish_non_exhaustive()
    }
}

fn chunk_deletes(ctx: &DbContext, id: &str) -> Vec<Operation> {
    ctx.store
        .view()
        .scan_prefix(&keys::file_prefix(id))
        .into_iter()
        .map(|(key, _)| Operation::delete(key))
        .collect()
}

/// Remove a file whose TTL entry `queue_key` came due
pub(crate) async fn expire(ctx: &DbContext, id: &str, queue_key: Vec<u8>) -> Result<()> {
    let ref_key = keys::file_ttl_ref_key(id);
    let view = ctx.store.view();

    if !ttl::is_current(ctx, view.as_ref(), &ref_key, &queue_key)? {
        let stale = vec![Operation::delete(queue_key.clone())];
        return ctx.submit_if_present(stale, queue_key).await;
    }

    let mut ops = chunk_deletes(ctx, id);
    ops.push(Operation::delete(ref_key));
    ops.push(Operation::delete(queue_key.clone()));
    ctx.submit_if_present(ops, queue_key).await?;
    debug!(file = id, "File expired");
    Ok(())
}
