//! Database struct and open/close logic
//!
//! The `Database` owns the store, the writer task, the TTL sweeper and the
//! registry of open collections.
//!
//! ## Lifecycle
//!
//! 1. `open(dir, key)` creates the directory, reads or creates
//!    `cellar.toml`, loads `cellar.snapshot` when present
//! 2. Collection metadata and index entries are restored from the store
//! 3. The writer task and the TTL sweeper are started
//! 4. `close()` stops the sweeper, drains the writer and writes the snapshot
//!
//! `open_in_memory(key)` skips the directory entirely.

pub mod config;

pub use config::{CellarConfig, CONFIG_FILE_NAME};

use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cellar_concurrency::{Operation, WriteCoalescer, WriteHandle};
use cellar_core::keys::{self, CollectionId};
use cellar_core::{Error, KvStore, Result, SnapshotView};
use cellar_storage::{MemoryStore, RecordCipher, StorageCodec};
use dashmap::DashMap;
use parking_lot::Mutex as ParkingMutex;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::collection::{Collection, CollectionMeta};
use crate::files::FileStore;
use crate::ttl::TtlSweeper;

/// Snapshot file name placed in the database data directory.
pub const SNAPSHOT_FILE_NAME: &str = "cellar.snapshot";

/// State shared by the database and everything it hands out
pub(crate) struct DbContext {
    pub(crate) store: Arc<dyn KvStore>,
    pub(crate) cipher: Arc<RecordCipher>,
    pub(crate) writer: WriteHandle,
    pub(crate) config: CellarConfig,
    /// Wakes the TTL sweeper when a sooner expiry may exist
    pub(crate) ttl_wake: Notify,
    closed: AtomicBool,
}

impl DbContext {
    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::ClosedDatabase);
        }
        Ok(())
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Decrypt a payload stored under `key`
    pub(crate) fn decrypt(&self, key: &[u8], sealed: &[u8]) -> Result<Vec<u8>> {
        self.cipher.decode(key, sealed)
    }

    /// Read and decrypt `key` from `view`
    pub(crate) fn read(&self, view: &dyn SnapshotView, key: &[u8]) -> Result<Option<Vec<u8>>> {
        view.get(key)
            .map(|sealed| self.decrypt(key, &sealed))
            .transpose()
    }

    /// Submit one transaction under the configured write deadline
    pub(crate) async fn submit(&self, operations: Vec<Operation>) -> Result<()> {
        self.writer
            .submit(operations, self.config.write_timeout())
            .await
    }

    /// Submit one transaction that only applies while `key` exists
    pub(crate) async fn submit_if_present(&self, operations: Vec<Operation>, key: Vec<u8>) -> Result<()> {
        self.writer
            .submit_if_present(operations, key, self.config.write_timeout())
            .await
    }
}

/// Embedded encrypted document database
///
/// # Example
///
/// ```text
/// use cellar_engine::Database;
///
/// let db = Database::open("/path/to/data", master_key).await?;
/// let users = db.use_collection("users").await?;
/// users.put("u1", &serde_json::json!({"age": 30})).await?;
/// db.close().await?;
/// ```
pub struct Database {
    ctx: Arc<DbContext>,
    collections: Arc<DashMap<String, Arc<Collection>>>,
    /// Data directory path (None for in-memory databases)
    data_dir: Option<PathBuf>,
    /// Serializes collection creation, deletion and reloads
    registry_lock: Mutex<()>,
    sweeper: ParkingMutex<Option<JoinHandle<()>>>,
}

impl Database {
    /// Open a database in `path` with a 32-byte master key.
    ///
    /// Reads `cellar.toml` from the directory, creating it with defaults if
    /// missing, and loads `cellar.snapshot` if one was written by `close`.
    ///
    /// # Errors
    ///
    /// Fails if the directory or config cannot be read, the config is
    /// invalid, or the snapshot is corrupt or was written under another key.
    pub async fn open<P: AsRef<Path>>(path: P, master_key: [u8; 32]) -> Result<Self> {
        let data_dir = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&data_dir)?;

        let config_path = data_dir.join(CONFIG_FILE_NAME);
        CellarConfig::write_default_if_missing(&config_path)?;
        let config = CellarConfig::from_file(&config_path)?;

        Self::open_with_config(Some(data_dir), master_key, config).await
    }

    /// Open a database that lives only in memory.
    pub async fn open_in_memory(master_key: [u8; 32]) -> Result<Self> {
        Self::open_with_config(None, master_key, CellarConfig::default()).await
    }

    /// Open with an explicit configuration.
    ///
    /// With a data directory the config is written to `cellar.toml` so a
    /// later `open` picks up the same settings.
    pub async fn open_with_config(
        data_dir: Option<PathBuf>,
        master_key: [u8; 32],
        config: CellarConfig,
    ) -> Result<Self> {
        config.validate()?;

        let store = Arc::new(MemoryStore::new());
        if let Some(dir) = &data_dir {
            std::fs::create_dir_all(dir)?;
            config.write_to_file(&dir.join(CONFIG_FILE_NAME))?;
            let snapshot = dir.join(SNAPSHOT_FILE_NAME);
            if snapshot.exists() {
                let mut reader = BufReader::new(std::fs::File::open(&snapshot)?);
                store.load(&mut reader)?;
            }
        }

        let cipher = Arc::new(RecordCipher::new(master_key));
        let (writer, _writer_task) = WriteCoalescer::spawn(
            Arc::clone(&store) as Arc<dyn KvStore>,
            Arc::clone(&cipher) as Arc<dyn StorageCodec>,
            config.coalescer(),
        );

        let ctx = Arc::new(DbContext {
            store,
            cipher,
            writer,
            config,
            ttl_wake: Notify::new(),
            closed: AtomicBool::new(false),
        });

        let collections = Arc::new(DashMap::new());
        for collection in restore_collections(&ctx)? {
            collections.insert(collection.name().to_string(), collection);
        }

        let sweeper = TtlSweeper::new(Arc::clone(&ctx), Arc::clone(&collections)).spawn();

        info!(
            target: "cellar::db",
            path = ?data_dir,
            collections = collections.len(),
            "Database opened"
        );

        Ok(Self {
            ctx,
            collections,
            data_dir,
            registry_lock: Mutex::new(()),
            sweeper: ParkingMutex::new(Some(sweeper)),
        })
    }

    /// Get a collection, creating it if it does not exist.
    pub async fn use_collection(&self, name: &str) -> Result<Arc<Collection>> {
        self.ctx.ensure_open()?;
        if let Some(existing) = self.collection(name) {
            return Ok(existing);
        }
        let _guard = self.registry_lock.lock().await;
        if let Some(existing) = self.collection(name) {
            return Ok(existing);
        }
        self.create_locked(name).await
    }

    /// Create a new collection.
    ///
    /// # Errors
    ///
    /// `NameAlreadyExists` if a collection with this name exists,
    /// `HashCollision` if the name derives the same id as another one.
    pub async fn create_collection(&self, name: &str) -> Result<Arc<Collection>> {
        self.ctx.ensure_open()?;
        let _guard = self.registry_lock.lock().await;
        if self.collections.contains_key(name) {
            return Err(Error::NameAlreadyExists(name.to_string()));
        }
        self.create_locked(name).await
    }

    async fn create_locked(&self, name: &str) -> Result<Arc<Collection>> {
        if name.is_empty() {
            return Err(Error::invalid_input("collection name must not be empty"));
        }
        if name.len() > keys::MAX_NAME_LEN {
            return Err(Error::invalid_input("collection name too long"));
        }
        let id = CollectionId::from_name(name);
        let clash = self
            .collections
            .iter()
            .find(|entry| entry.value().id() == id)
            .map(|entry| entry.key().clone());
        if let Some(other) = clash {
            return Err(Error::HashCollision(other, name.to_string()));
        }

        let collection = Arc::new(Collection::new(Arc::clone(&self.ctx), name, Vec::new()));
        collection.persist_meta().await?;
        self.collections
            .insert(name.to_string(), Arc::clone(&collection));
        info!(target: "cellar::db", collection = name, "Collection created");
        Ok(collection)
    }

    /// An open collection by name.
    pub fn collection(&self, name: &str) -> Option<Arc<Collection>> {
        self.collections.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Names of every collection, sorted.
    pub fn collections(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Remove a collection with its records, indexes and pending TTLs.
    pub async fn delete_collection(&self, name: &str) -> Result<()> {
        self.ctx.ensure_open()?;
        let _guard = self.registry_lock.lock().await;
        let (_, collection) = self
            .collections
            .remove(name)
            .ok_or_else(|| Error::not_found(format!("collection '{}'", name)))?;
        if let Err(e) = collection.drop_all().await {
            // still registered on disk; keep it reachable
            self.collections.insert(name.to_string(), collection);
            return Err(e);
        }
        info!(target: "cellar::db", collection = name, "Collection deleted");
        Ok(())
    }

    /// Chunked file storage sharing this database's write path.
    pub fn files(&self) -> FileStore {
        FileStore::new(Arc::clone(&self.ctx))
    }

    /// Active configuration.
    pub fn config(&self) -> &CellarConfig {
        &self.ctx.config
    }

    /// Data directory, if the database is backed by one.
    pub fn data_dir(&self) -> Option<&Path> {
        self.data_dir.as_deref()
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.ctx.is_closed()
    }

    /// Write a consistent backup of the whole store.
    ///
    /// Payloads stay encrypted in the backup.
    pub fn backup(&self, writer: &mut dyn Write) -> Result<()> {
        self.ctx.ensure_open()?;
        self.ctx.store.backup(writer)
    }

    /// Replace the store contents with a backup and reload collections.
    ///
    /// Writes submitted while the load runs may land on either side of it.
    pub async fn load(&self, reader: &mut dyn Read) -> Result<()> {
        self.ctx.ensure_open()?;
        let _guard = self.registry_lock.lock().await;
        self.ctx.store.load(reader)?;

        let restored = restore_collections(&self.ctx)?;
        let names: Vec<String> = restored.iter().map(|c| c.name().to_string()).collect();
        for collection in restored {
            match self.collection(collection.name()) {
                Some(open) => open.replace_indexes(collection.take_indexes()),
                None => {
                    self.collections
                        .insert(collection.name().to_string(), collection);
                }
            }
        }
        self.collections.retain(|name, _| names.contains(name));
        self.ctx.ttl_wake.notify_one();
        info!(target: "cellar::db", collections = names.len(), "Database loaded from backup");
        Ok(())
    }

    /// Stop background work, drain the writer and persist the snapshot.
    ///
    /// Every later operation fails with `ClosedDatabase`. Closing twice is
    /// a no-op.
    pub async fn close(&self) -> Result<()> {
        if self.ctx.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Some(sweeper) = self.sweeper.lock().take() {
            sweeper.abort();
        }
        self.ctx.writer.shutdown().await;

        if let Some(dir) = &self.data_dir {
            let path = dir.join(SNAPSHOT_FILE_NAME);
            let tmp = dir.join(format!("{}.tmp", SNAPSHOT_FILE_NAME));
            {
                let mut writer = BufWriter::new(std::fs::File::create(&tmp)?);
                self.ctx.store.backup(&mut writer)?;
                writer.flush()?;
            }
            std::fs::rename(&tmp, &path)?;
        }
        info!(target: "cellar::db", path = ?self.data_dir, "Database closed");
        Ok(())
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.lock().take() {
            sweeper.abort();
        }
        if !self.ctx.is_closed() && self.data_dir.is_some() {
            warn!(
                target: "cellar::db",
                path = ?self.data_dir,
                "Database dropped without close; snapshot not written"
            );
        }
    }
}

/// Rebuild every collection and its index contents from the store
fn restore_collections(ctx: &Arc<DbContext>) -> Result<Vec<Arc<Collection>>> {
    let view = ctx.store.view();
    let mut restored = Vec::new();
    for (key, sealed) in view.scan_prefix(&keys::collection_meta_prefix()) {
        let meta: CollectionMeta = rmp_serde::from_slice(&ctx.decrypt(&key, &sealed)?)?;
        restored.push(Arc::new(Collection::restore(Arc::clone(ctx), meta, view.as_ref())));
    }
    Ok(restored)
}
