//! Single-writer transaction coalescing
//!
//! The `WriteCoalescer` is the only task that writes to the store and the
//! only one that mutates secondary indexes. Callers submit transactions
//! through a [`WriteHandle`]; the coalescer gathers them into a batch and
//! commits the batch once.
//!
//! ## Batch window
//!
//! The task blocks on the first transaction, then keeps pulling more until
//! one of these closes the window:
//! - the batch holds `max_operations` operations
//! - the batch holds `max_batch_bytes` bytes
//! - `max_wait` has elapsed since the first transaction arrived
//! - the channel closed or a shutdown was requested
//!
//! A transaction is never split. A single transaction larger than the caps
//! is committed on its own.
//!
//! ## Commit
//!
//! All operations of the batch become one `KvStore::update` call. If it
//! fails, in-memory index changes of the batch are rolled back and every
//! transaction receives the same error.
//!
//! `Retarget` operations read the back-reference they replace at commit
//! time, seeing writes staged earlier in the same batch. Two writers of
//! the same record therefore never leave a queue entry behind that the
//! last write did not ask for.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cellar_core::{BatchOp, Error, KvStore, Result, SnapshotView};
use cellar_storage::{IndexChange, SecondaryIndex, StorageCodec};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::transaction::{Operation, WriteTransaction};

/// Batching limits for the coalescer
#[derive(Debug, Clone)]
pub struct CoalescerConfig {
    /// Operation count that closes a batch
    pub max_operations: usize,
    /// Byte size that closes a batch
    pub max_batch_bytes: usize,
    /// Longest a batch stays open after its first transaction
    pub max_wait: Duration,
    /// Capacity of the submission channel
    pub queue_depth: usize,
}

impl Default for CoalescerConfig {
    fn default() -> Self {
        Self {
            max_operations: 1000,
            max_batch_bytes: 4 * 1024 * 1024,
            max_wait: Duration::from_millis(2),
            queue_depth: 1024,
        }
    }
}

/// Transactions collected for the next commit
#[derive(Debug)]
pub struct Accumulator {
    transactions: Vec<WriteTransaction>,
    operations: usize,
    bytes: usize,
    deadline: Instant,
}

impl Accumulator {
    /// Open a window with its first transaction
    pub fn new(first: WriteTransaction, deadline: Instant) -> Self {
        let mut acc = Self {
            transactions: Vec::new(),
            operations: 0,
            bytes: 0,
            deadline,
        };
        acc.push(first);
        acc
    }

    /// Add a transaction to the window
    pub fn push(&mut self, txn: WriteTransaction) {
        self.operations += txn.len();
        self.bytes += txn.size();
        self.transactions.push(txn);
    }

    /// Whether a size cap has been reached
    pub fn should_flush(&self, config: &CoalescerConfig) -> bool {
        self.operations >= config.max_operations || self.bytes >= config.max_batch_bytes
    }

    /// When the window closes
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Operations collected so far
    pub fn operations(&self) -> usize {
        self.operations
    }

    /// Bytes collected so far
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    /// Transactions collected so far
    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    /// Whether the window is empty
    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    fn into_transactions(self) -> Vec<WriteTransaction> {
        self.transactions
    }
}

enum Message {
    Write(WriteTransaction),
    Shutdown(oneshot::Sender<()>),
}

/// Cloneable submission side of the coalescer
#[derive(Clone)]
pub struct WriteHandle {
    sender: mpsc::Sender<Message>,
    closed: Arc<AtomicBool>,
}

impl WriteHandle {
    /// Submit `operations` as one transaction and wait for the commit.
    ///
    /// Returns `Timeout` if no result arrives before `timeout`. The write
    /// may still be committed after a timeout.
    pub async fn submit(&self, operations: Vec<Operation>, timeout: Duration) -> Result<()> {
        self.send(operations, None, timeout).await
    }

    /// Like [`submit`](Self::submit), but the transaction is skipped with
    /// `NotFound` unless `key` exists when its batch is committed.
    pub async fn submit_if_present(
        &self,
        operations: Vec<Operation>,
        key: Vec<u8>,
        timeout: Duration,
    ) -> Result<()> {
        self.send(operations, Some(key), timeout).await
    }

    async fn send(
        &self,
        operations: Vec<Operation>,
        require: Option<Vec<u8>>,
        timeout: Duration,
    ) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ClosedDatabase);
        }
        if operations.is_empty() {
            return Ok(());
        }

        let deadline = Instant::now() + timeout;
        let (tx, rx) = oneshot::channel();
        let mut txn = WriteTransaction::new(operations, tx);
        if let Some(key) = require {
            txn = txn.require_key(key);
        }

        match timeout_at(deadline, self.sender.send(Message::Write(txn))).await {
            Err(_) => return Err(Error::Timeout),
            Ok(Err(_)) => return Err(Error::ClosedDatabase),
            Ok(Ok(())) => {}
        }
        match timeout_at(deadline, rx).await {
            Err(_) => Err(Error::Timeout),
            Ok(Err(_)) => Err(Error::ClosedDatabase),
            Ok(Ok(result)) => result,
        }
    }

    /// Stop accepting writes, commit what is queued and stop the task
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let (tx, rx) = oneshot::channel();
        if self.sender.send(Message::Shutdown(tx)).await.is_ok() {
            let _ = rx.await;
        }
    }

    /// Whether shutdown has been requested
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.sender.is_closed()
    }
}

impl std::fmt::Debug for WriteHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteHandle")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// The single writer
pub struct WriteCoalescer {
    committer: Committer,
    config: CoalescerConfig,
    receiver: mpsc::Receiver<Message>,
}

impl WriteCoalescer {
    /// Start the writer task on the current tokio runtime
    pub fn spawn(
        store: Arc<dyn KvStore>,
        codec: Arc<dyn StorageCodec>,
        config: CoalescerConfig,
    ) -> (WriteHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(config.queue_depth.max(1));
        let coalescer = Self {
            committer: Committer { store, codec },
            config,
            receiver,
        };
        let handle = WriteHandle {
            sender,
            closed: Arc::new(AtomicBool::new(false)),
        };
        (handle, tokio::spawn(coalescer.run()))
    }

    async fn run(mut self) {
        info!(
            max_operations = self.config.max_operations,
            max_batch_bytes = self.config.max_batch_bytes,
            max_wait_ms = self.config.max_wait.as_millis() as u64,
            codec = self.committer.codec.codec_id(),
            "Write coalescer started"
        );

        let mut stop_ack = None;
        while stop_ack.is_none() {
            let first = match self.receiver.recv().await {
                Some(Message::Write(txn)) => txn,
                Some(Message::Shutdown(ack)) => {
                    stop_ack = Some(ack);
                    break;
                }
                None => break,
            };

            let mut acc = Accumulator::new(first, Instant::now() + self.config.max_wait);
            let mut channel_closed = false;
            while !acc.should_flush(&self.config) {
                let next = match self.receiver.try_recv() {
                    Ok(message) => Some(message),
                    Err(TryRecvError::Disconnected) => None,
                    Err(TryRecvError::Empty) => {
                        match timeout_at(acc.deadline(), self.receiver.recv()).await {
                            Ok(message) => message,
                            // window elapsed
                            Err(_) => break,
                        }
                    }
                };
                match next {
                    Some(Message::Write(txn)) => acc.push(txn),
                    Some(Message::Shutdown(ack)) => {
                        stop_ack = Some(ack);
                        break;
                    }
                    None => {
                        channel_closed = true;
                        break;
                    }
                }
            }

            self.flush(acc).await;
            if channel_closed {
                break;
            }
        }

        self.receiver.close();
        // Transactions still queued are dropped; their callers see ClosedDatabase
        while self.receiver.try_recv().is_ok() {}
        info!("Write coalescer stopped");
        if let Some(ack) = stop_ack {
            let _ = ack.send(());
        }
    }

    /// Commit one window and answer every transaction in it.
    ///
    /// Encryption and the store update run on the blocking pool. The next
    /// window is not opened until this one is answered.
    async fn flush(&self, acc: Accumulator) {
        let operations = acc.operations();
        let bytes = acc.bytes();
        let transactions = acc.into_transactions();
        let batch_size = transactions.len();

        let mut responses = Vec::with_capacity(batch_size);
        let mut pending = Vec::with_capacity(batch_size);
        for txn in transactions {
            responses.push(txn.response);
            pending.push((txn.operations, txn.require));
        }

        let committer = self.committer.clone();
        let joined = tokio::task::spawn_blocking(move || committer.commit(pending)).await;
        let (skipped, result) = match joined {
            Ok(outcome) => outcome,
            Err(e) => (Vec::new(), Err(Error::storage(format!("commit task failed: {}", e)))),
        };
        match &result {
            Ok(()) => debug!(batch_size, operations, bytes, "Batch committed"),
            Err(e) => warn!(batch_size, operations, error = %e, "Batch commit failed"),
        }

        for (i, response) in responses.into_iter().enumerate() {
            let outcome = match skipped.get(i).cloned().flatten() {
                Some(err) => Err(err),
                None => result.clone(),
            };
            // A dropped receiver means the caller gave up waiting
            let _ = response.send(outcome);
        }
    }
}

/// Store and codec the commit runs against, moved onto the blocking pool
#[derive(Clone)]
struct Committer {
    store: Arc<dyn KvStore>,
    codec: Arc<dyn StorageCodec>,
}

/// Writes of the batch built so far
#[derive(Default)]
struct Staging {
    batch: Vec<BatchOp>,
    /// Keys written earlier in the batch, and whether they now exist
    present: HashMap<Vec<u8>, bool>,
    /// Back-references written earlier in the batch, as plaintext
    refs: HashMap<Vec<u8>, Option<Vec<u8>>>,
    undo: Vec<(Arc<SecondaryIndex>, String, IndexChange)>,
}

impl Committer {
    /// Apply every transaction as one store update.
    ///
    /// Returns, per transaction, the error it was skipped with because its
    /// precondition failed, plus the result of the store update.
    fn commit(
        &self,
        transactions: Vec<(Vec<Operation>, Option<Vec<u8>>)>,
    ) -> (Vec<Option<Error>>, Result<()>) {
        let view = self.store.view();
        let mut staging = Staging::default();
        let mut skipped = Vec::with_capacity(transactions.len());
        let mut result = Ok(());

        for (operations, require) in transactions {
            if result.is_err() {
                skipped.push(None);
                continue;
            }
            if let Some(key) = &require {
                let present = staging
                    .present
                    .get(key)
                    .copied()
                    .unwrap_or_else(|| view.get(key).is_some());
                if !present {
                    skipped.push(Some(Error::not_found("write precondition")));
                    continue;
                }
            }

            for op in operations {
                if let Err(e) = self.stage(op, view.as_ref(), &mut staging) {
                    result = Err(e);
                    break;
                }
            }
            skipped.push(None);
        }

        if result.is_ok() {
            result = self.store.update(staging.batch);
        }
        if result.is_err() {
            for (index, id, change) in staging.undo.iter().rev() {
                index.revert(id, change);
            }
        }
        (skipped, result)
    }

    fn stage(&self, op: Operation, view: &dyn SnapshotView, staging: &mut Staging) -> Result<()> {
        match op {
            Operation::Put { key, value } => {
                let sealed = self.codec.encode(&key, &value)?;
                staging.present.insert(key.clone(), true);
                staging.batch.push(BatchOp::Put { key, value: sealed });
            }
            Operation::Delete { key } => {
                staging.present.insert(key.clone(), false);
                staging.refs.remove(&key);
                staging.batch.push(BatchOp::Delete { key });
            }
            Operation::Reindex { index, id, value } => {
                let change = index.reindex(&id, value);
                staging.batch.extend(index.batch_ops(&id, &change));
                staging.undo.push((index, id, change));
            }
            Operation::Retarget { ref_key, queue_key } => {
                let previous = self.current_ref(&ref_key, view, staging)?;
                if let Some(old) = previous.as_ref().filter(|old| Some(*old) != queue_key.as_ref()) {
                    staging.present.insert(old.clone(), false);
                    staging.batch.push(BatchOp::Delete { key: old.clone() });
                }
                match &queue_key {
                    Some(queue_key) => {
                        let marker = self.codec.encode(queue_key, &[])?;
                        let pointer = self.codec.encode(&ref_key, queue_key)?;
                        staging.present.insert(queue_key.clone(), true);
                        staging.present.insert(ref_key.clone(), true);
                        staging.batch.push(BatchOp::Put {
                            key: queue_key.clone(),
                            value: marker,
                        });
                        staging.batch.push(BatchOp::Put {
                            key: ref_key.clone(),
                            value: pointer,
                        });
                    }
                    None if previous.is_some() => {
                        staging.present.insert(ref_key.clone(), false);
                        staging.batch.push(BatchOp::Delete { key: ref_key.clone() });
                    }
                    None => {}
                }
                staging.refs.insert(ref_key, queue_key);
            }
        }
        Ok(())
    }

    /// Queue entry `ref_key` points at once the staged writes are applied
    fn current_ref(
        &self,
        ref_key: &[u8],
        view: &dyn SnapshotView,
        staging: &Staging,
    ) -> Result<Option<Vec<u8>>> {
        if let Some(staged) = staging.refs.get(ref_key) {
            return Ok(staged.clone());
        }
        if staging.present.get(ref_key) == Some(&false) {
            return Ok(None);
        }
        view.get(ref_key)
            .map(|sealed| self.codec.decode(ref_key, &sealed))
            .transpose()
    }
}
