//! TTL bookkeeping and the background sweeper
//!
//! # Layout
//!
//! An expiring record or file has two keys:
//! - a queue entry `[0x02] time kind target`, ordered by expiry time
//! - a back-reference from the record or file to its queue entry
//!
//! Rewriting the record replaces both, so an overwrite without a TTL
//! cancels the pending expiry. The writer resolves which entry is replaced
//! when it commits, so overwrites sharing a batch see each other.
//!
//! # Sweeper
//!
//! - Scans the queue up to "now" and expires due entries through the
//!   normal write path, guarded on the queue entry still existing
//! - Sleeps until the next entry is due, at most `ttl_max_interval_ms`
//! - Is woken early when a write registers a TTL
//! - Errors are logged and the pass is retried on the next wake

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use cellar_concurrency::Operation;
use cellar_core::keys::{self, TtlTarget};
use cellar_core::{Error, Result, SnapshotView};

use crate::collection::Collection;
use crate::database::DbContext;
use crate::files;

/// Expiry time `ttl` from now
pub(crate) fn expiry_after(ttl: Duration) -> Result<DateTime<Utc>> {
    let delta = chrono::Duration::from_std(ttl)
        .map_err(|_| Error::invalid_input("TTL out of range"))?;
    Utc::now()
        .checked_add_signed(delta)
        .ok_or_else(|| Error::invalid_input("TTL out of range"))
}

/// Operation moving the TTL behind `ref_key` to `next`, or clearing it.
///
/// The entry it replaces is looked up by the writer when the operation is
/// committed, not here.
pub(crate) fn retarget(ref_key: Vec<u8>, next: Option<(DateTime<Utc>, TtlTarget)>) -> Operation {
    Operation::retarget(ref_key, next.map(|(at, target)| keys::ttl_key(at, &target)))
}

/// Whether `ref_key` still points at `queue_key`
pub(crate) fn is_current(
    ctx: &DbContext,
    view: &dyn SnapshotView,
    ref_key: &[u8],
    queue_key: &[u8],
) -> Result<bool> {
    Ok(ctx.read(view, ref_key)?.as_deref() == Some(queue_key))
}

/// Background task expiring due TTL entries
pub(crate) struct TtlSweeper {
    ctx: Arc<DbContext>,
    collections: Arc<DashMap<String, Arc<Collection>>>,
}

impl TtlSweeper {
    pub(crate) fn new(ctx: Arc<DbContext>, collections: Arc<DashMap<String, Arc<Collection>>>) -> Self {
        Self { ctx, collections }
    }

    pub(crate) fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        let max_interval = self.ctx.config.ttl_max_interval();
        info!(max_interval_ms = max_interval.as_millis() as u64, "TTL sweeper started");

        while !self.ctx.is_closed() {
            let wait = match self.sweep().await {
                Ok(Some(next)) => (next - Utc::now())
                    .to_std()
                    .unwrap_or(Duration::ZERO)
                    .min(max_interval),
                Ok(None) => max_interval,
                Err(e) => {
                    warn!(error = %e, "TTL sweep failed");
                    max_interval
                }
            };
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = self.ctx.ttl_wake.notified() => {}
            }
        }
        debug!("TTL sweeper stopped");
    }

    /// Expire every due entry, up to one batch per pass.
    ///
    /// Returns when the next entry is due, if any remain.
    async fn sweep(&self) -> Result<Option<DateTime<Utc>>> {
        let now = Utc::now();
        let view = self.ctx.store.view();
        let batch = self.ctx.config.max_batch_operations;
        let due: Vec<Vec<u8>> = view
            .scan_range(&keys::ttl_prefix(), &keys::ttl_due_bound(now))
            .into_iter()
            .take(batch)
            .map(|(key, _)| key)
            .collect();

        if !due.is_empty() {
            let count = due.len();
            let mut tasks = JoinSet::new();
            for queue_key in due {
                let Some((_, target)) = keys::parse_ttl_key(&queue_key) else {
                    warn!("Dropping malformed TTL entry");
                    let ctx = Arc::clone(&self.ctx);
                    tasks.spawn(async move {
                        ctx.submit(vec![Operation::delete(queue_key)]).await
                    });
                    continue;
                };
                match target {
                    TtlTarget::Record { collection, id } => {
                        let ctx = Arc::clone(&self.ctx);
                        let owner = self
                            .collections
                            .get(&collection)
                            .map(|entry| Arc::clone(entry.value()));
                        tasks.spawn(async move {
                            match owner {
                                Some(owner) => owner.expire(&id, queue_key).await,
                                None => {
                                    let ops = vec![Operation::delete(queue_key.clone())];
                                    ctx.submit_if_present(ops, queue_key).await
                                }
                            }
                        });
                    }
                    TtlTarget::File { id } => {
                        let ctx = Arc::clone(&self.ctx);
                        tasks.spawn(async move { files::expire(&ctx, &id, queue_key).await });
                    }
                }
            }

            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(Ok(())) | Ok(Err(Error::NotFound(_))) => {}
                    Ok(Err(e)) => warn!(error = %e, "TTL expiry failed"),
                    Err(e) => warn!(error = %e, "TTL expiry task failed"),
                }
            }
            debug!(count, "TTL sweep pass");
            if count == batch {
                // more may be due already
                return Ok(Some(now));
            }
        }

        let view = self.ctx.store.view();
        let next = view
            .first_in_range(&keys::ttl_prefix(), &[keys::TTL_PREFIX + 1])
            .and_then(|(key, _)| keys::parse_ttl_key(&key))
            .map(|(at, _)| at);
        Ok(next)
    }
}
