//! Favourite set with a best-effort offline mirror
//!
//! The in-memory set is the source of truth. Every toggle queues a write for
//! the `OfflineStore`; one task applies the queue in toggle order, so the
//! last toggle of an id is also the last write for it. A failed write is
//! logged and never rolled back, so the two may diverge until the next
//! `reconcile`.

use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::{mpsc, oneshot};

use crate::storage::OfflineStore;

/// Outcome of a reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Cached snapshots removed because the id is no longer a favourite
    pub removed: Vec<String>,
    /// Favourites that have no cached snapshot
    pub missing: Vec<String>,
}

enum MirrorOp {
    Put { id: String, snapshot: serde_json::Value },
    Delete { id: String },
    Flush(oneshot::Sender<()>),
}

#[derive(Clone)]
pub struct FavouritesSync {
    favourites: Arc<RwLock<HashSet<String>>>,
    store: OfflineStore,
    mirror_tx: mpsc::UnboundedSender<MirrorOp>,
}

impl FavouritesSync {
    /// Must be called from within a tokio runtime; the mirror task lives
    /// until the last clone is dropped.
    pub fn new(store: OfflineStore, initial: impl IntoIterator<Item = String>) -> Self {
        let (mirror_tx, mirror_rx) = mpsc::unbounded_channel();
        tokio::spawn(apply_mirror_ops(store.clone(), mirror_rx));
        Self {
            favourites: Arc::new(RwLock::new(initial.into_iter().collect())),
            store,
            mirror_tx,
        }
    }

    pub fn is_favourite(&self, id: &str) -> bool {
        self.favourites
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(id)
    }

    pub fn favourites(&self) -> Vec<String> {
        let mut ids: Vec<_> = self
            .favourites
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Flip membership of `id` and return the new membership.
    ///
    /// The set changes before this returns; the store write is queued and
    /// may land after the caller has moved on.
    pub fn toggle_favourite(&self, id: &str, snapshot: Option<serde_json::Value>) -> bool {
        let mut set = self
            .favourites
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let now_favourite = if set.remove(id) {
            false
        } else {
            set.insert(id.to_string());
            true
        };
        // Queue while the set is locked so queue order matches toggle order.
        self.mirror(id.to_string(), now_favourite, snapshot);
        now_favourite
    }

    fn mirror(&self, id: String, favourite: bool, snapshot: Option<serde_json::Value>) {
        let op = match (favourite, snapshot) {
            (true, Some(snapshot)) => MirrorOp::Put { id, snapshot },
            (true, None) => {
                tracing::debug!(recipe_id = %id, "Favourited without a snapshot, nothing cached");
                return;
            }
            (false, _) => MirrorOp::Delete { id },
        };
        if self.mirror_tx.send(op).is_err() {
            tracing::warn!("Offline mirror has stopped, favourite not mirrored");
        }
    }

    /// Wait until every write queued so far has been applied
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.mirror_tx.send(MirrorOp::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }

    /// Bring the store back in line with the favourite set.
    ///
    /// Snapshots for ids that are no longer favourites are deleted; favourites
    /// without a snapshot are reported so a caller can fetch and cache them.
    pub async fn reconcile(&self) -> anyhow::Result<ReconcileReport> {
        self.flush().await;
        let favourites: HashSet<String> = self.favourites().into_iter().collect();
        let cached = self.store.ids().await?;
        let cached_set: HashSet<&String> = cached.iter().collect();

        let mut report = ReconcileReport::default();
        for id in &cached {
            if !favourites.contains(id) {
                self.store.delete(id).await?;
                report.removed.push(id.clone());
            }
        }
        report.missing = favourites
            .iter()
            .filter(|id| !cached_set.contains(id))
            .cloned()
            .collect();
        report.missing.sort();

        if !report.removed.is_empty() || !report.missing.is_empty() {
            tracing::info!(
                removed = report.removed.len(),
                missing = report.missing.len(),
                "Reconciled offline cache with favourites"
            );
        }
        Ok(report)
    }
}

async fn apply_mirror_ops(store: OfflineStore, mut ops: mpsc::UnboundedReceiver<MirrorOp>) {
    while let Some(op) = ops.recv().await {
        match op {
            MirrorOp::Put { id, snapshot } => {
                if let Err(e) = store.put(&id, snapshot).await {
                    tracing::warn!(recipe_id = %id, error = %e, "Failed to cache favourite for offline use");
                }
            }
            MirrorOp::Delete { id } => {
                if let Err(e) = store.delete(&id).await {
                    tracing::warn!(recipe_id = %id, error = %e, "Failed to drop unfavourited recipe from offline cache");
                }
            }
            MirrorOp::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    tracing::debug!("Offline mirror stopped");
}
