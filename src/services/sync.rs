use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::error::StoreError;
use crate::models::ReceiptRecord;
use crate::services::connectivity::Connectivity;
use crate::services::gemini::ReceiptExtractor;
use crate::services::store::ReceiptStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Offline,
    NothingPending,
    AlreadyRunning,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub attempted: usize,
    pub synced: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Skipped(SkipReason),
    Completed(SyncReport),
}

/// Reconciles pending receipts with the extraction client.
///
/// Passes never overlap: a pass requested while another is running is
/// skipped with [`SkipReason::AlreadyRunning`].
pub struct SyncCoordinator {
    store: Arc<ReceiptStore>,
    extractor: Arc<dyn ReceiptExtractor>,
    connectivity: Arc<Connectivity>,
    syncing: AtomicBool,
}

struct SyncingGuard<'a>(&'a AtomicBool);

impl Drop for SyncingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl SyncCoordinator {
    pub fn new(
        store: Arc<ReceiptStore>,
        extractor: Arc<dyn ReceiptExtractor>,
        connectivity: Arc<Connectivity>,
    ) -> Self {
        SyncCoordinator {
            store,
            extractor,
            connectivity,
            syncing: AtomicBool::new(false),
        }
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::Acquire)
    }

    /// Runs one sync pass over every pending record, one at a time. Results
    /// are written back in a single store mutation at the end of the pass.
    pub async fn sync_pending(&self) -> Result<SyncOutcome, StoreError> {
        if !self.connectivity.is_online() {
            return Ok(SyncOutcome::Skipped(SkipReason::Offline));
        }
        if self
            .syncing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Sync pass already running");
            return Ok(SyncOutcome::Skipped(SkipReason::AlreadyRunning));
        }
        let _guard = SyncingGuard(&self.syncing);

        let pending = self.store.pending()?;
        if pending.is_empty() {
            return Ok(SyncOutcome::Skipped(SkipReason::NothingPending));
        }

        info!(count = pending.len(), "Syncing receipts");
        let mut report = SyncReport {
            attempted: pending.len(),
            ..SyncReport::default()
        };

        let mut extracted = Vec::with_capacity(pending.len());
        for record in &pending {
            let Some(image) = record.pending_image() else {
                warn!(id = record.id, "Pending receipt has no image payload");
                report.failed += 1;
                continue;
            };
            match self.extractor.extract(&image, record.data.currency).await {
                Ok(data) => extracted.push((record.id, data)),
                Err(err) => {
                    warn!(id = record.id, error = %err, "Failed to sync receipt");
                    report.failed += 1;
                }
            }
        }

        report.synced = self.store.mutate(|records| {
            let mut applied = 0;
            for (id, data) in extracted {
                match records.iter_mut().find(|r| r.id == id && r.is_pending()) {
                    Some(slot) => {
                        *slot = ReceiptRecord::synced(id, data);
                        applied += 1;
                    }
                    None => debug!(id, "Receipt deleted during sync pass"),
                }
            }
            applied
        })?;

        info!(synced = report.synced, failed = report.failed, "Sync complete");
        Ok(SyncOutcome::Completed(report))
    }

    /// Startup trigger: sync when already online and the store is not empty.
    pub async fn sync_on_startup(&self) -> Result<SyncOutcome, StoreError> {
        if !self.connectivity.is_online() {
            return Ok(SyncOutcome::Skipped(SkipReason::Offline));
        }
        if self.store.is_empty()? {
            return Ok(SyncOutcome::Skipped(SkipReason::NothingPending));
        }
        self.sync_pending().await
    }

    /// Runs a sync pass on every offline to online transition until the
    /// connectivity signal is dropped.
    /// The subscription is taken when this is called, so no edge after the
    /// call is missed even if the returned future is polled later.
    pub fn run_on_reconnect(self: Arc<Self>) -> impl Future<Output = ()> + Send {
        let mut rx = self.connectivity.subscribe();
        async move {
            while rx.changed().await.is_ok() {
                let online = *rx.borrow_and_update();
                if !online {
                    continue;
                }
                match self.sync_pending().await {
                    Ok(outcome) => debug!(?outcome, "Reconnect sync finished"),
                    Err(err) => error!(error = %err, "Reconnect sync failed"),
                }
            }
        }
    }
}
