//! Background persistence of history snapshots.
//!
//! Store writes are blocking, so they run on tokio's blocking pool. Each
//! snapshot gets a sequence number when it is taken; a write whose number is
//! not newer than the last completed one is skipped, so saves finishing out
//! of order never roll the stored history back.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::warn;

use finchat_storage::PersistenceGateway;

use crate::session::log_persistence_failure;
use crate::store::Snapshot;

pub(crate) struct HistoryWriter {
    gateway: Arc<PersistenceGateway>,
    issued: AtomicU64,
    written: Arc<Mutex<u64>>,
}

impl HistoryWriter {
    pub(crate) fn new(gateway: Arc<PersistenceGateway>) -> Self {
        Self {
            gateway,
            issued: AtomicU64::new(0),
            written: Arc::new(Mutex::new(0)),
        }
    }

    /// Number `snapshot` for saving. Call while the snapshot is still current.
    pub(crate) fn prepare(&self, snapshot: Snapshot) -> PendingSave {
        PendingSave {
            seq: self.issued.fetch_add(1, Ordering::SeqCst) + 1,
            snapshot,
            gateway: self.gateway.clone(),
            written: self.written.clone(),
        }
    }

    /// Run `f` with no save in progress and invalidate every pending save.
    pub(crate) fn fence<T>(&self, f: impl FnOnce() -> T) -> T {
        let mut written = self.written.lock().unwrap_or_else(PoisonError::into_inner);
        *written = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        f()
    }
}

pub(crate) struct PendingSave {
    seq: u64,
    snapshot: Snapshot,
    gateway: Arc<PersistenceGateway>,
    written: Arc<Mutex<u64>>,
}

impl PendingSave {
    /// Write on the blocking pool and wait for it.
    pub(crate) async fn run(self) {
        if let Err(e) = tokio::task::spawn_blocking(move || self.write()).await {
            warn!(error = %e, "History save task failed");
        }
    }

    /// Write without waiting. Outside a runtime the write happens inline.
    pub(crate) fn detach(self) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || self.write());
            }
            Err(_) => self.write(),
        }
    }

    fn write(self) {
        let mut last = self.written.lock().unwrap_or_else(PoisonError::into_inner);
        if self.seq <= *last {
            return;
        }
        if let Err(e) = self.gateway.save_messages(&self.snapshot) {
            log_persistence_failure("save messages", &e);
        }
        *last = self.seq;
    }
}
