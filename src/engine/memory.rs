//! In-process engine driven explicitly by its owner.
//!
//! [`MemoryEngine`] keeps transfer records in memory and never touches the
//! network. Callers move records through their states (`begin`, `progress`,
//! `succeed`, `fail`, ...) and each terminal transition raises the same
//! [`EngineEvent::Completed`] a real engine would. `succeed` writes the
//! destination file so that composite items see a real artifact on disk.

use std::collections::BTreeMap;
use std::fs;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::{
    DownloadEngine, EVENT_CHANNEL_CAPACITY, EngineError, EngineEvent, EngineId, EngineRecord,
    EngineRequest, EngineStatus,
};

/// Scriptable in-memory transfer engine.
#[derive(Debug)]
pub struct MemoryEngine {
    records: Mutex<BTreeMap<EngineId, EngineRecord>>,
    requests: Mutex<Vec<EngineRequest>>,
    next_id: AtomicU64,
    submissions: AtomicUsize,
    events: broadcast::Sender<EngineEvent>,
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEngine {
    /// Creates an empty engine.
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            records: Mutex::new(BTreeMap::new()),
            requests: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            submissions: AtomicUsize::new(0),
            events,
        }
    }

    /// Number of requests accepted so far.
    #[must_use]
    pub fn submissions(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }

    /// Requests accepted so far, in submission order.
    #[must_use]
    pub fn requests(&self) -> Vec<EngineRequest> {
        self.requests
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Returns the id of the record for `url`.
    #[must_use]
    pub fn id_for(&self, url: &str) -> Option<EngineId> {
        self.find_by_url(url).map(|record| record.id)
    }

    /// Moves a record to RUNNING with a known total size.
    pub fn begin(&self, id: EngineId, total_bytes: u64) -> bool {
        self.update(id, |record| {
            record.status = EngineStatus::Running;
            record.total_bytes = total_bytes;
        })
    }

    /// Updates the transferred byte count of a record.
    pub fn progress(&self, id: EngineId, downloaded_bytes: u64) -> bool {
        self.update(id, |record| {
            record.status = EngineStatus::Running;
            record.downloaded_bytes = downloaded_bytes;
        })
    }

    /// Pauses a record.
    pub fn pause(&self, id: EngineId) -> bool {
        self.update(id, |record| record.status = EngineStatus::Paused)
    }

    /// Sets an arbitrary engine status code on a record.
    pub fn set_status(&self, id: EngineId, status: EngineStatus) -> bool {
        self.update(id, |record| record.status = status)
    }

    /// Completes a record successfully, writes its destination file and raises
    /// a completion event.
    pub fn succeed(&self, id: EngineId) -> bool {
        let mut destination = None;
        let mut size = 0;
        let updated = self.update(id, |record| {
            if record.total_bytes == 0 {
                record.total_bytes = record.downloaded_bytes;
            }
            record.downloaded_bytes = record.total_bytes;
            record.status = EngineStatus::Successful;
            destination = Some(record.destination.clone());
            size = record.total_bytes;
        });
        if let Some(path) = destination {
            let written = usize::try_from(size).unwrap_or(0);
            if let Err(error) = fs::write(&path, vec![0u8; written]) {
                warn!(path = %path.display(), %error, "failed to write artifact");
            }
            self.emit(EngineEvent::Completed(id));
        }
        updated
    }

    /// Fails a record and raises a completion event.
    pub fn fail(&self, id: EngineId) -> bool {
        let updated = self.update(id, |record| record.status = EngineStatus::Failed);
        if updated {
            self.emit(EngineEvent::Completed(id));
        }
        updated
    }

    /// Drops a record without raising any event, as an engine does when it
    /// prunes old entries.
    pub fn purge(&self, id: EngineId) -> bool {
        self.lock_records().remove(&id).is_some()
    }

    /// Raises a completion event for `id` without touching its record.
    pub fn raise_completed(&self, id: EngineId) {
        self.emit(EngineEvent::Completed(id));
    }

    /// Simulates a click on the notification of running transfers.
    pub fn click_running(&self, ids: Vec<EngineId>) {
        self.emit(EngineEvent::RunningNotificationClicked(ids));
    }

    /// Simulates a click on the notification of a completed transfer.
    pub fn click_completed(&self, id: EngineId) {
        self.emit(EngineEvent::CompletedNotificationClicked(id));
    }

    fn update(&self, id: EngineId, apply: impl FnOnce(&mut EngineRecord)) -> bool {
        let mut records = self.lock_records();
        match records.get_mut(&id) {
            Some(record) => {
                apply(record);
                true
            }
            None => false,
        }
    }

    fn emit(&self, event: EngineEvent) {
        // No subscribers is fine: nobody is routing events yet.
        let _ = self.events.send(event);
    }

    fn lock_records(&self) -> std::sync::MutexGuard<'_, BTreeMap<EngineId, EngineRecord>> {
        self.records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl DownloadEngine for MemoryEngine {
    fn enqueue(&self, request: EngineRequest) -> Result<EngineId, EngineError> {
        if url::Url::parse(&request.url).is_err() {
            return Err(EngineError::invalid_url(request.url));
        }
        let id = EngineId(self.next_id.fetch_add(1, Ordering::SeqCst));
        debug!(engine_id = %id, url = %request.url, "memory engine accepted request");
        self.lock_records()
            .insert(id, EngineRecord::pending(id, &request));
        self.requests
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(request);
        self.submissions.fetch_add(1, Ordering::SeqCst);
        Ok(id)
    }

    fn query(&self, id: EngineId) -> Option<EngineRecord> {
        self.lock_records().get(&id).cloned()
    }

    fn query_all(&self) -> Vec<EngineRecord> {
        self.lock_records().values().cloned().collect()
    }

    fn remove(&self, id: EngineId) -> bool {
        let Some(record) = self.lock_records().remove(&id) else {
            return false;
        };
        if record.destination.exists() {
            let _ = fs::remove_file(&record.destination);
        }
        self.emit(EngineEvent::Completed(id));
        true
    }

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }
}
