//! Observable per-download lifecycle state.
//!
//! The [`LifecycleRegistry`] maps a download's identifier to a
//! [`LifecycleCell`] that tracks whether the download was STARTED, has
//! COMPLETED, or is DELETED. Items update the cells as a side effect of
//! their operations; front-ends observe them.
//!
//! Cells are created lazily with the DELETED default and live until they are
//! removed explicitly ([`LifecycleRegistry::remove`], [`LifecycleRegistry::clear`]).
//! A cell notifies observers synchronously, and only when its value changes.
//! Transitions of one cell are serialized: observers see every change in the
//! order it was applied. An observer must not set the cell it observes.
//!
//! # Example
//!
//! ```
//! use course_downloader::download::DownloadIdentifier;
//! use course_downloader::lifecycle::{LifecycleRegistry, LifecycleState};
//!
//! let registry = LifecycleRegistry::new();
//! let cell = registry.of(&DownloadIdentifier::new("https://example.com/a.pdf"));
//! assert_eq!(cell.value(), LifecycleState::Deleted);
//!
//! cell.observe_once(|state| state == LifecycleState::Completed);
//! cell.started();
//! cell.completed();
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::debug;

use crate::download::DownloadIdentifier;

/// Lifecycle code of one download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Submitted to the engine.
    Started,
    /// The engine finished and the item is no longer running.
    Completed,
    /// No download exists (initial state).
    #[default]
    Deleted,
}

impl LifecycleState {
    /// Returns the stable string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Completed => "completed",
            Self::Deleted => "deleted",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Handle returned by [`LifecycleCell::observe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Observer callback. Returning true unsubscribes it.
type Observer = Arc<dyn Fn(LifecycleState) -> bool + Send + Sync>;

/// One observable lifecycle cell.
pub struct LifecycleCell {
    key: String,
    sender: watch::Sender<LifecycleState>,
    /// Held across a state change and its notifications.
    transition: Mutex<()>,
    observers: Mutex<Vec<(ObserverId, Observer)>>,
    next_observer: AtomicU64,
}

impl fmt::Debug for LifecycleCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleCell")
            .field("key", &self.key)
            .field("value", &self.value())
            .field("observers", &self.lock_observers().len())
            .finish()
    }
}

impl LifecycleCell {
    fn new(key: String) -> Self {
        let (sender, _) = watch::channel(LifecycleState::default());
        Self {
            key,
            sender,
            transition: Mutex::new(()),
            observers: Mutex::new(Vec::new()),
            next_observer: AtomicU64::new(0),
        }
    }

    /// Key of the cell (the identifier's string form).
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Current state.
    #[must_use]
    pub fn value(&self) -> LifecycleState {
        *self.sender.borrow()
    }

    /// Sets the state. Observers run synchronously if the value changed.
    pub fn set(&self, state: LifecycleState) {
        let _transition = self
            .transition
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let changed = self.sender.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
        if !changed {
            return;
        }

        debug!(key = %self.key, %state, "lifecycle state changed");

        let snapshot: Vec<(ObserverId, Observer)> = self.lock_observers().clone();
        let finished: Vec<ObserverId> = snapshot
            .into_iter()
            .filter_map(|(id, observer)| observer(state).then_some(id))
            .collect();
        if !finished.is_empty() {
            self.lock_observers()
                .retain(|(id, _)| !finished.contains(id));
        }
    }

    /// Marks the download as started.
    pub fn started(&self) {
        self.set(LifecycleState::Started);
    }

    /// Marks the download as completed.
    pub fn completed(&self) {
        self.set(LifecycleState::Completed);
    }

    /// Marks the download as deleted.
    pub fn deleted(&self) {
        self.set(LifecycleState::Deleted);
    }

    /// Calls `observer` on every change until unobserved.
    pub fn observe(&self, observer: impl Fn(LifecycleState) + Send + Sync + 'static) -> ObserverId {
        self.add_observer(Arc::new(move |state| {
            observer(state);
            false
        }))
    }

    /// Calls `observer` on every change until it returns true.
    pub fn observe_once(
        &self,
        observer: impl Fn(LifecycleState) -> bool + Send + Sync + 'static,
    ) -> ObserverId {
        self.add_observer(Arc::new(observer))
    }

    /// Removes an observer. Returns true if it was still registered.
    pub fn unobserve(&self, id: ObserverId) -> bool {
        let mut observers = self.lock_observers();
        let before = observers.len();
        observers.retain(|(observer_id, _)| *observer_id != id);
        observers.len() != before
    }

    /// Asynchronous receiver of state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.sender.subscribe()
    }

    /// Waits until the state satisfies `predicate` and returns it.
    pub async fn wait_until(&self, mut predicate: impl FnMut(LifecycleState) -> bool) -> LifecycleState {
        let mut receiver = self.sender.subscribe();
        match receiver.wait_for(|state| predicate(*state)).await {
            Ok(state) => *state,
            // The sender lives as long as `self`.
            Err(_) => self.value(),
        }
    }

    /// Waits until the cell holds `state`.
    pub async fn wait_for(&self, state: LifecycleState) {
        self.wait_until(|current| current == state).await;
    }

    fn add_observer(&self, observer: Observer) -> ObserverId {
        let id = ObserverId(self.next_observer.fetch_add(1, Ordering::SeqCst));
        self.lock_observers().push((id, observer));
        id
    }

    fn lock_observers(&self) -> MutexGuard<'_, Vec<(ObserverId, Observer)>> {
        self.observers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Process-wide registry of lifecycle cells.
#[derive(Debug)]
pub struct LifecycleRegistry {
    cells: Mutex<HashMap<String, Arc<LifecycleCell>>>,
    external_cancellations: watch::Sender<u64>,
}

impl Default for LifecycleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        let (external_cancellations, _) = watch::channel(0);
        Self {
            cells: Mutex::new(HashMap::new()),
            external_cancellations,
        }
    }

    /// Returns the cell for `id`, creating it with the DELETED default.
    pub fn of(&self, id: &DownloadIdentifier) -> Arc<LifecycleCell> {
        let key = id.to_string();
        Arc::clone(
            self.lock_cells()
                .entry(key.clone())
                .or_insert_with(|| Arc::new(LifecycleCell::new(key))),
        )
    }

    /// Current state for `id` without creating a cell.
    #[must_use]
    pub fn state(&self, id: &DownloadIdentifier) -> LifecycleState {
        self.lock_cells()
            .get(&id.to_string())
            .map(|cell| cell.value())
            .unwrap_or_default()
    }

    /// Drops the cell for `id`. Existing handles keep working but are no
    /// longer shared with new callers.
    pub fn remove(&self, id: &DownloadIdentifier) -> bool {
        self.lock_cells().remove(&id.to_string()).is_some()
    }

    /// Drops every cell.
    pub fn clear(&self) {
        self.lock_cells().clear();
    }

    /// Number of cells.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock_cells().len()
    }

    /// Returns true if no cell exists.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock_cells().is_empty()
    }

    /// Records that downloads vanished from the engine without a cancel
    /// issued by this process.
    pub fn record_external_cancellation(&self) {
        self.external_cancellations.send_modify(|count| *count += 1);
    }

    /// Number of external cancellations recorded so far.
    #[must_use]
    pub fn external_cancellations(&self) -> u64 {
        *self.external_cancellations.borrow()
    }

    /// Asynchronous receiver of the external-cancellation count.
    #[must_use]
    pub fn subscribe_external_cancellations(&self) -> watch::Receiver<u64> {
        self.external_cancellations.subscribe()
    }

    fn lock_cells(&self) -> MutexGuard<'_, HashMap<String, Arc<LifecycleCell>>> {
        self.cells.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
