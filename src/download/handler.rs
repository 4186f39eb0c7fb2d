//! Download handler and process-wide routing of engine events.
//!
//! A [`DownloadHandler`] submits requests to the engine, resolves identifiers
//! back to engine records, and owns four optional listeners. Engine events
//! carry only engine ids; the [`HandlerRegistry`] remembers which handler
//! submitted which id and routes each event to that handler.
//!
//! A route holds its handler strongly while the transfer is active, so a
//! completion reaches the handler's listeners even after every caller-side
//! clone is gone. Once a terminal completion has been delivered the route
//! only keeps a weak reference (for notification clicks), and it is removed
//! when the record vanishes, when the download is released, or when its
//! handler is dropped.
//!
//! The registry also counts cancellations issued by handlers. A completion
//! event whose record has vanished consumes one pending cancellation; when
//! none is pending, the removal happened outside this process and the
//! handler's on-all-cancelled listener fires.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::{debug, info, instrument, warn};

use super::{
    DownloadError, DownloadIdentifier, DownloadRequest, DownloadState, DownloadStatus,
    RequestEnvironment,
};
use crate::engine::{DownloadEngine, EngineEvent, EngineId, EngineRecord, EngineStatus};
use crate::services::Notifier;

type CompletionListener = Arc<dyn Fn(&DownloadIdentifier, DownloadStatus) + Send + Sync>;
type CancelledListener = Arc<dyn Fn() + Send + Sync>;
type RunningClickListener = Arc<dyn Fn(Vec<DownloadIdentifier>) + Send + Sync>;
type CompletedClickListener = Arc<dyn Fn(&DownloadIdentifier) + Send + Sync>;

#[derive(Default, Clone)]
struct Listeners {
    on_completion: Option<CompletionListener>,
    on_all_cancelled: Option<CancelledListener>,
    on_running_click: Option<RunningClickListener>,
    on_completed_click: Option<CompletedClickListener>,
}

struct HandlerShared {
    engine: Arc<dyn DownloadEngine>,
    registry: Arc<HandlerRegistry>,
    environment: RequestEnvironment,
    notifier: Arc<dyn Notifier>,
    listeners: Mutex<Listeners>,
}

/// Submits, queries and cancels downloads on an engine.
///
/// Cheap to clone; clones share listeners and registry entries.
#[derive(Clone)]
pub struct DownloadHandler {
    shared: Arc<HandlerShared>,
}

impl fmt::Debug for DownloadHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadHandler")
            .field("engine", &self.shared.engine)
            .finish_non_exhaustive()
    }
}

impl DownloadHandler {
    /// Creates a handler without listeners.
    #[must_use]
    pub fn new(
        engine: Arc<dyn DownloadEngine>,
        registry: Arc<HandlerRegistry>,
        environment: RequestEnvironment,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            shared: Arc::new(HandlerShared {
                engine,
                registry,
                environment,
                notifier,
                listeners: Mutex::new(Listeners::default()),
            }),
        }
    }

    /// Submits `request` and returns the identifier naming it.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Engine`] if the engine refuses the request.
    #[instrument(skip(self, request), fields(url = %request.url))]
    pub fn download(&self, request: &DownloadRequest) -> Result<DownloadIdentifier, DownloadError> {
        let engine_request = request.to_engine_request(&self.shared.environment);
        let engine_id = self.shared.engine.enqueue(engine_request)?;
        self.shared.registry.register(engine_id, &self.shared);

        info!(engine_id = %engine_id, title = %request.title, "download submitted");
        Ok(DownloadIdentifier::new(&request.url))
    }

    /// Removes the engine record named by `identifier`.
    ///
    /// Returns false if the engine has no such record.
    #[instrument(skip(self, identifier), fields(url = %identifier))]
    pub fn cancel(&self, identifier: &DownloadIdentifier) -> bool {
        let Some(record) = self.shared.engine.find_by_url(identifier.url()) else {
            debug!("nothing to cancel");
            return false;
        };

        let registry = &self.shared.registry;
        registry.begin_cancellation();
        if self.shared.engine.remove(record.id) {
            debug!(engine_id = %record.id, "download cancelled");
            true
        } else {
            registry.abandon_cancellation();
            false
        }
    }

    /// Drops the resolved routes of every engine record for `identifier`.
    ///
    /// Called when the local artifact is deleted; routes of transfers still
    /// in progress are kept. Returns the number of routes removed.
    pub fn release(&self, identifier: &DownloadIdentifier) -> usize {
        let engine_ids: Vec<EngineId> = self
            .shared
            .engine
            .query_all()
            .into_iter()
            .filter(|record| record.url == identifier.url())
            .map(|record| record.id)
            .collect();
        let released = self.shared.registry.forget_resolved(&engine_ids);
        if released > 0 {
            debug!(url = %identifier, released, "routes released");
        }
        released
    }

    /// Current status of the engine record named by `identifier`.
    #[must_use]
    pub fn status(&self, identifier: &DownloadIdentifier) -> Option<DownloadStatus> {
        self.shared
            .engine
            .find_by_url(identifier.url())
            .map(|record| status_of(&record))
    }

    /// Returns true if the engine still works on any download.
    #[must_use]
    pub fn is_downloading_anything(&self) -> bool {
        self.shared.engine.query_all().iter().any(|record| {
            matches!(
                record.status,
                EngineStatus::Pending | EngineStatus::Running | EngineStatus::Paused
            )
        })
    }

    /// Sets the listener called when one of this handler's downloads completes.
    pub fn set_on_completion(
        &self,
        listener: impl Fn(&DownloadIdentifier, DownloadStatus) + Send + Sync + 'static,
    ) {
        self.lock_listeners().on_completion = Some(Arc::new(listener));
    }

    /// Sets the listener called when a download vanished from the engine
    /// without a cancel issued by this process.
    pub fn set_on_all_cancelled(&self, listener: impl Fn() + Send + Sync + 'static) {
        self.lock_listeners().on_all_cancelled = Some(Arc::new(listener));
    }

    /// Sets the listener called when the notification of running downloads is clicked.
    pub fn set_on_running_notification_clicked(
        &self,
        listener: impl Fn(Vec<DownloadIdentifier>) + Send + Sync + 'static,
    ) {
        self.lock_listeners().on_running_click = Some(Arc::new(listener));
    }

    /// Sets the listener called when the notification of a completed download is clicked.
    pub fn set_on_completed_notification_clicked(
        &self,
        listener: impl Fn(&DownloadIdentifier) + Send + Sync + 'static,
    ) {
        self.lock_listeners().on_completed_click = Some(Arc::new(listener));
    }

    fn listeners(&self) -> Listeners {
        self.lock_listeners().clone()
    }

    fn lock_listeners(&self) -> MutexGuard<'_, Listeners> {
        self.shared
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn on_download_complete(&self, engine_id: EngineId) {
        let Some(record) = self.shared.engine.query(engine_id) else {
            self.shared.registry.forget(engine_id);
            if self.shared.registry.take_cancellation() {
                debug!(engine_id = %engine_id, "cancelled download removed");
            } else {
                warn!(engine_id = %engine_id, "download removed outside this process");
                if let Some(listener) = self.listeners().on_all_cancelled {
                    listener();
                }
            }
            return;
        };

        let status = status_of(&record);
        let identifier = DownloadIdentifier::new(&record.url);
        debug!(engine_id = %engine_id, url = %identifier, %status, "download finished");

        if status.state == DownloadState::Successful {
            self.shared.notifier.download_completed(&record.title);
        }
        if let Some(listener) = self.listeners().on_completion {
            listener(&identifier, status);
        }
        if !status.is_running() {
            self.shared.registry.resolve(engine_id);
        }
    }

    fn on_running_notification_clicked(&self, engine_ids: &[EngineId]) {
        let Some(listener) = self.listeners().on_running_click else {
            return;
        };
        let identifiers = engine_ids
            .iter()
            .filter_map(|id| self.shared.engine.query(*id))
            .map(|record| DownloadIdentifier::new(record.url))
            .collect();
        listener(identifiers);
    }

    fn on_completed_notification_clicked(&self, engine_id: EngineId) {
        let Some(listener) = self.listeners().on_completed_click else {
            return;
        };
        if let Some(record) = self.shared.engine.query(engine_id) {
            listener(&DownloadIdentifier::new(record.url));
        }
    }
}

/// Maps an engine record to a status. PAUSED counts as RUNNING; unknown
/// codes count as FAILED.
fn status_of(record: &EngineRecord) -> DownloadStatus {
    let state = match record.status {
        EngineStatus::Successful => DownloadState::Successful,
        EngineStatus::Running | EngineStatus::Paused => DownloadState::Running,
        EngineStatus::Pending => DownloadState::Pending,
        EngineStatus::Failed | EngineStatus::Other(_) => DownloadState::Failed,
    };
    DownloadStatus::new(record.total_bytes, record.downloaded_bytes, state)
}

/// Routes engine events to the handler that submitted each download.
///
/// Active routes own their handler. Resolved routes hold a weak reference
/// and are pruned on registration once the handler is gone.
#[derive(Default)]
pub struct HandlerRegistry {
    routes: Mutex<HashMap<EngineId, Route>>,
    pending_cancellations: AtomicUsize,
}

struct Route {
    owner: RouteOwner,
    engine: Arc<dyn DownloadEngine>,
}

enum RouteOwner {
    /// Transfer in progress.
    Active(Arc<HandlerShared>),
    /// Terminal completion delivered.
    Resolved(Weak<HandlerShared>),
}

impl RouteOwner {
    fn handler(&self) -> Option<Arc<HandlerShared>> {
        match self {
            Self::Active(shared) => Some(Arc::clone(shared)),
            Self::Resolved(weak) => weak.upgrade(),
        }
    }

    fn is_live(&self) -> bool {
        match self {
            Self::Active(_) => true,
            Self::Resolved(weak) => weak.strong_count() > 0,
        }
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("routes", &self.len())
            .field("pending_cancellations", &self.pending_cancellations())
            .finish()
    }
}

impl HandlerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of routed engine ids.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock_routes().len()
    }

    /// Returns true if no engine id is routed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock_routes().is_empty()
    }

    /// Cancellations issued whose completion event hasn't arrived yet.
    #[must_use]
    pub fn pending_cancellations(&self) -> usize {
        self.pending_cancellations.load(Ordering::SeqCst)
    }

    /// Routes one engine event.
    pub fn dispatch(&self, event: &EngineEvent) {
        match event {
            EngineEvent::Completed(engine_id) => match self.lookup(*engine_id) {
                Some(handler) => handler.on_download_complete(*engine_id),
                None => self.drop_unrouted(*engine_id),
            },
            EngineEvent::RunningNotificationClicked(engine_ids) => {
                let mut groups: Vec<(DownloadHandler, Vec<EngineId>)> = Vec::new();
                for engine_id in engine_ids {
                    let Some(handler) = self.lookup(*engine_id) else {
                        continue;
                    };
                    match groups
                        .iter_mut()
                        .find(|(owner, _)| Arc::ptr_eq(&owner.shared, &handler.shared))
                    {
                        Some((_, ids)) => ids.push(*engine_id),
                        None => groups.push((handler, vec![*engine_id])),
                    }
                }
                for (handler, ids) in groups {
                    handler.on_running_notification_clicked(&ids);
                }
            }
            EngineEvent::CompletedNotificationClicked(engine_id) => {
                if let Some(handler) = self.lookup(*engine_id) {
                    handler.on_completed_notification_clicked(*engine_id);
                }
            }
        }
    }

    fn register(&self, engine_id: EngineId, handler: &Arc<HandlerShared>) {
        let mut routes = self.lock_routes();
        routes.retain(|_, route| route.owner.is_live());
        routes.insert(
            engine_id,
            Route {
                owner: RouteOwner::Active(Arc::clone(handler)),
                engine: Arc::clone(&handler.engine),
            },
        );
    }

    fn lookup(&self, engine_id: EngineId) -> Option<DownloadHandler> {
        self.lock_routes()
            .get(&engine_id)
            .and_then(|route| route.owner.handler())
            .map(|shared| DownloadHandler { shared })
    }

    /// Stops owning the handler of a transfer that reached a terminal state.
    fn resolve(&self, engine_id: EngineId) {
        if let Some(route) = self.lock_routes().get_mut(&engine_id)
            && let RouteOwner::Active(shared) = &route.owner
        {
            route.owner = RouteOwner::Resolved(Arc::downgrade(shared));
        }
    }

    fn forget(&self, engine_id: EngineId) {
        self.lock_routes().remove(&engine_id);
    }

    fn forget_resolved(&self, engine_ids: &[EngineId]) -> usize {
        let mut routes = self.lock_routes();
        let mut released = 0;
        for engine_id in engine_ids {
            if let Some(route) = routes.get(engine_id)
                && matches!(route.owner, RouteOwner::Resolved(_))
            {
                routes.remove(engine_id);
                released += 1;
            }
        }
        released
    }

    /// Completion without a live owner. The event is dropped, but a vanished
    /// record still stands for a pending cancellation.
    fn drop_unrouted(&self, engine_id: EngineId) {
        let route = self.lock_routes().remove(&engine_id);
        let vanished = route.is_some_and(|route| route.engine.query(engine_id).is_none());
        if vanished && self.take_cancellation() {
            debug!(engine_id = %engine_id, "cancellation of dropped handler consumed");
        } else {
            debug!(engine_id = %engine_id, "no handler for completed download");
        }
    }

    fn begin_cancellation(&self) {
        self.pending_cancellations.fetch_add(1, Ordering::SeqCst);
    }

    fn abandon_cancellation(&self) {
        self.take_cancellation();
    }

    /// Consumes one pending cancellation, if any.
    fn take_cancellation(&self) -> bool {
        self.pending_cancellations
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| {
                count.checked_sub(1)
            })
            .is_ok()
    }

    fn lock_routes(&self) -> MutexGuard<'_, HashMap<EngineId, Route>> {
        self.routes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use tempfile::TempDir;

    use super::*;
    use crate::engine::MemoryEngine;
    use crate::services::LogNotifier;

    struct Fixture {
        engine: Arc<MemoryEngine>,
        registry: Arc<HandlerRegistry>,
        temp_dir: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                engine: Arc::new(MemoryEngine::new()),
                registry: Arc::new(HandlerRegistry::new()),
                temp_dir: TempDir::new().unwrap(),
            }
        }

        fn handler(&self) -> DownloadHandler {
            DownloadHandler::new(
                self.engine.clone(),
                Arc::clone(&self.registry),
                RequestEnvironment::default(),
                Arc::new(LogNotifier),
            )
        }

        fn request(&self, url: &str, name: &str) -> DownloadRequest {
            DownloadRequest::new(url, self.temp_dir.path().join(name), name, true)
        }

        /// Delivers every pending engine event to the registry.
        fn pump(&self, events: &mut tokio::sync::broadcast::Receiver<EngineEvent>) {
            while let Ok(event) = events.try_recv() {
                self.registry.dispatch(&event);
            }
        }
    }

    #[test]
    fn test_unknown_identifier_has_no_status_and_cannot_be_cancelled() {
        let fixture = Fixture::new();
        let handler = fixture.handler();
        let id = DownloadIdentifier::new("https://example.com/never.pdf");

        assert!(handler.status(&id).is_none());
        assert!(!handler.cancel(&id));
        assert_eq!(fixture.registry.pending_cancellations(), 0);
    }

    #[test]
    fn test_download_registers_route_and_reports_status() {
        let fixture = Fixture::new();
        let handler = fixture.handler();

        let id = handler
            .download(&fixture.request("https://example.com/a.pdf", "a.pdf"))
            .unwrap();
        assert_eq!(id.url(), "https://example.com/a.pdf");
        assert_eq!(fixture.registry.len(), 1);

        let status = handler.status(&id).unwrap();
        assert_eq!(status.state, DownloadState::Pending);
        assert!(handler.is_downloading_anything());
    }

    #[test]
    fn test_status_mapping_folds_paused_and_unknown_codes() {
        let fixture = Fixture::new();
        let handler = fixture.handler();
        let id = handler
            .download(&fixture.request("https://example.com/a.pdf", "a.pdf"))
            .unwrap();
        let engine_id = fixture.engine.id_for(id.url()).unwrap();

        fixture.engine.begin(engine_id, 100);
        fixture.engine.pause(engine_id);
        assert_eq!(handler.status(&id).unwrap().state, DownloadState::Running);
        assert!(handler.is_downloading_anything());

        fixture.engine.set_status(engine_id, EngineStatus::Other(1000));
        assert_eq!(handler.status(&id).unwrap().state, DownloadState::Failed);
        assert!(!handler.is_downloading_anything());
    }

    #[test]
    fn test_completion_routes_to_submitting_handler() {
        let fixture = Fixture::new();
        let mut events = fixture.engine.subscribe();
        let first = fixture.handler();
        let second = fixture.handler();

        let completed = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&completed);
        first.set_on_completion(move |id, status| sink.lock().unwrap().push((id.clone(), status)));
        let stray = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&stray);
        second.set_on_completion(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let id = first
            .download(&fixture.request("https://example.com/a.pdf", "a.pdf"))
            .unwrap();
        let engine_id = fixture.engine.id_for(id.url()).unwrap();
        fixture.engine.begin(engine_id, 10);
        fixture.engine.succeed(engine_id);
        fixture.pump(&mut events);

        let completed = completed.lock().unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].0, id);
        assert_eq!(completed[0].1, DownloadStatus::new(10, 10, DownloadState::Successful));
        assert_eq!(stray.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_deliberate_cancel_is_suppressed() {
        let fixture = Fixture::new();
        let mut events = fixture.engine.subscribe();
        let handler = fixture.handler();
        let cancelled = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&cancelled);
        handler.set_on_all_cancelled(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let id = handler
            .download(&fixture.request("https://example.com/a.pdf", "a.pdf"))
            .unwrap();
        assert!(handler.cancel(&id));
        assert_eq!(fixture.registry.pending_cancellations(), 1);
        assert!(handler.status(&id).is_none());

        fixture.pump(&mut events);
        assert_eq!(fixture.registry.pending_cancellations(), 0);
        assert_eq!(cancelled.load(Ordering::SeqCst), 0);
        assert!(fixture.registry.is_empty());
    }

    #[test]
    fn test_external_removal_fires_all_cancelled() {
        let fixture = Fixture::new();
        let mut events = fixture.engine.subscribe();
        let handler = fixture.handler();
        let cancelled = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&cancelled);
        handler.set_on_all_cancelled(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let id = handler
            .download(&fixture.request("https://example.com/a.pdf", "a.pdf"))
            .unwrap();
        let engine_id = fixture.engine.id_for(id.url()).unwrap();
        fixture.engine.purge(engine_id);
        fixture.engine.raise_completed(engine_id);
        fixture.pump(&mut events);

        assert_eq!(cancelled.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancel_of_dropped_handler_still_consumes_counter() {
        let fixture = Fixture::new();
        let mut events = fixture.engine.subscribe();
        let survivor = fixture.handler();
        let cancelled = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&cancelled);
        survivor.set_on_all_cancelled(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let dropped = fixture.handler();
        let id = dropped
            .download(&fixture.request("https://example.com/a.pdf", "a.pdf"))
            .unwrap();
        drop(dropped);
        assert!(survivor.cancel(&id));
        fixture.pump(&mut events);
        assert_eq!(fixture.registry.pending_cancellations(), 0);

        let other = survivor
            .download(&fixture.request("https://example.com/b.pdf", "b.pdf"))
            .unwrap();
        let engine_id = fixture.engine.id_for(other.url()).unwrap();
        fixture.engine.purge(engine_id);
        fixture.engine.raise_completed(engine_id);
        fixture.pump(&mut events);
        assert_eq!(cancelled.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_running_click_groups_by_owner() {
        let fixture = Fixture::new();
        let first = fixture.handler();
        let second = fixture.handler();

        let first_seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&first_seen);
        first.set_on_running_notification_clicked(move |ids| sink.lock().unwrap().push(ids));
        let second_seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&second_seen);
        second.set_on_running_notification_clicked(move |ids| sink.lock().unwrap().push(ids));

        let a = first
            .download(&fixture.request("https://example.com/a.pdf", "a.pdf"))
            .unwrap();
        let b = first
            .download(&fixture.request("https://example.com/b.pdf", "b.pdf"))
            .unwrap();
        let c = second
            .download(&fixture.request("https://example.com/c.pdf", "c.pdf"))
            .unwrap();
        let ids: Vec<EngineId> = [&a, &b, &c]
            .iter()
            .map(|id| fixture.engine.id_for(id.url()).unwrap())
            .collect();

        fixture.registry.dispatch(&EngineEvent::RunningNotificationClicked(ids));

        let first_seen = first_seen.lock().unwrap();
        assert_eq!(first_seen.len(), 1);
        let mut batch = first_seen[0].clone();
        batch.sort();
        assert_eq!(batch, vec![a, b]);
        assert_eq!(*second_seen.lock().unwrap(), vec![vec![c]]);
    }

    #[test]
    fn test_completed_click_resolves_identifier() {
        let fixture = Fixture::new();
        let handler = fixture.handler();
        let clicked = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&clicked);
        handler.set_on_completed_notification_clicked(move |id| {
            *sink.lock().unwrap() = Some(id.clone());
        });

        let id = handler
            .download(&fixture.request("https://example.com/a.pdf", "a.pdf"))
            .unwrap();
        let engine_id = fixture.engine.id_for(id.url()).unwrap();
        fixture
            .registry
            .dispatch(&EngineEvent::CompletedNotificationClicked(engine_id));

        assert_eq!(clicked.lock().unwrap().clone(), Some(id));
    }

    #[test]
    fn test_dropped_handler_still_receives_completion() {
        let fixture = Fixture::new();
        let mut events = fixture.engine.subscribe();
        let completed = Arc::new(AtomicUsize::new(0));

        let id = {
            let handler = fixture.handler();
            let counter = Arc::clone(&completed);
            handler.set_on_completion(move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
            handler
                .download(&fixture.request("https://example.com/a.pdf", "a.pdf"))
                .unwrap()
        };
        let engine_id = fixture.engine.id_for(id.url()).unwrap();
        fixture.engine.begin(engine_id, 10);
        fixture.engine.succeed(engine_id);
        fixture.pump(&mut events);

        assert_eq!(completed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_release_removes_only_resolved_routes() {
        let fixture = Fixture::new();
        let mut events = fixture.engine.subscribe();
        let handler = fixture.handler();
        let done = handler
            .download(&fixture.request("https://example.com/a.pdf", "a.pdf"))
            .unwrap();
        let running = handler
            .download(&fixture.request("https://example.com/b.pdf", "b.pdf"))
            .unwrap();
        let engine_id = fixture.engine.id_for(done.url()).unwrap();
        fixture.engine.begin(engine_id, 10);
        fixture.engine.succeed(engine_id);
        fixture.pump(&mut events);

        assert_eq!(handler.release(&running), 0);
        assert_eq!(handler.release(&done), 1);
        assert_eq!(fixture.registry.len(), 1);
    }

    #[test]
    fn test_dead_routes_are_pruned_on_register() {
        let fixture = Fixture::new();
        let mut events = fixture.engine.subscribe();
        {
            let short_lived = fixture.handler();
            let id = short_lived
                .download(&fixture.request("https://example.com/a.pdf", "a.pdf"))
                .unwrap();
            let engine_id = fixture.engine.id_for(id.url()).unwrap();
            fixture.engine.begin(engine_id, 10);
            fixture.engine.succeed(engine_id);
            fixture.pump(&mut events);
        }
        assert_eq!(fixture.registry.len(), 1);

        let handler = fixture.handler();
        handler
            .download(&fixture.request("https://example.com/b.pdf", "b.pdf"))
            .unwrap();
        assert_eq!(fixture.registry.len(), 1);
    }

    #[test]
    fn test_pending_route_keeps_its_handler() {
        let fixture = Fixture::new();
        {
            let short_lived = fixture.handler();
            short_lived
                .download(&fixture.request("https://example.com/a.pdf", "a.pdf"))
                .unwrap();
        }

        let handler = fixture.handler();
        handler
            .download(&fixture.request("https://example.com/b.pdf", "b.pdf"))
            .unwrap();
        assert_eq!(fixture.registry.len(), 2);
    }
}
