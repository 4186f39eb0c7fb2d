//! Process-wide services shared by handlers and items.
//!
//! [`DownloadServices`] bundles the engine, the handler registry, the
//! lifecycle registry, storage locations and the request environment. It is
//! built once by the embedding application and passed to every item, so no
//! global state is involved. [`ActionContext`] carries what a single
//! start/cancel/delete call needs from its caller: the permission authority
//! and a sink for user-facing messages.

use std::fmt;
use std::sync::{Arc, OnceLock};

use tokio::runtime::Handle;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::download::{DownloadHandler, HandlerRegistry, RequestEnvironment};
use crate::engine::DownloadEngine;
use crate::lifecycle::LifecycleRegistry;
use crate::permission::PermissionAuthority;
use crate::storage::{Storage, StorageLocations};

/// Shows completion notifications to the user.
pub trait Notifier: Send + Sync + fmt::Debug {
    /// A download with the given title finished successfully.
    fn download_completed(&self, title: &str);
}

/// Notifier that logs completions.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn download_completed(&self, title: &str) {
        info!(title, "download completed");
    }
}

/// Receives user-facing messages raised by item operations.
pub trait MessageSink: Send + Sync + fmt::Debug {
    /// Shows a short message (an unwritable storage, a denied permission).
    fn show_message(&self, message: &str);

    /// Opens the list of downloads (after a completed-notification click).
    fn open_downloads(&self) {}
}

/// Message sink that logs messages.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogMessages;

impl MessageSink for LogMessages {
    fn show_message(&self, message: &str) {
        warn!("{message}");
    }

    fn open_downloads(&self) {
        debug!("open downloads requested");
    }
}

/// Caller-side context of one item operation.
#[derive(Debug, Clone)]
pub struct ActionContext {
    permissions: Arc<dyn PermissionAuthority>,
    messages: Arc<dyn MessageSink>,
}

impl ActionContext {
    /// Context with the given permission authority and logged messages.
    #[must_use]
    pub fn new(permissions: Arc<dyn PermissionAuthority>) -> Self {
        Self {
            permissions,
            messages: Arc::new(LogMessages),
        }
    }

    /// Replaces the message sink.
    #[must_use]
    pub fn with_messages(mut self, messages: Arc<dyn MessageSink>) -> Self {
        self.messages = messages;
        self
    }

    /// Permission authority.
    #[must_use]
    pub fn permissions(&self) -> &Arc<dyn PermissionAuthority> {
        &self.permissions
    }

    /// Message sink.
    #[must_use]
    pub fn messages(&self) -> &Arc<dyn MessageSink> {
        &self.messages
    }
}

struct ServicesInner {
    engine: Arc<dyn DownloadEngine>,
    handlers: Arc<HandlerRegistry>,
    lifecycle: Arc<LifecycleRegistry>,
    storage: StorageLocations,
    environment: RequestEnvironment,
    notifier: Arc<dyn Notifier>,
    runtime: Option<Handle>,
    global_handler: OnceLock<DownloadHandler>,
}

/// Explicitly initialized service object injected into items.
///
/// Cheap to clone; clones share every registry.
#[derive(Clone)]
pub struct DownloadServices {
    inner: Arc<ServicesInner>,
}

impl fmt::Debug for DownloadServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadServices")
            .field("engine", &self.inner.engine)
            .field("handlers", &self.inner.handlers)
            .field("lifecycle", &self.inner.lifecycle.len())
            .field("storage", &self.inner.storage)
            .finish_non_exhaustive()
    }
}

impl DownloadServices {
    /// Starts building services around `engine`.
    #[must_use]
    pub fn builder(engine: Arc<dyn DownloadEngine>) -> DownloadServicesBuilder {
        DownloadServicesBuilder {
            engine,
            handlers: None,
            lifecycle: None,
            storage: None,
            environment: RequestEnvironment::default(),
            notifier: Arc::new(LogNotifier),
            runtime: None,
        }
    }

    /// The transfer engine.
    #[must_use]
    pub fn engine(&self) -> &Arc<dyn DownloadEngine> {
        &self.inner.engine
    }

    /// Registry routing engine events to handlers.
    #[must_use]
    pub fn handlers(&self) -> &Arc<HandlerRegistry> {
        &self.inner.handlers
    }

    /// Lifecycle state registry.
    #[must_use]
    pub fn lifecycle(&self) -> &Arc<LifecycleRegistry> {
        &self.inner.lifecycle
    }

    /// Storage locations.
    #[must_use]
    pub fn storage(&self) -> &StorageLocations {
        &self.inner.storage
    }

    /// Environment attached to every submission.
    #[must_use]
    pub fn environment(&self) -> &RequestEnvironment {
        &self.inner.environment
    }

    /// Runtime that runs deferred item actions: the configured one, else the
    /// runtime of the calling thread.
    #[must_use]
    pub fn runtime(&self) -> Option<Handle> {
        self.inner
            .runtime
            .clone()
            .or_else(|| Handle::try_current().ok())
    }

    /// Creates a fresh handler without listeners.
    #[must_use]
    pub fn new_handler(&self) -> DownloadHandler {
        DownloadHandler::new(
            Arc::clone(&self.inner.engine),
            Arc::clone(&self.inner.handlers),
            self.inner.environment.clone(),
            Arc::clone(&self.inner.notifier),
        )
    }

    /// Shared handler used for status queries.
    #[must_use]
    pub fn global_handler(&self) -> &DownloadHandler {
        self.inner.global_handler.get_or_init(|| self.new_handler())
    }

    /// Returns true if the engine still works on any download.
    #[must_use]
    pub fn is_downloading_anything(&self) -> bool {
        self.global_handler().is_downloading_anything()
    }

    /// Spawns the task delivering engine events to the handler registry.
    ///
    /// Must be called from within a tokio runtime. The task ends when the
    /// engine's event channel closes.
    #[must_use]
    pub fn start_event_loop(&self) -> JoinHandle<()> {
        let mut events = self.inner.engine.subscribe();
        let handlers = Arc::clone(&self.inner.handlers);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        debug!(?event, "engine event");
                        handlers.dispatch(&event);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "engine event loop lagged; events dropped");
                    }
                    Err(RecvError::Closed) => {
                        debug!("engine event channel closed");
                        break;
                    }
                }
            }
        })
    }
}

/// Builder for [`DownloadServices`].
pub struct DownloadServicesBuilder {
    engine: Arc<dyn DownloadEngine>,
    handlers: Option<Arc<HandlerRegistry>>,
    lifecycle: Option<Arc<LifecycleRegistry>>,
    storage: Option<StorageLocations>,
    environment: RequestEnvironment,
    notifier: Arc<dyn Notifier>,
    runtime: Option<Handle>,
}

impl DownloadServicesBuilder {
    /// Storage locations (default: `./downloads`).
    #[must_use]
    pub fn storage(mut self, storage: StorageLocations) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Environment attached to submissions.
    #[must_use]
    pub fn environment(mut self, environment: RequestEnvironment) -> Self {
        self.environment = environment;
        self
    }

    /// Completion notifier (default: logs).
    #[must_use]
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Runtime for deferred item actions, for embedders that call items
    /// from threads outside any tokio runtime.
    #[must_use]
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Shares an existing lifecycle registry.
    #[must_use]
    pub fn lifecycle(mut self, lifecycle: Arc<LifecycleRegistry>) -> Self {
        self.lifecycle = Some(lifecycle);
        self
    }

    /// Shares an existing handler registry.
    #[must_use]
    pub fn handlers(mut self, handlers: Arc<HandlerRegistry>) -> Self {
        self.handlers = Some(handlers);
        self
    }

    /// Builds the services.
    #[must_use]
    pub fn build(self) -> DownloadServices {
        DownloadServices {
            inner: Arc::new(ServicesInner {
                engine: self.engine,
                handlers: self.handlers.unwrap_or_default(),
                lifecycle: self.lifecycle.unwrap_or_default(),
                storage: self
                    .storage
                    .unwrap_or_else(|| StorageLocations::new(Storage::new("downloads"))),
                environment: self.environment,
                notifier: self.notifier,
                runtime: self.runtime,
                global_handler: OnceLock::new(),
            }),
        }
    }
}
