//! Downloadable items and composite downloads.
//!
//! A [`FileDownloadItem`] names one file: its source URL, its file name and
//! folder below a storage root, and its declared size. It may own secondary
//! items (a video's thumbnail and subtitles) that are started and cancelled
//! along with it, deleted with it when a predicate allows, and folded into
//! its status.
//!
//! Secondary items are assigned once at construction; an item cannot reach
//! itself through its secondaries.
//!
//! Every mutating operation first checks that the target storage is
//! writable and that the [`WRITE_STORAGE`] permission is granted. A pending
//! permission makes the call return false and re-runs the operation once
//! after the authority grants it. The wait runs on the services' runtime
//! ([`DownloadServices::runtime`]), so synchronous callers must configure one.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use tracing::{debug, info, warn};

use super::filename::{mime_type_for, sanitize_filename, sanitize_folder};
use super::{
    DownloadError, DownloadHandler, DownloadIdentifier, DownloadRequest, DownloadState,
    DownloadStatus,
};
use crate::permission::{PermissionCheck, PermissionDecision, WRITE_STORAGE};
use crate::services::{ActionContext, DownloadServices};
use crate::storage::{Storage, StorageKind};

/// Message shown when the storage permission is denied.
const PERMISSION_DENIED_MESSAGE: &str =
    "Storage permission denied. Downloads need permission to write files.";

/// Message shown when a deferred action has no runtime to wait on.
const NO_RUNTIME_MESSAGE: &str =
    "Waiting for storage permission is not possible here. Try again once permission is granted.";

/// Anything that can be downloaded, cancelled and deleted as one unit.
pub trait DownloadItem {
    /// Local artifact type.
    type Artifact;

    /// Identifier of the primary download.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::NotDownloadable`] when the item has no source URL.
    fn identifier(&self) -> Result<DownloadIdentifier, DownloadError>;

    /// Returns true if the item has a usable source URL.
    fn is_downloadable(&self) -> bool;

    /// Declared size including every secondary item.
    fn download_size(&self) -> u64;

    /// Display title.
    fn title(&self) -> &str;

    /// The local artifact, if one exists.
    fn download(&self) -> Option<Self::Artifact>;

    /// Aggregated status of the item and its secondaries.
    fn status(&self) -> Option<DownloadStatus>;

    /// What to open for the local artifact.
    fn open_target(&self) -> Option<OpenTarget>;

    /// Starts the download. Returns false if nothing was started.
    fn start(&self, ctx: &ActionContext) -> bool;

    /// Cancels the download and removes its artifacts.
    fn cancel(&self, ctx: &ActionContext) -> bool;

    /// Deletes the local artifact. Returns false if there was none.
    fn delete(&self, ctx: &ActionContext) -> bool;

    /// Returns true while the aggregated status is pending or running.
    fn is_download_running(&self) -> bool {
        self.status().is_some_and(|status| status.is_running())
    }

    /// Returns true if the local artifact exists.
    fn download_exists(&self) -> bool {
        self.download().is_some()
    }
}

/// A file to open, with its MIME type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenTarget {
    pub path: PathBuf,
    pub mime_type: String,
}

/// Decides at delete time whether a secondary item is deleted too.
pub type SecondaryPredicate = Arc<dyn Fn(&FileDownloadItem) -> bool + Send + Sync>;

/// Operation deferred until a permission decision arrives.
#[derive(Debug, Clone)]
enum ItemAction {
    Start(DownloadHandler),
    Cancel(DownloadHandler),
    Delete,
}

/// A file download with optional secondary downloads.
#[derive(Clone)]
pub struct FileDownloadItem {
    services: DownloadServices,
    url: Option<String>,
    file_name: String,
    folder: PathBuf,
    size: u64,
    mime_type: String,
    show_notification: bool,
    storage: StorageKind,
    secondaries: Vec<FileDownloadItem>,
    delete_secondary: SecondaryPredicate,
    handler: OnceLock<DownloadHandler>,
}

impl fmt::Debug for FileDownloadItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileDownloadItem")
            .field("url", &self.url)
            .field("file_name", &self.file_name)
            .field("folder", &self.folder)
            .field("size", &self.size)
            .field("storage", &self.storage)
            .field("secondaries", &self.secondaries)
            .finish_non_exhaustive()
    }
}

impl FileDownloadItem {
    /// Creates an item for `url` saved as `file_name` in the preferred storage.
    #[must_use]
    pub fn new(services: &DownloadServices, url: Option<&str>, file_name: impl AsRef<str>) -> Self {
        let file_name = sanitize_filename(file_name.as_ref());
        Self {
            services: services.clone(),
            url: url.map(str::to_string),
            mime_type: mime_type_for(&file_name).to_string(),
            file_name,
            folder: PathBuf::new(),
            size: 0,
            show_notification: true,
            storage: services.storage().preferred_kind(),
            secondaries: Vec::new(),
            delete_secondary: Arc::new(|_| true),
            handler: OnceLock::new(),
        }
    }

    /// Places the file in `folder` (a `/`-separated label) below the storage root.
    #[must_use]
    pub fn folder(mut self, folder: &str) -> Self {
        self.folder = sanitize_folder(folder);
        self
    }

    /// Declared size in bytes, used while the engine doesn't know the size.
    #[must_use]
    pub fn size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    /// MIME type of the artifact.
    #[must_use]
    pub fn mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }

    /// Whether the engine shows a notification while transferring.
    #[must_use]
    pub fn show_notification(mut self, show: bool) -> Self {
        self.show_notification = show;
        self
    }

    /// Storage the file is written to.
    #[must_use]
    pub fn storage(mut self, kind: StorageKind) -> Self {
        self.storage = kind;
        self
    }

    /// Secondary items started, cancelled and deleted along with this one.
    #[must_use]
    pub fn secondaries(mut self, secondaries: Vec<FileDownloadItem>) -> Self {
        self.secondaries = secondaries;
        self
    }

    /// Deletes a secondary item with this item only when `predicate` holds.
    #[must_use]
    pub fn delete_secondary_if(
        mut self,
        predicate: impl Fn(&FileDownloadItem) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.delete_secondary = Arc::new(predicate);
        self
    }

    /// Secondary items.
    #[must_use]
    pub fn secondary_items(&self) -> &[FileDownloadItem] {
        &self.secondaries
    }

    /// File name below the folder.
    #[must_use]
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Path the file is written to when started.
    #[must_use]
    pub fn target_path(&self) -> PathBuf {
        self.path_in(self.target_storage())
    }

    fn path_in(&self, storage: &Storage) -> PathBuf {
        storage.root().join(&self.folder).join(&self.file_name)
    }

    fn target_storage(&self) -> &Storage {
        let locations = self.services.storage();
        locations
            .get(self.storage)
            .unwrap_or_else(|| locations.internal())
    }

    fn require_handler(&self, ctx: &ActionContext) -> DownloadHandler {
        self.handler
            .get_or_init(|| self.create_handler(ctx))
            .clone()
    }

    fn create_handler(&self, ctx: &ActionContext) -> DownloadHandler {
        let handler = self.services.new_handler();

        let lifecycle = Arc::clone(self.services.lifecycle());
        handler.set_on_all_cancelled(move || lifecycle.record_external_cancellation());

        let messages = Arc::clone(ctx.messages());
        handler.set_on_completed_notification_clicked(move |_| messages.open_downloads());

        let mut composite = self.clone();
        composite.handler = OnceLock::new();
        let lifecycle = Arc::clone(self.services.lifecycle());
        handler.set_on_completion(move |id, status| {
            debug!(url = %id, %status, "completion reported");
            if !composite.is_download_running() {
                lifecycle.of(id).completed();
                if let Ok(primary) = composite.identifier() {
                    lifecycle.of(&primary).completed();
                }
            }
        });

        handler
    }

    fn status_with(&self, handler: &DownloadHandler) -> Option<DownloadStatus> {
        let url = self.url.as_deref()?;
        let own = match handler.status(&DownloadIdentifier::new(url)) {
            Some(status) if status.total_bytes > 0 => status,
            Some(status) => DownloadStatus::new(
                self.size.max(status.downloaded_bytes),
                status.downloaded_bytes,
                status.state,
            ),
            None => DownloadStatus::new(self.size, 0, DownloadState::Successful),
        };

        Some(
            self.secondaries
                .iter()
                .filter_map(|secondary| secondary.status_with(handler))
                .fold(own, DownloadStatus::combine),
        )
    }

    fn perform_action(&self, ctx: &ActionContext, action: ItemAction) -> bool {
        let storage = self.target_storage();
        if !storage.is_writable() {
            self.report_unwritable(ctx, storage);
            return false;
        }

        match ctx.permissions().request_permission(WRITE_STORAGE) {
            PermissionCheck::Granted => self.run(ctx, &action),
            PermissionCheck::Pending => {
                self.defer(ctx, action);
                false
            }
        }
    }

    fn report_unwritable(&self, ctx: &ActionContext, storage: &Storage) {
        let message = storage.write_error_message();
        warn!(root = %storage.root().display(), file = %self.file_name, "storage not writable");
        ctx.messages().show_message(&message);
    }

    /// Waits for the permission decision and runs `action` once if granted.
    ///
    /// The wait runs on [`DownloadServices::runtime`]; without one the action
    /// is dropped and the user is told.
    fn defer(&self, ctx: &ActionContext, action: ItemAction) {
        let Some(runtime) = self.services.runtime() else {
            warn!(file = %self.file_name, ?action, "permission pending outside a runtime; action dropped");
            ctx.messages().show_message(NO_RUNTIME_MESSAGE);
            return;
        };

        debug!(file = %self.file_name, ?action, "waiting for storage permission");
        let item = self.clone();
        let ctx = ctx.clone();
        runtime.spawn(async move {
            match ctx.permissions().decision(WRITE_STORAGE).await {
                PermissionDecision::Granted => {
                    let storage = item.target_storage();
                    if storage.is_writable() {
                        item.run(&ctx, &action);
                    } else {
                        item.report_unwritable(&ctx, storage);
                    }
                }
                PermissionDecision::Denied => {
                    debug!(file = %item.file_name, ?action, "storage permission denied; action dropped");
                    ctx.messages().show_message(PERMISSION_DENIED_MESSAGE);
                }
            }
        });
    }

    fn run(&self, ctx: &ActionContext, action: &ItemAction) -> bool {
        match action {
            ItemAction::Start(handler) => self.start_now(ctx, handler),
            ItemAction::Cancel(handler) => self.cancel_now(ctx, handler),
            ItemAction::Delete => self.delete_now(ctx),
        }
    }

    fn start_with(&self, ctx: &ActionContext, handler: &DownloadHandler) -> bool {
        self.perform_action(ctx, ItemAction::Start(handler.clone()))
    }

    fn cancel_with(&self, ctx: &ActionContext, handler: &DownloadHandler) -> bool {
        self.perform_action(ctx, ItemAction::Cancel(handler.clone()))
    }

    fn start_now(&self, ctx: &ActionContext, handler: &DownloadHandler) -> bool {
        if self.is_download_running() || self.download_exists() {
            debug!(file = %self.file_name, "already running or downloaded");
            return false;
        }
        let Some(url) = self.url.as_deref().filter(|_| self.is_downloadable()) else {
            return false;
        };

        let path = self.target_path();
        if let Some(parent) = path.parent()
            && let Err(error) = fs::create_dir_all(parent)
        {
            let error = DownloadError::io(parent, error);
            warn!(%error, "failed to create download folder");
            return false;
        }

        let request = DownloadRequest::new(url, &path, self.title(), self.show_notification);
        let identifier = match handler.download(&request) {
            Ok(identifier) => identifier,
            Err(error) => {
                warn!(url, %error, "download not submitted");
                return false;
            }
        };

        self.services.lifecycle().of(&identifier).started();
        info!(url, path = %path.display(), secondaries = self.secondaries.len(), "download started");

        for secondary in &self.secondaries {
            secondary.start_with(ctx, handler);
        }
        true
    }

    fn cancel_now(&self, ctx: &ActionContext, handler: &DownloadHandler) -> bool {
        let identifier = self.identifier().ok();
        if let Some(identifier) = &identifier {
            handler.cancel(identifier);
        }

        self.delete_now(ctx);

        if let Some(identifier) = &identifier {
            self.services.lifecycle().of(identifier).deleted();
        }

        for secondary in &self.secondaries {
            secondary.cancel_with(ctx, handler);
        }
        true
    }

    fn delete_now(&self, ctx: &ActionContext) -> bool {
        let Some(artifact) = self.download() else {
            let target = self.target_path();
            if let Some(parent) = target.parent() {
                self.target_storage().clean(parent);
            }
            return false;
        };

        if let Ok(identifier) = self.identifier() {
            self.services.lifecycle().of(&identifier).deleted();
            self.services.global_handler().release(&identifier);
        }

        match fs::remove_file(&artifact) {
            Ok(()) => {
                info!(path = %artifact.display(), "download deleted");
                for secondary in &self.secondaries {
                    if (self.delete_secondary)(secondary) {
                        secondary.delete(ctx);
                    }
                }
            }
            Err(error) => {
                let error = DownloadError::io(&artifact, error);
                warn!(%error, "failed to delete download");
            }
        }
        true
    }

    fn find_in(&self, storage: &Storage) -> Option<PathBuf> {
        let path = self.path_in(storage);
        is_file(&path).then_some(path)
    }
}

fn is_file(path: &Path) -> bool {
    fs::metadata(path).is_ok_and(|metadata| metadata.is_file())
}

impl DownloadItem for FileDownloadItem {
    type Artifact = PathBuf;

    fn identifier(&self) -> Result<DownloadIdentifier, DownloadError> {
        self.url
            .as_deref()
            .map(DownloadIdentifier::new)
            .ok_or_else(|| DownloadError::not_downloadable(&self.file_name))
    }

    fn is_downloadable(&self) -> bool {
        self.url
            .as_deref()
            .is_some_and(|url| url::Url::parse(url).is_ok())
    }

    fn download_size(&self) -> u64 {
        self.secondaries
            .iter()
            .map(DownloadItem::download_size)
            .fold(self.size, u64::saturating_add)
    }

    fn title(&self) -> &str {
        &self.file_name
    }

    fn download(&self) -> Option<PathBuf> {
        self.services
            .storage()
            .search_order()
            .find_map(|storage| self.find_in(storage))
    }

    fn status(&self) -> Option<DownloadStatus> {
        self.status_with(self.services.global_handler())
    }

    fn open_target(&self) -> Option<OpenTarget> {
        self.download().map(|path| OpenTarget {
            path,
            mime_type: self.mime_type.clone(),
        })
    }

    fn start(&self, ctx: &ActionContext) -> bool {
        let handler = self.require_handler(ctx);
        self.start_with(ctx, &handler)
    }

    fn cancel(&self, ctx: &ActionContext) -> bool {
        let handler = self.require_handler(ctx);
        self.cancel_with(ctx, &handler)
    }

    fn delete(&self, ctx: &ActionContext) -> bool {
        self.perform_action(ctx, ItemAction::Delete)
    }
}
