//! Integration tests for composite download items.
//!
//! Items run against the in-memory engine with the event loop delivering
//! completions, as an embedding application would wire them.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use course_downloader::{
    ActionContext, AlwaysGranted, DeferredPermissions, DownloadItem, DownloadServices,
    DownloadState, FileDownloadItem, LifecycleState, MemoryEngine, MessageSink,
    PermissionDecision, Storage, StorageLocations, WRITE_STORAGE,
};
use tempfile::TempDir;
use tokio::task::JoinHandle;

const WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
struct RecordingMessages {
    messages: Mutex<Vec<String>>,
}

impl MessageSink for RecordingMessages {
    fn show_message(&self, message: &str) {
        self.messages.lock().expect("lock").push(message.to_string());
    }
}

struct Harness {
    engine: Arc<MemoryEngine>,
    services: DownloadServices,
    event_loop: JoinHandle<()>,
    _temp_dir: TempDir,
}

impl Harness {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        Self::with_storage(temp_dir.path().join("downloads"), temp_dir)
    }

    fn with_storage(root: std::path::PathBuf, temp_dir: TempDir) -> Self {
        let engine = Arc::new(MemoryEngine::new());
        let services = DownloadServices::builder(engine.clone())
            .storage(StorageLocations::new(Storage::new(root)))
            .build();
        let event_loop = services.start_event_loop();
        Self {
            engine,
            services,
            event_loop,
            _temp_dir: temp_dir,
        }
    }

    fn video(&self) -> FileDownloadItem {
        let thumbnail = FileDownloadItem::new(
            &self.services,
            Some("https://cdn.example.com/thumb.jpg"),
            "thumb.jpg",
        )
        .folder("Rust/Week 1")
        .show_notification(false);
        FileDownloadItem::new(
            &self.services,
            Some("https://cdn.example.com/video.mp4"),
            "video.mp4",
        )
        .folder("Rust/Week 1")
        .size(100)
        .secondaries(vec![thumbnail])
    }

    fn finish(&self, url: &str, size: u64) {
        let id = self.engine.id_for(url).expect("submitted");
        self.engine.begin(id, size);
        self.engine.succeed(id);
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.event_loop.abort();
    }
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition should hold in time");
}

#[tokio::test]
async fn test_composite_completes_exactly_once() {
    let harness = Harness::new();
    let ctx = ActionContext::new(Arc::new(AlwaysGranted));
    let video = harness.video();
    let id = video.identifier().expect("identifier");
    let cell = harness.services.lifecycle().of(&id);

    let completions = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&completions);
    let _observer = cell.observe(move |state| {
        if state == LifecycleState::Completed {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    assert!(video.start(&ctx));
    assert_eq!(cell.value(), LifecycleState::Started);
    assert_eq!(harness.engine.submissions(), 2);

    harness.finish("https://cdn.example.com/video.mp4", 100);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(cell.value(), LifecycleState::Started, "thumbnail still pending");

    harness.finish("https://cdn.example.com/thumb.jpg", 10);
    tokio::time::timeout(WAIT, cell.wait_for(LifecycleState::Completed))
        .await
        .expect("composite completes");

    let engine_id = harness
        .engine
        .id_for("https://cdn.example.com/thumb.jpg")
        .expect("id");
    harness.engine.raise_completed(engine_id);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(completions.load(Ordering::SeqCst), 1);
    let status = video.status().expect("status");
    assert_eq!(status.state, DownloadState::Successful);
    assert_eq!(status.total_bytes, 110);
    assert!(video.download_exists());
}

#[tokio::test]
async fn test_delete_with_default_predicate_removes_secondaries() {
    let harness = Harness::new();
    let ctx = ActionContext::new(Arc::new(AlwaysGranted));
    let video = harness.video();

    assert!(video.start(&ctx));
    harness.finish("https://cdn.example.com/video.mp4", 100);
    harness.finish("https://cdn.example.com/thumb.jpg", 10);
    let thumbnail = video.secondary_items()[0].clone();
    eventually(|| thumbnail.download_exists() && video.download_exists()).await;

    assert!(video.delete(&ctx));
    assert!(!video.download_exists());
    assert!(!thumbnail.download_exists());
    assert_eq!(
        harness
            .services
            .lifecycle()
            .state(&video.identifier().expect("identifier")),
        LifecycleState::Deleted
    );
}

#[tokio::test]
async fn test_delete_with_false_predicate_keeps_secondaries() {
    let harness = Harness::new();
    let ctx = ActionContext::new(Arc::new(AlwaysGranted));
    let video = harness.video().delete_secondary_if(|_| false);

    assert!(video.start(&ctx));
    harness.finish("https://cdn.example.com/video.mp4", 100);
    harness.finish("https://cdn.example.com/thumb.jpg", 10);
    let thumbnail = video.secondary_items()[0].clone();
    let thumbnail_id = thumbnail.identifier().expect("identifier");
    let lifecycle = Arc::clone(harness.services.lifecycle());
    eventually(|| lifecycle.state(&thumbnail_id) == LifecycleState::Completed).await;

    assert!(video.delete(&ctx));
    assert!(!video.download_exists());
    assert!(thumbnail.download_exists());
    assert_ne!(lifecycle.state(&thumbnail_id), LifecycleState::Deleted);
}

#[tokio::test]
async fn test_start_waits_for_permission_then_runs_once() {
    let harness = Harness::new();
    let permissions = Arc::new(DeferredPermissions::new());
    let ctx = ActionContext::new(permissions.clone());
    let video = harness.video();

    assert!(!video.start(&ctx));
    assert!(!video.start(&ctx));
    assert_eq!(harness.engine.submissions(), 0);

    permissions.resolve(WRITE_STORAGE, PermissionDecision::Granted);
    let engine = Arc::clone(&harness.engine);
    eventually(|| engine.submissions() == 2).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Two deferred starts, but the second finds the first running.
    assert_eq!(harness.engine.submissions(), 2);
    assert!(video.is_download_running());
}

#[tokio::test]
async fn test_denied_permission_drops_action_with_message() {
    let harness = Harness::new();
    let permissions = Arc::new(DeferredPermissions::new());
    let messages = Arc::new(RecordingMessages::default());
    let ctx = ActionContext::new(permissions.clone()).with_messages(messages.clone());
    let video = harness.video();

    assert!(!video.start(&ctx));
    permissions.resolve(WRITE_STORAGE, PermissionDecision::Denied);
    eventually(|| !messages.messages.lock().expect("lock").is_empty()).await;

    assert_eq!(harness.engine.submissions(), 0);
    assert!(messages.messages.lock().expect("lock")[0].contains("permission"));
    assert!(!video.is_download_running());
}

#[tokio::test]
async fn test_unwritable_storage_reports_and_skips() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let blocked = temp_dir.path().join("not-a-dir");
    std::fs::write(&blocked, b"file in the way").expect("write");
    let harness = Harness::with_storage(blocked, temp_dir);
    let messages = Arc::new(RecordingMessages::default());
    let ctx = ActionContext::new(Arc::new(AlwaysGranted)).with_messages(messages.clone());
    let video = harness.video();

    assert!(!video.start(&ctx));
    assert!(!video.delete(&ctx));
    assert_eq!(harness.engine.submissions(), 0);

    let shown = messages.messages.lock().expect("lock").clone();
    assert_eq!(shown.len(), 2);
    assert!(shown[0].contains("not-a-dir"));
}

#[tokio::test]
async fn test_failed_secondary_fails_the_composite() {
    let harness = Harness::new();
    let ctx = ActionContext::new(Arc::new(AlwaysGranted));
    let video = harness.video();

    assert!(video.start(&ctx));
    harness.finish("https://cdn.example.com/video.mp4", 100);
    let thumb = harness
        .engine
        .id_for("https://cdn.example.com/thumb.jpg")
        .expect("id");
    harness.engine.fail(thumb);

    let cell = harness
        .services
        .lifecycle()
        .of(&video.identifier().expect("identifier"));
    tokio::time::timeout(WAIT, cell.wait_until(|state| state != LifecycleState::Started))
        .await
        .expect("composite settles");

    assert_eq!(video.status().expect("status").state, DownloadState::Failed);
    assert!(!video.is_download_running());
}

#[tokio::test]
async fn test_dropped_item_still_completes() {
    let harness = Harness::new();
    let ctx = ActionContext::new(Arc::new(AlwaysGranted));
    let id = {
        let video = harness.video();
        assert!(video.start(&ctx));
        video.identifier().expect("identifier")
    };
    let cell = harness.services.lifecycle().of(&id);

    harness.finish("https://cdn.example.com/video.mp4", 100);
    harness.finish("https://cdn.example.com/thumb.jpg", 10);

    tokio::time::timeout(WAIT, cell.wait_for(LifecycleState::Completed))
        .await
        .expect("completion reaches the dropped item");
}

#[tokio::test]
async fn test_delete_after_completion_releases_routes() {
    let harness = Harness::new();
    let ctx = ActionContext::new(Arc::new(AlwaysGranted));
    let video = harness.video();
    let cell = harness
        .services
        .lifecycle()
        .of(&video.identifier().expect("identifier"));

    assert!(video.start(&ctx));
    assert_eq!(harness.services.handlers().len(), 2);
    harness.finish("https://cdn.example.com/video.mp4", 100);
    harness.finish("https://cdn.example.com/thumb.jpg", 10);
    tokio::time::timeout(WAIT, cell.wait_for(LifecycleState::Completed))
        .await
        .expect("composite completes");
    // Routes resolve right after the completion listener returns.
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(video.delete(&ctx));
    assert!(harness.services.handlers().is_empty());
}
