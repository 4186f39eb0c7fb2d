//! Integration tests for the HTTP transfer engine.
//!
//! These tests drive real transfers against mock HTTP servers, through the
//! engine directly and through a download handler.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use course_downloader::{
    DownloadEngine, DownloadHandler, DownloadIdentifier, DownloadRequest, DownloadServices,
    DownloadState, DownloadStatus, EngineEvent, EngineId, EngineRequest, EngineStatus, HttpEngine,
    HttpEngineOptions, NetworkTypes, RequestEnvironment,
};
use tempfile::TempDir;
use tokio::sync::broadcast;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const WAIT: Duration = Duration::from_secs(10);

async fn mount_file(server: &MockServer, path_str: &str, status: u16, body: &[u8]) {
    Mock::given(method("GET"))
        .and(path(path_str))
        .respond_with(ResponseTemplate::new(status).set_body_bytes(body.to_vec()))
        .mount(server)
        .await;
}

fn engine_request(url: &str, destination: &Path) -> EngineRequest {
    EngineRequest {
        url: url.to_string(),
        destination: destination.to_path_buf(),
        title: "file".to_string(),
        notification_visible: false,
        headers: Vec::new(),
        network_types: NetworkTypes::WIFI,
    }
}

async fn wait_completed(events: &mut broadcast::Receiver<EngineEvent>, id: EngineId) {
    tokio::time::timeout(WAIT, async {
        loop {
            match events.recv().await {
                Ok(EngineEvent::Completed(done)) if done == id => return,
                Ok(_) => {}
                Err(error) => panic!("event channel failed: {error}"),
            }
        }
    })
    .await
    .expect("transfer should complete in time");
}

#[tokio::test]
async fn test_successful_transfer_writes_file_and_reports_sizes() {
    let server = MockServer::start().await;
    let content = b"%PDF-1.4 lecture slides";
    mount_file(&server, "/slides.pdf", 200, content).await;
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let destination = temp_dir.path().join("course").join("slides.pdf");

    let engine = HttpEngine::new(HttpEngineOptions::default()).expect("engine");
    let mut events = engine.subscribe();
    let id = engine
        .enqueue(engine_request(&format!("{}/slides.pdf", server.uri()), &destination))
        .expect("enqueue");

    wait_completed(&mut events, id).await;

    let record = engine.query(id).expect("record kept after completion");
    assert_eq!(record.status, EngineStatus::Successful);
    assert_eq!(record.total_bytes, content.len() as u64);
    assert_eq!(record.downloaded_bytes, record.total_bytes);
    assert_eq!(std::fs::read(&destination).expect("read file"), content);
}

#[tokio::test]
async fn test_error_status_fails_without_writing() {
    let server = MockServer::start().await;
    mount_file(&server, "/missing.pdf", 404, b"not found").await;
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let destination = temp_dir.path().join("missing.pdf");

    let engine = HttpEngine::new(HttpEngineOptions::default()).expect("engine");
    let mut events = engine.subscribe();
    let id = engine
        .enqueue(engine_request(&format!("{}/missing.pdf", server.uri()), &destination))
        .expect("enqueue");

    wait_completed(&mut events, id).await;

    let record = engine.query(id).expect("record");
    assert_eq!(record.status, EngineStatus::Failed);
    assert_eq!(record.total_bytes, 0, "error body length is not the file size");
    assert_eq!(record.downloaded_bytes, 0);
    assert!(!destination.exists());
}

#[tokio::test]
async fn test_empty_error_response_reports_failed_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/empty.pdf"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let destination = temp_dir.path().join("empty.pdf");

    let engine = Arc::new(HttpEngine::new(HttpEngineOptions::default()).expect("engine"));
    let mut events = engine.subscribe();
    let services = DownloadServices::builder(engine.clone()).build();
    let handler = services.new_handler();
    let id = handler
        .download(&DownloadRequest::new(
            format!("{}/empty.pdf", server.uri()),
            &destination,
            "empty.pdf",
            false,
        ))
        .expect("download");
    let engine_id = engine.find_by_url(id.url()).expect("record").id;

    wait_completed(&mut events, engine_id).await;

    let status = handler.status(&id).expect("status");
    assert_eq!(status.state, DownloadState::Failed);
    assert_eq!(status.total_bytes, 0);
    assert!(!destination.exists());
}

#[tokio::test]
async fn test_remove_deletes_file_and_raises_completion() {
    let server = MockServer::start().await;
    mount_file(&server, "/a.bin", 200, b"0123456789").await;
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let destination = temp_dir.path().join("a.bin");

    let engine = HttpEngine::new(HttpEngineOptions::default()).expect("engine");
    let mut events = engine.subscribe();
    let id = engine
        .enqueue(engine_request(&format!("{}/a.bin", server.uri()), &destination))
        .expect("enqueue");
    wait_completed(&mut events, id).await;
    assert!(destination.exists());

    assert!(engine.remove(id));
    wait_completed(&mut events, id).await;
    assert!(engine.query(id).is_none());
    assert!(!destination.exists());
    assert!(!engine.remove(id));
}

#[tokio::test]
async fn test_auth_header_sent_only_to_app_host() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/private.pdf"))
        .and(header("authorization", "Token token=secret"))
        .and(header("accept-language", "de"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ok".to_vec()))
        .mount(&server)
        .await;
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let url = format!("{}/private.pdf", server.uri());
    let host = url::Url::parse(&url)
        .expect("url")
        .host_str()
        .expect("host")
        .to_string();

    let environment = RequestEnvironment {
        auth_token: Some("secret".to_string()),
        app_host: Some(host),
        locale: "de".to_string(),
        ..RequestEnvironment::default()
    };
    let request = DownloadRequest::new(&url, temp_dir.path().join("p.pdf"), "p.pdf", false)
        .to_engine_request(&environment);

    let engine = HttpEngine::new(HttpEngineOptions::default()).expect("engine");
    let mut events = engine.subscribe();
    let id = engine.enqueue(request).expect("enqueue");
    wait_completed(&mut events, id).await;

    assert_eq!(
        engine.query(id).expect("record").status,
        EngineStatus::Successful
    );
}

#[tokio::test]
async fn test_handler_tracks_two_concurrent_downloads() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/one.mp4"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(vec![1_u8; 2048])
                .set_delay(Duration::from_millis(200)),
        )
        .mount(&server)
        .await;
    mount_file(&server, "/two.vtt", 200, b"WEBVTT").await;
    let temp_dir = TempDir::new().expect("failed to create temp dir");

    let engine = Arc::new(HttpEngine::new(HttpEngineOptions::default()).expect("engine"));
    let services = DownloadServices::builder(engine).build();
    let event_loop = services.start_event_loop();

    let completions: Arc<Mutex<Vec<(DownloadIdentifier, DownloadStatus)>>> = Arc::default();
    let handler: DownloadHandler = services.new_handler();
    let sink = Arc::clone(&completions);
    handler.set_on_completion(move |id, status| {
        sink.lock().expect("lock").push((id.clone(), status));
    });

    let one = handler
        .download(&DownloadRequest::new(
            format!("{}/one.mp4", server.uri()),
            temp_dir.path().join("one.mp4"),
            "one.mp4",
            true,
        ))
        .expect("first download");
    let two = handler
        .download(&DownloadRequest::new(
            format!("{}/two.vtt", server.uri()),
            temp_dir.path().join("two.vtt"),
            "two.vtt",
            false,
        ))
        .expect("second download");
    assert!(handler.is_downloading_anything());

    tokio::time::timeout(WAIT, async {
        while completions.lock().expect("lock").len() < 2 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("both downloads should complete");

    let done = completions.lock().expect("lock").clone();
    assert!(done.iter().all(|(_, status)| status.state == DownloadState::Successful));
    assert!(done.iter().any(|(id, _)| *id == one));
    assert!(done.iter().any(|(id, _)| *id == two));
    assert_eq!(
        handler.status(&one).expect("status").downloaded_bytes,
        2048
    );
    assert!(!handler.is_downloading_anything());

    event_loop.abort();
}
