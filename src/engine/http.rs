//! HTTP transfer engine running on the tokio runtime.
//!
//! Every accepted request becomes a tokio task that streams the response body
//! to its destination file. A semaphore bounds the number of transfers that
//! run at once; records waiting for a permit stay PENDING.
//!
//! # Example
//!
//! ```no_run
//! use course_downloader::engine::{DownloadEngine, HttpEngine, HttpEngineOptions};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = HttpEngine::new(HttpEngineOptions::default())?;
//! let mut events = engine.subscribe();
//! // ... enqueue requests, then wait for completions
//! let event = events.recv().await?;
//! println!("{event:?}");
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use futures_util::StreamExt;
use reqwest::Client;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::runtime::Handle;
use tokio::sync::{Semaphore, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::{
    DownloadEngine, EVENT_CHANNEL_CAPACITY, EngineError, EngineEvent, EngineId, EngineRecord,
    EngineRequest, EngineStatus, NetworkTypes,
};
use crate::user_agent;

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP read timeout (5 minutes for large videos).
pub const READ_TIMEOUT_SECS: u64 = 300;

/// Default number of transfers running at once.
pub const DEFAULT_MAX_CONCURRENT: usize = 3;

/// Tunables of an [`HttpEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpEngineOptions {
    /// Maximum number of transfers running at once.
    pub max_concurrent: usize,
    /// Connect timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Whole-request timeout in seconds.
    pub read_timeout_secs: u64,
    /// Network type of the current connection. Requests that don't allow it
    /// stay pending.
    pub network: NetworkTypes,
}

impl Default for HttpEngineOptions {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            connect_timeout_secs: CONNECT_TIMEOUT_SECS,
            read_timeout_secs: READ_TIMEOUT_SECS,
            network: NetworkTypes::WIFI,
        }
    }
}

/// Transfer engine streaming HTTP(S) downloads to disk.
///
/// Cheap to clone; clones share records, event channel and concurrency limit.
#[derive(Debug, Clone)]
pub struct HttpEngine {
    shared: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    client: Client,
    transfers: DashMap<EngineId, Transfer>,
    next_id: AtomicU64,
    events: broadcast::Sender<EngineEvent>,
    semaphore: Arc<Semaphore>,
    runtime: Handle,
    network: NetworkTypes,
}

#[derive(Debug)]
struct Transfer {
    record: EngineRecord,
    task: Option<JoinHandle<()>>,
}

impl HttpEngine {
    /// Creates an engine bound to the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Setup`] when called outside a tokio runtime or
    /// when the HTTP client cannot be built.
    #[instrument(level = "debug")]
    pub fn new(options: HttpEngineOptions) -> Result<Self, EngineError> {
        let runtime = Handle::try_current()
            .map_err(|e| EngineError::setup(format!("no tokio runtime: {e}")))?;
        Self::with_runtime(options, runtime)
    }

    /// Creates an engine that spawns its transfers on `runtime`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Setup`] when the HTTP client cannot be built.
    pub fn with_runtime(options: HttpEngineOptions, runtime: Handle) -> Result<Self, EngineError> {
        let client = build_client(options.connect_timeout_secs, options.read_timeout_secs)
            .map_err(|e| EngineError::setup(format!("failed to build HTTP client: {e}")))?;
        let max_concurrent = options.max_concurrent.max(1);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        debug!(
            max_concurrent,
            connect_timeout_secs = options.connect_timeout_secs,
            read_timeout_secs = options.read_timeout_secs,
            "creating HTTP engine"
        );

        Ok(Self {
            shared: Arc::new(Shared {
                client,
                transfers: DashMap::new(),
                next_id: AtomicU64::new(1),
                events,
                semaphore: Arc::new(Semaphore::new(max_concurrent)),
                runtime,
                network: options.network,
            }),
        })
    }
}

impl DownloadEngine for HttpEngine {
    #[instrument(skip(self, request), fields(url = %request.url))]
    fn enqueue(&self, request: EngineRequest) -> Result<EngineId, EngineError> {
        let parsed = Url::parse(&request.url).map_err(|_| EngineError::invalid_url(&request.url))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(EngineError::invalid_url(&request.url));
        }

        let id = EngineId(self.shared.next_id.fetch_add(1, Ordering::SeqCst));
        self.shared.transfers.insert(
            id,
            Transfer {
                record: EngineRecord::pending(id, &request),
                task: None,
            },
        );

        if !request.network_types.contains(self.shared.network) {
            debug!(engine_id = %id, "request does not allow the current network; waiting");
            return Ok(id);
        }

        let shared = Arc::clone(&self.shared);
        let task = self.shared.runtime.spawn(run_transfer(shared, id, request));
        if let Some(mut transfer) = self.shared.transfers.get_mut(&id) {
            transfer.task = Some(task);
        }

        debug!(engine_id = %id, "transfer enqueued");
        Ok(id)
    }

    fn query(&self, id: EngineId) -> Option<EngineRecord> {
        self.shared
            .transfers
            .get(&id)
            .map(|transfer| transfer.record.clone())
    }

    fn query_all(&self) -> Vec<EngineRecord> {
        self.shared
            .transfers
            .iter()
            .map(|entry| entry.value().record.clone())
            .collect()
    }

    #[instrument(skip(self))]
    fn remove(&self, id: EngineId) -> bool {
        let Some((_, transfer)) = self.shared.transfers.remove(&id) else {
            return false;
        };
        if let Some(task) = transfer.task {
            task.abort();
        }
        let destination = &transfer.record.destination;
        if destination.exists() {
            if let Err(error) = std::fs::remove_file(destination) {
                warn!(path = %destination.display(), %error, "failed to delete removed transfer");
            }
        }
        debug!(engine_id = %id, "transfer removed");
        self.shared.emit(EngineEvent::Completed(id));
        true
    }

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.shared.events.subscribe()
    }
}

impl Shared {
    fn update(&self, id: EngineId, apply: impl FnOnce(&mut EngineRecord)) -> bool {
        match self.transfers.get_mut(&id) {
            Some(mut transfer) => {
                apply(&mut transfer.record);
                true
            }
            None => false,
        }
    }

    fn emit(&self, event: EngineEvent) {
        // Without subscribers nobody routes events; the record is still queryable.
        let _ = self.events.send(event);
    }
}

/// Runs one transfer to completion and records the outcome.
async fn run_transfer(shared: Arc<Shared>, id: EngineId, request: EngineRequest) {
    let Ok(_permit) = Arc::clone(&shared.semaphore).acquire_owned().await else {
        warn!(engine_id = %id, "semaphore closed unexpectedly");
        if shared.update(id, |record| record.status = EngineStatus::Failed) {
            shared.emit(EngineEvent::Completed(id));
        }
        return;
    };

    if !shared.update(id, |record| record.status = EngineStatus::Running) {
        // Removed while waiting for a permit.
        return;
    }

    let outcome = transfer(&shared, id, &request).await;

    let recorded = match outcome {
        Ok(bytes) => {
            info!(engine_id = %id, url = %request.url, bytes, "download complete");
            shared.update(id, |record| {
                record.downloaded_bytes = bytes;
                if record.total_bytes == 0 {
                    record.total_bytes = bytes;
                }
                record.status = EngineStatus::Successful;
            })
        }
        Err(error) => {
            warn!(engine_id = %id, url = %request.url, %error, "download failed");
            if !matches!(error, EngineError::HttpStatus { .. }) {
                debug!(path = %request.destination.display(), "cleaning up partial file after error");
                let _ = tokio::fs::remove_file(&request.destination).await;
            }
            shared.update(id, |record| record.status = EngineStatus::Failed)
        }
    };

    if recorded {
        shared.emit(EngineEvent::Completed(id));
    }
}

async fn transfer(shared: &Shared, id: EngineId, request: &EngineRequest) -> Result<u64, EngineError> {
    let mut builder = shared.client.get(&request.url);
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }

    let response = builder
        .send()
        .await
        .map_err(|e| EngineError::network(&request.url, e))?;

    // An error page's length is not the size of the file.
    if !response.status().is_success() {
        return Err(EngineError::http_status(
            &request.url,
            response.status().as_u16(),
        ));
    }

    let total_bytes = response.content_length().unwrap_or(0);
    shared.update(id, |record| record.total_bytes = total_bytes);

    if let Some(parent) = request.destination.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| EngineError::io(parent, e))?;
    }
    let mut file = File::create(&request.destination)
        .await
        .map_err(|e| EngineError::io(&request.destination, e))?;

    stream_to_file(shared, id, &mut file, response, &request.url, &request.destination).await
}

/// Streams response body to file, returning bytes written.
///
/// The record's transferred byte count is updated after every chunk.
async fn stream_to_file(
    shared: &Shared,
    id: EngineId,
    file: &mut File,
    response: reqwest::Response,
    url: &str,
    file_path: &Path,
) -> Result<u64, EngineError> {
    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();
    let mut bytes_written: u64 = 0;

    while let Some(chunk_result) = stream.next().await {
        let chunk = chunk_result.map_err(|e| EngineError::network(url, e))?;

        writer
            .write_all(&chunk)
            .await
            .map_err(|e| EngineError::io(file_path, e))?;

        bytes_written += chunk.len() as u64;
        shared.update(id, |record| record.downloaded_bytes = bytes_written);
    }

    writer
        .flush()
        .await
        .map_err(|e| EngineError::io(file_path, e))?;

    Ok(bytes_written)
}

fn build_client(connect_timeout_secs: u64, read_timeout_secs: u64) -> Result<Client, reqwest::Error> {
    Client::builder()
        .connect_timeout(Duration::from_secs(connect_timeout_secs))
        .timeout(Duration::from_secs(read_timeout_secs))
        .gzip(true)
        .user_agent(user_agent::default_download_user_agent())
        .build()
}
