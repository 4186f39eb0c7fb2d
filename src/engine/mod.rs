//! Transfer engine abstraction.
//!
//! An engine performs the actual byte transfer. It accepts a request and
//! returns an opaque numeric [`EngineId`], keeps a queryable record per
//! transfer, supports removal, and raises asynchronous [`EngineEvent`]s on a
//! broadcast channel when a transfer completes (or is removed) and when the
//! user clicks a transfer's notification.
//!
//! Two implementations ship with the crate:
//! - [`HttpEngine`] streams HTTP responses to disk on the tokio runtime
//! - [`MemoryEngine`] is driven explicitly and performs no network I/O

mod error;
pub mod http;
pub mod memory;

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

pub use error::EngineError;
pub use http::{HttpEngine, HttpEngineOptions};
pub use memory::MemoryEngine;

/// Capacity of an engine's event broadcast channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Opaque id assigned by the engine to one submitted transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EngineId(pub u64);

impl fmt::Display for EngineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Coarse status code reported by the engine for one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineStatus {
    Pending,
    Running,
    Paused,
    Successful,
    Failed,
    /// A code the engine reports that this crate does not know.
    Other(i32),
}

/// Network types a transfer may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NetworkTypes(u8);

impl NetworkTypes {
    pub const NONE: Self = Self(0);
    pub const WIFI: Self = Self(0b01);
    pub const MOBILE: Self = Self(0b10);

    /// Returns true if every type in `other` is allowed.
    #[must_use]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Raw bitmask.
    #[must_use]
    pub fn bits(self) -> u8 {
        self.0
    }
}

impl BitOr for NetworkTypes {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for NetworkTypes {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// A fully assembled submission for the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineRequest {
    /// Source URL.
    pub url: String,
    /// Destination file.
    pub destination: PathBuf,
    /// Title shown in notifications.
    pub title: String,
    /// Whether the engine shows a notification while transferring.
    pub notification_visible: bool,
    /// Extra request headers.
    pub headers: Vec<(String, String)>,
    /// Allowed network types.
    pub network_types: NetworkTypes,
}

/// Engine-side record of one transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineRecord {
    pub id: EngineId,
    pub url: String,
    pub title: String,
    pub destination: PathBuf,
    /// Expected size, `0` when unknown.
    pub total_bytes: u64,
    pub downloaded_bytes: u64,
    pub status: EngineStatus,
}

impl EngineRecord {
    /// Creates a pending record for a fresh submission.
    #[must_use]
    pub fn pending(id: EngineId, request: &EngineRequest) -> Self {
        Self {
            id,
            url: request.url.clone(),
            title: request.title.clone(),
            destination: request.destination.clone(),
            total_bytes: 0,
            downloaded_bytes: 0,
            status: EngineStatus::Pending,
        }
    }
}

/// Asynchronous events raised by an engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// A transfer reached a terminal state or was removed.
    Completed(EngineId),
    /// The user clicked the notification of one or more running transfers.
    RunningNotificationClicked(Vec<EngineId>),
    /// The user clicked the notification of a completed transfer.
    CompletedNotificationClicked(EngineId),
}

/// The transfer engine contract.
///
/// All methods return immediately; transfer work happens inside the engine.
pub trait DownloadEngine: Send + Sync + fmt::Debug {
    /// Submits a transfer and returns its engine id.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] if the engine refuses the request.
    fn enqueue(&self, request: EngineRequest) -> Result<EngineId, EngineError>;

    /// Returns the record for `id`, if the engine still has one.
    fn query(&self, id: EngineId) -> Option<EngineRecord>;

    /// Returns all records the engine currently holds.
    fn query_all(&self) -> Vec<EngineRecord>;

    /// Returns the most recent record whose source URL equals `url`.
    fn find_by_url(&self, url: &str) -> Option<EngineRecord> {
        self.query_all()
            .into_iter()
            .filter(|record| record.url == url)
            .max_by_key(|record| record.id)
    }

    /// Removes a transfer (aborting it if it is still running).
    ///
    /// Returns true if a record was removed.
    fn remove(&self, id: EngineId) -> bool;

    /// Subscribes to the engine's event stream.
    fn subscribe(&self) -> broadcast::Receiver<EngineEvent>;
}
