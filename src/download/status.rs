//! Download status and lifecycle state definitions.

use std::fmt;
use std::iter::Sum;

use serde::{Deserialize, Serialize};

/// Lifecycle state of one transfer, or of an aggregate of transfers.
///
/// Variants are declared in lattice order `Failed < Pending < Running < Successful`;
/// combining two states yields the least advanced one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadState {
    /// Transfer failed (or the engine reported a code we don't know).
    Failed,
    /// Accepted by the engine, waiting to run.
    Pending,
    /// Transfer in progress (paused transfers count as running).
    Running,
    /// Transfer finished and the artifact is on disk.
    Successful,
}

impl DownloadState {
    /// Meet of two states: the least advanced of the pair.
    #[must_use]
    pub fn and(self, other: Self) -> Self {
        self.min(other)
    }

    /// Returns true for states in which the engine still works on the transfer.
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }

    /// Returns the stable string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Failed => "failed",
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Successful => "successful",
        }
    }
}

impl fmt::Display for DownloadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DownloadState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "failed" => Ok(Self::Failed),
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "successful" => Ok(Self::Successful),
            _ => Err(format!("invalid download state: {s}")),
        }
    }
}

/// Progress of one download or of a composite of downloads.
///
/// `total_bytes` is `0` while the size is unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadStatus {
    /// Expected size in bytes, `0` when unknown.
    pub total_bytes: u64,
    /// Bytes transferred so far.
    pub downloaded_bytes: u64,
    /// Lifecycle state.
    pub state: DownloadState,
}

impl DownloadStatus {
    /// Identity element of [`combine`](Self::combine): nothing to download, nothing missing.
    pub const EMPTY: Self = Self {
        total_bytes: 0,
        downloaded_bytes: 0,
        state: DownloadState::Successful,
    };

    /// Creates a status value.
    #[must_use]
    pub fn new(total_bytes: u64, downloaded_bytes: u64, state: DownloadState) -> Self {
        Self {
            total_bytes,
            downloaded_bytes,
            state,
        }
    }

    /// Merges two statuses: byte counts add up, states meet.
    ///
    /// Commutative and associative, with [`EMPTY`](Self::EMPTY) as identity.
    #[must_use]
    pub fn combine(self, other: Self) -> Self {
        Self {
            total_bytes: self.total_bytes.saturating_add(other.total_bytes),
            downloaded_bytes: self.downloaded_bytes.saturating_add(other.downloaded_bytes),
            state: self.state.and(other.state),
        }
    }

    /// Fraction of bytes transferred, `None` while the total is unknown.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn progress(&self) -> Option<f64> {
        (self.total_bytes > 0)
            .then(|| (self.downloaded_bytes as f64 / self.total_bytes as f64).min(1.0))
    }

    /// Returns true when the transfer is still pending or running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state.is_active()
    }
}

impl Sum for DownloadStatus {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::EMPTY, Self::combine)
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}/{} bytes)",
            self.state, self.downloaded_bytes, self.total_bytes
        )
    }
}
