//! Permission authority gating storage writes.
//!
//! Items ask the authority for [`WRITE_STORAGE`] before starting, cancelling
//! or deleting. An authority answers synchronously with either
//! [`PermissionCheck::Granted`] or [`PermissionCheck::Pending`]; a pending
//! request resolves later through [`PermissionAuthority::decision`].

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::debug;

/// Permission needed to write downloads to storage.
pub const WRITE_STORAGE: &str = "write_storage";

/// Immediate answer to a permission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionCheck {
    Granted,
    /// The user has not decided yet; see [`PermissionAuthority::decision`].
    Pending,
}

/// Final answer to a permission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionDecision {
    Granted,
    Denied,
}

/// Grants or denies named permissions.
#[async_trait]
pub trait PermissionAuthority: Send + Sync + std::fmt::Debug {
    /// Requests `name`, answering immediately.
    fn request_permission(&self, name: &str) -> PermissionCheck;

    /// Waits for the decision on a pending request for `name`.
    async fn decision(&self, name: &str) -> PermissionDecision;
}

/// Authority that grants everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysGranted;

#[async_trait]
impl PermissionAuthority for AlwaysGranted {
    fn request_permission(&self, _name: &str) -> PermissionCheck {
        PermissionCheck::Granted
    }

    async fn decision(&self, _name: &str) -> PermissionDecision {
        PermissionDecision::Granted
    }
}

/// Authority whose decisions are supplied later by the embedder.
///
/// Requests stay pending until [`resolve`](Self::resolve) is called for the
/// permission. A granted permission answers immediately afterwards.
#[derive(Debug, Default)]
pub struct DeferredPermissions {
    decisions: Mutex<HashMap<String, watch::Sender<Option<PermissionDecision>>>>,
}

impl DeferredPermissions {
    /// Creates an authority with no decisions.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the decision for `name`, waking every pending waiter.
    pub fn resolve(&self, name: &str, decision: PermissionDecision) {
        debug!(permission = name, ?decision, "permission resolved");
        self.channel(name).send_replace(Some(decision));
    }

    /// Current decision for `name`, if any.
    #[must_use]
    pub fn current(&self, name: &str) -> Option<PermissionDecision> {
        *self.channel(name).borrow()
    }

    fn channel(&self, name: &str) -> watch::Sender<Option<PermissionDecision>> {
        self.lock()
            .entry(name.to_string())
            .or_insert_with(|| watch::channel(None).0)
            .clone()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, watch::Sender<Option<PermissionDecision>>>> {
        self.decisions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl PermissionAuthority for DeferredPermissions {
    fn request_permission(&self, name: &str) -> PermissionCheck {
        match self.current(name) {
            Some(PermissionDecision::Granted) => PermissionCheck::Granted,
            _ => PermissionCheck::Pending,
        }
    }

    async fn decision(&self, name: &str) -> PermissionDecision {
        let mut receiver = self.channel(name).subscribe();
        match receiver.wait_for(Option::is_some).await {
            Ok(decision) => (*decision).unwrap_or(PermissionDecision::Denied),
            // Senders live in the map for the authority's lifetime.
            Err(_) => PermissionDecision::Denied,
        }
    }
}
