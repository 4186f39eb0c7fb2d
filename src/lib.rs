//! Course Downloader Core Library
//!
//! This library orchestrates downloads of course material (videos, slides,
//! documents, subtitle bundles) on top of an asynchronous transfer engine.
//! A primary item may carry secondary items (a video's thumbnail and
//! subtitles) that are started, cancelled and deleted along with it, and
//! whose progress is aggregated into one combined status.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`download`] - Identifiers, requests, status, the handler and composite items
//! - [`engine`] - Transfer engine abstraction plus HTTP and in-memory engines
//! - [`lifecycle`] - Observable per-download lifecycle state registry
//! - [`permission`] - Permission authority used to gate storage writes
//! - [`storage`] - Storage locations and writability checks
//! - [`services`] - Process-wide service object injected into items
//! - [`config`] - File and environment configuration

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod download;
pub mod engine;
pub mod lifecycle;
pub mod permission;
pub mod services;
pub mod storage;
pub(crate) mod user_agent;

// Re-export commonly used types
pub use config::{ConfigError, DownloaderConfig};
pub use download::{
    DownloadError, DownloadHandler, DownloadIdentifier, DownloadItem, DownloadRequest,
    DownloadState, DownloadStatus, FileDownloadItem, HandlerRegistry, OpenTarget,
    RequestEnvironment,
};
pub use engine::{
    DownloadEngine, EngineError, EngineEvent, EngineId, EngineRecord, EngineRequest,
    EngineStatus, HttpEngine, HttpEngineOptions, MemoryEngine, NetworkTypes,
};
pub use lifecycle::{LifecycleCell, LifecycleRegistry, LifecycleState};
pub use permission::{
    AlwaysGranted, DeferredPermissions, PermissionAuthority, PermissionCheck, PermissionDecision,
    WRITE_STORAGE,
};
pub use services::{
    ActionContext, DownloadServices, DownloadServicesBuilder, LogMessages, LogNotifier, MessageSink,
    Notifier,
};
pub use storage::{Storage, StorageKind, StorageLocations};
