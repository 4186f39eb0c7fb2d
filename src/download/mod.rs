//! Download orchestration: identifiers, requests, status, handler and items.
//!
//! This module layers a small contract over a [`DownloadEngine`](crate::engine::DownloadEngine):
//!
//! - [`DownloadHandler`] submits requests, resolves status and cancels transfers,
//!   and receives the engine's asynchronous completion/click events through the
//!   process-wide [`HandlerRegistry`].
//! - [`FileDownloadItem`] composes a primary download with secondary downloads
//!   and exposes one start/cancel/delete/status contract over the whole tree.
//!
//! # Example
//!
//! ```no_run
//! use course_downloader::download::{DownloadItem, FileDownloadItem};
//! use course_downloader::engine::MemoryEngine;
//! use course_downloader::permission::AlwaysGranted;
//! use course_downloader::services::{ActionContext, DownloadServices};
//! use course_downloader::storage::{Storage, StorageLocations};
//! use std::sync::Arc;
//!
//! let services = DownloadServices::builder(Arc::new(MemoryEngine::new()))
//!     .storage(StorageLocations::new(Storage::new("./downloads")))
//!     .build();
//! let ctx = ActionContext::new(Arc::new(AlwaysGranted));
//!
//! let slides = FileDownloadItem::new(&services, Some("https://example.com/slides.pdf"), "slides.pdf");
//! assert!(slides.start(&ctx));
//! println!("{:?}", slides.status());
//! ```

pub mod assets;
mod error;
pub mod filename;
mod handler;
mod identifier;
mod item;
mod request;
mod status;

pub use error::DownloadError;
pub use handler::{DownloadHandler, HandlerRegistry};
pub use identifier::DownloadIdentifier;
pub use item::{DownloadItem, FileDownloadItem, OpenTarget, SecondaryPredicate};
pub use request::{DownloadRequest, RequestEnvironment};
pub use status::{DownloadState, DownloadStatus};
