//! Storage locations for downloaded artifacts.
//!
//! Artifacts live at `<storage-root>/<folder>/<file-name>`. A
//! [`StorageLocations`] value holds the internal location, an optional
//! external one (removable media), and which of them new downloads prefer.
//! Lookups search internal storage first and external storage second.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Which storage location a download uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    #[default]
    Internal,
    External,
}

impl StorageKind {
    /// Returns the stable string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Internal => "internal",
            Self::External => "external",
        }
    }
}

/// One storage root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    /// Creates a storage rooted at `root`. The directory need not exist yet.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns true if files can be created below the root.
    ///
    /// A root that doesn't exist yet is writable when its nearest existing
    /// ancestor is a writable directory.
    #[must_use]
    pub fn is_writable(&self) -> bool {
        let mut candidate = Some(self.root.as_path());
        while let Some(path) = candidate {
            match fs::metadata(path) {
                Ok(metadata) => return metadata.is_dir() && !metadata.permissions().readonly(),
                Err(error) if error.kind() == io::ErrorKind::NotFound => {
                    candidate = path.parent().filter(|p| !p.as_os_str().is_empty());
                }
                Err(error) => {
                    debug!(path = %path.display(), %error, "storage metadata unavailable");
                    return false;
                }
            }
        }
        // Relative root whose ancestors are all missing: the working directory decides.
        fs::metadata(".").is_ok_and(|m| m.is_dir() && !m.permissions().readonly())
    }

    /// User-facing message for an unwritable storage.
    #[must_use]
    pub fn write_error_message(&self) -> String {
        format!(
            "Cannot write to {}. Check that the storage is available and writable.",
            self.root.display()
        )
    }

    /// Removes empty directories in and above `dir`, up to (but never
    /// including) the root. Returns the number of directories removed.
    pub fn clean(&self, dir: &Path) -> usize {
        if !dir.starts_with(&self.root) {
            warn!(dir = %dir.display(), root = %self.root.display(), "refusing to clean outside storage root");
            return 0;
        }

        let mut removed = self.remove_empty_below(dir);

        let mut current = Some(dir);
        while let Some(path) = current {
            if path == self.root || !path.starts_with(&self.root) {
                break;
            }
            if fs::remove_dir(path).is_err() {
                break;
            }
            removed += 1;
            current = path.parent();
        }

        if removed > 0 {
            debug!(dir = %dir.display(), removed, "cleaned empty directories");
        }
        removed
    }

    fn remove_empty_below(&self, dir: &Path) -> usize {
        let Ok(entries) = fs::read_dir(dir) else {
            return 0;
        };
        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if entry.file_type().is_ok_and(|t| t.is_dir()) {
                removed += self.remove_empty_below(&path);
                if fs::remove_dir(&path).is_ok() {
                    removed += 1;
                }
            }
        }
        removed
    }
}

/// Internal and optional external storage plus the preferred choice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLocations {
    internal: Storage,
    external: Option<Storage>,
    preferred: StorageKind,
}

impl StorageLocations {
    /// Locations with internal storage only.
    #[must_use]
    pub fn new(internal: Storage) -> Self {
        Self {
            internal,
            external: None,
            preferred: StorageKind::Internal,
        }
    }

    /// Adds external storage.
    #[must_use]
    pub fn with_external(mut self, external: Storage) -> Self {
        self.external = Some(external);
        self
    }

    /// Sets the storage new downloads prefer.
    #[must_use]
    pub fn prefer(mut self, kind: StorageKind) -> Self {
        self.preferred = kind;
        self
    }

    /// Internal storage.
    #[must_use]
    pub fn internal(&self) -> &Storage {
        &self.internal
    }

    /// External storage, if configured.
    #[must_use]
    pub fn external(&self) -> Option<&Storage> {
        self.external.as_ref()
    }

    /// The storage of the given kind, if available.
    #[must_use]
    pub fn get(&self, kind: StorageKind) -> Option<&Storage> {
        match kind {
            StorageKind::Internal => Some(&self.internal),
            StorageKind::External => self.external.as_ref(),
        }
    }

    /// Kind of the preferred storage, falling back to internal when external
    /// storage is preferred but missing.
    #[must_use]
    pub fn preferred_kind(&self) -> StorageKind {
        match (self.preferred, &self.external) {
            (StorageKind::External, Some(_)) => StorageKind::External,
            _ => StorageKind::Internal,
        }
    }

    /// Storage new downloads are written to.
    #[must_use]
    pub fn preferred(&self) -> &Storage {
        match (self.preferred, &self.external) {
            (StorageKind::External, Some(external)) => external,
            _ => &self.internal,
        }
    }

    /// Storages in lookup order: internal first, then external.
    pub fn search_order(&self) -> impl Iterator<Item = &Storage> {
        std::iter::once(&self.internal).chain(self.external.as_ref())
    }
}
