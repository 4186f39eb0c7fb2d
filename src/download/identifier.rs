//! Stable identifiers naming one download across its lifecycle.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Names one download by its source URL.
///
/// Two identifiers are equal iff their URLs are equal. The string form is the
/// URL itself and is used as the key of the lifecycle registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DownloadIdentifier {
    url: String,
}

impl DownloadIdentifier {
    /// Creates an identifier for the given source URL.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// Returns the source URL this identifier names.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl fmt::Display for DownloadIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

impl From<&str> for DownloadIdentifier {
    fn from(url: &str) -> Self {
        Self::new(url)
    }
}

impl From<String> for DownloadIdentifier {
    fn from(url: String) -> Self {
        Self::new(url)
    }
}
