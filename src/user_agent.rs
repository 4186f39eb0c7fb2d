//! Shared User-Agent string for download requests.

/// Project URL for User-Agent identification.
const PROJECT_UA_URL: &str = "https://github.com/course-downloader/course-downloader";

/// Default User-Agent for download requests (identifies the tool).
#[must_use]
pub(crate) fn default_download_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("course-downloader/{version} (+{PROJECT_UA_URL})")
}
