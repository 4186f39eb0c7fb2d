//! Safe file names and folders derived from source URLs and titles.

use std::path::{Component, Path, PathBuf};

use url::Url;

/// Name used when nothing usable can be derived from a URL.
pub const FALLBACK_FILE_NAME: &str = "download.bin";

/// Sanitizes a file name for filesystem safety.
///
/// Replaces characters that are invalid on common filesystems:
/// / \ : * ? " < > |
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if sanitized.is_empty() {
        return "_".to_string();
    }

    if is_safe_filename_segment(&sanitized) {
        sanitized
    } else {
        sanitized
            .chars()
            .map(|c| if c == '.' { '_' } else { c })
            .collect()
    }
}

/// Turns a `/`-separated folder label into a relative path of sanitized
/// segments. Empty segments are dropped, so the result never escapes the
/// storage root.
#[must_use]
pub fn sanitize_folder(folder: &str) -> PathBuf {
    folder
        .split(['/', '\\'])
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(sanitize_filename)
        .collect()
}

/// File name derived from the last (percent-decoded) path segment of `url`.
///
/// Falls back to [`FALLBACK_FILE_NAME`] when the URL has no usable segment.
#[must_use]
pub fn file_name_from_url(url: &str) -> String {
    let Ok(parsed) = Url::parse(url) else {
        return FALLBACK_FILE_NAME.to_string();
    };
    if let Some(mut segments) = parsed.path_segments()
        && let Some(last) = segments.next_back()
        && !last.is_empty()
    {
        let decoded = urlencoding::decode(last).map_or_else(|_| last.to_string(), |d| d.into_owned());
        return sanitize_filename(&decoded);
    }
    FALLBACK_FILE_NAME.to_string()
}

/// Guess MIME type from a file name's extension.
#[must_use]
pub fn mime_type_for(file_name: &str) -> &'static str {
    let ext = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();

    match ext.as_str() {
        "pdf" => "application/pdf",
        "mp4" => "video/mp4",
        "m4v" => "video/x-m4v",
        "webm" => "video/webm",
        "mp3" => "audio/mpeg",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "vtt" => "text/vtt",
        "srt" => "application/x-subrip",
        "zip" => "application/zip",
        "txt" => "text/plain",
        "html" | "htm" => "text/html",
        _ => "application/octet-stream",
    }
}

fn is_safe_filename_segment(name: &str) -> bool {
    !Path::new(name).components().any(|component| {
        matches!(
            component,
            Component::CurDir | Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_filename_removes_invalid_chars() {
        assert_eq!(sanitize_filename("file/name.pdf"), "file_name.pdf");
        assert_eq!(sanitize_filename("file\\name.pdf"), "file_name.pdf");
        assert_eq!(sanitize_filename("file:name.pdf"), "file_name.pdf");
        assert_eq!(sanitize_filename("file<name>.pdf"), "file_name_.pdf");
        assert_eq!(sanitize_filename("file|name.pdf"), "file_name.pdf");
    }

    #[test]
    fn test_sanitize_filename_rewrites_dot_segments() {
        assert_eq!(sanitize_filename("."), "_");
        assert_eq!(sanitize_filename(".."), "__");
        assert_eq!(sanitize_filename("   "), "_");
    }

    #[test]
    fn test_sanitize_filename_preserves_valid_chars() {
        assert_eq!(sanitize_filename("Week 1 (intro).mp4"), "Week 1 (intro).mp4");
        assert_eq!(sanitize_filename("日本語.pdf"), "日本語.pdf");
    }

    #[test]
    fn test_sanitize_folder_stays_relative() {
        assert_eq!(
            sanitize_folder("Course A/Week 1"),
            PathBuf::from("Course A").join("Week 1")
        );
        assert_eq!(sanitize_folder("/abs//x/"), PathBuf::from("abs").join("x"));
        assert_eq!(sanitize_folder("../up"), PathBuf::from("__").join("up"));
        assert_eq!(sanitize_folder(""), PathBuf::new());
    }

    #[test]
    fn test_file_name_from_url_decodes_last_segment() {
        assert_eq!(
            file_name_from_url("https://cdn.example.com/v/lecture%201.mp4?token=x"),
            "lecture 1.mp4"
        );
        assert_eq!(
            file_name_from_url("https://cdn.example.com/slides.pdf"),
            "slides.pdf"
        );
    }

    #[test]
    fn test_file_name_from_url_fallback() {
        assert_eq!(file_name_from_url("https://example.com/"), FALLBACK_FILE_NAME);
        assert_eq!(file_name_from_url("not a url"), FALLBACK_FILE_NAME);
    }

    #[test]
    fn test_mime_type_for() {
        assert_eq!(mime_type_for("slides.pdf"), "application/pdf");
        assert_eq!(mime_type_for("video_hd.MP4"), "video/mp4");
        assert_eq!(mime_type_for("unknown"), "application/octet-stream");
    }
}
