//! Downloadable assets of a course.
//!
//! A course item offers documents (slides, transcripts, reading material) and
//! videos in two qualities. Both qualities share the same thumbnail and
//! subtitle files, so a video's secondaries are deleted with it only while
//! the other quality isn't downloaded.

use super::filename::sanitize_filename;
use super::item::{DownloadItem, FileDownloadItem};
use crate::services::DownloadServices;

/// Kind of a course document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentKind {
    Slides,
    Transcript,
    Reading,
}

impl DocumentKind {
    /// File name prefix of the kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Slides => "slides",
            Self::Transcript => "transcript",
            Self::Reading => "reading",
        }
    }
}

/// Video quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VideoQuality {
    Sd,
    Hd,
}

impl VideoQuality {
    /// File name suffix of the quality.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sd => "sd",
            Self::Hd => "hd",
        }
    }

    /// The other quality.
    #[must_use]
    pub fn other(self) -> Self {
        match self {
            Self::Sd => Self::Hd,
            Self::Hd => Self::Sd,
        }
    }
}

/// Where a course item's files live: `<course>/<section>/<item>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourseItemRef {
    pub course: String,
    pub section: String,
    pub item: String,
}

impl CourseItemRef {
    /// Creates a reference.
    #[must_use]
    pub fn new(course: impl Into<String>, section: impl Into<String>, item: impl Into<String>) -> Self {
        Self {
            course: course.into(),
            section: section.into(),
            item: item.into(),
        }
    }

    /// Folder label for the item's files.
    #[must_use]
    pub fn folder(&self) -> String {
        [&self.course, &self.section, &self.item]
            .iter()
            .map(|part| sanitize_filename(part))
            .collect::<Vec<_>>()
            .join("/")
    }
}

/// Sources of a video item.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VideoSources {
    pub sd_url: Option<String>,
    pub sd_size: u64,
    pub hd_url: Option<String>,
    pub hd_size: u64,
    pub thumbnail_url: Option<String>,
    /// Subtitle files as `(language, url)`.
    pub subtitles: Vec<(String, String)>,
}

impl VideoSources {
    fn url(&self, quality: VideoQuality) -> Option<&str> {
        match quality {
            VideoQuality::Sd => self.sd_url.as_deref(),
            VideoQuality::Hd => self.hd_url.as_deref(),
        }
    }

    fn size(&self, quality: VideoQuality) -> u64 {
        match quality {
            VideoQuality::Sd => self.sd_size,
            VideoQuality::Hd => self.hd_size,
        }
    }
}

/// A PDF document of a course item.
#[must_use]
pub fn document(
    services: &DownloadServices,
    item: &CourseItemRef,
    kind: DocumentKind,
    url: Option<&str>,
    size: u64,
) -> FileDownloadItem {
    let file_name = format!("{}_{}.pdf", kind.as_str(), item.item);
    FileDownloadItem::new(services, url, file_name)
        .folder(&item.folder())
        .size(size)
        .mime_type("application/pdf")
}

/// A video of a course item in the given quality, with its thumbnail and
/// subtitles as secondary items.
#[must_use]
pub fn video(
    services: &DownloadServices,
    item: &CourseItemRef,
    sources: &VideoSources,
    quality: VideoQuality,
) -> FileDownloadItem {
    let other = video_file(services, item, sources, quality.other());
    video_file(services, item, sources, quality)
        .secondaries(video_secondaries(services, item, sources))
        .delete_secondary_if(move |_| !other.download_exists())
}

fn video_file(
    services: &DownloadServices,
    item: &CourseItemRef,
    sources: &VideoSources,
    quality: VideoQuality,
) -> FileDownloadItem {
    let file_name = format!("video_{}_{}.mp4", quality.as_str(), item.item);
    FileDownloadItem::new(services, sources.url(quality), file_name)
        .folder(&item.folder())
        .size(sources.size(quality))
        .mime_type("video/mp4")
}

fn video_secondaries(
    services: &DownloadServices,
    item: &CourseItemRef,
    sources: &VideoSources,
) -> Vec<FileDownloadItem> {
    let folder = item.folder();
    let mut secondaries = Vec::new();

    if let Some(url) = sources.thumbnail_url.as_deref() {
        secondaries.push(
            FileDownloadItem::new(services, Some(url), format!("thumbnail_{}.jpg", item.item))
                .folder(&folder)
                .mime_type("image/jpeg")
                .show_notification(false),
        );
    }

    for (language, url) in &sources.subtitles {
        secondaries.push(
            FileDownloadItem::new(
                services,
                Some(url.as_str()),
                format!("subtitles_{}_{language}.vtt", item.item),
            )
            .folder(&folder)
            .mime_type("text/vtt")
            .show_notification(false),
        );
    }

    secondaries
}
