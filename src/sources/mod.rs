//! # Sources Module
//!
//! Everything between a user's words and a playable stream.
//!
//! - [`youtube`] wraps the `yt-dlp` executable behind the [`Extractor`] trait
//! - [`resolver`] turns a link or a phrase into a [`SongId`], remembering
//!   searches in the library so a phrase is only searched once
//! - [`compiler`] turns a [`SongId`] into a [`compiler::Track`] ready for the
//!   voice backend, applying the bass-boost rule and the ban list

pub mod compiler;
pub mod resolver;
pub mod youtube;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{fmt, sync::LazyLock, time::Duration};
use thiserror::Error;
use url::Url;

pub use compiler::{SourceCompiler, Track};
pub use resolver::Resolver;
pub use youtube::YtDlpExtractor;

static VIDEO_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").expect("valid video id regex"));

const YOUTUBE_HOSTS: &[&str] = &[
    "youtube.com",
    "www.youtube.com",
    "m.youtube.com",
    "music.youtube.com",
    "youtu.be",
    "www.youtu.be",
];

/// Canonical key of a song: the YouTube video id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SongId(String);

impl SongId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn watch_url(&self) -> String {
        format!("https://youtube.com/watch?v={}", self.0)
    }

    pub fn short_url(&self) -> String {
        format!("https://youtu.be/{}", self.0)
    }
}

impl fmt::Display for SongId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Metadata reported by the extractor for one video (or a playlist of them).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VideoInfo {
    pub id: String,
    #[serde(default)]
    pub title: String,
    pub duration: Option<f64>,
    pub uploader: Option<String>,
    pub thumbnail: Option<String>,
    pub webpage_url: Option<String>,
    /// Media URL of the selected audio format.
    pub url: Option<String>,
    pub is_live: Option<bool>,
    pub entries: Option<Vec<VideoInfo>>,
}

impl VideoInfo {
    pub fn song_id(&self) -> SongId {
        SongId::new(self.id.clone())
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration
            .filter(|d| d.is_finite() && *d >= 0.0)
            .map(Duration::from_secs_f64)
    }

    pub fn is_live(&self) -> bool {
        self.is_live.unwrap_or(false)
    }

    /// Playlist results collapse to their first entry.
    pub fn into_first_entry(self) -> Option<VideoInfo> {
        match self.entries {
            Some(entries) => entries.into_iter().next(),
            None => Some(self),
        }
    }
}

#[derive(Debug, Error)]
pub enum ExtractionError {
    /// The remote video cannot be fetched (removed, private, region locked...).
    #[error("{0}")]
    Unavailable(String),
    #[error("could not run yt-dlp: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("unreadable yt-dlp output: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Video metadata and search provider.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Full metadata for a video URL, including a streamable media URL.
    async fn extract_info(&self, url: &str) -> Result<VideoInfo, ExtractionError>;

    /// Best single match for a search term.
    async fn search(&self, term: &str) -> Result<Option<VideoInfo>, ExtractionError>;

    /// Up to `limit` lightweight matches for a search term.
    async fn search_many(&self, term: &str, limit: usize)
        -> Result<Vec<VideoInfo>, ExtractionError>;
}

/// Lower-cases and collapses whitespace so equivalent phrases share a binding.
pub fn normalize_query(raw: &str) -> String {
    raw.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

fn parse_loose(input: &str) -> Option<Url> {
    let trimmed = input.trim().trim_start_matches('<').trim_end_matches('>');
    Url::parse(trimmed)
        .or_else(|_| Url::parse(&format!("https://{trimmed}")))
        .ok()
        .filter(|url| matches!(url.scheme(), "http" | "https"))
}

/// True when the input points at a YouTube host, with or without a scheme.
pub fn is_youtube_url(input: &str) -> bool {
    parse_loose(input)
        .and_then(|url| url.host_str().map(|h| YOUTUBE_HOSTS.contains(&h)))
        .unwrap_or(false)
}

/// Extracts the video id from the usual YouTube link shapes.
pub fn video_id_from_url(input: &str) -> Option<SongId> {
    let url = parse_loose(input)?;
    let host = url.host_str()?;
    if !YOUTUBE_HOSTS.contains(&host) {
        return None;
    }

    let mut segments = url.path_segments()?.filter(|s| !s.is_empty());
    let candidate = if host.ends_with("youtu.be") {
        segments.next().map(str::to_string)
    } else {
        match segments.next() {
            Some("watch") => url
                .query_pairs()
                .find(|(k, _)| k == "v")
                .map(|(_, v)| v.into_owned()),
            Some("shorts" | "embed" | "v" | "live") => segments.next().map(str::to_string),
            _ => None,
        }
    }?;

    VIDEO_ID.is_match(&candidate).then(|| SongId::new(candidate))
}

/// Strict check used where a URL must be told apart from search words: the
/// input must carry an explicit http(s) scheme and a YouTube video id.
pub fn strict_video_id(input: &str) -> Option<SongId> {
    let url = Url::parse(input.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    video_id_from_url(input)
}

/// A YouTube link or a bare video id.
pub fn song_ref(input: &str) -> Option<SongId> {
    let input = input.trim();
    if VIDEO_ID.is_match(input) {
        return Some(SongId::new(input));
    }
    video_id_from_url(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn song_refs_accept_ids_and_links() {
        assert_eq!(song_ref("dQw4w9WgXcQ"), Some(SongId::new("dQw4w9WgXcQ")));
        assert_eq!(song_ref("https://youtu.be/dQw4w9WgXcQ"), Some(SongId::new("dQw4w9WgXcQ")));
        assert_eq!(song_ref("not an id"), None);
    }

    #[test]
    fn test_youtube_url_detection() {
        assert!(is_youtube_url("https://www.youtube.com/watch?v=dQw4w9WgXcQ"));
        assert!(is_youtube_url("https://youtu.be/dQw4w9WgXcQ"));
        assert!(is_youtube_url("youtu.be/dQw4w9WgXcQ"));
        assert!(is_youtube_url("https://music.youtube.com/watch?v=test"));
        assert!(!is_youtube_url("https://example.com/video"));
        assert!(!is_youtube_url("never gonna give you up"));
    }

    #[test]
    fn extracts_ids_from_link_shapes() {
        let cases = [
            ("https://www.youtube.com/watch?v=dQw4w9WgXcQ&t=42", "dQw4w9WgXcQ"),
            ("https://youtu.be/abc123", "abc123"),
            ("youtu.be/abc123?si=share", "abc123"),
            ("https://youtube.com/shorts/Xy_-9", "Xy_-9"),
            ("https://m.youtube.com/embed/embedId", "embedId"),
            ("<https://www.youtube.com/watch?v=angle>", "angle"),
        ];
        for (input, expected) in cases {
            assert_eq!(video_id_from_url(input), Some(SongId::new(expected)), "{input}");
        }

        assert_eq!(video_id_from_url("https://www.youtube.com/feed/trending"), None);
        assert_eq!(video_id_from_url("https://vimeo.com/12345"), None);
    }

    #[test]
    fn strict_ids_need_a_scheme() {
        assert_eq!(
            strict_video_id("https://youtu.be/abc123"),
            Some(SongId::new("abc123"))
        );
        assert_eq!(strict_video_id("youtu.be/abc123"), None);
        assert_eq!(strict_video_id("remix"), None);
    }

    #[test]
    fn normalizes_queries() {
        assert_eq!(normalize_query("  Never   Gonna\tGive You UP "), "never gonna give you up");
        assert_eq!(normalize_query(""), "");
    }

    #[test]
    fn playlist_collapses_to_first_entry() {
        let info = VideoInfo {
            id: "list".into(),
            entries: Some(vec![
                VideoInfo {
                    id: "first".into(),
                    ..Default::default()
                },
                VideoInfo {
                    id: "second".into(),
                    ..Default::default()
                },
            ]),
            ..Default::default()
        };
        assert_eq!(info.into_first_entry().map(|v| v.id), Some("first".to_string()));

        let empty = VideoInfo {
            id: "list".into(),
            entries: Some(Vec::new()),
            ..Default::default()
        };
        assert!(empty.into_first_entry().is_none());
    }
}
