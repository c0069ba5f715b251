use thiserror::Error;

use crate::{
    sources::{ExtractionError, SongId},
    storage::StorageError,
};

/// Why a resolution produced nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotFoundKind {
    /// A live search for a phrase returned no video.
    NoSearchResult { query: String },
    /// A concrete link or id points at no video.
    NoVideoAtLink { id: SongId },
}

impl std::fmt::Display for NotFoundKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoSearchResult { query } => write!(f, "Nothing found in video form: {query}"),
            Self::NoVideoAtLink { id } => write!(f, "No video found: {}", id.short_url()),
        }
    }
}

/// Errors surfaced to the command layer.
///
/// Every variant renders as a user-facing message; the command dispatcher logs
/// the source chain separately.
#[derive(Debug, Error)]
pub enum BotError {
    #[error("{0}")]
    NotFound(NotFoundKind),

    #[error("Extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Unable to play {}, removed from library ({source})", .song_id.watch_url())]
    Unplayable {
        song_id: SongId,
        #[source]
        source: ExtractionError,
    },

    #[error("{title} banned: {reason}")]
    Banned { title: String, reason: String },

    #[error("I am not in any voice channel, use join command instead")]
    NotConnected,

    #[error("I am in voice channel: {channel}")]
    AlreadyConnected { channel: String },

    #[error("No voice channel to join")]
    NoVoiceChannel,

    #[error("No songs in the library for DJ mode")]
    NoDjCandidates,

    #[error("{0}")]
    InvalidArgument(String),

    #[error("Library error: {0}")]
    Storage(#[from] StorageError),

    #[error("Voice error: {0}")]
    Voice(String),
}

impl BotError {
    pub fn no_search_result(query: impl Into<String>) -> Self {
        Self::NotFound(NotFoundKind::NoSearchResult {
            query: query.into(),
        })
    }

    pub fn no_video_at_link(id: SongId) -> Self {
        Self::NotFound(NotFoundKind::NoVideoAtLink { id })
    }
}

pub type BotResult<T> = std::result::Result<T, BotError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_messages_tell_search_and_link_apart() {
        let search = BotError::no_search_result("lofi beats");
        let link = BotError::no_video_at_link(SongId::new("abc123"));

        assert_eq!(search.to_string(), "Nothing found in video form: lofi beats");
        assert_eq!(link.to_string(), "No video found: https://youtu.be/abc123");
    }

    #[test]
    fn unplayable_references_the_song() {
        let err = BotError::Unplayable {
            song_id: SongId::new("xyz789"),
            source: ExtractionError::Unavailable("Video unavailable".into()),
        };

        let message = err.to_string();
        assert!(message.contains("xyz789"));
        assert!(message.contains("Video unavailable"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
