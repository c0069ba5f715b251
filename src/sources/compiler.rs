use regex::Regex;
use serenity::model::id::UserId;
use std::{sync::Arc, time::Duration};
use tracing::{info, warn};

use super::{ExtractionError, Extractor, SongId};
use crate::{
    error::{BotError, BotResult},
    storage::MetadataStore,
};

/// ffmpeg filter appended for bass-boosted titles.
pub const BASS_BOOST_FILTER: &str = "-af bass=g=50";

/// A compiled, playable unit: everything the voice backend needs to open the
/// stream, plus what the UI shows about it.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub song_id: SongId,
    pub title: String,
    /// Canonical watch URL.
    pub url: String,
    /// Direct media URL handed to the audio pipeline.
    pub media_url: String,
    /// Output options for the transcoder.
    pub ffmpeg_options: String,
    pub bass_boosted: bool,
    pub duration: Option<Duration>,
    pub uploader: Option<String>,
    pub thumbnail: Option<String>,
    pub requested_by: Option<UserId>,
}

/// One ban-list entry: titles containing `term` are refused with `reason`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BanRule {
    pub term: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct BanList {
    rules: Vec<BanRule>,
}

impl BanList {
    /// Parses `term=reason;term=reason`. A bare term is banned with a
    /// generic reason.
    pub fn parse(rules_text: &str) -> Self {
        let rules = rules_text
            .split(';')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| match entry.split_once('=') {
                Some((term, reason)) => BanRule {
                    term: term.trim().to_lowercase(),
                    reason: reason.trim().to_string(),
                },
                None => BanRule {
                    term: entry.to_lowercase(),
                    reason: "blocked by server policy".to_string(),
                },
            })
            .filter(|rule| !rule.term.is_empty())
            .collect();
        Self { rules }
    }

    /// Reason the title is banned, if any rule matches.
    pub fn check(&self, title: &str) -> Option<&str> {
        let title = title.to_lowercase();
        self.rules
            .iter()
            .find(|rule| title.contains(&rule.term))
            .map(|rule| rule.reason.as_str())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }
}

/// Per-title audio treatment and content policy.
#[derive(Debug, Clone)]
pub struct CompilerSettings {
    pub base_options: String,
    pub bass_boost: Regex,
    pub ban_list: BanList,
}

impl CompilerSettings {
    pub fn needs_bass_boost(&self, title: &str) -> bool {
        self.bass_boost.is_match(title)
    }

    pub fn options_for(&self, title: &str) -> (String, bool) {
        if self.needs_bass_boost(title) {
            let options = format!("{} {}", self.base_options, BASS_BOOST_FILTER);
            (options.trim().to_string(), true)
        } else {
            (self.base_options.clone(), false)
        }
    }
}

/// Turns song ids into playable tracks.
pub struct SourceCompiler {
    store: Arc<dyn MetadataStore>,
    extractor: Arc<dyn Extractor>,
    settings: CompilerSettings,
}

impl SourceCompiler {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        extractor: Arc<dyn Extractor>,
        settings: CompilerSettings,
    ) -> Self {
        Self {
            store,
            extractor,
            settings,
        }
    }

    /// Fetches stream info for the song and applies the audio rules.
    ///
    /// A video the extractor reports unavailable is dropped from the library
    /// before the error is returned. Local extractor faults leave the library
    /// untouched.
    pub async fn compile(
        &self,
        song_id: &SongId,
        requested_by: Option<UserId>,
    ) -> BotResult<Track> {
        let url = song_id.watch_url();

        let info = match self.extractor.extract_info(&url).await {
            Ok(info) => info,
            Err(source @ ExtractionError::Unavailable(_)) => {
                return Err(self.drop_stale(song_id, source).await)
            }
            Err(e) => {
                warn!("❌ Could not extract {}: {}", song_id, e);
                return Err(e.into());
            }
        };

        let Some(info) = info.into_first_entry() else {
            let source = ExtractionError::Unavailable("empty playlist".to_string());
            return Err(self.drop_stale(song_id, source).await);
        };

        let Some(media_url) = info.url.clone().filter(|u| !u.is_empty()) else {
            let source = ExtractionError::Unavailable("no playable audio format".to_string());
            return Err(self.drop_stale(song_id, source).await);
        };

        let (ffmpeg_options, bass_boosted) = self.settings.options_for(&info.title);

        if let Some(reason) = self.settings.ban_list.check(&info.title) {
            warn!("🚫 Banned title refused: {} ({})", info.title, reason);
            self.store.set_banned(song_id, reason).await?;
            return Err(BotError::Banned {
                title: info.title,
                reason: reason.to_string(),
            });
        }

        info!(
            "🎛️ Compiled {} ({}){}",
            info.title,
            song_id,
            if bass_boosted { " with bass boost" } else { "" }
        );

        Ok(Track {
            song_id: song_id.clone(),
            duration: info.duration(),
            title: info.title,
            url,
            media_url,
            ffmpeg_options,
            bass_boosted,
            uploader: info.uploader,
            thumbnail: info.thumbnail,
            requested_by,
        })
    }

    async fn drop_stale(&self, song_id: &SongId, source: ExtractionError) -> BotError {
        warn!("❌ Extraction failed for {}: {}", song_id, source);
        if let Err(e) = self.store.remove_song(song_id).await {
            warn!("Could not remove stale song {}: {}", song_id, e);
        }
        BotError::Unplayable {
            song_id: song_id.clone(),
            source,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        sources::{MockExtractor, VideoInfo},
        storage::{tests::song, JsonStorage},
    };
    use mockall::predicate::function;
    use pretty_assertions::assert_eq;

    pub(crate) fn settings() -> CompilerSettings {
        CompilerSettings {
            base_options: "-vn".to_string(),
            bass_boost: Regex::new(r"(?i)bass\s*boost(ed)?").unwrap(),
            ban_list: BanList::parse("earrape=too loud; rickroll = no"),
        }
    }

    fn info(id: &str, title: &str) -> VideoInfo {
        VideoInfo {
            id: id.to_string(),
            title: title.to_string(),
            duration: Some(212.0),
            url: Some(format!("https://media.example/{id}")),
            ..Default::default()
        }
    }

    #[test]
    fn ban_list_parsing() {
        let list = BanList::parse("a=reason a;; B ; =empty");
        assert_eq!(list.len(), 2);
        assert_eq!(list.check("xAx"), Some("reason a"));
        assert_eq!(list.check("b side"), Some("blocked by server policy"));
        assert_eq!(list.check("hush"), None);
    }

    #[test]
    fn bass_boost_rule_appends_filter() {
        let settings = settings();
        assert_eq!(
            settings.options_for("Song (BASS BOOSTED)"),
            ("-vn -af bass=g=50".to_string(), true)
        );
        assert_eq!(settings.options_for("Song"), ("-vn".to_string(), false));
    }

    #[tokio::test]
    async fn compiles_a_track_tagged_with_its_id() {
        let store = Arc::new(JsonStorage::in_memory());
        let mut extractor = MockExtractor::new();
        extractor
            .expect_extract_info()
            .with(function(|url: &str| url == "https://youtube.com/watch?v=abc123"))
            .times(1)
            .returning(|_| Ok(info("abc123", "Bass Boosted Anthem")));

        let compiler = SourceCompiler::new(store, Arc::new(extractor), settings());
        let track = compiler.compile(&SongId::new("abc123"), None).await.unwrap();

        assert_eq!(track.song_id, SongId::new("abc123"));
        assert_eq!(track.url, "https://youtube.com/watch?v=abc123");
        assert_eq!(track.media_url, "https://media.example/abc123");
        assert_eq!(track.ffmpeg_options, "-vn -af bass=g=50");
        assert!(track.bass_boosted);
    }

    #[tokio::test]
    async fn playlist_results_use_the_first_entry() {
        let store = Arc::new(JsonStorage::in_memory());
        let mut extractor = MockExtractor::new();
        extractor.expect_extract_info().returning(|_| {
            Ok(VideoInfo {
                id: "list".into(),
                entries: Some(vec![info("first", "First"), info("second", "Second")]),
                ..Default::default()
            })
        });

        let compiler = SourceCompiler::new(store, Arc::new(extractor), settings());
        let track = compiler.compile(&SongId::new("first"), None).await.unwrap();
        assert_eq!(track.title, "First");
        assert!(!track.bass_boosted);
    }

    #[tokio::test]
    async fn extraction_failure_removes_the_song() {
        let store = Arc::new(JsonStorage::in_memory());
        store.insert_song(song("xyz789", "Gone", true, 3)).await.unwrap();

        let mut extractor = MockExtractor::new();
        extractor
            .expect_extract_info()
            .returning(|_| Err(ExtractionError::Unavailable("Video unavailable".into())));

        let compiler = SourceCompiler::new(store.clone(), Arc::new(extractor), settings());
        let err = compiler
            .compile(&SongId::new("xyz789"), None)
            .await
            .unwrap_err();

        assert!(matches!(&err, BotError::Unplayable { song_id, .. } if song_id.as_str() == "xyz789"));
        assert!(err.to_string().contains("xyz789"));
        assert!(store.find_song(&SongId::new("xyz789")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn local_extractor_faults_keep_the_song() {
        let store = Arc::new(JsonStorage::in_memory());
        store.insert_song(song("keep1", "Keeper", true, 42)).await.unwrap();

        let mut extractor = MockExtractor::new();
        extractor.expect_extract_info().returning(|_| {
            Err(ExtractionError::Spawn(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "yt-dlp not found",
            )))
        });

        let compiler = SourceCompiler::new(store.clone(), Arc::new(extractor), settings());
        let err = compiler.compile(&SongId::new("keep1"), None).await.unwrap_err();

        assert!(matches!(err, BotError::Extraction(ExtractionError::Spawn(_))));
        let stored = store.find_song(&SongId::new("keep1")).await.unwrap().unwrap();
        assert_eq!(stored.query_count, 42);
    }

    #[tokio::test]
    async fn banned_titles_are_refused_and_recorded() {
        let store = Arc::new(JsonStorage::in_memory());
        store.insert_song(song("bad", "Earrape remix", true, 0)).await.unwrap();

        let mut extractor = MockExtractor::new();
        extractor
            .expect_extract_info()
            .returning(|_| Ok(info("bad", "EARRAPE remix")));

        let compiler = SourceCompiler::new(store.clone(), Arc::new(extractor), settings());
        let err = compiler.compile(&SongId::new("bad"), None).await.unwrap_err();

        match err {
            BotError::Banned { title, reason } => {
                assert_eq!(title, "EARRAPE remix");
                assert_eq!(reason, "too loud");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        let stored = store.find_song(&SongId::new("bad")).await.unwrap().unwrap();
        assert_eq!(stored.banned.as_deref(), Some("too loud"));
        assert!(!stored.dj);
    }
}
