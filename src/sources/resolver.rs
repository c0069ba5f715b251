use std::sync::Arc;
use tracing::{debug, info};

use super::{
    is_youtube_url, normalize_query, video_id_from_url, ExtractionError, Extractor, SongId,
    VideoInfo,
};
use crate::{
    error::{BotError, BotResult},
    storage::{MetadataStore, Song},
};

/// Result of a `bind` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindOutcome {
    /// The phrase now points at the song.
    Bound { query: String, song_id: SongId },
    /// Lookup only: the phrase is bound to this song.
    Existing { query: String, song_id: SongId },
    /// Lookup only: nothing is bound to the phrase.
    Unbound { query: String },
}

/// Maps links and phrases to song ids.
///
/// The library is consulted first. A live search only happens for a phrase
/// that has never been resolved, and its answer is stored as a binding so the
/// same phrase never reaches the network again.
pub struct Resolver {
    store: Arc<dyn MetadataStore>,
    extractor: Arc<dyn Extractor>,
    dj_max_duration: u64,
}

impl Resolver {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        extractor: Arc<dyn Extractor>,
        dj_max_duration: u64,
    ) -> Self {
        Self {
            store,
            extractor,
            dj_max_duration,
        }
    }

    pub async fn resolve(&self, input: &str) -> BotResult<SongId> {
        let input = input.trim();
        if input.is_empty() {
            return Err(BotError::InvalidArgument(
                "No url or search term given".to_string(),
            ));
        }

        let first = input.split_whitespace().next().unwrap_or(input);
        if is_youtube_url(first) {
            let song_id = video_id_from_url(first)
                .ok_or_else(|| BotError::InvalidArgument(format!("Not a video link: {first}")))?;
            self.ensure_song(&song_id).await?;
            return Ok(song_id);
        }

        let query = normalize_query(input);
        if let Some(song_id) = self.store.find_binding(&query).await? {
            debug!("🔗 \"{}\" is bound to {}", query, song_id);
            self.ensure_song(&song_id).await?;
            return Ok(song_id);
        }

        self.search_and_bind(&query).await
    }

    /// Binds a phrase to a link, or reports the current binding when no link
    /// is given.
    pub async fn bind(&self, phrase: &str, link: Option<&str>) -> BotResult<BindOutcome> {
        let query = normalize_query(phrase);
        if query.is_empty() {
            return Err(BotError::InvalidArgument(
                "No search term given to bind".to_string(),
            ));
        }

        let Some(link) = link else {
            return Ok(match self.store.find_binding(&query).await? {
                Some(song_id) => BindOutcome::Existing { query, song_id },
                None => BindOutcome::Unbound { query },
            });
        };

        let song_id = video_id_from_url(link)
            .ok_or_else(|| BotError::InvalidArgument(format!("Not a video link: {link}")))?;
        self.ensure_song(&song_id).await?;
        self.store.add_binding(&query, &song_id).await?;

        Ok(BindOutcome::Bound { query, song_id })
    }

    /// Top search matches offered to the user; the chosen id then goes
    /// through [`Resolver::ensure_song`].
    pub async fn search_choices(&self, term: &str, limit: usize) -> BotResult<Vec<VideoInfo>> {
        let query = normalize_query(term);
        if query.is_empty() {
            return Err(BotError::InvalidArgument(
                "No search term given".to_string(),
            ));
        }

        let results: Vec<VideoInfo> = self
            .extractor
            .search_many(&query, limit)
            .await?
            .into_iter()
            .filter(|info| !info.id.is_empty())
            .take(limit)
            .collect();

        if results.is_empty() {
            return Err(BotError::no_search_result(query));
        }
        Ok(results)
    }

    /// Makes sure the library knows the song, fetching its metadata once.
    pub async fn ensure_song(&self, song_id: &SongId) -> BotResult<Song> {
        if let Some(song) = self.store.find_song(song_id).await? {
            return Ok(song);
        }

        info!("📥 Fetching metadata for {}", song_id);
        let info = match self.extractor.extract_info(&song_id.watch_url()).await {
            Ok(info) => info,
            Err(ExtractionError::Unavailable(reason)) => {
                debug!("No video at {}: {}", song_id, reason);
                return Err(BotError::no_video_at_link(song_id.clone()));
            }
            Err(e) => return Err(e.into()),
        };
        let info = info
            .into_first_entry()
            .ok_or_else(|| BotError::no_video_at_link(song_id.clone()))?;

        let mut song = Song::from_info(&info, self.dj_max_duration);
        song.id = song_id.clone();
        self.store.insert_song(song.clone()).await?;
        Ok(song)
    }

    async fn search_and_bind(&self, query: &str) -> BotResult<SongId> {
        let info = self
            .extractor
            .search(query)
            .await?
            .ok_or_else(|| BotError::no_search_result(query))?;

        let song = Song::from_info(&info, self.dj_max_duration);
        let song_id = song.id.clone();
        self.store.insert_song(song).await?;
        self.store.add_binding(query, &song_id).await?;

        info!("🔍 \"{}\" resolved to {} by search", query, song_id);
        Ok(song_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::NotFoundKind, sources::MockExtractor, storage::JsonStorage};
    use pretty_assertions::assert_eq;

    fn info(id: &str, title: &str) -> VideoInfo {
        VideoInfo {
            id: id.to_string(),
            title: title.to_string(),
            duration: Some(180.0),
            ..Default::default()
        }
    }

    fn resolver(store: Arc<JsonStorage>, extractor: MockExtractor) -> Resolver {
        Resolver::new(store, Arc::new(extractor), 600)
    }

    #[tokio::test]
    async fn links_resolve_idempotently_without_searching() {
        let store = Arc::new(JsonStorage::in_memory());
        let mut extractor = MockExtractor::new();
        extractor
            .expect_extract_info()
            .times(1)
            .returning(|_| Ok(info("abc123", "Linked")));
        extractor.expect_search().never();

        let resolver = resolver(store.clone(), extractor);
        let first = resolver.resolve("https://youtu.be/abc123").await.unwrap();
        let second = resolver
            .resolve("https://www.youtube.com/watch?v=abc123")
            .await
            .unwrap();

        assert_eq!(first, SongId::new("abc123"));
        assert_eq!(first, second);
        let stored = store.find_song(&first).await.unwrap().unwrap();
        assert_eq!(stored.title, "Linked");
        assert!(stored.dj);
    }

    #[tokio::test]
    async fn phrases_are_searched_once_then_bound() {
        let store = Arc::new(JsonStorage::in_memory());
        let mut extractor = MockExtractor::new();
        extractor
            .expect_search()
            .times(1)
            .returning(|_| Ok(Some(info("s1", "Searched Song"))));
        extractor.expect_extract_info().never();

        let resolver = resolver(store.clone(), extractor);
        let first = resolver.resolve("Searched   Song").await.unwrap();
        let second = resolver.resolve("searched song").await.unwrap();

        assert_eq!(first, SongId::new("s1"));
        assert_eq!(second, first);
        assert_eq!(
            store.find_binding("searched song").await.unwrap(),
            Some(SongId::new("s1"))
        );
    }

    #[tokio::test]
    async fn bind_then_resolve_returns_the_bound_song() {
        let store = Arc::new(JsonStorage::in_memory());
        let mut extractor = MockExtractor::new();
        extractor
            .expect_extract_info()
            .times(1)
            .returning(|_| Ok(info("bound1", "Bound Song")));
        extractor.expect_search().never();

        let resolver = resolver(store, extractor);
        let outcome = resolver
            .bind("Party  Anthem", Some("https://youtu.be/bound1"))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            BindOutcome::Bound {
                query: "party anthem".into(),
                song_id: SongId::new("bound1"),
            }
        );

        assert_eq!(
            resolver.resolve("party anthem").await.unwrap(),
            SongId::new("bound1")
        );
        assert_eq!(
            resolver.bind("PARTY anthem", None).await.unwrap(),
            BindOutcome::Existing {
                query: "party anthem".into(),
                song_id: SongId::new("bound1"),
            }
        );
        assert_eq!(
            resolver.bind("nothing here", None).await.unwrap(),
            BindOutcome::Unbound {
                query: "nothing here".into()
            }
        );
    }

    #[tokio::test]
    async fn binding_to_a_forgotten_song_refetches_metadata() {
        let store = Arc::new(JsonStorage::in_memory());
        store
            .add_binding("old favourite", &SongId::new("old1"))
            .await
            .unwrap();

        let mut extractor = MockExtractor::new();
        extractor
            .expect_extract_info()
            .times(1)
            .returning(|_| Ok(info("old1", "Old Favourite")));
        extractor.expect_search().never();

        let resolver = resolver(store.clone(), extractor);
        assert_eq!(
            resolver.resolve("Old Favourite").await.unwrap(),
            SongId::new("old1")
        );
        assert!(store.find_song(&SongId::new("old1")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn empty_search_and_dead_link_fail_differently() {
        let store = Arc::new(JsonStorage::in_memory());
        let mut extractor = MockExtractor::new();
        extractor.expect_search().returning(|_| Ok(None));
        extractor
            .expect_extract_info()
            .returning(|_| Err(ExtractionError::Unavailable("Private video".into())));

        let resolver = resolver(store.clone(), extractor);

        let search_err = resolver.resolve("no such song").await.unwrap_err();
        assert!(matches!(
            search_err,
            BotError::NotFound(NotFoundKind::NoSearchResult { ref query }) if query == "no such song"
        ));

        let link_err = resolver.resolve("https://youtu.be/dead01").await.unwrap_err();
        assert!(matches!(
            link_err,
            BotError::NotFound(NotFoundKind::NoVideoAtLink { ref id }) if id.as_str() == "dead01"
        ));
        assert_ne!(search_err.to_string(), link_err.to_string());
        assert!(store.find_binding("no such song").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn search_choices_skip_entries_without_ids() {
        let mut extractor = MockExtractor::new();
        extractor
            .expect_search_many()
            .withf(|term: &str, limit: &usize| term == "lofi beats" && *limit == 5)
            .times(1)
            .returning(|_, _| {
                Ok(vec![
                    info("one", "One"),
                    info("", "Channel, not a video"),
                    info("two", "Two"),
                ])
            });

        let resolver = resolver(Arc::new(JsonStorage::in_memory()), extractor);
        let choices = resolver.search_choices("LoFi  Beats", 5).await.unwrap();
        let ids: Vec<_> = choices.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn empty_input_is_rejected() {
        let resolver = resolver(Arc::new(JsonStorage::in_memory()), MockExtractor::new());
        assert!(matches!(
            resolver.resolve("   ").await,
            Err(BotError::InvalidArgument(_))
        ));
        assert!(matches!(
            resolver.bind(" ", None).await,
            Err(BotError::InvalidArgument(_))
        ));
    }
}
