use async_trait::async_trait;
use rand::seq::SliceRandom;
use serenity::model::id::GuildId;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::player::Autoplay;
use crate::{
    error::{BotError, BotResult},
    sources::{SongId, SourceCompiler, Track},
    storage::{MetadataStore, Song},
};

const MAX_ATTEMPTS: usize = 3;

/// Picks DJ tracks at random from the DJ-eligible part of the library.
pub struct DjPicker {
    store: Arc<dyn MetadataStore>,
    compiler: Arc<SourceCompiler>,
}

impl DjPicker {
    pub fn new(store: Arc<dyn MetadataStore>, compiler: Arc<SourceCompiler>) -> Self {
        Self { store, compiler }
    }

    /// Candidates in random order, with the song that just played moved to the
    /// end. Falls back to the most requested song when nothing is DJ-eligible.
    async fn candidates(&self, last: Option<&SongId>) -> BotResult<Vec<SongId>> {
        let mut pool: Vec<Song> = self.store.dj_candidates().await?;
        pool.shuffle(&mut rand::thread_rng());
        if let Some(last) = last {
            if let Some(index) = pool.iter().position(|song| &song.id == last) {
                let repeat = pool.remove(index);
                pool.push(repeat);
            }
        }

        if pool.is_empty() {
            if let Some(song) = self.store.most_queried().await? {
                debug!("No DJ-eligible songs, falling back to {}", song.title);
                pool.push(song);
            }
        }

        Ok(pool.into_iter().map(|song| song.id).collect())
    }
}

#[async_trait]
impl Autoplay for DjPicker {
    async fn pick(&self, guild: GuildId, last: Option<&SongId>) -> BotResult<Track> {
        let candidates = self.candidates(last).await?;
        let mut last_error = None;

        for song_id in candidates.iter().take(MAX_ATTEMPTS) {
            match self.compiler.compile(song_id, None).await {
                Ok(track) => {
                    info!("🎧 DJ picked {} for guild {}", track.title, guild);
                    return Ok(track);
                }
                Err(e) => {
                    warn!("🎧 DJ candidate {} failed: {}", song_id, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or(BotError::NoDjCandidates))
    }
}
