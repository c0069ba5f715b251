use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, path::PathBuf};
use thiserror::Error;
use tokio::{fs, sync::Mutex};
use tracing::{debug, info, warn};

use crate::sources::{SongId, VideoInfo};

const LIBRARY_FILE: &str = "songs.json";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt library file: {0}")]
    Serde(#[from] serde_json::Error),
}

/// A song known to the library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Song {
    pub id: SongId,
    pub title: String,
    #[serde(default)]
    pub uploader: Option<String>,
    #[serde(default)]
    pub duration_secs: Option<u64>,
    /// Eligible for DJ autoplay.
    #[serde(default)]
    pub dj: bool,
    #[serde(default)]
    pub banned: Option<String>,
    #[serde(default)]
    pub query_count: u64,
    #[serde(default)]
    pub tags: Vec<String>,
    pub added_at: DateTime<Utc>,
}

impl Song {
    /// Builds a library entry from extractor metadata.
    ///
    /// A song is DJ-eligible when it is not live and its duration is known and
    /// at most `dj_max_duration` seconds.
    pub fn from_info(info: &VideoInfo, dj_max_duration: u64) -> Self {
        let duration_secs = info.duration().map(|d| d.as_secs());
        let dj = !info.is_live() && duration_secs.is_some_and(|secs| secs <= dj_max_duration);

        Self {
            id: info.song_id(),
            title: info.title.clone(),
            uploader: info.uploader.clone(),
            duration_secs,
            dj,
            banned: None,
            query_count: 0,
            tags: Vec::new(),
            added_at: Utc::now(),
        }
    }
}

/// Song metadata, query bindings and play counters.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn find_song(&self, id: &SongId) -> Result<Option<Song>, StorageError>;

    /// Song bound to an already normalized query.
    async fn find_binding(&self, query: &str) -> Result<Option<SongId>, StorageError>;

    /// Idempotent upsert keyed by id; counters, tags and ban state of an
    /// existing entry survive.
    async fn insert_song(&self, song: Song) -> Result<(), StorageError>;

    /// Returns whether a song was removed.
    async fn remove_song(&self, id: &SongId) -> Result<bool, StorageError>;

    /// Returns the new count (0 when the song is unknown).
    async fn increment_query_count(&self, id: &SongId) -> Result<u64, StorageError>;

    /// Binds a normalized query to a song, replacing any previous binding.
    async fn add_binding(&self, query: &str, id: &SongId) -> Result<(), StorageError>;

    /// Most requested songs with the given DJ eligibility. Banned songs are
    /// never DJ-eligible and list with the others.
    async fn list_songs(&self, dj: bool, limit: usize) -> Result<Vec<Song>, StorageError>;

    /// Songs whose title or tags contain the fragment, case-insensitively.
    async fn search(&self, fragment: &str, limit: usize) -> Result<Vec<Song>, StorageError>;

    /// Every DJ-eligible, non-banned song.
    async fn dj_candidates(&self) -> Result<Vec<Song>, StorageError>;

    async fn most_queried(&self) -> Result<Option<Song>, StorageError>;

    /// Returns false when the song is unknown.
    async fn add_tag(&self, id: &SongId, tag: &str) -> Result<bool, StorageError>;

    /// Records why a song may not be played.
    async fn set_banned(&self, id: &SongId, reason: &str) -> Result<(), StorageError>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LibraryData {
    #[serde(default)]
    songs: BTreeMap<SongId, Song>,
    #[serde(default)]
    bindings: BTreeMap<String, SongId>,
}

impl LibraryData {
    fn ranked<'a>(&'a self, filter: impl Fn(&Song) -> bool) -> Vec<&'a Song> {
        let mut songs: Vec<&Song> = self.songs.values().filter(|s| filter(*s)).collect();
        songs.sort_by(|a, b| {
            b.query_count
                .cmp(&a.query_count)
                .then_with(|| a.title.cmp(&b.title))
        });
        songs
    }
}

/// Library manager backed by a single JSON file.
///
/// All mutations go through one async mutex and are flushed to disk before
/// the lock is released, so concurrent upserts of the same id cannot lose
/// each other's writes.
pub struct JsonStorage {
    path: Option<PathBuf>,
    data: Mutex<LibraryData>,
}

impl JsonStorage {
    pub async fn new(data_dir: PathBuf) -> Result<Self, StorageError> {
        fs::create_dir_all(&data_dir).await?;
        let path = data_dir.join(LIBRARY_FILE);

        let data = match fs::read_to_string(&path).await {
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => LibraryData::default(),
            Err(e) => return Err(e.into()),
        };

        info!(
            "📁 Library loaded from {} ({} songs, {} bindings)",
            path.display(),
            data.songs.len(),
            data.bindings.len()
        );

        Ok(Self {
            path: Some(path),
            data: Mutex::new(data),
        })
    }

    /// A library that never touches the disk.
    #[cfg(test)]
    pub fn in_memory() -> Self {
        Self {
            path: None,
            data: Mutex::new(LibraryData::default()),
        }
    }

    pub async fn stats(&self) -> StorageStats {
        let data = self.data.lock().await;
        StorageStats {
            songs: data.songs.len(),
            dj_songs: data.songs.values().filter(|s| s.dj).count(),
            bindings: data.bindings.len(),
            path: self.path.clone(),
        }
    }

    async fn persist(&self, data: &LibraryData) -> Result<(), StorageError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let content = serde_json::to_string_pretty(data)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, content).await?;
        fs::rename(&tmp, path).await?;
        debug!("💾 Library saved to {}", path.display());
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for JsonStorage {
    async fn find_song(&self, id: &SongId) -> Result<Option<Song>, StorageError> {
        Ok(self.data.lock().await.songs.get(id).cloned())
    }

    async fn find_binding(&self, query: &str) -> Result<Option<SongId>, StorageError> {
        Ok(self.data.lock().await.bindings.get(query).cloned())
    }

    async fn insert_song(&self, song: Song) -> Result<(), StorageError> {
        let mut data = self.data.lock().await;
        match data.songs.get_mut(&song.id) {
            Some(existing) => {
                existing.title = song.title;
                existing.uploader = song.uploader;
                existing.duration_secs = song.duration_secs;
                existing.dj = song.dj;
            }
            None => {
                info!("➕ New song in library: {} ({})", song.title, song.id);
                data.songs.insert(song.id.clone(), song);
            }
        }
        self.persist(&data).await
    }

    async fn remove_song(&self, id: &SongId) -> Result<bool, StorageError> {
        let mut data = self.data.lock().await;
        let removed = data.songs.remove(id).is_some();
        if removed {
            info!("🗑️ Song removed from library: {}", id);
            self.persist(&data).await?;
        }
        Ok(removed)
    }

    async fn increment_query_count(&self, id: &SongId) -> Result<u64, StorageError> {
        let mut data = self.data.lock().await;
        let Some(song) = data.songs.get_mut(id) else {
            warn!("Query count requested for unknown song {}", id);
            return Ok(0);
        };
        song.query_count += 1;
        let count = song.query_count;
        self.persist(&data).await?;
        Ok(count)
    }

    async fn add_binding(&self, query: &str, id: &SongId) -> Result<(), StorageError> {
        let mut data = self.data.lock().await;
        data.bindings.insert(query.to_string(), id.clone());
        info!("🔗 Bound \"{}\" -> {}", query, id);
        self.persist(&data).await
    }

    async fn list_songs(&self, dj: bool, limit: usize) -> Result<Vec<Song>, StorageError> {
        let data = self.data.lock().await;
        Ok(data
            .ranked(|s| s.dj == dj && (!dj || s.banned.is_none()))
            .into_iter()
            .take(limit)
            .cloned()
            .collect())
    }

    async fn search(&self, fragment: &str, limit: usize) -> Result<Vec<Song>, StorageError> {
        let needle = fragment.trim().to_lowercase();
        let data = self.data.lock().await;
        Ok(data
            .ranked(|s| {
                s.title.to_lowercase().contains(&needle)
                    || s.tags.iter().any(|t| t.to_lowercase().contains(&needle))
            })
            .into_iter()
            .take(limit)
            .cloned()
            .collect())
    }

    async fn dj_candidates(&self) -> Result<Vec<Song>, StorageError> {
        let data = self.data.lock().await;
        Ok(data
            .ranked(|s| s.dj && s.banned.is_none())
            .into_iter()
            .cloned()
            .collect())
    }

    async fn most_queried(&self) -> Result<Option<Song>, StorageError> {
        let data = self.data.lock().await;
        Ok(data
            .ranked(|s| s.banned.is_none())
            .into_iter()
            .next()
            .cloned())
    }

    async fn add_tag(&self, id: &SongId, tag: &str) -> Result<bool, StorageError> {
        let tag = tag.trim().to_lowercase();
        let mut data = self.data.lock().await;
        let Some(song) = data.songs.get_mut(id) else {
            return Ok(false);
        };
        if !song.tags.contains(&tag) {
            song.tags.push(tag);
            self.persist(&data).await?;
        }
        Ok(true)
    }

    async fn set_banned(&self, id: &SongId, reason: &str) -> Result<(), StorageError> {
        let mut data = self.data.lock().await;
        if let Some(song) = data.songs.get_mut(id) {
            song.banned = Some(reason.to_string());
            song.dj = false;
            self.persist(&data).await?;
        }
        Ok(())
    }
}

/// Library statistics
#[derive(Debug)]
pub struct StorageStats {
    pub songs: usize,
    pub dj_songs: usize,
    pub bindings: usize,
    pub path: Option<PathBuf>,
}

impl std::fmt::Display for StorageStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "📊 Library: {} songs ({} DJ-eligible), {} bindings @ {}",
            self.songs,
            self.dj_songs,
            self.bindings,
            self.path
                .as_ref()
                .map_or_else(|| "memory".to_string(), |p| p.display().to_string())
        )
    }
}
