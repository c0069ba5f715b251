use std::{collections::VecDeque, time::Duration};
use tracing::{debug, info};

use crate::sources::Track;

/// Pending tracks of one guild, strictly FIFO.
///
/// The current track is never stored here; the session keeps it apart.
#[derive(Debug, Default)]
pub struct PlaybackQueue {
    items: VecDeque<Track>,
}

impl PlaybackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a track.
    pub fn push(&mut self, track: Track) {
        info!("➕ Queued: {}", track.title);
        self.items.push_back(track);
    }

    /// Takes the next track (first in, first out).
    pub fn pop_next(&mut self) -> Option<Track> {
        let next = self.items.pop_front();
        match &next {
            Some(track) => debug!("➡️ Next in queue: {}", track.title),
            None => debug!("📭 Queue is empty"),
        }
        next
    }

    /// Removes the first track whose id equals `fragment` or whose title
    /// contains it, ignoring case. Order of the rest is preserved.
    pub fn remove_matching(&mut self, fragment: &str) -> Option<Track> {
        let needle = fragment.trim().to_lowercase();
        if needle.is_empty() {
            return None;
        }

        let index = self.items.iter().position(|track| {
            track.song_id.as_str() == fragment.trim() || track.title.to_lowercase().contains(&needle)
        })?;
        let removed = self.items.remove(index)?;
        info!("🗑️ Removed from queue: {}", removed.title);
        Some(removed)
    }

    /// Empties the queue, returning how many tracks were dropped.
    pub fn clear(&mut self) -> usize {
        let count = self.items.len();
        self.items.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn tracks(&self) -> Vec<Track> {
        self.items.iter().cloned().collect()
    }

    /// Sum of the known durations.
    pub fn total_duration(&self) -> Duration {
        self.items.iter().filter_map(|t| t.duration).sum()
    }
}

/// Read-only view of a guild's playback state.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueSnapshot {
    pub current: Option<Track>,
    pub upcoming: Vec<Track>,
    pub dj: bool,
    pub volume: f32,
}

impl QueueSnapshot {
    pub fn is_empty(&self) -> bool {
        self.current.is_none() && self.upcoming.is_empty()
    }

    pub fn total_duration(&self) -> Duration {
        self.current
            .iter()
            .chain(self.upcoming.iter())
            .filter_map(|t| t.duration)
            .sum()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::sources::SongId;
    use pretty_assertions::assert_eq;

    pub(crate) fn track(id: &str, title: &str) -> Track {
        Track {
            song_id: SongId::new(id),
            title: title.to_string(),
            url: SongId::new(id).watch_url(),
            media_url: format!("https://media.example/{id}"),
            ffmpeg_options: "-vn".to_string(),
            bass_boosted: false,
            duration: Some(Duration::from_secs(120)),
            uploader: None,
            thumbnail: None,
            requested_by: None,
        }
    }

    fn ids(queue: &PlaybackQueue) -> Vec<String> {
        queue
            .tracks()
            .iter()
            .map(|t| t.song_id.to_string())
            .collect()
    }

    #[test]
    fn pops_in_insertion_order() {
        let mut queue = PlaybackQueue::new();
        queue.push(track("a", "Alpha"));
        queue.push(track("b", "Beta"));
        queue.push(track("c", "Gamma"));

        let order: Vec<_> = std::iter::from_fn(|| queue.pop_next())
            .map(|t| t.song_id.to_string())
            .collect();
        assert_eq!(order, vec!["a", "b", "c"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn removes_one_match_and_keeps_order() {
        let mut queue = PlaybackQueue::new();
        queue.push(track("a", "Morning Song"));
        queue.push(track("b", "Evening Song"));
        queue.push(track("c", "Another Evening"));

        let removed = queue.remove_matching("EVENING").unwrap();
        assert_eq!(removed.song_id.as_str(), "b");
        assert_eq!(ids(&queue), vec!["a", "c"]);

        let by_id = queue.remove_matching("c").unwrap();
        assert_eq!(by_id.title, "Another Evening");
        assert_eq!(ids(&queue), vec!["a"]);
    }

    #[test]
    fn missing_fragment_leaves_queue_untouched() {
        let mut queue = PlaybackQueue::new();
        queue.push(track("a", "Alpha"));
        queue.push(track("b", "Beta"));

        assert!(queue.remove_matching("zzz").is_none());
        assert!(queue.remove_matching("  ").is_none());
        assert_eq!(ids(&queue), vec!["a", "b"]);
    }

    #[test]
    fn clear_reports_count_and_durations_add_up() {
        let mut queue = PlaybackQueue::new();
        queue.push(track("a", "Alpha"));
        queue.push(track("b", "Beta"));
        assert_eq!(queue.total_duration(), Duration::from_secs(240));

        assert_eq!(queue.clear(), 2);
        assert_eq!(queue.len(), 0);
        assert_eq!(queue.total_duration(), Duration::ZERO);
    }
}
