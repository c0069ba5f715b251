use async_trait::async_trait;
use dashmap::{mapref::entry::Entry, DashMap};
use serenity::model::id::{ChannelId, GuildId};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    backend::{EndCause, EndNotifier, EndReceiver, EndSender, PlaybackHandle, Presenter, TrackEnded, VoiceBackend},
    queue::{PlaybackQueue, QueueSnapshot},
};
use crate::{
    error::{BotError, BotResult},
    sources::{SongId, Track},
};

/// Supplies a track when DJ mode is on and the queue runs dry.
#[async_trait]
pub trait Autoplay: Send + Sync {
    async fn pick(&self, guild: GuildId, last: Option<&SongId>) -> BotResult<Track>;
}

/// Where a newly added track ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Started,
    Queued { position: usize },
}

/// Volume of the current track before and after a change.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeChange {
    pub before: f32,
    pub after: f32,
}

struct Playing {
    track: Track,
    sequence: u64,
    volume: f32,
    handle: Box<dyn PlaybackHandle>,
}

struct GuildSession {
    generation: u64,
    /// False while the voice connection is being made and after the session
    /// was closed.
    open: bool,
    channel_name: String,
    queue: PlaybackQueue,
    current: Option<Playing>,
    dj: bool,
    next_sequence: u64,
    last_song: Option<SongId>,
}

impl GuildSession {
    fn is_current(&self, event: &TrackEnded) -> bool {
        self.generation == event.generation
            && self
                .current
                .as_ref()
                .is_some_and(|playing| playing.sequence == event.sequence)
    }
}

/// Per-guild voice session controller.
///
/// Each guild has its own session behind its own mutex. Playback completion
/// arrives as [`TrackEnded`] events through [`AudioPlayer::run_events`];
/// events from a session that was left, or from a track that is no longer
/// current, are dropped.
pub struct AudioPlayer {
    sessions: DashMap<GuildId, Arc<Mutex<GuildSession>>>,
    backend: Arc<dyn VoiceBackend>,
    presenter: Arc<dyn Presenter>,
    autoplay: Arc<dyn Autoplay>,
    events: EndSender,
    generations: AtomicU64,
    default_volume: f32,
}

impl AudioPlayer {
    pub fn new(
        backend: Arc<dyn VoiceBackend>,
        presenter: Arc<dyn Presenter>,
        autoplay: Arc<dyn Autoplay>,
        events: EndSender,
        default_volume: f32,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            backend,
            presenter,
            autoplay,
            events,
            generations: AtomicU64::new(0),
            default_volume,
        }
    }

    /// Locks the guild's session. Waits for a connection in progress.
    async fn session(&self, guild: GuildId) -> BotResult<OwnedMutexGuard<GuildSession>> {
        let session = self
            .sessions
            .get(&guild)
            .map(|s| s.clone())
            .ok_or(BotError::NotConnected)?;
        let session = session.lock_owned().await;
        if session.open {
            Ok(session)
        } else {
            Err(BotError::NotConnected)
        }
    }

    /// Opens a session. The guild slot is claimed before connecting and the
    /// session stays locked until the connection is up, so concurrent joins
    /// end up with one session.
    pub async fn join(&self, guild: GuildId, channel: ChannelId, channel_name: String) -> BotResult<()> {
        let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
        let session = Arc::new(Mutex::new(GuildSession {
            generation,
            open: false,
            channel_name: channel_name.clone(),
            queue: PlaybackQueue::new(),
            current: None,
            dj: false,
            next_sequence: 0,
            last_song: None,
        }));
        let mut reserved = session.clone().lock_owned().await;

        let existing = match self.sessions.entry(guild) {
            Entry::Occupied(slot) => Some(slot.get().clone()),
            Entry::Vacant(slot) => {
                slot.insert(session.clone());
                None
            }
        };
        if let Some(existing) = existing {
            let existing = existing.lock().await;
            return Err(BotError::AlreadyConnected {
                channel: existing.channel_name.clone(),
            });
        }

        if let Err(e) = self.backend.connect(guild, channel).await {
            self.sessions
                .remove_if(&guild, |_, claimed| Arc::ptr_eq(claimed, &session));
            return Err(e);
        }
        reserved.open = true;

        info!("🔗 Session {} opened in guild {} ({})", generation, guild, channel_name);
        Ok(())
    }

    pub async fn leave(&self, guild: GuildId) -> BotResult<()> {
        let (_, session) = self.sessions.remove(&guild).ok_or(BotError::NotConnected)?;
        {
            let mut session = session.lock().await;
            session.open = false;
            if let Some(playing) = session.current.take() {
                playing.handle.stop();
            }
            let dropped = session.queue.clear();
            debug!("Discarded {} queued tracks for guild {}", dropped, guild);
        }

        self.backend.disconnect(guild).await?;
        self.presenter.set_presence(false).await;
        info!("👋 Session closed in guild {}", guild);
        Ok(())
    }

    /// Voice connection went away without us asking (kicked, channel
    /// deleted). The backend is already disconnected.
    pub async fn handle_disconnect(&self, guild: GuildId) -> bool {
        let Some((_, session)) = self.sessions.remove(&guild) else {
            return false;
        };

        let mut session = session.lock().await;
        session.open = false;
        if let Some(playing) = session.current.take() {
            playing.handle.stop();
        }
        session.queue.clear();
        warn!("🔌 Voice connection lost in guild {}, session discarded", guild);
        true
    }

    /// Starts the track when idle, otherwise queues it.
    pub async fn add(&self, guild: GuildId, track: Track) -> BotResult<AddOutcome> {
        let mut session = self.session(guild).await?;

        if session.current.is_some() {
            session.queue.push(track);
            return Ok(AddOutcome::Queued {
                position: session.queue.len(),
            });
        }

        self.start_locked(guild, &mut session, track.clone()).await?;
        let dj = session.dj;
        drop(session);

        self.announce_start(guild, &track, dj).await;
        Ok(AddOutcome::Started)
    }

    async fn start_locked(&self, guild: GuildId, session: &mut GuildSession, track: Track) -> BotResult<()> {
        session.next_sequence += 1;
        let sequence = session.next_sequence;
        let notifier = EndNotifier::new(self.events.clone(), guild, session.generation, sequence);

        let handle = self.backend.start(guild, &track, notifier).await?;
        handle.set_volume(self.default_volume);

        info!("🎵 Now playing in guild {}: {}", guild, track.title);
        session.last_song = Some(track.song_id.clone());
        session.current = Some(Playing {
            track,
            sequence,
            volume: self.default_volume,
            handle,
        });
        Ok(())
    }

    async fn announce_start(&self, guild: GuildId, track: &Track, dj: bool) {
        self.presenter.now_playing(guild, track).await;
        self.presenter.set_presence(dj).await;
    }

    /// Drives the session forward after a track ended.
    pub async fn on_track_end(&self, event: TrackEnded) {
        let Some(session) = self.sessions.get(&event.guild).map(|s| s.clone()) else {
            debug!("Ignoring track end for guild {} without session", event.guild);
            return;
        };

        let mut session = session.lock().await;
        if !session.is_current(&event) {
            debug!(
                "Ignoring stale track end (generation {}, sequence {})",
                event.generation, event.sequence
            );
            return;
        }

        let finished = session.current.take().map(|p| p.track);
        let mut failures = Vec::new();
        if let (EndCause::Failed(reason), Some(track)) = (&event.cause, &finished) {
            error!("❌ Playback failed for {}: {}", track.title, reason);
            failures.push(format!("Playback failed for {}: {}", track.title, reason));
        }

        let mut started = None;
        while let Some(next) = session.queue.pop_next() {
            match self.start_locked(event.guild, &mut session, next.clone()).await {
                Ok(()) => {
                    started = Some(next);
                    break;
                }
                Err(e) => {
                    error!("❌ Could not start {}: {}", next.title, e);
                    failures.push(format!("Could not play {}: {}", next.title, e));
                }
            }
        }

        let dj = session.dj;
        let generation = session.generation;
        let last = session.last_song.clone();
        drop(session);

        for failure in &failures {
            self.presenter.announce(event.guild, failure).await;
        }

        match started {
            Some(track) => self.announce_start(event.guild, &track, dj).await,
            None if dj => self.autoplay_cycle(event.guild, generation, last).await,
            None => {
                info!("⏹️ Queue finished in guild {}", event.guild);
                self.presenter.set_presence(false).await;
            }
        }
    }

    /// Asks the DJ picker for one track. The guild lock is released while the
    /// picker works; afterwards the session must still be the same one, still
    /// in DJ mode and still idle.
    async fn autoplay_cycle(&self, guild: GuildId, generation: u64, last: Option<SongId>) {
        debug!("🎧 DJ picking a track for guild {}", guild);
        let picked = self.autoplay.pick(guild, last.as_ref()).await;

        let Some(session) = self.sessions.get(&guild).map(|s| s.clone()) else {
            return;
        };
        let mut session = session.lock().await;
        if session.generation != generation || !session.dj {
            debug!("DJ pick for guild {} no longer wanted", guild);
            return;
        }
        if session.current.is_some() {
            debug!("Something started while DJ was picking, pick dropped");
            return;
        }

        let started = match picked {
            Ok(track) => self
                .start_locked(guild, &mut session, track.clone())
                .await
                .map(|()| track),
            Err(e) => Err(e),
        };

        match started {
            Ok(track) => {
                drop(session);
                self.announce_start(guild, &track, true).await;
            }
            Err(e) => {
                session.dj = false;
                drop(session);
                warn!("🎧 DJ mode switched off in guild {}: {}", guild, e);
                self.presenter
                    .announce(guild, &format!("DJ mode off: {e}"))
                    .await;
                self.presenter.set_presence(false).await;
            }
        }
    }

    /// Stops the current track; its end event starts whatever comes next.
    pub async fn skip(&self, guild: GuildId) -> BotResult<Option<Track>> {
        let session = self.session(guild).await?;
        Ok(session.current.as_ref().map(|playing| {
            info!("⏭️ Skipping {}", playing.track.title);
            playing.handle.stop();
            playing.track.clone()
        }))
    }

    pub async fn remove(&self, guild: GuildId, fragment: &str) -> BotResult<Option<Track>> {
        let mut session = self.session(guild).await?;
        Ok(session.queue.remove_matching(fragment))
    }

    pub async fn clear(&self, guild: GuildId) -> BotResult<usize> {
        let mut session = self.session(guild).await?;
        let count = session.queue.clear();
        info!("🧹 Cleared {} queued tracks in guild {}", count, guild);
        Ok(count)
    }

    /// Clears the queue, stops playback and switches DJ mode off. The voice
    /// connection stays up.
    pub async fn stop(&self, guild: GuildId) -> BotResult<()> {
        {
            let mut session = self.session(guild).await?;
            session.queue.clear();
            session.dj = false;
            if let Some(playing) = session.current.take() {
                playing.handle.stop();
            }
        }
        self.presenter.set_presence(false).await;
        info!("⏹️ Playback stopped in guild {}", guild);
        Ok(())
    }

    /// Multiplies the current track's volume, never going above `max`.
    /// `None` when nothing is playing.
    pub async fn set_volume(
        &self,
        guild: GuildId,
        multiplier: f32,
        max: f32,
    ) -> BotResult<Option<VolumeChange>> {
        let mut session = self.session(guild).await?;
        Ok(session.current.as_mut().map(|playing| {
            let before = playing.volume;
            playing.volume = (before * multiplier).min(max);
            playing.handle.set_volume(playing.volume);
            info!("🔊 Volume of {} now {:.2}", playing.track.title, playing.volume);
            VolumeChange {
                before,
                after: playing.volume,
            }
        }))
    }

    pub async fn set_dj_mode(&self, guild: GuildId, on: bool) -> BotResult<()> {
        let (idle, generation, last) = {
            let mut session = self.session(guild).await?;
            session.dj = on;
            (
                session.current.is_none() && session.queue.is_empty(),
                session.generation,
                session.last_song.clone(),
            )
        };

        info!("🎧 DJ mode {} in guild {}", if on { "on" } else { "off" }, guild);
        self.presenter.set_presence(on).await;

        if on && idle {
            self.autoplay_cycle(guild, generation, last).await;
        }
        Ok(())
    }

    pub async fn now_playing(&self, guild: GuildId) -> Option<Track> {
        let session = self.sessions.get(&guild).map(|s| s.clone())?;
        let session = session.lock().await;
        session.current.as_ref().map(|p| p.track.clone())
    }

    pub async fn queue_snapshot(&self, guild: GuildId) -> BotResult<QueueSnapshot> {
        let session = self.session(guild).await?;
        Ok(QueueSnapshot {
            current: session.current.as_ref().map(|p| p.track.clone()),
            upcoming: session.queue.tracks(),
            dj: session.dj,
            volume: session
                .current
                .as_ref()
                .map_or(self.default_volume, |p| p.volume),
        })
    }

    pub fn is_connected(&self, guild: GuildId) -> bool {
        self.sessions.contains_key(&guild)
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Event pump: feeds track-end events to the controller until shutdown.
    pub async fn run_events(self: Arc<Self>, events: EndReceiver, shutdown: CancellationToken) {
        info!("🎛️ Playback event loop started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.recv_async() => match event {
                    Ok(event) => self.on_track_end(event).await,
                    Err(_) => break,
                },
            }
        }
        info!("🎛️ Playback event loop stopped");
    }
}
