use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tracing::debug;

use crate::{error::BotResult, sources::Track};

/// Why a track stopped producing audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndCause {
    Finished,
    Stopped,
    Failed(String),
}

/// Playback completion, tagged so late events from an old session or an
/// already replaced track can be recognised and dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackEnded {
    pub guild: GuildId,
    pub generation: u64,
    pub sequence: u64,
    pub cause: EndCause,
}

pub type EndSender = flume::Sender<TrackEnded>;
pub type EndReceiver = flume::Receiver<TrackEnded>;

pub fn end_channel() -> (EndSender, EndReceiver) {
    flume::unbounded()
}

/// Reports the end of one started track. Clones share state, so however
/// many backend callbacks fire only the first report goes out.
#[derive(Debug, Clone)]
pub struct EndNotifier {
    tx: EndSender,
    guild: GuildId,
    generation: u64,
    sequence: u64,
    sent: Arc<AtomicBool>,
}

impl EndNotifier {
    pub fn new(tx: EndSender, guild: GuildId, generation: u64, sequence: u64) -> Self {
        Self {
            tx,
            guild,
            generation,
            sequence,
            sent: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn notify(&self, cause: EndCause) {
        if self.sent.swap(true, Ordering::SeqCst) {
            return;
        }

        let event = TrackEnded {
            guild: self.guild,
            generation: self.generation,
            sequence: self.sequence,
            cause,
        };
        if self.tx.send(event).is_err() {
            debug!("Track end for guild {} dropped: event pump is gone", self.guild);
        }
    }
}

/// Voice connection and audio output for guilds.
#[async_trait]
pub trait VoiceBackend: Send + Sync {
    async fn connect(&self, guild: GuildId, channel: ChannelId) -> BotResult<()>;

    async fn disconnect(&self, guild: GuildId) -> BotResult<()>;

    /// Starts the track right away. `notifier` must fire once when it ends.
    async fn start(
        &self,
        guild: GuildId,
        track: &Track,
        notifier: EndNotifier,
    ) -> BotResult<Box<dyn PlaybackHandle>>;
}

/// Control over one started track.
pub trait PlaybackHandle: Send + Sync {
    fn stop(&self);
    fn set_volume(&self, volume: f32);
}

/// User-visible side effects of playback transitions.
#[async_trait]
pub trait Presenter: Send + Sync {
    async fn now_playing(&self, guild: GuildId, track: &Track);
    async fn announce(&self, guild: GuildId, text: &str);
    async fn set_presence(&self, dj: bool);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn notifier_reports_only_once() {
        let (tx, rx) = end_channel();
        let notifier = EndNotifier::new(tx, GuildId::new(7), 3, 9);
        let twin = notifier.clone();

        notifier.notify(EndCause::Stopped);
        twin.notify(EndCause::Failed("late".into()));

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![TrackEnded {
                guild: GuildId::new(7),
                generation: 3,
                sequence: 9,
                cause: EndCause::Stopped,
            }]
        );
    }

    #[test]
    fn closed_pump_is_not_an_error() {
        let (tx, rx) = end_channel();
        drop(rx);
        EndNotifier::new(tx, GuildId::new(1), 1, 1).notify(EndCause::Finished);
    }
}
