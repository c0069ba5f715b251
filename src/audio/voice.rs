use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use songbird::{
    input::{ChildContainer, HttpRequest, Input},
    tracks::{PlayMode, TrackHandle},
    Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use std::{
    process::{Command, Stdio},
    sync::Arc,
};
use tracing::{debug, info, warn};

use super::backend::{EndCause, EndNotifier, PlaybackHandle, VoiceBackend};
use crate::{
    error::{BotError, BotResult},
    sources::Track,
};

/// Voice backend on top of songbird.
///
/// Tracks whose options carry a filter are transcoded by an `ffmpeg` child
/// into a wav pipe; everything else is streamed straight from the media URL.
pub struct SongbirdBackend {
    manager: Arc<Songbird>,
    http: reqwest::Client,
    ffmpeg_path: String,
}

impl SongbirdBackend {
    pub fn new(manager: Arc<Songbird>, http: reqwest::Client, ffmpeg_path: impl Into<String>) -> Self {
        Self {
            manager,
            http,
            ffmpeg_path: ffmpeg_path.into(),
        }
    }

    fn input_for(&self, track: &Track) -> BotResult<Input> {
        if !needs_transcode(&track.ffmpeg_options) {
            debug!("🌐 Streaming {} directly", track.title);
            let request = HttpRequest::new(self.http.clone(), track.media_url.clone());
            return Ok(request.into());
        }

        let args = ffmpeg_args(&track.media_url, &track.ffmpeg_options);
        debug!("🎚️ {} {}", self.ffmpeg_path, args.join(" "));

        let child = Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| BotError::Voice(format!("could not start ffmpeg: {e}")))?;

        Ok(Input::from(ChildContainer::from(child)))
    }
}

/// True when the options ask for more than dropping the video stream.
pub fn needs_transcode(options: &str) -> bool {
    options.split_whitespace().any(|arg| arg != "-vn")
}

pub fn ffmpeg_args(media_url: &str, options: &str) -> Vec<String> {
    let mut args: Vec<String> = [
        "-reconnect",
        "1",
        "-reconnect_streamed",
        "1",
        "-reconnect_delay_max",
        "5",
        "-i",
        media_url,
        "-vn",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    args.extend(
        options
            .split_whitespace()
            .filter(|arg| *arg != "-vn")
            .map(str::to_string),
    );
    args.extend(
        ["-f", "wav", "-ac", "2", "-ar", "48000", "pipe:1"]
            .iter()
            .map(|s| s.to_string()),
    );
    args
}

#[async_trait]
impl VoiceBackend for SongbirdBackend {
    async fn connect(&self, guild: GuildId, channel: ChannelId) -> BotResult<()> {
        self.manager
            .join(guild, channel)
            .await
            .map_err(|e| BotError::Voice(format!("could not join voice channel: {e}")))?;
        info!("🔊 Joined voice channel {} in guild {}", channel, guild);
        Ok(())
    }

    async fn disconnect(&self, guild: GuildId) -> BotResult<()> {
        if self.manager.get(guild).is_none() {
            return Ok(());
        }
        self.manager
            .remove(guild)
            .await
            .map_err(|e| BotError::Voice(format!("could not leave voice channel: {e}")))?;
        info!("👋 Left voice in guild {}", guild);
        Ok(())
    }

    async fn start(
        &self,
        guild: GuildId,
        track: &Track,
        notifier: EndNotifier,
    ) -> BotResult<Box<dyn PlaybackHandle>> {
        let call = self
            .manager
            .get(guild)
            .ok_or_else(|| BotError::Voice("no voice connection for this guild".to_string()))?;

        let input = self.input_for(track)?;
        let handle = call.lock().await.play_input(input);

        for event in [TrackEvent::End, TrackEvent::Error] {
            handle
                .add_event(
                    Event::Track(event),
                    TrackEndHandler {
                        notifier: notifier.clone(),
                    },
                )
                .map_err(|e| BotError::Voice(format!("could not watch track end: {e}")))?;
        }

        Ok(Box::new(SongbirdPlayback { handle }))
    }
}

struct SongbirdPlayback {
    handle: TrackHandle,
}

impl PlaybackHandle for SongbirdPlayback {
    fn stop(&self) {
        if let Err(e) = self.handle.stop() {
            debug!("Track already gone on stop: {}", e);
        }
    }

    fn set_volume(&self, volume: f32) {
        if let Err(e) = self.handle.set_volume(volume) {
            warn!("⚠️ Could not change volume: {}", e);
        }
    }
}

/// Forwards songbird's end/error events to the controller.
struct TrackEndHandler {
    notifier: EndNotifier,
}

#[async_trait]
impl VoiceEventHandler for TrackEndHandler {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        let cause = match ctx {
            EventContext::Track(tracks) => tracks
                .first()
                .map(|(state, _)| match &state.playing {
                    PlayMode::Stop => EndCause::Stopped,
                    PlayMode::Errored(e) => EndCause::Failed(e.to_string()),
                    _ => EndCause::Finished,
                })
                .unwrap_or(EndCause::Finished),
            _ => EndCause::Finished,
        };

        debug!("Track ended: {:?}", cause);
        self.notifier.notify(cause);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn plain_options_stream_directly() {
        assert!(!needs_transcode("-vn"));
        assert!(!needs_transcode(""));
        assert!(needs_transcode("-vn -af bass=g=50"));
    }

    #[test]
    fn ffmpeg_pipeline_arguments() {
        let args = ffmpeg_args("https://media", "-vn -af bass=g=50");
        assert_eq!(
            args.join(" "),
            "-reconnect 1 -reconnect_streamed 1 -reconnect_delay_max 5 -i https://media \
             -vn -af bass=g=50 -f wav -ac 2 -ar 48000 pipe:1"
        );
    }
}
