use async_trait::async_trait;
use dashmap::DashMap;
use serenity::{
    builder::CreateMessage,
    gateway::ActivityData,
    model::id::{ChannelId, GuildId, MessageId},
    prelude::Context,
};
use std::sync::OnceLock;
use tracing::{debug, warn};

use crate::{
    audio::Presenter,
    sources::Track,
    ui::{buttons, embeds},
};

/// Shows playback transitions in Discord.
///
/// Messages go to the text channel the guild last used for a command. The
/// gateway context only exists once the client is ready, so it is attached
/// then; anything presented before that is dropped.
#[derive(Default)]
pub struct DiscordPresenter {
    ctx: OnceLock<Context>,
    text_channels: DashMap<GuildId, ChannelId>,
    boards: DashMap<GuildId, (ChannelId, MessageId)>,
}

impl DiscordPresenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, ctx: Context) {
        if self.ctx.set(ctx).is_err() {
            debug!("Presenter already attached, keeping the first context");
        }
    }

    pub fn bind_text_channel(&self, guild: GuildId, channel: ChannelId) {
        self.text_channels.insert(guild, channel);
    }

    /// Drops everything remembered about the guild.
    pub fn forget(&self, guild: GuildId) {
        self.text_channels.remove(&guild);
        self.boards.remove(&guild);
    }

    fn target(&self, guild: GuildId) -> Option<(&Context, ChannelId)> {
        let ctx = self.ctx.get()?;
        let channel = *self.text_channels.get(&guild)?;
        Some((ctx, channel))
    }
}

#[async_trait]
impl Presenter for DiscordPresenter {
    async fn now_playing(&self, guild: GuildId, track: &Track) {
        let Some((ctx, channel)) = self.target(guild) else {
            debug!("No text channel for guild {}, now playing not shown", guild);
            return;
        };

        // one board per guild
        if let Some((_, (old_channel, old_message))) = self.boards.remove(&guild) {
            if let Err(e) = old_channel.delete_message(&ctx.http, old_message).await {
                debug!("Old now playing board already gone: {}", e);
            }
        }

        let message = CreateMessage::new()
            .embed(embeds::create_now_playing_embed(track))
            .components(vec![buttons::create_now_playing_buttons(track)]);

        match channel.send_message(&ctx.http, message).await {
            Ok(sent) => {
                self.boards.insert(guild, (channel, sent.id));
            }
            Err(e) => warn!("⚠️ Could not show now playing in guild {}: {}", guild, e),
        }
    }

    async fn announce(&self, guild: GuildId, text: &str) {
        let Some((ctx, channel)) = self.target(guild) else {
            debug!("No text channel for guild {}: {}", guild, text);
            return;
        };

        if let Err(e) = channel.say(&ctx.http, text).await {
            warn!("⚠️ Could not announce in guild {}: {}", guild, e);
        }
    }

    async fn set_presence(&self, dj: bool) {
        let Some(ctx) = self.ctx.get() else {
            return;
        };
        let activity = if dj {
            ActivityData::playing("DJ")
        } else {
            ActivityData::listening("play")
        };
        ctx.set_activity(Some(activity));
    }
}
