//! # Bot Module
//!
//! Discord side of the DJ bot.
//!
//! - [`commands`] parses prefix commands and picks the voice channel to join
//! - [`handlers`] runs each command against the library and the player
//! - [`presenter`] shows playback transitions in the guild's text channel
//!
//! ## Architecture
//!
//! [`DjBot`] implements Serenity's [`EventHandler`]. Chat messages and
//! component interactions go through [`handlers`]; voice state updates tell
//! the [`AudioPlayer`] when someone else disconnected the bot.

use serenity::{
    all::{Context, EventHandler, Interaction, Message, Ready, VoiceState},
    async_trait,
};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tracing::info;

pub mod commands;
pub mod handlers;
pub mod presenter;

pub use presenter::DiscordPresenter;

use crate::{
    audio::{AudioPlayer, Presenter},
    config::Config,
    sources::{Resolver, SourceCompiler, YtDlpExtractor},
    storage::MetadataStore,
};

/// Main Discord event handler.
///
/// Holds everything a command may touch. All fields are shared with the
/// background tasks started in `main`, so they live behind [`Arc`].
pub struct DjBot {
    pub config: Arc<Config>,
    pub store: Arc<dyn MetadataStore>,
    pub resolver: Arc<Resolver>,
    pub compiler: Arc<SourceCompiler>,
    pub player: Arc<AudioPlayer>,
    pub presenter: Arc<DiscordPresenter>,
    extractor: Arc<YtDlpExtractor>,
    maintenance_started: AtomicBool,
}

impl DjBot {
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn MetadataStore>,
        resolver: Arc<Resolver>,
        compiler: Arc<SourceCompiler>,
        player: Arc<AudioPlayer>,
        presenter: Arc<DiscordPresenter>,
        extractor: Arc<YtDlpExtractor>,
    ) -> Self {
        Self {
            config,
            store,
            resolver,
            compiler,
            player,
            presenter,
            extractor,
            maintenance_started: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl EventHandler for DjBot {
    /// Attaches the gateway context to the presenter and starts maintenance.
    ///
    /// `ready` fires again after every reconnect; maintenance is only started
    /// the first time.
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} is online!", ready.user.name);
        info!("📊 Connected to {} servers", ready.guilds.len());

        self.presenter.attach(ctx);
        self.presenter.set_presence(false).await;

        let hours = self.config.ytdlp_update_hours;
        if hours > 0 && !self.maintenance_started.swap(true, Ordering::SeqCst) {
            let extractor = self.extractor.clone();
            tokio::spawn(async move {
                maintenance_tasks(extractor, Duration::from_secs(hours * 3600)).await;
            });
        }
    }

    async fn message(&self, ctx: Context, msg: Message) {
        handlers::handle_message(&ctx, &msg, self).await;
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Component(component) = interaction {
            handlers::handle_component(&ctx, &component, self).await;
        }
    }

    /// Tears the session down when the bot is disconnected from outside,
    /// e.g. kicked by a moderator. A `leave` command removes the session
    /// first, so its own update is a no-op here.
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let current_user_id = ctx.cache.current_user().id;
        if new.user_id != current_user_id || old.is_none() || new.channel_id.is_some() {
            return;
        }

        if let Some(guild_id) = new.guild_id {
            if self.player.handle_disconnect(guild_id).await {
                info!("🔌 Disconnected from voice in guild {}", guild_id);
                self.presenter.forget(guild_id);
            }
        }
    }
}

/// Keeps yt-dlp current so extraction keeps working as YouTube changes.
async fn maintenance_tasks(extractor: Arc<YtDlpExtractor>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    // the first tick completes immediately
    interval.tick().await;

    loop {
        interval.tick().await;
        extractor.self_update().await;
        info!("🧹 Maintenance completed");
    }
}
