use anyhow::Result;
use serenity::{model::gateway::GatewayIntents, Client};
use songbird::{SerenityInit, Songbird};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

mod audio;
mod bot;
mod config;
mod error;
mod sources;
mod storage;
mod ui;

use crate::audio::{end_channel, AudioPlayer, DjPicker, SongbirdBackend};
use crate::bot::{DiscordPresenter, DjBot};
use crate::config::Config;
use crate::sources::{Resolver, SourceCompiler, YtDlpExtractor};
use crate::storage::{JsonStorage, MetadataStore};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("dj_bot=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎧 Starting DJ bot v{}", env!("CARGO_PKG_VERSION"));

    let config = Arc::new(Config::load()?);

    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check(&config).await;
    }

    info!("{}", config.summary());

    let storage = Arc::new(JsonStorage::new(config.data_dir.clone()).await?);
    info!("{}", storage.stats().await);
    let store: Arc<dyn MetadataStore> = storage;

    let extractor = Arc::new(YtDlpExtractor::new(config.ytdlp_path.clone()));
    let resolver = Arc::new(Resolver::new(
        store.clone(),
        extractor.clone(),
        config.dj_max_duration,
    ));
    let compiler = Arc::new(SourceCompiler::new(
        store.clone(),
        extractor.clone(),
        config.compiler_settings()?,
    ));

    let manager = Songbird::serenity();
    let backend = Arc::new(SongbirdBackend::new(
        manager.clone(),
        reqwest::Client::new(),
        config.ffmpeg_path.clone(),
    ));
    let presenter = Arc::new(DiscordPresenter::new());
    let dj = Arc::new(DjPicker::new(store.clone(), compiler.clone()));

    let (events_tx, events_rx) = end_channel();
    let player = Arc::new(AudioPlayer::new(
        backend,
        presenter.clone(),
        dj,
        events_tx,
        config.default_volume,
    ));

    let shutdown = CancellationToken::new();
    let pump = tokio::spawn(player.clone().run_events(events_rx, shutdown.clone()));

    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_VOICE_STATES
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT;

    let handler = DjBot::new(
        config.clone(),
        store,
        resolver,
        compiler,
        player.clone(),
        presenter,
        extractor,
    );

    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird_with(manager)
        .await?;

    let shard_manager = client.shard_manager.clone();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Could not listen for Ctrl+C: {}", e);
            return;
        }
        info!("⚠️ Shutdown signal received, closing...");
        signal_token.cancel();
        shard_manager.shutdown_all().await;
    });

    info!("🚀 Bot started");
    if let Err(why) = client.start().await {
        error!("Client error: {:?}", why);
    }

    shutdown.cancel();
    if let Err(e) = pump.await {
        error!("Event pump panicked: {}", e);
    }
    info!("👋 Closed with {} voice sessions open", player.active_sessions());

    Ok(())
}

/// Exits successfully only when both external tools run.
async fn health_check(config: &Config) -> Result<()> {
    let yt_dlp = async_process::Command::new(&config.ytdlp_path)
        .arg("--version")
        .output()
        .await?;

    let ffmpeg = async_process::Command::new(&config.ffmpeg_path)
        .arg("-version")
        .output()
        .await?;

    if yt_dlp.status.success() && ffmpeg.status.success() {
        println!("OK");
        Ok(())
    } else {
        anyhow::bail!("Missing dependencies: yt-dlp or ffmpeg");
    }
}
