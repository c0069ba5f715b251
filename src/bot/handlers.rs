use serenity::{
    builder::{CreateEmbed, CreateMessage},
    model::{
        application::{ComponentInteraction, ComponentInteractionDataKind},
        channel::{ChannelType, Message},
        id::{ChannelId, GuildId, MessageId, UserId},
    },
    prelude::Context,
};
use std::{collections::HashMap, time::Duration};
use tracing::{debug, error, info, warn};

use super::{
    commands::{pick_channel, Command, VoiceChannelInfo},
    DjBot,
};
use crate::{
    audio::{AddOutcome, AudioPlayer, Presenter},
    error::{BotError, BotResult},
    sources::{resolver::BindOutcome, song_ref, SongId, SourceCompiler, Track},
    storage::MetadataStore,
    ui::{
        buttons::{self, button_ids, ButtonAction},
        embeds,
    },
};

/// Songs shown by the library listings.
const LIST_LIMIT: usize = 10;

/// Where a command came from.
pub struct Request<'a> {
    pub ctx: &'a Context,
    pub guild: GuildId,
    pub channel: ChannelId,
    pub user: UserId,
}

/// Entry point for chat messages.
pub async fn handle_message(ctx: &Context, msg: &Message, bot: &DjBot) {
    if msg.author.bot {
        return;
    }
    let Some(guild) = msg.guild_id else {
        return;
    };
    let Some(parsed) = Command::parse(&bot.config.command_prefix, &msg.content) else {
        return;
    };

    bot.presenter.bind_text_channel(guild, msg.channel_id);
    let req = Request {
        ctx,
        guild,
        channel: msg.channel_id,
        user: msg.author.id,
    };

    let result = match parsed {
        Ok(command) => {
            info!("📝 {:?} from {} in guild {}", command, msg.author.name, guild);
            handle_command(&req, command, bot).await
        }
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        report_error(&req, &e).await;
    }
}

pub async fn handle_command(req: &Request<'_>, command: Command, bot: &DjBot) -> BotResult<()> {
    match command {
        Command::Join => handle_join(req, bot).await,
        Command::Leave => handle_leave(req, bot).await,
        Command::Dj(on) => handle_dj(req, bot, on).await,
        Command::Play(input) => handle_play(req, bot, &input).await,
        Command::PlaySearch(terms) => handle_playsearch(req, bot, &terms).await,
        Command::NowPlaying => handle_nowplaying(req, bot).await,
        Command::Queue => {
            let snapshot = bot.player.queue_snapshot(req.guild).await?;
            send_embed(req, embeds::create_queue_embed(&snapshot)).await;
            Ok(())
        }
        Command::Skip => {
            match bot.player.skip(req.guild).await? {
                Some(track) => notify(req, bot, format!("⏭️ Skipped {}", track.title)).await,
                None => notify(req, bot, "Nothing is playing").await,
            }
            Ok(())
        }
        Command::Remove(fragment) => {
            match bot.player.remove(req.guild, &fragment).await? {
                Some(track) => notify(req, bot, format!("🗑️ Removed {} from the queue", track.title)).await,
                None => notify(req, bot, format!("No queued song matches {fragment}")).await,
            }
            Ok(())
        }
        Command::Clear => {
            let cleared = bot.player.clear(req.guild).await?;
            notify(req, bot, format!("🧹 Cleared {cleared} songs")).await;
            Ok(())
        }
        Command::Stop => {
            bot.player.stop(req.guild).await?;
            notify(req, bot, "⏹️ Stopped").await;
            Ok(())
        }
        Command::Volume(multiplier) => handle_volume(req, bot, multiplier).await,
        Command::Bind { phrase, url } => handle_bind(req, bot, &phrase, url.as_deref()).await,
        Command::ListDj => handle_list(req, bot, true).await,
        Command::ListNotDj => handle_list(req, bot, false).await,
        Command::Search(terms) => {
            let songs = bot.store.search(&terms, LIST_LIMIT).await?;
            if songs.is_empty() {
                notify(req, bot, format!("No song in the library matches {terms}")).await;
            } else {
                say(req, &embeds::format_library_search(&terms, &songs)).await;
            }
            Ok(())
        }
        Command::Tag { target, label } => handle_tag(req, bot, &target, label.as_deref()).await,
        Command::Help => {
            send_embed(req, embeds::create_help_embed(&bot.config.command_prefix)).await;
            Ok(())
        }
    }
}

async fn handle_join(req: &Request<'_>, bot: &DjBot) -> BotResult<()> {
    match join_voice(req, bot).await {
        Ok(name) => {
            notify(req, bot, format!("🔊 Joined {name}")).await;
            Ok(())
        }
        Err(BotError::AlreadyConnected { channel }) => {
            notify(req, bot, format!("I am in voice channel: {channel}")).await;
            Ok(())
        }
        Err(e) => Err(e),
    }
}

async fn handle_leave(req: &Request<'_>, bot: &DjBot) -> BotResult<()> {
    bot.player.leave(req.guild).await?;
    notify(req, bot, "👋 Bye").await;
    bot.presenter.forget(req.guild);
    Ok(())
}

async fn handle_dj(req: &Request<'_>, bot: &DjBot, on: bool) -> BotResult<()> {
    if on {
        ensure_joined(req, bot).await?;
    }
    bot.player.set_dj_mode(req.guild, on).await?;
    notify(req, bot, if on { "🎧 DJ mode on" } else { "DJ mode off" }).await;
    Ok(())
}

/// Resolve, count, compile, then hand the track to the controller.
async fn handle_play(req: &Request<'_>, bot: &DjBot, input: &str) -> BotResult<()> {
    let song_id = bot.resolver.resolve(input).await?;
    play_song(req, bot, &song_id).await
}

async fn play_song(req: &Request<'_>, bot: &DjBot, song_id: &SongId) -> BotResult<()> {
    let (track, outcome) = play_request(
        bot.store.as_ref(),
        &bot.compiler,
        &bot.player,
        req.guild,
        req.user,
        song_id,
        || choose_channel(req),
    )
    .await?;

    match outcome {
        AddOutcome::Started => debug!("▶️ {} started right away", track.title),
        AddOutcome::Queued { position } => {
            notify(req, bot, format!("📋 Queued #{position}: {}", track.title)).await;
        }
    }
    Ok(())
}

/// One play request: count it, compile the song, join voice if needed, then
/// start or queue the track.
pub async fn play_request(
    store: &dyn MetadataStore,
    compiler: &SourceCompiler,
    player: &AudioPlayer,
    guild: GuildId,
    requester: UserId,
    song_id: &SongId,
    choose_channel: impl FnOnce() -> BotResult<VoiceChannelInfo>,
) -> BotResult<(Track, AddOutcome)> {
    store.increment_query_count(song_id).await?;
    let track = compiler.compile(song_id, Some(requester)).await?;
    join_if_needed(player, guild, choose_channel).await?;

    let outcome = player.add(guild, track.clone()).await?;
    Ok((track, outcome))
}

async fn handle_playsearch(req: &Request<'_>, bot: &DjBot, terms: &str) -> BotResult<()> {
    let results = bot
        .resolver
        .search_choices(terms, bot.config.search_results)
        .await?;

    let message = CreateMessage::new()
        .embed(embeds::create_search_results_embed(terms, &results))
        .components(vec![buttons::create_track_selection_menu(&results)]);

    if let Err(e) = req.channel.send_message(&req.ctx.http, message).await {
        warn!("⚠️ Could not send search results: {}", e);
    }
    Ok(())
}

async fn handle_nowplaying(req: &Request<'_>, bot: &DjBot) -> BotResult<()> {
    if !bot.player.is_connected(req.guild) {
        return Err(BotError::NotConnected);
    }
    match bot.player.now_playing(req.guild).await {
        Some(track) => bot.presenter.now_playing(req.guild, &track).await,
        None => notify(req, bot, "Nothing is playing").await,
    }
    Ok(())
}

/// Applies the multiplier, capped so the result never exceeds the maximum.
async fn handle_volume(req: &Request<'_>, bot: &DjBot, multiplier: f32) -> BotResult<()> {
    let change = bot
        .player
        .set_volume(req.guild, multiplier, bot.config.max_volume)
        .await?;

    let text = match change {
        None => "Nothing is playing".to_string(),
        Some(change) if (change.after - change.before).abs() <= f32::EPSILON => {
            format!("🔊 Volume already at the maximum ({}%)", percent(change.after))
        }
        Some(change) => format!("🔊 Volume {}%", percent(change.after)),
    };
    notify(req, bot, text).await;
    Ok(())
}

async fn handle_bind(req: &Request<'_>, bot: &DjBot, phrase: &str, url: Option<&str>) -> BotResult<()> {
    let text = match bot.resolver.bind(phrase, url).await? {
        BindOutcome::Bound { query, song_id } => {
            format!("Added binding\n{query} -> <{}>", song_id.short_url())
        }
        BindOutcome::Existing { query, song_id } => {
            format!("{query} is bound to <{}>", song_id.short_url())
        }
        BindOutcome::Unbound { query } => format!("{query} is not bound to anything"),
    };
    say(req, &text).await;
    Ok(())
}

async fn handle_list(req: &Request<'_>, bot: &DjBot, dj: bool) -> BotResult<()> {
    let songs = bot.store.list_songs(dj, LIST_LIMIT).await?;
    if songs.is_empty() {
        notify(req, bot, "No song found").await;
        return Ok(());
    }

    let title = if dj {
        format!("List {LIST_LIMIT} DJ-able songs")
    } else {
        format!("List {LIST_LIMIT} non DJ-able songs")
    };
    say(req, &embeds::format_song_list(&title, &songs)).await;
    Ok(())
}

async fn handle_tag(req: &Request<'_>, bot: &DjBot, target: &str, label: Option<&str>) -> BotResult<()> {
    let song_id = song_ref(target)
        .ok_or_else(|| BotError::InvalidArgument(format!("Not a video link or id: {target}")))?;

    let Some(label) = label else {
        let song = bot
            .store
            .find_song(&song_id)
            .await?
            .ok_or_else(|| BotError::no_video_at_link(song_id.clone()))?;
        let text = if song.tags.is_empty() {
            format!("{} has no tags", song.title)
        } else {
            format!("{}: #{}", song.title, song.tags.join(" #"))
        };
        say(req, &text).await;
        return Ok(());
    };

    if bot.store.add_tag(&song_id, label).await? {
        notify(req, bot, format!("🏷️ Tagged {song_id} with #{label}")).await;
        Ok(())
    } else {
        Err(BotError::no_video_at_link(song_id))
    }
}

/// Entry point for buttons and select menus.
pub async fn handle_component(ctx: &Context, component: &ComponentInteraction, bot: &DjBot) {
    let Some(guild) = component.guild_id else {
        return;
    };

    info!(
        "🔘 {} pressed by {} in guild {}",
        component.data.custom_id, component.user.name, guild
    );

    if let Err(e) = component.defer(&ctx.http).await {
        warn!("⚠️ Could not acknowledge component: {}", e);
    }

    bot.presenter.bind_text_channel(guild, component.channel_id);
    let req = Request {
        ctx,
        guild,
        channel: component.channel_id,
        user: component.user.id,
    };

    let result = if component.data.custom_id == button_ids::TRACK_SELECTION {
        handle_track_selection(&req, component, bot).await
    } else {
        match ButtonAction::parse(&component.data.custom_id) {
            Some(action) => handle_button(&req, action, bot).await,
            None => {
                debug!("Unknown component {}", component.data.custom_id);
                Ok(())
            }
        }
    };

    if let Err(e) = result {
        report_error(&req, &e).await;
    }
}

async fn handle_track_selection(
    req: &Request<'_>,
    component: &ComponentInteraction,
    bot: &DjBot,
) -> BotResult<()> {
    let ComponentInteractionDataKind::StringSelect { values } = &component.data.kind else {
        return Ok(());
    };
    let Some(video_id) = values.first() else {
        return Ok(());
    };

    // the menu is single use
    if let Err(e) = component.message.delete(&req.ctx.http).await {
        debug!("Search menu already gone: {}", e);
    }

    let song_id = SongId::new(video_id.as_str());
    bot.resolver.ensure_song(&song_id).await?;
    play_song(req, bot, &song_id).await
}

async fn handle_button(req: &Request<'_>, action: ButtonAction, bot: &DjBot) -> BotResult<()> {
    match action {
        ButtonAction::Encore(song_id) => {
            bot.resolver.ensure_song(&song_id).await?;
            play_song(req, bot, &song_id).await
        }
        ButtonAction::ReDj => handle_dj(req, bot, true).await,
        ButtonAction::Delete(song_id) => {
            if bot.store.remove_song(&song_id).await? {
                notify(req, bot, format!("Removed song from library ({song_id})")).await;
                Ok(())
            } else {
                Err(BotError::no_video_at_link(song_id))
            }
        }
    }
}

/// Joins the best voice channel unless already connected.
async fn ensure_joined(req: &Request<'_>, bot: &DjBot) -> BotResult<()> {
    join_if_needed(&bot.player, req.guild, || choose_channel(req)).await
}

async fn join_if_needed(
    player: &AudioPlayer,
    guild: GuildId,
    choose_channel: impl FnOnce() -> BotResult<VoiceChannelInfo>,
) -> BotResult<()> {
    if player.is_connected(guild) {
        return Ok(());
    }
    let target = choose_channel()?;
    match player.join(guild, target.id, target.name).await {
        Ok(()) | Err(BotError::AlreadyConnected { .. }) => Ok(()),
        Err(e) => Err(e),
    }
}

async fn join_voice(req: &Request<'_>, bot: &DjBot) -> BotResult<String> {
    let target = choose_channel(req)?;
    bot.player
        .join(req.guild, target.id, target.name.clone())
        .await?;
    Ok(target.name)
}

fn choose_channel(req: &Request<'_>) -> BotResult<VoiceChannelInfo> {
    let (requester, channels) = voice_channels(req.ctx, req.guild, req.user)?;
    pick_channel(requester, &channels).cloned()
}

/// Voice channels of the guild with their member counts, plus the channel the
/// user is sitting in.
fn voice_channels(
    ctx: &Context,
    guild_id: GuildId,
    user: UserId,
) -> BotResult<(Option<ChannelId>, Vec<VoiceChannelInfo>)> {
    let guild = guild_id
        .to_guild_cached(&ctx.cache)
        .ok_or_else(|| BotError::Voice("Server not found in cache".to_string()))?;

    let requester = guild.voice_states.get(&user).and_then(|vs| vs.channel_id);

    let mut members: HashMap<ChannelId, usize> = HashMap::new();
    for state in guild.voice_states.values() {
        if let Some(channel) = state.channel_id {
            *members.entry(channel).or_default() += 1;
        }
    }

    let channels = guild
        .channels
        .values()
        .filter(|c| matches!(c.kind, ChannelType::Voice | ChannelType::Stage))
        .map(|c| VoiceChannelInfo {
            id: c.id,
            name: c.name.clone(),
            members: members.get(&c.id).copied().unwrap_or(0),
        })
        .collect();

    Ok((requester, channels))
}

/// Short notice that deletes itself after the configured delay.
async fn notify(req: &Request<'_>, bot: &DjBot, text: impl Into<String>) {
    let sent = match req.channel.say(&req.ctx.http, text.into()).await {
        Ok(sent) => sent,
        Err(e) => {
            warn!("⚠️ Could not send notice: {}", e);
            return;
        }
    };

    if let Some(delay) = bot.config.notify_delete_after() {
        schedule_delete(req, sent.id, delay);
    }
}

fn schedule_delete(req: &Request<'_>, message: MessageId, delay: Duration) {
    let http = req.ctx.http.clone();
    let channel = req.channel;
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if let Err(e) = channel.delete_message(&http, message).await {
            debug!("Notice already gone: {}", e);
        }
    });
}

/// Message that stays in the channel.
async fn say(req: &Request<'_>, text: &str) {
    if let Err(e) = req.channel.say(&req.ctx.http, embeds::truncate(text, 2000)).await {
        warn!("⚠️ Could not send message: {}", e);
    }
}

async fn send_embed(req: &Request<'_>, embed: CreateEmbed) {
    if let Err(e) = req
        .channel
        .send_message(&req.ctx.http, CreateMessage::new().embed(embed))
        .await
    {
        warn!("⚠️ Could not send embed: {}", e);
    }
}

/// Every failed command ends here: one log line with the whole chain and one
/// error embed that stays in the channel.
async fn report_error(req: &Request<'_>, err: &BotError) {
    let mut chain = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        chain.push_str(&format!(": {cause}"));
        source = cause.source();
    }
    error!("❌ Command failed in guild {}: {}", req.guild, chain);

    send_embed(req, embeds::create_error_embed(&err.to_string())).await;
}

fn percent(volume: f32) -> u32 {
    (volume * 100.0).round() as u32
}
