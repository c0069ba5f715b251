use num_format::{Locale, ToFormattedString};
use serenity::{
    all::Timestamp,
    builder::{CreateEmbed, CreateEmbedFooter},
};
use std::time::Duration;

use crate::{
    audio::queue::QueueSnapshot,
    sources::{Track, VideoInfo},
    storage::Song,
};

/// Embed colours.
pub mod colors {
    use serenity::all::Colour;

    pub const SUCCESS_GREEN: Colour = Colour::from_rgb(67, 181, 129);
    pub const ERROR_RED: Colour = Colour::from_rgb(220, 53, 69);
    pub const INFO_BLUE: Colour = Colour::from_rgb(52, 144, 220);
    pub const MUSIC_PURPLE: Colour = Colour::from_rgb(138, 43, 226);
    pub const NEUTRAL_GRAY: Colour = Colour::from_rgb(108, 117, 125);
}

const STANDARD_FOOTER: &str = "🎧 DJ";

/// Rows shown by `queue` before the rest is summarized.
const QUEUE_PREVIEW: usize = 15;

pub fn create_now_playing_embed(track: &Track) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title("🎵 Now Playing")
        .description(format!("**{}**", track.title))
        .color(colors::SUCCESS_GREEN)
        .field(
            "🎤 Uploader",
            track.uploader.as_deref().unwrap_or("Unknown"),
            true,
        );

    embed = match track.duration {
        Some(duration) => embed.field("⏱️ Duration", format_duration(duration), true),
        None => embed.field("⏱️ Duration", "🔴 Live", true),
    };

    embed = match track.requested_by {
        Some(user) => embed.field("👤 Requested by", format!("<@{user}>"), true),
        None => embed.field("👤 Requested by", "🎧 DJ", true),
    };

    if track.bass_boosted {
        embed = embed.field("🔊 Filter", "Bass boost", true);
    }

    if let Some(thumbnail) = &track.thumbnail {
        embed = embed.thumbnail(thumbnail);
    }

    embed
        .url(&track.url)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(format!("{} • {}", STANDARD_FOOTER, track.song_id.short_url())))
}

pub fn create_queue_embed(snapshot: &QueueSnapshot) -> CreateEmbed {
    let embed = CreateEmbed::default()
        .title("📋 Queue")
        .color(colors::INFO_BLUE);

    if snapshot.is_empty() {
        let hint = if snapshot.dj {
            "😴 **Nothing queued**\n\n🎧 DJ mode will pick the next song"
        } else {
            "😴 **Nothing queued**"
        };
        return embed
            .description(hint)
            .color(colors::NEUTRAL_GRAY)
            .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
            .timestamp(Timestamp::now());
    }

    let mut embed = embed;
    if let Some(current) = &snapshot.current {
        embed = embed.field(
            "▶️ Playing",
            format!("**{}**{}", current.title, duration_suffix(current.duration)),
            false,
        );
    }

    if !snapshot.upcoming.is_empty() {
        let mut lines: Vec<String> = snapshot
            .upcoming
            .iter()
            .take(QUEUE_PREVIEW)
            .enumerate()
            .map(|(i, track)| format!("**{}**. {}{}", i + 1, track.title, duration_suffix(track.duration)))
            .collect();
        if snapshot.upcoming.len() > QUEUE_PREVIEW {
            lines.push(format!("... and {} more", snapshot.upcoming.len() - QUEUE_PREVIEW));
        }
        embed = embed.field("Up next", truncate(&lines.join("\n"), 1024), false);
    }

    let mut info = format!(
        "**Total:** {} • **Volume:** {}%",
        snapshot.upcoming.len() + usize::from(snapshot.current.is_some()),
        (snapshot.volume * 100.0).round() as u32
    );
    let total = snapshot.total_duration();
    if total > Duration::ZERO {
        info.push_str(&format!(" • **Duration:** {}", format_duration(total)));
    }
    if snapshot.dj {
        info.push_str(" • 🎧 **DJ**");
    }

    embed
        .field("Info", info, false)
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
        .timestamp(Timestamp::now())
}

pub fn create_search_results_embed(query: &str, results: &[VideoInfo]) -> CreateEmbed {
    let lines: Vec<String> = results
        .iter()
        .enumerate()
        .map(|(i, info)| {
            let duration = info
                .duration()
                .map_or_else(|| "Live".to_string(), format_duration);
            format!(
                "**{}**. {}{} `[{}]`",
                i + 1,
                info.title,
                info.uploader
                    .as_ref()
                    .map(|u| format!(" - {u}"))
                    .unwrap_or_default(),
                duration
            )
        })
        .collect();

    CreateEmbed::default()
        .title("🔍 Search Results")
        .description(format!("Search: **{query}**\nPick a song from the menu below:"))
        .field("Songs", truncate(&lines.join("\n"), 1024), false)
        .color(colors::MUSIC_PURPLE)
}

pub fn create_error_embed(description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title("❌ Error")
        .description(description)
        .color(colors::ERROR_RED)
        .timestamp(Timestamp::now())
}

pub fn create_help_embed(prefix: &str) -> CreateEmbed {
    let p = prefix;
    CreateEmbed::default()
        .title("🎧 DJ - Commands")
        .color(colors::INFO_BLUE)
        .field(
            "🔊 Voice",
            format!("`{p}join` `{p}leave` `{p}dj [on|off]` `{p}djoff`"),
            false,
        )
        .field(
            "▶️ Playback",
            format!(
                "`{p}play <url or words>` `{p}playsearch <words>` `{p}skip` `{p}stop`\n\
                 `{p}vup [n]` `{p}vdown [n]`"
            ),
            false,
        )
        .field(
            "📋 Queue",
            format!("`{p}nowplaying` `{p}queue` `{p}remove <words>` `{p}clear`"),
            false,
        )
        .field(
            "📚 Library",
            format!(
                "`{p}bind <words> [url]` `{p}search <words>` `{p}listdj` `{p}listnotdj`\n\
                 `{p}tag <url or id> [label]`"
            ),
            false,
        )
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Library search results under a `Searching:` header.
pub fn format_library_search(terms: &str, songs: &[Song]) -> String {
    format_song_list(&format!("Searching: {terms}"), songs)
}

/// Numbered plain-text listing of library songs.
pub fn format_song_list(title: &str, songs: &[Song]) -> String {
    let mut out = String::new();
    if !title.is_empty() {
        out.push_str(title);
        out.push('\n');
    }

    for (i, song) in songs.iter().enumerate() {
        let duration = song
            .duration_secs
            .map(|secs| format_duration(Duration::from_secs(secs)))
            .unwrap_or_else(|| "live".to_string());
        out.push_str(&format!(
            "{}: {}\t<{}>\t{}\t{} plays",
            i + 1,
            song.title,
            song.id.short_url(),
            duration,
            song.query_count.to_formatted_string(&Locale::en)
        ));
        if !song.tags.is_empty() {
            out.push_str(&format!("\t#{}", song.tags.join(" #")));
        }
        if let Some(reason) = &song.banned {
            out.push_str(&format!("\tbanned: {reason}"));
        }
        out.push('\n');
    }
    out
}

fn duration_suffix(duration: Option<Duration>) -> String {
    duration
        .map(|d| format!(" `[{}]`", format_duration(d)))
        .unwrap_or_default()
}

/// Cuts at a char boundary, adding an ellipsis when shortened.
pub fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{kept}...")
}

/// `m:ss`, or `h:mm:ss` past an hour.
pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tests::song;
    use pretty_assertions::assert_eq;

    #[test]
    fn durations_use_clock_format() {
        assert_eq!(format_duration(Duration::from_secs(59)), "0:59");
        assert_eq!(format_duration(Duration::from_secs(212)), "3:32");
        assert_eq!(format_duration(Duration::from_secs(3723)), "1:02:03");
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("ñññññññññññ", 6), "ñññ...");
    }

    #[test]
    fn song_list_is_numbered() {
        let mut tagged = song("b2", "Second", true, 1234);
        tagged.tags = vec!["road".into(), "trip".into()];
        let list = format_song_list("Top songs", &[song("a1", "First", true, 5), tagged]);

        assert_eq!(
            list,
            "Top songs\n\
             1: First\t<https://youtu.be/a1>\t3:20\t5 plays\n\
             2: Second\t<https://youtu.be/b2>\t3:20\t1,234 plays\t#road #trip\n"
        );
    }

    #[test]
    fn library_search_names_the_terms() {
        let list = format_library_search("daft", &[song("a1", "Daft Punk", true, 2)]);
        assert_eq!(
            list,
            "Searching: daft\n1: Daft Punk\t<https://youtu.be/a1>\t3:20\t2 plays\n"
        );
    }

    #[test]
    fn song_list_shows_ban_reasons() {
        let mut banned = song("c3", "Loud", false, 0);
        banned.banned = Some("too loud".into());

        assert_eq!(
            format_song_list("", &[banned]),
            "1: Loud\t<https://youtu.be/c3>\t3:20\t0 plays\tbanned: too loud\n"
        );
    }
}
