use serenity::model::id::ChannelId;

use crate::{
    error::{BotError, BotResult},
    sources::strict_video_id,
};

/// A parsed prefix command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Join,
    Leave,
    Dj(bool),
    Play(String),
    PlaySearch(String),
    NowPlaying,
    Queue,
    Skip,
    Remove(String),
    Clear,
    Stop,
    /// Volume multiplier from `vup` / `vdown`.
    Volume(f32),
    Bind { phrase: String, url: Option<String> },
    ListDj,
    ListNotDj,
    Search(String),
    Tag { target: String, label: Option<String> },
    Help,
}

impl Command {
    /// Parses a chat message. `None` means the message is not addressed to
    /// the bot at all.
    pub fn parse(prefix: &str, content: &str) -> Option<BotResult<Self>> {
        let body = content.trim_start().strip_prefix(prefix)?;
        let mut words = body.split_whitespace();
        let verb = words.next()?.to_lowercase();
        let args: Vec<&str> = words.collect();

        Some(Self::from_parts(&verb, &args))
    }

    fn from_parts(verb: &str, args: &[&str]) -> BotResult<Self> {
        let rest = args.join(" ");
        let command = match verb {
            "join" => Self::Join,
            "leave" => Self::Leave,
            "dj" => Self::Dj(parse_switch(args.first().copied())?),
            "djoff" => Self::Dj(false),
            "play" | "p" => Self::Play(required(rest, "No url or search term given")?),
            "playsearch" | "ps" | "psearch" => {
                Self::PlaySearch(required(rest, "No search term(s) given")?)
            }
            "nowplaying" | "np" => Self::NowPlaying,
            "queue" | "playlist" => Self::Queue,
            "skip" => Self::Skip,
            "remove" => Self::Remove(required(rest, "Tell me what to remove")?),
            "clear" => Self::Clear,
            "stop" => Self::Stop,
            "vup" => Self::Volume(parse_multiplier(args.first().copied(), 2.0)?),
            "vdown" => Self::Volume(parse_multiplier(args.first().copied(), 0.5)?),
            "bind" => parse_bind(args)?,
            "listdj" => Self::ListDj,
            "listnotdj" => Self::ListNotDj,
            "search" => Self::Search(required(rest, "No search term(s) given")?),
            "tag" => {
                let (target, label) = args
                    .split_first()
                    .ok_or_else(|| BotError::InvalidArgument("Usage: tag <url or id> [label]".into()))?;
                let label = label.join(" ");
                Self::Tag {
                    target: target.to_string(),
                    label: (!label.is_empty()).then_some(label),
                }
            }
            "help" => Self::Help,
            other => {
                return Err(BotError::InvalidArgument(format!(
                    "Command \"{other}\" is not found"
                )))
            }
        };
        Ok(command)
    }
}

fn required(rest: String, message: &str) -> BotResult<String> {
    if rest.trim().is_empty() {
        Err(BotError::InvalidArgument(message.to_string()))
    } else {
        Ok(rest)
    }
}

fn parse_switch(arg: Option<&str>) -> BotResult<bool> {
    match arg.map(str::to_lowercase).as_deref() {
        None | Some("on" | "true" | "yes" | "1") => Ok(true),
        Some("off" | "false" | "no" | "0") => Ok(false),
        Some(other) => Err(BotError::InvalidArgument(format!(
            "DJ mode is either on or off, got: {other}"
        ))),
    }
}

fn parse_multiplier(arg: Option<&str>, default: f32) -> BotResult<f32> {
    let Some(arg) = arg else {
        return Ok(default);
    };
    match arg.parse::<f32>() {
        Ok(n) if n.is_finite() && n > 0.0 => Ok(n),
        _ => Err(BotError::InvalidArgument(format!(
            "Volume multiplier must be a positive number, got: {arg}"
        ))),
    }
}

/// `bind <phrase...> [url]`: the last word counts as the link only when it is
/// a full http(s) YouTube URL.
fn parse_bind(args: &[&str]) -> BotResult<Command> {
    let (phrase, url) = match args.split_last() {
        Some((last, init)) if strict_video_id(last).is_some() => (init.join(" "), Some(last.to_string())),
        _ => (args.join(" "), None),
    };

    if phrase.trim().is_empty() {
        return Err(BotError::InvalidArgument(
            "Usage: bind <search terms> [url]".to_string(),
        ));
    }
    Ok(Command::Bind { phrase, url })
}

/// A voice channel the bot could join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceChannelInfo {
    pub id: ChannelId,
    pub name: String,
    pub members: usize,
}

/// The requester's channel wins; otherwise the most populated one.
pub fn pick_channel(
    requester: Option<ChannelId>,
    channels: &[VoiceChannelInfo],
) -> BotResult<&VoiceChannelInfo> {
    if let Some(found) = requester.and_then(|id| channels.iter().find(|c| c.id == id)) {
        return Ok(found);
    }

    channels
        .iter()
        .filter(|c| c.members > 0)
        .fold(None::<&VoiceChannelInfo>, |best, c| match best {
            Some(b) if b.members >= c.members => Some(b),
            _ => Some(c),
        })
        .ok_or(BotError::NoVoiceChannel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(content: &str) -> BotResult<Command> {
        Command::parse("=", content).expect("addressed to the bot")
    }

    #[test]
    fn ignores_unprefixed_messages() {
        assert!(Command::parse("=", "play something").is_none());
        assert!(Command::parse("=", "=").is_none());
        assert!(Command::parse("=", "=   ").is_none());
    }

    #[test]
    fn verbs_and_aliases_are_case_insensitive() {
        assert_eq!(parse("=JOIN").unwrap(), Command::Join);
        assert_eq!(parse("=p never gonna").unwrap(), Command::Play("never gonna".into()));
        assert_eq!(parse("=Play  a   b").unwrap(), Command::Play("a b".into()));
        for alias in ["=ps lofi", "=psearch lofi", "=playsearch lofi"] {
            assert_eq!(parse(alias).unwrap(), Command::PlaySearch("lofi".into()));
        }
        assert_eq!(parse("=np").unwrap(), Command::NowPlaying);
        assert_eq!(parse("=playlist").unwrap(), Command::Queue);
        assert_eq!(parse("=djoff").unwrap(), Command::Dj(false));
    }

    #[test]
    fn custom_prefixes() {
        assert_eq!(
            Command::parse("!!", "!!skip").map(Result::unwrap),
            Some(Command::Skip)
        );
        assert!(Command::parse("!!", "=skip").is_none());
    }

    #[test]
    fn defaults_and_switches() {
        assert_eq!(parse("=dj").unwrap(), Command::Dj(true));
        assert_eq!(parse("=dj off").unwrap(), Command::Dj(false));
        assert_eq!(parse("=dj ON").unwrap(), Command::Dj(true));
        assert!(parse("=dj maybe").is_err());

        assert_eq!(parse("=vup").unwrap(), Command::Volume(2.0));
        assert_eq!(parse("=vdown").unwrap(), Command::Volume(0.5));
        assert_eq!(parse("=vup 1.5").unwrap(), Command::Volume(1.5));
        assert!(parse("=vup 0").is_err());
        assert!(parse("=vdown -1").is_err());
        assert!(parse("=vup inf").is_err());
        assert!(parse("=vup loud").is_err());
    }

    #[test]
    fn empty_arguments_are_rejected() {
        for content in ["=play", "=ps", "=remove", "=bind", "=search", "=tag"] {
            assert!(
                matches!(parse(content), Err(BotError::InvalidArgument(_))),
                "{content}"
            );
        }
        assert!(matches!(parse("=dance"), Err(BotError::InvalidArgument(_))));
    }

    #[test]
    fn bind_detects_a_trailing_url() {
        assert_eq!(
            parse("=bind my jam https://youtu.be/abc123").unwrap(),
            Command::Bind {
                phrase: "my jam".into(),
                url: Some("https://youtu.be/abc123".into()),
            }
        );
        assert_eq!(
            parse("=bind my jam").unwrap(),
            Command::Bind {
                phrase: "my jam".into(),
                url: None,
            }
        );
        // without a scheme the link is just another search word
        assert_eq!(
            parse("=bind my jam youtu.be/abc123").unwrap(),
            Command::Bind {
                phrase: "my jam youtu.be/abc123".into(),
                url: None,
            }
        );
        assert!(parse("=bind https://youtu.be/abc123").is_err());
    }

    #[test]
    fn tag_splits_target_and_label() {
        assert_eq!(
            parse("=tag abc123 road trip").unwrap(),
            Command::Tag {
                target: "abc123".into(),
                label: Some("road trip".into()),
            }
        );
        assert_eq!(
            parse("=tag abc123").unwrap(),
            Command::Tag {
                target: "abc123".into(),
                label: None,
            }
        );
    }

    fn channel(id: u64, name: &str, members: usize) -> VoiceChannelInfo {
        VoiceChannelInfo {
            id: ChannelId::new(id),
            name: name.to_string(),
            members,
        }
    }

    #[test]
    fn channel_selection() {
        let channels = vec![channel(1, "Lobby", 1), channel(2, "Party", 4), channel(3, "Quiet", 0)];

        assert_eq!(pick_channel(Some(ChannelId::new(3)), &channels).unwrap().name, "Quiet");
        assert_eq!(pick_channel(None, &channels).unwrap().name, "Party");
        assert_eq!(pick_channel(Some(ChannelId::new(99)), &channels).unwrap().name, "Party");

        let empty = vec![channel(3, "Quiet", 0)];
        assert!(matches!(pick_channel(None, &empty), Err(BotError::NoVoiceChannel)));
    }
}
