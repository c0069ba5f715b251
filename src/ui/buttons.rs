use serenity::{
    all::ButtonStyle,
    builder::{CreateActionRow, CreateButton, CreateSelectMenu, CreateSelectMenuKind, CreateSelectMenuOption},
};

use super::embeds::{format_duration, truncate};
use crate::sources::{SongId, Track, VideoInfo};

/// Custom ids of the message components.
pub mod button_ids {
    pub const ENCORE: &str = "encore";
    pub const REDJ: &str = "redj";
    pub const DELETE: &str = "del";
    pub const TRACK_SELECTION: &str = "track_selection";
}

/// What a now-playing button asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ButtonAction {
    /// Play the same song again.
    Encore(SongId),
    /// Switch DJ mode back on.
    ReDj,
    /// Forget the song.
    Delete(SongId),
}

impl ButtonAction {
    pub fn parse(custom_id: &str) -> Option<Self> {
        let (action, arg) = match custom_id.split_once(':') {
            Some((action, arg)) => (action, Some(arg).filter(|a| !a.is_empty())),
            None => (custom_id, None),
        };

        match (action, arg) {
            (button_ids::ENCORE, Some(id)) => Some(Self::Encore(SongId::new(id))),
            (button_ids::REDJ, _) => Some(Self::ReDj),
            (button_ids::DELETE, Some(id)) => Some(Self::Delete(SongId::new(id))),
            _ => None,
        }
    }

    pub fn custom_id(&self) -> String {
        match self {
            Self::Encore(id) => format!("{}:{}", button_ids::ENCORE, id),
            Self::ReDj => button_ids::REDJ.to_string(),
            Self::Delete(id) => format!("{}:{}", button_ids::DELETE, id),
        }
    }
}

/// Encore / reDJ / delete row under the now-playing board.
pub fn create_now_playing_buttons(track: &Track) -> CreateActionRow {
    let encore = CreateButton::new(ButtonAction::Encore(track.song_id.clone()).custom_id())
        .label("Encore")
        .emoji('🔁')
        .style(ButtonStyle::Primary);

    let redj = CreateButton::new(ButtonAction::ReDj.custom_id())
        .label("DJ")
        .emoji('🎧')
        .style(ButtonStyle::Success);

    let delete = CreateButton::new(ButtonAction::Delete(track.song_id.clone()).custom_id())
        .label("Delete")
        .emoji('🗑')
        .style(ButtonStyle::Danger);

    CreateActionRow::Buttons(vec![encore, redj, delete])
}

/// Select menu for `playsearch`; each option's value is the video id.
pub fn create_track_selection_menu(results: &[VideoInfo]) -> CreateActionRow {
    let options = results
        .iter()
        .map(|info| {
            let duration = info
                .duration()
                .map(|d| format!(" [{}]", format_duration(d)))
                .unwrap_or_default();
            let label = truncate(&format!("{}{}", info.title, duration), 100);
            let description = truncate(info.uploader.as_deref().unwrap_or("YouTube"), 100);

            CreateSelectMenuOption::new(label, info.id.clone()).description(description)
        })
        .collect();

    let menu = CreateSelectMenu::new(button_ids::TRACK_SELECTION, CreateSelectMenuKind::String { options })
        .placeholder("Pick a song to play...")
        .min_values(1)
        .max_values(1);

    CreateActionRow::SelectMenu(menu)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn custom_ids_round_trip_through_parse() {
        let actions = [
            ButtonAction::Encore(SongId::new("abc123")),
            ButtonAction::ReDj,
            ButtonAction::Delete(SongId::new("x_y-z")),
        ];
        for action in actions {
            assert_eq!(ButtonAction::parse(&action.custom_id()), Some(action));
        }
    }

    #[test]
    fn unknown_or_incomplete_ids_are_ignored() {
        assert_eq!(ButtonAction::parse("encore"), None);
        assert_eq!(ButtonAction::parse("del:"), None);
        assert_eq!(ButtonAction::parse("music_skip"), None);
        assert_eq!(ButtonAction::parse("redj:whatever"), Some(ButtonAction::ReDj));
    }
}
