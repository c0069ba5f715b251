//! # Audio Module
//!
//! Per-guild playback for the bot.
//!
//! ## Architecture
//!
//! ### [`player`] - Voice Session Controller
//! - Registry of guild sessions, one mutex each
//! - Join/leave, FIFO playback, skip/remove/clear/stop, volume and DJ mode
//! - Consumes [`backend::TrackEnded`] events from a channel, dropping stale ones
//!
//! ### [`queue`] - Queue Management
//! - Pending tracks and read-only snapshots
//!
//! ### [`backend`] - Seams
//! - [`backend::VoiceBackend`], [`backend::PlaybackHandle`] and
//!   [`backend::Presenter`], so the controller runs without Discord in tests
//!
//! ### [`voice`] - Songbird
//! - Connects through songbird, streams over HTTP or through an `ffmpeg` pipe
//!
//! ### [`dj`] - Autoplay
//! - Random DJ-eligible picks from the library

pub mod backend;
pub mod dj;
pub mod player;
pub mod queue;
pub mod voice;

pub use backend::{end_channel, Presenter, VoiceBackend};
pub use dj::DjPicker;
pub use player::{AddOutcome, AudioPlayer};
pub use voice::SongbirdBackend;
