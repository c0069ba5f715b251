//! Discord message building blocks: embeds and interactive components.

pub mod buttons;
pub mod embeds;
