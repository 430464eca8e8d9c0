// Remu Radio Library

pub mod config;
pub mod controller;
pub mod decoder;
pub mod error;
pub mod events;
pub mod loader;
pub mod player;
pub mod reader;
pub mod retry;
pub mod status;

pub use config::RadioConfig;
pub use controller::{Command, RadioController};
pub use events::PlayerEvent;
pub use player::{MediaElement, PlayerSettings, StreamPlayer};
pub use status::{PlaybackStatus, PlayerState};
