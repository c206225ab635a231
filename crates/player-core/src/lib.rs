pub mod config;
pub mod controller;
pub mod error;
pub mod factory;
pub mod library;
pub mod output;
pub mod power;
pub mod reader;
pub mod session;
pub mod source;
pub mod status;

pub use config::{LossyConfig, PlaybackConfig};
pub use controller::{PlaybackController, PlayerCommand, PlayerHandle, PlayerReply, spawn_player};
pub use error::{EngineError, Result};
pub use output::{AudioOutput, OutputStatus};
pub use session::{RepeatMode, SongId};
pub use status::StatusSnapshot;
