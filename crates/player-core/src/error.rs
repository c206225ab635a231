//! Engine error taxonomy.
//!
//! None of these are fatal once the engine runs: I/O, format and decode
//! failures skip the current track, protocol failures reject a single command,
//! and a lost control connection is simply re-accepted.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// File open/seek/read failure.
    #[error("io error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Header could not be parsed or describes an unsupported stream.
    #[error("format error: {0}")]
    Format(String),

    /// Mid-stream codec failure.
    #[error("decode error: {0}")]
    Decode(String),

    /// Malformed command message.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Control connection dropped.
    #[error("control connection lost")]
    ConnectionLost,

    /// Output device could not be configured.
    #[error("audio output error: {0}")]
    Output(String),

    /// The playback thread is gone or did not answer in time.
    #[error("playback thread unavailable")]
    PlayerUnavailable,
}

impl EngineError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        EngineError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
