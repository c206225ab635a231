//! playerd: background music player controlled over a loopback socket.
//!
//! ## Threads
//! 1. **Command channel** (main thread): accepts one controller connection and
//!    answers RS/terminator framed requests.
//! 2. **Playback**: owns the queue and the now-playing source and keeps the
//!    output ring filled.
//! 3. **Voice**: owns the device stream; its callback drains the ring.
//! 4. **Prefetch**: one per open file, reading ahead of the decoder.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use playerd::{cli, config, runtime};

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,playerd=info,player_core=info")
        }))
        .init();

    if args.list_devices {
        return runtime::list_devices();
    }

    let config = config::resolve(&args)?;
    tracing::info!(
        bind = %config.server.bind,
        music_dir = ?config.server.music_dir,
        ring_buffers = config.playback.ring_buffers,
        buffer_frames = config.playback.buffer_frames,
        "starting"
    );
    runtime::run(config)
}
