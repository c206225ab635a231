//! Daemon runtime wiring.
//!
//! Builds the library, output, playback thread and command channel, then
//! serves until Ctrl-C and tears everything down in order.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use player_core::library::{DirectoryLibrary, SongLibrary};
use player_core::output::device::{self, CpalVoice};
use player_core::output::{AudioOutput, NullVoice, Voice};
use player_core::power::SharedPowerSignals;
use player_core::session::SongId;
use player_core::{PlaybackController, spawn_player};

use crate::config::DaemonConfig;
use crate::server::CommandServer;

/// List output devices and print them to stdout.
pub fn list_devices() -> Result<()> {
    for (idx, name) in device::list_devices()?.iter().enumerate() {
        println!("{idx}: {name}");
    }
    Ok(())
}

/// Run the daemon until Ctrl-C.
pub fn run(config: DaemonConfig) -> Result<()> {
    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || {
            tracing::info!("shutdown requested");
            shutdown.store(true, Ordering::Release);
        })
        .context("install Ctrl-C handler")?;
    }

    let library = open_library(&config)?;
    let output = Arc::new(AudioOutput::new(
        config.playback.ring_buffers,
        config.playback.buffer_frames,
    ));
    // Device loss on the voice thread surfaces to the playback loop as an unplug.
    let power = Arc::new(SharedPowerSignals::default());
    output.attach_voice(open_voice(&config, &output, &power)?);

    let controller = PlaybackController::new(
        config.playback.clone(),
        output.clone(),
        library,
        power,
    );
    let (player, player_thread) = spawn_player(controller, shutdown.clone())?;

    let served = CommandServer::bind(config.server.bind, player, shutdown.clone())
        .and_then(|server| server.run());

    shutdown.store(true, Ordering::Release);
    if player_thread.join().is_err() {
        tracing::error!("playback thread panicked");
    }
    // The voice holds a renderer (and so the output); release it explicitly.
    output.detach_voice();
    tracing::info!("playerd stopped");
    served
}

fn open_library(config: &DaemonConfig) -> Result<Arc<dyn SongLibrary>> {
    match config.server.music_dir.as_deref() {
        Some(dir) => {
            let library = DirectoryLibrary::scan(dir)
                .with_context(|| format!("scan music directory {:?}", dir))?;
            Ok(Arc::new(library))
        }
        None => {
            tracing::warn!("no music directory configured; every song ID is unknown");
            let empty: HashMap<SongId, PathBuf> = HashMap::new();
            Ok(Arc::new(empty))
        }
    }
}

fn open_voice(
    config: &DaemonConfig,
    output: &Arc<AudioOutput>,
    power: &Arc<SharedPowerSignals>,
) -> Result<Box<dyn Voice>> {
    if config.server.null_output {
        tracing::info!("null output: audio is discarded");
        return Ok(Box::new(NullVoice::spawn(output.renderer())?));
    }
    let voice = CpalVoice::spawn(
        output.renderer(),
        config.server.device.clone(),
        power.clone(),
    )
    .context("open output device")?;
    tracing::info!(device = %voice.device_name(), "output device");
    Ok(Box::new(voice))
}
