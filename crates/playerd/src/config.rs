//! Configuration loading and parsing.
//!
//! An optional TOML file supplies defaults; command-line flags override it.
//! Everything resolves into a [`PlaybackConfig`] plus [`ServerSettings`].

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use player_core::config::EQ_BANDS;
use serde::Deserialize;

pub use player_core::config::{LossyConfig, PlaybackConfig};

use crate::cli::Args;

pub const DEFAULT_BIND: &str = "127.0.0.1:17490";

/// Config file schema.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// Command channel bind address (host:port).
    pub bind: Option<String>,
    /// Music directory scanned into the song library.
    pub music_dir: Option<PathBuf>,
    /// Output device substring.
    pub device: Option<String>,
    /// Headless output.
    pub null_output: Option<bool>,
    pub playback: Option<PlaybackSection>,
    pub lossy: Option<LossySection>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlaybackSection {
    pub ring_buffers: Option<usize>,
    pub buffer_frames: Option<usize>,
    pub poll_interval_ms: Option<u64>,
    pub reader_kib: Option<usize>,
    pub reader_low_water_kib: Option<usize>,
    pub reader_chunk_kib: Option<usize>,
    pub pause_on_headset_unplug: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LossySection {
    pub accurate_seek: Option<bool>,
    /// Ten gains in dB, 31.5 Hz band first.
    pub equalizer: Option<Vec<f32>>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        Self::parse(&raw).with_context(|| format!("parse config {:?}", path))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Ok(toml::from_str::<FileConfig>(raw)?)
    }
}

/// Daemon-level settings that are not playback tuning.
#[derive(Clone, Debug)]
pub struct ServerSettings {
    pub bind: SocketAddr,
    pub music_dir: Option<PathBuf>,
    pub device: Option<String>,
    pub null_output: bool,
}

#[derive(Clone, Debug)]
pub struct DaemonConfig {
    pub server: ServerSettings,
    pub playback: PlaybackConfig,
}

/// Merge the config file (if any) with command-line flags.
pub fn resolve(args: &Args) -> Result<DaemonConfig> {
    let file = match args.config.as_deref() {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };
    resolve_with(args, file)
}

pub fn resolve_with(args: &Args, file: FileConfig) -> Result<DaemonConfig> {
    let bind = match (args.bind, file.bind.as_deref()) {
        (Some(addr), _) => addr,
        (None, Some(raw)) => raw
            .parse()
            .with_context(|| format!("parse bind address {raw}"))?,
        (None, None) => DEFAULT_BIND.parse().context("parse default bind")?,
    };
    if !bind.ip().is_loopback() {
        bail!("refusing to bind the command channel to non-loopback address {bind}");
    }

    let server = ServerSettings {
        bind,
        music_dir: args.music_dir.clone().or(file.music_dir),
        device: normalize_device_name(args.device.clone().or(file.device)),
        null_output: args.null_output || file.null_output.unwrap_or(false),
    };

    let mut playback = PlaybackConfig::default();
    let section = file.playback.unwrap_or_default();
    if let Some(n) = args.ring_buffers.or(section.ring_buffers) {
        if n < 2 {
            bail!("ring_buffers must be at least 2");
        }
        playback.ring_buffers = n;
    }
    if let Some(n) = args.buffer_frames.or(section.buffer_frames) {
        if n == 0 {
            bail!("buffer_frames must be positive");
        }
        playback.buffer_frames = n;
    }
    if let Some(ms) = section.poll_interval_ms {
        playback.poll_interval = Duration::from_millis(ms.max(1));
    }
    if let Some(kib) = args.reader_kib.or(section.reader_kib) {
        playback.reader_capacity = kib_to_bytes("reader_kib", kib)?;
        playback.reader_low_water = playback.reader_capacity / 2;
    }
    if let Some(kib) = section.reader_low_water_kib {
        playback.reader_low_water = kib_to_bytes("reader_low_water_kib", kib)?;
    }
    if let Some(kib) = section.reader_chunk_kib {
        playback.reader_chunk = kib_to_bytes("reader_chunk_kib", kib)?;
    }
    if let Some(pause) = section.pause_on_headset_unplug {
        playback.pause_on_headset_unplug = pause;
    }

    let lossy = file.lossy.unwrap_or_default();
    playback.lossy = LossyConfig {
        accurate_seek: args.accurate_seek || lossy.accurate_seek.unwrap_or(false),
        equalizer: lossy.equalizer.map(equalizer_gains).transpose()?,
    };

    Ok(DaemonConfig { server, playback })
}

fn kib_to_bytes(key: &str, kib: usize) -> Result<usize> {
    kib.checked_mul(1024)
        .ok_or_else(|| anyhow::anyhow!("{key} = {kib} is too large"))
}

fn equalizer_gains(gains: Vec<f32>) -> Result<[f32; EQ_BANDS]> {
    let len = gains.len();
    gains
        .try_into()
        .map_err(|_| anyhow::anyhow!("equalizer needs {EQ_BANDS} gains, got {len}"))
}

fn normalize_device_name(device: Option<String>) -> Option<String> {
    device.and_then(|name| {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_file_or_flags() {
        let cfg = resolve_with(&Args::default(), FileConfig::default()).unwrap();
        assert_eq!(cfg.server.bind.to_string(), DEFAULT_BIND);
        assert!(!cfg.server.null_output);
        assert_eq!(cfg.playback.ring_buffers, 3);
        assert!(cfg.playback.lossy.equalizer.is_none());
    }

    #[test]
    fn file_values_apply_and_flags_win() {
        let file = FileConfig::parse(
            r#"
            bind = "127.0.0.1:9000"
            music_dir = "/srv/music"
            device = "  USB DAC "

            [playback]
            ring_buffers = 2
            buffer_frames = 1024
            poll_interval_ms = 5
            pause_on_headset_unplug = false

            [lossy]
            accurate_seek = true
            equalizer = [0, 0, 3, 0, 0, 0, 0, 0, -2, 0]
            "#,
        )
        .unwrap();
        let args = Args {
            buffer_frames: Some(512),
            ..Args::default()
        };
        let cfg = resolve_with(&args, file).unwrap();
        assert_eq!(cfg.server.bind.port(), 9000);
        assert_eq!(cfg.server.music_dir, Some(PathBuf::from("/srv/music")));
        assert_eq!(cfg.server.device.as_deref(), Some("USB DAC"));
        assert_eq!(cfg.playback.ring_buffers, 2);
        assert_eq!(cfg.playback.buffer_frames, 512);
        assert_eq!(cfg.playback.poll_interval, Duration::from_millis(5));
        assert!(!cfg.playback.pause_on_headset_unplug);
        assert!(cfg.playback.lossy.accurate_seek);
        assert_eq!(cfg.playback.lossy.equalizer.unwrap()[2], 3.0);
    }

    #[test]
    fn non_loopback_bind_is_refused() {
        let args = Args {
            bind: Some("0.0.0.0:17490".parse().unwrap()),
            ..Args::default()
        };
        assert!(resolve_with(&args, FileConfig::default()).is_err());
    }

    #[test]
    fn bad_equalizer_and_unknown_keys_are_errors() {
        let file = FileConfig::parse("[lossy]\nequalizer = [1.0, 2.0]\n").unwrap();
        assert!(resolve_with(&Args::default(), file).is_err());
        assert!(FileConfig::parse("volume = 3\n").is_err());
    }

    #[test]
    fn config_flag_loads_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("playerd.toml");
        std::fs::write(&path, "null_output = true\n[playback]\nring_buffers = 4\n").unwrap();
        let args = Args {
            config: Some(path),
            ..Args::default()
        };
        let cfg = resolve(&args).unwrap();
        assert!(cfg.server.null_output);
        assert_eq!(cfg.playback.ring_buffers, 4);

        let missing = Args {
            config: Some(dir.path().join("absent.toml")),
            ..Args::default()
        };
        assert!(resolve(&missing).is_err());
    }

    #[test]
    fn reader_size_scales_low_water() {
        let args = Args {
            reader_kib: Some(64),
            ..Args::default()
        };
        let cfg = resolve_with(&args, FileConfig::default()).unwrap();
        assert_eq!(cfg.playback.reader_capacity, 64 * 1024);
        assert_eq!(cfg.playback.reader_low_water, 32 * 1024);
    }

    #[test]
    fn oversized_reader_sizes_are_errors() {
        let args = Args {
            reader_kib: Some(usize::MAX),
            ..Args::default()
        };
        assert!(resolve_with(&args, FileConfig::default()).is_err());

        let file = FileConfig::parse(&format!(
            "[playback]\nreader_chunk_kib = {}\n",
            i64::MAX
        ))
        .unwrap();
        let err = resolve_with(&Args::default(), file).unwrap_err();
        assert!(err.to_string().contains("reader_chunk_kib"));
    }

    #[test]
    fn normalize_device_name_trims_and_drops_empty() {
        assert_eq!(normalize_device_name(None), None);
        assert_eq!(normalize_device_name(Some("  ".to_string())), None);
        assert_eq!(
            normalize_device_name(Some("  USB  DAC ".to_string())),
            Some("USB  DAC".to_string())
        );
    }
}
