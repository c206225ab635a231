use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug, Default)]
#[command(name = "playerd", version)]
pub struct Args {
    /// Optional config file (TOML); command-line flags take precedence
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Command channel bind address (loopback only), e.g. 127.0.0.1:17490
    #[arg(long)]
    pub bind: Option<SocketAddr>,

    /// Music directory scanned into the song library
    #[arg(long)]
    pub music_dir: Option<PathBuf>,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Discard audio at real-time pace instead of opening a device
    #[arg(long)]
    pub null_output: bool,

    /// Number of PCM buffers in the output ring
    #[arg(long)]
    pub ring_buffers: Option<usize>,

    /// Frames per PCM buffer (higher => more latency, fewer wakeups)
    #[arg(long)]
    pub buffer_frames: Option<usize>,

    /// Read-ahead per open file in KiB
    #[arg(long)]
    pub reader_kib: Option<usize>,

    /// Sample-accurate seeking for lossy files
    #[arg(long)]
    pub accurate_seek: bool,
}
