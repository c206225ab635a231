//! Source Factory: file extension → source constructor.

use std::path::Path;

use crate::config::PlaybackConfig;
use crate::source::Source;
use crate::source::lossless::LosslessSource;
use crate::source::lossy::LossySource;
use crate::source::wav::WavSource;

type Constructor = fn(&Path, &PlaybackConfig) -> Box<dyn Source>;

const TABLE: &[(&str, Constructor)] = &[
    ("flac", open_lossless),
    ("mp3", open_lossy),
    ("wav", open_wav),
    ("wave", open_wav),
];

fn open_lossless(path: &Path, config: &PlaybackConfig) -> Box<dyn Source> {
    Box::new(LosslessSource::open(path, config.reader_options()))
}

fn open_lossy(path: &Path, config: &PlaybackConfig) -> Box<dyn Source> {
    Box::new(LossySource::open(path, config.reader_options(), &config.lossy))
}

fn open_wav(path: &Path, config: &PlaybackConfig) -> Box<dyn Source> {
    Box::new(WavSource::open(path, config.reader_options()))
}

fn lookup(path: &Path) -> Option<Constructor> {
    let ext = path.extension()?.to_str()?;
    TABLE
        .iter()
        .find(|(known, _)| known.eq_ignore_ascii_case(ext))
        .map(|(_, ctor)| *ctor)
}

/// Picks the source variant for a file by extension.
#[derive(Clone, Debug, Default)]
pub struct SourceFactory {
    config: PlaybackConfig,
}

impl SourceFactory {
    pub fn new(config: PlaybackConfig) -> Self {
        Self { config }
    }

    /// Construct the source for `path`; `None` when the extension is unsupported.
    ///
    /// The returned source may still be invalid (unreadable or corrupt file);
    /// callers check [`Source::is_valid`].
    pub fn open(&self, path: &Path) -> Option<Box<dyn Source>> {
        let Some(ctor) = lookup(path) else {
            tracing::debug!(path = ?path, "unsupported format");
            return None;
        };
        Some(ctor(path, &self.config))
    }

    pub fn is_supported(path: &Path) -> bool {
        lookup(path).is_some()
    }

    pub fn extensions() -> impl Iterator<Item = &'static str> {
        TABLE.iter().map(|(ext, _)| *ext)
    }
}
