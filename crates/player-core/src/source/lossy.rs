//! MP3 source.

use std::path::Path;

use symphonia::core::codecs::CODEC_TYPE_MP3;

use crate::config::{LossyConfig, ReaderOptions};

use super::codec::{CodecOptions, CodecSource, OutputDepth, SeekPrecision};
use super::{Source, StreamSpec};

/// Lossy source: always `I16`, with startup-time seek precision and an
/// optional graphic equalizer applied before the integer conversion.
pub struct LossySource(CodecSource);

impl LossySource {
    pub fn open(path: &Path, reader: ReaderOptions, config: &LossyConfig) -> Self {
        Self(CodecSource::open(path, reader, codec_options(config)))
    }
}

fn codec_options(config: &LossyConfig) -> CodecOptions {
    CodecOptions {
        label: "mp3",
        codecs: &[CODEC_TYPE_MP3],
        depth: OutputDepth::Narrow,
        seek: if config.accurate_seek {
            SeekPrecision::Accurate
        } else {
            SeekPrecision::Coarse
        },
        equalizer: config.equalizer,
        estimate_length: true,
    }
}

impl Source for LossySource {
    fn spec(&self) -> StreamSpec {
        self.0.spec()
    }

    fn total_samples(&self) -> u64 {
        self.0.total_samples()
    }

    fn is_valid(&self) -> bool {
        self.0.is_valid()
    }

    fn is_done(&self) -> bool {
        self.0.is_done()
    }

    fn decode(&mut self, buf: &mut [u8]) -> usize {
        self.0.decode(buf)
    }

    fn seek(&mut self, sample: u64) -> bool {
        self.0.seek(sample)
    }

    fn tell(&self) -> u64 {
        self.0.tell()
    }
}
