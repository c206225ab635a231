//! Uncompressed RIFF/WAVE source.

use std::path::Path;

use symphonia::core::codecs::{
    CODEC_TYPE_PCM_F32LE, CODEC_TYPE_PCM_F64LE, CODEC_TYPE_PCM_S16LE, CODEC_TYPE_PCM_S24LE,
    CODEC_TYPE_PCM_S32LE, CODEC_TYPE_PCM_U8, CodecType,
};

use crate::config::ReaderOptions;

use super::codec::{CodecOptions, CodecSource, OutputDepth, SeekPrecision};
use super::{Source, StreamSpec};

const PCM_CODECS: &[CodecType] = &[
    CODEC_TYPE_PCM_U8,
    CODEC_TYPE_PCM_S16LE,
    CODEC_TYPE_PCM_S24LE,
    CODEC_TYPE_PCM_S32LE,
    CODEC_TYPE_PCM_F32LE,
    CODEC_TYPE_PCM_F64LE,
];

/// 8/16-bit integer PCM decodes to `I16`, 24/32-bit to `I32` and float PCM
/// to `F32`. Seeking is sample-exact.
pub struct WavSource(CodecSource);

impl WavSource {
    pub fn open(path: &Path, reader: ReaderOptions) -> Self {
        Self(CodecSource::open(
            path,
            reader,
            CodecOptions {
                label: "wav",
                codecs: PCM_CODECS,
                depth: OutputDepth::Native,
                seek: SeekPrecision::Accurate,
                equalizer: None,
                estimate_length: false,
            },
        ))
    }
}

impl Source for WavSource {
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
