//! FLAC source.

use std::path::Path;

use symphonia::core::codecs::CODEC_TYPE_FLAC;

use crate::config::ReaderOptions;

use super::codec::{CodecOptions, CodecSource, OutputDepth, SeekPrecision};
use super::{Source, StreamSpec};

/// Lossless source: 16-bit streams decode to `I16`, deeper ones to `I32`.
/// Seeking is always sample-exact.
pub struct LosslessSource(CodecSource);

impl LosslessSource {
    pub fn open(path: &Path, reader: ReaderOptions) -> Self {
        Self(CodecSource::open(
            path,
            reader,
            CodecOptions {
                label: "flac",
                codecs: &[CODEC_TYPE_FLAC],
                depth: OutputDepth::Native,
                seek: SeekPrecision::Accurate,
                equalizer: None,
                estimate_length: false,
            },
        ))
    }
}

impl Source for LosslessSource {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SampleFormat;
    use crate::source::fixtures::*;

    #[test]
    fn sixteen_bit_flac_decodes_every_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_flac_i16(dir.path(), "ramp.flac", 44_100, 2, 10_000);
        let mut src = LosslessSource::open(&path, ReaderOptions::default());
        assert!(src.is_valid());
        assert_eq!(src.sample_format(), SampleFormat::I16);
        assert_eq!(src.channels(), 2);
        assert_eq!(src.total_samples(), 10_000);

        let bytes = decode_all(&mut src, 4096);
        assert_eq!(bytes.len(), 10_000 * 2 * 2);
        assert!(src.is_done());
        assert_eq!(src.tell(), 10_000);
        let s = &bytes[(5_000 * 2 + 1) * 2..(5_000 * 2 + 2) * 2];
        assert_eq!(i16::from_ne_bytes([s[0], s[1]]), ramp_i16(5_000, 1));
    }

    #[test]
    fn flac_seek_lands_on_requested_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_flac_i16(dir.path(), "seek.flac", 44_100, 1, 30_000);
        let mut src = LosslessSource::open(&path, ReaderOptions::default());
        let mut buf = vec![0u8; 512];
        src.decode(&mut buf);

        assert!(src.seek(21_000));
        assert_eq!(src.tell(), 21_000);
        assert_eq!(src.decode(&mut buf), 512);
        assert_eq!(i16::from_ne_bytes([buf[0], buf[1]]), ramp_i16(21_000, 0));
        assert_eq!(src.tell(), 21_256);

        assert!(src.seek(100));
        assert_eq!(decode_all(&mut src, 4096).len(), (30_000 - 100) * 2);
    }

    #[test]
    fn non_flac_content_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let wav = write_wav_i16(dir.path(), "renamed.flac", 44_100, 2, 64);
        let src = LosslessSource::open(&wav, ReaderOptions::default());
        assert!(!src.is_valid());
        assert_eq!(src.total_samples(), 1);
    }

    #[test]
    fn truncated_flac_header_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cut.flac");
        std::fs::write(&path, b"fLaC\0\0\0\x22").unwrap();
        let mut src = LosslessSource::open(&path, ReaderOptions::default());
        assert!(!src.is_valid());
        let mut buf = [0u8; 32];
        assert_eq!(src.decode(&mut buf), 0);
        assert!(src.is_done());
    }
}
