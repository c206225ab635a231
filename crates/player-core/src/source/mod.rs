//! Decoded PCM sources.
//!
//! A [`Source`] turns one audio file into interleaved PCM of a fixed
//! [`StreamSpec`]. Variants:
//! - [`wav::WavSource`]: uncompressed RIFF/WAVE through symphonia
//! - [`lossless::LosslessSource`]: FLAC through symphonia
//! - [`lossy::LossySource`]: MP3 through symphonia, with optional equalizer
//!
//! Construction never fails loudly; a source that could not be opened reports
//! `is_valid() == false` and decodes nothing.

pub mod codec;
pub mod eq;
pub mod lossless;
pub mod lossy;
pub mod wav;

/// More consecutive corrupt packets than this ends the track early.
pub(crate) const MAX_CONSECUTIVE_DECODE_ERRORS: u32 = 8;

/// In-memory PCM sample representation produced by a source.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SampleFormat {
    /// 16-bit signed integer.
    I16,
    /// 32-bit signed integer, left-justified for narrower sources.
    I32,
    /// 32-bit float in [-1.0, 1.0].
    F32,
}

impl SampleFormat {
    /// Bytes per sample.
    pub fn width(self) -> usize {
        match self {
            SampleFormat::I16 => 2,
            SampleFormat::I32 | SampleFormat::F32 => 4,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SampleFormat::I16 => "i16",
            SampleFormat::I32 => "i32",
            SampleFormat::F32 => "f32",
        }
    }
}

/// Shape of the PCM a source produces.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamSpec {
    pub sample_rate: u32,
    pub channels: u16,
    pub format: SampleFormat,
}

impl Default for StreamSpec {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            channels: 2,
            format: SampleFormat::I16,
        }
    }
}

impl StreamSpec {
    /// Bytes per interleaved frame.
    pub fn frame_bytes(&self) -> usize {
        usize::from(self.channels.max(1)) * self.format.width()
    }
}

/// A decodable audio file, exclusively owned by the playback controller.
pub trait Source: Send {
    fn spec(&self) -> StreamSpec;

    /// Total frames in the stream; never 0.
    fn total_samples(&self) -> u64;

    fn is_valid(&self) -> bool;

    /// True once `decode` has run off the end of the stream.
    fn is_done(&self) -> bool;

    /// Fill `buf` with whole frames, zero the unused tail and return the bytes
    /// written. Returns 0 when the stream is exhausted, or without touching
    /// `is_done` when `buf` cannot hold a single frame.
    fn decode(&mut self, buf: &mut [u8]) -> usize;

    /// Reposition to `sample` (a frame index). Returns `false` and keeps the
    /// previous position when seeking is not possible.
    fn seek(&mut self, sample: u64) -> bool;

    /// Current frame cursor.
    fn tell(&self) -> u64;

    fn channels(&self) -> u16 {
        self.spec().channels
    }

    fn sample_rate(&self) -> u32 {
        self.spec().sample_rate
    }

    fn sample_format(&self) -> SampleFormat {
        self.spec().format
    }

    fn duration_ms(&self) -> u64 {
        frames_to_ms(self.total_samples(), self.sample_rate())
    }
}

pub fn frames_to_ms(frames: u64, sample_rate: u32) -> u64 {
    if sample_rate == 0 {
        return 0;
    }
    frames.saturating_mul(1000) / u64::from(sample_rate)
}

pub fn ms_to_frames(ms: u64, sample_rate: u32) -> u64 {
    ms.saturating_mul(u64::from(sample_rate)) / 1000
}

/// Largest prefix of `len` bytes holding whole frames.
pub(crate) fn whole_frames_len(len: usize, spec: &StreamSpec) -> usize {
    let frame = spec.frame_bytes();
    len / frame * frame
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Audio fixtures: WAV through hound, FLAC and MP3 written byte by byte.

    use std::path::{Path, PathBuf};

    pub fn ramp_i16(frame: u32, ch: u16) -> i16 {
        ((frame as i32 * 7 + ch as i32 * 1000) % 30_000) as i16
    }

    /// Write a 16-bit WAV whose samples follow [`ramp_i16`].
    pub fn write_wav_i16(dir: &Path, name: &str, rate: u32, channels: u16, frames: u32) -> PathBuf {
        let path = dir.join(name);
        let spec = hound::WavSpec {
            channels,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for frame in 0..frames {
            for ch in 0..channels {
                writer.write_sample(ramp_i16(frame, ch)).unwrap();
            }
        }
        writer.finalize().unwrap();
        path
    }

    /// Write a 24-bit WAV with sample value `frame * 256 + ch`.
    pub fn write_wav_i24(dir: &Path, name: &str, rate: u32, channels: u16, frames: u32) -> PathBuf {
        let path = dir.join(name);
        let spec = hound::WavSpec {
            channels,
            sample_rate: rate,
            bits_per_sample: 24,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for frame in 0..frames {
            for ch in 0..channels {
                writer.write_sample(frame as i32 * 256 + ch as i32).unwrap();
            }
        }
        writer.finalize().unwrap();
        path
    }

    /// Write a 32-bit float WAV with sample value `frame / frames`.
    pub fn write_wav_f32(dir: &Path, name: &str, rate: u32, channels: u16, frames: u32) -> PathBuf {
        let path = dir.join(name);
        let spec = hound::WavSpec {
            channels,
            sample_rate: rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for frame in 0..frames {
            for _ in 0..channels {
                writer.write_sample(frame as f32 / frames as f32).unwrap();
            }
        }
        writer.finalize().unwrap();
        path
    }

    /// Write an 8-bit unsigned WAV with a constant value per channel.
    pub fn write_wav_u8(dir: &Path, name: &str, rate: u32, values: &[i8], frames: u32) -> PathBuf {
        let path = dir.join(name);
        let spec = hound::WavSpec {
            channels: values.len() as u16,
            sample_rate: rate,
            bits_per_sample: 8,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for _ in 0..frames {
            for &v in values {
                writer.write_sample(v).unwrap();
            }
        }
        writer.finalize().unwrap();
        path
    }

    /// Write a 16-bit FLAC whose samples follow [`ramp_i16`], stored as
    /// verbatim subframes in fixed 4096-frame blocks.
    pub fn write_flac_i16(dir: &Path, name: &str, rate: u32, channels: u16, frames: u32) -> PathBuf {
        const BLOCK: u32 = 4096;
        let path = dir.join(name);

        let mut out = b"fLaC".to_vec();
        // Last metadata block, STREAMINFO, 34 bytes.
        out.extend_from_slice(&[0x80, 0x00, 0x00, 0x22]);
        out.extend_from_slice(&(BLOCK as u16).to_be_bytes());
        out.extend_from_slice(&(BLOCK as u16).to_be_bytes());
        out.extend_from_slice(&[0u8; 6]);
        let packed = (u64::from(rate) << 44)
            | (u64::from(channels - 1) << 41)
            | (15u64 << 36)
            | u64::from(frames);
        out.extend_from_slice(&packed.to_be_bytes());
        out.extend_from_slice(&[0u8; 16]);

        for (index, start) in (0..frames).step_by(BLOCK as usize).enumerate() {
            let len = BLOCK.min(frames - start);
            // Fixed blocking; explicit 16-bit block size; rate from STREAMINFO;
            // independent channels; 16 bits per sample.
            let mut frame = vec![0xFF, 0xF8, 0x70, (((channels - 1) as u8) << 4) | 0x08];
            push_utf8_number(&mut frame, index as u32);
            frame.extend_from_slice(&((len - 1) as u16).to_be_bytes());
            frame.push(crc8(&frame));
            for ch in 0..channels {
                frame.push(0x02);
                for f in start..start + len {
                    frame.extend_from_slice(&ramp_i16(f, ch).to_be_bytes());
                }
            }
            let crc = crc16(&frame);
            frame.extend_from_slice(&crc.to_be_bytes());
            out.extend_from_slice(&frame);
        }

        std::fs::write(&path, out).unwrap();
        path
    }

    fn push_utf8_number(out: &mut Vec<u8>, n: u32) {
        assert!(n < 0x800, "fixture frame index out of range");
        if n < 0x80 {
            out.push(n as u8);
        } else {
            out.push(0xC0 | (n >> 6) as u8);
            out.push(0x80 | (n & 0x3F) as u8);
        }
    }

    fn crc8(bytes: &[u8]) -> u8 {
        bytes.iter().fold(0u8, |mut crc, &b| {
            crc ^= b;
            for _ in 0..8 {
                crc = if crc & 0x80 != 0 { (crc << 1) ^ 0x07 } else { crc << 1 };
            }
            crc
        })
    }

    fn crc16(bytes: &[u8]) -> u16 {
        bytes.iter().fold(0u16, |mut crc, &b| {
            crc ^= u16::from(b) << 8;
            for _ in 0..8 {
                crc = if crc & 0x8000 != 0 { (crc << 1) ^ 0x8005 } else { crc << 1 };
            }
            crc
        })
    }

    /// Frames per MPEG-1 Layer III packet.
    pub const MP3_PACKET_FRAMES: u64 = 1152;

    /// Write `packets` silent MPEG-1 Layer III frames: 44.1 kHz mono at
    /// 128 kbit/s, no Xing header. Every frame after the first points
    /// `main_data_begin` bytes back into the bit reservoir.
    pub fn write_mp3_silence(dir: &Path, name: &str, packets: usize, main_data_begin: u16) -> PathBuf {
        // 144 * 128000 / 44100, unpadded.
        const PACKET_LEN: usize = 417;
        let path = dir.join(name);
        let mut out = Vec::with_capacity(PACKET_LEN * packets);
        for i in 0..packets {
            let start = out.len();
            out.extend_from_slice(&[0xFF, 0xFB, 0x90, 0xC0]);
            let begin = if i == 0 { 0 } else { main_data_begin & 0x1FF };
            // Side info opens with the 9-bit main_data_begin.
            out.push((begin >> 1) as u8);
            out.push(((begin & 1) as u8) << 7);
            out.resize(start + PACKET_LEN, 0);
        }
        std::fs::write(&path, out).unwrap();
        path
    }

    /// Drain a source, returning every byte it produced.
    pub fn decode_all(source: &mut dyn super::Source, chunk: usize) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = vec![0u8; chunk];
        loop {
            let n = source.decode(&mut buf);
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        out
    }
}
