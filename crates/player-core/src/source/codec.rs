//! Symphonia-backed decode core shared by the WAV, lossless and lossy sources.
//!
//! Opens the container through a [`BufferedFileReader`], decodes packet by
//! packet into a pending byte buffer, and hands out whole frames on `decode`.

use std::io;
use std::path::Path;

use symphonia::core::audio::{AudioBufferRef, SampleBuffer};
use symphonia::core::codecs::{
    CODEC_TYPE_NULL, CODEC_TYPE_PCM_F32BE, CODEC_TYPE_PCM_F32LE, CODEC_TYPE_PCM_F64BE,
    CODEC_TYPE_PCM_F64LE, CodecParameters, CodecType, Decoder, DecoderOptions,
};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, Packet, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::{Time, TimeBase};

use crate::config::{EQ_BANDS, ReaderOptions};
use crate::error::{EngineError, Result};
use crate::reader::BufferedFileReader;

use super::eq::GraphicEq;
use super::{MAX_CONSECUTIVE_DECODE_ERRORS, SampleFormat, Source, StreamSpec, whole_frames_len};

/// Integer width chosen for decoded output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputDepth {
    /// Always 16-bit.
    Narrow,
    /// 16-bit for streams up to 16 bits deep, 32-bit otherwise. Float PCM
    /// stays float.
    Native,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SeekPrecision {
    /// Land exactly on the requested frame.
    Accurate,
    /// Land on the nearest preceding packet boundary.
    Coarse,
}

impl SeekPrecision {
    fn mode(self) -> SeekMode {
        match self {
            SeekPrecision::Accurate => SeekMode::Accurate,
            SeekPrecision::Coarse => SeekMode::Coarse,
        }
    }
}

#[derive(Clone, Debug)]
pub struct CodecOptions {
    /// Short name used in log lines.
    pub label: &'static str,
    /// Reject streams whose codec is not listed; empty accepts anything
    /// symphonia decodes.
    pub codecs: &'static [CodecType],
    pub depth: OutputDepth,
    pub seek: SeekPrecision,
    pub equalizer: Option<[f32; EQ_BANDS]>,
    /// Estimate the length from the first packet when the header has no frame count.
    pub estimate_length: bool,
}

impl Default for CodecOptions {
    fn default() -> Self {
        Self {
            label: "codec",
            codecs: &[],
            depth: OutputDepth::Native,
            seek: SeekPrecision::Accurate,
            equalizer: None,
            estimate_length: false,
        }
    }
}

struct Stream {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    time_base: Option<TimeBase>,
    seek: SeekPrecision,
    eq: Option<GraphicEq>,
    pending: Vec<u8>,
    pending_pos: usize,
    skip_frames: u64,
    first_packet: Option<Packet>,
    errors: u32,
}

pub struct CodecSource {
    label: &'static str,
    stream: Option<Stream>,
    spec: StreamSpec,
    total_samples: u64,
    cursor: u64,
    done: bool,
}

impl CodecSource {
    pub fn open(path: &Path, reader: ReaderOptions, options: CodecOptions) -> Self {
        let label = options.label;
        match open_stream(path, reader, options) {
            Ok((stream, spec, total_samples)) => {
                tracing::debug!(
                    path = ?path,
                    codec = label,
                    rate = spec.sample_rate,
                    channels = spec.channels,
                    format = spec.format.label(),
                    total_samples,
                    "codec source opened"
                );
                Self {
                    label,
                    stream: Some(stream),
                    spec,
                    total_samples,
                    cursor: 0,
                    done: false,
                }
            }
            Err(e) => {
                tracing::warn!(path = ?path, codec = label, "source unavailable: {e}");
                Self {
                    label,
                    stream: None,
                    spec: StreamSpec::default(),
                    total_samples: 1,
                    cursor: 0,
                    done: false,
                }
            }
        }
    }
}

fn open_stream(
    path: &Path,
    reader: ReaderOptions,
    options: CodecOptions,
) -> Result<(Stream, StreamSpec, u64)> {
    let reader = BufferedFileReader::open(path, reader)?;
    let byte_len = reader.len();

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }
    let mss = MediaSourceStream::new(Box::new(reader), Default::default());
    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| EngineError::Format(e.to_string()))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| EngineError::Format("no audio track".into()))?;
    let params = track.codec_params.clone();
    let track_id = track.id;

    if !options.codecs.is_empty() && !options.codecs.contains(&params.codec) {
        return Err(EngineError::Format(format!(
            "expected {} stream, found codec {:?}",
            options.label, params.codec
        )));
    }

    let channels = params
        .channels
        .ok_or_else(|| EngineError::Format("unknown channel layout".into()))?
        .count();
    let sample_rate = params
        .sample_rate
        .ok_or_else(|| EngineError::Format("unknown sample rate".into()))?;
    if channels == 0 || sample_rate == 0 {
        return Err(EngineError::Format("zero channels or sample rate".into()));
    }
    let channels = u16::try_from(channels)
        .map_err(|_| EngineError::Format(format!("{channels} channels")))?;

    let decoder = symphonia::default::get_codecs()
        .make(&params, &DecoderOptions::default())
        .map_err(|e| EngineError::Format(e.to_string()))?;

    let spec = StreamSpec {
        sample_rate,
        channels,
        format: output_format(&params, options.depth),
    };

    let mut first_packet = None;
    let total_samples = match params.n_frames {
        Some(n) => n,
        None if options.estimate_length => {
            let packet = next_track_packet(format.as_mut(), track_id)?;
            let frames = if packet.dur > 0 {
                packet.dur
            } else {
                params.max_frames_per_packet.unwrap_or(0)
            };
            let estimate = estimate_total_frames(byte_len, packet.buf().len() as u64, frames);
            first_packet = Some(packet);
            estimate
        }
        None => 0,
    }
    .max(1);

    let eq = options
        .equalizer
        .map(|gains| GraphicEq::new(&gains, sample_rate, usize::from(channels)))
        .filter(|eq| !eq.is_flat());

    let stream = Stream {
        format,
        decoder,
        track_id,
        time_base: params.time_base,
        seek: options.seek,
        eq,
        pending: Vec::new(),
        pending_pos: 0,
        skip_frames: 0,
        first_packet,
        errors: 0,
    };
    Ok((stream, spec, total_samples))
}

fn output_format(params: &CodecParameters, depth: OutputDepth) -> SampleFormat {
    const FLOAT_CODECS: [CodecType; 4] = [
        CODEC_TYPE_PCM_F32LE,
        CODEC_TYPE_PCM_F32BE,
        CODEC_TYPE_PCM_F64LE,
        CODEC_TYPE_PCM_F64BE,
    ];
    match depth {
        OutputDepth::Narrow => SampleFormat::I16,
        OutputDepth::Native if FLOAT_CODECS.contains(&params.codec) => SampleFormat::F32,
        OutputDepth::Native => {
            let bits = params.bits_per_sample.or(params.bits_per_coded_sample);
            if bits.is_none_or(|b| b <= 16) {
                SampleFormat::I16
            } else {
                SampleFormat::I32
            }
        }
    }
}

fn next_track_packet(format: &mut dyn FormatReader, track_id: u32) -> Result<Packet> {
    loop {
        let packet = format
            .next_packet()
            .map_err(|e| EngineError::Format(format!("no first packet: {e}")))?;
        if packet.track_id() == track_id {
            return Ok(packet);
        }
    }
}

/// Constant-bitrate length estimate: frames per packet times packets in the file.
pub(crate) fn estimate_total_frames(byte_len: u64, packet_bytes: u64, packet_frames: u64) -> u64 {
    if packet_bytes == 0 {
        return 0;
    }
    byte_len / packet_bytes * packet_frames
}

fn ts_to_frames(time_base: Option<TimeBase>, ts: u64, rate: u32) -> u64 {
    match time_base {
        Some(tb) if !(tb.numer == 1 && tb.denom == rate) => {
            let t = tb.calc_time(ts);
            t.seconds * u64::from(rate) + (t.frac * f64::from(rate)).round() as u64
        }
        _ => ts,
    }
}

fn frames_to_time(frames: u64, rate: u32) -> Time {
    let rate = u64::from(rate.max(1));
    Time::new(frames / rate, (frames % rate) as f64 / rate as f64)
}

/// Count a bad packet; true once the run of failures is too long to continue.
fn too_many_errors(errors: &mut u32, label: &str, err: &SymphoniaError) -> bool {
    *errors += 1;
    tracing::warn!(codec = label, consecutive = *errors, "skipping corrupt packet: {err}");
    *errors > MAX_CONSECUTIVE_DECODE_ERRORS
}

/// Append decoded audio to `out` as native-endian samples of `format`.
fn append_pcm(
    decoded: AudioBufferRef<'_>,
    format: SampleFormat,
    eq: Option<&mut GraphicEq>,
    out: &mut Vec<u8>,
) {
    let frames = decoded.frames() as u64;
    let spec = *decoded.spec();
    match (format, eq) {
        (SampleFormat::I16, None) => {
            let mut buf = SampleBuffer::<i16>::new(frames, spec);
            buf.copy_interleaved_ref(decoded);
            for s in buf.samples() {
                out.extend_from_slice(&s.to_ne_bytes());
            }
        }
        (SampleFormat::I16, Some(eq)) => {
            let mut buf = SampleBuffer::<f32>::new(frames, spec);
            buf.copy_interleaved_ref(decoded);
            eq.process(buf.samples_mut());
            for s in buf.samples() {
                let v = (s.clamp(-1.0, 1.0) * f32::from(i16::MAX)).round() as i16;
                out.extend_from_slice(&v.to_ne_bytes());
            }
        }
        (SampleFormat::I32, _) => {
            let mut buf = SampleBuffer::<i32>::new(frames, spec);
            buf.copy_interleaved_ref(decoded);
            for s in buf.samples() {
                out.extend_from_slice(&s.to_ne_bytes());
            }
        }
        (SampleFormat::F32, eq) => {
            let mut buf = SampleBuffer::<f32>::new(frames, spec);
            buf.copy_interleaved_ref(decoded);
            if let Some(eq) = eq {
                eq.process(buf.samples_mut());
            }
            for s in buf.samples() {
                out.extend_from_slice(&s.to_ne_bytes());
            }
        }
    }
}

impl Stream {
    /// Decode until PCM is pending. Returns false at end of stream or on a
    /// failure that ends the track early.
    fn refill(&mut self, spec: &StreamSpec, label: &str) -> bool {
        self.pending.clear();
        self.pending_pos = 0;
        let frame_bytes = spec.frame_bytes();

        loop {
            let packet = match self.first_packet.take() {
                Some(p) => p,
                None => match self.format.next_packet() {
                    Ok(p) => p,
                    Err(SymphoniaError::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                        return false;
                    }
                    Err(SymphoniaError::IoError(e)) => {
                        tracing::warn!(codec = label, "read failed, ending track: {e}");
                        return false;
                    }
                    Err(SymphoniaError::ResetRequired) => {
                        tracing::warn!(codec = label, "stream layout changed, ending track");
                        return false;
                    }
                    Err(e) => {
                        if too_many_errors(&mut self.errors, label, &e) {
                            return false;
                        }
                        continue;
                    }
                },
            };
            if packet.track_id() != self.track_id {
                continue;
            }

            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    self.errors = 0;
                    if decoded.frames() == 0 {
                        continue;
                    }
                    if decoded.spec().channels.count() != usize::from(spec.channels) {
                        tracing::warn!(codec = label, "channel count changed mid-stream, packet dropped");
                        continue;
                    }
                    append_pcm(decoded, spec.format, self.eq.as_mut(), &mut self.pending);
                }
                Err(SymphoniaError::IoError(e)) => {
                    tracing::warn!(codec = label, "read failed, ending track: {e}");
                    return false;
                }
                Err(e) => {
                    if too_many_errors(&mut self.errors, label, &e) {
                        return false;
                    }
                    continue;
                }
            }

            if self.skip_frames > 0 {
                let available = ((self.pending.len() - self.pending_pos) / frame_bytes) as u64;
                let skipped = self.skip_frames.min(available);
                self.pending_pos += skipped as usize * frame_bytes;
                self.skip_frames -= skipped;
                if self.pending_pos == self.pending.len() {
                    self.pending.clear();
                    self.pending_pos = 0;
                }
            }
            if self.pending_pos < self.pending.len() {
                return true;
            }
        }
    }
}

impl Source for CodecSource {
    fn spec(&self) -> StreamSpec {
        self.spec
    }

    fn total_samples(&self) -> u64 {
        self.total_samples
    }

    fn is_valid(&self) -> bool {
        self.stream.is_some()
    }

    fn is_done(&self) -> bool {
        self.done
    }

    fn decode(&mut self, buf: &mut [u8]) -> usize {
        let cap = whole_frames_len(buf.len(), &self.spec);
        if cap == 0 {
            buf.fill(0);
            return 0;
        }
        let mut written = 0usize;

        if let Some(stream) = self.stream.as_mut().filter(|_| !self.done) {
            while written < cap {
                if stream.pending_pos < stream.pending.len() {
                    let n = (cap - written).min(stream.pending.len() - stream.pending_pos);
                    buf[written..written + n]
                        .copy_from_slice(&stream.pending[stream.pending_pos..stream.pending_pos + n]);
                    stream.pending_pos += n;
                    written += n;
                    continue;
                }
                if !stream.refill(&self.spec, self.label) {
                    break;
                }
            }
        }

        buf[written..].fill(0);
        if written == 0 {
            self.done = true;
        }
        self.cursor += (written / self.spec.frame_bytes()) as u64;
        written
    }

    fn seek(&mut self, sample: u64) -> bool {
        let Some(stream) = self.stream.as_mut() else {
            return false;
        };
        let rate = self.spec.sample_rate;
        let to = match stream.time_base {
            Some(tb) if !(tb.numer == 1 && tb.denom == rate) => SeekTo::Time {
                time: frames_to_time(sample, rate),
                track_id: Some(stream.track_id),
            },
            _ => SeekTo::TimeStamp {
                ts: sample,
                track_id: stream.track_id,
            },
        };

        match stream.format.seek(stream.seek.mode(), to) {
            Ok(seeked) => {
                stream.decoder.reset();
                if let Some(eq) = stream.eq.as_mut() {
                    eq.reset();
                }
                stream.pending.clear();
                stream.pending_pos = 0;
                stream.first_packet = None;
                stream.errors = 0;

                let actual = ts_to_frames(stream.time_base, seeked.actual_ts, rate);
                let required = ts_to_frames(stream.time_base, seeked.required_ts, rate);
                match stream.seek {
                    SeekPrecision::Accurate => {
                        stream.skip_frames = required.saturating_sub(actual);
                        self.cursor = required;
                    }
                    SeekPrecision::Coarse => {
                        stream.skip_frames = 0;
                        self.cursor = actual;
                    }
                }
                self.done = false;
                true
            }
            Err(e) => {
                tracing::warn!(codec = self.label, sample, "seek failed: {e}");
                false
            }
        }
    }

    fn tell(&self) -> u64 {
        self.cursor
    }
}
