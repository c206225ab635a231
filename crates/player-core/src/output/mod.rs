//! Audio Output Manager.
//!
//! Owns the PCM buffer ring and playback state shared by the playback thread
//! (producer: `add_buffer`), the command thread (transport and volume) and the
//! device callback (consumer: [`Renderer::render`]).
//!
//! ## Design
//! - One mutex guards everything; the device callback holds it only for the copy.
//! - Slots are pre-allocated and reused; a queued slot is never refilled and
//!   only the render side clears the queued flag.
//! - Every slot is tagged with the song epoch current when it was queued, so
//!   `samples_played` only counts frames of the current song while the tail
//!   of the previous one drains during a gapless handoff.

pub mod device;
pub mod voice;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::source::{SampleFormat, StreamSpec};

pub use voice::{NullVoice, Voice, VoiceSpec};

/// Transport status of the output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputStatus {
    Playing,
    Paused,
    Stopped,
}

impl OutputStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputStatus::Playing => "playing",
            OutputStatus::Paused => "paused",
            OutputStatus::Stopped => "stopped",
        }
    }
}

struct Slot {
    samples: Vec<f32>,
    pos: usize,
    channels: usize,
    epoch: u64,
    queued: bool,
}

struct OutputState {
    status: OutputStatus,
    volume: f32,
    samples_played: u64,
    spec: StreamSpec,
    configured: Option<VoiceSpec>,
    epoch: u64,
    slots: Vec<Slot>,
    fill: usize,
    play: usize,
    underruns: u64,
}

impl OutputState {
    fn discard_queued(&mut self) {
        for slot in &mut self.slots {
            slot.queued = false;
            slot.pos = 0;
        }
        self.fill = 0;
        self.play = 0;
    }
}

pub struct AudioOutput {
    state: Mutex<OutputState>,
    voice: Mutex<Option<Box<dyn Voice>>>,
}

impl AudioOutput {
    /// `ring_buffers` slots (at least 2) of `buffer_frames` frames each.
    pub fn new(ring_buffers: usize, buffer_frames: usize) -> Self {
        let slots = (0..ring_buffers.max(2))
            .map(|_| Slot {
                samples: Vec::with_capacity(buffer_frames * 2),
                pos: 0,
                channels: 2,
                epoch: 0,
                queued: false,
            })
            .collect();
        Self {
            state: Mutex::new(OutputState {
                status: OutputStatus::Stopped,
                volume: 100.0,
                samples_played: 0,
                spec: StreamSpec::default(),
                configured: None,
                epoch: 0,
                slots,
                fill: 0,
                play: 0,
                underruns: 0,
            }),
            voice: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, OutputState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Install the device-facing consumer; it is configured on the next `new_song`.
    pub fn attach_voice(&self, voice: Box<dyn Voice>) {
        *self.voice.lock().unwrap_or_else(PoisonError::into_inner) = Some(voice);
        self.lock().configured = None;
    }

    /// Drop the attached voice, stopping its device stream.
    pub fn detach_voice(&self) {
        let voice = self.voice.lock().unwrap_or_else(PoisonError::into_inner).take();
        drop(voice);
        self.lock().configured = None;
    }

    /// Handle for the device callback.
    pub fn renderer(self: &Arc<Self>) -> Renderer {
        Renderer {
            output: self.clone(),
        }
    }

    /// Announce the stream that the following `add_buffer` calls carry.
    pub fn new_song(&self, sample_rate: u32, channels: u16, format: SampleFormat) {
        let spec = StreamSpec {
            sample_rate,
            channels,
            format,
        };
        let wanted = VoiceSpec {
            sample_rate,
            channels,
        };
        let reconfigure = {
            let mut st = self.lock();
            st.samples_played = 0;
            st.epoch += 1;
            st.spec = spec;
            st.configured != Some(wanted)
        };
        tracing::debug!(rate = sample_rate, channels, format = format.label(), "new song");
        if !reconfigure {
            return;
        }

        let mut voice = self.voice.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(voice) = voice.as_mut() else {
            return;
        };
        match voice.configure(wanted) {
            Ok(actual) => {
                if actual.sample_rate != sample_rate {
                    tracing::warn!(
                        stream_rate = sample_rate,
                        device_rate = actual.sample_rate,
                        "device does not support the stream rate; playing at the nearest rate"
                    );
                }
                self.lock().configured = Some(wanted);
            }
            Err(e) => tracing::warn!("output reconfigure failed: {e}"),
        }
    }

    /// True when the slot at the fill index can take a buffer.
    pub fn buffer_available(&self) -> bool {
        let st = self.lock();
        !st.slots[st.fill].queued
    }

    /// Queue PCM in the current song's format. Returns `false` (data dropped)
    /// when no slot is free or `pcm` holds no whole frame.
    pub fn add_buffer(&self, pcm: &[u8]) -> bool {
        let mut guard = self.lock();
        let st = &mut *guard;
        let idx = st.fill;
        if st.slots[idx].queued {
            return false;
        }
        let spec = st.spec;
        let frame_bytes = spec.frame_bytes();
        let usable = pcm.len() / frame_bytes * frame_bytes;
        if usable == 0 {
            return false;
        }

        let slot = &mut st.slots[idx];
        slot.samples.clear();
        decode_into(&pcm[..usable], spec.format, &mut slot.samples);
        slot.pos = 0;
        slot.channels = usize::from(spec.channels.max(1));
        slot.epoch = st.epoch;
        slot.queued = true;
        st.fill = (idx + 1) % st.slots.len();
        true
    }

    /// Paused → Playing, or Stopped → Playing once data is queued.
    pub fn resume(&self) {
        let mut st = self.lock();
        let queued = st.slots.iter().any(|s| s.queued);
        match st.status {
            OutputStatus::Paused => st.status = OutputStatus::Playing,
            OutputStatus::Stopped if queued => st.status = OutputStatus::Playing,
            _ => {}
        }
    }

    pub fn pause(&self) {
        let mut st = self.lock();
        if st.status == OutputStatus::Playing {
            st.status = OutputStatus::Paused;
        }
    }

    /// Discard queued audio and stop.
    pub fn stop(&self) {
        let mut st = self.lock();
        st.discard_queued();
        st.status = OutputStatus::Stopped;
    }

    /// Discard queued audio but keep the status (used by seek).
    pub fn flush(&self) {
        self.lock().discard_queued();
    }

    pub fn volume(&self) -> f32 {
        self.lock().volume
    }

    /// Set the volume (clamped to 0..=100; NaN is ignored) and return the applied value.
    pub fn set_volume(&self, volume: f32) -> f32 {
        let mut st = self.lock();
        if !volume.is_nan() {
            st.volume = volume.clamp(0.0, 100.0);
        }
        st.volume
    }

    pub fn samples_played(&self) -> u64 {
        self.lock().samples_played
    }

    pub fn set_samples_played(&self, frames: u64) {
        self.lock().samples_played = frames;
    }

    pub fn status(&self) -> OutputStatus {
        self.lock().status
    }

    pub fn queued_buffers(&self) -> usize {
        self.lock().slots.iter().filter(|s| s.queued).count()
    }

    pub fn ring_len(&self) -> usize {
        self.lock().slots.len()
    }

    pub fn stream_spec(&self) -> StreamSpec {
        self.lock().spec
    }

    /// Render callbacks that ran out of queued audio while playing.
    pub fn underruns(&self) -> u64 {
        self.lock().underruns
    }
}

/// Convert native-endian PCM bytes to normalized `f32`.
fn decode_into(pcm: &[u8], format: SampleFormat, out: &mut Vec<f32>) {
    match format {
        SampleFormat::I16 => out.extend(
            pcm.chunks_exact(2)
                .map(|b| f32::from(i16::from_ne_bytes([b[0], b[1]])) / 32_768.0),
        ),
        SampleFormat::I32 => out.extend(
            pcm.chunks_exact(4)
                .map(|b| i32::from_ne_bytes([b[0], b[1], b[2], b[3]]) as f32 / 2_147_483_648.0),
        ),
        SampleFormat::F32 => out.extend(
            pcm.chunks_exact(4)
                .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]])),
        ),
    }
}

/// Read side of the ring, driven by the device callback.
#[derive(Clone)]
pub struct Renderer {
    output: Arc<AudioOutput>,
}

impl Renderer {
    /// Fill `out` (interleaved, `out_channels` wide) from queued audio.
    ///
    /// Outputs silence without consuming anything unless Playing. Returns the
    /// number of frames taken from the ring; the rest of `out` is silence.
    pub fn render(&self, out: &mut [f32], out_channels: usize) -> usize {
        let out_channels = out_channels.max(1);
        let frames_out = out.len() / out_channels;
        let mut guard = self.output.lock();
        let st = &mut *guard;

        if st.status != OutputStatus::Playing {
            out.fill(0.0);
            return 0;
        }

        let gain = st.volume / 100.0;
        let epoch = st.epoch;
        let ring = st.slots.len();
        let mut frame = 0usize;
        while frame < frames_out {
            let slot = &mut st.slots[st.play];
            if !slot.queued {
                st.underruns += 1;
                break;
            }
            let src_channels = slot.channels;
            let available = (slot.samples.len() - slot.pos) / src_channels;
            let n = available.min(frames_out - frame);
            for i in 0..n {
                let src = &slot.samples[slot.pos + i * src_channels..][..src_channels];
                let dst = &mut out[(frame + i) * out_channels..][..out_channels];
                for (ch, sample) in dst.iter_mut().enumerate() {
                    *sample = map_channel(src, out_channels, ch) * gain;
                }
            }
            slot.pos += n * src_channels;
            frame += n;
            if slot.epoch == epoch {
                st.samples_played += n as u64;
            }
            if slot.pos + src_channels > slot.samples.len() {
                slot.queued = false;
                slot.pos = 0;
                st.play = (st.play + 1) % ring;
            }
        }
        out[frame * out_channels..].fill(0.0);
        frame
    }
}

/// Pick the output sample for `dst_ch` from one source frame.
///
/// mono → stereo duplicates, stereo → mono averages, equal layouts pass
/// through, anything else clamps to the last available source channel.
fn map_channel(src: &[f32], dst_channels: usize, dst_ch: usize) -> f32 {
    match (src.len(), dst_channels) {
        (1, _) => src[0],
        (2, 1) => 0.5 * (src[0] + src[1]),
        (n, _) => src[dst_ch.min(n - 1)],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm_i16(frames: usize, channels: usize, value: i16) -> Vec<u8> {
        std::iter::repeat_n(value.to_ne_bytes(), frames * channels)
            .flatten()
            .collect()
    }

    fn playing_output(ring: usize) -> Arc<AudioOutput> {
        let out = Arc::new(AudioOutput::new(ring, 64));
        out.new_song(44_100, 2, SampleFormat::I16);
        out
    }

    #[test]
    fn ring_fills_then_refuses() {
        let out = playing_output(3);
        for _ in 0..3 {
            assert!(out.buffer_available());
            assert!(out.add_buffer(&pcm_i16(16, 2, 100)));
        }
        assert!(!out.buffer_available());
        assert!(!out.add_buffer(&pcm_i16(16, 2, 100)));
        assert_eq!(out.queued_buffers(), 3);
    }

    #[test]
    fn partial_frames_are_not_queued() {
        let out = playing_output(2);
        assert!(!out.add_buffer(&[1, 2, 3]));
        assert_eq!(out.queued_buffers(), 0);
    }

    #[test]
    fn transport_transitions() {
        let out = playing_output(2);
        out.resume();
        assert_eq!(out.status(), OutputStatus::Stopped, "nothing queued yet");

        out.add_buffer(&pcm_i16(8, 2, 0));
        out.resume();
        assert_eq!(out.status(), OutputStatus::Playing);
        out.resume();
        assert_eq!(out.status(), OutputStatus::Playing);

        out.pause();
        out.pause();
        assert_eq!(out.status(), OutputStatus::Paused);
        out.resume();
        assert_eq!(out.status(), OutputStatus::Playing);

        out.stop();
        assert_eq!(out.status(), OutputStatus::Stopped);
        assert_eq!(out.queued_buffers(), 0);
        out.pause();
        assert_eq!(out.status(), OutputStatus::Stopped);
    }

    #[test]
    fn render_outputs_silence_unless_playing() {
        let out = playing_output(2);
        out.add_buffer(&pcm_i16(8, 2, 16_384));
        let renderer = out.renderer();
        let mut buf = vec![1.0f32; 16];
        assert_eq!(renderer.render(&mut buf, 2), 0);
        assert!(buf.iter().all(|&s| s == 0.0));
        assert_eq!(out.queued_buffers(), 1);

        out.resume();
        out.pause();
        assert_eq!(renderer.render(&mut buf, 2), 0);
        assert_eq!(out.samples_played(), 0);
    }

    #[test]
    fn render_consumes_in_order_and_counts_frames() {
        let out = playing_output(3);
        out.add_buffer(&pcm_i16(4, 2, 8_192));
        out.add_buffer(&pcm_i16(4, 2, -8_192));
        out.resume();

        let renderer = out.renderer();
        let mut buf = vec![0.0f32; 12];
        assert_eq!(renderer.render(&mut buf, 2), 6);
        assert_eq!(buf[0], 0.25);
        assert_eq!(buf[7], 0.25);
        assert_eq!(buf[8], -0.25);
        assert_eq!(out.samples_played(), 6);
        assert_eq!(out.queued_buffers(), 1);

        assert_eq!(renderer.render(&mut buf, 2), 2);
        assert_eq!(buf[4], 0.0, "underrun padded with silence");
        assert_eq!(out.samples_played(), 8);
        assert_eq!(out.queued_buffers(), 0);
        assert!(out.underruns() >= 1);
    }

    #[test]
    fn volume_scales_and_clamps() {
        let out = playing_output(2);
        assert_eq!(out.set_volume(42.0), 42.0);
        assert_eq!(out.set_volume(250.0), 100.0);
        assert_eq!(out.set_volume(-3.0), 0.0);
        assert_eq!(out.set_volume(f32::NAN), 0.0);
        out.set_volume(50.0);

        out.add_buffer(&pcm_i16(2, 2, 16_384));
        out.resume();
        let mut buf = vec![0.0f32; 4];
        out.renderer().render(&mut buf, 2);
        assert_eq!(buf, vec![0.25; 4]);
    }

    #[test]
    fn channel_mapping_between_mono_and_stereo() {
        let out = Arc::new(AudioOutput::new(2, 16));
        out.new_song(8000, 1, SampleFormat::I16);
        out.add_buffer(&pcm_i16(2, 1, 16_384));
        out.resume();
        let mut stereo = vec![0.0f32; 4];
        out.renderer().render(&mut stereo, 2);
        assert_eq!(stereo, vec![0.5; 4]);

        out.stop();
        out.new_song(8000, 2, SampleFormat::F32);
        let frame: Vec<u8> = [0.2f32, 0.6f32].iter().flat_map(|v| v.to_ne_bytes()).collect();
        out.add_buffer(&frame);
        out.resume();
        let mut mono = vec![0.0f32; 1];
        out.renderer().render(&mut mono, 1);
        assert!((mono[0] - 0.4).abs() < 1e-6);
    }

    #[test]
    fn gapless_handoff_counts_only_the_new_song() {
        let out = playing_output(3);
        out.add_buffer(&pcm_i16(4, 2, 1));
        out.resume();
        out.new_song(44_100, 2, SampleFormat::I16);
        out.add_buffer(&pcm_i16(4, 2, 2));

        let mut buf = vec![0.0f32; 16];
        assert_eq!(out.renderer().render(&mut buf, 2), 8);
        assert_eq!(out.samples_played(), 4);
        assert_eq!(out.status(), OutputStatus::Playing);
    }

    #[test]
    fn flush_keeps_status_and_set_samples_played_overrides() {
        let out = playing_output(2);
        out.add_buffer(&pcm_i16(4, 2, 1));
        out.resume();
        out.flush();
        assert_eq!(out.status(), OutputStatus::Playing);
        assert_eq!(out.queued_buffers(), 0);
        assert!(out.buffer_available());
        out.set_samples_played(1234);
        assert_eq!(out.samples_played(), 1234);
    }

    #[test]
    fn wide_samples_are_normalized() {
        let out = Arc::new(AudioOutput::new(2, 16));
        out.new_song(96_000, 1, SampleFormat::I32);
        out.add_buffer(&(i32::MIN / 2).to_ne_bytes());
        out.resume();
        let mut buf = [0.0f32; 1];
        out.renderer().render(&mut buf, 1);
        assert_eq!(buf[0], -0.5);
    }

    #[test]
    fn map_channel_rules() {
        assert_eq!(map_channel(&[0.3], 2, 1), 0.3);
        assert_eq!(map_channel(&[0.2, 0.4], 2, 1), 0.4);
        assert_eq!(map_channel(&[0.1, 0.2, 0.3, 0.4, 0.5, 0.6], 2, 1), 0.2);
        assert_eq!(map_channel(&[0.1, 0.2], 4, 3), 0.2);
    }
}
