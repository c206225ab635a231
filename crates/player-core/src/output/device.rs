//! CPAL output device: selection, stream config and the hardware voice.
//!
//! `cpal::Stream` cannot leave the thread that built it, so [`CpalVoice`] runs
//! a dedicated thread that owns the device and rebuilds the stream whenever a
//! new song changes the rate or channel layout.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender};

use crate::error::{EngineError, Result};
use crate::power::SharedPowerSignals;

use super::Renderer;
use super::voice::{Voice, VoiceSpec};

fn output_err(context: &str, err: impl std::fmt::Display) -> EngineError {
    EngineError::Output(format!("{context}: {err}"))
}

fn device_name(device: &cpal::Device) -> Option<String> {
    device.description().ok().map(|d| d.name().to_string())
}

/// Pick the first output device whose name contains `needle`
/// (case-insensitive), or the host default when `needle` is `None`.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device> {
    if let Some(needle) = needle {
        let mut devices = host
            .output_devices()
            .map_err(|e| output_err("enumerate output devices", e))?;
        return devices
            .find(|d| device_name(d).is_some_and(|n| matches_device_name(&n, needle)))
            .ok_or_else(|| EngineError::Output(format!("no output device matched: {needle}")));
    }

    host.default_output_device()
        .ok_or_else(|| EngineError::Output("no default output device".into()))
}

/// Names of the host's output devices, in enumeration order.
pub fn list_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();
    let devices = host
        .output_devices()
        .map_err(|e| output_err("enumerate output devices", e))?;
    Ok(devices
        .map(|d| device_name(&d).unwrap_or_else(|| "<unnamed>".to_string()))
        .collect())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Rank {
    channels_match: bool,
    /// Distance from the target rate in Hz.
    distance: u32,
    below: bool,
    format_rank: u8,
}

impl Rank {
    fn new(channels_match: bool, rate: u32, target_rate: u32, format_rank: u8) -> Self {
        Self {
            channels_match,
            distance: rate.abs_diff(target_rate),
            below: rate <= target_rate,
            format_rank,
        }
    }
}

/// Choose the output config closest to `target`.
///
/// Prefers a matching channel count, then the rate nearest the target (the
/// lower one on a tie), then the richest sample format. No resampling happens
/// downstream, so the rate choice is final.
pub fn pick_output_config(
    device: &cpal::Device,
    target: VoiceSpec,
) -> Result<cpal::SupportedStreamConfig> {
    let ranges = device
        .supported_output_configs()
        .map_err(|e| output_err("query output configs", e))?;

    let mut best: Option<(Rank, cpal::SupportedStreamConfig)> = None;
    for range in ranges {
        let rate = pick_rate_for_range(
            range.min_sample_rate(),
            range.max_sample_rate(),
            Some(target.sample_rate),
        );
        let rank = Rank::new(
            range.channels() == target.channels,
            rate,
            target.sample_rate,
            sample_format_rank(range.sample_format()),
        );
        let replace = match &best {
            None => true,
            Some((b, _)) => is_better_candidate(&rank, b),
        };
        if replace {
            best = Some((rank, range.with_sample_rate(rate)));
        }
    }

    best.map(|(_, cfg)| cfg)
        .ok_or_else(|| EngineError::Output("no supported output configs".into()))
}

/// Largest fixed buffer size the device allows, capped at 16k frames.
pub fn pick_buffer_size(config: &cpal::SupportedStreamConfig) -> Option<cpal::BufferSize> {
    match config.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => {
            const MAX_FRAMES: u32 = 16_384;
            let chosen = if *max > MAX_FRAMES {
                (*min).max(MAX_FRAMES)
            } else {
                *max
            };
            Some(cpal::BufferSize::Fixed(chosen))
        }
        cpal::SupportedBufferSize::Unknown => None,
    }
}

fn pick_rate_for_range(min: u32, max: u32, target_rate: Option<u32>) -> u32 {
    match target_rate {
        Some(target) => target.clamp(min, max.max(min)),
        None => max,
    }
}

fn sample_format_rank(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::F32 => 0,
        cpal::SampleFormat::I32 => 1,
        cpal::SampleFormat::I16 => 2,
        cpal::SampleFormat::U16 => 3,
        _ => 10,
    }
}

fn is_better_candidate(candidate: &Rank, best: &Rank) -> bool {
    if candidate.channels_match != best.channels_match {
        candidate.channels_match
    } else if candidate.distance != best.distance {
        candidate.distance < best.distance
    } else if candidate.below != best.below {
        candidate.below
    } else {
        candidate.format_rank < best.format_rank
    }
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }
    name.to_lowercase().contains(&needle.to_lowercase())
}

/// Build a CPAL output stream that pulls from `renderer`.
fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    renderer: Renderer,
    power: Arc<SharedPowerSignals>,
) -> Result<cpal::Stream> {
    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, renderer, power),
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, renderer, power),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, renderer, power),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, renderer, power),
        other => Err(EngineError::Output(format!(
            "unsupported device sample format: {other:?}"
        ))),
    }
}

/// A device that disappears mid-stream is reported like an unplugged headset.
fn on_stream_error(err: &cpal::StreamError, power: &SharedPowerSignals) {
    tracing::warn!("stream error: {err}");
    if matches!(err, cpal::StreamError::DeviceNotAvailable) {
        power.notify_headset_unplugged();
    }
}

/// The callback renders into an `f32` scratch buffer, then converts to the
/// device sample type. Underruns come back from the renderer as silence.
fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    renderer: Renderer,
    power: Arc<SharedPowerSignals>,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels_out = usize::from(config.channels);
    let mut scratch: Vec<f32> = Vec::new();
    let err_fn = move |err: cpal::StreamError| on_stream_error(&err, &power);

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _| {
                scratch.resize(data.len(), 0.0);
                renderer.render(&mut scratch, channels_out);
                for (dst, &src) in data.iter_mut().zip(scratch.iter()) {
                    *dst = <T as cpal::Sample>::from_sample::<f32>(src);
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| output_err("build output stream", e))
}

enum VoiceRequest {
    Configure {
        spec: VoiceSpec,
        reply: Sender<Result<VoiceSpec>>,
    },
    Shutdown,
}

/// Hardware voice backed by a CPAL output stream.
pub struct CpalVoice {
    tx: Sender<VoiceRequest>,
    worker: Option<JoinHandle<()>>,
    device: String,
}

impl CpalVoice {
    /// Open the device (substring match, or the default) on a voice thread.
    /// Losing the device mid-stream raises `power`'s unplug flag.
    pub fn spawn(
        renderer: Renderer,
        needle: Option<String>,
        power: Arc<SharedPowerSignals>,
    ) -> Result<Self> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
        let worker = thread::Builder::new()
            .name("cpal-voice".to_string())
            .spawn(move || voice_main(renderer, needle, power, rx, ready_tx))
            .map_err(|e| output_err("spawn voice thread", e))?;

        match ready_rx.recv() {
            Ok(Ok(device)) => {
                tracing::info!(device = %device, "output device opened");
                Ok(Self {
                    tx,
                    worker: Some(worker),
                    device,
                })
            }
            Ok(Err(e)) => {
                let _ = worker.join();
                Err(e)
            }
            Err(_) => {
                let _ = worker.join();
                Err(EngineError::Output("voice thread exited during startup".into()))
            }
        }
    }

    pub fn device_name(&self) -> &str {
        &self.device
    }
}

impl Voice for CpalVoice {
    fn configure(&mut self, spec: VoiceSpec) -> Result<VoiceSpec> {
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        self.tx
            .send(VoiceRequest::Configure {
                spec,
                reply: reply_tx,
            })
            .map_err(|_| EngineError::Output("voice thread stopped".into()))?;
        reply_rx
            .recv()
            .map_err(|_| EngineError::Output("voice thread stopped".into()))?
    }
}

impl Drop for CpalVoice {
    fn drop(&mut self) {
        let _ = self.tx.send(VoiceRequest::Shutdown);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::warn!("voice thread panicked");
            }
        }
    }
}

fn voice_main(
    renderer: Renderer,
    needle: Option<String>,
    power: Arc<SharedPowerSignals>,
    rx: Receiver<VoiceRequest>,
    ready: Sender<Result<String>>,
) {
    let host = cpal::default_host();
    let device = match pick_device(&host, needle.as_deref()) {
        Ok(device) => device,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    let name = device_name(&device).unwrap_or_else(|| "<unnamed>".to_string());
    if ready.send(Ok(name)).is_err() {
        return;
    }

    let mut stream: Option<cpal::Stream> = None;
    for request in rx.iter() {
        match request {
            VoiceRequest::Configure { spec, reply } => {
                drop(stream.take());
                let result = open_stream(&device, &renderer, &power, spec).map(|(s, actual)| {
                    stream = Some(s);
                    actual
                });
                let _ = reply.send(result);
            }
            VoiceRequest::Shutdown => break,
        }
    }
}

fn open_stream(
    device: &cpal::Device,
    renderer: &Renderer,
    power: &Arc<SharedPowerSignals>,
    spec: VoiceSpec,
) -> Result<(cpal::Stream, VoiceSpec)> {
    let supported = pick_output_config(device, spec)?;
    let sample_format = supported.sample_format();
    let mut config: cpal::StreamConfig = supported.clone().into();
    if let Some(buffer_size) = pick_buffer_size(&supported) {
        config.buffer_size = buffer_size;
    }

    let stream = build_output_stream(
        device,
        &config,
        sample_format,
        renderer.clone(),
        power.clone(),
    )?;
    stream.play().map_err(|e| output_err("start output stream", e))?;

    let actual = VoiceSpec {
        sample_rate: config.sample_rate,
        channels: config.channels,
    };
    tracing::info!(
        rate = actual.sample_rate,
        channels = actual.channels,
        format = ?sample_format,
        "output stream started"
    );
    Ok((stream, actual))
}
