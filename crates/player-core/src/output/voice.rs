//! Device-facing consumers of the output ring.

use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::error::{EngineError, Result};

use super::Renderer;

/// Rate and channel layout a voice is asked to run at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VoiceSpec {
    pub sample_rate: u32,
    pub channels: u16,
}

/// Something that pulls audio out of a [`Renderer`] in real time.
///
/// Dropping a voice stops it and joins any thread it owns.
pub trait Voice: Send {
    /// (Re)open the stream for `spec`; returns what is actually running.
    fn configure(&mut self, spec: VoiceSpec) -> Result<VoiceSpec>;
}

enum NullRequest {
    Configure(VoiceSpec),
    Shutdown,
}

/// Paces the ring at real time and discards the audio. Used for headless runs.
pub struct NullVoice {
    tx: Sender<NullRequest>,
    worker: Option<JoinHandle<()>>,
}

const NULL_PERIOD: Duration = Duration::from_millis(10);

impl NullVoice {
    pub fn spawn(renderer: Renderer) -> Result<Self> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let worker = thread::Builder::new()
            .name("null-voice".to_string())
            .spawn(move || null_voice_main(renderer, rx))
            .map_err(|e| EngineError::Output(format!("spawn null voice: {e}")))?;
        Ok(Self {
            tx,
            worker: Some(worker),
        })
    }
}

impl Voice for NullVoice {
    fn configure(&mut self, spec: VoiceSpec) -> Result<VoiceSpec> {
        self.tx
            .send(NullRequest::Configure(spec))
            .map_err(|_| EngineError::Output("null voice stopped".into()))?;
        Ok(spec)
    }
}

impl Drop for NullVoice {
    fn drop(&mut self) {
        let _ = self.tx.send(NullRequest::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn null_voice_main(renderer: Renderer, rx: Receiver<NullRequest>) {
    let mut spec: Option<VoiceSpec> = None;
    let mut scratch: Vec<f32> = Vec::new();
    let mut last = Instant::now();
    let mut owed = 0f64;

    loop {
        match rx.recv_timeout(NULL_PERIOD) {
            Ok(NullRequest::Configure(s)) => {
                spec = Some(s);
                last = Instant::now();
                owed = 0.0;
            }
            Ok(NullRequest::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        let Some(spec) = spec else {
            continue;
        };
        let now = Instant::now();
        owed += now.duration_since(last).as_secs_f64() * f64::from(spec.sample_rate);
        last = now;
        let frames = owed.floor() as usize;
        if frames == 0 {
            continue;
        }
        owed -= frames as f64;
        let channels = usize::from(spec.channels.max(1));
        scratch.resize(frames * channels, 0.0);
        renderer.render(&mut scratch, channels);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{AudioOutput, OutputStatus};
    use crate::source::SampleFormat;
    use std::sync::Arc;

    #[test]
    fn null_voice_drains_the_ring_in_real_time() {
        let out = Arc::new(AudioOutput::new(3, 256));
        let voice = NullVoice::spawn(out.renderer()).unwrap();
        out.attach_voice(Box::new(voice));
        out.new_song(8000, 1, SampleFormat::I16);

        // 3 x 400 frames = 150 ms at 8 kHz.
        for _ in 0..3 {
            assert!(out.add_buffer(&[0u8; 800]));
        }
        out.resume();
        assert_eq!(out.status(), OutputStatus::Playing);

        let deadline = Instant::now() + Duration::from_secs(5);
        while out.queued_buffers() > 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(out.queued_buffers(), 0);
        assert_eq!(out.samples_played(), 1200);
        out.detach_voice();
    }

    #[test]
    fn null_voice_accepts_any_spec() {
        let out = Arc::new(AudioOutput::new(2, 16));
        let mut voice = NullVoice::spawn(out.renderer()).unwrap();
        let spec = VoiceSpec {
            sample_rate: 11_025,
            channels: 6,
        };
        assert_eq!(voice.configure(spec).unwrap(), spec);
    }
}
