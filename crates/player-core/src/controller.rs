//! Playback Controller.
//!
//! Owns the queue session and the now-playing [`Source`], and keeps the
//! [`AudioOutput`] ring fed from the playback thread. Commands arrive over a
//! crossbeam channel; each one is applied before its reply is sent.
//!
//! Per song: Idle → Loading → Decoding → Draining → (next song | Idle).
//! A following song with the same stream spec starts feeding while the tail of
//! the previous one is still queued; a different spec waits for the ring to
//! drain so the device can be reconfigured.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::config::PlaybackConfig;
use crate::error::{EngineError, Result};
use crate::factory::SourceFactory;
use crate::library::SongLibrary;
use crate::output::AudioOutput;
use crate::power::PowerSignals;
use crate::session::{Advance, Removal, RepeatMode, Session, SongId};
use crate::source::{Source, frames_to_ms, ms_to_frames};
use crate::status::StatusSnapshot;

const SLOW_REPLY: Duration = Duration::from_secs(5);

/// Commands accepted by the playback thread.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerCommand {
    /// Start the entry at `index`, or continue/start the current one.
    Play { index: Option<usize> },
    Resume,
    Pause,
    Next,
    Previous,
    Seek { ms: u64 },
    AddToQueue { song: SongId },
    RemoveFromQueue { index: usize },
    GetQueue,
    SetQueue { songs: Vec<SongId> },
    SetShuffle(bool),
    SetRepeat(RepeatMode),
    GetCurrentSong,
    GetStatus,
    Reset,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlayerReply {
    Ok,
    Rejected,
    Queue(Vec<SongId>),
    Current(Option<(usize, SongId)>),
    Status(StatusSnapshot),
}

struct Envelope {
    command: PlayerCommand,
    reply: Option<Sender<PlayerReply>>,
}

/// Handle for sending commands to the playback thread.
#[derive(Clone)]
pub struct PlayerHandle {
    cmd_tx: Sender<Envelope>,
    output: Arc<AudioOutput>,
}

impl PlayerHandle {
    /// Send `command` and wait until it has taken effect. Fails only once the
    /// playback thread is gone.
    pub fn request(&self, command: PlayerCommand) -> Result<PlayerReply> {
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        self.cmd_tx
            .send(Envelope {
                command,
                reply: Some(reply_tx),
            })
            .map_err(|_| EngineError::PlayerUnavailable)?;
        await_reply(&reply_rx, SLOW_REPLY)
    }

    /// Fire-and-forget variant of [`PlayerHandle::request`].
    pub fn send(&self, command: PlayerCommand) -> Result<()> {
        self.cmd_tx
            .send(Envelope {
                command,
                reply: None,
            })
            .map_err(|_| EngineError::PlayerUnavailable)
    }

    /// Output manager shared with the playback thread (volume goes straight here).
    pub fn output(&self) -> &Arc<AudioOutput> {
        &self.output
    }
}

/// Block for a reply, logging every `warn_after` that passes without one.
/// The sender is dropped with the playback thread, which ends the wait.
fn await_reply(reply_rx: &Receiver<PlayerReply>, warn_after: Duration) -> Result<PlayerReply> {
    loop {
        match reply_rx.recv_timeout(warn_after) {
            Ok(reply) => return Ok(reply),
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(waited = ?warn_after, "playback thread slow to answer, still waiting")
            }
            Err(RecvTimeoutError::Disconnected) => return Err(EngineError::PlayerUnavailable),
        }
    }
}

struct Track {
    source: Box<dyn Source>,
    song: SongId,
    produced: u64,
}

enum PlayState {
    Idle,
    Decoding(Track),
    /// Waiting for queued audio to play out before `next` (if any) starts.
    Draining { next: Option<Track> },
}

pub struct PlaybackController {
    config: PlaybackConfig,
    output: Arc<AudioOutput>,
    factory: SourceFactory,
    library: Arc<dyn SongLibrary>,
    power: Arc<dyn PowerSignals>,
    session: Session,
    state: PlayState,
    resume_pending: bool,
    duration_ms: u64,
    /// Consecutive songs that finished without producing audio.
    empty_run: usize,
    scratch: Vec<u8>,
}

impl PlaybackController {
    pub fn new(
        config: PlaybackConfig,
        output: Arc<AudioOutput>,
        library: Arc<dyn SongLibrary>,
        power: Arc<dyn PowerSignals>,
    ) -> Self {
        Self {
            factory: SourceFactory::new(config.clone()),
            config,
            output,
            library,
            power,
            session: Session::new(),
            state: PlayState::Idle,
            resume_pending: false,
            duration_ms: 0,
            empty_run: 0,
            scratch: Vec::new(),
        }
    }

    /// Replace the queue session (for a seeded shuffle order).
    pub fn with_session(mut self, session: Session) -> Self {
        self.session = session;
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.state, PlayState::Idle)
    }

    /// One loop iteration without commands: power signals, then buffer pumping.
    pub fn tick(&mut self) {
        self.poll_power();
        self.pump();
    }

    fn poll_power(&mut self) {
        let events = self.power.poll();
        if events.sleep_pending {
            tracing::info!("sleep pending, pausing");
            self.pause();
        }
        if events.headset_unplugged && self.config.pause_on_headset_unplug {
            tracing::info!("headset unplugged, pausing");
            self.pause();
        }
    }

    fn pause(&mut self) {
        self.resume_pending = false;
        self.output.pause();
    }

    /// Feed the ring while slots are free; move between songs as they finish.
    fn pump(&mut self) {
        loop {
            match std::mem::replace(&mut self.state, PlayState::Idle) {
                PlayState::Idle => return,
                PlayState::Draining { next } => {
                    if self.output.queued_buffers() > 0 {
                        self.state = PlayState::Draining { next };
                        return;
                    }
                    match next {
                        Some(track) => self.begin(track),
                        None => {
                            tracing::info!("queue finished");
                            self.output.stop();
                            self.duration_ms = 0;
                            return;
                        }
                    }
                }
                PlayState::Decoding(mut track) => {
                    if !self.output.buffer_available() {
                        self.state = PlayState::Decoding(track);
                        return;
                    }
                    let n = track.source.decode(&mut self.scratch);
                    if n > 0 {
                        track.produced += n as u64;
                        self.output.add_buffer(&self.scratch[..n]);
                        if self.resume_pending {
                            self.resume_pending = false;
                            self.output.resume();
                        }
                        self.state = PlayState::Decoding(track);
                        continue;
                    }
                    self.finish(track);
                }
            }
        }
    }

    /// The now-playing source returned 0: pick what follows per queue policy.
    fn finish(&mut self, track: Track) {
        tracing::debug!(song = track.song, "song finished");
        if track.produced == 0 {
            self.empty_run += 1;
        } else {
            self.empty_run = 0;
        }
        let spec = track.source.spec();
        drop(track);

        if self.empty_run > self.session.len() {
            tracing::warn!("no song in the queue produced audio, stopping");
            self.empty_run = 0;
            self.session.clear_current();
            self.state = PlayState::Draining { next: None };
            return;
        }

        let next = self
            .session
            .advance(Advance::Completed)
            .and_then(|index| self.load_from(index));
        match next {
            Some(track) if track.source.spec() == spec => self.begin(track),
            other => self.state = PlayState::Draining { next: other },
        }
    }

    /// Announce `track` to the output and start feeding it.
    fn begin(&mut self, track: Track) {
        let spec = track.source.spec();
        self.output
            .new_song(spec.sample_rate, spec.channels, spec.format);
        self.scratch
            .resize(self.config.buffer_frames.max(1) * spec.frame_bytes(), 0);
        self.duration_ms = track.source.duration_ms();
        self.state = PlayState::Decoding(track);
    }

    /// Open the song at `index`, skipping entries that cannot be played.
    /// Gives up after one pass over the queue.
    fn load_from(&mut self, mut index: usize) -> Option<Track> {
        for _ in 0..self.session.len() {
            let song = self.session.song_at(index)?;
            if let Some(track) = self.open_track(index, song) {
                return Some(track);
            }
            index = self.session.advance(Advance::Manual)?;
        }
        tracing::warn!("no playable song in the queue");
        self.session.clear_current();
        None
    }

    fn open_track(&self, index: usize, song: SongId) -> Option<Track> {
        let Some(path) = self.library.path(song) else {
            tracing::warn!(song, "song not in library, skipping");
            return None;
        };
        let Some(source) = self.factory.open(&path) else {
            tracing::warn!(song, path = ?path, "unsupported format, skipping");
            return None;
        };
        if !source.is_valid() {
            tracing::warn!(song, path = ?path, "unplayable file, skipping");
            return None;
        }
        tracing::info!(
            song,
            index,
            path = ?path,
            duration_ms = source.duration_ms(),
            "now playing"
        );
        Some(Track {
            source,
            song,
            produced: 0,
        })
    }

    /// Drop whatever is loaded and silence the output.
    fn halt(&mut self) {
        self.state = PlayState::Idle;
        self.resume_pending = false;
        self.duration_ms = 0;
        self.output.stop();
    }

    /// Start the queue entry at `index` from the top, playing immediately.
    fn start_at(&mut self, index: usize) -> PlayerReply {
        self.halt();
        self.empty_run = 0;
        match self.load_from(index) {
            Some(track) => {
                self.begin(track);
                self.resume_pending = true;
                PlayerReply::Ok
            }
            None => PlayerReply::Rejected,
        }
    }

    fn seek(&mut self, ms: u64) -> PlayerReply {
        let PlayState::Decoding(track) = &mut self.state else {
            return PlayerReply::Rejected;
        };
        let frame = ms_to_frames(ms, track.source.sample_rate());
        if !track.source.seek(frame) {
            return PlayerReply::Rejected;
        }
        self.output.flush();
        self.output.set_samples_played(track.source.tell());
        tracing::debug!(ms, frame, "seeked");
        PlayerReply::Ok
    }

    fn snapshot(&self) -> StatusSnapshot {
        let spec = self.output.stream_spec();
        StatusSnapshot {
            status: self.output.status(),
            elapsed_ms: frames_to_ms(self.output.samples_played(), spec.sample_rate),
            duration_ms: self.duration_ms,
            volume: self.output.volume(),
            current: self.session.current(),
            shuffle: self.session.shuffle(),
            repeat: self.session.repeat(),
            underruns: self.output.underruns(),
        }
    }

    /// Apply one command and return its reply.
    pub fn handle(&mut self, command: PlayerCommand) -> PlayerReply {
        tracing::debug!(?command, "command");
        match command {
            PlayerCommand::Play { index: Some(index) } => {
                if index >= self.session.len() {
                    return PlayerReply::Rejected;
                }
                self.session.jump(index);
                self.start_at(index)
            }
            PlayerCommand::Play { index: None } => {
                if !self.is_idle() {
                    self.output.resume();
                    return PlayerReply::Ok;
                }
                let start = match self.session.current_index() {
                    Some(index) => Some(index),
                    None => self.session.start(),
                };
                match start {
                    Some(index) => self.start_at(index),
                    None => PlayerReply::Rejected,
                }
            }
            PlayerCommand::Resume => {
                self.output.resume();
                PlayerReply::Ok
            }
            PlayerCommand::Pause => {
                self.pause();
                PlayerReply::Ok
            }
            PlayerCommand::Next => match self.session.advance(Advance::Manual) {
                Some(index) => self.start_at(index),
                None => {
                    self.halt();
                    PlayerReply::Ok
                }
            },
            PlayerCommand::Previous => match self.session.previous() {
                Some(index) => self.start_at(index),
                None => PlayerReply::Rejected,
            },
            PlayerCommand::Seek { ms } => self.seek(ms),
            PlayerCommand::AddToQueue { song } => {
                self.session.add(song);
                PlayerReply::Ok
            }
            PlayerCommand::RemoveFromQueue { index } => {
                let was_playing = !self.is_idle();
                match self.session.remove(index) {
                    Removal::OutOfRange => PlayerReply::Rejected,
                    Removal::Removed => PlayerReply::Ok,
                    Removal::RemovedCurrent => {
                        self.halt();
                        if was_playing && index < self.session.len() {
                            self.session.jump(index);
                            self.start_at(index);
                        }
                        PlayerReply::Ok
                    }
                }
            }
            PlayerCommand::GetQueue => PlayerReply::Queue(self.session.queue().to_vec()),
            PlayerCommand::SetQueue { songs } => {
                self.halt();
                self.session.set_queue(songs);
                PlayerReply::Ok
            }
            PlayerCommand::SetShuffle(on) => {
                self.session.set_shuffle(on);
                PlayerReply::Ok
            }
            PlayerCommand::SetRepeat(mode) => {
                self.session.set_repeat(mode);
                PlayerReply::Ok
            }
            PlayerCommand::GetCurrentSong => PlayerReply::Current(self.session.current()),
            PlayerCommand::GetStatus => PlayerReply::Status(self.snapshot()),
            PlayerCommand::Reset => {
                self.halt();
                self.session.reset();
                PlayerReply::Ok
            }
        }
    }

    fn dispatch(&mut self, envelope: Envelope) {
        let reply = self.handle(envelope.command);
        if let Some(tx) = envelope.reply {
            let _ = tx.send(reply);
        }
    }

    /// Playback loop: runs until `shutdown` is set or every handle is dropped.
    fn run(mut self, cmd_rx: Receiver<Envelope>, shutdown: Arc<AtomicBool>) {
        tracing::info!("playback thread started");
        while !shutdown.load(Ordering::Acquire) {
            self.poll_power();
            while let Ok(envelope) = cmd_rx.try_recv() {
                self.dispatch(envelope);
            }
            self.pump();
            match cmd_rx.recv_timeout(self.config.poll_interval) {
                Ok(envelope) => self.dispatch(envelope),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        self.halt();
        tracing::info!("playback thread stopped");
    }
}

/// Spawn the playback thread.
///
/// The thread exits once `shutdown` is set; join the returned handle so the
/// open source (and its prefetch thread) is released first.
pub fn spawn_player(
    controller: PlaybackController,
    shutdown: Arc<AtomicBool>,
) -> Result<(PlayerHandle, JoinHandle<()>)> {
    let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();
    let output = controller.output.clone();
    let join = thread::Builder::new()
        .name("playback".to_string())
        .spawn(move || controller.run(cmd_rx, shutdown))
        .map_err(|e| EngineError::Output(format!("spawn playback thread: {e}")))?;
    Ok((PlayerHandle { cmd_tx, output }, join))
}
