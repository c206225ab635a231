//! Command Channel server.
//!
//! Serves one loopback control connection at a time. Each request is parsed,
//! dispatched to the playback thread (volume goes straight to the output) and
//! answered before the next request is read.
//!
//! Replies:
//! - mutating commands: `OK`, or an empty reply when rejected
//! - `VERSION`: the protocol version
//! - `GETVOLUME` / `SETVOLUME`: volume with one decimal (`42.0`)
//! - `GETQUEUE`: one field per song ID
//! - `GETCURRENTSONG`: `index<RS>song`, empty when nothing is current
//! - `GETSTATUS`: `state<RS>elapsed_ms<RS>duration_ms<RS>volume<RS>shuffle(0|1)<RS>repeat`

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use player_core::session::{RepeatMode, SongId};
use player_core::{EngineError, PlayerCommand, PlayerHandle, PlayerReply};
use player_proto::{CommandCode, Message, MessageReader, PROTOCOL_VERSION};

const ACCEPT_POLL: Duration = Duration::from_millis(100);
const READ_TIMEOUT: Duration = Duration::from_millis(200);
/// A controller that stops reading for this long is dropped.
const WRITE_TIMEOUT: Duration = Duration::from_secs(2);

/// Reply fields; an empty vector encodes as the bare terminator.
pub type Reply = Vec<String>;

pub struct CommandServer {
    listener: TcpListener,
    dispatcher: Dispatcher,
    shutdown: Arc<AtomicBool>,
}

impl CommandServer {
    /// Bind the control listener. Non-loopback addresses are refused.
    pub fn bind(addr: SocketAddr, player: PlayerHandle, shutdown: Arc<AtomicBool>) -> Result<Self> {
        if !addr.ip().is_loopback() {
            bail!("command channel must bind a loopback address, got {addr}");
        }
        let listener = TcpListener::bind(addr).with_context(|| format!("bind {addr}"))?;
        listener
            .set_nonblocking(true)
            .context("set listener non-blocking")?;
        Ok(Self {
            listener,
            dispatcher: Dispatcher::new(player),
            shutdown,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept and serve connections until the shutdown flag is set.
    pub fn run(&self) -> Result<()> {
        tracing::info!(bind = %self.local_addr()?, "command channel listening");
        while !self.shutdown.load(Ordering::Acquire) {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    tracing::info!(%peer, "controller connected");
                    match self.serve(stream) {
                        Ok(()) | Err(EngineError::ConnectionLost) => {
                            tracing::info!(%peer, "controller disconnected; ready for next connection")
                        }
                        Err(e) => tracing::warn!(%peer, "connection reset: {e}"),
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => std::thread::sleep(ACCEPT_POLL),
                Err(e) => {
                    tracing::warn!("accept error: {e}");
                    std::thread::sleep(ACCEPT_POLL);
                }
            }
        }
        tracing::info!("command channel stopped");
        Ok(())
    }

    /// Serve one connection. `Ok` on clean close or shutdown.
    fn serve(&self, stream: TcpStream) -> std::result::Result<(), EngineError> {
        let lost = |_| EngineError::ConnectionLost;
        stream.set_nonblocking(false).map_err(lost)?;
        stream.set_read_timeout(Some(READ_TIMEOUT)).map_err(lost)?;
        stream.set_write_timeout(Some(WRITE_TIMEOUT)).map_err(lost)?;
        let _ = stream.set_nodelay(true);
        let mut writer = stream.try_clone().map_err(lost)?;
        let mut reader = MessageReader::new(stream);
        let mut handshake = false;

        while !self.shutdown.load(Ordering::Acquire) {
            let body = match reader.read_message() {
                Ok(Some(body)) => body,
                Ok(None) => return Ok(()),
                Err(e)
                    if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) =>
                {
                    continue;
                }
                Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                    tracing::warn!("protocol error: {e}");
                    player_proto::write_message::<&str>(&mut writer, &[]).map_err(lost)?;
                    continue;
                }
                Err(_) => return Err(EngineError::ConnectionLost),
            };
            let reply = self.dispatcher.handle_body(&body, &mut handshake);
            player_proto::write_message(&mut writer, &reply).map_err(lost)?;
        }
        Ok(())
    }
}

/// Maps protocol messages onto player commands.
#[derive(Clone)]
pub struct Dispatcher {
    player: PlayerHandle,
}

impl Dispatcher {
    pub fn new(player: PlayerHandle) -> Self {
        Self { player }
    }

    /// Parse and execute one raw message. `handshake` tracks whether this
    /// connection has completed the version handshake.
    pub fn handle_body(&self, body: &[u8], handshake: &mut bool) -> Reply {
        let msg = match player_proto::parse_message(body) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!("protocol error: {e}");
                return Reply::new();
            }
        };
        if msg.code == CommandCode::Version {
            *handshake = true;
            return vec![PROTOCOL_VERSION.to_string()];
        }
        if !*handshake && !msg.code.is_stateless() {
            tracing::warn!(command = msg.code.mnemonic(), "command before version handshake ignored");
            return Reply::new();
        }
        match self.execute(&msg) {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(command = msg.code.mnemonic(), "{e}");
                Reply::new()
            }
        }
    }

    fn execute(&self, msg: &Message) -> std::result::Result<Reply, EngineError> {
        let output = self.player.output();
        let command = match msg.code {
            CommandCode::Version => return Ok(vec![PROTOCOL_VERSION.to_string()]),
            CommandCode::GetVolume => return Ok(vec![format!("{:.1}", output.volume())]),
            CommandCode::SetVolume => {
                let volume: f32 = parse_arg(msg, 0)?;
                return Ok(vec![format!("{:.1}", output.set_volume(volume))]);
            }
            CommandCode::Resume => PlayerCommand::Resume,
            CommandCode::Pause => PlayerCommand::Pause,
            CommandCode::Previous => PlayerCommand::Previous,
            CommandCode::Next => PlayerCommand::Next,
            CommandCode::Play => PlayerCommand::Play {
                index: optional_arg(msg, 0)?,
            },
            CommandCode::AddQueue => {
                let songs = song_args(msg)?;
                if songs.is_empty() {
                    return Err(EngineError::Protocol("ADDQUEUE needs a song".into()));
                }
                for song in songs {
                    self.expect_ok(PlayerCommand::AddToQueue { song })?;
                }
                return Ok(ok());
            }
            CommandCode::RemoveQueue => PlayerCommand::RemoveFromQueue {
                index: parse_arg(msg, 0)?,
            },
            CommandCode::GetQueue => PlayerCommand::GetQueue,
            CommandCode::SetQueue => PlayerCommand::SetQueue {
                songs: song_args(msg)?,
            },
            CommandCode::ShuffleOn => PlayerCommand::SetShuffle(true),
            CommandCode::ShuffleOff => PlayerCommand::SetShuffle(false),
            CommandCode::RepeatOn => {
                let mode = match msg.arg(0).filter(|a| !a.trim().is_empty()) {
                    None => RepeatMode::All,
                    Some(raw) => match RepeatMode::parse(raw) {
                        Some(RepeatMode::Off) | None => {
                            return Err(EngineError::Protocol(format!("bad repeat mode {raw:?}")));
                        }
                        Some(mode) => mode,
                    },
                };
                PlayerCommand::SetRepeat(mode)
            }
            CommandCode::RepeatOff => PlayerCommand::SetRepeat(RepeatMode::Off),
            CommandCode::GetCurrentSong => PlayerCommand::GetCurrentSong,
            CommandCode::GetStatus => PlayerCommand::GetStatus,
            CommandCode::Reset => PlayerCommand::Reset,
            CommandCode::Seek => PlayerCommand::Seek {
                ms: parse_arg(msg, 0)?,
            },
        };

        Ok(match self.player.request(command)? {
            PlayerReply::Ok => ok(),
            PlayerReply::Rejected => Reply::new(),
            PlayerReply::Queue(songs) => songs.iter().map(SongId::to_string).collect(),
            PlayerReply::Current(None) => Reply::new(),
            PlayerReply::Current(Some((index, song))) => vec![index.to_string(), song.to_string()],
            PlayerReply::Status(s) => vec![
                s.status.as_str().to_string(),
                s.elapsed_ms.to_string(),
                s.duration_ms.to_string(),
                format!("{:.1}", s.volume),
                u8::from(s.shuffle).to_string(),
                s.repeat.as_str().to_string(),
            ],
        })
    }

    fn expect_ok(&self, command: PlayerCommand) -> std::result::Result<(), EngineError> {
        match self.player.request(command)? {
            PlayerReply::Ok => Ok(()),
            other => Err(EngineError::Protocol(format!("unexpected reply {other:?}"))),
        }
    }
}

fn ok() -> Reply {
    vec!["OK".to_string()]
}

fn parse_arg<T: std::str::FromStr>(msg: &Message, idx: usize) -> std::result::Result<T, EngineError> {
    let raw = msg
        .arg(idx)
        .ok_or_else(|| EngineError::Protocol(format!("missing argument {idx}")))?;
    raw.trim()
        .parse()
        .map_err(|_| EngineError::Protocol(format!("bad argument {raw:?}")))
}

fn optional_arg<T: std::str::FromStr>(
    msg: &Message,
    idx: usize,
) -> std::result::Result<Option<T>, EngineError> {
    match msg.arg(idx) {
        Some(raw) if !raw.trim().is_empty() => parse_arg(msg, idx).map(Some),
        _ => Ok(None),
    }
}

fn song_args(msg: &Message) -> std::result::Result<Vec<SongId>, EngineError> {
    msg.args
        .iter()
        .filter(|a| !a.trim().is_empty())
        .map(|a| {
            a.trim()
                .parse()
                .map_err(|_| EngineError::Protocol(format!("bad song id {a:?}")))
        })
        .collect()
}
