//! Wire protocol shared by `playerd` and remote controllers.
//!
//! Protocol v1: request/response messages over a single TCP connection.
//!
//! Message format:
//! - token: decimal command code (or its mnemonic, case-insensitive)
//! - zero or more arguments, each preceded by `RS` (0x1E)
//! - `TERMINATOR` (0x00)
//!
//! Replies use the same framing: RS-separated fields ended by `TERMINATOR`.
//! An empty reply (just the terminator) means "rejected" or "malformed".
//!
//! The first message on a connection must be a [`CommandCode::Version`] handshake;
//! the server ignores stateful commands until the handshake has been answered.

use std::io::{self, Read, Write};

/// Record separator between the fields of a message.
pub const RS: u8 = 0x1E;
/// End-of-message byte.
pub const TERMINATOR: u8 = 0x00;
/// Protocol version answered to [`CommandCode::Version`] requests.
pub const PROTOCOL_VERSION: u32 = 1;
/// Upper bound for a single message, terminator excluded.
pub const MAX_MESSAGE_LEN: usize = 64 * 1024;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandCode {
    Resume = 0,
    Pause = 1,
    Previous = 2,
    Next = 3,
    GetVolume = 4,
    SetVolume = 5,
    Play = 6,
    AddQueue = 7,
    RemoveQueue = 8,
    GetQueue = 9,
    SetQueue = 10,
    ShuffleOn = 11,
    ShuffleOff = 12,
    RepeatOn = 13,
    RepeatOff = 14,
    GetCurrentSong = 15,
    GetStatus = 16,
    Reset = 17,
    Seek = 18,

    /// Sentinel leading value: protocol compatibility handshake.
    Version = 0xFF,
}

const MNEMONICS: &[(&str, CommandCode)] = &[
    ("RESUME", CommandCode::Resume),
    ("PAUSE", CommandCode::Pause),
    ("PREVIOUS", CommandCode::Previous),
    ("NEXT", CommandCode::Next),
    ("GETVOLUME", CommandCode::GetVolume),
    ("SETVOLUME", CommandCode::SetVolume),
    ("PLAY", CommandCode::Play),
    ("ADDQUEUE", CommandCode::AddQueue),
    ("REMOVEQUEUE", CommandCode::RemoveQueue),
    ("GETQUEUE", CommandCode::GetQueue),
    ("SETQUEUE", CommandCode::SetQueue),
    ("SHUFFLEON", CommandCode::ShuffleOn),
    ("SHUFFLEOFF", CommandCode::ShuffleOff),
    ("REPEATON", CommandCode::RepeatOn),
    ("REPEATOFF", CommandCode::RepeatOff),
    ("GETCURRENTSONG", CommandCode::GetCurrentSong),
    ("GETSTATUS", CommandCode::GetStatus),
    ("RESET", CommandCode::Reset),
    ("SEEK", CommandCode::Seek),
    ("VERSION", CommandCode::Version),
];

impl CommandCode {
    pub fn from_u8(b: u8) -> io::Result<Self> {
        let c = match b {
            0 => CommandCode::Resume,
            1 => CommandCode::Pause,
            2 => CommandCode::Previous,
            3 => CommandCode::Next,
            4 => CommandCode::GetVolume,
            5 => CommandCode::SetVolume,
            6 => CommandCode::Play,
            7 => CommandCode::AddQueue,
            8 => CommandCode::RemoveQueue,
            9 => CommandCode::GetQueue,
            10 => CommandCode::SetQueue,
            11 => CommandCode::ShuffleOn,
            12 => CommandCode::ShuffleOff,
            13 => CommandCode::RepeatOn,
            14 => CommandCode::RepeatOff,
            15 => CommandCode::GetCurrentSong,
            16 => CommandCode::GetStatus,
            17 => CommandCode::Reset,
            18 => CommandCode::Seek,
            0xFF => CommandCode::Version,
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unknown command code {b}"),
                ));
            }
        };
        Ok(c)
    }

    /// Parse a leading token: either the decimal code or the mnemonic.
    pub fn from_token(token: &str) -> io::Result<Self> {
        let token = token.trim();
        if let Ok(code) = token.parse::<u8>() {
            return Self::from_u8(code);
        }
        MNEMONICS
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(token))
            .map(|(_, code)| *code)
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unknown command token {token:?}"),
                )
            })
    }

    pub fn mnemonic(self) -> &'static str {
        MNEMONICS
            .iter()
            .find(|(_, code)| *code == self)
            .map(|(name, _)| *name)
            .unwrap_or("UNKNOWN")
    }

    /// Whether the command is allowed before the version handshake.
    pub fn is_stateless(self) -> bool {
        matches!(self, CommandCode::Version)
    }
}

/// A parsed request: command code plus its RS-separated arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub code: CommandCode,
    pub args: Vec<String>,
}

impl Message {
    pub fn arg(&self, idx: usize) -> Option<&str> {
        self.args.get(idx).map(String::as_str)
    }
}

/// Split a raw message body (terminator already stripped) into fields.
pub fn split_fields(body: &[u8]) -> io::Result<Vec<String>> {
    let text = std::str::from_utf8(body)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "message not utf-8"))?;
    Ok(text.split(RS as char).map(str::to_string).collect())
}

/// Parse a raw message body (terminator already stripped).
pub fn parse_message(body: &[u8]) -> io::Result<Message> {
    let mut fields = split_fields(body)?;
    if fields.is_empty() || fields[0].trim().is_empty() {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "empty message"));
    }
    let code = CommandCode::from_token(&fields.remove(0))?;
    Ok(Message { code, args: fields })
}

/// Encode RS-separated fields followed by the terminator.
pub fn encode_fields<S: AsRef<str>>(fields: &[S]) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    for (i, field) in fields.iter().enumerate() {
        let bytes = field.as_ref().as_bytes();
        if bytes.contains(&RS) || bytes.contains(&TERMINATOR) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "field contains a framing byte",
            ));
        }
        if i > 0 {
            out.push(RS);
        }
        out.extend_from_slice(bytes);
    }
    if out.len() > MAX_MESSAGE_LEN {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "message too large"));
    }
    out.push(TERMINATOR);
    Ok(out)
}

/// Encode a request using the numeric command code as token.
pub fn encode_request<S: AsRef<str>>(code: CommandCode, args: &[S]) -> io::Result<Vec<u8>> {
    let mut fields: Vec<&str> = Vec::with_capacity(args.len() + 1);
    let token = (code as u8).to_string();
    fields.push(&token);
    fields.extend(args.iter().map(|a| a.as_ref()));
    encode_fields(&fields)
}

/// Write one framed message.
pub fn write_message<S: AsRef<str>>(mut w: impl Write, fields: &[S]) -> io::Result<()> {
    let frame = encode_fields(fields)?;
    w.write_all(&frame)?;
    w.flush()
}

/// Incremental reader for terminator-delimited messages.
///
/// Partial data survives `TimedOut`/`WouldBlock` errors, so the reader can be
/// used on sockets with a read timeout (the caller checks for shutdown between
/// attempts and simply calls [`MessageReader::read_message`] again).
///
/// A message longer than [`MAX_MESSAGE_LEN`] is dropped up to its terminator
/// and reported as `InvalidData`; the stream stays in sync for the next one.
pub struct MessageReader<R> {
    inner: R,
    pending: Vec<u8>,
    scratch: Box<[u8]>,
    oversized: bool,
}

impl<R: Read> MessageReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            pending: Vec::new(),
            scratch: vec![0u8; 4096].into_boxed_slice(),
            oversized: false,
        }
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    /// Read the next message body (terminator stripped).
    ///
    /// Returns `Ok(None)` on a clean EOF between messages.
    pub fn read_message(&mut self) -> io::Result<Option<Vec<u8>>> {
        loop {
            if let Some(end) = self.pending.iter().position(|b| *b == TERMINATOR) {
                if self.oversized || end > MAX_MESSAGE_LEN {
                    self.pending.drain(..=end);
                    self.oversized = false;
                    return Err(io::Error::new(io::ErrorKind::InvalidData, "message too large"));
                }
                let body: Vec<u8> = self.pending.drain(..=end).take(end).collect();
                return Ok(Some(body));
            }
            if self.oversized || self.pending.len() > MAX_MESSAGE_LEN {
                self.pending.clear();
                self.oversized = true;
            }

            let n = match self.inner.read(&mut self.scratch) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            if n == 0 {
                if self.pending.is_empty() && !self.oversized {
                    return Ok(None);
                }
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed mid-message",
                ));
            }
            self.pending.extend_from_slice(&self.scratch[..n]);
        }
    }
}
