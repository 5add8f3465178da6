//! STOMP 1.2 frame encoding and incremental decoding.
//!
//! A frame is `COMMAND\n(header:value\n)*\n` followed by the body and a NUL
//! octet. Over WebSocket one message usually carries one frame, but brokers
//! are free to pack several frames (or heart-beat EOLs) into one message or
//! to split a frame, so decoding is buffered.

use std::fmt;
use std::str::FromStr;

use bytes::{Buf, BytesMut};

use crate::error::FrameError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    // client
    Connect,
    Stomp,
    Send,
    Subscribe,
    Unsubscribe,
    Ack,
    Nack,
    Begin,
    Commit,
    Abort,
    Disconnect,
    // server
    Connected,
    Message,
    Receipt,
    Error,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Stomp => "STOMP",
            Command::Send => "SEND",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Ack => "ACK",
            Command::Nack => "NACK",
            Command::Begin => "BEGIN",
            Command::Commit => "COMMIT",
            Command::Abort => "ABORT",
            Command::Disconnect => "DISCONNECT",
            Command::Connected => "CONNECTED",
            Command::Message => "MESSAGE",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
        }
    }

    /// CONNECT and CONNECTED headers are sent verbatim for 1.0 compatibility.
    fn escapes_headers(&self) -> bool {
        !matches!(self, Command::Connect | Command::Connected)
    }
}

impl FromStr for Command {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "CONNECT" => Command::Connect,
            "STOMP" => Command::Stomp,
            "SEND" => Command::Send,
            "SUBSCRIBE" => Command::Subscribe,
            "UNSUBSCRIBE" => Command::Unsubscribe,
            "ACK" => Command::Ack,
            "NACK" => Command::Nack,
            "BEGIN" => Command::Begin,
            "COMMIT" => Command::Commit,
            "ABORT" => Command::Abort,
            "DISCONNECT" => Command::Disconnect,
            "CONNECTED" => Command::Connected,
            "MESSAGE" => Command::Message,
            "RECEIPT" => Command::Receipt,
            "ERROR" => Command::Error,
            other => return Err(FrameError::UnknownCommand(other.to_string())),
        })
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    /// Headers in wire order. Repeated names are kept; lookups return the first.
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Frame {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn encode(&self) -> String {
        let escape = self.command.escapes_headers();
        let mut out = String::with_capacity(64 + self.body.len());

        out.push_str(self.command.as_str());
        out.push('\n');
        for (name, value) in &self.headers {
            if escape {
                out.push_str(&escape_header(name));
                out.push(':');
                out.push_str(&escape_header(value));
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }
        if !self.body.is_empty() && self.get("content-length").is_none() {
            out.push_str(&format!("content-length:{}\n", self.body.len()));
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }
}

/// One unit pulled off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    Frame(Frame),
    /// A bare EOL sent as heart-beat.
    KeepAlive,
}

/// Buffers text chunks and yields complete frames.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &str) {
        self.buf.extend_from_slice(chunk.as_bytes());
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Pull the next frame or heart-beat, `Ok(None)` if more input is needed.
    ///
    /// A malformed frame discards everything buffered so the stream can
    /// resynchronise on the next message.
    pub fn next_frame(&mut self) -> Result<Option<Received>, FrameError> {
        match self.try_decode() {
            Err(e) => {
                self.buf.clear();
                Err(e)
            }
            ok => ok,
        }
    }

    fn try_decode(&mut self) -> Result<Option<Received>, FrameError> {
        if self.buf.is_empty() {
            return Ok(None);
        }
        if self.buf[0] == b'\n' {
            self.buf.advance(1);
            return Ok(Some(Received::KeepAlive));
        }
        if self.buf.starts_with(b"\r\n") {
            self.buf.advance(2);
            return Ok(Some(Received::KeepAlive));
        }
        if self.buf[..] == b"\r"[..] {
            return Ok(None);
        }

        let Some((head_len, body_start)) = find_blank_line(&self.buf) else {
            return Ok(None);
        };

        let head = std::str::from_utf8(&self.buf[..head_len]).map_err(|_| FrameError::InvalidUtf8)?;
        let mut lines = head.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l));
        let command: Command = lines.next().unwrap_or_default().parse()?;

        let mut headers = Vec::new();
        for line in lines {
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| FrameError::MalformedHeader(line.to_string()))?;
            if command.escapes_headers() {
                headers.push((unescape_header(name)?, unescape_header(value)?));
            } else {
                headers.push((name.to_string(), value.to_string()));
            }
        }

        let content_length = headers
            .iter()
            .find(|(k, _)| k == "content-length")
            .map(|(_, v)| {
                v.trim()
                    .parse::<usize>()
                    .map_err(|_| FrameError::InvalidContentLength(v.clone()))
            })
            .transpose()?;

        let body_end = match content_length {
            Some(len) => {
                let end = body_start + len;
                if self.buf.len() <= end {
                    return Ok(None);
                }
                if self.buf[end] != 0 {
                    return Err(FrameError::InvalidContentLength(len.to_string()));
                }
                end
            }
            None => match self.buf[body_start..].iter().position(|b| *b == 0) {
                Some(offset) => body_start + offset,
                None => return Ok(None),
            },
        };

        let body = std::str::from_utf8(&self.buf[body_start..body_end])
            .map_err(|_| FrameError::InvalidUtf8)?
            .to_string();

        self.buf.advance(body_end + 1);

        Ok(Some(Received::Frame(Frame {
            command,
            headers,
            body,
        })))
    }
}

/// Returns `(head_len, body_start)` for the first blank line, if buffered.
fn find_blank_line(buf: &[u8]) -> Option<(usize, usize)> {
    for i in 0..buf.len() {
        if buf[i] != b'\n' {
            continue;
        }
        let head_len = if i > 0 && buf[i - 1] == b'\r' { i - 1 } else { i };
        match buf.get(i + 1) {
            Some(b'\n') => return Some((head_len, i + 2)),
            Some(b'\r') if buf.get(i + 2) == Some(&b'\n') => return Some((head_len, i + 3)),
            _ => {}
        }
    }
    None
}

fn escape_header(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_header(raw: &str) -> Result<String, FrameError> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            _ => return Err(FrameError::InvalidEscape(raw.to_string())),
        }
    }
    Ok(out)
}

/// Heart-beat intervals in milliseconds; 0 disables a direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Heartbeat {
    pub outgoing: u64,
    pub incoming: u64,
}

impl Heartbeat {
    pub fn new(outgoing: u64, incoming: u64) -> Self {
        Self { outgoing, incoming }
    }

    /// Parse a `heart-beat` header value (`"cx,cy"`).
    pub fn parse(value: &str) -> Option<Self> {
        let (out, inc) = value.split_once(',')?;
        Some(Self {
            outgoing: out.trim().parse().ok()?,
            incoming: inc.trim().parse().ok()?,
        })
    }

    pub fn to_header(&self) -> String {
        format!("{},{}", self.outgoing, self.incoming)
    }

    /// Settle the intervals the client will actually use, given what it
    /// offered and what the server answered in CONNECTED.
    pub fn negotiate(client: Heartbeat, server: Heartbeat) -> Heartbeat {
        let outgoing = if client.outgoing == 0 || server.incoming == 0 {
            0
        } else {
            client.outgoing.max(server.incoming)
        };
        let incoming = if client.incoming == 0 || server.outgoing == 0 {
            0
        } else {
            client.incoming.max(server.outgoing)
        };
        Heartbeat { outgoing, incoming }
    }
}
