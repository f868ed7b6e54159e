//! STOMP 1.2 framing
//!
//! One frame normally travels per WebSocket text message, but brokers may
//! batch several NUL-terminated frames into one message. A message made only
//! of EOLs is a heart-beat.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

/// Heart-beat payload (a single EOL).
pub const HEARTBEAT: &str = "\n";

/// Versions offered in `CONNECT`.
pub const ACCEPT_VERSION: &str = "1.2,1.1";

/// WebSocket subprotocols requested during the upgrade.
pub const SUBPROTOCOLS: &str = "v12.stomp, v11.stomp";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("unknown STOMP command: {0}")]
    UnknownCommand(String),

    #[error("malformed header line: {0}")]
    MalformedHeader(String),

    #[error("invalid escape sequence in header: {0}")]
    InvalidEscape(String),

    #[error("frame is missing its NUL terminator")]
    Unterminated,

    #[error("content-length {declared} does not fit a body of {available} bytes")]
    ContentLength { declared: usize, available: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StompCommand {
    Connect,
    Stomp,
    Connected,
    Send,
    Subscribe,
    Unsubscribe,
    Ack,
    Nack,
    Begin,
    Commit,
    Abort,
    Disconnect,
    Message,
    Receipt,
    Error,
}

impl StompCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            StompCommand::Connect => "CONNECT",
            StompCommand::Stomp => "STOMP",
            StompCommand::Connected => "CONNECTED",
            StompCommand::Send => "SEND",
            StompCommand::Subscribe => "SUBSCRIBE",
            StompCommand::Unsubscribe => "UNSUBSCRIBE",
            StompCommand::Ack => "ACK",
            StompCommand::Nack => "NACK",
            StompCommand::Begin => "BEGIN",
            StompCommand::Commit => "COMMIT",
            StompCommand::Abort => "ABORT",
            StompCommand::Disconnect => "DISCONNECT",
            StompCommand::Message => "MESSAGE",
            StompCommand::Receipt => "RECEIPT",
            StompCommand::Error => "ERROR",
        }
    }

    /// CONNECT and CONNECTED headers are sent verbatim for 1.0 compatibility.
    fn escapes_headers(self) -> bool {
        !matches!(self, StompCommand::Connect | StompCommand::Connected)
    }
}

impl fmt::Display for StompCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StompCommand {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let command = match s {
            "CONNECT" => StompCommand::Connect,
            "STOMP" => StompCommand::Stomp,
            "CONNECTED" => StompCommand::Connected,
            "SEND" => StompCommand::Send,
            "SUBSCRIBE" => StompCommand::Subscribe,
            "UNSUBSCRIBE" => StompCommand::Unsubscribe,
            "ACK" => StompCommand::Ack,
            "NACK" => StompCommand::Nack,
            "BEGIN" => StompCommand::Begin,
            "COMMIT" => StompCommand::Commit,
            "ABORT" => StompCommand::Abort,
            "DISCONNECT" => StompCommand::Disconnect,
            "MESSAGE" => StompCommand::Message,
            "RECEIPT" => StompCommand::Receipt,
            "ERROR" => StompCommand::Error,
            other => return Err(FrameError::UnknownCommand(other.to_string())),
        };
        Ok(command)
    }
}

/// A single STOMP frame. Header order is preserved; when a header repeats,
/// the first occurrence wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: StompCommand,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Frame {
    pub fn new(command: StompCommand) -> Self {
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
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// `CONNECT` carrying the bearer credential and our heart-beat offer.
    pub fn connect(host: &str, heart_beat: HeartBeat, bearer_token: Option<&str>) -> Self {
        let mut frame = Frame::new(StompCommand::Connect)
            .header("accept-version", ACCEPT_VERSION)
            .header("host", host)
            .header("heart-beat", heart_beat.header_value());
        if let Some(token) = bearer_token {
            frame = frame.header("Authorization", format!("Bearer {token}"));
        }
        frame
    }

    pub fn subscribe(id: impl Into<String>, destination: impl Into<String>) -> Self {
        Frame::new(StompCommand::Subscribe)
            .header("id", id)
            .header("destination", destination)
            .header("ack", "auto")
    }

    pub fn send_json(destination: impl Into<String>, body: impl Into<String>) -> Self {
        Frame::new(StompCommand::Send)
            .header("destination", destination)
            .header("content-type", "application/json")
            .with_body(body)
    }

    pub fn disconnect() -> Self {
        Frame::new(StompCommand::Disconnect)
    }

    /// Serialize to wire text, adding `content-length` for non-empty bodies.
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

/// Decode every frame in one WebSocket message. Heart-beat EOLs between
/// frames are skipped; a pure heart-beat yields an empty vector.
pub fn decode_frames(text: &str) -> Result<Vec<Frame>, FrameError> {
    let mut frames = Vec::new();
    let mut rest = text;
    loop {
        rest = rest.trim_start_matches(['\r', '\n']);
        if rest.is_empty() {
            return Ok(frames);
        }
        let (frame, remaining) = decode_one(rest)?;
        frames.push(frame);
        rest = remaining;
    }
}

fn decode_one(input: &str) -> Result<(Frame, &str), FrameError> {
    let (command_line, mut rest) = split_line(input).ok_or(FrameError::Unterminated)?;
    let command: StompCommand = command_line.parse()?;

    let mut headers = Vec::new();
    loop {
        let (line, remaining) = split_line(rest).ok_or(FrameError::Unterminated)?;
        rest = remaining;
        if line.is_empty() {
            break;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| FrameError::MalformedHeader(line.to_string()))?;
        if command.escapes_headers() {
            headers.push((unescape_header(name)?, unescape_header(value)?));
        } else {
            headers.push((name.to_string(), value.to_string()));
        }
    }

    let declared = headers
        .iter()
        .find(|(name, _)| name == "content-length")
        .and_then(|(_, value)| value.trim().parse::<usize>().ok());

    let body_len = match declared {
        Some(len) => {
            if rest.len() <= len {
                return Err(FrameError::ContentLength {
                    declared: len,
                    available: rest.len(),
                });
            }
            if rest.as_bytes()[len] != 0 {
                return Err(FrameError::Unterminated);
            }
            len
        }
        None => rest.find('\0').ok_or(FrameError::Unterminated)?,
    };

    let body = rest.get(..body_len).ok_or(FrameError::ContentLength {
        declared: body_len,
        available: rest.len(),
    })?;

    let frame = Frame {
        command,
        headers,
        body: body.to_string(),
    };
    Ok((frame, &rest[body_len + 1..]))
}

fn split_line(input: &str) -> Option<(&str, &str)> {
    let idx = input.find('\n')?;
    let line = input[..idx].strip_suffix('\r').unwrap_or(&input[..idx]);
    Some((line, &input[idx + 1..]))
}

fn escape_header(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_header(value: &str) -> Result<String, FrameError> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            _ => return Err(FrameError::InvalidEscape(value.to_string())),
        }
    }
    Ok(out)
}

/// Heart-beat intervals as carried by the `heart-beat` header: `outgoing` is
/// how often this side promises to send, `incoming` how often it wants to
/// hear from the peer. Zero disables a direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeartBeat {
    pub outgoing: Duration,
    pub incoming: Duration,
}

impl HeartBeat {
    pub fn new(outgoing: Duration, incoming: Duration) -> Self {
        Self { outgoing, incoming }
    }

    pub fn header_value(&self) -> String {
        format!(
            "{},{}",
            self.outgoing.as_millis(),
            self.incoming.as_millis()
        )
    }

    pub fn parse(value: &str) -> Option<Self> {
        let (outgoing, incoming) = value.split_once(',')?;
        let outgoing = outgoing.trim().parse::<u64>().ok()?;
        let incoming = incoming.trim().parse::<u64>().ok()?;
        Some(Self {
            outgoing: Duration::from_millis(outgoing),
            incoming: Duration::from_millis(incoming),
        })
    }

    /// Effective intervals for the client given its offer and the server's
    /// `CONNECTED` header.
    pub fn negotiate(client: HeartBeat, server: HeartBeat) -> HeartBeat {
        let pick = |ours: Duration, theirs: Duration| {
            if ours.is_zero() || theirs.is_zero() {
                Duration::ZERO
            } else {
                ours.max(theirs)
            }
        };
        HeartBeat {
            outgoing: pick(client.outgoing, server.incoming),
            incoming: pick(client.incoming, server.outgoing),
        }
    }
}
