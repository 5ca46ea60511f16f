//! STOMP 1.2 frame codec.
//!
//! A frame is a command line, zero or more `name:value` header lines, a
//! blank line, and a body terminated by a NUL octet. A bare EOL between
//! frames is a heart-beat. Header names and values are escaped on every
//! frame except CONNECT/CONNECTED, per the 1.2 specification.
//!
//! The parser treats the frame boundary (WebSocket message / NUL octet) as
//! authoritative and does not re-slice the body on `content-length`; the
//! header is still emitted on encode for brokers that want it.

use crate::error::{Result, SouqLinkError};
use std::fmt;

use super::heartbeat::HeartBeat;

/// STOMP frame commands used by the chat protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Connect,
    Connected,
    Send,
    Subscribe,
    Unsubscribe,
    Message,
    Receipt,
    Error,
    Disconnect,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Connected => "CONNECTED",
            Command::Send => "SEND",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Message => "MESSAGE",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
            Command::Disconnect => "DISCONNECT",
        }
    }

    fn from_line(line: &str) -> Result<Command> {
        match line {
            "CONNECT" => Ok(Command::Connect),
            "CONNECTED" => Ok(Command::Connected),
            "SEND" => Ok(Command::Send),
            "SUBSCRIBE" => Ok(Command::Subscribe),
            "UNSUBSCRIBE" => Ok(Command::Unsubscribe),
            "MESSAGE" => Ok(Command::Message),
            "RECEIPT" => Ok(Command::Receipt),
            "ERROR" => Ok(Command::Error),
            "DISCONNECT" => Ok(Command::Disconnect),
            other => Err(SouqLinkError::ParseError(format!(
                "Unknown STOMP command '{}'",
                other
            ))),
        }
    }

    /// CONNECT and CONNECTED frames predate header escaping and must be
    /// encoded/decoded verbatim.
    fn escapes_headers(&self) -> bool {
        !matches!(self, Command::Connect | Command::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A parsed or to-be-encoded STOMP frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub command: Command,
    /// Headers in order of appearance. Repeated names are kept; the first
    /// occurrence wins on lookup, per the 1.2 specification.
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

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// First value of the named header, if present.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(header, _)| header == name)
            .map(|(_, value)| value.as_str())
    }

    /// Serialize the frame, including the trailing NUL octet.
    pub fn encode(&self) -> String {
        let escape = self.command.escapes_headers();
        let mut out = String::new();
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
        if !self.body.is_empty() && self.header_value("content-length").is_none() {
            out.push_str("content-length:");
            out.push_str(&self.body.len().to_string());
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }

    /// Parse one frame. Returns `Ok(None)` for a heart-beat (empty input or
    /// a bare EOL).
    pub fn parse(input: &str) -> Result<Option<Frame>> {
        if input.is_empty() || input == "\n" || input == "\r\n" {
            return Ok(None);
        }

        // Whichever blank line comes first is the header/body separator;
        // a later match would be inside the body.
        let crlf = input.find("\r\n\r\n");
        let lf = input.find("\n\n");
        let (head, body) = match (crlf, lf) {
            (Some(c), Some(l)) if c < l => (&input[..c], &input[c + 4..]),
            (_, Some(l)) => (&input[..l], &input[l + 2..]),
            (Some(c), None) => (&input[..c], &input[c + 4..]),
            (None, None) => {
                return Err(SouqLinkError::ParseError(
                    "Frame is missing the header/body separator".to_string(),
                ));
            }
        };

        let mut lines = head.split('\n').map(|line| line.trim_end_matches('\r'));
        let command_line = lines
            .next()
            .filter(|line| !line.is_empty())
            .ok_or_else(|| SouqLinkError::ParseError("Frame has no command line".to_string()))?;
        let command = Command::from_line(command_line)?;

        let mut headers = Vec::new();
        for line in lines {
            if line.is_empty() {
                continue;
            }
            let (name, value) = line.split_once(':').ok_or_else(|| {
                SouqLinkError::ParseError(format!("Malformed header line '{}'", line))
            })?;
            if command.escapes_headers() {
                headers.push((unescape_header(name)?, unescape_header(value)?));
            } else {
                headers.push((name.to_string(), value.to_string()));
            }
        }

        // The NUL octet ends the body; trailing EOL padding after it is
        // permitted between frames.
        let body = match body.find('\0') {
            Some(index) => &body[..index],
            None => body,
        };

        Ok(Some(Frame {
            command,
            headers,
            body: body.to_string(),
        }))
    }

    // ── Convenience constructors for the chat protocol ──────────────────

    /// Client CONNECT frame, with an optional bearer token.
    pub fn connect(host: &str, heart_beat: &HeartBeat, token: Option<&str>) -> Frame {
        let mut frame = Frame::new(Command::Connect)
            .with_header("accept-version", "1.2")
            .with_header("host", host)
            .with_header("heart-beat", heart_beat.header_value());
        if let Some(token) = token {
            frame = frame.with_header("Authorization", format!("Bearer {}", token));
        }
        frame
    }

    /// Server CONNECTED frame.
    pub fn connected(heart_beat: &HeartBeat) -> Frame {
        Frame::new(Command::Connected)
            .with_header("version", "1.2")
            .with_header("heart-beat", heart_beat.header_value())
    }

    pub fn subscribe(id: &str, destination: &str) -> Frame {
        Frame::new(Command::Subscribe)
            .with_header("id", id)
            .with_header("destination", destination)
            .with_header("ack", "auto")
    }

    pub fn unsubscribe(id: &str) -> Frame {
        Frame::new(Command::Unsubscribe).with_header("id", id)
    }

    pub fn send(destination: &str, body: &str) -> Frame {
        Frame::new(Command::Send)
            .with_header("destination", destination)
            .with_header("content-type", "application/json")
            .with_body(body)
    }

    /// Server MESSAGE frame delivering a body on a subscription.
    pub fn message(destination: &str, message_id: &str, subscription: &str, body: &str) -> Frame {
        Frame::new(Command::Message)
            .with_header("destination", destination)
            .with_header("message-id", message_id)
            .with_header("subscription", subscription)
            .with_header("content-type", "application/json")
            .with_body(body)
    }

    /// Server ERROR frame.
    pub fn error(message: &str) -> Frame {
        Frame::new(Command::Error)
            .with_header("message", message)
            .with_body(message)
    }

    pub fn disconnect() -> Frame {
        Frame::new(Command::Disconnect)
    }
}

fn escape_header(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_header(value: &str) -> Result<String> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some('c') => out.push(':'),
            other => {
                return Err(SouqLinkError::ParseError(format!(
                    "Invalid header escape sequence '\\{}'",
                    other.map(String::from).unwrap_or_default()
                )));
            }
        }
    }
    Ok(out)
}
