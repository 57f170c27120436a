//! Console protocol shared by the script runtime and the host.
//!
//! Every line a script writes to its stdout is a JSON envelope:
//!
//! ```text
//! {"Type":"tracepad.DebugInfo","Content":"{\"SpanStart\":0,\"SpanLength\":10,\"Variables\":[]}"}
//! ```
//!
//! `Type` selects one of a closed set of payload kinds and `Content` carries the
//! payload serialized as a JSON string. The host reads the stream line by line
//! and decodes each envelope independently, so one bad line never poisons the
//! lines after it.

use serde::{Deserialize, Serialize};

/// Errors raised while encoding or decoding protocol lines.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The line is not a `{Type, Content}` envelope.
    #[error("malformed envelope: {0}")]
    Envelope(#[source] serde_json::Error),

    /// The envelope names a payload type outside the closed set.
    #[error("unknown payload type: {0}")]
    UnknownType(String),

    /// The envelope content does not match the declared payload type.
    #[error("malformed {kind} content: {source}")]
    Content {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// A payload could not be serialized.
    #[error("failed to encode payload: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Discriminant of a payload carried in a [`ConsoleFrame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    /// Plain console text.
    ConsoleMessage,
    /// Statement telemetry emitted by a probe.
    DebugInfo,
    /// Diagnostic string emitted in place of a payload that failed to encode.
    Diagnostic,
}

impl PayloadKind {
    /// All payload kinds, in wire order.
    pub const ALL: [PayloadKind; 3] = [Self::ConsoleMessage, Self::DebugInfo, Self::Diagnostic];

    /// Wire tag written to the envelope's `Type` field.
    pub fn tag(self) -> &'static str {
        match self {
            Self::ConsoleMessage => "tracepad.ConsoleMessage",
            Self::DebugInfo => "tracepad.DebugInfo",
            Self::Diagnostic => "tracepad.Diagnostic",
        }
    }

    /// Resolve a wire tag back to its kind.
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.tag() == tag)
    }
}

/// Which console stream a message was written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum StreamKind {
    /// Standard output (`0` on the wire).
    Stdout,
    /// Standard error (`1` on the wire).
    Stderr,
}

impl From<StreamKind> for u8 {
    fn from(stream: StreamKind) -> u8 {
        match stream {
            StreamKind::Stdout => 0,
            StreamKind::Stderr => 1,
        }
    }
}

impl TryFrom<u8> for StreamKind {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, String> {
        match value {
            0 => Ok(StreamKind::Stdout),
            1 => Ok(StreamKind::Stderr),
            other => Err(format!("invalid stream discriminant {other}")),
        }
    }
}

/// Text written by the script through the console macros.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleMessage {
    #[serde(rename = "Type")]
    pub stream: StreamKind,
    #[serde(rename = "Message")]
    pub message: String,
}

impl ConsoleMessage {
    pub fn new(stream: StreamKind, message: impl Into<String>) -> Self {
        Self {
            stream,
            message: message.into(),
        }
    }
}

/// A named variable and its rendered value at the time a probe fired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Var {
    pub name: String,
    pub value: String,
}

impl Var {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Telemetry for one executed statement (or one block exit).
///
/// The span is a byte range into the original, uninstrumented script.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DebugEvent {
    pub span_start: usize,
    pub span_length: usize,
    #[serde(default)]
    pub variables: Vec<Var>,
}

/// The closed set of payloads that can travel over the console protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Console(ConsoleMessage),
    Debug(DebugEvent),
    Diagnostic(String),
}

impl Payload {
    pub fn kind(&self) -> PayloadKind {
        match self {
            Self::Console(_) => PayloadKind::ConsoleMessage,
            Self::Debug(_) => PayloadKind::DebugInfo,
            Self::Diagnostic(_) => PayloadKind::Diagnostic,
        }
    }
}

/// The `{Type, Content}` envelope, one per protocol line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleFrame {
    #[serde(rename = "Type")]
    pub type_tag: String,
    #[serde(rename = "Content")]
    pub content: String,
}

impl ConsoleFrame {
    /// Wrap a payload into an envelope.
    pub fn wrap(payload: &Payload) -> Result<Self, ProtocolError> {
        let content = match payload {
            Payload::Console(message) => serde_json::to_string(message),
            Payload::Debug(event) => serde_json::to_string(event),
            Payload::Diagnostic(text) => serde_json::to_string(text),
        }
        .map_err(ProtocolError::Encode)?;

        Ok(Self {
            type_tag: payload.kind().tag().to_string(),
            content,
        })
    }

    /// Resolve the declared type and deserialize the content against it.
    pub fn payload(&self) -> Result<Payload, ProtocolError> {
        let kind = PayloadKind::from_tag(&self.type_tag)
            .ok_or_else(|| ProtocolError::UnknownType(self.type_tag.clone()))?;
        let content_error = |source| ProtocolError::Content {
            kind: kind.tag(),
            source,
        };

        match kind {
            PayloadKind::ConsoleMessage => serde_json::from_str(&self.content)
                .map(Payload::Console)
                .map_err(content_error),
            PayloadKind::DebugInfo => serde_json::from_str(&self.content)
                .map(Payload::Debug)
                .map_err(content_error),
            PayloadKind::Diagnostic => serde_json::from_str(&self.content)
                .map(Payload::Diagnostic)
                .map_err(content_error),
        }
    }
}

/// Encode a payload as a single protocol line (without the trailing newline).
pub fn encode(payload: &Payload) -> Result<String, ProtocolError> {
    let frame = ConsoleFrame::wrap(payload)?;
    serde_json::to_string(&frame).map_err(ProtocolError::Encode)
}

/// Decode one protocol line.
///
/// Trailing `\r`/`\n` characters are ignored so lines can be passed straight
/// from a line reader on any platform.
pub fn decode(line: &str) -> Result<Payload, ProtocolError> {
    let line = line.trim_end_matches(['\r', '\n']);
    let frame: ConsoleFrame = serde_json::from_str(line).map_err(ProtocolError::Envelope)?;
    frame.payload()
}
