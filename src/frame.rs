//! Wire frames exchanged with the backend.
//!
//! Inbound frames are `{"type": <tag>, "data": <json>}`. Outbound frames
//! carry either a `data` payload or, for chat messages, a `content` string.

use serde::Deserialize;
use serde_json::Value;

/// Known frame type tags.
pub mod tags {
    /// Narration line in a running script.
    pub const SCRIPT_NARRATION: &str = "SCRIPT_NARRATION";
    /// Character dialogue in a running script.
    pub const SCRIPT_DIALOGUE: &str = "SCRIPT_DIALOGUE";
    /// Scene background change.
    pub const SCRIPT_BACKGROUND: &str = "SCRIPT_BACKGROUND";
    /// Line spoken by the player character.
    pub const SCRIPT_PLAYER: &str = "SCRIPT_PLAYER";
    /// Change of the present character or its emotion.
    pub const SCRIPT_MODIFY_CHARACTER: &str = "SCRIPT_MODIFY_CHARACTER";
    /// Achievement confirmed or pushed by the backend.
    pub const ACHIEVEMENT_UNLOCKED: &str = "achievement.unlocked";
    /// Outbound request asking the backend to unlock an achievement.
    pub const ACHIEVEMENT_UNLOCK_REQUEST: &str = "achievement.unlock_request";
    /// Outbound chat message typed by the user.
    pub const MESSAGE: &str = "MESSAGE";
}

/// Errors produced while decoding an inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// The text was not valid JSON or did not match the frame shape.
    Malformed(String),
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed(msg) => write!(f, "Malformed frame: {msg}"),
        }
    }
}

impl std::error::Error for FrameError {}

/// A frame received from the backend.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InboundFrame {
    /// Type tag used for dispatch.
    #[serde(rename = "type")]
    pub kind: String,
    /// Payload handed to the handler; `null` when absent.
    #[serde(default)]
    pub data: Value,
}

impl InboundFrame {
    /// Build a frame directly (used by tests and local injection).
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }

    /// Decode a frame from WebSocket text.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        serde_json::from_str(text).map_err(|e| FrameError::Malformed(e.to_string()))
    }
}

/// Body of an outbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundBody {
    /// Structured payload, serialized under `data`.
    Data(Value),
    /// Plain text, serialized under `content`.
    Content(String),
}

/// A frame sent to the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundFrame {
    /// Type tag.
    pub kind: String,
    /// Payload.
    pub body: OutboundBody,
}

impl OutboundFrame {
    /// Frame with a `data` payload.
    pub fn data(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            body: OutboundBody::Data(data),
        }
    }

    /// Frame with a `content` string.
    pub fn content(kind: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            body: OutboundBody::Content(content.into()),
        }
    }

    /// Serialize to the JSON text put on the wire.
    pub fn to_json(&self) -> String {
        let value = match &self.body {
            OutboundBody::Data(data) => serde_json::json!({
                "type": self.kind,
                "data": data,
            }),
            OutboundBody::Content(content) => serde_json::json!({
                "type": self.kind,
                "content": content,
            }),
        };
        value.to_string()
    }
}
