//! Narrative events and their paced presentation.
//!
//! The backend streams a story as loosely interleaved script frames. Each
//! frame becomes one immutable [`NarrativeEvent`], which the
//! [`queue::PresentationQueue`] applies to the application state one at a
//! time through the matching [`processor::EventProcessor`].
//!
//! # Wire format
//!
//! Payloads use camelCase keys. Every variant accepts the pacing fields
//! `duration` (milliseconds; negative or absent means no hold) and `isFinal`.
//!
//! ```json
//! {"character": "Ling", "emotion": "happy", "message": "Hi!", "duration": 1200}
//! ```

pub mod processor;
pub mod queue;

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::constants;
use crate::frame::tags;

/// Closed set of narrative event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Narrator text.
    Narration,
    /// A character speaking.
    Dialogue,
    /// Background change.
    Background,
    /// A line spoken by the player character.
    PlayerLine,
    /// Present character or emotion change.
    ModifyCharacter,
}

impl EventKind {
    /// Every kind, in registry order.
    pub const ALL: [EventKind; 5] = [
        Self::Narration,
        Self::Dialogue,
        Self::Background,
        Self::PlayerLine,
        Self::ModifyCharacter,
    ];

    /// Short name used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Narration => "narration",
            Self::Dialogue => "dialogue",
            Self::Background => "background",
            Self::PlayerLine => "player",
            Self::ModifyCharacter => "modify_character",
        }
    }

    /// Inbound frame tag carrying this kind.
    pub fn frame_tag(self) -> &'static str {
        match self {
            Self::Narration => tags::SCRIPT_NARRATION,
            Self::Dialogue => tags::SCRIPT_DIALOGUE,
            Self::Background => tags::SCRIPT_BACKGROUND,
            Self::PlayerLine => tags::SCRIPT_PLAYER,
            Self::ModifyCharacter => tags::SCRIPT_MODIFY_CHARACTER,
        }
    }

    /// Kind carried by an inbound frame tag.
    pub fn from_frame_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.frame_tag() == tag)
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn no_hold() -> f64 {
    -1.0
}

/// Pacing shared by every variant.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pacing {
    /// Hold after presenting, in milliseconds.
    #[serde(default = "no_hold")]
    pub duration: f64,
    /// Marks the last chunk of a turn.
    #[serde(default)]
    pub is_final: bool,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            duration: no_hold(),
            is_final: false,
        }
    }
}

impl Pacing {
    /// Pacing with a hold of `millis` milliseconds.
    pub fn millis(millis: u64) -> Self {
        Self {
            duration: millis as f64,
            is_final: false,
        }
    }

    /// How long the queue holds after presenting. Zero for negative,
    /// non-finite or absent durations; capped at
    /// [`constants::MAX_PRESENTATION_HOLD`].
    pub fn hold(&self) -> Duration {
        if self.duration <= 0.0 {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f64(self.duration / 1000.0)
            .map_or(Duration::ZERO, |hold| hold.min(constants::MAX_PRESENTATION_HOLD))
    }
}

/// Narration line between dialogue.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Narration {
    /// Narrated text.
    #[serde(default)]
    pub text: String,
    /// Scene the line belongs to.
    pub scene_id: Option<String>,
    /// Hold and final-chunk flag.
    #[serde(flatten)]
    pub pacing: Pacing,
}

/// A character speaking.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dialogue {
    /// Speaker; falls back to the interacting role when absent.
    pub character: Option<String>,
    /// Emotion key; empty leaves the role's emotion unchanged.
    #[serde(default)]
    pub emotion: String,
    /// Emotion tag as written by the model.
    #[serde(default)]
    pub original_tag: String,
    /// Spoken text.
    #[serde(default)]
    pub message: String,
    /// Gesture shown next to the line.
    pub motion_text: Option<String>,
    /// Voice clip for the line.
    pub audio_file: Option<String>,
    /// Raw model output the line was parsed from.
    #[serde(default)]
    pub original_message: String,
    /// Hold and final-chunk flag.
    #[serde(flatten)]
    pub pacing: Pacing,
}

/// Scene background change.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Background {
    /// Image to show.
    #[serde(default)]
    pub image_path: String,
    /// Transition effect name.
    pub transition: Option<String>,
    /// Hold and final-chunk flag.
    #[serde(flatten)]
    pub pacing: Pacing,
}

/// Line spoken by the player character.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerLine {
    /// Spoken text.
    #[serde(default)]
    pub text: String,
    /// Player character's emotion.
    pub emotion: Option<String>,
    /// Hold and final-chunk flag.
    #[serde(flatten)]
    pub pacing: Pacing,
}

/// Change to the present character.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModifyCharacter {
    /// Character to bring forward; events without one are ignored.
    pub character: Option<String>,
    /// New emotion for that character.
    pub emotion: Option<String>,
    /// Hold and final-chunk flag.
    #[serde(flatten)]
    pub pacing: Pacing,
}

/// One step of a story, as received from the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum NarrativeEvent {
    /// See [`Narration`].
    Narration(Narration),
    /// See [`Dialogue`].
    Dialogue(Dialogue),
    /// See [`Background`].
    Background(Background),
    /// See [`PlayerLine`].
    PlayerLine(PlayerLine),
    /// See [`ModifyCharacter`].
    ModifyCharacter(ModifyCharacter),
}

/// Errors produced while building an event from a frame payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    /// The payload does not have the shape the kind requires.
    InvalidPayload {
        /// Kind the frame tag named.
        kind: EventKind,
        /// Decoder message.
        reason: String,
    },
}

impl std::fmt::Display for EventError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidPayload { kind, reason } => {
                write!(f, "Invalid {kind} payload: {reason}")
            }
        }
    }
}

impl std::error::Error for EventError {}

fn decode<T: DeserializeOwned>(kind: EventKind, data: Value) -> Result<T, EventError> {
    // Frames without `data` still carry valid (empty) events.
    let data = if data.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        data
    };
    serde_json::from_value(data).map_err(|e| EventError::InvalidPayload {
        kind,
        reason: e.to_string(),
    })
}

impl NarrativeEvent {
    /// Build the event of `kind` from a frame's `data`.
    pub fn from_payload(kind: EventKind, data: Value) -> Result<Self, EventError> {
        Ok(match kind {
            EventKind::Narration => Self::Narration(decode(kind, data)?),
            EventKind::Dialogue => Self::Dialogue(decode(kind, data)?),
            EventKind::Background => Self::Background(decode(kind, data)?),
            EventKind::PlayerLine => Self::PlayerLine(decode(kind, data)?),
            EventKind::ModifyCharacter => Self::ModifyCharacter(decode(kind, data)?),
        })
    }

    /// Kind of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Narration(_) => EventKind::Narration,
            Self::Dialogue(_) => EventKind::Dialogue,
            Self::Background(_) => EventKind::Background,
            Self::PlayerLine(_) => EventKind::PlayerLine,
            Self::ModifyCharacter(_) => EventKind::ModifyCharacter,
        }
    }

    /// Pacing of this event.
    pub fn pacing(&self) -> &Pacing {
        match self {
            Self::Narration(e) => &e.pacing,
            Self::Dialogue(e) => &e.pacing,
            Self::Background(e) => &e.pacing,
            Self::PlayerLine(e) => &e.pacing,
            Self::ModifyCharacter(e) => &e.pacing,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_frame_tags_map_back_to_kinds() {
        for kind in EventKind::ALL {
            assert_eq!(EventKind::from_frame_tag(kind.frame_tag()), Some(kind));
        }
        assert_eq!(EventKind::from_frame_tag("SCRIPT_CHAPTER_END"), None);
    }

    #[test]
    fn test_dialogue_payload_uses_camel_case() {
        let event = NarrativeEvent::from_payload(
            EventKind::Dialogue,
            json!({
                "character": "Ling",
                "emotion": "happy",
                "originalTag": "开心",
                "message": "hi",
                "motionText": "waves",
                "audioFile": "a.wav",
                "duration": 1000,
                "isFinal": true,
            }),
        )
        .unwrap();

        let NarrativeEvent::Dialogue(dialogue) = &event else {
            panic!("expected dialogue, got {event:?}");
        };
        assert_eq!(dialogue.character.as_deref(), Some("Ling"));
        assert_eq!(dialogue.original_tag, "开心");
        assert_eq!(dialogue.motion_text.as_deref(), Some("waves"));
        assert_eq!(dialogue.audio_file.as_deref(), Some("a.wav"));
        assert!(event.pacing().is_final);
        assert_eq!(event.pacing().hold(), Duration::from_millis(1000));
    }

    #[test]
    fn test_missing_duration_means_no_hold() {
        let event =
            NarrativeEvent::from_payload(EventKind::Narration, json!({"text": "Rain."})).unwrap();
        assert_eq!(event.pacing().duration, -1.0);
        assert_eq!(event.pacing().hold(), Duration::ZERO);
    }

    #[test]
    fn test_negative_and_fractional_durations() {
        let negative = Pacing {
            duration: -250.0,
            is_final: false,
        };
        assert_eq!(negative.hold(), Duration::ZERO);

        let fractional = Pacing {
            duration: 1500.0,
            is_final: false,
        };
        assert_eq!(fractional.hold(), Duration::from_millis(1500));

        let infinite = Pacing {
            duration: f64::INFINITY,
            is_final: false,
        };
        assert_eq!(infinite.hold(), Duration::ZERO);
    }

    #[test]
    fn test_huge_duration_is_capped() {
        let event = NarrativeEvent::from_payload(
            EventKind::Narration,
            json!({"text": "big", "duration": 1e22}),
        )
        .unwrap();
        assert_eq!(event.pacing().hold(), constants::MAX_PRESENTATION_HOLD);
    }

    #[test]
    fn test_null_payload_builds_empty_event() {
        let event =
            NarrativeEvent::from_payload(EventKind::ModifyCharacter, Value::Null).unwrap();
        assert_eq!(
            event,
            NarrativeEvent::ModifyCharacter(ModifyCharacter {
                character: None,
                emotion: None,
                pacing: Pacing::default(),
            })
        );
    }

    #[test]
    fn test_wrong_shape_is_rejected() {
        let err = NarrativeEvent::from_payload(EventKind::Background, json!({"imagePath": 42}))
            .unwrap_err();
        assert!(err.to_string().starts_with("Invalid background payload"));

        assert!(NarrativeEvent::from_payload(EventKind::Narration, json!("text")).is_err());
    }
}
