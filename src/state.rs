//! Application state written by the presentation processors.
//!
//! The client owns one [`GameState`] behind a [`SharedState`] handle. The
//! presentation loop, the script handler and the session all lock it briefly
//! to apply changes; nothing holds the lock across an await point.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};

use crate::constants;

/// Where the conversation currently is, from the player's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Status {
    /// Waiting for the player to type.
    #[default]
    Input,
    /// Message sent, waiting for the backend.
    Thinking,
    /// Backend is streaming a reply.
    Responding,
    /// Narrative events are being shown.
    Presenting,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Input => "input",
            Self::Thinking => "thinking",
            Self::Responding => "responding",
            Self::Presenting => "presenting",
        };
        f.write_str(name)
    }
}

/// Kind of a dialog history line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Authored by the player.
    Message,
    /// Spoken by a character.
    Reply,
    /// Narration between lines.
    Narration,
}

/// One line of dialog history.
#[derive(Debug, Clone, PartialEq)]
pub struct GameMessage {
    /// Who or what produced the line.
    pub kind: MessageKind,
    /// Speaker name shown next to the line.
    pub display_name: String,
    /// Line text.
    pub content: String,
    /// Emotion label the renderer should show.
    pub emotion: Option<String>,
    /// Voice clip for the line.
    pub audio_file: Option<String>,
    /// Whether this line ends the speaker's turn.
    pub is_final: bool,
    /// Stage direction accompanying the line.
    pub motion_text: Option<String>,
    /// Emotion tag as the model wrote it, before classification.
    pub original_tag: Option<String>,
    /// When the line entered the history.
    pub timestamp: DateTime<Utc>,
}

impl GameMessage {
    fn bare(kind: MessageKind, display_name: String, content: String) -> Self {
        Self {
            kind,
            display_name,
            content,
            emotion: None,
            audio_file: None,
            is_final: false,
            motion_text: None,
            original_tag: None,
            timestamp: Utc::now(),
        }
    }

    /// Line typed or spoken by the player.
    pub fn user(display_name: impl Into<String>, content: impl Into<String>) -> Self {
        Self::bare(MessageKind::Message, display_name.into(), content.into())
    }

    /// Line spoken by a character.
    pub fn reply(display_name: impl Into<String>, content: impl Into<String>) -> Self {
        Self::bare(MessageKind::Reply, display_name.into(), content.into())
    }

    /// Narration line; narration has no speaker.
    pub fn narration(content: impl Into<String>) -> Self {
        Self::bare(MessageKind::Narration, String::new(), content.into())
    }
}

/// A character the client knows about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameRole {
    /// Backend role id.
    pub role_id: i64,
    /// Display name; script events address roles by this name.
    pub role_name: String,
    /// Subtitle shown under the name.
    pub role_subtitle: String,
    /// Emotion currently shown.
    pub emotion: String,
    /// Emotion the role started with.
    pub original_emotion: String,
    /// Whether the role is drawn on stage.
    pub show: bool,
}

impl GameRole {
    /// Role with the default emotion.
    pub fn new(role_id: i64, role_name: impl Into<String>) -> Self {
        Self {
            role_id,
            role_name: role_name.into(),
            role_subtitle: String::new(),
            emotion: constants::DEFAULT_EMOTION.to_string(),
            original_emotion: constants::DEFAULT_EMOTION.to_string(),
            show: true,
        }
    }
}

/// Script currently running in story mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptInfo {
    /// Script name.
    pub script_name: String,
    /// Chapter currently playing.
    pub current_chapter_name: String,
    /// Whether the script is running.
    pub is_running: bool,
}

/// Background currently on stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SceneState {
    /// Background image path.
    pub image_path: String,
    /// Transition effect name.
    pub transition: Option<String>,
}

/// Everything the presentation layer reads.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GameState {
    /// Story mode script, `None` in free chat.
    pub running_script: Option<ScriptInfo>,
    /// Known roles keyed by role id.
    pub roles: BTreeMap<i64, GameRole>,
    /// Roles on stage, in the order they appeared.
    pub present_role_ids: Vec<i64>,
    /// The main companion role.
    pub main_role_id: Option<i64>,
    /// Role the player is talking to.
    pub current_interact_role_id: Option<i64>,
    /// Character named by the latest modify event, even if unknown.
    pub present_character: Option<String>,
    /// Player display name.
    pub user_name: String,
    /// Line being typed or streamed.
    pub current_line: String,
    /// Conversation status.
    pub status: Status,
    /// Ordered dialog history.
    pub dialog_history: Vec<GameMessage>,
    /// Current background.
    pub scene: Option<SceneState>,
}

impl GameState {
    /// Empty state for `user_name`.
    pub fn new(user_name: impl Into<String>) -> Self {
        Self {
            user_name: user_name.into(),
            ..Self::default()
        }
    }

    /// Append a line to the history.
    pub fn append_message(&mut self, message: GameMessage) {
        self.dialog_history.push(message);
    }

    /// Drop the whole history.
    pub fn clear_dialog_history(&mut self) {
        self.dialog_history.clear();
    }

    /// Insert or replace a role. The first role becomes the main role.
    pub fn upsert_role(&mut self, role: GameRole) {
        let role_id = role.role_id;
        self.roles.insert(role_id, role);
        if self.main_role_id.is_none() {
            self.main_role_id = Some(role_id);
            self.current_interact_role_id = Some(role_id);
            self.mark_present(role_id);
        }
    }

    /// Role whose display name is `name`.
    pub fn role_id_by_name(&self, name: &str) -> Option<i64> {
        self.roles
            .values()
            .find(|role| role.role_name == name)
            .map(|role| role.role_id)
    }

    /// Put a role on stage (no-op if already present).
    pub fn mark_present(&mut self, role_id: i64) {
        if !self.present_role_ids.contains(&role_id) {
            self.present_role_ids.push(role_id);
        }
    }

    /// Name of the role the player is talking to.
    pub fn interacting_role_name(&self) -> Option<&str> {
        self.current_interact_role_id
            .and_then(|id| self.roles.get(&id))
            .map(|role| role.role_name.as_str())
    }

    /// Enter story mode for `script_name`.
    pub fn enter_story_mode(&mut self, script_name: impl Into<String>) {
        self.running_script = Some(ScriptInfo {
            script_name: script_name.into(),
            current_chapter_name: String::new(),
            is_running: true,
        });
    }

    /// Return to free chat.
    pub fn exit_story_mode(&mut self) {
        self.running_script = None;
    }

    /// Whether a script is running.
    pub fn in_story_mode(&self) -> bool {
        self.running_script.is_some()
    }

    /// Return control to the player after a connectivity error.
    pub fn reset_after_connection_error(&mut self) {
        self.status = Status::Input;
        self.current_line.clear();
    }
}

/// Shared handle to the application state.
pub type SharedState = Arc<Mutex<GameState>>;

/// Wrap a state for sharing.
pub fn shared(state: GameState) -> SharedState {
    Arc::new(Mutex::new(state))
}

/// Lock the shared state, recovering from poisoning.
pub fn lock(state: &SharedState) -> MutexGuard<'_, GameState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_role_becomes_main_and_present() {
        let mut state = GameState::new("Player");
        state.upsert_role(GameRole::new(7, "Ling"));
        state.upsert_role(GameRole::new(9, "Feng"));

        assert_eq!(state.main_role_id, Some(7));
        assert_eq!(state.current_interact_role_id, Some(7));
        assert_eq!(state.present_role_ids, vec![7]);
        assert_eq!(state.interacting_role_name(), Some("Ling"));
        assert_eq!(state.role_id_by_name("Feng"), Some(9));
        assert_eq!(state.role_id_by_name("Nobody"), None);
    }

    #[test]
    fn test_mark_present_is_idempotent() {
        let mut state = GameState::default();
        state.mark_present(1);
        state.mark_present(1);
        state.mark_present(2);
        assert_eq!(state.present_role_ids, vec![1, 2]);
    }

    #[test]
    fn test_story_mode_round_trip() {
        let mut state = GameState::default();
        assert!(!state.in_story_mode());
        state.enter_story_mode("prologue");
        assert_eq!(
            state.running_script.as_ref().map(|s| s.script_name.as_str()),
            Some("prologue")
        );
        state.exit_story_mode();
        assert!(!state.in_story_mode());
    }

    #[test]
    fn test_reset_after_connection_error() {
        let mut state = GameState::default();
        state.status = Status::Thinking;
        state.current_line = "half a sent".to_string();
        state.reset_after_connection_error();
        assert_eq!(state.status, Status::Input);
        assert!(state.current_line.is_empty());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(Status::Presenting.to_string(), "presenting");
        assert_eq!(Status::default(), Status::Input);
    }
}
