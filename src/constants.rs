//! Application-wide constants for the LingChat client pipeline.
//!
//! This module centralizes the timing and wire constants shared by the
//! transport, the presentation queue and the achievement sequencer.
//!
//! # Categories
//!
//! - **Connection**: reconnect bounds and the startup grace window
//! - **Presentation**: narrative pacing bounds
//! - **Achievements**: display pacing and default media
//! - **Endpoint**: backend address defaults
//! - **User-facing text**: connectivity notices

use std::time::Duration;

// ============================================================================
// Connection
// ============================================================================

/// Maximum number of automatic reconnect attempts before giving up.
///
/// The counter resets every time a connection opens successfully.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Fixed delay between an unexpected close and the next connect attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(3000);

/// Startup window during which connectivity errors are not surfaced.
///
/// Only applies while no connection has ever succeeded. Avoids false alarms
/// when the frontend starts a moment before the backend is listening.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_millis(3000);

// ============================================================================
// Presentation
// ============================================================================

/// Longest hold a single narrative event may request.
///
/// Longer durations are clamped so one event cannot stall the story.
pub const MAX_PRESENTATION_HOLD: Duration = Duration::from_secs(10 * 60);

// ============================================================================
// Achievements
// ============================================================================

/// How long an achievement stays visible when it declares no duration.
pub const ACHIEVEMENT_DEFAULT_DURATION: Duration = Duration::from_millis(3500);

/// Gap between hiding an achievement and promoting the next one.
///
/// Leaves room for the renderer's exit animation.
pub const ACHIEVEMENT_SETTLE_GAP: Duration = Duration::from_millis(500);

/// Number of shown achievement ids remembered for duplicate detection.
///
/// Older ids are forgotten first; a push for a forgotten id shows again.
pub const ACHIEVEMENT_SHOWN_HISTORY: usize = 256;

/// Default sound for common achievements.
pub const ACHIEVEMENT_COMMON_AUDIO: &str = "/audio_effects/achievement_common.wav";

/// Default sound for rare achievements.
pub const ACHIEVEMENT_RARE_AUDIO: &str = "/audio_effects/achievement_rare.wav";

// ============================================================================
// Endpoint
// ============================================================================

/// Backend host used in development when nothing else is configured.
pub const DEFAULT_BACKEND_BIND_ADDR: &str = "localhost";

/// Backend port used in development when nothing else is configured.
pub const DEFAULT_BACKEND_PORT: u16 = 8764;

/// Origin used in production when nothing else is configured.
pub const DEFAULT_PRODUCTION_ORIGIN: &str = "http://localhost:8764";

/// Path of the WebSocket endpoint on the backend.
pub const WEBSOCKET_PATH: &str = "/ws";

// ============================================================================
// User-facing text
// ============================================================================

/// Shown when the connection drops or cannot be established.
pub const MSG_CANNOT_REACH_SERVER: &str = "Cannot reach the server";

/// Shown when a send is attempted without a live connection.
pub const MSG_BACKEND_NOT_CONNECTED: &str =
    "Backend is not connected, please start the backend service";

/// Shown once automatic reconnection has been given up.
pub const MSG_RECONNECT_EXHAUSTED: &str =
    "Cannot reach the server. Automatic reconnection has stopped";

/// Emotion assigned to roles before any event changes it.
pub const DEFAULT_EMOTION: &str = "neutral";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settle_gap_shorter_than_default_duration() {
        assert!(ACHIEVEMENT_SETTLE_GAP < ACHIEVEMENT_DEFAULT_DURATION);
    }

    #[test]
    fn test_presentation_hold_cap_exceeds_default_achievement() {
        assert!(MAX_PRESENTATION_HOLD > ACHIEVEMENT_DEFAULT_DURATION);
    }

    #[test]
    fn test_websocket_path_is_absolute() {
        assert!(WEBSOCKET_PATH.starts_with('/'));
    }
}
