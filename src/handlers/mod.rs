//! Domain handlers registered with the [`crate::dispatch::Dispatcher`].
//!
//! Handlers turn inbound frames into typed domain values and hand them to
//! the component that owns them. They also own the outbound side of their
//! domain (chat messages, unlock requests).

pub mod achievement;
pub mod script;

pub use achievement::AchievementHandler;
pub use script::ScriptHandler;
