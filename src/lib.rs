//! LingChat client - realtime event pipeline for a chat/visual-novel frontend.
//!
//! This crate keeps a WebSocket connection to the LingChat backend, routes
//! inbound frames by type tag, and turns the stream of script events into an
//! ordered, time-paced presentation applied to the game state. Achievement
//! notifications run through their own one-at-a-time sequencer.
//!
//! # Architecture
//!
//! - **Transport** - Connection lifecycle with bounded reconnection
//! - **Dispatcher** - Type tag to handler routing
//! - **Handlers** - Script and achievement frames to domain values
//! - **Presentation queue** - FIFO, paced application of narrative events
//! - **Achievement sequencer** - At most one visible notification
//! - **Session** - Owns all of the above for one connection
//!
//! # Modules
//!
//! - [`transport`] - Connection state machine and socket traits
//! - [`narrative`] - Narrative events, processors and the presentation queue
//! - [`session`] - Wiring and lifecycle
//! - [`config`] - Configuration loading/saving

// Library modules
pub mod achievement;
pub mod dispatch;
pub mod frame;
pub mod handlers;
pub mod narrative;
pub mod session;
pub mod state;
pub mod transport;
pub mod ws;

pub mod config;
pub mod constants;
pub mod env;

// Re-export commonly used types
pub use config::Config;
pub use dispatch::Dispatcher;
pub use frame::{InboundFrame, OutboundFrame};
pub use narrative::NarrativeEvent;
pub use session::Session;
pub use state::GameState;
pub use transport::{ConnectionState, Transport};
