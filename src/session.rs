//! One client session: connection, routing, presentation and achievements.
//!
//! [`Session::start`] builds every component, registers the domain handlers
//! and starts connecting. Dropping the session (or calling
//! [`Session::shutdown`]) closes the connection and stops its tasks.
//!
//! ```text
//! Transport ──frames──► Dispatcher ──► ScriptHandler ──► PresentationQueue ──► GameState
//!     │                      └───────► AchievementHandler ──► AchievementSequencer
//!     └──notices──► notice task (reset status) ──► Session::next_notice
//! ```

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::achievement::{AchievementDraft, AchievementSequencer, AchievementView};
use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::handlers::{AchievementHandler, ScriptHandler};
use crate::narrative::processor::{ProcessorRegistry, StageSignal};
use crate::narrative::queue::{ClearPolicy, PresentationQueue, QueueSnapshot};
use crate::state::{self, GameState, SharedState};
use crate::transport::{ConnectionState, ConnectivityNotice, Connector, Transport};

/// Something the session surfaces to the application.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The renderer should react to a presentation change.
    Signal(StageSignal),
    /// A connectivity problem the user should see.
    Notice(ConnectivityNotice),
}

/// A running client session.
pub struct Session {
    clear_policy: ClearPolicy,
    state: SharedState,
    transport: Transport,
    dispatcher: Dispatcher,
    queue: PresentationQueue,
    sequencer: AchievementSequencer,
    script: ScriptHandler,
    achievements: AchievementHandler,
    signals_rx: mpsc::UnboundedReceiver<StageSignal>,
    notices_rx: mpsc::UnboundedReceiver<ConnectivityNotice>,
    tasks: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("transport", &self.transport)
            .field("dispatcher", &self.dispatcher)
            .field("queue", &self.queue)
            .field("clear_policy", &self.clear_policy)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Wire up every component and start connecting to `url`.
    ///
    /// Must be called within a tokio runtime.
    pub fn start(config: &Config, url: impl Into<String>, connector: Arc<dyn Connector>) -> Self {
        let state = state::shared(GameState::new(config.user_name.clone()));
        let (transport, channels) = Transport::new(connector, config.transport_settings());

        let (signals_tx, signals_rx) = mpsc::unbounded_channel();
        let queue =
            PresentationQueue::spawn(state.clone(), ProcessorRegistry::standard(), signals_tx);
        let sequencer = AchievementSequencer::spawn();

        let dispatcher = Dispatcher::new();
        let script = ScriptHandler::new(queue.clone(), transport.clone(), state.clone());
        script.register(&dispatcher);
        let achievements = AchievementHandler::new(sequencer.clone(), transport.clone());
        achievements.register(&dispatcher);

        let (notices_tx, notices_rx) = mpsc::unbounded_channel();
        let tasks = vec![
            tokio::spawn(dispatcher.clone().run(channels.frames)),
            tokio::spawn(forward_notices(channels.notices, state.clone(), notices_tx)),
        ];

        let url = url.into();
        log::info!("[Session] Starting session for {url}");
        transport.connect(url);

        Self {
            clear_policy: config.clear_policy,
            state,
            transport,
            dispatcher,
            queue,
            sequencer,
            script,
            achievements,
            signals_rx,
            notices_rx,
            tasks,
        }
    }

    /// Registry for extra frame handlers.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Send a chat message. `false` if the backend is not connected.
    pub fn send_message(&self, text: &str) -> bool {
        self.script.send_message(text)
    }

    /// Ask the backend to unlock an achievement.
    pub fn unlock_achievement(&self, draft: &AchievementDraft) -> bool {
        self.achievements.notify_backend_unlock(draft)
    }

    /// Show an achievement unlocked locally. Returns its id.
    pub fn add_achievement(&self, draft: AchievementDraft) -> String {
        self.sequencer.add(draft)
    }

    /// Mark `script_name` as the running script.
    pub fn enter_story_mode(&self, script_name: &str) {
        state::lock(&self.state).enter_story_mode(script_name);
        log::info!("[Session] Entered story mode: {script_name}");
    }

    /// Leave story mode and drop pending narrative with the configured policy.
    pub fn exit_story_mode(&self) {
        state::lock(&self.state).exit_story_mode();
        self.queue.clear(self.clear_policy);
        log::info!("[Session] Left story mode");
    }

    /// Drop pending narrative events.
    pub fn clear_presentation(&self, policy: ClearPolicy) {
        self.queue.clear(policy);
    }

    /// Next signal or notice, whichever comes first.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        tokio::select! {
            Some(signal) = self.signals_rx.recv() => Some(SessionEvent::Signal(signal)),
            Some(notice) = self.notices_rx.recv() => Some(SessionEvent::Notice(notice)),
            else => None,
        }
    }

    /// Next renderer signal; `None` once the presentation task has stopped.
    pub async fn next_signal(&mut self) -> Option<StageSignal> {
        self.signals_rx.recv().await
    }

    /// Signals produced so far (drained).
    pub fn take_signals(&mut self) -> Vec<StageSignal> {
        std::iter::from_fn(|| self.signals_rx.try_recv().ok()).collect()
    }

    /// Next connectivity notice shown to the user.
    pub async fn next_notice(&mut self) -> Option<ConnectivityNotice> {
        self.notices_rx.recv().await
    }

    /// Notices surfaced so far (drained).
    pub fn take_notices(&mut self) -> Vec<ConnectivityNotice> {
        std::iter::from_fn(|| self.notices_rx.try_recv().ok()).collect()
    }

    /// Shared handle to the application state.
    pub fn state(&self) -> SharedState {
        self.state.clone()
    }

    /// Copy of the current application state.
    pub fn snapshot(&self) -> GameState {
        state::lock(&self.state).clone()
    }

    /// Current transport state.
    pub fn connection_state(&self) -> ConnectionState {
        self.transport.state()
    }

    /// Current presentation queue state.
    pub fn queue_snapshot(&self) -> QueueSnapshot {
        self.queue.snapshot()
    }

    /// Current achievement view.
    pub fn achievement_view(&self) -> AchievementView {
        self.sequencer.view()
    }

    /// Receiver that wakes on every achievement view change.
    pub fn subscribe_achievements(&self) -> watch::Receiver<AchievementView> {
        self.sequencer.subscribe()
    }

    /// Close the connection and stop background tasks.
    pub fn shutdown(self) {
        log::info!("[Session] Shutting down");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.transport.close();
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Surface connectivity notices and hand control back to the player.
async fn forward_notices(
    mut notices: mpsc::UnboundedReceiver<ConnectivityNotice>,
    state: SharedState,
    notices_tx: mpsc::UnboundedSender<ConnectivityNotice>,
) {
    while let Some(notice) = notices.recv().await {
        log::warn!("[Session] {} ({})", notice.message, notice.kind);
        state::lock(&state).reset_after_connection_error();
        let _ = notices_tx.send(notice);
    }
}
