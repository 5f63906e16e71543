//! Script frames in, chat messages out.

use serde_json::Value;

use crate::dispatch::Dispatcher;
use crate::frame::{tags, OutboundFrame};
use crate::narrative::queue::PresentationQueue;
use crate::narrative::{EventKind, NarrativeEvent};
use crate::state::{self, GameMessage, SharedState, Status};
use crate::transport::Transport;

/// Feeds `SCRIPT_*` frames into the presentation queue and sends the
/// player's chat messages.
#[derive(Debug, Clone)]
pub struct ScriptHandler {
    queue: PresentationQueue,
    transport: Transport,
    state: SharedState,
}

impl ScriptHandler {
    /// Handler feeding `queue` and sending through `transport`.
    pub fn new(queue: PresentationQueue, transport: Transport, state: SharedState) -> Self {
        Self {
            queue,
            transport,
            state,
        }
    }

    /// Register one handler per narrative frame tag.
    pub fn register(&self, dispatcher: &Dispatcher) {
        for kind in EventKind::ALL {
            let queue = self.queue.clone();
            dispatcher.register(kind.frame_tag(), move |data| {
                enqueue_frame(&queue, kind, data);
            });
        }
    }

    /// Record the player's line and send it to the backend.
    ///
    /// Returns `false` for blank text, which is neither recorded nor sent,
    /// and when the backend is not connected; the status then goes back to
    /// input so the player can retry.
    pub fn send_message(&self, text: &str) -> bool {
        if text.trim().is_empty() {
            log::debug!("[Chat] Ignoring blank message");
            return false;
        }

        {
            let mut state = state::lock(&self.state);
            state.status = Status::Thinking;
            let user_name = state.user_name.clone();
            state.append_message(GameMessage::user(user_name, text));
        }

        let sent = self
            .transport
            .send(&OutboundFrame::content(tags::MESSAGE, text));
        if !sent {
            state::lock(&self.state).status = Status::Input;
        }
        sent
    }
}

fn enqueue_frame(queue: &PresentationQueue, kind: EventKind, data: Value) {
    match NarrativeEvent::from_payload(kind, data) {
        Ok(event) => {
            if !queue.enqueue(event) {
                log::warn!("[Presentation] Queue stopped, dropping {kind} event");
            }
        }
        Err(e) => log::warn!("[Presentation] {e}"),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;
    use tokio::sync::mpsc;

    use super::*;
    use crate::frame::InboundFrame;
    use crate::narrative::processor::{ProcessorRegistry, StageSignal};
    use crate::state::{GameRole, GameState, MessageKind};
    use crate::transport::fake::FakeConnector;
    use crate::transport::{ConnectionState, TransportSettings};

    struct Fixture {
        handler: ScriptHandler,
        dispatcher: Dispatcher,
        state: SharedState,
        signals: mpsc::UnboundedReceiver<StageSignal>,
        transport: Transport,
        connector: FakeConnector,
        listener: crate::transport::fake::FakeListener,
    }

    fn fixture() -> Fixture {
        let mut game = GameState::new("Player");
        game.upsert_role(GameRole::new(1, "Ling"));
        let state = state::shared(game);
        let (signals_tx, signals) = mpsc::unbounded_channel();
        let queue =
            PresentationQueue::spawn(state.clone(), ProcessorRegistry::standard(), signals_tx);
        let (connector, listener) = FakeConnector::new();
        let (transport, _channels) =
            Transport::new(Arc::new(connector.clone()), TransportSettings::default());
        let handler = ScriptHandler::new(queue, transport.clone(), state.clone());
        let dispatcher = Dispatcher::new();
        handler.register(&dispatcher);

        Fixture {
            handler,
            dispatcher,
            state,
            signals,
            transport,
            connector,
            listener,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_registers_every_script_tag() {
        let f = fixture();
        for kind in EventKind::ALL {
            assert!(f.dispatcher.is_registered(kind.frame_tag()));
        }
        assert!(!f.dispatcher.is_registered(tags::ACHIEVEMENT_UNLOCKED));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dialogue_frame_reaches_state() {
        let mut f = fixture();
        f.dispatcher.dispatch(InboundFrame::new(
            tags::SCRIPT_DIALOGUE,
            json!({"message": "hi", "emotion": "neutral", "duration": 1000}),
        ));

        let signal = f.signals.recv().await.unwrap();
        assert!(matches!(signal, StageSignal::LineAppended(_)));

        let state = state::lock(&f.state);
        assert_eq!(state.status, Status::Presenting);
        let line = state.dialog_history.last().unwrap();
        assert_eq!(line.kind, MessageKind::Reply);
        assert_eq!(line.emotion.as_deref(), Some("neutral"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_payload_is_dropped() {
        let mut f = fixture();
        f.dispatcher.dispatch(InboundFrame::new(
            tags::SCRIPT_BACKGROUND,
            json!({"imagePath": ["not", "a", "string"]}),
        ));
        f.dispatcher.dispatch(InboundFrame::new(
            tags::SCRIPT_NARRATION,
            json!({"text": "after"}),
        ));

        let Some(StageSignal::LineAppended(line)) = f.signals.recv().await else {
            panic!("expected narration line");
        };
        assert_eq!(line.content, "after");
        assert!(state::lock(&f.state).scene.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_message_while_disconnected() {
        let f = fixture();

        assert!(!f.handler.send_message("hello"));

        let state = state::lock(&f.state);
        assert_eq!(state.status, Status::Input);
        assert_eq!(state.dialog_history.len(), 1);
        assert_eq!(state.dialog_history[0].kind, MessageKind::Message);
        assert_eq!(f.connector.connect_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_message_when_connected() {
        let mut f = fixture();
        f.transport.connect("ws://fake/ws");
        let mut server = f.listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(f.transport.state(), ConnectionState::Connected);

        assert!(f.handler.send_message("hello"));
        assert_eq!(state::lock(&f.state).status, Status::Thinking);

        let sent: Value = serde_json::from_str(&server.recv_text().await.unwrap()).unwrap();
        assert_eq!(sent, json!({"type": "MESSAGE", "content": "hello"}));
    }

    #[tokio::test(start_paused = true)]
    async fn test_blank_message_is_not_sent() {
        let mut f = fixture();
        f.transport.connect("ws://fake/ws");
        let mut server = f.listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert!(!f.handler.send_message("   "));
        assert!(!f.handler.send_message(""));
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert!(server.try_recv_text().is_none());
        let state = state::lock(&f.state);
        assert_eq!(state.status, Status::Input);
        assert!(state.dialog_history.is_empty());
    }
}
