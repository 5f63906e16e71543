//! Achievement pushes in, unlock requests out.

use serde_json::Value;

use crate::achievement::{AchievementDraft, AchievementSequencer, RemoteUnlock};
use crate::dispatch::Dispatcher;
use crate::frame::{tags, OutboundFrame};
use crate::transport::Transport;

/// Bridges `achievement.*` frames and the [`AchievementSequencer`].
#[derive(Debug, Clone)]
pub struct AchievementHandler {
    sequencer: AchievementSequencer,
    transport: Transport,
}

impl AchievementHandler {
    /// Handler pushing into `sequencer` and sending through `transport`.
    pub fn new(sequencer: AchievementSequencer, transport: Transport) -> Self {
        Self {
            sequencer,
            transport,
        }
    }

    /// Route `achievement.unlocked` pushes to the sequencer.
    pub fn register(&self, dispatcher: &Dispatcher) {
        let sequencer = self.sequencer.clone();
        dispatcher.register(tags::ACHIEVEMENT_UNLOCKED, move |data| {
            push_unlock(&sequencer, data);
        });
    }

    /// Ask the backend to unlock `draft`. Nothing is queued locally; the
    /// backend answers with `achievement.unlocked` if it accepts.
    pub fn notify_backend_unlock(&self, draft: &AchievementDraft) -> bool {
        let data = match serde_json::to_value(draft) {
            Ok(data) => data,
            Err(e) => {
                log::warn!("[Achievement] Cannot encode unlock request: {e}");
                return false;
            }
        };
        self.transport
            .send(&OutboundFrame::data(tags::ACHIEVEMENT_UNLOCK_REQUEST, data))
    }
}

fn push_unlock(sequencer: &AchievementSequencer, data: Value) {
    if data.is_null() {
        log::warn!("[Achievement] Unlock push without data");
        return;
    }
    match serde_json::from_value::<RemoteUnlock>(data) {
        Ok(unlock) => sequencer.push_remote(unlock),
        Err(e) => log::warn!("[Achievement] Malformed unlock push: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::frame::InboundFrame;
    use crate::transport::fake::FakeConnector;
    use crate::transport::TransportSettings;

    fn handler() -> (AchievementHandler, Dispatcher, AchievementSequencer, FakeConnector) {
        let (connector, _listener) = FakeConnector::new();
        let (transport, _channels) =
            Transport::new(Arc::new(connector.clone()), TransportSettings::default());
        let sequencer = AchievementSequencer::spawn();
        let handler = AchievementHandler::new(sequencer.clone(), transport);
        let dispatcher = Dispatcher::new();
        handler.register(&dispatcher);
        (handler, dispatcher, sequencer, connector)
    }

    #[tokio::test(start_paused = true)]
    async fn test_unlocked_frame_shows_achievement() {
        let (_handler, dispatcher, sequencer, _) = handler();
        let mut views = sequencer.subscribe();

        dispatcher.dispatch(InboundFrame::new(
            tags::ACHIEVEMENT_UNLOCKED,
            json!({"id": "ach-1", "title": "First chat", "description": "Said hi", "type": "rare"}),
        ));

        let view = views.wait_for(|v| v.is_visible).await.unwrap().clone();
        let current = view.current.unwrap();
        assert_eq!(current.id, "ach-1");
        assert_eq!(current.message, "Said hi");
        assert_eq!(current.audio_url, "/audio_effects/achievement_rare.wav");
    }

    #[tokio::test(start_paused = true)]
    async fn test_unlocked_frame_without_data_is_ignored() {
        let (_handler, dispatcher, sequencer, _) = handler();

        dispatcher.dispatch(InboundFrame::new(tags::ACHIEVEMENT_UNLOCKED, Value::Null));
        dispatcher.dispatch(InboundFrame::new(tags::ACHIEVEMENT_UNLOCKED, json!("oops")));
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(sequencer.view().current.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_notify_backend_unlock_does_not_queue() {
        let (handler, _dispatcher, sequencer, _) = handler();

        assert!(!handler.notify_backend_unlock(&AchievementDraft::new("First chat", "")));
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(sequencer.view().queued, 0);
        assert!(sequencer.view().current.is_none());
    }
}
