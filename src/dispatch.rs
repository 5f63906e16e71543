//! Routes inbound frames to handlers by type tag.
//!
//! Each tag maps to at most one handler; registering a tag again replaces
//! the previous handler. Handlers are synchronous and must not block: they
//! hand work off to a queue or sequencer and return.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;
use tokio::sync::mpsc;

use crate::frame::InboundFrame;

/// Callback invoked with a frame's `data`.
pub type FrameHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// Result of dispatching one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A handler ran.
    Handled,
    /// No handler for the tag; the frame was dropped.
    Unhandled,
}

/// Type-tag to handler registry.
///
/// Cheap to clone; clones share the same registry.
#[derive(Clone, Default)]
pub struct Dispatcher {
    handlers: Arc<RwLock<HashMap<String, FrameHandler>>>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        let mut tags: Vec<_> = handlers.keys().collect();
        tags.sort();
        f.debug_struct("Dispatcher").field("tags", &tags).finish()
    }
}

impl Dispatcher {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `tag`, replacing any previous handler.
    pub fn register<F>(&self, tag: impl Into<String>, handler: F)
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        let tag = tag.into();
        let replaced = self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(tag.clone(), Arc::new(handler))
            .is_some();
        if replaced {
            log::debug!("[Dispatch] Replaced handler for '{tag}'");
        }
    }

    /// Remove the handler for `tag`. Returns whether one was registered.
    pub fn unregister(&self, tag: &str) -> bool {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(tag)
            .is_some()
    }

    /// Whether `tag` has a handler.
    pub fn is_registered(&self, tag: &str) -> bool {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(tag)
    }

    /// Invoke the handler for `frame.kind` with `frame.data`.
    pub fn dispatch(&self, frame: InboundFrame) -> DispatchOutcome {
        // Clone the handler out so it runs without the lock held; a handler
        // may register or unregister tags itself.
        let handler = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&frame.kind)
            .cloned();

        match handler {
            Some(handler) => {
                log::trace!("[Dispatch] Routing '{}'", frame.kind);
                handler(frame.data);
                DispatchOutcome::Handled
            }
            None => {
                log::warn!("[Dispatch] No handler for '{}', dropping frame", frame.kind);
                DispatchOutcome::Unhandled
            }
        }
    }

    /// Dispatch frames from `frames` in arrival order until the channel closes.
    pub async fn run(self, mut frames: mpsc::UnboundedReceiver<InboundFrame>) {
        while let Some(frame) = frames.recv().await {
            self.dispatch(frame);
        }
        log::debug!("[Dispatch] Frame channel closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    fn recorder() -> (Arc<Mutex<Vec<Value>>>, impl Fn(Value) + Send + Sync + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |data| sink.lock().unwrap().push(data))
    }

    #[test]
    fn test_dispatch_passes_data_to_handler() {
        let dispatcher = Dispatcher::new();
        let (seen, handler) = recorder();
        dispatcher.register("SCRIPT_NARRATION", handler);

        let outcome = dispatcher.dispatch(InboundFrame::new("SCRIPT_NARRATION", json!({"text": "a"})));

        assert_eq!(outcome, DispatchOutcome::Handled);
        assert_eq!(*seen.lock().unwrap(), vec![json!({"text": "a"})]);
    }

    #[test]
    fn test_unknown_tag_is_dropped() {
        let dispatcher = Dispatcher::new();
        assert_eq!(
            dispatcher.dispatch(InboundFrame::new("mystery", Value::Null)),
            DispatchOutcome::Unhandled
        );
    }

    #[test]
    fn test_last_registration_wins() {
        let dispatcher = Dispatcher::new();
        let (first, first_handler) = recorder();
        let (second, second_handler) = recorder();
        dispatcher.register("tag", first_handler);
        dispatcher.register("tag", second_handler);

        dispatcher.dispatch(InboundFrame::new("tag", json!(1)));

        assert!(first.lock().unwrap().is_empty());
        assert_eq!(second.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_unregister() {
        let dispatcher = Dispatcher::new();
        let (_, handler) = recorder();
        dispatcher.register("tag", handler);
        assert!(dispatcher.is_registered("tag"));

        assert!(dispatcher.unregister("tag"));
        assert!(!dispatcher.unregister("tag"));
        assert_eq!(
            dispatcher.dispatch(InboundFrame::new("tag", Value::Null)),
            DispatchOutcome::Unhandled
        );
    }

    #[test]
    fn test_handler_may_reenter_registry() {
        let dispatcher = Dispatcher::new();
        let inner = dispatcher.clone();
        dispatcher.register("once", move |_| {
            inner.unregister("once");
        });

        assert_eq!(
            dispatcher.dispatch(InboundFrame::new("once", Value::Null)),
            DispatchOutcome::Handled
        );
        assert!(!dispatcher.is_registered("once"));
    }

    #[tokio::test]
    async fn test_run_preserves_arrival_order() {
        let dispatcher = Dispatcher::new();
        let (seen, handler) = recorder();
        dispatcher.register("n", handler);

        let (tx, rx) = mpsc::unbounded_channel();
        for i in 0..5 {
            tx.send(InboundFrame::new("n", json!(i))).unwrap();
        }
        drop(tx);
        dispatcher.run(rx).await;

        assert_eq!(
            *seen.lock().unwrap(),
            (0..5).map(|i| json!(i)).collect::<Vec<_>>()
        );
    }
}
