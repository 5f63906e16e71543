//! Ordered, time-paced presentation of narrative events.
//!
//! A single task owns the pending events and runs an explicit state machine:
//!
//! ```text
//!   Idle ──enqueue──► Presenting ──hold > 0──► Holding ──deadline──► Presenting/Idle
//!                         │                       │
//!                         └──hold = 0, queue empty┴──clear(Abort)──► Idle
//! ```
//!
//! Producers talk to the task over an unbounded channel, so
//! [`PresentationQueue::enqueue`] never blocks and events are presented in
//! exactly the order they were enqueued, one at a time.

use std::collections::VecDeque;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};

use super::processor::{Hold, ProcessOutcome, ProcessorRegistry, StageSignal};
use super::NarrativeEvent;
use crate::state::{self, SharedState};

/// What `clear` does with the event currently being held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClearPolicy {
    /// Cut the in-flight hold short.
    #[default]
    Abort,
    /// Let the in-flight hold run out.
    Drain,
}

impl std::fmt::Display for ClearPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Abort => write!(f, "abort"),
            Self::Drain => write!(f, "drain"),
        }
    }
}

impl FromStr for ClearPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "abort" => Ok(Self::Abort),
            "drain" => Ok(Self::Drain),
            other => Err(format!("unknown clear policy '{other}' (expected abort or drain)")),
        }
    }
}

/// Where the presentation loop is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueuePhase {
    /// Nothing pending, nothing held.
    #[default]
    Idle,
    /// Applying an event to the state.
    Presenting,
    /// Waiting out the last event's duration.
    Holding,
}

/// Observable state of the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueSnapshot {
    /// Where the loop is.
    pub phase: QueuePhase,
    /// Events waiting behind the current one.
    pub pending: usize,
    /// Events taken off the queue so far, applied or dropped.
    pub presented: u64,
}

enum Command {
    Enqueue(NarrativeEvent),
    Clear(ClearPolicy),
}

/// Handle to the presentation task.
#[derive(Clone)]
pub struct PresentationQueue {
    commands_tx: mpsc::UnboundedSender<Command>,
    snapshot_rx: watch::Receiver<QueueSnapshot>,
}

impl std::fmt::Debug for PresentationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PresentationQueue")
            .field("snapshot", &*self.snapshot_rx.borrow())
            .finish_non_exhaustive()
    }
}

impl PresentationQueue {
    /// Spawn the presentation task. Must be called within a tokio runtime.
    ///
    /// The task stops once every handle has been dropped.
    pub fn spawn(
        state: SharedState,
        registry: ProcessorRegistry,
        signals_tx: mpsc::UnboundedSender<StageSignal>,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(QueueSnapshot::default());

        tokio::spawn(run_presentation_loop(
            commands_rx,
            PresentationLoop {
                state,
                registry,
                signals_tx,
                snapshot_tx,
            },
        ));

        Self {
            commands_tx,
            snapshot_rx,
        }
    }

    /// Append an event. Returns `false` if the task has stopped.
    pub fn enqueue(&self, event: NarrativeEvent) -> bool {
        self.commands_tx.send(Command::Enqueue(event)).is_ok()
    }

    /// Drop every pending event; `policy` decides the in-flight hold.
    pub fn clear(&self, policy: ClearPolicy) -> bool {
        self.commands_tx.send(Command::Clear(policy)).is_ok()
    }

    /// Latest published state of the queue.
    pub fn snapshot(&self) -> QueueSnapshot {
        *self.snapshot_rx.borrow()
    }

    /// Receiver that wakes on every published change.
    pub fn subscribe(&self) -> watch::Receiver<QueueSnapshot> {
        self.snapshot_rx.clone()
    }
}

struct PresentationLoop {
    state: SharedState,
    registry: ProcessorRegistry,
    signals_tx: mpsc::UnboundedSender<StageSignal>,
    snapshot_tx: watch::Sender<QueueSnapshot>,
}

impl PresentationLoop {
    fn publish(&self, phase: QueuePhase, pending: usize, presented: u64) {
        self.snapshot_tx.send_replace(QueueSnapshot {
            phase,
            pending,
            presented,
        });
    }

    /// Apply one event and return the hold deadline, if any.
    fn present(&self, event: &NarrativeEvent) -> Option<Instant> {
        let (outcome, signals) = {
            let mut state = state::lock(&self.state);
            self.registry.process(event, &mut state)
        };
        for signal in signals {
            let _ = self.signals_tx.send(signal);
        }

        match outcome {
            ProcessOutcome::Applied(Hold::Full) => {
                let hold = event.pacing().hold();
                log::debug!("[Presentation] Presented {} (hold {hold:?})", event.kind());
                if hold.is_zero() {
                    return None;
                }
                let deadline = Instant::now().checked_add(hold);
                if deadline.is_none() {
                    log::warn!("[Presentation] Hold {hold:?} out of range, not holding");
                }
                deadline
            }
            ProcessOutcome::Applied(Hold::Skip) => {
                log::debug!("[Presentation] Presented {} (no hold)", event.kind());
                None
            }
            ProcessOutcome::Dropped(reason) => {
                log::warn!("[Presentation] Dropped {} event: {reason}", event.kind());
                None
            }
        }
    }
}

async fn run_presentation_loop(
    mut commands_rx: mpsc::UnboundedReceiver<Command>,
    stage: PresentationLoop,
) {
    let mut pending: VecDeque<NarrativeEvent> = VecDeque::new();
    let mut hold_until: Option<Instant> = None;
    let mut presented: u64 = 0;

    loop {
        while hold_until.is_none() {
            let Some(event) = pending.pop_front() else {
                break;
            };
            stage.publish(QueuePhase::Presenting, pending.len(), presented);
            hold_until = stage.present(&event);
            presented += 1;
        }

        let phase = if hold_until.is_some() {
            QueuePhase::Holding
        } else {
            QueuePhase::Idle
        };
        stage.publish(phase, pending.len(), presented);

        let command = match hold_until {
            Some(deadline) => tokio::select! {
                () = sleep_until(deadline) => {
                    hold_until = None;
                    continue;
                }
                command = commands_rx.recv() => command,
            },
            None => commands_rx.recv().await,
        };

        match command {
            Some(Command::Enqueue(event)) => pending.push_back(event),
            Some(Command::Clear(policy)) => {
                let dropped = pending.len();
                pending.clear();
                if policy == ClearPolicy::Abort {
                    hold_until = None;
                }
                log::info!("[Presentation] Cleared {dropped} pending event(s) ({policy})");
            }
            None => break,
        }
    }

    log::debug!("[Presentation] Queue stopped");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::constants;
    use crate::narrative::{Narration, Pacing};
    use crate::state::{GameMessage, GameState};

    fn narration(text: &str, duration: f64) -> NarrativeEvent {
        NarrativeEvent::Narration(Narration {
            text: text.to_string(),
            scene_id: None,
            pacing: Pacing {
                duration,
                is_final: false,
            },
        })
    }

    fn spawn_queue() -> (
        PresentationQueue,
        SharedState,
        mpsc::UnboundedReceiver<StageSignal>,
    ) {
        let state = state::shared(GameState::new("Player"));
        let (signals_tx, signals_rx) = mpsc::unbounded_channel();
        let queue =
            PresentationQueue::spawn(state.clone(), ProcessorRegistry::standard(), signals_tx);
        (queue, state, signals_rx)
    }

    async fn next_line(signals: &mut mpsc::UnboundedReceiver<StageSignal>) -> GameMessage {
        loop {
            match signals.recv().await {
                Some(StageSignal::LineAppended(line)) => return line,
                Some(_) => continue,
                None => panic!("presentation queue stopped"),
            }
        }
    }

    #[test]
    fn test_clear_policy_parsing() {
        assert_eq!("abort".parse::<ClearPolicy>().unwrap(), ClearPolicy::Abort);
        assert_eq!(" Drain ".parse::<ClearPolicy>().unwrap(), ClearPolicy::Drain);
        assert!("later".parse::<ClearPolicy>().is_err());
        assert_eq!(ClearPolicy::default(), ClearPolicy::Abort);
        assert_eq!(
            serde_json::to_string(&ClearPolicy::Drain).unwrap(),
            "\"drain\""
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_presented_in_order_with_pacing() {
        let (queue, state, mut signals) = spawn_queue();
        let start = Instant::now();

        assert!(queue.enqueue(narration("one", 1000.0)));
        assert!(queue.enqueue(narration("two", -1.0)));
        assert!(queue.enqueue(narration("three", 500.0)));
        assert!(queue.enqueue(narration("four", 0.0)));

        assert_eq!(next_line(&mut signals).await.content, "one");
        assert!(start.elapsed() < Duration::from_millis(1000));

        assert_eq!(next_line(&mut signals).await.content, "two");
        assert!(start.elapsed() >= Duration::from_millis(1000));

        assert_eq!(next_line(&mut signals).await.content, "three");
        assert!(start.elapsed() < Duration::from_millis(1100));

        assert_eq!(next_line(&mut signals).await.content, "four");
        assert!(start.elapsed() >= Duration::from_millis(1500));

        let contents: Vec<_> = state::lock(&state)
            .dialog_history
            .iter()
            .map(|m| m.content.clone())
            .collect();
        assert_eq!(contents, vec!["one", "two", "three", "four"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_duration_does_not_stop_queue() {
        let (queue, _state, mut signals) = spawn_queue();
        let start = Instant::now();

        queue.enqueue(narration("big", 1e22));
        queue.enqueue(narration("after", -1.0));

        assert_eq!(next_line(&mut signals).await.content, "big");
        assert_eq!(next_line(&mut signals).await.content, "after");
        assert!(start.elapsed() >= constants::MAX_PRESENTATION_HOLD);

        queue.enqueue(narration("huge again", 1e22));
        assert_eq!(next_line(&mut signals).await.content, "huge again");
        assert!(queue.clear(ClearPolicy::Abort));
        assert!(queue.enqueue(narration("later", -1.0)));
        assert_eq!(next_line(&mut signals).await.content, "later");
    }

    #[tokio::test(start_paused = true)]
    async fn test_enqueue_during_hold_waits_for_hold() {
        let (queue, _state, mut signals) = spawn_queue();
        let start = Instant::now();

        queue.enqueue(narration("first", 2000.0));
        assert_eq!(next_line(&mut signals).await.content, "first");

        tokio::time::sleep(Duration::from_millis(500)).await;
        queue.enqueue(narration("second", -1.0));
        assert_eq!(next_line(&mut signals).await.content, "second");
        assert!(start.elapsed() >= Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_abort_cuts_hold_and_drops_pending() {
        let (queue, _state, mut signals) = spawn_queue();
        let start = Instant::now();

        queue.enqueue(narration("a", 1000.0));
        queue.enqueue(narration("b", 1000.0));
        assert_eq!(next_line(&mut signals).await.content, "a");

        queue.clear(ClearPolicy::Abort);
        queue.enqueue(narration("c", -1.0));

        assert_eq!(next_line(&mut signals).await.content, "c");
        assert!(start.elapsed() < Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_drain_finishes_hold_and_drops_pending() {
        let (queue, _state, mut signals) = spawn_queue();
        let start = Instant::now();

        queue.enqueue(narration("a", 1000.0));
        queue.enqueue(narration("b", 1000.0));
        assert_eq!(next_line(&mut signals).await.content, "a");

        queue.clear(ClearPolicy::Drain);
        queue.enqueue(narration("c", -1.0));

        assert_eq!(next_line(&mut signals).await.content, "c");
        assert!(start.elapsed() >= Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_settles_to_idle() {
        let (queue, _state, mut signals) = spawn_queue();

        queue.enqueue(narration("x", 300.0));
        next_line(&mut signals).await;
        assert_eq!(queue.snapshot().phase, QueuePhase::Holding);

        let mut snapshots = queue.subscribe();
        snapshots
            .wait_for(|s| s.phase == QueuePhase::Idle)
            .await
            .unwrap();
        assert_eq!(
            queue.snapshot(),
            QueueSnapshot {
                phase: QueuePhase::Idle,
                pending: 0,
                presented: 1,
            }
        );
    }
}
