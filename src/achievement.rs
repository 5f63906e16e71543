//! Achievement notifications, shown one at a time.
//!
//! Achievements arrive from local unlocks ([`AchievementSequencer::add`])
//! or backend pushes ([`AchievementSequencer::push_remote`]). Each is queued,
//! shown for its duration, hidden, and cleared after a short settle gap
//! before the next one is promoted. The bookkeeping lives in the pure
//! [`AchievementBoard`]; the sequencer task drives it with timers.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};

use crate::constants;

/// Rarity of an achievement; selects the default sound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AchievementKind {
    /// A regular milestone.
    #[default]
    Common,
    /// A hard-to-get milestone with its own sound.
    Rare,
}

impl AchievementKind {
    /// Sound played when no `audio_url` is given.
    pub fn default_audio(self) -> &'static str {
        match self {
            Self::Common => constants::ACHIEVEMENT_COMMON_AUDIO,
            Self::Rare => constants::ACHIEVEMENT_RARE_AUDIO,
        }
    }
}

/// An achievement without an id, as unlocked locally or sent to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AchievementDraft {
    /// Headline shown to the player.
    pub title: String,
    /// Body text.
    #[serde(default)]
    pub message: String,
    /// Rarity.
    #[serde(rename = "type", default)]
    pub kind: AchievementKind,
    /// Optional icon.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub img_url: Option<String>,
    /// Sound override; empty means the rarity's default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    /// Display time in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
}

impl AchievementDraft {
    /// Draft with default rarity, media and duration.
    pub fn new(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            ..Self::default()
        }
    }
}

/// A queued or shown achievement with defaults applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Achievement {
    /// Backend id, or a generated UUID for local unlocks.
    pub id: String,
    /// Headline shown to the player.
    pub title: String,
    /// Body text.
    pub message: String,
    /// Rarity.
    pub kind: AchievementKind,
    /// Optional icon.
    pub img_url: Option<String>,
    /// Sound to play.
    pub audio_url: String,
    /// How long it stays visible.
    pub duration: Duration,
}

impl Achievement {
    /// Fill in default duration and sound. A zero duration means default.
    pub fn from_draft(id: impl Into<String>, draft: AchievementDraft) -> Self {
        let duration = match draft.duration {
            Some(ms) if ms > 0 => Duration::from_millis(ms),
            _ => constants::ACHIEVEMENT_DEFAULT_DURATION,
        };
        let audio_url = draft
            .audio_url
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| draft.kind.default_audio().to_string());

        Self {
            id: id.into(),
            title: draft.title,
            message: draft.message,
            kind: draft.kind,
            img_url: draft.img_url,
            audio_url,
            duration,
        }
    }
}

/// Payload of an `achievement.unlocked` push.
///
/// The backend may send the text as `description` instead of `message`.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteUnlock {
    /// Backend id; missing or empty means a fresh local id.
    pub id: Option<String>,
    /// Headline shown to the player.
    #[serde(default)]
    pub title: String,
    /// Body text.
    pub message: Option<String>,
    /// Body text under its older name; used when `message` is absent.
    pub description: Option<String>,
    /// Rarity.
    #[serde(rename = "type", default)]
    pub kind: AchievementKind,
    /// Optional icon.
    pub img_url: Option<String>,
    /// Sound override.
    pub audio_url: Option<String>,
    /// Milliseconds; the backend sends floats.
    pub duration: Option<f64>,
    /// Show again even if this id was already shown.
    #[serde(default)]
    pub requeue: bool,
}

impl RemoteUnlock {
    /// Split into the backend id (if any) and a draft.
    pub fn into_parts(self) -> (Option<String>, AchievementDraft) {
        let id = self.id.filter(|id| !id.is_empty());
        let duration = self
            .duration
            .filter(|ms| ms.is_finite() && *ms > 0.0)
            .map(|ms| ms.round() as u64);
        let draft = AchievementDraft {
            title: self.title,
            message: self.message.or(self.description).unwrap_or_default(),
            kind: self.kind,
            img_url: self.img_url,
            audio_url: self.audio_url,
            duration,
        };
        (id, draft)
    }
}

/// Result of pushing onto the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Appended to the queue.
    Queued,
    /// Replaced a queued entry with the same id.
    Merged,
    /// Already shown (or showing); ignored.
    Duplicate,
}

/// What the renderer sees.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AchievementView {
    /// Achievement occupying the slot, visible or settling.
    pub current: Option<Achievement>,
    /// Whether it is on screen.
    pub is_visible: bool,
    /// Achievements waiting for the slot.
    pub queued: usize,
}

/// Queue, current slot and history of shown ids.
///
/// The history keeps the last [`constants::ACHIEVEMENT_SHOWN_HISTORY`] ids.
#[derive(Debug, Default)]
pub struct AchievementBoard {
    queue: VecDeque<Achievement>,
    current: Option<Achievement>,
    is_visible: bool,
    shown: HashSet<String>,
    shown_order: VecDeque<String>,
}

impl AchievementBoard {
    /// Empty board.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `achievement`, merging or dropping on id collisions.
    pub fn push(&mut self, achievement: Achievement, requeue: bool) -> PushOutcome {
        if let Some(slot) = self.queue.iter_mut().find(|a| a.id == achievement.id) {
            *slot = achievement;
            return PushOutcome::Merged;
        }

        let showing = self
            .current
            .as_ref()
            .is_some_and(|current| current.id == achievement.id);
        if !requeue && (showing || self.shown.contains(&achievement.id)) {
            return PushOutcome::Duplicate;
        }

        self.queue.push_back(achievement);
        PushOutcome::Queued
    }

    /// Promote the head of the queue if the slot is free.
    pub fn promote(&mut self) -> Option<&Achievement> {
        if self.current.is_some() {
            return None;
        }
        let next = self.queue.pop_front()?;
        self.remember_shown(&next.id);
        self.is_visible = true;
        self.current = Some(next);
        self.current.as_ref()
    }

    fn remember_shown(&mut self, id: &str) {
        if !self.shown.insert(id.to_string()) {
            return;
        }
        self.shown_order.push_back(id.to_string());
        while self.shown_order.len() > constants::ACHIEVEMENT_SHOWN_HISTORY {
            if let Some(oldest) = self.shown_order.pop_front() {
                self.shown.remove(&oldest);
            }
        }
    }

    /// Hide the current achievement. Returns `false` if nothing was visible.
    pub fn hide(&mut self) -> bool {
        std::mem::replace(&mut self.is_visible, false)
    }

    /// Free the slot after the settle gap.
    pub fn settle(&mut self) {
        self.is_visible = false;
        self.current = None;
    }

    /// Achievement occupying the slot.
    pub fn current(&self) -> Option<&Achievement> {
        self.current.as_ref()
    }

    /// Whether the current achievement is on screen.
    pub fn is_visible(&self) -> bool {
        self.is_visible
    }

    /// Number of queued achievements.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Copy of what the renderer should show.
    pub fn view(&self) -> AchievementView {
        AchievementView {
            current: self.current.clone(),
            is_visible: self.is_visible,
            queued: self.queue.len(),
        }
    }
}

enum Command {
    Push {
        achievement: Achievement,
        requeue: bool,
    },
    Hide,
}

#[derive(Debug, Clone, Copy)]
enum Deadline {
    Hide(Instant),
    Settle(Instant),
}

impl Deadline {
    fn at(self) -> Instant {
        match self {
            Self::Hide(at) | Self::Settle(at) => at,
        }
    }
}

/// Handle to the achievement task.
#[derive(Clone)]
pub struct AchievementSequencer {
    commands_tx: mpsc::UnboundedSender<Command>,
    view_rx: watch::Receiver<AchievementView>,
}

impl std::fmt::Debug for AchievementSequencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AchievementSequencer")
            .field("view", &*self.view_rx.borrow())
            .finish_non_exhaustive()
    }
}

impl AchievementSequencer {
    /// Spawn the sequencer task with the standard settle gap.
    pub fn spawn() -> Self {
        Self::spawn_with_gap(constants::ACHIEVEMENT_SETTLE_GAP)
    }

    /// Spawn the sequencer task. Must be called within a tokio runtime.
    pub fn spawn_with_gap(settle_gap: Duration) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (view_tx, view_rx) = watch::channel(AchievementView::default());
        tokio::spawn(run_sequencer(commands_rx, view_tx, settle_gap));
        Self {
            commands_tx,
            view_rx,
        }
    }

    /// Queue a local unlock under a fresh id. Returns the id.
    pub fn add(&self, draft: AchievementDraft) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        self.send(Command::Push {
            achievement: Achievement::from_draft(id.clone(), draft),
            requeue: false,
        });
        id
    }

    /// Queue a backend push. Pushes without an id count as local unlocks.
    pub fn push_remote(&self, unlock: RemoteUnlock) {
        let requeue = unlock.requeue;
        match unlock.into_parts() {
            (Some(id), draft) => self.send(Command::Push {
                achievement: Achievement::from_draft(id, draft),
                requeue,
            }),
            (None, draft) => {
                self.add(draft);
            }
        }
    }

    /// Hide the visible achievement ahead of its timer.
    pub fn hide(&self) {
        self.send(Command::Hide);
    }

    /// Latest published view.
    pub fn view(&self) -> AchievementView {
        self.view_rx.borrow().clone()
    }

    /// Receiver that wakes on every view change.
    pub fn subscribe(&self) -> watch::Receiver<AchievementView> {
        self.view_rx.clone()
    }

    fn send(&self, command: Command) {
        if self.commands_tx.send(command).is_err() {
            log::warn!("[Achievement] Sequencer stopped, dropping command");
        }
    }
}

async fn run_sequencer(
    mut commands_rx: mpsc::UnboundedReceiver<Command>,
    view_tx: watch::Sender<AchievementView>,
    settle_gap: Duration,
) {
    let mut board = AchievementBoard::new();
    let mut deadline: Option<Deadline> = None;

    loop {
        if deadline.is_none() {
            if let Some(shown) = board.promote() {
                log::info!("[Achievement] Showing '{}' ({})", shown.title, shown.id);
                deadline = Some(Deadline::Hide(Instant::now() + shown.duration));
            }
        }
        view_tx.send_replace(board.view());

        let command = match deadline {
            Some(pending) => tokio::select! {
                () = sleep_until(pending.at()) => {
                    deadline = match pending {
                        Deadline::Hide(_) => {
                            board.hide();
                            Some(Deadline::Settle(Instant::now() + settle_gap))
                        }
                        Deadline::Settle(_) => {
                            board.settle();
                            None
                        }
                    };
                    continue;
                }
                command = commands_rx.recv() => command,
            },
            None => commands_rx.recv().await,
        };

        match command {
            Some(Command::Push {
                achievement,
                requeue,
            }) => {
                let id = achievement.id.clone();
                match board.push(achievement, requeue) {
                    PushOutcome::Queued => log::debug!("[Achievement] Queued {id}"),
                    PushOutcome::Merged => log::info!("[Achievement] Merged update for queued {id}"),
                    PushOutcome::Duplicate => {
                        log::warn!("[Achievement] Ignoring duplicate {id} (already shown)");
                    }
                }
            }
            Some(Command::Hide) => {
                if board.hide() {
                    deadline = Some(Deadline::Settle(Instant::now() + settle_gap));
                }
            }
            None => break,
        }
    }

    log::debug!("[Achievement] Sequencer stopped");
}
