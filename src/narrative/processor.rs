//! Per-kind processors that apply narrative events to the game state.
//!
//! A processor never blocks and never awaits: it mutates the state it is
//! handed, records [`StageSignal`]s for the renderer, and tells the queue
//! whether to hold afterwards.

use crate::state::{GameMessage, GameState, SceneState, Status};

use super::{EventKind, NarrativeEvent};

/// Something the renderer should react to.
#[derive(Debug, Clone, PartialEq)]
pub enum StageSignal {
    /// A line was appended to the dialog history.
    LineAppended(GameMessage),
    /// The background changed.
    SceneChanged(SceneState),
    /// The present character or its emotion changed.
    CharacterChanged {
        /// Name of the character now present.
        character: String,
        /// Its new emotion, if one was given.
        emotion: Option<String>,
    },
}

/// Whether the queue should wait out the event's duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hold {
    /// Hold for the full duration.
    Full,
    /// Move on immediately.
    Skip,
}

/// Result of processing one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// State changed.
    Applied(Hold),
    /// Event ignored without touching state.
    Dropped(String),
}

/// Mutable view handed to a processor.
#[derive(Debug)]
pub struct StageContext<'a> {
    /// State being mutated.
    pub state: &'a mut GameState,
    /// Signals collected for the renderer.
    pub signals: Vec<StageSignal>,
}

impl<'a> StageContext<'a> {
    /// Context over `state` with no signals yet.
    pub fn new(state: &'a mut GameState) -> Self {
        Self {
            state,
            signals: Vec::new(),
        }
    }

    /// Append `message` to the history and signal it.
    pub fn append(&mut self, message: GameMessage) {
        self.signals.push(StageSignal::LineAppended(message.clone()));
        self.state.append_message(message);
    }
}

/// Applies one kind of narrative event.
pub trait EventProcessor: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Whether this processor applies events of `kind`.
    fn can_handle(&self, kind: EventKind) -> bool;

    /// Apply `event` to the state in `ctx`.
    fn process(&self, event: &NarrativeEvent, ctx: &mut StageContext<'_>) -> ProcessOutcome;
}

fn mismatch(processor: &dyn EventProcessor, event: &NarrativeEvent) -> ProcessOutcome {
    ProcessOutcome::Dropped(format!(
        "{} cannot process {} events",
        processor.name(),
        event.kind()
    ))
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

/// Appends narration lines.
#[derive(Debug)]
pub struct NarrationProcessor;

impl EventProcessor for NarrationProcessor {
    fn name(&self) -> &'static str {
        "NarrationProcessor"
    }

    fn can_handle(&self, kind: EventKind) -> bool {
        kind == EventKind::Narration
    }

    fn process(&self, event: &NarrativeEvent, ctx: &mut StageContext<'_>) -> ProcessOutcome {
        let NarrativeEvent::Narration(narration) = event else {
            return mismatch(self, event);
        };
        let mut line = GameMessage::narration(narration.text.clone());
        line.is_final = narration.pacing.is_final;
        ctx.append(line);
        ProcessOutcome::Applied(Hold::Full)
    }
}

/// Appends character replies and updates the speaker's emotion.
#[derive(Debug)]
pub struct DialogueProcessor;

impl EventProcessor for DialogueProcessor {
    fn name(&self) -> &'static str {
        "DialogueProcessor"
    }

    fn can_handle(&self, kind: EventKind) -> bool {
        kind == EventKind::Dialogue
    }

    fn process(&self, event: &NarrativeEvent, ctx: &mut StageContext<'_>) -> ProcessOutcome {
        let NarrativeEvent::Dialogue(dialogue) = event else {
            return mismatch(self, event);
        };

        let speaker = dialogue
            .character
            .clone()
            .or_else(|| ctx.state.interacting_role_name().map(str::to_string))
            .unwrap_or_default();

        if !dialogue.emotion.is_empty() {
            if let Some(role_id) = ctx.state.role_id_by_name(&speaker) {
                if let Some(role) = ctx.state.roles.get_mut(&role_id) {
                    role.emotion = dialogue.emotion.clone();
                }
            }
        }

        ctx.state.status = Status::Presenting;

        let mut line = GameMessage::reply(speaker, dialogue.message.clone());
        line.emotion = non_empty(&dialogue.emotion);
        line.original_tag = non_empty(&dialogue.original_tag);
        line.motion_text = dialogue.motion_text.clone();
        line.audio_file = dialogue.audio_file.clone();
        line.is_final = dialogue.pacing.is_final;
        ctx.append(line);

        // The final chunk ends the turn; nothing follows it to pace against.
        if dialogue.pacing.is_final {
            ProcessOutcome::Applied(Hold::Skip)
        } else {
            ProcessOutcome::Applied(Hold::Full)
        }
    }
}

/// Changes the scene background.
#[derive(Debug)]
pub struct BackgroundProcessor;

impl EventProcessor for BackgroundProcessor {
    fn name(&self) -> &'static str {
        "BackgroundProcessor"
    }

    fn can_handle(&self, kind: EventKind) -> bool {
        kind == EventKind::Background
    }

    fn process(&self, event: &NarrativeEvent, ctx: &mut StageContext<'_>) -> ProcessOutcome {
        let NarrativeEvent::Background(background) = event else {
            return mismatch(self, event);
        };
        let scene = SceneState {
            image_path: background.image_path.clone(),
            transition: background.transition.clone(),
        };
        ctx.state.scene = Some(scene.clone());
        ctx.signals.push(StageSignal::SceneChanged(scene));
        ProcessOutcome::Applied(Hold::Full)
    }
}

/// Appends the player character's lines.
#[derive(Debug)]
pub struct PlayerLineProcessor;

impl EventProcessor for PlayerLineProcessor {
    fn name(&self) -> &'static str {
        "PlayerLineProcessor"
    }

    fn can_handle(&self, kind: EventKind) -> bool {
        kind == EventKind::PlayerLine
    }

    fn process(&self, event: &NarrativeEvent, ctx: &mut StageContext<'_>) -> ProcessOutcome {
        let NarrativeEvent::PlayerLine(player) = event else {
            return mismatch(self, event);
        };
        ctx.state.status = Status::Presenting;
        let mut line = GameMessage::user(ctx.state.user_name.clone(), player.text.clone());
        line.emotion = player.emotion.clone();
        line.is_final = player.pacing.is_final;
        ctx.append(line);
        ProcessOutcome::Applied(Hold::Full)
    }
}

/// Brings a character forward and updates its emotion.
#[derive(Debug)]
pub struct ModifyCharacterProcessor;

impl EventProcessor for ModifyCharacterProcessor {
    fn name(&self) -> &'static str {
        "ModifyCharacterProcessor"
    }

    fn can_handle(&self, kind: EventKind) -> bool {
        kind == EventKind::ModifyCharacter
    }

    fn process(&self, event: &NarrativeEvent, ctx: &mut StageContext<'_>) -> ProcessOutcome {
        let NarrativeEvent::ModifyCharacter(modify) = event else {
            return mismatch(self, event);
        };
        let Some(character) = modify.character.clone() else {
            return ProcessOutcome::Dropped("modify character event has no character".into());
        };

        ctx.state.status = Status::Presenting;
        ctx.state.present_character = Some(character.clone());

        match ctx.state.role_id_by_name(&character) {
            Some(role_id) => {
                if let (Some(role), Some(emotion)) =
                    (ctx.state.roles.get_mut(&role_id), &modify.emotion)
                {
                    role.emotion = emotion.clone();
                }
                ctx.state.mark_present(role_id);
                ctx.state.current_interact_role_id = Some(role_id);
            }
            None => {
                log::debug!("[Presentation] '{character}' is not in the role table");
            }
        }

        ctx.signals.push(StageSignal::CharacterChanged {
            character,
            emotion: modify.emotion.clone(),
        });
        ProcessOutcome::Applied(Hold::Full)
    }
}

fn standard_processor(kind: EventKind) -> Box<dyn EventProcessor> {
    match kind {
        EventKind::Narration => Box::new(NarrationProcessor),
        EventKind::Dialogue => Box::new(DialogueProcessor),
        EventKind::Background => Box::new(BackgroundProcessor),
        EventKind::PlayerLine => Box::new(PlayerLineProcessor),
        EventKind::ModifyCharacter => Box::new(ModifyCharacterProcessor),
    }
}

/// Ordered list of processors; the first that can handle an event wins.
pub struct ProcessorRegistry {
    processors: Vec<Box<dyn EventProcessor>>,
}

impl std::fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.processors.iter().map(|p| p.name()).collect();
        f.debug_struct("ProcessorRegistry")
            .field("processors", &names)
            .finish()
    }
}

impl Default for ProcessorRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl ProcessorRegistry {
    /// Registry with no processors.
    pub fn empty() -> Self {
        Self {
            processors: Vec::new(),
        }
    }

    /// One standard processor per [`EventKind`].
    pub fn standard() -> Self {
        Self {
            processors: EventKind::ALL.into_iter().map(standard_processor).collect(),
        }
    }

    /// Add a processor that takes precedence over those already registered.
    pub fn register(&mut self, processor: Box<dyn EventProcessor>) {
        self.processors.insert(0, processor);
    }

    /// Whether some processor handles `kind`.
    pub fn handles(&self, kind: EventKind) -> bool {
        self.processors.iter().any(|p| p.can_handle(kind))
    }

    /// Apply `event` to `state`.
    ///
    /// Returns the outcome and the signals produced. A dropped event leaves
    /// `state` untouched.
    pub fn process(
        &self,
        event: &NarrativeEvent,
        state: &mut GameState,
    ) -> (ProcessOutcome, Vec<StageSignal>) {
        let kind = event.kind();
        let Some(processor) = self.processors.iter().find(|p| p.can_handle(kind)) else {
            return (
                ProcessOutcome::Dropped(format!("no processor for {kind} events")),
                Vec::new(),
            );
        };

        let mut ctx = StageContext::new(state);
        let outcome = processor.process(event, &mut ctx);
        (outcome, ctx.signals)
    }
}
