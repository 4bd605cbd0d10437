//! The session aggregate: turns, history and the request phase.
//!
//! [`Session`] owns every piece of client-side conversation state. It only
//! changes through the transition methods below, each of which checks the
//! current [`SessionPhase`] first:
//!
//! - `Idle` -> `Sending` ([`Session::begin_turn`])
//! - `Sending` -> `Streaming` ([`Session::mark_streaming`])
//! - `Streaming` -> `Idle` on success ([`Session::complete`])
//! - `Sending`/`Streaming` -> `Aborting` -> `Idle` ([`Session::begin_abort`], [`Session::finish_abort`])
//! - any busy phase -> `Idle` on error ([`Session::fail`])

use chrono::{DateTime, Utc};
use focal_tutor::{
    Category, HistoryEntry, ImagePayload, LlmErrorKind, ResponseOptions, Result, TutorError,
    IMAGE_ONLY_TEXT,
};
use uuid::Uuid;

use crate::sections::{extract_sections, Extraction};

// ============================================================================
// SessionPhase
// ============================================================================

/// Phase of the single outstanding request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionPhase {
    /// No request in flight; submissions are accepted.
    #[default]
    Idle,
    /// A request was issued; no output yet.
    Sending,
    /// Output is arriving.
    Streaming,
    /// The request is being torn down after a user abort.
    Aborting,
}

impl SessionPhase {
    /// Returns `true` while a request is outstanding.
    #[must_use]
    pub const fn is_busy(&self) -> bool {
        !matches!(self, Self::Idle)
    }
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Sending => write!(f, "sending"),
            Self::Streaming => write!(f, "streaming"),
            Self::Aborting => write!(f, "aborting"),
        }
    }
}

// ============================================================================
// Turn
// ============================================================================

/// Lifecycle of a single turn's model content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnStatus {
    /// Waiting for the first chunk; the placeholder is shown.
    Pending,
    /// Chunks are being appended.
    Streaming,
    /// The answer completed and was added to history.
    Completed,
    /// The user aborted; partial text is kept.
    Aborted,
    /// Generation failed; partial text is kept.
    Failed {
        /// Learner-facing failure description.
        message: String,
    },
}

impl TurnStatus {
    /// Returns `true` once the turn can no longer change.
    #[must_use]
    pub const fn is_final(&self) -> bool {
        matches!(self, Self::Completed | Self::Aborted | Self::Failed { .. })
    }
}

/// One user submission paired with its model response.
#[derive(Debug, Clone)]
pub struct Turn {
    /// Unique turn identifier.
    pub id: Uuid,
    /// The submitted text, possibly empty when images are attached.
    pub user_text: String,
    /// Attached images in submission order.
    pub images: Vec<ImagePayload>,
    /// Accumulated model output; grows in arrival order.
    pub model_text: String,
    /// Options that produced this turn, kept for redisplay.
    pub options: ResponseOptions,
    /// Category resolved by the server, once known.
    pub category: Option<Category>,
    /// Lifecycle status.
    pub status: TurnStatus,
    /// When the turn was submitted.
    pub created_at: DateTime<Utc>,
}

impl Turn {
    /// Creates a pending turn.
    #[must_use]
    pub fn new(user_text: impl Into<String>, images: Vec<ImagePayload>, options: ResponseOptions) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_text: user_text.into(),
            images,
            model_text: String::new(),
            options,
            category: None,
            status: TurnStatus::Pending,
            created_at: Utc::now(),
        }
    }

    /// Returns `true` while the loading placeholder should be displayed.
    #[must_use]
    pub fn is_placeholder(&self) -> bool {
        self.model_text.is_empty() && !self.status.is_final()
    }

    /// User text as recorded in history.
    #[must_use]
    pub fn history_text(&self) -> &str {
        if self.user_text.trim().is_empty() {
            IMAGE_ONLY_TEXT
        } else {
            &self.user_text
        }
    }

    /// Display sections computed from the current model text.
    #[must_use]
    pub fn sections(&self) -> Extraction {
        extract_sections(&self.model_text, &self.options.sections)
    }
}

// ============================================================================
// Session
// ============================================================================

/// Conversation state for one learner.
#[derive(Debug, Clone, Default)]
pub struct Session {
    phase: SessionPhase,
    turns: Vec<Turn>,
    history: Vec<HistoryEntry>,
}

impl Session {
    /// Creates an empty, idle session.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// All turns, oldest first.
    #[must_use]
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Completed exchanges used as model context.
    #[must_use]
    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    /// The most recent turn.
    #[must_use]
    pub fn last_turn(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// Looks up a turn by id.
    #[must_use]
    pub fn turn(&self, id: Uuid) -> Option<&Turn> {
        self.turns.iter().find(|t| t.id == id)
    }

    fn expect_phase(&self, allowed: &[SessionPhase], to: SessionPhase) -> Result<()> {
        if allowed.contains(&self.phase) {
            Ok(())
        } else {
            Err(TutorError::invalid_transition(self.phase, to))
        }
    }

    fn active_turn(&mut self) -> Result<&mut Turn> {
        let phase = self.phase;
        self.turns
            .last_mut()
            .ok_or_else(|| TutorError::invalid_transition(phase, "a turn without a submission"))
    }

    /// `Idle` -> `Sending`: records a new pending turn.
    pub fn begin_turn(&mut self, turn: Turn) -> Result<()> {
        if self.phase.is_busy() {
            return Err(TutorError::SessionBusy);
        }
        self.turns.push(turn);
        self.phase = SessionPhase::Sending;
        Ok(())
    }

    /// `Sending` -> `Streaming`: the gateway resolved a category and output
    /// is about to arrive.
    pub fn mark_streaming(&mut self, category: Category) -> Result<()> {
        self.expect_phase(&[SessionPhase::Sending], SessionPhase::Streaming)?;
        let turn = self.active_turn()?;
        turn.category = Some(category);
        turn.status = TurnStatus::Streaming;
        self.phase = SessionPhase::Streaming;
        Ok(())
    }

    /// Appends a chunk to the active turn.
    pub fn append_chunk(&mut self, text: &str) -> Result<()> {
        self.expect_phase(&[SessionPhase::Streaming], SessionPhase::Streaming)?;
        self.active_turn()?.model_text.push_str(text);
        Ok(())
    }

    /// `Streaming` -> `Idle`: finalizes the turn and appends the exchange to
    /// history.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::GenerationError` if no text arrived; the turn is
    /// then marked failed and history is untouched.
    pub fn complete(&mut self) -> Result<()> {
        self.expect_phase(&[SessionPhase::Streaming], SessionPhase::Idle)?;
        let turn = self.active_turn()?;

        if turn.model_text.trim().is_empty() {
            let err = TutorError::generation(
                turn.category,
                LlmErrorKind::Malformed,
                "the answer stream ended without any text",
            );
            turn.status = TurnStatus::Failed {
                message: err.user_message(),
            };
            self.phase = SessionPhase::Idle;
            return Err(err);
        }

        turn.status = TurnStatus::Completed;
        let user = HistoryEntry::user(turn.history_text());
        let model = HistoryEntry::model(turn.model_text.clone());
        self.history.push(user);
        self.history.push(model);
        self.phase = SessionPhase::Idle;
        Ok(())
    }

    /// `Sending`/`Streaming` -> `Aborting`.
    pub fn begin_abort(&mut self) -> Result<()> {
        self.expect_phase(
            &[SessionPhase::Sending, SessionPhase::Streaming],
            SessionPhase::Aborting,
        )?;
        self.phase = SessionPhase::Aborting;
        Ok(())
    }

    /// `Aborting` -> `Idle`: partial text stays, history is untouched.
    pub fn finish_abort(&mut self) -> Result<()> {
        self.expect_phase(&[SessionPhase::Aborting], SessionPhase::Idle)?;
        self.active_turn()?.status = TurnStatus::Aborted;
        self.phase = SessionPhase::Idle;
        Ok(())
    }

    /// Any busy phase -> `Idle` after an error. History is untouched.
    pub fn fail(&mut self, error: &TutorError) -> Result<()> {
        if !self.phase.is_busy() {
            return Err(TutorError::invalid_transition(self.phase, SessionPhase::Idle));
        }
        let turn = self.active_turn()?;
        if let TutorError::GenerationError {
            category: Some(category),
            ..
        } = error
        {
            turn.category.get_or_insert(*category);
        }
        turn.status = TurnStatus::Failed {
            message: error.user_message(),
        };
        self.phase = SessionPhase::Idle;
        Ok(())
    }

    /// Starts a new conversation. Only allowed while idle.
    pub fn clear(&mut self) -> Result<()> {
        if self.phase.is_busy() {
            return Err(TutorError::SessionBusy);
        }
        self.turns.clear();
        self.history.clear();
        Ok(())
    }
}
