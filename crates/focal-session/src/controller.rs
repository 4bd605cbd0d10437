//! The session controller.
//!
//! [`SessionController`] owns a [`Session`] and drives one generation at a
//! time. Each submission spawns a reader task that forwards
//! [`SessionEvent`]s over a channel, tagged with a generation number.
//! Events are applied on the caller's side through
//! [`SessionController::apply`], which drops anything that does not belong
//! to the active generation. A late chunk from an aborted request can never
//! reach a newer turn.

use std::sync::Arc;

use focal_tutor::{
    Category, GenerationRequest, ImagePayload, ResponseOptions, Result, TutorError,
};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::session::{Session, SessionPhase, Turn};
use crate::source::GenerationSource;

/// A learner's submission.
#[derive(Debug, Clone, Default)]
pub struct Submission {
    /// Question text. May be empty when images are attached.
    pub text: String,
    /// Attached images.
    pub images: Vec<ImagePayload>,
    /// Section toggles and sliders for this turn.
    pub options: ResponseOptions,
}

impl Submission {
    /// A text-only submission with the given options.
    #[must_use]
    pub fn text(text: impl Into<String>, options: ResponseOptions) -> Self {
        Self {
            text: text.into(),
            images: Vec::new(),
            options,
        }
    }
}

/// Raw progress reported by a reader task.
#[derive(Debug)]
pub enum SessionEvent {
    /// The category is known and output is about to arrive.
    Started {
        /// The resolved category.
        category: Category,
    },
    /// A piece of answer text.
    Chunk {
        /// The text, never empty.
        text: String,
    },
    /// The stream ended normally.
    Finished,
    /// The generation failed or was cancelled.
    Failed {
        /// What went wrong.
        error: TutorError,
    },
}

/// What applying an event changed, for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionUpdate {
    /// The turn switched from placeholder to streaming.
    Started {
        /// The turn.
        turn_id: Uuid,
        /// The resolved category.
        category: Category,
    },
    /// Text was appended to the turn.
    Chunk {
        /// The turn.
        turn_id: Uuid,
        /// The appended text.
        text: String,
    },
    /// The turn completed and was added to history.
    Completed {
        /// The turn.
        turn_id: Uuid,
    },
    /// The turn failed.
    Failed {
        /// The turn.
        turn_id: Uuid,
        /// Learner-facing message.
        message: String,
    },
    /// The event was stale or arrived in the wrong phase.
    Ignored,
}

impl SessionUpdate {
    /// Returns `true` if the update ends its turn.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. } | Self::Failed { .. }
        )
    }
}

type Tagged = (u64, SessionEvent);

#[derive(Debug)]
struct ActiveGeneration {
    generation: u64,
    turn_id: Uuid,
    cancel: CancellationToken,
}

/// Drives a [`Session`] against a [`GenerationSource`].
pub struct SessionController {
    source: Arc<dyn GenerationSource>,
    session: Session,
    events_tx: mpsc::UnboundedSender<Tagged>,
    events_rx: mpsc::UnboundedReceiver<Tagged>,
    active: Option<ActiveGeneration>,
    generation: u64,
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("source", &self.source.name())
            .field("phase", &self.session.phase())
            .field("turns", &self.session.turns().len())
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

impl SessionController {
    /// Creates a controller with an empty session.
    #[must_use]
    pub fn new(source: Arc<dyn GenerationSource>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            source,
            session: Session::new(),
            events_tx,
            events_rx,
            active: None,
            generation: 0,
        }
    }

    /// The session state.
    #[must_use]
    pub const fn session(&self) -> &Session {
        &self.session
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> SessionPhase {
        self.session.phase()
    }

    /// Returns `true` while a generation is outstanding.
    #[must_use]
    pub const fn is_busy(&self) -> bool {
        self.session.phase().is_busy()
    }

    /// Number of the most recent generation.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Submits a question and starts generating in the background.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// - `TutorError::ValidationError` if there is neither text nor an image,
    ///   or the sliders are out of range. The session is not changed.
    /// - `TutorError::SessionBusy` if a generation is already outstanding.
    pub fn submit(&mut self, submission: Submission) -> Result<Uuid> {
        if submission.text.trim().is_empty() && submission.images.is_empty() {
            return Err(TutorError::validation(
                "Enter a question or attach at least one image",
            ));
        }
        submission.options.validate()?;
        if self.is_busy() {
            return Err(TutorError::SessionBusy);
        }

        let turn = Turn::new(
            submission.text.clone(),
            submission.images.clone(),
            submission.options,
        );
        let request = GenerationRequest {
            turn_id: turn.id,
            prompt: submission.text,
            options: submission.options,
            images: submission.images,
            history: self.session.history().to_vec(),
        };
        let turn_id = turn.id;
        self.session.begin_turn(turn)?;

        self.generation += 1;
        let cancel = CancellationToken::new();
        self.active = Some(ActiveGeneration {
            generation: self.generation,
            turn_id,
            cancel: cancel.clone(),
        });

        info!(%turn_id, generation = self.generation, source = self.source.name(), "Submitting question");
        tokio::spawn(read_generation(
            Arc::clone(&self.source),
            request,
            cancel,
            self.generation,
            self.events_tx.clone(),
        ));
        Ok(turn_id)
    }

    /// Waits for the next meaningful update of the active generation.
    ///
    /// Returns `None` when nothing is outstanding. Cancel-safe.
    pub async fn next_event(&mut self) -> Option<SessionUpdate> {
        while self.active.is_some() {
            let (generation, event) = self.events_rx.recv().await?;
            let update = self.apply(generation, event);
            if update != SessionUpdate::Ignored {
                return Some(update);
            }
        }
        None
    }

    /// Drives the active generation to its end, returning every update.
    pub async fn run_to_completion(&mut self) -> Vec<SessionUpdate> {
        let mut updates = Vec::new();
        while let Some(update) = self.next_event().await {
            updates.push(update);
        }
        updates
    }

    /// Applies one event.
    ///
    /// Events from any generation other than the active one are ignored.
    pub fn apply(&mut self, generation: u64, event: SessionEvent) -> SessionUpdate {
        let Some(turn_id) = self
            .active
            .as_ref()
            .filter(|active| active.generation == generation)
            .map(|active| active.turn_id)
        else {
            debug!(generation, current = self.generation, "Dropping stale event");
            return SessionUpdate::Ignored;
        };

        match event {
            SessionEvent::Started { category } => match self.session.mark_streaming(category) {
                Ok(()) => SessionUpdate::Started { turn_id, category },
                Err(e) => {
                    warn!(%turn_id, error = %e, "Unexpected start event");
                    SessionUpdate::Ignored
                }
            },
            SessionEvent::Chunk { text } => match self.session.append_chunk(&text) {
                Ok(()) => SessionUpdate::Chunk { turn_id, text },
                Err(e) => {
                    warn!(%turn_id, error = %e, "Unexpected chunk");
                    SessionUpdate::Ignored
                }
            },
            SessionEvent::Finished => {
                self.active = None;
                match self.session.complete() {
                    Ok(()) => {
                        info!(%turn_id, history = self.session.history().len(), "Turn completed");
                        SessionUpdate::Completed { turn_id }
                    }
                    Err(e) => {
                        warn!(%turn_id, error = %e, "Turn ended without text");
                        SessionUpdate::Failed {
                            turn_id,
                            message: e.user_message(),
                        }
                    }
                }
            }
            SessionEvent::Failed { error } => {
                self.active = None;
                warn!(%turn_id, error = %error, "Turn failed");
                if let Err(e) = self.session.fail(&error) {
                    warn!(%turn_id, error = %e, "Failure could not be recorded");
                }
                SessionUpdate::Failed {
                    turn_id,
                    message: error.user_message(),
                }
            }
        }
    }

    /// Aborts the outstanding generation.
    ///
    /// Cancels the reader task, keeps the partial text and returns the
    /// session to idle. History is untouched. Events still in flight for the
    /// aborted generation are dropped when they arrive.
    pub fn abort(&mut self) -> Result<Uuid> {
        let Some(active) = self.active.as_ref() else {
            return Err(TutorError::invalid_transition(
                self.session.phase(),
                SessionPhase::Aborting,
            ));
        };
        let (turn_id, generation) = (active.turn_id, active.generation);

        self.session.begin_abort()?;
        if let Some(active) = self.active.take() {
            active.cancel.cancel();
        }
        self.session.finish_abort()?;
        info!(%turn_id, generation, "Generation aborted");
        Ok(turn_id)
    }

    /// Starts a new conversation. Only allowed while idle.
    pub fn clear(&mut self) -> Result<()> {
        self.session.clear()
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            active.cancel.cancel();
        }
    }
}

/// Reads one generation and forwards its events.
async fn read_generation(
    source: Arc<dyn GenerationSource>,
    request: GenerationRequest,
    cancel: CancellationToken,
    generation: u64,
    events: mpsc::UnboundedSender<Tagged>,
) {
    let send = |event: SessionEvent| events.send((generation, event)).is_ok();

    let started = tokio::select! {
        biased;
        () = cancel.cancelled() => Err(TutorError::Cancelled),
        started = source.start(request, cancel.clone()) => started,
    };
    let mut stream = match started {
        Ok(started) => {
            if !send(SessionEvent::Started {
                category: started.category,
            }) {
                return;
            }
            started.stream
        }
        Err(error) => {
            send(SessionEvent::Failed { error });
            return;
        }
    };

    loop {
        let item = tokio::select! {
            biased;
            () = cancel.cancelled() => Some(Err(TutorError::Cancelled)),
            item = stream.next() => item,
        };
        let delivered = match item {
            Some(Ok(text)) => send(SessionEvent::Chunk { text }),
            Some(Err(error)) => {
                send(SessionEvent::Failed { error });
                return;
            }
            None => {
                send(SessionEvent::Finished);
                return;
            }
        };
        if !delivered {
            return;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use std::time::Duration;

    use focal_tutor::testing::ScriptedModel;
    use focal_tutor::{
        GenerationGateway, LlmErrorKind, Role, SectionKind, SectionSet, Sliders,
    };

    use super::*;
    use crate::session::TurnStatus;
    use crate::source::LocalSource;

    fn controller(model: &ScriptedModel) -> SessionController {
        let gateway = GenerationGateway::single(Arc::new(model.clone()));
        SessionController::new(Arc::new(LocalSource::new(gateway)))
    }

    #[tokio::test]
    async fn test_completed_turn_grows_history_by_one_pair() {
        let model = ScriptedModel::new().classify_as("physics").with_chunks(["F = ", "ma"]);
        let mut controller = controller(&model);

        let turn_id = controller
            .submit(Submission::text("What is Newton's second law?", ResponseOptions::default()))
            .unwrap();
        assert!(controller.is_busy());
        assert!(controller.session().last_turn().unwrap().is_placeholder());

        let updates = controller.run_to_completion().await;
        assert_eq!(
            updates.first(),
            Some(&SessionUpdate::Started {
                turn_id,
                category: Category::Physics
            })
        );
        assert_eq!(updates.last(), Some(&SessionUpdate::Completed { turn_id }));

        let session = controller.session();
        assert_eq!(session.phase(), SessionPhase::Idle);
        assert_eq!(session.history().len(), 2);
        assert_eq!(session.history()[1].content, "F = ma");
        assert!(controller.next_event().await.is_none());
    }

    #[tokio::test]
    async fn test_second_turn_sends_history() {
        let model = ScriptedModel::new().with_chunks(["ok"]);
        let mut controller = controller(&model);

        controller
            .submit(Submission::text("first", ResponseOptions::default()))
            .unwrap();
        controller.run_to_completion().await;
        controller
            .submit(Submission::text("second", ResponseOptions::default()))
            .unwrap();
        controller.run_to_completion().await;

        let requests = model.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].history.is_empty());
        assert_eq!(requests[1].history.len(), 2);
        assert_eq!(requests[1].history[0].role, Role::User);
        assert_eq!(requests[1].history[0].content, "first");
        assert_eq!(controller.session().history().len(), 4);
    }

    #[tokio::test]
    async fn test_abort_keeps_exactly_the_received_chunks() {
        let model = ScriptedModel::new()
            .with_chunks(["one ", "two ", "three ", "four ", "five"])
            .with_delay(Duration::from_millis(30));
        let mut controller = controller(&model);
        let turn_id = controller
            .submit(Submission::text("count", ResponseOptions::default()))
            .unwrap();

        let mut received = String::new();
        while received.len() < "one two ".len() {
            match controller.next_event().await.unwrap() {
                SessionUpdate::Chunk { text, .. } => received.push_str(&text),
                SessionUpdate::Started { .. } => {}
                other => panic!("unexpected update: {other:?}"),
            }
        }

        assert_eq!(controller.abort().unwrap(), turn_id);
        assert_eq!(controller.phase(), SessionPhase::Idle);
        assert!(controller.next_event().await.is_none());

        // Let the reader observe the cancellation; nothing it sent may land.
        tokio::time::sleep(Duration::from_millis(100)).await;
        while let Ok((generation, event)) = controller.events_rx.try_recv() {
            assert_eq!(controller.apply(generation, event), SessionUpdate::Ignored);
        }

        let turn = controller.session().last_turn().unwrap();
        assert_eq!(turn.model_text, received);
        assert_eq!(turn.status, TurnStatus::Aborted);
        assert!(controller.session().history().is_empty());
        assert_eq!(controller.phase(), SessionPhase::Idle);
    }

    #[tokio::test]
    async fn test_abort_during_classification() {
        let model = ScriptedModel::new()
            .with_chunks(["late"])
            .with_delay(Duration::from_millis(200));
        let mut controller = controller(&model);
        let turn_id = controller
            .submit(Submission::text("q", ResponseOptions::default()))
            .unwrap();

        assert_eq!(controller.abort().unwrap(), turn_id);
        assert!(controller.run_to_completion().await.is_empty());
        let turn = controller.session().last_turn().unwrap();
        assert!(turn.model_text.is_empty());
        assert_eq!(turn.status, TurnStatus::Aborted);
    }

    #[tokio::test]
    async fn test_stale_events_are_ignored() {
        let model = ScriptedModel::new().with_chunks(["fresh"]);
        let mut controller = controller(&model);
        controller
            .submit(Submission::text("q", ResponseOptions::default()))
            .unwrap();
        let current = controller.generation();

        let update = controller.apply(
            current - 1,
            SessionEvent::Chunk {
                text: "stale".to_string(),
            },
        );
        assert_eq!(update, SessionUpdate::Ignored);

        controller.run_to_completion().await;
        assert_eq!(controller.session().last_turn().unwrap().model_text, "fresh");

        let late = controller.apply(
            current,
            SessionEvent::Chunk {
                text: "late".to_string(),
            },
        );
        assert_eq!(late, SessionUpdate::Ignored);
        assert_eq!(controller.session().last_turn().unwrap().model_text, "fresh");
    }

    #[tokio::test]
    async fn test_empty_submission_leaves_session_untouched() {
        let model = ScriptedModel::new();
        let mut controller = controller(&model);

        let err = controller
            .submit(Submission::text("   ", ResponseOptions::default()))
            .unwrap_err();
        assert!(matches!(err, TutorError::ValidationError { .. }));
        assert!(controller.session().turns().is_empty());
        assert_eq!(controller.phase(), SessionPhase::Idle);
        assert!(model.requests().is_empty());
    }

    #[tokio::test]
    async fn test_busy_controller_rejects_submission() {
        let model = ScriptedModel::new()
            .with_chunks(["slow"])
            .with_delay(Duration::from_millis(50));
        let mut controller = controller(&model);
        controller
            .submit(Submission::text("first", ResponseOptions::default()))
            .unwrap();

        let err = controller
            .submit(Submission::text("second", ResponseOptions::default()))
            .unwrap_err();
        assert!(matches!(err, TutorError::SessionBusy));
        assert_eq!(controller.session().turns().len(), 1);
        controller.run_to_completion().await;
    }

    #[tokio::test]
    async fn test_failure_is_recorded_without_history() {
        let model = ScriptedModel::new()
            .classify_as("math")
            .with_chunks(["partial", "never"])
            .fail_after(1, LlmErrorKind::Server, "overloaded");
        let mut controller = controller(&model);
        let turn_id = controller
            .submit(Submission::text("q", ResponseOptions::default()))
            .unwrap();

        let updates = controller.run_to_completion().await;
        match updates.last().unwrap() {
            SessionUpdate::Failed { turn_id: id, message } => {
                assert_eq!(*id, turn_id);
                assert!(message.contains("server"));
            }
            other => panic!("unexpected update: {other:?}"),
        }
        let turn = controller.session().last_turn().unwrap();
        assert_eq!(turn.model_text, "partial");
        assert_eq!(turn.category, Some(Category::Math));
        assert!(controller.session().history().is_empty());
    }

    #[tokio::test]
    async fn test_japanese_math_question_end_to_end() {
        let model = ScriptedModel::new().classify_as("math").with_chunks([
            "### summary\n一次方程式です。\n",
            "### answer\n",
            "x = 2",
        ]);
        let mut controller = controller(&model);
        let options = ResponseOptions::new(
            SectionSet::of(&[SectionKind::Summary, SectionKind::Answer]),
            Sliders {
                understanding: 0.2,
                politeness: 0.9,
            },
        );

        controller
            .submit(Submission::text("2x+3=7を解いて", options))
            .unwrap();
        controller.run_to_completion().await;

        let turn = controller.session().last_turn().unwrap();
        assert_eq!(turn.category, Some(Category::Math));
        let sections = turn.sections();
        assert_eq!(sections.get(SectionKind::Summary).unwrap().text, "一次方程式です。");
        assert_eq!(sections.get(SectionKind::Answer).unwrap().text, "x = 2");

        let prompt = &model.requests()[0].prompt;
        assert!(prompt.contains("shallow understanding"));
        assert!(prompt.contains("maximally thorough"));
        assert!(prompt.contains("### summary"));
        assert!(!prompt.contains("### explanation"));
        assert_eq!(controller.session().history().len(), 2);
    }

    #[tokio::test]
    async fn test_clear_after_completion() {
        let model = ScriptedModel::new().with_chunks(["ok"]);
        let mut controller = controller(&model);
        controller
            .submit(Submission::text("q", ResponseOptions::default()))
            .unwrap();
        assert!(matches!(controller.clear(), Err(TutorError::SessionBusy)));
        controller.run_to_completion().await;
        controller.clear().unwrap();
        assert!(controller.session().turns().is_empty());
    }

    #[test]
    fn test_abort_when_idle_is_rejected() {
        let model = ScriptedModel::new();
        let mut controller = controller(&model);
        assert!(matches!(
            controller.abort(),
            Err(TutorError::InvalidStateTransition { .. })
        ));
    }
}
