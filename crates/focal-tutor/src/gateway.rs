//! The generation gateway: classify, assemble, answer.
//!
//! [`GenerationGateway::generate`] runs the two-stage protocol for one
//! request. Classification failures degrade to [`Category::Other`]; answer
//! failures become `TutorError::GenerationError` carrying the category. The
//! gateway waits for the first non-empty answer chunk before returning, so
//! callers learn about empty responses and early failures up front.
//!
//! Cancellation is cooperative: the supplied [`CancellationToken`] is checked
//! while classifying, while waiting for every chunk, and again before each
//! chunk is handed out. Once it fires the stream yields `TutorError::Cancelled`
//! and ends, dropping the upstream model stream.

use std::sync::Arc;

use futures::stream::BoxStream;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::classifier::{classify, Category};
use crate::error::{LlmErrorKind, Result, TutorError};
use crate::image::ImagePayload;
use crate::model::{ChunkStream, HistoryEntry, LanguageModel, ModelError, ModelRequest};
use crate::options::ResponseOptions;
use crate::prompt::assemble_prompt;

/// User text recorded for submissions that only carry images.
pub const IMAGE_ONLY_TEXT: &str = "(image only)";

/// One generation request, paired 1:1 with a cancellation token.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// The turn this request belongs to.
    pub turn_id: Uuid,
    /// The raw question text.
    pub prompt: String,
    /// Sections and sliders for this request.
    pub options: ResponseOptions,
    /// Inline images, in submission order.
    pub images: Vec<ImagePayload>,
    /// Snapshot of the session history at submission time.
    pub history: Vec<HistoryEntry>,
}

impl GenerationRequest {
    /// Returns `true` if the request carries images but no text.
    #[must_use]
    pub fn is_image_only(&self) -> bool {
        self.prompt.trim().is_empty() && !self.images.is_empty()
    }

    /// Rejects requests with neither text nor images, or invalid sliders.
    pub fn validate(&self) -> Result<()> {
        if self.prompt.trim().is_empty() && self.images.is_empty() {
            return Err(TutorError::validation(
                "Enter a question or attach at least one image",
            ));
        }
        self.options.validate()
    }
}

/// A started generation: the resolved category and the answer text stream.
pub struct Generation {
    /// The category the question was classified as.
    pub category: Category,
    /// Answer chunks in production order. Never yields an empty chunk.
    pub stream: BoxStream<'static, Result<String>>,
}

impl std::fmt::Debug for Generation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Generation")
            .field("category", &self.category)
            .finish_non_exhaustive()
    }
}

/// Orchestrates classification, prompt assembly and the answering call.
#[derive(Clone)]
pub struct GenerationGateway {
    classifier: Arc<dyn LanguageModel>,
    answerer: Arc<dyn LanguageModel>,
}

impl std::fmt::Debug for GenerationGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationGateway")
            .field("classifier", &self.classifier.name())
            .field("answerer", &self.answerer.name())
            .finish()
    }
}

impl GenerationGateway {
    /// Creates a gateway with separate classification and answering models.
    #[must_use]
    pub fn new(classifier: Arc<dyn LanguageModel>, answerer: Arc<dyn LanguageModel>) -> Self {
        Self {
            classifier,
            answerer,
        }
    }

    /// Creates a gateway that uses one model for both stages.
    #[must_use]
    pub fn single(model: Arc<dyn LanguageModel>) -> Self {
        Self::new(Arc::clone(&model), model)
    }

    /// Name of the answering backend.
    #[must_use]
    pub fn provider(&self) -> &str {
        self.answerer.name()
    }

    /// Runs classification, prompt assembly and the answering call.
    ///
    /// # Errors
    ///
    /// - `TutorError::ValidationError` for an empty submission or bad sliders.
    /// - `TutorError::Cancelled` if `cancel` fires before the first chunk.
    /// - `TutorError::GenerationError` if the model fails or returns no text.
    pub async fn generate(
        &self,
        request: GenerationRequest,
        cancel: CancellationToken,
    ) -> Result<Generation> {
        request.validate()?;
        if cancel.is_cancelled() {
            return Err(TutorError::Cancelled);
        }

        let turn_id = request.turn_id;
        let category = self.resolve_category(&request, &cancel).await?;
        info!(%turn_id, %category, images = request.images.len(), "Question classified");

        let question = if request.is_image_only() {
            IMAGE_ONLY_TEXT
        } else {
            request.prompt.as_str()
        };
        let prompt = assemble_prompt(category, &request.options, question);
        debug!(%turn_id, prompt_len = prompt.len(), "Prompt assembled");

        let mut upstream = self.answerer.stream(ModelRequest {
            prompt,
            images: request.images,
            history: request.history,
        });

        let first = Self::first_chunk(&mut upstream, &cancel, category).await?;
        info!(%turn_id, %category, "Generation started");

        Ok(Generation {
            category,
            stream: guarded(first, upstream, cancel, category),
        })
    }

    /// Classifies the question, degrading to `other` on failure.
    async fn resolve_category(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<Category> {
        if request.is_image_only() {
            return Ok(Category::Other);
        }
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(TutorError::Cancelled),
            result = classify(self.classifier.as_ref(), &request.prompt) => {
                Ok(result.unwrap_or_else(|e| {
                    warn!(turn_id = %request.turn_id, error = %e, "Classification failed, using 'other'");
                    Category::Other
                }))
            }
        }
    }

    /// Waits for the first non-empty chunk.
    async fn first_chunk(
        upstream: &mut ChunkStream,
        cancel: &CancellationToken,
        category: Category,
    ) -> Result<String> {
        loop {
            let item = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(TutorError::Cancelled),
                item = upstream.next() => item,
            };
            match item {
                Some(Ok(chunk)) if chunk.is_empty() => continue,
                Some(Ok(chunk)) => return Ok(chunk),
                Some(Err(e)) => return Err(generation_error(category, e)),
                None => {
                    return Err(TutorError::generation(
                        Some(category),
                        LlmErrorKind::Malformed,
                        "the model returned an empty response",
                    ))
                }
            }
        }
    }
}

fn generation_error(category: Category, error: ModelError) -> TutorError {
    TutorError::generation(Some(category), error.kind, error.message)
}

/// Wraps the primed upstream stream with cancellation checks.
///
/// Ends after the first error; never yields text once `cancel` has fired.
fn guarded(
    first: String,
    mut upstream: ChunkStream,
    cancel: CancellationToken,
    category: Category,
) -> BoxStream<'static, Result<String>> {
    Box::pin(async_stream::stream! {
        if cancel.is_cancelled() {
            yield Err(TutorError::Cancelled);
            return;
        }
        yield Ok(first);

        loop {
            let polled = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                item = upstream.next() => Some(item),
            };
            let Some(item) = polled else {
                yield Err(TutorError::Cancelled);
                break;
            };
            match item {
                None => break,
                Some(Ok(chunk)) => {
                    if cancel.is_cancelled() {
                        yield Err(TutorError::Cancelled);
                        break;
                    }
                    if !chunk.is_empty() {
                        debug!(chunk_len = chunk.len(), "Answer chunk");
                        yield Ok(chunk);
                    }
                }
                Some(Err(e)) => {
                    warn!(%category, kind = %e.kind, "Answer stream failed");
                    yield Err(generation_error(category, e));
                    break;
                }
            }
        }
    })
}
