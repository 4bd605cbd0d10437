//! The language-model capability consumed by the gateway.
//!
//! The provider behind [`LanguageModel`] is opaque to the rest of the
//! pipeline: it can answer a single prompt in one shot (classification) or
//! stream an answer as text chunks.

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::LlmErrorKind;
use crate::image::ImagePayload;

/// Who produced an entry of the session history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The learner.
    User,
    /// The language model.
    Model,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Model => write!(f, "model"),
        }
    }
}

/// One completed exchange entry used as model context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Who produced the content.
    pub role: Role,
    /// The text content.
    pub content: String,
}

impl HistoryEntry {
    /// Creates a user entry.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Creates a model entry.
    #[must_use]
    pub fn model(content: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            content: content.into(),
        }
    }
}

/// A fully assembled request for the answering model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRequest {
    /// The assembled tutoring prompt.
    pub prompt: String,
    /// Inline images attached after the prompt.
    pub images: Vec<ImagePayload>,
    /// Prior completed exchanges, oldest first.
    pub history: Vec<HistoryEntry>,
}

/// Failure reported by a model backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ModelError {
    /// Structured failure kind.
    pub kind: LlmErrorKind,
    /// Backend-provided description.
    pub message: String,
}

impl ModelError {
    /// Creates a new `ModelError`.
    #[must_use]
    pub fn new(kind: LlmErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Stream of answer text chunks.
pub type ChunkStream = BoxStream<'static, Result<String, ModelError>>;

/// A "generate text from a prompt" capability.
///
/// Object-safe so the gateway can hold `Arc<dyn LanguageModel>`.
pub trait LanguageModel: Send + Sync {
    /// Short name used in logs and the health endpoint.
    fn name(&self) -> &str;

    /// Answers `prompt` in one shot.
    fn complete(&self, prompt: String) -> BoxFuture<'_, Result<String, ModelError>>;

    /// Streams the answer to `request` as text chunks in production order.
    ///
    /// Dropping the returned stream must stop the underlying call.
    fn stream(&self, request: ModelRequest) -> ChunkStream;
}
