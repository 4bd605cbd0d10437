//! Error types for the Focal tutoring pipeline.
//!
//! This module defines the error hierarchy for every stage of a tutoring
//! request: configuration loading, submission validation, subject
//! classification, answer generation, and the client-side session lifecycle.

use std::path::PathBuf;

use crate::classifier::Category;

/// A specialized `Result` type for Focal operations.
pub type Result<T> = std::result::Result<T, TutorError>;

/// Errors that can occur while producing or consuming a tutoring answer.
///
/// Error variants are organized by stage and include actionable suggestions
/// where possible to help operators resolve issues.
#[derive(Debug, thiserror::Error)]
pub enum TutorError {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// `focal.json` is not valid JSON.
    #[error("Invalid JSON in config file '{path}': {message}\n\nSuggestion: Validate your focal.json with a JSON linter")]
    ConfigParseError {
        /// Where the file was read from.
        path: PathBuf,
        /// What the JSON parser reported.
        message: String,
    },

    /// A configuration value is out of range or missing.
    #[error("Invalid configuration: {message}\n\nSuggestion: {suggestion}")]
    ConfigValidationError {
        /// Which value is wrong and why.
        message: String,
        /// Actionable suggestion for the user.
        suggestion: String,
    },

    // ========================================================================
    // Request Errors
    // ========================================================================
    /// The submission was rejected before any request was created.
    #[error("Invalid submission: {message}")]
    ValidationError {
        /// Description of what was wrong with the submission.
        message: String,
    },

    /// Subject classification failed.
    ///
    /// Recoverable: the gateway degrades to [`Category::Other`].
    #[error("Classification failed ({kind}): {message}")]
    ClassificationError {
        /// The kind of model failure.
        kind: LlmErrorKind,
        /// Detailed error message from the model backend.
        message: String,
    },

    /// Answer generation failed. Terminal for the current turn.
    #[error("Generation failed ({kind}): {message}\n\nSuggestion: {suggestion}")]
    GenerationError {
        /// The category resolved before the failure, if any.
        category: Option<Category>,
        /// The kind of model failure.
        kind: LlmErrorKind,
        /// Operator-safe description of the failure.
        message: String,
        /// Actionable suggestion for the user.
        suggestion: String,
    },

    /// The generation was cancelled by the user.
    ///
    /// Not a failure: partial output is retained and history is untouched.
    #[error("Generation cancelled")]
    Cancelled,

    // ========================================================================
    // Session Errors
    // ========================================================================
    /// A submission arrived while another generation was still outstanding.
    #[error("A generation is already in flight for this session\n\nSuggestion: Wait for it to finish or abort it first")]
    SessionBusy,

    /// A session operation was attempted in a phase that does not allow it.
    #[error("Invalid state transition: cannot go from {from} to {to}")]
    InvalidStateTransition {
        /// The phase the session was in.
        from: String,
        /// The phase or operation that was requested.
        to: String,
    },

    // ========================================================================
    // General I/O Errors
    // ========================================================================
    /// Reading a config or image file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A JSON body could not be encoded or decoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Categories of language-model failures for structured error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmErrorKind {
    /// The backend rejected the API key.
    Authentication,
    /// Rate limit exceeded.
    RateLimit,
    /// The backend answered with a 5xx status.
    Server,
    /// The backend could not be reached or the connection dropped.
    Network,
    /// The backend answered with an empty or unparsable response.
    Malformed,
    /// Anything else.
    Other,
}

impl std::fmt::Display for LlmErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Authentication => write!(f, "authentication"),
            Self::RateLimit => write!(f, "rate_limit"),
            Self::Server => write!(f, "server"),
            Self::Network => write!(f, "network"),
            Self::Malformed => write!(f, "malformed"),
            Self::Other => write!(f, "other"),
        }
    }
}

impl LlmErrorKind {
    /// What the operator or learner can do about this kind of failure.
    #[must_use]
    pub const fn suggestion(&self) -> &'static str {
        match self {
            Self::Authentication => "Check your API key or credentials",
            Self::RateLimit => "Wait and retry, or reduce request frequency",
            Self::Server => "Retry later; the model service may be experiencing issues",
            Self::Network => "Check your network connection",
            Self::Malformed => "Retry the question; the model returned no usable text",
            Self::Other => "Check the model provider's status page",
        }
    }

    /// Maps an HTTP status code returned by a model backend to an error kind.
    #[must_use]
    pub const fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => Self::Authentication,
            429 => Self::RateLimit,
            500..=599 => Self::Server,
            _ => Self::Other,
        }
    }
}

impl TutorError {
    /// Shorthand for [`TutorError::ConfigParseError`].
    #[must_use]
    pub fn config_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ConfigParseError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Shorthand for [`TutorError::ConfigValidationError`].
    #[must_use]
    pub fn config_validation(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ConfigValidationError {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Creates a new `ValidationError`.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
        }
    }

    /// Creates a new `ClassificationError`.
    #[must_use]
    pub fn classification(kind: LlmErrorKind, message: impl Into<String>) -> Self {
        Self::ClassificationError {
            kind,
            message: message.into(),
        }
    }

    /// Creates a new `GenerationError` with automatic suggestion based on error kind.
    #[must_use]
    pub fn generation(
        category: Option<Category>,
        kind: LlmErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self::GenerationError {
            category,
            kind,
            message: message.into(),
            suggestion: kind.suggestion().to_string(),
        }
    }

    /// Shorthand for [`TutorError::InvalidStateTransition`].
    #[must_use]
    pub fn invalid_transition(from: impl std::fmt::Display, to: impl std::fmt::Display) -> Self {
        Self::InvalidStateTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Returns `true` if this error is transient and the request may be retried.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::GenerationError {
                kind: LlmErrorKind::RateLimit | LlmErrorKind::Server | LlmErrorKind::Network,
                ..
            } | Self::ClassificationError {
                kind: LlmErrorKind::RateLimit | LlmErrorKind::Server | LlmErrorKind::Network,
                ..
            }
        )
    }

    /// Returns `true` if this is the expected outcome of a user abort.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns the message shown to the learner when a turn fails.
    ///
    /// Never includes file paths or backend payloads.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::ValidationError { message } => message.clone(),
            Self::GenerationError { kind, .. } | Self::ClassificationError { kind, .. } => {
                format!("The answer could not be generated ({kind}). {}", kind.suggestion())
            }
            Self::Cancelled => "The answer was cancelled.".to_string(),
            Self::SessionBusy => "Please wait for the current answer to finish.".to_string(),
            _ => "An unexpected error occurred.".to_string(),
        }
    }
}
