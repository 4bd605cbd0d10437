//! Focal tutoring core
//!
//! Classifies a learner's question, assembles the tutoring prompt and streams
//! the model's answer over HTTP.

pub mod api;
pub mod classifier;
pub mod config;
pub mod echo;
pub mod error;
pub mod gateway;
pub mod gemini;
pub mod image;
pub mod model;
pub mod options;
pub mod prompt;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use api::{
    create_router, AppState, ErrorResponse, GenerateRequest, HealthResponse, CATEGORY_HEADER,
    FAILURE_MARKER,
};
pub use classifier::{classification_prompt, classify, parse_category, Category};
pub use config::{Config, LlmProvider, CONFIG_FILE_NAME};
pub use echo::EchoModel;
pub use error::{LlmErrorKind, Result, TutorError};
pub use gateway::{Generation, GenerationGateway, GenerationRequest, IMAGE_ONLY_TEXT};
pub use gemini::GeminiModel;
pub use image::{ImageFormat, ImageLimits, ImagePayload};
pub use model::{ChunkStream, HistoryEntry, LanguageModel, ModelError, ModelRequest, Role};
pub use options::{
    PolitenessTier, ResponseOptions, SectionKind, SectionSet, Sliders, UnderstandingTier,
};
pub use prompt::assemble_prompt;
