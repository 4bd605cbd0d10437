//! Focal session client
//!
//! Client-side conversation state for Focal: the turn and history aggregate,
//! the controller that drives one generation at a time with abort support,
//! and the section extractor used to display structured answers.

pub mod controller;
pub mod http;
pub mod sections;
pub mod session;
pub mod source;

pub use controller::{SessionController, SessionEvent, SessionUpdate, Submission};
pub use http::HttpSource;
pub use sections::{
    extract_sections, icon, loading_phrase, ExtractedSection, Extraction, SectionLayout,
    CATCH_ALL_TITLE, LOADING_TICK,
};
pub use session::{Session, SessionPhase, Turn, TurnStatus};
pub use source::{GenerationSource, LocalSource};
