//! Offline language model for development without credentials.
//!
//! The echo backend classifies every question as `other` and answers by
//! replaying the section headers it finds in the prompt, each followed by a
//! short placeholder body, streamed word by word.

use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::model::{ChunkStream, LanguageModel, ModelError, ModelRequest};

/// Marker preceding the verbatim question in assembled prompts.
const QUESTION_MARKER: &str = "Question: ";

/// A [`LanguageModel`] that needs no network access.
#[derive(Debug, Clone, Default)]
pub struct EchoModel {
    delay: Option<Duration>,
}

impl EchoModel {
    /// Creates an echo model that streams without pauses.
    #[must_use]
    pub const fn new() -> Self {
        Self { delay: None }
    }

    /// Pauses for `delay` between words, which makes streaming visible.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// Renders the full echo reply for `prompt`.
///
/// Only the instructions ahead of the question are scanned for headers, so a
/// question that itself contains `### ` lines does not add sections.
fn render_reply(prompt: &str) -> String {
    let (instructions, question) = prompt.find(QUESTION_MARKER).map_or((prompt, ""), |at| {
        (&prompt[..at], prompt[at + QUESTION_MARKER.len()..].trim())
    });

    let headers: Vec<&str> = instructions
        .lines()
        .filter_map(|line| line.strip_prefix("### "))
        .map(str::trim)
        .collect();

    if headers.is_empty() {
        return format!("(echo) You asked: {question}");
    }

    headers
        .iter()
        .map(|label| format!("### {label}\n(echo) {label} for: {question}"))
        .collect::<Vec<_>>()
        .join("\n\n")
}

impl LanguageModel for EchoModel {
    fn name(&self) -> &str {
        "echo"
    }

    fn complete(&self, _prompt: String) -> BoxFuture<'_, Result<String, ModelError>> {
        async { Ok("other".to_string()) }.boxed()
    }

    fn stream(&self, request: ModelRequest) -> ChunkStream {
        let reply = render_reply(&request.prompt);
        let delay = self.delay;

        Box::pin(async_stream::stream! {
            for word in reply.split_inclusive(' ') {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                yield Ok(word.to_string());
            }
        })
    }
}
