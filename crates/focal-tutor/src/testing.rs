//! Deterministic language model for tests.
//!
//! [`ScriptedModel`] answers classification with a fixed reply and streams a
//! scripted list of chunks, optionally pausing between chunks or failing
//! part-way. Later requests can be given their own scripts. Every prompt and
//! request it receives is recorded.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::error::LlmErrorKind;
use crate::model::{ChunkStream, LanguageModel, ModelError, ModelRequest};

#[derive(Debug, Default)]
struct Log {
    completions: Vec<String>,
    requests: Vec<ModelRequest>,
}

/// Increments a counter when the owning stream is dropped.
struct DropCounter(Arc<AtomicUsize>);

impl Drop for DropCounter {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// A scripted [`LanguageModel`].
#[derive(Debug, Clone)]
pub struct ScriptedModel {
    classification: Result<String, ModelError>,
    scripts: Vec<Vec<String>>,
    failure: Option<(usize, ModelError)>,
    delay: Option<Duration>,
    log: Arc<Mutex<Log>>,
    dropped: Arc<AtomicUsize>,
}

impl Default for ScriptedModel {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedModel {
    /// A model that classifies as `other` and streams nothing.
    #[must_use]
    pub fn new() -> Self {
        Self {
            classification: Ok("other".to_string()),
            scripts: vec![Vec::new()],
            failure: None,
            delay: None,
            log: Arc::new(Mutex::new(Log::default())),
            dropped: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Sets the raw classification reply.
    #[must_use]
    pub fn classify_as(mut self, reply: impl Into<String>) -> Self {
        self.classification = Ok(reply.into());
        self
    }

    /// Makes classification fail.
    #[must_use]
    pub fn fail_classification(mut self, kind: LlmErrorKind, message: impl Into<String>) -> Self {
        self.classification = Err(ModelError::new(kind, message));
        self
    }

    /// Sets the answer chunks streamed in order.
    #[must_use]
    pub fn with_chunks<I, S>(mut self, chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let chunks = chunks.into_iter().map(Into::into).collect();
        match self.scripts.first_mut() {
            Some(first) => *first = chunks,
            None => self.scripts.push(chunks),
        }
        self
    }

    /// Adds the chunks for the next request. The last script repeats.
    #[must_use]
    pub fn then_chunks<I, S>(mut self, chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scripts.push(chunks.into_iter().map(Into::into).collect());
        self
    }

    /// Fails the answer stream after `after` chunks have been yielded.
    #[must_use]
    pub fn fail_after(mut self, after: usize, kind: LlmErrorKind, message: impl Into<String>) -> Self {
        self.failure = Some((after, ModelError::new(kind, message)));
        self
    }

    /// Sleeps for `delay` before every chunk.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Prompts received by [`LanguageModel::complete`], in call order.
    #[must_use]
    pub fn completions(&self) -> Vec<String> {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .completions
            .clone()
    }

    /// Requests received by [`LanguageModel::stream`], in call order.
    #[must_use]
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .requests
            .clone()
    }

    /// Number of answer streams that have been dropped.
    #[must_use]
    pub fn streams_dropped(&self) -> usize {
        self.dropped.load(Ordering::SeqCst)
    }
}

impl LanguageModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    fn complete(&self, prompt: String) -> BoxFuture<'_, Result<String, ModelError>> {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .completions
            .push(prompt);
        let reply = self.classification.clone();
        async move { reply }.boxed()
    }

    fn stream(&self, request: ModelRequest) -> ChunkStream {
        let served = {
            let mut log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
            log.requests.push(request);
            log.requests.len() - 1
        };

        let chunks = self
            .scripts
            .get(served)
            .or_else(|| self.scripts.last())
            .cloned()
            .unwrap_or_default();
        let failure = self.failure.clone();
        let delay = self.delay;
        let guard = DropCounter(Arc::clone(&self.dropped));

        Box::pin(async_stream::stream! {
            let _guard = guard;
            for (index, chunk) in chunks.into_iter().enumerate() {
                if let Some((after, error)) = &failure {
                    if index == *after {
                        yield Err(error.clone());
                        return;
                    }
                }
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                yield Ok(chunk);
            }
            if let Some((_, error)) = failure {
                yield Err(error);
            }
        })
    }
}
