//! Gemini REST backend.
//!
//! Classification uses `models/{model}:generateContent`; answers use
//! `models/{model}:streamGenerateContent?alt=sse`, decoded event by event.
//! The API key travels in the `x-goog-api-key` header and never appears in
//! `Debug` output or logs.

use eventsource_stream::Eventsource;
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::LlmErrorKind;
use crate::model::{ChunkStream, HistoryEntry, LanguageModel, ModelError, ModelRequest, Role};

/// Default REST endpoint.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
struct RequestBody {
    contents: Vec<Content>,
}

#[derive(Debug, Serialize)]
struct Content {
    role: &'static str,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part {
    Text {
        text: String,
    },
    Inline {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Default, Deserialize)]
struct ResponseBody {
    #[serde(default)]
    candidates: Vec<Candidate>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<ResponseContent>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: Option<u16>,
    message: Option<String>,
}

impl ResponseBody {
    /// Text of the first candidate, or the embedded API error.
    fn into_text(self) -> Result<String, ModelError> {
        if let Some(error) = self.error {
            let kind = error.code.map_or(LlmErrorKind::Other, LlmErrorKind::from_status);
            return Err(ModelError::new(
                kind,
                error.message.unwrap_or_else(|| "unknown API error".to_string()),
            ));
        }
        Ok(self
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect::<String>()
            })
            .unwrap_or_default())
    }
}

const fn role_name(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Model => "model",
    }
}

fn history_content(entry: &HistoryEntry) -> Content {
    Content {
        role: role_name(entry.role),
        parts: vec![Part::Text {
            text: entry.content.clone(),
        }],
    }
}

/// Builds the request body: history first, then the prompt with its images.
fn request_body(request: &ModelRequest) -> RequestBody {
    let mut contents: Vec<Content> = request.history.iter().map(history_content).collect();

    let mut parts = vec![Part::Text {
        text: request.prompt.clone(),
    }];
    parts.extend(request.images.iter().map(|image| Part::Inline {
        inline_data: InlineData {
            mime_type: image.mime_type.clone(),
            data: image.to_base64(),
        },
    }));
    contents.push(Content {
        role: "user",
        parts,
    });

    RequestBody { contents }
}

fn transport_error(err: &reqwest::Error) -> ModelError {
    ModelError::new(LlmErrorKind::Network, format!("HTTP request failed: {err}"))
}

// ============================================================================
// GeminiModel
// ============================================================================

/// A [`LanguageModel`] backed by the Gemini REST API.
#[derive(Clone)]
pub struct GeminiModel {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl std::fmt::Debug for GeminiModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiModel")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl GeminiModel {
    /// Creates a Gemini backend for `model`.
    #[must_use]
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: api_key.into(),
        }
    }

    /// The model identifier.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    fn url(&self, method: &str) -> String {
        format!("{}/models/{}:{method}", self.base_url, self.model)
    }

    /// Sends `body` to `url` and maps non-success statuses to model errors.
    async fn send(
        client: reqwest::Client,
        url: String,
        api_key: String,
        body: RequestBody,
    ) -> Result<reqwest::Response, ModelError> {
        let response = client
            .post(&url)
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(&e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let kind = LlmErrorKind::from_status(status.as_u16());
        let detail = response
            .json::<ResponseBody>()
            .await
            .ok()
            .and_then(|body| body.error)
            .and_then(|error| error.message)
            .unwrap_or_default();
        warn!(status = status.as_u16(), %kind, "Gemini request rejected");
        Err(ModelError::new(kind, format!("HTTP {status}: {detail}")))
    }
}

impl LanguageModel for GeminiModel {
    fn name(&self) -> &str {
        "gemini"
    }

    fn complete(&self, prompt: String) -> BoxFuture<'_, Result<String, ModelError>> {
        let request = ModelRequest {
            prompt,
            images: Vec::new(),
            history: Vec::new(),
        };
        let body = request_body(&request);
        let url = self.url("generateContent");

        async move {
            let response =
                Self::send(self.client.clone(), url, self.api_key.clone(), body).await?;
            let body: ResponseBody = response.json().await.map_err(|e| {
                ModelError::new(LlmErrorKind::Malformed, format!("failed to parse response: {e}"))
            })?;
            let text = body.into_text()?;
            if text.trim().is_empty() {
                return Err(ModelError::new(LlmErrorKind::Malformed, "empty response"));
            }
            Ok(text)
        }
        .boxed()
    }

    fn stream(&self, request: ModelRequest) -> ChunkStream {
        let body = request_body(&request);
        let url = self.url("streamGenerateContent?alt=sse");
        let client = self.client.clone();
        let api_key = self.api_key.clone();

        Box::pin(async_stream::try_stream! {
            let response = Self::send(client, url, api_key, body).await?;
            let mut events = response.bytes_stream().eventsource();

            while let Some(event) = events.next().await {
                let event = event.map_err(|e| {
                    ModelError::new(LlmErrorKind::Network, format!("SSE stream error: {e}"))
                })?;
                if event.data.trim().is_empty() {
                    continue;
                }
                let chunk: ResponseBody = serde_json::from_str(&event.data).map_err(|e| {
                    ModelError::new(LlmErrorKind::Malformed, format!("SSE parsing error: {e}"))
                })?;
                let text = chunk.into_text()?;
                if !text.is_empty() {
                    debug!(chunk_len = text.len(), "Gemini chunk");
                    yield text;
                }
            }
        })
    }
}
