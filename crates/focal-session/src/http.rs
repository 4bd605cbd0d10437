//! A generation source backed by a running Focal server.
//!
//! [`HttpSource`] posts to `/api/generate`, reads the category from the
//! response header and decodes the plain-text body incrementally. A failure
//! frame at the end of the body becomes the stream's final error. Dropping
//! the returned stream, or cancelling its token, closes the connection, which
//! in turn cancels the model call on the server.

use focal_tutor::{
    Category, ErrorResponse, GenerateRequest, Generation, GenerationRequest, HealthResponse,
    ImagePayload, LlmErrorKind, Result, TutorError, CATEGORY_HEADER, FAILURE_MARKER,
};
use futures::future::BoxFuture;
use futures::StreamExt;
use reqwest::StatusCode;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::source::GenerationSource;

/// Talks to a Focal server over HTTP.
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSource {
    /// Creates a source for the server at `base_url`, e.g. `http://127.0.0.1:3000`.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    /// Creates a source that reuses an existing client.
    #[must_use]
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Queries `GET /api/health`.
    pub async fn health(&self) -> Result<HealthResponse> {
        let response = self
            .client
            .get(self.url("/api/health"))
            .send()
            .await
            .map_err(transport_error)?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        response
            .json()
            .await
            .map_err(|e| TutorError::generation(None, LlmErrorKind::Malformed, e.to_string()))
    }

    async fn open(
        &self,
        request: GenerationRequest,
        cancel: CancellationToken,
    ) -> Result<Generation> {
        let turn_id = request.turn_id;
        let body = GenerateRequest {
            turn_id: Some(turn_id),
            prompt: request.prompt,
            options: Some(request.options.sections),
            sliders: Some(request.options.sliders),
            images: request.images.iter().map(ImagePayload::to_data_url).collect(),
            history: request.history,
        };

        let send = self.client.post(self.url("/api/generate")).json(&body).send();
        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(TutorError::Cancelled),
            response = send => response.map_err(transport_error)?,
        };

        if !response.status().is_success() {
            let err = error_from_response(response).await;
            warn!(%turn_id, error = %err, "Server rejected generation");
            return Err(err);
        }

        let category = response
            .headers()
            .get(CATEGORY_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<Category>().ok())
            .unwrap_or_default();
        info!(%turn_id, %category, "Server started streaming");

        let mut body = Box::pin(response.bytes_stream());
        let stream = async_stream::stream! {
            let mut decoder = Utf8Decoder::default();
            let mut failure: Option<Vec<u8>> = None;
            loop {
                let polled = tokio::select! {
                    biased;
                    () = cancel.cancelled() => None,
                    item = body.next() => Some(item),
                };
                let Some(item) = polled else {
                    debug!(%turn_id, "Closing generation stream after cancel");
                    yield Err(TutorError::Cancelled);
                    break;
                };
                match item {
                    Some(Ok(bytes)) => {
                        if let Some(frame) = failure.as_mut() {
                            frame.extend_from_slice(&bytes);
                            continue;
                        }
                        let (text, rest) = match bytes.iter().position(|b| *b == FAILURE_MARKER) {
                            Some(at) => (&bytes[..at], Some(&bytes[at + 1..])),
                            None => (&bytes[..], None),
                        };
                        let text = decoder.push(text);
                        if !text.is_empty() {
                            yield Ok(text);
                        }
                        if let Some(rest) = rest {
                            failure = Some(rest.to_vec());
                        }
                    }
                    Some(Err(e)) => {
                        warn!(%turn_id, %category, error = %e, "Answer stream interrupted");
                        yield Err(TutorError::generation(
                            Some(category),
                            LlmErrorKind::Network,
                            e.to_string(),
                        ));
                        break;
                    }
                    None => {
                        let rest = decoder.finish();
                        if !rest.is_empty() {
                            yield Ok(rest);
                        }
                        if let Some(frame) = failure.take() {
                            let err = failure_from_frame(&frame, category);
                            warn!(%turn_id, %category, error = %err, "Server reported a mid-stream failure");
                            yield Err(err);
                        }
                        break;
                    }
                }
            }
        };

        Ok(Generation {
            category,
            stream: Box::pin(stream),
        })
    }
}

impl GenerationSource for HttpSource {
    fn name(&self) -> &str {
        &self.base_url
    }

    fn start(
        &self,
        request: GenerationRequest,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<Generation>> {
        Box::pin(self.open(request, cancel))
    }
}

fn transport_error(error: reqwest::Error) -> TutorError {
    TutorError::generation(None, LlmErrorKind::Network, error.to_string())
}

/// Maps a non-success response to the error the server meant.
async fn error_from_response(response: reqwest::Response) -> TutorError {
    let status = response.status();
    let (message, category, kind) = match response.json::<ErrorResponse>().await {
        Ok(body) => (body.error, body.category, body.kind),
        Err(_) => (format!("server answered {status}"), None, None),
    };

    match status {
        StatusCode::BAD_REQUEST | StatusCode::PAYLOAD_TOO_LARGE => TutorError::validation(message),
        StatusCode::SERVICE_UNAVAILABLE if kind.is_none() => TutorError::Cancelled,
        _ => TutorError::generation(
            category,
            kind.unwrap_or_else(|| LlmErrorKind::from_status(status.as_u16())),
            message,
        ),
    }
}

/// Maps the trailing failure frame of an answer body back to an error.
fn failure_from_frame(frame: &[u8], category: Category) -> TutorError {
    match serde_json::from_slice::<ErrorResponse>(frame) {
        Ok(body) => TutorError::generation(
            Some(body.category.unwrap_or(category)),
            body.kind.unwrap_or(LlmErrorKind::Server),
            body.error,
        ),
        Err(e) => TutorError::generation(
            Some(category),
            LlmErrorKind::Malformed,
            format!("unreadable failure frame: {e}"),
        ),
    }
}

/// Decodes UTF-8 across chunk boundaries.
///
/// Bytes of a character split between chunks are held back until the rest
/// arrives. Invalid sequences become U+FFFD.
#[derive(Debug, Default)]
struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        None => {
                            self.pending.drain(..valid);
                            break;
                        }
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + len);
                        }
                    }
                }
            }
        }
        out
    }

    fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}
