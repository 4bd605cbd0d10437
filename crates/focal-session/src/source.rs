//! Where generations come from.
//!
//! The session controller talks to a [`GenerationSource`]. [`LocalSource`]
//! runs the gateway in-process; [`crate::http::HttpSource`] talks to a
//! running Focal server.

use focal_tutor::{Generation, GenerationGateway, GenerationRequest, Result};
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

/// Starts generations on behalf of a session.
pub trait GenerationSource: Send + Sync {
    /// Short label used in logs.
    fn name(&self) -> &str;

    /// Starts a generation.
    ///
    /// Resolves once the category is known and the first chunk is primed.
    /// `cancel` stays tied to the returned stream.
    fn start(
        &self,
        request: GenerationRequest,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<Generation>>;
}

/// Runs generations against an in-process gateway.
#[derive(Debug, Clone)]
pub struct LocalSource {
    gateway: GenerationGateway,
}

impl LocalSource {
    /// Wraps `gateway`.
    #[must_use]
    pub const fn new(gateway: GenerationGateway) -> Self {
        Self { gateway }
    }
}

impl GenerationSource for LocalSource {
    fn name(&self) -> &str {
        self.gateway.provider()
    }

    fn start(
        &self,
        request: GenerationRequest,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<Generation>> {
        Box::pin(self.gateway.generate(request, cancel))
    }
}
