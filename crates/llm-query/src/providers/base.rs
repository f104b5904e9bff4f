use async_trait::async_trait;

use super::factory::ProviderKind;
use crate::catalog::ModelInfo;
use crate::context::CallContext;
use crate::errors::ProviderError;
use crate::models::request::ChatRequest;
use crate::models::response::ChatResponse;

pub use crate::stream::ChatStream;

/// Base trait for chat providers (OpenAI-compatible, Gemini, Ollama)
///
/// Every call is bound to a [`CallContext`]; cancelling it aborts the in-flight request and
/// any stream decoding it started.
#[async_trait]
pub trait Provider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Model used when the request does not name one
    fn default_model(&self) -> &str;

    /// Send the request and wait for the complete response
    async fn query(
        &self,
        ctx: &CallContext,
        request: &ChatRequest,
    ) -> Result<ChatResponse, ProviderError>;

    /// Send the request and return as soon as the response starts streaming
    async fn stream(
        &self,
        ctx: &CallContext,
        request: &ChatRequest,
    ) -> Result<ChatStream, ProviderError>;

    /// Enumerate the models the provider serves, annotated from the model catalog
    async fn list_models(&self, ctx: &CallContext) -> Result<Vec<ModelInfo>, ProviderError>;
}
