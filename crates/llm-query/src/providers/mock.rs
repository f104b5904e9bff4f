use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

use super::base::{ChatStream, Provider};
use super::factory::ProviderKind;
use crate::catalog::ModelInfo;
use crate::context::CallContext;
use crate::errors::ProviderError;
use crate::models::request::ChatRequest;
use crate::models::response::ChatResponse;

/// A mock provider that returns pre-configured responses for testing
pub struct MockProvider {
    responses: Mutex<VecDeque<ChatResponse>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl MockProvider {
    /// Create a new mock provider with a sequence of responses
    pub fn new(responses: Vec<ChatResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Requests received so far, in order
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next_response(&self, request: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        request.validate()?;
        self.requests.lock().unwrap().push(request.clone());

        // Empty response once the queue runs out
        Ok(self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| ChatResponse::text("")))
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Ollama
    }

    fn default_model(&self) -> &str {
        "mock"
    }

    async fn query(
        &self,
        ctx: &CallContext,
        request: &ChatRequest,
    ) -> Result<ChatResponse, ProviderError> {
        if ctx.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }
        self.next_response(request)
    }

    async fn stream(
        &self,
        ctx: &CallContext,
        request: &ChatRequest,
    ) -> Result<ChatStream, ProviderError> {
        if ctx.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }
        Ok(ChatStream::from_response(self.next_response(request)?))
    }

    async fn list_models(&self, _ctx: &CallContext) -> Result<Vec<ModelInfo>, ProviderError> {
        Ok(vec![ModelInfo::named("mock")])
    }
}
