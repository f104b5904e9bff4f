use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use serde_json::{json, Map, Value};

use super::base::{ChatStream, Provider};
use super::configs::OpenAiCompatibleConfig;
use super::factory::ProviderKind;
use super::tool_calls::{openai_arguments, raw_arguments, ToolCallNormalizer};
use super::utils::{
    check_openai_context_length_error, decode_json, endpoint, is_valid_function_name,
    read_body, sanitize_function_name, send, tools_to_openai_spec, with_headers,
};
use crate::catalog::{ModelCatalog, ModelInfo};
use crate::context::CallContext;
use crate::errors::ProviderError;
use crate::models::message::Message;
use crate::models::request::ChatRequest;
use crate::models::response::{ChatResponse, Usage};
use crate::models::role::Role;
use crate::models::tool::ToolChoice;
use crate::stream::EventStreamDecoder;

const CHAT_COMPLETIONS_PATH: &str = "chat/completions";
const MODELS_PATH: &str = "models";

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'a ToolChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<Value>,
    #[serde(flatten)]
    extras: Map<String, Value>,
}

const RESERVED_FIELDS: &[&str] = &[
    "model",
    "messages",
    "tools",
    "tool_choice",
    "response_format",
    "temperature",
    "top_p",
    "max_tokens",
    "stream",
    "stream_options",
];

#[derive(Serialize)]
struct WireMessage<'a> {
    role: Role,
    content: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall<'a>>,
}

#[derive(Serialize)]
struct WireToolCall<'a> {
    id: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunction,
}

#[derive(Serialize)]
struct WireFunction {
    name: String,
    arguments: Box<RawValue>,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<WireUsage>,
    error: Option<Value>,
}

#[derive(Deserialize)]
struct Choice {
    finish_reason: Option<String>,
    message: Option<ResponseMessage>,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<ResponseToolCall>>,
}

#[derive(Deserialize)]
struct ResponseToolCall {
    id: Option<String>,
    function: ResponseFunction,
}

#[derive(Deserialize)]
struct ResponseFunction {
    #[serde(default)]
    name: String,
    arguments: Option<Box<RawValue>>,
}

#[derive(Deserialize)]
struct WireUsage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
    total_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct ModelsResponse {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    id: String,
}

/// Adapter for OpenAI, OpenRouter, XAI and other chat-completions servers
pub struct OpenAiCompatibleProvider {
    client: Client,
    config: OpenAiCompatibleConfig,
    catalog: Arc<ModelCatalog>,
}

impl OpenAiCompatibleProvider {
    pub fn new(
        config: OpenAiCompatibleConfig,
        catalog: Arc<ModelCatalog>,
    ) -> Result<Self, ProviderError> {
        if config.api_key.is_empty() {
            return Err(ProviderError::InvalidRequest(format!(
                "{}: missing API key",
                config.kind
            )));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(600)) // 10 minutes timeout
            .build()?;

        Ok(Self {
            client,
            config,
            catalog,
        })
    }

    fn build_payload<'a>(
        &'a self,
        request: &'a ChatRequest,
        stream: bool,
    ) -> Result<ChatCompletionRequest<'a>, ProviderError> {
        let messages = request
            .messages
            .iter()
            .map(to_wire_message)
            .collect::<Result<Vec<_>, _>>()?;

        let mut extras = request.extras.clone();
        extras.retain(|key, _| {
            let reserved = RESERVED_FIELDS.contains(&key.as_str());
            if reserved {
                tracing::warn!("ignoring extra field {:?} that shadows a request field", key);
            }
            !reserved
        });

        Ok(ChatCompletionRequest {
            model: request.model_or(&self.config.model),
            messages,
            tools: tools_to_openai_spec(&request.tools),
            tool_choice: request.tool_choice.as_ref(),
            response_format: request.response_format.as_ref(),
            temperature: request.temperature,
            top_p: request.top_p,
            max_tokens: request.max_tokens,
            stream,
            stream_options: stream.then(|| json!({"include_usage": true})),
            extras,
        })
    }

    async fn post(
        &self,
        ctx: &CallContext,
        request: &ChatRequest,
        payload: &ChatCompletionRequest<'_>,
        accept: &str,
    ) -> Result<reqwest::Response, ProviderError> {
        let url = endpoint(&self.config.host, CHAT_COMPLETIONS_PATH);
        tracing::debug!("sending {} request to {}", self.config.kind, url);

        let builder = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .header("Accept", accept)
            .json(payload);
        let builder = with_headers(builder, &self.config.extra_headers);
        let builder = with_headers(builder, &request.extra_headers);

        send(ctx, builder).await
    }
}

fn to_wire_message(message: &Message) -> Result<WireMessage<'_>, ProviderError> {
    let tool_calls = message
        .tool_calls
        .iter()
        .map(|call| {
            Ok::<_, ProviderError>(WireToolCall {
                id: &call.id,
                kind: "function",
                function: WireFunction {
                    name: sanitize_function_name(&call.name),
                    arguments: openai_arguments(&call.arguments)?,
                },
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let content = if message.content.is_empty() && !tool_calls.is_empty() {
        None
    } else {
        Some(message.content.as_str())
    };

    Ok(WireMessage {
        role: message.role,
        content,
        name: message.name.as_deref(),
        tool_call_id: message.tool_call_id.as_deref(),
        tool_calls,
    })
}

/// Convert a chat-completions body into a [`ChatResponse`]
fn parse_response(body: bytes::Bytes) -> Result<ChatResponse, ProviderError> {
    let wire: ChatCompletionResponse = decode_json(&body)?;

    if let Some(error) = wire.error.as_ref().filter(|error| !error.is_null()) {
        if let Some(err) = check_openai_context_length_error(error) {
            return Err(err);
        }
        return Err(ProviderError::Protocol {
            status: 200,
            body: String::from_utf8_lossy(&body).into_owned(),
        });
    }

    let choice = wire
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::Decode("no choices in response".to_string()))?;
    let message = choice
        .message
        .ok_or_else(|| ProviderError::Decode("first choice has no message".to_string()))?;

    let mut normalizer = ToolCallNormalizer::new();
    let tool_calls = message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|call| {
            if !is_valid_function_name(&call.function.name) {
                tracing::warn!(
                    "tool call names a function with invalid characters: {:?}",
                    call.function.name
                );
            }
            normalizer.normalize(
                call.id,
                call.function.name,
                raw_arguments(call.function.arguments.as_deref()),
            )
        })
        .collect();

    let usage = wire.usage.map(|usage| {
        Usage::from_counts(
            usage.prompt_tokens,
            usage.completion_tokens,
            usage.total_tokens,
        )
    });

    Ok(ChatResponse {
        text: message.content.unwrap_or_default(),
        finish_reason: choice.finish_reason,
        tool_calls,
        usage,
        raw: body,
    })
}

#[async_trait]
impl Provider for OpenAiCompatibleProvider {
    fn kind(&self) -> ProviderKind {
        self.config.kind
    }

    fn default_model(&self) -> &str {
        &self.config.model
    }

    async fn query(
        &self,
        ctx: &CallContext,
        request: &ChatRequest,
    ) -> Result<ChatResponse, ProviderError> {
        request.validate()?;
        if request.stream {
            return self.stream(ctx, request).await?.response().await;
        }
        let payload = self.build_payload(request, false)?;

        let response = self.post(ctx, request, &payload, "application/json").await?;
        let body = read_body(ctx, response).await?;
        tracing::debug!("received {} bytes from {}", body.len(), self.config.kind);

        parse_response(body)
    }

    async fn stream(
        &self,
        ctx: &CallContext,
        request: &ChatRequest,
    ) -> Result<ChatStream, ProviderError> {
        request.validate()?;
        let payload = self.build_payload(request, true)?;

        let response = self
            .post(ctx, request, &payload, "text/event-stream")
            .await?;

        Ok(ChatStream::new(
            ctx,
            response.bytes_stream(),
            EventStreamDecoder::new(),
        ))
    }

    async fn list_models(&self, ctx: &CallContext) -> Result<Vec<ModelInfo>, ProviderError> {
        let url = endpoint(&self.config.host, MODELS_PATH);
        tracing::debug!("listing {} models from {}", self.config.kind, url);

        let builder = self.client.get(&url).bearer_auth(&self.config.api_key);
        let builder = with_headers(builder, &self.config.extra_headers);

        let response = send(ctx, builder).await?;
        let body = read_body(ctx, response).await?;
        let models: ModelsResponse = decode_json(&body)?;

        Ok(self
            .catalog
            .annotate(self.config.kind, models.data.into_iter().map(|m| m.id)))
    }
}
