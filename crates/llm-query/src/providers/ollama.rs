use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use serde_json::{Map, Value};

use super::base::{ChatStream, Provider};
use super::configs::OllamaProviderConfig;
use super::factory::ProviderKind;
use super::tool_calls::{object_arguments, raw_arguments, ToolCallNormalizer};
use super::utils::{
    decode_json, endpoint, read_body, sanitize_function_name, send, tools_to_openai_spec,
    wants_json, with_headers,
};
use crate::catalog::{ModelCatalog, ModelInfo};
use crate::context::CallContext;
use crate::errors::ProviderError;
use crate::models::message::Message;
use crate::models::request::ChatRequest;
use crate::models::response::{ChatResponse, Usage};
use crate::models::role::Role;
use crate::stream::NdjsonDecoder;

const CHAT_PATH: &str = "api/chat";
const TAGS_PATH: &str = "api/tags";

const RESERVED_FIELDS: &[&str] = &[
    "model", "messages", "tools", "format", "options", "stream",
];

#[derive(Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: Vec<OllamaMessage<'a>>,
    stream: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
    #[serde(flatten)]
    extras: Map<String, Value>,
}

#[derive(Serialize)]
struct OllamaMessage<'a> {
    role: Role,
    content: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<OllamaToolCallOut>,
}

#[derive(Serialize)]
struct OllamaToolCallOut {
    function: OllamaFunctionOut,
}

#[derive(Serialize)]
struct OllamaFunctionOut {
    name: String,
    arguments: Box<RawValue>,
}

#[derive(Serialize)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

/// One `/api/chat` body, or one line of a streamed response
#[derive(Debug, Deserialize)]
pub(crate) struct OllamaChatResponse {
    pub message: Option<OllamaResponseMessage>,
    #[serde(default)]
    pub done: bool,
    pub done_reason: Option<String>,
    pub prompt_eval_count: Option<u32>,
    pub eval_count: Option<u32>,
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OllamaResponseMessage {
    #[serde(default)]
    pub content: String,
    pub tool_calls: Option<Vec<OllamaToolCall>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OllamaToolCall {
    pub function: OllamaFunction,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OllamaFunction {
    #[serde(default)]
    pub name: String,
    pub arguments: Option<Box<RawValue>>,
}

impl OllamaChatResponse {
    pub(crate) fn finish_reason(&self) -> String {
        self.done_reason
            .clone()
            .filter(|reason| !reason.is_empty())
            .unwrap_or_else(|| "stop".to_string())
    }

    pub(crate) fn usage(&self) -> Option<Usage> {
        if self.prompt_eval_count.is_none() && self.eval_count.is_none() {
            return None;
        }
        Some(Usage::from_counts(
            self.prompt_eval_count,
            self.eval_count,
            None,
        ))
    }
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Deserialize)]
struct TagEntry {
    name: String,
}

/// Adapter for a local Ollama runtime
pub struct OllamaProvider {
    client: Client,
    config: OllamaProviderConfig,
    catalog: Arc<ModelCatalog>,
}

impl OllamaProvider {
    pub fn new(
        config: OllamaProviderConfig,
        catalog: Arc<ModelCatalog>,
    ) -> Result<Self, ProviderError> {
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
    ) -> Result<OllamaChatRequest<'a>, ProviderError> {
        let messages = request
            .messages
            .iter()
            .map(to_ollama_message)
            .collect::<Result<Vec<_>, _>>()?;

        let options = (request.temperature.is_some()
            || request.top_p.is_some()
            || request.max_tokens.is_some())
        .then(|| OllamaOptions {
            temperature: request.temperature,
            top_p: request.top_p,
            num_predict: request.max_tokens,
        });

        // Ollama takes either "json" or a JSON schema
        let format = request.response_format.as_ref().and_then(|format| {
            match format.pointer("/json_schema/schema") {
                Some(schema) => Some(schema.clone()),
                None if wants_json(format) => Some(Value::String("json".to_string())),
                None => None,
            }
        });

        let mut extras = request.extras.clone();
        extras.retain(|key, _| {
            let reserved = RESERVED_FIELDS.contains(&key.as_str());
            if reserved {
                tracing::warn!("ignoring extra field {:?} that shadows a request field", key);
            }
            !reserved
        });

        Ok(OllamaChatRequest {
            model: request.model_or(&self.config.model),
            messages,
            stream,
            tools: tools_to_openai_spec(&request.tools),
            format,
            options,
            extras,
        })
    }

    async fn post(
        &self,
        ctx: &CallContext,
        request: &ChatRequest,
        stream: bool,
    ) -> Result<reqwest::Response, ProviderError> {
        let payload = self.build_payload(request, stream)?;
        let url = endpoint(&self.config.host, CHAT_PATH);
        tracing::debug!("sending Ollama request to {}", url);

        let builder = self.client.post(&url).json(&payload);
        let builder = with_headers(builder, &request.extra_headers);
        send(ctx, builder).await
    }
}

fn to_ollama_message(message: &Message) -> Result<OllamaMessage<'_>, ProviderError> {
    let tool_calls = message
        .tool_calls
        .iter()
        .map(|call| {
            Ok::<_, ProviderError>(OllamaToolCallOut {
                function: OllamaFunctionOut {
                    name: sanitize_function_name(&call.name),
                    arguments: object_arguments(&call.arguments)?,
                },
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(OllamaMessage {
        role: message.role,
        content: &message.content,
        name: message.name.as_deref(),
        tool_call_id: message.tool_call_id.as_deref(),
        tool_calls,
    })
}

fn parse_response(body: bytes::Bytes) -> Result<ChatResponse, ProviderError> {
    let wire: OllamaChatResponse = decode_json(&body)?;

    if wire.error.as_deref().is_some_and(|error| !error.is_empty()) {
        return Err(ProviderError::Protocol {
            status: 200,
            body: String::from_utf8_lossy(&body).into_owned(),
        });
    }

    let finish_reason = wire.finish_reason();
    let usage = wire.usage();
    let message = wire
        .message
        .ok_or_else(|| ProviderError::Decode("response has no message".to_string()))?;

    let mut normalizer = ToolCallNormalizer::new();
    let tool_calls = message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|call| {
            normalizer.normalize(
                None,
                call.function.name,
                raw_arguments(call.function.arguments.as_deref()),
            )
        })
        .collect();

    Ok(ChatResponse {
        text: message.content,
        finish_reason: Some(finish_reason),
        tool_calls,
        usage,
        raw: body,
    })
}

#[async_trait]
impl Provider for OllamaProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Ollama
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

        let response = self.post(ctx, request, false).await?;
        let body = read_body(ctx, response).await?;
        tracing::debug!("received {} bytes from Ollama", body.len());

        parse_response(body)
    }

    async fn stream(
        &self,
        ctx: &CallContext,
        request: &ChatRequest,
    ) -> Result<ChatStream, ProviderError> {
        request.validate()?;

        let response = self.post(ctx, request, true).await?;
        Ok(ChatStream::new(
            ctx,
            response.bytes_stream(),
            NdjsonDecoder::new(),
        ))
    }

    async fn list_models(&self, ctx: &CallContext) -> Result<Vec<ModelInfo>, ProviderError> {
        let url = endpoint(&self.config.host, TAGS_PATH);
        tracing::debug!("listing Ollama models from {}", url);

        let response = send(ctx, self.client.get(&url)).await?;
        let body = read_body(ctx, response).await?;
        let tags: TagsResponse = decode_json(&body)?;

        Ok(self
            .catalog
            .annotate(ProviderKind::Ollama, tags.models.into_iter().map(|m| m.name)))
    }
}
