use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use serde_json::{json, Map, Value};

use super::base::{ChatStream, Provider};
use super::configs::GeminiProviderConfig;
use super::factory::ProviderKind;
use super::tool_calls::{object_arguments, raw_arguments, ToolCallNormalizer};
use super::utils::{
    decode_json, endpoint, read_body, sanitize_function_name, send, wants_json, with_headers,
};
use crate::catalog::{ModelCatalog, ModelInfo};
use crate::context::CallContext;
use crate::errors::ProviderError;
use crate::models::message::Message;
use crate::models::request::ChatRequest;
use crate::models::response::{ChatResponse, Usage};
use crate::models::role::Role;
use crate::models::tool::ToolChoice;
use crate::stream::JsonArrayDecoder;

const API_KEY_HEADER: &str = "x-goog-api-key";

const RESERVED_FIELDS: &[&str] = &[
    "contents",
    "systemInstruction",
    "tools",
    "toolConfig",
    "generationConfig",
];

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<GeminiTool<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_config: Option<ToolConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
    #[serde(flatten)]
    extras: Map<String, Value>,
}

#[derive(Serialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function_call: Option<FunctionCallPart>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function_response: Option<FunctionResponsePart>,
}

impl Part {
    fn text<S: Into<String>>(text: S) -> Self {
        Self {
            text: Some(text.into()),
            function_call: None,
            function_response: None,
        }
    }
}

#[derive(Serialize)]
struct FunctionCallPart {
    name: String,
    args: Box<RawValue>,
}

#[derive(Serialize)]
struct FunctionResponsePart {
    name: String,
    response: Box<RawValue>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiTool<'a> {
    function_declarations: Vec<FunctionDeclaration<'a>>,
}

#[derive(Serialize)]
struct FunctionDeclaration<'a> {
    name: String,
    description: &'a str,
    parameters: &'a Value,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolConfig {
    function_calling_config: FunctionCallingConfig,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FunctionCallingConfig {
    mode: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    allowed_function_names: Vec<String>,
}

#[derive(Serialize, Default)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<&'static str>,
}

/// One `generateContent` body, or one element of a streamed array
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    pub usage_metadata: Option<UsageMetadata>,
    pub error: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Candidate {
    pub content: Option<CandidateContent>,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CandidateContent {
    #[serde(default)]
    pub parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ResponsePart {
    pub text: Option<String>,
    pub function_call: Option<FunctionCall>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FunctionCall {
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    pub args: Option<Box<RawValue>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UsageMetadata {
    pub prompt_token_count: Option<u32>,
    pub candidates_token_count: Option<u32>,
    pub total_token_count: Option<u32>,
}

impl GenerateContentResponse {
    fn parts(&self) -> impl Iterator<Item = &ResponsePart> + '_ {
        self.candidates
            .first()
            .and_then(|candidate| candidate.content.as_ref())
            .into_iter()
            .flat_map(|content| content.parts.iter())
    }

    /// Text of every part of the first candidate, concatenated
    pub(crate) fn text(&self) -> String {
        self.parts().filter_map(|part| part.text.as_deref()).collect()
    }

    pub(crate) fn function_calls(&self) -> Vec<&FunctionCall> {
        self.parts()
            .filter_map(|part| part.function_call.as_ref())
            .collect()
    }

    pub(crate) fn finish_reason(&self) -> Option<String> {
        self.candidates
            .first()
            .and_then(|candidate| candidate.finish_reason.clone())
    }

    /// Usage, only when the provider actually counted tokens
    pub(crate) fn usage(&self) -> Option<Usage> {
        let metadata = self.usage_metadata.as_ref()?;
        let usage = Usage::from_counts(
            metadata.prompt_token_count,
            metadata.candidates_token_count,
            metadata.total_token_count,
        );
        (usage.total_tokens > 0).then_some(usage)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelsResponse {
    #[serde(default)]
    models: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    name: String,
}

pub struct GeminiProvider {
    client: Client,
    config: GeminiProviderConfig,
    catalog: Arc<ModelCatalog>,
}

impl GeminiProvider {
    pub fn new(
        config: GeminiProviderConfig,
        catalog: Arc<ModelCatalog>,
    ) -> Result<Self, ProviderError> {
        if config.api_key.is_empty() {
            return Err(ProviderError::InvalidRequest(
                "Gemini: missing API key".to_string(),
            ));
        }
        if config.host.is_empty() {
            return Err(ProviderError::InvalidRequest(
                "Gemini: missing base URL".to_string(),
            ));
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

    async fn post(
        &self,
        ctx: &CallContext,
        request: &ChatRequest,
        method: &str,
    ) -> Result<reqwest::Response, ProviderError> {
        let payload = build_payload(request)?;
        let model = request.model_or(&self.config.model);
        let url = endpoint(
            &self.config.host,
            &format!("v1beta/models/{}:{}", model, method),
        );
        tracing::debug!("sending Gemini request to {}", url);

        let builder = self
            .client
            .post(&url)
            .header(API_KEY_HEADER, &self.config.api_key)
            .json(&payload);
        let builder = with_headers(builder, &request.extra_headers);

        send(ctx, builder).await
    }
}

fn build_payload(request: &ChatRequest) -> Result<GenerateContentRequest<'_>, ProviderError> {
    let (system_instruction, contents) = to_gemini_contents(&request.messages)?;

    let tools = if request.tools.is_empty() {
        Vec::new()
    } else {
        vec![GeminiTool {
            function_declarations: request
                .tools
                .iter()
                .map(|tool| FunctionDeclaration {
                    name: sanitize_function_name(&tool.name),
                    description: &tool.description,
                    parameters: &tool.parameters,
                })
                .collect(),
        }]
    };

    let tool_config = request.tool_choice.as_ref().map(|choice| {
        let (mode, allowed_function_names) = match choice {
            ToolChoice::Auto => ("AUTO", Vec::new()),
            ToolChoice::None => ("NONE", Vec::new()),
            ToolChoice::Required => ("ANY", Vec::new()),
            ToolChoice::Function(name) => ("ANY", vec![sanitize_function_name(name)]),
        };
        ToolConfig {
            function_calling_config: FunctionCallingConfig {
                mode,
                allowed_function_names,
            },
        }
    });

    let generation_config = GenerationConfig {
        temperature: request.temperature,
        top_p: request.top_p,
        max_output_tokens: request.max_tokens,
        response_mime_type: request
            .response_format
            .as_ref()
            .filter(|format| wants_json(format))
            .map(|_| "application/json"),
    };
    let has_generation_config = generation_config.temperature.is_some()
        || generation_config.top_p.is_some()
        || generation_config.max_output_tokens.is_some()
        || generation_config.response_mime_type.is_some();

    let mut extras = request.extras.clone();
    extras.retain(|key, _| {
        let reserved = RESERVED_FIELDS.contains(&key.as_str());
        if reserved {
            tracing::warn!("ignoring extra field {:?} that shadows a request field", key);
        }
        !reserved
    });

    Ok(GenerateContentRequest {
        contents,
        system_instruction,
        tools,
        tool_config,
        generation_config: has_generation_config.then_some(generation_config),
        extras,
    })
}

/// Split messages into the system instruction and the `contents` list
///
/// Assistant turns become role `model`. Tool results become `functionResponse` parts in a
/// `user` turn, with consecutive results merged into one turn.
fn to_gemini_contents(
    messages: &[Message],
) -> Result<(Option<Content>, Vec<Content>), ProviderError> {
    let mut system_parts = Vec::new();
    let mut contents: Vec<Content> = Vec::new();
    let mut issued: HashMap<&str, &str> = HashMap::new();
    let mut last_was_tool_result = false;

    for message in messages {
        match message.role {
            Role::System => {
                if !message.content.is_empty() {
                    system_parts.push(Part::text(message.content.as_str()));
                }
                last_was_tool_result = false;
            }
            Role::User => {
                contents.push(Content {
                    role: Some("user"),
                    parts: vec![Part::text(message.content.as_str())],
                });
                last_was_tool_result = false;
            }
            Role::Assistant => {
                let mut parts = Vec::new();
                if !message.content.is_empty() {
                    parts.push(Part::text(message.content.as_str()));
                }
                for call in &message.tool_calls {
                    issued.insert(call.id.as_str(), call.name.as_str());
                    parts.push(Part {
                        text: None,
                        function_call: Some(FunctionCallPart {
                            name: sanitize_function_name(&call.name),
                            args: object_arguments(&call.arguments)?,
                        }),
                        function_response: None,
                    });
                }
                if !parts.is_empty() {
                    contents.push(Content {
                        role: Some("model"),
                        parts,
                    });
                }
                last_was_tool_result = false;
            }
            Role::Tool => {
                let name = message
                    .name
                    .as_deref()
                    .or_else(|| {
                        message
                            .tool_call_id
                            .as_deref()
                            .and_then(|id| issued.get(id).copied())
                    })
                    .ok_or_else(|| {
                        ProviderError::InvalidRequest(format!(
                            "cannot resolve the function name for tool result {:?}",
                            message.tool_call_id.as_deref().unwrap_or_default()
                        ))
                    })?;

                let part = Part {
                    text: None,
                    function_call: None,
                    function_response: Some(FunctionResponsePart {
                        name: sanitize_function_name(name),
                        response: tool_response(&message.content)?,
                    }),
                };

                let merge_into = if last_was_tool_result {
                    contents.last_mut()
                } else {
                    None
                };
                match merge_into {
                    Some(content) => content.parts.push(part),
                    None => contents.push(Content {
                        role: Some("user"),
                        parts: vec![part],
                    }),
                }
                last_was_tool_result = true;
            }
        }
    }

    let system_instruction = (!system_parts.is_empty()).then(|| Content {
        role: None,
        parts: system_parts,
    });
    Ok((system_instruction, contents))
}

/// `functionResponse.response` must be an object, so other results are wrapped
fn tool_response(content: &str) -> Result<Box<RawValue>, ProviderError> {
    if content.trim_start().starts_with('{') {
        if let Ok(raw) = RawValue::from_string(content.to_string()) {
            return Ok(raw);
        }
    }
    serde_json::value::to_raw_value(&json!({ "content": content }))
        .map_err(|e| ProviderError::Internal(e.to_string()))
}

fn parse_response(body: bytes::Bytes) -> Result<ChatResponse, ProviderError> {
    let wire: GenerateContentResponse = decode_json(&body)?;

    if wire.error.as_ref().is_some_and(|error| !error.is_null()) {
        return Err(ProviderError::Protocol {
            status: 200,
            body: String::from_utf8_lossy(&body).into_owned(),
        });
    }
    if wire.candidates.is_empty() {
        return Err(ProviderError::Decode("no candidates in response".to_string()));
    }

    let mut normalizer = ToolCallNormalizer::new();
    let tool_calls = wire
        .function_calls()
        .into_iter()
        .map(|call| {
            normalizer.normalize(
                call.id.clone(),
                call.name.clone(),
                raw_arguments(call.args.as_deref()),
            )
        })
        .collect();

    Ok(ChatResponse {
        text: wire.text(),
        finish_reason: wire.finish_reason(),
        tool_calls,
        usage: wire.usage(),
        raw: body,
    })
}

#[async_trait]
impl Provider for GeminiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
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

        let response = self.post(ctx, request, "generateContent").await?;
        let body = read_body(ctx, response).await?;
        tracing::debug!("received {} bytes from Gemini", body.len());

        parse_response(body)
    }

    async fn stream(
        &self,
        ctx: &CallContext,
        request: &ChatRequest,
    ) -> Result<ChatStream, ProviderError> {
        request.validate()?;

        let response = self.post(ctx, request, "streamGenerateContent").await?;
        Ok(ChatStream::new(
            ctx,
            response.bytes_stream(),
            JsonArrayDecoder::new(),
        ))
    }

    async fn list_models(&self, ctx: &CallContext) -> Result<Vec<ModelInfo>, ProviderError> {
        let url = endpoint(&self.config.host, "v1beta/models");
        tracing::debug!("listing Gemini models from {}", url);

        let builder = self
            .client
            .get(&url)
            .query(&[("pageSize", "1000")])
            .header(API_KEY_HEADER, &self.config.api_key);

        let response = send(ctx, builder).await?;
        let body = read_body(ctx, response).await?;
        let models: ModelsResponse = decode_json(&body)?;

        let ids = models.models.into_iter().map(|model| {
            model
                .name
                .strip_prefix("models/")
                .map(str::to_string)
                .unwrap_or(model.name)
        });
        Ok(self.catalog.annotate(ProviderKind::Gemini, ids))
    }
}
