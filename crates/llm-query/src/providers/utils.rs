use std::collections::HashMap;

use bytes::Bytes;
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::context::CallContext;
use crate::errors::ProviderError;
use crate::models::tool::Tool;

/// Join a base URL and a path without doubling the slash
pub fn endpoint(host: &str, path: &str) -> String {
    format!(
        "{}/{}",
        host.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

pub fn with_headers(
    mut builder: RequestBuilder,
    headers: &HashMap<String, String>,
) -> RequestBuilder {
    for (key, value) in headers {
        builder = builder.header(key.as_str(), value.as_str());
    }
    builder
}

/// Send the request under the call context and reject non-2xx responses
pub async fn send(ctx: &CallContext, builder: RequestBuilder) -> Result<Response, ProviderError> {
    let response = ctx
        .run(async { builder.send().await.map_err(ProviderError::from) })
        .await?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = ctx
        .run(async { response.text().await.map_err(ProviderError::from) })
        .await?;
    tracing::warn!("provider returned {}: {}", status, body);

    if let Ok(payload) = serde_json::from_str::<Value>(&body) {
        if let Some(err) = payload
            .get("error")
            .and_then(check_openai_context_length_error)
        {
            return Err(err);
        }
    }

    Err(ProviderError::Protocol {
        status: status.as_u16(),
        body,
    })
}

/// Read the full body under the call context
pub async fn read_body(ctx: &CallContext, response: Response) -> Result<Bytes, ProviderError> {
    ctx.run(async { response.bytes().await.map_err(ProviderError::from) })
        .await
}

pub fn decode_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, ProviderError> {
    serde_json::from_slice(body).map_err(ProviderError::decode)
}

/// Convert tools to the `{type: function, function: {...}}` shape shared by OpenAI and Ollama
pub fn tools_to_openai_spec(tools: &[Tool]) -> Vec<Value> {
    tools
        .iter()
        .map(|tool| {
            json!({
                "type": "function",
                "function": {
                    "name": sanitize_function_name(&tool.name),
                    "description": tool.description,
                    "parameters": tool.parameters,
                }
            })
        })
        .collect()
}

/// Whether an OpenAI style `response_format` asks for JSON output
pub fn wants_json(response_format: &Value) -> bool {
    matches!(
        response_format.get("type").and_then(Value::as_str),
        Some("json_object") | Some("json_schema")
    )
}

pub fn sanitize_function_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

pub fn is_valid_function_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

pub fn check_openai_context_length_error(error: &Value) -> Option<ProviderError> {
    let code = error.get("code")?.as_str()?;
    if code == "context_length_exceeded" || code == "string_above_max_length" {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("Unknown error")
            .to_string();
        Some(ProviderError::ContextLengthExceeded(message))
    } else {
        None
    }
}
