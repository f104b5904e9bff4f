use std::sync::Arc;

use anyhow::Result;
use futures::StreamExt;
use llm_query::{
    catalog::ModelCatalog,
    context::CallContext,
    conversation::Conversation,
    models::{message::Message, request::ChatRequest, tool::Tool},
    providers::{
        base::Provider,
        configs::{GeminiProviderConfig, OllamaProviderConfig, OpenAiCompatibleConfig, ProviderConfig},
        factory::{get_provider, ProviderKind},
    },
    secrets::EnvironmentSecrets,
    settings::Settings,
};
use serde_json::{json, Value};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const API_KEY: &str = "test-key-0123456789abcdefghijklmnopqrstuvwxyz";

// Gemini reports "STOP", the others "stop"
fn assert_stop(finish_reason: Option<&str>) {
    assert!(
        finish_reason.is_some_and(|reason| reason.eq_ignore_ascii_case("stop")),
        "unexpected finish reason {:?}",
        finish_reason
    );
}

/// Canned wire bodies for one provider flavour
struct Fixture {
    query_path: String,
    stream_path: String,
    models_path: &'static str,
    text_body: Value,
    tool_body: Value,
    stream_body: &'static str,
    stream_content_type: &'static str,
    models_body: Value,
}

/// Generic test harness for any Provider implementation
struct ProviderTester {
    provider: Box<dyn Provider>,
    server: MockServer,
    fixture: Fixture,
}

impl ProviderTester {
    async fn new(kind: ProviderKind, fixture: Fixture) -> Result<Self> {
        let server = MockServer::start().await;
        let config = match kind {
            ProviderKind::Gemini => ProviderConfig::Gemini(
                GeminiProviderConfig::new(API_KEY, kind.default_model()).with_host(server.uri()),
            ),
            ProviderKind::Ollama => ProviderConfig::Ollama(
                OllamaProviderConfig::new(kind.default_model()).with_host(server.uri()),
            ),
            _ => ProviderConfig::OpenAiCompatible(
                OpenAiCompatibleConfig::new(kind, API_KEY, kind.default_model())
                    .with_host(server.uri()),
            ),
        };

        Ok(Self {
            provider: get_provider(config, Arc::new(ModelCatalog::default()))?,
            server,
            fixture,
        })
    }

    async fn respond(&self, route: &str, verb: &str, template: ResponseTemplate) {
        self.server.reset().await;
        Mock::given(method(verb))
            .and(path(route))
            .respond_with(template)
            .mount(&self.server)
            .await;
    }

    fn request(&self) -> ChatRequest {
        ChatRequest::new(vec![
            Message::system("You are a helpful assistant."),
            Message::user("Just say hello!"),
        ])
    }

    async fn test_basic_response(&self) -> Result<()> {
        self.respond(
            &self.fixture.query_path,
            "POST",
            ResponseTemplate::new(200).set_body_json(&self.fixture.text_body),
        )
        .await;

        let response = self.provider.query(&CallContext::new(), &self.request()).await?;

        assert_eq!(response.text, "Hello!");
        assert!(!response.has_tool_calls(), "Expected text response");
        assert_stop(response.finish_reason.as_deref());
        Ok(())
    }

    async fn test_tool_usage(&self) -> Result<()> {
        self.respond(
            &self.fixture.query_path,
            "POST",
            ResponseTemplate::new(200).set_body_json(&self.fixture.tool_body),
        )
        .await;

        let weather_tool = Tool::new(
            "get_weather",
            "Get the weather for a location",
            json!({
                "type": "object",
                "required": ["location"],
                "properties": {
                    "location": {"type": "string", "description": "The city name"}
                }
            }),
        );
        let request = self.request().with_tools(vec![weather_tool]);
        let response = self.provider.query(&CallContext::new(), &request).await?;

        assert_eq!(response.tool_calls.len(), 1, "Expected one tool call");
        let call = &response.tool_calls[0];
        assert_eq!(call.name, "get_weather");
        assert!(!call.id.is_empty());
        assert_eq!(call.arguments_value()?, json!({"location": "Paris"}));
        Ok(())
    }

    async fn test_stream(&self) -> Result<()> {
        self.respond(
            &self.fixture.stream_path,
            "POST",
            ResponseTemplate::new(200)
                .set_body_raw(self.fixture.stream_body, self.fixture.stream_content_type),
        )
        .await;

        let mut stream = self
            .provider
            .stream(&CallContext::new(), &self.request())
            .await?;

        let mut text = String::new();
        let mut done = 0;
        while let Some(delta) = stream.next().await {
            if let Some(fragment) = &delta.text {
                text.push_str(fragment);
            }
            if delta.done {
                done += 1;
                assert_stop(delta.finish_reason.as_deref());
            }
        }
        let response = stream.response().await?;

        assert_eq!(done, 1, "Expected exactly one done delta");
        assert_eq!(text, "Hello, world!");
        assert_eq!(response.text, text);
        Ok(())
    }

    async fn test_list_models(&self) -> Result<()> {
        self.respond(
            self.fixture.models_path,
            "GET",
            ResponseTemplate::new(200).set_body_json(&self.fixture.models_body),
        )
        .await;

        let models = self.provider.list_models(&CallContext::new()).await?;
        let names: Vec<&str> = models.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["model-a", "model-b"]);
        Ok(())
    }

    async fn test_server_error(&self) -> Result<()> {
        self.respond(
            &self.fixture.query_path,
            "POST",
            ResponseTemplate::new(500).set_body_string("upstream exploded"),
        )
        .await;

        let err = self
            .provider
            .query(&CallContext::new(), &self.request())
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(500));
        assert_eq!(err.body(), Some("upstream exploded"));
        assert!(err.is_retryable());
        Ok(())
    }

    /// Run all provider tests
    async fn run_test_suite(&self) -> Result<()> {
        self.test_basic_response().await?;
        self.test_tool_usage().await?;
        self.test_stream().await?;
        self.test_list_models().await?;
        self.test_server_error().await?;
        Ok(())
    }
}

fn openai_fixture() -> Fixture {
    Fixture {
        query_path: "/chat/completions".to_string(),
        stream_path: "/chat/completions".to_string(),
        models_path: "/models",
        text_body: json!({
            "id": "chatcmpl-123",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "Hello!"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 12, "completion_tokens": 2, "total_tokens": 14}
        }),
        tool_body: json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_abc",
                        "type": "function",
                        "function": {"name": "get_weather", "arguments": "{\"location\":\"Paris\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        }),
        stream_body: concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hello,\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\" world!\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
            "data: [DONE]\n\n",
        ),
        stream_content_type: "text/event-stream",
        models_body: json!({
            "object": "list",
            "data": [{"id": "model-b", "object": "model"}, {"id": "model-a", "object": "model"}]
        }),
    }
}

fn gemini_fixture() -> Fixture {
    let model = ProviderKind::Gemini.default_model();
    Fixture {
        query_path: format!("/v1beta/models/{}:generateContent", model),
        stream_path: format!("/v1beta/models/{}:streamGenerateContent", model),
        models_path: "/v1beta/models",
        text_body: json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "Hello!"}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 5, "candidatesTokenCount": 2, "totalTokenCount": 7}
        }),
        tool_body: json!({
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [{"functionCall": {"name": "get_weather", "args": {"location": "Paris"}}}]
                },
                "finishReason": "STOP"
            }]
        }),
        stream_body: concat!(
            "[{\"candidates\":[{\"content\":{\"role\":\"model\",\"parts\":[{\"text\":\"Hello,\"}]}}]}\n",
            ",{\"candidates\":[{\"content\":{\"role\":\"model\",\"parts\":[{\"text\":\" world!\"}]},\"finishReason\":\"STOP\"}]}\n",
            "]",
        ),
        stream_content_type: "application/json",
        models_body: json!({
            "models": [{"name": "models/model-a"}, {"name": "models/model-b"}]
        }),
    }
}

fn ollama_fixture() -> Fixture {
    Fixture {
        query_path: "/api/chat".to_string(),
        stream_path: "/api/chat".to_string(),
        models_path: "/api/tags",
        text_body: json!({
            "message": {"role": "assistant", "content": "Hello!"},
            "done": true,
            "done_reason": "stop"
        }),
        tool_body: json!({
            "message": {
                "role": "assistant",
                "content": "",
                "tool_calls": [{"function": {"name": "get_weather", "arguments": {"location": "Paris"}}}]
            },
            "done": true,
            "done_reason": "stop"
        }),
        stream_body: concat!(
            "{\"message\":{\"role\":\"assistant\",\"content\":\"Hello,\"},\"done\":false}\n",
            "{\"message\":{\"role\":\"assistant\",\"content\":\" world!\"},\"done\":false}\n",
            "{\"message\":{\"role\":\"assistant\",\"content\":\"\"},\"done\":true,\"done_reason\":\"stop\"}\n",
        ),
        stream_content_type: "application/x-ndjson",
        models_body: json!({"models": [{"name": "model-b"}, {"name": "model-a"}]}),
    }
}

#[tokio::test]
async fn test_openai_provider() -> Result<()> {
    let tester = ProviderTester::new(ProviderKind::OpenAi, openai_fixture()).await?;
    tester.run_test_suite().await
}

#[tokio::test]
async fn test_openrouter_provider() -> Result<()> {
    let tester = ProviderTester::new(ProviderKind::OpenRouter, openai_fixture()).await?;
    tester.run_test_suite().await
}

#[tokio::test]
async fn test_xai_provider() -> Result<()> {
    let tester = ProviderTester::new(ProviderKind::Xai, openai_fixture()).await?;
    tester.run_test_suite().await
}

#[tokio::test]
async fn test_gemini_provider() -> Result<()> {
    let tester = ProviderTester::new(ProviderKind::Gemini, gemini_fixture()).await?;
    tester.run_test_suite().await
}

#[tokio::test]
async fn test_ollama_provider() -> Result<()> {
    let tester = ProviderTester::new(ProviderKind::Ollama, ollama_fixture()).await?;
    tester.run_test_suite().await
}

#[tokio::test]
async fn test_provider_from_settings() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", format!("Bearer {}", API_KEY).as_str()))
        .and(header("x-title", "settings-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(openai_fixture().text_body))
        .expect(1)
        .mount(&server)
        .await;

    let settings = Settings::from_toml(&format!(
        r#"
        [provider]
        type = "openrouter"
        host = "{}"
        api_key = "{}"

        [provider.headers]
        x-title = "settings-test"
        "#,
        server.uri(),
        API_KEY
    ))?;
    let config = settings.provider.into_config(&EnvironmentSecrets)?;
    let provider = get_provider(config, Arc::default())?;
    assert_eq!(provider.kind(), ProviderKind::OpenRouter);
    assert_eq!(provider.default_model(), "qwen/qwen3-4b:free");

    let conversation = Conversation::new("You are a helpful assistant.")?;
    conversation.add_user_message("Just say hello!")?;
    let response = provider
        .query(&CallContext::new(), &conversation.request())
        .await?;
    conversation.add_assistant_response(&response)?;

    assert_eq!(conversation.len(), 3);
    assert_eq!(conversation.snapshot()[2].content, "Hello!");
    Ok(())
}

#[tokio::test]
async fn test_tool_round_trip_through_conversation() -> Result<()> {
    let tester = ProviderTester::new(ProviderKind::OpenAi, openai_fixture()).await?;
    tester
        .respond(
            "/chat/completions",
            "POST",
            ResponseTemplate::new(200).set_body_json(&tester.fixture.tool_body),
        )
        .await;

    let conversation = Conversation::new("You are a helpful assistant.")?;
    conversation.add_user_message("What's the weather in Paris?")?;
    let response = tester
        .provider
        .query(&CallContext::new(), &conversation.request())
        .await?;
    conversation.add_assistant_response(&response)?;

    let pending = conversation.pending_tool_calls();
    assert_eq!(pending.len(), 1);
    conversation.add_tool_result(pending[0].id.clone(), "{\"forecast\":\"sunny\"}")?;
    assert!(conversation.pending_tool_calls().is_empty());

    // The follow-up request carries the original arguments untouched
    tester
        .respond(
            "/chat/completions",
            "POST",
            ResponseTemplate::new(200).set_body_json(&tester.fixture.text_body),
        )
        .await;
    tester
        .provider
        .query(&CallContext::new(), &conversation.request())
        .await?;

    let received = tester.server.received_requests().await.unwrap_or_default();
    let payload: Value = serde_json::from_slice(&received[0].body)?;
    let messages = payload["messages"].as_array().cloned().unwrap_or_default();
    assert_eq!(messages.len(), 4);
    assert_eq!(
        messages[2]["tool_calls"][0]["function"]["arguments"],
        "{\"location\":\"Paris\"}"
    );
    assert_eq!(messages[3]["role"], "tool");
    assert_eq!(messages[3]["tool_call_id"], "call_abc");
    Ok(())
}
