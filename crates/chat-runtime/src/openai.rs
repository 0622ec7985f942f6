//! OpenAI-Compatible Provider
//!
//! Implementation of `LlmProvider` for the `/chat/completions` API with
//! function calling. Works against OpenAI and any service that speaks the
//! same wire format.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chat_core::{
    error::{AgentError, Result},
    message::{Message, Role},
    provider::{
        CompletionChunk, CompletionOutcome, CompletionStream, GenerationOptions, LlmProvider,
        ProviderInfo,
    },
    tool::{ToolCall, ToolSchema},
};
use futures::{Stream, StreamExt};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI provider configuration
#[derive(Clone, Debug)]
pub struct OpenAiConfig {
    /// API root, e.g. `https://api.openai.com/v1`
    pub base_url: String,

    /// Bearer token; omitted for local gateways that need none
    pub api_key: Option<String>,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.into(),
            api_key: None,
            timeout_secs: 120,
        }
    }
}

impl OpenAiConfig {
    /// Read `OPENAI_BASE_URL`, `OPENAI_API_KEY` and `OPENAI_TIMEOUT_SECS`
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("OPENAI_BASE_URL") {
            config.base_url = url;
        }
        config.api_key = std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty());
        if let Ok(secs) = std::env::var("OPENAI_TIMEOUT_SECS") {
            config.timeout_secs = secs.parse().map_err(|_| {
                AgentError::Config(format!("OPENAI_TIMEOUT_SECS is not a number: {secs}"))
            })?;
        }

        Ok(config)
    }
}

// --- wire format -----------------------------------------------------------

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: Role,
    content: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<&'a str>,
}

#[derive(Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunctionDef<'a>,
}

#[derive(Serialize)]
struct WireFunctionDef<'a> {
    name: &'a str,
    description: &'a str,
    parameters: serde_json::Value,
}

#[derive(Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default = "function_kind")]
    kind: String,
    function: WireFunction,
}

#[derive(Serialize, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

fn function_kind() -> String {
    "function".into()
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Deserialize)]
struct StreamEvent {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Default, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

impl From<&ToolCall> for WireToolCall {
    fn from(call: &ToolCall) -> Self {
        Self {
            id: call.id.clone(),
            kind: function_kind(),
            function: WireFunction {
                name: call.name.clone(),
                arguments: call.arguments.clone(),
            },
        }
    }
}

impl From<WireToolCall> for ToolCall {
    fn from(call: WireToolCall) -> Self {
        ToolCall::new(call.id, call.function.name, call.function.arguments)
    }
}

/// Tool call fragments of a streamed response, keyed by their index
#[derive(Default)]
struct ToolCallAccumulator {
    calls: BTreeMap<usize, (String, String, String)>,
}

impl ToolCallAccumulator {
    fn push(&mut self, delta: ToolCallDelta) {
        let (id, name, arguments) = self.calls.entry(delta.index).or_default();
        if let Some(fragment) = delta.id {
            id.push_str(&fragment);
        }
        if let Some(function) = delta.function {
            if let Some(fragment) = function.name {
                name.push_str(&fragment);
            }
            if let Some(fragment) = function.arguments {
                arguments.push_str(&fragment);
            }
        }
    }

    fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    fn finish(self) -> Result<Vec<ToolCall>> {
        self.calls
            .into_iter()
            .map(|(index, (id, name, arguments))| {
                if name.is_empty() {
                    return Err(AgentError::MalformedResponse(format!(
                        "streamed tool call {index} has no function name"
                    )));
                }
                Ok(ToolCall::new(id, name, arguments))
            })
            .collect()
    }
}

// --- provider --------------------------------------------------------------

/// OpenAI chat completions provider
pub struct OpenAiProvider {
    client: reqwest::Client,
    config: OpenAiConfig,
}

impl OpenAiProvider {
    /// Create from configuration
    pub fn from_config(config: OpenAiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AgentError::Config(format!("HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_config(OpenAiConfig::from_env()?)
    }

    pub fn config(&self) -> &OpenAiConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Convert conversation messages to the wire format
    fn convert_messages(messages: &[Message]) -> Vec<WireMessage<'_>> {
        messages
            .iter()
            .map(|m| {
                let content = if m.content.is_empty() && !m.tool_calls.is_empty() {
                    None
                } else {
                    Some(m.content.as_str())
                };
                WireMessage {
                    role: m.role,
                    content,
                    tool_calls: m.tool_calls.iter().map(WireToolCall::from).collect(),
                    tool_call_id: m.tool_call_id.as_deref(),
                }
            })
            .collect()
    }

    fn convert_tools(tools: &[ToolSchema]) -> Vec<WireTool<'_>> {
        tools
            .iter()
            .map(|t| WireTool {
                kind: "function",
                function: WireFunctionDef {
                    name: &t.name,
                    description: &t.description,
                    parameters: t.json_schema(),
                },
            })
            .collect()
    }

    fn build_request<'a>(
        messages: &'a [Message],
        tools: &'a [ToolSchema],
        options: &'a GenerationOptions,
        stream: bool,
    ) -> ChatRequest<'a> {
        ChatRequest {
            model: &options.model,
            messages: Self::convert_messages(messages),
            tools: Self::convert_tools(tools),
            temperature: options.temperature,
            max_completion_tokens: options.max_tokens,
            stream,
        }
    }

    /// Send a request, mapping transport and status failures
    async fn send(&self, request: &ChatRequest<'_>) -> Result<reqwest::Response> {
        let mut builder = self.client.post(self.url("chat/completions")).json(request);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(transport_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(status_error(status, &body))
    }

    /// Convert a non-streamed response body to an outcome
    fn convert_response(response: ChatResponse) -> Result<CompletionOutcome> {
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AgentError::MalformedResponse("response has no choices".into()))?;

        let content = choice.message.content.unwrap_or_default();
        match choice.message.tool_calls {
            Some(calls) if !calls.is_empty() => Ok(CompletionOutcome::ToolRequests {
                content,
                calls: calls.into_iter().map(ToolCall::from).collect(),
            }),
            _ => Ok(CompletionOutcome::FinalAnswer(content)),
        }
    }
}

fn transport_error(err: reqwest::Error) -> AgentError {
    if err.is_decode() {
        AgentError::MalformedResponse(err.to_string())
    } else {
        AgentError::TransientUnavailable(err.to_string())
    }
}

fn status_error(status: StatusCode, body: &str) -> AgentError {
    let detail = format!("HTTP {status}: {body}");
    match status {
        StatusCode::TOO_MANY_REQUESTS => AgentError::TransientUnavailable(detail),
        s if s.is_server_error() => AgentError::TransientUnavailable(detail),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => AgentError::Auth(detail),
        _ => AgentError::Provider(detail),
    }
}

/// Turn an SSE body into completion chunks
fn sse_chunks(response: reqwest::Response) -> impl Stream<Item = Result<CompletionChunk>> + Send {
    async_stream::try_stream! {
        let mut bytes = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();
        let mut accumulator = ToolCallAccumulator::default();
        let mut side_text = String::new();

        'body: while let Some(chunk) = bytes.next().await {
            let chunk = chunk.map_err(transport_error)?;
            buffer.extend_from_slice(&chunk);

            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let raw: Vec<u8> = buffer.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&raw);
                let Some(data) = line.trim().strip_prefix("data:") else {
                    continue;
                };
                let data = data.trim();
                if data == "[DONE]" {
                    break 'body;
                }

                let event: StreamEvent = serde_json::from_str(data)
                    .map_err(|e| AgentError::MalformedResponse(format!("stream event: {e}")))?;

                for choice in event.choices {
                    if let Some(calls) = choice.delta.tool_calls {
                        calls.into_iter().for_each(|c| accumulator.push(c));
                    }
                    match choice.delta.content {
                        Some(text) if text.is_empty() => {}
                        Some(text) if accumulator.is_empty() => {
                            yield CompletionChunk::Text(text);
                        }
                        Some(text) => side_text.push_str(&text),
                        None => {}
                    }
                }
            }
        }

        if !accumulator.is_empty() {
            let calls = accumulator.finish()?;
            yield CompletionChunk::ToolRequests { content: side_text, calls };
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "OpenAI".into(),
            endpoint: self.config.base_url.clone(),
            supports_streaming: true,
            supports_tools: true,
        }
    }

    async fn health_check(&self) -> Result<bool> {
        let mut builder = self.client.get(self.url("models"));
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        match builder.send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(e) => {
                tracing::warn!("OpenAI health check failed: {}", e);
                Ok(false)
            }
        }
    }

    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        options: &GenerationOptions,
    ) -> Result<CompletionOutcome> {
        let request = Self::build_request(messages, tools, options, false);
        tracing::debug!(
            model = %options.model,
            messages = messages.len(),
            tools = tools.len(),
            "Sending chat completion"
        );

        let response = self.send(&request).await?;
        let body = response.text().await.map_err(transport_error)?;
        let parsed: ChatResponse = serde_json::from_str(&body)
            .map_err(|e| AgentError::MalformedResponse(format!("chat completion: {e}")))?;

        Self::convert_response(parsed)
    }

    async fn complete_stream(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        options: &GenerationOptions,
    ) -> Result<CompletionStream> {
        let request = Self::build_request(messages, tools, options, true);
        tracing::debug!(
            model = %options.model,
            messages = messages.len(),
            tools = tools.len(),
            "Sending streamed chat completion"
        );

        let response = self.send(&request).await?;
        Ok(Box::pin(sse_chunks(response)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    fn provider(server: &MockServer) -> OpenAiProvider {
        OpenAiProvider::from_config(OpenAiConfig {
            base_url: server.uri(),
            api_key: Some("sk-test".into()),
            timeout_secs: 5,
        })
        .unwrap()
    }

    fn conversation() -> Vec<Message> {
        vec![Message::system("Be brief."), Message::user("What is in report.txt?")]
    }

    #[test]
    fn test_config_defaults() {
        let config = OpenAiConfig::default();
        assert_eq!(config.base_url, "https://api.openai.com/v1");
        assert_eq!(config.timeout_secs, 120);
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_message_conversion() {
        let calls = vec![ToolCall::new("call_1", "GetFileContent", r#"{"fileName":"report"}"#)];
        let messages = vec![
            Message::user("Hello"),
            Message::assistant_tool_calls("", calls),
            Message::tool("File: report.txt\n\nhi", "call_1"),
        ];

        let wire = serde_json::to_value(OpenAiProvider::convert_messages(&messages)).unwrap();
        assert_eq!(wire[0], json!({"role": "user", "content": "Hello"}));
        assert_eq!(wire[1]["content"], Value::Null);
        assert_eq!(wire[1]["tool_calls"][0]["type"], "function");
        assert_eq!(wire[1]["tool_calls"][0]["function"]["name"], "GetFileContent");
        assert_eq!(wire[2]["role"], "tool");
        assert_eq!(wire[2]["tool_call_id"], "call_1");
    }

    #[tokio::test]
    async fn test_complete_final_answer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": "It says hi."}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = provider(&server)
            .complete(&conversation(), &[], &GenerationOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome, CompletionOutcome::FinalAnswer("It says hi.".into()));
    }

    #[tokio::test]
    async fn test_complete_sends_manifest_and_reads_tool_calls() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(|req: &Request| {
                let body: Value = serde_json::from_slice(&req.body).unwrap();
                assert_eq!(body["model"], "gpt-5-nano");
                assert_eq!(body["tools"][0]["type"], "function");
                assert_eq!(body["tools"][0]["function"]["name"], "SearchFiles");
                assert_eq!(body["tools"][0]["function"]["parameters"]["required"], json!(["query"]));
                assert!(body.get("stream").is_none());

                ResponseTemplate::new(200).set_body_json(json!({
                    "choices": [{"message": {
                        "role": "assistant",
                        "content": null,
                        "tool_calls": [
                            {"id": "call_a", "type": "function",
                             "function": {"name": "SearchFiles", "arguments": "{\"query\":\"budget\"}"}},
                            {"id": "call_b", "type": "function",
                             "function": {"name": "GetFileContent", "arguments": "{\"fileName\":\"budget\"}"}}
                        ]
                    }}]
                }))
            })
            .mount(&server)
            .await;

        let manifest = vec![ToolSchema {
            name: "SearchFiles".into(),
            description: "Search".into(),
            parameters: vec![chat_core::ParameterSchema::required_string("query", "q")],
            category: None,
        }];

        let outcome = provider(&server)
            .complete(&conversation(), &manifest, &GenerationOptions::default())
            .await
            .unwrap();

        let CompletionOutcome::ToolRequests { content, calls } = outcome else {
            panic!("expected tool requests");
        };
        assert!(content.is_empty());
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], ToolCall::new("call_a", "SearchFiles", r#"{"query":"budget"}"#));
        assert_eq!(calls[1].id, "call_b");
    }

    #[tokio::test]
    async fn test_null_content_without_calls_is_empty_answer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": null}}]
            })))
            .mount(&server)
            .await;

        let outcome = provider(&server)
            .complete(&conversation(), &[], &GenerationOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome, CompletionOutcome::FinalAnswer(String::new()));
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let cases = [
            (429, "transient"),
            (503, "transient"),
            (401, "auth"),
            (403, "auth"),
            (400, "provider"),
        ];

        for (status, expected) in cases {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .respond_with(ResponseTemplate::new(status).set_body_string("nope"))
                .mount(&server)
                .await;

            let err = provider(&server)
                .complete(&conversation(), &[], &GenerationOptions::default())
                .await
                .unwrap_err();
            let kind = match err {
                AgentError::TransientUnavailable(_) => "transient",
                AgentError::Auth(_) => "auth",
                AgentError::Provider(_) => "provider",
                other => panic!("unexpected error for {status}: {other}"),
            };
            assert_eq!(kind, expected, "status {status}");
        }
    }

    #[tokio::test]
    async fn test_unparseable_body_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"choices\": ["))
            .mount(&server)
            .await;

        let err = provider(&server)
            .complete(&conversation(), &[], &GenerationOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::MalformedResponse(_)));

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
            .mount(&server)
            .await;

        let err = provider(&server)
            .complete(&conversation(), &[], &GenerationOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_unreachable_service_is_transient() {
        let provider = OpenAiProvider::from_config(OpenAiConfig {
            base_url: "http://127.0.0.1:1".into(),
            api_key: None,
            timeout_secs: 2,
        })
        .unwrap();

        let err = provider
            .complete(&conversation(), &[], &GenerationOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    async fn collect(stream: CompletionStream) -> Vec<CompletionChunk> {
        stream.map(|c| c.unwrap()).collect().await
    }

    #[tokio::test]
    async fn test_stream_text_deltas() {
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\",\"content\":\"\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"The file \"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"says hi.\"}}]}\n\n",
            "data: [DONE]\n\n",
        );
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let stream = provider(&server)
            .complete_stream(&conversation(), &[], &GenerationOptions::default())
            .await
            .unwrap();
        assert_eq!(
            collect(stream).await,
            vec![
                CompletionChunk::Text("The file ".into()),
                CompletionChunk::Text("says hi.".into()),
            ]
        );
    }

    #[tokio::test]
    async fn test_stream_accumulates_tool_calls_by_index() {
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_a\",\"type\":\"function\",\"function\":{\"name\":\"SearchFiles\",\"arguments\":\"\"}}]}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":1,\"id\":\"call_b\",\"function\":{\"name\":\"GetFileContent\",\"arguments\":\"{\\\"fileName\\\"\"}}]}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"{\\\"query\\\":\\\"q\\\"}\"}}]}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":1,\"function\":{\"arguments\":\":\\\"a\\\"}\"}}]}}]}\n\n",
            "data: [DONE]\n\n",
        );
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let stream = provider(&server)
            .complete_stream(&conversation(), &[], &GenerationOptions::default())
            .await
            .unwrap();
        assert_eq!(
            collect(stream).await,
            vec![CompletionChunk::ToolRequests {
                content: String::new(),
                calls: vec![
                    ToolCall::new("call_a", "SearchFiles", r#"{"query":"q"}"#),
                    ToolCall::new("call_b", "GetFileContent", r#"{"fileName":"a"}"#),
                ],
            }]
        );
    }

    #[tokio::test]
    async fn test_stream_bad_event_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw("data: {not json}\n\n", "text/event-stream"),
            )
            .mount(&server)
            .await;

        let mut stream = provider(&server)
            .complete_stream(&conversation(), &[], &GenerationOptions::default())
            .await
            .unwrap();
        assert!(matches!(
            stream.next().await,
            Some(Err(AgentError::MalformedResponse(_)))
        ));
    }
}
