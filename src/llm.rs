//! Model backend abstraction and per-provider completion clients.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::config::{AppConfig, ModelConfig, Provider};
use crate::error::{AttacheError, Result};
use crate::message::{Message, Role, ToolCall};
use crate::tool::ToolDescriptor;

/// Result of a single chat-completion request: final text, a batch of tool
/// calls, or both.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelCompletion {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

/// One element of a streamed completion.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    TextDelta(String),
    ToolCall(ToolCall),
}

/// Per-request parameters. Carried alongside each call so request-level
/// temperature overrides never touch shared configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletionParams {
    pub temperature: f64,
    pub max_tokens: Option<u32>,
}

/// A chat-completion service, remote or local.
#[async_trait]
pub trait CompletionBackend: Send + Sync + std::fmt::Debug {
    fn provider(&self) -> Provider;

    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDescriptor],
        params: &CompletionParams,
    ) -> Result<ModelCompletion>;

    /// Stream the completion. The default implementation performs a regular
    /// completion and yields it as a single batch; transports with native
    /// streaming override this.
    async fn complete_stream(
        &self,
        messages: &[Message],
        tools: &[ToolDescriptor],
        params: &CompletionParams,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let completion = self.complete(messages, tools, params).await?;
        let mut events: Vec<Result<StreamEvent>> = completion
            .tool_calls
            .into_iter()
            .map(|call| Ok(StreamEvent::ToolCall(call)))
            .collect();
        if let Some(content) = completion.content {
            events.push(Ok(StreamEvent::TextDelta(content)));
        }
        Ok(futures::stream::iter(events).boxed())
    }
}

/// Map a configured provider to a constructed client.
///
/// The provider enum was validated when the configuration was parsed, so
/// `UnsupportedProvider` is only reachable for providers compiled out of
/// this build. Credential problems surface here as `BackendConstruction`;
/// they are fatal to startup and never retried.
pub async fn select_backend(cfg: &AppConfig) -> Result<Arc<dyn CompletionBackend>> {
    let model = &cfg.model;
    match model.provider {
        Provider::OpenAi => Ok(Arc::new(OpenAiBackend::openai(model)?)),
        Provider::LlamaApi => Ok(Arc::new(OpenAiBackend::llamaapi(model)?)),
        Provider::LlamaCpp => Ok(Arc::new(OpenAiBackend::llamacpp(model)?)),
        Provider::Anthropic => Ok(Arc::new(AnthropicBackend::from_config(model)?)),
        Provider::Gemini => Ok(Arc::new(GeminiBackend::from_config(model)?)),
        Provider::Ollama => Ok(Arc::new(OllamaBackend::from_config(model)?)),
        #[cfg(feature = "aws")]
        Provider::Bedrock => Ok(Arc::new(BedrockBackend::from_config(model).await?)),
        #[cfg(not(feature = "aws"))]
        Provider::Bedrock => Err(AttacheError::UnsupportedProvider(
            "bedrock (this build lacks the `aws` feature)".into(),
        )),
    }
}

fn coalesce_error(status: reqwest::StatusCode, body: &str, provider: &str) -> AttacheError {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return AttacheError::Backend(format!("{provider} rate limit exceeded: {body}"));
    }
    AttacheError::Backend(format!("{provider} request failed with {status}: {body}"))
}

fn construction_error(provider: Provider, reason: impl Into<String>) -> AttacheError {
    AttacheError::BackendConstruction {
        provider: provider.as_str().to_string(),
        reason: reason.into(),
    }
}

fn build_http_client(provider: Provider, timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|err| construction_error(provider, format!("http client error: {err}")))
}

fn serialize_arguments(args: &Value) -> String {
    serde_json::to_string(args).unwrap_or_else(|_| args.to_string())
}

// ─────────────────────────────────────────────────────────────────────────
// OpenAI-compatible family: OpenAI, LlamaAPI, llama.cpp server
// ─────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct OpenAiBackend {
    provider: Provider,
    http: reqwest::Client,
    model: String,
    api_key: Option<String>,
    base_url: String,
}

impl OpenAiBackend {
    pub fn openai(cfg: &ModelConfig) -> Result<Self> {
        let api_key = cfg
            .openai
            .api_key
            .clone()
            .ok_or_else(|| construction_error(Provider::OpenAi, "missing OpenAI API key"))?;
        Ok(Self {
            provider: Provider::OpenAi,
            http: build_http_client(Provider::OpenAi, Duration::from_secs(60))?,
            model: cfg.model.clone().unwrap_or_else(|| "gpt-4o".to_string()),
            api_key: Some(api_key),
            base_url: cfg
                .openai
                .endpoint
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
        })
    }

    pub fn llamaapi(cfg: &ModelConfig) -> Result<Self> {
        let api_key = cfg
            .llamaapi
            .api_key
            .clone()
            .ok_or_else(|| construction_error(Provider::LlamaApi, "missing LlamaAPI API key"))?;
        Ok(Self {
            provider: Provider::LlamaApi,
            http: build_http_client(Provider::LlamaApi, Duration::from_secs(120))?,
            model: cfg
                .model
                .clone()
                .unwrap_or_else(|| "llama3.3-70b".to_string()),
            api_key: Some(api_key),
            base_url: cfg
                .llamaapi
                .endpoint
                .clone()
                .unwrap_or_else(|| "https://api.llama.com/compat/v1".to_string()),
        })
    }

    /// llama.cpp's bundled server speaks the OpenAI wire format on a local
    /// port; no credential is required.
    pub fn llamacpp(cfg: &ModelConfig) -> Result<Self> {
        Ok(Self {
            provider: Provider::LlamaCpp,
            // Local models can be slow.
            http: build_http_client(Provider::LlamaCpp, Duration::from_secs(300))?,
            model: cfg.model.clone().unwrap_or_else(|| "default".to_string()),
            api_key: cfg.llamacpp.api_key.clone(),
            base_url: cfg
                .llamacpp
                .endpoint
                .clone()
                .unwrap_or_else(|| "http://localhost:8080/v1".to_string()),
        })
    }

    fn to_wire_messages(messages: &[Message]) -> Vec<OpenAiMessage> {
        let mut built = Vec::new();
        for message in messages {
            let role = match message.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => "tool",
            }
            .to_string();

            let tool_calls = message.tool_call.as_ref().map(|call| {
                vec![OpenAiToolCall {
                    id: call.id.clone(),
                    r#type: "function".to_string(),
                    function: OpenAiFunctionCall {
                        name: call.name.clone(),
                        arguments: serialize_arguments(&call.arguments),
                    },
                }]
            });

            let content = if message.role == Role::Tool {
                message
                    .tool_result
                    .as_ref()
                    .map(|result| serialize_arguments(&result.output))
                    .or_else(|| Some(message.content.clone()))
            } else {
                Some(message.content.clone())
            };

            built.push(OpenAiMessage {
                role,
                content,
                tool_call_id: message
                    .tool_result
                    .as_ref()
                    .and_then(|result| result.tool_call_id.clone()),
                tool_calls,
            });
        }
        built
    }

    fn to_wire_tools(tools: &[ToolDescriptor]) -> Option<Vec<OpenAiTool>> {
        if tools.is_empty() {
            return None;
        }
        Some(
            tools
                .iter()
                .map(|tool| OpenAiTool {
                    r#type: "function".to_string(),
                    function: OpenAiFunction {
                        name: tool.name.clone(),
                        description: Some(tool.description.clone()),
                        parameters: tool.parameters.clone(),
                    },
                })
                .collect(),
        )
    }

    fn payload(
        &self,
        messages: &[Message],
        tools: &[ToolDescriptor],
        params: &CompletionParams,
        stream: bool,
    ) -> Value {
        let mut payload = json!({
            "model": self.model,
            "messages": Self::to_wire_messages(messages),
            "temperature": params.temperature,
            "stream": stream,
        });
        if let Some(max_tokens) = params.max_tokens {
            payload["max_tokens"] = json!(max_tokens);
        }
        if let Some(wire_tools) = Self::to_wire_tools(tools) {
            payload["tools"] = json!(wire_tools);
            payload["tool_choice"] = json!("auto");
        }
        payload
    }

    async fn send(&self, payload: &Value) -> Result<reqwest::Response> {
        let mut builder = self.http.post(format!("{}/chat/completions", self.base_url));
        if let Some(key) = &self.api_key {
            builder = builder.header(reqwest::header::AUTHORIZATION, format!("Bearer {key}"));
        }
        let resp = builder.json(payload).send().await.map_err(|err| {
            AttacheError::Backend(format!("{} request error: {err}", self.provider))
        })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(coalesce_error(status, &body, self.provider.as_str()));
        }
        Ok(resp)
    }
}

#[async_trait]
impl CompletionBackend for OpenAiBackend {
    fn provider(&self) -> Provider {
        self.provider
    }

    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDescriptor],
        params: &CompletionParams,
    ) -> Result<ModelCompletion> {
        let payload = self.payload(messages, tools, params, false);
        let resp = self.send(&payload).await?;

        let body: OpenAiResponse = resp.json().await.map_err(|err| {
            AttacheError::Backend(format!("{} response parse error: {err}", self.provider))
        })?;

        let first = body.choices.into_iter().next().ok_or_else(|| {
            AttacheError::Backend(format!("{} returned no choices", self.provider))
        })?;

        let mut tool_calls = Vec::new();
        if let Some(calls) = first.message.tool_calls {
            for call in calls {
                let arguments = serde_json::from_str(&call.function.arguments)
                    .unwrap_or_else(|_| Value::String(call.function.arguments.clone()));
                tool_calls.push(ToolCall {
                    id: call.id,
                    name: call.function.name,
                    arguments,
                });
            }
        }

        Ok(ModelCompletion {
            content: first.message.content,
            tool_calls,
        })
    }

    async fn complete_stream(
        &self,
        messages: &[Message],
        tools: &[ToolDescriptor],
        params: &CompletionParams,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let payload = self.payload(messages, tools, params, true);
        let resp = self.send(&payload).await?;
        let provider = self.provider;

        let (tx, rx) = mpsc::channel::<Result<StreamEvent>>(32);
        tokio::spawn(async move {
            let mut bytes = resp.bytes_stream();
            let mut line_buf = String::new();
            let mut pending: Vec<ToolCallState> = Vec::new();

            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(err) => {
                        let _ = tx
                            .send(Err(AttacheError::Backend(format!(
                                "{provider} stream error: {err}"
                            ))))
                            .await;
                        return;
                    }
                };
                line_buf.push_str(&String::from_utf8_lossy(&chunk));

                // Drain complete lines; a partial line stays buffered until
                // the next chunk arrives.
                while let Some(pos) = line_buf.find('\n') {
                    let line: String = line_buf.drain(..=pos).collect();
                    let line = line.trim();
                    let data = match line.strip_prefix("data: ") {
                        Some(data) => data.trim(),
                        None => continue,
                    };
                    if data == "[DONE]" || data.is_empty() {
                        continue;
                    }
                    let parsed: OpenAiStreamChunk = match serde_json::from_str(data) {
                        Ok(parsed) => parsed,
                        Err(err) => {
                            let _ = tx
                                .send(Err(AttacheError::Backend(format!(
                                    "{provider} stream parse error `{data}`: {err}"
                                ))))
                                .await;
                            return;
                        }
                    };
                    for choice in parsed.choices {
                        if let Some(content) = choice.delta.content {
                            if tx.send(Ok(StreamEvent::TextDelta(content))).await.is_err() {
                                return;
                            }
                        }
                        for delta in choice.delta.tool_calls.unwrap_or_default() {
                            accumulate_tool_delta(&mut pending, delta);
                        }
                    }
                }
            }

            for state in pending {
                if let Some(call) = state.into_tool_call() {
                    if tx.send(Ok(StreamEvent::ToolCall(call))).await.is_err() {
                        return;
                    }
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

#[derive(Default)]
struct ToolCallState {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

impl ToolCallState {
    fn into_tool_call(self) -> Option<ToolCall> {
        let name = self.name?;
        let arguments = serde_json::from_str(&self.arguments)
            .unwrap_or_else(|_| Value::String(self.arguments.clone()));
        Some(ToolCall {
            id: self.id,
            name,
            arguments,
        })
    }
}

fn accumulate_tool_delta(pending: &mut Vec<ToolCallState>, delta: OpenAiToolCallDelta) {
    let state = match &delta.id {
        Some(id) => {
            if let Some(pos) = pending.iter().position(|s| s.id.as_deref() == Some(id)) {
                &mut pending[pos]
            } else {
                pending.push(ToolCallState {
                    id: Some(id.clone()),
                    ..ToolCallState::default()
                });
                pending.last_mut().unwrap()
            }
        }
        None => match pending.last_mut() {
            Some(last) => last,
            None => {
                pending.push(ToolCallState::default());
                pending.last_mut().unwrap()
            }
        },
    };
    if let Some(function) = delta.function {
        if let Some(name) = function.name {
            state.name = Some(name);
        }
        if let Some(arguments) = function.arguments {
            state.arguments.push_str(&arguments);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Anthropic
// ─────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct AnthropicBackend {
    http: reqwest::Client,
    model: String,
    api_key: String,
    endpoint: String,
}

impl AnthropicBackend {
    pub fn from_config(cfg: &ModelConfig) -> Result<Self> {
        let api_key = cfg
            .anthropic
            .api_key
            .clone()
            .ok_or_else(|| construction_error(Provider::Anthropic, "missing Anthropic API key"))?;
        Ok(Self {
            http: build_http_client(Provider::Anthropic, Duration::from_secs(60))?,
            model: cfg
                .model
                .clone()
                .unwrap_or_else(|| "claude-3-5-sonnet-20241022".to_string()),
            api_key,
            endpoint: cfg
                .anthropic
                .endpoint
                .clone()
                .unwrap_or_else(|| "https://api.anthropic.com/v1/messages".to_string()),
        })
    }

    fn to_wire_messages(messages: &[Message]) -> Vec<Value> {
        messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|message| match (&message.tool_call, &message.tool_result) {
                (Some(call), _) => json!({
                    "role": "assistant",
                    "content": [{
                        "type": "tool_use",
                        "id": call.id.clone().unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
                        "name": call.name,
                        "input": call.arguments,
                    }],
                }),
                (_, Some(result)) => json!({
                    "role": "user",
                    "content": [{
                        "type": "tool_result",
                        "tool_use_id": result.tool_call_id.clone().unwrap_or_default(),
                        "content": serialize_arguments(&result.output),
                    }],
                }),
                _ => json!({
                    "role": if message.role == Role::Assistant { "assistant" } else { "user" },
                    "content": [{ "type": "text", "text": message.content }],
                }),
            })
            .collect()
    }

    fn to_wire_tools(tools: &[ToolDescriptor]) -> Option<Vec<Value>> {
        if tools.is_empty() {
            return None;
        }
        Some(
            tools
                .iter()
                .map(|tool| {
                    json!({
                        "name": tool.name,
                        "description": tool.description,
                        "input_schema": tool
                            .parameters
                            .clone()
                            .unwrap_or_else(|| json!({"type": "object"})),
                    })
                })
                .collect(),
        )
    }
}

#[async_trait]
impl CompletionBackend for AnthropicBackend {
    fn provider(&self) -> Provider {
        Provider::Anthropic
    }

    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDescriptor],
        params: &CompletionParams,
    ) -> Result<ModelCompletion> {
        let system = messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.clone());
        let mut payload = json!({
            "model": self.model,
            "messages": Self::to_wire_messages(messages),
            "temperature": params.temperature,
            // The messages API requires an explicit token ceiling.
            "max_tokens": params.max_tokens.unwrap_or(4096),
        });
        if let Some(system) = system {
            payload["system"] = json!(system);
        }
        if let Some(wire_tools) = Self::to_wire_tools(tools) {
            payload["tools"] = json!(wire_tools);
        }

        let resp = self
            .http
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&payload)
            .send()
            .await
            .map_err(|err| AttacheError::Backend(format!("anthropic request error: {err}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(coalesce_error(status, &body, "anthropic"));
        }

        let parsed: AnthropicResponse = resp
            .json()
            .await
            .map_err(|err| AttacheError::Backend(format!("anthropic response parse error: {err}")))?;

        let mut content = String::new();
        let mut tool_calls = Vec::new();
        for block in parsed.content {
            match block.r#type.as_str() {
                "text" => {
                    if let Some(text) = block.text {
                        content.push_str(&text);
                    }
                }
                "tool_use" => {
                    if let Some(name) = block.name {
                        tool_calls.push(ToolCall {
                            id: block.id,
                            name,
                            arguments: block.input.unwrap_or_else(|| json!({})),
                        });
                    }
                }
                _ => {}
            }
        }

        Ok(ModelCompletion {
            content: if content.is_empty() {
                None
            } else {
                Some(content)
            },
            tool_calls,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Gemini
// ─────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct GeminiBackend {
    http: reqwest::Client,
    model: String,
    api_key: String,
    endpoint: String,
}

impl GeminiBackend {
    pub fn from_config(cfg: &ModelConfig) -> Result<Self> {
        let api_key = cfg
            .gemini
            .api_key
            .clone()
            .ok_or_else(|| construction_error(Provider::Gemini, "missing Gemini API key"))?;
        Ok(Self {
            http: build_http_client(Provider::Gemini, Duration::from_secs(60))?,
            model: cfg
                .model
                .clone()
                .unwrap_or_else(|| "gemini-2.0-flash".to_string()),
            api_key,
            endpoint: cfg
                .gemini
                .endpoint
                .clone()
                .unwrap_or_else(|| "https://generativelanguage.googleapis.com/v1beta".to_string()),
        })
    }

    /// System turns travel separately as `systemInstruction`; tool requests
    /// become `functionCall` parts on a model turn and tool results come
    /// back as `functionResponse` parts on a user turn.
    fn to_wire_contents(messages: &[Message]) -> Vec<Value> {
        messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|message| match (&message.tool_call, &message.tool_result) {
                (Some(call), _) => json!({
                    "role": "model",
                    "parts": [{
                        "functionCall": { "name": call.name, "args": call.arguments },
                    }],
                }),
                (_, Some(result)) => json!({
                    "role": "user",
                    "parts": [{
                        "functionResponse": {
                            "name": result.name,
                            "response": { "result": result.output },
                        },
                    }],
                }),
                _ => {
                    let role = if message.role == Role::Assistant { "model" } else { "user" };
                    json!({ "role": role, "parts": [{ "text": message.content }] })
                }
            })
            .collect()
    }

    fn to_wire_tools(tools: &[ToolDescriptor]) -> Option<Value> {
        if tools.is_empty() {
            return None;
        }
        let declarations: Vec<Value> = tools
            .iter()
            .map(|tool| {
                let mut declaration = json!({
                    "name": tool.name,
                    "description": tool.description,
                });
                if let Some(parameters) = &tool.parameters {
                    declaration["parameters"] = parameters.clone();
                }
                declaration
            })
            .collect();
        Some(json!({ "functionDeclarations": declarations }))
    }

    fn parse_completion(parsed: &Value) -> ModelCompletion {
        let mut content = String::new();
        let mut tool_calls = Vec::new();
        if let Some(parts) = parsed["candidates"][0]["content"]["parts"].as_array() {
            for part in parts {
                if let Some(text) = part["text"].as_str() {
                    content.push_str(text);
                }
                if let Some(call) = part.get("functionCall") {
                    if let Some(name) = call["name"].as_str() {
                        tool_calls.push(ToolCall {
                            id: None,
                            name: name.to_string(),
                            arguments: call.get("args").cloned().unwrap_or_else(|| json!({})),
                        });
                    }
                }
            }
        }
        ModelCompletion {
            content: if content.is_empty() {
                None
            } else {
                Some(content)
            },
            tool_calls,
        }
    }
}

#[async_trait]
impl CompletionBackend for GeminiBackend {
    fn provider(&self) -> Provider {
        Provider::Gemini
    }

    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDescriptor],
        params: &CompletionParams,
    ) -> Result<ModelCompletion> {
        let mut generation_config = json!({ "temperature": params.temperature });
        if let Some(max_tokens) = params.max_tokens {
            generation_config["maxOutputTokens"] = json!(max_tokens);
        }
        let mut payload = json!({
            "contents": Self::to_wire_contents(messages),
            "generationConfig": generation_config,
        });
        if let Some(system) = messages.iter().find(|m| m.role == Role::System) {
            payload["systemInstruction"] = json!({ "parts": [{ "text": system.content }] });
        }
        if let Some(wire_tools) = Self::to_wire_tools(tools) {
            payload["tools"] = json!([wire_tools]);
        }

        let resp = self
            .http
            .post(format!(
                "{}/models/{}:generateContent?key={}",
                self.endpoint, self.model, self.api_key
            ))
            .json(&payload)
            .send()
            .await
            .map_err(|err| AttacheError::Backend(format!("gemini request error: {err}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(coalesce_error(status, &body, "gemini"));
        }

        let parsed: Value = resp
            .json()
            .await
            .map_err(|err| AttacheError::Backend(format!("gemini response parse error: {err}")))?;

        Ok(Self::parse_completion(&parsed))
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Ollama (local)
// ─────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct OllamaBackend {
    http: reqwest::Client,
    model: String,
    base_url: String,
}

impl OllamaBackend {
    pub fn from_config(cfg: &ModelConfig) -> Result<Self> {
        Ok(Self {
            // Local models can be slow.
            http: build_http_client(Provider::Ollama, Duration::from_secs(300))?,
            model: cfg.model.clone().unwrap_or_else(|| "llama3.1".to_string()),
            base_url: cfg
                .ollama
                .endpoint
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string()),
        })
    }
}

#[async_trait]
impl CompletionBackend for OllamaBackend {
    fn provider(&self) -> Provider {
        Provider::Ollama
    }

    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDescriptor],
        params: &CompletionParams,
    ) -> Result<ModelCompletion> {
        let wire_messages: Vec<Value> = messages
            .iter()
            .map(|m| {
                let role = match m.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                    Role::Tool => "tool",
                };
                json!({ "role": role, "content": m.content })
            })
            .collect();

        let mut options = json!({ "temperature": params.temperature });
        if let Some(max_tokens) = params.max_tokens {
            options["num_predict"] = json!(max_tokens);
        }
        let mut payload = json!({
            "model": self.model,
            "messages": wire_messages,
            "stream": false,
            "options": options,
        });
        if !tools.is_empty() {
            let wire_tools: Vec<Value> = tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
            payload["tools"] = json!(wire_tools);
        }

        let resp = self
            .http
            .post(format!("{}/api/chat", self.base_url))
            .json(&payload)
            .send()
            .await
            .map_err(|err| AttacheError::Backend(format!("ollama request error: {err}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(coalesce_error(status, &body, "ollama"));
        }

        let parsed: Value = resp
            .json()
            .await
            .map_err(|err| AttacheError::Backend(format!("ollama response parse error: {err}")))?;

        let message = &parsed["message"];
        let content = message["content"].as_str().map(String::from);

        let mut tool_calls = Vec::new();
        if let Some(calls) = message["tool_calls"].as_array() {
            for call in calls {
                let function = &call["function"];
                tool_calls.push(ToolCall {
                    id: None,
                    name: function["name"].as_str().unwrap_or_default().to_string(),
                    arguments: function["arguments"].clone(),
                });
            }
        }

        Ok(ModelCompletion {
            content,
            tool_calls,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Bedrock (Converse API, `aws` feature)
// ─────────────────────────────────────────────────────────────────────────

#[cfg(feature = "aws")]
#[derive(Debug)]
pub struct BedrockBackend {
    client: aws_sdk_bedrockruntime::Client,
    model: String,
}

#[cfg(feature = "aws")]
impl BedrockBackend {
    pub async fn from_config(cfg: &ModelConfig) -> Result<Self> {
        let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(cfg.aws_region.clone()))
            .load()
            .await;
        Ok(Self {
            client: aws_sdk_bedrockruntime::Client::new(&sdk_config),
            model: cfg
                .model
                .clone()
                .unwrap_or_else(|| "us.amazon.nova-pro-v1:0".to_string()),
        })
    }
}

/// Lossless mapping from a JSON value to the smithy `Document` the Converse
/// API uses for tool schemas, tool inputs, and tool results.
#[cfg(feature = "aws")]
fn document_from_json(value: &Value) -> aws_smithy_types::Document {
    use aws_smithy_types::{Document, Number};

    match value {
        Value::Null => Document::Null,
        Value::Bool(flag) => Document::Bool(*flag),
        Value::Number(number) => {
            if let Some(unsigned) = number.as_u64() {
                Document::Number(Number::PosInt(unsigned))
            } else if let Some(signed) = number.as_i64() {
                Document::Number(Number::NegInt(signed))
            } else {
                Document::Number(Number::Float(number.as_f64().unwrap_or_default()))
            }
        }
        Value::String(text) => Document::String(text.clone()),
        Value::Array(items) => Document::Array(items.iter().map(document_from_json).collect()),
        Value::Object(map) => Document::Object(
            map.iter()
                .map(|(key, item)| (key.clone(), document_from_json(item)))
                .collect(),
        ),
    }
}

#[cfg(feature = "aws")]
fn json_from_document(document: &aws_smithy_types::Document) -> Value {
    use aws_smithy_types::{Document, Number};

    match document {
        Document::Null => Value::Null,
        Document::Bool(flag) => json!(flag),
        Document::Number(Number::PosInt(unsigned)) => json!(unsigned),
        Document::Number(Number::NegInt(signed)) => json!(signed),
        Document::Number(Number::Float(float)) => json!(float),
        Document::String(text) => json!(text),
        Document::Array(items) => Value::Array(items.iter().map(json_from_document).collect()),
        Document::Object(map) => Value::Object(
            map.iter()
                .map(|(key, item)| (key.clone(), json_from_document(item)))
                .collect(),
        ),
    }
}

#[cfg(feature = "aws")]
#[async_trait]
impl CompletionBackend for BedrockBackend {
    fn provider(&self) -> Provider {
        Provider::Bedrock
    }

    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDescriptor],
        params: &CompletionParams,
    ) -> Result<ModelCompletion> {
        use aws_sdk_bedrockruntime::types as bedrock;

        let build_error =
            |err: aws_smithy_types::error::operation::BuildError| {
                AttacheError::Backend(format!("bedrock request build error: {err}"))
            };

        let mut request = self.client.converse().model_id(&self.model).inference_config(
            bedrock::InferenceConfiguration::builder()
                .temperature(params.temperature as f32)
                .set_max_tokens(params.max_tokens.map(|n| n as i32))
                .build(),
        );

        if !tools.is_empty() {
            let mut config = bedrock::ToolConfiguration::builder();
            for tool in tools {
                let schema = tool
                    .parameters
                    .clone()
                    .unwrap_or_else(|| json!({ "type": "object" }));
                let spec = bedrock::ToolSpecification::builder()
                    .name(&tool.name)
                    .description(&tool.description)
                    .input_schema(bedrock::ToolInputSchema::Json(document_from_json(&schema)))
                    .build()
                    .map_err(build_error)?;
                config = config.tools(bedrock::Tool::ToolSpec(spec));
            }
            request = request.tool_config(config.build().map_err(build_error)?);
        }

        for message in messages {
            match message.role {
                Role::System => {
                    request =
                        request.system(bedrock::SystemContentBlock::Text(message.content.clone()));
                }
                role => {
                    let (converse_role, block) = if let Some(call) = &message.tool_call {
                        let tool_use = bedrock::ToolUseBlock::builder()
                            .tool_use_id(
                                call.id
                                    .clone()
                                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
                            )
                            .name(&call.name)
                            .input(document_from_json(&call.arguments))
                            .build()
                            .map_err(build_error)?;
                        (
                            bedrock::ConversationRole::Assistant,
                            bedrock::ContentBlock::ToolUse(tool_use),
                        )
                    } else if let Some(result) = &message.tool_result {
                        let tool_result = bedrock::ToolResultBlock::builder()
                            .tool_use_id(result.tool_call_id.clone().unwrap_or_default())
                            .content(bedrock::ToolResultContentBlock::Json(document_from_json(
                                &result.output,
                            )))
                            .build()
                            .map_err(build_error)?;
                        (
                            bedrock::ConversationRole::User,
                            bedrock::ContentBlock::ToolResult(tool_result),
                        )
                    } else {
                        let converse_role = if role == Role::Assistant {
                            bedrock::ConversationRole::Assistant
                        } else {
                            bedrock::ConversationRole::User
                        };
                        (
                            converse_role,
                            bedrock::ContentBlock::Text(message.content.clone()),
                        )
                    };
                    let built = bedrock::Message::builder()
                        .role(converse_role)
                        .content(block)
                        .build()
                        .map_err(build_error)?;
                    request = request.messages(built);
                }
            }
        }

        let output = request
            .send()
            .await
            .map_err(|err| AttacheError::Backend(format!("bedrock request error: {err}")))?;

        let mut content = String::new();
        let mut tool_calls = Vec::new();
        if let Some(message) = output.output().and_then(|o| o.as_message().ok()) {
            for block in message.content() {
                if let Ok(text) = block.as_text() {
                    content.push_str(text);
                }
                if let Ok(tool_use) = block.as_tool_use() {
                    tool_calls.push(ToolCall {
                        id: Some(tool_use.tool_use_id().to_string()),
                        name: tool_use.name().to_string(),
                        arguments: json_from_document(tool_use.input()),
                    });
                }
            }
        }

        Ok(ModelCompletion {
            content: if content.is_empty() {
                None
            } else {
                Some(content)
            },
            tool_calls,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Scripted backend for tests and the CLI demo/test modes
// ─────────────────────────────────────────────────────────────────────────

/// One scripted model turn.
#[derive(Debug, Clone)]
pub struct ScriptedTurn {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

impl ScriptedTurn {
    pub fn reply(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn call_tool(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            content: None,
            tool_calls: vec![ToolCall {
                id: None,
                name: name.into(),
                arguments,
            }],
        }
    }
}

/// A deterministic backend that plays back scripted turns. When the script
/// is exhausted it either errors or, in repeating mode, replays the final
/// turn forever (useful for exercising the tool-loop bound).
#[derive(Debug)]
pub struct ScriptedBackend {
    turns: Mutex<std::collections::VecDeque<ScriptedTurn>>,
    repeat_last: Option<ScriptedTurn>,
}

impl ScriptedBackend {
    pub fn new(turns: Vec<ScriptedTurn>) -> Arc<Self> {
        Arc::new(Self {
            turns: Mutex::new(turns.into()),
            repeat_last: None,
        })
    }

    pub fn repeating(turn: ScriptedTurn) -> Arc<Self> {
        Arc::new(Self {
            turns: Mutex::new(std::collections::VecDeque::new()),
            repeat_last: Some(turn),
        })
    }
}

#[async_trait]
impl CompletionBackend for ScriptedBackend {
    fn provider(&self) -> Provider {
        Provider::LlamaCpp
    }

    async fn complete(
        &self,
        _messages: &[Message],
        _tools: &[ToolDescriptor],
        _params: &CompletionParams,
    ) -> Result<ModelCompletion> {
        let next = {
            let mut locked = self.turns.lock().expect("scripted backend poisoned");
            locked.pop_front()
        };
        let turn = match next {
            Some(turn) => turn,
            None => self.repeat_last.clone().ok_or_else(|| {
                AttacheError::Backend("scripted backend ran out of turns".into())
            })?,
        };
        Ok(ModelCompletion {
            content: turn.content,
            tool_calls: turn.tool_calls,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    fn params() -> CompletionParams {
        CompletionParams {
            temperature: 0.7,
            max_tokens: Some(256),
        }
    }

    #[tokio::test]
    async fn scripted_backend_plays_turns_in_order() {
        let backend = ScriptedBackend::new(vec![
            ScriptedTurn::call_tool("current_time", json!({})),
            ScriptedTurn::reply("done"),
        ]);

        let first = backend.complete(&[], &[], &params()).await.unwrap();
        assert_eq!(first.tool_calls.len(), 1);
        assert_eq!(first.tool_calls[0].name, "current_time");

        let second = backend.complete(&[], &[], &params()).await.unwrap();
        assert_eq!(second.content.as_deref(), Some("done"));

        assert!(backend.complete(&[], &[], &params()).await.is_err());
    }

    #[tokio::test]
    async fn repeating_backend_never_runs_out() {
        let backend = ScriptedBackend::repeating(ScriptedTurn::call_tool("echo", json!({})));
        for _ in 0..20 {
            let turn = backend.complete(&[], &[], &params()).await.unwrap();
            assert_eq!(turn.tool_calls.len(), 1);
        }
    }

    #[tokio::test]
    async fn missing_openai_key_is_a_construction_error() {
        let mut cfg = AppConfig::default();
        cfg.model.provider = Provider::OpenAi;
        cfg.model.openai.api_key = None;

        let err = select_backend(&cfg).await.unwrap_err();
        assert!(matches!(err, AttacheError::BackendConstruction { .. }));
    }

    #[tokio::test]
    async fn local_providers_construct_without_credentials() {
        let mut cfg = AppConfig::default();
        cfg.model.provider = Provider::Ollama;
        assert!(select_backend(&cfg).await.is_ok());

        cfg.model.provider = Provider::LlamaCpp;
        assert!(select_backend(&cfg).await.is_ok());
    }

    #[tokio::test]
    async fn default_stream_yields_tool_calls_then_text() {
        let backend = ScriptedBackend::new(vec![ScriptedTurn {
            content: Some("partial".into()),
            tool_calls: vec![ToolCall {
                id: None,
                name: "echo".into(),
                arguments: json!({}),
            }],
        }]);

        let mut stream = backend.complete_stream(&[], &[], &params()).await.unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert!(matches!(first, StreamEvent::ToolCall(_)));
        let second = stream.next().await.unwrap().unwrap();
        assert!(matches!(second, StreamEvent::TextDelta(_)));
        assert!(stream.next().await.is_none());
    }

    #[test]
    fn openai_wire_messages_carry_tool_results() {
        let call = ToolCall {
            id: Some("call_1".into()),
            name: "current_time".into(),
            arguments: json!({}),
        };
        let messages = vec![
            Message::system("be useful"),
            Message::user("what time is it?"),
            Message::tool_request(call.clone()),
            Message::tool_response(&call, json!({"time": "2026-08-27 10:00:00"})),
        ];

        let wire = OpenAiBackend::to_wire_messages(&messages);
        assert_eq!(wire.len(), 4);
        assert_eq!(wire[2].tool_calls.as_ref().unwrap().len(), 1);
        assert_eq!(wire[3].tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn gemini_wire_contents_carry_tool_traffic() {
        let call = ToolCall {
            id: None,
            name: "get_current_time".into(),
            arguments: json!({}),
        };
        let messages = vec![
            Message::system("be useful"),
            Message::user("what time is it?"),
            Message::tool_request(call.clone()),
            Message::tool_response(&call, json!({"current_time": "2026-08-27 10:00:00"})),
        ];

        let wire = GeminiBackend::to_wire_contents(&messages);
        // System turns travel as systemInstruction, not as contents.
        assert_eq!(wire.len(), 3);
        assert_eq!(wire[1]["role"], "model");
        assert_eq!(wire[1]["parts"][0]["functionCall"]["name"], "get_current_time");
        assert_eq!(wire[2]["role"], "user");
        assert_eq!(
            wire[2]["parts"][0]["functionResponse"]["name"],
            "get_current_time"
        );
    }

    #[test]
    fn gemini_declares_tools_and_parses_function_calls() {
        let descriptors = vec![ToolDescriptor {
            name: "schedule_meeting".into(),
            description: "Schedule a meeting.".into(),
            parameters: Some(json!({ "type": "object" })),
        }];
        let declared = GeminiBackend::to_wire_tools(&descriptors).unwrap();
        assert_eq!(
            declared["functionDeclarations"][0]["name"],
            "schedule_meeting"
        );
        assert!(GeminiBackend::to_wire_tools(&[]).is_none());

        let raw = json!({
            "candidates": [{ "content": { "parts": [
                { "functionCall": { "name": "schedule_meeting", "args": { "title": "sync" } } }
            ]}}]
        });
        let completion = GeminiBackend::parse_completion(&raw);
        assert!(completion.content.is_none());
        assert_eq!(completion.tool_calls.len(), 1);
        assert_eq!(completion.tool_calls[0].name, "schedule_meeting");
        assert_eq!(completion.tool_calls[0].arguments["title"], "sync");
    }

    #[cfg(feature = "aws")]
    #[test]
    fn bedrock_document_conversion_round_trips() {
        let value = json!({
            "title": "sync",
            "duration_minutes": 45,
            "offset": -3,
            "score": 2.5,
            "flags": [true, null],
            "nested": { "attendees": ["ana@example.com"] },
        });
        assert_eq!(json_from_document(&document_from_json(&value)), value);
    }
}

// Wire structs for the OpenAI-compatible family.

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OpenAiToolCall>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiToolCall {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    r#type: String,
    function: OpenAiFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiTool {
    r#type: String,
    function: OpenAiFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiFunction {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoiceMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OpenAiToolCall>>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChunk {
    choices: Vec<OpenAiDeltaChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiDeltaChoice {
    delta: OpenAiDelta,
}

#[derive(Debug, Deserialize)]
struct OpenAiDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OpenAiToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct OpenAiToolCallDelta {
    id: Option<String>,
    #[serde(default)]
    function: Option<OpenAiFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct OpenAiFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

// Anthropic wire structs.

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContentBlock>,
}

#[derive(Debug, Deserialize)]
struct AnthropicContentBlock {
    r#type: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    input: Option<Value>,
}
