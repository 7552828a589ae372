//! The agent runtime: a model backend, a tool registry, and a bounded
//! request loop tying them together.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::error::{AttacheError, Result};
use crate::llm::{select_backend, CompletionBackend, CompletionParams, StreamEvent};
use crate::message::{Message, ToolCall};
use crate::tool::ToolRegistry;
use crate::tools::build_registry;

/// A completed agent reply. `truncated` is set when the tool-call bound
/// stopped the request before the model produced a natural final answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentReply {
    pub text: String,
    pub truncated: bool,
}

/// What this agent can do, as reported on the capabilities endpoint and by
/// the CLI.
#[derive(Debug, Clone, Serialize)]
pub struct Capabilities {
    pub name: String,
    pub role: String,
    pub provider: String,
    pub model: Option<String>,
    pub tools: Vec<String>,
    pub max_tool_calls: usize,
    pub streaming: bool,
}

const TRUNCATION_NOTICE: &str =
    "I had to stop early: this request reached its tool-call limit before I could finish.";

pub struct Agent {
    backend: Arc<dyn CompletionBackend>,
    tools: ToolRegistry,
    name: String,
    role: String,
    instructions: String,
    model: Option<String>,
    max_tool_calls: usize,
    tool_timeout: Duration,
    params: CompletionParams,
    streaming: bool,
}

impl Agent {
    /// Build the agent from configuration: select the backend, assemble the
    /// registry. Backend construction failures are fatal here.
    pub async fn from_config(cfg: &AppConfig) -> Result<Self> {
        let backend = select_backend(cfg).await?;
        let tools = build_registry(cfg);
        info!(
            provider = backend.provider().as_str(),
            tools = tools.len(),
            "agent initialized"
        );
        Ok(Self::assemble(cfg, backend, tools))
    }

    /// Assemble an agent around an existing backend and registry. Used by
    /// tests to inject a scripted backend.
    pub fn assemble(cfg: &AppConfig, backend: Arc<dyn CompletionBackend>, tools: ToolRegistry) -> Self {
        Self {
            backend,
            tools,
            name: cfg.agent.name.clone(),
            role: cfg.agent.role.clone(),
            instructions: cfg.agent.instructions.clone(),
            model: cfg.model.model.clone(),
            max_tool_calls: cfg.agent.max_tool_calls,
            tool_timeout: Duration::from_secs(cfg.agent.timeout_seconds),
            params: CompletionParams {
                temperature: cfg.model.temperature,
                max_tokens: cfg.model.max_tokens,
            },
            streaming: cfg.model.streaming,
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            name: self.name.clone(),
            role: self.role.clone(),
            provider: self.backend.provider().as_str().to_string(),
            model: self.model.clone(),
            tools: self.tools.names().iter().map(|n| n.to_string()).collect(),
            max_tool_calls: self.max_tool_calls,
            streaming: self.streaming,
        }
    }

    fn system_prompt(&self) -> String {
        format!("You are {}, {}.\n\n{}", self.name, self.role, self.instructions)
    }

    fn request_params(&self, temperature: Option<f64>) -> CompletionParams {
        CompletionParams {
            temperature: temperature.unwrap_or(self.params.temperature),
            max_tokens: self.params.max_tokens,
        }
    }

    /// Run one request to completion. The model may request tools; each is
    /// executed in order, its result (success or failure) appended to the
    /// conversation, and the model consulted again. At most `max_tool_calls`
    /// executions happen per request; hitting the bound yields a truncated
    /// reply rather than an error.
    pub async fn invoke(&self, input: &str) -> Result<AgentReply> {
        self.invoke_with(input, None).await
    }

    /// Like `invoke`, with a per-request temperature override. The override
    /// applies to this call only; shared configuration is never touched.
    pub async fn invoke_with(&self, input: &str, temperature: Option<f64>) -> Result<AgentReply> {
        let params = self.request_params(temperature);
        let mut messages = vec![Message::system(self.system_prompt()), Message::user(input)];
        let descriptors = self.tools.descriptors();
        let mut calls_used: usize = 0;

        loop {
            let completion = self
                .backend
                .complete(&messages, &descriptors, &params)
                .await
                .map_err(|err| AttacheError::Invocation(err.to_string()))?;

            if completion.tool_calls.is_empty() {
                return Ok(AgentReply {
                    text: completion.content.unwrap_or_default(),
                    truncated: false,
                });
            }

            for call in completion.tool_calls {
                if calls_used >= self.max_tool_calls {
                    warn!(limit = self.max_tool_calls, "tool-call limit reached");
                    return Ok(AgentReply {
                        text: completion
                            .content
                            .unwrap_or_else(|| TRUNCATION_NOTICE.to_string()),
                        truncated: true,
                    });
                }
                calls_used += 1;
                let output = self.execute_tool(&call).await;
                messages.push(Message::tool_request(call.clone()));
                messages.push(Message::tool_response(&call, output));
            }
        }
    }

    /// Stream a reply as text chunks. Tool rounds run exactly as in
    /// `invoke`; only final-round text reaches the caller incrementally.
    pub fn invoke_streaming(self: Arc<Self>, input: impl Into<String>) -> ReceiverStream<Result<String>> {
        let (tx, rx) = mpsc::channel::<Result<String>>(32);
        let agent = self;
        let input = input.into();
        tokio::spawn(async move {
            if let Err(err) = agent.stream_request(&input, &tx).await {
                let _ = tx.send(Err(err)).await;
            }
        });
        ReceiverStream::new(rx)
    }

    async fn stream_request(&self, input: &str, tx: &mpsc::Sender<Result<String>>) -> Result<()> {
        let mut messages = vec![Message::system(self.system_prompt()), Message::user(input)];
        let descriptors = self.tools.descriptors();
        let mut calls_used: usize = 0;

        loop {
            let mut stream = self
                .backend
                .complete_stream(&messages, &descriptors, &self.params)
                .await
                .map_err(|err| AttacheError::Invocation(err.to_string()))?;

            let mut requested: Vec<ToolCall> = Vec::new();
            while let Some(event) = stream.next().await {
                match event.map_err(|err| AttacheError::Invocation(err.to_string()))? {
                    StreamEvent::TextDelta(delta) => {
                        if tx.send(Ok(delta)).await.is_err() {
                            return Ok(());
                        }
                    }
                    StreamEvent::ToolCall(call) => requested.push(call),
                }
            }

            if requested.is_empty() {
                return Ok(());
            }

            for call in requested {
                if calls_used >= self.max_tool_calls {
                    warn!(limit = self.max_tool_calls, "tool-call limit reached");
                    let _ = tx.send(Ok(format!("\n{TRUNCATION_NOTICE}"))).await;
                    return Ok(());
                }
                calls_used += 1;
                let output = self.execute_tool(&call).await;
                messages.push(Message::tool_request(call.clone()));
                messages.push(Message::tool_response(&call, output));
            }
        }
    }

    /// Execute one tool call under the configured timeout. Failures and
    /// timeouts come back as result data so the model can recover.
    async fn execute_tool(&self, call: &ToolCall) -> serde_json::Value {
        debug!(tool = %call.name, "executing tool");
        let run = self.tools.call(&call.name, call.arguments.clone());
        match tokio::time::timeout(self.tool_timeout, run).await {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => {
                warn!(tool = %call.name, error = %err, "tool failed");
                json!({ "error": err.to_string() })
            }
            Err(_) => {
                warn!(tool = %call.name, timeout_secs = self.tool_timeout.as_secs(), "tool timed out");
                json!({
                    "error": format!(
                        "tool `{}` timed out after {}s",
                        call.name,
                        self.tool_timeout.as_secs()
                    )
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ScriptedBackend, ScriptedTurn};
    use crate::tool::Tool;
    use async_trait::async_trait;
    use serde_json::Value;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echo the input back."
        }

        async fn call(&self, input: Value) -> Result<Value> {
            Ok(json!({ "echoed": input }))
        }
    }

    fn test_agent(backend: Arc<dyn CompletionBackend>) -> Agent {
        let cfg = AppConfig::default();
        let mut tools = ToolRegistry::new();
        tools.register(EchoTool);
        Agent::assemble(&cfg, backend, tools)
    }

    #[tokio::test]
    async fn plain_reply_passes_through() {
        let backend = ScriptedBackend::new(vec![ScriptedTurn::reply("hello")]);
        let agent = test_agent(backend);

        let reply = agent.invoke("hi").await.unwrap();
        assert_eq!(reply.text, "hello");
        assert!(!reply.truncated);
    }

    #[tokio::test]
    async fn tool_round_then_reply() {
        let backend = ScriptedBackend::new(vec![
            ScriptedTurn::call_tool("echo", json!({"value": 1})),
            ScriptedTurn::reply("done"),
        ]);
        let agent = test_agent(backend);

        let reply = agent.invoke("use the tool").await.unwrap();
        assert_eq!(reply.text, "done");
        assert!(!reply.truncated);
    }

    #[tokio::test]
    async fn unknown_tool_is_fed_back_not_fatal() {
        let backend = ScriptedBackend::new(vec![
            ScriptedTurn::call_tool("no_such_tool", json!({})),
            ScriptedTurn::reply("recovered"),
        ]);
        let agent = test_agent(backend);

        let reply = agent.invoke("go").await.unwrap();
        assert_eq!(reply.text, "recovered");
    }

    #[tokio::test]
    async fn tool_loop_is_bounded() {
        let backend = ScriptedBackend::repeating(ScriptedTurn::call_tool("echo", json!({})));
        let agent = test_agent(backend);

        let reply = agent.invoke("loop forever").await.unwrap();
        assert!(reply.truncated);
        assert!(!reply.text.is_empty());
    }

    #[tokio::test]
    async fn backend_failure_is_an_invocation_error() {
        let backend = ScriptedBackend::new(vec![]);
        let agent = test_agent(backend);

        let err = agent.invoke("hi").await.unwrap_err();
        assert!(matches!(err, AttacheError::Invocation(_)));
    }

    #[tokio::test]
    async fn streaming_delivers_chunks() {
        let backend = ScriptedBackend::new(vec![
            ScriptedTurn::call_tool("echo", json!({})),
            ScriptedTurn::reply("streamed out"),
        ]);
        let agent = Arc::new(test_agent(backend));

        let mut stream = agent.invoke_streaming("hi");
        let mut collected = String::new();
        while let Some(chunk) = stream.next().await {
            collected.push_str(&chunk.unwrap());
        }
        assert_eq!(collected, "streamed out");
    }

    #[test]
    fn capabilities_reflect_configuration() {
        let backend = ScriptedBackend::new(vec![]);
        let agent = test_agent(backend);

        let caps = agent.capabilities();
        assert_eq!(caps.name, "Attache");
        assert_eq!(caps.max_tool_calls, 10);
        assert_eq!(caps.tools, vec!["echo"]);
    }
}
