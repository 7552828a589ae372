//! End-to-end checks of the agent's tool-call loop.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use attache::{Agent, AppConfig, Result, ScriptedBackend, ScriptedTurn, Tool, ToolRegistry};

struct CountingTool {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Tool for CountingTool {
    fn name(&self) -> &str {
        "counter"
    }

    fn description(&self) -> &str {
        "Counts how often it is called."
    }

    async fn call(&self, _input: Value) -> Result<Value> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(json!({ "calls": n }))
    }
}

struct SlowTool;

#[async_trait]
impl Tool for SlowTool {
    fn name(&self) -> &str {
        "slow"
    }

    fn description(&self) -> &str {
        "Sleeps longer than any reasonable timeout."
    }

    async fn call(&self, _input: Value) -> Result<Value> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(json!({ "done": true }))
    }
}

#[tokio::test]
async fn loop_executes_exactly_the_configured_bound() {
    let mut cfg = AppConfig::default();
    cfg.agent.max_tool_calls = 3;

    let calls = Arc::new(AtomicUsize::new(0));
    let mut tools = ToolRegistry::new();
    tools.register(CountingTool {
        calls: Arc::clone(&calls),
    });

    let backend = ScriptedBackend::repeating(ScriptedTurn::call_tool("counter", json!({})));
    let agent = Agent::assemble(&cfg, backend, tools);

    let reply = agent.invoke("keep going").await.unwrap();
    assert!(reply.truncated);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn slow_tools_time_out_and_the_request_recovers() {
    let mut cfg = AppConfig::default();
    cfg.agent.timeout_seconds = 1;

    let mut tools = ToolRegistry::new();
    tools.register(SlowTool);

    let backend = ScriptedBackend::new(vec![
        ScriptedTurn::call_tool("slow", json!({})),
        ScriptedTurn::reply("finished despite the slow tool"),
    ]);
    let agent = Agent::assemble(&cfg, backend, tools);

    let reply = agent.invoke("try the slow tool").await.unwrap();
    assert_eq!(reply.text, "finished despite the slow tool");
    assert!(!reply.truncated);
}

#[tokio::test]
async fn tool_results_reach_the_next_round() {
    // Two tool rounds, then a reply; the scripted backend only advances when
    // each round completes, so reaching the reply proves the loop fed results
    // back and consulted the model again.
    let calls = Arc::new(AtomicUsize::new(0));
    let mut tools = ToolRegistry::new();
    tools.register(CountingTool {
        calls: Arc::clone(&calls),
    });

    let backend = ScriptedBackend::new(vec![
        ScriptedTurn::call_tool("counter", json!({})),
        ScriptedTurn::call_tool("counter", json!({})),
        ScriptedTurn::reply("counted twice"),
    ]);
    let agent = Agent::assemble(&AppConfig::default(), backend, tools);

    let reply = agent.invoke("count for me").await.unwrap();
    assert_eq!(reply.text, "counted twice");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
