//! Attache: an executive-assistant AI agent service.
//!
//! A configured [`Agent`] pairs a model backend with a tool registry and
//! runs each request through a bounded tool-call loop. The optional
//! `server` feature adds the HTTP surface; `persistence` adds the SQL
//! message store; `aws` adds the Bedrock backend.

pub mod agent;
pub mod cache;
pub mod config;
pub mod error;
pub mod llm;
pub mod message;
#[cfg(feature = "server")]
pub mod metrics;
#[cfg(feature = "server")]
pub mod server;
#[cfg(feature = "persistence")]
pub mod storage;
pub mod telemetry;
pub mod tool;
pub mod tools;

pub use agent::{Agent, AgentReply, Capabilities};
pub use config::{AppConfig, Provider};
pub use error::{AttacheError, Result};
pub use llm::{
    select_backend, CompletionBackend, CompletionParams, ModelCompletion, ScriptedBackend,
    ScriptedTurn, StreamEvent,
};
pub use message::{Message, Role, ToolCall, ToolResult};
pub use tool::{Tool, ToolDescriptor, ToolRegistry};
pub use tools::build_registry;
