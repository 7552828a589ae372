use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub arguments: Value,
}

/// The outcome of a tool invocation, fed back to the model. Failures travel
/// through here as well; a tool error is data, not a crash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    pub name: String,
    pub output: Value,
}

/// One entry in a model conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<ToolResult>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            tool_call: None,
            tool_result: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_call: None,
            tool_result: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_call: None,
            tool_result: None,
        }
    }

    /// An assistant turn that requests a tool invocation.
    pub fn tool_request(call: ToolCall) -> Self {
        Self {
            role: Role::Assistant,
            content: format!("Calling tool `{}`", call.name),
            tool_call: Some(call),
            tool_result: None,
        }
    }

    /// A tool turn carrying the result of an earlier request.
    pub fn tool_response(call: &ToolCall, output: Value) -> Self {
        Self {
            role: Role::Tool,
            content: output.to_string(),
            tool_call: None,
            tool_result: Some(ToolResult {
                tool_call_id: call.id.clone(),
                name: call.name.clone(),
                output,
            }),
        }
    }
}
