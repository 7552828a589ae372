use thiserror::Error;

pub type Result<T> = std::result::Result<T, AttacheError>;

#[derive(Debug, Error)]
pub enum AttacheError {
    /// Invalid or unparsable settings. Fatal, prevents startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A provider identifier the running build cannot serve. Fatal.
    #[error("unsupported model provider `{0}`")]
    UnsupportedProvider(String),

    /// Client construction for a recognized provider failed. Fatal; never
    /// retried at this layer.
    #[error("failed to construct `{provider}` backend: {reason}")]
    BackendConstruction { provider: String, reason: String },

    /// A model backend request failed at invocation time.
    #[error("model backend error: {0}")]
    Backend(String),

    #[error("tool `{0}` not found")]
    ToolNotFound(String),

    /// The model supplied arguments a tool could not use.
    #[error("invalid input for tool `{tool}`: {reason}")]
    InvalidToolInput { tool: String, reason: String },

    /// A tool handler failed or timed out. Recoverable: the failure is fed
    /// back to the model as tool-result data and the request continues.
    #[error("tool `{name}` failed: {source}")]
    ToolExecution {
        name: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A single request could not be completed. Fatal to that request only.
    #[error("agent invocation failed: {0}")]
    Invocation(String),

    /// Used by the readiness probe; never crashes the process.
    #[error("dependency unavailable: {0}")]
    DependencyUnavailable(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl AttacheError {
    /// Stable label for the error counter on the metrics endpoint.
    pub fn kind(&self) -> &'static str {
        match self {
            AttacheError::Configuration(_) => "configuration",
            AttacheError::UnsupportedProvider(_) => "unsupported_provider",
            AttacheError::BackendConstruction { .. } => "backend_construction",
            AttacheError::Backend(_) => "backend",
            AttacheError::ToolNotFound(_) => "tool_not_found",
            AttacheError::InvalidToolInput { .. } => "invalid_tool_input",
            AttacheError::ToolExecution { .. } => "tool_execution",
            AttacheError::Invocation(_) => "invocation",
            AttacheError::DependencyUnavailable(_) => "dependency_unavailable",
            AttacheError::Storage(_) => "storage",
            AttacheError::Serde(_) => "serde",
            AttacheError::Io(_) => "io",
        }
    }
}
