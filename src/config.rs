use std::env;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{AttacheError, Result};

/// The closed set of model providers. Unknown identifiers fail at
/// deserialization time; provider-specific credentials are only checked
/// later, when the backend is constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Bedrock,
    OpenAi,
    Anthropic,
    Gemini,
    Ollama,
    LlamaCpp,
    LlamaApi,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Bedrock => "bedrock",
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Gemini => "gemini",
            Provider::Ollama => "ollama",
            Provider::LlamaCpp => "llamacpp",
            Provider::LlamaApi => "llamaapi",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = AttacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "bedrock" => Ok(Provider::Bedrock),
            "openai" => Ok(Provider::OpenAi),
            "anthropic" => Ok(Provider::Anthropic),
            "gemini" => Ok(Provider::Gemini),
            "ollama" => Ok(Provider::Ollama),
            "llamacpp" => Ok(Provider::LlamaCpp),
            "llamaapi" => Ok(Provider::LlamaApi),
            other => Err(AttacheError::Configuration(format!(
                "unknown model provider `{other}`"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentSection {
    #[serde(default = "default_agent_name")]
    pub name: String,
    #[serde(default = "default_agent_role")]
    pub role: String,
    #[serde(default = "default_instructions")]
    pub instructions: String,
    /// Upper bound on tool round trips per request.
    #[serde(default = "default_max_tool_calls")]
    pub max_tool_calls: usize,
    /// Per-tool-call execution budget in seconds.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            name: default_agent_name(),
            role: default_agent_role(),
            instructions: default_instructions(),
            max_tool_calls: default_max_tool_calls(),
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

fn default_agent_name() -> String {
    "Attache".into()
}

fn default_agent_role() -> String {
    "Chief of Staff and Executive Assistant".into()
}

fn default_instructions() -> String {
    "You are an executive assistant and chief-of-staff AI. You excel at \
     meeting coordination, task prioritization, research synthesis, and \
     professional communication. Maintain a professional demeanor, think \
     strategically, and anticipate needs. Use the available tools whenever a \
     request involves scheduling, reminders, prioritization, or research."
        .into()
}

fn default_max_tool_calls() -> usize {
    10
}

fn default_timeout_seconds() -> u64 {
    30
}

/// Per-provider credential block.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ProviderCredentials {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: Provider,
    /// Model identifier; each backend falls back to a provider default.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: Option<u32>,
    #[serde(default = "default_streaming")]
    pub streaming: bool,
    #[serde(default = "default_aws_region")]
    pub aws_region: String,
    #[serde(default)]
    pub openai: ProviderCredentials,
    #[serde(default)]
    pub anthropic: ProviderCredentials,
    #[serde(default)]
    pub gemini: ProviderCredentials,
    #[serde(default)]
    pub llamaapi: ProviderCredentials,
    #[serde(default)]
    pub ollama: ProviderCredentials,
    #[serde(default)]
    pub llamacpp: ProviderCredentials,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            streaming: default_streaming(),
            aws_region: default_aws_region(),
            openai: ProviderCredentials::default(),
            anthropic: ProviderCredentials::default(),
            gemini: ProviderCredentials::default(),
            llamaapi: ProviderCredentials::default(),
            ollama: ProviderCredentials::default(),
            llamacpp: ProviderCredentials::default(),
        }
    }
}

fn default_provider() -> Provider {
    Provider::Bedrock
}

fn default_temperature() -> f64 {
    0.7
}

fn default_max_tokens() -> Option<u32> {
    Some(4096)
}

fn default_streaming() -> bool {
    true
}

fn default_aws_region() -> String {
    "us-west-2".into()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolsConfig {
    #[serde(default = "default_true")]
    pub enable_calculator: bool,
    #[serde(default = "default_true")]
    pub enable_web_search: bool,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            enable_calculator: true,
            enable_web_search: true,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".into()
}

fn default_port() -> u16 {
    8000
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct StorageConfig {
    /// Connection URL for the message store. Defaults to an in-process
    /// SQLite database when unset.
    #[serde(default)]
    pub database_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheConfig {
    #[serde(default = "default_cache_ttl")]
    pub ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_cache_ttl(),
        }
    }
}

fn default_cache_ttl() -> u64 {
    3600
}

/// Complete application settings. Constructed once at process start and
/// read-only afterward; per-request temperature overrides never touch it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub agent: AgentSection,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

impl AppConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let cfg: Self = toml::from_str(&raw).map_err(|err| {
            AttacheError::Configuration(format!("failed to parse configuration: {err}"))
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Defaults plus `ATTACHE_*` environment overrides.
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_env_or_file(path: impl AsRef<Path>) -> Result<Self> {
        let mut cfg = Self::from_file(path)?;
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(provider) = env::var("ATTACHE_PROVIDER") {
            self.model.provider = provider.parse()?;
        }
        if let Ok(model) = env::var("ATTACHE_MODEL") {
            self.model.model = Some(model);
        }
        if let Ok(temperature) = env::var("ATTACHE_TEMPERATURE") {
            self.model.temperature = temperature.parse().map_err(|_| {
                AttacheError::Configuration(format!("invalid temperature `{temperature}`"))
            })?;
        }
        if let Ok(stream) = env::var("ATTACHE_STREAMING") {
            if let Ok(parsed) = stream.parse::<bool>() {
                self.model.streaming = parsed;
            }
        }
        if let Ok(region) = env::var("ATTACHE_AWS_REGION") {
            self.model.aws_region = region;
        }
        if let Ok(key) = env::var("ATTACHE_OPENAI_API_KEY") {
            self.model.openai.api_key = Some(key);
        }
        if let Ok(key) = env::var("ATTACHE_ANTHROPIC_API_KEY") {
            self.model.anthropic.api_key = Some(key);
        }
        if let Ok(key) = env::var("ATTACHE_GEMINI_API_KEY") {
            self.model.gemini.api_key = Some(key);
        }
        if let Ok(key) = env::var("ATTACHE_LLAMAAPI_API_KEY") {
            self.model.llamaapi.api_key = Some(key);
        }
        if let Ok(host) = env::var("ATTACHE_OLLAMA_HOST") {
            self.model.ollama.endpoint = Some(host);
        }
        if let Ok(calls) = env::var("ATTACHE_MAX_TOOL_CALLS") {
            if let Ok(parsed) = calls.parse::<usize>() {
                self.agent.max_tool_calls = parsed;
            }
        }
        if let Ok(timeout) = env::var("ATTACHE_TIMEOUT_SECONDS") {
            if let Ok(parsed) = timeout.parse::<u64>() {
                self.agent.timeout_seconds = parsed;
            }
        }
        if let Ok(host) = env::var("ATTACHE_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = env::var("ATTACHE_PORT") {
            if let Ok(parsed) = port.parse::<u16>() {
                self.server.port = parsed;
            }
        }
        if let Ok(level) = env::var("ATTACHE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(file) = env::var("ATTACHE_LOG_FILE") {
            self.logging.file = Some(file);
        }
        if let Ok(url) = env::var("ATTACHE_DATABASE_URL") {
            self.storage.database_url = Some(url);
        }
        if let Ok(ttl) = env::var("ATTACHE_CACHE_TTL") {
            if let Ok(parsed) = ttl.parse::<u64>() {
                self.cache.ttl_seconds = parsed;
            }
        }
        Ok(())
    }

    /// Construction-time checks. The provider enum is already validated by
    /// deserialization; credentials are deliberately left to backend
    /// construction so they can arrive via the environment.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=2.0).contains(&self.model.temperature) {
            return Err(AttacheError::Configuration(format!(
                "temperature {} outside [0, 2]",
                self.model.temperature
            )));
        }
        if self.agent.max_tool_calls == 0 {
            return Err(AttacheError::Configuration(
                "max_tool_calls must be at least 1".into(),
            ));
        }
        if self.agent.timeout_seconds == 0 {
            return Err(AttacheError::Configuration(
                "timeout_seconds must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn loads_file_and_applies_env_overrides() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[model]\nprovider='openai'\nmodel='gpt-4o'\n[server]\nhost='127.0.0.1'\nport=9000"
        )
        .unwrap();

        env::set_var("ATTACHE_PORT", "9100");
        let cfg = AppConfig::from_env_or_file(file.path()).unwrap();
        env::remove_var("ATTACHE_PORT");

        assert_eq!(cfg.server.port, 9100);
        assert_eq!(cfg.server.host, "127.0.0.1");
        assert_eq!(cfg.model.provider, Provider::OpenAi);
        assert_eq!(cfg.model.model.as_deref(), Some("gpt-4o"));
    }

    #[test]
    fn rejects_unknown_provider_eagerly() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[model]\nprovider='watson'").unwrap();

        let err = AppConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, AttacheError::Configuration(_)));
    }

    #[test]
    fn rejects_out_of_range_temperature() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[model]\nprovider='openai'\ntemperature=2.5").unwrap();

        let err = AppConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, AttacheError::Configuration(_)));
    }

    #[test]
    fn missing_credential_is_not_a_config_error() {
        // Key checks are deferred to backend construction.
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[model]\nprovider='openai'").unwrap();

        let cfg = AppConfig::from_file(file.path()).unwrap();
        assert!(cfg.model.openai.api_key.is_none());
    }

    #[test]
    fn provider_parse_round_trip() {
        for name in [
            "bedrock", "openai", "anthropic", "gemini", "ollama", "llamacpp", "llamaapi",
        ] {
            let provider: Provider = name.parse().unwrap();
            assert_eq!(provider.as_str(), name);
        }
        assert!("watson".parse::<Provider>().is_err());
    }
}
