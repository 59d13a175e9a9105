//! Configuration parsing and validation for genproxy.

use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::router::{ApiGeneration, SystemRole};

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub streaming: StreamingConfig,
    #[serde(default)]
    pub video: VideoConfig,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub capabilities: Vec<CapabilityRule>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on (e.g., "127.0.0.1:3000")
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Requests handled at once across all routes. Counted until the
    /// response starts; an open frame stream no longer holds a slot.
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
}

fn default_listen() -> String {
    "127.0.0.1:3000".to_string()
}

fn default_max_concurrent_requests() -> usize {
    512
}

/// Streaming behavior shared by all chat-like endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamingConfig {
    /// Global streaming switch; `false` always uses the non-streaming path.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// System prompt injected ahead of every conversation.
    #[serde(default)]
    pub system_instructions: Option<String>,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            system_instructions: None,
        }
    }
}

/// Video job polling.
#[derive(Debug, Clone, Deserialize)]
pub struct VideoConfig {
    /// Interval between polls in blocking mode, in seconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Delay before the single status check in decoupled mode, in seconds.
    #[serde(default = "default_status_delay")]
    pub status_delay_secs: u64,
    /// Optional upper bound on a blocking job's lifetime, in seconds.
    #[serde(default)]
    pub max_wait_secs: Option<u64>,
}

fn default_poll_interval() -> u64 {
    5
}

fn default_status_delay() -> u64 {
    10
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            status_delay_secs: default_status_delay(),
            max_wait_secs: None,
        }
    }
}

/// API key wrapper that redacts in Debug/Display/Serialize and zeroizes on drop.
///
/// Only accessible via `.expose_secret()` (grep-auditable).
#[derive(Clone)]
pub struct ApiKey(SecretString);

impl ApiKey {
    /// Access the raw key value. Every call site is auditable via `grep expose_secret`.
    pub fn expose_secret(&self) -> &str {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl std::fmt::Display for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl Serialize for ApiKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("[REDACTED]")
    }
}

impl<'de> serde::Deserialize<'de> for ApiKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(|s| ApiKey(SecretString::from(s)))
    }
}

impl From<String> for ApiKey {
    fn from(s: String) -> Self {
        ApiKey(SecretString::from(s))
    }
}

impl From<&str> for ApiKey {
    fn from(s: &str) -> Self {
        ApiKey(SecretString::from(s))
    }
}

/// How a provider's API key was resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum KeySource {
    /// Key was a literal string in config (no ${} references)
    Literal,
    /// Key contained ${VAR} references expanded from environment
    EnvExpanded,
    /// Key was auto-discovered from convention env var (holds var name)
    Convention(String),
    /// No key available
    None,
}

impl std::fmt::Display for KeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeySource::Literal => write!(f, "config-literal"),
            KeySource::EnvExpanded => write!(f, "env-expanded"),
            KeySource::Convention(var) => write!(f, "convention ({})", var),
            KeySource::None => write!(f, "none"),
        }
    }
}

/// Which wire dialect a provider speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// OpenAI or any OpenAI-compatible endpoint (DeepSeek, ...).
    Openai,
    /// Azure OpenAI (deployment-scoped URLs, `api-key` header).
    Azure,
    /// Gemini API; video generation only.
    Gemini,
}

impl ProviderKind {
    /// Base URL used when the config leaves `url` empty.
    pub fn default_url(&self) -> Option<&'static str> {
        match self {
            ProviderKind::Openai => Some("https://api.openai.com/v1"),
            ProviderKind::Azure => None,
            ProviderKind::Gemini => Some(crate::provider::gemini::DEFAULT_GEMINI_URL),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Openai => "openai",
            ProviderKind::Azure => "azure",
            ProviderKind::Gemini => "gemini",
        }
    }
}

/// Provider configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// Unique name; also the route prefix (`/api/<name>/...`)
    pub name: String,
    pub kind: ProviderKind,
    /// Base URL (Azure: the resource endpoint). Empty means the kind's default.
    #[serde(default)]
    pub url: String,
    pub api_key: Option<ApiKey>,
    /// Azure `api-version` for inference calls
    #[serde(default)]
    pub api_version: Option<String>,
    /// Azure `api-version` for video jobs
    #[serde(default)]
    pub video_api_version: Option<String>,
    /// Model-name substrings routed to this provider
    #[serde(default)]
    pub models: Vec<String>,
    /// Model name to Azure deployment name
    #[serde(default)]
    pub deployments: HashMap<String, String>,
    /// Receives models no other provider claims
    #[serde(default)]
    pub default: bool,
}

impl ProviderConfig {
    /// The configured URL, or the kind's default.
    pub fn effective_url(&self) -> Option<&str> {
        if self.url.is_empty() {
            self.kind.default_url()
        } else {
            Some(&self.url)
        }
    }
}

/// One row of the model capability table.
///
/// Rules are matched against the model name in order; later matches
/// override fields set by earlier ones.
#[derive(Debug, Clone, Deserialize)]
pub struct CapabilityRule {
    /// Case-insensitive regular expression matched against the model name
    pub pattern: String,
    #[serde(default)]
    pub supports_audio: Option<bool>,
    #[serde(default)]
    pub supports_truncation: Option<bool>,
    #[serde(default)]
    pub api_generation: Option<ApiGeneration>,
    #[serde(default)]
    pub system_role: Option<SystemRole>,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Default log level when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;

        Self::parse_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.providers.is_empty() {
            tracing::warn!("No providers configured - proxy will reject all requests");
        }

        let mut seen = std::collections::HashSet::new();
        for provider in &self.providers {
            if provider.name.is_empty() || provider.name.contains('/') {
                return Err(ConfigError::Validation(format!(
                    "Provider name '{}' must be non-empty and contain no '/'",
                    provider.name
                )));
            }
            if provider.name == crate::router::AUTO_PROVIDER {
                return Err(ConfigError::Validation(format!(
                    "Provider name '{}' is reserved",
                    provider.name
                )));
            }
            if !seen.insert(provider.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "Provider '{}' is configured more than once",
                    provider.name
                )));
            }
            if provider.effective_url().is_none() {
                return Err(ConfigError::Validation(format!(
                    "Provider '{}' has empty URL",
                    provider.name
                )));
            }
        }

        if self.providers.iter().filter(|p| p.default).count() > 1 {
            return Err(ConfigError::Validation(
                "At most one provider may be marked default".to_string(),
            ));
        }

        for rule in &self.capabilities {
            Regex::new(&format!("(?i){}", rule.pattern)).map_err(|e| {
                ConfigError::Validation(format!(
                    "Invalid capability pattern '{}': {}",
                    rule.pattern, e
                ))
            })?;
        }

        if self.video.poll_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "video.poll_interval_secs must be greater than zero".to_string(),
            ));
        }

        if self.server.max_concurrent_requests == 0 {
            return Err(ConfigError::Validation(
                "server.max_concurrent_requests must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Apply process environment overrides (`NO_STREAMING`, `SYSTEM_INSTRUCTIONS`).
    pub fn apply_env_overrides(&mut self) {
        self.apply_env_overrides_with(|name| std::env::var(name).ok());
    }

    fn apply_env_overrides_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("NO_STREAMING") {
            if no_streaming_regex().is_match(&value) {
                tracing::info!("Streaming disabled by NO_STREAMING");
                self.streaming.enabled = false;
            }
        }
        if self.streaming.system_instructions.is_none() {
            if let Some(value) = lookup("SYSTEM_INSTRUCTIONS") {
                self.streaming.system_instructions = Some(value);
            }
        }
    }

    /// Find a provider by name.
    pub fn provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.name == name)
    }
}

fn no_streaming_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)true|1|yes").expect("static regex"))
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Environment variable '{var}' not set for provider '{provider}': {message}")]
    EnvVar {
        var: String,
        provider: String,
        message: String,
    },
}

/// Raw provider config deserialized directly from TOML.
/// `api_key` and `url` may contain `${VAR}` references not yet expanded.
#[derive(Deserialize)]
pub struct RawProviderConfig {
    name: String,
    kind: ProviderKind,
    #[serde(default)]
    url: String,
    api_key: Option<String>,
    #[serde(default)]
    api_version: Option<String>,
    #[serde(default)]
    video_api_version: Option<String>,
    #[serde(default)]
    models: Vec<String>,
    #[serde(default)]
    deployments: HashMap<String, String>,
    #[serde(default)]
    default: bool,
}

/// Raw configuration deserialized directly from TOML.
#[derive(Deserialize)]
pub struct RawConfig {
    server: ServerConfig,
    #[serde(default)]
    streaming: StreamingConfig,
    #[serde(default)]
    video: VideoConfig,
    #[serde(default)]
    providers: Vec<RawProviderConfig>,
    #[serde(default)]
    capabilities: Vec<CapabilityRule>,
    #[serde(default)]
    logging: LoggingConfig,
}

/// Expand all `${VAR}` references in a string using a custom lookup function.
///
/// Supports multiple `${VAR}` in one string (e.g., `${SCHEME}://${HOST}/v1`).
/// Fails on first missing variable, unclosed `${`, or empty variable name.
fn expand_env_vars_with<F>(
    input: &str,
    provider_name: &str,
    lookup: F,
) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if !input.contains("${") {
        return Ok(input.to_string());
    }

    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        let end = after.find('}').ok_or_else(|| ConfigError::EnvVar {
            var: "<unclosed>".to_string(),
            provider: provider_name.to_string(),
            message: format!("Unclosed '${{' in config value: {}", input),
        })?;

        let var_name = &after[..end];
        if var_name.is_empty() {
            return Err(ConfigError::EnvVar {
                var: "".to_string(),
                provider: provider_name.to_string(),
                message: "Empty variable name in '${}' reference".to_string(),
            });
        }

        let value = lookup(var_name).ok_or_else(|| ConfigError::EnvVar {
            var: var_name.to_string(),
            provider: provider_name.to_string(),
            message: format!(
                "Environment variable '{}' is not set (referenced in '{}')",
                var_name, provider_name
            ),
        })?;

        result.push_str(&value);
        rest = &after[end + 1..];
    }

    result.push_str(rest);
    Ok(result)
}

/// Expand all `${VAR}` references in a string using real environment variables.
fn expand_env_vars(input: &str, provider_name: &str) -> Result<String, ConfigError> {
    expand_env_vars_with(input, provider_name, |name| std::env::var(name).ok())
}

/// Derive the convention-based env var name for a provider.
///
/// - "openai" -> "GENPROXY_OPENAI_API_KEY"
/// - "azure-east" -> "GENPROXY_AZURE_EAST_API_KEY"
pub fn convention_env_var_name(provider_name: &str) -> String {
    let upper_snake = provider_name.to_uppercase().replace(['-', ' '], "_");
    format!("GENPROXY_{}_API_KEY", upper_snake)
}

/// Try convention-based env var lookup for a provider's API key.
fn convention_key_lookup(provider_name: &str) -> Option<(String, String)> {
    let var_name = convention_env_var_name(provider_name);
    std::env::var(&var_name).ok().map(|value| (var_name, value))
}

impl Config {
    /// Convert raw (deserialized) config to final config with env var expansion.
    ///
    /// For each provider:
    /// - `url` has `${VAR}` references expanded
    /// - If `api_key` contains `${VAR}`: expand from environment, source = `EnvExpanded`
    /// - If `api_key` is a literal string: wrap directly, source = `Literal`
    /// - If `api_key` is absent: try convention lookup (`GENPROXY_<NAME>_API_KEY`),
    ///   source = `Convention(var_name)` or `KeySource::None`
    pub fn from_raw(raw: RawConfig) -> Result<(Self, Vec<(String, KeySource)>), ConfigError> {
        let mut providers = Vec::with_capacity(raw.providers.len());
        let mut key_sources = Vec::with_capacity(raw.providers.len());

        for rp in raw.providers {
            let (api_key, source) = match rp.api_key {
                Some(ref raw_key) if raw_key.contains("${") => {
                    let expanded = expand_env_vars(raw_key, &rp.name)?;
                    (Some(ApiKey::from(expanded)), KeySource::EnvExpanded)
                }
                Some(ref raw_key) => (Some(ApiKey::from(raw_key.as_str())), KeySource::Literal),
                None => match convention_key_lookup(&rp.name) {
                    Some((var_name, value)) => {
                        (Some(ApiKey::from(value)), KeySource::Convention(var_name))
                    }
                    None => (None, KeySource::None),
                },
            };

            key_sources.push((rp.name.clone(), source));

            let url = expand_env_vars(&rp.url, &rp.name)?;

            providers.push(ProviderConfig {
                name: rp.name,
                kind: rp.kind,
                url,
                api_key,
                api_version: rp.api_version,
                video_api_version: rp.video_api_version,
                models: rp.models,
                deployments: rp.deployments,
                default: rp.default,
            });
        }

        let mut streaming = raw.streaming;
        if let Some(instructions) = &streaming.system_instructions {
            streaming.system_instructions =
                Some(expand_env_vars(instructions, "streaming.system_instructions")?);
        }

        let config = Config {
            server: raw.server,
            streaming,
            video: raw.video,
            providers,
            capabilities: raw.capabilities,
            logging: raw.logging,
        };

        Ok((config, key_sources))
    }

    /// Load configuration from a TOML file with environment variable expansion.
    ///
    /// This is the env-var-aware entry point. It:
    /// 1. Reads the file
    /// 2. Parses as `RawConfig` (api_key as plain String)
    /// 3. Expands `${VAR}` references and applies convention lookup
    /// 4. Applies `NO_STREAMING` / `SYSTEM_INSTRUCTIONS` overrides
    /// 5. Validates the resulting config
    ///
    /// Returns the config and per-provider key source information.
    pub fn from_file_with_env(
        path: impl AsRef<Path>,
    ) -> Result<(Self, Vec<(String, KeySource)>), ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;

        let raw: RawConfig = toml::from_str(&content).map_err(ConfigError::Parse)?;
        let (mut config, key_sources) = Self::from_raw(raw)?;
        config.apply_env_overrides();
        config.validate()?;

        Ok((config, key_sources))
    }
}
