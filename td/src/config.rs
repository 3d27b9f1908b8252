//! Workflow engine configuration types and loading.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::scheduler::SchedulerConfig;

/// Main workflow engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// LLM provider configuration, used by the Planner and any step that
    /// calls out to a model directly.
    pub llm: LlmConfig,

    /// Agent RPC scheduling: priority queue, concurrency cap, rate limiting.
    pub scheduler: SchedulerConfig,

    /// Workflow engine defaults: retry policy, checkpoint cadence, interrupt
    /// handling.
    pub workflow: WorkflowConfig,

    /// Planner defaults: task fan-out cap, generation temperature.
    pub planner: PlannerConfig,

    /// Storage configuration for the `taskstore`-backed instance/task tables.
    pub storage: StorageConfig,
}

impl Config {
    /// Load configuration with fallback chain: explicit path, then
    /// project-local `.workflow.yml`, then `~/.config/taskdaemon/workflow.yaml`,
    /// then defaults.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let local_config = PathBuf::from(".workflow.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("taskdaemon").join("workflow.yaml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Per-provider LLM settings, keyed by provider name ("anthropic", "openai").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Model identifier.
    pub model: String,

    /// Environment variable containing the API key.
    #[serde(rename = "api-key-env")]
    pub api_key_env: String,

    /// API base URL.
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Maximum tokens per response.
    #[serde(rename = "max-tokens")]
    pub max_tokens: u32,

    /// Request timeout in milliseconds.
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-20250514".to_string(),
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            base_url: "https://api.anthropic.com".to_string(),
            max_tokens: 16384,
            timeout_ms: 300_000,
        }
    }
}

/// LLM configuration: a default provider plus named overrides a caller can
/// select at the call site (e.g. "use openai for extraction steps").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Name of the default provider ("anthropic" or "openai").
    pub provider: String,

    /// Base settings used when no override is selected.
    #[serde(flatten)]
    pub default: ProviderConfig,

    /// Named provider overrides, keyed by provider name. Resolving with an
    /// override name present here replaces `default` entirely rather than
    /// merging field-by-field.
    pub overrides: HashMap<String, ProviderConfig>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".to_string(),
            default: ProviderConfig::default(),
            overrides: HashMap::new(),
        }
    }
}

/// Errors that can occur while resolving or reading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown LLM provider override: '{0}'")]
    UnknownProvider(String),

    #[error("environment variable '{0}' is not set")]
    MissingApiKey(String),
}

impl LlmConfig {
    /// Resolve to a concrete, provider-specific configuration. Passing
    /// `None` resolves `self.provider` against `self.default`; passing
    /// `Some(name)` looks `name` up in `overrides`.
    pub fn resolve_provider(&self, provider: Option<&str>) -> Result<ResolvedLlmConfig, ConfigError> {
        let provider = provider.unwrap_or(&self.provider);

        let settings = if provider == self.provider {
            &self.default
        } else {
            self.overrides
                .get(provider)
                .ok_or_else(|| ConfigError::UnknownProvider(provider.to_string()))?
        };

        Ok(ResolvedLlmConfig {
            provider: provider.to_string(),
            model: settings.model.clone(),
            api_key_env: settings.api_key_env.clone(),
            base_url: settings.base_url.clone(),
            max_tokens: settings.max_tokens,
            timeout_ms: settings.timeout_ms,
        })
    }

    /// Resolve the default provider. Shorthand for `resolve_provider(None)`.
    pub fn resolve(&self) -> Result<ResolvedLlmConfig, ConfigError> {
        self.resolve_provider(None)
    }
}

/// A fully resolved, single-provider LLM configuration ready to build a
/// client from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedLlmConfig {
    pub provider: String,
    pub model: String,
    pub api_key_env: String,
    pub base_url: String,
    pub max_tokens: u32,
    pub timeout_ms: u64,
}

impl ResolvedLlmConfig {
    /// Read the API key from the environment variable named by `api_key_env`.
    pub fn get_api_key(&self) -> Result<String, ConfigError> {
        std::env::var(&self.api_key_env).map_err(|_| ConfigError::MissingApiKey(self.api_key_env.clone()))
    }
}

/// Workflow engine defaults applied when a step or definition doesn't
/// override them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Default retry attempts for a failed step before surfacing the error.
    #[serde(rename = "max-retry-attempts")]
    pub max_retry_attempts: u32,

    /// Base linear backoff between retries, in milliseconds.
    #[serde(rename = "retry-backoff-ms")]
    pub retry_backoff_ms: u64,

    /// How many steps run before the instance is checkpointed to the store.
    #[serde(rename = "checkpoint-every-steps")]
    pub checkpoint_every_steps: u32,

    /// How long a `human` step waits before the instance is considered
    /// stalled and surfaced to operators, in seconds.
    #[serde(rename = "human-step-timeout-secs")]
    pub human_step_timeout_secs: u64,

    /// Maximum steps a single instance may execute before the engine aborts
    /// it as runaway (guards against cyclic routing bugs).
    #[serde(rename = "max-steps-per-instance")]
    pub max_steps_per_instance: u32,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_retry_attempts: 3,
            retry_backoff_ms: 1_000,
            checkpoint_every_steps: 1,
            human_step_timeout_secs: 86_400,
            max_steps_per_instance: 1_000,
        }
    }
}

/// Planner defaults (§4.10).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Upper bound on tasks generated per plan, passed to the LLM as a
    /// guideline rather than enforced by truncation.
    #[serde(rename = "max-tasks-per-plan")]
    pub max_tasks_per_plan: u32,

    /// Max tokens allowed for a planning/replanning completion.
    #[serde(rename = "max-tokens")]
    pub max_tokens: u32,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_tasks_per_plan: 8,
            max_tokens: 2048,
        }
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory for TaskStore data.
    #[serde(rename = "taskstore-dir")]
    pub taskstore_dir: String,

    /// Warning threshold for JSONL file size in MB.
    #[serde(rename = "jsonl-warn-mb")]
    pub jsonl_warn_mb: u32,

    /// Error threshold for JSONL file size in MB.
    #[serde(rename = "jsonl-error-mb")]
    pub jsonl_error_mb: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            taskstore_dir: ".taskstore".to_string(),
            jsonl_warn_mb: 100,
            jsonl_error_mb: 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_anthropic_provider() {
        let config = Config::default();
        assert_eq!(config.llm.provider, "anthropic");
        assert_eq!(config.workflow.max_retry_attempts, 3);
    }

    #[test]
    fn resolve_default_provider() {
        let config = LlmConfig::default();
        let resolved = config.resolve().unwrap();
        assert_eq!(resolved.provider, "anthropic");
        assert_eq!(resolved.api_key_env, "ANTHROPIC_API_KEY");
    }

    #[test]
    fn resolve_unknown_override_fails() {
        let config = LlmConfig::default();
        let err = config.resolve_provider(Some("openai")).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownProvider(_)));
    }

    #[test]
    fn resolve_known_override_succeeds() {
        let mut config = LlmConfig::default();
        config.overrides.insert(
            "openai".to_string(),
            ProviderConfig {
                model: "gpt-5".to_string(),
                api_key_env: "OPENAI_API_KEY".to_string(),
                base_url: "https://api.openai.com".to_string(),
                max_tokens: 8192,
                timeout_ms: 60_000,
            },
        );
        let resolved = config.resolve_provider(Some("openai")).unwrap();
        assert_eq!(resolved.model, "gpt-5");
        assert_eq!(resolved.api_key_env, "OPENAI_API_KEY");
    }

    #[test]
    fn get_api_key_missing_errors() {
        let resolved = ResolvedLlmConfig {
            provider: "anthropic".to_string(),
            model: "m".to_string(),
            api_key_env: "TASKDAEMON_TEST_DOES_NOT_EXIST".to_string(),
            base_url: "https://example.com".to_string(),
            max_tokens: 100,
            timeout_ms: 1000,
        };
        assert!(resolved.get_api_key().is_err());
    }

    #[test]
    fn deserialize_partial_yaml_uses_defaults() {
        let yaml = r#"
llm:
  provider: anthropic
  model: claude-haiku
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.llm.default.model, "claude-haiku");
        assert_eq!(config.llm.default.api_key_env, "ANTHROPIC_API_KEY");
        assert_eq!(config.workflow.max_retry_attempts, 3);
    }
}
