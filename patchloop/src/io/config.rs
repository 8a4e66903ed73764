//! Agent configuration (`patchloop.toml`).

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::io::gateway::DEFAULT_BASE_URL;

/// Agent configuration (TOML).
///
/// Every field is optional in the file; missing fields take the defaults
/// below. CLI flags override individual values after loading.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Provider model id.
    pub model: String,

    /// Output token cap per model request.
    pub max_tokens: u32,

    pub api_base_url: String,

    /// Environment variable holding the provider credential.
    pub api_key_env: String,

    /// HTTP timeout for one model request.
    pub request_timeout_secs: u64,

    /// Maximum number of model calls per run.
    pub max_rounds: u32,

    /// Extra attempts after a retryable gateway error. `0` disables retries.
    pub gateway_retries: u32,

    /// Delay before retry `n` is `n * gateway_retry_backoff_ms`.
    pub gateway_retry_backoff_ms: u64,

    /// Optional timeout for `run_shell` tool calls. Unset waits indefinitely.
    pub shell_timeout_secs: Option<u64>,

    /// Optional timeout for each verification run. Unset waits indefinitely.
    pub verify_timeout_secs: Option<u64>,

    /// Truncate each captured stdout/stderr stream beyond this many bytes.
    pub output_limit_bytes: usize,

    /// Name of the working directory in the system prompt (defaults to its path).
    pub working_dir_label: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: "claude-3-5-sonnet-20241022".to_string(),
            max_tokens: 4096,
            api_base_url: DEFAULT_BASE_URL.to_string(),
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            request_timeout_secs: 600,
            max_rounds: 12,
            gateway_retries: 0,
            gateway_retry_backoff_ms: 1_000,
            shell_timeout_secs: None,
            verify_timeout_secs: None,
            output_limit_bytes: 1_000_000,
            working_dir_label: None,
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(anyhow!("model must not be empty"));
        }
        if self.max_tokens == 0 {
            return Err(anyhow!("max_tokens must be > 0"));
        }
        if self.max_rounds == 0 {
            return Err(anyhow!("max_rounds must be > 0"));
        }
        if self.request_timeout_secs == 0 {
            return Err(anyhow!("request_timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.api_key_env.trim().is_empty() {
            return Err(anyhow!("api_key_env must not be empty"));
        }
        if !self.api_base_url.starts_with("http://") && !self.api_base_url.starts_with("https://")
        {
            return Err(anyhow!("api_base_url must be an http(s) URL"));
        }
        if self.shell_timeout_secs == Some(0) || self.verify_timeout_secs == Some(0) {
            return Err(anyhow!("timeouts must be > 0 when set"));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn shell_timeout(&self) -> Option<Duration> {
        self.shell_timeout_secs.map(Duration::from_secs)
    }

    pub fn verify_timeout(&self) -> Option<Duration> {
        self.verify_timeout_secs.map(Duration::from_secs)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `AgentConfig::default()`.
pub fn load_config(path: &Path) -> Result<AgentConfig> {
    if !path.exists() {
        let cfg = AgentConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AgentConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, AgentConfig::default());
        assert_eq!(cfg.max_rounds, 12);
        assert_eq!(cfg.gateway_retries, 0);
        assert_eq!(cfg.shell_timeout(), None);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("patchloop.toml");
        fs::write(
            &path,
            "max_rounds = 5\nshell_timeout_secs = 30\ngateway_retries = 2\n",
        )
        .expect("write");

        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.max_rounds, 5);
        assert_eq!(cfg.shell_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(cfg.gateway_retries, 2);
        assert_eq!(cfg.model, AgentConfig::default().model);
        assert_eq!(cfg.gateway_retry_backoff_ms, 1_000);
    }

    #[test]
    fn rejects_zero_round_budget() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("patchloop.toml");
        fs::write(&path, "max_rounds = 0\n").expect("write");
        let err = load_config(&path).expect_err("invalid");
        assert!(format!("{err:#}").contains("max_rounds must be > 0"));
    }

    #[test]
    fn rejects_unknown_value_types() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("patchloop.toml");
        fs::write(&path, "max_rounds = \"many\"\n").expect("write");
        assert!(load_config(&path).is_err());
    }
}
