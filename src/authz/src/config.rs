//! Engine configuration loading and validation
//!
//! Configuration is read from TOML and can be overlaid by environment
//! variables:
//!
//! - `GATEHOUSE_EFFECT` - `deny_override` or `allow_override`
//! - `GATEHOUSE_PERSIST_TIMEOUT_MS` - bound on a single adapter call
//! - `GATEHOUSE_MAX_PERSIST_RETRIES` - retries for transient adapter failures
//! - `GATEHOUSE_RETRY_BACKOFF_MS` - pause between retries
//! - `GATEHOUSE_MAX_ROLE_DEPTH` - role hierarchy depth bound (`0` or empty = unbounded)
//! - `GATEHOUSE_ENABLE_METRICS` - `true` / `false`

use crate::error::{AuthzError, Result};
use crate::matcher::EffectStrategy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct EngineConfig {
    /// How matching rules combine into a decision
    #[serde(default)]
    pub effect: EffectStrategy,

    /// Bound on each adapter call made by a mutation
    #[serde(default = "default_persist_timeout_ms")]
    pub persist_timeout_ms: u64,

    /// Retries after a transient adapter failure
    #[serde(default = "default_max_persist_retries")]
    pub max_persist_retries: u32,

    /// Pause between retries
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Maximum role hierarchy depth followed during resolution
    #[serde(default)]
    pub max_role_depth: Option<usize>,

    /// Enable metrics collection
    #[serde(default = "default_true")]
    pub enable_metrics: bool,
}

fn default_persist_timeout_ms() -> u64 {
    5_000
}

fn default_max_persist_retries() -> u32 {
    2
}

fn default_retry_backoff_ms() -> u64 {
    50
}

fn default_true() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            effect: EffectStrategy::default(),
            persist_timeout_ms: default_persist_timeout_ms(),
            max_persist_retries: default_max_persist_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            max_role_depth: None,
            enable_metrics: true,
        }
    }
}

impl EngineConfig {
    /// Parse configuration from a TOML document
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)
            .map_err(|e| AuthzError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading engine config from {}", path.display());
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Overlay `GATEHOUSE_*` environment variables
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Overlay values from an arbitrary key lookup
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("GATEHOUSE_EFFECT") {
            self.effect = match raw.trim() {
                "deny_override" => EffectStrategy::DenyOverride,
                "allow_override" => EffectStrategy::AllowOverride,
                other => {
                    return Err(AuthzError::Config(format!(
                        "GATEHOUSE_EFFECT: unknown strategy '{}'",
                        other
                    )))
                }
            };
        }
        if let Some(raw) = lookup("GATEHOUSE_PERSIST_TIMEOUT_MS") {
            self.persist_timeout_ms = parse_var("GATEHOUSE_PERSIST_TIMEOUT_MS", &raw)?;
        }
        if let Some(raw) = lookup("GATEHOUSE_MAX_PERSIST_RETRIES") {
            self.max_persist_retries = parse_var("GATEHOUSE_MAX_PERSIST_RETRIES", &raw)?;
        }
        if let Some(raw) = lookup("GATEHOUSE_RETRY_BACKOFF_MS") {
            self.retry_backoff_ms = parse_var("GATEHOUSE_RETRY_BACKOFF_MS", &raw)?;
        }
        if let Some(raw) = lookup("GATEHOUSE_MAX_ROLE_DEPTH") {
            let raw = raw.trim();
            self.max_role_depth = match raw {
                "" | "0" => None,
                _ => Some(parse_var("GATEHOUSE_MAX_ROLE_DEPTH", raw)?),
            };
        }
        if let Some(raw) = lookup("GATEHOUSE_ENABLE_METRICS") {
            self.enable_metrics = parse_var("GATEHOUSE_ENABLE_METRICS", &raw)?;
        }

        self.validate()?;
        Ok(self)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.persist_timeout_ms == 0 {
            return Err(AuthzError::Config(
                "persist_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.max_role_depth == Some(0) {
            return Err(AuthzError::Config(
                "max_role_depth must be greater than zero when set".to_string(),
            ));
        }
        Ok(())
    }

    pub fn persist_timeout(&self) -> Duration {
        Duration::from_millis(self.persist_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| AuthzError::Config(format!("{}: {}", key, e)))
}
