// SPDX-License-Identifier: MIT OR Apache-2.0
//! Gateway configuration: defaults, TOML file, flag overrides.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Runtime settings for the gateway process.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GatewayConfig {
    /// Bind address of the tools surface.
    pub tools_bind: String,
    /// Bind address of the query surface.
    pub query_bind: String,
    /// Path of the SQLite store.
    pub db_path: PathBuf,
    /// Default rate-limit ceiling per window.
    pub rate_limit: u32,
    /// Rate-limit window length in seconds.
    pub rate_limit_window_secs: u64,
    /// Cadence of the idempotency sweeper in seconds.
    pub idempotency_sweep_secs: u64,
    /// Webhook shared secrets keyed by backend (`jira`, `github`, …).
    pub webhook_secrets: BTreeMap<String, String>,
    /// Emit JSON log lines instead of the human format.
    pub log_json: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            tools_bind: "127.0.0.1:8055".into(),
            query_bind: "127.0.0.1:8056".into(),
            db_path: PathBuf::from("trackgate.db"),
            rate_limit: 100,
            rate_limit_window_secs: 60,
            idempotency_sweep_secs: 3600,
            webhook_secrets: BTreeMap::new(),
            log_json: true,
        }
    }
}

/// Errors loading the configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config {path}: {source}")]
    Read {
        /// Path that was requested.
        path: String,
        /// The underlying I/O failure.
        source: std::io::Error,
    },

    /// The file is not valid TOML for this schema.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

impl GatewayConfig {
    /// Load from a TOML file, or the defaults when `path` is `None`.
    ///
    /// # Errors
    ///
    /// [`ConfigError`] when the file is unreadable or malformed.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Ok(toml::from_str(&raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_ports() {
        let config = GatewayConfig::default();
        assert_eq!(config.tools_bind, "127.0.0.1:8055");
        assert_eq!(config.query_bind, "127.0.0.1:8056");
        assert_eq!(config.rate_limit, 100);
        assert_eq!(config.rate_limit_window_secs, 60);
    }

    #[test]
    fn partial_toml_overrides_defaults() {
        let config: GatewayConfig = toml::from_str(
            r#"
            tools_bind = "0.0.0.0:9000"
            [webhook_secrets]
            jira = "s3cret"
            "#,
        )
        .unwrap();
        assert_eq!(config.tools_bind, "0.0.0.0:9000");
        assert_eq!(config.query_bind, "127.0.0.1:8056");
        assert_eq!(config.webhook_secrets["jira"], "s3cret");
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let parsed: Result<GatewayConfig, _> = toml::from_str("no_such_setting = 1");
        assert!(parsed.is_err());
    }
}
