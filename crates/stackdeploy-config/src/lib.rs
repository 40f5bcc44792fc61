// stackdeploy-config - Manifest loading and runtime configuration
//
// Runtime configuration is layered from multiple sources:
// 1. Environment variables (highest priority)
// 2. Config file path from --config or STACKDEPLOY_CONFIG
// 3. Default config file locations (./stackdeploy.toml, ./.stackdeploy.toml)
// 4. Built-in defaults (lowest priority)
//
// The deployment manifest is a separate, per-stack document (see `manifest`).

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub mod env_overrides;
pub mod manifest;
mod sources;
mod validation;

pub use env_overrides::{EnvSource, ENV_PREFIX};
pub use manifest::{
    Effect, Manifest, ManifestError, OnFailure, ParameterValue, PolicyStatement, Section,
    SourcedBinding, TemplateSource,
};

/// Main runtime configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub poll: PollConfig,

    #[serde(default)]
    pub scripts: ScriptConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub aws: AwsConfig,
}

/// Stack status polling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub interval_secs: u64,
    /// Events older than this are never reported
    pub event_lookback_secs: u64,
    pub max_wait_secs: u64,
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            event_lookback_secs: 20 * 60,
            max_wait_secs: 2 * 60 * 60,
        }
    }
}

/// Pre/post install script configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptConfig {
    pub scratch_dir: PathBuf,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            scratch_dir: std::env::temp_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => anyhow::bail!("Unsupported log format: {}. Supported: text, json", s),
        }
    }
}

/// AWS client settings. The region here is only a fallback for commands that
/// run without a manifest; a manifest always carries its own region.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AwsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

impl RuntimeConfig {
    /// Load configuration from all sources with priority.
    /// An explicit path must exist; otherwise default locations are optional.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        match explicit_path {
            Some(path) => sources::load_from_file_path(path),
            None => sources::load_or_default(),
        }
    }

    /// Replace sections with those of a file-loaded config.
    pub fn merge(&mut self, other: RuntimeConfig) {
        self.poll = other.poll;
        self.scripts = other.scripts;
        self.logging = other.logging;
        if other.aws.profile.is_some() {
            self.aws.profile = other.aws.profile;
        }
        if other.aws.region.is_some() {
            self.aws.region = other.aws.region;
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        validation::validate_config(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_configs() {
        let config = RuntimeConfig::default();
        assert_eq!(config.poll.interval(), Duration::from_secs(10));
        assert_eq!(config.poll.event_lookback_secs, 1200);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, LogFormat::Text);
        assert!(config.aws.profile.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: RuntimeConfig = toml::from_str(
            r#"
            [poll]
            interval_secs = 5

            [logging]
            format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.poll.interval_secs, 5);
        assert_eq!(config.poll.event_lookback_secs, 1200);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_merge_keeps_profile_when_file_has_none() {
        let mut config = RuntimeConfig::default();
        config.aws.profile = Some("ops".to_string());

        let mut file = RuntimeConfig::default();
        file.poll.interval_secs = 30;
        config.merge(file);

        assert_eq!(config.poll.interval_secs, 30);
        assert_eq!(config.aws.profile.as_deref(), Some("ops"));
    }

    #[test]
    fn test_log_format_from_str() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("TEXT".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert!("xml".parse::<LogFormat>().is_err());
    }
}
