use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::health::MonitorTarget;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("no health targets configured")]
    NoTargets,
    #[error("health target at position {0} has an empty name")]
    EmptyTargetName(usize),
    #[error("health target '{0}' has port 0 (must be 1-65535)")]
    InvalidPort(String),
    #[error("health target '{0}' is configured more than once")]
    DuplicateTarget(String),
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
    #[error("artifact directory must be a single relative directory name, got '{0}'")]
    InvalidArtifactDir(String),
    #[error("invalid target '{0}': expected NAME=PORT")]
    MalformedTarget(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub drift: DriftConfig,
    #[serde(default)]
    pub status_file: StatusFileConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
    #[serde(default = "default_health_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_targets")]
    pub targets: Vec<TargetConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetConfig {
    pub name: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftConfig {
    #[serde(default = "default_drift_interval_secs")]
    pub interval_secs: u64,
    /// Directory (relative to the watched root) holding generated artifacts.
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: String,
    #[serde(default = "default_tracked_extensions")]
    pub tracked_extensions: Vec<String>,
    #[serde(default = "default_ignored_dirs")]
    pub ignored_dirs: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusFileConfig {
    #[serde(default = "default_status_enabled")]
    pub enabled: bool,
    #[serde(default = "default_status_file_name")]
    pub file_name: String,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_probe_timeout_secs() -> u64 {
    2
}

fn default_health_interval_secs() -> u64 {
    60
}

fn default_drift_interval_secs() -> u64 {
    300 // full integrity scan every 5 minutes
}

fn default_targets() -> Vec<TargetConfig> {
    vec![
        TargetConfig {
            name: "Backend (API)".to_string(),
            port: 3000,
        },
        TargetConfig {
            name: "Frontend (Vite)".to_string(),
            port: 5173,
        },
    ]
}

fn default_artifact_dir() -> String {
    ".sentinel".to_string()
}

fn default_tracked_extensions() -> Vec<String> {
    ["md", "txt", "ts", "tsx", "js", "jsx", "py", "rs", "sql", "toml", "json"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_ignored_dirs() -> Vec<String> {
    ["node_modules", ".git", "target", "dist", "build", "__pycache__", ".venv"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_status_enabled() -> bool {
    true
}

fn default_status_file_name() -> String {
    "health.json".to_string()
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            probe_timeout_secs: default_probe_timeout_secs(),
            interval_secs: default_health_interval_secs(),
            targets: default_targets(),
        }
    }
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_drift_interval_secs(),
            artifact_dir: default_artifact_dir(),
            tracked_extensions: default_tracked_extensions(),
            ignored_dirs: default_ignored_dirs(),
        }
    }
}

impl Default for StatusFileConfig {
    fn default() -> Self {
        Self {
            enabled: default_status_enabled(),
            file_name: default_status_file_name(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config from {:?}", path.as_ref()))?;

        let config: Config = toml::from_str(&content)
            .context("Failed to parse config TOML")?;

        Ok(config)
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.health.targets.is_empty() {
            return Err(ConfigError::NoTargets);
        }

        let mut seen = HashSet::new();
        for (idx, target) in self.health.targets.iter().enumerate() {
            if target.name.trim().is_empty() {
                return Err(ConfigError::EmptyTargetName(idx));
            }
            if target.port == 0 {
                return Err(ConfigError::InvalidPort(target.name.clone()));
            }
            if !seen.insert(target.name.as_str()) {
                return Err(ConfigError::DuplicateTarget(target.name.clone()));
            }
        }

        if self.health.probe_timeout_secs == 0 {
            return Err(ConfigError::ZeroDuration("health.probe_timeout_secs"));
        }
        if self.health.interval_secs == 0 {
            return Err(ConfigError::ZeroDuration("health.interval_secs"));
        }
        if self.drift.interval_secs == 0 {
            return Err(ConfigError::ZeroDuration("drift.interval_secs"));
        }

        let artifact_dir = self.drift.artifact_dir.as_str();
        if artifact_dir.is_empty()
            || artifact_dir == "."
            || artifact_dir == ".."
            || artifact_dir.contains('/')
            || artifact_dir.contains('\\')
        {
            return Err(ConfigError::InvalidArtifactDir(artifact_dir.to_string()));
        }

        Ok(())
    }

    /// Replace the configured targets with `NAME=PORT` specs from the command line.
    pub fn apply_target_overrides(&mut self, specs: &[String]) -> std::result::Result<(), ConfigError> {
        if specs.is_empty() {
            return Ok(());
        }

        let mut targets = Vec::with_capacity(specs.len());
        for spec in specs {
            targets.push(parse_target_spec(spec)?);
        }
        self.health.targets = targets;
        Ok(())
    }

    pub fn targets(&self) -> Vec<MonitorTarget> {
        self.health
            .targets
            .iter()
            .map(|t| MonitorTarget::new(t.name.clone(), t.port))
            .collect()
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.health.probe_timeout_secs)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health.interval_secs)
    }

    pub fn drift_interval(&self) -> Duration {
        Duration::from_secs(self.drift.interval_secs)
    }
}

/// Parse `NAME=PORT`. The name may itself contain `=`; the last one splits.
pub fn parse_target_spec(spec: &str) -> std::result::Result<TargetConfig, ConfigError> {
    let (name, port) = spec
        .rsplit_once('=')
        .ok_or_else(|| ConfigError::MalformedTarget(spec.to_string()))?;

    let name = name.trim();
    if name.is_empty() {
        return Err(ConfigError::MalformedTarget(spec.to_string()));
    }

    let port: u16 = port
        .trim()
        .parse()
        .map_err(|_| ConfigError::MalformedTarget(spec.to_string()))?;
    if port == 0 {
        return Err(ConfigError::InvalidPort(name.to_string()));
    }

    Ok(TargetConfig {
        name: name.to_string(),
        port,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.health.host, "localhost");
        assert_eq!(config.health.probe_timeout_secs, 2);
        assert_eq!(config.health.interval_secs, 60);
        assert_eq!(config.drift.interval_secs, 300);
        assert_eq!(config.health.targets.len(), 2);
        assert_eq!(config.health.targets[0].port, 3000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_target_order() {
        let config: Config = toml::from_str(
            r#"
            [health]
            interval_secs = 15

            [[health.targets]]
            name = "B"
            port = 9002

            [[health.targets]]
            name = "A"
            port = 9001
            "#,
        )
        .unwrap();

        assert_eq!(config.health.interval_secs, 15);
        assert_eq!(config.health.probe_timeout_secs, 2);
        let names: Vec<_> = config.targets().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["B", "A"]);
    }

    #[test]
    fn test_validate_rejects_bad_targets() {
        let mut config = Config::default();
        config.health.targets.push(TargetConfig {
            name: "Backend (API)".to_string(),
            port: 4000,
        });
        assert_eq!(
            config.validate(),
            Err(ConfigError::DuplicateTarget("Backend (API)".to_string()))
        );

        let mut config = Config::default();
        config.health.targets[1].port = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidPort("Frontend (Vite)".to_string()))
        );

        let mut config = Config::default();
        config.health.targets.clear();
        assert_eq!(config.validate(), Err(ConfigError::NoTargets));
    }

    #[test]
    fn test_validate_rejects_zero_intervals_and_nested_artifact_dir() {
        let mut config = Config::default();
        config.health.probe_timeout_secs = 0;
        assert!(matches!(config.validate(), Err(ConfigError::ZeroDuration(_))));

        let mut config = Config::default();
        config.drift.artifact_dir = "../elsewhere".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidArtifactDir(_))
        ));
    }

    #[test]
    fn test_parse_target_spec() {
        let target = parse_target_spec("api=3000").unwrap();
        assert_eq!(target.name, "api");
        assert_eq!(target.port, 3000);

        let target = parse_target_spec("a=b=8080").unwrap();
        assert_eq!(target.name, "a=b");

        assert!(parse_target_spec("api").is_err());
        assert!(parse_target_spec("=80").is_err());
        assert!(parse_target_spec("api=70000").is_err());
        assert_eq!(
            parse_target_spec("api=0"),
            Err(ConfigError::InvalidPort("api".to_string()))
        );
    }

    #[test]
    fn test_target_overrides_replace_configured_targets() {
        let mut config = Config::default();
        config
            .apply_target_overrides(&["A=9001".to_string(), "B=9002".to_string()])
            .unwrap();
        let targets = config.targets();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0], MonitorTarget::new("A", 9001));
        assert_eq!(targets[1], MonitorTarget::new("B", 9002));
    }
}
