//! Configuration for the session store and agent loop
//!
//! Follows a layered approach: every field has a sensible default so a
//! minimal YAML file (or none at all) produces a working configuration, and
//! environment variables override whatever the file provided. Validation
//! happens once at load time so the rest of the system can assume a
//! well-formed configuration.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::StoreError;

pub const ENV_ROOT: &str = "SITESMITH_ROOT";
pub const ENV_MAX_STEPS: &str = "SITESMITH_MAX_STEPS";
pub const ENV_ENGINE_ENDPOINT: &str = "SITESMITH_ENGINE_ENDPOINT";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Root directory holding one subtree per session.
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,
    /// Step ceiling for a single agent turn.
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    /// Capacity of the bounded progress channel between the engine reader
    /// and the turn's progress sink.
    #[serde(default = "default_progress_capacity")]
    pub progress_capacity: usize,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    /// Base URL of the HTTP completion engine, e.g. `http://localhost:8080`.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
        }
    }
}

fn default_root_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sitesmith")
        .join("sessions")
}

fn default_max_steps() -> usize {
    30
}

fn default_progress_capacity() -> usize {
    64
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for CoreConfig {
    fn default() -> Self {
        CoreConfig {
            root_dir: default_root_dir(),
            max_steps: default_max_steps(),
            progress_capacity: default_progress_capacity(),
            engine: EngineConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl CoreConfig {
    /// Parses a YAML document, applies environment overrides and validates.
    pub fn from_yaml(contents: &str) -> Result<CoreConfig, StoreError> {
        let mut config: CoreConfig = serde_yaml::from_str(contents)
            .map_err(|e| StoreError::Config(format!("invalid YAML: {}", e)))?;
        config.apply_overrides(&env_vars());
        config.validate()?;
        Ok(config)
    }

    /// Loads a YAML file from disk. A missing file yields defaults plus
    /// environment overrides rather than an error.
    pub async fn load(path: &std::path::Path) -> Result<CoreConfig, StoreError> {
        match tokio::fs::read_to_string(path).await {
            Ok(contents) => Self::from_yaml(&contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("No config file at {}, using defaults", path.display());
                let mut config = CoreConfig::default();
                config.apply_overrides(&env_vars());
                config.validate()?;
                Ok(config)
            }
            Err(e) => Err(StoreError::Io(e.to_string())),
        }
    }

    fn apply_overrides(&mut self, vars: &HashMap<String, String>) {
        if let Some(root) = vars.get(ENV_ROOT) {
            self.root_dir = PathBuf::from(root);
        }
        if let Some(steps) = vars.get(ENV_MAX_STEPS) {
            match steps.parse::<usize>() {
                Ok(parsed) => self.max_steps = parsed,
                Err(_) => log::warn!("Ignoring non-numeric {}: {}", ENV_MAX_STEPS, steps),
            }
        }
        if let Some(endpoint) = vars.get(ENV_ENGINE_ENDPOINT) {
            self.engine.endpoint = Some(endpoint.clone());
        }
    }

    pub fn validate(&self) -> Result<(), StoreError> {
        if self.max_steps == 0 {
            return Err(StoreError::Config(
                "max_steps must be at least 1".to_string(),
            ));
        }
        if self.progress_capacity == 0 {
            return Err(StoreError::Config(
                "progress_capacity must be at least 1".to_string(),
            ));
        }
        if self.root_dir.as_os_str().is_empty() {
            return Err(StoreError::Config("root_dir must not be empty".to_string()));
        }
        Ok(())
    }
}

fn env_vars() -> HashMap<String, String> {
    std::env::vars()
        .filter(|(key, _)| key.starts_with("SITESMITH_"))
        .collect()
}

/// Initializes the process logger from the configured level. Safe to call
/// more than once; later calls are no-ops.
pub fn init_logging(config: &LoggingConfig) {
    let _ = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.level.clone()),
    )
    .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = CoreConfig::default();
        assert_eq!(config.max_steps, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn yaml_overrides_defaults() {
        let config = CoreConfig::from_yaml(
            "root_dir: /tmp/pages\nmax_steps: 12\nengine:\n  endpoint: http://localhost:9000\n",
        )
        .unwrap();
        assert_eq!(config.root_dir, PathBuf::from("/tmp/pages"));
        assert_eq!(config.max_steps, 12);
        assert_eq!(
            config.engine.endpoint.as_deref(),
            Some("http://localhost:9000")
        );
    }

    #[test]
    fn env_vars_win_over_yaml() {
        let mut config = CoreConfig::from_yaml("max_steps: 12\n").unwrap();
        let mut vars = HashMap::new();
        vars.insert(ENV_MAX_STEPS.to_string(), "5".to_string());
        vars.insert(ENV_ROOT.to_string(), "/srv/sitesmith".to_string());
        config.apply_overrides(&vars);
        assert_eq!(config.max_steps, 5);
        assert_eq!(config.root_dir, PathBuf::from("/srv/sitesmith"));
    }

    #[test]
    fn non_numeric_env_step_count_is_ignored() {
        let mut config = CoreConfig::default();
        let mut vars = HashMap::new();
        vars.insert(ENV_MAX_STEPS.to_string(), "plenty".to_string());
        config.apply_overrides(&vars);
        assert_eq!(config.max_steps, 30);
    }

    #[test]
    fn zero_steps_rejected() {
        let result = CoreConfig::from_yaml("max_steps: 0\n");
        assert!(matches!(result, Err(StoreError::Config(_))));
    }
}
