//! Configuration management for planflow
//!
//! Engine settings are resolved from three layers, later layers winning:
//! 1. Built-in defaults
//! 2. `PLANFLOW_*` environment variables
//! 3. A `planflow.yaml` file (current directory or `~/.config/planflow/`)

use crate::common::EnvLoader;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

const CONFIG_FILENAME: &str = "planflow.yaml";
const ENV_PREFIX: &str = "PLANFLOW";

/// Default ceiling on reasoning cycles inside a single step
pub const DEFAULT_MAX_STEP_ITERATIONS: usize = 5;

/// Default number of execution events kept per engine
pub const DEFAULT_MAX_HISTORY_SIZE: usize = 1000;

/// Default retention for checkpoints before cleanup removes them
pub const DEFAULT_RUN_RETENTION_DAYS: u32 = 30;

/// Errors that can occur during configuration loading
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a configuration file from disk
    #[error("Failed to read configuration file {path}: {source}")]
    FileRead {
        /// Path to the configuration file that could not be read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse YAML content from a configuration file
    #[error("Invalid YAML syntax in {path}:\n{source}\n\nHint: Check for proper indentation and YAML formatting")]
    YamlParse {
        /// Path to the configuration file with invalid YAML content
        path: PathBuf,
        /// Underlying YAML parsing error
        #[source]
        source: serde_yaml::Error,
    },

    /// Invalid configuration value for a specific field
    #[error("Invalid configuration value for '{field}': {value}\n{hint}")]
    InvalidValue {
        /// Name of the configuration field
        field: String,
        /// The invalid value that was provided
        value: String,
        /// How to fix it
        hint: String,
    },
}

/// Settings for workflow engines and the run registry
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Maximum reasoning/tool cycles the step executor allows per step (default: 5)
    pub max_step_iterations: usize,
    /// Maximum execution events retained per engine (default: 1000)
    pub max_history_size: usize,
    /// Directory for durable checkpoints; in-memory checkpoints when unset
    pub checkpoint_dir: Option<PathBuf>,
    /// Age in days after which `cleanup_old_runs` removes checkpoints (default: 30)
    pub run_retention_days: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_step_iterations: DEFAULT_MAX_STEP_ITERATIONS,
            max_history_size: DEFAULT_MAX_HISTORY_SIZE,
            checkpoint_dir: None,
            run_retention_days: DEFAULT_RUN_RETENTION_DAYS,
        }
    }
}

impl EngineConfig {
    /// Resolve configuration from defaults, environment and the YAML file
    ///
    /// An unreadable or invalid YAML file is logged and skipped rather than
    /// failing, so a host always gets a usable configuration.
    pub fn new() -> Self {
        let mut config = Self::default();
        config.apply_env_vars();

        match YamlConfig::load_or_default() {
            Ok(yaml_config) => {
                yaml_config.apply_to_config(&mut config);
                if let Err(e) = config.validate() {
                    tracing::warn!("Invalid planflow configuration: {}. Using defaults.", e);
                    config = Self::default();
                }
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to load YAML configuration, falling back to env vars and defaults: {}",
                    e
                );
            }
        }

        config
    }

    /// Load defaults plus environment, then the YAML file at `path`, failing on any error
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_vars();
        YamlConfig::load_from_file(path)?.apply_to_config(&mut config);
        config.validate()?;
        Ok(config)
    }

    fn apply_env_vars(&mut self) {
        let loader = EnvLoader::new(ENV_PREFIX);

        self.max_step_iterations =
            loader.load_validated("MAX_STEP_ITERATIONS", self.max_step_iterations, |v| *v > 0);
        self.max_history_size = loader.load_parsed("MAX_HISTORY_SIZE", self.max_history_size);
        if let Some(dir) = loader.load_path("CHECKPOINT_DIR") {
            self.checkpoint_dir = Some(dir);
        }
        self.run_retention_days =
            loader.load_parsed("RUN_RETENTION_DAYS", self.run_retention_days);
    }

    /// Validate the current configuration settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_step_iterations == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_step_iterations".to_string(),
                value: "0".to_string(),
                hint: "max_step_iterations must be at least 1 or no step can ever finish"
                    .to_string(),
            });
        }

        if self.run_retention_days == 0 {
            return Err(ConfigError::InvalidValue {
                field: "run_retention_days".to_string(),
                value: "0".to_string(),
                hint: "run_retention_days must be at least 1 day".to_string(),
            });
        }

        if let Some(ref dir) = self.checkpoint_dir {
            if dir.as_os_str().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "checkpoint_dir".to_string(),
                    value: String::new(),
                    hint: "checkpoint_dir cannot be empty; omit it for in-memory checkpoints"
                        .to_string(),
                });
            }
        }

        Ok(())
    }

    /// Find `planflow.yaml`, searching the current directory then `~/.config/planflow/`
    pub fn find_yaml_config_file() -> Option<PathBuf> {
        let mut search_paths = vec![PathBuf::from(CONFIG_FILENAME)];
        if let Some(home_dir) = dirs::home_dir() {
            search_paths.push(home_dir.join(".config").join("planflow").join(CONFIG_FILENAME));
        }

        for config_path in search_paths {
            if config_path.is_file() {
                tracing::debug!("Found configuration file: {:?}", config_path);
                return Some(config_path);
            }
        }

        tracing::debug!("No planflow.yaml configuration file found");
        None
    }

    /// Example YAML configuration
    pub fn example_yaml_config() -> &'static str {
        r#"# planflow.yaml
# Reasoning cycles allowed per step before it is recorded as failed
max_step_iterations: 5

# Execution events retained per run for debugging
max_history_size: 1000

# Durable checkpoint directory (omit for in-memory checkpoints)
checkpoint_dir: ".planflow/checkpoints"

# Days before old run checkpoints are cleaned up
run_retention_days: 30
"#
    }
}

/// Configuration loaded from a planflow.yaml file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct YamlConfig {
    /// Reasoning cycles allowed per step
    pub max_step_iterations: Option<usize>,
    /// Execution events retained per run
    pub max_history_size: Option<usize>,
    /// Durable checkpoint directory
    pub checkpoint_dir: Option<PathBuf>,
    /// Checkpoint retention in days
    pub run_retention_days: Option<u32>,
}

impl YamlConfig {
    /// Apply YAML values on top of an existing config
    pub fn apply_to_config(&self, config: &mut EngineConfig) {
        if let Some(v) = self.max_step_iterations {
            config.max_step_iterations = v;
        }
        if let Some(v) = self.max_history_size {
            config.max_history_size = v;
        }
        if let Some(ref dir) = self.checkpoint_dir {
            config.checkpoint_dir = Some(dir.clone());
        }
        if let Some(v) = self.run_retention_days {
            config.run_retention_days = v;
        }
    }

    /// Load YAML configuration from a file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        tracing::info!("Loading YAML configuration from: {:?}", path);

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;

        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        serde_yaml::from_str(&content).map_err(|e| ConfigError::YamlParse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Load the discovered YAML file, or an empty config when there is none
    pub fn load_or_default() -> Result<Self, ConfigError> {
        match EngineConfig::find_yaml_config_file() {
            Some(path) => Self::load_from_file(path),
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    fn clear_env() {
        for suffix in [
            "MAX_STEP_ITERATIONS",
            "MAX_HISTORY_SIZE",
            "CHECKPOINT_DIR",
            "RUN_RETENTION_DAYS",
        ] {
            std::env::remove_var(format!("PLANFLOW_{suffix}"));
        }
    }

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.max_step_iterations, 5);
        assert_eq!(config.max_history_size, 1000);
        assert_eq!(config.checkpoint_dir, None);
        assert_eq!(config.run_retention_days, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_config_new_without_env_or_file() {
        clear_env();
        let temp_dir = tempfile::TempDir::new().unwrap();
        let original_dir = std::env::current_dir().unwrap();
        std::env::set_current_dir(temp_dir.path()).unwrap();

        let config = EngineConfig::new();
        assert_eq!(config.max_step_iterations, DEFAULT_MAX_STEP_ITERATIONS);
        assert_eq!(config.checkpoint_dir, None);

        std::env::set_current_dir(original_dir).unwrap();
    }

    #[test]
    #[serial]
    fn test_env_overrides_defaults() {
        clear_env();
        std::env::set_var("PLANFLOW_MAX_STEP_ITERATIONS", "8");
        std::env::set_var("PLANFLOW_CHECKPOINT_DIR", "/tmp/planflow-checkpoints");

        let mut config = EngineConfig::default();
        config.apply_env_vars();
        assert_eq!(config.max_step_iterations, 8);
        assert_eq!(
            config.checkpoint_dir,
            Some(PathBuf::from("/tmp/planflow-checkpoints"))
        );

        // zero is rejected by the validator and keeps the default
        std::env::set_var("PLANFLOW_MAX_STEP_ITERATIONS", "0");
        let mut config = EngineConfig::default();
        config.apply_env_vars();
        assert_eq!(config.max_step_iterations, DEFAULT_MAX_STEP_ITERATIONS);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_yaml_overrides_env() {
        clear_env();
        std::env::set_var("PLANFLOW_MAX_HISTORY_SIZE", "50");

        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join(CONFIG_FILENAME);
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "max_history_size: 10\nmax_step_iterations: 3").unwrap();
        drop(file);

        let config = EngineConfig::load_from_path(&path).unwrap();
        assert_eq!(config.max_history_size, 10);
        assert_eq!(config.max_step_iterations, 3);

        clear_env();
    }

    #[test]
    fn test_yaml_rejects_unknown_fields() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join(CONFIG_FILENAME);
        std::fs::write(&path, "max_step_iteration: 3\n").unwrap();

        let result = YamlConfig::load_from_file(&path);
        assert!(matches!(result, Err(ConfigError::YamlParse { .. })));
    }

    #[test]
    fn test_empty_yaml_file_is_default() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join(CONFIG_FILENAME);
        std::fs::write(&path, "\n").unwrap();

        let yaml = YamlConfig::load_from_file(&path).unwrap();
        assert!(yaml.max_step_iterations.is_none());
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let result = YamlConfig::load_from_file("/nonexistent/planflow.yaml");
        assert!(matches!(result, Err(ConfigError::FileRead { .. })));
    }

    #[test]
    fn test_validate_rejects_zero_iterations() {
        let config = EngineConfig {
            max_step_iterations: 0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_step_iterations"));
    }

    #[test]
    fn test_example_yaml_parses() {
        let yaml: YamlConfig = serde_yaml::from_str(EngineConfig::example_yaml_config()).unwrap();
        let mut config = EngineConfig::default();
        yaml.apply_to_config(&mut config);
        assert_eq!(
            config.checkpoint_dir,
            Some(PathBuf::from(".planflow/checkpoints"))
        );
        assert!(config.validate().is_ok());
    }
}
