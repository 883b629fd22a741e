//! Configuration types for policysim runs

use crate::dataset::DatasetSelector;
use crate::error::{PolicySimError, Result};
use figment::Figment;
use figment::providers::{Env, Format, Json, Toml, Yaml};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "policysim.toml";

/// Environment variable pointing at an alternative configuration file
pub const CONFIG_PATH_ENV: &str = "POLICYSIM_CONFIG_PATH";

/// Main configuration for a simulation run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatorConfig {
    /// Environment (domain) description
    pub environment: EnvironmentConfig,

    /// Policy catalogue generation settings
    #[serde(default)]
    pub catalogue: CatalogueConfig,

    /// Dataset selection and synthesis settings
    #[serde(default)]
    pub dataset: DatasetConfig,

    /// Dialogue loop settings
    pub dialog: DialogConfig,
}

/// Environment configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    /// Domain name, e.g. "retail"
    pub name: String,

    /// Inline agent prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,

    /// Path to a file holding the agent prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_path: Option<PathBuf>,

    /// Free-form settings handed to collaborators
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

/// Catalogue builder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogueConfig {
    /// How long to wait for another process building the same catalogue
    #[serde(with = "humantime_serde", default = "default_lock_timeout")]
    pub lock_timeout: Duration,

    /// Generator-specific settings. Changing these after the first build has
    /// no effect until the cached catalogue is deleted.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

fn default_lock_timeout() -> Duration {
    Duration::from_secs(600)
}

impl Default for CatalogueConfig {
    fn default() -> Self {
        Self {
            lock_timeout: default_lock_timeout(),
            params: Value::Null,
        }
    }
}

/// Dataset configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// Dataset to use: an explicit name or "latest". Absent means latest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,

    /// Prefix for freshly reserved dataset names
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,

    /// Number of scenarios to request when synthesizing a new dataset
    #[serde(default = "default_num_samples")]
    pub num_samples: usize,

    /// Generator-specific settings
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

fn default_name_prefix() -> String {
    "dataset".to_string()
}

fn default_num_samples() -> usize {
    20
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            selector: None,
            name_prefix: default_name_prefix(),
            num_samples: default_num_samples(),
            params: Value::Null,
        }
    }
}

impl DatasetConfig {
    /// Parsed dataset selector
    pub fn selector(&self) -> DatasetSelector {
        DatasetSelector::parse(self.selector.as_deref())
    }
}

/// Dialogue loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogConfig {
    /// Number of scenarios handed to the dialogue driver at once
    pub batch_size: usize,

    /// Cumulative cost ceiling checked before each batch
    pub cost_limit: f64,

    /// Skip the trailing records that do not fill a whole batch
    #[serde(default = "default_true")]
    pub drop_remainder: bool,

    /// Driver-specific settings
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

fn default_true() -> bool {
    true
}

impl DialogConfig {
    /// Create a dialogue configuration with the default remainder policy
    pub fn new(batch_size: usize, cost_limit: f64) -> Self {
        Self {
            batch_size,
            cost_limit,
            drop_remainder: true,
            params: Value::Null,
        }
    }
}

impl SimulatorConfig {
    /// Load configuration from files and environment variables.
    ///
    /// Loads in this order:
    /// 1. `policysim.toml` in the working directory
    /// 2. The file named by `POLICYSIM_CONFIG_PATH` (TOML, YAML or JSON)
    /// 3. `POLICYSIM_` environment variables, nested keys split on `__`
    ///
    /// # Errors
    ///
    /// Returns an error if a file is malformed, required keys are missing, or
    /// validation fails.
    pub fn load() -> Result<Self> {
        let mut figment = Figment::new().merge(Toml::file(DEFAULT_CONFIG_FILE));

        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            figment = merge_file(figment, Path::new(&path));
        }

        figment = figment.merge(
            Env::prefixed("POLICYSIM_")
                .ignore(&["CONFIG_PATH"])
                .split("__"),
        );

        Self::extract(figment)
    }

    /// Load configuration from a specific file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file does not exist, cannot be parsed, or
    /// fails validation.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(PolicySimError::Configuration(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }
        Self::extract(merge_file(Figment::new(), path))
    }

    fn extract(figment: Figment) -> Result<Self> {
        let config: SimulatorConfig = figment.extract().map_err(|e| {
            PolicySimError::Configuration(format!("Failed to load configuration: {}", e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.dialog.batch_size == 0 {
            return Err(PolicySimError::Configuration(
                "dialog.batch_size must be a positive integer".to_string(),
            ));
        }

        if !self.dialog.cost_limit.is_finite() || self.dialog.cost_limit < 0.0 {
            return Err(PolicySimError::Configuration(format!(
                "dialog.cost_limit must be a non-negative number, got {}",
                self.dialog.cost_limit
            )));
        }

        if self
            .dataset
            .selector
            .as_deref()
            .is_some_and(|s| s.trim().is_empty())
        {
            return Err(PolicySimError::Configuration(
                "dataset.selector must not be empty".to_string(),
            ));
        }

        if self.environment.prompt.is_none() && self.environment.prompt_path.is_none() {
            return Err(PolicySimError::Configuration(
                "environment needs either `prompt` or `prompt_path`".to_string(),
            ));
        }

        Ok(())
    }

    /// Render the effective configuration as YAML for the experiment snapshot
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

fn merge_file(figment: Figment, path: &Path) -> Figment {
    match path.extension().and_then(|e| e.to_str()) {
        Some("yaml") | Some("yml") => figment.merge(Yaml::file(path)),
        Some("json") => figment.merge(Json::file(path)),
        _ => figment.merge(Toml::file(path)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    const BASIC_TOML: &str = r#"
        [environment]
        name = "retail"
        prompt = "You are a retail support agent."

        [dialog]
        batch_size = 2
        cost_limit = 10.0
    "#;

    #[test]
    fn test_load_from_default_file() {
        Jail::expect_with(|jail| {
            jail.create_file(DEFAULT_CONFIG_FILE, BASIC_TOML)?;

            let config = SimulatorConfig::load().map_err(|e| e.to_string())?;
            assert_eq!(config.environment.name, "retail");
            assert_eq!(config.dialog.batch_size, 2);
            assert_eq!(config.dialog.cost_limit, 10.0);
            assert!(config.dialog.drop_remainder);
            assert_eq!(config.dataset.selector(), DatasetSelector::Absent);
            assert_eq!(config.catalogue.lock_timeout, Duration::from_secs(600));
            Ok(())
        });
    }

    #[test]
    fn test_env_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file(DEFAULT_CONFIG_FILE, BASIC_TOML)?;
            jail.set_env("POLICYSIM_DIALOG__COST_LIMIT", "2.5");
            jail.set_env("POLICYSIM_DATASET__SELECTOR", "retail__01_01_2024_10_00_00");

            let config = SimulatorConfig::load().map_err(|e| e.to_string())?;
            assert_eq!(config.dialog.cost_limit, 2.5);
            assert_eq!(
                config.dataset.selector(),
                DatasetSelector::Named("retail__01_01_2024_10_00_00".to_string())
            );
            Ok(())
        });
    }

    #[test]
    fn test_yaml_file_via_env_path() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "sim.yaml",
                "environment:\n  name: airline\n  prompt_path: prompt.md\n\
                 dialog:\n  batch_size: 3\n  cost_limit: 1.0\n  drop_remainder: false\n\
                 catalogue:\n  lock_timeout: 30s\n",
            )?;
            jail.set_env(CONFIG_PATH_ENV, "sim.yaml");

            let config = SimulatorConfig::load().map_err(|e| e.to_string())?;
            assert_eq!(config.environment.name, "airline");
            assert!(!config.dialog.drop_remainder);
            assert_eq!(config.catalogue.lock_timeout, Duration::from_secs(30));
            Ok(())
        });
    }

    #[test]
    fn test_missing_required_dialog_keys() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "partial.toml",
                "[environment]\nname = \"retail\"\nprompt = \"p\"\n[dialog]\nbatch_size = 2\n",
            )?;

            let err = SimulatorConfig::from_file("partial.toml").unwrap_err();
            assert!(matches!(err, PolicySimError::Configuration(_)));
            Ok(())
        });
    }

    #[test]
    fn test_from_file_missing() {
        let err = SimulatorConfig::from_file("/definitely/not/here.toml").unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    fn valid() -> SimulatorConfig {
        SimulatorConfig {
            environment: EnvironmentConfig {
                name: "retail".to_string(),
                prompt: Some("prompt".to_string()),
                prompt_path: None,
                params: Value::Null,
            },
            catalogue: CatalogueConfig::default(),
            dataset: DatasetConfig::default(),
            dialog: DialogConfig::new(2, 10.0),
        }
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(valid().validate().is_ok());

        let mut config = valid();
        config.dialog.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.dialog.cost_limit = -1.0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.dialog.cost_limit = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.dataset.selector = Some("  ".to_string());
        assert!(config.validate().is_err());

        let mut config = valid();
        config.environment.prompt = None;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_yaml_snapshot_round_trips_limits() {
        let yaml = valid().to_yaml().unwrap();
        assert!(yaml.contains("batch_size: 2"));
        assert!(yaml.contains("cost_limit: 10.0"));
        assert!(!yaml.contains("params"));
    }
}
