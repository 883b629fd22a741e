//! Domain environment handed to every collaborator

use crate::config::EnvironmentConfig;
use crate::error::{PolicySimError, Result};
use serde_json::Value;

/// The environment under evaluation: a domain name and the agent prompt
#[derive(Debug, Clone)]
pub struct Environment {
    /// Domain name
    pub name: String,

    /// Agent system prompt
    pub prompt: String,

    /// Free-form settings from configuration
    pub params: Value,
}

impl Environment {
    /// Create an environment from literal values
    pub fn new(name: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prompt: prompt.into(),
            params: Value::Null,
        }
    }

    /// Build the environment from configuration, reading the prompt file if
    /// one is configured. An inline prompt takes precedence.
    pub fn from_config(config: &EnvironmentConfig) -> Result<Self> {
        let prompt = match (&config.prompt, &config.prompt_path) {
            (Some(prompt), _) => prompt.clone(),
            (None, Some(path)) => std::fs::read_to_string(path).map_err(|e| {
                PolicySimError::Configuration(format!(
                    "Failed to read prompt file {}: {}",
                    path.display(),
                    e
                ))
            })?,
            (None, None) => {
                return Err(PolicySimError::Configuration(format!(
                    "Environment '{}' has no prompt",
                    config.name
                )));
            }
        };

        Ok(Self {
            name: config.name.clone(),
            prompt,
            params: config.params.clone(),
        })
    }
}
