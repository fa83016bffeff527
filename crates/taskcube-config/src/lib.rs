//! Configuration loading.
//!
//! One YAML file (`--config`, default `./config.yaml`) configures the HTTP
//! server, the record store backend, the controller's node pool and the log
//! output.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskCubeConfig {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub controller: ControllerConfig,
    pub log: LogConfig,
}

impl Default for TaskCubeConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            store: StoreConfig::default(),
            controller: ControllerConfig::default(),
            log: LogConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    #[serde(alias = "externalAddr")]
    pub external_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            external_addr: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Persistent backends plug in behind the RecordStore seam; `memory`
    /// is the built-in reference backend.
    pub backend: String,
    #[serde(alias = "connectionUrl")]
    pub connection_url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: "memory".to_string(),
            connection_url: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    #[serde(alias = "nodePool")]
    pub node_pool: Vec<String>,
    #[serde(alias = "agentImage")]
    pub agent_image: String,
    #[serde(alias = "apiVersion")]
    pub api_version: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            node_pool: Vec::new(),
            agent_image: "taskcube/taskcube-agent:latest".to_string(),
            api_version: "1.41".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    /// `text` or `json`.
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

/// Load and validate a configuration file.
pub fn load_config(path: &Path) -> Result<TaskCubeConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config: TaskCubeConfig = serde_yaml::from_str(&content)?;
    validate_config(&config)?;
    Ok(config)
}

fn validate_config(config: &TaskCubeConfig) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(ConfigError::Invalid("server.port must not be 0".to_string()));
    }

    match config.store.backend.as_str() {
        "memory" | "in_memory" => {}
        other => {
            return Err(ConfigError::Invalid(format!(
                "store.backend '{other}' is not supported"
            )));
        }
    }

    for host in &config.controller.node_pool {
        if host.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "controller.node_pool entries must not be empty".to_string(),
            ));
        }
    }
    if config.controller.agent_image.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "controller.agent_image must not be empty".to_string(),
        ));
    }
    if config.controller.api_version.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "controller.api_version must not be empty".to_string(),
        ));
    }

    match config.log.format.as_str() {
        "text" | "json" => {}
        other => {
            return Err(ConfigError::Invalid(format!(
                "log.format '{other}' is not supported (text|json)"
            )));
        }
    }

    Ok(())
}
