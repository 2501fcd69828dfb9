use anyhow::Context;
use fileflow_runtime::RuntimeConfig;
use fileflow_scheduler::SchedulerConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Everything the host process reads from its TOML file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub server: HttpConfig,
    pub scheduler: SchedulerConfig,
    pub runtime: RuntimeConfig,
    pub internal_node: InternalNodeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind_address: String,
    /// Status events buffered per subscriber before slow ones lag
    pub event_buffer_size: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:19200".to_string(),
            event_buffer_size: 1000,
        }
    }
}

/// Node that runs flows inside the host process
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InternalNodeConfig {
    pub enabled: bool,
    pub name: String,
    pub max_runners: usize,
    /// Scratch root for runs; the runtime temp path when unset
    pub temp_path: Option<String>,
}

impl Default for InternalNodeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            name: "internal".to_string(),
            max_runners: 1,
            temp_path: None,
        }
    }
}

impl ServerConfig {
    /// Load from `path`, falling back to `FILEFLOW_CONFIG`, then defaults.
    /// `BIND_ADDRESS` overrides the configured bind address.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os("FILEFLOW_CONFIG").map(PathBuf::from));
        let mut config = match path {
            Some(path) => Self::load_from(&path)?,
            None => Self::default(),
        };
        if let Ok(bind) = std::env::var("BIND_ADDRESS") {
            config.server.bind_address = bind;
        }
        Ok(config)
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        Ok(config)
    }
}
