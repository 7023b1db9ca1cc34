//! Engine configuration.
//!
//! Loaded from YAML files and environment variables into a single
//! [`EngineConfig`].

mod cache;
mod storage;

pub use cache::{AgentCacheConfig, DEFAULT_AGENT_CACHE_CAPACITY};
pub use storage::{StorageConfig, StorageType};

use serde::Deserialize;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "chronik.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "CHRONIK_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "CHRONIK";

/// Main engine configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Storage backend selection.
    pub storage: StorageConfig,
    /// Agent id cache sizing.
    pub agent_cache: AgentCacheConfig,
}

impl EngineConfig {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `chronik.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CHRONIK_CONFIG` environment variable (if set)
    /// 4. Environment variables prefixed `CHRONIK__`, nested with `__`
    ///    (e.g. `CHRONIK__AGENT_CACHE__CAPACITY=50`)
    pub fn load(path: Option<&str>) -> Result<Self, ::config::ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Create config for testing.
    pub fn for_test() -> Self {
        Self::default()
    }
}
