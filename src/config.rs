//! Runtime configuration.
//!
//! Values are resolved in order of precedence:
//! 1. environment variables (`DATA_DIR`, `MODELS_DIR`, `HOST`, `PORT`)
//! 2. `{data_dir}/config.json`
//! 3. built-in defaults

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CONFIG_FILE: &str = "config.json";
const APP_DIR_NAME: &str = "ev-trip-logbook";
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 3001;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error reading {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid config file {path:?}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid port '{0}'")]
    InvalidPort(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub models_dir: PathBuf,
    pub host: String,
    pub port: u16,
}

/// Optional overrides stored next to the data
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigFile {
    models_dir: Option<PathBuf>,
    host: Option<String>,
    port: Option<u16>,
}

impl AppConfig {
    /// Resolve the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::resolve(|key| std::env::var(key).ok())
    }

    /// Resolve the configuration, reading variables through `var`.
    pub fn resolve<F>(var: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let data_dir = var("DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);
        let file = load_config_file(&data_dir)?;

        let models_dir = var("MODELS_DIR")
            .map(PathBuf::from)
            .or(file.models_dir)
            .unwrap_or_else(|| data_dir.join("models"));

        let host = var("HOST")
            .or(file.host)
            .unwrap_or_else(|| DEFAULT_HOST.to_string());

        let port = match var("PORT") {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidPort(raw.clone()))?,
            None => file.port.unwrap_or(DEFAULT_PORT),
        };

        Ok(Self {
            data_dir,
            models_dir,
            host,
            port,
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join(APP_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from("data"))
}

fn load_config_file(data_dir: &Path) -> Result<ConfigFile, ConfigError> {
    let path = data_dir.join(CONFIG_FILE);
    let contents = match fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(ConfigFile::default()),
        Err(source) => return Err(ConfigError::Io { path, source }),
    };
    log::debug!("Loading config overrides from {:?}", path);
    serde_json::from_str(&contents).map_err(|source| ConfigError::Json { path, source })
}
