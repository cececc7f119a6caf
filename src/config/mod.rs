use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

const DEFAULT_MODEL: &str = "claude-3-opus-20240229";
const DEFAULT_MAX_TOKENS: u32 = 1000;
const DEFAULT_CONFIG_PATH: &str = "config/console.toml";
const DEFAULT_SERVER_COMMAND: &str = "npx";

pub const REASONING_KEY_VAR: &str = "ANTHROPIC_API_KEY";
pub const CAPABILITY_KEY_VAR: &str = "TAVILY_API_KEY";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub model: String,
    pub max_tokens: u32,
    pub server: ServerConfig,
}

/// How to launch the MCP server subprocess.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub workdir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            command: DEFAULT_SERVER_COMMAND.to_string(),
            args: vec!["-y".to_string(), "tavily-mcp".to_string()],
            env: HashMap::new(),
            workdir: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config from {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config from {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to expand server command '{value}': {message}")]
    Expand { value: String, message: String },
    #[error("required environment variable {0} is not set")]
    MissingCredential(&'static str),
}

#[derive(Debug, Deserialize, Default)]
struct RawConfig {
    model: Option<String>,
    max_tokens: Option<u32>,
    server: Option<RawServer>,
}

#[derive(Debug, Deserialize, Default)]
struct RawServer {
    command: Option<String>,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: HashMap<String, String>,
    workdir: Option<PathBuf>,
}

impl AppConfig {
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return read_config(path);
        }
        let default_path = Path::new(DEFAULT_CONFIG_PATH);
        match read_config(default_path) {
            Ok(config) => Ok(config),
            Err(ConfigError::Io { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                info!("Configuration file not found; using defaults");
                Ok(Self::default())
            }
            Err(other) => Err(other),
        }
    }

    pub fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            server: ServerConfig::default(),
        }
    }
}

fn read_config(path: &Path) -> Result<AppConfig, ConfigError> {
    debug!(path = %path.display(), "Reading console configuration file");
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let parsed: RawConfig = toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    let server = match parsed.server {
        Some(raw) => ServerConfig {
            command: expand_command(
                raw.command
                    .unwrap_or_else(|| DEFAULT_SERVER_COMMAND.to_string()),
            )?,
            args: raw.args,
            env: raw.env,
            workdir: raw.workdir,
        },
        None => ServerConfig::default(),
    };

    Ok(AppConfig {
        model: parsed.model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        max_tokens: parsed.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        server,
    })
}

/// Server commands may be given as `~/bin/server` or `$HOME/...`; expand
/// before handing them to the process spawner.
fn expand_command(value: String) -> Result<String, ConfigError> {
    match shellexpand::full(&value) {
        Ok(expanded) => Ok(expanded.into_owned()),
        Err(err) => Err(ConfigError::Expand {
            value,
            message: err.to_string(),
        }),
    }
}

/// The two credentials a session cannot start without. Their absence is a
/// fatal configuration error, never retried.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub reasoning_api_key: String,
    pub capability_api_key: String,
}

impl Credentials {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |name: &'static str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .ok_or(ConfigError::MissingCredential(name))
        };
        Ok(Self {
            reasoning_api_key: required(REASONING_KEY_VAR)?,
            capability_api_key: required(CAPABILITY_KEY_VAR)?,
        })
    }
}
