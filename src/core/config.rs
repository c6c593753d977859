use crate::core::persona::Persona;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Gemini's OpenAI-compatible endpoint; any server speaking the same
/// contract can be pointed at via config or environment.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/openai";
pub const DEFAULT_MODEL: &str = "gemini-3.1-pro-preview";

pub const API_KEY_ENV: &str = "LABCHAT_API_KEY";
pub const API_KEY_FALLBACK_ENV: &str = "GEMINI_API_KEY";
pub const BASE_URL_ENV: &str = "LABCHAT_BASE_URL";

/// Errors that can occur when loading configuration from disk.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to parse the configuration file as valid TOML.
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "Failed to read config at {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(
                    f,
                    "Failed to parse config at {}: {}",
                    path.display(),
                    source
                )
            }
        }
    }
}

impl StdError for ConfigError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct Config {
    /// Persona selected at startup; first built-in when unset.
    pub default_persona: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
    /// API key fallback when no environment variable is set.
    pub api_key: Option<String>,
    /// Request the model's additional "thought" channel by default.
    pub deep_reasoning: Option<bool>,
    /// Allow the service to consult external knowledge retrieval.
    pub web_retrieval: Option<bool>,
    /// User-defined personas; entries sharing a built-in id shadow it.
    #[serde(default)]
    pub personas: Vec<Persona>,
}

impl Config {
    pub fn load() -> Result<Config, Box<dyn StdError>> {
        Self::load_from_path(&Self::config_path())
    }

    pub fn load_from_path(config_path: &Path) -> Result<Config, Box<dyn StdError>> {
        if config_path.exists() {
            let contents = fs::read_to_string(config_path).map_err(|source| ConfigError::Read {
                path: config_path.to_path_buf(),
                source,
            })?;
            let config: Config =
                toml::from_str(&contents).map_err(|source| ConfigError::Parse {
                    path: config_path.to_path_buf(),
                    source,
                })?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    pub fn save(&self) -> Result<(), Box<dyn StdError>> {
        self.save_to_path(&Self::config_path())
    }

    pub fn save_to_path(&self, config_path: &Path) -> Result<(), Box<dyn StdError>> {
        let parent = config_path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty());

        if let Some(dir) = parent {
            fs::create_dir_all(dir)?;
        }

        let contents = toml::to_string_pretty(self)?;
        // Write through a temp file in the same directory so the rename is
        // atomic and a crash never leaves a half-written config.
        let mut temp_file = match parent {
            Some(dir) => NamedTempFile::new_in(dir)?,
            None => NamedTempFile::new()?,
        };
        temp_file.write_all(contents.as_bytes())?;
        temp_file.as_file_mut().sync_all()?;
        temp_file
            .persist(config_path)
            .map_err(|err| -> Box<dyn StdError> { Box::new(err) })?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        let proj_dirs = ProjectDirs::from("org", "permacommons", "labchat")
            .expect("Failed to determine config directory");
        proj_dirs.config_dir().join("config.toml")
    }

    pub fn model(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }

    /// Base URL resolution order: environment, config file, built-in default.
    pub fn resolve_base_url(&self) -> String {
        resolve_base_url_from(std::env::var(BASE_URL_ENV).ok(), self)
    }

    /// API key resolution order: `LABCHAT_API_KEY`, `GEMINI_API_KEY`,
    /// config file. Missing everywhere is an error the caller surfaces.
    pub fn resolve_api_key(&self) -> Result<String, Box<dyn StdError>> {
        let env_key = std::env::var(API_KEY_ENV)
            .ok()
            .or_else(|| std::env::var(API_KEY_FALLBACK_ENV).ok());
        resolve_api_key_from(env_key, self)
    }
}

fn resolve_base_url_from(env_value: Option<String>, config: &Config) -> String {
    env_value
        .filter(|v| !v.trim().is_empty())
        .or_else(|| config.base_url.clone())
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
}

fn resolve_api_key_from(
    env_value: Option<String>,
    config: &Config,
) -> Result<String, Box<dyn StdError>> {
    env_value
        .filter(|v| !v.trim().is_empty())
        .or_else(|| config.api_key.clone())
        .ok_or_else(|| {
            format!(
                "No API key configured. Set {API_KEY_ENV} (or {API_KEY_FALLBACK_ENV}), \
                 or add api_key to {}.",
                Config::config_path().display()
            )
            .into()
        })
}
