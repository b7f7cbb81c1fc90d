pub mod error;

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use monet_core::config::{BackendConfig, CatalogConfig, DirectoryHashMode, PostgresConfig};
use tracing::{debug, info};

use crate::util::{non_empty, parse_bool};
use error::ConfigLoadError;

pub const CONFIG_PATH_VAR: &str = "MONET_CONFIG_PATH";
pub const CONFIG_JSON_VAR: &str = "MONET_CONFIG_JSON";
pub const DATABASE_URL_VAR: &str = "DATABASE_URL";
pub const SYNC_PARALLELISM_VAR: &str = "MONET_SYNC_PARALLELISM";
pub const SYNC_INCLUDE_HIDDEN_VAR: &str = "MONET_SYNC_INCLUDE_HIDDEN";
pub const DIRECTORY_HASH_VAR: &str = "MONET_DIRECTORY_HASH";
pub const DB_MAX_CONNECTIONS_VAR: &str = "DB_MAX_CONNECTIONS";
pub const DB_MIN_CONNECTIONS_VAR: &str = "DB_MIN_CONNECTIONS";

const DEFAULT_FILES: &[&str] = &["monet.toml", "monet.json", "config/monet.toml"];

/// Where the base configuration came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Path given explicitly by the caller (e.g. `--config`).
    Explicit(PathBuf),
    /// `$MONET_CONFIG_PATH`.
    EnvPath(PathBuf),
    /// `$MONET_CONFIG_JSON`.
    EnvInline,
    /// First default file found in the search directory.
    File(PathBuf),
    Default,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigSource::Explicit(path) => write!(f, "{}", path.display()),
            ConfigSource::EnvPath(path) => write!(f, "${CONFIG_PATH_VAR} ({})", path.display()),
            ConfigSource::EnvInline => write!(f, "${CONFIG_JSON_VAR}"),
            ConfigSource::File(path) => write!(f, "{}", path.display()),
            ConfigSource::Default => f.write_str("built-in defaults"),
        }
    }
}

/// Result of a configuration load.
#[derive(Debug, Clone)]
pub struct ConfigLoad {
    pub config: CatalogConfig,
    pub source: ConfigSource,
    /// Names of environment variables that overrode file values.
    pub overrides: Vec<&'static str>,
}

/// Layered loader: explicit path, then `$MONET_CONFIG_PATH`, then
/// `$MONET_CONFIG_JSON`, then a default file, then built-in defaults.
/// Environment overrides are applied on top of whichever base won.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
    env_file: Option<PathBuf>,
    search_dir: PathBuf,
    load_dotenv: bool,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            config_path: None,
            env_file: None,
            search_dir: PathBuf::from("."),
            load_dotenv: true,
        }
    }

    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Load this file instead of searching for `.env`.
    pub fn with_env_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.env_file = Some(path.into());
        self
    }

    /// Directory searched for default config files.
    pub fn with_search_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.search_dir = dir.into();
        self
    }

    pub fn without_dotenv(mut self) -> Self {
        self.load_dotenv = false;
        self
    }

    /// Load using the process environment, after applying `.env`.
    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        if self.load_dotenv {
            self.apply_env_file()?;
        }
        self.load_with(|name| std::env::var(name).ok())
    }

    /// Load using `env` to resolve variables.
    pub fn load_with<F>(&self, env: F) -> Result<ConfigLoad, ConfigLoadError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let (mut config, source) = self.load_base(&env)?;
        let overrides = apply_env_overrides(&mut config, &env)?;
        info!(source = %source, overrides = ?overrides, "catalog configuration loaded");
        Ok(ConfigLoad {
            config,
            source,
            overrides,
        })
    }

    fn apply_env_file(&self) -> Result<(), ConfigLoadError> {
        let loaded = match &self.env_file {
            Some(path) => dotenvy::from_path(path).map(|_| path.clone()),
            None => dotenvy::dotenv(),
        };
        match loaded {
            Ok(path) => {
                debug!(path = %path.display(), "loaded environment file");
                Ok(())
            }
            Err(e) if e.not_found() && self.env_file.is_none() => Ok(()),
            Err(e) => Err(ConfigLoadError::EnvFile(e)),
        }
    }

    fn load_base<F>(&self, env: &F) -> Result<(CatalogConfig, ConfigSource), ConfigLoadError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = &self.config_path {
            let config = load_from_file(path)?;
            return Ok((config, ConfigSource::Explicit(path.clone())));
        }

        if let Some(path) = non_empty(env(CONFIG_PATH_VAR)) {
            let path = PathBuf::from(path);
            let config = load_from_file(&path)?;
            return Ok((config, ConfigSource::EnvPath(path)));
        }

        if let Some(raw) = non_empty(env(CONFIG_JSON_VAR)) {
            let config = parse_json(&raw, CONFIG_JSON_VAR)?;
            return Ok((config, ConfigSource::EnvInline));
        }

        if let Some(path) = self.find_default_file() {
            let config = load_from_file(&path)?;
            return Ok((config, ConfigSource::File(path)));
        }

        Ok((CatalogConfig::default(), ConfigSource::Default))
    }

    fn find_default_file(&self) -> Option<PathBuf> {
        DEFAULT_FILES
            .iter()
            .map(|candidate| self.search_dir.join(candidate))
            .find(|path| path.is_file())
    }
}

pub fn load_from_file(path: &Path) -> Result<CatalogConfig, ConfigLoadError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigLoadError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let origin = path.display().to_string();

    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => parse_json(&contents, &origin),
        Some("toml") | Some("tml") => {
            toml::from_str(&contents).map_err(|err| ConfigLoadError::Parse {
                origin,
                message: err.to_string(),
            })
        }
        _ => parse_from_str(&contents, &origin),
    }
}

/// Try TOML first, then JSON.
pub fn parse_from_str(contents: &str, origin: &str) -> Result<CatalogConfig, ConfigLoadError> {
    toml::from_str(contents).or_else(|toml_err| {
        serde_json::from_str(contents).map_err(|json_err| ConfigLoadError::Parse {
            origin: origin.to_string(),
            message: format!("toml error: {toml_err}; json error: {json_err}"),
        })
    })
}

fn parse_json(raw: &str, origin: &str) -> Result<CatalogConfig, ConfigLoadError> {
    serde_json::from_str(raw).map_err(|err| ConfigLoadError::Parse {
        origin: origin.to_string(),
        message: err.to_string(),
    })
}

fn apply_env_overrides<F>(
    config: &mut CatalogConfig,
    env: &F,
) -> Result<Vec<&'static str>, ConfigLoadError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut applied = Vec::new();

    if let Some(url) = non_empty(env(DATABASE_URL_VAR)) {
        match &mut config.backend {
            BackendConfig::Postgres(pg) => pg.url = url,
            BackendConfig::Memory => {
                config.backend = BackendConfig::Postgres(PostgresConfig {
                    url,
                    ..PostgresConfig::default()
                });
            }
        }
        applied.push(DATABASE_URL_VAR);
    }

    if let BackendConfig::Postgres(pg) = &mut config.backend {
        if let Some(max) = parse_number::<u32, _>(env, DB_MAX_CONNECTIONS_VAR)? {
            pg.max_connections = max;
            applied.push(DB_MAX_CONNECTIONS_VAR);
        }
        if let Some(min) = parse_number::<u32, _>(env, DB_MIN_CONNECTIONS_VAR)? {
            pg.min_connections = min;
            applied.push(DB_MIN_CONNECTIONS_VAR);
        }
    }

    if let Some(parallelism) = parse_number::<usize, _>(env, SYNC_PARALLELISM_VAR)? {
        if parallelism == 0 {
            return Err(ConfigLoadError::InvalidEnv {
                name: SYNC_PARALLELISM_VAR,
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }
        config.sync.max_parallel_registrations = parallelism;
        applied.push(SYNC_PARALLELISM_VAR);
    }

    if let Some(raw) = non_empty(env(SYNC_INCLUDE_HIDDEN_VAR)) {
        config.sync.include_hidden =
            parse_bool(&raw).ok_or_else(|| ConfigLoadError::InvalidEnv {
                name: SYNC_INCLUDE_HIDDEN_VAR,
                value: raw.clone(),
                reason: "expected a boolean".into(),
            })?;
        applied.push(SYNC_INCLUDE_HIDDEN_VAR);
    }

    if let Some(raw) = non_empty(env(DIRECTORY_HASH_VAR)) {
        config.directory_hash = match raw.to_ascii_lowercase().as_str() {
            "raw" => DirectoryHashMode::Raw,
            "sorted" => DirectoryHashMode::Sorted,
            _ => {
                return Err(ConfigLoadError::InvalidEnv {
                    name: DIRECTORY_HASH_VAR,
                    value: raw,
                    reason: "expected `raw` or `sorted`".into(),
                });
            }
        };
        applied.push(DIRECTORY_HASH_VAR);
    }

    Ok(applied)
}

fn parse_number<T, F>(env: &F, name: &'static str) -> Result<Option<T>, ConfigLoadError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = non_empty(env(name)) else {
        return Ok(None);
    };
    raw.parse::<T>()
        .map(Some)
        .map_err(|err| ConfigLoadError::InvalidEnv {
            name,
            value: raw.clone(),
            reason: err.to_string(),
        })
}
