//! Repository configuration.
//!
//! Values come from an optional TOML file, then `DATAPILE_*` environment
//! variables, falling back to hard-coded defaults for anything left unset.
//!
//! ```toml
//! owner = "peer"
//! storage_url = "file:///var/lib/datapile"
//! fetch_timeout_secs = 30
//! max_body_bytes = 104857600
//! pin_on_create = true
//! ```

use std::fmt;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use url::Url;

pub const DEFAULT_OWNER: &str = "peer";
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;

const ENV_PREFIX: &str = "DATAPILE_";

/// The file form. Every field is optional so a file only needs the values it
/// overrides.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub owner: Option<String>,
    pub storage_url: Option<String>,
    pub fetch_timeout_secs: Option<u64>,
    pub max_body_bytes: Option<u64>,
    pub pin_on_create: Option<bool>,
}

/// Resolved configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Owner of datasets created through this repository.
    pub owner: String,
    /// `object_store` URL of the backing store, in-memory when unset.
    pub storage_url: Option<String>,
    pub fetch_timeout_secs: u64,
    /// Bodies larger than this are rejected. Unlimited when unset.
    pub max_body_bytes: Option<u64>,
    pub pin_on_create: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            owner: DEFAULT_OWNER.to_owned(),
            storage_url: None,
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
            max_body_bytes: None,
            pin_on_create: false,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io { path: PathBuf, source: std::io::Error },
    Parse(toml::de::Error),
    InvalidEnv { var: String, value: String },
    InvalidStorageUrl(url::ParseError),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(f, "reading config file {}: {source}", path.display())
            }
            ConfigError::Parse(e) => write!(f, "parsing config: {e}"),
            ConfigError::InvalidEnv { var, value } => {
                write!(f, "invalid value {value:?} for {var}")
            }
            ConfigError::InvalidStorageUrl(e) => write!(f, "invalid storage url: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            ConfigError::Parse(e) => Some(e),
            ConfigError::InvalidEnv { .. } => None,
            ConfigError::InvalidStorageUrl(e) => Some(e),
        }
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(value: toml::de::Error) -> Self {
        ConfigError::Parse(value)
    }
}

impl Config {
    /// Reads a TOML file and applies environment overrides on top of it.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        debug!(path = %path.display(), "loaded config file");
        Self::from_toml_str(&text)?.apply_env()
    }

    /// Parses a TOML document without consulting the environment.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let file: FileConfig = toml::from_str(text)?;
        Ok(Self::default().merge(file))
    }

    fn merge(mut self, file: FileConfig) -> Self {
        if let Some(owner) = file.owner {
            self.owner = owner;
        }
        if file.storage_url.is_some() {
            self.storage_url = file.storage_url;
        }
        if let Some(secs) = file.fetch_timeout_secs {
            self.fetch_timeout_secs = secs;
        }
        if file.max_body_bytes.is_some() {
            self.max_body_bytes = file.max_body_bytes;
        }
        if let Some(pin) = file.pin_on_create {
            self.pin_on_create = pin;
        }
        self
    }

    pub fn apply_env(self) -> Result<Self, ConfigError> {
        self.apply_env_from(|var| std::env::var(var).ok())
    }

    /// Applies `DATAPILE_*` overrides looked up through `lookup`.
    pub fn apply_env_from(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let get = |key: &str| {
            let var = format!("{ENV_PREFIX}{key}");
            lookup(&var).map(|value| (var, value))
        };
        if let Some((_, owner)) = get("OWNER") {
            self.owner = owner;
        }
        if let Some((_, url)) = get("STORAGE_URL") {
            self.storage_url = Some(url);
        }
        if let Some((var, value)) = get("FETCH_TIMEOUT_SECS") {
            self.fetch_timeout_secs = value
                .parse()
                .map_err(|_| ConfigError::InvalidEnv { var, value })?;
        }
        if let Some((var, value)) = get("MAX_BODY_BYTES") {
            let max = value
                .parse()
                .map_err(|_| ConfigError::InvalidEnv { var, value })?;
            self.max_body_bytes = Some(max);
        }
        if let Some((var, value)) = get("PIN_ON_CREATE") {
            self.pin_on_create = match value.as_str() {
                "1" | "true" => true,
                "0" | "false" => false,
                _ => return Err(ConfigError::InvalidEnv { var, value }),
            };
        }
        Ok(self)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn storage_url(&self) -> Result<Option<Url>, ConfigError> {
        self.storage_url
            .as_deref()
            .map(Url::parse)
            .transpose()
            .map_err(ConfigError::InvalidStorageUrl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.fetch_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn file_overrides_defaults() {
        let config = Config::from_toml_str(
            r#"
            owner = "alice"
            storage_url = "memory:///"
            max_body_bytes = 1024
            "#,
        )
        .unwrap();
        assert_eq!(config.owner, "alice");
        assert_eq!(config.max_body_bytes, Some(1024));
        assert_eq!(config.fetch_timeout_secs, DEFAULT_FETCH_TIMEOUT_SECS);
        assert_eq!(config.storage_url().unwrap().unwrap().scheme(), "memory");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = Config::from_toml_str("ownr = \"typo\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn env_overrides_file() {
        let env: HashMap<&str, &str> = [
            ("DATAPILE_OWNER", "bob"),
            ("DATAPILE_FETCH_TIMEOUT_SECS", "5"),
            ("DATAPILE_PIN_ON_CREATE", "true"),
        ]
        .into_iter()
        .collect();
        let config = Config::from_toml_str("owner = \"alice\"")
            .unwrap()
            .apply_env_from(|var| env.get(var).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.owner, "bob");
        assert_eq!(config.fetch_timeout_secs, 5);
        assert!(config.pin_on_create);
    }

    #[test]
    fn bad_env_value() {
        let err = Config::default()
            .apply_env_from(|var| (var == "DATAPILE_MAX_BODY_BYTES").then(|| "lots".to_owned()))
            .unwrap_err();
        assert!(err.to_string().contains("DATAPILE_MAX_BODY_BYTES"));
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("datapile.toml");
        std::fs::write(&path, "owner = \"ferris\"\npin_on_create = true\n").unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.owner, "ferris");
        assert!(config.pin_on_create);

        let missing = dir.path().join("missing.toml");
        assert!(matches!(
            Config::load(&missing),
            Err(ConfigError::Io { .. })
        ));
    }
}
