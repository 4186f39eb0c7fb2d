//! Configuration loaded from a `key = value` file and the environment.
//!
//! The default file lives at `$XDG_CONFIG_HOME/course-downloader/config.toml`
//! (falling back to `$HOME/.config/course-downloader/config.toml`). Every key
//! is optional:
//!
//! ```text
//! internal_dir = "/home/me/Courses"
//! external_dir = "/media/sd/Courses"
//! prefer_external = false
//! show_notifications = true
//! allow_mobile_network = false
//! app_host = "learn.example.com"
//! auth_token = "..."            # or COURSE_DOWNLOADER_TOKEN
//! locale = "en"                 # or COURSE_DOWNLOADER_LOCALE
//! platform = "desktop"
//! api_version = 3
//! max_concurrent = 3            # 1..=16
//! connect_timeout_secs = 30     # 1..=3600
//! read_timeout_secs = 300       # 1..=3600
//! ```

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::download::RequestEnvironment;
use crate::engine::http::{CONNECT_TIMEOUT_SECS, DEFAULT_MAX_CONCURRENT, READ_TIMEOUT_SECS};
use crate::engine::{HttpEngineOptions, NetworkTypes};
use crate::storage::{Storage, StorageKind, StorageLocations};

/// Environment variable overriding `auth_token`.
pub const TOKEN_ENV: &str = "COURSE_DOWNLOADER_TOKEN";

/// Environment variable overriding `locale`.
pub const LOCALE_ENV: &str = "COURSE_DOWNLOADER_LOCALE";

/// Default internal download directory (relative to the working directory).
pub const DEFAULT_INTERNAL_DIR: &str = "downloads";

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file '{path}': {source}")]
    Read {
        /// Path of the config file.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// A line is not `key = value`.
    #[error("invalid config syntax on line {line}: expected key = value")]
    Syntax {
        /// 1-based line number.
        line: usize,
    },

    /// The key is not known.
    #[error("unknown configuration key '{key}' on line {line}")]
    UnknownKey {
        /// The offending key.
        key: String,
        /// 1-based line number.
        line: usize,
    },

    /// The value could not be parsed.
    #[error("invalid `{key}` value on line {line}: {reason}")]
    InvalidValue {
        /// The key whose value is invalid.
        key: String,
        /// 1-based line number.
        line: usize,
        /// What was expected.
        reason: String,
    },

    /// The value is outside the accepted range.
    #[error("invalid config value for `{key}`: {value}. Expected range: {range}")]
    OutOfRange {
        /// The key whose value is out of range.
        key: &'static str,
        /// The rejected value.
        value: u64,
        /// The accepted range.
        range: &'static str,
    },
}

impl ConfigError {
    fn invalid(key: &str, line: usize, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.to_string(),
            line,
            reason: reason.into(),
        }
    }
}

/// Downloader configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloaderConfig {
    pub internal_dir: PathBuf,
    pub external_dir: Option<PathBuf>,
    /// Write new downloads to external storage when it is configured.
    pub prefer_external: bool,
    pub show_notifications: bool,
    pub allow_mobile_network: bool,
    /// Host that receives the auth token.
    pub app_host: Option<String>,
    pub auth_token: Option<String>,
    pub locale: String,
    pub platform: String,
    pub api_version: u32,
    pub max_concurrent: usize,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        let environment = RequestEnvironment::default();
        Self {
            internal_dir: PathBuf::from(DEFAULT_INTERNAL_DIR),
            external_dir: None,
            prefer_external: false,
            show_notifications: true,
            allow_mobile_network: environment.allow_mobile_network,
            app_host: None,
            auth_token: None,
            locale: environment.locale,
            platform: environment.platform,
            api_version: environment.api_version,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            connect_timeout_secs: CONNECT_TIMEOUT_SECS,
            read_timeout_secs: READ_TIMEOUT_SECS,
        }
    }
}

impl DownloaderConfig {
    /// Loads the config file at `path`, then applies environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file can't be read or is invalid.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::parse(&raw)?;
        config.apply_env(|name| env::var(name).ok());
        debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Loads the default config file when present, defaults otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if an existing file is invalid.
    pub fn load_default() -> Result<Self, ConfigError> {
        match default_config_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => {
                let mut config = Self::default();
                config.apply_env(|name| env::var(name).ok());
                Ok(config)
            }
        }
    }

    /// Parses config text without consulting the environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] on syntax errors, unknown keys or invalid values.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        for (index, raw_line) in raw.lines().enumerate() {
            let line = index + 1;
            let text = strip_inline_comment(raw_line).trim();
            if text.is_empty() {
                continue;
            }

            let Some((raw_key, raw_value)) = text.split_once('=') else {
                return Err(ConfigError::Syntax { line });
            };
            let key = raw_key.trim();
            let value = raw_value.trim();

            match key {
                "internal_dir" => config.internal_dir = PathBuf::from(parse_string(key, line, value)?),
                "external_dir" => config.external_dir = Some(PathBuf::from(parse_string(key, line, value)?)),
                "prefer_external" => config.prefer_external = parse_bool(key, line, value)?,
                "show_notifications" => config.show_notifications = parse_bool(key, line, value)?,
                "allow_mobile_network" => config.allow_mobile_network = parse_bool(key, line, value)?,
                "app_host" => config.app_host = Some(parse_string(key, line, value)?),
                "auth_token" => config.auth_token = Some(parse_string(key, line, value)?),
                "locale" => config.locale = parse_string(key, line, value)?,
                "platform" => config.platform = parse_string(key, line, value)?,
                "api_version" => {
                    let parsed = parse_u64(key, line, value)?;
                    config.api_version = u32::try_from(parsed)
                        .map_err(|_| ConfigError::invalid(key, line, "integer out of range for u32"))?;
                }
                "max_concurrent" => {
                    let parsed = parse_u64(key, line, value)?;
                    config.max_concurrent = usize::try_from(parsed)
                        .map_err(|_| ConfigError::invalid(key, line, "integer out of range"))?;
                }
                "connect_timeout_secs" => config.connect_timeout_secs = parse_u64(key, line, value)?,
                "read_timeout_secs" => config.read_timeout_secs = parse_u64(key, line, value)?,
                unknown => {
                    return Err(ConfigError::UnknownKey {
                        key: unknown.to_string(),
                        line,
                    });
                }
            }
        }
        config.validate()?;
        Ok(config)
    }

    /// Validates value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::OutOfRange`] for the first invalid value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=16).contains(&self.max_concurrent) {
            return Err(ConfigError::OutOfRange {
                key: "max_concurrent",
                value: self.max_concurrent as u64,
                range: "1..=16",
            });
        }
        validate_timeout_secs("connect_timeout_secs", self.connect_timeout_secs)?;
        validate_timeout_secs("read_timeout_secs", self.read_timeout_secs)?;
        Ok(())
    }

    /// Applies `COURSE_DOWNLOADER_TOKEN` and `COURSE_DOWNLOADER_LOCALE`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(token) = lookup(TOKEN_ENV).filter(|v| !v.trim().is_empty()) {
            debug!("auth token taken from environment");
            self.auth_token = Some(token);
        }
        if let Some(locale) = lookup(LOCALE_ENV).filter(|v| !v.trim().is_empty()) {
            self.locale = locale;
        }
    }

    /// Storage locations described by this config.
    #[must_use]
    pub fn storage_locations(&self) -> StorageLocations {
        let mut locations = StorageLocations::new(Storage::new(&self.internal_dir));
        if let Some(external) = &self.external_dir {
            locations = locations.with_external(Storage::new(external));
        }
        if self.prefer_external {
            locations = locations.prefer(StorageKind::External);
        }
        locations
    }

    /// Request environment described by this config.
    #[must_use]
    pub fn request_environment(&self) -> RequestEnvironment {
        RequestEnvironment {
            locale: self.locale.clone(),
            auth_token: self.auth_token.clone(),
            app_host: self.app_host.clone(),
            allow_mobile_network: self.allow_mobile_network,
            platform: self.platform.clone(),
            api_version: self.api_version,
            ..RequestEnvironment::default()
        }
    }

    /// HTTP engine options described by this config.
    #[must_use]
    pub fn http_engine_options(&self) -> HttpEngineOptions {
        HttpEngineOptions {
            max_concurrent: self.max_concurrent,
            connect_timeout_secs: self.connect_timeout_secs,
            read_timeout_secs: self.read_timeout_secs,
            network: NetworkTypes::WIFI,
        }
    }
}

/// Resolves default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/course-downloader/config.toml`
/// 2. `$HOME/.config/course-downloader/config.toml`
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join("course-downloader")
                .join("config.toml"),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("course-downloader")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

fn validate_timeout_secs(key: &'static str, value: u64) -> Result<(), ConfigError> {
    if !(1..=3600).contains(&value) {
        return Err(ConfigError::OutOfRange {
            key,
            value,
            range: "1..=3600",
        });
    }
    Ok(())
}

fn strip_inline_comment(line: &str) -> &str {
    let mut in_string = false;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..index],
            _ => {}
        }
    }
    line
}

fn parse_string(key: &str, line: usize, raw_value: &str) -> Result<String, ConfigError> {
    if raw_value.len() < 2 || !raw_value.starts_with('"') || !raw_value.ends_with('"') {
        return Err(ConfigError::invalid(key, line, "expected double-quoted string"));
    }
    Ok(raw_value[1..raw_value.len() - 1].to_string())
}

fn parse_u64(key: &str, line: usize, raw_value: &str) -> Result<u64, ConfigError> {
    let token = raw_value.trim();
    if token.is_empty() {
        return Err(ConfigError::invalid(key, line, "expected integer value"));
    }
    token
        .parse::<u64>()
        .map_err(|e| ConfigError::invalid(key, line, format!("expected non-negative integer ({e})")))
}

fn parse_bool(key: &str, line: usize, raw_value: &str) -> Result<bool, ConfigError> {
    match raw_value {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(ConfigError::invalid(key, line, "expected 'true' or 'false'")),
    }
}
