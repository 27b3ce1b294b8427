use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::navigation::{NavContext, RoundingPolicy};
use crate::prefetch::PrefetchConfig;
use crate::retry::FetchPolicy;
use crate::router::{ControlBindings, PageControl};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("could not determine config directory")]
    NoConfigDir,
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// On-disk TOML configuration structure.
/// All fields are optional so partial configs work (merge with defaults).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    pub server: Option<ServerSection>,
    pub reader: Option<ReaderSection>,
    pub prefetch: Option<PrefetchSection>,
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ServerSection {
    pub url: Option<String>,
    pub api_key: Option<String>,
}

impl std::fmt::Debug for ServerSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerSection")
            .field("url", &self.url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReaderSection {
    pub split_page: Option<bool>,
    pub split_page_priority_left: Option<bool>,
    pub tap_left: Option<PageControl>,
    pub tap_middle: Option<PageControl>,
    pub tap_right: Option<PageControl>,
    pub swipe_left: Option<PageControl>,
    pub swipe_right: Option<PageControl>,
    pub rounding: Option<RoundingPolicy>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PrefetchSection {
    pub fan_out: Option<usize>,
    pub timeout_secs: Option<u64>,
    pub extract_timeout_secs: Option<u64>,
    pub max_retries: Option<u32>,
    pub backoff_ms: Option<u64>,
}

pub const DEFAULT_EXTRACT_TIMEOUT: Duration = Duration::from_secs(120);

/// Connection settings for the archive server.
#[derive(Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub url: String,
    pub api_key: String,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("url", &self.url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

/// Reader preferences resolved from the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReaderSettings {
    pub split_page: bool,
    pub priority_left: bool,
    pub bindings: ControlBindings,
    pub rounding: RoundingPolicy,
}

impl ReaderSettings {
    pub fn nav_context(&self, is_portrait: bool) -> NavContext {
        NavContext {
            is_portrait,
            split_enabled: self.split_page,
            priority_left: self.priority_left,
            rounding: self.rounding,
        }
    }
}

impl ConfigFile {
    pub fn server(&self) -> Option<ServerConfig> {
        let section = self.server.as_ref()?;
        let url = section.url.clone().filter(|u| !u.trim().is_empty())?;
        Some(ServerConfig {
            url,
            api_key: section.api_key.clone().unwrap_or_default(),
        })
    }

    pub fn reader_settings(&self) -> ReaderSettings {
        let r = self.reader.clone().unwrap_or_default();
        let d = ControlBindings::default();
        ReaderSettings {
            split_page: r.split_page.unwrap_or(false),
            priority_left: r.split_page_priority_left.unwrap_or(false),
            bindings: ControlBindings {
                tap_left: r.tap_left.unwrap_or(d.tap_left),
                tap_middle: r.tap_middle.unwrap_or(d.tap_middle),
                tap_right: r.tap_right.unwrap_or(d.tap_right),
                swipe_left: r.swipe_left.unwrap_or(d.swipe_left),
                swipe_right: r.swipe_right.unwrap_or(d.swipe_right),
            },
            rounding: r.rounding.unwrap_or_default(),
        }
    }

    /// Policy for page and thumbnail fetches.
    pub fn fetch_policy(&self) -> FetchPolicy {
        let p = self.prefetch.clone().unwrap_or_default();
        let d = FetchPolicy::default();
        FetchPolicy {
            timeout: p.timeout_secs.map(Duration::from_secs).unwrap_or(d.timeout),
            max_retries: p.max_retries.unwrap_or(d.max_retries),
            backoff: p.backoff_ms.map(Duration::from_millis).unwrap_or(d.backoff),
        }
    }

    /// Extraction gets one long attempt; the server may be unpacking.
    pub fn extract_policy(&self) -> FetchPolicy {
        let timeout = self
            .prefetch
            .as_ref()
            .and_then(|p| p.extract_timeout_secs)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_EXTRACT_TIMEOUT);
        self.fetch_policy().single_attempt().with_timeout(timeout)
    }

    pub fn prefetch_config(&self) -> PrefetchConfig {
        PrefetchConfig {
            fan_out: self
                .prefetch
                .as_ref()
                .and_then(|p| p.fan_out)
                .unwrap_or(PrefetchConfig::default().fan_out),
            policy: self.fetch_policy(),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(p) = &self.prefetch {
            if p.fan_out == Some(0) {
                return Err(ConfigError::Invalid("prefetch.fan_out must be at least 1".into()));
            }
            if p.timeout_secs == Some(0) || p.extract_timeout_secs == Some(0) {
                return Err(ConfigError::Invalid("prefetch timeouts must be positive".into()));
            }
        }
        Ok(())
    }
}

/// Platform config directory path: `<config_dir>/dumanga/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("dumanga").join("config.toml"))
}

/// Load config by cascading CWD `.dumanga.toml` over platform config.
/// CWD values override platform values.
pub fn load_config() -> Result<ConfigFile, ConfigError> {
    load_cascade(config_path().as_deref(), Path::new(".dumanga.toml"))
}

fn load_cascade(platform: Option<&Path>, cwd: &Path) -> Result<ConfigFile, ConfigError> {
    let platform = match platform {
        Some(path) => load_from_path(path)?,
        None => None,
    };
    let cwd = load_from_path(cwd)?;

    Ok(match (platform, cwd) {
        (None, None) => ConfigFile::default(),
        (Some(p), None) => p,
        (None, Some(c)) => c,
        (Some(p), Some(c)) => merge(p, c),
    })
}

/// Load a config from a specific path. Returns `Ok(None)` if the file
/// doesn't exist; malformed or invalid files are errors.
pub fn load_from_path(path: &Path) -> Result<Option<ConfigFile>, ConfigError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    let config: ConfigFile = toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    config.validate()?;
    Ok(Some(config))
}

fn pick<S, T>(overlay: &Option<S>, base: &Option<S>, field: impl Fn(&S) -> Option<T>) -> Option<T> {
    overlay
        .as_ref()
        .and_then(&field)
        .or_else(|| base.as_ref().and_then(&field))
}

/// Merge two configs: `overlay` values take precedence over `base`.
pub fn merge(base: ConfigFile, overlay: ConfigFile) -> ConfigFile {
    let (bs, os) = (&base.server, &overlay.server);
    let (br, or) = (&base.reader, &overlay.reader);
    let (bp, op) = (&base.prefetch, &overlay.prefetch);
    ConfigFile {
        server: Some(ServerSection {
            url: pick(os, bs, |s| s.url.clone()),
            api_key: pick(os, bs, |s| s.api_key.clone()),
        }),
        reader: Some(ReaderSection {
            split_page: pick(or, br, |r| r.split_page),
            split_page_priority_left: pick(or, br, |r| r.split_page_priority_left),
            tap_left: pick(or, br, |r| r.tap_left),
            tap_middle: pick(or, br, |r| r.tap_middle),
            tap_right: pick(or, br, |r| r.tap_right),
            swipe_left: pick(or, br, |r| r.swipe_left),
            swipe_right: pick(or, br, |r| r.swipe_right),
            rounding: pick(or, br, |r| r.rounding),
        }),
        prefetch: Some(PrefetchSection {
            fan_out: pick(op, bp, |p| p.fan_out),
            timeout_secs: pick(op, bp, |p| p.timeout_secs),
            extract_timeout_secs: pick(op, bp, |p| p.extract_timeout_secs),
            max_retries: pick(op, bp, |p| p.max_retries),
            backoff_ms: pick(op, bp, |p| p.backoff_ms),
        }),
    }
}

/// Save the current config to the platform config directory.
pub fn save_config(config: &ConfigFile) -> Result<PathBuf, ConfigError> {
    let path = config_path().ok_or(ConfigError::NoConfigDir)?;
    save_to_path(config, &path)?;
    Ok(path)
}

pub fn save_to_path(config: &ConfigFile, path: &Path) -> Result<(), ConfigError> {
    let io_err = |source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(io_err)?;
    Ok(())
}

/// Persistence for the server connection settings.
pub trait ConfigStore: Send + Sync {
    /// `Ok(None)` means no server is configured yet and setup is required.
    fn load_server(&self) -> Result<Option<ServerConfig>, ConfigError>;
    fn save_server(&self, server: &ServerConfig) -> Result<(), ConfigError>;
}

fn check_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.url.trim().is_empty() {
        return Err(ConfigError::Invalid("server url is empty".into()));
    }
    Ok(())
}

/// Stores the server section in a TOML file, leaving other sections intact.
#[derive(Debug, Clone)]
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store backed by the platform config file.
    pub fn platform() -> Result<Self, ConfigError> {
        config_path().map(Self::new).ok_or(ConfigError::NoConfigDir)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigStore for FileConfigStore {
    fn load_server(&self) -> Result<Option<ServerConfig>, ConfigError> {
        Ok(load_from_path(&self.path)?.and_then(|c| c.server()))
    }

    fn save_server(&self, server: &ServerConfig) -> Result<(), ConfigError> {
        check_server(server)?;
        let mut config = load_from_path(&self.path)?.unwrap_or_default();
        config.server = Some(ServerSection {
            url: Some(server.url.clone()),
            api_key: Some(server.api_key.clone()),
        });
        save_to_path(&config, &self.path)?;
        tracing::info!(path = %self.path.display(), "server settings saved");
        Ok(())
    }
}

/// In-process store, for tests and embedders that persist elsewhere.
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    server: Mutex<Option<ServerConfig>>,
    read_only: bool,
}

impl MemoryConfigStore {
    pub fn new(server: Option<ServerConfig>) -> Self {
        Self {
            server: Mutex::new(server),
            read_only: false,
        }
    }

    /// A store whose saves always fail.
    pub fn read_only() -> Self {
        Self {
            server: Mutex::new(None),
            read_only: true,
        }
    }
}

impl ConfigStore for MemoryConfigStore {
    fn load_server(&self) -> Result<Option<ServerConfig>, ConfigError> {
        Ok(self
            .server
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn save_server(&self, server: &ServerConfig) -> Result<(), ConfigError> {
        if self.read_only {
            return Err(ConfigError::Invalid("store is read-only".into()));
        }
        check_server(server)?;
        *self.server.lock().unwrap_or_else(PoisonError::into_inner) = Some(server.clone());
        Ok(())
    }
}
