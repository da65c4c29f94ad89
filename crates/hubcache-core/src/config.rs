//! Worker configuration.
//!
//! A `Config` is built once when the worker starts and handed to the
//! `CacheWorker`. Development mode is decided here from the origin's
//! hostname and never re-read per request.
//!
//! Configuration can come from defaults (`Config::for_origin`), from
//! `HUBCACHE_*` environment variables (`Config::from_env`), or from a JSON
//! file at `~/.config/hubcache/config.json`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{CacheError, Result};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "hubcache";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Origin used when nothing else is configured
const DEFAULT_ORIGIN: &str = "http://localhost:8080";

/// Hostnames that switch the worker into development mode
const DEVELOPMENT_HOSTS: [&str; 2] = ["localhost", "127.0.0.1"];

/// Images stay fresh for a day; they rarely change between deploys.
const IMAGE_MAX_AGE_SECS: u64 = 24 * 60 * 60;

/// Everything else is refreshed after an hour.
const DEFAULT_MAX_AGE_SECS: u64 = 60 * 60;

/// Generation size that triggers eviction.
const EVICTION_CEILING: usize = 100;

/// Size a generation is trimmed back to.
const EVICTION_TARGET: usize = 80;

/// Eviction sweep period.
const SWEEP_INTERVAL_SECS: u64 = 24 * 60 * 60;

const FONTS_STYLESHEET: &str = concat!(
    "https://fonts.googleapis.com/css2",
    "?family=Inter:wght@300;400;500;600;700;800;900",
    "&family=JetBrains+Mono:wght@300;400;500;600;700",
    "&family=Space+Grotesk:wght@300;400;500;600;700",
    "&display=swap"
);
const ICONS_STYLESHEET: &str =
    "https://cdnjs.cloudflare.com/ajax/libs/font-awesome/6.5.0/css/all.min.css";
const AVATAR_IMAGE: &str =
    "https://ik.imagekit.io/ItsWatuyusei/Image/bio.png?updatedAt=1752020060115";

/// A reserved path that resolves straight to a pre-cached document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRule {
    pub path: String,
    pub document: String,
}

impl RouteRule {
    pub fn new(path: &str, document: &str) -> Self {
        Self {
            path: path.to_string(),
            document: document.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Namespace prefix shared by every generation this service owns.
    pub service_name: String,
    /// Human-facing name used in offline responses and notifications.
    pub display_name: String,
    pub version: String,
    pub origin: Url,
    pub development: bool,
    /// Third-party resources pre-cached in every mode.
    pub external_manifest: Vec<String>,
    /// Local page shell, pre-cached outside development only.
    pub shell_manifest: Vec<String>,
    /// Regexes over absolute URLs whose responses may be cached cross-origin.
    pub trusted_patterns: Vec<String>,
    pub routes: Vec<RouteRule>,
    /// Document served to navigations when offline and uncached.
    pub offline_document: String,
    #[serde(with = "duration_secs")]
    pub image_max_age: Duration,
    #[serde(with = "duration_secs")]
    pub default_max_age: Duration,
    pub eviction_ceiling: usize,
    pub eviction_target: usize,
    #[serde(with = "duration_secs")]
    pub sweep_interval: Duration,
    #[serde(default, with = "optional_duration_secs")]
    pub request_timeout: Option<Duration>,
    pub notification_icon: String,
    pub analytics_sync_tag: String,
}

impl Config {
    /// Build the default configuration for a worker served from `origin`.
    pub fn for_origin(origin: Url) -> Self {
        let development = is_development_host(&origin);
        Self {
            service_name: "portfolio-hub-2025".to_string(),
            display_name: "Portfolio Hub".to_string(),
            version: "1.0.0".to_string(),
            origin,
            development,
            external_manifest: vec![
                FONTS_STYLESHEET.to_string(),
                ICONS_STYLESHEET.to_string(),
                AVATAR_IMAGE.to_string(),
            ],
            shell_manifest: ["/", "/index.html", "/style.css", "/main.js", "/favicon.ico"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            trusted_patterns: vec![
                r"^https://ik\.imagekit\.io/ItsWatuyusei/Image/".to_string(),
                r"^https://fonts\.googleapis\.com/css".to_string(),
                r"^https://cdnjs\.cloudflare\.com".to_string(),
                r"^https://fonts\.gstatic\.com".to_string(),
            ],
            routes: vec![
                RouteRule::new("/v1", "/v1/index.html"),
                RouteRule::new("/v1/", "/v1/index.html"),
                RouteRule::new("/v2", "/v2/index.html"),
                RouteRule::new("/v2/", "/v2/index.html"),
            ],
            offline_document: "/index.html".to_string(),
            image_max_age: Duration::from_secs(IMAGE_MAX_AGE_SECS),
            default_max_age: Duration::from_secs(DEFAULT_MAX_AGE_SECS),
            eviction_ceiling: EVICTION_CEILING,
            eviction_target: EVICTION_TARGET,
            sweep_interval: Duration::from_secs(SWEEP_INTERVAL_SECS),
            request_timeout: None,
            notification_icon: "/favicon.ico".to_string(),
            analytics_sync_tag: "portfolio-hub-analytics".to_string(),
        }
    }

    /// Build a configuration from `HUBCACHE_*` environment variables on top
    /// of the defaults.
    pub fn from_env() -> Result<Self> {
        let origin = match std::env::var("HUBCACHE_ORIGIN") {
            Ok(raw) => Url::parse(&raw)?,
            Err(_) => Url::parse(DEFAULT_ORIGIN)?,
        };
        let mut config = Self::for_origin(origin);

        if let Ok(service) = std::env::var("HUBCACHE_SERVICE") {
            config.service_name = service;
        }
        if let Ok(version) = std::env::var("HUBCACHE_VERSION") {
            config.version = version;
        }
        if let Ok(flag) = std::env::var("HUBCACHE_DEVELOPMENT") {
            config.development = parse_flag(&flag)?;
        }
        if let Ok(secs) = std::env::var("HUBCACHE_SWEEP_INTERVAL_SECS") {
            config.sweep_interval =
                Duration::from_secs(parse_secs("HUBCACHE_SWEEP_INTERVAL_SECS", &secs)?);
        }
        if let Ok(secs) = std::env::var("HUBCACHE_REQUEST_TIMEOUT_SECS") {
            config.request_timeout =
                Some(Duration::from_secs(parse_secs("HUBCACHE_REQUEST_TIMEOUT_SECS", &secs)?));
        }

        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file, falling back to `from_env` when absent.
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&contents)?;
            config.validate()?;
            Ok(config)
        } else {
            Self::from_env()
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| CacheError::Config("Could not find config directory".to_string()))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory used by the disk store.
    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| CacheError::Config("Could not find cache directory".to_string()))?;
        Ok(cache_dir.join(APP_NAME).join(&self.service_name))
    }

    pub fn validate(&self) -> Result<()> {
        if !matches!(self.origin.scheme(), "http" | "https") {
            return Err(CacheError::Config(format!(
                "origin must be http(s), got {}",
                self.origin
            )));
        }
        if self.service_name.is_empty() || self.version.is_empty() {
            return Err(CacheError::Config(
                "service name and version must not be empty".to_string(),
            ));
        }
        if self.eviction_target >= self.eviction_ceiling {
            return Err(CacheError::Config(format!(
                "eviction target {} must be below ceiling {}",
                self.eviction_target, self.eviction_ceiling
            )));
        }
        if self.sweep_interval.is_zero() {
            return Err(CacheError::Config("sweep interval must be non-zero".to_string()));
        }
        for pattern in &self.trusted_patterns {
            Regex::new(pattern).map_err(|e| CacheError::InvalidPattern(e.to_string()))?;
        }
        Ok(())
    }

    pub fn static_cache_name(&self) -> String {
        format!("{}-static-{}", self.service_name, self.version)
    }

    pub fn dynamic_cache_name(&self) -> String {
        format!("{}-dynamic-{}", self.service_name, self.version)
    }

    /// Whether a generation name belongs to this service's namespace.
    pub fn owns_generation(&self, name: &str) -> bool {
        name.strip_prefix(&self.service_name)
            .map(|rest| rest.starts_with('-'))
            .unwrap_or(false)
    }

    /// URLs pre-cached at install time. Development deployments skip the
    /// local page shell so it is always fetched fresh.
    pub fn manifest(&self) -> Vec<String> {
        if self.development {
            self.external_manifest.clone()
        } else {
            self.shell_manifest
                .iter()
                .chain(self.external_manifest.iter())
                .cloned()
                .collect()
        }
    }

    /// Resolve a manifest or route entry against the worker's origin.
    pub fn resolve(&self, path_or_url: &str) -> Result<Url> {
        Ok(self.origin.join(path_or_url)?)
    }
}

fn is_development_host(origin: &Url) -> bool {
    origin
        .host_str()
        .map(|host| DEVELOPMENT_HOSTS.contains(&host))
        .unwrap_or(false)
}

fn parse_flag(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(CacheError::Config(format!("not a boolean: {}", other))),
    }
}

fn parse_secs(name: &str, raw: &str) -> Result<u64> {
    raw.trim()
        .parse()
        .map_err(|_| CacheError::Config(format!("{} must be a number of seconds", name)))
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}

mod optional_duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&d.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_secs))
    }
}

// ============================================================================
// Tests
// ============================================================================
