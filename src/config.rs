use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::collect::{Slot, Slots};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
    #[error("failed to parse {name} as integer: {source}")]
    ParseInt {
        name: String,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("failed to parse {name} as boolean: {value}")]
    ParseBool { name: String, value: String },
}

/// Base URLs of every external service the relay talks to.
///
/// Overridable so tests and self-hosted mirrors can point elsewhere.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub wayback: String,
    pub wayback_api: String,
    pub archive_today: String,
    pub telegraph_api: String,
    pub timetravel: String,
    pub google_cache: String,
    pub catbox: String,
    pub telegram_api: String,
    pub github_api: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            wayback: "https://web.archive.org".to_string(),
            wayback_api: "https://archive.org".to_string(),
            archive_today: "https://archive.today".to_string(),
            telegraph_api: "https://api.telegra.ph".to_string(),
            timetravel: "https://timetravel.mementoweb.org".to_string(),
            google_cache: "https://webcache.googleusercontent.com".to_string(),
            catbox: "https://catbox.moe".to_string(),
            telegram_api: "https://api.telegram.org".to_string(),
            github_api: "https://api.github.com".to_string(),
        }
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Archive slots
    pub slots: Slots,
    pub wayback_timeout: Duration,
    pub per_slot_concurrency: usize,

    // Ingestion
    pub poll_interval: Duration,
    pub conversation_grace: Duration,
    /// How long a stopping ingestor waits for archive cycles already running.
    pub shutdown_grace: Duration,

    // Bundles
    pub bundle_enabled: bool,
    pub work_dir: PathBuf,
    pub screenshot_enabled: bool,
    pub pdf_enabled: bool,
    pub chrome_path: Option<String>,
    pub monolith_enabled: bool,
    pub monolith_path: String,
    pub catbox_enabled: bool,

    // IPFS
    pub ipfs_api_url: String,
    pub ipfs_gateway_url: String,

    // Telegraph
    pub telegraph_access_token: Option<String>,

    // Telegram
    pub telegram_token: Option<String>,
    pub telegram_channel: Option<String>,

    // Mastodon
    pub mastodon_server: Option<String>,
    pub mastodon_access_token: Option<String>,

    // GitHub issues
    pub github_token: Option<String>,
    pub github_owner: Option<String>,
    pub github_repo: Option<String>,

    pub endpoints: Endpoints,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Endpoints::default();

        let mut slots = Slots::new();
        for (slot, default) in [
            (Slot::Ia, true),
            (Slot::Is, true),
            (Slot::Ip, false),
            (Slot::Ph, false),
        ] {
            let name = format!("WAYBACK_ENABLE_{}", slot.code().to_uppercase());
            slots.insert(slot, parse_env_bool(&name, default)?);
        }

        Ok(Self {
            slots,
            wayback_timeout: Duration::from_secs(parse_env_u64("WAYBACK_TIMEOUT_SECS", 300)?),
            per_slot_concurrency: parse_env_usize("PER_SLOT_CONCURRENCY", 4)?,

            poll_interval: Duration::from_secs(parse_env_u64("POLL_INTERVAL_SECS", 5)?),
            conversation_grace: Duration::from_millis(parse_env_u64("CONVERSATION_GRACE_MS", 1000)?),
            shutdown_grace: Duration::from_secs(parse_env_u64("SHUTDOWN_GRACE_SECS", 30)?),

            bundle_enabled: parse_env_bool("BUNDLE_ENABLED", true)?,
            work_dir: PathBuf::from(env_or_default("WORK_DIR", "./data/tmp")),
            screenshot_enabled: parse_env_bool("SCREENSHOT_ENABLED", false)?,
            pdf_enabled: parse_env_bool("PDF_ENABLED", false)?,
            chrome_path: optional_env("CHROME_PATH"),
            monolith_enabled: parse_env_bool("MONOLITH_ENABLED", false)?,
            monolith_path: env_or_default("MONOLITH_PATH", "monolith"),
            catbox_enabled: parse_env_bool("CATBOX_ENABLED", false)?,

            ipfs_api_url: env_or_default("IPFS_API_URL", "http://127.0.0.1:5001"),
            ipfs_gateway_url: env_or_default("IPFS_GATEWAY_URL", "https://ipfs.io/ipfs/"),

            telegraph_access_token: optional_env("TELEGRAPH_ACCESS_TOKEN"),

            telegram_token: optional_env("TELEGRAM_TOKEN"),
            telegram_channel: optional_env("TELEGRAM_CHANNEL"),

            mastodon_server: optional_env("MASTODON_SERVER"),
            mastodon_access_token: optional_env("MASTODON_ACCESS_TOKEN"),

            github_token: optional_env("GITHUB_TOKEN"),
            github_owner: optional_env("GITHUB_OWNER"),
            github_repo: optional_env("GITHUB_REPO"),

            endpoints: Endpoints {
                wayback: env_or_default("WAYBACK_ENDPOINT", &defaults.wayback),
                wayback_api: env_or_default("WAYBACK_API_ENDPOINT", &defaults.wayback_api),
                archive_today: env_or_default("ARCHIVE_TODAY_ENDPOINT", &defaults.archive_today),
                telegraph_api: env_or_default("TELEGRAPH_ENDPOINT", &defaults.telegraph_api),
                timetravel: env_or_default("TIMETRAVEL_ENDPOINT", &defaults.timetravel),
                google_cache: env_or_default("GOOGLE_CACHE_ENDPOINT", &defaults.google_cache),
                catbox: env_or_default("CATBOX_ENDPOINT", &defaults.catbox),
                telegram_api: env_or_default("TELEGRAM_ENDPOINT", &defaults.telegram_api),
                github_api: env_or_default("GITHUB_ENDPOINT", &defaults.github_api),
            },
        })
    }

    /// Deterministic configuration for tests: IA only, short timeouts, no bundles.
    #[must_use]
    pub fn for_testing() -> Self {
        let mut slots = Slots::new();
        slots.insert(Slot::Ia, true);
        slots.insert(Slot::Is, false);
        slots.insert(Slot::Ip, false);
        slots.insert(Slot::Ph, false);

        Self {
            slots,
            wayback_timeout: Duration::from_secs(10),
            per_slot_concurrency: 4,
            poll_interval: Duration::from_millis(50),
            conversation_grace: Duration::from_millis(10),
            shutdown_grace: Duration::from_secs(5),
            bundle_enabled: false,
            work_dir: std::env::temp_dir().join("wayback-relay-test"),
            screenshot_enabled: false,
            pdf_enabled: false,
            chrome_path: None,
            monolith_enabled: false,
            monolith_path: "monolith".to_string(),
            catbox_enabled: false,
            ipfs_api_url: "http://127.0.0.1:5001".to_string(),
            ipfs_gateway_url: "https://ipfs.io/ipfs/".to_string(),
            telegraph_access_token: None,
            telegram_token: None,
            telegram_channel: None,
            mastodon_server: None,
            mastodon_access_token: None,
            github_token: None,
            github_owner: None,
            github_repo: None,
            endpoints: Endpoints::default(),
        }
    }

    /// Validate that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.per_slot_concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                name: "PER_SLOT_CONCURRENCY".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.wayback_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                name: "WAYBACK_TIMEOUT_SECS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.mastodon_server.is_some() != self.mastodon_access_token.is_some() {
            return Err(ConfigError::InvalidValue {
                name: "MASTODON_SERVER".to_string(),
                message: "MASTODON_SERVER and MASTODON_ACCESS_TOKEN must be set together"
                    .to_string(),
            });
        }
        if self.telegram_channel.is_some() && self.telegram_token.is_none() {
            return Err(ConfigError::MissingEnvVar("TELEGRAM_TOKEN".to_string()));
        }
        Ok(())
    }

    /// Slots currently switched on, in a stable order.
    #[must_use]
    pub fn enabled_slots(&self) -> Vec<Slot> {
        self.slots
            .iter()
            .filter_map(|(slot, on)| on.then_some(*slot))
            .collect()
    }

    /// GitHub repository as `(owner, repo, token)` when issue publishing is configured.
    #[must_use]
    pub fn github_target(&self) -> Option<(&str, &str, &str)> {
        Some((
            self.github_owner.as_deref()?,
            self.github_repo.as_deref()?,
            self.github_token.as_deref()?,
        ))
    }
}

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_or_default(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_env_u64(name: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_usize(name: &str, default: usize) -> Result<usize, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_bool(name: &str, default: bool) -> Result<bool, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => parse_bool(name, &val),
        _ => Ok(default),
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::ParseBool {
            name: name.to_string(),
            value: value.to_string(),
        }),
    }
}
