//! Configuration loading and validation.
//!
//! Loads settings from `./herald.toml` (or `$HERALD_CONFIG_PATH`), then
//! applies environment overrides. A `.env` file in the working directory is
//! read first, so its entries behave like real environment variables.
//!
//! Precedence: env vars > config file > defaults.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::dispatch::DispatchSettings;
use crate::ingest::IngestSettings;
use crate::matcher::DEFAULT_KEYWORD;
use crate::platform::telegram::TelegramSettings;

// ── Top-level config ────────────────────────────────────────────

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HeraldConfig {
    /// Tracing filter used when `RUST_LOG` is unset.
    pub log_level: String,
    /// Platform connection and room selection.
    pub telegram: TelegramConfig,
    /// Keyword rule.
    pub matcher: MatcherConfig,
    /// Outbound delivery.
    pub dispatch: DispatchConfig,
    /// Per-message processing retries.
    pub ingest: IngestConfig,
    /// Filesystem locations.
    pub paths: PathsConfig,
    /// Where the values came from; logged once a subscriber exists.
    #[serde(skip)]
    pub origin: ConfigOrigin,
}

/// Sources consulted while loading, kept for logging after startup.
///
/// Configuration loads before the log subscriber is installed, so nothing
/// is logged during loading itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOrigin {
    /// `.env` file that was read, if any.
    pub env_file: Option<PathBuf>,
    /// Config file that was read; `None` means built-in defaults.
    pub config_file: Option<PathBuf>,
    /// Environment overrides that failed to parse and were ignored.
    pub ignored_overrides: Vec<String>,
}

impl Default for HeraldConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            telegram: TelegramConfig::default(),
            matcher: MatcherConfig::default(),
            dispatch: DispatchConfig::default(),
            ingest: IngestConfig::default(),
            paths: PathsConfig::default(),
            origin: ConfigOrigin::default(),
        }
    }
}

impl HeraldConfig {
    /// Load configuration with precedence: env vars > TOML file > defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if `.env` or the config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let env_file = match dotenvy::dotenv() {
            Ok(path) => Some(path),
            Err(e) if e.not_found() => None,
            Err(e) => return Err(anyhow::anyhow!("failed to load .env file: {e}")),
        };
        let mut config = Self::load_with(|key| std::env::var(key).ok())?;
        config.origin.env_file = env_file;
        Ok(config)
    }

    /// Load using a custom env resolver (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be read or parsed.
    pub fn load_with(env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let path = env("HERALD_CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("herald.toml"));
        let mut config = match std::fs::read_to_string(&path) {
            Ok(contents) => {
                let mut config = Self::from_toml(&contents)
                    .with_context(|| format!("invalid config at {}", path.display()))?;
                config.origin.config_file = Some(path);
                config
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => {
                return Err(anyhow::anyhow!(
                    "failed to read config at {}: {e}",
                    path.display()
                ))
            }
        };
        config.apply_overrides(env);
        Ok(config)
    }

    /// Parse a TOML string into config.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).context("failed to parse config TOML")
    }

    /// Apply environment variable overrides.
    ///
    /// Invalid numbers are ignored and recorded in [`ConfigOrigin::ignored_overrides`].
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("HERALD_BOT_TOKEN") {
            self.telegram.bot_token = Some(v);
        }
        let ignored = &mut self.origin.ignored_overrides;
        override_parsed(&env, "HERALD_CHAT_ID", &mut self.telegram.room_id, ignored);
        override_parsed(&env, "HERALD_ADMIN_ID", &mut self.telegram.operator_id, ignored);
        if let Some(v) = env("HERALD_HISTORY_EXPORT") {
            self.telegram.history_export = Some(PathBuf::from(v));
        }

        if let Some(v) = env("HERALD_KEYWORD") {
            self.matcher.keyword = v;
        }

        if let Some(v) = env("HERALD_MESSAGE") {
            self.dispatch.message = v;
        }
        override_parsed(
            &env,
            "HERALD_DELAY_BETWEEN_MESSAGES",
            &mut self.dispatch.pacing_delay_secs,
            ignored,
        );

        if let Some(v) = env("HERALD_AUDIENCE_FILE") {
            self.paths.audience_file = PathBuf::from(v);
        }
        if let Some(v) = env("HERALD_LOGS_DIR") {
            self.paths.logs_dir = PathBuf::from(v);
        }
        if let Some(v) = env("HERALD_LOG_LEVEL") {
            self.log_level = v;
        }
    }

    /// Check that everything `herald run` needs is present.
    ///
    /// # Errors
    ///
    /// Names the first missing or invalid setting.
    pub fn validate(&self) -> Result<()> {
        if !matches!(self.telegram.bot_token.as_deref(), Some(t) if !t.trim().is_empty()) {
            anyhow::bail!("bot token missing: set HERALD_BOT_TOKEN or [telegram].bot_token");
        }
        if self.telegram.room_id == 0 {
            anyhow::bail!("room id missing: set HERALD_CHAT_ID or [telegram].room_id");
        }
        if self.matcher.keyword.trim().is_empty() {
            anyhow::bail!("keyword must not be blank");
        }
        if self.dispatch.message.trim().is_empty() {
            anyhow::bail!("outbound message missing: set HERALD_MESSAGE or [dispatch].message");
        }
        Ok(())
    }

    /// Connection settings for the Telegram binding.
    ///
    /// # Errors
    ///
    /// Returns an error when no bot token is configured.
    pub fn telegram_settings(&self) -> Result<TelegramSettings> {
        let bot_token = self
            .telegram
            .bot_token
            .clone()
            .context("bot token missing")?;
        Ok(TelegramSettings {
            bot_token,
            operator_id: self.telegram.operator_id,
            history_export: self.telegram.history_export.clone(),
        })
    }

    /// Log where the configuration came from. Call after logging is initialised.
    pub fn log_origin(&self) {
        if let Some(path) = &self.origin.env_file {
            tracing::info!(path = %path.display(), "loaded .env file");
        }
        match &self.origin.config_file {
            Some(path) => tracing::info!(path = %path.display(), "loaded config file"),
            None => tracing::info!("no config file found, using defaults"),
        }
        for var in &self.origin.ignored_overrides {
            tracing::warn!(var = %var, "ignored invalid env override");
        }
    }
}

fn override_parsed<T: FromStr>(
    env: &impl Fn(&str) -> Option<String>,
    var: &str,
    target: &mut T,
    ignored: &mut Vec<String>,
) {
    let Some(v) = env(var) else {
        return;
    };
    match v.trim().parse() {
        Ok(parsed) => *target = parsed,
        Err(_) => ignored.push(var.to_owned()),
    }
}

// ── Telegram ────────────────────────────────────────────────────

/// Telegram connection settings (`[telegram]`).
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    /// Bot API token.
    pub bot_token: Option<String>,
    /// Watched room id (`-100…` for supergroups).
    pub room_id: i64,
    /// Operator allowed to send commands by message; 0 disables remote control.
    pub operator_id: i64,
    /// Telegram Desktop `result.json` used for backfill.
    pub history_export: Option<PathBuf>,
}

impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("bot_token", &self.bot_token.as_ref().map(|_| "[REDACTED]"))
            .field("room_id", &self.room_id)
            .field("operator_id", &self.operator_id)
            .field("history_export", &self.history_export)
            .finish()
    }
}

// ── Matcher ─────────────────────────────────────────────────────

/// Keyword rule (`[matcher]`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Case-sensitive keyword root.
    pub keyword: String,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            keyword: DEFAULT_KEYWORD.to_owned(),
        }
    }
}

// ── Dispatch ────────────────────────────────────────────────────

/// Outbound delivery (`[dispatch]`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Text sent to every recipient.
    pub message: String,
    /// Seconds to wait between recipients.
    pub pacing_delay_secs: u64,
    /// Delivery attempts per recipient.
    pub send_attempts: u32,
    /// First backoff wait in milliseconds; doubles per failed attempt.
    pub backoff_base_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            message: String::new(),
            pacing_delay_secs: 2,
            send_attempts: 3,
            backoff_base_ms: 1000,
        }
    }
}

impl DispatchConfig {
    /// Runtime settings for the dispatcher.
    pub fn settings(&self) -> DispatchSettings {
        DispatchSettings {
            message: self.message.clone(),
            pacing_delay: Duration::from_secs(self.pacing_delay_secs),
            send_attempts: self.send_attempts,
            backoff_base: Duration::from_millis(self.backoff_base_ms),
        }
    }
}

// ── Ingest ──────────────────────────────────────────────────────

/// Per-message retry policy (`[ingest]`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Attempts per matched message.
    pub attempts: u32,
    /// Fixed wait between attempts, in milliseconds.
    pub retry_delay_ms: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            retry_delay_ms: 1000,
        }
    }
}

impl IngestConfig {
    /// Runtime settings for the pipeline.
    pub fn settings(&self) -> IngestSettings {
        IngestSettings {
            attempts: self.attempts,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }
}

// ── Paths ───────────────────────────────────────────────────────

/// Filesystem locations (`[paths]`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Persisted audience, one id per line.
    pub audience_file: PathBuf,
    /// Directory for rotated JSON logs.
    pub logs_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            audience_file: PathBuf::from("processed_users.txt"),
            logs_dir: PathBuf::from("logs"),
        }
    }
}
