//! Configuration loading and validation.
//!
//! The TOML file holds everything except secrets; secrets live in the
//! environment and the file only names the variables that hold them
//! (`bot_token_env`, `token_env`, `api_key_env`).
//!
//! Path: `--config`, else `$CHANNEL_RELAY_CONFIG`, else
//! `~/.channel-relay/config.toml`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use serde::Deserialize;
use tracing::warn;

use crate::routing::classifier::SupportedMimes;
use crate::routing::filter::FilterRule;
use crate::routing::SinkLimits;

/// Environment variable overriding the default config path.
pub const CONFIG_PATH_ENV: &str = "CHANNEL_RELAY_CONFIG";

/// Top-level configuration.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Source side.
    pub telegram: TelegramConfig,

    /// Sink side.
    pub whatsapp: WhatsAppConfig,

    /// Rule evaluation backend. Absent means filtering is disabled.
    #[serde(default)]
    pub llm: Option<LlmConfig>,

    /// Forwarding behavior and limits.
    #[serde(default)]
    pub forwarding: ForwardingConfig,

    /// Ordered content filter rules.
    #[serde(default)]
    pub filters: Vec<FilterRule>,

    /// Extra TOML file whose `[[filters]]` are appended after the inline ones.
    /// Relative paths resolve against the config file's directory.
    #[serde(default)]
    pub filters_file: Option<PathBuf>,
}

/// Telegram source configuration.
#[derive(Debug, Deserialize)]
pub struct TelegramConfig {
    /// Environment variable name holding the bot token.
    #[serde(default = "default_bot_token_env")]
    pub bot_token_env: String,

    /// Source channels, as `@handle` or numeric chat id.
    pub channels: Vec<String>,
}

/// WhatsApp Cloud API sink configuration.
#[derive(Debug, Deserialize)]
pub struct WhatsAppConfig {
    /// Environment variable name holding the access token.
    #[serde(default = "default_whatsapp_token_env")]
    pub token_env: String,

    /// Business phone number id messages are sent from.
    pub phone_number_id: String,

    /// Recipient phone number (international format, digits only).
    pub recipient: String,

    /// Graph API root.
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl WhatsAppConfig {
    /// Request timeout as a [`Duration`].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// OpenAI-compatible rule evaluation backend.
#[derive(Debug, Deserialize)]
pub struct LlmConfig {
    /// Environment variable name holding the API key.
    #[serde(default = "default_llm_api_key_env")]
    pub api_key_env: String,

    /// Model identifier.
    pub model: String,

    /// API root, e.g. `https://api.openai.com/v1`.
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
}

/// Forwarding behavior.
#[derive(Debug, Deserialize)]
pub struct ForwardingConfig {
    /// Quiet period before an album is considered complete.
    #[serde(default = "default_album_debounce_ms")]
    pub album_debounce_ms: u64,

    /// Maximum characters per text message.
    #[serde(default = "default_max_text_len")]
    pub max_text_len: usize,

    /// Maximum characters per media caption.
    #[serde(default = "default_max_caption_len")]
    pub max_caption_len: usize,

    /// Base URL for links back to the source post.
    #[serde(default = "default_link_base_url")]
    pub link_base_url: String,

    /// Mime types accepted in addition to the built-in table.
    #[serde(default)]
    pub extra_supported_mimes: Vec<String>,

    /// How long shutdown waits for in-flight deliveries, in seconds.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

impl Default for ForwardingConfig {
    fn default() -> Self {
        Self {
            album_debounce_ms: default_album_debounce_ms(),
            max_text_len: default_max_text_len(),
            max_caption_len: default_max_caption_len(),
            link_base_url: default_link_base_url(),
            extra_supported_mimes: Vec::new(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

impl ForwardingConfig {
    /// Album debounce as a [`Duration`].
    pub fn album_debounce(&self) -> Duration {
        Duration::from_millis(self.album_debounce_ms)
    }

    /// Shutdown drain bound as a [`Duration`].
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Sink size limits.
    pub fn limits(&self) -> SinkLimits {
        SinkLimits {
            max_text_len: self.max_text_len,
            max_caption_len: self.max_caption_len,
        }
    }

    /// Built-in mime table extended with the configured extras.
    pub fn supported_mimes(&self) -> SupportedMimes {
        SupportedMimes::with_extra(&self.extra_supported_mimes)
    }
}

/// Contents of a standalone filters file.
#[derive(Debug, Deserialize)]
struct FiltersFile {
    #[serde(default)]
    filters: Vec<FilterRule>,
}

// Default value functions for serde

fn default_bot_token_env() -> String {
    "TELEGRAM_BOT_TOKEN".to_owned()
}
fn default_whatsapp_token_env() -> String {
    "WHATSAPP_TOKEN".to_owned()
}
fn default_api_base() -> String {
    crate::whatsapp::DEFAULT_API_BASE.to_owned()
}
fn default_request_timeout_secs() -> u64 {
    60
}
fn default_llm_api_key_env() -> String {
    "LLM_API_KEY".to_owned()
}
fn default_llm_base_url() -> String {
    crate::providers::openai::OPENAI_API_BASE.to_owned()
}
fn default_album_debounce_ms() -> u64 {
    500
}
fn default_max_text_len() -> usize {
    crate::whatsapp::MAX_TEXT_LEN
}
fn default_max_caption_len() -> usize {
    crate::whatsapp::MAX_CAPTION_LEN
}
fn default_shutdown_timeout_secs() -> u64 {
    crate::service::DEFAULT_SHUTDOWN_TIMEOUT.as_secs()
}
fn default_link_base_url() -> String {
    crate::routing::format::TELEGRAM_LINK_BASE.to_owned()
}

impl Config {
    /// Parse a config from TOML text. `filters_file` is not read.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid TOML of the expected shape.
    pub fn from_toml(toml_str: &str) -> anyhow::Result<Self> {
        let mut config: Self = toml::from_str(toml_str).context("failed to parse config TOML")?;
        config.normalize_filters();
        Ok(config)
    }

    /// Check limits, channels and filter rules.
    ///
    /// Filters without an `[llm]` section are allowed (they are inert) but
    /// logged as a warning.
    ///
    /// # Errors
    ///
    /// Returns the first violation found.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.forwarding.max_text_len == 0 {
            bail!("forwarding.max_text_len must be positive");
        }
        if self.forwarding.max_caption_len == 0 {
            bail!("forwarding.max_caption_len must be positive");
        }
        if self.whatsapp.request_timeout_secs == 0 {
            bail!("whatsapp.request_timeout_secs must be positive");
        }
        if self.telegram.channels.iter().all(|c| c.trim().is_empty()) {
            bail!("telegram.channels must list at least one channel");
        }
        if self.whatsapp.phone_number_id.trim().is_empty() {
            bail!("whatsapp.phone_number_id must not be empty");
        }
        if self.whatsapp.recipient.trim().is_empty() {
            bail!("whatsapp.recipient must not be empty");
        }
        check_url("whatsapp.api_base", &self.whatsapp.api_base)?;
        check_url("forwarding.link_base_url", &self.forwarding.link_base_url)?;
        if let Some(llm) = &self.llm {
            check_url("llm.base_url", &llm.base_url)?;
            if llm.model.trim().is_empty() {
                bail!("llm.model must not be empty");
            }
        }

        let mut seen = HashSet::new();
        for rule in &self.filters {
            if rule.name.is_empty() {
                bail!("filter rule names must not be empty");
            }
            if rule.prompt.is_empty() {
                bail!("filter rule '{}' has an empty prompt", rule.name);
            }
            if !seen.insert(rule.name.as_str()) {
                bail!("duplicate filter rule name '{}'", rule.name);
            }
        }

        if !self.filters.is_empty() && self.llm.is_none() {
            warn!(
                rules = self.filters.len(),
                "filters configured without [llm] section; filtering is disabled"
            );
        }
        Ok(())
    }

    /// Whether content filtering will run.
    pub fn filtering_enabled(&self) -> bool {
        self.llm.is_some() && !self.filters.is_empty()
    }

    fn normalize_filters(&mut self) {
        for rule in &mut self.filters {
            rule.name = rule.name.trim().to_owned();
            rule.prompt = rule.prompt.trim().to_owned();
        }
    }

    fn append_filters_file(&mut self, config_path: &Path) -> anyhow::Result<()> {
        let Some(file) = &self.filters_file else {
            return Ok(());
        };
        let path = match config_path.parent() {
            Some(dir) if file.is_relative() => dir.join(file),
            _ => file.clone(),
        };
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read filters file at {}", path.display()))?;
        let extra: FiltersFile = toml::from_str(&contents)
            .with_context(|| format!("failed to parse filters file at {}", path.display()))?;
        self.filters.extend(extra.filters);
        self.normalize_filters();
        Ok(())
    }
}

fn check_url(field: &str, value: &str) -> anyhow::Result<()> {
    let parsed = url::Url::parse(value).with_context(|| format!("{field} is not a valid URL"))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        bail!("{field} must be an http(s) URL");
    }
    Ok(())
}

/// Load the config from a TOML file, including its `filters_file`.
///
/// # Errors
///
/// Returns an error if either file cannot be read or parsed.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read config at {}: {e}", path.display()))?;
    let mut config: Config = toml::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("failed to parse config at {}: {e}", path.display()))?;
    config.normalize_filters();
    config.append_filters_file(path)?;
    Ok(config)
}

/// Resolve the config path: explicit flag, then `$CHANNEL_RELAY_CONFIG`,
/// then `~/.channel-relay/config.toml`.
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn resolve_config_path(explicit: Option<&Path>) -> anyhow::Result<PathBuf> {
    resolve_config_path_with(explicit, |key| std::env::var(key).ok())
}

/// [`resolve_config_path`] with a custom env resolver (for testing).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn resolve_config_path_with(
    explicit: Option<&Path>,
    env: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    if let Some(path) = env(CONFIG_PATH_ENV).filter(|p| !p.trim().is_empty()) {
        return Ok(PathBuf::from(path));
    }
    Ok(config_dir()?.join("config.toml"))
}

/// Resolve the default config directory (`~/.channel-relay/`).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn config_dir() -> anyhow::Result<PathBuf> {
    let home = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.home_dir().join(".channel-relay"))
}

/// Read a secret from the environment variable named by the config.
///
/// # Errors
///
/// Returns an error if the variable is unset or blank.
pub fn secret_from_env(var: &str) -> anyhow::Result<String> {
    secret_with(var, |key| std::env::var(key).ok())
}

/// [`secret_from_env`] with a custom env resolver (for testing).
///
/// # Errors
///
/// Returns an error if the variable is unset or blank.
pub fn secret_with(var: &str, env: impl Fn(&str) -> Option<String>) -> anyhow::Result<String> {
    match env(var) {
        Some(value) if !value.trim().is_empty() => Ok(value.trim().to_owned()),
        _ => bail!("environment variable {var} is not set"),
    }
}
