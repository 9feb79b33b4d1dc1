//! Configuration for the assistant core.
//!
//! Maps directly to `chunk.toml`. Every section and field has a default, so
//! an empty file is a valid configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::rate_limit::ActionCategory;

/// Top-level configuration, loadable from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkConfig {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,
    /// Per-category rate limits.
    #[serde(default)]
    pub rate_limits: RateLimitConfig,
    /// Fact extraction settings.
    #[serde(default)]
    pub extraction: ExtractionConfig,
    /// Profile merge policy.
    #[serde(default)]
    pub merge: MergeConfig,
    /// Guessing game settings.
    #[serde(default)]
    pub game: GameConfig,
    /// Persistence backend settings.
    #[serde(default)]
    pub persistence: PersistenceConfig,
    /// Language model settings.
    #[serde(default)]
    pub llm: LlmConfig,
    /// Outbound model call throttle.
    #[serde(default)]
    pub throttle: ThrottleConfig,
}

impl ChunkConfig {
    /// Load configuration from a TOML string.
    ///
    /// # Errors
    /// Returns `ChunkError::Config` if the TOML is invalid.
    pub fn from_toml(toml_str: &str) -> crate::error::Result<Self> {
        toml::from_str(toml_str).map_err(|e| crate::ChunkError::Config(e.to_string()))
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// General settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Emit logs as JSON lines.
    #[serde(default)]
    pub json_logs: bool,
    /// Prefix that marks a message as a command.
    #[serde(default = "default_prefix")]
    pub command_prefix: String,
    /// How often expired rate windows are swept, in seconds.
    #[serde(default = "default_3600")]
    pub sweep_interval_secs: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            command_prefix: "/".to_string(),
            sweep_interval_secs: 3600,
        }
    }
}

/// Calls allowed within a trailing window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowLimit {
    /// Maximum admitted calls per window.
    pub max_calls: u32,
    /// Window length in seconds.
    pub window_secs: u64,
}

impl WindowLimit {
    /// Create a limit.
    #[must_use]
    pub const fn new(max_calls: u32, window_secs: u64) -> Self {
        Self {
            max_calls,
            window_secs,
        }
    }

    /// Window length as a `Duration`.
    #[must_use]
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Per-category rate limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Plain messages sent for fact extraction.
    #[serde(default = "default_chat_limit")]
    pub chat: WindowLimit,
    /// `game`, `guess`, `end`.
    #[serde(default = "default_game_limit")]
    pub game: WindowLimit,
    /// Informational commands.
    #[serde(default = "default_info_limit")]
    pub info: WindowLimit,
    /// `forget`.
    #[serde(default = "default_forget_limit")]
    pub forget: WindowLimit,
    /// `mydata`.
    #[serde(default = "default_mydata_limit")]
    pub mydata: WindowLimit,
    /// Anything else.
    #[serde(default = "default_fallback_limit")]
    pub default: WindowLimit,
}

impl RateLimitConfig {
    /// The limit that applies to a category.
    #[must_use]
    pub fn limit_for(&self, category: ActionCategory) -> WindowLimit {
        match category {
            ActionCategory::Chat => self.chat,
            ActionCategory::Game => self.game,
            ActionCategory::Info => self.info,
            ActionCategory::Forget => self.forget,
            ActionCategory::MyData => self.mydata,
            ActionCategory::Default => self.default,
        }
    }

    /// Longest window of any category.
    #[must_use]
    pub fn longest_window(&self) -> Duration {
        ActionCategory::ALL
            .iter()
            .map(|c| self.limit_for(*c).window())
            .max()
            .unwrap_or_default()
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            chat: default_chat_limit(),
            game: default_game_limit(),
            info: default_info_limit(),
            forget: default_forget_limit(),
            mydata: default_mydata_limit(),
            default: default_fallback_limit(),
        }
    }
}

/// Fact extraction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Whether plain messages are sent for extraction at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Messages with fewer words are ignored.
    #[serde(default = "default_4_usize")]
    pub min_words: usize,
    /// Candidates below this confidence are dropped.
    #[serde(default = "default_0_4")]
    pub min_confidence: f32,
    /// Confidence assumed when the model omits one.
    #[serde(default = "default_0_5")]
    pub default_confidence: f32,
    /// Longest accepted fact value.
    #[serde(default = "default_200")]
    pub max_value_chars: usize,
    /// How many stored facts are sent to the model as context.
    #[serde(default = "default_25")]
    pub max_context_facts: usize,
    /// Optional TOML file overriding the built-in extraction prompt.
    #[serde(default)]
    pub prompt_file: Option<PathBuf>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_words: 4,
            min_confidence: 0.4,
            default_confidence: 0.5,
            max_value_chars: 200,
            max_context_facts: 25,
            prompt_file: None,
        }
    }
}

/// Profile merge policy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MergeConfig {
    /// A new value replaces a stored one only when its confidence exceeds
    /// the stored confidence by more than this margin.
    #[serde(default = "default_0_1")]
    pub hysteresis_margin: f32,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            hysteresis_margin: 0.1,
        }
    }
}

/// Guessing game settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameConfig {
    /// Upper bound used when `game` is given no argument.
    #[serde(default = "default_100")]
    pub default_max_value: u32,
    /// Wrong guesses allowed before the game is lost (0 = unlimited).
    #[serde(default = "default_10")]
    pub max_attempts: u32,
    /// Only the session owner may end a game.
    #[serde(default)]
    pub owner_only_end: bool,
    /// Idle sessions older than this are aborted by the timer (0 = never).
    #[serde(default)]
    pub idle_timeout_secs: u64,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            default_max_value: 100,
            max_attempts: 10,
            owner_only_end: false,
            idle_timeout_secs: 0,
        }
    }
}

/// Persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Backend: "sqlite", "json", or "memory".
    #[serde(default = "default_sqlite")]
    pub backend: String,
    /// Database file (sqlite) or directory (json).
    #[serde(default = "default_path")]
    pub path: PathBuf,
    /// Use WAL mode for concurrent reads.
    #[serde(default = "default_true")]
    pub wal_mode: bool,
    /// Number of rotating backups to keep.
    #[serde(default = "default_3")]
    pub backup_count: u32,
    /// Detect corruption via checksums.
    #[serde(default = "default_true")]
    pub checksum_enabled: bool,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            backend: "sqlite".to_string(),
            path: PathBuf::from("user_data/chunk.db"),
            wal_mode: true,
            backup_count: 3,
            checksum_enabled: true,
        }
    }
}

/// Language model configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider: "ollama", "openai", "gemini", "none".
    #[serde(default = "default_ollama")]
    pub provider: String,
    /// Base URL for the API.
    #[serde(default = "default_ollama_url")]
    pub base_url: String,
    /// Model name.
    #[serde(default = "default_model")]
    pub model: String,
    /// API key for hosted providers.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Hard timeout for a single call in milliseconds.
    #[serde(default = "default_15000")]
    pub request_timeout_ms: u64,
    /// Retries after a transient transport failure.
    #[serde(default = "default_2")]
    pub max_retries: u32,
    /// Sampling temperature.
    #[serde(default = "default_0_2")]
    pub temperature: f32,
    /// Maximum tokens to generate.
    #[serde(default = "default_300")]
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            base_url: "http://localhost:11434".to_string(),
            model: "qwen2.5:1.5b".to_string(),
            api_key: None,
            request_timeout_ms: 15_000,
            max_retries: 2,
            temperature: 0.2,
            max_tokens: 300,
        }
    }
}

/// Process-wide throttle for outbound model calls.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Calls allowed in any trailing minute.
    #[serde(default = "default_50")]
    pub requests_per_minute: u32,
    /// Calls allowed in flight at once.
    #[serde(default = "default_5")]
    pub burst: u32,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 50,
            burst: 5,
        }
    }
}

// ---------------------------------------------------------------------------
// Serde default helpers
// ---------------------------------------------------------------------------

fn default_true() -> bool { true }
fn default_log_level() -> String { "info".to_string() }
fn default_prefix() -> String { "/".to_string() }
fn default_sqlite() -> String { "sqlite".to_string() }
fn default_path() -> PathBuf { PathBuf::from("user_data/chunk.db") }
fn default_ollama() -> String { "ollama".to_string() }
fn default_ollama_url() -> String { "http://localhost:11434".to_string() }
fn default_model() -> String { "qwen2.5:1.5b".to_string() }
fn default_chat_limit() -> WindowLimit { WindowLimit::new(50, 1800) }
fn default_game_limit() -> WindowLimit { WindowLimit::new(30, 1800) }
fn default_info_limit() -> WindowLimit { WindowLimit::new(5, 60) }
fn default_forget_limit() -> WindowLimit { WindowLimit::new(20, 3600) }
fn default_mydata_limit() -> WindowLimit { WindowLimit::new(10, 1800) }
fn default_fallback_limit() -> WindowLimit { WindowLimit::new(30, 1800) }
fn default_0_1() -> f32 { 0.1 }
fn default_0_2() -> f32 { 0.2 }
fn default_0_4() -> f32 { 0.4 }
fn default_0_5() -> f32 { 0.5 }
fn default_2() -> u32 { 2 }
fn default_3() -> u32 { 3 }
fn default_4_usize() -> usize { 4 }
fn default_5() -> u32 { 5 }
fn default_10() -> u32 { 10 }
fn default_25() -> usize { 25 }
fn default_50() -> u32 { 50 }
fn default_100() -> u32 { 100 }
fn default_200() -> usize { 200 }
fn default_300() -> u32 { 300 }
fn default_3600() -> u64 { 3600 }
fn default_15000() -> u64 { 15_000 }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_gives_defaults() {
        let config = ChunkConfig::from_toml("").expect("empty config parses");
        assert_eq!(config.rate_limits.chat, WindowLimit::new(50, 1800));
        assert_eq!(config.game.max_attempts, 10);
        assert_eq!(config.persistence.backend, "sqlite");
        assert_eq!(config.general.command_prefix, "/");
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let config = ChunkConfig::from_toml(
            r#"
            [rate_limits]
            game = { max_calls = 3, window_secs = 10 }

            [merge]
            hysteresis_margin = 0.25
            "#,
        )
        .expect("parses");
        assert_eq!(config.rate_limits.game, WindowLimit::new(3, 10));
        assert_eq!(config.rate_limits.forget, WindowLimit::new(20, 3600));
        assert!((config.merge.hysteresis_margin - 0.25).abs() < f32::EPSILON);
    }

    #[test]
    fn invalid_toml_is_config_error() {
        let err = ChunkConfig::from_toml("[game\nmax_attempts = ").expect_err("should fail");
        assert!(matches!(err, crate::ChunkError::Config(_)));
    }

    #[test]
    fn longest_window_spans_categories() {
        let config = RateLimitConfig::default();
        assert_eq!(config.longest_window(), Duration::from_secs(3600));
    }
}
