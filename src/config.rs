//! Configuration loading and validation.

use crate::error::{ConfigError, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Threadbot configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data directory path (session store, logs).
    pub data_dir: PathBuf,

    /// Assistant CLI subprocess settings.
    pub assistant: AssistantConfig,

    /// Content streaming behavior.
    pub streaming: StreamingConfig,

    /// Session lifecycle settings.
    pub session: SessionConfig,

    /// Background cleanup settings.
    pub cleanup: CleanupConfig,

    /// Sticky channel-summary message settings.
    pub sticky: StickyConfig,

    /// Auto-update coordination settings.
    pub update: UpdateConfig,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .map(|d| d.join("threadbot"))
            .unwrap_or_else(|| PathBuf::from("./data"));
        Self {
            data_dir,
            assistant: AssistantConfig::default(),
            streaming: StreamingConfig::default(),
            session: SessionConfig::default(),
            cleanup: CleanupConfig::default(),
            sticky: StickyConfig::default(),
            update: UpdateConfig::default(),
        }
    }
}

/// Assistant CLI subprocess configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    /// Command to launch the assistant CLI.
    pub command: String,

    /// Extra arguments appended to every launch.
    pub args: Vec<String>,

    /// Environment variables set on the child process.
    pub env: HashMap<String, String>,

    /// Slash commands known up front, before the init event announces more.
    pub known_slash_commands: Vec<String>,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            command: "claude".to_string(),
            args: Vec::new(),
            env: HashMap::new(),
            known_slash_commands: vec![
                "context".to_string(),
                "cost".to_string(),
                "compact".to_string(),
            ],
        }
    }
}

/// Content streaming configuration.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Debounce window for batching appended content into one flush.
    pub flush_debounce_ms: u64,

    /// Per-call timeout for platform API requests.
    pub platform_call_timeout_ms: u64,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            flush_debounce_ms: 200,
            platform_call_timeout_ms: 15_000,
        }
    }
}

/// Session lifecycle configuration.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Maximum concurrent sessions across all platforms.
    pub max_sessions: usize,

    /// Idle seconds before a one-time timeout warning is posted.
    pub idle_warning_secs: u64,

    /// Idle seconds before the session is paused and persisted.
    pub idle_timeout_secs: u64,

    /// Interval between monitor sweeps.
    pub monitor_interval_secs: u64,

    /// Seconds before a pending context prompt resolves itself.
    pub context_prompt_timeout_secs: u64,

    /// Consecutive resume failures before the persisted session is dropped.
    pub max_resume_failures: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_sessions: 20,
            idle_warning_secs: 25 * 60,
            idle_timeout_secs: 30 * 60,
            monitor_interval_secs: 60,
            context_prompt_timeout_secs: 120,
            max_resume_failures: 3,
        }
    }
}

/// Background cleanup configuration.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    /// Interval between cleanup sweeps.
    pub interval_minutes: u64,

    /// Days soft-deleted session history is kept.
    pub history_days: u64,

    /// Age past which an unreferenced worktree is garbage-collected.
    pub max_worktree_age_hours: u64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            interval_minutes: 60,
            history_days: 30,
            max_worktree_age_hours: 72,
        }
    }
}

/// Sticky channel-summary configuration.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct StickyConfig {
    pub enabled: bool,

    /// Minimum seconds between updates of one channel's sticky post.
    pub min_update_interval_secs: u64,
}

impl Default for StickyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_update_interval_secs: 30,
        }
    }
}

/// Auto-update coordination configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UpdateConfig {
    /// Seconds before a deferred update prompt is re-asked.
    pub defer_retry_secs: u64,

    /// Seconds an unanswered update prompt waits before forcing the update.
    pub prompt_timeout_secs: u64,

    /// Release notes text posted by `!release-notes`.
    pub release_notes: Option<String>,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            defer_retry_secs: 3600,
            prompt_timeout_secs: 300,
            release_notes: None,
        }
    }
}

impl Config {
    /// Load configuration: defaults, then the TOML file (if present), then
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_path = Self::default().data_dir.join("threadbot.toml");
                if default_path.exists() {
                    Self::from_file(&default_path)?
                } else {
                    Self::default()
                }
            }
        };

        if let Ok(dir) = std::env::var("THREADBOT_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Ok(command) = std::env::var("THREADBOT_ASSISTANT_COMMAND") {
            config.assistant.command = command;
        }

        config.validate()?;

        std::fs::create_dir_all(&config.data_dir).map_err(|source| ConfigError::Load {
            path: config.data_dir.display().to_string(),
            source,
        })?;

        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Load {
            path: path.display().to_string(),
            source,
        })?;
        let config = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.assistant.command.trim().is_empty() {
            return Err(ConfigError::Invalid("assistant.command is empty".into()).into());
        }
        if self.session.idle_warning_secs >= self.session.idle_timeout_secs {
            return Err(ConfigError::Invalid(
                "session.idle_warning_secs must be below idle_timeout_secs".into(),
            )
            .into());
        }
        if !(100..=500).contains(&self.streaming.flush_debounce_ms) {
            return Err(ConfigError::Invalid(
                "streaming.flush_debounce_ms must be within 100..=500".into(),
            )
            .into());
        }
        Ok(())
    }

    /// Path of the redb session store.
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join("sessions.redb")
    }

    /// Log directory for file-based tracing output.
    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}

#[cfg(test)]
mod tests {
    use super::Config;
    use indoc::indoc;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_warning_at_or_past_timeout() {
        let mut config = Config::default();
        config.session.idle_warning_secs = config.session.idle_timeout_secs;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_debounce_outside_band() {
        let mut config = Config::default();
        config.streaming.flush_debounce_ms = 50;
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_partial_toml() {
        let raw = indoc! {r#"
            [session]
            max_sessions = 3

            [streaming]
            flush_debounce_ms = 150
        "#};
        let config: Config = toml::from_str(raw).unwrap();
        assert_eq!(config.session.max_sessions, 3);
        assert_eq!(config.streaming.flush_debounce_ms, 150);
        assert_eq!(config.cleanup.interval_minutes, 60);
    }
}
