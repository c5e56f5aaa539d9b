//! Top-level error types for threadbot.

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error enum wrapping domain-specific errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Assistant(#[from] AssistantError),

    #[error(transparent)]
    Persist(#[from] PersistError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load config from {path}: {source}")]
    Load {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config from {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Chat platform API errors.
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("post {post_id} not found")]
    PostNotFound { post_id: String },

    #[error("platform request failed: {0}")]
    Request(String),

    #[error("platform request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("platform {0} is not connected")]
    Disconnected(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PlatformError {
    /// Whether this failure means the target post no longer exists.
    pub fn is_not_found(&self) -> bool {
        matches!(self, PlatformError::PostNotFound { .. })
    }
}

/// Session lifecycle and authorization errors.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("no session for thread {thread_id}")]
    NotFound { thread_id: String },

    #[error("maximum of {max} concurrent sessions reached")]
    MaxSessions { max: usize },

    #[error("user {username} is not allowed")]
    NotAllowed { username: String },

    #[error("a session already exists for thread {thread_id}")]
    AlreadyActive { thread_id: String },

    #[error("worktree {path} is still referenced by {count} session(s)")]
    WorktreeInUse { path: String, count: usize },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Assistant subprocess errors.
#[derive(Debug, thiserror::Error)]
pub enum AssistantError {
    #[error("failed to spawn assistant command '{command}': {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error("assistant exited unexpectedly{}", status.map(|s| format!(" with status {s}")).unwrap_or_default())]
    Exited { status: Option<i32> },

    #[error("assistant stdin is closed")]
    StdinClosed,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Persistence layer errors.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("failed to open session store: {0}")]
    Open(String),

    #[error("storage error: {0}")]
    Storage(#[from] redb::Error),

    #[error("failed to encode session record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
