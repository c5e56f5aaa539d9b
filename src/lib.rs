//! Threadbot: a chat-thread orchestrator for an external assistant CLI.
//!
//! Each conversation thread on a chat platform maps to one assistant
//! session: a long-lived child process streaming structured events while
//! users post messages, add emoji reactions, and issue `!commands`.

pub mod assistant;
pub mod commands;
pub mod config;
pub mod error;
pub mod message;
pub mod platform;
pub mod session;

pub use error::{Error, Result};

use serde::{Deserialize, Serialize};

/// Platform post identifier type.
pub type PostId = String;

/// Conversation thread identifier type.
pub type ThreadId = String;

/// Composite session identifier: one session per `(platform, thread)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub platform_id: String,
    pub thread_id: ThreadId,
}

impl SessionKey {
    pub fn new(platform_id: impl Into<String>, thread_id: impl Into<String>) -> Self {
        Self {
            platform_id: platform_id.into(),
            thread_id: thread_id.into(),
        }
    }

    /// Composite id used as the persistence key.
    pub fn composite(&self) -> String {
        format!("{}:{}", self.platform_id, self.thread_id)
    }

    /// Parse a composite id back into a key. Thread ids may themselves
    /// contain `:`, so only the first separator is significant.
    pub fn from_composite(composite: &str) -> Option<Self> {
        let (platform_id, thread_id) = composite.split_once(':')?;
        Some(Self::new(platform_id, thread_id))
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.platform_id, self.thread_id)
    }
}

/// Whether a reaction was added to or removed from a post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReactionAction {
    Added,
    Removed,
}

/// A reaction event as delivered by a platform adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactionEvent {
    pub post_id: PostId,
    /// Raw emoji name or glyph as the platform reported it.
    pub emoji: String,
    pub username: String,
    pub action: ReactionAction,
}

/// Status of a single task-list item.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(TaskStatus::Pending),
            "in_progress" => Some(TaskStatus::InProgress),
            "completed" => Some(TaskStatus::Completed),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One item of the assistant's task list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskItem {
    pub content: String,
    pub status: TaskStatus,
    /// Present-tense form shown while the task is in progress.
    #[serde(default)]
    pub active_form: Option<String>,
}

/// A multiple-choice question from the assistant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Question {
    #[serde(default)]
    pub header: String,
    pub question: String,
    pub options: Vec<String>,
}

/// What kind of approval the assistant is asking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalKind {
    Plan,
    Action,
}

/// Outcome of a message-approval prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageApprovalDecision {
    /// Deliver this one message.
    Allow,
    /// Deliver the message and add the sender to the allowed users.
    Invite,
    Deny,
}

/// A compact model/usage status snapshot from the assistant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusInfo {
    pub model: String,
    #[serde(default)]
    pub tokens: u64,
    #[serde(default)]
    pub cost_usd: f64,
    /// Percentage of the context window in use, when reported.
    #[serde(default)]
    pub context_pct: Option<u8>,
}

/// A bug report assembled from a failing thread.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BugReport {
    pub title: String,
    pub body: String,
    pub user_description: String,
    #[serde(default)]
    pub image_urls: Vec<String>,
    #[serde(default)]
    pub image_errors: Vec<String>,
    /// Post id of the failing post the report references, if any.
    #[serde(default)]
    pub error_context: Option<String>,
}

/// Completion events emitted by executors and consumed by the session
/// manager. Every interactive flow finishes by publishing one of these.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    QuestionComplete {
        key: SessionKey,
        tool_use_id: String,
        answers: Vec<String>,
    },
    ApprovalComplete {
        key: SessionKey,
        tool_use_id: String,
        kind: ApprovalKind,
        approved: bool,
    },
    MessageApprovalComplete {
        key: SessionKey,
        decision: MessageApprovalDecision,
        from_user: String,
        original_message: String,
    },
    ContextPromptComplete {
        key: SessionKey,
        /// Number of prior thread messages to include as context.
        messages: usize,
        queued_prompt: String,
        queued_files: Vec<String>,
    },
    WorktreePromptComplete {
        key: SessionKey,
        join: bool,
    },
    UpdatePromptComplete {
        key: SessionKey,
        update_now: bool,
    },
    BugReportComplete {
        key: SessionKey,
        approved: bool,
        report: BugReport,
    },
}

impl SessionEvent {
    /// The session this event belongs to.
    pub fn key(&self) -> &SessionKey {
        match self {
            SessionEvent::QuestionComplete { key, .. }
            | SessionEvent::ApprovalComplete { key, .. }
            | SessionEvent::MessageApprovalComplete { key, .. }
            | SessionEvent::ContextPromptComplete { key, .. }
            | SessionEvent::WorktreePromptComplete { key, .. }
            | SessionEvent::UpdatePromptComplete { key, .. }
            | SessionEvent::BugReportComplete { key, .. } => key,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::SessionKey;

    #[test]
    fn composite_round_trips_thread_ids_containing_separators() {
        let key = SessionKey::new("mattermost", "abc:def");
        let parsed = SessionKey::from_composite(&key.composite()).unwrap();
        assert_eq!(parsed, key);
    }
}
