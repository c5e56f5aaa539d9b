//! Session state and lifecycle.
//!
//! One session per chat thread: metadata under a sync lock for quick
//! reads, the message manager behind an async mutex (single writer), and
//! the assistant child process. Background tasks feed the session loop
//! through [`SessionSignal`]s.

pub mod manager;
pub mod monitor;
pub mod persist;
pub mod registry;
pub mod worktree;

use crate::assistant::process::AssistantProcess;
use crate::assistant::{AssistantCommand, AssistantEvent};
use crate::message::ops::FlushReason;
use crate::message::MessageManager;
use crate::{PostId, SessionKey};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Lifecycle states of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionLifecycle {
    Starting,
    Active,
    Idle,
    Paused,
    Interrupted,
    Ending,
    Ended,
}

impl SessionLifecycle {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionLifecycle::Starting => "starting",
            SessionLifecycle::Active => "active",
            SessionLifecycle::Idle => "idle",
            SessionLifecycle::Paused => "paused",
            SessionLifecycle::Interrupted => "interrupted",
            SessionLifecycle::Ending => "ending",
            SessionLifecycle::Ended => "ended",
        }
    }

    /// Whether the session still has a live child process.
    pub fn is_running(self) -> bool {
        matches!(
            self,
            SessionLifecycle::Starting
                | SessionLifecycle::Active
                | SessionLifecycle::Idle
                | SessionLifecycle::Interrupted
        )
    }
}

impl std::fmt::Display for SessionLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Signals delivered to a session's event loop by its timer tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionSignal {
    FlushContent(FlushReason),
    SubagentTick,
    ContextPromptTimeout,
}

/// Inputs multiplexed into a session's pump loop alongside signals.
#[derive(Debug)]
pub enum PumpInput {
    Assistant(AssistantEvent),
    ChildClosed,
}

/// An attached git worktree, treated as an opaque path + branch pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorktreeInfo {
    pub repo_root: PathBuf,
    pub path: PathBuf,
    pub branch: String,
    /// Whether this session created the worktree.
    pub is_owner: bool,
}

/// Mutable session metadata. Owner membership in `allowed_users` is an
/// invariant maintained by the mutators below.
#[derive(Debug, Clone)]
pub struct SessionMeta {
    /// Unique id for this in-memory incarnation, used in log correlation.
    pub run_id: uuid::Uuid,
    pub owner: String,
    pub owner_display: String,
    pub allowed_users: HashSet<String>,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub last_activity_at: chrono::DateTime<chrono::Utc>,
    pub lifecycle: SessionLifecycle,
    pub working_dir: PathBuf,
    pub worktree: Option<WorktreeInfo>,
    pub skip_permissions: bool,
    pub force_interactive: bool,
    pub session_start_post_id: Option<PostId>,
    /// Status post for pause/timeout/shutdown, updated in place on resume.
    pub lifecycle_post_id: Option<PostId>,
    pub session_number: u64,
    pub message_count: u64,
    pub title: Option<String>,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub pull_request_url: Option<String>,
    pub last_error: Option<String>,
    pub resume_fail_count: u32,
    pub queued_prompt: Option<String>,
    pub queued_files: Vec<String>,
    pub first_prompt: Option<String>,
    pub pending_worktree_prompt: bool,
    pub worktree_prompt_disabled: bool,
    pub needs_context_prompt: bool,
    /// Server-side assistant session id, used for `--resume`.
    pub claude_session_id: Option<String>,
    pub timeout_warning_posted: bool,
    pub plan_approved: bool,
    /// Slash commands announced by the assistant init event.
    pub dynamic_commands: Vec<String>,
}

impl SessionMeta {
    pub fn new(owner: &str, owner_display: &str, working_dir: PathBuf) -> Self {
        let now = chrono::Utc::now();
        Self {
            run_id: uuid::Uuid::new_v4(),
            owner: owner.to_string(),
            owner_display: owner_display.to_string(),
            allowed_users: HashSet::from([owner.to_string()]),
            started_at: now,
            last_activity_at: now,
            lifecycle: SessionLifecycle::Starting,
            working_dir,
            worktree: None,
            skip_permissions: false,
            force_interactive: false,
            session_start_post_id: None,
            lifecycle_post_id: None,
            session_number: 0,
            message_count: 0,
            title: None,
            description: None,
            tags: Vec::new(),
            pull_request_url: None,
            last_error: None,
            resume_fail_count: 0,
            queued_prompt: None,
            queued_files: Vec::new(),
            first_prompt: None,
            pending_worktree_prompt: false,
            worktree_prompt_disabled: false,
            needs_context_prompt: false,
            claude_session_id: None,
            timeout_warning_posted: false,
            plan_approved: false,
            dynamic_commands: Vec::new(),
        }
    }

    pub fn is_allowed(&self, username: &str) -> bool {
        self.allowed_users.contains(username)
    }

    pub fn invite(&mut self, username: &str) {
        self.allowed_users.insert(username.to_string());
    }

    /// Remove a user. The owner cannot be kicked.
    pub fn kick(&mut self, username: &str) -> bool {
        if username == self.owner {
            return false;
        }
        self.allowed_users.remove(username)
    }
}

/// A live session: one thread, one assistant child process.
pub struct Session {
    pub key: SessionKey,
    pub meta: RwLock<SessionMeta>,
    pub messages: tokio::sync::Mutex<MessageManager>,
    pub child: tokio::sync::Mutex<Option<AssistantProcess>>,
    pub signal_tx: mpsc::Sender<SessionSignal>,
    /// Child-event forwarders send here; the pump loop drains it.
    pub pump_tx: Mutex<Option<mpsc::Sender<PumpInput>>>,
    /// Taken by the pump loop when it starts.
    pub pump_rx: Mutex<Option<mpsc::Receiver<PumpInput>>>,
    /// Pump loop and timers, aborted on teardown.
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Session {
    pub fn new(
        key: SessionKey,
        meta: SessionMeta,
        messages: MessageManager,
        signal_tx: mpsc::Sender<SessionSignal>,
    ) -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self {
            key,
            meta: RwLock::new(meta),
            messages: tokio::sync::Mutex::new(messages),
            child: tokio::sync::Mutex::new(None),
            signal_tx,
            pump_tx: Mutex::new(None),
            pump_rx: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn lifecycle(&self) -> SessionLifecycle {
        self.meta.read().unwrap().lifecycle
    }

    pub fn set_lifecycle(&self, lifecycle: SessionLifecycle) {
        self.meta.write().unwrap().lifecycle = lifecycle;
    }

    /// Record activity and return to active from idle.
    pub fn touch(&self) {
        let mut meta = self.meta.write().unwrap();
        meta.last_activity_at = chrono::Utc::now();
        meta.timeout_warning_posted = false;
        if meta.lifecycle == SessionLifecycle::Idle {
            meta.lifecycle = SessionLifecycle::Active;
        }
    }

    pub fn is_allowed(&self, username: &str) -> bool {
        self.meta.read().unwrap().is_allowed(username)
    }

    pub fn owner(&self) -> String {
        self.meta.read().unwrap().owner.clone()
    }

    /// Register a background task for teardown.
    pub fn track_task(&self, handle: JoinHandle<()>) {
        self.tasks.lock().unwrap().push(handle);
    }

    pub fn abort_tasks(&self) {
        for handle in self.tasks.lock().unwrap().drain(..) {
            handle.abort();
        }
    }

    /// Write a command to the assistant child.
    pub async fn send(&self, command: &AssistantCommand) -> crate::Result<()> {
        let mut child = self.child.lock().await;
        match child.as_mut() {
            Some(process) => process.send(command).await,
            None => Err(crate::error::AssistantError::StdinClosed.into()),
        }
    }

    /// Interrupt the current assistant turn (SIGINT).
    pub async fn interrupt_child(&self) {
        if let Some(process) = self.child.lock().await.as_ref() {
            process.interrupt();
        }
    }

    /// Terminate the assistant child, if any.
    pub async fn kill_child(&self) {
        if let Some(mut process) = self.child.lock().await.take() {
            process.kill().await;
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        for handle in self.tasks.lock().unwrap().drain(..) {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{SessionLifecycle, SessionMeta};
    use std::path::PathBuf;

    #[test]
    fn owner_is_always_allowed() {
        let mut meta = SessionMeta::new("admin", "Admin", PathBuf::from("/tmp"));
        assert!(meta.is_allowed("admin"));
        assert!(!meta.kick("admin"));
        assert!(meta.is_allowed("admin"));

        meta.invite("guest");
        assert!(meta.is_allowed("guest"));
        assert!(meta.kick("guest"));
        assert!(!meta.is_allowed("guest"));
    }

    #[test]
    fn running_states() {
        assert!(SessionLifecycle::Active.is_running());
        assert!(SessionLifecycle::Interrupted.is_running());
        assert!(!SessionLifecycle::Paused.is_running());
        assert!(!SessionLifecycle::Ended.is_running());
    }
}
