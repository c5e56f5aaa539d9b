//! Per-session message manager and its executors.
//!
//! The manager converts raw assistant events into operations, dispatches
//! them to executors, and routes reactions through a fixed chain of
//! responsibility. Executors never let transient platform failures escape
//! this module; they recover locally and log.

pub mod approval;
pub mod breaker;
pub mod bugreport;
pub mod content;
pub mod interactive;
pub mod ops;
pub mod prompt;
pub mod subagent;
pub mod system;
pub mod tasklist;
pub mod tracker;

use crate::assistant::AssistantEvent;
use crate::error::{PlatformError, Result};
use crate::message::ops::{FlushReason, Operation, SystemLevel, TaskListAction};
use crate::message::prompt::{ContextSelection, PendingContextPrompt};
use crate::message::tracker::{PostMeta, PostRole, PostTracker};
use crate::platform::emoji::EmojiKind;
use crate::platform::format::Formatter;
use crate::platform::{MessageLimits, PlatformDyn, Post};
use crate::session::registry::PostIndex;
use crate::session::SessionSignal;
use crate::{ApprovalKind, BugReport, PostId, ReactionAction, SessionEvent, SessionKey, StatusInfo};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

/// Everything an executor needs to act on its session: identity, the
/// platform handle, post bookkeeping, the event bus, and timer plumbing.
#[derive(Clone)]
pub struct ExecutorContext {
    pub key: SessionKey,
    pub platform: Arc<dyn PlatformDyn>,
    pub tracker: PostTracker,
    pub post_index: Arc<PostIndex>,
    pub events: broadcast::Sender<SessionEvent>,
    pub signals: mpsc::Sender<SessionSignal>,
    pub debounce: Duration,
    pub call_timeout: Duration,
}

impl ExecutorContext {
    pub fn thread_id(&self) -> &str {
        &self.key.thread_id
    }

    pub fn formatter(&self) -> Arc<dyn Formatter> {
        self.platform.formatter()
    }

    pub fn limits(&self) -> MessageLimits {
        self.platform.message_limits()
    }

    /// Track a post in both the per-session tracker and the global
    /// reaction-routing index.
    pub fn register_post(&self, post_id: &str, meta: PostMeta) {
        self.tracker.register(post_id, meta);
        self.post_index.register(post_id, self.key.clone());
    }

    pub fn unregister_post(&self, post_id: &str) {
        self.tracker.unregister(post_id);
        self.post_index.unregister(post_id);
    }

    /// Publish a completion event; delivery is best-effort (no subscriber
    /// during tests is fine).
    pub fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    pub async fn create_post(&self, content: &str) -> Result<Post> {
        self.timed(self.platform.create_post(&self.key.thread_id, content))
            .await
    }

    pub async fn update_post(&self, post_id: &str, content: &str) -> Result<Post> {
        self.timed(self.platform.update_post(post_id, content)).await
    }

    pub async fn delete_post(&self, post_id: &str) -> Result<()> {
        self.timed(self.platform.delete_post(post_id)).await
    }

    pub async fn create_interactive_post(
        &self,
        content: &str,
        reactions: &[String],
    ) -> Result<Post> {
        self.timed(
            self.platform
                .create_interactive_post(&self.key.thread_id, content, reactions),
        )
        .await
    }

    /// Best-effort pin; failures are logged and ignored.
    pub async fn pin_post(&self, post_id: &str) {
        if let Err(error) = self.timed(self.platform.pin_post(post_id)).await {
            tracing::debug!(%error, post_id, "pin failed");
        }
    }

    /// Best-effort unpin; failures are logged and ignored.
    pub async fn unpin_post(&self, post_id: &str) {
        if let Err(error) = self.timed(self.platform.unpin_post(post_id)).await {
            tracing::debug!(%error, post_id, "unpin failed");
        }
    }

    /// Per-call timeout: a hung platform call counts as a failure for the
    /// executor recovery policies.
    async fn timed<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.call_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(PlatformError::Timeout {
                timeout_ms: self.call_timeout.as_millis() as u64,
            }
            .into()),
        }
    }
}

/// Persistable slice of the manager's executor states.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManagerSnapshot {
    pub tasks_post_id: Option<PostId>,
    pub last_tasks_content: String,
    pub tasks_completed: bool,
    pub tasks_minimized: bool,
    pub pending_context_prompt: Option<PendingContextPrompt>,
}

/// Per-session façade coordinating the executor family.
pub struct MessageManager {
    ctx: ExecutorContext,
    content: content::ContentExecutor,
    tasklist: tasklist::TaskListExecutor,
    interactive: interactive::InteractiveExecutor,
    message_approval: approval::MessageApprovalExecutor,
    prompt: prompt::PromptExecutor,
    subagent: subagent::SubagentExecutor,
    bugreport: bugreport::BugReportExecutor,
    system: system::SystemExecutor,
    status_post_id: Option<PostId>,
    last_error_post_id: Option<PostId>,
}

impl MessageManager {
    pub fn new(ctx: ExecutorContext) -> Self {
        Self {
            content: content::ContentExecutor::new(ctx.clone()),
            tasklist: tasklist::TaskListExecutor::new(ctx.clone()),
            interactive: interactive::InteractiveExecutor::new(ctx.clone()),
            message_approval: approval::MessageApprovalExecutor::new(ctx.clone()),
            prompt: prompt::PromptExecutor::new(ctx.clone()),
            subagent: subagent::SubagentExecutor::new(ctx.clone()),
            bugreport: bugreport::BugReportExecutor::new(ctx.clone()),
            system: system::SystemExecutor::new(ctx.clone()),
            status_post_id: None,
            last_error_post_id: None,
            ctx,
        }
    }

    pub fn context(&self) -> &ExecutorContext {
        &self.ctx
    }

    /// Convert an assistant event into operations and dispatch each one.
    /// Executor failures are contained here.
    pub async fn handle_event(&mut self, event: AssistantEvent) {
        if matches!(event, AssistantEvent::Unknown) {
            tracing::debug!(thread_id = %self.ctx.key.thread_id, "ignoring unknown assistant event");
            return;
        }
        for op in ops::from_event(event) {
            if let Err(error) = self.apply(op).await {
                tracing::warn!(
                    %error,
                    thread_id = %self.ctx.key.thread_id,
                    "operation failed"
                );
            }
        }
    }

    async fn apply(&mut self, op: Operation) -> Result<()> {
        match op {
            Operation::AppendContent { text } => {
                self.content.append(&text, &self.tasklist).await
            }
            Operation::Flush { reason } => self.content.flush(reason, &self.tasklist).await,
            Operation::TaskList { action, tasks } => {
                // Land buffered prose before the list moves.
                self.content
                    .flush(FlushReason::LogicalBreak, &self.tasklist)
                    .await?;
                match action {
                    TaskListAction::Update => self.tasklist.update(&tasks).await,
                    TaskListAction::Complete => self.tasklist.complete(&tasks).await,
                }
            }
            Operation::Question {
                tool_use_id,
                questions,
            } => {
                self.interactive
                    .execute_question(&tool_use_id, questions)
                    .await
            }
            Operation::PlanApproval { tool_use_id, plan } => {
                self.interactive
                    .execute_approval(&tool_use_id, ApprovalKind::Plan, &plan)
                    .await
            }
            Operation::ActionApproval {
                tool_use_id,
                description,
            } => {
                self.interactive
                    .execute_approval(&tool_use_id, ApprovalKind::Action, &description)
                    .await
            }
            Operation::SystemMessage { level, text } => {
                let post_id = self.system.post(level, &text).await;
                if level == SystemLevel::Error {
                    self.last_error_post_id = post_id;
                }
                Ok(())
            }
            Operation::Subagent(action) => match action {
                ops::SubagentAction::Start {
                    tool_use_id,
                    description,
                    agent_type,
                } => {
                    self.subagent
                        .start(&tool_use_id, &description, &agent_type)
                        .await
                }
                ops::SubagentAction::Update {
                    tool_use_id,
                    status,
                } => self.subagent.update(&tool_use_id, &status).await,
                ops::SubagentAction::Complete {
                    tool_use_id,
                    result,
                } => {
                    self.subagent
                        .complete(&tool_use_id, result.as_deref())
                        .await
                }
            },
            Operation::StatusUpdate { status } => self.show_status(&status).await,
            Operation::TurnComplete => Ok(()),
        }
    }

    /// Route a reaction through the executors in fixed order; the first
    /// that claims it wins. Returns false for the session manager to try
    /// session-level handling.
    pub async fn handle_reaction(
        &mut self,
        post_id: &str,
        kind: EmojiKind,
        username: &str,
        action: ReactionAction,
    ) -> Result<bool> {
        if self
            .prompt
            .handle_reaction(post_id, kind, username, action)
            .await?
        {
            return Ok(true);
        }
        if self
            .message_approval
            .handle_reaction(post_id, kind, username, action)
            .await?
        {
            return Ok(true);
        }
        if self
            .interactive
            .handle_reaction(post_id, kind, username, action)
            .await?
        {
            return Ok(true);
        }
        if self.tasklist.handle_reaction(post_id, kind, action).await {
            return Ok(true);
        }
        if self.subagent.handle_reaction(post_id, kind, action).await {
            return Ok(true);
        }
        Ok(false)
    }

    /// Flush buffered content (debounce timer, explicit flush).
    pub async fn flush(&mut self, reason: FlushReason) {
        if let Err(error) = self.content.flush(reason, &self.tasklist).await {
            tracing::warn!(%error, "flush failed");
        }
    }

    /// Periodic subagent elapsed-time refresh.
    pub async fn subagent_tick(&mut self) {
        self.subagent.tick().await;
    }

    /// Session-level timer fired for the pending context prompt.
    pub async fn resolve_context_timeout(&mut self) {
        if let Err(error) = self
            .prompt
            .resolve_context(ContextSelection::Timeout, "timeout")
            .await
        {
            tracing::warn!(%error, "context prompt timeout resolution failed");
        }
    }

    pub async fn show_context_prompt(
        &mut self,
        queued_prompt: &str,
        queued_files: Vec<String>,
        thread_message_count: usize,
        available_options: Vec<usize>,
    ) -> Result<()> {
        self.prompt
            .show_context_prompt(
                queued_prompt,
                queued_files,
                thread_message_count,
                available_options,
            )
            .await
    }

    pub async fn show_worktree_prompt(&mut self, branch: &str) -> Result<()> {
        self.prompt.show_worktree_prompt(branch).await
    }

    pub async fn show_update_prompt(&mut self, version: &str) -> Result<()> {
        self.prompt.show_update_prompt(version).await
    }

    pub async fn request_message_approval(
        &mut self,
        from_user: &str,
        original_message: &str,
    ) -> Result<()> {
        self.message_approval
            .request(from_user, original_message)
            .await
    }

    pub async fn start_bug_report(&mut self, report: BugReport) -> Result<()> {
        self.bugreport.start(report).await
    }

    pub async fn post_system(&mut self, level: SystemLevel, text: &str) -> Option<PostId> {
        self.system.post(level, text).await
    }

    /// Route a follow-up message into the pending context prompt, if any.
    pub fn append_queued_message(&mut self, text: &str) -> bool {
        self.prompt.append_queued(text)
    }

    pub fn pending_context_prompt(&self) -> Option<PendingContextPrompt> {
        self.prompt.pending_context().cloned()
    }

    pub fn has_pending_context_prompt(&self) -> bool {
        self.prompt.pending_context().is_some()
    }

    pub fn has_pending_update_prompt(&self) -> bool {
        self.prompt.has_pending_update()
    }

    pub fn last_error_post_id(&self) -> Option<&str> {
        self.last_error_post_id.as_deref()
    }

    pub fn tasks_post_id(&self) -> Option<PostId> {
        self.tasklist.post_id()
    }

    /// Cancel timers without losing buffered state (interrupt, pause).
    pub fn cancel_timers(&mut self) {
        self.content.cancel();
        self.subagent.reset();
    }

    /// Drop pending interactions and ephemeral posts (session ending).
    pub async fn teardown(&mut self) {
        self.cancel_timers();
        self.interactive.clear();
        self.message_approval.clear();
        self.prompt.clear();
        self.bugreport.clear();
        self.system.cleanup().await;
    }

    /// Persistable snapshot of executor state.
    pub fn snapshot(&self) -> ManagerSnapshot {
        ManagerSnapshot {
            tasks_post_id: self.tasklist.post_id(),
            last_tasks_content: self.tasklist.last_content(),
            tasks_completed: self.tasklist.is_completed(),
            tasks_minimized: self.tasklist.is_minimized(),
            pending_context_prompt: self.prompt.pending_context().cloned(),
        }
    }

    /// Restore executor state from a persisted snapshot.
    pub fn hydrate(&mut self, snapshot: ManagerSnapshot) {
        self.tasklist.hydrate(
            snapshot.tasks_post_id,
            snapshot.last_tasks_content,
            snapshot.tasks_completed,
            snapshot.tasks_minimized,
        );
        if let Some(pending) = snapshot.pending_context_prompt {
            self.prompt.hydrate_context(pending);
        }
    }

    async fn show_status(&mut self, status: &StatusInfo) -> Result<()> {
        let formatter = self.ctx.formatter();
        let mut line = format!(
            "{} · {} tokens · ${:.2}",
            formatter.code(&status.model),
            status.tokens,
            status.cost_usd
        );
        if let Some(pct) = status.context_pct {
            line.push_str(&format!(" · {pct}% context"));
        }

        if let Some(post_id) = self.status_post_id.clone() {
            match self.ctx.update_post(&post_id, &line).await {
                Ok(_) => return Ok(()),
                Err(error) => {
                    tracing::debug!(%error, post_id, "status line update failed, recreating");
                    self.status_post_id = None;
                }
            }
        }
        if let Ok(post) = self.ctx.create_post(&line).await {
            self.ctx
                .register_post(&post.id, PostMeta::role(PostRole::Status));
            self.status_post_id = Some(post.id);
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::ExecutorContext;
    use crate::platform::mock::MockPlatform;
    use crate::platform::PlatformDyn;
    use crate::session::registry::PostIndex;
    use crate::session::SessionSignal;
    use crate::message::tracker::PostTracker;
    use crate::{SessionEvent, SessionKey};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::{broadcast, mpsc};

    /// Context wired to a fresh mock platform on thread `thread-1`.
    pub fn test_context() -> (
        ExecutorContext,
        Arc<MockPlatform>,
        mpsc::Receiver<SessionSignal>,
    ) {
        let platform = MockPlatform::new("mock");
        let (signal_tx, signal_rx) = mpsc::channel(64);
        let (events_tx, _) = broadcast::channel(64);
        let ctx = ExecutorContext {
            key: SessionKey::new("mock", "thread-1"),
            platform: platform.clone() as Arc<dyn PlatformDyn>,
            tracker: PostTracker::new(),
            post_index: Arc::new(PostIndex::new()),
            events: events_tx,
            signals: signal_tx,
            debounce: Duration::from_millis(150),
            call_timeout: Duration::from_secs(5),
        };
        (ctx, platform, signal_rx)
    }

    /// Collect the completion events currently sitting in a subscription.
    pub fn drain_events(rx: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::test_context;
    use super::{ManagerSnapshot, MessageManager};
    use crate::assistant::AssistantEvent;
    use crate::message::prompt::PendingContextPrompt;
    use crate::platform::emoji::EmojiKind;
    use crate::{ReactionAction, TaskItem, TaskStatus};

    fn tasks() -> Vec<TaskItem> {
        vec![TaskItem {
            content: "write code".into(),
            status: TaskStatus::InProgress,
            active_form: Some("writing code".into()),
        }]
    }

    #[tokio::test]
    async fn event_stream_drives_content_and_tasks() {
        let (ctx, platform, _signals) = test_context();
        let mut manager = MessageManager::new(ctx);

        manager
            .handle_event(AssistantEvent::Assistant {
                text: "working on it".into(),
            })
            .await;
        manager
            .handle_event(AssistantEvent::TodoWrite { tasks: tasks() })
            .await;
        manager
            .handle_event(AssistantEvent::Result { duration_ms: None })
            .await;

        // Content post plus the task list post.
        assert_eq!(platform.post_count("thread-1"), 2);
        let contents = platform.thread_contents("thread-1");
        assert!(contents.iter().any(|c| c.contains("working on it")));
        assert!(contents.iter().any(|c| c.contains("0/1")));
    }

    #[tokio::test]
    async fn unknown_events_are_ignored() {
        let (ctx, platform, _signals) = test_context();
        let mut manager = MessageManager::new(ctx);
        manager.handle_event(AssistantEvent::Unknown).await;
        assert_eq!(platform.post_count("thread-1"), 0);
    }

    #[tokio::test]
    async fn reaction_chain_prefers_prompts_over_task_list() {
        let (ctx, _platform, _signals) = test_context();
        let mut manager = MessageManager::new(ctx);

        manager
            .show_context_prompt("queued", Vec::new(), 3, vec![1, 3])
            .await
            .unwrap();
        let prompt_post = manager.pending_context_prompt().unwrap().post_id;

        let handled = manager
            .handle_reaction(&prompt_post, EmojiKind::Number(1), "admin", ReactionAction::Added)
            .await
            .unwrap();
        assert!(handled);
        assert!(!manager.has_pending_context_prompt());

        // A reaction nothing claims falls through.
        let handled = manager
            .handle_reaction("p999", EmojiKind::Approve, "admin", ReactionAction::Added)
            .await
            .unwrap();
        assert!(!handled);
    }

    #[tokio::test]
    async fn snapshot_hydrate_snapshot_is_identity() {
        let (ctx, _platform, _signals) = test_context();
        let mut manager = MessageManager::new(ctx);
        manager
            .handle_event(AssistantEvent::TodoWrite { tasks: tasks() })
            .await;
        manager
            .show_context_prompt("queued work", vec!["notes.md".into()], 5, vec![1, 3, 5])
            .await
            .unwrap();

        let snapshot = manager.snapshot();
        assert!(snapshot.tasks_post_id.is_some());

        let (ctx2, _platform2, _signals2) = test_context();
        let mut restored = MessageManager::new(ctx2);
        restored.hydrate(snapshot.clone());
        assert_eq!(restored.snapshot(), snapshot);
    }

    #[tokio::test]
    async fn hydrate_accepts_a_bare_snapshot() {
        let (ctx, _platform, _signals) = test_context();
        let mut manager = MessageManager::new(ctx);
        manager.hydrate(ManagerSnapshot::default());
        assert!(manager.tasks_post_id().is_none());
        assert!(manager.pending_context_prompt().is_none());
    }

    #[tokio::test]
    async fn hydrated_context_prompt_still_resolves() {
        let (ctx, _platform, _signals) = test_context();
        let mut manager = MessageManager::new(ctx);

        let pending = PendingContextPrompt {
            post_id: "p42".into(),
            queued_prompt: "continue".into(),
            queued_files: Vec::new(),
            thread_message_count: 4,
            created_at: chrono::Utc::now(),
            available_options: vec![1, 3],
        };
        manager.hydrate(ManagerSnapshot {
            pending_context_prompt: Some(pending),
            ..ManagerSnapshot::default()
        });
        assert!(manager.has_pending_context_prompt());
        assert!(manager.append_queued_message("and this"));
    }
}
