//! Task list executor.
//!
//! Maintains an always-current checklist that floats to the bottom of the
//! thread, with a minimized single-line view and a progress indicator.
//! The bump protocol (delete + recreate at the bottom, optionally
//! repurposing the old post for content) is serialized through a FIFO
//! mutex: concurrent triggers produce exactly one new task-list post.

use crate::message::tracker::{PostMeta, PostRole};
use crate::message::ExecutorContext;
use crate::platform::emoji::{self, EmojiKind};
use crate::{PostId, ReactionAction, TaskItem, TaskStatus};
use std::sync::{Arc, Mutex};

#[derive(Debug, Default, Clone)]
struct TaskListState {
    post_id: Option<PostId>,
    /// Last full (expanded) render.
    last_content: String,
    completed: bool,
    minimized: bool,
    in_progress_since: Option<chrono::DateTime<chrono::Utc>>,
}

/// Clones share state; methods take `&self` so bumps can race.
#[derive(Clone)]
pub struct TaskListExecutor {
    ctx: ExecutorContext,
    state: Arc<Mutex<TaskListState>>,
    bump_lock: Arc<tokio::sync::Mutex<()>>,
}

impl TaskListExecutor {
    pub fn new(ctx: ExecutorContext) -> Self {
        Self {
            ctx,
            state: Arc::new(Mutex::new(TaskListState::default())),
            bump_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub fn post_id(&self) -> Option<PostId> {
        self.state.lock().unwrap().post_id.clone()
    }

    pub fn last_content(&self) -> String {
        self.state.lock().unwrap().last_content.clone()
    }

    pub fn is_completed(&self) -> bool {
        self.state.lock().unwrap().completed
    }

    pub fn is_minimized(&self) -> bool {
        self.state.lock().unwrap().minimized
    }

    /// Restore from a persisted snapshot. The in-progress start time is
    /// intentionally not restored.
    pub fn hydrate(
        &self,
        post_id: Option<PostId>,
        last_content: String,
        completed: bool,
        minimized: bool,
    ) {
        let mut state = self.state.lock().unwrap();
        if let Some(post_id) = &post_id {
            self.ctx
                .register_post(post_id, PostMeta::role(PostRole::TaskList));
        }
        state.post_id = post_id;
        state.last_content = last_content;
        state.completed = completed;
        state.minimized = minimized;
    }

    /// Render and post the current task list, updating in place when a
    /// post already exists.
    pub async fn update(&self, tasks: &[TaskItem]) -> crate::Result<()> {
        let content = {
            let mut state = self.state.lock().unwrap();
            state.completed = false;
            if tasks.iter().any(|t| t.status == TaskStatus::InProgress) {
                if state.in_progress_since.is_none() {
                    state.in_progress_since = Some(chrono::Utc::now());
                }
            } else {
                state.in_progress_since = None;
            }
            state.last_content = render_full(&self.ctx, tasks);
            if state.minimized {
                summary_line(&state.last_content)
            } else {
                state.last_content.clone()
            }
        };
        self.show(&content, false).await
    }

    /// Render the final list, transition to completed, and unpin.
    pub async fn complete(&self, tasks: &[TaskItem]) -> crate::Result<()> {
        let content = {
            let mut state = self.state.lock().unwrap();
            state.completed = true;
            state.minimized = false;
            state.in_progress_since = None;
            state.last_content = render_full(&self.ctx, tasks);
            state.last_content.clone()
        };
        self.show(&content, true).await
    }

    /// Swap between the full and single-line summarized view.
    pub async fn toggle_minimize(&self) -> crate::Result<()> {
        let (post_id, content) = {
            let mut state = self.state.lock().unwrap();
            let Some(post_id) = state.post_id.clone() else {
                return Ok(());
            };
            state.minimized = !state.minimized;
            let content = if state.minimized {
                summary_line(&state.last_content)
            } else {
                state.last_content.clone()
            };
            (post_id, content)
        };
        if let Err(error) = self.ctx.update_post(&post_id, &content).await {
            tracing::warn!(%error, post_id, "task list minimize toggle failed");
        }
        Ok(())
    }

    /// Move the task-list post to the bottom of the thread: delete the old
    /// post, create a fresh pinned copy. Serialized; the loser of a race
    /// is a no-op.
    pub async fn bump_to_bottom(&self) -> crate::Result<()> {
        let Some(observed) = self.post_id() else {
            return Ok(());
        };
        let _guard = self.bump_lock.lock().await;
        if self.post_id().as_deref() != Some(observed.as_str()) {
            // Another bump already happened.
            return Ok(());
        }

        if let Err(error) = self.ctx.delete_post(&observed).await {
            tracing::warn!(%error, post_id = observed, "task list bump delete failed");
        }
        self.ctx.unregister_post(&observed);

        let content = {
            let state = self.state.lock().unwrap();
            if state.minimized {
                summary_line(&state.last_content)
            } else {
                state.last_content.clone()
            }
        };
        self.create_list_post(&content).await
    }

    /// Bump, repurposing the old post to hold `new_content` instead of
    /// deleting it. Returns the repurposed post id, or None when there is
    /// no active list, the race was lost, or the repurpose failed.
    pub async fn bump_and_get_old_post(
        &self,
        new_content: &str,
    ) -> crate::Result<Option<PostId>> {
        let Some(observed) = self.post_id() else {
            return Ok(None);
        };
        let _guard = self.bump_lock.lock().await;
        if self.post_id().as_deref() != Some(observed.as_str()) {
            return Ok(None);
        }

        let repurposed = match self.ctx.update_post(&observed, new_content).await {
            Ok(_) => {
                self.ctx
                    .register_post(&observed, PostMeta::role(PostRole::Content));
                Some(observed.clone())
            }
            Err(error) => {
                tracing::warn!(%error, post_id = observed, "task list repurpose failed, deleting");
                if let Err(error) = self.ctx.delete_post(&observed).await {
                    tracing::warn!(%error, post_id = observed, "task list bump delete failed");
                }
                self.ctx.unregister_post(&observed);
                None
            }
        };

        let content = {
            let state = self.state.lock().unwrap();
            if state.minimized {
                summary_line(&state.last_content)
            } else {
                state.last_content.clone()
            }
        };
        self.create_list_post(&content).await?;
        Ok(repurposed)
    }

    /// Minimize-toggle reactions on the task-list post.
    pub async fn handle_reaction(
        &self,
        post_id: &str,
        kind: EmojiKind,
        action: ReactionAction,
    ) -> bool {
        if action != ReactionAction::Added || kind != EmojiKind::Minimize {
            return false;
        }
        if self.post_id().as_deref() != Some(post_id) {
            return false;
        }
        if let Err(error) = self.toggle_minimize().await {
            tracing::warn!(%error, "task list toggle failed");
        }
        true
    }

    /// Post the rendered list, creating or updating as needed, with the
    /// §4.4 failure ladder: update → delete + create → give up and null.
    async fn show(&self, content: &str, unpin: bool) -> crate::Result<()> {
        let existing = self.post_id();
        match existing {
            Some(post_id) => {
                match self.ctx.update_post(&post_id, content).await {
                    Ok(_) => {
                        if unpin {
                            self.ctx.unpin_post(&post_id).await;
                        }
                        Ok(())
                    }
                    Err(error) => {
                        tracing::warn!(%error, post_id, "task list update failed");
                        match self.ctx.delete_post(&post_id).await {
                            Ok(()) => {
                                self.ctx.unregister_post(&post_id);
                                self.state.lock().unwrap().post_id = None;
                                self.create_list_post(content).await
                            }
                            Err(error) => {
                                // The old post may still exist; never risk a
                                // second visible list.
                                tracing::warn!(%error, post_id, "task list delete failed, dropping id");
                                self.state.lock().unwrap().post_id = None;
                                Ok(())
                            }
                        }
                    }
                }
            }
            None => self.create_list_post(content).await,
        }
    }

    async fn create_list_post(&self, content: &str) -> crate::Result<()> {
        let reactions = vec![emoji::shortcode(EmojiKind::Minimize).to_string()];
        match self
            .ctx
            .create_interactive_post(content, &reactions)
            .await
        {
            Ok(post) => {
                self.ctx
                    .register_post(&post.id, PostMeta::role(PostRole::TaskList));
                self.ctx.pin_post(&post.id).await;
                self.state.lock().unwrap().post_id = Some(post.id);
                Ok(())
            }
            Err(error) => {
                tracing::warn!(%error, "task list create failed");
                self.state.lock().unwrap().post_id = None;
                Ok(())
            }
        }
    }
}

fn progress(tasks: &[TaskItem]) -> (usize, usize, usize) {
    let total = tasks.len();
    let done = tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Completed)
        .count();
    let pct = if total == 0 { 0 } else { done * 100 / total };
    (done, total, pct)
}

fn render_full(ctx: &ExecutorContext, tasks: &[TaskItem]) -> String {
    let formatter = ctx.formatter();
    let (done, total, pct) = progress(tasks);
    let mut out = format!("{} {done}/{total} · {pct}%", formatter.bold("Tasks"));
    for task in tasks {
        let (icon, text) = match task.status {
            TaskStatus::Pending => ("⬜", task.content.as_str()),
            TaskStatus::InProgress => (
                "🔄",
                task.active_form.as_deref().unwrap_or(task.content.as_str()),
            ),
            TaskStatus::Completed => ("✅", task.content.as_str()),
        };
        out.push('\n');
        out.push_str(&formatter.list_item(&format!("{icon} {text}")));
    }
    out
}

/// Minimized view: the progress header alone.
fn summary_line(full: &str) -> String {
    full.lines().next().unwrap_or_default().to_string()
}

#[cfg(test)]
mod tests {
    use super::TaskListExecutor;
    use crate::message::test_support::test_context;
    use crate::platform::mock::MockCall;
    use crate::{TaskItem, TaskStatus};

    fn tasks(statuses: &[TaskStatus]) -> Vec<TaskItem> {
        statuses
            .iter()
            .enumerate()
            .map(|(i, status)| TaskItem {
                content: format!("task {i}"),
                status: *status,
                active_form: Some(format!("doing task {i}")),
            })
            .collect()
    }

    #[tokio::test]
    async fn renders_progress_and_pins() {
        let (ctx, platform, _signals) = test_context();
        let list = TaskListExecutor::new(ctx);

        list.update(&tasks(&[
            TaskStatus::Completed,
            TaskStatus::InProgress,
            TaskStatus::Pending,
        ]))
        .await
        .unwrap();

        let post_id = list.post_id().unwrap();
        let content = platform.post_content(&post_id).unwrap();
        assert!(content.contains("1/3 · 33%"));
        assert!(content.contains("🔄 doing task 1"));
        assert_eq!(
            platform.count_calls(|c| matches!(c, MockCall::PinPost { .. })),
            1
        );
    }

    #[tokio::test]
    async fn empty_list_renders_zero_over_zero() {
        let (ctx, platform, _signals) = test_context();
        let list = TaskListExecutor::new(ctx);
        list.update(&[]).await.unwrap();
        let content = platform.post_content(&list.post_id().unwrap()).unwrap();
        assert!(content.contains("0/0 · 0%"));
    }

    #[tokio::test]
    async fn toggle_minimize_swaps_views_in_place() {
        let (ctx, platform, _signals) = test_context();
        let list = TaskListExecutor::new(ctx);
        list.update(&tasks(&[TaskStatus::Pending, TaskStatus::Pending]))
            .await
            .unwrap();
        let post_id = list.post_id().unwrap();

        list.toggle_minimize().await.unwrap();
        assert!(list.is_minimized());
        let minimized = platform.post_content(&post_id).unwrap();
        assert_eq!(minimized.lines().count(), 1);

        list.toggle_minimize().await.unwrap();
        let expanded = platform.post_content(&post_id).unwrap();
        assert_eq!(expanded.lines().count(), 3);
    }

    #[tokio::test]
    async fn complete_unpins_and_marks_done() {
        let (ctx, platform, _signals) = test_context();
        let list = TaskListExecutor::new(ctx);
        list.update(&tasks(&[TaskStatus::InProgress])).await.unwrap();
        list.complete(&tasks(&[TaskStatus::Completed])).await.unwrap();
        assert!(list.is_completed());
        assert_eq!(
            platform.count_calls(|c| matches!(c, MockCall::UnpinPost { .. })),
            1
        );
    }

    #[tokio::test]
    async fn concurrent_bumps_create_exactly_one_new_post() {
        let (ctx, platform, _signals) = test_context();
        let list = TaskListExecutor::new(ctx);
        list.update(&tasks(&[TaskStatus::InProgress])).await.unwrap();
        let before = platform.count_calls(|c| matches!(c, MockCall::CreateInteractivePost { .. }));

        let a = list.clone();
        let b = list.clone();
        let (left, right) = tokio::join!(
            a.bump_to_bottom(),
            b.bump_and_get_old_post("repurposed content"),
        );
        left.unwrap();
        right.unwrap();

        let after = platform.count_calls(|c| matches!(c, MockCall::CreateInteractivePost { .. }));
        assert_eq!(after - before, 1);
    }

    #[tokio::test]
    async fn both_failures_drop_the_post_id() {
        let (ctx, platform, _signals) = test_context();
        let list = TaskListExecutor::new(ctx);
        list.update(&tasks(&[TaskStatus::Pending])).await.unwrap();

        platform.set_fail_update(true);
        platform.set_fail_delete(true);
        list.update(&tasks(&[TaskStatus::Completed])).await.unwrap();
        assert!(list.post_id().is_none());
    }

    #[tokio::test]
    async fn hydrate_restores_snapshot_fields() {
        let (ctx, _platform, _signals) = test_context();
        let list = TaskListExecutor::new(ctx);
        list.hydrate(Some("p9".into()), "**Tasks** 1/1 · 100%".into(), true, false);
        assert_eq!(list.post_id().as_deref(), Some("p9"));
        assert!(list.is_completed());
        assert!(!list.is_minimized());
    }
}
