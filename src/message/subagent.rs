//! Subagent executor.
//!
//! Tracks concurrent sub-tasks by tool-use id, each with its own
//! interactive post and minimize toggle. A 1 s ticker refreshes the
//! elapsed-time rendering while any entry is active.

use crate::message::tracker::{PostMeta, PostRole};
use crate::message::ExecutorContext;
use crate::platform::emoji::{self, EmojiKind};
use crate::session::SessionSignal;
use crate::{PostId, ReactionAction};
use std::collections::HashMap;
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
struct SubagentEntry {
    post_id: PostId,
    started_at: chrono::DateTime<chrono::Utc>,
    description: String,
    agent_type: String,
    minimized: bool,
    complete: bool,
    last_update: Option<String>,
}

pub struct SubagentExecutor {
    ctx: ExecutorContext,
    entries: HashMap<String, SubagentEntry>,
    ticker: Option<JoinHandle<()>>,
}

impl SubagentExecutor {
    pub fn new(ctx: ExecutorContext) -> Self {
        Self {
            ctx,
            entries: HashMap::new(),
            ticker: None,
        }
    }

    pub fn active_count(&self) -> usize {
        self.entries.values().filter(|e| !e.complete).count()
    }

    /// Start tracking a subagent with its own post.
    pub async fn start(
        &mut self,
        tool_use_id: &str,
        description: &str,
        agent_type: &str,
    ) -> crate::Result<()> {
        if self.entries.contains_key(tool_use_id) {
            tracing::debug!(tool_use_id, "subagent already tracked, dropping start");
            return Ok(());
        }

        let mut entry = SubagentEntry {
            post_id: String::new(),
            started_at: chrono::Utc::now(),
            description: description.to_string(),
            agent_type: agent_type.to_string(),
            minimized: false,
            complete: false,
            last_update: None,
        };
        let content = render(&entry);
        let reactions = vec![emoji::shortcode(EmojiKind::Minimize).to_string()];
        let post = self
            .ctx
            .create_interactive_post(&content, &reactions)
            .await?;
        self.ctx.register_post(
            &post.id,
            PostMeta::with_tool_use(PostRole::Subagent, tool_use_id),
        );
        entry.post_id = post.id;
        self.entries.insert(tool_use_id.to_string(), entry);
        self.ensure_ticker();
        Ok(())
    }

    /// Record a progress update and re-render.
    pub async fn update(&mut self, tool_use_id: &str, status: &str) -> crate::Result<()> {
        let Some(entry) = self.entries.get_mut(tool_use_id) else {
            tracing::debug!(tool_use_id, "update for unknown subagent, ignoring");
            return Ok(());
        };
        entry.last_update = Some(status.to_string());
        let (post_id, content) = (entry.post_id.clone(), render(entry));
        self.refresh_post(&post_id, &content).await;
        Ok(())
    }

    /// Mark a subagent complete and render its final state.
    pub async fn complete(
        &mut self,
        tool_use_id: &str,
        result: Option<&str>,
    ) -> crate::Result<()> {
        let Some(entry) = self.entries.get_mut(tool_use_id) else {
            tracing::debug!(tool_use_id, "complete for unknown subagent, ignoring");
            return Ok(());
        };
        entry.complete = true;
        if let Some(result) = result {
            entry.last_update = Some(result.to_string());
        }
        let (post_id, content) = (entry.post_id.clone(), render(entry));
        self.refresh_post(&post_id, &content).await;

        if self.active_count() == 0 {
            self.stop_ticker();
        }
        Ok(())
    }

    /// Periodic elapsed-time refresh for active entries.
    pub async fn tick(&mut self) {
        let targets: Vec<(PostId, String)> = self
            .entries
            .values()
            .filter(|e| !e.complete && !e.minimized)
            .map(|e| (e.post_id.clone(), render(e)))
            .collect();
        for (post_id, content) in targets {
            self.refresh_post(&post_id, &content).await;
        }
        if self.active_count() == 0 {
            self.stop_ticker();
        }
    }

    /// Minimize-toggle reactions on a subagent post.
    pub async fn handle_reaction(
        &mut self,
        post_id: &str,
        kind: EmojiKind,
        action: ReactionAction,
    ) -> bool {
        if action != ReactionAction::Added || kind != EmojiKind::Minimize {
            return false;
        }
        let Some(entry) = self.entries.values_mut().find(|e| e.post_id == post_id) else {
            return false;
        };
        entry.minimized = !entry.minimized;
        let (post_id, content) = (entry.post_id.clone(), render(entry));
        self.refresh_post(&post_id, &content).await;
        true
    }

    /// Cancel the ticker and drop all entries.
    pub fn reset(&mut self) {
        self.stop_ticker();
        self.entries.clear();
    }

    fn ensure_ticker(&mut self) {
        if self.ticker.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        let signals = self.ctx.signals.clone();
        self.ticker = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(1));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if signals.send(SessionSignal::SubagentTick).await.is_err() {
                    break;
                }
            }
        }));
    }

    fn stop_ticker(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }

    async fn refresh_post(&self, post_id: &str, content: &str) {
        if let Err(error) = self.ctx.update_post(post_id, content).await {
            tracing::warn!(%error, post_id, "subagent post update failed");
        }
    }
}

impl Drop for SubagentExecutor {
    fn drop(&mut self) {
        self.stop_ticker();
    }
}

fn render(entry: &SubagentEntry) -> String {
    let elapsed = elapsed_label(entry.started_at);
    if entry.minimized {
        return format!("▸ {} ({elapsed})", entry.description);
    }
    let icon = if entry.complete { "✅" } else { "⏳" };
    let mut out = format!(
        "{icon} {} [{}] — {elapsed}",
        entry.description, entry.agent_type
    );
    if let Some(update) = &entry.last_update {
        out.push('\n');
        out.push_str(update);
    }
    out
}

fn elapsed_label(started_at: chrono::DateTime<chrono::Utc>) -> String {
    let secs = (chrono::Utc::now() - started_at).num_seconds().max(0);
    if secs < 60 {
        format!("{secs}s")
    } else {
        format!("{}m{}s", secs / 60, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::SubagentExecutor;
    use crate::message::test_support::test_context;
    use crate::platform::emoji::EmojiKind;
    use crate::ReactionAction;

    #[tokio::test]
    async fn tracks_concurrent_subagents() {
        let (ctx, platform, _signals) = test_context();
        let mut subagents = SubagentExecutor::new(ctx);

        subagents.start("t1", "explore the repo", "general").await.unwrap();
        subagents.start("t2", "run the tests", "runner").await.unwrap();
        assert_eq!(subagents.active_count(), 2);
        assert_eq!(platform.post_count("thread-1"), 2);

        subagents.update("t1", "reading src/").await.unwrap();
        assert!(platform.post_content("p1").unwrap().contains("reading src/"));

        subagents.complete("t1", Some("found 3 modules")).await.unwrap();
        assert!(platform.post_content("p1").unwrap().starts_with("✅"));
        assert_eq!(subagents.active_count(), 1);
    }

    #[tokio::test]
    async fn reaction_toggles_minimized_view() {
        let (ctx, platform, _signals) = test_context();
        let mut subagents = SubagentExecutor::new(ctx);
        subagents.start("t1", "compile", "builder").await.unwrap();

        let handled = subagents
            .handle_reaction("p1", EmojiKind::Minimize, ReactionAction::Added)
            .await;
        assert!(handled);
        assert!(platform.post_content("p1").unwrap().starts_with("▸"));

        subagents
            .handle_reaction("p1", EmojiKind::Minimize, ReactionAction::Added)
            .await;
        assert!(platform.post_content("p1").unwrap().starts_with("⏳"));
    }

    #[tokio::test]
    async fn reset_clears_entries() {
        let (ctx, _platform, _signals) = test_context();
        let mut subagents = SubagentExecutor::new(ctx);
        subagents.start("t1", "task", "general").await.unwrap();
        subagents.reset();
        assert_eq!(subagents.active_count(), 0);
    }
}
