//! Prompt executor: context, existing-worktree, and update prompts.
//!
//! Three independent singleton prompts. Each resolves through reactions,
//! updates its post with a readable outcome, and publishes a completion
//! event.

use crate::message::tracker::{PostMeta, PostRole};
use crate::message::ExecutorContext;
use crate::platform::emoji::{self, EmojiKind};
use crate::{PostId, ReactionAction, SessionEvent};
use serde::{Deserialize, Serialize};

/// Pending context prompt; persisted so it survives a restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingContextPrompt {
    pub post_id: PostId,
    pub queued_prompt: String,
    #[serde(default)]
    pub queued_files: Vec<String>,
    pub thread_message_count: usize,
    pub created_at: chrono::DateTime<chrono::Utc>,
    /// Message counts offered, in display order.
    pub available_options: Vec<usize>,
}

#[derive(Debug, Clone)]
struct PendingWorktreePrompt {
    post_id: PostId,
    branch: String,
}

#[derive(Debug, Clone)]
struct PendingUpdatePrompt {
    post_id: PostId,
    version: String,
}

/// How a context prompt was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextSelection {
    /// 1-based option index from a number reaction.
    Option(usize),
    Skip,
    Timeout,
}

pub struct PromptExecutor {
    ctx: ExecutorContext,
    context: Option<PendingContextPrompt>,
    worktree: Option<PendingWorktreePrompt>,
    update: Option<PendingUpdatePrompt>,
}

impl PromptExecutor {
    pub fn new(ctx: ExecutorContext) -> Self {
        Self {
            ctx,
            context: None,
            worktree: None,
            update: None,
        }
    }

    pub fn pending_context(&self) -> Option<&PendingContextPrompt> {
        self.context.as_ref()
    }

    pub fn has_pending_worktree(&self) -> bool {
        self.worktree.is_some()
    }

    pub fn has_pending_update(&self) -> bool {
        self.update.is_some()
    }

    pub fn clear(&mut self) {
        self.context = None;
        self.worktree = None;
        self.update = None;
    }

    /// Restore a persisted context prompt.
    pub fn hydrate_context(&mut self, prompt: PendingContextPrompt) {
        self.ctx
            .register_post(&prompt.post_id, PostMeta::role(PostRole::ContextPrompt));
        self.context = Some(prompt);
    }

    /// While a context prompt is pending, follow-up messages extend the
    /// queued prompt instead of reaching the assistant.
    pub fn append_queued(&mut self, text: &str) -> bool {
        let Some(pending) = self.context.as_mut() else {
            return false;
        };
        if !pending.queued_prompt.is_empty() {
            pending.queued_prompt.push('\n');
        }
        pending.queued_prompt.push_str(text);
        true
    }

    /// Ask how many prior thread messages to include as context.
    pub async fn show_context_prompt(
        &mut self,
        queued_prompt: &str,
        queued_files: Vec<String>,
        thread_message_count: usize,
        available_options: Vec<usize>,
    ) -> crate::Result<()> {
        if self.context.is_some() {
            tracing::debug!("context prompt already pending, dropping");
            return Ok(());
        }

        let formatter = self.ctx.formatter();
        let mut content = format!(
            "{} This thread has {thread_message_count} earlier messages. Include how many as context?\n",
            formatter.bold("Context:"),
        );
        for (i, count) in available_options.iter().enumerate() {
            let label = if *count == 1 {
                "the last message".to_string()
            } else {
                format!("the last {count} messages")
            };
            content.push_str(&formatter.numbered_list_item(i + 1, &label));
            content.push('\n');
        }
        content.push_str("👎 none");

        let mut reactions = emoji::number_shortcodes(available_options.len());
        reactions.push(emoji::shortcode(EmojiKind::Deny).to_string());
        let post = self
            .ctx
            .create_interactive_post(&content, &reactions)
            .await?;
        self.ctx
            .register_post(&post.id, PostMeta::role(PostRole::ContextPrompt));

        self.context = Some(PendingContextPrompt {
            post_id: post.id,
            queued_prompt: queued_prompt.to_string(),
            queued_files,
            thread_message_count,
            created_at: chrono::Utc::now(),
            available_options,
        });
        Ok(())
    }

    /// Resolve the pending context prompt. Out-of-range options leave it
    /// pending and return false.
    pub async fn resolve_context(
        &mut self,
        selection: ContextSelection,
        chosen_by: &str,
    ) -> crate::Result<bool> {
        let Some(pending) = self.context.as_ref() else {
            return Ok(false);
        };

        let messages = match selection {
            ContextSelection::Option(n) => {
                match n
                    .checked_sub(1)
                    .and_then(|i| pending.available_options.get(i))
                {
                    Some(count) => *count,
                    None => return Ok(false),
                }
            }
            ContextSelection::Skip | ContextSelection::Timeout => 0,
        };

        let pending = self.context.take().unwrap();
        let formatter = self.ctx.formatter();
        let status = match selection {
            ContextSelection::Timeout => {
                "Context prompt timed out; starting without prior messages.".to_string()
            }
            _ if messages == 0 => format!(
                "Starting without prior messages (chosen by {}).",
                formatter.user_mention(chosen_by)
            ),
            _ => format!(
                "Including the last {messages} message(s) as context (chosen by {}).",
                formatter.user_mention(chosen_by)
            ),
        };
        if let Err(error) = self.ctx.update_post(&pending.post_id, &status).await {
            tracing::warn!(%error, "context prompt update failed");
        }
        self.ctx.unregister_post(&pending.post_id);

        self.ctx.emit(SessionEvent::ContextPromptComplete {
            key: self.ctx.key.clone(),
            messages,
            queued_prompt: pending.queued_prompt,
            queued_files: pending.queued_files,
        });
        Ok(true)
    }

    /// Ask whether to join an existing worktree for `branch`.
    pub async fn show_worktree_prompt(&mut self, branch: &str) -> crate::Result<()> {
        if self.worktree.is_some() {
            tracing::debug!(branch, "worktree prompt already pending, dropping");
            return Ok(());
        }

        let formatter = self.ctx.formatter();
        let content = format!(
            "A worktree for {} already exists. Join it?\n👍 join · 👎 skip",
            formatter.code(branch),
        );
        let reactions = vec![
            emoji::shortcode(EmojiKind::Approve).to_string(),
            emoji::shortcode(EmojiKind::Deny).to_string(),
        ];
        let post = self
            .ctx
            .create_interactive_post(&content, &reactions)
            .await?;
        self.ctx
            .register_post(&post.id, PostMeta::role(PostRole::WorktreePrompt));
        self.worktree = Some(PendingWorktreePrompt {
            post_id: post.id,
            branch: branch.to_string(),
        });
        Ok(())
    }

    /// Ask whether to apply an available update now.
    pub async fn show_update_prompt(&mut self, version: &str) -> crate::Result<()> {
        if self.update.is_some() {
            tracing::debug!(version, "update prompt already pending, dropping");
            return Ok(());
        }

        let formatter = self.ctx.formatter();
        let content = format!(
            "{} version {version} is available. Update now?\n👍 update now · 👎 later",
            formatter.bold("Update:"),
        );
        let reactions = vec![
            emoji::shortcode(EmojiKind::Approve).to_string(),
            emoji::shortcode(EmojiKind::Deny).to_string(),
        ];
        let post = self
            .ctx
            .create_interactive_post(&content, &reactions)
            .await?;
        self.ctx
            .register_post(&post.id, PostMeta::role(PostRole::UpdatePrompt));
        self.update = Some(PendingUpdatePrompt {
            post_id: post.id,
            version: version.to_string(),
        });
        Ok(())
    }

    /// Route a reaction to whichever pending prompt owns the post.
    /// Only `added` reactions act; `removed` is a no-op.
    pub async fn handle_reaction(
        &mut self,
        post_id: &str,
        kind: EmojiKind,
        username: &str,
        action: ReactionAction,
    ) -> crate::Result<bool> {
        if action != ReactionAction::Added {
            return Ok(false);
        }

        if self.context.as_ref().is_some_and(|p| p.post_id == post_id) {
            let selection = match kind {
                EmojiKind::Number(n) => ContextSelection::Option(n),
                EmojiKind::Deny => ContextSelection::Skip,
                _ => return Ok(false),
            };
            // Out-of-range selections are ignored but the reaction was ours.
            self.resolve_context(selection, username).await?;
            return Ok(true);
        }

        if self.worktree.as_ref().is_some_and(|p| p.post_id == post_id) {
            let join = match kind {
                EmojiKind::Approve => true,
                EmojiKind::Deny | EmojiKind::Skip => false,
                _ => return Ok(false),
            };
            let pending = self.worktree.take().unwrap();
            let formatter = self.ctx.formatter();
            let status = if join {
                format!("Joining the {} worktree.", formatter.code(&pending.branch))
            } else {
                format!(
                    "Skipping the {} worktree; working in the main checkout.",
                    formatter.code(&pending.branch)
                )
            };
            if let Err(error) = self.ctx.update_post(&pending.post_id, &status).await {
                tracing::warn!(%error, "worktree prompt update failed");
            }
            self.ctx.unregister_post(&pending.post_id);
            self.ctx.emit(SessionEvent::WorktreePromptComplete {
                key: self.ctx.key.clone(),
                join,
            });
            return Ok(true);
        }

        if self.update.as_ref().is_some_and(|p| p.post_id == post_id) {
            let update_now = match kind {
                EmojiKind::Approve => true,
                EmojiKind::Deny => false,
                _ => return Ok(false),
            };
            let pending = self.update.take().unwrap();
            let status = if update_now {
                format!("Updating to {} now.", pending.version)
            } else {
                "Update deferred; will ask again later.".to_string()
            };
            if let Err(error) = self.ctx.update_post(&pending.post_id, &status).await {
                tracing::warn!(%error, "update prompt update failed");
            }
            self.ctx.unregister_post(&pending.post_id);
            self.ctx.emit(SessionEvent::UpdatePromptComplete {
                key: self.ctx.key.clone(),
                update_now,
            });
            return Ok(true);
        }

        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::{ContextSelection, PromptExecutor};
    use crate::message::test_support::{drain_events, test_context};
    use crate::platform::emoji::EmojiKind;
    use crate::{ReactionAction, SessionEvent};

    #[tokio::test]
    async fn sparse_options_map_by_index() {
        let (ctx, platform, _signals) = test_context();
        let mut events = ctx.events.subscribe();
        let mut prompt = PromptExecutor::new(ctx);

        prompt
            .show_context_prompt("queued", Vec::new(), 7, vec![1, 3])
            .await
            .unwrap();

        // `four` is out of bounds for two options: ignored, still pending.
        prompt
            .handle_reaction("p1", EmojiKind::Number(4), "admin", ReactionAction::Added)
            .await
            .unwrap();
        assert!(prompt.pending_context().is_some());

        // `two` selects index 1, which offers 3 messages.
        let handled = prompt
            .handle_reaction("p1", EmojiKind::Number(2), "admin", ReactionAction::Added)
            .await
            .unwrap();
        assert!(handled);
        assert!(platform.post_content("p1").unwrap().contains("last 3"));

        let events = drain_events(&mut events);
        assert!(matches!(
            &events[..],
            [SessionEvent::ContextPromptComplete { messages: 3, queued_prompt, .. }]
                if queued_prompt == "queued"
        ));
    }

    #[tokio::test]
    async fn denial_selects_zero() {
        let (ctx, _platform, _signals) = test_context();
        let mut events = ctx.events.subscribe();
        let mut prompt = PromptExecutor::new(ctx);
        prompt
            .show_context_prompt("q", Vec::new(), 2, vec![1, 2])
            .await
            .unwrap();
        prompt
            .handle_reaction("p1", EmojiKind::Deny, "admin", ReactionAction::Added)
            .await
            .unwrap();
        let events = drain_events(&mut events);
        assert!(matches!(
            &events[..],
            [SessionEvent::ContextPromptComplete { messages: 0, .. }]
        ));
    }

    #[tokio::test]
    async fn timeout_resolves_to_skip() {
        let (ctx, platform, _signals) = test_context();
        let mut prompt = PromptExecutor::new(ctx);
        prompt
            .show_context_prompt("q", Vec::new(), 2, vec![1, 2])
            .await
            .unwrap();
        prompt
            .resolve_context(ContextSelection::Timeout, "timeout")
            .await
            .unwrap();
        assert!(prompt.pending_context().is_none());
        assert!(platform.post_content("p1").unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn follow_up_extends_the_queued_prompt() {
        let (ctx, _platform, _signals) = test_context();
        let mut prompt = PromptExecutor::new(ctx);
        prompt
            .show_context_prompt("first", Vec::new(), 2, vec![1])
            .await
            .unwrap();
        assert!(prompt.append_queued("second"));
        assert_eq!(
            prompt.pending_context().unwrap().queued_prompt,
            "first\nsecond"
        );
    }

    #[tokio::test]
    async fn worktree_skip_via_x() {
        let (ctx, _platform, _signals) = test_context();
        let mut events = ctx.events.subscribe();
        let mut prompt = PromptExecutor::new(ctx);
        prompt.show_worktree_prompt("feature-x").await.unwrap();
        let handled = prompt
            .handle_reaction("p1", EmojiKind::Skip, "admin", ReactionAction::Added)
            .await
            .unwrap();
        assert!(handled);
        let events = drain_events(&mut events);
        assert!(matches!(
            &events[..],
            [SessionEvent::WorktreePromptComplete { join: false, .. }]
        ));
    }

    #[tokio::test]
    async fn update_prompt_defer() {
        let (ctx, _platform, _signals) = test_context();
        let mut events = ctx.events.subscribe();
        let mut prompt = PromptExecutor::new(ctx);
        prompt.show_update_prompt("1.2.3").await.unwrap();
        prompt
            .handle_reaction("p1", EmojiKind::Deny, "admin", ReactionAction::Added)
            .await
            .unwrap();
        let events = drain_events(&mut events);
        assert!(matches!(
            &events[..],
            [SessionEvent::UpdatePromptComplete { update_now: false, .. }]
        ));
        assert!(!prompt.has_pending_update());
    }
}
