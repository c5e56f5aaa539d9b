//! Message approval executor.
//!
//! When a non-allowed user posts into a session thread, the owner decides
//! via reactions: deliver once, deliver and invite, or deny.

use crate::message::tracker::{PostMeta, PostRole};
use crate::message::ExecutorContext;
use crate::platform::emoji::{self, EmojiKind};
use crate::{MessageApprovalDecision, PostId, ReactionAction, SessionEvent};

#[derive(Debug, Clone)]
pub struct PendingMessageApproval {
    pub post_id: PostId,
    pub from_user: String,
    pub original_message: String,
}

pub struct MessageApprovalExecutor {
    ctx: ExecutorContext,
    pending: Option<PendingMessageApproval>,
}

impl MessageApprovalExecutor {
    pub fn new(ctx: ExecutorContext) -> Self {
        Self { ctx, pending: None }
    }

    pub fn pending(&self) -> Option<&PendingMessageApproval> {
        self.pending.as_ref()
    }

    pub fn clear(&mut self) {
        self.pending = None;
    }

    /// Ask the thread to approve a message from a non-allowed user.
    /// Silently dropped when an approval is already pending.
    pub async fn request(&mut self, from_user: &str, original_message: &str) -> crate::Result<()> {
        if self.pending.is_some() {
            tracing::debug!(from_user, "message approval already pending, dropping");
            return Ok(());
        }

        let formatter = self.ctx.formatter();
        let content = format!(
            "{} {} wants to send:\n{}\n\n👍 allow once · ✅ allow and invite · 👎 deny",
            formatter.bold("Message approval:"),
            formatter.user_mention(from_user),
            formatter.code_block(original_message, None),
        );
        let reactions = vec![
            emoji::shortcode(EmojiKind::Approve).to_string(),
            emoji::shortcode(EmojiKind::AllowAll).to_string(),
            emoji::shortcode(EmojiKind::Deny).to_string(),
        ];
        let post = self
            .ctx
            .create_interactive_post(&content, &reactions)
            .await?;
        self.ctx
            .register_post(&post.id, PostMeta::role(PostRole::MessageApproval));

        self.pending = Some(PendingMessageApproval {
            post_id: post.id,
            from_user: from_user.to_string(),
            original_message: original_message.to_string(),
        });
        Ok(())
    }

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
        if self.pending.as_ref().map(|p| p.post_id.as_str()) != Some(post_id) {
            return Ok(false);
        }
        let decision = match kind {
            EmojiKind::Approve => MessageApprovalDecision::Allow,
            EmojiKind::AllowAll => MessageApprovalDecision::Invite,
            EmojiKind::Deny => MessageApprovalDecision::Deny,
            _ => return Ok(false),
        };

        let pending = self.pending.take().unwrap();
        let formatter = self.ctx.formatter();
        let verdict = match decision {
            MessageApprovalDecision::Allow => "allowed once",
            MessageApprovalDecision::Invite => "allowed, user invited",
            MessageApprovalDecision::Deny => "denied",
        };
        let status = format!(
            "Message from {} {verdict} (by {})",
            formatter.user_mention(&pending.from_user),
            formatter.user_mention(username),
        );
        if let Err(error) = self.ctx.update_post(&pending.post_id, &status).await {
            tracing::warn!(%error, "message approval post update failed");
        }

        self.ctx.emit(SessionEvent::MessageApprovalComplete {
            key: self.ctx.key.clone(),
            decision,
            from_user: pending.from_user,
            original_message: pending.original_message,
        });
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::MessageApprovalExecutor;
    use crate::message::test_support::{drain_events, test_context};
    use crate::platform::emoji::EmojiKind;
    use crate::{MessageApprovalDecision, ReactionAction, SessionEvent};

    #[tokio::test]
    async fn invite_decision_emits_and_updates() {
        let (ctx, platform, _signals) = test_context();
        let mut events = ctx.events.subscribe();
        let mut approval = MessageApprovalExecutor::new(ctx);

        approval.request("guest", "deploy please").await.unwrap();
        let handled = approval
            .handle_reaction("p1", EmojiKind::AllowAll, "admin", ReactionAction::Added)
            .await
            .unwrap();
        assert!(handled);
        assert!(platform.post_content("p1").unwrap().contains("invited"));

        let events = drain_events(&mut events);
        assert!(matches!(
            &events[..],
            [SessionEvent::MessageApprovalComplete {
                decision: MessageApprovalDecision::Invite,
                from_user,
                original_message,
                ..
            }] if from_user == "guest" && original_message == "deploy please"
        ));
        assert!(approval.pending().is_none());
    }

    #[tokio::test]
    async fn second_request_is_dropped_while_pending() {
        let (ctx, platform, _signals) = test_context();
        let mut approval = MessageApprovalExecutor::new(ctx);
        approval.request("guest", "one").await.unwrap();
        approval.request("other", "two").await.unwrap();
        assert_eq!(platform.post_count("thread-1"), 1);
        assert_eq!(approval.pending().unwrap().from_user, "guest");
    }
}
