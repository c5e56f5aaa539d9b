//! System executor: one-off leveled status messages.

use crate::message::ops::SystemLevel;
use crate::message::tracker::{PostMeta, PostRole};
use crate::message::ExecutorContext;
use crate::PostId;
use std::collections::HashSet;

pub struct SystemExecutor {
    ctx: ExecutorContext,
    /// Posts to clean up when the session ends.
    ephemeral: HashSet<PostId>,
}

impl SystemExecutor {
    pub fn new(ctx: ExecutorContext) -> Self {
        Self {
            ctx,
            ephemeral: HashSet::new(),
        }
    }

    /// Post a one-off message. Returns the post id when the platform call
    /// succeeded.
    pub async fn post(&mut self, level: SystemLevel, text: &str) -> Option<PostId> {
        let icon = match level {
            SystemLevel::Info => "ℹ️",
            SystemLevel::Warning => "⚠️",
            SystemLevel::Error => "❌",
            SystemLevel::Success => "✅",
        };
        let content = format!("{icon} {text}");
        match self.ctx.create_post(&content).await {
            Ok(post) => {
                self.ctx
                    .register_post(&post.id, PostMeta::role(PostRole::System));
                self.ephemeral.insert(post.id.clone());
                Some(post.id)
            }
            Err(error) => {
                tracing::warn!(%error, "system message create failed");
                None
            }
        }
    }

    /// Delete tracked ephemeral posts. Idempotent on "not found".
    pub async fn cleanup(&mut self) {
        for post_id in std::mem::take(&mut self.ephemeral) {
            if let Err(error) = self.ctx.delete_post(&post_id).await {
                tracing::debug!(%error, post_id, "ephemeral cleanup delete failed");
            }
            self.ctx.unregister_post(&post_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::SystemExecutor;
    use crate::message::ops::SystemLevel;
    use crate::message::test_support::test_context;

    #[tokio::test]
    async fn posts_are_tracked_and_cleaned_up() {
        let (ctx, platform, _signals) = test_context();
        let mut system = SystemExecutor::new(ctx);

        let first = system.post(SystemLevel::Info, "session started").await.unwrap();
        let second = system.post(SystemLevel::Error, "child crashed").await.unwrap();
        assert!(platform.post_content(&first).unwrap().starts_with("ℹ️"));
        assert!(platform.post_content(&second).unwrap().starts_with("❌"));

        system.cleanup().await;
        assert!(!platform.post_exists(&first));
        assert!(!platform.post_exists(&second));
    }
}
