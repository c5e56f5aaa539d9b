//! Bug report executor.
//!
//! Assembles a report from a failing thread, shows it for approval, and
//! publishes the decision.

use crate::message::tracker::{PostMeta, PostRole};
use crate::message::ExecutorContext;
use crate::platform::emoji::{self, EmojiKind};
use crate::{BugReport, PostId, ReactionAction, SessionEvent};

#[derive(Debug, Clone)]
pub struct PendingBugReport {
    pub post_id: PostId,
    pub report: BugReport,
}

pub struct BugReportExecutor {
    ctx: ExecutorContext,
    pending: Option<PendingBugReport>,
}

impl BugReportExecutor {
    pub fn new(ctx: ExecutorContext) -> Self {
        Self { ctx, pending: None }
    }

    pub fn pending(&self) -> Option<&PendingBugReport> {
        self.pending.as_ref()
    }

    pub fn clear(&mut self) {
        self.pending = None;
    }

    /// Show a draft report for approval. Silently dropped when one is
    /// already pending.
    pub async fn start(&mut self, report: BugReport) -> crate::Result<()> {
        if self.pending.is_some() {
            tracing::debug!("bug report already pending, dropping");
            return Ok(());
        }

        let formatter = self.ctx.formatter();
        let mut content = format!(
            "{} {}\n\n{}\n\nReporter notes: {}",
            formatter.bold("Bug report draft:"),
            report.title,
            report.body,
            report.user_description,
        );
        if let Some(error_post) = &report.error_context {
            content.push_str(&format!("\nReferences failing post {error_post}."));
        }
        if !report.image_urls.is_empty() {
            content.push_str(&format!("\nAttachments: {}", report.image_urls.join(", ")));
        }
        for image_error in &report.image_errors {
            content.push_str(&format!("\n⚠️ attachment skipped: {image_error}"));
        }
        content.push_str("\n\n👍 file it · 👎 discard");

        let reactions = vec![
            emoji::shortcode(EmojiKind::Approve).to_string(),
            emoji::shortcode(EmojiKind::Deny).to_string(),
        ];
        let post = self
            .ctx
            .create_interactive_post(&content, &reactions)
            .await?;
        self.ctx
            .register_post(&post.id, PostMeta::role(PostRole::BugReport));
        self.pending = Some(PendingBugReport {
            post_id: post.id,
            report,
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
        let approved = match kind {
            EmojiKind::Approve => true,
            EmojiKind::Deny => false,
            _ => return Ok(false),
        };

        let pending = self.pending.take().unwrap();
        let formatter = self.ctx.formatter();
        let status = if approved {
            format!(
                "Bug report \"{}\" filed (by {}).",
                pending.report.title,
                formatter.user_mention(username)
            )
        } else {
            format!(
                "Bug report discarded (by {}).",
                formatter.user_mention(username)
            )
        };
        if let Err(error) = self.ctx.update_post(&pending.post_id, &status).await {
            tracing::warn!(%error, "bug report post update failed");
        }
        self.ctx.unregister_post(&pending.post_id);

        self.ctx.emit(SessionEvent::BugReportComplete {
            key: self.ctx.key.clone(),
            approved,
            report: pending.report,
        });
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::BugReportExecutor;
    use crate::message::test_support::{drain_events, test_context};
    use crate::platform::emoji::EmojiKind;
    use crate::{BugReport, ReactionAction, SessionEvent};

    fn report() -> BugReport {
        BugReport {
            title: "flush loses tail".into(),
            body: "steps to reproduce".into(),
            user_description: "it ate my message".into(),
            image_urls: vec!["https://example.test/shot.png".into()],
            image_errors: Vec::new(),
            error_context: Some("p7".into()),
        }
    }

    #[tokio::test]
    async fn approval_files_the_report() {
        let (ctx, platform, _signals) = test_context();
        let mut events = ctx.events.subscribe();
        let mut bugs = BugReportExecutor::new(ctx);

        bugs.start(report()).await.unwrap();
        assert!(platform.post_content("p1").unwrap().contains("failing post p7"));

        let handled = bugs
            .handle_reaction("p1", EmojiKind::Approve, "admin", ReactionAction::Added)
            .await
            .unwrap();
        assert!(handled);
        let events = drain_events(&mut events);
        assert!(matches!(
            &events[..],
            [SessionEvent::BugReportComplete { approved: true, report, .. }]
                if report.title == "flush loses tail"
        ));
        assert!(bugs.pending().is_none());
    }
}
