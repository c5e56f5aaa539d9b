//! Interactive executor: multiple-choice questions and approvals.
//!
//! Questions post one interactive message per question with number-emoji
//! reactions; approvals use approve/deny. Completion is published on the
//! session event bus.

use crate::message::tracker::{PostMeta, PostRole};
use crate::message::ExecutorContext;
use crate::platform::emoji::{self, EmojiKind};
use crate::{ApprovalKind, PostId, Question, ReactionAction, SessionEvent};

#[derive(Debug, Clone)]
struct PendingQuestionSet {
    tool_use_id: String,
    questions: Vec<Question>,
    current_index: usize,
    answers: Vec<String>,
    post_id: PostId,
}

#[derive(Debug, Clone)]
struct PendingApproval {
    tool_use_id: String,
    kind: ApprovalKind,
    post_id: PostId,
}

pub struct InteractiveExecutor {
    ctx: ExecutorContext,
    pending_question: Option<PendingQuestionSet>,
    pending_approval: Option<PendingApproval>,
}

impl InteractiveExecutor {
    pub fn new(ctx: ExecutorContext) -> Self {
        Self {
            ctx,
            pending_question: None,
            pending_approval: None,
        }
    }

    pub fn has_pending_question(&self) -> bool {
        self.pending_question.is_some()
    }

    pub fn has_pending_approval(&self) -> bool {
        self.pending_approval.is_some()
    }

    /// Drop pending interactions (session ending).
    pub fn clear(&mut self) {
        self.pending_question = None;
        self.pending_approval = None;
    }

    /// Start a question set. Silently dropped when one is already pending.
    pub async fn execute_question(
        &mut self,
        tool_use_id: &str,
        questions: Vec<Question>,
    ) -> crate::Result<()> {
        if self.pending_question.is_some() {
            tracing::debug!(tool_use_id, "question set already pending, dropping");
            return Ok(());
        }
        if questions.is_empty() {
            return Ok(());
        }

        let content = render_question(&self.ctx, &questions[0], 0, questions.len());
        let reactions = emoji::number_shortcodes(questions[0].options.len());
        let post = self
            .ctx
            .create_interactive_post(&content, &reactions)
            .await?;
        self.ctx.register_post(
            &post.id,
            PostMeta::with_tool_use(PostRole::Question, tool_use_id),
        );

        self.pending_question = Some(PendingQuestionSet {
            tool_use_id: tool_use_id.to_string(),
            questions,
            current_index: 0,
            answers: Vec::new(),
            post_id: post.id,
        });
        Ok(())
    }

    /// Request a plan or action approval. Silently dropped when one is
    /// already pending.
    pub async fn execute_approval(
        &mut self,
        tool_use_id: &str,
        kind: ApprovalKind,
        summary: &str,
    ) -> crate::Result<()> {
        if self.pending_approval.is_some() {
            tracing::debug!(tool_use_id, "approval already pending, dropping");
            return Ok(());
        }

        let formatter = self.ctx.formatter();
        let heading = match kind {
            ApprovalKind::Plan => "Plan approval",
            ApprovalKind::Action => "Action approval",
        };
        let content = format!(
            "{}\n{summary}\n\n👍 approve · 👎 deny",
            formatter.bold(heading)
        );
        let reactions = vec![
            emoji::shortcode(EmojiKind::Approve).to_string(),
            emoji::shortcode(EmojiKind::Deny).to_string(),
        ];
        let post = self
            .ctx
            .create_interactive_post(&content, &reactions)
            .await?;
        self.ctx.register_post(
            &post.id,
            PostMeta::with_tool_use(PostRole::Approval, tool_use_id),
        );

        self.pending_approval = Some(PendingApproval {
            tool_use_id: tool_use_id.to_string(),
            kind,
            post_id: post.id,
        });
        Ok(())
    }

    /// Route a reaction. Returns true when it belonged to a pending
    /// question or approval on that post.
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

        if self
            .pending_question
            .as_ref()
            .is_some_and(|q| q.post_id == post_id)
        {
            if let EmojiKind::Number(n) = kind {
                return self.answer_current_question(n, username).await.map(|_| true);
            }
            return Ok(false);
        }

        if self
            .pending_approval
            .as_ref()
            .is_some_and(|a| a.post_id == post_id)
        {
            let approved = match kind {
                EmojiKind::Approve => true,
                EmojiKind::Deny => false,
                _ => return Ok(false),
            };
            let approval = self.pending_approval.take().unwrap();
            let formatter = self.ctx.formatter();
            let verdict = if approved { "approved" } else { "denied" };
            let status = format!(
                "{} {verdict} by {}",
                match approval.kind {
                    ApprovalKind::Plan => "Plan",
                    ApprovalKind::Action => "Action",
                },
                formatter.user_mention(username)
            );
            if let Err(error) = self.ctx.update_post(&approval.post_id, &status).await {
                tracing::warn!(%error, "approval post update failed");
            }
            self.ctx.emit(SessionEvent::ApprovalComplete {
                key: self.ctx.key.clone(),
                tool_use_id: approval.tool_use_id,
                kind: approval.kind,
                approved,
            });
            return Ok(true);
        }

        Ok(false)
    }

    /// Record an answer by 1-based option index; advance or finalize.
    async fn answer_current_question(&mut self, choice: usize, username: &str) -> crate::Result<()> {
        let Some(mut pending) = self.pending_question.take() else {
            return Ok(());
        };

        let question = &pending.questions[pending.current_index];
        let Some(answer) = choice
            .checked_sub(1)
            .and_then(|i| question.options.get(i))
            .cloned()
        else {
            // Out-of-range number: leave the question pending.
            self.pending_question = Some(pending);
            return Ok(());
        };

        let formatter = self.ctx.formatter();
        let answered = format!(
            "{}\n{} {}",
            render_question(
                &self.ctx,
                question,
                pending.current_index,
                pending.questions.len()
            ),
            formatter.bold("Answer:"),
            format!("{answer} (by {})", formatter.user_mention(username)),
        );
        if let Err(error) = self.ctx.update_post(&pending.post_id, &answered).await {
            tracing::warn!(%error, "question post update failed");
        }

        pending.answers.push(answer);
        pending.current_index += 1;

        if pending.current_index < pending.questions.len() {
            let next = &pending.questions[pending.current_index];
            let content = render_question(
                &self.ctx,
                next,
                pending.current_index,
                pending.questions.len(),
            );
            let reactions = emoji::number_shortcodes(next.options.len());
            let post = self
                .ctx
                .create_interactive_post(&content, &reactions)
                .await?;
            self.ctx.register_post(
                &post.id,
                PostMeta::with_tool_use(PostRole::Question, pending.tool_use_id.clone()),
            );
            pending.post_id = post.id;
            self.pending_question = Some(pending);
        } else {
            self.ctx.emit(SessionEvent::QuestionComplete {
                key: self.ctx.key.clone(),
                tool_use_id: pending.tool_use_id,
                answers: pending.answers,
            });
        }
        Ok(())
    }
}

fn render_question(
    ctx: &ExecutorContext,
    question: &Question,
    index: usize,
    total: usize,
) -> String {
    let formatter = ctx.formatter();
    let mut out = String::new();
    if !question.header.is_empty() {
        out.push_str(&formatter.bold(&question.header));
        out.push('\n');
    }
    out.push_str(&format!(
        "({}/{total}) {}\n",
        index + 1,
        question.question
    ));
    for (i, option) in question.options.iter().enumerate() {
        out.push_str(&formatter.numbered_list_item(i + 1, option));
        out.push('\n');
    }
    out.push_str("React with the option number.");
    out
}

#[cfg(test)]
mod tests {
    use super::InteractiveExecutor;
    use crate::message::test_support::{drain_events, test_context};
    use crate::platform::emoji::EmojiKind;
    use crate::{ApprovalKind, Question, ReactionAction, SessionEvent};

    fn questions() -> Vec<Question> {
        vec![
            Question {
                header: "Setup".into(),
                question: "Which database?".into(),
                options: vec!["sqlite".into(), "postgres".into()],
            },
            Question {
                header: String::new(),
                question: "Which runtime?".into(),
                options: vec!["tokio".into(), "async-std".into(), "smol".into()],
            },
        ]
    }

    #[tokio::test]
    async fn walks_the_question_set_and_emits_answers() {
        let (ctx, platform, _signals) = test_context();
        let mut events = ctx.events.subscribe();
        let mut interactive = InteractiveExecutor::new(ctx);

        interactive
            .execute_question("t1", questions())
            .await
            .unwrap();
        let first_post = "p1".to_string();
        assert!(platform.post_content(&first_post).unwrap().contains("(1/2)"));

        let handled = interactive
            .handle_reaction(&first_post, EmojiKind::Number(2), "admin", ReactionAction::Added)
            .await
            .unwrap();
        assert!(handled);
        assert!(platform
            .post_content(&first_post)
            .unwrap()
            .contains("postgres"));

        // Second question went out as a fresh post.
        let second_post = "p2".to_string();
        assert!(platform.post_content(&second_post).unwrap().contains("(2/2)"));

        interactive
            .handle_reaction(&second_post, EmojiKind::Number(1), "admin", ReactionAction::Added)
            .await
            .unwrap();

        let events = drain_events(&mut events);
        assert!(matches!(
            &events[..],
            [SessionEvent::QuestionComplete { tool_use_id, answers, .. }]
                if tool_use_id == "t1" && answers == &vec!["postgres".to_string(), "tokio".to_string()]
        ));
        assert!(!interactive.has_pending_question());
    }

    #[tokio::test]
    async fn out_of_range_numbers_are_ignored() {
        let (ctx, _platform, _signals) = test_context();
        let mut interactive = InteractiveExecutor::new(ctx);
        interactive
            .execute_question("t1", questions())
            .await
            .unwrap();

        interactive
            .handle_reaction("p1", EmojiKind::Number(4), "admin", ReactionAction::Added)
            .await
            .unwrap();
        assert!(interactive.has_pending_question());
    }

    #[tokio::test]
    async fn duplicate_question_sets_are_dropped() {
        let (ctx, platform, _signals) = test_context();
        let mut interactive = InteractiveExecutor::new(ctx);
        interactive
            .execute_question("t1", questions())
            .await
            .unwrap();
        interactive
            .execute_question("t2", questions())
            .await
            .unwrap();
        assert_eq!(platform.post_count("thread-1"), 1);
    }

    #[tokio::test]
    async fn approval_reaction_resolves_and_emits() {
        let (ctx, platform, _signals) = test_context();
        let mut events = ctx.events.subscribe();
        let mut interactive = InteractiveExecutor::new(ctx);

        interactive
            .execute_approval("t9", ApprovalKind::Plan, "ship it")
            .await
            .unwrap();
        let handled = interactive
            .handle_reaction("p1", EmojiKind::Deny, "admin", ReactionAction::Added)
            .await
            .unwrap();
        assert!(handled);
        assert!(platform.post_content("p1").unwrap().contains("denied by @admin"));

        let events = drain_events(&mut events);
        assert!(matches!(
            &events[..],
            [SessionEvent::ApprovalComplete { approved: false, kind: ApprovalKind::Plan, .. }]
        ));
    }

    #[tokio::test]
    async fn removed_reactions_are_noops() {
        let (ctx, _platform, _signals) = test_context();
        let mut interactive = InteractiveExecutor::new(ctx);
        interactive
            .execute_approval("t9", ApprovalKind::Action, "run tests")
            .await
            .unwrap();
        let handled = interactive
            .handle_reaction("p1", EmojiKind::Approve, "admin", ReactionAction::Removed)
            .await
            .unwrap();
        assert!(!handled);
        assert!(interactive.has_pending_approval());
    }
}
