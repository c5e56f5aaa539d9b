//! Assistant CLI event stream and subprocess lifecycle.
//!
//! The assistant runs as a child process per session, emitting newline-
//! delimited JSON events on stdout and accepting JSON commands on stdin.

pub mod process;

use crate::{Question, StatusInfo, TaskItem};
use serde::{Deserialize, Serialize};

/// An event on the assistant's outbound stream.
///
/// Unknown event types decode to [`AssistantEvent::Unknown`] and are
/// logged and ignored by the consumer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AssistantEvent {
    /// A chunk of assistant text output.
    Assistant { text: String },
    ToolUse {
        tool_use_id: String,
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        is_error: bool,
    },
    /// The turn is complete.
    Result {
        #[serde(default)]
        duration_ms: Option<u64>,
    },
    TodoWrite { tasks: Vec<TaskItem> },
    AskUserQuestion {
        tool_use_id: String,
        questions: Vec<Question>,
    },
    PlanApproval {
        tool_use_id: String,
        plan: String,
    },
    ActionApproval {
        tool_use_id: String,
        description: String,
    },
    SubagentStart {
        tool_use_id: String,
        description: String,
        #[serde(default)]
        agent_type: String,
    },
    SubagentUpdate {
        tool_use_id: String,
        status: String,
    },
    SubagentComplete {
        tool_use_id: String,
        #[serde(default)]
        result: Option<String>,
    },
    StatusUpdate {
        #[serde(flatten)]
        status: StatusInfo,
    },
    /// First event of a session: server-side session id and the slash
    /// commands the assistant understands.
    Init {
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default)]
        available_slash_commands: Vec<String>,
    },
    Error { message: String },
    #[serde(other)]
    Unknown,
}

/// A command written to the assistant's stdin.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AssistantCommand {
    UserMessage {
        text: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        files: Vec<String>,
    },
    QuestionAnswer {
        tool_use_id: String,
        answers: Vec<String>,
    },
    ApprovalDecision {
        tool_use_id: String,
        approved: bool,
    },
    SlashCommand { command: String },
}

#[cfg(test)]
mod tests {
    use super::AssistantEvent;
    use crate::TaskStatus;
    use indoc::indoc;

    #[test]
    fn decodes_tagged_events() {
        let event: AssistantEvent =
            serde_json::from_str(r#"{"type":"assistant","text":"hello"}"#).unwrap();
        assert_eq!(event, AssistantEvent::Assistant { text: "hello".into() });
    }

    #[test]
    fn decodes_todo_write() {
        let raw = indoc! {r#"
            {"type":"todo_write","tasks":[
                {"content":"read files","status":"completed"},
                {"content":"write patch","status":"in_progress","active_form":"Writing patch"}
            ]}
        "#};
        let event: AssistantEvent = serde_json::from_str(raw).unwrap();
        let AssistantEvent::TodoWrite { tasks } = event else {
            panic!("wrong variant");
        };
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[1].status, TaskStatus::InProgress);
        assert_eq!(tasks[1].active_form.as_deref(), Some("Writing patch"));
    }

    #[test]
    fn unknown_event_types_decode_to_unknown() {
        let event: AssistantEvent =
            serde_json::from_str(r#"{"type":"telemetry","data":42}"#).unwrap();
        assert_eq!(event, AssistantEvent::Unknown);
    }
}
