//! Operations dispatched to executors.
//!
//! Raw assistant events are converted into this smaller vocabulary by the
//! message manager; each operation targets exactly one executor.

use crate::assistant::AssistantEvent;
use crate::{Question, StatusInfo, TaskItem, TaskStatus};
use serde::{Deserialize, Serialize};

/// Why a content flush is happening.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushReason {
    SoftThreshold,
    HardThreshold,
    LogicalBreak,
    Result,
    ToolComplete,
    Explicit,
}

/// Severity of a one-off system message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemLevel {
    Info,
    Warning,
    Error,
    Success,
}

/// Subagent lifecycle operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum SubagentAction {
    Start {
        tool_use_id: String,
        description: String,
        agent_type: String,
    },
    Update {
        tool_use_id: String,
        status: String,
    },
    Complete {
        tool_use_id: String,
        result: Option<String>,
    },
}

/// Task-list operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskListAction {
    Update,
    Complete,
}

/// A tagged operation consumed by one executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    AppendContent {
        text: String,
    },
    Flush {
        reason: FlushReason,
    },
    TaskList {
        action: TaskListAction,
        tasks: Vec<TaskItem>,
    },
    Question {
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
    SystemMessage {
        level: SystemLevel,
        text: String,
    },
    Subagent(SubagentAction),
    StatusUpdate {
        status: StatusInfo,
    },
    /// The assistant finished its turn.
    TurnComplete,
}

/// Convert one raw assistant event into its operation sequence.
///
/// Interactive events flush pending content first so prompts always land
/// after the text that introduced them. Events the message manager does
/// not own (init) convert to nothing.
pub fn from_event(event: AssistantEvent) -> Vec<Operation> {
    match event {
        AssistantEvent::Assistant { text } => vec![Operation::AppendContent { text }],
        AssistantEvent::ToolUse { .. } => Vec::new(),
        AssistantEvent::ToolResult { .. } => vec![Operation::Flush {
            reason: FlushReason::ToolComplete,
        }],
        AssistantEvent::Result { .. } => vec![
            Operation::Flush {
                reason: FlushReason::Result,
            },
            Operation::TurnComplete,
        ],
        AssistantEvent::TodoWrite { tasks } => {
            let action = if !tasks.is_empty()
                && tasks.iter().all(|t| t.status == TaskStatus::Completed)
            {
                TaskListAction::Complete
            } else {
                TaskListAction::Update
            };
            vec![Operation::TaskList { action, tasks }]
        }
        AssistantEvent::AskUserQuestion {
            tool_use_id,
            questions,
        } => vec![
            Operation::Flush {
                reason: FlushReason::LogicalBreak,
            },
            Operation::Question {
                tool_use_id,
                questions,
            },
        ],
        AssistantEvent::PlanApproval { tool_use_id, plan } => vec![
            Operation::Flush {
                reason: FlushReason::LogicalBreak,
            },
            Operation::PlanApproval { tool_use_id, plan },
        ],
        AssistantEvent::ActionApproval {
            tool_use_id,
            description,
        } => vec![
            Operation::Flush {
                reason: FlushReason::LogicalBreak,
            },
            Operation::ActionApproval {
                tool_use_id,
                description,
            },
        ],
        AssistantEvent::SubagentStart {
            tool_use_id,
            description,
            agent_type,
        } => vec![Operation::Subagent(SubagentAction::Start {
            tool_use_id,
            description,
            agent_type,
        })],
        AssistantEvent::SubagentUpdate {
            tool_use_id,
            status,
        } => vec![Operation::Subagent(SubagentAction::Update {
            tool_use_id,
            status,
        })],
        AssistantEvent::SubagentComplete {
            tool_use_id,
            result,
        } => vec![Operation::Subagent(SubagentAction::Complete {
            tool_use_id,
            result,
        })],
        AssistantEvent::StatusUpdate { status } => vec![Operation::StatusUpdate { status }],
        AssistantEvent::Error { message } => vec![Operation::SystemMessage {
            level: SystemLevel::Error,
            text: message,
        }],
        AssistantEvent::Init { .. } | AssistantEvent::Unknown => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::{FlushReason, Operation, TaskListAction, from_event};
    use crate::assistant::AssistantEvent;
    use crate::{TaskItem, TaskStatus};

    fn task(status: TaskStatus) -> TaskItem {
        TaskItem {
            content: "t".into(),
            status,
            active_form: None,
        }
    }

    #[test]
    fn result_flushes_then_completes_the_turn() {
        let ops = from_event(AssistantEvent::Result { duration_ms: None });
        assert_eq!(
            ops,
            vec![
                Operation::Flush {
                    reason: FlushReason::Result
                },
                Operation::TurnComplete,
            ]
        );
    }

    #[test]
    fn all_completed_todo_write_becomes_complete() {
        let ops = from_event(AssistantEvent::TodoWrite {
            tasks: vec![task(TaskStatus::Completed), task(TaskStatus::Completed)],
        });
        assert!(matches!(
            ops[0],
            Operation::TaskList {
                action: TaskListAction::Complete,
                ..
            }
        ));
    }

    #[test]
    fn partially_done_todo_write_stays_update() {
        let ops = from_event(AssistantEvent::TodoWrite {
            tasks: vec![task(TaskStatus::Completed), task(TaskStatus::Pending)],
        });
        assert!(matches!(
            ops[0],
            Operation::TaskList {
                action: TaskListAction::Update,
                ..
            }
        ));
    }

    #[test]
    fn questions_flush_first() {
        let ops = from_event(AssistantEvent::AskUserQuestion {
            tool_use_id: "t1".into(),
            questions: Vec::new(),
        });
        assert!(matches!(ops[0], Operation::Flush { .. }));
        assert!(matches!(ops[1], Operation::Question { .. }));
    }
}
