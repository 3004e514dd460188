//! Task types and lifecycle state machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{
    error::{A2AError, ErrorKind},
    event::Event,
    message::{Message, Role},
};

/// A task dispatched to one remote agent
///
/// Tasks are created by the task manager when the router dispatches a query and are
/// only ever mutated by it. They live in memory until terminal and drained.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Unique identifier for the task (assigned by the remote agent)
    pub id: String,

    /// Agent the task was dispatched to
    pub target_agent_id: String,

    /// Current lifecycle state
    pub state: TaskState,

    /// When the task was created locally
    pub created_at: DateTime<Utc>,

    /// When the task was last updated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,

    /// Messages exchanged so far, in order
    #[serde(default)]
    pub messages: Vec<Message>,

    /// Set once the caller asked for cancellation
    #[serde(default)]
    pub cancel_requested: bool,
}

impl Task {
    /// Create a new task in the `Created` state
    pub fn new(target_agent_id: impl Into<String>, initial_message: Message) -> Self {
        Self {
            id: String::new(),
            target_agent_id: target_agent_id.into(),
            state: TaskState::Created,
            created_at: Utc::now(),
            updated_at: None,
            messages: vec![initial_message],
            cancel_requested: false,
        }
    }

    /// Record the id the remote agent assigned and move to `Submitted`
    pub fn submitted(&mut self, id: impl Into<String>) -> Result<(), A2AError> {
        self.id = id.into();
        self.transition(TaskState::Submitted)
    }

    /// Check if the task is in a terminal state
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Move to a new state, enforcing the lifecycle order
    ///
    /// # Errors
    ///
    /// Returns [`A2AError::Protocol`] if the move would regress or leave a terminal state
    pub fn transition(&mut self, next: TaskState) -> Result<(), A2AError> {
        if !self.state.can_transition_to(next) {
            return Err(A2AError::Protocol(format!(
                "illegal task transition {:?} -> {:?} for task '{}'",
                self.state, next, self.id
            )));
        }
        if next == TaskState::Cancelled {
            self.cancel_requested = true;
        }
        self.state = next;
        self.updated_at = Some(Utc::now());
        Ok(())
    }

    /// Append a message to the task's log
    pub fn push_message(&mut self, message: Message) {
        self.messages.push(message);
        self.updated_at = Some(Utc::now());
    }
}

/// Task lifecycle state
///
/// `created → submitted → streaming → completed | failed | cancelled`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum TaskState {
    /// Task exists locally but the agent has not accepted it yet
    Created,

    /// Agent accepted the task
    Submitted,

    /// At least one event has been received
    #[serde(alias = "working")]
    Streaming,

    /// Task finished successfully
    Completed,

    /// Task failed (server failure, unreachable agent or timeout)
    Failed,

    /// Task was cancelled by the caller
    #[serde(alias = "canceled")]
    Cancelled,
}

impl TaskState {
    /// Check if this is a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }

    fn rank(&self) -> u8 {
        match self {
            TaskState::Created => 0,
            TaskState::Submitted => 1,
            TaskState::Streaming => 2,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled => 3,
        }
    }

    /// Whether `next` is a legal move from this state.
    ///
    /// Non-terminal states only move forward; any non-terminal state may jump to a
    /// terminal one; terminal states are final.
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next.is_terminal() {
            return true;
        }
        next.rank() > self.rank()
    }
}

/// A task as the agent reports it on `GET /tasks/{id}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatus {
    /// State on the agent's side
    pub state: TaskState,

    /// Every message of the task so far, including the caller's
    #[serde(default)]
    pub messages: Vec<Message>,

    /// Failure class once the task failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,

    /// Human-readable failure detail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl TaskStatus {
    /// Messages written by the agent, in order
    pub fn replies(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(|m| m.role == Role::Agent)
    }

    /// The event that ends the task, once the agent reports it finished
    pub fn terminal_event(&self) -> Option<Event> {
        let detail = || self.detail.clone();
        match self.state {
            TaskState::Completed => Some(Event::TaskEnded),
            TaskState::Failed => Some(Event::failed(
                self.error.unwrap_or(ErrorKind::Rejected),
                detail().unwrap_or_else(|| "agent reported the task failed".into()),
            )),
            TaskState::Cancelled => Some(Event::failed(
                ErrorKind::Cancelled,
                detail().unwrap_or_else(|| "agent cancelled the task".into()),
            )),
            TaskState::Created | TaskState::Submitted | TaskState::Streaming => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_creation() {
        let task = Task::new("sql-agent", Message::user("Test"));

        assert_eq!(task.state, TaskState::Created);
        assert_eq!(task.target_agent_id, "sql-agent");
        assert_eq!(task.messages.len(), 1);
        assert!(!task.is_terminal());
    }

    #[test]
    fn test_task_lifecycle() {
        let mut task = Task::new("sql-agent", Message::user("Test"));

        task.submitted("task-123").unwrap();
        assert_eq!(task.id, "task-123");
        assert_eq!(task.state, TaskState::Submitted);

        task.transition(TaskState::Streaming).unwrap();
        task.transition(TaskState::Completed).unwrap();
        assert!(task.is_terminal());
        assert!(task.updated_at.is_some());
    }

    #[test]
    fn test_state_never_regresses() {
        let mut task = Task::new("a", Message::user("Test"));
        task.submitted("t").unwrap();
        task.transition(TaskState::Streaming).unwrap();

        assert!(task.transition(TaskState::Submitted).is_err());
        assert!(task.transition(TaskState::Streaming).is_err());
        assert_eq!(task.state, TaskState::Streaming);
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut task = Task::new("a", Message::user("Test"));
        task.transition(TaskState::Cancelled).unwrap();
        assert!(task.cancel_requested);

        assert!(task.transition(TaskState::Failed).is_err());
        assert!(task.transition(TaskState::Completed).is_err());
        assert_eq!(task.state, TaskState::Cancelled);
    }

    #[test]
    fn test_any_live_state_may_fail() {
        for state in [TaskState::Created, TaskState::Submitted, TaskState::Streaming] {
            assert!(state.can_transition_to(TaskState::Failed));
            assert!(state.can_transition_to(TaskState::Cancelled));
        }
    }

    #[test]
    fn test_task_serialization() {
        let mut task = Task::new("rag-agent", Message::user("Test"));
        task.submitted("task-123").unwrap();

        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["id"], "task-123");
        assert_eq!(json["state"], "submitted");
        assert_eq!(json["targetAgentId"], "rag-agent");
        assert!(json.get("createdAt").is_some());

        let state: TaskState = serde_json::from_str("\"working\"").unwrap();
        assert_eq!(state, TaskState::Streaming);
    }

    #[test]
    fn test_task_status_from_agent() {
        let status: TaskStatus = serde_json::from_value(serde_json::json!({
            "state": "failed",
            "messages": [
                {"role": "user", "parts": [{"text": "total sales"}]},
                {"role": "agent", "parts": [{"text": "SELECT"}]}
            ],
            "error": "rejected",
            "detail": "no such table"
        }))
        .unwrap();

        assert_eq!(status.replies().count(), 1);
        assert_eq!(
            status.terminal_event(),
            Some(Event::failed(ErrorKind::Rejected, "no such table"))
        );

        let working: TaskStatus = serde_json::from_str(r#"{"state":"working"}"#).unwrap();
        assert_eq!(working.terminal_event(), None);
        assert!(working.messages.is_empty());
    }
}
