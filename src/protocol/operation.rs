//! A2A protocol operations

use url::Url;

use super::{error::A2AError, message::Message};

/// A2A protocol operations
///
/// Each variant is one call of the task protocol. The HTTP binding is described by
/// [`A2AOperation::endpoint`] and [`A2AOperation::method`].
#[derive(Debug, Clone)]
pub enum A2AOperation {
    /// Fetch the agent card
    DiscoverAgent,

    /// Create a task with its first message
    CreateTask {
        /// The message that opens the task
        initial_message: Message,
    },

    /// Send a follow-up message to a task
    SendMessage {
        /// Target task
        task_id: String,

        /// The message to send
        message: Message,
    },

    /// Subscribe to a task's event stream
    SubscribeTask {
        /// The task ID to subscribe to
        task_id: String,

        /// Resume after this sequence number
        after: Option<u64>,
    },

    /// Read a task's current status, for agents without an event stream
    GetTask {
        /// The task ID to look up
        task_id: String,
    },

    /// Cancel a task
    CancelTask {
        /// The task ID to cancel
        task_id: String,
    },
}

impl A2AOperation {
    /// Get the HTTP endpoint path for this operation
    pub fn endpoint(&self) -> String {
        match self {
            A2AOperation::DiscoverAgent => "/.well-known/agent-card".to_string(),
            A2AOperation::CreateTask { .. } => "/tasks".to_string(),
            A2AOperation::SendMessage { task_id, .. } => format!("/tasks/{}/messages", task_id),
            A2AOperation::SubscribeTask { task_id, after } => match after {
                Some(seq) => format!("/tasks/{}/events?after={}", task_id, seq),
                None => format!("/tasks/{}/events", task_id),
            },
            A2AOperation::GetTask { task_id } => format!("/tasks/{}", task_id),
            A2AOperation::CancelTask { task_id } => format!("/tasks/{}/cancel", task_id),
        }
    }

    /// Get the HTTP method for this operation
    pub fn method(&self) -> &'static str {
        match self {
            A2AOperation::DiscoverAgent
            | A2AOperation::SubscribeTask { .. }
            | A2AOperation::GetTask { .. } => "GET",
            A2AOperation::CreateTask { .. }
            | A2AOperation::SendMessage { .. }
            | A2AOperation::CancelTask { .. } => "POST",
        }
    }

    /// Check if this operation expects a streaming response
    pub fn is_streaming(&self) -> bool {
        matches!(self, A2AOperation::SubscribeTask { .. })
    }

    /// Task the operation refers to, if any
    pub fn task_id(&self) -> Option<&str> {
        match self {
            A2AOperation::SendMessage { task_id, .. }
            | A2AOperation::SubscribeTask { task_id, .. }
            | A2AOperation::GetTask { task_id }
            | A2AOperation::CancelTask { task_id } => Some(task_id),
            A2AOperation::DiscoverAgent | A2AOperation::CreateTask { .. } => None,
        }
    }

    /// Resolve the operation's endpoint against an agent base URL.
    ///
    /// Any path prefix on the base (e.g. `http://host/a2a`) is preserved.
    pub fn url_for(&self, base: &Url) -> Result<Url, A2AError> {
        let joined = format!("{}{}", base.as_str().trim_end_matches('/'), self.endpoint());
        Ok(Url::parse(&joined)?)
    }
}
