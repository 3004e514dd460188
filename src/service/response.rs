//! A2A service response types

use crate::{
    protocol::{agent::AgentCard, task::TaskStatus},
    transport::StreamResponse,
};

/// Response from an A2A service operation
#[derive(Debug)]
pub enum A2AResponse {
    /// Agent card response (from DiscoverAgent)
    AgentCard(Box<AgentCard>),

    /// Task accepted (from CreateTask)
    TaskCreated {
        /// Id the agent assigned to the task
        task_id: String,
    },

    /// Current task status (from GetTask)
    TaskStatus(TaskStatus),

    /// Acknowledgement (from SendMessage, CancelTask)
    Ack,

    /// Open event stream (from SubscribeTask)
    Stream(StreamResponse),

    /// Empty response (for operations with no return value)
    Empty,
}

impl A2AResponse {
    /// Extract an agent card from the response, if present
    pub fn into_agent_card(self) -> Option<AgentCard> {
        match self {
            A2AResponse::AgentCard(card) => Some(*card),
            _ => None,
        }
    }

    /// Extract the created task id, if present
    pub fn into_task_id(self) -> Option<String> {
        match self {
            A2AResponse::TaskCreated { task_id } => Some(task_id),
            _ => None,
        }
    }

    /// Extract a task status, if present
    pub fn into_task_status(self) -> Option<TaskStatus> {
        match self {
            A2AResponse::TaskStatus(status) => Some(status),
            _ => None,
        }
    }

    /// Extract the open event stream, if present
    pub fn into_stream(self) -> Option<StreamResponse> {
        match self {
            A2AResponse::Stream(stream) => Some(stream),
            _ => None,
        }
    }

    /// Check if the response is empty
    pub fn is_empty(&self) -> bool {
        matches!(self, A2AResponse::Empty)
    }
}
