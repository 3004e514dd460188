//! Task event types delivered over the event stream

use serde::{Deserialize, Serialize};

use super::{error::ErrorKind, message::Message, message::MessagePart, task::TaskState};

/// A discrete notification about a task's progress
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Event {
    /// A fragment of the message currently being produced
    MessageDelta {
        /// Message the fragment belongs to, when the agent labels it
        #[serde(rename = "messageId", default, skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,

        /// The partial content
        part: MessagePart,
    },

    /// A message is complete
    MessageComplete {
        /// The full message
        message: Message,
    },

    /// The remote agent reports a new task state
    TaskStateChanged {
        /// The reported state
        state: TaskState,
    },

    /// The task failed
    TaskFailed {
        /// Failure classification
        error: ErrorKind,

        /// Human-readable detail
        #[serde(default)]
        detail: String,
    },

    /// The task finished successfully
    TaskEnded,
}

impl Event {
    /// Build a failure event
    pub fn failed(error: ErrorKind, detail: impl Into<String>) -> Self {
        Event::TaskFailed {
            error,
            detail: detail.into(),
        }
    }

    /// Whether this event ends the task
    pub fn is_terminal(&self) -> bool {
        matches!(self, Event::TaskEnded | Event::TaskFailed { .. })
    }
}

/// One event as framed on the wire, with its optional resume position
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventFrame {
    /// Server-assigned sequence number, present when the server retains a log
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,

    /// The event itself
    #[serde(flatten)]
    pub event: Event,
}

impl EventFrame {
    /// Frame without a sequence number
    pub fn new(event: Event) -> Self {
        Self { seq: None, event }
    }

    /// Frame with a sequence number
    pub fn sequenced(seq: u64, event: Event) -> Self {
        Self {
            seq: Some(seq),
            event,
        }
    }
}
