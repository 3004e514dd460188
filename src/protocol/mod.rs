//! Core A2A protocol types and definitions

pub mod agent;
pub mod error;
pub mod event;
pub mod message;
pub mod operation;
pub mod task;

pub use agent::{AgentCard, Capability, SecurityScheme};
pub use error::{A2AError, A2AResult, ErrorKind};
pub use event::{Event, EventFrame};
pub use message::{Message, MessagePart, Role};
pub use operation::A2AOperation;
pub use task::{Task, TaskState, TaskStatus};
