//! JSON codec for HTTP+JSON binding

use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;

use crate::{
    codec::Codec,
    protocol::{agent::AgentCard, error::A2AError, operation::A2AOperation, task::TaskStatus},
    service::response::A2AResponse,
};

/// JSON codec for the HTTP+JSON protocol binding
#[derive(Debug, Clone, Default)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a new JSON codec
    pub fn new() -> Self {
        Self
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskCreatedBody {
    task_id: String,
}

impl Codec for JsonCodec {
    fn encode_request(&self, operation: &A2AOperation) -> Result<Bytes, A2AError> {
        let json = match operation {
            A2AOperation::CreateTask { initial_message } => {
                json!({ "initialMessage": initial_message })
            }
            A2AOperation::SendMessage { message, .. } => serde_json::to_value(message)?,
            A2AOperation::CancelTask { task_id } => json!({ "taskId": task_id }),
            // GET requests don't carry bodies
            A2AOperation::DiscoverAgent
            | A2AOperation::SubscribeTask { .. }
            | A2AOperation::GetTask { .. } => return Ok(Bytes::new()),
        };

        let bytes = serde_json::to_vec(&json)?;
        Ok(Bytes::from(bytes))
    }

    fn decode_response(
        &self,
        body: &[u8],
        operation: &A2AOperation,
    ) -> Result<A2AResponse, A2AError> {
        match operation {
            A2AOperation::DiscoverAgent => {
                let card: AgentCard = serde_json::from_slice(body)
                    .map_err(|e| A2AError::InvalidCard(format!("malformed agent card: {}", e)))?;
                card.validate()?;
                Ok(A2AResponse::AgentCard(Box::new(card)))
            }
            A2AOperation::CreateTask { .. } => {
                let created: TaskCreatedBody = serde_json::from_slice(body).map_err(|e| {
                    A2AError::Protocol(format!("malformed task creation response: {}", e))
                })?;
                if created.task_id.is_empty() {
                    return Err(A2AError::Protocol(
                        "task creation response carried an empty taskId".into(),
                    ));
                }
                Ok(A2AResponse::TaskCreated {
                    task_id: created.task_id,
                })
            }
            A2AOperation::GetTask { .. } => {
                let status: TaskStatus = serde_json::from_slice(body).map_err(|e| {
                    A2AError::Protocol(format!("malformed task status: {}", e))
                })?;
                Ok(A2AResponse::TaskStatus(status))
            }
            // Acknowledgements may carry an arbitrary (or empty) body
            A2AOperation::SendMessage { .. } | A2AOperation::CancelTask { .. } => {
                Ok(A2AResponse::Ack)
            }
            // Streaming responses are decoded by the event stream codec
            A2AOperation::SubscribeTask { .. } => Ok(A2AResponse::Empty),
        }
    }

    fn content_type(&self) -> &str {
        "application/json"
    }
}
