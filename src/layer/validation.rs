//! Validation layer for A2A protocol requests and responses

use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use tower_layer::Layer;
use tower_service::Service;

use crate::{
    protocol::{
        error::A2AError,
        message::{Message, MessagePart},
        operation::A2AOperation,
    },
    service::{A2ARequest, A2AResponse},
};

/// Layer that validates A2A protocol requests and responses
#[derive(Clone, Debug, Default)]
pub struct A2AValidationLayer;

impl A2AValidationLayer {
    /// Create a new validation layer
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for A2AValidationLayer {
    type Service = A2AValidationService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        A2AValidationService { inner }
    }
}

/// Validation service that wraps an inner service
#[derive(Clone)]
pub struct A2AValidationService<S> {
    inner: S,
}

impl<S> A2AValidationService<S> {
    fn validate_message(message: &Message) -> Result<(), A2AError> {
        if message.parts.is_empty() {
            return Err(A2AError::Validation(
                "Message must have at least one part".into(),
            ));
        }

        for part in &message.parts {
            match part {
                MessagePart::Text { text } => {
                    if text.is_empty() {
                        return Err(A2AError::Validation("Text part cannot be empty".into()));
                    }
                }
                MessagePart::File { file } => {
                    if file.name.is_empty() {
                        return Err(A2AError::Validation("File name cannot be empty".into()));
                    }
                    if file.file_with_uri.is_none() && file.file_with_bytes.is_none() {
                        return Err(A2AError::Validation(
                            "File must have either URI or bytes content".into(),
                        ));
                    }
                }
                MessagePart::Data { .. } => {}
            }
        }

        Ok(())
    }

    /// Validate an A2A request
    fn validate_request(req: &A2ARequest) -> Result<(), A2AError> {
        match &req.operation {
            A2AOperation::CreateTask { initial_message } => {
                Self::validate_message(initial_message)?;
            }
            A2AOperation::SendMessage { task_id, message } => {
                if task_id.is_empty() {
                    return Err(A2AError::Validation("Task ID cannot be empty".into()));
                }
                Self::validate_message(message)?;
            }
            A2AOperation::SubscribeTask { task_id, .. }
            | A2AOperation::GetTask { task_id }
            | A2AOperation::CancelTask { task_id } => {
                if task_id.is_empty() {
                    return Err(A2AError::Validation("Task ID cannot be empty".into()));
                }
            }
            A2AOperation::DiscoverAgent => {}
        }

        if req.context.agent_id.is_empty() {
            return Err(A2AError::Validation("Agent ID cannot be empty".into()));
        }

        Ok(())
    }

    /// Validate an A2A response
    fn validate_response(resp: &A2AResponse) -> Result<(), A2AError> {
        match resp {
            A2AResponse::AgentCard(card) => card.validate(),
            A2AResponse::TaskCreated { task_id } if task_id.is_empty() => Err(
                A2AError::Protocol("Agent returned an empty task id".into()),
            ),
            _ => Ok(()),
        }
    }
}

impl<S> Service<A2ARequest> for A2AValidationService<S>
where
    S: Service<A2ARequest, Response = A2AResponse, Error = A2AError> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = A2AResponse;
    type Error = A2AError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: A2ARequest) -> Self::Future {
        // Validate request before passing to inner service
        if let Err(e) = Self::validate_request(&req) {
            return Box::pin(async move { Err(e) });
        }

        let mut inner = self.inner.clone();
        Box::pin(async move {
            let response = inner.call(req).await?;
            Self::validate_response(&response)?;
            Ok(response)
        })
    }
}
