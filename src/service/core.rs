//! Core A2A protocol service implementation

use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use tower_service::Service;

use crate::{
    codec::{Codec, EventStreamCodec},
    protocol::{error::A2AError, operation::A2AOperation},
    service::{A2ARequest, A2AResponse},
    transport::{is_retryable_status, Transport, TransportRequest, TransportResponse},
};

/// Protocol version advertised on every request
pub const PROTOCOL_VERSION: &str = "1.0";

/// Core A2A protocol service that wraps a transport
///
/// This service implements the Tower `Service` trait: it encodes an operation with
/// the codec, executes it over the transport and classifies the outcome. Streaming
/// operations resolve to an open [`A2AResponse::Stream`].
pub struct A2AProtocolService<T> {
    transport: T,
    codec: Arc<dyn Codec>,
    events: EventStreamCodec,
}

impl<T> A2AProtocolService<T>
where
    T: Transport,
{
    /// Create a new A2A protocol service
    ///
    /// # Arguments
    ///
    /// * `transport` - The underlying transport implementation
    /// * `codec` - The codec for serialization/deserialization
    pub fn new(transport: T, codec: Arc<dyn Codec>) -> Self {
        Self {
            transport,
            codec,
            events: EventStreamCodec::new(),
        }
    }

    /// Build a transport request from an A2A operation
    fn build_transport_request(
        req: &A2ARequest,
        codec: &dyn Codec,
        events: &EventStreamCodec,
    ) -> Result<TransportRequest, A2AError> {
        let url = req.operation.url_for(&req.context.agent_url)?;
        let method = req.operation.method();

        let accept = if req.operation.is_streaming() {
            events.accept()
        } else {
            codec.content_type()
        };

        let mut transport_req = TransportRequest::new(url, method)
            .header("Accept", accept)
            .header("A2A-Version", PROTOCOL_VERSION);

        // Add authentication headers if present
        if let Some(auth) = &req.context.auth {
            let (header, value) = auth.to_header();
            transport_req = transport_req.header(header, value);
        }

        // Add custom metadata headers
        for (key, value) in &req.context.metadata {
            transport_req = transport_req.header(key.clone(), value.clone());
        }

        let body = codec.encode_request(&req.operation)?;
        if !body.is_empty() && method != "GET" {
            transport_req = transport_req
                .header("Content-Type", codec.content_type())
                .body(body);
        }

        Ok(transport_req)
    }

    /// Parse a transport response into an A2A response
    fn parse_transport_response(
        transport_resp: TransportResponse,
        codec: &dyn Codec,
        operation: &A2AOperation,
    ) -> Result<A2AResponse, A2AError> {
        if !transport_resp.is_success() {
            let detail = Self::error_detail(&transport_resp.body);
            return Err(Self::classify_status(
                transport_resp.status,
                detail,
                operation,
            ));
        }

        codec.decode_response(&transport_resp.body, operation)
    }

    /// Pull a human-readable message out of an error body
    fn error_detail(body: &[u8]) -> String {
        if let Ok(json) = serde_json::from_slice::<serde_json::Value>(body) {
            for key in ["message", "error", "detail"] {
                if let Some(message) = json.get(key).and_then(|v| v.as_str()) {
                    return message.to_string();
                }
            }
        }
        String::from_utf8_lossy(body).chars().take(200).collect()
    }

    /// Map an error status to an error, depending on what was attempted
    fn classify_status(status: u16, detail: String, operation: &A2AOperation) -> A2AError {
        if let A2AOperation::DiscoverAgent = operation {
            return A2AError::InvalidCard(format!(
                "discovery returned HTTP {}: {}",
                status, detail
            ));
        }

        if is_retryable_status(status) {
            return A2AError::Transport(format!("HTTP {}: {}", status, detail));
        }

        if operation.is_streaming() && matches!(status, 405 | 406 | 501) {
            return A2AError::StreamingUnavailable(format!("HTTP {}: {}", status, detail));
        }

        match (status, operation.task_id()) {
            (401 | 403, _) => A2AError::Auth(detail),
            (404 | 410, Some(task_id)) => A2AError::TaskNotFound {
                task_id: task_id.to_string(),
            },
            _ => A2AError::Rejected(format!("HTTP {}: {}", status, detail)),
        }
    }
}

impl<T> Service<A2ARequest> for A2AProtocolService<T>
where
    T: Transport + Clone,
{
    type Response = A2AResponse;
    type Error = A2AError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.transport.poll_ready(cx)
    }

    fn call(&mut self, req: A2ARequest) -> Self::Future {
        let transport = self.transport.clone();
        let codec = self.codec.clone();
        let events = self.events;

        Box::pin(async move {
            let transport_req = Self::build_transport_request(&req, codec.as_ref(), &events)?;

            if req.operation.is_streaming() {
                let stream = transport.open_stream(transport_req).await?;
                if !stream.is_success() {
                    return Err(Self::classify_status(
                        stream.status,
                        format!("event stream refused with HTTP {}", stream.status),
                        &req.operation,
                    ));
                }
                return Ok(A2AResponse::Stream(stream));
            }

            let transport_resp = transport.execute(transport_req).await?;

            Self::parse_transport_response(transport_resp, codec.as_ref(), &req.operation)
        })
    }
}

impl<T> Clone for A2AProtocolService<T>
where
    T: Clone,
{
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            codec: self.codec.clone(),
            events: self.events,
        }
    }
}
