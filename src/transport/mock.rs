use std::{
    sync::{Arc, Mutex},
    task::{Context, Poll},
};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;

use crate::{
    protocol::{error::A2AError, event::EventFrame},
    transport::{StreamResponse, Transport, TransportRequest, TransportResponse},
};

type UnaryHandler = dyn Fn(&TransportRequest) -> Result<TransportResponse, A2AError> + Send + Sync;
type StreamHandler = dyn Fn(&TransportRequest) -> Result<StreamResponse, A2AError> + Send + Sync;

/// Mock transport for internal testing
///
/// Unary and streaming calls are answered by closures, and every request is
/// recorded so tests can assert on what went over the wire.
#[derive(Clone)]
pub(crate) struct MockTransport {
    unary: Arc<UnaryHandler>,
    stream: Arc<StreamHandler>,
    requests: Arc<Mutex<Vec<TransportRequest>>>,
}

impl MockTransport {
    /// Create a new mock transport with a custom unary handler
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&TransportRequest) -> Result<TransportResponse, A2AError> + Send + Sync + 'static,
    {
        Self {
            unary: Arc::new(handler),
            stream: Arc::new(|_| Err(A2AError::Protocol("no stream configured".into()))),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Create a mock transport that always returns 200 OK
    pub fn ok() -> Self {
        Self::new(|_| Ok(TransportResponse::new(200)))
    }

    /// Answer streaming requests with a custom handler
    pub fn with_stream<F>(mut self, handler: F) -> Self
    where
        F: Fn(&TransportRequest) -> Result<StreamResponse, A2AError> + Send + Sync + 'static,
    {
        self.stream = Arc::new(handler);
        self
    }

    /// Requests seen so far
    pub fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Paths of requests seen so far, prefixed by method
    pub fn calls(&self) -> Vec<String> {
        self.requests()
            .iter()
            .map(|r| format!("{} {}", r.method, r.path()))
            .collect()
    }
}

/// JSON response helper
pub(crate) fn json_response(status: u16, value: serde_json::Value) -> TransportResponse {
    TransportResponse::new(status)
        .header("content-type", "application/json")
        .body(Bytes::from(serde_json::to_vec(&value).unwrap()))
}

/// A newline-delimited stream of the given frames that ends after the last one
pub(crate) fn ndjson_stream(frames: Vec<EventFrame>) -> StreamResponse {
    let chunks: Vec<Result<Bytes, A2AError>> = frames
        .into_iter()
        .map(|frame| {
            let mut line = serde_json::to_vec(&frame).unwrap();
            line.push(b'\n');
            Ok(Bytes::from(line))
        })
        .collect();
    StreamResponse::new(
        200,
        Some("application/x-ndjson".into()),
        futures::stream::iter(chunks).boxed(),
    )
}

/// Frames followed by a connection that never delivers anything else
pub(crate) fn ndjson_then_hang(frames: Vec<EventFrame>) -> StreamResponse {
    let opened = ndjson_stream(frames);
    StreamResponse::new(
        200,
        opened.content_type,
        opened.body.chain(futures::stream::pending()).boxed(),
    )
}

#[async_trait]
impl Transport for MockTransport {
    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), A2AError>> {
        Poll::Ready(Ok(()))
    }

    async fn execute(&self, request: TransportRequest) -> Result<TransportResponse, A2AError> {
        self.requests.lock().unwrap().push(request.clone());
        (self.unary)(&request)
    }

    async fn open_stream(&self, request: TransportRequest) -> Result<StreamResponse, A2AError> {
        self.requests.lock().unwrap().push(request.clone());
        (self.stream)(&request)
    }

    fn supports_streaming(&self) -> bool {
        true
    }
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport").finish()
    }
}
