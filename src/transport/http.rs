//! HTTP transport implementation for A2A protocol

use std::{
    task::{Context, Poll},
    time::Duration,
};

use async_trait::async_trait;
use futures::StreamExt;

use crate::protocol::error::A2AError;

use super::{StreamResponse, Transport, TransportRequest, TransportResponse};

/// HTTP transport implementation using reqwest
///
/// This transport implements the HTTP+JSON binding of the task protocol. Unary calls
/// are bounded by a per-request timeout; event streams are not, since they stay open
/// for the lifetime of a task.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    request_timeout: Duration,
}

impl HttpTransport {
    /// Create a new HTTP transport
    pub fn new() -> Self {
        Self::with_client(reqwest::Client::new())
    }

    /// Create a new HTTP transport with a custom reqwest client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            request_timeout: Duration::from_secs(30),
        }
    }

    /// Set the timeout applied to each unary request
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn builder(&self, request: &TransportRequest) -> Result<reqwest::RequestBuilder, A2AError> {
        let url = request.url.clone();
        let mut req_builder = match request.method.as_str() {
            "POST" => self.client.post(url),
            "GET" => self.client.get(url),
            "PUT" => self.client.put(url),
            "DELETE" => self.client.delete(url),
            _ => {
                return Err(A2AError::Protocol(format!(
                    "Unsupported HTTP method: {}",
                    request.method
                )))
            }
        };

        for (key, value) in &request.headers {
            req_builder = req_builder.header(key.as_str(), value.as_str());
        }

        if !request.body.is_empty() {
            req_builder = req_builder.body(request.body.clone());
        }

        Ok(req_builder)
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), A2AError>> {
        // HTTP client is always ready
        Poll::Ready(Ok(()))
    }

    async fn execute(&self, request: TransportRequest) -> Result<TransportResponse, A2AError> {
        tracing::debug!(method = %request.method, url = %request.url, "sending request");

        let response = self
            .builder(&request)?
            .timeout(self.request_timeout)
            .send()
            .await?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
            .collect();

        let body = response.bytes().await?;

        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }

    async fn open_stream(&self, request: TransportRequest) -> Result<StreamResponse, A2AError> {
        tracing::debug!(url = %request.url, "opening event stream");

        let response = self.builder(&request)?.send().await?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(A2AError::from))
            .boxed();

        Ok(StreamResponse::new(status, content_type, body))
    }

    fn supports_streaming(&self) -> bool {
        true
    }
}
