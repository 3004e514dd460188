//! A2A service request types

use std::collections::HashMap;

use url::Url;

use crate::{layer::auth::AuthCredentials, protocol::operation::A2AOperation};

/// A request to the A2A service
///
/// This wraps an A2A operation with the context needed to execute it against one agent
#[derive(Debug, Clone)]
pub struct A2ARequest {
    /// The A2A operation to execute
    pub operation: A2AOperation,

    /// Request context (target agent, auth, metadata)
    pub context: RequestContext,
}

impl A2ARequest {
    /// Create a new A2A request
    pub fn new(operation: A2AOperation, context: RequestContext) -> Self {
        Self { operation, context }
    }
}

/// Request context containing the target agent and per-call metadata
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Logical name of the target agent
    pub agent_id: String,

    /// Base URL the operation endpoint is resolved against
    pub agent_url: Url,

    /// Authentication credentials (if any)
    pub auth: Option<AuthCredentials>,

    /// Additional metadata headers
    pub metadata: HashMap<String, String>,
}

impl RequestContext {
    /// Create a new request context
    pub fn new(agent_id: impl Into<String>, agent_url: Url) -> Self {
        Self {
            agent_id: agent_id.into(),
            agent_url,
            auth: None,
            metadata: HashMap::new(),
        }
    }

    /// Set authentication credentials
    pub fn with_auth(mut self, auth: AuthCredentials) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Add a metadata header
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}
