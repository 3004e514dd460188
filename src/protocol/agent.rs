//! Agent discovery and capability types

use serde::{Deserialize, Serialize};
use url::Url;

use super::error::A2AError;

/// Agent Card for agent discovery
///
/// The Agent Card is published at `/.well-known/agent-card` and describes the
/// agent's identity, the capability tags it serves and where tasks are sent.
/// Cards are immutable once fetched; the registry replaces them wholesale.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentCard {
    /// Identifier the agent reports for itself
    pub agent_id: String,

    /// Declared capabilities, in the agent's preference order
    #[serde(default)]
    pub capabilities: Vec<Capability>,

    /// Protocol version spoken by the agent
    #[serde(default = "default_protocol_version")]
    pub protocol_version: String,

    /// Task endpoint; falls back to the discovery base endpoint when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<Url>,

    /// Human-readable description of the agent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Authentication the agent requires, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<SecurityScheme>,
}

fn default_protocol_version() -> String {
    "1.0".to_string()
}

impl AgentCard {
    /// Create a new agent card
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            capabilities: Vec::new(),
            protocol_version: default_protocol_version(),
            endpoint: None,
            description: None,
            auth: None,
        }
    }

    /// Add a capability to the card
    pub fn with_capability(mut self, capability: impl Into<Capability>) -> Self {
        self.capabilities.push(capability.into());
        self
    }

    /// Set the task endpoint
    pub fn with_endpoint(mut self, endpoint: Url) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the authentication requirement
    pub fn with_auth(mut self, scheme: SecurityScheme) -> Self {
        self.auth = Some(scheme);
        self
    }

    /// Capability tags in declaration order
    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.capabilities.iter().map(|c| c.tag.as_str())
    }

    /// Whether the card declares the given capability tag
    pub fn has_capability(&self, tag: &str) -> bool {
        self.tags().any(|t| t.eq_ignore_ascii_case(tag))
    }

    /// Endpoint tasks should be sent to
    pub fn task_endpoint<'a>(&'a self, base: &'a Url) -> &'a Url {
        self.endpoint.as_ref().unwrap_or(base)
    }

    /// Check the card is usable for routing
    ///
    /// # Errors
    ///
    /// Returns [`A2AError::InvalidCard`] if the agent id or a capability tag is blank
    pub fn validate(&self) -> Result<(), A2AError> {
        if self.agent_id.trim().is_empty() {
            return Err(A2AError::InvalidCard("agentId cannot be empty".into()));
        }
        if self.capabilities.iter().any(|c| c.tag.trim().is_empty()) {
            return Err(A2AError::InvalidCard(format!(
                "agent '{}' declares an empty capability tag",
                self.agent_id
            )));
        }
        Ok(())
    }
}

/// A capability tag with an optional free-form description
///
/// The tag is opaque to the protocol layer; only the decision function looks at it.
/// On the wire a capability is either a bare string or `{"tag", "description"}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(from = "CapabilityRepr", into = "CapabilityRepr")]
pub struct Capability {
    /// Capability tag, e.g. "sql" or "retrieval"
    pub tag: String,

    /// Description passed to the decision function
    pub description: Option<String>,
}

impl Capability {
    /// Create a bare capability tag
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            description: None,
        }
    }

    /// Attach a description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl From<&str> for Capability {
    fn from(tag: &str) -> Self {
        Self::new(tag)
    }
}

impl From<String> for Capability {
    fn from(tag: String) -> Self {
        Self::new(tag)
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum CapabilityRepr {
    Tag(String),
    Described {
        tag: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
}

impl From<CapabilityRepr> for Capability {
    fn from(repr: CapabilityRepr) -> Self {
        match repr {
            CapabilityRepr::Tag(tag) => Capability::new(tag),
            CapabilityRepr::Described { tag, description } => Capability { tag, description },
        }
    }
}

impl From<Capability> for CapabilityRepr {
    fn from(capability: Capability) -> Self {
        match capability.description {
            None => CapabilityRepr::Tag(capability.tag),
            Some(description) => CapabilityRepr::Described {
                tag: capability.tag,
                description: Some(description),
            },
        }
    }
}

/// API Key security scheme
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeySecurityScheme {
    pub description: Option<String>,
    #[serde(rename = "in")]
    pub location: String,
    pub name: String,
}

/// HTTP authentication security scheme
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpAuthSecurityScheme {
    pub description: Option<String>,
    pub scheme: String,
    pub bearer_format: Option<String>,
}

/// Security scheme an agent advertises on its card
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum SecurityScheme {
    #[serde(rename = "apiKeySecurityScheme")]
    ApiKey(ApiKeySecurityScheme),
    #[serde(rename = "httpAuthSecurityScheme")]
    HttpAuth(HttpAuthSecurityScheme),
}
