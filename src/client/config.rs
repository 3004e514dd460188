//! Dispatcher configuration

use std::{
    collections::{BTreeMap, HashMap},
    path::Path,
    time::Duration,
};

use serde::Deserialize;
use url::Url;

use crate::{layer::AuthCredentials, protocol::error::A2AError, transport::backoff::BackoffPolicy};

/// Configuration for a dispatcher
///
/// Loaded once (from JSON or built in code), validated, then shared read-only.
///
/// ```json
/// {
///   "agents": {
///     "sql-agent": "http://localhost:10002",
///     "rag-agent": "http://localhost:10001"
///   },
///   "taskTimeoutMs": 60000
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchConfig {
    /// Logical agent name to base endpoint
    pub agents: HashMap<String, Url>,

    /// Per-agent credentials
    #[serde(default)]
    pub credentials: HashMap<String, AuthCredentials>,

    /// Wall-clock budget of a task, measured from creation
    #[serde(default = "default_task_timeout_ms")]
    pub task_timeout_ms: u64,

    /// Consecutive transient failures tolerated before giving up
    #[serde(default = "default_max_retries")]
    pub transport_max_retries: u32,

    /// First reconnect delay
    #[serde(default = "default_backoff_base_ms")]
    pub transport_backoff_base_ms: u64,

    /// Upper bound on any reconnect delay
    #[serde(default = "default_backoff_cap_ms")]
    pub transport_backoff_cap_ms: u64,

    /// Agent card lifetime; cards live for the whole process when absent
    #[serde(default)]
    pub card_cache_ttl_ms: Option<u64>,

    /// Timeout of a single unary HTTP call
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Extra keywords per capability tag for the built-in matcher
    #[serde(default)]
    pub routing_rules: BTreeMap<String, Vec<String>>,
}

fn default_task_timeout_ms() -> u64 {
    60_000
}

fn default_max_retries() -> u32 {
    5
}

fn default_backoff_base_ms() -> u64 {
    500
}

fn default_backoff_cap_ms() -> u64 {
    8_000
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

impl DispatchConfig {
    /// Create a configuration with no agents and default limits
    pub fn new() -> Self {
        Self {
            agents: HashMap::new(),
            credentials: HashMap::new(),
            task_timeout_ms: default_task_timeout_ms(),
            transport_max_retries: default_max_retries(),
            transport_backoff_base_ms: default_backoff_base_ms(),
            transport_backoff_cap_ms: default_backoff_cap_ms(),
            card_cache_ttl_ms: None,
            request_timeout_ms: default_request_timeout_ms(),
            routing_rules: BTreeMap::new(),
        }
    }

    /// Parse a configuration from JSON
    pub fn from_json(json: &str) -> Result<Self, A2AError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| A2AError::Config(format!("invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, A2AError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            A2AError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&json)
    }

    /// Register an agent base endpoint under a logical name
    pub fn with_agent(mut self, name: impl Into<String>, endpoint: Url) -> Self {
        self.agents.insert(name.into(), endpoint);
        self
    }

    /// Attach credentials to an agent
    pub fn with_credentials(mut self, name: impl Into<String>, credentials: AuthCredentials) -> Self {
        self.credentials.insert(name.into(), credentials);
        self
    }

    /// Set the task timeout
    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the reconnect budget and delays
    pub fn with_backoff(mut self, max_retries: u32, base: Duration, cap: Duration) -> Self {
        self.transport_max_retries = max_retries;
        self.transport_backoff_base_ms = base.as_millis() as u64;
        self.transport_backoff_cap_ms = cap.as_millis() as u64;
        self
    }

    /// Set the agent card lifetime
    pub fn with_card_ttl(mut self, ttl: Duration) -> Self {
        self.card_cache_ttl_ms = Some(ttl.as_millis() as u64);
        self
    }

    /// Add matcher keywords for a capability tag
    pub fn with_routing_rule<I, S>(mut self, tag: impl Into<String>, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.routing_rules
            .entry(tag.into())
            .or_default()
            .extend(keywords.into_iter().map(Into::into));
        self
    }

    /// Set the per-call HTTP timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Check the configuration is usable
    ///
    /// # Errors
    ///
    /// Returns [`A2AError::Config`] when no agent is configured, an endpoint is not
    /// http(s), credentials name an unknown agent, or a limit is zero.
    pub fn validate(&self) -> Result<(), A2AError> {
        if self.agents.is_empty() {
            return Err(A2AError::Config("at least one agent must be configured".into()));
        }

        for (name, endpoint) in &self.agents {
            if name.trim().is_empty() {
                return Err(A2AError::Config("agent names cannot be empty".into()));
            }
            if !matches!(endpoint.scheme(), "http" | "https") {
                return Err(A2AError::Config(format!(
                    "agent '{}' has unsupported endpoint scheme '{}'",
                    name,
                    endpoint.scheme()
                )));
            }
        }

        if let Some(name) = self.credentials.keys().find(|n| !self.agents.contains_key(*n)) {
            return Err(A2AError::Config(format!(
                "credentials configured for unknown agent '{}'",
                name
            )));
        }

        if self.task_timeout_ms == 0 {
            return Err(A2AError::Config("taskTimeoutMs must be positive".into()));
        }
        if self.request_timeout_ms == 0 {
            return Err(A2AError::Config("requestTimeoutMs must be positive".into()));
        }
        if self.transport_backoff_cap_ms < self.transport_backoff_base_ms {
            return Err(A2AError::Config(
                "transportBackoffCapMs cannot be below transportBackoffBaseMs".into(),
            ));
        }

        Ok(())
    }

    /// Task timeout as a duration
    pub fn task_timeout(&self) -> Duration {
        Duration::from_millis(self.task_timeout_ms)
    }

    /// Per-call HTTP timeout as a duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Card lifetime, if bounded
    pub fn card_ttl(&self) -> Option<Duration> {
        self.card_cache_ttl_ms.map(Duration::from_millis)
    }

    /// Reconnect policy derived from the transport settings
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_millis(self.transport_backoff_base_ms),
            Duration::from_millis(self.transport_backoff_cap_ms),
            self.transport_max_retries,
        )
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self::new()
    }
}
