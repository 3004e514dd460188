//! Builder that assembles a dispatcher from its configuration

use std::sync::Arc;

use crate::{
    client::{DispatchConfig, ProtocolClient},
    dispatch::Dispatcher,
    protocol::error::A2AError,
    registry::AgentCardRegistry,
    router::{CapabilityMatcher, DecisionFunction, Router},
    task::TaskManager,
    transport::{HttpTransport, Transport},
};

/// Builder for constructing a [`Dispatcher`]
///
/// Wires the protocol client, agent card registry, router and task manager from a
/// [`DispatchConfig`]. Without an explicit decision function the built-in
/// [`CapabilityMatcher`] is used, extended with the configured routing rules.
///
/// # Example
///
/// ```rust,no_run
/// use a2a_dispatch::prelude::*;
///
/// # fn example() -> Result<(), A2AError> {
/// let config = DispatchConfig::from_json(
///     r#"{"agents": {"sql-agent": "http://localhost:10002", "rag-agent": "http://localhost:10001"}}"#,
/// )?;
/// let dispatcher = DispatcherBuilder::new_http(config).build()?;
/// # Ok(())
/// # }
/// ```
///
/// # Compiler Error
/// This will fail to compile if it is not clear to the compiler which type implementing
/// `Transport` is being used as underlying transport. This is expected behaviour.
///
/// ```compile_fail
/// let dispatcher = a2a_dispatch::client::DispatcherBuilder::new(Default::default()).build();
/// ```
pub struct DispatcherBuilder<T: Transport> {
    config: DispatchConfig,
    transport: Option<T>,
    decide: Option<Arc<dyn DecisionFunction>>,
}

impl<T: Transport> DispatcherBuilder<T> {
    /// Start from a configuration; a transport must be supplied before building
    pub fn new(config: DispatchConfig) -> Self {
        Self {
            config,
            transport: None,
            decide: None,
        }
    }

    /// Use a custom transport
    ///
    /// # Arguments
    ///
    /// * `transport` - The transport implementation to use
    pub fn with_transport(mut self, transport: T) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Use a custom decision function
    pub fn with_decision_function(mut self, decide: Arc<dyn DecisionFunction>) -> Self {
        self.decide = Some(decide);
        self
    }

    /// The configuration being built from
    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Build the dispatcher
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The configuration does not validate
    /// - No transport has been configured
    pub fn build(self) -> Result<Dispatcher<T>, A2AError> {
        self.config.validate()?;

        let transport = self.transport.ok_or_else(|| {
            A2AError::Config("Transport not configured. Call new_http() or with_transport()".into())
        })?;

        let client = ProtocolClient::new(
            transport,
            self.config.credentials.clone(),
            self.config.backoff(),
        );
        let registry = AgentCardRegistry::new(
            client.clone(),
            self.config.agents.clone(),
            self.config.card_ttl(),
        );

        let decide = self.decide.unwrap_or_else(|| {
            Arc::new(CapabilityMatcher::with_defaults().with_rules(self.config.routing_rules.clone()))
        });

        let router = Router::new(registry, decide);
        let tasks = TaskManager::new(client, self.config.task_timeout());

        tracing::debug!(
            agents = self.config.agents.len(),
            task_timeout_ms = self.config.task_timeout_ms,
            "dispatcher built"
        );

        Ok(Dispatcher::new(router, tasks))
    }
}

impl DispatcherBuilder<HttpTransport> {
    /// Create a builder with the HTTP transport, honouring the configured request timeout
    pub fn new_http(config: DispatchConfig) -> Self {
        let transport = HttpTransport::new().with_request_timeout(config.request_timeout());
        Self::new(config).with_transport(transport)
    }
}
