//! Query routing
//!
//! The router takes a value snapshot of the registry, offers the reachable agents to
//! the decision function and turns its ranking into a [`Decision`].

pub mod decision;
pub mod matcher;

use std::sync::Arc;

pub use decision::{CandidateAgent, ConversationContext, DecisionFunction, DecisionRequest, Verdict};
pub use matcher::CapabilityMatcher;

use crate::{
    protocol::error::A2AError,
    registry::{AgentCardRegistry, RegistrySnapshot},
    transport::Transport,
};

/// Which agent serves a query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    /// The chosen agent
    pub target_agent_id: String,

    /// Why it was chosen
    pub rationale: String,

    /// Reachable fallbacks, in order of preference
    pub alternatives: Vec<String>,
}

impl Decision {
    /// The target followed by the alternatives
    pub fn candidates(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.target_agent_id.as_str()).chain(self.alternatives.iter().map(String::as_str))
    }
}

/// Selects the target agent of each query
pub struct Router<T: Transport> {
    registry: AgentCardRegistry<T>,
    decide: Arc<dyn DecisionFunction>,
}

impl<T: Transport> Router<T> {
    /// Create a router over a registry and a decision function
    pub fn new(registry: AgentCardRegistry<T>, decide: Arc<dyn DecisionFunction>) -> Self {
        Self { registry, decide }
    }

    /// The registry the router reads from
    pub fn registry(&self) -> &AgentCardRegistry<T> {
        &self.registry
    }

    /// Decide which agent serves `query`
    ///
    /// # Errors
    ///
    /// [`A2AError::NoCapableAgent`] when no agent is reachable, the decision function
    /// finds nothing that fits, or every ranked agent is unavailable. Errors of the
    /// decision function itself are passed through.
    pub async fn route(
        &self,
        query: &str,
        context: &ConversationContext,
    ) -> Result<Decision, A2AError> {
        let snapshot = self.registry.snapshot().await;
        for (agent_id, kind) in snapshot.failed() {
            tracing::debug!(agent_id, %kind, "agent excluded from routing");
        }

        self.route_with(&snapshot, query, context).await
    }

    /// Decide against a snapshot that was already taken
    pub async fn route_with(
        &self,
        snapshot: &RegistrySnapshot,
        query: &str,
        context: &ConversationContext,
    ) -> Result<Decision, A2AError> {
        if snapshot.is_empty() {
            return Err(A2AError::NoCapableAgent("no agent is reachable".into()));
        }

        let request = DecisionRequest {
            query: query.to_string(),
            context: context.clone(),
            candidates: snapshot
                .cards()
                .map(|(agent_id, card)| CandidateAgent {
                    agent_id: agent_id.to_string(),
                    capabilities: card.capabilities.clone(),
                    description: card.description.clone(),
                })
                .collect(),
        };

        let (ranking, rationale) = match self.decide.decide(&request).await? {
            Verdict::Ranked { ranking, rationale } => (ranking, rationale),
            Verdict::NoneFits { rationale } => return Err(A2AError::NoCapableAgent(rationale)),
        };

        let mut usable: Vec<String> = Vec::new();
        for agent_id in ranking {
            if usable.contains(&agent_id) {
                continue;
            }
            if snapshot.is_reachable(&agent_id) {
                usable.push(agent_id);
            } else {
                tracing::debug!(agent_id = %agent_id, "skipping ranked agent that is not reachable");
            }
        }

        if usable.is_empty() {
            return Err(A2AError::NoCapableAgent(format!(
                "no ranked agent is reachable ({})",
                rationale
            )));
        }

        let target_agent_id = usable.remove(0);
        tracing::info!(
            agent_id = %target_agent_id,
            alternatives = usable.len(),
            rationale = %rationale,
            "routing to {} agent",
            target_agent_id
        );

        Ok(Decision {
            target_agent_id,
            rationale,
            alternatives: usable,
        })
    }
}

impl<T: Transport> Clone for Router<T> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            decide: self.decide.clone(),
        }
    }
}
