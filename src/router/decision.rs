//! Decision function seam
//!
//! The router does not decide anything itself. It hands the query and the reachable
//! candidates to a [`DecisionFunction`], which may be an LLM call, a rule engine or a
//! test double, and walks the ranking it returns.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::protocol::{agent::Capability, error::A2AError, message::Message};

/// Conversation the query belongs to
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationContext {
    /// Correlates the turns of one conversation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,

    /// Earlier turns, oldest first
    #[serde(default)]
    pub history: Vec<Message>,
}

impl ConversationContext {
    /// Context for a fresh conversation
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the conversation id
    pub fn with_context_id(mut self, context_id: impl Into<String>) -> Self {
        self.context_id = Some(context_id.into());
        self
    }

    /// Append an earlier turn
    pub fn with_turn(mut self, message: Message) -> Self {
        self.history.push(message);
        self
    }
}

/// An agent the decision function may choose
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateAgent {
    /// Logical agent name
    pub agent_id: String,

    /// Capabilities from the agent's card
    pub capabilities: Vec<Capability>,

    /// Description from the agent's card
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Everything a decision function gets to look at
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionRequest {
    /// The user's query text
    pub query: String,

    /// Conversation the query belongs to
    pub context: ConversationContext,

    /// Reachable agents, ordered by name
    pub candidates: Vec<CandidateAgent>,
}

/// Outcome of a decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Agents in order of preference
    Ranked {
        /// Preferred agent first, then fallbacks
        ranking: Vec<String>,

        /// Why the first agent was chosen
        rationale: String,
    },

    /// No candidate can serve the query
    NoneFits {
        /// Why nothing fits
        rationale: String,
    },
}

impl Verdict {
    /// Ranking with a single preferred agent
    pub fn pick(agent_id: impl Into<String>, rationale: impl Into<String>) -> Self {
        Verdict::Ranked {
            ranking: vec![agent_id.into()],
            rationale: rationale.into(),
        }
    }

    /// Ranking with fallbacks
    pub fn ranked<I, S>(ranking: I, rationale: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Verdict::Ranked {
            ranking: ranking.into_iter().map(Into::into).collect(),
            rationale: rationale.into(),
        }
    }

    /// Nothing fits
    pub fn none_fits(rationale: impl Into<String>) -> Self {
        Verdict::NoneFits {
            rationale: rationale.into(),
        }
    }
}

/// Chooses which agent serves a query
///
/// Implementations must be side-effect free with respect to the registry; the router
/// gives them a value snapshot only. A call may be abandoned at any time by dropping
/// its future.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DecisionFunction: Send + Sync {
    /// Rank the candidates for a query
    ///
    /// # Errors
    ///
    /// Returns [`A2AError::Decision`] when the decision could not be made at all
    async fn decide(&self, request: &DecisionRequest) -> Result<Verdict, A2AError>;
}
