//! Agent card registry
//!
//! Caches the capability descriptor of every configured agent. Readers share the
//! cache through a read lock; refreshed cards replace the old `Arc` under the write
//! lock, and no lock is held while a card is being fetched.
//!
//! An agent whose discovery failed is remembered as unavailable for a cool-down
//! period, so routing does not pay the full retry budget for it on every query.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
    time::Duration,
};

use futures::future::join_all;
use tokio::{sync::RwLock, time::Instant};
use url::Url;

use crate::{
    client::ProtocolClient,
    protocol::{
        agent::AgentCard,
        error::{A2AError, ErrorKind},
    },
    transport::Transport,
};

#[derive(Debug, Clone)]
struct CachedCard {
    card: Arc<AgentCard>,
    fetched_at: Instant,
}

/// Discovery failure remembered until its cool-down passes
#[derive(Debug, Clone)]
struct FailedDiscovery {
    kind: ErrorKind,
    detail: String,
    failed_at: Instant,
}

impl FailedDiscovery {
    fn remember(error: &A2AError) -> Option<Self> {
        let detail = match error {
            A2AError::Unreachable(detail) | A2AError::InvalidCard(detail) => detail.clone(),
            _ => return None,
        };
        Some(Self {
            kind: error.kind(),
            detail,
            failed_at: Instant::now(),
        })
    }

    fn to_error(&self) -> A2AError {
        match self.kind {
            ErrorKind::InvalidCard => A2AError::InvalidCard(self.detail.clone()),
            _ => A2AError::Unreachable(self.detail.clone()),
        }
    }
}

/// Point-in-time view of the registry
///
/// Snapshots are plain values; later refreshes never change one that was already taken.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    cards: BTreeMap<String, Arc<AgentCard>>,
    failed: BTreeMap<String, ErrorKind>,
}

impl RegistrySnapshot {
    /// Build a snapshot from reachable cards and failed agents
    pub fn new(
        cards: impl IntoIterator<Item = (String, Arc<AgentCard>)>,
        failed: impl IntoIterator<Item = (String, ErrorKind)>,
    ) -> Self {
        Self {
            cards: cards.into_iter().collect(),
            failed: failed.into_iter().collect(),
        }
    }

    /// Reachable agents and their cards, ordered by agent name
    pub fn cards(&self) -> impl Iterator<Item = (&str, &Arc<AgentCard>)> {
        self.cards.iter().map(|(name, card)| (name.as_str(), card))
    }

    /// Card of a reachable agent
    pub fn card(&self, agent_id: &str) -> Option<&Arc<AgentCard>> {
        self.cards.get(agent_id)
    }

    /// Whether the agent answered discovery
    pub fn is_reachable(&self, agent_id: &str) -> bool {
        self.cards.contains_key(agent_id)
    }

    /// Agents whose discovery failed, with the reason
    pub fn failed(&self) -> impl Iterator<Item = (&str, ErrorKind)> {
        self.failed.iter().map(|(name, kind)| (name.as_str(), *kind))
    }

    /// Number of reachable agents
    pub fn len(&self) -> usize {
        self.cards.len()
    }

    /// Whether no agent is reachable
    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }
}

/// Registry of agent cards, keyed by logical agent name
pub struct AgentCardRegistry<T: Transport> {
    client: ProtocolClient<T>,
    endpoints: Arc<HashMap<String, Url>>,
    ttl: Option<Duration>,
    cooldown: Duration,
    cache: Arc<RwLock<HashMap<String, CachedCard>>>,
    failures: Arc<RwLock<HashMap<String, FailedDiscovery>>>,
}

impl<T: Transport> AgentCardRegistry<T> {
    /// Create a registry over the configured agent endpoints
    ///
    /// `ttl` of `None` keeps cards for the lifetime of the registry. Failed agents
    /// are not rediscovered until the client's backoff cap has passed.
    pub fn new(
        client: ProtocolClient<T>,
        endpoints: HashMap<String, Url>,
        ttl: Option<Duration>,
    ) -> Self {
        let cooldown = client.backoff().cap;
        Self {
            client,
            endpoints: Arc::new(endpoints),
            ttl,
            cooldown,
            cache: Arc::new(RwLock::new(HashMap::new())),
            failures: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// How long a failed agent is reported unavailable without being rediscovered
    #[must_use]
    pub fn with_failure_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Configured base endpoint of an agent
    pub fn endpoint(&self, agent_id: &str) -> Option<&Url> {
        self.endpoints.get(agent_id)
    }

    /// Names of all configured agents, sorted
    pub fn agent_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.endpoints.keys().cloned().collect();
        ids.sort();
        ids
    }

    fn is_fresh(&self, entry: &CachedCard) -> bool {
        match self.ttl {
            Some(ttl) => entry.fetched_at.elapsed() < ttl,
            None => true,
        }
    }

    /// Card of an agent, from cache when fresh
    ///
    /// # Errors
    ///
    /// [`A2AError::Config`] for agents that are not configured, otherwise whatever
    /// discovery reported. An unreachable or invalid agent keeps failing with the
    /// same error, without I/O, until its cool-down has passed.
    pub async fn fetch(&self, agent_id: &str) -> Result<Arc<AgentCard>, A2AError> {
        if let Some(entry) = self.cache.read().await.get(agent_id) {
            if self.is_fresh(entry) {
                return Ok(entry.card.clone());
            }
        }

        if let Some(failure) = self.failures.read().await.get(agent_id) {
            if failure.failed_at.elapsed() < self.cooldown {
                tracing::trace!(agent_id, kind = %failure.kind, "agent still cooling down");
                return Err(failure.to_error());
            }
        }

        self.refresh(agent_id).await
    }

    /// Re-discover an agent and replace its cache entry
    pub async fn refresh(&self, agent_id: &str) -> Result<Arc<AgentCard>, A2AError> {
        let base = self
            .endpoints
            .get(agent_id)
            .ok_or_else(|| A2AError::Config(format!("agent '{}' is not configured", agent_id)))?;

        let card = match self.client.discover(agent_id, base).await {
            Ok(card) => Arc::new(card),
            Err(error) => {
                tracing::warn!(agent_id, error = %error, "agent discovery failed");
                self.cache.write().await.remove(agent_id);
                if let Some(failure) = FailedDiscovery::remember(&error) {
                    self.failures.write().await.insert(agent_id.to_string(), failure);
                }
                return Err(error);
            }
        };

        if card.agent_id != agent_id {
            tracing::debug!(
                agent_id,
                reported = %card.agent_id,
                "agent card reports a different id"
            );
        }
        tracing::debug!(agent_id, capabilities = card.capabilities.len(), "agent card cached");

        self.failures.write().await.remove(agent_id);
        self.cache.write().await.insert(
            agent_id.to_string(),
            CachedCard {
                card: card.clone(),
                fetched_at: Instant::now(),
            },
        );

        Ok(card)
    }

    /// Drop an agent's card and any remembered failure; the next access re-fetches it
    pub async fn invalidate(&self, agent_id: &str) {
        self.failures.write().await.remove(agent_id);
        if self.cache.write().await.remove(agent_id).is_some() {
            tracing::debug!(agent_id, "agent card invalidated");
        }
    }

    /// Cards currently cached, without I/O
    pub async fn list_known(&self) -> Vec<Arc<AgentCard>> {
        let cache = self.cache.read().await;
        let mut known: Vec<(&String, &CachedCard)> = cache.iter().collect();
        known.sort_by(|a, b| a.0.cmp(b.0));
        known.into_iter().map(|(_, entry)| entry.card.clone()).collect()
    }

    /// Fetch every configured agent concurrently and capture the outcome
    pub async fn snapshot(&self) -> RegistrySnapshot {
        let ids = self.agent_ids();
        let results = join_all(ids.iter().map(|id| self.fetch(id))).await;

        let mut cards = Vec::new();
        let mut failed = Vec::new();
        for (id, result) in ids.into_iter().zip(results) {
            match result {
                Ok(card) => cards.push((id, card)),
                Err(error) => failed.push((id, error.kind())),
            }
        }

        RegistrySnapshot::new(cards, failed)
    }
}

impl<T: Transport> Clone for AgentCardRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            endpoints: self.endpoints.clone(),
            ttl: self.ttl,
            cooldown: self.cooldown,
            cache: self.cache.clone(),
            failures: self.failures.clone(),
        }
    }
}

impl<T: Transport> std::fmt::Debug for AgentCardRegistry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentCardRegistry")
            .field("agents", &self.agent_ids())
            .field("ttl", &self.ttl)
            .field("cooldown", &self.cooldown)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use serde_json::json;

    use super::*;
    use crate::transport::{
        mock::{json_response, MockTransport},
        BackoffPolicy,
    };

    fn endpoints() -> HashMap<String, Url> {
        HashMap::from([
            ("sql-agent".to_string(), Url::parse("http://sql.local").unwrap()),
            ("rag-agent".to_string(), Url::parse("http://rag.local").unwrap()),
        ])
    }

    fn cards(counter: Arc<AtomicU32>) -> MockTransport {
        MockTransport::new(move |req| {
            counter.fetch_add(1, Ordering::SeqCst);
            match req.url.host_str() {
                Some("sql.local") => Ok(json_response(
                    200,
                    json!({"agentId": "sql-agent", "capabilities": ["sql"]}),
                )),
                Some("rag.local") => Err(A2AError::Transport("connection refused".into())),
                _ => Ok(json_response(404, json!({}))),
            }
        })
    }

    fn registry(transport: MockTransport, ttl: Option<Duration>) -> AgentCardRegistry<MockTransport> {
        let client = ProtocolClient::new(transport, HashMap::new(), BackoffPolicy::none());
        AgentCardRegistry::new(client, endpoints(), ttl)
    }

    #[tokio::test]
    async fn test_fetch_caches_card() {
        let counter = Arc::new(AtomicU32::new(0));
        let registry = registry(cards(counter.clone()), None);

        let first = registry.fetch("sql-agent").await.unwrap();
        let second = registry.fetch("sql-agent").await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(registry.list_known().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_cool_down_before_refetch() {
        let counter = Arc::new(AtomicU32::new(0));
        let registry = registry(cards(counter.clone()), None);

        let err = registry.fetch("rag-agent").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unreachable);
        let err = registry.fetch("rag-agent").await.unwrap_err();
        assert!(matches!(err, A2AError::Unreachable(ref d) if d == "connection refused"));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(registry.list_known().await.is_empty());

        tokio::time::advance(BackoffPolicy::none().cap).await;
        registry.fetch("rag-agent").await.unwrap_err();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshots_do_not_rediscover_a_dead_agent() {
        let counter = Arc::new(AtomicU32::new(0));
        let client = ProtocolClient::new(
            cards(counter.clone()),
            HashMap::new(),
            BackoffPolicy::default(),
        );
        let registry = AgentCardRegistry::new(client, endpoints(), None);

        let started = Instant::now();
        for _ in 0..3 {
            let snapshot = registry.snapshot().await;
            assert_eq!(snapshot.len(), 1);
            assert_eq!(
                snapshot.failed().collect::<Vec<_>>(),
                vec![("rag-agent", ErrorKind::Unreachable)]
            );
        }
        // one card fetch plus one attempt and five retries for the dead agent
        assert_eq!(counter.load(Ordering::SeqCst), 7);
        assert!(started.elapsed() < Duration::from_secs(16));

        registry.invalidate("rag-agent").await;
        registry.snapshot().await;
        assert_eq!(counter.load(Ordering::SeqCst), 13);
    }

    #[tokio::test]
    async fn test_invalid_card_is_remembered() {
        let counter = Arc::new(AtomicU32::new(0));
        let seen = counter.clone();
        let transport = MockTransport::new(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(json_response(200, json!({"capabilities": ["sql"]})))
        });
        let registry = registry(transport, None).with_failure_cooldown(Duration::from_secs(60));

        assert_eq!(
            registry.fetch("sql-agent").await.unwrap_err().kind(),
            ErrorKind::InvalidCard
        );
        assert_eq!(
            registry.fetch("sql-agent").await.unwrap_err().kind(),
            ErrorKind::InvalidCard
        );
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_agent() {
        let registry = registry(MockTransport::ok(), None);
        let err = registry.fetch("weather-agent").await.unwrap_err();
        assert!(matches!(err, A2AError::Config(_)));
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let counter = Arc::new(AtomicU32::new(0));
        let registry = registry(cards(counter.clone()), None);

        registry.fetch("sql-agent").await.unwrap();
        registry.invalidate("sql-agent").await;
        assert!(registry.list_known().await.is_empty());

        registry.fetch("sql-agent").await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry() {
        let counter = Arc::new(AtomicU32::new(0));
        let registry = registry(cards(counter.clone()), Some(Duration::from_secs(30)));

        registry.fetch("sql-agent").await.unwrap();
        tokio::time::advance(Duration::from_secs(10)).await;
        registry.fetch("sql-agent").await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(30)).await;
        registry.fetch("sql-agent").await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_snapshot_splits_reachable_and_failed() {
        let registry = registry(cards(Arc::new(AtomicU32::new(0))), None);

        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.is_reachable("sql-agent"));
        assert!(!snapshot.is_reachable("rag-agent"));
        assert_eq!(
            snapshot.failed().collect::<Vec<_>>(),
            vec![("rag-agent", ErrorKind::Unreachable)]
        );

        // later changes do not leak into a snapshot already taken
        registry.invalidate("sql-agent").await;
        assert!(snapshot.card("sql-agent").is_some());
    }
}
