//! Keyword rule engine for capability matching

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;

use super::decision::{CandidateAgent, DecisionFunction, DecisionRequest, Verdict};
use crate::protocol::error::A2AError;

/// Rule-based [`DecisionFunction`]
///
/// Each capability tag owns a list of keywords; the tag itself always counts as one.
/// A candidate scores one point per distinct keyword of its capabilities that occurs
/// in the query as whole words. Candidates are ranked by score, then by agent id, and
/// agents that score nothing are left out.
///
/// Rules deserialize from a plain map:
///
/// ```json
/// { "sql": ["query", "table", "database"], "retrieval": ["document", "summarize"] }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct CapabilityMatcher {
    rules: BTreeMap<String, Vec<String>>,
}

impl CapabilityMatcher {
    /// Matcher with no rules; only capability tags match
    pub fn new() -> Self {
        Self::default()
    }

    /// Rules for the SQL and retrieval agents the dispatcher usually fronts
    pub fn with_defaults() -> Self {
        Self::new()
            .with_rule(
                "sql",
                [
                    "query", "select", "table", "tables", "database", "schema", "rows",
                    "count", "total", "sales", "revenue", "join", "group by",
                ],
            )
            .with_rule(
                "retrieval",
                [
                    "document", "documents", "summarize", "summary", "explain", "search",
                    "find", "policy", "manual", "knowledge", "context",
                ],
            )
            .with_rule("rag", ["document", "documents", "summarize", "summary", "search"])
    }

    /// Add keywords for a capability tag
    pub fn with_rule<I, S>(mut self, tag: impl Into<String>, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tag = tag.into().to_lowercase();
        let entry = self.rules.entry(tag).or_default();
        entry.extend(keywords.into_iter().map(|k| k.into().to_lowercase()));
        self
    }

    /// Merge another set of rules into this one
    pub fn with_rules(mut self, rules: BTreeMap<String, Vec<String>>) -> Self {
        for (tag, keywords) in rules {
            self = self.with_rule(tag, keywords);
        }
        self
    }

    fn keywords(&self, candidate: &CandidateAgent) -> Vec<String> {
        let mut keywords: Vec<String> = Vec::new();
        for capability in &candidate.capabilities {
            let tag = capability.tag.to_lowercase();
            for (_, extra) in self.rules.iter().filter(|(t, _)| t.eq_ignore_ascii_case(&tag)) {
                keywords.extend(extra.iter().map(|k| k.to_lowercase()));
            }
            keywords.push(tag);
        }
        keywords.sort();
        keywords.dedup();
        keywords
    }

    /// Score of a candidate against a normalized query
    fn score(&self, query: &str, candidate: &CandidateAgent) -> usize {
        self.keywords(candidate)
            .iter()
            .filter(|keyword| {
                let keyword = normalize(keyword);
                !keyword.trim().is_empty() && query.contains(&keyword)
            })
            .count()
    }

    /// Rank candidates for a query
    pub fn rank(&self, query: &str, candidates: &[CandidateAgent]) -> Vec<(String, usize)> {
        let query = normalize(query);
        let mut scored: Vec<(String, usize)> = candidates
            .iter()
            .map(|c| (c.agent_id.clone(), self.score(&query, c)))
            .filter(|(_, score)| *score > 0)
            .collect();

        scored.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        scored
    }
}

/// Lowercase words separated by single spaces, padded so whole-word matches are
/// plain substring checks.
fn normalize(text: &str) -> String {
    let words: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect();
    format!(" {} ", words.join(" "))
}

#[async_trait]
impl DecisionFunction for CapabilityMatcher {
    async fn decide(&self, request: &DecisionRequest) -> Result<Verdict, A2AError> {
        let ranked = self.rank(&request.query, &request.candidates);

        let Some((best, score)) = ranked.first() else {
            return Ok(Verdict::none_fits(
                "no capability keyword occurs in the query",
            ));
        };

        let rationale = format!("matched {} capability keyword(s) of {}", score, best);
        Ok(Verdict::ranked(ranked.into_iter().map(|(id, _)| id), rationale))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{protocol::agent::Capability, router::decision::ConversationContext};

    fn candidate(agent_id: &str, tags: &[&str]) -> CandidateAgent {
        CandidateAgent {
            agent_id: agent_id.to_string(),
            capabilities: tags.iter().map(|t| Capability::new(*t)).collect(),
            description: None,
        }
    }

    fn request(query: &str) -> DecisionRequest {
        DecisionRequest {
            query: query.to_string(),
            context: ConversationContext::new(),
            candidates: vec![
                candidate("rag-agent", &["retrieval"]),
                candidate("sql-agent", &["sql"]),
            ],
        }
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("Total-Sales, per REGION?"), " total sales per region ");
    }

    #[test]
    fn test_whole_word_matching() {
        let matcher = CapabilityMatcher::new();
        let candidates = vec![candidate("rag-agent", &["rag"])];

        assert!(matcher.rank("check the storage bucket", &candidates).is_empty());
        assert_eq!(
            matcher.rank("use rag for this", &candidates),
            vec![("rag-agent".to_string(), 1)]
        );
    }

    #[tokio::test]
    async fn test_sql_query_goes_to_sql_agent() {
        let matcher = CapabilityMatcher::with_defaults();
        let verdict = matcher
            .decide(&request("generate a SQL query for total sales"))
            .await
            .unwrap();

        match verdict {
            Verdict::Ranked { ranking, .. } => assert_eq!(ranking, vec!["sql-agent"]),
            other => panic!("unexpected verdict {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_document_goes_to_rag_agent() {
        let matcher = CapabilityMatcher::with_defaults();
        let verdict = matcher
            .decide(&request("summarize this document"))
            .await
            .unwrap();

        match verdict {
            Verdict::Ranked { ranking, .. } => assert_eq!(ranking, vec!["rag-agent"]),
            other => panic!("unexpected verdict {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_nothing_matches() {
        let matcher = CapabilityMatcher::with_defaults();
        let verdict = matcher.decide(&request("hello there")).await.unwrap();
        assert!(matches!(verdict, Verdict::NoneFits { .. }));
    }

    #[test]
    fn test_ties_break_on_agent_id() {
        let matcher = CapabilityMatcher::new().with_rule("b", ["orders"]).with_rule("a", ["orders"]);
        let candidates = vec![candidate("zeta", &["b"]), candidate("alpha", &["a"])];

        let ranked = matcher.rank("list orders", &candidates);
        assert_eq!(
            ranked,
            vec![("alpha".to_string(), 1), ("zeta".to_string(), 1)]
        );
    }

    #[test]
    fn test_rules_from_json() {
        let matcher: CapabilityMatcher =
            serde_json::from_str(r#"{"weather": ["forecast", "rain"]}"#).unwrap();
        let candidates = vec![candidate("weather-agent", &["weather"])];

        assert_eq!(
            matcher.rank("will it rain tomorrow", &candidates),
            vec![("weather-agent".to_string(), 1)]
        );
    }
}
