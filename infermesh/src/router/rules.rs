//! Ordered keyword routing table

use serde::{Deserialize, Serialize};

/// One routing rule: any keyword routes the query to `target`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRule {
    pub tag: String,
    pub keywords: Vec<String>,
    pub target: String,
}

impl RouteRule {
    pub fn new<I, S>(tag: &str, keywords: I, target: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tag: tag.to_string(),
            keywords: keywords
                .into_iter()
                .map(|k| k.into().to_lowercase())
                .collect(),
            target: target.to_string(),
        }
    }

    /// First keyword found in the lowercased query
    fn matches(&self, lowered: &str) -> Option<&str> {
        self.keywords
            .iter()
            .find(|k| !k.is_empty() && lowered.contains(k.as_str()))
            .map(String::as_str)
    }
}

/// Outcome of classifying one query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteDecision {
    pub target_service: String,
    pub matched_keyword: Option<String>,
    pub fallback_used: bool,
}

impl From<&RouteDecision> for router_api::RouteInfo {
    fn from(decision: &RouteDecision) -> Self {
        router_api::RouteInfo {
            target_service: decision.target_service.clone(),
            matched_keyword: decision.matched_keyword.clone(),
            fallback_used: decision.fallback_used,
        }
    }
}

/// Ordered rule table with a fallback target. First match wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleTable {
    rules: Vec<RouteRule>,
    fallback: String,
}

impl RuleTable {
    pub fn new(rules: Vec<RouteRule>, fallback: impl Into<String>) -> Self {
        Self {
            rules,
            fallback: fallback.into(),
        }
    }

    pub fn rules(&self) -> &[RouteRule] {
        &self.rules
    }

    pub fn fallback(&self) -> &str {
        &self.fallback
    }

    /// Case-insensitive substring classification
    pub fn classify(&self, query: &str) -> RouteDecision {
        let lowered = query.to_lowercase();
        for rule in &self.rules {
            if let Some(keyword) = rule.matches(&lowered) {
                return RouteDecision {
                    target_service: rule.target.clone(),
                    matched_keyword: Some(keyword.to_string()),
                    fallback_used: false,
                };
            }
        }
        RouteDecision {
            target_service: self.fallback.clone(),
            matched_keyword: None,
            fallback_used: true,
        }
    }

    /// Every service the table can route to
    pub fn targets(&self) -> impl Iterator<Item = &str> {
        self.rules
            .iter()
            .map(|r| r.target.as_str())
            .chain(std::iter::once(self.fallback.as_str()))
    }
}

impl Default for RuleTable {
    /// coder, then vision, then voice; anything else goes to the agent
    fn default() -> Self {
        Self::new(
            vec![
                RouteRule::new("coder", ["@coder", "code", "research"], "coder"),
                RouteRule::new("vision", ["@vision", "image", "doc", "ocr"], "vision"),
                RouteRule::new("voice", ["@voice", "audio"], "voice"),
            ],
            "agent",
        )
    }
}

impl From<&RuleTable> for router_api::RouteTableResponse {
    fn from(table: &RuleTable) -> Self {
        router_api::RouteTableResponse {
            rules: table
                .rules
                .iter()
                .map(|r| router_api::RouteRuleInfo {
                    tag: r.tag.clone(),
                    keywords: r.keywords.clone(),
                    target: r.target.clone(),
                })
                .collect(),
            fallback: table.fallback.clone(),
        }
    }
}
