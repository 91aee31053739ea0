//! Router API models

use serde::{Deserialize, Serialize};

/// Health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Version response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Query request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub query: String,

    /// Overrides the router's default token budget
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n_predict: Option<i32>,
}

/// Routing decision as reported to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteInfo {
    pub target_service: String,
    pub matched_keyword: Option<String>,
    pub fallback_used: bool,
}

/// Query response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub route: RouteInfo,
    pub content: String,
}

/// One entry of the routing table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteRuleInfo {
    pub tag: String,
    pub keywords: Vec<String>,
    pub target: String,
}

/// Routing table response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteTableResponse {
    pub rules: Vec<RouteRuleInfo>,
    pub fallback: String,
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
}
