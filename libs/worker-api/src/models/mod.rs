//! Worker API models

use serde::{Deserialize, Serialize};

/// Completion request sent to a worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub prompt: String,
    pub n_predict: i32,
}

/// Completion response returned by a worker.
///
/// The inference engine owns the full schema; only `content` is read and
/// everything else is carried through untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    #[serde(default)]
    pub content: String,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Worker health status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerHealth {
    #[serde(default)]
    pub status: Option<String>,
}
