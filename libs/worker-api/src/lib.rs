//! Worker HTTP contract
//!
//! Models shared by the router and the health checker when talking to
//! model-backed worker services.

pub mod models;

pub use models::*;

/// Liveness path every worker exposes
pub const HEALTH_PATH: &str = "/health";

/// Completion path every worker exposes
pub const COMPLETION_PATH: &str = "/completion";
