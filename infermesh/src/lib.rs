//! infermesh library
//!
//! Deployment orchestration and query routing for inference services
//! running as containers on a single host.

pub mod backup;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod health;
pub mod logs;
pub mod models;
pub mod registry;
pub mod router;
pub mod server;
pub mod storage;
pub mod telemetry;
pub mod utils;
