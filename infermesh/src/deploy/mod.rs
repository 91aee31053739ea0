//! Deployment module

pub mod docker;
pub mod fsm;
pub mod journal;
pub mod orchestrator;
pub mod runtime;
pub mod tracker;
