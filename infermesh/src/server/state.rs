//! Server state

use std::sync::Arc;

use crate::router::Router;

/// Server state shared across handlers
pub struct ServerState {
    pub router: Arc<Router>,
}

impl ServerState {
    pub fn new(router: Arc<Router>) -> Self {
        Self { router }
    }
}
