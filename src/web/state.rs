//! # Web API Application State

use crate::bootstrap::NdrCore;
use crate::config::WebConfig;
use std::sync::Arc;

/// Shared state handed to every handler
#[derive(Debug, Clone)]
pub struct AppState {
    pub core: Arc<NdrCore>,
    pub config: WebConfig,
    pub environment: String,
}

impl AppState {
    pub fn new(core: NdrCore, environment: &str) -> Self {
        let config = core.config().web.clone();
        Self {
            core: Arc::new(core),
            config,
            environment: environment.to_string(),
        }
    }
}
