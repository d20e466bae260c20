//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::matchmaking::RelayHub;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub hub: RelayHub,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let hub = RelayHub::new(config.hub_config());
        Self {
            config: Arc::new(config),
            hub,
        }
    }
}
