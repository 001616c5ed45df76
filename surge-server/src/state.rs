//! Shared server state

use crate::store::ConfigStore;
use std::sync::Arc;
use surge_core::DriverRegistry;
use surge_engine::SessionOrchestrator;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<DriverRegistry>,
    pub store: Arc<ConfigStore>,
    pub orchestrator: Arc<SessionOrchestrator>,
}
