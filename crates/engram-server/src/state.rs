//! Shared server state

use std::sync::Arc;
use std::time::Instant;

use engram_core::{Core, Runtime};

/// Shared application state for the HTTP surface
#[derive(Clone)]
pub struct AppState {
    pub core: Arc<Core>,
    pub runtime: Arc<Runtime>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(core: Arc<Core>, runtime: Arc<Runtime>) -> Self {
        Self {
            core,
            runtime,
            start_time: Instant::now(),
        }
    }

    /// Uptime in whole seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
