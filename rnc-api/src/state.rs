//! Shared application state for command handlers.

use std::sync::Arc;

use rnc_allocator::RncAllocator;
use rnc_core::{AllocatorConfig, SystemClock, WallClock};
use rnc_storage::CaseStore;

use crate::auth::QualityGate;
use crate::config::AppConfig;
use crate::error::ApiResult;

/// Everything a command needs, built once at startup.
#[derive(Clone)]
pub struct AppState {
    pub allocator: Arc<RncAllocator>,
    pub gate: QualityGate,
}

impl AppState {
    pub fn new(
        store: Arc<dyn CaseStore>,
        clock: Arc<dyn WallClock>,
        allocator_config: AllocatorConfig,
        gate: QualityGate,
    ) -> Self {
        Self {
            allocator: Arc::new(RncAllocator::new(store, clock, allocator_config)),
            gate,
        }
    }

    /// Open the configured store (bootstrapping its schema) with the
    /// system clock.
    pub async fn connect(config: &AppConfig) -> ApiResult<Self> {
        let store = rnc_db::connect(&config.db).await?;
        tracing::info!(backend = %store.backend(), "Store ready");
        Ok(Self::new(
            store,
            Arc::new(SystemClock),
            config.allocator.clone(),
            QualityGate::new(config.quality_password.clone()),
        ))
    }

    pub fn store(&self) -> &dyn CaseStore {
        self.allocator.store().as_ref()
    }

    pub fn clock(&self) -> &dyn WallClock {
        self.allocator.clock().as_ref()
    }
}
