//! Shared helpers for integration tests

#![allow(dead_code)]

use gatehouse_authz::{EngineConfig, Enforcer, MemoryAdapter};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Install a test subscriber once; `RUST_LOG` controls verbosity
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Enforcer over a fresh in-memory adapter
pub async fn memory_enforcer(config: EngineConfig) -> (Arc<Enforcer>, Arc<MemoryAdapter>) {
    init_tracing();
    let adapter = Arc::new(MemoryAdapter::new());
    let enforcer = Enforcer::open(config, adapter.clone())
        .await
        .expect("enforcer should open over an empty adapter");
    (Arc::new(enforcer), adapter)
}
