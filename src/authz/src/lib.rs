//! # Gatehouse Authorization Engine
//!
//! In-process RBAC policy store and enforcer.
//!
//! ## Features
//!
//! - **Policy tuples** `(subject, object, action, effect)` and **grouping
//!   tuples** `(member, group)` for role assignment and role hierarchies
//! - **Transitive, cycle-safe role resolution** with per-snapshot caching
//! - **Lock-free enforcement**: readers evaluate an immutable snapshot that
//!   writers replace atomically
//! - **Durable mutations**: every acknowledged change has been persisted;
//!   failures and timeouts roll back with no partial state
//! - **Pluggable persistence** through [`PolicyAdapter`], with in-memory and
//!   PostgreSQL implementations
//! - **Metrics** with Prometheus text export
//!
//! ## Example
//!
//! ```rust
//! use gatehouse_authz::{EngineConfig, Enforcer, MemoryAdapter};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let enforcer = Enforcer::open(EngineConfig::default(), Arc::new(MemoryAdapter::new())).await?;
//!
//!     enforcer.add_policy("admin", "doc1", "read").await?;
//!     enforcer.add_grouping_policy("alice", "admin").await?;
//!
//!     if enforcer.enforce("alice", "doc1", "read") {
//!         println!("Access granted!");
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod adapter;
pub mod config;
pub mod engine;
pub mod error;
pub mod graph;
pub mod matcher;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use adapter::{AdapterError, AdapterErrorKind, MemoryAdapter, PolicyAdapter};
#[cfg(feature = "postgres")]
pub use adapter::PostgresAdapter;
pub use config::EngineConfig;
pub use engine::{EngineMetrics, Enforcer, MetricsCollector, Mutation, PolicySnapshot};
pub use error::{AuthzError, Result};
pub use matcher::EffectStrategy;
pub use types::{
    Decision, DecisionReason, EnforcementRequest, GroupingTuple, PolicyEffect, PolicyTuple,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
