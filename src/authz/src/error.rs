//! Error types for the authorization engine

use crate::adapter::AdapterError;
use std::time::Duration;
use thiserror::Error;

/// Authorization engine errors
#[derive(Debug, Error)]
pub enum AuthzError {
    /// Missing or empty field, rejected before any state is touched
    #[error("Invalid input: {0}")]
    Validation(String),

    /// Adapter I/O failed; the in-memory change was rolled back
    #[error("Persistence failed: {0}")]
    Persistence(#[from] AdapterError),

    /// Adapter call exceeded its bound; the in-memory change was rolled back
    #[error("Persistence timed out after {0:?}")]
    PersistenceTimeout(Duration),

    /// Fact store and role graph disagree
    #[error("Internal invariant violated: {0}")]
    InternalInvariant(String),

    /// Mutations refused until the next successful reload
    #[error("Engine is poisoned by an earlier invariant violation; reload required")]
    Poisoned,

    /// Full load from the adapter was rejected
    #[error("Policy load failed: {0}")]
    Load(String),

    /// Configuration could not be parsed or is out of range
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AuthzError {
    /// Whether the error came from the persistence layer (after rollback)
    pub fn is_persistence(&self) -> bool {
        matches!(
            self,
            AuthzError::Persistence(_) | AuthzError::PersistenceTimeout(_)
        )
    }
}

/// Result type for authorization operations
pub type Result<T> = std::result::Result<T, AuthzError>;
