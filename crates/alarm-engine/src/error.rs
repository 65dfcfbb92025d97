//! Error types for the alarm-engine crate.

use alarm_rules::{EntityId, RuleError, TenantId};
use thiserror::Error;

/// Errors that can occur while driving alarm evaluation.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A rule could not be validated or evaluated.
    #[error("rule error: {0}")]
    Rule(#[from] RuleError),

    /// The stored state changed since it was loaded.
    #[error("state conflict for entity {entity_id}: expected revision {expected}, found {actual}")]
    StateConflict {
        /// The entity.
        entity_id: EntityId,
        /// Revision the writer started from.
        expected: u64,
        /// Revision currently stored.
        actual: u64,
    },

    /// No data is available for the entity.
    #[error("snapshot unavailable for entity {entity_id}: {reason}")]
    SnapshotUnavailable {
        /// The entity.
        entity_id: EntityId,
        /// Why no snapshot could be produced.
        reason: String,
    },

    /// The entity is not known to the rule repository.
    #[error("entity not found: {entity_id} (tenant {tenant_id})")]
    EntityNotFound {
        /// The tenant.
        tenant_id: TenantId,
        /// The entity.
        entity_id: EntityId,
    },

    /// A rule with the given id was not found.
    #[error("rule not found: {id}")]
    RuleNotFound {
        /// The rule id.
        id: String,
    },

    /// A backing store failed.
    #[error("storage error: {reason}")]
    Storage {
        /// The reason the operation failed.
        reason: String,
    },

    /// Engine configuration is invalid.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// The reason the configuration is invalid.
        reason: String,
    },

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl EngineError {
    /// Returns true if retrying the operation against fresh state may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::StateConflict { .. })
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
