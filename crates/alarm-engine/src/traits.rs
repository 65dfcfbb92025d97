//! Collaborators the engine reads from and writes to.

use std::fmt;

use alarm_rules::{AlarmRule, DataSnapshot, EntityAlarmState, EntityId, TenantId};

use crate::error::Result;

/// Supplies current entity data.
pub trait SnapshotProvider: Send + Sync + fmt::Debug {
    /// Returns the current attributes and latest time series of an entity,
    /// already typed.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::SnapshotUnavailable` if no data can be produced.
    fn snapshot(&self, tenant_id: TenantId, entity_id: EntityId) -> Result<DataSnapshot>;
}

/// Persists [`EntityAlarmState`] rows with optimistic concurrency.
pub trait StateStore: Send + Sync + fmt::Debug {
    /// Loads the state row of an entity.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the row cannot be decoded.
    fn load(&self, tenant_id: TenantId, entity_id: EntityId) -> Result<Option<EntityAlarmState>>;

    /// Returns the state row of an entity, creating an empty one if absent.
    /// Calling this repeatedly has no further effect.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the row cannot be decoded.
    fn create_if_absent(&self, tenant_id: TenantId, entity_id: EntityId)
    -> Result<EntityAlarmState>;

    /// Saves `state` if the stored revision still equals `state.revision`,
    /// and returns the stored row with its new revision.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::StateConflict` if the row was changed since it
    /// was loaded.
    fn save(&self, state: &EntityAlarmState) -> Result<EntityAlarmState>;

    /// Deletes the state row of an entity. Returns true if a row existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    fn delete(&self, tenant_id: TenantId, entity_id: EntityId) -> Result<bool>;

    /// Lists every entity that has a state row.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    fn list_entities(&self) -> Result<Vec<(TenantId, EntityId)>>;
}

/// Looks up the rules that apply to an entity.
pub trait RuleRepository: Send + Sync + fmt::Debug {
    /// Returns the enabled rules of `tenant_id` whose source filters select
    /// the entity.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::EntityNotFound` if the entity is unknown.
    fn find_enabled_rules_for_entity(
        &self,
        tenant_id: TenantId,
        entity_id: EntityId,
    ) -> Result<Vec<AlarmRule>>;
}
