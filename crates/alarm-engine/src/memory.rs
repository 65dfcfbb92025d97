//! In-memory collaborators, for tests and single-process deployments.

use std::collections::HashMap;
use std::sync::Arc;

use alarm_rules::{
    AlarmRule, AlarmRuleId, DataSnapshot, EntityAlarmState, EntityId, EntityInfo, TenantId, Value,
};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::error::{EngineError, Result};
use crate::traits::{RuleRepository, SnapshotProvider, StateStore};

type EntityKey = (TenantId, EntityId);

/// Latest entity data held in memory.
#[derive(Debug, Default)]
pub struct InMemorySnapshotProvider {
    snapshots: Arc<RwLock<HashMap<EntityKey, DataSnapshot>>>,
}

impl InMemorySnapshotProvider {
    /// Creates an empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole snapshot of an entity.
    pub fn set_snapshot(&self, tenant_id: TenantId, entity_id: EntityId, snapshot: DataSnapshot) {
        self.snapshots.write().insert((tenant_id, entity_id), snapshot);
    }

    /// Records a time-series value and advances the snapshot timestamp.
    pub fn record_time_series(
        &self,
        tenant_id: TenantId,
        entity_id: EntityId,
        name: impl Into<String>,
        value: impl Into<Value>,
        ts: DateTime<Utc>,
    ) {
        let mut snapshots = self.snapshots.write();
        let snapshot = snapshots
            .entry((tenant_id, entity_id))
            .or_insert_with(|| DataSnapshot::new(ts));
        snapshot.latest_time_series.insert(name.into(), value.into());
        snapshot.timestamp = snapshot.timestamp.max(ts);
    }

    /// Sets an entity attribute.
    pub fn set_attribute(
        &self,
        tenant_id: TenantId,
        entity_id: EntityId,
        name: impl Into<String>,
        value: impl Into<Value>,
    ) {
        let mut snapshots = self.snapshots.write();
        let snapshot = snapshots
            .entry((tenant_id, entity_id))
            .or_insert_with(|| DataSnapshot::new(Utc::now()));
        snapshot.attributes.insert(name.into(), value.into());
    }

    /// Forgets an entity.
    pub fn remove(&self, tenant_id: TenantId, entity_id: EntityId) -> bool {
        self.snapshots.write().remove(&(tenant_id, entity_id)).is_some()
    }
}

impl SnapshotProvider for InMemorySnapshotProvider {
    fn snapshot(&self, tenant_id: TenantId, entity_id: EntityId) -> Result<DataSnapshot> {
        self.snapshots
            .read()
            .get(&(tenant_id, entity_id))
            .cloned()
            .ok_or_else(|| EngineError::SnapshotUnavailable {
                entity_id,
                reason: "no data recorded".to_string(),
            })
    }
}

/// State rows kept as serialized JSON, as a database column would hold them.
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    rows: Arc<RwLock<HashMap<EntityKey, String>>>,
}

impl InMemoryStateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    /// Returns true if no rows are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    /// Stores a raw row, bypassing revision checks.
    pub fn put_raw(&self, tenant_id: TenantId, entity_id: EntityId, json: impl Into<String>) {
        self.rows.write().insert((tenant_id, entity_id), json.into());
    }

    fn decode(json: &str) -> Result<EntityAlarmState> {
        Ok(EntityAlarmState::from_json(json)?)
    }
}

impl StateStore for InMemoryStateStore {
    fn load(&self, tenant_id: TenantId, entity_id: EntityId) -> Result<Option<EntityAlarmState>> {
        self.rows
            .read()
            .get(&(tenant_id, entity_id))
            .map(|json| Self::decode(json))
            .transpose()
    }

    fn create_if_absent(
        &self,
        tenant_id: TenantId,
        entity_id: EntityId,
    ) -> Result<EntityAlarmState> {
        let mut rows = self.rows.write();
        if let Some(json) = rows.get(&(tenant_id, entity_id)) {
            return Self::decode(json);
        }
        let state = EntityAlarmState::new(tenant_id, entity_id);
        rows.insert((tenant_id, entity_id), state.to_json()?);
        debug!(tenant_id = %tenant_id, entity_id = %entity_id, "created alarm state row");
        Ok(state)
    }

    fn save(&self, state: &EntityAlarmState) -> Result<EntityAlarmState> {
        let key = (state.tenant_id, state.entity_id);
        let mut rows = self.rows.write();
        let actual = match rows.get(&key) {
            Some(json) => Self::decode(json)?.revision,
            None => 0,
        };
        if actual != state.revision {
            return Err(EngineError::StateConflict {
                entity_id: state.entity_id,
                expected: state.revision,
                actual,
            });
        }

        let mut stored = state.clone();
        stored.revision = actual.saturating_add(1);
        rows.insert(key, stored.to_json()?);
        Ok(stored)
    }

    fn delete(&self, tenant_id: TenantId, entity_id: EntityId) -> Result<bool> {
        Ok(self.rows.write().remove(&(tenant_id, entity_id)).is_some())
    }

    fn list_entities(&self) -> Result<Vec<(TenantId, EntityId)>> {
        let mut keys: Vec<_> = self.rows.read().keys().copied().collect();
        keys.sort();
        Ok(keys)
    }
}

/// Rules and entity metadata held in memory.
#[derive(Debug, Default)]
pub struct InMemoryRuleRepository {
    rules: Arc<RwLock<HashMap<AlarmRuleId, AlarmRule>>>,
    entities: Arc<RwLock<HashMap<EntityKey, EntityInfo>>>,
}

impl InMemoryRuleRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a new rule.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Rule` if the rule is invalid or a rule with the
    /// same id already exists.
    pub fn add_rule(&self, rule: AlarmRule) -> Result<()> {
        rule.validate()?;
        let mut rules = self.rules.write();

        if rules.contains_key(&rule.id) {
            return Err(EngineError::Rule(alarm_rules::RuleError::InvalidRule {
                reason: format!("rule with ID '{}' already exists", rule.id),
            }));
        }

        info!(rule_id = %rule.id, rule_name = %rule.name, "added alarm rule");
        rules.insert(rule.id, rule);
        Ok(())
    }

    /// Replaces an existing rule.
    ///
    /// The rule is stored without validation so that a rule broken at
    /// authoring time surfaces as a configuration error during evaluation.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::RuleNotFound` if no rule has the same id.
    pub fn update_rule(&self, rule: AlarmRule) -> Result<()> {
        let mut rules = self.rules.write();

        if !rules.contains_key(&rule.id) {
            return Err(EngineError::RuleNotFound {
                id: rule.id.to_string(),
            });
        }

        info!(rule_id = %rule.id, rule_name = %rule.name, "updated alarm rule");
        rules.insert(rule.id, rule);
        Ok(())
    }

    /// Removes a rule. Returns true if it existed.
    pub fn remove_rule(&self, rule_id: AlarmRuleId) -> bool {
        let removed = self.rules.write().remove(&rule_id).is_some();
        if removed {
            info!(rule_id = %rule_id, "removed alarm rule");
        }
        removed
    }

    /// Returns a rule by id.
    #[must_use]
    pub fn get_rule(&self, rule_id: AlarmRuleId) -> Option<AlarmRule> {
        self.rules.read().get(&rule_id).cloned()
    }

    /// Registers an entity so rules can be matched against it.
    pub fn register_entity(&self, tenant_id: TenantId, entity: EntityInfo) {
        self.entities.write().insert((tenant_id, entity.id), entity);
    }

    /// Forgets an entity.
    pub fn unregister_entity(&self, tenant_id: TenantId, entity_id: EntityId) -> bool {
        self.entities.write().remove(&(tenant_id, entity_id)).is_some()
    }
}

impl RuleRepository for InMemoryRuleRepository {
    fn find_enabled_rules_for_entity(
        &self,
        tenant_id: TenantId,
        entity_id: EntityId,
    ) -> Result<Vec<AlarmRule>> {
        let entity = self
            .entities
            .read()
            .get(&(tenant_id, entity_id))
            .cloned()
            .ok_or(EngineError::EntityNotFound {
                tenant_id,
                entity_id,
            })?;

        let mut rules: Vec<AlarmRule> = self
            .rules
            .read()
            .values()
            .filter(|r| r.tenant_id == tenant_id && r.enabled && r.applies_to(&entity))
            .cloned()
            .collect();
        rules.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(rules)
    }
}
