//! Per-entity alarm bookkeeping persisted between evaluations.
//!
//! One [`EntityAlarmState`] row exists per (tenant, entity). Its payload,
//! [`AlarmStateData`], holds one [`RuleAlarmState`] per (alarm type, rule):
//! several rules may raise the same alarm type on an entity, and each keeps
//! its own status and progress. The status of an alarm type is the highest
//! severity any of its rules holds. The payload is versioned so that a
//! reader never silently misinterprets a blob written by a newer build.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, RuleError};
use crate::types::{AlarmRuleId, AlarmSeverity, EntityId, TenantId};

/// Schema version written by this build.
pub const STATE_SCHEMA_VERSION: u32 = 2;

const fn current_schema_version() -> u32 {
    STATE_SCHEMA_VERSION
}

/// Whether an alarm of a given type is raised.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlarmStatus {
    /// No alarm raised.
    #[default]
    Inactive,
    /// Alarm raised at `severity`.
    Active {
        /// Current severity.
        severity: AlarmSeverity,
    },
}

impl AlarmStatus {
    /// Returns true if an alarm is raised.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Active { .. })
    }

    /// Returns the severity of the raised alarm.
    #[must_use]
    pub const fn severity(&self) -> Option<AlarmSeverity> {
        match self {
            Self::Inactive => None,
            Self::Active { severity } => Some(*severity),
        }
    }
}

/// Accumulated matches for a duration or repeating condition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionProgress {
    /// Consecutive matching evaluations.
    pub event_count: u64,
    /// Timestamp of the last matching evaluation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_event_ts: Option<DateTime<Utc>>,
    /// Milliseconds the condition has matched continuously.
    pub duration_ms: u64,
}

impl ConditionProgress {
    /// Forgets all accumulated matches.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Returns true if nothing has accumulated.
    #[must_use]
    pub fn is_clear(&self) -> bool {
        *self == Self::default()
    }
}

/// State of one rule's alarm on one entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleAlarmState {
    /// Raised or not.
    #[serde(flatten)]
    pub status: AlarmStatus,
    /// When the current status was entered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<DateTime<Utc>>,
    /// Progress of each create condition.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub create_progress: BTreeMap<AlarmSeverity, ConditionProgress>,
    /// Progress of the clear condition.
    #[serde(default)]
    pub clear_progress: ConditionProgress,
}

impl RuleAlarmState {
    /// Returns true if the entry carries no information and can be dropped.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        !self.status.is_active()
            && self.create_progress.values().all(ConditionProgress::is_clear)
            && self.clear_progress.is_clear()
    }
}

/// The versioned payload of an [`EntityAlarmState`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "StoredStateData")]
pub struct AlarmStateData {
    /// Schema version of this payload.
    pub schema_version: u32,
    /// State per alarm type, then per rule.
    pub alarms: BTreeMap<String, BTreeMap<AlarmRuleId, RuleAlarmState>>,
}

impl Default for AlarmStateData {
    fn default() -> Self {
        Self {
            schema_version: STATE_SCHEMA_VERSION,
            alarms: BTreeMap::new(),
        }
    }
}

impl AlarmStateData {
    /// Returns the status of `alarm_type`: raised at the highest severity
    /// held by any of its rules.
    #[must_use]
    pub fn status(&self, alarm_type: &str) -> AlarmStatus {
        self.alarms
            .get(alarm_type)
            .and_then(|rules| rules.values().filter_map(|s| s.status.severity()).max())
            .map_or(AlarmStatus::Inactive, |severity| AlarmStatus::Active {
                severity,
            })
    }

    /// Returns the state `rule_id` keeps for `alarm_type`.
    #[must_use]
    pub fn rule_state(&self, alarm_type: &str, rule_id: AlarmRuleId) -> Option<&RuleAlarmState> {
        self.alarms.get(alarm_type)?.get(&rule_id)
    }

    /// Returns the status `rule_id` holds for `alarm_type`.
    #[must_use]
    pub fn rule_status(&self, alarm_type: &str, rule_id: AlarmRuleId) -> AlarmStatus {
        self.rule_state(alarm_type, rule_id)
            .map(|s| s.status)
            .unwrap_or_default()
    }

    /// Stores the state of one rule, dropping it if idle.
    pub fn set_rule_state(&mut self, alarm_type: &str, rule_id: AlarmRuleId, state: RuleAlarmState) {
        if state.is_idle() {
            if let Some(rules) = self.alarms.get_mut(alarm_type) {
                rules.remove(&rule_id);
                if rules.is_empty() {
                    self.alarms.remove(alarm_type);
                }
            }
        } else {
            self.alarms
                .entry(alarm_type.to_string())
                .or_default()
                .insert(rule_id, state);
        }
    }

    /// Serializes the payload.
    ///
    /// # Errors
    ///
    /// Returns `RuleError::Serialization` if encoding fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserializes a payload, upgrading older schema versions.
    ///
    /// # Errors
    ///
    /// Returns `RuleError::Serialization` if the JSON is malformed or was
    /// written with a newer schema version.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// A payload as stored, before its schema version is checked.
#[derive(Deserialize)]
struct StoredStateData {
    #[serde(default = "current_schema_version")]
    schema_version: u32,
    #[serde(default)]
    alarms: serde_json::Value,
}

/// Version 1 kept a single entry per alarm type, tagged with the rule that
/// last changed it.
#[derive(Deserialize)]
struct LegacyAlarmTypeState {
    #[serde(flatten)]
    state: RuleAlarmState,
    #[serde(default)]
    rule_id: Option<AlarmRuleId>,
}

impl TryFrom<StoredStateData> for AlarmStateData {
    type Error = RuleError;

    fn try_from(stored: StoredStateData) -> Result<Self> {
        if stored.schema_version > STATE_SCHEMA_VERSION {
            return Err(RuleError::Serialization(format!(
                "alarm state schema version {} is newer than supported version {STATE_SCHEMA_VERSION}",
                stored.schema_version
            )));
        }
        let alarms = match (stored.schema_version, stored.alarms) {
            (_, serde_json::Value::Null) => BTreeMap::new(),
            (1, legacy) => upgrade_v1(serde_json::from_value(legacy)?),
            (_, alarms) => serde_json::from_value(alarms)?,
        };
        Ok(Self {
            schema_version: STATE_SCHEMA_VERSION,
            alarms,
        })
    }
}

fn upgrade_v1(
    legacy: BTreeMap<String, LegacyAlarmTypeState>,
) -> BTreeMap<String, BTreeMap<AlarmRuleId, RuleAlarmState>> {
    let mut alarms: BTreeMap<String, BTreeMap<AlarmRuleId, RuleAlarmState>> = BTreeMap::new();
    for (alarm_type, entry) in legacy {
        match entry.rule_id {
            Some(rule_id) if !entry.state.is_idle() => {
                alarms.entry(alarm_type).or_default().insert(rule_id, entry.state);
            }
            Some(_) => {}
            None => debug!(alarm_type = %alarm_type, "dropping v1 alarm state without a rule id"),
        }
    }
    alarms
}

/// The persisted alarm bookkeeping for one (tenant, entity).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityAlarmState {
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// The entity.
    pub entity_id: EntityId,
    /// Optimistic-concurrency counter, bumped by the store on every save.
    #[serde(default)]
    pub revision: u64,
    /// Payload.
    #[serde(default)]
    pub data: AlarmStateData,
}

impl EntityAlarmState {
    /// Creates an empty state row.
    #[must_use]
    pub fn new(tenant_id: TenantId, entity_id: EntityId) -> Self {
        Self {
            tenant_id,
            entity_id,
            revision: 0,
            data: AlarmStateData::default(),
        }
    }

    /// Returns the status of `alarm_type`.
    #[must_use]
    pub fn status(&self, alarm_type: &str) -> AlarmStatus {
        self.data.status(alarm_type)
    }

    /// Iterates raised alarms as (alarm type, severity).
    pub fn active_alarms(&self) -> impl Iterator<Item = (&str, AlarmSeverity)> {
        self.data.alarms.keys().filter_map(|alarm_type| {
            self.data
                .status(alarm_type)
                .severity()
                .map(|severity| (alarm_type.as_str(), severity))
        })
    }

    /// Serializes the row.
    ///
    /// # Errors
    ///
    /// Returns `RuleError::Serialization` if encoding fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserializes a row.
    ///
    /// # Errors
    ///
    /// Returns `RuleError::Serialization` if the JSON is malformed or its
    /// payload was written with a newer schema version.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
