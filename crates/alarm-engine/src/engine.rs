//! The alarm engine: evaluates entities and persists their alarm state.
//!
//! [`AlarmEngine`] ties the pure [`RuleEvaluator`] to its collaborators. It
//! serializes work per (tenant, entity), saves state with compare-and-swap
//! and retries on conflict, and reports each rule's configuration error once
//! instead of on every evaluation.
//!
//! Transitions are reported per alarm type. When several rules raise the
//! same type on an entity, the alarm carries the highest severity among
//! them and is cleared only once none of them holds it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use alarm_rules::{
    AlarmRuleId, AlarmSeverity, AlarmStatus, AlarmTarget, BatchEvaluation, EntityAlarmState,
    EntityId, EvaluationOutcome, RuleError, RuleEvaluator, RuleOutcome, TenantId,
};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::traits::{RuleRepository, SnapshotProvider, StateStore};

type EntityKey = (TenantId, EntityId);

/// What happened to an alarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    /// The alarm was raised.
    Created {
        /// Severity it was raised at.
        severity: AlarmSeverity,
    },
    /// The raised alarm changed severity.
    SeverityChanged {
        /// Previous severity.
        from: AlarmSeverity,
        /// New severity.
        to: AlarmSeverity,
    },
    /// The alarm was cleared.
    Cleared {
        /// Severity it had when cleared.
        severity: AlarmSeverity,
    },
}

impl TransitionKind {
    /// Returns the transition from `before` to `after`, if they differ.
    #[must_use]
    pub fn between(before: AlarmStatus, after: AlarmStatus) -> Option<Self> {
        match (before, after) {
            (AlarmStatus::Inactive, AlarmStatus::Active { severity }) => {
                Some(Self::Created { severity })
            }
            (AlarmStatus::Active { severity: from }, AlarmStatus::Active { severity: to })
                if from != to =>
            {
                Some(Self::SeverityChanged { from, to })
            }
            (AlarmStatus::Active { severity }, AlarmStatus::Inactive) => {
                Some(Self::Cleared { severity })
            }
            _ => None,
        }
    }
}

/// An alarm transition for the alarm lifecycle service to apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlarmTransition {
    /// The last rule whose decision changed the alarm.
    pub rule_id: AlarmRuleId,
    /// Alarm type.
    pub alarm_type: String,
    /// The evaluated entity.
    pub originator: EntityId,
    /// Where the alarm lives.
    pub target: AlarmTarget,
    /// What happened.
    pub kind: TransitionKind,
}

impl AlarmTransition {
    /// Compares each alarm type a rule acted on before and after `batch`.
    fn collect(originator: EntityId, prior: &EntityAlarmState, batch: &BatchEvaluation) -> Vec<Self> {
        let mut acted: Vec<&RuleOutcome> = Vec::new();
        for outcome in batch.transitions() {
            match acted.iter_mut().find(|o| o.alarm_type == outcome.alarm_type) {
                Some(last) => *last = outcome,
                None => acted.push(outcome),
            }
        }
        acted
            .into_iter()
            .filter_map(|outcome| {
                let kind = TransitionKind::between(
                    prior.status(&outcome.alarm_type),
                    batch.state.status(&outcome.alarm_type),
                )?;
                Some(Self {
                    rule_id: outcome.rule_id,
                    alarm_type: outcome.alarm_type.clone(),
                    originator,
                    target: outcome.target.clone(),
                    kind,
                })
            })
            .collect()
    }

    /// Returns the entity the alarm is attached to, unless it must be found
    /// through a relation.
    #[must_use]
    pub const fn target_entity(&self) -> Option<EntityId> {
        self.target.resolve(self.originator)
    }
}

/// Result of processing one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityReport {
    /// The tenant.
    pub tenant_id: TenantId,
    /// The entity.
    pub entity_id: EntityId,
    /// One outcome per applicable rule.
    pub outcomes: Vec<RuleOutcome>,
    /// Transitions committed with the state.
    pub transitions: Vec<AlarmTransition>,
    /// Configuration errors not reported before.
    pub new_configuration_errors: Vec<(AlarmRuleId, RuleError)>,
    /// Revision of the stored state after processing.
    pub revision: u64,
    /// True if the state was written.
    pub state_saved: bool,
    /// Number of evaluation attempts, more than one after save conflicts.
    pub attempts: u32,
}

/// Totals of one harvest pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HarvestSummary {
    /// Entities evaluated successfully.
    pub entities_evaluated: usize,
    /// Entities that failed to evaluate.
    pub entities_failed: usize,
    /// Alarms created.
    pub alarms_created: usize,
    /// Alarms whose severity changed.
    pub alarms_updated: usize,
    /// Alarms cleared.
    pub alarms_cleared: usize,
}

impl HarvestSummary {
    fn record(&mut self, report: &EntityReport) {
        self.entities_evaluated += 1;
        for transition in &report.transitions {
            match transition.kind {
                TransitionKind::Created { .. } => self.alarms_created += 1,
                TransitionKind::SeverityChanged { .. } => self.alarms_updated += 1,
                TransitionKind::Cleared { .. } => self.alarms_cleared += 1,
            }
        }
    }
}

/// Evaluates entities against their rules and persists the resulting state.
#[derive(Debug)]
pub struct AlarmEngine {
    config: EngineConfig,
    evaluator: RuleEvaluator,
    snapshots: Arc<dyn SnapshotProvider>,
    states: Arc<dyn StateStore>,
    rules: Arc<dyn RuleRepository>,
    /// One lock per entity while it is in use; evaluations of the same
    /// entity never overlap.
    entity_locks: Mutex<HashMap<EntityKey, Arc<Mutex<()>>>>,
    /// Last reported configuration error per rule.
    reported_errors: RwLock<HashMap<AlarmRuleId, ReportedError>>,
}

/// A reported configuration error and the entities still failing with it.
#[derive(Debug)]
struct ReportedError {
    message: String,
    entities: HashSet<EntityId>,
}

impl AlarmEngine {
    /// Creates an engine.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvalidConfig` if the configuration is invalid.
    pub fn new(
        config: EngineConfig,
        snapshots: Arc<dyn SnapshotProvider>,
        states: Arc<dyn StateStore>,
        rules: Arc<dyn RuleRepository>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            evaluator: RuleEvaluator::new(config.evaluator_config()),
            config,
            snapshots,
            states,
            rules,
            entity_locks: Mutex::new(HashMap::new()),
            reported_errors: RwLock::new(HashMap::new()),
        })
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Evaluates all enabled rules of an entity against its current data and
    /// commits the new state.
    ///
    /// # Errors
    ///
    /// Returns an error if a collaborator fails or the state could not be
    /// saved within the configured number of retries.
    pub fn process_entity(&self, tenant_id: TenantId, entity_id: EntityId) -> Result<EntityReport> {
        self.process(tenant_id, entity_id, None)
    }

    /// Re-evaluates every entity that has a state row as of `now`.
    ///
    /// Duration conditions can be met without new data arriving; this is what
    /// raises them. Nothing else advances: repeat counts are untouched and
    /// no alarm is cleared or lowered for lack of data. Entities that fail
    /// are counted and logged, not returned.
    ///
    /// # Errors
    ///
    /// Returns an error only if the state store cannot list its entities.
    pub fn harvest(&self, now: DateTime<Utc>) -> Result<HarvestSummary> {
        let mut summary = HarvestSummary::default();
        for (tenant_id, entity_id) in self.states.list_entities()? {
            match self.process(tenant_id, entity_id, Some(now)) {
                Ok(report) => summary.record(&report),
                Err(e) => {
                    warn!(
                        tenant_id = %tenant_id,
                        entity_id = %entity_id,
                        error = %e,
                        "failed to re-evaluate entity"
                    );
                    summary.entities_failed += 1;
                }
            }
        }
        debug!(
            evaluated = summary.entities_evaluated,
            failed = summary.entities_failed,
            created = summary.alarms_created,
            cleared = summary.alarms_cleared,
            "harvest complete"
        );
        Ok(summary)
    }

    /// Deletes an entity's state and forgets everything the engine holds for it.
    ///
    /// # Errors
    ///
    /// Returns an error if the state store fails.
    pub fn purge_entity(&self, tenant_id: TenantId, entity_id: EntityId) -> Result<bool> {
        let deleted =
            self.with_entity_lock((tenant_id, entity_id), || self.states.delete(tenant_id, entity_id))?;
        let mut reported = self.reported_errors.write();
        for report in reported.values_mut() {
            report.entities.remove(&entity_id);
        }
        reported.retain(|_, report| !report.entities.is_empty());
        info!(tenant_id = %tenant_id, entity_id = %entity_id, deleted, "purged entity");
        Ok(deleted)
    }

    /// Runs `f` holding the entity's lock, and drops the lock once no other
    /// caller holds or waits for it.
    fn with_entity_lock<T>(&self, key: EntityKey, f: impl FnOnce() -> T) -> T {
        let lock = Arc::clone(self.entity_locks.lock().entry(key).or_default());
        let result = {
            let _guard = lock.lock();
            f()
        };
        let mut locks = self.entity_locks.lock();
        drop(lock);
        if locks.get(&key).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(&key);
        }
        result
    }

    fn process(
        &self,
        tenant_id: TenantId,
        entity_id: EntityId,
        at: Option<DateTime<Utc>>,
    ) -> Result<EntityReport> {
        self.with_entity_lock((tenant_id, entity_id), || {
            self.process_locked(tenant_id, entity_id, at)
        })
    }

    fn process_locked(
        &self,
        tenant_id: TenantId,
        entity_id: EntityId,
        at: Option<DateTime<Utc>>,
    ) -> Result<EntityReport> {
        let rules = self.rules.find_enabled_rules_for_entity(tenant_id, entity_id)?;
        if rules.is_empty() {
            let revision = self
                .states
                .load(tenant_id, entity_id)?
                .map_or(0, |s| s.revision);
            self.forget_reports(entity_id, &HashSet::new());
            return Ok(EntityReport {
                tenant_id,
                entity_id,
                outcomes: Vec::new(),
                transitions: Vec::new(),
                new_configuration_errors: Vec::new(),
                revision,
                state_saved: false,
                attempts: 0,
            });
        }

        let snapshot = self.snapshots.snapshot(tenant_id, entity_id)?;

        let max_attempts = self.config.max_save_retries.saturating_add(1);
        let mut attempts = 0;
        let (prior, batch, revision, state_saved) = loop {
            attempts += 1;
            let prior = self.states.create_if_absent(tenant_id, entity_id)?;
            let batch = match at {
                Some(now) => self
                    .evaluator
                    .evaluate_all_at(&rules, entity_id, &snapshot, &prior, now),
                None => self
                    .evaluator
                    .evaluate_all(&rules, entity_id, &snapshot, &prior),
            };
            if !batch.state_changed {
                let revision = prior.revision;
                break (prior, batch, revision, false);
            }
            match self.states.save(&batch.state) {
                Ok(saved) => break (prior, batch, saved.revision, true),
                Err(e @ EngineError::StateConflict { .. }) if attempts < max_attempts => {
                    warn!(
                        entity_id = %entity_id,
                        attempt = attempts,
                        error = %e,
                        "alarm state changed concurrently, re-evaluating"
                    );
                }
                Err(e) => return Err(e),
            }
        };

        let transitions = AlarmTransition::collect(entity_id, &prior, &batch);
        let new_configuration_errors = self.track_configuration_errors(entity_id, &batch);

        Ok(EntityReport {
            tenant_id,
            entity_id,
            outcomes: batch.outcomes,
            transitions,
            new_configuration_errors,
            revision,
            state_saved,
            attempts,
        })
    }

    /// Returns the configuration errors not reported before, and forgets
    /// reports once no entity fails with them.
    fn track_configuration_errors(
        &self,
        entity_id: EntityId,
        batch: &BatchEvaluation,
    ) -> Vec<(AlarmRuleId, RuleError)> {
        let mut fresh = Vec::new();
        {
            let mut reported = self.reported_errors.write();
            for outcome in &batch.outcomes {
                match &outcome.outcome {
                    EvaluationOutcome::ConfigurationError(error) => {
                        let message = error.to_string();
                        if let Some(report) = reported
                            .get_mut(&outcome.rule_id)
                            .filter(|r| r.message == message)
                        {
                            report.entities.insert(entity_id);
                            continue;
                        }
                        warn!(
                            rule_id = %outcome.rule_id,
                            rule_name = %outcome.rule_name,
                            entity_id = %entity_id,
                            error = %error,
                            "alarm rule is misconfigured"
                        );
                        reported.insert(outcome.rule_id, ReportedError {
                            message,
                            entities: HashSet::from([entity_id]),
                        });
                        fresh.push((outcome.rule_id, error.clone()));
                    }
                    _ => {
                        let Some(report) = reported.get_mut(&outcome.rule_id) else {
                            continue;
                        };
                        report.entities.remove(&entity_id);
                        if report.entities.is_empty() {
                            reported.remove(&outcome.rule_id);
                            info!(
                                rule_id = %outcome.rule_id,
                                entity_id = %entity_id,
                                "alarm rule evaluates again"
                            );
                        }
                    }
                }
            }
        }
        let applicable: HashSet<AlarmRuleId> = batch.outcomes.iter().map(|o| o.rule_id).collect();
        self.forget_reports(entity_id, &applicable);
        fresh
    }

    /// Drops `entity_id` from reports of rules that no longer apply to it.
    fn forget_reports(&self, entity_id: EntityId, applicable: &HashSet<AlarmRuleId>) {
        let mut reported = self.reported_errors.write();
        reported.retain(|rule_id, report| {
            if !applicable.contains(rule_id) {
                report.entities.remove(&entity_id);
            }
            !report.entities.is_empty()
        });
    }
}
