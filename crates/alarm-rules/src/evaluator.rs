//! The rule evaluator: decides alarm transitions for one entity.
//!
//! For each rule the evaluator walks the create conditions from the most
//! severe down and acts on the first one that is met. If none is met and the
//! rule has raised its alarm, the clear condition decides whether it is
//! cleared. The evaluator never performs I/O: it takes the prior
//! [`EntityAlarmState`] and returns the next one for the caller to persist.
//!
//! New data is evaluated with [`RuleEvaluator::evaluate_all`]. The passage of
//! time alone is evaluated with [`RuleEvaluator::evaluate_all_at`], which only
//! lets duration conditions complete and never counts a repeat.
//!
//! Callers must serialize evaluations per (tenant, entity); two evaluations
//! reading the same prior state can both decide to raise the same alarm.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::entity::AlarmTarget;
use crate::error::{Result, RuleError};
use crate::filter::ArgumentValues;
use crate::resolver::{DataSnapshot, LazyArguments};
use crate::rule::{AlarmRule, ConditionSpec, RuleCondition};
use crate::state::{AlarmStatus, ConditionProgress, EntityAlarmState, RuleAlarmState};
use crate::types::{AlarmRuleId, AlarmSeverity, EntityId};

/// Evaluator settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluatorConfig {
    /// Clear a raised alarm as soon as no create condition matches when the
    /// rule has no clear condition. When false such alarms stay raised.
    pub implicit_clear: bool,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            implicit_clear: true,
        }
    }
}

/// What should happen to a rule's alarm.
#[derive(Debug, Clone, PartialEq)]
pub enum EvaluationOutcome {
    /// Nothing changes.
    NoAction,
    /// Raise the alarm, or change the severity of the raised alarm.
    CreateOrUpdate {
        /// The new severity.
        severity: AlarmSeverity,
    },
    /// Clear the raised alarm.
    Clear,
    /// The rule is malformed and was not evaluated.
    ConfigurationError(RuleError),
}

impl EvaluationOutcome {
    /// Returns the outcome name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NoAction => "NO_ACTION",
            Self::CreateOrUpdate { .. } => "CREATE_OR_UPDATE",
            Self::Clear => "CLEAR",
            Self::ConfigurationError(_) => "CONFIGURATION_ERROR",
        }
    }

    /// Returns true if the alarm lifecycle service must act.
    #[must_use]
    pub const fn is_transition(&self) -> bool {
        matches!(self, Self::CreateOrUpdate { .. } | Self::Clear)
    }
}

impl std::fmt::Display for EvaluationOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CreateOrUpdate { severity } => write!(f, "CREATE_OR_UPDATE({severity})"),
            Self::ConfigurationError(e) => write!(f, "CONFIGURATION_ERROR({e})"),
            other => write!(f, "{}", other.as_str()),
        }
    }
}

/// The outcome of one rule, with what the caller needs to act on it.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleOutcome {
    /// The rule.
    pub rule_id: AlarmRuleId,
    /// The rule's name.
    pub rule_name: String,
    /// The alarm type the outcome applies to.
    pub alarm_type: String,
    /// Where the alarm is raised.
    pub target: AlarmTarget,
    /// Status the rule held before this evaluation.
    pub previous: AlarmStatus,
    /// The decision.
    pub outcome: EvaluationOutcome,
}

/// Result of evaluating a single rule.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// The decision.
    pub outcome: EvaluationOutcome,
    /// State to persist.
    pub state: EntityAlarmState,
    /// True if `state` differs from the prior state.
    pub state_changed: bool,
}

/// Result of evaluating all rules of an entity.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchEvaluation {
    /// One outcome per rule, in input order.
    pub outcomes: Vec<RuleOutcome>,
    /// State to persist.
    pub state: EntityAlarmState,
    /// True if `state` differs from the prior state.
    pub state_changed: bool,
}

impl BatchEvaluation {
    /// Iterates the outcomes that require the alarm lifecycle service to act.
    pub fn transitions(&self) -> impl Iterator<Item = &RuleOutcome> {
        self.outcomes.iter().filter(|o| o.outcome.is_transition())
    }

    /// Iterates the rules that failed with a configuration error.
    pub fn configuration_errors(&self) -> impl Iterator<Item = (&RuleOutcome, &RuleError)> {
        self.outcomes.iter().filter_map(|o| match &o.outcome {
            EvaluationOutcome::ConfigurationError(e) => Some((o, e)),
            _ => None,
        })
    }
}

/// Result of checking one condition, including its spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConditionResult {
    True,
    NotYetTrue,
    False,
}

/// What prompted an evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    /// New data arrived; the snapshot timestamp is the event time.
    Data,
    /// Time passed without new data.
    Tick(DateTime<Utc>),
}

impl Trigger {
    fn timestamp(self, snapshot: &DataSnapshot) -> DateTime<Utc> {
        match self {
            Self::Data => snapshot.timestamp,
            Self::Tick(now) => now,
        }
    }
}

/// Evaluates alarm rules against entity data.
#[derive(Debug, Clone, Default)]
pub struct RuleEvaluator {
    config: EvaluatorConfig,
}

impl RuleEvaluator {
    /// Creates an evaluator with the given settings.
    #[must_use]
    pub const fn new(config: EvaluatorConfig) -> Self {
        Self { config }
    }

    /// Returns the evaluator settings.
    #[must_use]
    pub const fn config(&self) -> &EvaluatorConfig {
        &self.config
    }

    /// Evaluates one rule for `entity_id`.
    ///
    /// Configuration errors are returned as
    /// [`EvaluationOutcome::ConfigurationError`] and leave the state as it was.
    #[must_use]
    pub fn evaluate(
        &self,
        rule: &AlarmRule,
        entity_id: EntityId,
        snapshot: &DataSnapshot,
        prior: &EntityAlarmState,
    ) -> Evaluation {
        let mut state = prior.clone();
        let outcome = self.evaluate_into(rule, entity_id, snapshot, &mut state, Trigger::Data);
        let state_changed = state.data != prior.data;
        Evaluation {
            outcome,
            state,
            state_changed,
        }
    }

    /// Evaluates every rule for `entity_id` in one pass.
    ///
    /// Each rule keeps its own state, so rules sharing an alarm type never
    /// reset each other's progress. A malformed rule yields a configuration
    /// error for that rule only.
    #[must_use]
    pub fn evaluate_all(
        &self,
        rules: &[AlarmRule],
        entity_id: EntityId,
        snapshot: &DataSnapshot,
        prior: &EntityAlarmState,
    ) -> BatchEvaluation {
        self.evaluate_batch(rules, entity_id, snapshot, prior, Trigger::Data)
    }

    /// Re-evaluates every rule for `entity_id` at `now` without new data.
    ///
    /// Only a duration condition whose streak, projected to `now`, exceeds
    /// its required duration can match. Simple and repeating conditions are
    /// not yet true, so no progress is reset or counted, no raised alarm is
    /// lowered, and nothing is cleared except by a duration clear condition.
    /// `snapshot` is used only to resolve duration thresholds.
    #[must_use]
    pub fn evaluate_all_at(
        &self,
        rules: &[AlarmRule],
        entity_id: EntityId,
        snapshot: &DataSnapshot,
        prior: &EntityAlarmState,
        now: DateTime<Utc>,
    ) -> BatchEvaluation {
        self.evaluate_batch(rules, entity_id, snapshot, prior, Trigger::Tick(now))
    }

    fn evaluate_batch(
        &self,
        rules: &[AlarmRule],
        entity_id: EntityId,
        snapshot: &DataSnapshot,
        prior: &EntityAlarmState,
        trigger: Trigger,
    ) -> BatchEvaluation {
        let mut state = prior.clone();
        let outcomes = rules
            .iter()
            .map(|rule| {
                let previous = state.data.rule_status(&rule.alarm_type, rule.id);
                let outcome = self.evaluate_into(rule, entity_id, snapshot, &mut state, trigger);
                RuleOutcome {
                    rule_id: rule.id,
                    rule_name: rule.name.clone(),
                    alarm_type: rule.alarm_type.clone(),
                    target: rule.configuration.alarm_target.clone(),
                    previous,
                    outcome,
                }
            })
            .collect();
        let state_changed = state.data != prior.data;
        BatchEvaluation {
            outcomes,
            state,
            state_changed,
        }
    }

    fn evaluate_into(
        &self,
        rule: &AlarmRule,
        entity_id: EntityId,
        snapshot: &DataSnapshot,
        state: &mut EntityAlarmState,
        trigger: Trigger,
    ) -> EvaluationOutcome {
        if !rule.enabled {
            return EvaluationOutcome::NoAction;
        }

        let checked = Self::check_ownership(rule, entity_id, state)
            .and_then(|()| rule.validate_conditions())
            .and_then(|()| {
                let entry = state
                    .data
                    .rule_state(&rule.alarm_type, rule.id)
                    .cloned()
                    .unwrap_or_default();
                self.decide(rule, snapshot, entry, trigger)
            });

        match checked {
            Ok((outcome, mut entry)) => {
                entry.create_progress.retain(|_, p| !p.is_clear());
                state.data.set_rule_state(&rule.alarm_type, rule.id, entry);
                match &outcome {
                    EvaluationOutcome::CreateOrUpdate { severity } => info!(
                        rule_id = %rule.id,
                        entity_id = %entity_id,
                        alarm_type = %rule.alarm_type,
                        severity = %severity,
                        "alarm raised"
                    ),
                    EvaluationOutcome::Clear => info!(
                        rule_id = %rule.id,
                        entity_id = %entity_id,
                        alarm_type = %rule.alarm_type,
                        "alarm cleared"
                    ),
                    _ => {}
                }
                outcome
            }
            Err(e) => {
                debug!(
                    rule_id = %rule.id,
                    entity_id = %entity_id,
                    error = %e,
                    "rule not evaluated"
                );
                EvaluationOutcome::ConfigurationError(e)
            }
        }
    }

    fn check_ownership(
        rule: &AlarmRule,
        entity_id: EntityId,
        state: &EntityAlarmState,
    ) -> Result<()> {
        if state.entity_id != entity_id {
            return Err(RuleError::InvalidRule {
                reason: format!(
                    "alarm state belongs to entity {}, not {entity_id}",
                    state.entity_id
                ),
            });
        }
        if state.tenant_id != rule.tenant_id {
            return Err(RuleError::InvalidRule {
                reason: format!(
                    "rule tenant {} does not own entity {entity_id}",
                    rule.tenant_id
                ),
            });
        }
        Ok(())
    }

    /// Runs the state machine for one rule on a copy of its state.
    fn decide(
        &self,
        rule: &AlarmRule,
        snapshot: &DataSnapshot,
        mut entry: RuleAlarmState,
        trigger: Trigger,
    ) -> Result<(EvaluationOutcome, RuleAlarmState)> {
        let prior = entry.status;
        let configuration = &rule.configuration;
        let at = trigger.timestamp(snapshot);

        let mut matched = None;
        for (severity, condition) in configuration.create_rules_by_severity() {
            let progress = entry.create_progress.entry(severity).or_default();
            match Self::check(condition, snapshot, progress, trigger)? {
                ConditionResult::True => {
                    matched = Some(severity);
                    break;
                }
                ConditionResult::NotYetTrue => {}
                ConditionResult::False => progress.reset(),
            }
        }

        if let Some(severity) = matched {
            // Without data the more severe conditions are unknown, not false.
            let lowered = matches!(trigger, Trigger::Tick(_))
                && prior.severity().is_some_and(|current| current > severity);
            if lowered {
                return Ok((EvaluationOutcome::NoAction, entry));
            }
            entry.clear_progress.reset();
            if prior == (AlarmStatus::Active { severity }) {
                return Ok((EvaluationOutcome::NoAction, entry));
            }
            entry.status = AlarmStatus::Active { severity };
            entry.since = Some(at);
            return Ok((EvaluationOutcome::CreateOrUpdate { severity }, entry));
        }

        if !prior.is_active() {
            return Ok((EvaluationOutcome::NoAction, entry));
        }

        let clear = match &configuration.clear_rule {
            Some(condition) => {
                match Self::check(condition, snapshot, &mut entry.clear_progress, trigger)? {
                    ConditionResult::True => true,
                    ConditionResult::NotYetTrue => false,
                    ConditionResult::False => {
                        entry.clear_progress.reset();
                        false
                    }
                }
            }
            None => self.config.implicit_clear && trigger == Trigger::Data,
        };

        if !clear {
            return Ok((EvaluationOutcome::NoAction, entry));
        }
        entry.status = AlarmStatus::Inactive;
        entry.since = Some(at);
        entry.clear_progress.reset();
        Ok((EvaluationOutcome::Clear, entry))
    }

    /// Checks a condition and folds the result into its progress.
    fn check(
        condition: &RuleCondition,
        snapshot: &DataSnapshot,
        progress: &mut ConditionProgress,
        trigger: Trigger,
    ) -> Result<ConditionResult> {
        let mut values = LazyArguments::new(&condition.arguments, snapshot);
        match trigger {
            Trigger::Data => Self::check_data(condition, &mut values, snapshot.timestamp, progress),
            Trigger::Tick(now) => Self::check_elapsed(condition, &mut values, now, progress),
        }
    }

    fn check_data(
        condition: &RuleCondition,
        values: &mut LazyArguments<'_>,
        ts: DateTime<Utc>,
        progress: &mut ConditionProgress,
    ) -> Result<ConditionResult> {
        if !condition.condition.evaluate(values)? {
            return Ok(ConditionResult::False);
        }

        // A match is counted even when its threshold cannot be resolved.
        match &condition.spec {
            ConditionSpec::Simple => Ok(ConditionResult::True),
            ConditionSpec::Repeating { arg_id } => {
                progress.event_count = progress.event_count.saturating_add(1);
                progress.last_event_ts = Some(ts);
                match threshold(values, arg_id)? {
                    Some(required) if progress.event_count >= required => {
                        Ok(ConditionResult::True)
                    }
                    _ => Ok(ConditionResult::NotYetTrue),
                }
            }
            ConditionSpec::Duration { unit, arg_id } => {
                accumulate_duration(progress, ts);
                match threshold(values, arg_id)? {
                    Some(amount) if progress.duration_ms > unit.to_millis(amount) => {
                        Ok(ConditionResult::True)
                    }
                    _ => Ok(ConditionResult::NotYetTrue),
                }
            }
        }
    }

    /// Projects a running duration streak to `now` without recording it.
    fn check_elapsed(
        condition: &RuleCondition,
        values: &mut LazyArguments<'_>,
        now: DateTime<Utc>,
        progress: &ConditionProgress,
    ) -> Result<ConditionResult> {
        let ConditionSpec::Duration { unit, arg_id } = &condition.spec else {
            return Ok(ConditionResult::NotYetTrue);
        };
        let Some(last) = progress.last_event_ts.filter(|last| now > *last) else {
            return Ok(ConditionResult::NotYetTrue);
        };
        let Some(amount) = threshold(values, arg_id)? else {
            return Ok(ConditionResult::NotYetTrue);
        };
        let projected = progress.duration_ms.saturating_add(elapsed_ms(last, now));
        if projected > unit.to_millis(amount) {
            Ok(ConditionResult::True)
        } else {
            Ok(ConditionResult::NotYetTrue)
        }
    }
}

/// Resolves a spec threshold; `None` if the snapshot has no value for it.
fn threshold(values: &mut LazyArguments<'_>, arg_id: &str) -> Result<Option<u64>> {
    let value = match values.value(arg_id) {
        Ok(value) => value,
        Err(RuleError::MissingValue { argument, key }) => {
            debug!(argument = %argument, key = %key, "no threshold value, condition not matched");
            return Ok(None);
        }
        Err(e) => return Err(e),
    };
    let amount = value.as_f64().ok_or_else(|| RuleError::TypeMismatch {
        argument: arg_id.to_string(),
        expected: crate::types::ArgumentValueType::Numeric,
        actual: value.to_string(),
    })?;
    Ok(Some(amount.max(0.0) as u64))
}

fn accumulate_duration(progress: &mut ConditionProgress, now: DateTime<Utc>) {
    match progress.last_event_ts {
        None => {
            progress.event_count = 1;
            progress.duration_ms = 0;
            progress.last_event_ts = Some(now);
        }
        Some(last) if now > last => {
            progress.event_count = progress.event_count.saturating_add(1);
            progress.duration_ms = progress.duration_ms.saturating_add(elapsed_ms(last, now));
            progress.last_event_ts = Some(now);
        }
        Some(_) => {}
    }
}

fn elapsed_ms(from: DateTime<Utc>, to: DateTime<Utc>) -> u64 {
    u64::try_from((to - from).num_milliseconds()).unwrap_or(0)
}
