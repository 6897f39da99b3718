//! Shared rule-evaluation state
//!
//! A typed key/value bag with a mutability flag toggled by the engine
//! around each rule, plus the running outcome list. Non-concurrent rules
//! see a mutable bag; concurrent rules see it frozen and must communicate
//! through returned outcomes only.

use crate::error::{Error, Result};
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;

// =============================================================================
// Rule Outcome
// =============================================================================

/// Recorded result of one rule evaluation. Immutable once appended.
#[derive(Debug)]
pub struct RuleOutcome {
    /// Name of the rule (or component processor) that produced this
    pub rule: String,
    /// Captured evaluation error, if any
    pub error: Option<Error>,
    /// Data returned by the rule body
    pub data: Option<Value>,
}

impl RuleOutcome {
    pub fn ok(rule: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            rule: rule.into(),
            error: None,
            data,
        }
    }

    pub fn failed(rule: impl Into<String>, error: Error) -> Self {
        Self {
            rule: rule.into(),
            error: Some(error),
            data: None,
        }
    }

    pub fn is_err(&self) -> bool {
        self.error.is_some()
    }
}

// =============================================================================
// State
// =============================================================================

/// Typed slot bag shared across one rule-engine run
pub struct State {
    slots: HashMap<String, Box<dyn Any + Send + Sync>>,
    mutable: bool,
    outcomes: Vec<RuleOutcome>,
}

impl State {
    pub fn new() -> Self {
        Self {
            slots: HashMap::new(),
            mutable: true,
            outcomes: Vec::new(),
        }
    }

    /// Store a value in a slot. Fails while the state is frozen (a
    /// concurrent rule is executing).
    pub fn insert<T: Any + Send + Sync>(&mut self, slot: &str, value: T) -> Result<()> {
        if !self.mutable {
            return Err(Error::StateFrozen);
        }
        self.slots.insert(slot.to_string(), Box::new(value));
        Ok(())
    }

    /// Typed read of a slot; `None` when absent or of a different type
    pub fn get<T: Any + Send + Sync>(&self, slot: &str) -> Option<&T> {
        self.slots.get(slot).and_then(|v| v.downcast_ref::<T>())
    }

    /// Typed mutable read. Fails while frozen.
    pub fn get_mut<T: Any + Send + Sync>(&mut self, slot: &str) -> Result<Option<&mut T>> {
        if !self.mutable {
            return Err(Error::StateFrozen);
        }
        Ok(self.slots.get_mut(slot).and_then(|v| v.downcast_mut::<T>()))
    }

    /// Required-presence and required-type read: the `require_state`
    /// contract of rule declarations.
    pub fn require<T: Any + Send + Sync>(&self, slot: &str) -> Result<&T> {
        let boxed = self
            .slots
            .get(slot)
            .ok_or_else(|| Error::StateSlotMissing {
                slot: slot.to_string(),
            })?;

        boxed.downcast_ref::<T>().ok_or_else(|| Error::StateSlotType {
            slot: slot.to_string(),
            expected: std::any::type_name::<T>().to_string(),
        })
    }

    pub fn contains(&self, slot: &str) -> bool {
        self.slots.contains_key(slot)
    }

    pub fn is_mutable(&self) -> bool {
        self.mutable
    }

    /// Toggled by the engine around each rule's execution
    pub(crate) fn set_mutable(&mut self, mutable: bool) {
        self.mutable = mutable;
    }

    /// Append an outcome to the run. Outcomes are the one channel open to
    /// concurrent rules, so this is allowed regardless of the mutable flag.
    pub fn record(&mut self, outcome: RuleOutcome) {
        self.outcomes.push(outcome);
    }

    pub fn outcomes(&self) -> &[RuleOutcome] {
        &self.outcomes
    }

    /// Whether any recorded outcome in this run carries an error
    pub fn has_failures(&self) -> bool {
        self.outcomes.iter().any(RuleOutcome::is_err)
    }

    /// The first errored outcome of this run, if any
    pub fn first_failure(&self) -> Option<&RuleOutcome> {
        self.outcomes.iter().find(|o| o.is_err())
    }

    /// Consume the state, keeping only the recorded outcomes
    pub fn into_outcomes(self) -> Vec<RuleOutcome> {
        self.outcomes
    }
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn test_typed_slots() {
        let mut state = State::new();
        state.insert("count", 42u64).unwrap();
        state.insert("name", "edge-rack".to_string()).unwrap();

        assert_eq!(state.get::<u64>("count"), Some(&42));
        assert_eq!(state.require::<String>("name").unwrap(), "edge-rack");
        assert!(state.get::<u64>("name").is_none());
    }

    #[test]
    fn test_require_reports_missing_and_type() {
        let mut state = State::new();
        state.insert("count", 42u64).unwrap();

        assert_matches!(
            state.require::<u64>("absent"),
            Err(Error::StateSlotMissing { .. })
        );
        assert_matches!(
            state.require::<String>("count"),
            Err(Error::StateSlotType { .. })
        );
    }

    #[test]
    fn test_frozen_state_rejects_writes() {
        let mut state = State::new();
        state.insert("count", 1u64).unwrap();

        state.set_mutable(false);
        assert_matches!(state.insert("count", 2u64), Err(Error::StateFrozen));
        assert_matches!(state.get_mut::<u64>("count"), Err(Error::StateFrozen));

        // Reads and outcome recording stay open.
        assert_eq!(state.get::<u64>("count"), Some(&1));
        state.record(RuleOutcome::ok("probe", Some(json!(1))));

        state.set_mutable(true);
        state.insert("count", 2u64).unwrap();
    }

    #[test]
    fn test_failure_helpers() {
        let mut state = State::new();
        assert!(!state.has_failures());

        state.record(RuleOutcome::ok("first", None));
        state.record(RuleOutcome::failed(
            "second",
            Error::Internal("boom".into()),
        ));
        state.record(RuleOutcome::failed(
            "third",
            Error::Internal("later".into()),
        ));

        assert!(state.has_failures());
        assert_eq!(state.first_failure().unwrap().rule, "second");
    }
}
