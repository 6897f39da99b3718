//! Rule type and construction DSL

use crate::error::Result;
use crate::rules::State;
use futures::future::BoxFuture;
use serde_json::Value;
use std::any::Any;

/// Async rule body borrowing the shared state for the duration of the call
pub type RuleBody =
    Box<dyn for<'a> Fn(&'a mut State) -> BoxFuture<'a, Result<Option<Value>>> + Send + Sync>;

type Predicate = Box<dyn Fn(&State) -> bool + Send + Sync>;
type SlotCheck = Box<dyn Fn(&State) -> Result<()> + Send + Sync>;

/// What a single evaluation produced
pub(crate) enum Evaluation {
    /// A gate condition was false; no outcome, no side effects
    Gated,
    /// The body ran (or a precondition failed); the result is recorded
    Executed(Result<Option<Value>>),
}

// =============================================================================
// Rule
// =============================================================================

/// One declarative rule: ordering metadata, slot contracts, condition
/// gates, and the execute body.
pub struct Rule {
    name: String,
    priority: i32,
    run_on_fail: bool,
    concurrent: bool,
    requires: Vec<SlotCheck>,
    conditions: Vec<(String, Predicate)>,
    gate: Vec<String>,
    body: RuleBody,
}

impl Rule {
    pub fn builder(name: impl Into<String>) -> RuleBuilder {
        RuleBuilder {
            name: name.into(),
            priority: 100,
            run_on_fail: false,
            concurrent: false,
            requires: Vec::new(),
            conditions: Vec::new(),
            gate: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lower runs first; ties broken by load order
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Executes even when an earlier outcome in the run carries an error
    pub fn run_on_fail(&self) -> bool {
        self.run_on_fail
    }

    /// Declared safe to execute without exclusive access to the state
    pub fn concurrent(&self) -> bool {
        self.concurrent
    }

    /// Evaluate against the state: condition gates first, then slot
    /// contracts, then the body. A closed gate silences the rule entirely,
    /// required slots included, so one rule set composes across different
    /// state shapes. Precondition and body errors are returned for the
    /// engine to capture, never to abort on.
    pub(crate) async fn evaluate(&self, state: &mut State) -> Evaluation {
        let gating: Vec<&(String, Predicate)> = if self.gate.is_empty() {
            self.conditions.iter().collect()
        } else {
            self.conditions
                .iter()
                .filter(|(label, _)| self.gate.contains(label))
                .collect()
        };
        if gating.iter().any(|(_, pred)| !pred(state)) {
            return Evaluation::Gated;
        }

        for check in &self.requires {
            if let Err(e) = check(state) {
                return Evaluation::Executed(Err(e));
            }
        }

        Evaluation::Executed((self.body)(state).await)
    }
}

impl std::fmt::Debug for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rule")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("run_on_fail", &self.run_on_fail)
            .field("concurrent", &self.concurrent)
            .finish()
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Construction DSL. Loader-provided options are applied before the rule
/// definition runs, so a definition may still override them.
pub struct RuleBuilder {
    name: String,
    priority: i32,
    run_on_fail: bool,
    concurrent: bool,
    requires: Vec<SlotCheck>,
    conditions: Vec<(String, Predicate)>,
    gate: Vec<String>,
}

impl RuleBuilder {
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn run_on_fail(mut self, run_on_fail: bool) -> Self {
        self.run_on_fail = run_on_fail;
        self
    }

    pub fn concurrent(mut self, concurrent: bool) -> Self {
        self.concurrent = concurrent;
        self
    }

    /// Declare a required slot with a type check
    pub fn require<T: Any + Send + Sync>(mut self, slot: &str) -> Self {
        let slot = slot.to_string();
        self.requires.push(Box::new(move |state: &State| {
            state.require::<T>(&slot).map(|_| ())
        }));
        self
    }

    /// Declare a named condition
    pub fn condition<P>(mut self, label: &str, predicate: P) -> Self
    where
        P: Fn(&State) -> bool + Send + Sync + 'static,
    {
        self.conditions.push((label.to_string(), Box::new(predicate)));
        self
    }

    /// Gate execution on the named conditions. Without this, every declared
    /// condition gates.
    pub fn execute_when(mut self, labels: &[&str]) -> Self {
        self.gate = labels.iter().map(|l| l.to_string()).collect();
        self
    }

    /// Attach a synchronous body and finish the rule
    pub fn execute<F>(self, body: F) -> Rule
    where
        F: Fn(&mut State) -> Result<Option<Value>> + Send + Sync + 'static,
    {
        let body: RuleBody = Box::new(move |state| {
            let result = body(state);
            Box::pin(async move { result })
        });
        self.finish(body)
    }

    /// Attach an async body and finish the rule. The body borrows the
    /// state for the duration of the returned future:
    /// `Box::new(|state| Box::pin(async move { ... }))`.
    pub fn execute_async(self, body: RuleBody) -> Rule {
        self.finish(body)
    }

    fn finish(self, body: RuleBody) -> Rule {
        Rule {
            name: self.name,
            priority: self.priority,
            run_on_fail: self.run_on_fail,
            concurrent: self.concurrent,
            requires: self.requires,
            conditions: self.conditions,
            gate: self.gate,
            body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_gated_rule_produces_nothing() {
        let rule = Rule::builder("gated")
            .condition("never", |_| false)
            .execute(|_| Ok(Some(json!("ran"))));

        let mut state = State::new();
        assert!(matches!(
            rule.evaluate(&mut state).await,
            Evaluation::Gated
        ));
    }

    #[tokio::test]
    async fn test_execute_when_selects_gates() {
        // "informational" is declared but not gating.
        let rule = Rule::builder("selective")
            .condition("armed", |s: &State| s.contains("armed"))
            .condition("informational", |_| false)
            .execute_when(&["armed"])
            .execute(|_| Ok(Some(json!("ran"))));

        let mut state = State::new();
        state.insert("armed", true).unwrap();

        match rule.evaluate(&mut state).await {
            Evaluation::Executed(Ok(Some(v))) => assert_eq!(v, json!("ran")),
            _ => panic!("rule should have executed"),
        }
    }

    #[tokio::test]
    async fn test_missing_required_slot_is_an_error() {
        let rule = Rule::builder("needs-count")
            .require::<u64>("count")
            .execute(|_| Ok(None));

        let mut state = State::new();
        match rule.evaluate(&mut state).await {
            Evaluation::Executed(Err(e)) => {
                assert!(e.to_string().contains("count"));
            }
            _ => panic!("expected a precondition error"),
        }
    }

    #[tokio::test]
    async fn test_builder_defaults_and_overrides() {
        let rule = Rule::builder("defaults").execute(|_| Ok(None));
        assert_eq!(rule.priority(), 100);
        assert!(!rule.run_on_fail());
        assert!(!rule.concurrent());

        let rule = Rule::builder("overridden")
            .priority(5)
            .run_on_fail(true)
            .concurrent(true)
            .priority(7)
            .execute(|_| Ok(None));
        assert_eq!(rule.priority(), 7);
        assert!(rule.run_on_fail());
        assert!(rule.concurrent());
    }
}
