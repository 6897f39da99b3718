//! Rule engine: ordering, skip policy, outcome capture

use crate::error::{Error, Result};
use crate::rules::rule::Evaluation;
use crate::rules::{Rule, RuleOutcome, State};
use std::sync::Arc;
use tracing::{debug, warn};

/// Evaluates loaded rules against a shared [`State`] in priority order.
///
/// The engine records every executed rule's result as an outcome and never
/// aborts a run because an outcome carries an error; callers inspect the
/// outcome list and decide. Rules that must halt a run re-raise recorded
/// errors from their own body.
pub struct RuleEngine {
    /// Load order preserved; sorting happens per access
    rules: Vec<Arc<Rule>>,
}

impl RuleEngine {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    /// Register a rule. Rule names are unique per engine.
    pub fn add_rule(&mut self, rule: Rule) -> Result<()> {
        if self.rules.iter().any(|r| r.name() == rule.name()) {
            return Err(Error::DuplicateRule {
                name: rule.name().to_string(),
            });
        }
        debug!(rule = rule.name(), priority = rule.priority(), "Registered rule");
        self.rules.push(Arc::new(rule));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rules in evaluation order: ascending priority, ties by load order
    pub fn rules_by_priority(&self) -> Vec<Arc<Rule>> {
        let mut sorted = self.rules.clone();
        sorted.sort_by_key(|r| r.priority());
        sorted
    }

    /// Evaluate every rule against the state.
    ///
    /// Per rule: skip it when a prior outcome of this run carries an error
    /// and the rule is not marked `run_on_fail`; otherwise freeze the state
    /// for concurrent rules, evaluate, restore mutability, and record the
    /// outcome. A false condition gate records nothing.
    pub async fn process_rules(&self, state: &mut State) -> Result<()> {
        if self.rules.is_empty() {
            return Err(Error::NoRulesLoaded);
        }

        for rule in self.rules_by_priority() {
            if !rule.run_on_fail() && state.has_failures() {
                debug!(rule = rule.name(), "Skipped after earlier failure");
                continue;
            }

            state.set_mutable(!rule.concurrent());
            let evaluation = rule.evaluate(state).await;
            state.set_mutable(true);

            match evaluation {
                Evaluation::Gated => {
                    debug!(rule = rule.name(), "Condition gate closed");
                }
                Evaluation::Executed(Ok(data)) => {
                    state.record(RuleOutcome::ok(rule.name(), data));
                }
                Evaluation::Executed(Err(e)) => {
                    warn!(rule = rule.name(), error = %e, "Rule evaluation failed");
                    state.record(RuleOutcome::failed(rule.name(), e));
                }
            }
        }

        Ok(())
    }
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::new()
    }
}
