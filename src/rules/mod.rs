//! Declarative rule engine
//!
//! Rules are small declarative units evaluated in priority order over a
//! shared [`State`]. A rule declares required state slots, named condition
//! gates, and an execute body; the engine captures body errors into
//! [`RuleOutcome`]s and never aborts a run on its own. Rules that must
//! halt a run re-raise recorded errors from their own body.

mod builtin;
mod engine;
mod loader;
mod rule;
mod state;

pub use builtin::{builtin_registry, standard_engine, standard_rules, teardown_engine};
pub use engine::RuleEngine;
pub use loader::{load_rules, RuleFactory, RuleRegistry, RuleSpec};
pub use rule::{Rule, RuleBody, RuleBuilder};
pub use state::{RuleOutcome, State};
