//! Rule discovery from a search path
//!
//! The engine constructor takes a platform-path-separator-joined list of
//! directories. Each directory is scanned non-recursively for `*.rule.yaml`
//! files; each file defines exactly one named rule by referencing a
//! registered rule kind and supplying its ordering options and parameters.

use crate::error::{Error, Result};
use crate::rules::{Rule, RuleBuilder};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

// =============================================================================
// Rule Spec Files
// =============================================================================

/// One rule definition file
#[derive(Debug, Clone, Deserialize)]
pub struct RuleSpec {
    /// Name the rule registers under; unique per engine
    pub name: String,
    /// Registered rule kind this file instantiates
    pub kind: String,
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default)]
    pub run_on_fail: bool,
    #[serde(default)]
    pub concurrent: bool,
    /// Kind-specific parameters, passed through opaquely
    #[serde(default)]
    pub params: Value,
}

fn default_priority() -> i32 {
    100
}

// =============================================================================
// Registry
// =============================================================================

/// Builds a [`Rule`] from a pre-configured builder and the file's
/// parameters. The builder already carries the file's name, priority,
/// run_on_fail, and concurrent options; the factory may still override
/// them.
pub type RuleFactory = Box<dyn Fn(RuleBuilder, &RuleSpec) -> Result<Rule> + Send + Sync>;

/// Maps rule kinds to their factories
pub struct RuleRegistry {
    factories: HashMap<String, RuleFactory>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn register(&mut self, kind: &str, factory: RuleFactory) {
        self.factories.insert(kind.to_string(), factory);
    }

    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.factories.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    /// Instantiate the rule a spec describes
    pub fn build(&self, spec: &RuleSpec) -> Result<Rule> {
        let factory = self
            .factories
            .get(&spec.kind)
            .ok_or_else(|| Error::UnknownRuleKind {
                kind: spec.kind.clone(),
            })?;

        let builder = Rule::builder(&spec.name)
            .priority(spec.priority)
            .run_on_fail(spec.run_on_fail)
            .concurrent(spec.concurrent);

        factory(builder, spec)
    }
}

impl Default for RuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Search-Path Loading
// =============================================================================

/// Load every rule definition found on the search path, in path order.
/// Files within a directory load in lexical order so that priority ties
/// stay deterministic.
pub fn load_rules(search_path: &str, registry: &RuleRegistry) -> Result<Vec<Rule>> {
    let mut rules = Vec::new();

    for dir in std::env::split_paths(search_path) {
        rules.extend(load_dir(&dir, registry)?);
    }

    info!(count = rules.len(), "Loaded rule definitions");
    Ok(rules)
}

fn load_dir(dir: &Path, registry: &RuleRegistry) -> Result<Vec<Rule>> {
    let pattern = dir.join("*.rule.yaml");
    let pattern = pattern.to_string_lossy();

    let mut paths: Vec<_> = glob::glob(&pattern)
        .map_err(|e| Error::RuleLoad {
            path: pattern.to_string(),
            reason: e.to_string(),
        })?
        .filter_map(|p| p.ok())
        .collect();
    paths.sort();

    let mut rules = Vec::new();
    for path in paths {
        let text = std::fs::read_to_string(&path)?;
        let spec: RuleSpec = serde_yaml::from_str(&text).map_err(|e| Error::RuleLoad {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        debug!(path = %path.display(), rule = %spec.name, kind = %spec.kind, "Loading rule file");
        rules.push(registry.build(&spec)?);
    }

    Ok(rules)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{RuleEngine, State};
    use assert_matches::assert_matches;
    use serde_json::json;
    use std::io::Write;

    fn registry_with_echo() -> RuleRegistry {
        let mut registry = RuleRegistry::new();
        registry.register(
            "echo",
            Box::new(|builder, spec| {
                let payload = spec.params.clone();
                Ok(builder.execute(move |_state| Ok(Some(payload.clone()))))
            }),
        );
        registry
    }

    fn write_rule(dir: &Path, file: &str, body: &str) {
        let mut f = std::fs::File::create(dir.join(file)).unwrap();
        f.write_all(body.as_bytes()).unwrap();
    }

    #[tokio::test]
    async fn test_load_rules_from_two_directories() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();

        write_rule(
            a.path(),
            "10-greet.rule.yaml",
            "name: greet\nkind: echo\npriority: 10\nparams:\n  msg: hello\n",
        );
        write_rule(
            b.path(),
            "20-farewell.rule.yaml",
            "name: farewell\nkind: echo\npriority: 20\nrun_on_fail: true\nparams:\n  msg: bye\n",
        );
        // Non-rule files are ignored.
        write_rule(b.path(), "notes.txt", "not a rule");

        let search_path = std::env::join_paths([a.path(), b.path()])
            .unwrap()
            .into_string()
            .unwrap();

        let registry = registry_with_echo();
        let rules = load_rules(&search_path, &registry).unwrap();
        assert_eq!(rules.len(), 2);

        let mut engine = RuleEngine::new();
        for rule in rules {
            engine.add_rule(rule).unwrap();
        }

        let mut state = State::new();
        engine.process_rules(&mut state).await.unwrap();

        assert_eq!(state.outcomes().len(), 2);
        assert_eq!(state.outcomes()[0].rule, "greet");
        assert_eq!(
            state.outcomes()[0].data.as_ref().unwrap()["msg"],
            json!("hello")
        );
        assert_eq!(state.outcomes()[1].rule, "farewell");
    }

    #[test]
    fn test_subdirectories_are_not_scanned() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("nested");
        std::fs::create_dir(&nested).unwrap();
        write_rule(&nested, "hidden.rule.yaml", "name: hidden\nkind: echo\n");

        let registry = registry_with_echo();
        let rules = load_rules(&dir.path().to_string_lossy(), &registry).unwrap();
        assert!(rules.is_empty());
    }

    #[test]
    fn test_unknown_kind_fails() {
        let dir = tempfile::tempdir().unwrap();
        write_rule(dir.path(), "x.rule.yaml", "name: x\nkind: nonsense\n");

        let registry = registry_with_echo();
        assert_matches!(
            load_rules(&dir.path().to_string_lossy(), &registry),
            Err(Error::UnknownRuleKind { .. })
        );
    }

    #[test]
    fn test_malformed_rule_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        write_rule(dir.path(), "x.rule.yaml", "kind: [not, a, rule");

        let registry = registry_with_echo();
        assert_matches!(
            load_rules(&dir.path().to_string_lossy(), &registry),
            Err(Error::RuleLoad { .. })
        );
    }

    #[test]
    fn test_factory_receives_preapplied_options() {
        let mut registry = RuleRegistry::new();
        registry.register(
            "probe",
            Box::new(|builder, _spec| Ok(builder.execute(|_| Ok(None)))),
        );

        let spec = RuleSpec {
            name: "probed".into(),
            kind: "probe".into(),
            priority: 7,
            run_on_fail: true,
            concurrent: true,
            params: Value::Null,
        };

        let rule = registry.build(&spec).unwrap();
        assert_eq!(rule.name(), "probed");
        assert_eq!(rule.priority(), 7);
        assert!(rule.run_on_fail());
        assert!(rule.concurrent());
    }
}
