//! Built-in rule kinds
//!
//! These ship with the orchestrator and are also exposed through the rule
//! registry so operators can re-instantiate them from rule files with
//! different priorities or parameters.

use crate::backends::DeviceAgent;
use crate::cache::{CacheDirectory, DEVICE_FACTS_CACHE};
use crate::device::DeviceStateTracker;
use crate::error::{Error, Result};
use crate::rules::{Rule, RuleRegistry, State};
use crate::template::{Component, DeviceCertificate, ServiceTemplate};
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

/// Registry pre-populated with every built-in rule kind
pub fn builtin_registry() -> RuleRegistry {
    let mut registry = RuleRegistry::new();

    registry.register(
        "template-validate",
        Box::new(|builder, _spec| Ok(template_validate(builder))),
    );
    registry.register(
        "device-teardown",
        Box::new(|builder, _spec| Ok(device_teardown(builder))),
    );
    registry.register(
        "configuration-provision",
        Box::new(|builder, _spec| Ok(configuration_provision(builder))),
    );

    registry
}

/// The standard rule set the pipeline runs with when no rule files are
/// supplied
pub fn standard_rules() -> Vec<Rule> {
    vec![
        template_validate(Rule::builder("template-validate").priority(0)),
        device_teardown(
            Rule::builder("device-teardown")
                .priority(10)
                .run_on_fail(true),
        ),
        configuration_provision(
            Rule::builder("configuration-provision")
                .priority(100)
                .run_on_fail(true),
        ),
    ]
}

/// Template consistency gate. Runs first and records a user-facing error
/// for the caller to promote.
fn template_validate(builder: crate::rules::RuleBuilder) -> Rule {
    builder
        .require::<ServiceTemplate>("template")
        .condition("has-template", |state| state.contains("template"))
        .execute(|state| {
            let template: &ServiceTemplate = state.require("template")?;
            template.validate()?;
            Ok(Some(json!({
                "deployment": template.deployment_id,
                "components": template.components.len(),
            })))
        })
}

/// Clears a replaced device's discovered state and cached facts. Gated on
/// the teardown flag so the same rule set can run for ordinary
/// provisioning states.
fn device_teardown(builder: crate::rules::RuleBuilder) -> Rule {
    builder
        .require::<Arc<DeviceStateTracker>>("tracker")
        .require::<Arc<CacheDirectory>>("caches")
        .require::<DeviceCertificate>("certificate")
        .condition("teardown-requested", |state| {
            state.get::<bool>("teardown").copied().unwrap_or(false)
        })
        .execute_when(&["teardown-requested"])
        .execute(|state| {
            let tracker: &Arc<DeviceStateTracker> = state.require("tracker")?;
            let caches: &Arc<CacheDirectory> = state.require("caches")?;
            let certificate: &DeviceCertificate = state.require("certificate")?;

            let serial = certificate.serial.clone();
            let cleared = tracker.clear(&serial);
            // The facts cache may not be set up in every run.
            let evicted = caches.evict(DEVICE_FACTS_CACHE, &serial).unwrap_or(false);

            debug!(serial = %serial, cleared, evicted, "Tore down device state");
            Ok(Some(json!({
                "serial": serial,
                "state_cleared": cleared,
                "facts_evicted": evicted,
            })))
        })
}

/// Drives a configuration lane through the device agent, then re-raises
/// any error already recorded in this run. The engine never aborts on its
/// own; this re-raise is what stops a configuration run.
fn configuration_provision(builder: crate::rules::RuleBuilder) -> Rule {
    builder
        .require::<Component>("component")
        .require::<Arc<dyn DeviceAgent>>("agent")
        .condition("has-component", |state| state.contains("component"))
        .execute_async(Box::new(|state| {
            Box::pin(async move {
                let component: Component = state.require::<Component>("component")?.clone();
                let agent: Arc<dyn DeviceAgent> =
                    state.require::<Arc<dyn DeviceAgent>>("agent")?.clone();

                let desired = json!({
                    "component": component.id.as_str(),
                    "kind": component.kind.to_string(),
                    "operation": if component.teardown { "teardown" } else { "provision" },
                    "resources": component.resources,
                });

                let report = agent.apply(&component.certificate, &desired).await?;
                if !report.success {
                    return Err(Error::BackendOperationFailed {
                        backend: "device-agent".into(),
                        operation: "apply".into(),
                        reason: report.diagnostic_log,
                    });
                }

                if let Some(failure) = state.first_failure() {
                    return Err(Error::Internal(format!(
                        "re-raised from {}: {}",
                        failure.rule,
                        failure
                            .error
                            .as_ref()
                            .map(|e| e.to_string())
                            .unwrap_or_else(|| "unspecified".into())
                    )));
                }

                Ok(Some(json!({"applied": component.certificate.serial})))
            })
        }))
}

/// Convenience: a standard engine carrying the built-in rule set
pub fn standard_engine() -> Result<crate::rules::RuleEngine> {
    let mut engine = crate::rules::RuleEngine::new();
    for rule in standard_rules() {
        engine.add_rule(rule)?;
    }
    Ok(engine)
}

/// Engine carrying only the teardown rule; the migration path runs this
/// against a replaced device's old certificate.
pub fn teardown_engine() -> Result<crate::rules::RuleEngine> {
    let mut engine = crate::rules::RuleEngine::new();
    engine.add_rule(device_teardown(
        Rule::builder("device-teardown").run_on_fail(true),
    ))?;
    Ok(engine)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::SimDeviceAgent;
    use crate::cache::CacheConfig;
    use crate::device::DeviceState;
    use crate::template::{ComponentStatus, ComponentType};
    use std::collections::BTreeSet;

    fn configuration_component(serial: &str) -> Component {
        Component {
            id: "cfg-1".into(),
            name: "cfg-1".into(),
            kind: ComponentType::Configuration,
            certificate: DeviceCertificate::new(serial),
            related: BTreeSet::new(),
            teardown: false,
            brownfield: false,
            resources: json!({"lane": "mgmt"}),
            status: ComponentStatus::Pending,
        }
    }

    #[tokio::test]
    async fn test_template_validate_records_user_error() {
        let mut engine = crate::rules::RuleEngine::new();
        engine
            .add_rule(template_validate(Rule::builder("template-validate")))
            .unwrap();

        let bad = ServiceTemplate {
            deployment_id: "".into(),
            name: "broken".into(),
            flags: Default::default(),
            components: vec![],
        };

        let mut state = State::new();
        state.insert("template", bad).unwrap();
        engine.process_rules(&mut state).await.unwrap();

        assert!(state.has_failures());
        let failure = state.first_failure().unwrap();
        assert!(failure
            .error
            .as_ref()
            .unwrap()
            .to_string()
            .contains("deployment_id"));
    }

    #[tokio::test]
    async fn test_device_teardown_clears_state_and_facts() {
        let tracker = DeviceStateTracker::new();
        tracker.set_state("SN-old", DeviceState::Success).unwrap();

        let caches = CacheDirectory::new(CacheConfig::default());
        caches.setup(DEVICE_FACTS_CACHE, None);
        caches
            .write(DEVICE_FACTS_CACHE, "SN-old", json!({"cpus": 16}))
            .await
            .unwrap();

        let mut engine = crate::rules::RuleEngine::new();
        engine
            .add_rule(device_teardown(Rule::builder("device-teardown")))
            .unwrap();

        let mut state = State::new();
        state.insert("tracker", tracker.clone()).unwrap();
        state.insert("caches", caches.clone()).unwrap();
        state
            .insert("certificate", DeviceCertificate::new("SN-old"))
            .unwrap();
        state.insert("teardown", true).unwrap();

        engine.process_rules(&mut state).await.unwrap();

        assert!(!state.has_failures());
        assert_eq!(tracker.get_state("SN-old"), DeviceState::Unknown);
        assert!(caches.read(DEVICE_FACTS_CACHE, "SN-old").await.is_err());
    }

    #[tokio::test]
    async fn test_device_teardown_gated_without_flag() {
        let tracker = DeviceStateTracker::new();
        tracker.set_state("SN-old", DeviceState::Success).unwrap();
        let caches = CacheDirectory::new(CacheConfig::default());

        let mut engine = crate::rules::RuleEngine::new();
        engine
            .add_rule(device_teardown(Rule::builder("device-teardown")))
            .unwrap();

        let mut state = State::new();
        state.insert("tracker", tracker.clone()).unwrap();
        state.insert("caches", caches).unwrap();
        state
            .insert("certificate", DeviceCertificate::new("SN-old"))
            .unwrap();

        engine.process_rules(&mut state).await.unwrap();

        assert!(state.outcomes().is_empty());
        assert_eq!(tracker.get_state("SN-old"), DeviceState::Success);
    }

    #[tokio::test]
    async fn test_configuration_provision_applies_and_reraises() {
        let agent: Arc<dyn DeviceAgent> = Arc::new(SimDeviceAgent::new());

        let mut engine = crate::rules::RuleEngine::new();
        engine
            .add_rule(
                Rule::builder("earlier-failure")
                    .priority(1)
                    .execute(|_| Err(Error::Internal("bad lane".into()))),
            )
            .unwrap();
        engine
            .add_rule(configuration_provision(
                Rule::builder("configuration-provision")
                    .priority(100)
                    .run_on_fail(true),
            ))
            .unwrap();

        let mut state = State::new();
        state
            .insert("component", configuration_component("SN-cfg"))
            .unwrap();
        state.insert("agent", agent).unwrap();

        engine.process_rules(&mut state).await.unwrap();

        // The provision rule ran despite the earlier failure, applied its
        // configuration, then re-raised the recorded error as its own.
        let outcomes = state.outcomes();
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes[1]
            .error
            .as_ref()
            .unwrap()
            .to_string()
            .contains("earlier-failure"));
    }

    #[tokio::test]
    async fn test_standard_engine_loads_builtins() {
        let engine = standard_engine().unwrap();
        let names: Vec<String> = engine
            .rules_by_priority()
            .iter()
            .map(|r| r.name().to_string())
            .collect();
        assert_eq!(
            names,
            vec![
                "template-validate".to_string(),
                "device-teardown".into(),
                "configuration-provision".into(),
            ]
        );
    }

    #[tokio::test]
    async fn test_builtin_registry_kinds() {
        let registry = builtin_registry();
        assert_eq!(
            registry.kinds(),
            vec![
                "configuration-provision".to_string(),
                "device-teardown".into(),
                "template-validate".into(),
            ]
        );
    }
}
