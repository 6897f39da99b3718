//! Per-type component processors
//!
//! A processor performs the external apply/provision calls for one
//! component type. Physical kinds go straight through the device agent;
//! configuration lanes run through the rule engine so operators can extend
//! them with rule files.

use crate::backends::{Collaborators, DeviceAgent};
use crate::error::{Error, Result};
use crate::rules::{RuleEngine, State};
use crate::template::{Component, ComponentType};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

// =============================================================================
// Processor Trait
// =============================================================================

/// Drives one component of a specific type to its desired state
#[async_trait]
pub trait ComponentProcessor: Send + Sync {
    fn kind(&self) -> ComponentType;

    /// Perform the external calls for this component. The caller holds the
    /// device's admission slot for the duration.
    async fn process(&self, component: &Component) -> Result<()>;
}

/// The desired-state payload sent to the device agent for a component
fn desired_config(component: &Component) -> Value {
    json!({
        "component": component.id.as_str(),
        "kind": component.kind.to_string(),
        "operation": if component.teardown { "teardown" } else { "provision" },
        "resources": component.resources,
    })
}

// =============================================================================
// Agent-Apply Processor
// =============================================================================

/// Processor for kinds whose entire lifecycle is one agent apply call:
/// storage arrays, servers, clusters, and virtual machines.
pub struct AgentApplyProcessor {
    kind: ComponentType,
    agent: Arc<dyn DeviceAgent>,
}

impl AgentApplyProcessor {
    pub fn new(kind: ComponentType, agent: Arc<dyn DeviceAgent>) -> Self {
        Self { kind, agent }
    }
}

#[async_trait]
impl ComponentProcessor for AgentApplyProcessor {
    fn kind(&self) -> ComponentType {
        self.kind
    }

    async fn process(&self, component: &Component) -> Result<()> {
        debug!(
            component = %component.id,
            serial = %component.certificate.serial,
            kind = %self.kind,
            "Applying desired configuration"
        );

        let report = self
            .agent
            .apply(&component.certificate, &desired_config(component))
            .await?;

        if !report.success {
            return Err(Error::BackendOperationFailed {
                backend: "device-agent".into(),
                operation: "apply".into(),
                reason: report.diagnostic_log,
            });
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Processor
// =============================================================================

/// Processor for configuration lanes: evaluates the rule engine over a
/// state seeded with the component and the device agent, then fails the
/// component if any recorded outcome carries an error. The engine itself
/// never aborts; this is where recorded errors get promoted.
pub struct ConfigurationProcessor {
    engine: Arc<RuleEngine>,
    agent: Arc<dyn DeviceAgent>,
}

impl ConfigurationProcessor {
    pub fn new(engine: Arc<RuleEngine>, agent: Arc<dyn DeviceAgent>) -> Self {
        Self { engine, agent }
    }
}

#[async_trait]
impl ComponentProcessor for ConfigurationProcessor {
    fn kind(&self) -> ComponentType {
        ComponentType::Configuration
    }

    async fn process(&self, component: &Component) -> Result<()> {
        let mut state = State::new();
        state.insert("component", component.clone())?;
        state.insert("agent", self.agent.clone())?;

        self.engine.process_rules(&mut state).await?;

        if let Some(failure) = state.first_failure() {
            let reason = failure
                .error
                .as_ref()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unspecified rule failure".into());
            return Err(Error::BackendOperationFailed {
                backend: "rule-engine".into(),
                operation: failure.rule.clone(),
                reason,
            });
        }
        Ok(())
    }
}

// =============================================================================
// Processor Set
// =============================================================================

/// Dispatch table from component type to its processor
pub struct ProcessorSet {
    processors: HashMap<ComponentType, Arc<dyn ComponentProcessor>>,
}

impl ProcessorSet {
    pub fn new() -> Self {
        Self {
            processors: HashMap::new(),
        }
    }

    /// The standard wiring: agent-apply for physical kinds, the rule
    /// engine for configuration lanes. Umbrella services have no
    /// processor; they inherit completion from their children.
    pub fn standard(collaborators: &Collaborators, engine: Arc<RuleEngine>) -> Self {
        let mut set = Self::new();
        for kind in [
            ComponentType::Storage,
            ComponentType::Server,
            ComponentType::Cluster,
            ComponentType::VirtualMachine,
        ] {
            set.register(Arc::new(AgentApplyProcessor::new(
                kind,
                collaborators.agent.clone(),
            )));
        }
        set.register(Arc::new(ConfigurationProcessor::new(
            engine,
            collaborators.agent.clone(),
        )));
        set
    }

    pub fn register(&mut self, processor: Arc<dyn ComponentProcessor>) {
        self.processors.insert(processor.kind(), processor);
    }

    pub fn get(&self, kind: ComponentType) -> Option<Arc<dyn ComponentProcessor>> {
        self.processors.get(&kind).cloned()
    }
}

impl Default for ProcessorSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::SimDeviceAgent;
    use crate::rules::Rule;
    use crate::template::{ComponentStatus, DeviceCertificate};
    use std::collections::BTreeSet;

    fn component(kind: ComponentType, teardown: bool) -> Component {
        Component {
            id: "c-1".into(),
            name: "c-1".into(),
            kind,
            certificate: DeviceCertificate::new("SN-1"),
            related: BTreeSet::new(),
            teardown,
            brownfield: false,
            resources: json!({"size_gb": 64}),
            status: ComponentStatus::Pending,
        }
    }

    #[tokio::test]
    async fn test_agent_processor_applies_desired_config() {
        let agent = Arc::new(SimDeviceAgent::new());
        let processor = AgentApplyProcessor::new(ComponentType::Storage, agent.clone());

        processor
            .process(&component(ComponentType::Storage, false))
            .await
            .unwrap();
        assert!(agent.was_applied("SN-1").await);
    }

    #[tokio::test]
    async fn test_agent_processor_surfaces_backend_failure() {
        let agent = Arc::new(SimDeviceAgent::new());
        agent.fail_serial("SN-1");
        let processor = AgentApplyProcessor::new(ComponentType::Server, agent);

        let err = processor
            .process(&component(ComponentType::Server, false))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("injected failure"));
    }

    #[tokio::test]
    async fn test_teardown_operation_in_payload() {
        let c = component(ComponentType::Server, true);
        let desired = desired_config(&c);
        assert_eq!(desired["operation"], json!("teardown"));
        assert_eq!(desired["resources"]["size_gb"], json!(64));
    }

    #[tokio::test]
    async fn test_configuration_processor_promotes_rule_errors() {
        let mut engine = RuleEngine::new();
        engine
            .add_rule(
                Rule::builder("lane-check")
                    .execute(|_| Err(Error::Internal("lane misconfigured".into()))),
            )
            .unwrap();

        let agent = Arc::new(SimDeviceAgent::new());
        let processor = ConfigurationProcessor::new(Arc::new(engine), agent);

        let err = processor
            .process(&component(ComponentType::Configuration, false))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("lane-check"));
    }

    #[tokio::test]
    async fn test_standard_set_covers_physical_kinds() {
        let collaborators = Collaborators::simulated();
        let set = ProcessorSet::standard(&collaborators, Arc::new(RuleEngine::new()));

        for kind in [
            ComponentType::Storage,
            ComponentType::Server,
            ComponentType::Cluster,
            ComponentType::VirtualMachine,
            ComponentType::Configuration,
        ] {
            assert!(set.get(kind).is_some(), "missing processor for {kind}");
        }
        assert!(set.get(ComponentType::Service).is_none());
    }
}
