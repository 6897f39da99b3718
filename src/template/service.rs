//! Service template parsing and validation

use crate::error::{Error, Result};
use crate::template::{
    Component, ComponentId, ComponentSet, ComponentStatus, ComponentType, DeviceCertificate,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

// =============================================================================
// Sequence Flags
// =============================================================================

/// Deployment-level flags selecting the component type ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequenceFlags {
    /// Storage arrays come up before servers (fabric-attached storage);
    /// off for server-local storage protocols
    pub storage_before_server: bool,
    /// The template declares virtual machines
    pub include_virtual_machines: bool,
    /// Clusters are highly available and need the full server set settled
    /// before joining
    pub ha_cluster: bool,
}

impl Default for SequenceFlags {
    fn default() -> Self {
        Self {
            storage_before_server: true,
            include_virtual_machines: false,
            ha_cluster: false,
        }
    }
}

// =============================================================================
// Component Spec
// =============================================================================

/// One component as declared in the template file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentSpec {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub kind: ComponentType,
    /// Device serial; the device identity everywhere in the orchestrator
    pub serial: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub credential_ref: Option<String>,
    #[serde(default)]
    pub related: Vec<String>,
    #[serde(default)]
    pub teardown: bool,
    #[serde(default)]
    pub brownfield: bool,
    #[serde(default)]
    pub resources: Value,
}

// =============================================================================
// Service Template
// =============================================================================

/// Declarative description of one deployment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceTemplate {
    pub deployment_id: String,
    pub name: String,
    #[serde(default)]
    pub flags: SequenceFlags,
    pub components: Vec<ComponentSpec>,
}

impl ServiceTemplate {
    pub fn from_yaml(text: &str) -> Result<Self> {
        let template: ServiceTemplate = serde_yaml::from_str(text)?;
        Ok(template)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }

    /// Check the template's internal consistency. Violations are
    /// user-facing errors shown verbatim to the operator.
    pub fn validate(&self) -> Result<()> {
        if self.deployment_id.is_empty() {
            return Err(Error::Validation("deployment_id must not be empty".into()));
        }

        let mut seen = BTreeSet::new();
        for spec in &self.components {
            if spec.id.is_empty() {
                return Err(Error::Validation("component ids must not be empty".into()));
            }
            if !seen.insert(spec.id.as_str()) {
                return Err(Error::Validation(format!(
                    "duplicate component id: {}",
                    spec.id
                )));
            }
            if spec.serial.is_empty() {
                return Err(Error::Validation(format!(
                    "component {} has no device serial",
                    spec.id
                )));
            }
        }

        for spec in &self.components {
            for related in &spec.related {
                if !seen.contains(related.as_str()) {
                    return Err(Error::Validation(format!(
                        "component {} relates to unknown component {}",
                        spec.id, related
                    )));
                }
            }
        }

        Ok(())
    }

    /// Validate and materialize the shared component set
    pub fn build_components(&self) -> Result<Arc<ComponentSet>> {
        self.validate()?;

        let set = ComponentSet::new();
        for spec in &self.components {
            set.insert(Component {
                id: ComponentId::new(&spec.id),
                name: spec.name.clone().unwrap_or_else(|| spec.id.clone()),
                kind: spec.kind,
                certificate: DeviceCertificate {
                    serial: spec.serial.clone(),
                    address: spec.address.clone(),
                    credential_ref: spec.credential_ref.clone(),
                },
                related: spec.related.iter().map(|r| ComponentId::new(r)).collect(),
                teardown: spec.teardown,
                brownfield: spec.brownfield,
                resources: spec.resources.clone(),
                status: ComponentStatus::Pending,
            });
        }
        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const TEMPLATE: &str = r#"
deployment_id: dep-42
name: edge-rack
flags:
  storage_before_server: true
  include_virtual_machines: true
components:
  - id: vol-1
    kind: storage
    serial: SN-VOL-1
    resources:
      size_gb: 512
  - id: srv-1
    kind: server
    serial: SN-SRV-1
    related: [vol-1]
    resources:
      migrate_on_failure: true
  - id: vm-1
    kind: virtual_machine
    serial: SN-VM-1
    related: [srv-1]
"#;

    #[test]
    fn test_parse_template() {
        let template = ServiceTemplate::from_yaml(TEMPLATE).unwrap();
        assert_eq!(template.deployment_id, "dep-42");
        assert!(template.flags.include_virtual_machines);
        assert_eq!(template.components.len(), 3);
        assert_eq!(template.components[1].kind, ComponentType::Server);
    }

    #[test]
    fn test_build_components() {
        let template = ServiceTemplate::from_yaml(TEMPLATE).unwrap();
        let set = template.build_components().unwrap();

        assert_eq!(set.len(), 3);
        assert_eq!(
            set.ids_of_kind(ComponentType::Server),
            vec![ComponentId::from("srv-1")]
        );
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let yaml = r#"
deployment_id: dep-1
name: dup
components:
  - { id: a, kind: server, serial: SN-1 }
  - { id: a, kind: server, serial: SN-2 }
"#;
        let template = ServiceTemplate::from_yaml(yaml).unwrap();
        assert_matches!(template.validate(), Err(Error::Validation(_)));
    }

    #[test]
    fn test_unknown_relation_rejected() {
        let yaml = r#"
deployment_id: dep-1
name: dangling
components:
  - { id: a, kind: server, serial: SN-1, related: [ghost] }
"#;
        let template = ServiceTemplate::from_yaml(yaml).unwrap();
        let err = template.validate().unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn test_missing_serial_rejected() {
        let yaml = r#"
deployment_id: dep-1
name: no-serial
components:
  - { id: a, kind: server, serial: "" }
"#;
        let template = ServiceTemplate::from_yaml(yaml).unwrap();
        assert_matches!(template.validate(), Err(Error::Validation(_)));
    }

    #[test]
    fn test_flags_default_when_absent() {
        let yaml = r#"
deployment_id: dep-1
name: defaults
components: []
"#;
        let template = ServiceTemplate::from_yaml(yaml).unwrap();
        assert!(template.flags.storage_before_server);
        assert!(!template.flags.include_virtual_machines);
        assert!(!template.flags.ha_cluster);
    }
}
