//! Component types and the shared component set

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::RwLock;

// =============================================================================
// Identifiers
// =============================================================================

/// Unique identifier for a component within one deployment
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ComponentId(pub String);

impl ComponentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ComponentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ComponentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ComponentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// =============================================================================
// Component Type / Status
// =============================================================================

/// Kind of infrastructure a component declares
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentType {
    Storage,
    Server,
    Cluster,
    VirtualMachine,
    Configuration,
    Service,
}

impl ComponentType {
    /// Umbrella kinds group other components and inherit completion from
    /// their children instead of being processed against a device.
    pub fn is_grouping(&self) -> bool {
        matches!(self, ComponentType::Service)
    }
}

impl std::fmt::Display for ComponentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComponentType::Storage => write!(f, "storage"),
            ComponentType::Server => write!(f, "server"),
            ComponentType::Cluster => write!(f, "cluster"),
            ComponentType::VirtualMachine => write!(f, "virtual_machine"),
            ComponentType::Configuration => write!(f, "configuration"),
            ComponentType::Service => write!(f, "service"),
        }
    }
}

/// Lifecycle status of a component within one deployment run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentStatus {
    Pending,
    InProgress,
    Complete,
    Error,
    Skipped,
}

impl std::fmt::Display for ComponentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComponentStatus::Pending => write!(f, "pending"),
            ComponentStatus::InProgress => write!(f, "in_progress"),
            ComponentStatus::Complete => write!(f, "complete"),
            ComponentStatus::Error => write!(f, "error"),
            ComponentStatus::Skipped => write!(f, "skipped"),
        }
    }
}

// =============================================================================
// Device Certificate
// =============================================================================

/// Identity and access handle for one physical or logical device.
/// The serial is the device identity everywhere in the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCertificate {
    pub serial: String,
    #[serde(default)]
    pub address: Option<String>,
    /// Opaque reference into the credential store
    #[serde(default)]
    pub credential_ref: Option<String>,
}

impl DeviceCertificate {
    pub fn new(serial: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
            address: None,
            credential_ref: None,
        }
    }
}

// =============================================================================
// Component
// =============================================================================

/// One declared unit of infrastructure in a service template.
///
/// Components are created when the template is parsed and never removed
/// during a run. A server migration swaps the certificate and resources in
/// place under the component's lock; everything else keeps referring to the
/// same component id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Component {
    pub id: ComponentId,
    pub name: String,
    pub kind: ComponentType,
    pub certificate: DeviceCertificate,
    /// Ids of related components (cluster membership, backing volumes, ...)
    pub related: BTreeSet<ComponentId>,
    /// Marked for teardown instead of provisioning
    pub teardown: bool,
    /// Pre-existing infrastructure; referenced but never (re)provisioned
    pub brownfield: bool,
    /// Opaque desired-state configuration passed to the device backend
    pub resources: Value,
    pub status: ComponentStatus,
}

impl Component {
    /// Whether this component opted into hardware migration on failure
    pub fn migrate_on_failure(&self) -> bool {
        self.resources
            .get("migrate_on_failure")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Swap in replacement hardware: new identity, new resource set, same
    /// component id and relations.
    pub fn adopt_replacement(&mut self, certificate: DeviceCertificate, resources: Value) {
        self.certificate = certificate;
        self.resources = resources;
    }

    pub fn is_related_to(&self, other: &Component) -> bool {
        self.related.contains(&other.id) || other.related.contains(&self.id)
    }
}

// =============================================================================
// Component Set
// =============================================================================

/// All components of one deployment, shared across pipeline workers.
/// Each component sits behind its own lock so sibling workers touching
/// different components never contend.
pub struct ComponentSet {
    inner: DashMap<ComponentId, Arc<RwLock<Component>>>,
    /// Kind never changes after insert; indexed here so batch gathering
    /// needs no component locks
    kinds: DashMap<ComponentId, ComponentType>,
}

impl ComponentSet {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: DashMap::new(),
            kinds: DashMap::new(),
        })
    }

    pub fn insert(&self, component: Component) {
        self.kinds.insert(component.id.clone(), component.kind);
        self.inner
            .insert(component.id.clone(), Arc::new(RwLock::new(component)));
    }

    pub fn get(&self, id: &ComponentId) -> Option<Arc<RwLock<Component>>> {
        self.inner.get(id).map(|e| e.clone())
    }

    pub fn kind_of(&self, id: &ComponentId) -> Option<ComponentType> {
        self.kinds.get(id).map(|e| *e)
    }

    /// Ids of every component of a kind, in id order
    pub fn ids_of_kind(&self, kind: ComponentType) -> Vec<ComponentId> {
        let mut ids: Vec<ComponentId> = self
            .kinds
            .iter()
            .filter(|e| *e.value() == kind)
            .map(|e| e.key().clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn ids(&self) -> Vec<ComponentId> {
        let mut ids: Vec<ComponentId> = self.inner.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Snapshot of every component's status, in id order
    pub async fn statuses(&self) -> BTreeMap<ComponentId, ComponentStatus> {
        let mut statuses = BTreeMap::new();
        for id in self.ids() {
            if let Some(component) = self.get(&id) {
                statuses.insert(id, component.read().await.status);
            }
        }
        statuses
    }

    /// Set one component's status
    pub async fn set_status(&self, id: &ComponentId, status: ComponentStatus) {
        if let Some(component) = self.get(id) {
            component.write().await.status = status;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn component(id: &str, kind: ComponentType) -> Component {
        Component {
            id: id.into(),
            name: id.to_string(),
            kind,
            certificate: DeviceCertificate::new(format!("SN-{}", id)),
            related: BTreeSet::new(),
            teardown: false,
            brownfield: false,
            resources: json!({}),
            status: ComponentStatus::Pending,
        }
    }

    #[test]
    fn test_migrate_on_failure_flag() {
        let mut c = component("srv-1", ComponentType::Server);
        assert!(!c.migrate_on_failure());

        c.resources = json!({"migrate_on_failure": true});
        assert!(c.migrate_on_failure());

        c.resources = json!({"migrate_on_failure": "yes"});
        assert!(!c.migrate_on_failure(), "non-boolean opt-in is ignored");
    }

    #[test]
    fn test_adopt_replacement_keeps_identity() {
        let mut c = component("srv-1", ComponentType::Server);
        c.related.insert("vol-1".into());

        c.adopt_replacement(
            DeviceCertificate::new("SN-spare"),
            json!({"profile": "spare"}),
        );

        assert_eq!(c.id.as_str(), "srv-1");
        assert_eq!(c.certificate.serial, "SN-spare");
        assert_eq!(c.resources["profile"], json!("spare"));
        assert!(c.related.contains(&ComponentId::from("vol-1")));
    }

    #[tokio::test]
    async fn test_component_set_kind_index() {
        let set = ComponentSet::new();
        set.insert(component("srv-1", ComponentType::Server));
        set.insert(component("srv-2", ComponentType::Server));
        set.insert(component("vol-1", ComponentType::Storage));

        assert_eq!(set.len(), 3);
        assert_eq!(
            set.ids_of_kind(ComponentType::Server),
            vec![ComponentId::from("srv-1"), "srv-2".into()]
        );
        assert_eq!(set.kind_of(&"vol-1".into()), Some(ComponentType::Storage));
        assert!(set.ids_of_kind(ComponentType::Cluster).is_empty());
    }

    #[tokio::test]
    async fn test_status_updates() {
        let set = ComponentSet::new();
        set.insert(component("srv-1", ComponentType::Server));

        set.set_status(&"srv-1".into(), ComponentStatus::Complete)
            .await;
        let statuses = set.statuses().await;
        assert_eq!(statuses[&"srv-1".into()], ComponentStatus::Complete);
    }
}
