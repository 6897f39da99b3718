//! External collaborator boundaries
//!
//! The orchestrator drives slow, unreliable device-management systems
//! through three narrow interfaces: the device configuration agent, the
//! provisioning/inventory service, and the switch configurer. Their
//! internals are irrelevant here; every call is made while the target
//! device holds its admission slot.

mod processor;
mod sim;

pub use processor::{AgentApplyProcessor, ComponentProcessor, ConfigurationProcessor, ProcessorSet};
pub use sim::{SimDeviceAgent, SimProvisioningService, SimSwitchConfigurer};

use crate::error::Result;
use crate::template::{ComponentId, DeviceCertificate};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

// =============================================================================
// Boundary Types
// =============================================================================

/// Result of applying desired configuration to a device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyReport {
    pub success: bool,
    /// Backend-produced log, kept for the diagnostic artifact
    pub diagnostic_log: String,
}

/// Replacement hardware offered by the provisioning service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplacementNode {
    pub certificate: DeviceCertificate,
    pub resources: Value,
}

/// Inventory record for a node known to the provisioning service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    pub name: String,
    pub serial: String,
    pub registered_at: DateTime<Utc>,
}

/// Progression of an externally-owned provisioning task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

// =============================================================================
// Collaborator Traits
// =============================================================================

/// Device configuration agent: applies desired state and reports facts
#[async_trait]
pub trait DeviceAgent: Send + Sync {
    /// Drive the device to the desired configuration. Idempotent by
    /// convention: re-applying the same desired state is safe.
    async fn apply(&self, certificate: &DeviceCertificate, desired: &Value) -> Result<ApplyReport>;

    /// Collect inventory facts from the device
    async fn inventory(&self, certificate: &DeviceCertificate)
        -> Result<BTreeMap<String, String>>;
}

/// Bare-metal provisioning and inventory service
#[async_trait]
pub trait ProvisioningService: Send + Sync {
    /// Ask for replacement hardware for a failed component. `None` means
    /// no suitable spare exists.
    async fn request_replacement(
        &self,
        component: &ComponentId,
        deployment: &str,
    ) -> Result<Option<ReplacementNode>>;

    async fn find_by_serial(&self, serial: &str) -> Result<Option<NodeRecord>>;

    async fn task_status(&self, node: &str, policy: &str) -> Result<TaskStatus>;
}

/// Reconfigures switch/network dependencies for a device
#[async_trait]
pub trait SwitchConfigurer: Send + Sync {
    async fn reconfigure(&self, certificate: &DeviceCertificate) -> Result<()>;
}

/// The full set of collaborators handed to the pipeline
#[derive(Clone)]
pub struct Collaborators {
    pub agent: Arc<dyn DeviceAgent>,
    pub provisioning: Arc<dyn ProvisioningService>,
    pub switch: Arc<dyn SwitchConfigurer>,
}

impl Collaborators {
    /// Fully simulated collaborators for standalone mode and tests
    pub fn simulated() -> Self {
        Self {
            agent: Arc::new(SimDeviceAgent::new()),
            provisioning: Arc::new(SimProvisioningService::new()),
            switch: Arc::new(SimSwitchConfigurer::new()),
        }
    }
}
