//! Simulated collaborators
//!
//! In-memory stand-ins for the external device-management systems, used in
//! standalone mode and tests. They track applied configurations internally
//! and expose failure-injection knobs: serials that always fail to apply,
//! and a scripted queue of replacement nodes.

use crate::backends::{
    ApplyReport, DeviceAgent, NodeRecord, ProvisioningService, ReplacementNode, SwitchConfigurer,
    TaskStatus,
};
use crate::error::{Error, Result};
use crate::template::{ComponentId, DeviceCertificate};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

// =============================================================================
// Device Agent
// =============================================================================

/// Internal record of one applied configuration
#[derive(Debug, Clone)]
struct AppliedConfig {
    desired: Value,
    applied_at: chrono::DateTime<Utc>,
}

/// Simulated device configuration agent
pub struct SimDeviceAgent {
    applied: RwLock<BTreeMap<String, AppliedConfig>>,
    /// Serials whose apply always fails
    failing: Mutex<BTreeSet<String>>,
    /// Total apply calls, successful or not
    apply_calls: std::sync::atomic::AtomicU64,
    /// Artificial per-call latency
    latency: Duration,
}

impl SimDeviceAgent {
    pub fn new() -> Self {
        Self::with_latency(Duration::from_millis(0))
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self {
            applied: RwLock::new(BTreeMap::new()),
            failing: Mutex::new(BTreeSet::new()),
            apply_calls: std::sync::atomic::AtomicU64::new(0),
            latency,
        }
    }

    /// Make every apply against this serial fail
    pub fn fail_serial(&self, serial: &str) {
        self.failing.lock().insert(serial.to_string());
    }

    /// Let a previously failing serial succeed again
    pub fn heal_serial(&self, serial: &str) {
        self.failing.lock().remove(serial);
    }

    /// Number of configurations applied so far
    pub async fn applied_count(&self) -> usize {
        self.applied.read().await.len()
    }

    /// Whether a configuration was applied to this serial
    pub async fn was_applied(&self, serial: &str) -> bool {
        self.applied.read().await.contains_key(serial)
    }

    /// Total apply calls observed, successful or not
    pub fn apply_calls(&self) -> u64 {
        self.apply_calls.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// When a serial's configuration was applied
    pub async fn applied_at(&self, serial: &str) -> Option<chrono::DateTime<Utc>> {
        self.applied.read().await.get(serial).map(|c| c.applied_at)
    }
}

impl Default for SimDeviceAgent {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeviceAgent for SimDeviceAgent {
    async fn apply(&self, certificate: &DeviceCertificate, desired: &Value) -> Result<ApplyReport> {
        self.apply_calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if self.failing.lock().contains(&certificate.serial) {
            debug!(serial = %certificate.serial, "Simulated apply failure");
            return Ok(ApplyReport {
                success: false,
                diagnostic_log: format!("agent error on {}: injected failure", certificate.serial),
            });
        }

        self.applied.write().await.insert(
            certificate.serial.clone(),
            AppliedConfig {
                desired: desired.clone(),
                applied_at: Utc::now(),
            },
        );

        debug!(serial = %certificate.serial, "Simulated apply succeeded");
        Ok(ApplyReport {
            success: true,
            diagnostic_log: format!("applied configuration to {}", certificate.serial),
        })
    }

    async fn inventory(
        &self,
        certificate: &DeviceCertificate,
    ) -> Result<BTreeMap<String, String>> {
        let applied = self.applied.read().await;
        let mut facts = BTreeMap::new();
        facts.insert("serial".to_string(), certificate.serial.clone());
        facts.insert(
            "configured".to_string(),
            applied.contains_key(&certificate.serial).to_string(),
        );
        if let Some(config) = applied.get(&certificate.serial) {
            facts.insert("configured_at".to_string(), config.applied_at.to_rfc3339());
            facts.insert(
                "desired_digest".to_string(),
                format!("{:x}", stable_digest(&config.desired.to_string())),
            );
        }
        Ok(facts)
    }
}

/// Cheap stable digest for fact reporting; not cryptographic
fn stable_digest(text: &str) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    text.hash(&mut hasher);
    hasher.finish()
}

// =============================================================================
// Provisioning Service
// =============================================================================

/// Simulated bare-metal provisioning and inventory service
pub struct SimProvisioningService {
    nodes: RwLock<BTreeMap<String, NodeRecord>>,
    /// Scripted replacement offers, consumed front to back
    spares: Mutex<VecDeque<ReplacementNode>>,
}

impl SimProvisioningService {
    pub fn new() -> Self {
        Self {
            nodes: RwLock::new(BTreeMap::new()),
            spares: Mutex::new(VecDeque::new()),
        }
    }

    /// Queue a replacement node to be offered on the next request
    pub fn offer_spare(&self, node: ReplacementNode) {
        self.spares.lock().push_back(node);
    }

    /// Spares still queued
    pub fn spares_remaining(&self) -> usize {
        self.spares.lock().len()
    }

    pub async fn register_node(&self, name: &str, serial: &str) {
        self.nodes.write().await.insert(
            serial.to_string(),
            NodeRecord {
                name: name.to_string(),
                serial: serial.to_string(),
                registered_at: Utc::now(),
            },
        );
    }
}

impl Default for SimProvisioningService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProvisioningService for SimProvisioningService {
    async fn request_replacement(
        &self,
        component: &ComponentId,
        deployment: &str,
    ) -> Result<Option<ReplacementNode>> {
        let offered = self.spares.lock().pop_front();
        match &offered {
            Some(node) => {
                info!(
                    component = %component,
                    deployment,
                    serial = %node.certificate.serial,
                    "Offered replacement hardware"
                );
            }
            None => {
                info!(component = %component, deployment, "No replacement hardware available");
            }
        }
        Ok(offered)
    }

    async fn find_by_serial(&self, serial: &str) -> Result<Option<NodeRecord>> {
        Ok(self.nodes.read().await.get(serial).cloned())
    }

    async fn task_status(&self, node: &str, _policy: &str) -> Result<TaskStatus> {
        // Registered nodes are considered done; everything else is queued.
        let known = self
            .nodes
            .read()
            .await
            .values()
            .any(|record| record.name == node);
        Ok(if known {
            TaskStatus::Succeeded
        } else {
            TaskStatus::Queued
        })
    }
}

// =============================================================================
// Switch Configurer
// =============================================================================

/// Simulated switch/network reconfiguration
pub struct SimSwitchConfigurer {
    reconfigured: Mutex<Vec<String>>,
    failing: Mutex<BTreeSet<String>>,
}

impl SimSwitchConfigurer {
    pub fn new() -> Self {
        Self {
            reconfigured: Mutex::new(Vec::new()),
            failing: Mutex::new(BTreeSet::new()),
        }
    }

    /// Make reconfiguration fail for this serial
    pub fn fail_serial(&self, serial: &str) {
        self.failing.lock().insert(serial.to_string());
    }

    pub fn reconfigured_serials(&self) -> Vec<String> {
        self.reconfigured.lock().clone()
    }
}

impl Default for SimSwitchConfigurer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SwitchConfigurer for SimSwitchConfigurer {
    async fn reconfigure(&self, certificate: &DeviceCertificate) -> Result<()> {
        if self.failing.lock().contains(&certificate.serial) {
            return Err(Error::BackendOperationFailed {
                backend: "switch".into(),
                operation: "reconfigure".into(),
                reason: format!("injected failure for {}", certificate.serial),
            });
        }
        self.reconfigured.lock().push(certificate.serial.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_apply_and_inventory() {
        let agent = SimDeviceAgent::new();
        let cert = DeviceCertificate::new("SN-1");

        let report = agent.apply(&cert, &json!({"profile": "web"})).await.unwrap();
        assert!(report.success);
        assert!(agent.was_applied("SN-1").await);

        let facts = agent.inventory(&cert).await.unwrap();
        assert_eq!(facts["serial"], "SN-1");
        assert_eq!(facts["configured"], "true");
    }

    #[tokio::test]
    async fn test_injected_apply_failure() {
        let agent = SimDeviceAgent::new();
        agent.fail_serial("SN-1");

        let cert = DeviceCertificate::new("SN-1");
        let report = agent.apply(&cert, &json!({})).await.unwrap();
        assert!(!report.success);
        assert!(!agent.was_applied("SN-1").await);

        agent.heal_serial("SN-1");
        assert!(agent.apply(&cert, &json!({})).await.unwrap().success);
    }

    #[tokio::test]
    async fn test_replacement_queue_drains() {
        let service = SimProvisioningService::new();
        service.offer_spare(ReplacementNode {
            certificate: DeviceCertificate::new("SN-spare"),
            resources: json!({}),
        });

        let id = ComponentId::from("srv-1");
        let first = service.request_replacement(&id, "dep-1").await.unwrap();
        assert_eq!(first.unwrap().certificate.serial, "SN-spare");

        let second = service.request_replacement(&id, "dep-1").await.unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn test_find_by_serial_and_task_status() {
        let service = SimProvisioningService::new();
        service.register_node("node-7", "SN-7").await;

        let record = service.find_by_serial("SN-7").await.unwrap().unwrap();
        assert_eq!(record.name, "node-7");
        assert!(service.find_by_serial("SN-8").await.unwrap().is_none());

        assert_eq!(
            service.task_status("node-7", "esxi").await.unwrap(),
            TaskStatus::Succeeded
        );
        assert_eq!(
            service.task_status("node-8", "esxi").await.unwrap(),
            TaskStatus::Queued
        );
    }

    #[tokio::test]
    async fn test_switch_failure_injection() {
        let switch = SimSwitchConfigurer::new();
        switch.fail_serial("SN-bad");

        assert!(switch
            .reconfigure(&DeviceCertificate::new("SN-good"))
            .await
            .is_ok());
        assert!(switch
            .reconfigure(&DeviceCertificate::new("SN-bad"))
            .await
            .is_err());
        assert_eq!(switch.reconfigured_serials(), vec!["SN-good".to_string()]);
    }
}
