//! Per-device discovery/configuration state

use crate::error::{Error, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

// =============================================================================
// Device State
// =============================================================================

/// Discovery/configuration status of a physical device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceState {
    /// Never seen; the default for untracked devices
    Unknown,
    /// A discovery/apply operation has been admitted but not started
    Requested,
    /// The operation is running against the device
    InProgress,
    Success,
    Failed,
}

impl DeviceState {
    /// Whether an operation currently holds this device
    pub fn is_busy(&self) -> bool {
        matches!(self, DeviceState::Requested | DeviceState::InProgress)
    }
}

impl std::fmt::Display for DeviceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceState::Unknown => write!(f, "unknown"),
            DeviceState::Requested => write!(f, "requested"),
            DeviceState::InProgress => write!(f, "in_progress"),
            DeviceState::Success => write!(f, "success"),
            DeviceState::Failed => write!(f, "failed"),
        }
    }
}

// =============================================================================
// Tracker
// =============================================================================

/// Tracks the state of every device touched by a deployment.
///
/// A constructed instance is passed through the pipeline; all reads and
/// writes are serialized through one mutex. Device counts are modest and
/// operations are short, so coarse-grained locking is fine here.
pub struct DeviceStateTracker {
    states: Mutex<HashMap<String, DeviceState>>,
}

impl DeviceStateTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            states: Mutex::new(HashMap::new()),
        })
    }

    /// Current state of a device; `Unknown` when never tracked
    pub fn get_state(&self, device: &str) -> DeviceState {
        self.states
            .lock()
            .get(device)
            .copied()
            .unwrap_or(DeviceState::Unknown)
    }

    /// Assign a state. `Unknown` is the absence default and cannot be
    /// assigned; use [`clear`](Self::clear) to forget a device.
    pub fn set_state(&self, device: &str, state: DeviceState) -> Result<()> {
        if state == DeviceState::Unknown {
            return Err(Error::InvalidDeviceState {
                device: device.to_string(),
                state: state.to_string(),
            });
        }

        debug!(device, state = %state, "Device state transition");
        self.states.lock().insert(device.to_string(), state);
        Ok(())
    }

    /// Admit a discovery/apply operation for a device.
    ///
    /// If the device is already `Requested` or `InProgress`: with
    /// `fail_if_in_progress` the call fails with
    /// [`Error::DiscoveryInProgress`], otherwise the existing state is left
    /// untouched. Idle devices transition to `Requested`.
    ///
    /// This is the only admission primitive; the admitted operation owns the
    /// later transitions to `InProgress` and `Success`/`Failed` on every
    /// exit path.
    pub fn init_discovery(&self, device: &str, fail_if_in_progress: bool) -> Result<()> {
        let mut states = self.states.lock();

        let current = states.get(device).copied().unwrap_or(DeviceState::Unknown);
        if current.is_busy() {
            if fail_if_in_progress {
                return Err(Error::DiscoveryInProgress {
                    device: device.to_string(),
                });
            }
            return Ok(());
        }

        debug!(device, "Device admitted for discovery");
        states.insert(device.to_string(), DeviceState::Requested);
        Ok(())
    }

    /// Forget a device entirely; subsequent reads return `Unknown`
    pub fn clear(&self, device: &str) -> bool {
        self.states.lock().remove(device).is_some()
    }

    /// Number of tracked devices
    pub fn len(&self) -> usize {
        self.states.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.lock().is_empty()
    }
}
