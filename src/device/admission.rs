//! Bounded admission for heavy external operations
//!
//! Device backends are slow; running every component's apply at once would
//! swamp them. The gate caps concurrent heavy operations and makes callers
//! wait for headroom, up to a timeout.

use crate::error::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::trace;

/// RAII slot for one heavy operation. Dropping it releases the slot on
/// every exit path, including panics and early returns.
#[derive(Debug)]
pub struct OperationPermit {
    _permit: OwnedSemaphorePermit,
    device: String,
}

impl OperationPermit {
    /// Device this slot was admitted for
    pub fn device(&self) -> &str {
        &self.device
    }
}

impl Drop for OperationPermit {
    fn drop(&mut self) {
        trace!(device = %self.device, "Released heavy-operation slot");
    }
}

/// Caps the number of concurrently running heavy external operations
pub struct HeavyOpGate {
    slots: Arc<Semaphore>,
    timeout: Duration,
}

impl HeavyOpGate {
    /// `limit` concurrent operations; callers wait up to `timeout` for a slot
    pub fn new(limit: usize, timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            slots: Arc::new(Semaphore::new(limit)),
            timeout: timeout.max(Duration::from_millis(1)),
        })
    }

    /// Wait until the concurrency counter has headroom, then take a slot.
    /// Fails with [`Error::AdmissionTimeout`] when no slot frees up in time.
    pub async fn admit(&self, device: &str) -> Result<OperationPermit> {
        let acquired = tokio::time::timeout(self.timeout, self.slots.clone().acquire_owned()).await;

        match acquired {
            Ok(Ok(permit)) => {
                trace!(device, "Acquired heavy-operation slot");
                Ok(OperationPermit {
                    _permit: permit,
                    device: device.to_string(),
                })
            }
            Ok(Err(_)) => Err(Error::Internal("admission gate closed".into())),
            Err(_) => Err(Error::AdmissionTimeout {
                device: device.to_string(),
                waited_secs: self.timeout.as_secs(),
            }),
        }
    }

    /// Slots currently free
    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }
}
