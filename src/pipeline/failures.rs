//! Shared failed-component set

use crate::template::ComponentId;
use dashmap::DashSet;
use std::sync::Arc;

/// Append/contains set of failed component ids, shared for the lifetime of
/// one deployment run. Written by pipeline workers, read by siblings when
/// deciding whether a failure must abort the batch.
pub struct FailedComponents {
    inner: DashSet<ComponentId>,
}

impl FailedComponents {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: DashSet::new(),
        })
    }

    /// Record a failure; returns false when already recorded
    pub fn insert(&self, id: ComponentId) -> bool {
        self.inner.insert(id)
    }

    pub fn contains(&self, id: &ComponentId) -> bool {
        self.inner.contains(id)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Failed ids in id order
    pub fn ids(&self) -> Vec<ComponentId> {
        let mut ids: Vec<ComponentId> = self.inner.iter().map(|e| e.clone()).collect();
        ids.sort();
        ids
    }
}
