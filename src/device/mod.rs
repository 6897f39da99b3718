//! Device state tracking and admission control
//!
//! [`DeviceStateTracker`] records the discovery/configuration status of each
//! physical device and is the sole admission primitive preventing two
//! overlapping operations against the same device. [`HeavyOpGate`] bounds
//! how many heavy external operations run at once.

mod admission;
mod state;

pub use admission::{HeavyOpGate, OperationPermit};
pub use state::{DeviceState, DeviceStateTracker};
