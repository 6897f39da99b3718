//! Deploy Orchestrator - Infrastructure Deployment Control Plane
//!
//! Orchestrates provisioning of heterogeneous infrastructure (servers,
//! switches, storage arrays, clusters, virtual machines) by driving slow,
//! unreliable device-management backends to the end state described by a
//! declarative service template.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                        Deployment Orchestrator                               │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────────┐  │
//! │  │    Service      │  │      Rule       │  │      Component              │  │
//! │  │    Template     │  │      Engine     │  │      Pipeline               │  │
//! │  └────────┬────────┘  └────────┬────────┘  └─────────────┬───────────────┘  │
//! │           │                    │                         │                   │
//! │           └────────────────────┼─────────────────────────┘                   │
//! │                                │                                             │
//! │              ┌─────────────────┴────────────────┐                            │
//! │              │  Device State Tracker + Named    │                            │
//! │              │  Caches (admission / facts)      │                            │
//! │              └──────────────────────────────────┘                            │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │                       External Collaborators                                 │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────────┐  │
//! │  │  Device Agent   │  │  Provisioning   │  │     Switch                  │  │
//! │  │  (apply/facts)  │  │  Service        │  │     Configurer              │  │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`pipeline`]: type-sequenced component processing with failure
//!   isolation and hardware-migration retry
//! - [`rules`]: priority-ordered declarative rule engine
//! - [`cache`]: TTL named caches, also the named-mutex facility
//! - [`device`]: per-device state tracking and admission control
//! - [`template`]: service templates and components
//! - [`backends`]: external collaborator boundaries
//! - [`error`]: error types and classification

pub mod backends;
pub mod cache;
pub mod device;
pub mod error;
pub mod pipeline;
pub mod rules;
pub mod template;

// Re-export commonly used types
pub use backends::{
    ApplyReport, Collaborators, ComponentProcessor, DeviceAgent, ProcessorSet,
    ProvisioningService, ReplacementNode, SwitchConfigurer,
};

pub use cache::{spawn_sweeper, CacheConfig, CacheDirectory, DEVICE_FACTS_CACHE};

pub use device::{DeviceState, DeviceStateTracker, HeavyOpGate};

pub use error::{Error, ErrorClass, Result};

pub use pipeline::{
    component_sequence, ComponentPipeline, DeploymentReport, DiagnosticWriter, FailedComponents,
    PipelineConfig,
};

pub use rules::{
    builtin_registry, load_rules, standard_engine, Rule, RuleEngine, RuleOutcome, RuleRegistry,
    State,
};

pub use template::{
    Component, ComponentId, ComponentSet, ComponentStatus, ComponentType, DeviceCertificate,
    SequenceFlags, ServiceTemplate,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
