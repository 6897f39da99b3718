//! Error types for the deployment orchestrator
//!
//! Provides structured error types for all orchestrator components including
//! the named cache, device state tracking, the rule engine, and the
//! component pipeline.

use thiserror::Error;

/// Unified error type for the orchestrator
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Validation error: {0}")]
    Validation(String),

    // =========================================================================
    // Device State Errors
    // =========================================================================
    #[error("Discovery already in progress for device {device}")]
    DiscoveryInProgress { device: String },

    #[error("State {state} cannot be assigned to device {device}")]
    InvalidDeviceState { device: String, state: String },

    #[error("Timed out after {waited_secs}s waiting for an operation slot for device {device}")]
    AdmissionTimeout { device: String, waited_secs: u64 },

    // =========================================================================
    // Migration Errors
    // =========================================================================
    #[error("No replacement hardware available for component {component}")]
    NoReplacementHardware { component: String },

    #[error("Switch reconfiguration failed after migrating component {component}: {reason}")]
    MigrationSwitch { component: String, reason: String },

    // =========================================================================
    // Cache Errors
    // =========================================================================
    #[error("Unknown cache: {cache}")]
    CacheUnknown { cache: String },

    #[error("Key not found in cache {cache}: {key}")]
    CacheKeyMissing { cache: String, key: String },

    #[error("Key expired in cache {cache}: {key}")]
    CacheKeyExpired { cache: String, key: String },

    // =========================================================================
    // Rule Engine Errors
    // =========================================================================
    #[error("No rules loaded")]
    NoRulesLoaded,

    #[error("Duplicate rule: {name}")]
    DuplicateRule { name: String },

    #[error("Rule load failed: {path}: {reason}")]
    RuleLoad { path: String, reason: String },

    #[error("Unknown rule kind: {kind}")]
    UnknownRuleKind { kind: String },

    #[error("Required state slot missing: {slot}")]
    StateSlotMissing { slot: String },

    #[error("State slot {slot} has the wrong type (expected {expected})")]
    StateSlotType { slot: String, expected: String },

    #[error("State is not mutable during a concurrent rule")]
    StateFrozen,

    // =========================================================================
    // Component / Pipeline Errors
    // =========================================================================
    #[error("Component not found: {component}")]
    ComponentNotFound { component: String },

    #[error("Deployment of component {component} failed")]
    ComponentFailed { component: String },

    #[error("Backend operation failed: {backend} - {operation}: {reason}")]
    BackendOperationFailed {
        backend: String,
        operation: String,
        reason: String,
    },

    // =========================================================================
    // Parse / IO Errors
    // =========================================================================
    #[error("Template parse error: {0}")]
    TemplateParse(#[from] serde_yaml::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification used by callers to pick a handling strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Validation/precondition failures meant to be shown verbatim
    UserFacing,
    /// Another operation holds the device; back off and retry later
    Backoff,
    /// Terminal for the component; never retried
    Terminal,
    /// Everything else; surfaced as a generic component failure
    Internal,
}

impl Error {
    /// Classify this error for handling decisions
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Validation(_) | Error::Configuration(_) => ErrorClass::UserFacing,

            Error::DiscoveryInProgress { .. } => ErrorClass::Backoff,

            Error::NoReplacementHardware { .. }
            | Error::MigrationSwitch { .. }
            | Error::AdmissionTimeout { .. } => ErrorClass::Terminal,

            _ => ErrorClass::Internal,
        }
    }

    /// Whether this error came out of the migration path itself.
    /// Such failures are never answered with another migration attempt.
    pub fn is_migration_failure(&self) -> bool {
        matches!(
            self,
            Error::NoReplacementHardware { .. } | Error::MigrationSwitch { .. }
        )
    }

    /// The message shown to operators for a failed component. User-facing
    /// errors are shown verbatim; everything else becomes a generic message
    /// referencing the component, with full detail in the diagnostic
    /// artifact.
    pub fn operator_message(&self, component: &str) -> String {
        match self.class() {
            ErrorClass::UserFacing => self.to_string(),
            _ => format!(
                "Deployment of component {} failed; see its diagnostic artifact",
                component
            ),
        }
    }
}

/// Result type alias for the orchestrator
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        let err = Error::Validation("missing serial".into());
        assert_eq!(err.class(), ErrorClass::UserFacing);

        let err = Error::DiscoveryInProgress {
            device: "SN-001".into(),
        };
        assert_eq!(err.class(), ErrorClass::Backoff);

        let err = Error::NoReplacementHardware {
            component: "srv-1".into(),
        };
        assert_eq!(err.class(), ErrorClass::Terminal);

        let err = Error::Internal("boom".into());
        assert_eq!(err.class(), ErrorClass::Internal);
    }

    #[test]
    fn test_migration_failures_are_marked() {
        assert!(Error::NoReplacementHardware {
            component: "srv-1".into()
        }
        .is_migration_failure());
        assert!(Error::MigrationSwitch {
            component: "srv-1".into(),
            reason: "uplink down".into()
        }
        .is_migration_failure());
        assert!(!Error::Internal("boom".into()).is_migration_failure());
    }

    #[test]
    fn test_operator_message() {
        let user = Error::Validation("component ids must be unique".into());
        assert_eq!(
            user.operator_message("srv-1"),
            "Validation error: component ids must be unique"
        );

        let internal = Error::Internal("agent rpc reset".into());
        let msg = internal.operator_message("srv-1");
        assert!(msg.contains("srv-1"));
        assert!(!msg.contains("rpc reset"));
    }
}
