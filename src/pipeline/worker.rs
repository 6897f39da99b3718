//! Per-component worker
//!
//! One worker drives one component to completion, retrying through
//! hardware migration when the component qualifies. The retry decision is
//! made by inspecting a tagged outcome, never by matching on error types
//! scattered through control flow.

use crate::backends::{Collaborators, ProcessorSet};
use crate::cache::{CacheDirectory, DEVICE_FACTS_CACHE};
use crate::device::{DeviceState, DeviceStateTracker, HeavyOpGate};
use crate::error::{Error, Result};
use crate::pipeline::migration::migrate_component;
use crate::pipeline::pipeline::PipelineMetrics;
use crate::pipeline::{DiagnosticWriter, FailedComponents};
use crate::rules::RuleEngine;
use crate::template::{Component, ComponentId, ComponentSet, ComponentStatus, ComponentType};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

// =============================================================================
// Worker Context
// =============================================================================

/// Shared handles every worker needs
pub(crate) struct WorkerContext {
    pub deployment_id: String,
    pub components: Arc<ComponentSet>,
    pub processors: Arc<ProcessorSet>,
    pub collaborators: Collaborators,
    pub tracker: Arc<DeviceStateTracker>,
    pub gate: Arc<HeavyOpGate>,
    pub caches: Arc<CacheDirectory>,
    pub failed: Arc<FailedComponents>,
    pub diagnostics: Arc<DiagnosticWriter>,
    pub teardown_engine: Arc<RuleEngine>,
    pub max_attempts: u32,
    pub metrics: PipelineMetrics,
}

/// What one worker reports back to the batch
pub(crate) struct WorkerReport {
    pub component: ComponentId,
    pub error: Option<Error>,
}

impl WorkerReport {
    fn ok(component: ComponentId) -> Self {
        Self {
            component,
            error: None,
        }
    }

    fn failed(component: ComponentId, error: Error) -> Self {
        Self {
            component,
            error: Some(error),
        }
    }
}

/// Tagged outcome of one processing attempt. `Recoverable` means the
/// component qualifies for another attempt on replacement hardware.
enum ProcessOutcome {
    Success,
    Recoverable(Error),
    Terminal(Error),
}

// =============================================================================
// Worker Body
// =============================================================================

/// Process one component, with up to `max_attempts` total attempts for
/// servers that opted into migration on failure.
pub(crate) async fn run_component(ctx: Arc<WorkerContext>, id: ComponentId) -> WorkerReport {
    let record = match ctx.components.get(&id) {
        Some(record) => record,
        None => {
            return WorkerReport::failed(
                id.clone(),
                Error::ComponentNotFound {
                    component: id.to_string(),
                },
            )
        }
    };

    let (kind, brownfield) = {
        let component = record.read().await;
        (component.kind, component.brownfield)
    };

    if brownfield {
        debug!(component = %id, "Brownfield component; not managed here");
        ctx.components.set_status(&id, ComponentStatus::Skipped).await;
        return WorkerReport::ok(id);
    }

    if kind.is_grouping() {
        return finish_umbrella(&ctx, &record, id).await;
    }

    let mut attempts: u32 = 0;
    let mut migrate_pending = false;

    loop {
        attempts += 1;

        if migrate_pending {
            ctx.metrics.migrations.inc();
            if let Err(error) = migrate_component(&ctx, &record).await {
                return fail_component(&ctx, &record, id, attempts, error).await;
            }
            migrate_pending = false;
        }

        match attempt_once(&ctx, &record, kind, attempts).await {
            ProcessOutcome::Success => {
                ctx.components.set_status(&id, ComponentStatus::Complete).await;
                inherit_umbrella(&ctx, &record).await;
                ctx.metrics.components_processed.inc();
                info!(component = %id, attempts, "Component complete");
                return WorkerReport::ok(id);
            }
            ProcessOutcome::Recoverable(error) => {
                let snapshot = record.read().await.clone();
                ctx.diagnostics.write(&snapshot, attempts, &error);
                warn!(
                    component = %id,
                    attempts,
                    error = %error,
                    "Component failed; retrying on replacement hardware"
                );
                migrate_pending = true;
            }
            ProcessOutcome::Terminal(error) => {
                return fail_component(&ctx, &record, id, attempts, error).await;
            }
        }
    }
}

/// One attempt: admission, processing, state transitions, fact caching
async fn attempt_once(
    ctx: &WorkerContext,
    record: &Arc<RwLock<Component>>,
    kind: ComponentType,
    attempts: u32,
) -> ProcessOutcome {
    let snapshot = record.read().await.clone();

    match process_guarded(ctx, &snapshot, kind).await {
        Ok(()) => ProcessOutcome::Success,
        Err(error) => classify_failure(&snapshot, kind, attempts, ctx.max_attempts, error),
    }
}

/// The migration decision: SERVER components only, attempts remaining,
/// explicit opt-in, and never in response to a migration failure itself.
fn classify_failure(
    component: &Component,
    kind: ComponentType,
    attempts: u32,
    max_attempts: u32,
    error: Error,
) -> ProcessOutcome {
    let migratable = kind == ComponentType::Server
        && attempts < max_attempts
        && component.migrate_on_failure()
        && !error.is_migration_failure();

    if migratable {
        ProcessOutcome::Recoverable(error)
    } else {
        ProcessOutcome::Terminal(error)
    }
}

/// Run the type processor while holding the device's admission slot.
/// Device state is only touched once admission succeeded, and every path
/// past that point ends in `Success` or `Failed`.
async fn process_guarded(
    ctx: &WorkerContext,
    snapshot: &Component,
    kind: ComponentType,
) -> Result<()> {
    let serial = snapshot.certificate.serial.clone();

    let _permit = ctx.gate.admit(&serial).await?;
    ctx.tracker.init_discovery(&serial, true)?;
    ctx.tracker.set_state(&serial, DeviceState::InProgress)?;
    ctx.components
        .set_status(&snapshot.id, ComponentStatus::InProgress)
        .await;

    let processor = match ctx.processors.get(kind) {
        Some(processor) => processor,
        None => {
            ctx.tracker.set_state(&serial, DeviceState::Failed)?;
            return Err(Error::Internal(format!("no processor for kind {kind}")));
        }
    };

    match processor.process(snapshot).await {
        Ok(()) => {
            ctx.tracker.set_state(&serial, DeviceState::Success)?;
            cache_facts(ctx, snapshot).await;
            Ok(())
        }
        Err(error) => {
            // Keep the original failure even if the transition write fails.
            if let Err(e) = ctx.tracker.set_state(&serial, DeviceState::Failed) {
                warn!(serial = %serial, error = %e, "Could not record failed device state");
            }
            Err(error)
        }
    }
}

/// Cache the device's inventory facts after a successful apply. Facts are
/// an optimization; problems here never fail the component.
async fn cache_facts(ctx: &WorkerContext, snapshot: &Component) {
    let serial = snapshot.certificate.serial.clone();

    let facts = match ctx
        .collaborators
        .agent
        .inventory(&snapshot.certificate)
        .await
    {
        Ok(facts) => facts,
        Err(error) => {
            warn!(serial = %serial, error = %error, "Inventory collection failed");
            return;
        }
    };

    ctx.caches.setup(DEVICE_FACTS_CACHE, None);
    let value = json!(facts);
    if let Err(error) = ctx.caches.write(DEVICE_FACTS_CACHE, &serial, value).await {
        warn!(serial = %serial, error = %error, "Could not cache device facts");
    }
}

/// Mark the component failed: status, failed set, diagnostic artifact
async fn fail_component(
    ctx: &WorkerContext,
    record: &Arc<RwLock<Component>>,
    id: ComponentId,
    attempts: u32,
    error: Error,
) -> WorkerReport {
    let snapshot = record.read().await.clone();
    ctx.diagnostics.write(&snapshot, attempts, &error);
    ctx.components.set_status(&id, ComponentStatus::Error).await;
    ctx.failed.insert(id.clone());
    ctx.metrics.component_failures.inc();

    warn!(
        component = %id,
        attempts,
        "{}",
        error.operator_message(id.as_str())
    );
    WorkerReport::failed(id, error)
}

/// A completing component marks its umbrella services complete
async fn inherit_umbrella(ctx: &WorkerContext, record: &Arc<RwLock<Component>>) {
    let (id, related) = {
        let component = record.read().await;
        (component.id.clone(), component.related.clone())
    };

    for service_id in ctx.components.ids_of_kind(ComponentType::Service) {
        let service = match ctx.components.get(&service_id) {
            Some(service) => service,
            None => continue,
        };
        let is_parent = {
            let service = service.read().await;
            service.related.contains(&id) || related.contains(&service_id)
        };
        if is_parent {
            debug!(service = %service_id, child = %id, "Umbrella service inherits completion");
            ctx.components
                .set_status(&service_id, ComponentStatus::Complete)
                .await;
        }
    }
}

/// Umbrella services are not processed against a device; at their own
/// stage they complete when every child did.
async fn finish_umbrella(
    ctx: &WorkerContext,
    record: &Arc<RwLock<Component>>,
    id: ComponentId,
) -> WorkerReport {
    let snapshot = record.read().await.clone();

    let mut all_done = true;
    for child_id in &snapshot.related {
        if let Some(child) = ctx.components.get(child_id) {
            let status = child.read().await.status;
            if !matches!(status, ComponentStatus::Complete | ComponentStatus::Skipped) {
                all_done = false;
            }
        }
    }

    if all_done {
        ctx.components.set_status(&id, ComponentStatus::Complete).await;
    } else {
        debug!(component = %id, "Umbrella service has incomplete children");
    }
    WorkerReport::ok(id)
}
