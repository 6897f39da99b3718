//! Hardware migration
//!
//! Replaces a failed server with spare hardware mid-deployment: obtain a
//! replacement from the provisioning service, swap the component's identity
//! in place, tear down the old certificate's discovered state, and
//! reconfigure the switch dependency for the new certificate.

use crate::error::{Error, Result};
use crate::pipeline::worker::WorkerContext;
use crate::rules::State;
use crate::template::Component;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Swap the component onto replacement hardware. Terminal failures:
/// no spare available, or the switch reconfiguration for the new
/// certificate fails.
pub(crate) async fn migrate_component(
    ctx: &WorkerContext,
    record: &Arc<RwLock<Component>>,
) -> Result<()> {
    let (id, old_certificate) = {
        let component = record.read().await;
        (component.id.clone(), component.certificate.clone())
    };

    info!(
        component = %id,
        serial = %old_certificate.serial,
        "Requesting replacement hardware"
    );

    let replacement = ctx
        .collaborators
        .provisioning
        .request_replacement(&id, &ctx.deployment_id)
        .await?
        .ok_or_else(|| Error::NoReplacementHardware {
            component: id.to_string(),
        })?;

    let new_certificate = replacement.certificate.clone();
    record
        .write()
        .await
        .adopt_replacement(replacement.certificate, replacement.resources);

    // Best-effort teardown of whatever the old device had discovered;
    // leftovers are logged for the operator, not fatal.
    let mut state = State::new();
    state.insert("tracker", ctx.tracker.clone())?;
    state.insert("caches", ctx.caches.clone())?;
    state.insert("certificate", old_certificate.clone())?;
    state.insert("teardown", true)?;
    ctx.teardown_engine.process_rules(&mut state).await?;
    if let Some(failure) = state.first_failure() {
        warn!(
            component = %id,
            serial = %old_certificate.serial,
            rule = %failure.rule,
            "Teardown of replaced device left residue"
        );
    }

    ctx.collaborators
        .switch
        .reconfigure(&new_certificate)
        .await
        .map_err(|e| Error::MigrationSwitch {
            component: id.to_string(),
            reason: e.to_string(),
        })?;

    info!(
        component = %id,
        old_serial = %old_certificate.serial,
        new_serial = %new_certificate.serial,
        "Migrated component to replacement hardware"
    );
    Ok(())
}
