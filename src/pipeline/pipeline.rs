//! Deployment execution
//!
//! One [`ComponentPipeline`] drives one deployment: a pre-flight rule run
//! over the template, then one type-batch per entry in the component
//! sequence. Batches join completely before the next type starts; a
//! component failure aborts the run only when no viable sibling remains.

use crate::backends::{Collaborators, ProcessorSet};
use crate::cache::CacheDirectory;
use crate::device::{DeviceStateTracker, HeavyOpGate};
use crate::error::{Error, Result};
use crate::pipeline::sequence::component_sequence;
use crate::pipeline::worker::{run_component, WorkerContext, WorkerReport};
use crate::pipeline::{DiagnosticWriter, FailedComponents};
use crate::rules::{self, RuleEngine, State};
use crate::template::{ComponentId, ComponentSet, ComponentStatus, ServiceTemplate};
use prometheus::IntCounter;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for one deployment run
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Worker pool bound per type-batch
    pub max_workers: usize,
    /// Total attempts per component, migrations included
    pub max_attempts: u32,
    /// Concurrent heavy external operations
    pub heavy_op_limit: usize,
    /// How long a worker may wait for an operation slot
    pub admission_timeout: Duration,
    /// Where diagnostic artifacts land
    pub artifact_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_workers: 8,
            max_attempts: 5,
            heavy_op_limit: 4,
            admission_timeout: Duration::from_secs(300),
            artifact_dir: std::env::temp_dir().join("deploy-orchestrator-artifacts"),
        }
    }
}

// =============================================================================
// Metrics
// =============================================================================

/// Pipeline counters, exposed through the default prometheus registry
#[derive(Clone)]
pub(crate) struct PipelineMetrics {
    pub components_processed: IntCounter,
    pub component_failures: IntCounter,
    pub migrations: IntCounter,
    pub batches_escalated: IntCounter,
}

impl PipelineMetrics {
    fn new() -> Self {
        let components_processed = IntCounter::new(
            "deploy_components_processed_total",
            "Components driven to completion",
        )
        .unwrap();
        let component_failures = IntCounter::new(
            "deploy_component_failures_total",
            "Components that ended in error",
        )
        .unwrap();
        let migrations = IntCounter::new(
            "deploy_migrations_total",
            "Hardware migration attempts",
        )
        .unwrap();
        let batches_escalated = IntCounter::new(
            "deploy_batches_escalated_total",
            "Type batches aborted by a last-sibling failure",
        )
        .unwrap();

        // Re-registration (second pipeline in one process) keeps the first
        // collector; the local handles still count.
        let _ = prometheus::register(Box::new(components_processed.clone()));
        let _ = prometheus::register(Box::new(component_failures.clone()));
        let _ = prometheus::register(Box::new(migrations.clone()));
        let _ = prometheus::register(Box::new(batches_escalated.clone()));

        Self {
            components_processed,
            component_failures,
            migrations,
            batches_escalated,
        }
    }
}

// =============================================================================
// Deployment Report
// =============================================================================

/// Final component statuses of a run that was not aborted
#[derive(Debug, Clone)]
pub struct DeploymentReport {
    pub deployment_id: String,
    /// No component ended in error
    pub succeeded: bool,
    pub statuses: BTreeMap<ComponentId, ComponentStatus>,
    pub failed: Vec<ComponentId>,
}

// =============================================================================
// Pipeline
// =============================================================================

/// Drives every component of one service template to completion
pub struct ComponentPipeline {
    config: PipelineConfig,
    template: ServiceTemplate,
    engine: Arc<RuleEngine>,
    ctx: Arc<WorkerContext>,
}

impl std::fmt::Debug for ComponentPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentPipeline")
            .field("config", &self.config)
            .field("template", &self.template)
            .finish_non_exhaustive()
    }
}

impl ComponentPipeline {
    pub fn new(
        config: PipelineConfig,
        template: ServiceTemplate,
        collaborators: Collaborators,
        engine: Arc<RuleEngine>,
        tracker: Arc<DeviceStateTracker>,
        caches: Arc<CacheDirectory>,
    ) -> Result<Self> {
        let components = template.build_components()?;
        let processors = Arc::new(ProcessorSet::standard(&collaborators, engine.clone()));
        let teardown_engine = Arc::new(rules::teardown_engine()?);
        let gate = HeavyOpGate::new(config.heavy_op_limit, config.admission_timeout);
        let diagnostics = Arc::new(DiagnosticWriter::new(&config.artifact_dir));

        let ctx = Arc::new(WorkerContext {
            deployment_id: template.deployment_id.clone(),
            components,
            processors,
            collaborators,
            tracker,
            gate,
            caches,
            failed: FailedComponents::new(),
            diagnostics,
            teardown_engine,
            max_attempts: config.max_attempts,
            metrics: PipelineMetrics::new(),
        });

        Ok(Self {
            config,
            template,
            engine,
            ctx,
        })
    }

    /// The shared component set, for status queries after a run
    pub fn components(&self) -> Arc<ComponentSet> {
        self.ctx.components.clone()
    }

    pub fn failed_components(&self) -> Vec<ComponentId> {
        self.ctx.failed.ids()
    }

    /// Run the deployment to completion.
    ///
    /// Returns the final report when every batch ran; returns the
    /// escalated error when a batch aborted. Later batches never start
    /// before the earlier batch has fully joined.
    pub async fn run(&self) -> Result<DeploymentReport> {
        info!(
            deployment = %self.template.deployment_id,
            components = self.ctx.components.len(),
            "Starting deployment"
        );

        self.preflight().await?;

        let sequence = component_sequence(&self.template.flags);
        for kind in sequence {
            let batch: Vec<ComponentId> = self
                .ctx
                .components
                .ids_of_kind(*kind)
                .into_iter()
                .filter(|id| !self.ctx.failed.contains(id))
                .collect();

            if batch.is_empty() {
                continue;
            }

            info!(kind = %kind, count = batch.len(), "Processing type batch");
            self.process_batch(batch).await?;
        }

        let statuses = self.ctx.components.statuses().await;
        let failed = self.ctx.failed.ids();
        let succeeded = !statuses
            .values()
            .any(|status| *status == ComponentStatus::Error);

        info!(
            deployment = %self.template.deployment_id,
            succeeded,
            failed = failed.len(),
            "Deployment finished"
        );

        Ok(DeploymentReport {
            deployment_id: self.template.deployment_id.clone(),
            succeeded,
            statuses,
            failed,
        })
    }

    /// Pre-flight rule run over the template. The engine records; the
    /// pipeline promotes the first recorded error.
    async fn preflight(&self) -> Result<()> {
        let mut state = State::new();
        state.insert("template", self.template.clone())?;
        self.engine.process_rules(&mut state).await?;

        for outcome in state.into_outcomes() {
            if let Some(error) = outcome.error {
                warn!(rule = %outcome.rule, error = %error, "Pre-flight rule failed");
                return Err(error);
            }
        }
        Ok(())
    }

    /// Run one type-batch: every component gets a worker on the bounded
    /// pool, the whole batch joins, and then failures escalate in batch
    /// order if no viable sibling remains.
    async fn process_batch(&self, batch: Vec<ComponentId>) -> Result<()> {
        let limiter = Arc::new(Semaphore::new(self.config.max_workers.max(1)));
        let mut join_set = JoinSet::new();

        for id in batch.clone() {
            let ctx = self.ctx.clone();
            let limiter = limiter.clone();
            join_set.spawn(async move {
                match limiter.acquire_owned().await {
                    Ok(_permit) => run_component(ctx, id).await,
                    Err(_) => WorkerReport {
                        component: id.clone(),
                        error: Some(Error::Internal("worker pool closed".into())),
                    },
                }
            });
        }

        let mut reports: HashMap<ComponentId, WorkerReport> = HashMap::new();
        let mut panicked = 0usize;
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(report) => {
                    reports.insert(report.component.clone(), report);
                }
                Err(e) => {
                    error!(error = %e, "Worker task aborted");
                    panicked += 1;
                }
            }
        }

        for id in &batch {
            let error = reports
                .get_mut(id)
                .and_then(|report| report.error.take());
            let Some(error) = error else { continue };

            if self.should_escalate(id).await {
                self.ctx.metrics.batches_escalated.inc();
                error!(
                    component = %id,
                    "No viable sibling remains; aborting deployment"
                );
                return Err(error);
            }
            warn!(
                component = %id,
                "Component failed; proceeding with surviving siblings"
            );
        }

        if panicked > 0 {
            return Err(Error::Internal(format!("{panicked} worker task(s) aborted")));
        }
        Ok(())
    }

    /// A failure escalates only when, failed components excluded, no other
    /// component of the same type shares a related parent with it. A
    /// component with no relations has no siblings, so its failure always
    /// escalates.
    async fn should_escalate(&self, id: &ComponentId) -> bool {
        let record = match self.ctx.components.get(id) {
            Some(record) => record,
            None => return true,
        };
        let snapshot = record.read().await.clone();

        for other_id in self.ctx.components.ids_of_kind(snapshot.kind) {
            if other_id == *id || self.ctx.failed.contains(&other_id) {
                continue;
            }
            let other = match self.ctx.components.get(&other_id) {
                Some(other) => other,
                None => continue,
            };
            let shares_parent = {
                let other = other.read().await;
                !snapshot.related.is_disjoint(&other.related)
            };
            if shares_parent {
                return false;
            }
        }
        true
    }
}
