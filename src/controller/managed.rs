//! Generic reconciliation core for managed resources
//!
//! One control loop drives every managed kind. Per-kind behavior is
//! injected through the [`Connector`]/[`ExternalClient`] seam and through
//! ordered [`Initializer`]s (cross-reference resolution, tagging). The loop
//! itself owns finalizers, condition bookkeeping, connection-detail
//! publishing, and requeue scheduling.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use rand::Rng;
use tracing::{debug, error, info, instrument, warn};

use crate::crd::types::{Condition, SecretRef};
use crate::crd::{reason, DeletionPolicy, Managed, ManagementPolicies, ManagementPolicy};
use crate::Error;
use crate::FINALIZER;

use super::registry::Registry;

/// Connection material published to the secret store (endpoints,
/// credentials), keyed by secret data key
pub type ConnectionDetails = BTreeMap<String, Vec<u8>>;

/// Outcome of observing the external resource
#[derive(Clone, Debug, Default)]
pub struct Observation {
    /// The external resource exists
    pub exists: bool,
    /// The external resource matches the desired state modulo irrelevant
    /// differences
    pub up_to_date: bool,
    /// The external resource is usable (e.g. a load balancer whose state
    /// code is "active")
    pub ready: bool,
    /// Structured description of any drift, for observability
    pub diff: String,
    /// Observe filled null desired fields from cloud-side defaults; the
    /// record must be persisted
    pub late_initialized: bool,
    /// Connection material observed on the resource
    pub connection_details: ConnectionDetails,
}

impl Observation {
    /// The external resource does not exist
    pub fn absent() -> Self {
        Self::default()
    }

    /// The external resource exists and matches the desired state
    pub fn in_sync() -> Self {
        Self {
            exists: true,
            up_to_date: true,
            ready: true,
            ..Self::default()
        }
    }
}

/// Outcome of creating the external resource
#[derive(Clone, Debug, Default)]
pub struct Creation {
    /// Cloud-assigned identifier to stamp as the record's external name.
    /// Ignored when the record already carries one.
    pub external_name: Option<String>,
    /// Connection material returned by the create call
    pub connection_details: ConnectionDetails,
}

/// Per-kind facade over the cloud gateway.
///
/// Adapters translate between the record's desired/observed blocks and the
/// gateway's wire shapes. Kind-specific policy (readiness rules, external
/// name capture) lives in the adapter, not in the loop.
#[async_trait]
pub trait ExternalClient<R>: Send + Sync {
    /// Describe the external resource and compare it to the desired state.
    /// "Not found" must be mapped to `exists = false`, not an error.
    /// Observe also performs late initialization on the record.
    async fn observe(&self, record: &mut R) -> Result<Observation, Error>;

    /// Create the external resource from the desired state
    async fn create(&self, record: &mut R) -> Result<Creation, Error>;

    /// Converge the external resource onto the desired state
    async fn update(&self, record: &mut R) -> Result<(), Error>;

    /// Destroy the external resource. "Not found" is success.
    async fn delete(&self, record: &R) -> Result<(), Error>;
}

/// Produces an [`ExternalClient`] for one record, parameterized by the
/// record's provider reference (credentials and region)
#[async_trait]
pub trait Connector<R>: Send + Sync {
    /// Build a gateway client for this record
    async fn connect(&self, record: &R) -> Result<Box<dyn ExternalClient<R>>, Error>;
}

/// A step run before Observe that may mutate the record (cross-reference
/// resolution, tagging). Returning `true` means the record changed; the
/// loop persists it and restarts the tick.
#[async_trait]
pub trait Initializer<R>: Send + Sync {
    /// Run the initialization step
    async fn initialize(&self, record: &mut R) -> Result<bool, Error>;
}

/// Publishes a record's connection details to a secret store
#[async_trait]
pub trait ConnectionPublisher: Send + Sync {
    /// Write the connection details to the given secret
    async fn publish(&self, target: &SecretRef, details: &ConnectionDetails) -> Result<(), Error>;
}

/// Configuration for the reconciliation core
#[derive(Clone, Debug)]
pub struct ControllerOptions {
    /// Duration between steady-state ticks
    pub poll_interval: Duration,
    /// Per-kind worker count
    pub max_concurrent_reconciles: usize,
    /// Enable the secondary secret publisher
    pub external_secret_store: bool,
    /// Honor per-record management policies; when disabled every record is
    /// fully managed
    pub management_policies: bool,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            max_concurrent_reconciles: 5,
            external_secret_store: false,
            management_policies: false,
        }
    }
}

/// Delay before the next tick after the loop mutated the record or kicked
/// off an external operation
const REQUEUE_SOON: Duration = Duration::from_secs(1);

fn requeue_soon() -> Action {
    Action::requeue(REQUEUE_SOON)
}

/// Shared state for all reconciliations of one kind
pub struct ManagedContext<R> {
    /// Registry access for spec/meta and status writes
    pub registry: Arc<dyn Registry<R>>,
    /// Builds gateway clients per record
    pub connector: Arc<dyn Connector<R>>,
    /// Ordered initialization steps run before Observe
    pub initializers: Vec<Arc<dyn Initializer<R>>>,
    /// Connection detail publishers (primary secret store, plus the
    /// external store when enabled)
    pub publishers: Vec<Arc<dyn ConnectionPublisher>>,
    /// Core configuration
    pub options: ControllerOptions,
    /// Consecutive failure counts per record name, for backoff
    failures: DashMap<String, u32>,
}

impl<R> ManagedContext<R> {
    /// Create a builder for constructing a ManagedContext
    pub fn builder(
        registry: Arc<dyn Registry<R>>,
        connector: Arc<dyn Connector<R>>,
    ) -> ManagedContextBuilder<R> {
        ManagedContextBuilder {
            registry,
            connector,
            initializers: Vec::new(),
            publishers: Vec::new(),
            options: ControllerOptions::default(),
        }
    }

    fn note_failure(&self, name: &str) -> u32 {
        let mut entry = self.failures.entry(name.to_string()).or_insert(0);
        let attempt = *entry;
        *entry = entry.saturating_add(1);
        attempt
    }

    fn reset_failures(&self, name: &str) {
        self.failures.remove(name);
    }
}

impl<R: Managed> ManagedContext<R> {
    /// Policies in force for a record: the declared subset when the
    /// management-policies capability is enabled, full management otherwise
    pub fn effective_policies(&self, record: &R) -> ManagementPolicies {
        if self.options.management_policies {
            record.management_policies()
        } else {
            ManagementPolicies::full()
        }
    }
}

/// Builder for [`ManagedContext`]
pub struct ManagedContextBuilder<R> {
    registry: Arc<dyn Registry<R>>,
    connector: Arc<dyn Connector<R>>,
    initializers: Vec<Arc<dyn Initializer<R>>>,
    publishers: Vec<Arc<dyn ConnectionPublisher>>,
    options: ControllerOptions,
}

impl<R> ManagedContextBuilder<R> {
    /// Append an initializer; order of calls is the order of execution
    pub fn initializer(mut self, initializer: Arc<dyn Initializer<R>>) -> Self {
        self.initializers.push(initializer);
        self
    }

    /// Append a connection detail publisher
    pub fn publisher(mut self, publisher: Arc<dyn ConnectionPublisher>) -> Self {
        self.publishers.push(publisher);
        self
    }

    /// Set the controller options
    pub fn options(mut self, options: ControllerOptions) -> Self {
        self.options = options;
        self
    }

    /// Build the context
    pub fn build(self) -> ManagedContext<R> {
        ManagedContext {
            registry: self.registry,
            connector: self.connector,
            initializers: self.initializers,
            publishers: self.publishers,
            options: self.options,
            failures: DashMap::new(),
        }
    }
}

/// Record a retryable failure as `Synced=False` and propagate the error so
/// the error policy schedules a backoff requeue. Fatal errors bubble
/// without touching the record.
async fn fail<R: Managed>(
    ctx: &ManagedContext<R>,
    record: &mut R,
    err: Error,
    step_reason: &'static str,
) -> Result<Action, Error> {
    if err.is_fatal() {
        return Err(err);
    }
    if err.is_conflict() {
        // A stale write is routine; the next tick reads fresh state.
        debug!("registry write conflict; re-enqueueing");
        return Err(err);
    }
    let reason = match err.condition_reason() {
        reason::RECONCILE_ERROR => step_reason,
        specific => specific,
    };
    record.set_condition(Condition::unsynced(reason, err.to_string()));
    if let Err(status_err) = ctx.registry.update_status(record).await {
        warn!(error = %status_err, "failed to record failure condition");
    }
    Err(err)
}

/// Publish connection details to every configured publisher, if the record
/// wants them published and there is anything to publish.
async fn publish_connection<R: Managed>(
    ctx: &ManagedContext<R>,
    record: &R,
    details: &ConnectionDetails,
) -> Result<(), Error> {
    if details.is_empty() {
        return Ok(());
    }
    let Some(target) = record.connection_secret_ref() else {
        return Ok(());
    };
    for publisher in &ctx.publishers {
        publisher.publish(&target, details).await?;
    }
    Ok(())
}

fn has_finalizer<R: Managed>(record: &R) -> bool {
    record.finalizers().iter().any(|f| f == FINALIZER)
}

/// Reconcile one managed record.
///
/// Implements the observe/create/update/delete loop: load is done by the
/// watcher, then finalizer management, connect, initializers,
/// observe, and the branch on deletion/existence/drift. Every return value
/// is a scheduling decision; every failure path records a `Synced=False`
/// condition before propagating.
#[instrument(skip(record, ctx), fields(name = %record.name_any()))]
pub async fn reconcile<R: Managed>(
    record: Arc<R>,
    ctx: Arc<ManagedContext<R>>,
) -> Result<Action, Error> {
    let name = record.name_any();
    let mut record = (*record).clone();
    let deleting = record.meta().deletion_timestamp.is_some();
    let policies = ctx.effective_policies(&record);

    // Finalizer bookkeeping. A record the loop never acknowledged needs no
    // external cleanup.
    if !deleting && !has_finalizer(&record) {
        debug!("attaching finalizer");
        record.finalizers_mut().push(FINALIZER.to_string());
        ctx.registry.update(&record).await?;
        return Ok(requeue_soon());
    }
    if deleting && !has_finalizer(&record) {
        return Ok(Action::await_change());
    }

    // Obtain a gateway client for this record's provider reference.
    let external = match ctx.connector.connect(&record).await {
        Ok(client) => client,
        Err(err) => return fail(&ctx, &mut record, err, reason::CANNOT_CONNECT).await,
    };

    // Initializers: cross-reference resolution, tagging. A mutation is
    // persisted and the tick restarted so Observe always sees the final
    // desired state.
    if !deleting {
        for initializer in &ctx.initializers {
            match initializer.initialize(&mut record).await {
                Ok(false) => {}
                Ok(true) => {
                    debug!("initializer mutated the record; persisting");
                    ctx.registry.update(&record).await?;
                    return Ok(requeue_soon());
                }
                Err(err) => return fail(&ctx, &mut record, err, reason::RECONCILE_ERROR).await,
            }
        }
    }

    let observation = match external.observe(&mut record).await {
        Ok(observation) => observation,
        // Adapters normalize "not found"; this guards ones that let an
        // eventually-consistent 404 escape.
        Err(err) if err.is_not_found() => Observation::absent(),
        Err(err) => return fail(&ctx, &mut record, err, reason::CANNOT_OBSERVE).await,
    };

    if deleting {
        let destroy = observation.exists
            && record.deletion_policy() == DeletionPolicy::Delete
            && policies.allows(ManagementPolicy::Delete);
        if destroy {
            info!("deleting external resource");
            if let Err(err) = external.delete(&record).await {
                // NotFound on delete is success: the resource is gone.
                if !err.is_not_found() {
                    return fail(&ctx, &mut record, err, reason::CANNOT_DELETE).await;
                }
            }
            record.set_condition(Condition::deleting());
            record.set_condition(Condition::synced());
            ctx.registry.update_status(&record).await?;
            ctx.reset_failures(&name);
            return Ok(requeue_soon());
        }

        // Absent, orphaned, or delete not permitted: release the record.
        info!("external cleanup complete; releasing record");
        record.finalizers_mut().retain(|f| f != FINALIZER);
        ctx.registry.update(&record).await?;
        ctx.reset_failures(&name);
        return Ok(Action::await_change());
    }

    if !observation.exists {
        if !policies.allows(ManagementPolicy::Create) {
            debug!("create suppressed by management policy");
            record.set_condition(Condition::synced());
            ctx.registry.update_status(&record).await?;
            return Ok(Action::requeue(ctx.options.poll_interval));
        }

        info!("creating external resource");
        return match external.create(&mut record).await {
            Ok(creation) => {
                // The external name, once non-empty, is never overwritten.
                if record.external_name().is_none() {
                    if let Some(external_name) = &creation.external_name {
                        record.set_external_name(external_name);
                    }
                }
                // Persist the identity before anything else can fail, or a
                // crash would leak the resource.
                let updated = ctx.registry.update(&record).await?;
                record.meta_mut().resource_version = updated.meta().resource_version.clone();

                if let Err(err) =
                    publish_connection(&ctx, &record, &creation.connection_details).await
                {
                    return fail(&ctx, &mut record, err, reason::CANNOT_CREATE).await;
                }
                record.set_condition(Condition::creating());
                record.set_condition(Condition::synced());
                ctx.registry.update_status(&record).await?;
                ctx.reset_failures(&name);
                Ok(requeue_soon())
            }
            Err(err) => fail(&ctx, &mut record, err, reason::CANNOT_CREATE).await,
        };
    }

    // Exists and not deleting.
    if observation.late_initialized && policies.allows(ManagementPolicy::LateInitialize) {
        debug!("late-initialized desired fields; persisting");
        ctx.registry.update(&record).await?;
        return Ok(requeue_soon());
    }

    if let Err(err) = publish_connection(&ctx, &record, &observation.connection_details).await {
        return fail(&ctx, &mut record, err, reason::CANNOT_OBSERVE).await;
    }

    if observation.up_to_date {
        record.set_condition(if observation.ready {
            Condition::available()
        } else {
            Condition::unavailable("external resource is not ready yet")
        });
        record.set_condition(Condition::synced());
        ctx.registry.update_status(&record).await?;
        ctx.reset_failures(&name);
        return Ok(Action::requeue(ctx.options.poll_interval));
    }

    if !policies.allows(ManagementPolicy::Update) {
        debug!(diff = %observation.diff, "update suppressed by management policy");
        record.set_condition(Condition::synced());
        ctx.registry.update_status(&record).await?;
        return Ok(Action::requeue(ctx.options.poll_interval));
    }

    info!(diff = %observation.diff, "updating external resource");
    match external.update(&mut record).await {
        Ok(()) => {
            record.set_condition(if observation.ready {
                Condition::available()
            } else {
                Condition::unavailable("external resource is not ready yet")
            });
            record.set_condition(Condition::synced());
            ctx.registry.update_status(&record).await?;
            ctx.reset_failures(&name);
            Ok(Action::requeue(ctx.options.poll_interval))
        }
        Err(err) => fail(&ctx, &mut record, err, reason::CANNOT_UPDATE).await,
    }
}

/// Error policy: exponential backoff with jitter per record.
///
/// Consecutive failures double the delay up to ~64s; any successful tick
/// resets the counter.
pub fn error_policy<R: Managed>(record: Arc<R>, error: &Error, ctx: Arc<ManagedContext<R>>) -> Action {
    let name = record.name_any();
    let attempt = ctx.note_failure(&name);
    let delay = backoff_delay(attempt);
    if error.is_conflict() {
        debug!(name = %name, ?delay, "write conflict; re-enqueueing");
    } else {
        error!(name = %name, error = %error, attempt, ?delay, "reconciliation failed");
    }
    Action::requeue(delay)
}

fn backoff_delay(attempt: u32) -> Duration {
    let base = Duration::from_secs(1u64 << attempt.min(6));
    let jitter = rand::thread_rng().gen_range(0.0..0.5);
    base.mul_f64(1.0 + jitter)
}
