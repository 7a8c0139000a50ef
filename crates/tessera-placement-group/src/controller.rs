//! PlacementGroup reconciliation controller
//!
//! Live objects get their remote group adopted by label or created.
//! Once bound, the group is never updated since every creation parameter
//! is immutable. Terminating objects wait for the group's members to leave
//! before the group is deleted, unless the object retains it.

use std::sync::Arc;

use chrono::Utc;
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Client, Resource, ResourceExt};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, info, instrument, warn};

use tessera_cloud::{ClientFactory, Filter, PlacementGroupApi};
use tessera_common::config::ControllerTimeouts;
use tessera_common::credentials::{CredentialStore, KubeCredentialStore};
use tessera_common::crd::{FailureReason, ManagedResource, PlacementGroup};
use tessera_common::events::{actions, reasons, EventPublisher, KubeEventPublisher};
use tessera_common::lifecycle;
use tessera_common::pause::{KubePauseResolver, PauseResolver};
use tessera_common::retry::{requeue_within, within_window};
use tessera_common::store::KubeObjectStore;
use tessera_common::{Error, ObjectKey, ObjectStore, ResourceScope};

use crate::options::create_options;

/// Finalizer the engine keeps on every live PlacementGroup
pub const FINALIZER: &str = "placementgroup.infrastructure.tessera.dev/finalizer";

/// Finalizer written by earlier releases; removed on deletion, never added
pub const LEGACY_FINALIZER: &str = "placementgroups.infrastructure.tessera.dev";

/// Reporting component of emitted events
const CONTROLLER_NAME: &str = "tessera-placement-group-controller";

type Scope = ResourceScope<PlacementGroup>;

/// Shared context for the PlacementGroup controller
///
/// Use [`ContextBuilder`] to construct instances:
///
/// ```text
/// let ctx = Context::builder(client, clients)
///     .timeouts(ControllerTimeouts::placement_groups())
///     .build();
/// ```
pub struct Context {
    /// Desired-state store
    pub store: Arc<dyn ObjectStore<PlacementGroup>>,
    /// Builds remote clients per token
    pub clients: Arc<dyn ClientFactory>,
    /// Credentials Secrets
    pub credentials: Arc<dyn CredentialStore>,
    /// Pause detection
    pub pause: Arc<dyn PauseResolver>,
    /// Kubernetes Events
    pub events: Arc<dyn EventPublisher>,
    /// Retry windows and delays
    pub timeouts: ControllerTimeouts,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(client: Client, clients: Arc<dyn ClientFactory>) -> ContextBuilder {
        ContextBuilder::new(client, clients)
    }

    /// Create a context for testing with in-memory collaborators
    #[cfg(test)]
    pub fn for_testing(
        store: Arc<dyn ObjectStore<PlacementGroup>>,
        clients: Arc<dyn ClientFactory>,
        credentials: Arc<dyn CredentialStore>,
        pause: Arc<dyn PauseResolver>,
        events: Arc<dyn EventPublisher>,
        timeouts: ControllerTimeouts,
    ) -> Self {
        Self {
            store,
            clients,
            credentials,
            pause,
            events,
            timeouts,
        }
    }
}

/// Builder for constructing [`Context`] instances
///
/// Every collaborator defaults to its Kubernetes-backed implementation.
pub struct ContextBuilder {
    client: Client,
    clients: Arc<dyn ClientFactory>,
    store: Option<Arc<dyn ObjectStore<PlacementGroup>>>,
    credentials: Option<Arc<dyn CredentialStore>>,
    pause: Option<Arc<dyn PauseResolver>>,
    events: Option<Arc<dyn EventPublisher>>,
    timeouts: ControllerTimeouts,
}

impl ContextBuilder {
    fn new(client: Client, clients: Arc<dyn ClientFactory>) -> Self {
        Self {
            client,
            clients,
            store: None,
            credentials: None,
            pause: None,
            events: None,
            timeouts: ControllerTimeouts::placement_groups(),
        }
    }

    /// Override the retry windows and delays
    pub fn timeouts(mut self, timeouts: ControllerTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Override the desired-state store
    pub fn store(mut self, store: Arc<dyn ObjectStore<PlacementGroup>>) -> Self {
        self.store = Some(store);
        self
    }

    /// Override the credential store
    pub fn credentials(mut self, credentials: Arc<dyn CredentialStore>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Override pause detection
    pub fn pause_resolver(mut self, pause: Arc<dyn PauseResolver>) -> Self {
        self.pause = Some(pause);
        self
    }

    /// Override the event publisher
    pub fn event_publisher(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = Some(events);
        self
    }

    /// Build the Context
    pub fn build(self) -> Context {
        let client = self.client;
        Context {
            store: self
                .store
                .unwrap_or_else(|| Arc::new(KubeObjectStore::new(client.clone()))),
            clients: self.clients,
            credentials: self
                .credentials
                .unwrap_or_else(|| Arc::new(KubeCredentialStore::new(client.clone()))),
            pause: self
                .pause
                .unwrap_or_else(|| Arc::new(KubePauseResolver::new(client.clone()))),
            events: self
                .events
                .unwrap_or_else(|| Arc::new(KubeEventPublisher::new(client, CONTROLLER_NAME))),
            timeouts: self.timeouts,
        }
    }
}

/// Reconcile a PlacementGroup
///
/// Reads the latest revision, honors pause and runs the state machine, all
/// under the reconcile deadline. Whatever the outcome, including the
/// deadline passing, failures are recorded on the working copy before the
/// scope closes.
#[instrument(skip(pg, ctx), fields(placement_group = %pg.name_any()))]
pub async fn reconcile(pg: Arc<PlacementGroup>, ctx: Arc<Context>) -> Result<Action, Error> {
    let limit = ctx.timeouts.reconcile;
    let deadline = Instant::now() + limit;
    let expired = || Error::timeout("reconcile placement group", limit);

    let key = ObjectKey::of(pg.as_ref());
    let current = match timeout_at(deadline, ctx.store.get(&key)).await {
        Ok(current) => current?,
        Err(_) => return Err(expired()),
    };
    let Some(current) = current else {
        debug!("placement group no longer exists");
        return Ok(Action::await_change());
    };

    let paused = match timeout_at(deadline, ctx.pause.is_paused(current.meta())).await {
        Ok(paused) => paused?,
        Err(_) => return Err(expired()),
    };
    if paused {
        info!("reconciliation paused");
        return Ok(Action::await_change());
    }

    let mut scope = Scope::new(current, ctx.store.clone());
    let outcome = timeout_at(deadline, reconcile_scope(&mut scope, &ctx)).await;
    let result = match outcome {
        Ok(result) => result,
        Err(_) => {
            warn!(timeout = ?limit, "reconcile deadline passed");
            let reason = lifecycle::failure_reason(&scope.object);
            let events = ctx.events.as_ref();
            lifecycle::record_terminal(&mut scope.object, events, reason, Err(expired())).await
        }
    };
    scope.finish(result, limit).await
}

async fn reconcile_scope(scope: &mut Scope, ctx: &Context) -> Result<Action, Error> {
    scope.object.resource_status_mut().reset_transient();

    let reason = lifecycle::failure_reason(&scope.object);
    let result = if reason == FailureReason::DeleteError {
        reconcile_delete(scope, ctx).await
    } else {
        reconcile_live(scope, ctx).await
    };
    lifecycle::record_terminal(&mut scope.object, ctx.events.as_ref(), reason, result).await
}

/// Remote client for the object's credentials
async fn remote_client(
    pg: &PlacementGroup,
    ctx: &Context,
) -> Result<Arc<dyn PlacementGroupApi>, Error> {
    let token = lifecycle::resolve_token(pg, ctx.credentials.as_ref()).await?;
    Ok(ctx.clients.placement_groups(token.as_deref())?)
}

async fn reconcile_live(scope: &mut Scope, ctx: &Context) -> Result<Action, Error> {
    let added =
        lifecycle::ensure_finalizers(&mut scope.object, ctx.credentials.as_ref(), FINALIZER).await?;

    if let Some(id) = scope.object.spec.pg_id {
        debug!(pg_id = id, "placement group bound, nothing to update");
        scope.object.resource_status_mut().mark_ready(reasons::PROVISIONED);
        return Ok(Action::await_change());
    }

    if added {
        // The finalizer must be stored before anything exists remotely.
        scope.persist().await?;
    }

    let created = match remote_client(&scope.object, ctx).await {
        Ok(client) => create_or_adopt(&scope.object, client.as_ref(), ctx).await,
        Err(e) => Err(e),
    };
    match created {
        Ok(id) => {
            scope.object.spec.pg_id = Some(id);
            scope.object.resource_status_mut().mark_ready(reasons::PROVISIONED);
            Ok(Action::await_change())
        }
        Err(e @ Error::Internal { .. }) => Err(e),
        Err(e) if e.is_configuration() => Err(e),
        Err(e) => lifecycle::retry_create(&mut scope.object, &ctx.timeouts, e),
    }
}

/// Bind an existing group with our label, or create one
async fn create_or_adopt(
    pg: &PlacementGroup,
    client: &dyn PlacementGroupApi,
    ctx: &Context,
) -> Result<i64, Error> {
    let filter = Filter::new(pg.spec.pg_id, pg.name_any());
    let existing = client.list_placement_groups(&filter).await?;
    if let Some(found) = existing.first() {
        info!(pg_id = found.id, matches = existing.len(), "adopting existing placement group");
        return Ok(found.id);
    }

    let opts = create_options(pg);
    let Some(created) = client.create_placement_group(&opts).await? else {
        error!("create returned no placement group");
        return Err(Error::internal_with_context(
            "create placement group",
            "create succeeded without returning a placement group",
        ));
    };
    info!(pg_id = created.id, region = %created.region, "created placement group");
    ctx.events
        .publish(
            &pg.object_ref(&()),
            EventType::Normal,
            reasons::PROVISIONED,
            actions::CREATE,
            Some(format!("Created placement group {}", created.id)),
        )
        .await;
    Ok(created.id)
}

async fn reconcile_delete(scope: &mut Scope, ctx: &Context) -> Result<Action, Error> {
    let timeouts = &ctx.timeouts;
    let deleted_at = lifecycle::deletion_time(&scope.object);

    match scope.object.spec.pg_id {
        None => debug!("no placement group was created"),
        Some(id) if scope.object.spec.retain => {
            info!(pg_id = id, "retaining placement group");
        }
        Some(id) => {
            let client = match remote_client(&scope.object, ctx).await {
                Ok(client) => client,
                Err(e) if e.is_configuration() => return Err(e),
                Err(e) => return requeue_within(deleted_at, timeouts.delete, timeouts.requeue_delay, e),
            };
            match client.get_placement_group(id).await {
                Err(e) if e.is_not_found() => info!(pg_id = id, "placement group already gone"),
                Err(e) => {
                    return requeue_within(deleted_at, timeouts.delete, timeouts.requeue_delay, e.into())
                }
                Ok(group) if !group.members.is_empty() => {
                    let members = group.members.len();
                    if within_window(deleted_at, timeouts.detach_wait, Utc::now()) {
                        info!(pg_id = id, members, "waiting for members to leave");
                        return Ok(Action::requeue(timeouts.requeue_delay));
                    }
                    warn!(pg_id = id, members, "members never left, refusing to delete");
                    return Err(Error::deletion_blocked(PlacementGroup::RESOURCE, id, members));
                }
                Ok(_) => match client.delete_placement_group(id).await {
                    Ok(()) => info!(pg_id = id, "deleted placement group"),
                    Err(e) if e.is_not_found() => info!(pg_id = id, "placement group already gone"),
                    Err(e) => {
                        return requeue_within(
                            deleted_at,
                            timeouts.delete,
                            timeouts.requeue_delay,
                            e.into(),
                        )
                    }
                },
            }
        }
    }

    lifecycle::release(
        &mut scope.object,
        ctx.credentials.as_ref(),
        &[FINALIZER, LEGACY_FINALIZER],
        timeouts,
    )
    .await
}

/// Error policy for the controller
///
/// Logs the error and requeues after the configured delay.
pub fn error_policy(pg: Arc<PlacementGroup>, error: &Error, ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        placement_group = %pg.name_any(),
        "reconciliation failed"
    );
    Action::requeue(ctx.timeouts.requeue_delay)
}
