//! Vpc reconciliation controller
//!
//! A Vpc is composite: the VPC plus subnets that may each be retained. On
//! deletion only nodes in subnets that will actually be removed block
//! progress. When any subnet is retained the VPC itself stays and only the
//! other subnets are deleted, one call each.

use std::sync::Arc;

use chrono::Utc;
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Client, Resource, ResourceExt};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, info, instrument, warn};

use tessera_cloud::{ClientFactory, Filter, Vpc as RemoteVpc, VpcApi};
use tessera_common::config::ControllerTimeouts;
use tessera_common::credentials::{CredentialStore, KubeCredentialStore};
use tessera_common::crd::{FailureReason, ManagedResource, Vpc};
use tessera_common::events::{actions, reasons, EventPublisher, KubeEventPublisher};
use tessera_common::lifecycle;
use tessera_common::pause::{KubePauseResolver, PauseResolver};
use tessera_common::retry::{requeue_within, within_window};
use tessera_common::store::KubeObjectStore;
use tessera_common::{Error, ObjectKey, ObjectStore, ResourceScope};

use crate::options::{bind_subnet_ids, create_options};

/// Finalizer the engine keeps on every live Vpc
pub const FINALIZER: &str = "vpc.infrastructure.tessera.dev/finalizer";

/// Finalizer written by earlier releases; removed on deletion, never added
pub const LEGACY_FINALIZER: &str = "vpcs.infrastructure.tessera.dev";

const CONTROLLER_NAME: &str = "tessera-vpc-controller";

type Scope = ResourceScope<Vpc>;

/// Shared context for the Vpc controller
pub struct Context {
    /// Desired-state store
    pub store: Arc<dyn ObjectStore<Vpc>>,
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
        store: Arc<dyn ObjectStore<Vpc>>,
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
pub struct ContextBuilder {
    client: Client,
    clients: Arc<dyn ClientFactory>,
    store: Option<Arc<dyn ObjectStore<Vpc>>>,
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
            timeouts: ControllerTimeouts::vpcs(),
        }
    }

    /// Override the retry windows and delays
    pub fn timeouts(mut self, timeouts: ControllerTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Override the desired-state store
    pub fn store(mut self, store: Arc<dyn ObjectStore<Vpc>>) -> Self {
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

/// Reconcile a Vpc
///
/// Everything up to persisting the working copy runs under the reconcile
/// deadline; a missed deadline is recorded like any other terminal failure.
#[instrument(skip(vpc, ctx), fields(vpc = %vpc.name_any()))]
pub async fn reconcile(vpc: Arc<Vpc>, ctx: Arc<Context>) -> Result<Action, Error> {
    let limit = ctx.timeouts.reconcile;
    let deadline = Instant::now() + limit;
    let expired = || Error::timeout("reconcile vpc", limit);

    let key = ObjectKey::of(vpc.as_ref());
    let current = match timeout_at(deadline, ctx.store.get(&key)).await {
        Ok(current) => current?,
        Err(_) => return Err(expired()),
    };
    let Some(current) = current else {
        debug!("vpc no longer exists");
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
    let result = match reason {
        FailureReason::DeleteError => reconcile_delete(scope, ctx).await,
        _ => reconcile_live(scope, ctx).await,
    };
    lifecycle::record_terminal(&mut scope.object, ctx.events.as_ref(), reason, result).await
}

async fn remote_client(vpc: &Vpc, ctx: &Context) -> Result<Arc<dyn VpcApi>, Error> {
    let token = lifecycle::resolve_token(vpc, ctx.credentials.as_ref()).await?;
    Ok(ctx.clients.vpcs(token.as_deref())?)
}

async fn reconcile_live(scope: &mut Scope, ctx: &Context) -> Result<Action, Error> {
    let added =
        lifecycle::ensure_finalizers(&mut scope.object, ctx.credentials.as_ref(), FINALIZER).await?;

    if let Some(id) = scope.object.spec.vpc_id {
        debug!(vpc_id = id, "vpc bound, nothing to update");
        scope.object.resource_status_mut().mark_ready(reasons::PROVISIONED);
        return Ok(Action::await_change());
    }
    if added {
        scope.persist().await?;
    }

    let created = match remote_client(&scope.object, ctx).await {
        Ok(client) => create_or_adopt(&scope.object, client.as_ref(), ctx).await,
        Err(e) => Err(e),
    };
    match created {
        Ok(remote) => {
            let bound = bind_subnet_ids(&mut scope.object.spec.subnets, &remote);
            debug!(vpc_id = remote.id, subnets = bound, "bound subnet identifiers");
            scope.object.spec.vpc_id = Some(remote.id);
            scope.object.resource_status_mut().mark_ready(reasons::PROVISIONED);
            Ok(Action::await_change())
        }
        Err(e @ Error::Internal { .. }) => Err(e),
        Err(e) if e.is_configuration() => Err(e),
        Err(e) => lifecycle::retry_create(&mut scope.object, &ctx.timeouts, e),
    }
}

async fn create_or_adopt(vpc: &Vpc, client: &dyn VpcApi, ctx: &Context) -> Result<RemoteVpc, Error> {
    let filter = Filter::new(vpc.spec.vpc_id, vpc.name_any());
    let mut existing = client.list_vpcs(&filter).await?;
    if !existing.is_empty() {
        let found = existing.swap_remove(0);
        info!(vpc_id = found.id, "adopting existing vpc");
        return Ok(found);
    }

    let Some(created) = client.create_vpc(&create_options(vpc)).await? else {
        error!("create returned no vpc");
        return Err(Error::internal_with_context(
            "create vpc",
            "create succeeded without returning a vpc",
        ));
    };
    info!(vpc_id = created.id, subnets = created.subnets.len(), "created vpc");
    ctx.events
        .publish(
            &vpc.object_ref(&()),
            EventType::Normal,
            reasons::PROVISIONED,
            actions::CREATE,
            Some(format!("Created vpc {}", created.id)),
        )
        .await;
    Ok(created)
}

async fn reconcile_delete(scope: &mut Scope, ctx: &Context) -> Result<Action, Error> {
    let timeouts = &ctx.timeouts;
    let deleted_at = lifecycle::deletion_time(&scope.object);

    let Some(id) = scope.object.spec.vpc_id else {
        debug!("no vpc was created");
        return release(scope, ctx).await;
    };
    if scope.object.spec.retain {
        info!(vpc_id = id, "retaining vpc and all subnets");
        return release(scope, ctx).await;
    }

    let client = match remote_client(&scope.object, ctx).await {
        Ok(client) => client,
        Err(e) if e.is_configuration() => return Err(e),
        Err(e) => return requeue_within(deleted_at, timeouts.delete, timeouts.requeue_delay, e),
    };
    let remote = match client.get_vpc(id).await {
        Ok(remote) => remote,
        Err(e) if e.is_not_found() => {
            info!(vpc_id = id, "vpc already gone");
            return release(scope, ctx).await;
        }
        Err(e) => {
            return requeue_within(deleted_at, timeouts.delete, timeouts.requeue_delay, e.into())
        }
    };

    let attached = attached_nodes(&scope.object, &remote);
    if attached > 0 {
        if within_window(deleted_at, timeouts.detach_wait, Utc::now()) {
            info!(vpc_id = id, attached, "waiting for nodes to leave subnets");
            return Ok(Action::requeue(timeouts.requeue_delay));
        }
        warn!(vpc_id = id, attached, "nodes never left, refusing to delete");
        return Err(Error::deletion_blocked(Vpc::RESOURCE, id, attached));
    }

    if scope.object.spec.has_retained_subnets() {
        for subnet in &remote.subnets {
            if scope.object.spec.is_subnet_retained(subnet.id, &subnet.label) {
                debug!(subnet_id = subnet.id, label = %subnet.label, "retaining subnet");
                continue;
            }
            match client.delete_subnet(id, subnet.id).await {
                Ok(()) => info!(vpc_id = id, subnet_id = subnet.id, "deleted subnet"),
                Err(e) if e.is_not_found() => debug!(subnet_id = subnet.id, "subnet already gone"),
                Err(e) => {
                    return requeue_within(
                        deleted_at,
                        timeouts.delete,
                        timeouts.requeue_delay,
                        e.into(),
                    )
                }
            }
            forget_subnet(&mut scope.object, subnet.id, &subnet.label);
        }
        info!(vpc_id = id, "vpc kept for retained subnets");
    } else {
        match client.delete_vpc(id).await {
            Ok(()) => info!(vpc_id = id, "deleted vpc"),
            Err(e) if e.is_not_found() => info!(vpc_id = id, "vpc already gone"),
            Err(e) => {
                return requeue_within(deleted_at, timeouts.delete, timeouts.requeue_delay, e.into())
            }
        }
        for subnet in &mut scope.object.spec.subnets {
            subnet.subnet_id = None;
        }
    }

    release(scope, ctx).await
}

async fn release(scope: &mut Scope, ctx: &Context) -> Result<Action, Error> {
    lifecycle::release(
        &mut scope.object,
        ctx.credentials.as_ref(),
        &[FINALIZER, LEGACY_FINALIZER],
        &ctx.timeouts,
    )
    .await
}

/// Nodes attached to subnets that deletion would remove
fn attached_nodes(vpc: &Vpc, remote: &RemoteVpc) -> usize {
    remote
        .subnets
        .iter()
        .filter(|s| !vpc.spec.is_subnet_retained(s.id, &s.label))
        .map(|s| s.linodes.len())
        .sum()
}

fn forget_subnet(vpc: &mut Vpc, subnet_id: i64, label: &str) {
    for subnet in &mut vpc.spec.subnets {
        if subnet.subnet_id == Some(subnet_id) || (subnet.subnet_id.is_none() && subnet.label == label) {
            subnet.subnet_id = None;
        }
    }
}

/// Error policy for the controller
pub fn error_policy(vpc: Arc<Vpc>, error: &Error, ctx: Arc<Context>) -> Action {
    error!(?error, vpc = %vpc.name_any(), "reconciliation failed");
    Action::requeue(ctx.timeouts.requeue_delay)
}
