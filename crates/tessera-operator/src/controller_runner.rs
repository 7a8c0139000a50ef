//! Controller runner - builds one controller future per resource kind
//!
//! Each controller is fed from its own watch stream, filtered by the
//! identifier-bind guard before objects reach the reconcile queue.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::{future, StreamExt, TryStreamExt};
use kube::runtime::watcher::{self, Config as WatcherConfig};
use kube::runtime::{reflector, Controller, WatchStreamExt};
use kube::{Api, Client};

use tessera_cloud::ClientFactory;
use tessera_common::config::ControllerTimeouts;
use tessera_common::crd::{PlacementGroup, Vpc};
use tessera_common::predicates::IdentifierBindFilter;

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
/// This forces the API server to close the watch before the client times out,
/// preventing "body read timed out" errors on idle watches.
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Controller future, as composed by `main`
pub type ControllerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Build the PlacementGroup controller
pub fn build_placement_group_controller(
    client: Client,
    clients: Arc<dyn ClientFactory>,
    timeouts: ControllerTimeouts,
) -> ControllerFuture {
    use tessera_placement_group::{error_policy, reconcile, Context};

    let ctx = Arc::new(
        Context::builder(client.clone(), clients)
            .timeouts(timeouts)
            .build(),
    );
    let api: Api<PlacementGroup> = Api::all(client);
    let (reader, writer) = reflector::store();
    let guard = Arc::new(IdentifierBindFilter::new());

    let stream = watcher::watcher(api, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
        .default_backoff()
        .reflect(writer)
        .applied_objects()
        .try_filter(move |pg| future::ready(guard.should_dispatch(pg)));

    tracing::info!(?timeouts, "- PlacementGroup controller");
    Box::pin(
        Controller::for_stream(stream, reader)
            .shutdown_on_signal()
            .run(reconcile, error_policy, ctx)
            .for_each(log_reconcile_result("PlacementGroup")),
    )
}

/// Build the Vpc controller
pub fn build_vpc_controller(
    client: Client,
    clients: Arc<dyn ClientFactory>,
    timeouts: ControllerTimeouts,
) -> ControllerFuture {
    use tessera_vpc::{error_policy, reconcile, Context};

    let ctx = Arc::new(
        Context::builder(client.clone(), clients)
            .timeouts(timeouts)
            .build(),
    );
    let api: Api<Vpc> = Api::all(client);
    let (reader, writer) = reflector::store();
    let guard = Arc::new(IdentifierBindFilter::new());

    let stream = watcher::watcher(api, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
        .default_backoff()
        .reflect(writer)
        .applied_objects()
        .try_filter(move |vpc| future::ready(guard.should_dispatch(vpc)));

    tracing::info!(?timeouts, "- Vpc controller");
    Box::pin(
        Controller::for_stream(stream, reader)
            .shutdown_on_signal()
            .run(reconcile, error_policy, ctx)
            .for_each(log_reconcile_result("Vpc")),
    )
}

fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
