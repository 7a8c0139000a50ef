//! Steps shared by every reconciliation engine
//!
//! Credential resolution, finalizer upkeep on the live path, the cleanup
//! that ends the delete path, and recording of terminal failures.

use chrono::{DateTime, Utc};
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use tracing::{debug, info, warn};

use crate::config::ControllerTimeouts;
use crate::credentials::CredentialStore;
use crate::crd::{FailureReason, ManagedResource, READY_CONDITION};
use crate::events::{actions, reasons, EventPublisher};
use crate::finalizers;
use crate::retry::{is_condition_stale, requeue_within};
use crate::Error;

/// Token for the object's remote client; `None` selects the default token
pub async fn resolve_token<K: ManagedResource>(
    obj: &K,
    credentials: &dyn CredentialStore,
) -> Result<Option<String>, Error> {
    let Some(secret) = obj.credentials_ref() else {
        return Ok(None);
    };
    let namespace = obj.namespace().unwrap_or_default();
    credentials.api_token(secret, &namespace).await.map(Some)
}

/// When deletion was requested, or now when the object is live
pub fn deletion_time<K: ManagedResource>(obj: &K) -> DateTime<Utc> {
    obj.meta()
        .deletion_timestamp
        .as_ref()
        .map(|t| t.0)
        .unwrap_or_else(Utc::now)
}

/// Failure reason recorded when the current path of `obj` fails
pub fn failure_reason<K: ManagedResource>(obj: &K) -> FailureReason {
    if obj.meta().deletion_timestamp.is_some() {
        FailureReason::DeleteError
    } else {
        FailureReason::CreateError
    }
}

/// Add the engine finalizer and protect the credentials Secret
///
/// The engine finalizer is only added to the working copy. Returns whether
/// it was missing, in which case the caller persists it before creating
/// anything remotely.
pub async fn ensure_finalizers<K: ManagedResource>(
    obj: &mut K,
    credentials: &dyn CredentialStore,
    finalizer: &str,
) -> Result<bool, Error> {
    let added = finalizers::add_finalizer(obj.meta_mut(), finalizer);
    if added {
        debug!(finalizer, "adding finalizer");
    }
    if let Some(secret) = obj.credentials_ref() {
        let namespace = obj.namespace().unwrap_or_default();
        credentials
            .add_finalizer(secret, &namespace, &obj.credentials_finalizer())
            .await?;
    }
    Ok(added)
}

/// Decide whether a failed create is retried or surfaced
///
/// The Ready condition goes False on the first failure and keeps that
/// transition time across retries, so the create window is measured from
/// the first failure rather than the latest one.
pub fn retry_create<K: ManagedResource>(
    obj: &mut K,
    timeouts: &ControllerTimeouts,
    error: Error,
) -> Result<Action, Error> {
    let status = obj.resource_status_mut();
    status.mark_not_ready(reasons::CREATE_ERROR, error.to_string());
    if is_condition_stale(status, READY_CONDITION, timeouts.create, Utc::now()) {
        return Err(error);
    }
    warn!(resource = K::RESOURCE, error = %error, requeue_after = ?timeouts.requeue_delay, "create failed, retrying");
    Ok(Action::requeue(timeouts.requeue_delay))
}

/// Finish the delete path once the remote resource is gone or retained
///
/// Marks the object deleted, forgets its identifier, releases the
/// credentials Secret and removes `owned` finalizers. A failure to release
/// the Secret is retried within the delete window.
pub async fn release<K: ManagedResource>(
    obj: &mut K,
    credentials: &dyn CredentialStore,
    owned: &[&str],
    timeouts: &ControllerTimeouts,
) -> Result<Action, Error> {
    let deleted_at = deletion_time(obj);
    obj.resource_status_mut()
        .mark_not_ready(reasons::DELETED, format!("{} deleted", K::RESOURCE));
    obj.clear_remote_id();

    if let Some(secret) = obj.credentials_ref() {
        let namespace = obj.namespace().unwrap_or_default();
        let finalizer = obj.credentials_finalizer();
        if let Err(e) = credentials
            .remove_finalizer(secret, &namespace, &finalizer)
            .await
        {
            if !e.is_not_found() {
                return requeue_within(deleted_at, timeouts.delete, timeouts.requeue_delay, e);
            }
        }
    }

    for finalizer in owned {
        finalizers::remove_finalizer(obj.meta_mut(), finalizer);
    }
    info!(resource = K::RESOURCE, "deletion complete");
    Ok(Action::await_change())
}

/// Record a terminal error on the object and pass the result through
///
/// Requeues and successes are returned untouched. An error sets the failure
/// reason and message, a Ready=False condition and a warning event.
pub async fn record_terminal<K: ManagedResource>(
    obj: &mut K,
    events: &dyn EventPublisher,
    reason: FailureReason,
    result: Result<Action, Error>,
) -> Result<Action, Error> {
    let error = match result {
        Ok(action) => return Ok(action),
        Err(error) => error,
    };

    let message = error.to_string();
    let condition_reason = match &error {
        Error::DeletionBlocked { .. } => reasons::NOT_DELETING,
        _ => reason.as_str(),
    };
    let action = match reason {
        FailureReason::CreateError => actions::CREATE,
        FailureReason::DeleteError => actions::DELETE,
        FailureReason::UpdateError => actions::RECONCILE,
    };

    let status = obj.resource_status_mut();
    status.record_failure(reason, message.clone());
    status.mark_not_ready(condition_reason, message.clone());

    events
        .publish(
            &obj.object_ref(&()),
            EventType::Warning,
            condition_reason,
            action,
            Some(message),
        )
        .await;
    Err(error)
}
