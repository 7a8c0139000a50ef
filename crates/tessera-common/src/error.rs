//! Error types for Tessera controllers
//!
//! Errors carry the object or resource they concern so a log line or a
//! status message is actionable on its own.

use std::time::Duration;

use tessera_cloud::CloudError;
use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for Tessera controllers
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Remote cloud API error
    #[error("cloud error: {source}")]
    Cloud {
        /// The underlying client error
        #[from]
        source: CloudError,
    },

    /// Spec is invalid and cannot be reconciled as written
    #[error("validation error for {object}: {message}")]
    Validation {
        /// Name of the object with invalid configuration
        object: String,
        /// Description of what's invalid
        message: String,
    },

    /// Credentials referenced by an object could not be resolved
    #[error("credentials error for {object}: {message}")]
    Credentials {
        /// Name of the object referencing the credentials
        object: String,
        /// Description of what failed
        message: String,
    },

    /// Deletion is refused while dependents stay attached
    #[error("{resource} {id} still has {dependents} attached node(s)")]
    DeletionBlocked {
        /// Resource kind
        resource: String,
        /// Remote identifier
        id: i64,
        /// Number of attached compute nodes
        dependents: usize,
    },

    /// An operation exceeded its deadline
    #[error("{operation} timed out after {elapsed:?}")]
    Timeout {
        /// What was being waited on
        operation: String,
        /// How long it ran
        elapsed: Duration,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred
        context: String,
    },

    /// Several failures from one reconcile (e.g. a failed path and a failed persist)
    #[error("{}", join_messages(.0))]
    Joined(Vec<Error>),
}

fn join_messages(errors: &[Error]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Create a validation error for an object
    pub fn validation_for(object: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            object: object.into(),
            message: msg.into(),
        }
    }

    /// Create a credentials error for an object
    pub fn credentials_for(object: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Credentials {
            object: object.into(),
            message: msg.into(),
        }
    }

    /// Create a deletion-blocked error
    pub fn deletion_blocked(resource: impl Into<String>, id: i64, dependents: usize) -> Self {
        Self::DeletionBlocked {
            resource: resource.into(),
            id,
            dependents,
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, elapsed: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed,
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Combine two outcomes of one reconcile into a single error
    ///
    /// Nested `Joined` errors are flattened.
    pub fn join(self, other: Error) -> Self {
        let mut errors = Vec::new();
        for e in [self, other] {
            match e {
                Error::Joined(inner) => errors.extend(inner),
                e => errors.push(e),
            }
        }
        Error::Joined(errors)
    }

    /// Whether the error means the target is already gone
    ///
    /// True for kube 404s and remote not-found errors. A joined error is
    /// not-found only when every part is.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Kube {
                source: kube::Error::Api(ae),
            } => ae.code == 404,
            Error::Cloud { source } => source.is_not_found(),
            Error::Joined(errors) => !errors.is_empty() && errors.iter().all(Error::is_not_found),
            _ => false,
        }
    }

    /// Whether the error is an optimistic-concurrency conflict
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Error::Kube {
                source: kube::Error::Api(ae)
            } if ae.code == 409
        )
    }

    /// Whether the error comes from setup that retrying cannot repair
    ///
    /// Covers an unreadable or unusable credentials Secret and a remote client
    /// that could not be built, for example with no token configured.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::Validation { .. }
                | Error::Credentials { .. }
                | Error::Cloud {
                    source: CloudError::Configuration(_)
                }
        )
    }

    /// Get the context if this error has one
    pub fn context(&self) -> Option<&str> {
        match self {
            Error::Internal { context, .. } => Some(context),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(code: u16) -> Error {
        Error::Kube {
            source: kube::Error::Api(kube::core::ErrorResponse {
                status: "Failure".to_string(),
                message: "test".to_string(),
                reason: "Test".to_string(),
                code,
            }),
        }
    }

    /// Story: not-found from either side of the controller means "already gone"
    #[test]
    fn story_not_found_from_store_or_cloud() {
        assert!(api_error(404).is_not_found());
        assert!(!api_error(500).is_not_found());

        let err: Error = CloudError::not_found("vpc", 7).into();
        assert!(err.is_not_found());

        let err: Error = CloudError::api(502, "bad gateway").into();
        assert!(!err.is_not_found());
    }

    #[test]
    fn conflicts_are_detected() {
        assert!(api_error(409).is_conflict());
        assert!(!api_error(404).is_conflict());
        assert!(!Error::internal("x").is_conflict());
    }

    /// Story: a failed reconcile path and a failed persist surface together
    #[test]
    fn story_joined_errors_keep_both_messages() {
        let err = Error::internal_with_context("create", "boom").join(api_error(409));
        let msg = err.to_string();
        assert!(msg.contains("[create]: boom"));
        assert!(msg.contains("kubernetes error"));

        match err.join(Error::internal("third")) {
            Error::Joined(errors) => assert_eq!(errors.len(), 3),
            other => panic!("expected Joined, got {other:?}"),
        }
    }

    #[test]
    fn joined_not_found_only_when_all_parts_are() {
        assert!(api_error(404).join(api_error(404)).is_not_found());
        assert!(!api_error(404).join(Error::internal("x")).is_not_found());
        assert!(!Error::Joined(vec![]).is_not_found());
    }

    #[test]
    fn configuration_errors_are_not_retried() {
        assert!(Error::credentials_for("default/workers", "missing apiToken").is_configuration());
        let err: Error = CloudError::Configuration("no API token configured".to_string()).into();
        assert!(err.is_configuration());

        let err: Error = CloudError::api(503, "unavailable").into();
        assert!(!err.is_configuration());
        assert!(!api_error(500).is_configuration());
    }

    #[test]
    fn deletion_blocked_names_dependent_count() {
        let err = Error::deletion_blocked("vpc", 12, 3);
        assert_eq!(err.to_string(), "vpc 12 still has 3 attached node(s)");
    }

    #[test]
    fn internal_error_default_context() {
        let err = Error::internal("unexpected state");
        assert_eq!(err.context(), Some(UNKNOWN_CONTEXT));
        assert!(err.to_string().contains("[unknown]"));
    }
}
