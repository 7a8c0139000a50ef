//! Status and reference types shared by every managed resource

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition type reporting whether the remote resource is usable
pub const READY_CONDITION: &str = "Ready";

/// Status of a condition
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition holds
    True,
    /// Condition does not hold
    False,
    /// Not yet determined
    #[default]
    Unknown,
}

/// A timestamped observation about the resource
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition (e.g., Ready)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Machine-readable reason for the condition
    pub reason: String,

    /// Human-readable message
    #[serde(default)]
    pub message: String,

    /// Last time the condition status changed
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a new condition with the current timestamp
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }
}

/// Why reconciliation last failed terminally
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum FailureReason {
    /// Creating or adopting the remote resource failed
    CreateError,
    /// Refreshing a live resource failed
    UpdateError,
    /// Tearing down the remote resource failed
    DeleteError,
}

impl FailureReason {
    /// Reason string used on conditions and events
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateError => "CreateError",
            Self::UpdateError => "UpdateError",
            Self::DeleteError => "DeleteError",
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to a Secret holding an `apiToken` key
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct SecretRef {
    /// Secret name
    pub name: String,
    /// Secret namespace; defaults to the referencing object's namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Observed state shared by PlacementGroup and Vpc
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceStatus {
    /// The remote resource exists and is bound to this object
    #[serde(default)]
    pub ready: bool,

    /// Category of the last terminal failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<FailureReason>,

    /// Detail of the last terminal failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,

    /// Conditions, at most one per type
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl ResourceStatus {
    /// Clear the fields recomputed on every reconcile
    pub fn reset_transient(&mut self) {
        self.ready = false;
        self.failure_reason = None;
        self.failure_message = None;
    }

    /// Get a condition by type
    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    /// Insert or update a condition
    ///
    /// `lastTransitionTime` only moves when the status changes, so the time a
    /// condition first went False survives repeated failures.
    pub fn set_condition(&mut self, condition: Condition) {
        match self
            .conditions
            .iter_mut()
            .find(|c| c.type_ == condition.type_)
        {
            Some(existing) => {
                if existing.status != condition.status {
                    existing.last_transition_time = condition.last_transition_time;
                    existing.status = condition.status;
                }
                existing.reason = condition.reason;
                existing.message = condition.message;
            }
            None => self.conditions.push(condition),
        }
    }

    /// Set the Ready condition to False with the given reason
    pub fn mark_not_ready(&mut self, reason: &str, message: impl Into<String>) {
        self.set_condition(Condition::new(
            READY_CONDITION,
            ConditionStatus::False,
            reason,
            message,
        ));
    }

    /// Mark the resource ready and set the Ready condition to True
    pub fn mark_ready(&mut self, reason: &str) {
        self.ready = true;
        self.set_condition(Condition::new(
            READY_CONDITION,
            ConditionStatus::True,
            reason,
            "",
        ));
    }

    /// Record a terminal failure
    pub fn record_failure(&mut self, reason: FailureReason, message: impl Into<String>) {
        self.failure_reason = Some(reason);
        self.failure_message = Some(message.into());
    }
}
