//! Timeouts and delays that drive requeue decisions
//!
//! Every controller receives a [`ControllerTimeouts`] at construction. The
//! per-kind constructors hold the defaults; `with_*` overrides single fields.

use std::time::Duration;

/// Deadline for one whole reconcile call
pub const DEFAULT_RECONCILE_TIMEOUT: Duration = Duration::from_secs(90);

/// Delay before retrying after a swallowed failure
pub const DEFAULT_REQUEUE_DELAY: Duration = Duration::from_secs(5);

/// How long creation may keep failing before the error is surfaced
pub const DEFAULT_CREATE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// How long fetch/delete errors during teardown are retried
pub const DEFAULT_DELETE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// How long a placement group waits for its members to leave
pub const PLACEMENT_GROUP_DETACH_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// How long a VPC waits for nodes to leave its subnets
pub const VPC_DETACH_TIMEOUT: Duration = Duration::from_secs(20 * 60);

/// Timing knobs of one controller
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ControllerTimeouts {
    /// Deadline for one whole reconcile call
    pub reconcile: Duration,
    /// Delay for scheduled requeues
    pub requeue_delay: Duration,
    /// Window, from the first failure, in which create errors are retried
    pub create: Duration,
    /// Window, from the deletion timestamp, in which fetch/delete errors are retried
    pub delete: Duration,
    /// Window, from the deletion timestamp, to wait for dependents to detach
    pub detach_wait: Duration,
}

impl ControllerTimeouts {
    /// Defaults for the PlacementGroup controller
    pub fn placement_groups() -> Self {
        Self {
            reconcile: DEFAULT_RECONCILE_TIMEOUT,
            requeue_delay: DEFAULT_REQUEUE_DELAY,
            create: DEFAULT_CREATE_TIMEOUT,
            delete: DEFAULT_DELETE_TIMEOUT,
            detach_wait: PLACEMENT_GROUP_DETACH_TIMEOUT,
        }
    }

    /// Defaults for the Vpc controller
    pub fn vpcs() -> Self {
        Self {
            detach_wait: VPC_DETACH_TIMEOUT,
            ..Self::placement_groups()
        }
    }

    /// Override the reconcile deadline
    pub fn with_reconcile(mut self, timeout: Duration) -> Self {
        self.reconcile = timeout;
        self
    }

    /// Override the requeue delay
    pub fn with_requeue_delay(mut self, delay: Duration) -> Self {
        self.requeue_delay = delay;
        self
    }

    /// Override the create retry window
    pub fn with_create(mut self, timeout: Duration) -> Self {
        self.create = timeout;
        self
    }

    /// Override the delete retry window
    pub fn with_delete(mut self, timeout: Duration) -> Self {
        self.delete = timeout;
        self
    }

    /// Override the dependent wait window
    pub fn with_detach_wait(mut self, timeout: Duration) -> Self {
        self.detach_wait = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vpc_waits_longer_for_dependents() {
        let pg = ControllerTimeouts::placement_groups();
        let vpc = ControllerTimeouts::vpcs();
        assert!(vpc.detach_wait > pg.detach_wait);
        assert_eq!(vpc.delete, pg.delete);
        assert!(pg.detach_wait > pg.delete);
    }

    #[test]
    fn builders_override_single_fields() {
        let t = ControllerTimeouts::vpcs()
            .with_delete(Duration::ZERO)
            .with_requeue_delay(Duration::from_secs(1));
        assert_eq!(t.delete, Duration::ZERO);
        assert_eq!(t.requeue_delay, Duration::from_secs(1));
        assert_eq!(t.detach_wait, VPC_DETACH_TIMEOUT);
    }
}
