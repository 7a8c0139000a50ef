//! Time-windowed retry decisions
//!
//! Failures are retried for as long as they stay inside a wall-clock window
//! anchored on a persisted timestamp (a condition transition or the deletion
//! timestamp). The number of attempts does not matter, so the behavior is
//! the same however often the dispatch layer delivers reconciles.

use std::time::Duration;

use chrono::{DateTime, Utc};
use kube::runtime::controller::Action;
use tracing::warn;

use crate::crd::{ConditionStatus, ResourceStatus};
use crate::Error;

/// Whether `timeout` has not yet elapsed between `since` and `now`
///
/// A `since` in the future (clock skew) counts as inside the window. A zero
/// timeout is never inside.
pub fn within_window(since: DateTime<Utc>, timeout: Duration, now: DateTime<Utc>) -> bool {
    match now.signed_duration_since(since).to_std() {
        Ok(elapsed) => elapsed < timeout,
        Err(_) => !timeout.is_zero(),
    }
}

/// Requeue after `delay` while inside the window, otherwise surface `error`
pub fn requeue_within(
    since: DateTime<Utc>,
    timeout: Duration,
    delay: Duration,
    error: Error,
) -> Result<Action, Error> {
    if within_window(since, timeout, Utc::now()) {
        warn!(error = %error, requeue_after = ?delay, "retrying within window");
        Ok(Action::requeue(delay))
    } else {
        Err(error)
    }
}

/// Whether a condition has been False for longer than `timeout`
///
/// A missing condition, or one that is not False, is not stale.
pub fn is_condition_stale(
    status: &ResourceStatus,
    condition_type: &str,
    timeout: Duration,
    now: DateTime<Utc>,
) -> bool {
    status
        .condition(condition_type)
        .filter(|c| c.status == ConditionStatus::False)
        .is_some_and(|c| !within_window(c.last_transition_time, timeout, now))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{Condition, READY_CONDITION};
    use rstest::rstest;

    #[rstest]
    #[case(0, 60, true)]
    #[case(59, 60, true)]
    #[case(60, 60, false)]
    #[case(3600, 60, false)]
    #[case(0, 0, false)]
    fn window_boundaries(#[case] elapsed: i64, #[case] timeout: u64, #[case] inside: bool) {
        let now = Utc::now();
        let since = now - chrono::Duration::seconds(elapsed);
        assert_eq!(
            within_window(since, Duration::from_secs(timeout), now),
            inside
        );
    }

    #[test]
    fn future_anchor_is_inside_unless_zero() {
        let now = Utc::now();
        let since = now + chrono::Duration::seconds(30);
        assert!(within_window(since, Duration::from_secs(1), now));
        assert!(!within_window(since, Duration::ZERO, now));
    }

    #[test]
    fn requeue_inside_window_and_fail_outside() {
        let since = Utc::now();
        let action = requeue_within(
            since,
            Duration::from_secs(600),
            Duration::from_secs(5),
            Error::internal("transient"),
        )
        .unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(5)));

        let err = requeue_within(
            since,
            Duration::ZERO,
            Duration::from_secs(5),
            Error::internal("transient"),
        )
        .unwrap_err();
        assert!(err.to_string().contains("transient"));
    }

    #[test]
    fn stale_condition_requires_false_status() {
        let now = Utc::now();
        let mut status = ResourceStatus::default();
        assert!(!is_condition_stale(&status, READY_CONDITION, Duration::ZERO, now));

        let mut cond = Condition::new(READY_CONDITION, ConditionStatus::False, "CreateError", "");
        cond.last_transition_time = now - chrono::Duration::minutes(10);
        status.set_condition(cond);
        assert!(is_condition_stale(&status, READY_CONDITION, Duration::from_secs(60), now));
        assert!(!is_condition_stale(&status, READY_CONDITION, Duration::from_secs(3600), now));

        status.mark_ready("Provisioned");
        assert!(!is_condition_stale(&status, READY_CONDITION, Duration::ZERO, Utc::now()));
    }
}
