//! Pure decision functions for the connection handle.
//!
//! Kept free of clocks and I/O so they can be exhaustively property-tested.

use std::time::Duration;

/// What `conn()` should do when the handle is not connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutDecision {
    /// Still inside the shorter timeout: hand out the current connection.
    Wait,
    /// The ensemble moved: redial without reporting an error.
    ConnectionStringChanged,
    /// Past the longer timeout: reset the connection and report connection
    /// loss.
    SessionTimedOut {
        /// The longer of the two timeouts.
        max_timeout: Duration,
    },
    /// Between the two timeouts: report connection loss, keep the connection.
    ConnectionTimedOut,
}

/// Decide how to treat a disconnected handle.
///
/// `elapsed` is measured from the last connection attempt or state change.
/// With `min = min(session, connection)` and `max = max(session, connection)`:
/// below `min` nothing happens; a changed connection string always wins once
/// `min` is reached; otherwise `max` separates a plain timeout from a reset.
#[inline]
pub fn evaluate_timeout(
    elapsed: Duration,
    session_timeout: Duration,
    connection_timeout: Duration,
    has_new_connection_string: bool,
) -> TimeoutDecision {
    let min_timeout = session_timeout.min(connection_timeout);
    let max_timeout = session_timeout.max(connection_timeout);

    if elapsed < min_timeout {
        TimeoutDecision::Wait
    } else if has_new_connection_string {
        TimeoutDecision::ConnectionStringChanged
    } else if elapsed >= max_timeout {
        TimeoutDecision::SessionTimedOut { max_timeout }
    } else {
        TimeoutDecision::ConnectionTimedOut
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SESSION: Duration = Duration::from_secs(60);
    const CONNECTION: Duration = Duration::from_secs(15);

    #[test]
    fn below_min_waits() {
        assert_eq!(evaluate_timeout(Duration::from_secs(14), SESSION, CONNECTION, true), TimeoutDecision::Wait);
    }

    #[test]
    fn changed_string_wins_after_min() {
        assert_eq!(
            evaluate_timeout(Duration::from_secs(100), SESSION, CONNECTION, true),
            TimeoutDecision::ConnectionStringChanged
        );
    }

    #[test]
    fn between_min_and_max_is_connection_timeout() {
        assert_eq!(
            evaluate_timeout(Duration::from_secs(15), SESSION, CONNECTION, false),
            TimeoutDecision::ConnectionTimedOut
        );
    }

    #[test]
    fn past_max_is_session_timeout() {
        assert_eq!(evaluate_timeout(Duration::from_secs(60), SESSION, CONNECTION, false), TimeoutDecision::SessionTimedOut {
            max_timeout: SESSION
        });
    }

    #[test]
    fn order_of_timeouts_does_not_matter() {
        for elapsed in [0, 14, 15, 59, 60, 61] {
            let elapsed = Duration::from_secs(elapsed);
            assert_eq!(
                evaluate_timeout(elapsed, SESSION, CONNECTION, false),
                evaluate_timeout(elapsed, CONNECTION, SESSION, false)
            );
        }
    }
}

#[cfg(all(test, feature = "bolero"))]
mod property_tests {
    use super::*;
    use bolero::check;

    #[test]
    fn prop_wait_iff_below_min() {
        check!().with_type::<(u64, u64, u64, bool)>().for_each(|(elapsed, session, connection, changed)| {
            let decision = evaluate_timeout(
                Duration::from_millis(*elapsed),
                Duration::from_millis(*session),
                Duration::from_millis(*connection),
                *changed,
            );
            let below_min = *elapsed < (*session).min(*connection);
            assert_eq!(decision == TimeoutDecision::Wait, below_min);
        });
    }

    #[test]
    fn prop_reset_only_past_max() {
        check!().with_type::<(u64, u64, u64)>().for_each(|(elapsed, session, connection)| {
            let decision = evaluate_timeout(
                Duration::from_millis(*elapsed),
                Duration::from_millis(*session),
                Duration::from_millis(*connection),
                false,
            );
            if matches!(decision, TimeoutDecision::SessionTimedOut { .. }) {
                assert!(*elapsed >= (*session).max(*connection));
            }
        });
    }
}
