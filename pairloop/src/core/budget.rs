//! Session-wide iteration and time budget.

use std::time::Duration;

use crate::core::machine::CoordinationPolicy;

/// Why the Session budget no longer admits another iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BudgetExceeded {
    Iterations { limit: u32 },
    Time { limit: Duration },
}

impl BudgetExceeded {
    pub fn describe(&self) -> String {
        match self {
            BudgetExceeded::Iterations { limit } => format!("{limit} iterations used"),
            BudgetExceeded::Time { limit } => {
                format!("session time limit of {}s reached", limit.as_secs())
            }
        }
    }
}

/// Timeout for the next iteration: the per-iteration timeout, capped by what
/// is left of the Session's time budget.
pub fn next_iteration_timeout(
    policy: &CoordinationPolicy,
    iterations_done: u32,
    elapsed: Duration,
) -> Result<Duration, BudgetExceeded> {
    if iterations_done >= policy.max_iterations {
        return Err(BudgetExceeded::Iterations {
            limit: policy.max_iterations,
        });
    }
    let remaining = policy
        .max_session_duration
        .checked_sub(elapsed)
        .unwrap_or(Duration::ZERO);
    if remaining.is_zero() {
        return Err(BudgetExceeded::Time {
            limit: policy.max_session_duration,
        });
    }
    Ok(policy.iteration_timeout.min(remaining))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> CoordinationPolicy {
        CoordinationPolicy {
            max_iterations: 3,
            max_session_duration: Duration::from_secs(100),
            iteration_timeout: Duration::from_secs(30),
            ..CoordinationPolicy::default()
        }
    }

    #[test]
    fn timeout_is_capped_by_remaining_session_time() {
        let policy = policy();
        assert_eq!(
            next_iteration_timeout(&policy, 0, Duration::ZERO),
            Ok(Duration::from_secs(30))
        );
        assert_eq!(
            next_iteration_timeout(&policy, 1, Duration::from_secs(90)),
            Ok(Duration::from_secs(10))
        );
    }

    #[test]
    fn exhausted_budgets_are_reported() {
        let policy = policy();
        assert_eq!(
            next_iteration_timeout(&policy, 3, Duration::ZERO),
            Err(BudgetExceeded::Iterations { limit: 3 })
        );
        assert!(matches!(
            next_iteration_timeout(&policy, 0, Duration::from_secs(120)),
            Err(BudgetExceeded::Time { .. })
        ));
    }
}
