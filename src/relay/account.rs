//! Process-wide relay error accounting

use parking_lot::Mutex;
use serde::Serialize;

/// Counters after a transition
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AccountSnapshot {
    /// Consecutive failures since the last success or eviction
    pub error_count: u64,
    /// Consecutive successes since the last failure
    pub success_streak: u64,
    /// Successes since startup
    pub total_success: u64,
}

/// Error/success counters driving eviction and fail-fast.
///
/// Only mutated through the named transitions below.
#[derive(Debug, Default)]
pub struct ErrorAccount {
    state: Mutex<AccountSnapshot>,
}

impl ErrorAccount {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self) -> AccountSnapshot {
        let mut state = self.state.lock();
        state.error_count = 0;
        state.success_streak += 1;
        state.total_success += 1;
        *state
    }

    pub fn record_failure(&self) -> AccountSnapshot {
        let mut state = self.state.lock();
        state.error_count += 1;
        state.success_streak = 0;
        *state
    }

    /// Forget accumulated failures, e.g. after the offending session was evicted
    pub fn reset_errors(&self) -> AccountSnapshot {
        let mut state = self.state.lock();
        state.error_count = 0;
        *state
    }

    pub fn snapshot(&self) -> AccountSnapshot {
        *self.state.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_resets_errors() {
        let account = ErrorAccount::new();
        account.record_failure();
        account.record_failure();

        let s = account.record_success();
        assert_eq!(s.error_count, 0);
        assert_eq!(s.success_streak, 1);
        assert_eq!(s.total_success, 1);
    }

    #[test]
    fn test_failure_resets_streak() {
        let account = ErrorAccount::new();
        account.record_success();
        account.record_success();

        let s = account.record_failure();
        assert_eq!(s.error_count, 1);
        assert_eq!(s.success_streak, 0);
        assert_eq!(s.total_success, 2);
    }

    #[test]
    fn test_reset_errors_keeps_totals() {
        let account = ErrorAccount::new();
        account.record_success();
        account.record_failure();
        account.record_failure();

        let s = account.reset_errors();
        assert_eq!(s.error_count, 0);
        assert_eq!(s.total_success, 1);
        assert_eq!(account.snapshot(), s);
    }
}
