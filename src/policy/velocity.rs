//! Velocity (spend per period) tracking
//!
//! One window covers every rule in the policy. The window starts at the
//! first recorded spend and lasts `period` minutes; once it has elapsed the
//! next query resets all rule counters.

use crate::policy::rules::RuleSpec;
use serde::Serialize;
use tracing::{debug, info};

/// Where the velocity window stands right now
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WindowState {
    /// Policy has no period; velocity limits are not in use
    Disabled,
    /// Nothing spent in the current window
    NotStarted,
    /// Seconds until counters reset
    Remaining(u64),
}

#[derive(Debug, Clone)]
pub struct VelocityTracker {
    period_minutes: Option<u32>,
    started_at: Option<i64>,
}

impl VelocityTracker {
    pub fn new(period_minutes: Option<u32>) -> Self {
        Self {
            period_minutes,
            started_at: None,
        }
    }

    fn period_secs(&self) -> Option<i64> {
        self.period_minutes.map(|m| i64::from(m) * 60)
    }

    /// Add `amount` to the rule's counter, starting the window if needed.
    pub fn record_spend(&mut self, rule: &mut RuleSpec, amount: u64, now: i64) {
        rule.spent_this_period = rule.spent_this_period.saturating_add(amount);
        if self.started_at.is_none() {
            self.started_at = Some(now);
            debug!("Velocity window started at {}", now);
        }
    }

    /// Time left in the window. Resets every counter when it has run out.
    pub fn time_left(&mut self, rules: &mut [RuleSpec], now: i64) -> WindowState {
        if self.is_expired(now) {
            info!("Velocity period over, resetting spend totals");
            self.reset(rules);
            return WindowState::NotStarted;
        }
        self.peek(now)
    }

    /// Same as `time_left`, without the reset. An elapsed window reads as not started.
    pub fn peek(&self, now: i64) -> WindowState {
        let Some(period) = self.period_secs() else {
            return WindowState::Disabled;
        };
        let Some(started) = self.started_at else {
            return WindowState::NotStarted;
        };

        let left = period - (now - started);
        if left <= 0 {
            WindowState::NotStarted
        } else {
            WindowState::Remaining(left as u64)
        }
    }

    fn is_expired(&self, now: i64) -> bool {
        match (self.period_secs(), self.started_at) {
            (Some(period), Some(started)) => now - started >= period,
            _ => false,
        }
    }

    /// New period: zero every counter and forget the window start.
    pub fn reset(&mut self, rules: &mut [RuleSpec]) {
        for rule in rules.iter_mut() {
            rule.spent_this_period = 0;
        }
        self.started_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FixedUsers, FixedWallets};
    use serde_json::json;

    fn rule(per_period: u64) -> RuleSpec {
        RuleSpec::parse(
            json!({ "per_period": per_period }),
            0,
            &FixedUsers::new(&[]),
            &FixedWallets::new(&[]),
        )
        .unwrap()
    }

    #[test]
    fn test_disabled_without_period() {
        let mut tracker = VelocityTracker::new(None);
        assert_eq!(tracker.time_left(&mut [], 1000), WindowState::Disabled);
    }

    #[test]
    fn test_window_starts_on_first_spend() {
        let mut tracker = VelocityTracker::new(Some(10));
        let mut rules = vec![rule(1000)];
        assert_eq!(tracker.time_left(&mut rules, 1000), WindowState::NotStarted);

        tracker.record_spend(&mut rules[0], 400, 1000);
        tracker.record_spend(&mut rules[0], 100, 1100);
        assert_eq!(rules[0].spent_this_period, 500);
        // second spend does not move the start
        assert_eq!(tracker.time_left(&mut rules, 1300), WindowState::Remaining(300));
    }

    #[test]
    fn test_reset_after_period() {
        let period = 5;
        let t0 = 1_700_000_000;
        let mut tracker = VelocityTracker::new(Some(period));
        let mut rules = vec![rule(1000), rule(2000)];

        tracker.record_spend(&mut rules[0], 900, t0);
        tracker.record_spend(&mut rules[1], 50, t0);

        let later = t0 + i64::from(period) * 60 + 1;
        assert_eq!(tracker.time_left(&mut rules, later), WindowState::NotStarted);
        assert!(rules.iter().all(|r| r.spent_this_period == 0));

        // fresh window starts at the next spend
        tracker.record_spend(&mut rules[0], 10, later + 5);
        assert_eq!(
            tracker.time_left(&mut rules, later + 5),
            WindowState::Remaining(u64::from(period) * 60)
        );
    }

    #[test]
    fn test_peek_has_no_side_effect() {
        let mut tracker = VelocityTracker::new(Some(1));
        let mut rules = vec![rule(1000)];
        tracker.record_spend(&mut rules[0], 700, 0);

        assert_eq!(tracker.peek(120), WindowState::NotStarted);
        assert_eq!(rules[0].spent_this_period, 700);
        assert_eq!(tracker.peek(30), WindowState::Remaining(30));
    }
}
