//! Metrics for moderation activity
//!
//! Counters and histograms are emitted through the `metrics` facade; without
//! an installed recorder they are no-ops.

use metrics::{counter, describe_counter, describe_histogram, histogram};
use std::time::Instant;

pub const GUARD_JOINS: &str = "guard.joins.total";
pub const GUARD_BANS: &str = "guard.bans.total";
pub const GUARD_BAN_FAILURES: &str = "guard.bans.failed";
pub const GUARD_AUDIT_FAILURES: &str = "guard.audit.failed";
pub const FANOUT_RUNS: &str = "fanout.runs.total";
pub const FANOUT_TARGETS_OK: &str = "fanout.targets.ok";
pub const FANOUT_TARGETS_FAILED: &str = "fanout.targets.failed";
pub const FANOUT_DURATION: &str = "fanout.duration_ms";
pub const CONSOLE_ACTIONS: &str = "console.actions.total";
pub const CONSOLE_FLOWS_COMPLETED: &str = "console.flows.completed";
pub const CONSOLE_DENIED: &str = "console.denied.total";
pub const HIERARCHY_LINKS: &str = "hierarchy.links.total";
pub const HIERARCHY_UNLINKS: &str = "hierarchy.unlinks.total";

/// Initialize metrics with descriptions
pub fn init_metrics() {
    describe_counter!(GUARD_JOINS, "Qualifying joins seen by the guard");
    describe_counter!(GUARD_BANS, "Joins rejected with a ban");
    describe_counter!(GUARD_BAN_FAILURES, "Guard bans the platform refused");
    describe_counter!(GUARD_AUDIT_FAILURES, "Audit messages that could not be delivered");

    describe_counter!(FANOUT_RUNS, "Scope-wide ban/unban runs");
    describe_counter!(FANOUT_TARGETS_OK, "Scope members where the action succeeded");
    describe_counter!(FANOUT_TARGETS_FAILED, "Scope members where the action failed");
    describe_histogram!(FANOUT_DURATION, "Scope-wide run duration in milliseconds");

    describe_counter!(CONSOLE_ACTIONS, "Button actions handled by the console");
    describe_counter!(CONSOLE_FLOWS_COMPLETED, "Multi-turn flows that reached dispatch");
    describe_counter!(CONSOLE_DENIED, "Operator requests denied for lack of authority");

    describe_counter!(HIERARCHY_LINKS, "Children linked to a manager");
    describe_counter!(HIERARCHY_UNLINKS, "Children detached from a manager");
}

/// Record a counter metric
pub fn record_counter(name: &'static str, value: u64) {
    counter!(name).increment(value);
}

/// Record a histogram metric
pub fn record_histogram(name: &'static str, value: f64) {
    histogram!(name).record(value);
}

/// Timer for measuring operation duration
pub struct Timer {
    name: &'static str,
    start: Instant,
}

impl Timer {
    pub fn new(name: &'static str) -> Self {
        Self { name, start: Instant::now() }
    }

    /// Stop the timer and record the duration in milliseconds
    pub fn stop(self) -> f64 {
        let millis = self.start.elapsed().as_secs_f64() * 1000.0;
        histogram!(self.name).record(millis);
        millis
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_init() {
        init_metrics();
        record_counter(GUARD_JOINS, 1);
        record_histogram(FANOUT_DURATION, 1.5);
    }

    #[test]
    fn test_timer() {
        let timer = Timer::new(FANOUT_DURATION);
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(timer.stop() >= 5.0);
    }
}
