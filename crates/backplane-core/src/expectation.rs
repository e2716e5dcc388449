//! Expectation tracking and adaptive poll delays.
//!
//! Callers declare "I expect messages of these types within N seconds". While
//! such a window is open the scheduler polls fast, ramping from
//! `intervals.min` to `intervals.frequent` across the window; after the window
//! closes it ramps from `frequent` to `regular` over `intervals.slowdown`.
//! A typed window collapses as soon as every declared type has been seen.

use std::collections::VecDeque;
use std::time::Duration;

use backplane_types::config::PollIntervals;
use tracing::debug;

/// Expectation window plus the FIFO of outstanding typed declarations.
///
/// All timestamps are unix seconds.
#[derive(Debug, Clone)]
pub struct ExpectationTracker {
    intervals: PollIntervals,
    since: i64,
    interval: i64,
    until: i64,
    nonstop: bool,
    queue: VecDeque<Vec<String>>,
}

impl ExpectationTracker {
    pub fn new(intervals: PollIntervals) -> Self {
        Self {
            intervals,
            since: 0,
            interval: 0,
            until: 0,
            nonstop: false,
            queue: VecDeque::new(),
        }
    }

    /// Open (or extend) an expectation window.
    ///
    /// `types = None` holds the fast window open for the whole interval.
    /// `Some(vec![])` queues an entry nothing can satisfy.
    pub fn declare(&mut self, now: i64, interval_secs: u64, types: Option<Vec<String>>) {
        let interval = i64::try_from(interval_secs).unwrap_or(i64::MAX);
        self.since = now;
        self.interval = interval;
        match types {
            Some(types) => self.queue.push_back(types),
            None => self.nonstop = true,
        }
        self.until = self.until.max(now.saturating_add(interval));
        debug!(
            until = self.until,
            pending = self.queue.len(),
            nonstop = self.nonstop,
            "expectation declared"
        );
    }

    /// Drop every queued entry that names `message_type`.
    ///
    /// One matching type satisfies a whole multi-type entry.
    pub fn satisfy(&mut self, message_type: &str) {
        self.queue
            .retain(|types| !types.iter().any(|t| t == message_type));
    }

    /// Seconds until the next poll.
    pub fn delay_secs(&mut self, now: i64, cursor_established: bool) -> u64 {
        let intervals = self.intervals;
        let min = intervals.min as f64;
        let frequent = intervals.frequent as f64;
        let regular = intervals.regular as f64;
        let slowdown = intervals.slowdown as i64;

        if now < self.until && !self.nonstop && self.queue.is_empty() {
            self.until = now;
        }

        if now < self.until {
            let relative = (now - self.since) as f64;
            let span = self.interval.max(1) as f64;
            to_secs(min + ((frequent - min) * relative / span).round())
        } else if now < self.until.saturating_add(slowdown) {
            self.nonstop = false;
            let relative = (now - self.until) as f64;
            let span = slowdown.max(1) as f64;
            to_secs(frequent + ((regular - frequent) * relative / span).round())
        } else {
            self.nonstop = false;
            if cursor_established { intervals.regular } else { 0 }
        }
    }

    pub fn delay(&mut self, now: i64, cursor_established: bool) -> Duration {
        Duration::from_secs(self.delay_secs(now, cursor_established))
    }

    pub fn until(&self) -> i64 {
        self.until
    }

    pub fn is_nonstop(&self) -> bool {
        self.nonstop
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}

// Rounded values from intervals are whole and non-negative unless the
// intervals themselves are inverted; clamp those to zero.
fn to_secs(value: f64) -> u64 {
    if value.is_finite() && value > 0.0 { value as u64 } else { 0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> ExpectationTracker {
        ExpectationTracker::new(PollIntervals::default())
    }

    fn types(names: &[&str]) -> Option<Vec<String>> {
        Some(names.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn test_idle_delay_depends_on_cursor() {
        let mut t = tracker();
        assert_eq!(t.delay_secs(1_000, false), 0);
        assert_eq!(t.delay_secs(1_000, true), 60);
    }

    #[test]
    fn test_until_only_moves_forward() {
        let mut t = tracker();
        t.declare(0, 5, None);
        t.declare(3, 20, None);
        assert_eq!(t.until(), 23);

        t.declare(4, 1, None);
        assert_eq!(t.until(), 23);
    }

    #[test]
    fn test_nonstop_window_ramps_to_frequent() {
        let mut t = tracker();
        t.declare(100, 10, None);

        let delays: Vec<u64> = (100..=109).map(|now| t.delay_secs(now, true)).collect();
        assert_eq!(delays[0], 1);
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));

        // At since + interval the window has closed and the slowdown ramp
        // starts from `frequent`.
        assert_eq!(t.delay_secs(110, true), 5);
    }

    #[test]
    fn test_slowdown_ramps_to_regular() {
        let mut t = tracker();
        t.declare(0, 10, None);
        assert_eq!(t.delay_secs(70, true), 5 + 28);
        assert_eq!(t.delay_secs(130, true), 60);
        assert!(!t.is_nonstop());
    }

    #[test]
    fn test_typed_expectation_satisfied_escapes_early() {
        let mut t = tracker();
        t.declare(0, 10, types(&["ping"]));

        t.satisfy("pong");
        assert_eq!(t.pending(), 1);
        assert_eq!(t.delay_secs(1, true), 1);

        t.satisfy("ping");
        assert_eq!(t.pending(), 0);

        // Window collapses to "now", leaving the slowdown ramp from frequent.
        assert_eq!(t.delay_secs(3, true), 5);
        assert_eq!(t.until(), 3);
    }

    #[test]
    fn test_one_type_satisfies_multi_type_entry() {
        let mut t = tracker();
        t.declare(0, 30, types(&["a", "b"]));
        t.declare(0, 30, types(&["c"]));

        t.satisfy("b");
        assert_eq!(t.pending(), 1);
        t.satisfy("c");
        assert_eq!(t.pending(), 0);
    }

    #[test]
    fn test_untyped_declaration_holds_window_despite_empty_queue() {
        let mut t = tracker();
        t.declare(0, 10, None);
        t.declare(1, 10, types(&["x"]));
        t.satisfy("x");

        assert!(t.is_nonstop());
        assert_eq!(t.delay_secs(2, true), 1);
        assert_eq!(t.until(), 11);
    }

    #[test]
    fn test_empty_type_list_is_never_satisfied() {
        let mut t = tracker();
        t.declare(0, 10, Some(Vec::new()));
        t.satisfy("anything");
        assert_eq!(t.pending(), 1);
        assert_eq!(t.delay_secs(5, true), 1 + 2);
    }

    #[test]
    fn test_delay_converts_to_duration() {
        let mut t = tracker();
        t.declare(0, 10, None);
        assert_eq!(t.delay(0, true), Duration::from_secs(1));
    }
}
