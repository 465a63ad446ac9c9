use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use exam_core::model::{VIOLATION_THRESHOLD, ViolationKind, ViolationTally};
use exam_core::time::offset;
use serde::Serialize;

/// Which environment signals count, and how much.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViolationPolicy {
    pub weights: BTreeMap<ViolationKind, u32>,
    pub threshold: u32,
    /// Signals closer together than this are one user action.
    pub debounce: Duration,
}

impl ViolationPolicy {
    #[must_use]
    pub fn weight(&self, kind: ViolationKind) -> u32 {
        self.weights.get(&kind).copied().unwrap_or(0)
    }
}

impl Default for ViolationPolicy {
    fn default() -> Self {
        Self {
            weights: ViolationKind::ALL.into_iter().map(|k| (k, 1)).collect(),
            threshold: VIOLATION_THRESHOLD,
            debounce: Duration::from_secs(1),
        }
    }
}

/// A counted violation, kept for the proctoring audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ViolationRecord {
    pub kind: ViolationKind,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationOutcome {
    /// Not a qualifying signal, debounced, or the monitor already latched.
    Ignored,
    Counted { count: u32 },
    /// The threshold was reached by this signal. Emitted once per session.
    ThresholdReached { count: u32 },
}

/// Counts integrity violations and latches once the threshold is reached.
#[derive(Debug, Clone)]
pub struct ViolationMonitor {
    policy: ViolationPolicy,
    tally: ViolationTally,
    quiet_until: Option<DateTime<Utc>>,
    latched: bool,
    log: Vec<ViolationRecord>,
}

impl ViolationMonitor {
    #[must_use]
    pub fn new(policy: ViolationPolicy) -> Self {
        let tally = ViolationTally::new(policy.threshold);
        Self {
            policy,
            tally,
            quiet_until: None,
            latched: false,
            log: Vec::new(),
        }
    }

    #[must_use]
    pub fn tally(&self) -> ViolationTally {
        self.tally
    }

    #[must_use]
    pub fn is_latched(&self) -> bool {
        self.latched
    }

    #[must_use]
    pub fn log(&self) -> &[ViolationRecord] {
        &self.log
    }

    pub fn record(&mut self, kind: ViolationKind, now: DateTime<Utc>) -> ViolationOutcome {
        let weight = self.policy.weight(kind);
        if self.latched || weight == 0 {
            return ViolationOutcome::Ignored;
        }
        if self.quiet_until.is_some_and(|until| now < until) {
            return ViolationOutcome::Ignored;
        }

        self.quiet_until = Some(offset(now, self.policy.debounce));
        self.tally.count = self.tally.count.saturating_add(weight);
        self.log.push(ViolationRecord { kind, at: now });

        if self.tally.exceeded() {
            self.latched = true;
            return ViolationOutcome::ThresholdReached {
                count: self.tally.count,
            };
        }
        ViolationOutcome::Counted {
            count: self.tally.count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as Delta;
    use exam_core::time::fixed_now;

    #[test]
    fn counts_each_spaced_signal_once() {
        let mut monitor = ViolationMonitor::new(ViolationPolicy::default());
        let now = fixed_now();

        assert_eq!(
            monitor.record(ViolationKind::FocusLoss, now),
            ViolationOutcome::Counted { count: 1 }
        );
        // blur + visibilitychange from the same tab switch
        assert_eq!(
            monitor.record(ViolationKind::VisibilityHidden, now + Delta::milliseconds(20)),
            ViolationOutcome::Ignored
        );
        assert_eq!(
            monitor.record(ViolationKind::CopyPaste, now + Delta::seconds(2)),
            ViolationOutcome::Counted { count: 2 }
        );
        assert_eq!(monitor.log().len(), 2);
    }

    #[test]
    fn threshold_latches_once() {
        let mut monitor = ViolationMonitor::new(ViolationPolicy::default());
        let now = fixed_now();

        let mut outcomes = Vec::new();
        for i in 0..7 {
            outcomes.push(monitor.record(ViolationKind::FocusLoss, now + Delta::seconds(5 * i)));
        }

        let reached: Vec<_> = outcomes
            .iter()
            .filter(|o| matches!(o, ViolationOutcome::ThresholdReached { .. }))
            .collect();
        assert_eq!(reached.len(), 1);
        assert_eq!(outcomes[4], ViolationOutcome::ThresholdReached { count: 5 });
        assert_eq!(outcomes[5], ViolationOutcome::Ignored);
        assert_eq!(monitor.tally().count, 5);
        assert!(monitor.is_latched());
    }

    #[test]
    fn unweighted_signals_do_not_count() {
        let mut policy = ViolationPolicy::default();
        policy.weights.insert(ViolationKind::DevTools, 0);
        let mut monitor = ViolationMonitor::new(policy);

        assert_eq!(
            monitor.record(ViolationKind::DevTools, fixed_now()),
            ViolationOutcome::Ignored
        );
        assert_eq!(monitor.tally().count, 0);
    }

    #[test]
    fn count_never_decreases() {
        let mut monitor = ViolationMonitor::new(ViolationPolicy::default());
        let now = fixed_now();
        let mut last = 0;
        for i in 0..20 {
            let kind = ViolationKind::ALL[i % ViolationKind::ALL.len()];
            let at = now + Delta::milliseconds(i64::try_from(i).unwrap() * 700);
            monitor.record(kind, at);
            assert!(monitor.tally().count >= last);
            last = monitor.tally().count;
        }
    }
}
