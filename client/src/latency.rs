//! Round-trip latency probing.

use shared::LatencyPing;
use std::collections::HashSet;
use std::time::{Duration, Instant};

/// Result of one probe cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeTick {
    pub ping: LatencyPing,
    /// More probes are outstanding than the drop threshold allows.
    pub overdue: bool,
}

/// Tracks outstanding latency probes.
///
/// Probe timestamps are microseconds since `origin`, so they only mean
/// something to the client that sent them.
#[derive(Debug, Clone)]
pub struct LatencyProbe {
    origin: Instant,
    period: Duration,
    max_age: Duration,
    drop_threshold: usize,
    pending: HashSet<LatencyPing>,
    next_probe: Option<Instant>,
}

impl LatencyProbe {
    pub fn new(origin: Instant, period: Duration, max_age: Duration, drop_threshold: usize) -> Self {
        Self {
            origin,
            period,
            max_age,
            drop_threshold,
            pending: HashSet::new(),
            next_probe: None,
        }
    }

    fn timestamp(&self, now: Instant) -> u64 {
        now.saturating_duration_since(self.origin).as_micros() as u64
    }

    /// Arms the first probe one period from `now`.
    pub fn start(&mut self, now: Instant) {
        self.pending.clear();
        self.next_probe = Some(now + self.period);
    }

    pub fn stop(&mut self) {
        self.pending.clear();
        self.next_probe = None;
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.next_probe
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Runs one probe cycle: prunes stale entries, records a fresh probe and
    /// schedules the next one.
    pub fn fire(&mut self, now: Instant) -> ProbeTick {
        let stamp = self.timestamp(now);
        let cutoff = stamp.saturating_sub(self.max_age.as_micros() as u64);
        self.pending.retain(|ping| ping.timestamp >= cutoff);

        let ping = LatencyPing { timestamp: stamp };
        self.pending.insert(ping);
        self.next_probe = Some(now + self.period);

        ProbeTick {
            ping,
            overdue: self.pending.len() > self.drop_threshold,
        }
    }

    /// Matches an echoed probe. Returns the round trip, or `None` when the
    /// probe is unknown (already answered, pruned, or never sent).
    pub fn acknowledge(&mut self, ping: LatencyPing, now: Instant) -> Option<Duration> {
        if !self.pending.remove(&ping) {
            return None;
        }
        let elapsed = self.timestamp(now).saturating_sub(ping.timestamp);
        Some(Duration::from_micros(elapsed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe(origin: Instant) -> LatencyProbe {
        LatencyProbe::new(origin, Duration::from_secs(1), Duration::from_secs(15), 10)
    }

    #[test]
    fn test_start_arms_one_period_out() {
        let t0 = Instant::now();
        let mut probe = probe(t0);
        assert_eq!(probe.deadline(), None);
        probe.start(t0);
        assert_eq!(probe.deadline(), Some(t0 + Duration::from_secs(1)));
    }

    #[test]
    fn test_acknowledge_measures_round_trip() {
        let t0 = Instant::now();
        let mut probe = probe(t0);
        probe.start(t0);

        let sent_at = t0 + Duration::from_secs(1);
        let tick = probe.fire(sent_at);
        assert!(!tick.overdue);
        assert_eq!(probe.pending(), 1);

        let rtt = probe.acknowledge(tick.ping, sent_at + Duration::from_millis(42));
        assert_eq!(rtt, Some(Duration::from_millis(42)));
        assert_eq!(probe.pending(), 0);
        assert_eq!(probe.acknowledge(tick.ping, sent_at), None);
    }

    #[test]
    fn test_overdue_after_threshold_exceeded() {
        let t0 = Instant::now();
        let mut probe = probe(t0);
        probe.start(t0);

        for second in 1..=10 {
            let tick = probe.fire(t0 + Duration::from_secs(second));
            assert!(!tick.overdue, "overdue too early at probe {second}");
        }
        assert!(probe.fire(t0 + Duration::from_secs(11)).overdue);
    }

    #[test]
    fn test_stale_probes_are_pruned() {
        let t0 = Instant::now();
        let mut probe = LatencyProbe::new(t0, Duration::from_secs(1), Duration::from_secs(3), 10);
        probe.start(t0);

        for second in 1..=3 {
            probe.fire(t0 + Duration::from_secs(second));
        }
        assert_eq!(probe.pending(), 3);

        // The probe sent at 1s is now older than the 3s limit.
        probe.fire(t0 + Duration::from_millis(4_500));
        assert_eq!(probe.pending(), 3);
    }

    #[test]
    fn test_unknown_pong_is_ignored() {
        let t0 = Instant::now();
        let mut probe = probe(t0);
        assert_eq!(probe.acknowledge(LatencyPing { timestamp: 7 }, t0), None);
    }
}
