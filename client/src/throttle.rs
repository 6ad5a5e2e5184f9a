//! Outbound rate limiting for the throttled send channels.

use std::time::{Duration, Instant};

/// Last-value-wins throttle.
///
/// A value offered after the interval has elapsed goes out immediately.
/// Anything offered sooner replaces the cached value and (re)arms a single
/// deferred flush for the end of the interval. Superseded values are
/// discarded, never queued.
#[derive(Debug, Clone)]
pub struct Coalescer<T> {
    interval: Duration,
    last_flush: Option<Instant>,
    pending: Option<T>,
    deadline: Option<Instant>,
}

impl<T> Coalescer<T> {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_flush: None,
            pending: None,
            deadline: None,
        }
    }

    /// Returns the value back when it may be sent right away.
    pub fn offer(&mut self, value: T, now: Instant) -> Option<T> {
        match self.last_flush {
            Some(last) if now.duration_since(last) < self.interval => {
                self.pending = Some(value);
                self.deadline = Some(last + self.interval);
                None
            }
            _ => {
                self.pending = None;
                self.deadline = None;
                self.last_flush = Some(now);
                Some(value)
            }
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Fires the deferred flush if it is due, yielding the cached value.
    pub fn poll(&mut self, now: Instant) -> Option<T> {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                self.last_flush = Some(now);
                self.pending.take()
            }
            _ => None,
        }
    }

    /// Drops the cached value, disarms the flush and forgets the last send.
    pub fn clear(&mut self) {
        self.pending = None;
        self.deadline = None;
        self.last_flush = None;
    }
}

/// Drop-if-too-soon throttle. No caching and no retry.
#[derive(Debug, Clone)]
pub struct RateGate {
    interval: Duration,
    last: Option<Instant>,
}

impl RateGate {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    pub fn allow(&mut self, now: Instant) -> bool {
        let open = self
            .last
            .map_or(true, |last| now.duration_since(last) >= self.interval);
        if open {
            self.last = Some(now);
        }
        open
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_millis(100);

    #[test]
    fn test_first_offer_passes_through() {
        let mut coalescer = Coalescer::new(INTERVAL);
        let t0 = Instant::now();
        assert_eq!(coalescer.offer(1, t0), Some(1));
        assert_eq!(coalescer.deadline(), None);
    }

    #[test]
    fn test_offers_within_window_coalesce_to_last() {
        let mut coalescer = Coalescer::new(INTERVAL);
        let t0 = Instant::now();
        coalescer.offer(0, t0);

        for (i, value) in (1..=5).enumerate() {
            let at = t0 + Duration::from_millis(10 * (i as u64 + 1));
            assert_eq!(coalescer.offer(value, at), None);
            assert_eq!(coalescer.deadline(), Some(t0 + INTERVAL));
        }

        assert_eq!(coalescer.poll(t0 + Duration::from_millis(99)), None);
        assert_eq!(coalescer.poll(t0 + INTERVAL), Some(5));
        assert_eq!(coalescer.poll(t0 + INTERVAL * 2), None);
        assert!(!coalescer.has_pending());
    }

    #[test]
    fn test_flush_restarts_the_window() {
        let mut coalescer = Coalescer::new(INTERVAL);
        let t0 = Instant::now();
        coalescer.offer(0, t0);
        coalescer.offer(1, t0 + Duration::from_millis(50));
        assert_eq!(coalescer.poll(t0 + INTERVAL), Some(1));

        assert_eq!(coalescer.offer(2, t0 + Duration::from_millis(150)), None);
        assert_eq!(coalescer.deadline(), Some(t0 + INTERVAL * 2));
    }

    #[test]
    fn test_clear_disarms() {
        let mut coalescer = Coalescer::new(INTERVAL);
        let t0 = Instant::now();
        coalescer.offer(0, t0);
        coalescer.offer(1, t0 + Duration::from_millis(10));
        coalescer.clear();
        assert_eq!(coalescer.deadline(), None);
        assert_eq!(coalescer.poll(t0 + INTERVAL), None);
        assert_eq!(coalescer.offer(2, t0 + Duration::from_millis(20)), Some(2));
    }

    #[test]
    fn test_rate_gate_drops_early_calls() {
        let mut gate = RateGate::new(INTERVAL);
        let t0 = Instant::now();
        assert!(gate.allow(t0));
        assert!(!gate.allow(t0 + Duration::from_millis(50)));
        assert!(!gate.allow(t0 + Duration::from_millis(99)));
        assert!(gate.allow(t0 + INTERVAL));
    }

    #[test]
    fn test_rate_gate_reset() {
        let mut gate = RateGate::new(INTERVAL);
        let t0 = Instant::now();
        assert!(gate.allow(t0));
        gate.reset();
        assert!(gate.allow(t0 + Duration::from_millis(1)));
    }
}
