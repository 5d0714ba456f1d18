use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct Interval {
    period: Duration,
    next_due: Option<Instant>,
}

impl Interval {
    pub fn new(period: Duration) -> Self {
        Self {
            period: period.max(Duration::from_millis(1)),
            next_due: None,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn arm_at(&mut self, first: Instant) {
        self.next_due = Some(first);
    }

    pub fn arm_after_period(&mut self, now: Instant) {
        self.arm_at(now + self.period);
    }

    pub fn cancel(&mut self) {
        self.next_due = None;
    }

    pub fn is_armed(&self) -> bool {
        self.next_due.is_some()
    }

    pub fn next_due(&self) -> Option<Instant> {
        self.next_due
    }

    /// Consumes at most one firing. Missed firings are skipped rather than
    /// replayed; later firings stay on the `first + n * period` grid.
    pub fn fire(&mut self, now: Instant) -> bool {
        let Some(due) = self.next_due else {
            return false;
        };
        if now < due {
            return false;
        }
        let mut next = due + self.period;
        while next <= now {
            next += self.period;
        }
        self.next_due = Some(next);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_on_fixed_grid() {
        let t0 = Instant::now();
        let mut iv = Interval::new(Duration::from_secs(2));
        assert!(!iv.fire(t0));
        iv.arm_after_period(t0);
        assert!(!iv.fire(t0 + Duration::from_millis(1999)));
        assert!(iv.fire(t0 + Duration::from_secs(2)));
        assert!(!iv.fire(t0 + Duration::from_secs(3)));
        assert!(iv.fire(t0 + Duration::from_millis(4100)));
        assert_eq!(iv.next_due(), Some(t0 + Duration::from_secs(6)));
    }

    #[test]
    fn skips_missed_firings() {
        let t0 = Instant::now();
        let mut iv = Interval::new(Duration::from_secs(2));
        iv.arm_at(t0);
        assert!(iv.fire(t0 + Duration::from_secs(7)));
        assert!(!iv.fire(t0 + Duration::from_secs(7)));
        assert_eq!(iv.next_due(), Some(t0 + Duration::from_secs(8)));
    }

    #[test]
    fn cancelled_timer_never_fires() {
        let t0 = Instant::now();
        let mut iv = Interval::new(Duration::from_secs(1));
        iv.arm_at(t0);
        iv.cancel();
        assert!(!iv.is_armed());
        assert!(!iv.fire(t0 + Duration::from_secs(10)));
    }
}
