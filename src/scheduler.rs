//! Coalescing primitives for work triggered by rapid input.
//!
//! Neither type owns a timer or an event loop. The host calls into them with
//! the current time once per display tick.

use std::time::{Duration, Instant};

/// Runs pending work at most once per tick, however many requests arrive in between.
#[derive(Debug, Default)]
pub struct FrameCoalescer {
    pending: bool,
}

impl FrameCoalescer {
    pub fn request(&mut self) {
        self.pending = true;
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// True once per batch of requests; clears the flag.
    pub fn take(&mut self) -> bool {
        std::mem::take(&mut self.pending)
    }
}

/// Fires once after `quiet` has elapsed since the last `touch`.
#[derive(Debug)]
pub struct Debouncer {
    quiet: Duration,
    last_touch: Option<Instant>,
}

impl Debouncer {
    pub fn new(quiet: Duration) -> Self {
        Self {
            quiet,
            last_touch: None,
        }
    }

    /// Record activity, restarting the quiet period.
    pub fn touch(&mut self, now: Instant) {
        self.last_touch = Some(now);
    }

    pub fn is_armed(&self) -> bool {
        self.last_touch.is_some()
    }

    pub fn cancel(&mut self) {
        self.last_touch = None;
    }

    /// True exactly once per quiet period that follows a touch.
    pub fn fire_if_ready(&mut self, now: Instant) -> bool {
        match self.last_touch {
            Some(t) if now.saturating_duration_since(t) >= self.quiet => {
                self.last_touch = None;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coalescer_runs_once_per_tick() {
        let mut c = FrameCoalescer::default();
        assert!(!c.take());
        c.request();
        c.request();
        c.request();
        assert!(c.take());
        assert!(!c.take());
    }

    #[test]
    fn test_debouncer_waits_for_quiet() {
        let start = Instant::now();
        let mut d = Debouncer::new(Duration::from_millis(250));
        assert!(!d.fire_if_ready(start));

        d.touch(start);
        assert!(!d.fire_if_ready(start + Duration::from_millis(100)));
        // Dragging keeps pushing the deadline out
        d.touch(start + Duration::from_millis(200));
        assert!(!d.fire_if_ready(start + Duration::from_millis(300)));
        assert!(d.fire_if_ready(start + Duration::from_millis(450)));
        assert!(!d.fire_if_ready(start + Duration::from_millis(900)));
    }

    #[test]
    fn test_debouncer_cancel() {
        let start = Instant::now();
        let mut d = Debouncer::new(Duration::from_millis(10));
        d.touch(start);
        assert!(d.is_armed());
        d.cancel();
        assert!(!d.fire_if_ready(start + Duration::from_secs(1)));
    }
}
