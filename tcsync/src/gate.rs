//! Emit rate limiting.

use std::time::Duration;
use tokio::time::Instant;

/// Lets a value through at most once per interval; everything in between is
/// dropped rather than queued.
#[derive(Debug, Clone)]
pub struct EmitGate {
    interval: Duration,
    last: Option<Instant>,
}

impl EmitGate {
    /// Gate with a minimum spacing between forwarded values.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    /// Gate for a maximum rate in Hz.
    pub fn with_rate(max_rate_hz: f64) -> Self {
        Self::new(Duration::from_secs_f64(1.0 / max_rate_hz))
    }

    /// Whether a value arriving at `now` may be forwarded; records it if so.
    pub fn admit(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.saturating_duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }

    /// Forget the last forwarded value.
    pub fn reset(&mut self) {
        self.last = None;
    }

    /// Minimum spacing between forwarded values.
    pub fn interval(&self) -> Duration {
        self.interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_value_passes() {
        let mut gate = EmitGate::with_rate(10.0);
        assert!(gate.admit(Instant::now()));
    }

    #[test]
    fn test_25hz_source_limited_to_10hz() {
        let mut gate = EmitGate::with_rate(10.0);
        let start = Instant::now();
        let forwarded = (0..25)
            .map(|i| start + Duration::from_millis(i * 40))
            .filter(|t| gate.admit(*t))
            .count();
        assert!(forwarded <= 10, "forwarded {}", forwarded);
        assert!(forwarded >= 8, "forwarded {}", forwarded);
    }

    #[test]
    fn test_reset() {
        let mut gate = EmitGate::new(Duration::from_secs(1));
        let now = Instant::now();
        assert!(gate.admit(now));
        assert!(!gate.admit(now));
        gate.reset();
        assert!(gate.admit(now));
    }
}
