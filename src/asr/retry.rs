//! Reconnect backoff for the recognizer transport.
//!
//! [`ReconnectPolicy`] is the configured shape of the backoff curve;
//! [`Backoff`] is the per-outage cursor over it. The connection task holds
//! one `Backoff` for the lifetime of an outage, so attempt bookkeeping
//! lives here and the whole schedule is testable without a socket.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Shape of the reconnect backoff curve.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Reconnect at all on unexpected transport loss.
    pub enabled: bool,

    /// Attempt budget per outage. 0 means unbounded.
    pub max_attempts: u32,

    /// Delay before the first retry; doubles on each further retry.
    pub base_delay: Duration,

    /// Ceiling the doubling saturates at.
    pub max_delay: Duration,

    /// Spread each delay by up to 20% either way so clients that lost the
    /// same upstream do not retry in lockstep.
    pub jitter: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl ReconnectPolicy {
    /// A policy that never retries.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Start the attempt cursor for one outage.
    pub fn backoff(&self) -> Backoff {
        Backoff {
            policy: self.clone(),
            attempt: 0,
        }
    }
}

/// Attempt cursor over a [`ReconnectPolicy`].
///
/// Each `next_delay()` call spends one attempt from the budget; `None`
/// means the budget is gone (or the policy is disabled) and the outage is
/// terminal.
#[derive(Debug)]
pub struct Backoff {
    policy: ReconnectPolicy,
    attempt: u32,
}

impl Backoff {
    /// Attempts spent so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay to sleep before the next attempt, or `None` once the budget
    /// is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.policy.enabled {
            return None;
        }
        if self.policy.max_attempts != 0 && self.attempt >= self.policy.max_attempts {
            return None;
        }

        // The shift saturates long after max_delay has taken over
        let doubling = 1u32 << self.attempt.min(31);
        self.attempt += 1;

        let delay = self
            .policy
            .base_delay
            .saturating_mul(doubling)
            .min(self.policy.max_delay);

        if self.policy.jitter {
            Some(spread(delay))
        } else {
            Some(delay)
        }
    }
}

/// Spread a delay across +/-20%, seeded from the clock. Not random in any
/// strong sense; it only has to keep independent clients apart.
fn spread(delay: Duration) -> Duration {
    let span = delay.as_millis() as u64 / 5;
    if span == 0 {
        return delay;
    }
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64)
        .unwrap_or(0);
    let offset = nanos % (2 * span + 1);
    Duration::from_millis(delay.as_millis() as u64 - span + offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_saturates() {
        let policy = ReconnectPolicy {
            max_attempts: 0,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(450),
            jitter: false,
            ..Default::default()
        };
        let mut backoff = policy.backoff();

        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(100)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(200)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(400)));
        // Saturates at the ceiling and stays there
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(450)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(450)));
    }

    #[test]
    fn test_backoff_spends_the_attempt_budget() {
        let policy = ReconnectPolicy {
            max_attempts: 3,
            jitter: false,
            ..Default::default()
        };
        let mut backoff = policy.backoff();

        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert_eq!(backoff.next_delay(), None);
        assert_eq!(backoff.attempt(), 3);
    }

    #[test]
    fn test_disabled_policy_never_retries() {
        let mut backoff = ReconnectPolicy::disabled().backoff();
        assert_eq!(backoff.next_delay(), None);
        assert_eq!(backoff.attempt(), 0);
    }

    #[test]
    fn test_zero_max_attempts_is_unbounded() {
        let policy = ReconnectPolicy {
            max_attempts: 0,
            jitter: false,
            ..Default::default()
        };
        let mut backoff = policy.backoff();

        for _ in 0..100 {
            assert!(backoff.next_delay().is_some());
        }
        assert_eq!(backoff.attempt(), 100);
        // Far past the doubling range the delay still equals the ceiling
        assert_eq!(backoff.next_delay(), Some(policy.max_delay));
    }

    #[test]
    fn test_jitter_stays_within_the_spread() {
        let policy = ReconnectPolicy {
            base_delay: Duration::from_millis(1000),
            jitter: true,
            ..Default::default()
        };

        for _ in 0..32 {
            let delay = policy.backoff().next_delay().unwrap();
            assert!(
                delay >= Duration::from_millis(800) && delay <= Duration::from_millis(1200),
                "delay {delay:?} outside the 800-1200ms spread"
            );
        }
    }
}
