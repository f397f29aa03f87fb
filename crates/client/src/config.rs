use std::time::Duration;

/// Wait between reconnect attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed(Duration),
    /// Doubles from `initial` on every attempt, never exceeding `max`.
    Exponential { initial: Duration, max: Duration },
}

impl Backoff {
    /// Delay before reconnect attempt `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Fixed(interval) => interval,
            Backoff::Exponential { initial, max } => {
                let exp = attempt.saturating_sub(1).min(16);
                initial.saturating_mul(1 << exp).min(max)
            }
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Fixed(Duration::from_secs(3))
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Reconnect attempts after an unexpected closure before giving up. The
    /// count starts over after every successful reconnection.
    pub max_attempts: u32,
    pub backoff: Backoff,
    /// Upper bound on a single connection handshake.
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: Backoff::default(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_backoff_is_constant() {
        let backoff = Backoff::default();
        assert_eq!(backoff.delay(1), Duration::from_secs(3));
        assert_eq!(backoff.delay(5), Duration::from_secs(3));
    }

    #[test]
    fn test_exponential_backoff_doubles_and_caps() {
        let backoff = Backoff::Exponential {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(5),
        };
        let delays: Vec<_> = (1..=6).map(|a| backoff.delay(a).as_millis()).collect();
        assert_eq!(delays, vec![500, 1000, 2000, 4000, 5000, 5000]);
        assert_eq!(backoff.delay(u32::MAX), Duration::from_secs(5));
    }

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.backoff, Backoff::Fixed(Duration::from_secs(3)));
    }
}
