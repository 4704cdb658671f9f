//! Pool sizing and connection lifetime settings.

use std::time::Duration;

use crate::error::PoolError;

/// Connections opened when the caller does not size the pool.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// How long [`Pool::get`](crate::Pool::get) waits for a free slot.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// Sizing and lifetime settings for a [`Pool`](crate::Pool).
///
/// Built with the chained setters; fields are public for inspection.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct PoolConfig {
    /// Connections opened eagerly and exempt from idle reaping.
    pub min_connections: u32,

    /// Upper bound on live connections, checked out or idle.
    pub max_connections: u32,

    /// Wait limit for a free slot before `get` fails with a timeout.
    pub acquire_timeout: Duration,

    /// Idle time after which a connection above `min_connections` is closed.
    pub idle_timeout: Duration,

    /// Age after which a connection is closed instead of reused.
    pub max_lifetime: Duration,

    /// Ask the manager to validate an idle connection before handing it out.
    pub test_on_checkout: bool,

    /// Period of the background reaper, or `None` to reap only on checkout.
    pub reap_interval: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 0,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            idle_timeout: Duration::from_secs(30),
            max_lifetime: Duration::from_secs(3600),
            test_on_checkout: true,
            reap_interval: Some(Duration::from_secs(10)),
        }
    }
}

impl PoolConfig {
    /// Defaults: up to ten lazily opened connections.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Connections kept open even when idle.
    #[must_use]
    pub fn min_connections(mut self, count: u32) -> Self {
        self.min_connections = count;
        self
    }

    /// Cap on live connections.
    #[must_use]
    pub fn max_connections(mut self, count: u32) -> Self {
        self.max_connections = count;
        self
    }

    /// Wait limit for a free slot.
    #[must_use]
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Idle time before a surplus connection is closed.
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Age at which a connection is retired.
    #[must_use]
    pub fn max_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_lifetime = lifetime;
        self
    }

    /// Validate idle connections before reuse.
    #[must_use]
    pub fn test_on_checkout(mut self, enabled: bool) -> Self {
        self.test_on_checkout = enabled;
        self
    }

    /// Background reaper period; `None` turns it off.
    #[must_use]
    pub fn reap_interval(mut self, interval: Option<Duration>) -> Self {
        self.reap_interval = interval;
        self
    }

    /// Reject settings the pool cannot honor.
    pub fn validate<E>(&self) -> Result<(), PoolError<E>> {
        let invalid = |msg: String| -> Result<(), PoolError<E>> {
            Err(PoolError::Configuration(msg))
        };
        if self.max_connections == 0 {
            return invalid("pool needs room for at least one connection".into());
        }
        if self.min_connections > self.max_connections {
            return invalid(format!(
                "min_connections ({}) exceeds max_connections ({})",
                self.min_connections, self.max_connections
            ));
        }
        if self.acquire_timeout.is_zero() {
            return invalid("acquire_timeout must be non-zero".into());
        }
        if self.reap_interval.is_some_and(|i| i.is_zero()) {
            return invalid("reap_interval must be non-zero".into());
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn check(config: &PoolConfig) -> Result<(), PoolError<std::io::Error>> {
        config.validate()
    }

    #[test]
    fn test_defaults_are_lazy_and_bounded() {
        let config = PoolConfig::default();
        assert_eq!(config.min_connections, 0);
        assert_eq!(config.max_connections, DEFAULT_MAX_CONNECTIONS);
        assert_eq!(config.acquire_timeout, DEFAULT_ACQUIRE_TIMEOUT);
        assert!(config.test_on_checkout);
        check(&config).unwrap();
    }

    #[test]
    fn test_setters() {
        let config = PoolConfig::new()
            .min_connections(2)
            .max_connections(4)
            .acquire_timeout(Duration::from_millis(250))
            .idle_timeout(Duration::from_secs(5))
            .max_lifetime(Duration::from_secs(60))
            .test_on_checkout(false)
            .reap_interval(None);

        assert_eq!((config.min_connections, config.max_connections), (2, 4));
        assert_eq!(config.acquire_timeout, Duration::from_millis(250));
        assert_eq!(config.idle_timeout, Duration::from_secs(5));
        assert_eq!(config.max_lifetime, Duration::from_secs(60));
        assert!(!config.test_on_checkout);
        assert_eq!(config.reap_interval, None);
        check(&config).unwrap();
    }

    #[test]
    fn test_validation() {
        let err = check(&PoolConfig::new().max_connections(0)).unwrap_err();
        assert!(err.to_string().contains("at least one connection"));

        let err = check(&PoolConfig::new().min_connections(5).max_connections(3)).unwrap_err();
        assert!(err.to_string().contains("min_connections (5) exceeds max_connections (3)"));

        let err = check(&PoolConfig::new().acquire_timeout(Duration::ZERO)).unwrap_err();
        assert!(matches!(err, PoolError::Configuration(_)));

        let err = check(&PoolConfig::new().reap_interval(Some(Duration::ZERO))).unwrap_err();
        assert!(matches!(err, PoolError::Configuration(_)));

        check(&PoolConfig::new().min_connections(3).max_connections(3)).unwrap();
    }
}
