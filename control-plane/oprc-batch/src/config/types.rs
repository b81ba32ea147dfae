use std::time::Duration;

use envconfig::Envconfig;

/// Health server settings.
///
/// Env: `OPRC_HEALTH_BIND_ADDRESS`, `OPRC_HEALTH_SERVICE_NAME`,
/// `OPRC_HEALTH_GRACE_PERIOD_MS`.
#[derive(Envconfig, Clone, Debug)]
pub struct HealthConfig {
    #[envconfig(from = "OPRC_HEALTH_BIND_ADDRESS", default = "0.0.0.0:11251")]
    pub bind_address: String,

    /// Recorded on every log line emitted by the server.
    #[envconfig(from = "OPRC_HEALTH_SERVICE_NAME", default = "oprc-batch")]
    pub service_name: String,

    /// Time in-flight connections get to finish once shutdown starts.
    /// Zero closes them immediately.
    #[envconfig(from = "OPRC_HEALTH_GRACE_PERIOD_MS", default = "0")]
    pub grace_period_ms: u64,
}

impl HealthConfig {
    pub fn new(
        bind_address: impl Into<String>,
        service_name: impl Into<String>,
    ) -> Self {
        Self {
            bind_address: bind_address.into(),
            service_name: service_name.into(),
            grace_period_ms: 0,
        }
    }

    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period_ms =
            u64::try_from(grace.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}
