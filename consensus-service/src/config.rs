//! Service configuration.

use {
    crate::error::{Result, ServiceError},
    dbft_consensus::DbftConfig,
    serde::{Deserialize, Serialize},
    std::time::Duration,
};

/// Configuration for [`DbftService`](crate::service::DbftService).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Engine configuration.
    pub dbft: DbftConfig,

    /// Outbound messages queued for the broadcaster before new ones are
    /// dropped.
    /// Default: 1024.
    pub outbound_queue_capacity: usize,

    /// Longest the event loop blocks before re-checking timers and the exit
    /// flag.
    /// Default: 50.
    pub poll_interval_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            dbft: DbftConfig::default(),
            outbound_queue_capacity: 1_024,
            poll_interval_ms: 50,
        }
    }
}

impl ServiceConfig {
    /// Parse and validate a TOML document. Missing fields take their
    /// defaults.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.dbft.validate()?;
        if self.outbound_queue_capacity == 0 {
            return Err(ServiceError::InvalidQueueCapacity);
        }
        if self.poll_interval_ms == 0 {
            return Err(ServiceError::InvalidPollInterval);
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
