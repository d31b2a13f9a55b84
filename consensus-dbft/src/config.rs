//! dBFT consensus configuration.
//!
//! Defines the block interval that every consensus timer is derived from,
//! decode limits for inbound messages, and bounds on the engine's
//! bookkeeping buffers.

use serde::{Deserialize, Serialize};

/// Configuration for the dBFT consensus engine.
///
/// All times are in milliseconds. Every timer in the protocol is a
/// multiple of `block_time_ms`, doubling with each view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DbftConfig {
    /// Target block production interval in milliseconds.
    /// Default: 15000.
    pub block_time_ms: u64,

    /// Upper bound on transaction hashes in a single proposal. Also used as
    /// the capacity hint handed to the transaction source.
    /// Default: 512.
    pub max_transactions_per_block: usize,

    /// Largest committee the engine accepts. Validator indices are a single
    /// byte on the wire, so this can never exceed 255.
    /// Default: 21.
    pub max_validators: usize,

    /// Maximum encoded size of a single consensus message in bytes.
    /// Default: 1 MiB.
    pub max_message_size: usize,

    /// Network identifier mixed into every signature so that messages from
    /// one network are never valid on another.
    pub network_magic: u32,

    /// Block version stamped into proposals and required of received ones.
    pub block_version: u32,

    /// How many heights ahead of the current one are buffered for replay.
    /// Default: 4.
    pub max_future_heights: u32,

    /// Total number of future-height messages held at once.
    /// Default: 1024.
    pub max_buffered_messages: usize,

    /// Future-height messages held at once from any single validator, so
    /// one noisy peer cannot crowd out the rest of the committee.
    /// Default: 48.
    pub max_buffered_per_validator: usize,

    /// Number of view transitions kept in the engine's log.
    /// Default: 256.
    pub view_log_capacity: usize,

    /// A proposal whose timestamp is more than this many block intervals
    /// ahead of local time is refused.
    /// Default: 8.
    pub timestamp_drift_blocks: u64,

    /// Heights of Byzantine evidence retained before pruning.
    /// Default: 100.
    pub evidence_retention_heights: u32,

    /// Undrained evidence records kept before the oldest are dropped.
    /// Default: 256.
    pub max_pending_evidence: usize,
}

impl Default for DbftConfig {
    fn default() -> Self {
        Self {
            block_time_ms: 15_000,
            max_transactions_per_block: 512,
            max_validators: 21,
            max_message_size: 1_048_576, // 1 MiB
            network_magic: 0x334F_454E,
            block_version: 0,
            max_future_heights: 4,
            max_buffered_messages: 1_024,
            max_buffered_per_validator: 48,
            view_log_capacity: 256,
            timestamp_drift_blocks: 8,
            evidence_retention_heights: 100,
            max_pending_evidence: 256,
        }
    }
}

impl DbftConfig {
    /// Config with a short block time, suitable for local testing.
    #[cfg(any(test, feature = "dev-context-only-utils"))]
    pub fn dev_default() -> Self {
        Self {
            block_time_ms: 1_000,
            max_transactions_per_block: 64,
            ..Self::default()
        }
    }

    /// How long a backup waits for the primary's proposal in `view`, and
    /// how long any validator waits after asking to move to `view`.
    ///
    /// Doubles with every view: `block_time << (view + 1)`. Saturates
    /// instead of overflowing for absurd view numbers.
    pub fn view_timeout_ms(&self, view: u8) -> u64 {
        let shift = u32::from(view).saturating_add(1);
        match 1u64.checked_shl(shift) {
            Some(factor) => self.block_time_ms.saturating_mul(factor),
            None => u64::MAX,
        }
    }

    /// How long the primary waits for the rest of the committee after
    /// broadcasting its PrepareRequest.
    pub fn primary_timeout_ms(&self, view: u8) -> u64 {
        let timeout = self.view_timeout_ms(view);
        if view == 0 {
            timeout.saturating_sub(self.block_time_ms)
        } else {
            timeout
        }
    }

    /// Latest acceptable proposal timestamp relative to `now_ms`.
    pub fn max_proposal_timestamp(&self, now_ms: u64) -> u64 {
        now_ms.saturating_add(self.block_time_ms.saturating_mul(self.timestamp_drift_blocks))
    }

    /// Validate configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.block_time_ms == 0 {
            return Err(ConfigError::InvalidBlockTime);
        }
        if self.max_validators == 0 || self.max_validators > usize::from(u8::MAX) {
            return Err(ConfigError::InvalidMaxValidators(self.max_validators));
        }
        if self.max_transactions_per_block == 0 {
            return Err(ConfigError::InvalidMaxTransactions);
        }
        if self.max_message_size < crate::message::MIN_MESSAGE_SIZE {
            return Err(ConfigError::MessageSizeTooSmall {
                size: self.max_message_size,
                min: crate::message::MIN_MESSAGE_SIZE,
            });
        }
        if self.view_log_capacity == 0 {
            return Err(ConfigError::InvalidViewLogCapacity);
        }
        if self.max_buffered_per_validator == 0 {
            return Err(ConfigError::InvalidBufferLimit);
        }
        if self.max_pending_evidence == 0 {
            return Err(ConfigError::InvalidEvidenceLimit);
        }
        Ok(())
    }
}

/// Errors in dBFT configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("block_time_ms must be > 0")]
    InvalidBlockTime,
    #[error("max_validators must be in [1, 255], got {0}")]
    InvalidMaxValidators(usize),
    #[error("max_transactions_per_block must be > 0")]
    InvalidMaxTransactions,
    #[error("max_message_size {size} is below the minimum of {min} bytes")]
    MessageSizeTooSmall { size: usize, min: usize },
    #[error("view_log_capacity must be > 0")]
    InvalidViewLogCapacity,
    #[error("max_buffered_per_validator must be > 0")]
    InvalidBufferLimit,
    #[error("max_pending_evidence must be > 0")]
    InvalidEvidenceLimit,
}
