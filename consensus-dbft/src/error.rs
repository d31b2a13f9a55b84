//! Error types for the dBFT consensus core.
//!
//! Only two families of errors ever leave this crate: [`WireError`] when an
//! inbound byte string cannot be decoded, and [`EngineError`] when a
//! collaborator the engine cannot work without has failed. Everything a
//! remote validator can cause by sending a bad but well-formed message is
//! handled inside the engine and never surfaces here.

use {crate::types::BlockIndex, thiserror::Error};

/// A message could not be decoded. The message is dropped before any
/// consensus state is touched.
#[derive(Error, Debug)]
pub enum WireError {
    /// bincode rejected the payload (bad length prefix, truncated input,
    /// unknown enum value, size limit exceeded).
    #[error("malformed payload: {0}")]
    Malformed(#[from] bincode::Error),

    /// The kind byte does not name a known message kind.
    #[error("unknown message kind {0:#04x}")]
    UnknownKind(u8),

    /// The message is shorter than the fixed envelope.
    #[error("message truncated: {len} bytes (need at least {min})")]
    Truncated {
        /// Actual message size.
        len: usize,
        /// Smallest possible message.
        min: usize,
    },

    /// The message exceeds the maximum allowed size.
    #[error("message too large: {size} bytes (max {max} bytes)")]
    MessageTooLarge {
        /// Actual message size.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// A variable-length field declares more entries than allowed.
    #[error("{field} has {len} entries (max {max})")]
    TooManyEntries {
        /// Name of the offending field.
        field: &'static str,
        /// Declared entry count.
        len: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Bytes remain after the payload and signature were read.
    #[error("{0} trailing bytes after payload")]
    TrailingBytes(usize),
}

/// Failure reported by the ledger when persisting a finalized block.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("failed to persist block {block_index}: {reason}")]
pub struct PersistError {
    pub block_index: BlockIndex,
    pub reason: String,
}

/// The local signing key is not usable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("signer unavailable: {0}")]
pub struct SignerError(pub String);

/// Unrecoverable engine failures. After any of these the engine refuses
/// to participate in the affected height.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error(transparent)]
    Signer(#[from] SignerError),

    #[error(transparent)]
    Persist(#[from] PersistError),

    /// An outbound message could not be serialized.
    #[error("failed to encode outbound message: {0}")]
    Encode(String),

    /// The Commit could not be made durable, or the saved one could not be
    /// read back at start.
    #[error("recovery log failed: {0}")]
    RecoveryLog(String),

    /// The ledger returned an unusable validator set for a height.
    #[error("no usable validator set for height {height}: {reason}")]
    ValidatorSet { height: BlockIndex, reason: String },

    /// The engine halted on an earlier fatal error and must be restarted
    /// from a fresh height.
    #[error("engine halted at height {0}")]
    Halted(BlockIndex),
}

impl From<crate::recovery_log::RecoveryLogError> for EngineError {
    fn from(err: crate::recovery_log::RecoveryLogError) -> Self {
        EngineError::RecoveryLog(err.to_string())
    }
}

/// Convenience result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
