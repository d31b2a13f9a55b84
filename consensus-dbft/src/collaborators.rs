//! Interfaces the engine is driven through.
//!
//! The engine never touches storage, the mempool, key material or the wall
//! clock directly. Each of those is injected as a trait object so many
//! validators can run in one process and every run can be replayed.

use {
    crate::{
        error::{PersistError, SignerError},
        types::{BlockIndex, FinalizedBlock},
        validator_set::ValidatorSet,
    },
    solana_hash::Hash,
    solana_pubkey::Pubkey,
    solana_signature::Signature,
    std::{
        fmt,
        time::{SystemTime, UNIX_EPOCH},
    },
};

/// Chain state the engine builds on, and the sink for finalized blocks.
pub trait Ledger: Send {
    /// Height of the next block to agree on.
    fn current_height(&self) -> BlockIndex;

    /// Hash of the latest persisted block.
    fn previous_hash(&self) -> Hash;

    /// Timestamp (ms) of the latest persisted block.
    fn previous_timestamp(&self) -> u64;

    /// Committee for `height`. Fixed for the whole height.
    fn validators_for(&self, height: BlockIndex) -> ValidatorSet;

    /// Persist a finalized block. On success `current_height` must advance
    /// past it.
    fn persist(&mut self, block: &FinalizedBlock) -> Result<(), PersistError>;
}

/// Why a proposal's transaction list was not acceptable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionVerdict {
    /// These hashes are unknown locally. They may still arrive.
    NotFound(Vec<Hash>),
    /// A transaction is valid but local policy refuses it.
    RejectedByPolicy,
    /// A transaction is invalid.
    Invalid,
    /// The block as a whole is refused by local policy.
    BlockRejectedByPolicy,
}

/// Supplies transactions for proposals and checks others' proposals.
pub trait TransactionSource: Send {
    /// Up to `capacity_hint` transaction hashes for a new proposal, in block
    /// order.
    fn select_transactions(&mut self, capacity_hint: usize) -> Vec<Hash>;

    /// Check a proposed transaction list against the local pool.
    fn verify_transactions(&mut self, _hashes: &[Hash]) -> Result<(), TransactionVerdict> {
        Ok(())
    }
}

/// Signing capability bound to the local validator key.
pub trait Signer: Send {
    fn public_key(&self) -> Pubkey;

    fn sign(&self, message: &[u8]) -> Result<Signature, SignerError>;

    fn verify(&self, pubkey: &Pubkey, message: &[u8], signature: &Signature) -> bool;
}

/// Source of wall-clock time in milliseconds since the Unix epoch.
pub trait Clock: Send {
    fn now_ms(&self) -> u64;
}

/// The system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0)
    }
}

impl fmt::Display for TransactionVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionVerdict::NotFound(missing) => {
                write!(f, "{} transactions not found", missing.len())
            }
            TransactionVerdict::RejectedByPolicy => write!(f, "transaction rejected by policy"),
            TransactionVerdict::Invalid => write!(f, "invalid transaction"),
            TransactionVerdict::BlockRejectedByPolicy => write!(f, "block rejected by policy"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_is_after_2020() {
        // 2020-01-01T00:00:00Z
        assert!(SystemClock.now_ms() > 1_577_836_800_000);
    }
}
