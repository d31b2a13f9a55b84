//! Core types for the dBFT consensus protocol.

use {
    serde::{Deserialize, Serialize},
    solana_hash::Hash,
    solana_signature::Signature,
    std::fmt,
};

/// Height of the block being agreed upon.
pub type BlockIndex = u32;

/// Attempt number within a height. Starts at 0 for every height.
pub type ViewNumber = u8;

/// Position of a validator in the ordered committee.
pub type ValidatorIndex = u8;

// ---------------------------------------------------------------------------
// Change view reasons
// ---------------------------------------------------------------------------

/// Why a validator asked to abandon the current view.
///
/// Encoded as a single byte on the wire. Unknown values are rejected at
/// decode time rather than mapped to a default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum ChangeViewReason {
    /// The view timer expired without progress.
    Timeout = 0x00,
    /// Sent to align with a view change the rest of the committee agreed on.
    ChangeAgreement = 0x01,
    /// Transactions referenced by the proposal never arrived.
    TxNotFound = 0x02,
    /// A proposed transaction violates local policy.
    TxRejectedByPolicy = 0x03,
    /// A proposed transaction failed verification.
    TxInvalid = 0x04,
    /// The proposal as a whole violates local policy.
    BlockRejectedByPolicy = 0x05,
}

impl ChangeViewReason {
    pub const ALL: [ChangeViewReason; 6] = [
        ChangeViewReason::Timeout,
        ChangeViewReason::ChangeAgreement,
        ChangeViewReason::TxNotFound,
        ChangeViewReason::TxRejectedByPolicy,
        ChangeViewReason::TxInvalid,
        ChangeViewReason::BlockRejectedByPolicy,
    ];
}

impl From<ChangeViewReason> for u8 {
    fn from(reason: ChangeViewReason) -> u8 {
        reason as u8
    }
}

impl TryFrom<u8> for ChangeViewReason {
    type Error = UnknownReason;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0x00 => ChangeViewReason::Timeout,
            0x01 => ChangeViewReason::ChangeAgreement,
            0x02 => ChangeViewReason::TxNotFound,
            0x03 => ChangeViewReason::TxRejectedByPolicy,
            0x04 => ChangeViewReason::TxInvalid,
            0x05 => ChangeViewReason::BlockRejectedByPolicy,
            other => return Err(UnknownReason(other)),
        })
    }
}

impl fmt::Display for ChangeViewReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeViewReason::Timeout => write!(f, "Timeout"),
            ChangeViewReason::ChangeAgreement => write!(f, "ChangeAgreement"),
            ChangeViewReason::TxNotFound => write!(f, "TxNotFound"),
            ChangeViewReason::TxRejectedByPolicy => write!(f, "TxRejectedByPolicy"),
            ChangeViewReason::TxInvalid => write!(f, "TxInvalid"),
            ChangeViewReason::BlockRejectedByPolicy => write!(f, "BlockRejectedByPolicy"),
        }
    }
}

/// A reason byte outside the known set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("unknown change view reason {0:#04x}")]
pub struct UnknownReason(pub u8);

// ---------------------------------------------------------------------------
// Block types
// ---------------------------------------------------------------------------

/// A block skeleton proposed by the primary for one view.
///
/// Header fields plus the ordered transaction hash list. Its [`hash`] is
/// the single value that PrepareResponses bind to and Commit signatures
/// sign.
///
/// [`hash`]: BlockProposal::hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockProposal {
    pub version: u32,
    pub prev_hash: Hash,
    pub block_index: BlockIndex,
    /// Index of the primary that proposed this block.
    pub primary_index: ValidatorIndex,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    pub nonce: u64,
    pub transaction_hashes: Vec<Hash>,
}

impl BlockProposal {
    /// Canonical hash of the proposal.
    ///
    /// Covers every header field and the transaction hashes in order, so
    /// two proposals differing in any field or in transaction order never
    /// share a hash.
    pub fn hash(&self) -> Hash {
        let version = self.version.to_le_bytes();
        let block_index = self.block_index.to_le_bytes();
        let primary_index = [self.primary_index];
        let timestamp = self.timestamp.to_le_bytes();
        let nonce = self.nonce.to_le_bytes();
        let tx_count = (self.transaction_hashes.len() as u64).to_le_bytes();

        let mut parts: Vec<&[u8]> = Vec::with_capacity(self.transaction_hashes.len().saturating_add(7));
        parts.extend_from_slice(&[
            &version[..],
            self.prev_hash.as_ref(),
            &block_index[..],
            &primary_index[..],
            &timestamp[..],
            &nonce[..],
            &tx_count[..],
        ]);
        parts.extend(self.transaction_hashes.iter().map(|h| h.as_ref()));
        solana_sha256_hasher::hashv(&parts)
    }
}

/// A block that collected a quorum of Commit signatures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizedBlock {
    pub proposal: BlockProposal,
    /// The view in which the block was finalized.
    pub view_number: ViewNumber,
    /// Exactly `M` commit signatures over [`BlockProposal::hash`], ordered
    /// by validator index.
    pub witness: Vec<(ValidatorIndex, Signature)>,
}

impl FinalizedBlock {
    pub fn hash(&self) -> Hash {
        self.proposal.hash()
    }

    pub fn block_index(&self) -> BlockIndex {
        self.proposal.block_index
    }
}

// ---------------------------------------------------------------------------
// Engine state
// ---------------------------------------------------------------------------

/// Where the local validator stands within the current height.
///
/// Derived from the consensus context rather than stored, so it can never
/// disagree with the recorded votes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsensusPhase {
    /// No height has been started yet.
    Initial,
    /// Local node is primary and has not yet sent its PrepareRequest.
    ProposeBlock,
    /// Local node is a backup waiting for the primary's PrepareRequest.
    WaitForProposal,
    /// A proposal is known and PrepareResponses are being collected.
    PreparationPhase,
    /// The local Commit has been sent; waiting for a quorum of Commits.
    CommitPhase,
    /// The local node asked to leave the current view.
    ViewChanging,
    /// The block for this height has been finalized.
    Finalized,
    /// A fatal error stopped participation in this height.
    Halted,
}

impl fmt::Display for ConsensusPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsensusPhase::Initial => write!(f, "Initial"),
            ConsensusPhase::ProposeBlock => write!(f, "ProposeBlock"),
            ConsensusPhase::WaitForProposal => write!(f, "WaitForProposal"),
            ConsensusPhase::PreparationPhase => write!(f, "PreparationPhase"),
            ConsensusPhase::CommitPhase => write!(f, "CommitPhase"),
            ConsensusPhase::ViewChanging => write!(f, "ViewChanging"),
            ConsensusPhase::Finalized => write!(f, "Finalized"),
            ConsensusPhase::Halted => write!(f, "Halted"),
        }
    }
}

/// Identifies the (height, view) a timer was armed for. A firing whose
/// ticket no longer matches the engine's context is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerTicket {
    pub block_index: BlockIndex,
    pub view_number: ViewNumber,
}

/// Why the engine moved to a new view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewChangeCause {
    /// `M` validators asked for this view or a later one.
    ChangeViewQuorum,
    /// `f + 1` validators asked for this view or a later one.
    FPlusOneTargets,
    /// `f + 1` validators already committed in this view.
    CommitFastForward,
}

impl fmt::Display for ViewChangeCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViewChangeCause::ChangeViewQuorum => write!(f, "ChangeViewQuorum"),
            ViewChangeCause::FPlusOneTargets => write!(f, "FPlusOneTargets"),
            ViewChangeCause::CommitFastForward => write!(f, "CommitFastForward"),
        }
    }
}

/// One entry in the engine's view transition log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewTransition {
    pub block_index: BlockIndex,
    pub from_view: ViewNumber,
    pub to_view: ViewNumber,
    pub cause: ViewChangeCause,
    /// Local clock reading when the transition happened.
    pub at_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_proposal() -> BlockProposal {
        BlockProposal {
            version: 0,
            prev_hash: Hash::new_from_array([7; 32]),
            block_index: 100,
            primary_index: 0,
            timestamp: 1_700_000_000_000,
            nonce: 42,
            transaction_hashes: vec![
                Hash::new_from_array([1; 32]),
                Hash::new_from_array([2; 32]),
            ],
        }
    }

    #[test]
    fn test_proposal_hash_deterministic() {
        let a = make_proposal();
        let b = make_proposal();
        assert_eq!(a.hash(), b.hash());
    }

    #[test]
    fn test_proposal_hash_covers_every_field() {
        let base = make_proposal().hash();

        let mut p = make_proposal();
        p.nonce += 1;
        assert_ne!(p.hash(), base);

        let mut p = make_proposal();
        p.timestamp += 1;
        assert_ne!(p.hash(), base);

        let mut p = make_proposal();
        p.primary_index = 1;
        assert_ne!(p.hash(), base);

        let mut p = make_proposal();
        p.version = 1;
        assert_ne!(p.hash(), base);

        let mut p = make_proposal();
        p.block_index = 101;
        assert_ne!(p.hash(), base);

        let mut p = make_proposal();
        p.prev_hash = Hash::default();
        assert_ne!(p.hash(), base);
    }

    #[test]
    fn test_proposal_hash_depends_on_transaction_order() {
        let base = make_proposal();
        let mut swapped = make_proposal();
        swapped.transaction_hashes.reverse();
        assert_ne!(base.hash(), swapped.hash());
    }

    #[test]
    fn test_reason_byte_conversion() {
        for reason in ChangeViewReason::ALL {
            let byte = u8::from(reason);
            assert_eq!(ChangeViewReason::try_from(byte), Ok(reason));
        }
        assert_eq!(ChangeViewReason::try_from(0x06), Err(UnknownReason(0x06)));
        assert_eq!(ChangeViewReason::try_from(0xFF), Err(UnknownReason(0xFF)));
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(ConsensusPhase::CommitPhase.to_string(), "CommitPhase");
        assert_eq!(ConsensusPhase::ViewChanging.to_string(), "ViewChanging");
    }
}
