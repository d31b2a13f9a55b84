//! Committee management.
//!
//! The committee for a height is an ordered list of public keys. A
//! validator's position in that list is its `ValidatorIndex`, which is what
//! every consensus message carries instead of a full key. All validators
//! carry equal weight.

use {
    crate::{quorum, types::ValidatorIndex},
    solana_pubkey::Pubkey,
    std::collections::HashMap,
};

/// Largest committee addressable with a one-byte validator index.
pub const MAX_COMMITTEE_SIZE: usize = u8::MAX as usize;

/// An ordered committee of validators.
///
/// The order is supplied by the ledger and must be identical on every
/// node; it is never re-sorted here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorSet {
    validators: Vec<Pubkey>,
    /// Fast lookup from pubkey to position.
    index: HashMap<Pubkey, ValidatorIndex>,
}

impl ValidatorSet {
    /// Build a committee, rejecting empty, oversized or duplicated lists.
    pub fn new(validators: Vec<Pubkey>) -> Result<Self, ValidatorSetError> {
        if validators.is_empty() {
            return Err(ValidatorSetError::Empty);
        }
        if validators.len() > MAX_COMMITTEE_SIZE {
            return Err(ValidatorSetError::TooLarge(validators.len()));
        }

        let mut index = HashMap::with_capacity(validators.len());
        for (i, pubkey) in validators.iter().enumerate() {
            let i = ValidatorIndex::try_from(i)
                .map_err(|_| ValidatorSetError::TooLarge(validators.len()))?;
            if index.insert(*pubkey, i).is_some() {
                return Err(ValidatorSetError::Duplicate(*pubkey));
            }
        }

        Ok(Self { validators, index })
    }

    /// Returns the number of validators, `n`.
    pub fn len(&self) -> usize {
        self.validators.len()
    }

    /// Always false for a constructed set; present for API symmetry.
    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    /// Returns the public key at the given index.
    pub fn get(&self, index: ValidatorIndex) -> Option<&Pubkey> {
        self.validators.get(usize::from(index))
    }

    /// Returns the index of the given validator, if it is a member.
    pub fn index_of(&self, pubkey: &Pubkey) -> Option<ValidatorIndex> {
        self.index.get(pubkey).copied()
    }

    pub fn contains(&self, pubkey: &Pubkey) -> bool {
        self.index.contains_key(pubkey)
    }

    /// True if `index` addresses a member of this committee.
    pub fn is_valid_index(&self, index: ValidatorIndex) -> bool {
        usize::from(index) < self.validators.len()
    }

    /// Iterate over validators in committee order.
    pub fn iter(&self) -> impl Iterator<Item = &Pubkey> {
        self.validators.iter()
    }

    /// Maximum number of faulty validators tolerated, `f`.
    pub fn max_faulty(&self) -> usize {
        quorum::max_faulty(self.len())
    }

    /// Number of agreeing validators needed for a decision, `M`.
    pub fn quorum(&self) -> usize {
        quorum::quorum(self.len())
    }
}

/// Reasons a committee list is unusable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidatorSetError {
    #[error("validator set is empty")]
    Empty,
    #[error("validator set has {0} members (max {MAX_COMMITTEE_SIZE})")]
    TooLarge(usize),
    #[error("validator {0} appears more than once")]
    Duplicate(Pubkey),
}
