//! Byzantine evidence and protocol violation bookkeeping.
//!
//! A validator must never sign two different payloads for the same slot:
//! two PrepareRequests or two PrepareResponses in one view, or two Commits
//! at one height. This module keeps the first signed payload seen for
//! every slot and turns a conflicting second one into a provable pair.
//! It also counts protocol violations per sender for telemetry.
//!
//! Nothing here penalizes anyone. Evidence is recorded for observability
//! and drained by whoever owns the penalty policy. Each slot yields at most
//! one piece of evidence, and undrained evidence is capped; the oldest
//! records go first.

use {
    crate::{
        message::{MessageKind, SignedMessage},
        types::{BlockIndex, ViewNumber},
    },
    log::*,
    solana_pubkey::Pubkey,
    std::{
        collections::{HashMap, HashSet, VecDeque},
        fmt,
    },
};

/// Two conflicting signed payloads from one validator for one slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictingPayloadEvidence {
    /// The offending validator.
    pub validator: Pubkey,
    pub block_index: BlockIndex,
    /// View of the second message. Commits conflict across views.
    pub view_number: ViewNumber,
    pub kind: EvidenceKind,
    /// The payload seen first.
    pub first: SignedMessage,
    /// The conflicting payload.
    pub second: SignedMessage,
}

/// The slot that was double-signed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvidenceKind {
    ConflictingPrepareRequest,
    ConflictingPrepareResponse,
    ConflictingCommit,
}

impl fmt::Display for EvidenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvidenceKind::ConflictingPrepareRequest => write!(f, "ConflictingPrepareRequest"),
            EvidenceKind::ConflictingPrepareResponse => write!(f, "ConflictingPrepareResponse"),
            EvidenceKind::ConflictingCommit => write!(f, "ConflictingCommit"),
        }
    }
}

/// A well-formed message that broke a protocol rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViolationKind {
    /// Envelope signature did not verify.
    InvalidSignature,
    /// PrepareRequest from a validator that is not the primary, or a
    /// PrepareResponse from the primary itself.
    WrongPrimary,
    /// PrepareRequest that does not extend the local chain or breaks
    /// proposal rules.
    InvalidProposal,
    /// PrepareResponse bound to a different proposal than the active one.
    PreparationHashMismatch,
    /// Commit signature does not verify against the active proposal.
    InvalidCommitSignature,
    /// ChangeView whose target is not above the sender's own view.
    InvalidChangeView,
    /// RecoveryMessage entry whose rebuilt signature does not verify.
    /// Counted against the validator that relayed it.
    InvalidRecoveryEntry,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViolationKind::InvalidSignature => write!(f, "InvalidSignature"),
            ViolationKind::WrongPrimary => write!(f, "WrongPrimary"),
            ViolationKind::InvalidProposal => write!(f, "InvalidProposal"),
            ViolationKind::PreparationHashMismatch => write!(f, "PreparationHashMismatch"),
            ViolationKind::InvalidCommitSignature => write!(f, "InvalidCommitSignature"),
            ViolationKind::InvalidChangeView => write!(f, "InvalidChangeView"),
            ViolationKind::InvalidRecoveryEntry => write!(f, "InvalidRecoveryEntry"),
        }
    }
}

/// Key for tracking signed payloads: (height, view, sender, kind).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SlotKey {
    block_index: BlockIndex,
    /// Always 0 for commits.
    view_number: ViewNumber,
    validator: Pubkey,
    kind: EvidenceKind,
}

/// Undrained evidence kept by [`EvidenceCollector::new`].
pub const DEFAULT_MAX_PENDING_EVIDENCE: usize = 256;

/// Detects conflicting payloads and tallies protocol violations.
#[derive(Debug)]
pub struct EvidenceCollector {
    /// First payload seen for each slot.
    first_seen: HashMap<SlotKey, SignedMessage>,
    /// Slots that already produced evidence.
    reported: HashSet<SlotKey>,
    /// Collected evidence of double-signing, oldest first.
    evidence: VecDeque<ConflictingPayloadEvidence>,
    max_pending: usize,
    /// Validators with at least one piece of evidence against them.
    flagged: HashSet<Pubkey>,
    /// Protocol violations per sender.
    violations: HashMap<Pubkey, HashMap<ViolationKind, u32>>,
    /// Minimum height to track (older payloads are pruned).
    min_block_index: BlockIndex,
}

impl Default for EvidenceCollector {
    fn default() -> Self {
        Self::with_limit(DEFAULT_MAX_PENDING_EVIDENCE)
    }
}

impl EvidenceCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `max_pending` undrained records.
    pub fn with_limit(max_pending: usize) -> Self {
        Self {
            first_seen: HashMap::new(),
            reported: HashSet::new(),
            evidence: VecDeque::new(),
            max_pending: max_pending.max(1),
            flagged: HashSet::new(),
            violations: HashMap::new(),
            min_block_index: 0,
        }
    }

    /// Record a signed payload from `validator`.
    /// Returns `Some(evidence)` the first time a slot sees a conflicting
    /// payload, `None` for first sightings, exact duplicates and further
    /// conflicts in a slot already reported.
    pub fn check_and_record(
        &mut self,
        validator: Pubkey,
        message: &SignedMessage,
    ) -> Option<ConflictingPayloadEvidence> {
        let (kind, view_number) = match message.kind() {
            MessageKind::PrepareRequest => {
                (EvidenceKind::ConflictingPrepareRequest, message.view_number())
            }
            MessageKind::PrepareResponse => {
                (EvidenceKind::ConflictingPrepareResponse, message.view_number())
            }
            MessageKind::Commit => (EvidenceKind::ConflictingCommit, 0),
            // Re-sent change views and recovery traffic legitimately differ.
            MessageKind::ChangeView
            | MessageKind::RecoveryRequest
            | MessageKind::RecoveryMessage => return None,
        };

        if message.block_index() < self.min_block_index {
            return None;
        }

        let key = SlotKey {
            block_index: message.block_index(),
            view_number,
            validator,
            kind,
        };

        if let Some(first) = self.first_seen.get(&key) {
            if first.message.payload == message.message.payload || self.reported.contains(&key) {
                return None;
            }
            let evidence = ConflictingPayloadEvidence {
                validator,
                block_index: key.block_index,
                view_number: message.view_number(),
                kind,
                first: first.clone(),
                second: message.clone(),
            };
            warn!(
                "Byzantine evidence: {kind} from {validator} at h={} v={}",
                evidence.block_index, evidence.view_number
            );
            self.flagged.insert(validator);
            if self.evidence.len() >= self.max_pending {
                if let Some(dropped) = self.evidence.pop_front() {
                    warn!(
                        "Evidence store full, dropping {} from {} at h={}",
                        dropped.kind, dropped.validator, dropped.block_index
                    );
                }
            }
            self.evidence.push_back(evidence.clone());
            self.reported.insert(key);
            return Some(evidence);
        }

        self.first_seen.insert(key, message.clone());
        None
    }

    /// Count a protocol violation against `validator`.
    pub fn record_violation(&mut self, validator: Pubkey, kind: ViolationKind) {
        let count = self
            .violations
            .entry(validator)
            .or_default()
            .entry(kind)
            .or_insert(0);
        *count = count.saturating_add(1);
    }

    /// Total violations of any kind recorded against `validator`.
    pub fn violation_count(&self, validator: &Pubkey) -> u32 {
        self.violations
            .get(validator)
            .map(|kinds| kinds.values().fold(0u32, |acc, c| acc.saturating_add(*c)))
            .unwrap_or(0)
    }

    /// Violations of one kind recorded against `validator`.
    pub fn violations_of(&self, validator: &Pubkey, kind: ViolationKind) -> u32 {
        self.violations
            .get(validator)
            .and_then(|kinds| kinds.get(&kind))
            .copied()
            .unwrap_or(0)
    }

    /// Prune payloads older than the given height to bound memory.
    pub fn prune(&mut self, min_block_index: BlockIndex) {
        self.min_block_index = min_block_index;
        self.first_seen.retain(|k, _| k.block_index >= min_block_index);
        self.reported.retain(|k| k.block_index >= min_block_index);
        // Evidence stays until drained
    }

    /// Collected evidence, oldest first.
    pub fn evidence(&self) -> impl ExactSizeIterator<Item = &ConflictingPayloadEvidence> {
        self.evidence.iter()
    }

    pub fn pending_evidence(&self) -> usize {
        self.evidence.len()
    }

    /// Drain all evidence.
    pub fn drain_evidence(&mut self) -> Vec<ConflictingPayloadEvidence> {
        self.evidence.drain(..).collect()
    }

    /// Returns the number of tracked payloads.
    pub fn tracked_payloads(&self) -> usize {
        self.first_seen.len()
    }

    /// Check if a specific validator has been caught double-signing.
    pub fn has_evidence_against(&self, validator: &Pubkey) -> bool {
        self.flagged.contains(validator)
    }
}
