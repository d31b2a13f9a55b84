//! Per-height consensus state.
//!
//! A [`ConsensusContext`] exists for exactly one block height. It records
//! the proposal for the current view and every vote received, one slot per
//! validator. Votes live in [`SlotMap`]s, fixed-size arrays indexed by
//! validator index where each slot is empty, filled, or conflicting. A
//! filled slot is never overwritten: a second, different payload from the
//! same validator marks the slot conflicting and keeps the first value.

use {
    crate::{
        message::{Payload, SignedMessage},
        primary, quorum,
        recovery_log::SavedContext,
        types::{
            BlockIndex, BlockProposal, ConsensusPhase, ValidatorIndex, ViewNumber,
        },
        validator_set::ValidatorSet,
    },
    solana_hash::Hash,
    solana_pubkey::Pubkey,
    solana_signature::Signature,
    std::collections::HashSet,
};

// ---------------------------------------------------------------------------
// Slots
// ---------------------------------------------------------------------------

/// State of one validator's vote slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Slot<T> {
    Empty,
    Filled(T),
    /// The validator sent a second, different payload. The first one is
    /// kept and still counts.
    Conflicting(T),
}

impl<T> Slot<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            Slot::Empty => None,
            Slot::Filled(v) | Slot::Conflicting(v) => Some(v),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Slot::Empty)
    }

    pub fn is_conflicting(&self) -> bool {
        matches!(self, Slot::Conflicting(_))
    }
}

/// Outcome of writing into a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotWrite {
    /// The slot was empty and now holds the value.
    Inserted,
    /// The slot already held this exact signed payload.
    Duplicate,
    /// The slot held a different payload; it is now marked conflicting.
    Conflict,
}

/// One slot per validator, indexed by [`ValidatorIndex`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotMap<T> {
    slots: Vec<Slot<T>>,
}

impl<T: AsRef<SignedMessage>> SlotMap<T> {
    pub fn new(n: usize) -> Self {
        Self {
            slots: (0..n).map(|_| Slot::Empty).collect(),
        }
    }

    pub fn slot(&self, index: ValidatorIndex) -> Option<&Slot<T>> {
        self.slots.get(usize::from(index))
    }

    pub fn get(&self, index: ValidatorIndex) -> Option<&T> {
        self.slot(index).and_then(Slot::value)
    }

    pub fn get_mut(&mut self, index: ValidatorIndex) -> Option<&mut T> {
        match self.slots.get_mut(usize::from(index))? {
            Slot::Empty => None,
            Slot::Filled(v) | Slot::Conflicting(v) => Some(v),
        }
    }

    pub fn is_filled(&self, index: ValidatorIndex) -> bool {
        self.get(index).is_some()
    }

    /// Write `value` unless the slot is already taken. Duplicates are
    /// detected by comparing the signed messages.
    pub fn record(&mut self, index: ValidatorIndex, value: T) -> SlotWrite {
        let Some(slot) = self.slots.get_mut(usize::from(index)) else {
            return SlotWrite::Conflict;
        };
        let same = slot
            .value()
            .map(|existing| existing.as_ref() == value.as_ref());
        match same {
            None => {
                *slot = Slot::Filled(value);
                SlotWrite::Inserted
            }
            Some(true) => SlotWrite::Duplicate,
            Some(false) => {
                *slot = match std::mem::replace(slot, Slot::Empty) {
                    Slot::Filled(v) | Slot::Conflicting(v) => Slot::Conflicting(v),
                    Slot::Empty => Slot::Empty,
                };
                SlotWrite::Conflict
            }
        }
    }

    /// Empty a slot. Used only to discard a value that failed a check
    /// that could not be made when it arrived.
    pub fn clear(&mut self, index: ValidatorIndex) {
        if let Some(slot) = self.slots.get_mut(usize::from(index)) {
            *slot = Slot::Empty;
        }
    }

    pub fn reset(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = Slot::Empty);
    }

    /// Number of non-empty slots.
    pub fn count(&self) -> usize {
        self.slots.iter().filter(|s| !s.is_empty()).count()
    }

    pub fn count_where(&self, mut predicate: impl FnMut(&T) -> bool) -> usize {
        self.iter().filter(|(_, v)| predicate(v)).count()
    }

    /// Non-empty slots in validator order.
    pub fn iter(&self) -> impl Iterator<Item = (ValidatorIndex, &T)> {
        self.slots.iter().enumerate().filter_map(|(i, s)| {
            let index = ValidatorIndex::try_from(i).ok()?;
            s.value().map(|v| (index, v))
        })
    }

    /// Indices of slots that saw conflicting payloads.
    pub fn conflicting(&self) -> impl Iterator<Item = ValidatorIndex> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_conflicting())
            .filter_map(|(i, _)| ValidatorIndex::try_from(i).ok())
    }
}

// ---------------------------------------------------------------------------
// Slot values
// ---------------------------------------------------------------------------

/// A PrepareRequest (primary) or PrepareResponse (backup).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preparation {
    pub preparation_hash: Hash,
    pub message: SignedMessage,
}

impl AsRef<SignedMessage> for Preparation {
    fn as_ref(&self) -> &SignedMessage {
        &self.message
    }
}

/// A Commit, possibly from a view other than the current one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitVote {
    pub view_number: ViewNumber,
    /// Signature over the committed block hash.
    pub block_signature: Signature,
    /// Whether the signature has been checked against a known proposal.
    /// Commits that arrive before the proposal are checked once it is
    /// accepted.
    pub verified: bool,
    pub message: SignedMessage,
}

impl AsRef<SignedMessage> for CommitVote {
    fn as_ref(&self) -> &SignedMessage {
        &self.message
    }
}

/// A validator's latest request to change view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeViewVote {
    pub new_view_number: ViewNumber,
    pub message: SignedMessage,
}

/// Last time a validator was heard from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LastSeen {
    pub block_index: BlockIndex,
    pub at_ms: u64,
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Chain state the context is built on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainTip {
    /// Height of the block being agreed upon.
    pub block_index: BlockIndex,
    pub prev_hash: Hash,
    pub prev_timestamp: u64,
    pub version: u32,
}

/// All consensus state for one height.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsensusContext {
    tip: ChainTip,
    view_number: ViewNumber,
    validators: ValidatorSet,
    /// `None` when the local key is not in the committee (watch-only).
    my_index: Option<ValidatorIndex>,
    proposal: Option<BlockProposal>,
    preparation_hash: Option<Hash>,
    pub(crate) preparations: SlotMap<Preparation>,
    pub(crate) commits: SlotMap<CommitVote>,
    pub(crate) change_views: Vec<Option<ChangeViewVote>>,
    /// Change views that justified entering the current view. Carried in
    /// recovery messages so lagging peers can follow.
    pub(crate) last_change_views: Vec<Option<ChangeViewVote>>,
    pub(crate) last_seen: Vec<LastSeen>,
    pub(crate) missing_transactions: HashSet<Hash>,
    /// The transaction source refused the current proposal. The node
    /// never commits to it, whatever the preparation count.
    proposal_rejected: bool,
    finalized: bool,
}

impl ConsensusContext {
    /// Fresh context for `tip.block_index` at view 0.
    ///
    /// `previous` is the context of the height before, if any; liveness
    /// bookkeeping is carried over for validators present in both
    /// committees.
    pub fn new(
        tip: ChainTip,
        validators: ValidatorSet,
        identity: &Pubkey,
        previous: Option<&ConsensusContext>,
        now_ms: u64,
    ) -> Self {
        let n = validators.len();
        let my_index = validators.index_of(identity);
        let last_seen = validators
            .iter()
            .map(|pubkey| {
                previous
                    .and_then(|prev| prev.last_seen_of(pubkey))
                    .unwrap_or(LastSeen {
                        block_index: tip.block_index,
                        at_ms: now_ms,
                    })
            })
            .collect();

        Self {
            tip,
            view_number: 0,
            validators,
            my_index,
            proposal: None,
            preparation_hash: None,
            preparations: SlotMap::new(n),
            commits: SlotMap::new(n),
            change_views: vec![None; n],
            last_change_views: vec![None; n],
            last_seen,
            missing_transactions: HashSet::new(),
            proposal_rejected: false,
            finalized: false,
        }
    }

    // -- Accessors --

    pub fn block_index(&self) -> BlockIndex {
        self.tip.block_index
    }

    pub fn view_number(&self) -> ViewNumber {
        self.view_number
    }

    pub fn tip(&self) -> &ChainTip {
        &self.tip
    }

    pub fn validators(&self) -> &ValidatorSet {
        &self.validators
    }

    pub fn validator_count(&self) -> usize {
        self.validators.len()
    }

    pub fn my_index(&self) -> Option<ValidatorIndex> {
        self.my_index
    }

    pub fn primary_index(&self) -> ValidatorIndex {
        primary::primary_index(self.tip.block_index, self.view_number, self.validators.len())
    }

    pub fn is_primary(&self) -> bool {
        self.my_index.is_some_and(|index| {
            primary::is_primary(&self.validators, index, self.tip.block_index, self.view_number)
        })
    }

    pub fn is_backup(&self) -> bool {
        self.my_index.is_some() && !self.is_primary()
    }

    pub fn watch_only(&self) -> bool {
        self.my_index.is_none()
    }

    pub fn f(&self) -> usize {
        self.validators.max_faulty()
    }

    pub fn m(&self) -> usize {
        self.validators.quorum()
    }

    pub fn proposal(&self) -> Option<&BlockProposal> {
        self.proposal.as_ref()
    }

    pub fn preparation_hash(&self) -> Option<Hash> {
        self.preparation_hash
    }

    pub fn preparations(&self) -> &SlotMap<Preparation> {
        &self.preparations
    }

    pub fn commits(&self) -> &SlotMap<CommitVote> {
        &self.commits
    }

    pub fn change_view_of(&self, index: ValidatorIndex) -> Option<&ChangeViewVote> {
        self.change_views
            .get(usize::from(index))
            .and_then(Option::as_ref)
    }

    pub fn last_seen_of(&self, pubkey: &Pubkey) -> Option<LastSeen> {
        let index = self.validators.index_of(pubkey)?;
        self.last_seen.get(usize::from(index)).copied()
    }

    pub fn missing_transactions(&self) -> &HashSet<Hash> {
        &self.missing_transactions
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn proposal_rejected(&self) -> bool {
        self.proposal_rejected
    }

    // -- Derived predicates --

    /// The primary's PrepareRequest has been sent or accepted.
    pub fn request_sent_or_received(&self) -> bool {
        self.preparations.is_filled(self.primary_index())
    }

    /// The local node has sent its PrepareResponse (or PrepareRequest).
    pub fn response_sent(&self) -> bool {
        self.my_index
            .is_some_and(|i| self.preparations.is_filled(i))
    }

    /// The local node has committed at this height (in any view).
    pub fn commit_sent(&self) -> bool {
        self.my_index.is_some_and(|i| self.commits.is_filled(i))
    }

    /// The local node has asked to leave the current view.
    pub fn view_changing(&self) -> bool {
        self.my_index
            .and_then(|i| self.change_view_of(i))
            .is_some_and(|vote| vote.new_view_number > self.view_number)
    }

    /// Validators that committed at this height, in any view.
    pub fn count_committed(&self) -> usize {
        self.commits.count()
    }

    /// Validators not heard from since before the previous height.
    pub fn count_failed(&self) -> usize {
        let threshold = self.tip.block_index.saturating_sub(1);
        self.last_seen
            .iter()
            .filter(|seen| seen.block_index < threshold)
            .count()
    }

    /// More than `f` validators are committed or unreachable, so a view
    /// change could never gather `M` votes.
    pub fn more_than_f_committed_or_lost(&self) -> bool {
        self.count_committed().saturating_add(self.count_failed()) > self.f()
    }

    /// New proposals and responses are refused while the local node is
    /// leaving the view, unless a view change is hopeless anyway.
    pub fn not_accepting_payloads_due_to_view_changing(&self) -> bool {
        self.view_changing() && !self.more_than_f_committed_or_lost()
    }

    /// Commits recorded for the current view whose signatures were checked.
    pub fn verified_commits_for_current_view(&self) -> usize {
        let view = self.view_number;
        self.commits
            .count_where(|c| c.view_number == view && c.verified)
    }

    /// Where the local node stands, derived from recorded votes.
    pub fn phase(&self) -> ConsensusPhase {
        if self.finalized {
            ConsensusPhase::Finalized
        } else if self.commit_sent() {
            ConsensusPhase::CommitPhase
        } else if self.view_changing() {
            ConsensusPhase::ViewChanging
        } else if self.request_sent_or_received() {
            ConsensusPhase::PreparationPhase
        } else if self.is_primary() {
            ConsensusPhase::ProposeBlock
        } else {
            ConsensusPhase::WaitForProposal
        }
    }

    /// Most common preparation hash among recorded responses. Used in
    /// recovery messages when the proposal itself is unknown.
    pub fn most_common_preparation_hash(&self) -> Option<Hash> {
        let mut counts: Vec<(Hash, usize)> = Vec::new();
        for (_, prep) in self.preparations.iter() {
            match counts.iter_mut().find(|(h, _)| *h == prep.preparation_hash) {
                Some((_, c)) => *c = c.saturating_add(1),
                None => counts.push((prep.preparation_hash, 1)),
            }
        }
        counts
            .into_iter()
            .max_by(|(ha, ca), (hb, cb)| ca.cmp(cb).then_with(|| hb.cmp(ha)))
            .map(|(h, _)| h)
    }

    // -- Mutations --

    /// Record the accepted proposal for the current view.
    pub(crate) fn set_proposal(&mut self, proposal: BlockProposal) {
        self.preparation_hash = Some(proposal.hash());
        self.proposal = Some(proposal);
    }

    pub(crate) fn reject_proposal(&mut self) {
        self.proposal_rejected = true;
    }

    pub(crate) fn set_finalized(&mut self) {
        self.finalized = true;
    }

    /// Record a ChangeView vote. Returns false if the sender already asked
    /// for this view or a later one.
    pub(crate) fn record_change_view(&mut self, index: ValidatorIndex, vote: ChangeViewVote) -> bool {
        let Some(slot) = self.change_views.get_mut(usize::from(index)) else {
            return false;
        };
        if slot
            .as_ref()
            .is_some_and(|existing| existing.new_view_number >= vote.new_view_number)
        {
            return false;
        }
        *slot = Some(vote);
        true
    }

    /// Targets of all recorded ChangeView votes.
    pub fn change_view_targets(&self) -> Vec<ViewNumber> {
        self.change_views
            .iter()
            .flatten()
            .map(|vote| vote.new_view_number)
            .collect()
    }

    pub(crate) fn touch(&mut self, index: ValidatorIndex, block_index: BlockIndex, now_ms: u64) {
        if let Some(seen) = self.last_seen.get_mut(usize::from(index)) {
            if block_index >= seen.block_index {
                *seen = LastSeen { block_index, at_ms: now_ms };
            }
        }
    }

    /// Move to `view`. Clears everything bound to the old view, keeps
    /// commits, and keeps change-view votes still pointing at or past the
    /// new view.
    pub(crate) fn enter_view(&mut self, view: ViewNumber) {
        self.view_number = view;
        self.proposal = None;
        self.preparation_hash = None;
        self.preparations.reset();
        self.missing_transactions.clear();
        self.proposal_rejected = false;

        for (last, current) in self
            .last_change_views
            .iter_mut()
            .zip(self.change_views.iter_mut())
        {
            *last = current
                .as_ref()
                .filter(|vote| vote.new_view_number >= view)
                .cloned();
            if current
                .as_ref()
                .is_some_and(|vote| vote.new_view_number <= view)
            {
                *current = None;
            }
        }
    }

    /// Reinstate a Commit made before a restart: the view it was made in,
    /// the proposal, the preparations and the Commit itself. Returns false
    /// if the record does not fit this context.
    pub(crate) fn restore_commit(&mut self, saved: &SavedContext) -> bool {
        let Some(my_index) = self.my_index else {
            return false;
        };
        if saved.block_index != self.block_index() || saved.commit.validator_index() != my_index {
            return false;
        }
        let (Some(request_message), Payload::Commit(commit)) =
            (saved.prepare_request(), &saved.commit.message.payload)
        else {
            return false;
        };
        let Payload::PrepareRequest(request) = &request_message.message.payload else {
            return false;
        };
        if request_message.view_number() != saved.view_number
            || request_message.validator_index()
                != primary::primary_index(saved.block_index, saved.view_number, self.validators.len())
        {
            return false;
        }

        if saved.view_number != self.view_number {
            self.enter_view(saved.view_number);
        }
        let proposal = request.to_proposal(saved.block_index, request_message.validator_index());
        let preparation_hash = proposal.hash();
        self.set_proposal(proposal);
        for message in &saved.preparations {
            let bound_to = match &message.message.payload {
                Payload::PrepareRequest(_) => preparation_hash,
                Payload::PrepareResponse(response) => response.preparation_hash,
                _ => continue,
            };
            if bound_to == preparation_hash && message.view_number() == saved.view_number {
                self.preparations.record(
                    message.validator_index(),
                    Preparation {
                        preparation_hash,
                        message: message.clone(),
                    },
                );
            }
        }
        self.commits.record(
            my_index,
            CommitVote {
                view_number: saved.view_number,
                block_signature: commit.signature,
                verified: true,
                message: saved.commit.clone(),
            },
        );
        true
    }

    /// Change-view proof for `index`: the pending vote if any, otherwise
    /// the one that led into the current view.
    pub(crate) fn change_view_proof(&self, index: usize) -> Option<&ChangeViewVote> {
        self.change_views
            .get(index)
            .and_then(Option::as_ref)
            .or_else(|| self.last_change_views.get(index).and_then(Option::as_ref))
    }
}

/// Threshold helpers on a context, shared with the view-change rule.
impl ConsensusContext {
    pub fn has_preparation_quorum(&self) -> bool {
        self.preparations.count() >= self.m()
    }

    pub fn has_commit_quorum(&self) -> bool {
        self.verified_commits_for_current_view() >= quorum::quorum(self.validator_count())
    }
}
