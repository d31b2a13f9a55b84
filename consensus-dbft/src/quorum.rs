//! Threshold arithmetic and message acceptance rules.
//!
//! Everything here is a pure function of its inputs so the rules can be
//! tested without an engine. The engine calls these before touching any
//! state.

use {
    crate::{
        collaborators::Signer,
        context::ConsensusContext,
        message::commit_sign_data,
        types::{TimerTicket, ValidatorIndex, ViewChangeCause, ViewNumber},
    },
    solana_hash::Hash,
    solana_signature::Signature,
};

/// Maximum number of faulty validators tolerated: `f = (n - 1) / 3`.
pub fn max_faulty(n: usize) -> usize {
    n.saturating_sub(1) / 3
}

/// Agreeing validators needed for a decision: `M = n - f`.
pub fn quorum(n: usize) -> usize {
    n.saturating_sub(max_faulty(n))
}

/// Decide whether recorded ChangeView targets move the node forward.
///
/// With `t_k` the k-th largest target, the quorum rule moves to `t_M` and
/// the `f + 1` rule moves to `t_(f+1)`. Since `t_(f+1) >= t_M` the result
/// is always `t_(f+1)`; the cause records which rule it satisfied.
pub fn should_advance_view(
    targets: &[ViewNumber],
    current_view: ViewNumber,
    n: usize,
) -> Option<(ViewNumber, ViewChangeCause)> {
    let f = max_faulty(n);
    let m = quorum(n);
    let mut sorted = targets.to_vec();
    sorted.sort_unstable_by(|a, b| b.cmp(a));

    let f_plus_one = *sorted.get(f)?;
    if f_plus_one <= current_view {
        return None;
    }
    let cause = match sorted.get(m.saturating_sub(1)) {
        Some(t_m) if *t_m >= f_plus_one => ViewChangeCause::ChangeViewQuorum,
        _ => ViewChangeCause::FPlusOneTargets,
    };
    Some((f_plus_one, cause))
}

/// Lowest view above `current_view` that `f + 1` distinct validators have
/// committed in, if any.
pub fn commit_fast_forward_target(
    commit_views: &[ViewNumber],
    current_view: ViewNumber,
    n: usize,
) -> Option<ViewNumber> {
    let needed = max_faulty(n).saturating_add(1);
    let mut candidates: Vec<ViewNumber> = commit_views
        .iter()
        .copied()
        .filter(|v| *v > current_view)
        .collect();
    candidates.sort_unstable();
    candidates.dedup();
    candidates
        .into_iter()
        .find(|v| commit_views.iter().filter(|c| *c == v).count() >= needed)
}

/// Outcome of checking a PrepareResponse against the context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreparationCheck {
    /// Record it. Without an active proposal the response is stored
    /// tentatively and re-checked once the proposal arrives.
    Accept,
    /// The sender's slot already holds this exact response.
    Duplicate,
    /// The sender's slot already holds a different response.
    AlreadyPrepared,
    /// Bound to a different proposal than the active one.
    HashMismatch,
}

/// Check a preparation from `sender` binding `preparation_hash`.
pub fn check_preparation(
    ctx: &ConsensusContext,
    sender: ValidatorIndex,
    preparation_hash: &Hash,
) -> PreparationCheck {
    if let Some(existing) = ctx.preparations().get(sender) {
        return if existing.preparation_hash == *preparation_hash {
            PreparationCheck::Duplicate
        } else {
            PreparationCheck::AlreadyPrepared
        };
    }
    match ctx.preparation_hash() {
        Some(active) if active != *preparation_hash => PreparationCheck::HashMismatch,
        _ => PreparationCheck::Accept,
    }
}

/// Outcome of checking a Commit against the context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitCheck {
    /// Signature verified against the active proposal.
    Verified,
    /// Recorded but not yet checkable: no proposal is known for its view.
    Unverified,
    /// The sender already committed with this exact signature.
    Duplicate,
    /// The sender already committed with a different signature.
    AlreadyCommitted,
    /// Signature does not verify against the active proposal.
    InvalidSignature,
}

/// Check a Commit from `sender` made in `view`.
pub fn check_commit<S: Signer + ?Sized>(
    ctx: &ConsensusContext,
    verifier: &S,
    network_magic: u32,
    sender: ValidatorIndex,
    view: ViewNumber,
    signature: &Signature,
) -> CommitCheck {
    if let Some(existing) = ctx.commits().get(sender) {
        return if existing.view_number == view && existing.block_signature == *signature {
            CommitCheck::Duplicate
        } else {
            CommitCheck::AlreadyCommitted
        };
    }
    if view != ctx.view_number() {
        return CommitCheck::Unverified;
    }
    let Some(block_hash) = ctx.preparation_hash() else {
        return CommitCheck::Unverified;
    };
    if verify_commit_signature(ctx, verifier, network_magic, sender, &block_hash, signature) {
        CommitCheck::Verified
    } else {
        CommitCheck::InvalidSignature
    }
}

/// Verify `signature` is `sender`'s commit to `block_hash`.
pub fn verify_commit_signature<S: Signer + ?Sized>(
    ctx: &ConsensusContext,
    verifier: &S,
    network_magic: u32,
    sender: ValidatorIndex,
    block_hash: &Hash,
    signature: &Signature,
) -> bool {
    let Some(pubkey) = ctx.validators().get(sender) else {
        return false;
    };
    verifier.verify(pubkey, &commit_sign_data(network_magic, block_hash), signature)
}

/// Whether a timer firing for `ticket` should make the node ask for a new
/// view. Stale tickets, committed nodes and watch-only nodes never do.
pub fn should_request_change_view(ctx: &ConsensusContext, ticket: &TimerTicket) -> bool {
    ticket.block_index == ctx.block_index()
        && ticket.view_number == ctx.view_number()
        && !ctx.watch_only()
        && !ctx.is_finalized()
        && !ctx.commit_sent()
        && (ctx.is_backup() || ctx.request_sent_or_received())
}
