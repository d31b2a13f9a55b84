//! Building and unpacking RecoveryMessages.
//!
//! A RecoveryMessage is a compacted dump of the sender's votes for one
//! height. Each entry keeps only the fields that differ between senders
//! plus the original envelope signature. The receiver rebuilds every
//! envelope from those fields and feeds it through the normal message path,
//! where the signature either verifies or the entry is dropped. Nothing in a
//! RecoveryMessage is trusted as a unit.

use {
    crate::{
        context::ConsensusContext,
        message::{
            ChangeView, ChangeViewCompact, Commit, CommitCompact, ConsensusMessage, Payload,
            PreparationCompact, PrepareRequest, PrepareResponse, RecoveryMessage, SignedMessage,
        },
        primary::primary_index,
        types::{BlockIndex, ViewNumber},
    },
    solana_hash::Hash,
};

/// Compact the context's votes into a RecoveryMessage.
pub fn make_recovery_message(ctx: &ConsensusContext) -> RecoveryMessage {
    let change_views = (0..ctx.validator_count())
        .filter_map(|i| ctx.change_view_proof(i))
        .filter_map(|vote| {
            let Payload::ChangeView(change_view) = &vote.message.message.payload else {
                return None;
            };
            Some(ChangeViewCompact {
                validator_index: vote.message.validator_index(),
                original_view_number: vote.message.view_number(),
                new_view_number: change_view.new_view_number,
                timestamp: change_view.timestamp,
                reason: change_view.reason,
                invocation: vote.message.signature,
            })
        })
        .collect();

    let prepare_request = ctx
        .preparations()
        .get(ctx.primary_index())
        .and_then(|prep| match &prep.message.message.payload {
            Payload::PrepareRequest(request) => Some(request.clone()),
            _ => None,
        });
    let preparation_hash = if prepare_request.is_some() {
        None
    } else {
        ctx.most_common_preparation_hash()
    };

    let preparations = ctx
        .preparations()
        .iter()
        .map(|(validator_index, prep)| PreparationCompact {
            validator_index,
            invocation: prep.message.signature,
        })
        .collect();

    let commits = ctx
        .commits()
        .iter()
        .map(|(validator_index, commit)| CommitCompact {
            view_number: commit.view_number,
            validator_index,
            signature: commit.block_signature,
            invocation: commit.message.signature,
        })
        .collect();

    RecoveryMessage {
        change_views,
        prepare_request,
        preparation_hash,
        preparations,
        commits,
    }
}

/// Envelopes rebuilt from a RecoveryMessage, grouped in replay order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReplay {
    pub change_views: Vec<SignedMessage>,
    pub prepare_request: Option<SignedMessage>,
    pub prepare_responses: Vec<SignedMessage>,
    pub commits: Vec<SignedMessage>,
}

/// Rebuild the signed envelopes carried by `recovery`, which was sent at
/// `(block_index, view_number)` to a committee of `n` validators.
pub fn unpack_recovery_message(
    block_index: BlockIndex,
    view_number: ViewNumber,
    n: usize,
    recovery: &RecoveryMessage,
) -> RecoveryReplay {
    let primary = primary_index(block_index, view_number, n);

    let change_views = recovery
        .change_views
        .iter()
        .map(|cv| {
            SignedMessage::new(
                ConsensusMessage::new(
                    block_index,
                    cv.validator_index,
                    cv.original_view_number,
                    Payload::ChangeView(ChangeView {
                        new_view_number: cv.new_view_number,
                        timestamp: cv.timestamp,
                        reason: cv.reason,
                    }),
                ),
                cv.invocation,
            )
        })
        .collect();

    let primary_invocation = recovery
        .preparations
        .iter()
        .find(|p| p.validator_index == primary)
        .map(|p| p.invocation);

    let prepare_request = recovery
        .prepare_request
        .as_ref()
        .zip(primary_invocation)
        .map(|(request, invocation)| {
            SignedMessage::new(
                ConsensusMessage::new(
                    block_index,
                    primary,
                    view_number,
                    Payload::PrepareRequest(request.clone()),
                ),
                invocation,
            )
        });

    let preparation_hash: Option<Hash> = match &recovery.prepare_request {
        Some(request) => Some(proposal_hash(request, block_index, primary)),
        None => recovery.preparation_hash,
    };

    let prepare_responses = match preparation_hash {
        Some(preparation_hash) => recovery
            .preparations
            .iter()
            .filter(|p| p.validator_index != primary)
            .map(|p| {
                SignedMessage::new(
                    ConsensusMessage::new(
                        block_index,
                        p.validator_index,
                        view_number,
                        Payload::PrepareResponse(PrepareResponse { preparation_hash }),
                    ),
                    p.invocation,
                )
            })
            .collect(),
        None => Vec::new(),
    };

    let commits = recovery
        .commits
        .iter()
        .map(|c: &CommitCompact| {
            SignedMessage::new(
                ConsensusMessage::new(
                    block_index,
                    c.validator_index,
                    c.view_number,
                    Payload::Commit(Commit {
                        signature: c.signature,
                    }),
                ),
                c.invocation,
            )
        })
        .collect();

    RecoveryReplay {
        change_views,
        prepare_request,
        prepare_responses,
        commits,
    }
}

fn proposal_hash(request: &PrepareRequest, block_index: BlockIndex, primary: u8) -> Hash {
    request.to_proposal(block_index, primary).hash()
}
