//! The dBFT consensus state machine.
//!
//! One engine drives one validator through successive heights. It is fed
//! four kinds of events through a single thread: inbound messages, timer
//! firings, transaction arrivals and externally finalized blocks. Each
//! event returns an [`EngineOutput`] describing what to broadcast, what was
//! finalized and when to fire the timer next.
//!
//! The engine is deterministic given its collaborators. All I/O, key
//! material and time come in through the [`Ledger`], [`TransactionSource`],
//! [`Signer`] and [`Clock`] traits.
//!
//! Message-level problems never surface as errors. A malformed, stale,
//! duplicated or invalid message is logged, optionally recorded as a
//! violation or as evidence, and produces an empty output. Only failures of
//! the signer or the ledger are returned, and they halt the engine until
//! the host reports an externally finalized block.

use {
    crate::{
        collaborators::{Clock, Ledger, Signer, TransactionSource, TransactionVerdict},
        config::DbftConfig,
        context::{ChainTip, ChangeViewVote, CommitVote, ConsensusContext, Preparation, SlotWrite},
        error::{EngineError, PersistError, Result, WireError},
        evidence::{EvidenceCollector, ViolationKind},
        message::{
            commit_sign_data, ChangeView, Commit, ConsensusMessage, DecodeLimits, Payload,
            MessageKind, PrepareRequest, PrepareResponse, RecoveryMessage, RecoveryRequest,
            SignedMessage,
        },
        quorum::{self, CommitCheck, PreparationCheck},
        recovery,
        recovery_log::{RecoveryLog, SavedContext},
        timer::TimerState,
        types::{
            BlockIndex, BlockProposal, ChangeViewReason, ConsensusPhase, FinalizedBlock,
            TimerTicket, ValidatorIndex, ViewChangeCause, ViewNumber, ViewTransition,
        },
        validator_set::ValidatorSet,
    },
    log::*,
    solana_hash::Hash,
    solana_pubkey::Pubkey,
    std::{
        collections::{BTreeMap, HashMap, HashSet, VecDeque},
        time::Duration,
    },
    thiserror::Error,
};

/// Result of processing one event.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EngineOutput {
    /// Messages to broadcast, in order.
    pub messages: Vec<SignedMessage>,
    /// The block finalized while handling the event, already persisted.
    pub finalized_block: Option<FinalizedBlock>,
    /// Fire [`ConsensusEngine::on_timeout`] with this ticket after the
    /// delay, replacing any earlier schedule.
    pub timer: Option<(TimerTicket, Duration)>,
}

impl EngineOutput {
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.finalized_block.is_none() && self.timer.is_none()
    }
}

/// A message for a later height, already authenticated against that
/// height's committee.
#[derive(Debug)]
struct BufferedMessage {
    sender: Pubkey,
    message: SignedMessage,
}

/// Why an envelope failed authentication.
#[derive(Debug, Error)]
enum Rejection {
    #[error("unknown validator index")]
    UnknownSender,
    #[error("cannot be re-encoded: {0}")]
    Unencodable(WireError),
    #[error("invalid signature")]
    BadSignature(Pubkey),
}

/// The dBFT consensus engine for one validator.
pub struct ConsensusEngine {
    config: DbftConfig,
    limits: DecodeLimits,
    ledger: Box<dyn Ledger>,
    transactions: Box<dyn TransactionSource>,
    signer: Box<dyn Signer>,
    clock: Box<dyn Clock>,
    identity: Pubkey,
    /// `None` until [`start`](Self::start).
    context: Option<ConsensusContext>,
    timer: TimerState,
    evidence: EvidenceCollector,
    view_log: VecDeque<ViewTransition>,
    /// Messages for heights not reached yet.
    future: BTreeMap<BlockIndex, Vec<BufferedMessage>>,
    future_len: usize,
    /// Buffered messages per sender, bounded by
    /// `max_buffered_per_validator`.
    future_per_sender: HashMap<Pubkey, usize>,
    recovery_log: Option<Box<dyn RecoveryLog>>,
    /// Hashes of RecoveryRequests already answered at this height.
    answered_recovery: HashSet<Hash>,
    /// Set while replaying the entries of a RecoveryMessage.
    recovering: bool,
    /// Local time the previous block was finalized or received.
    block_received_ms: u64,
    /// Height at which a fatal error stopped participation.
    halted: Option<BlockIndex>,
}

impl ConsensusEngine {
    pub fn new(
        config: DbftConfig,
        ledger: Box<dyn Ledger>,
        transactions: Box<dyn TransactionSource>,
        signer: Box<dyn Signer>,
        clock: Box<dyn Clock>,
    ) -> Self {
        let identity = signer.public_key();
        Self {
            limits: DecodeLimits::from(&config),
            evidence: EvidenceCollector::with_limit(config.max_pending_evidence),
            view_log: VecDeque::with_capacity(config.view_log_capacity),
            config,
            ledger,
            transactions,
            signer,
            clock,
            identity,
            context: None,
            timer: TimerState::new(),
            future: BTreeMap::new(),
            future_len: 0,
            future_per_sender: HashMap::new(),
            recovery_log: None,
            answered_recovery: HashSet::new(),
            recovering: false,
            block_received_ms: 0,
            halted: None,
        }
    }

    /// Persist every local Commit to `log` before it is broadcast, and
    /// resume from it in [`start`](Self::start).
    pub fn with_recovery_log(mut self, log: Box<dyn RecoveryLog>) -> Self {
        self.recovery_log = Some(log);
        self
    }

    // -- Public API --

    /// Begin consensus at the ledger's current height and ask peers for
    /// their state. A Commit saved for this height is reinstated first.
    pub fn start(&mut self) -> Result<EngineOutput> {
        self.run(|engine, out| {
            if engine.context.is_some() {
                return Ok(());
            }
            engine.start_height(out)?;
            engine.restore_saved_commit(out)?;
            engine.request_recovery(out)
        })
    }

    /// Decode and process raw bytes from the transport. Undecodable input
    /// is dropped.
    pub fn handle_wire(&mut self, bytes: &[u8]) -> Result<EngineOutput> {
        match SignedMessage::decode(bytes, &self.limits) {
            Ok(message) => self.on_message(message),
            Err(err) => {
                debug!("Dropping malformed consensus message ({} bytes): {err}", bytes.len());
                self.run(|_, _| Ok(()))
            }
        }
    }

    /// Process a decoded message.
    pub fn on_message(&mut self, message: SignedMessage) -> Result<EngineOutput> {
        self.run(|engine, out| engine.process_message(message, out))
    }

    /// Process a timer firing. Stale tickets are ignored.
    pub fn on_timeout(&mut self, ticket: TimerTicket) -> Result<EngineOutput> {
        self.run(|engine, out| engine.process_timeout(ticket, out))
    }

    /// A transaction became available locally.
    pub fn on_transaction(&mut self, hash: Hash) -> Result<EngineOutput> {
        self.run(|engine, out| engine.process_transaction(hash, out))
    }

    /// The ledger received the block at `height` from outside local
    /// consensus. Abandons the in-flight height and clears a halt, provided
    /// the ledger has moved past that height.
    pub fn on_external_block_finalized(&mut self, height: BlockIndex) -> Result<EngineOutput> {
        if let Some(ctx) = &self.context {
            if height < ctx.block_index() {
                debug!(
                    "Ignoring external block {height}, already at height {}",
                    ctx.block_index()
                );
                return self.run(|_, _| Ok(()));
            }
            if self.ledger.current_height() <= ctx.block_index() {
                warn!(
                    "Ignoring external block {height}: ledger still at height {}",
                    self.ledger.current_height()
                );
                return self.run(|_, _| Ok(()));
            }
            info!(
                "Block {height} finalized externally, abandoning height {} view {}",
                ctx.block_index(),
                ctx.view_number()
            );
        }
        self.halted = None;
        self.run(|engine, out| {
            engine.block_received_ms = engine.clock.now_ms();
            engine.start_height(out)
        })
    }

    // -- Accessors --

    pub fn context(&self) -> Option<&ConsensusContext> {
        self.context.as_ref()
    }

    pub fn phase(&self) -> ConsensusPhase {
        if self.halted.is_some() {
            return ConsensusPhase::Halted;
        }
        self.context
            .as_ref()
            .map_or(ConsensusPhase::Initial, ConsensusContext::phase)
    }

    pub fn block_index(&self) -> Option<BlockIndex> {
        self.context.as_ref().map(ConsensusContext::block_index)
    }

    pub fn view_number(&self) -> Option<ViewNumber> {
        self.context.as_ref().map(ConsensusContext::view_number)
    }

    pub fn identity(&self) -> &Pubkey {
        &self.identity
    }

    pub fn config(&self) -> &DbftConfig {
        &self.config
    }

    pub fn evidence(&self) -> &EvidenceCollector {
        &self.evidence
    }

    pub fn evidence_mut(&mut self) -> &mut EvidenceCollector {
        &mut self.evidence
    }

    /// View changes so far, oldest first.
    pub fn view_log(&self) -> &VecDeque<ViewTransition> {
        &self.view_log
    }

    pub fn is_halted(&self) -> bool {
        self.halted.is_some()
    }

    /// Timer ticket currently armed, if any.
    pub fn armed_timer(&self) -> Option<TimerTicket> {
        self.timer.armed()
    }

    // -- Event plumbing --

    fn run(
        &mut self,
        f: impl FnOnce(&mut Self, &mut EngineOutput) -> Result<()>,
    ) -> Result<EngineOutput> {
        if let Some(height) = self.halted {
            return Err(EngineError::Halted(height));
        }
        let mut out = EngineOutput::default();
        match f(self, &mut out) {
            Ok(()) => Ok(out),
            Err(err) => {
                let height = self.context.as_ref().map_or(0, ConsensusContext::block_index);
                error!("Halting consensus at height {height}: {err}");
                self.halted = Some(height);
                self.timer.cancel();
                Err(err)
            }
        }
    }

    fn ctx(&self) -> Option<&ConsensusContext> {
        self.context.as_ref()
    }

    fn now(&self) -> u64 {
        self.clock.now_ms()
    }

    // -- Heights and views --

    /// Create the context for the ledger's current height and replay any
    /// messages buffered for it.
    fn start_height(&mut self, out: &mut EngineOutput) -> Result<()> {
        let height = self.ledger.current_height();
        if let Some(previous) = &self.context {
            if previous.is_finalized() && height <= previous.block_index() {
                return Err(PersistError {
                    block_index: previous.block_index(),
                    reason: "ledger height did not advance after persist".to_string(),
                }
                .into());
            }
        }
        let validators = self.ledger.validators_for(height);
        if validators.len() > self.config.max_validators {
            return Err(EngineError::ValidatorSet {
                height,
                reason: format!(
                    "{} validators exceeds the configured maximum {}",
                    validators.len(),
                    self.config.max_validators
                ),
            });
        }

        let tip = ChainTip {
            block_index: height,
            prev_hash: self.ledger.previous_hash(),
            prev_timestamp: self.ledger.previous_timestamp(),
            version: self.config.block_version,
        };
        let now = self.now();
        let previous = self.context.take();
        let ctx = ConsensusContext::new(tip, validators, &self.identity, previous.as_ref(), now);
        info!(
            "Starting height {height}: n={} f={} primary={} my_index={:?}",
            ctx.validator_count(),
            ctx.f(),
            ctx.primary_index(),
            ctx.my_index()
        );
        self.context = Some(ctx);
        self.answered_recovery.clear();
        self.evidence
            .prune(height.saturating_sub(self.config.evidence_retention_heights));

        self.enter_role(out)?;
        self.replay_future(height, out)
    }

    /// Arm timers (or propose) for the role held in the current view.
    fn enter_role(&mut self, out: &mut EngineOutput) -> Result<()> {
        let Some(ctx) = self.ctx() else {
            return Ok(());
        };
        if ctx.watch_only() {
            self.timer.cancel();
            return Ok(());
        }
        let view = ctx.view_number();
        if ctx.is_primary() {
            if view == 0 {
                let elapsed = self.now().saturating_sub(self.block_received_ms);
                let delay = self.config.block_time_ms.saturating_sub(elapsed);
                self.arm_timer(delay, out);
            } else if self.recovering {
                self.arm_timer(self.config.view_timeout_ms(view), out);
            } else {
                self.send_prepare_request(out)?;
            }
        } else {
            self.arm_timer(self.config.view_timeout_ms(view), out);
        }
        Ok(())
    }

    fn change_view_to(&mut self, view: ViewNumber, cause: ViewChangeCause, out: &mut EngineOutput) -> Result<()> {
        let now = self.now();
        let Some(ctx) = self.context.as_mut() else {
            return Ok(());
        };
        let transition = ViewTransition {
            block_index: ctx.block_index(),
            from_view: ctx.view_number(),
            to_view: view,
            cause,
            at_ms: now,
        };
        info!(
            "View change at height {}: {} -> {} ({cause})",
            transition.block_index, transition.from_view, transition.to_view
        );
        ctx.enter_view(view);
        if self.config.view_log_capacity > 0 {
            if self.view_log.len() >= self.config.view_log_capacity {
                self.view_log.pop_front();
            }
            self.view_log.push_back(transition);
        }
        self.enter_role(out)
    }

    fn replay_future(&mut self, height: BlockIndex, out: &mut EngineOutput) -> Result<()> {
        let stale: Vec<BlockIndex> = self.future.range(..height).map(|(h, _)| *h).collect();
        for h in stale {
            if let Some(dropped) = self.future.remove(&h) {
                self.unbuffer(&dropped);
            }
        }
        let Some(messages) = self.future.remove(&height) else {
            return Ok(());
        };
        self.unbuffer(&messages);
        debug!("Replaying {} buffered messages for height {height}", messages.len());
        for buffered in messages {
            self.process_message(buffered.message, out)?;
        }
        Ok(())
    }

    /// Hold a message for a later height. Only messages that authenticate
    /// against that height's committee are kept, and each sender gets a
    /// bounded share of the buffer.
    fn buffer_future(&mut self, message: SignedMessage) {
        let Some(ctx) = self.ctx() else {
            return;
        };
        let height = message.block_index();
        let horizon = ctx
            .block_index()
            .saturating_add(self.config.max_future_heights);
        if height > horizon || self.future_len >= self.config.max_buffered_messages {
            debug!("Dropping {} for height {height} beyond buffer limits", message.kind());
            return;
        }
        let validators = self.ledger.validators_for(height);
        let sender = match self.authenticate(&validators, &message) {
            Ok(pubkey) => pubkey,
            Err(rejection) => {
                debug!(
                    "Dropping {} for height {height} from validator {}: {rejection}",
                    message.kind(),
                    message.validator_index()
                );
                return;
            }
        };
        let count = self.future_per_sender.entry(sender).or_insert(0);
        if *count >= self.config.max_buffered_per_validator {
            debug!(
                "Dropping {} for height {height}: validator {} has {} messages buffered",
                message.kind(),
                message.validator_index(),
                *count
            );
            return;
        }
        *count = count.saturating_add(1);
        self.future
            .entry(height)
            .or_default()
            .push(BufferedMessage { sender, message });
        self.future_len = self.future_len.saturating_add(1);
    }

    fn unbuffer(&mut self, removed: &[BufferedMessage]) {
        self.future_len = self.future_len.saturating_sub(removed.len());
        for buffered in removed {
            if let Some(count) = self.future_per_sender.get_mut(&buffered.sender) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    self.future_per_sender.remove(&buffered.sender);
                }
            }
        }
    }

    /// Resolve the sender of `message` in `validators` and check its
    /// envelope signature.
    fn authenticate(
        &self,
        validators: &ValidatorSet,
        message: &SignedMessage,
    ) -> std::result::Result<Pubkey, Rejection> {
        let pubkey = validators
            .get(message.validator_index())
            .copied()
            .ok_or(Rejection::UnknownSender)?;
        let signed_bytes = message
            .message
            .sign_data(self.config.network_magic)
            .map_err(Rejection::Unencodable)?;
        if self.signer.verify(&pubkey, &signed_bytes, &message.signature) {
            Ok(pubkey)
        } else {
            Err(Rejection::BadSignature(pubkey))
        }
    }

    // -- Timers --

    fn arm_timer(&mut self, delay_ms: u64, out: &mut EngineOutput) {
        let Some(ctx) = self.ctx() else {
            return;
        };
        let ticket = TimerTicket {
            block_index: ctx.block_index(),
            view_number: ctx.view_number(),
        };
        let now = self.now();
        out.timer = Some(self.timer.arm(ticket, now, delay_ms));
    }

    /// Give slow peers more time while the view is making progress.
    fn extend_timer(&mut self, max_delay_in_block_times: u64, out: &mut EngineOutput) {
        let Some(ctx) = self.ctx() else {
            return;
        };
        if ctx.watch_only() || ctx.view_changing() || ctx.commit_sent() {
            return;
        }
        let m = u64::try_from(ctx.m()).unwrap_or(u64::MAX).max(1);
        let extra = max_delay_in_block_times
            .saturating_mul(self.config.block_time_ms)
            .checked_div(m)
            .unwrap_or(0);
        let now = self.now();
        if let Some(schedule) = self.timer.extend(now, extra) {
            out.timer = Some(schedule);
        }
    }

    fn process_timeout(&mut self, ticket: TimerTicket, out: &mut EngineOutput) -> Result<()> {
        if !self.timer.fire(&ticket) {
            debug!("Ignoring stale timer {ticket:?}");
            return Ok(());
        }
        let Some(ctx) = self.ctx() else {
            return Ok(());
        };
        if ticket.block_index != ctx.block_index() || ticket.view_number != ctx.view_number() {
            debug!("Ignoring timer {ticket:?} for a previous view");
            return Ok(());
        }
        if ctx.watch_only() || ctx.is_finalized() {
            return Ok(());
        }
        trace!("Timer fired at height {} view {}", ticket.block_index, ticket.view_number);

        if ctx.is_primary() && !ctx.request_sent_or_received() {
            return self.send_prepare_request(out);
        }
        if ctx.commit_sent() {
            debug!("Re-broadcasting recovery state while committed");
            self.send_recovery_message(out)?;
            self.arm_timer(self.config.view_timeout_ms(0), out);
            return Ok(());
        }
        if quorum::should_request_change_view(ctx, &ticket) {
            let reason = if ctx.missing_transactions().is_empty() {
                ChangeViewReason::Timeout
            } else {
                ChangeViewReason::TxNotFound
            };
            self.request_change_view(reason, out)?;
        }
        Ok(())
    }

    // -- Outbound messages --

    fn sign_payload(&self, payload: Payload) -> Result<SignedMessage> {
        let Some(ctx) = self.ctx() else {
            return Err(EngineError::Encode("no active height".to_string()));
        };
        let Some(my_index) = ctx.my_index() else {
            return Err(EngineError::Encode("watch-only node cannot sign".to_string()));
        };
        let message = ConsensusMessage::new(ctx.block_index(), my_index, ctx.view_number(), payload);
        let data = message
            .sign_data(self.config.network_magic)
            .map_err(|err| EngineError::Encode(err.to_string()))?;
        let signature = self.signer.sign(&data)?;
        Ok(SignedMessage::new(message, signature))
    }

    fn send_prepare_request(&mut self, out: &mut EngineOutput) -> Result<()> {
        let now = self.now();
        let Some(ctx) = self.ctx() else {
            return Ok(());
        };
        let Some(my_index) = ctx.my_index() else {
            return Ok(());
        };
        if ctx.request_sent_or_received() || ctx.commit_sent() {
            return Ok(());
        }

        let max = self.config.max_transactions_per_block;
        let mut seen = HashSet::new();
        let transaction_hashes: Vec<Hash> = self
            .transactions
            .select_transactions(max)
            .into_iter()
            .filter(|h| seen.insert(*h))
            .take(max)
            .collect();

        let Some(ctx) = self.ctx() else {
            return Ok(());
        };
        let proposal = BlockProposal {
            version: ctx.tip().version,
            prev_hash: ctx.tip().prev_hash,
            block_index: ctx.block_index(),
            primary_index: my_index,
            timestamp: now.max(ctx.tip().prev_timestamp.saturating_add(1)),
            nonce: rand::random::<u64>(),
            transaction_hashes,
        };
        let preparation_hash = proposal.hash();
        let message = self.sign_payload(Payload::PrepareRequest(PrepareRequest::from(&proposal)))?;
        info!(
            "Sending PrepareRequest: height={} view={} txs={} hash={preparation_hash}",
            proposal.block_index,
            message.view_number(),
            proposal.transaction_hashes.len()
        );

        let view = message.view_number();
        if let Some(ctx) = self.context.as_mut() {
            ctx.set_proposal(proposal);
            ctx.preparations.record(
                my_index,
                Preparation {
                    preparation_hash,
                    message: message.clone(),
                },
            );
        }
        self.reconcile_with_proposal(preparation_hash);
        out.messages.push(message);
        self.arm_timer(self.config.primary_timeout_ms(view), out);
        self.check_preparations(out)
    }

    fn send_prepare_response(&mut self, out: &mut EngineOutput) -> Result<()> {
        let Some(ctx) = self.ctx() else {
            return Ok(());
        };
        let (Some(my_index), Some(preparation_hash)) = (ctx.my_index(), ctx.preparation_hash()) else {
            return Ok(());
        };
        if ctx.is_primary() || ctx.response_sent() || ctx.commit_sent() {
            return Ok(());
        }
        self.extend_timer(2, out);
        let message = self.sign_payload(Payload::PrepareResponse(PrepareResponse { preparation_hash }))?;
        info!(
            "Sending PrepareResponse: height={} view={} hash={preparation_hash}",
            message.block_index(),
            message.view_number()
        );
        if let Some(ctx) = self.context.as_mut() {
            ctx.preparations.record(
                my_index,
                Preparation {
                    preparation_hash,
                    message: message.clone(),
                },
            );
        }
        out.messages.push(message);
        Ok(())
    }

    fn request_change_view(&mut self, reason: ChangeViewReason, out: &mut EngineOutput) -> Result<()> {
        let now = self.now();
        let Some(ctx) = self.ctx() else {
            return Ok(());
        };
        let Some(my_index) = ctx.my_index() else {
            return Ok(());
        };
        if ctx.commit_sent() {
            return Ok(());
        }
        let Some(target) = ctx.view_number().checked_add(1) else {
            warn!("View number exhausted at height {}", ctx.block_index());
            return self.request_recovery(out);
        };
        self.arm_timer(self.config.view_timeout_ms(target), out);

        let Some(ctx) = self.ctx() else {
            return Ok(());
        };
        if ctx.more_than_f_committed_or_lost() {
            info!(
                "Requesting recovery instead of view change: committed={} lost={}",
                ctx.count_committed(),
                ctx.count_failed()
            );
            return self.request_recovery(out);
        }

        // Re-send an identical vote rather than signing a fresh one.
        if let Some(existing) = ctx.change_view_of(my_index) {
            if existing.new_view_number == target {
                out.messages.push(existing.message.clone());
                return self.check_expected_view(target, out);
            }
        }

        let message = self.sign_payload(Payload::ChangeView(ChangeView {
            new_view_number: target,
            timestamp: now,
            reason,
        }))?;
        info!(
            "Requesting view change: height={} view={} -> {target} ({reason})",
            message.block_index(),
            message.view_number()
        );
        if let Some(ctx) = self.context.as_mut() {
            ctx.record_change_view(
                my_index,
                ChangeViewVote {
                    new_view_number: target,
                    message: message.clone(),
                },
            );
        }
        out.messages.push(message);
        self.check_expected_view(target, out)
    }

    fn request_recovery(&mut self, out: &mut EngineOutput) -> Result<()> {
        if self.ctx().map_or(true, ConsensusContext::watch_only) {
            return Ok(());
        }
        let message = self.sign_payload(Payload::RecoveryRequest(RecoveryRequest {
            timestamp: self.now(),
        }))?;
        debug!("Sending RecoveryRequest at height {}", message.block_index());
        out.messages.push(message);
        Ok(())
    }

    fn send_recovery_message(&mut self, out: &mut EngineOutput) -> Result<()> {
        let Some(ctx) = self.ctx() else {
            return Ok(());
        };
        if ctx.watch_only() {
            return Ok(());
        }
        let recovery = recovery::make_recovery_message(ctx);
        let message = self.sign_payload(Payload::RecoveryMessage(recovery))?;
        debug!(
            "Sending RecoveryMessage: height={} view={}",
            message.block_index(),
            message.view_number()
        );
        out.messages.push(message);
        Ok(())
    }

    // -- Inbound dispatch --

    fn process_message(&mut self, message: SignedMessage, out: &mut EngineOutput) -> Result<()> {
        let Some(ctx) = self.ctx() else {
            debug!("Dropping {} before start", message.kind());
            return Ok(());
        };
        if message.block_index() < ctx.block_index() {
            debug!(
                "Dropping stale {} for height {} (at {})",
                message.kind(),
                message.block_index(),
                ctx.block_index()
            );
            return Ok(());
        }
        if message.block_index() > ctx.block_index() {
            self.buffer_future(message);
            return Ok(());
        }

        let sender = message.validator_index();
        let pubkey = match self.authenticate(ctx.validators(), &message) {
            Ok(pubkey) => pubkey,
            Err(Rejection::BadSignature(pubkey)) => {
                warn!("Invalid signature on {} from validator {sender}", message.kind());
                self.evidence
                    .record_violation(pubkey, ViolationKind::InvalidSignature);
                return Ok(());
            }
            Err(rejection) => {
                debug!("Dropping {} from validator {sender}: {rejection}", message.kind());
                return Ok(());
            }
        };
        trace!(
            "Processing {} from {sender}: height={} view={}",
            message.kind(),
            message.block_index(),
            message.view_number()
        );

        let now = self.now();
        if let Some(ctx) = self.context.as_mut() {
            // A committed node ignores ChangeViews, so they do not count as
            // liveness either.
            if !(ctx.commit_sent() && message.kind() == MessageKind::ChangeView) {
                ctx.touch(sender, message.block_index(), now);
            }
        }
        if pubkey != self.identity {
            self.evidence.check_and_record(pubkey, &message);
        }

        match &message.message.payload {
            Payload::ChangeView(change_view) => {
                let change_view = change_view.clone();
                self.on_change_view(pubkey, &message, change_view, out)
            }
            Payload::PrepareRequest(request) => {
                let request = request.clone();
                self.on_prepare_request(pubkey, &message, request, out)
            }
            Payload::PrepareResponse(response) => {
                let preparation_hash = response.preparation_hash;
                self.on_prepare_response(pubkey, &message, preparation_hash, out)
            }
            Payload::Commit(commit) => {
                let signature = commit.signature;
                self.on_commit(pubkey, &message, signature, out)
            }
            Payload::RecoveryRequest(_) => self.on_recovery_request(&message, out),
            Payload::RecoveryMessage(recovery) => {
                let recovery = recovery.clone();
                self.on_recovery_message(pubkey, &message, &recovery, out)
            }
        }
    }

    fn on_change_view(
        &mut self,
        pubkey: Pubkey,
        message: &SignedMessage,
        change_view: ChangeView,
        out: &mut EngineOutput,
    ) -> Result<()> {
        if change_view.new_view_number <= message.view_number() {
            warn!(
                "ChangeView from {} targets view {} from view {}",
                message.validator_index(),
                change_view.new_view_number,
                message.view_number()
            );
            self.evidence
                .record_violation(pubkey, ViolationKind::InvalidChangeView);
            return Ok(());
        }
        let Some(ctx) = self.ctx() else {
            return Ok(());
        };
        if change_view.new_view_number <= ctx.view_number() {
            return self.on_recovery_request(message, out);
        }
        if ctx.commit_sent() {
            debug!("Ignoring ChangeView from {} after commit", message.validator_index());
            return Ok(());
        }
        let recorded = self.context.as_mut().is_some_and(|ctx| {
            ctx.record_change_view(
                message.validator_index(),
                ChangeViewVote {
                    new_view_number: change_view.new_view_number,
                    message: message.clone(),
                },
            )
        });
        if !recorded {
            debug!(
                "Ignoring ChangeView from {} for view {}: not above its previous target",
                message.validator_index(),
                change_view.new_view_number
            );
            return Ok(());
        }
        self.check_expected_view(change_view.new_view_number, out)
    }

    /// Advance the view if recorded ChangeView targets justify it.
    fn check_expected_view(&mut self, target: ViewNumber, out: &mut EngineOutput) -> Result<()> {
        let Some(ctx) = self.ctx() else {
            return Ok(());
        };
        if ctx.view_number() >= target || ctx.commit_sent() {
            return Ok(());
        }
        let Some((view, cause)) =
            quorum::should_advance_view(&ctx.change_view_targets(), ctx.view_number(), ctx.validator_count())
        else {
            return Ok(());
        };

        if let Some(my_index) = ctx.my_index() {
            let mine = ctx.change_view_of(my_index).map(|vote| vote.new_view_number);
            if mine.map_or(true, |v| v < view) {
                let message = self.sign_payload(Payload::ChangeView(ChangeView {
                    new_view_number: view,
                    timestamp: self.now(),
                    reason: ChangeViewReason::ChangeAgreement,
                }))?;
                if let Some(ctx) = self.context.as_mut() {
                    ctx.record_change_view(
                        my_index,
                        ChangeViewVote {
                            new_view_number: view,
                            message: message.clone(),
                        },
                    );
                }
                out.messages.push(message);
            }
        }
        self.change_view_to(view, cause, out)
    }

    fn on_prepare_request(
        &mut self,
        pubkey: Pubkey,
        message: &SignedMessage,
        request: PrepareRequest,
        out: &mut EngineOutput,
    ) -> Result<()> {
        let now = self.now();
        let Some(ctx) = self.ctx() else {
            return Ok(());
        };
        let sender = message.validator_index();
        if message.view_number() != ctx.view_number() {
            debug!(
                "Ignoring PrepareRequest for view {} (at view {})",
                message.view_number(),
                ctx.view_number()
            );
            return Ok(());
        }
        if sender != ctx.primary_index() {
            warn!(
                "PrepareRequest from {sender}, expected primary {}",
                ctx.primary_index()
            );
            self.evidence
                .record_violation(pubkey, ViolationKind::WrongPrimary);
            return Ok(());
        }
        if ctx.request_sent_or_received() || ctx.commit_sent() {
            // A second proposal only marks the primary's slot conflicting.
            let write = self.context.as_mut().map(|ctx| {
                let preparation_hash = request.to_proposal(ctx.block_index(), sender).hash();
                ctx.preparations.record(
                    sender,
                    Preparation {
                        preparation_hash,
                        message: message.clone(),
                    },
                )
            });
            if write == Some(SlotWrite::Conflict) {
                warn!("Conflicting PrepareRequest from {sender}");
            }
            return Ok(());
        }
        if ctx.not_accepting_payloads_due_to_view_changing() {
            debug!("Refusing PrepareRequest while changing view");
            return Ok(());
        }
        if let Err(reason) = self.validate_request(ctx, &request, now) {
            warn!("Refusing PrepareRequest from {sender}: {reason}");
            self.evidence
                .record_violation(pubkey, ViolationKind::InvalidProposal);
            return Ok(());
        }

        self.extend_timer(2, out);
        let Some(ctx) = self.context.as_mut() else {
            return Ok(());
        };
        let proposal = request.to_proposal(ctx.block_index(), sender);
        let preparation_hash = proposal.hash();
        info!(
            "Accepted PrepareRequest: height={} view={} txs={} hash={preparation_hash}",
            ctx.block_index(),
            ctx.view_number(),
            proposal.transaction_hashes.len()
        );
        ctx.set_proposal(proposal);
        ctx.preparations.record(
            sender,
            Preparation {
                preparation_hash,
                message: message.clone(),
            },
        );
        self.reconcile_with_proposal(preparation_hash);
        self.verify_proposal_transactions(out)
    }

    fn validate_request(
        &self,
        ctx: &ConsensusContext,
        request: &PrepareRequest,
        now: u64,
    ) -> std::result::Result<(), &'static str> {
        let tip = ctx.tip();
        if request.version != tip.version {
            return Err("version mismatch");
        }
        if request.prev_hash != tip.prev_hash {
            return Err("previous hash mismatch");
        }
        if request.timestamp <= tip.prev_timestamp {
            return Err("timestamp not after previous block");
        }
        if request.timestamp > self.config.max_proposal_timestamp(now) {
            return Err("timestamp too far in the future");
        }
        if request.transaction_hashes.len() > self.config.max_transactions_per_block {
            return Err("too many transactions");
        }
        let mut seen = HashSet::with_capacity(request.transaction_hashes.len());
        if !request.transaction_hashes.iter().all(|h| seen.insert(*h)) {
            return Err("duplicate transaction");
        }
        Ok(())
    }

    /// Drop tentatively stored votes that do not match the newly accepted
    /// proposal, and verify stored commits for this view against it.
    fn reconcile_with_proposal(&mut self, preparation_hash: Hash) {
        let magic = self.config.network_magic;
        let Some(ctx) = self.context.as_ref() else {
            return;
        };
        let mismatched: Vec<ValidatorIndex> = ctx
            .preparations()
            .iter()
            .filter(|(_, prep)| prep.preparation_hash != preparation_hash)
            .map(|(i, _)| i)
            .collect();
        let view = ctx.view_number();
        let bad_commits: Vec<ValidatorIndex> = ctx
            .commits()
            .iter()
            .filter(|(_, c)| c.view_number == view && !c.verified)
            .filter(|(i, c)| {
                !quorum::verify_commit_signature(
                    ctx,
                    self.signer.as_ref(),
                    magic,
                    *i,
                    &preparation_hash,
                    &c.block_signature,
                )
            })
            .map(|(i, _)| i)
            .collect();

        let Some(ctx) = self.context.as_mut() else {
            return;
        };
        for index in mismatched {
            ctx.preparations.clear(index);
            if let Some(pubkey) = ctx.validators().get(index).copied() {
                warn!("Discarding PrepareResponse from {index}: bound to another proposal");
                self.evidence
                    .record_violation(pubkey, ViolationKind::PreparationHashMismatch);
            }
        }
        for index in bad_commits {
            ctx.commits.clear(index);
            if let Some(pubkey) = ctx.validators().get(index).copied() {
                warn!("Discarding Commit from {index}: signature does not match proposal");
                self.evidence
                    .record_violation(pubkey, ViolationKind::InvalidCommitSignature);
            }
        }
        let pending: Vec<ValidatorIndex> = ctx
            .commits()
            .iter()
            .filter(|(_, c)| c.view_number == view && !c.verified)
            .map(|(i, _)| i)
            .collect();
        for index in pending {
            if let Some(commit) = ctx.commits.get_mut(index) {
                commit.verified = true;
            }
        }
    }

    /// Ask the transaction source about the proposal and respond, wait, or
    /// leave the view depending on its verdict.
    fn verify_proposal_transactions(&mut self, out: &mut EngineOutput) -> Result<()> {
        let Some(hashes) = self
            .ctx()
            .and_then(ConsensusContext::proposal)
            .map(|p| p.transaction_hashes.clone())
        else {
            return Ok(());
        };
        match self.transactions.verify_transactions(&hashes) {
            Ok(()) => {
                if let Some(ctx) = self.context.as_mut() {
                    ctx.missing_transactions.clear();
                }
                self.send_prepare_response(out)?;
                self.check_preparations(out)
            }
            Err(TransactionVerdict::NotFound(missing)) => {
                let Some(ctx) = self.context.as_mut() else {
                    return Ok(());
                };
                let wanted: HashSet<Hash> = hashes.iter().copied().collect();
                ctx.missing_transactions = missing.into_iter().filter(|h| wanted.contains(h)).collect();
                if ctx.missing_transactions.is_empty() {
                    self.send_prepare_response(out)?;
                    return self.check_preparations(out);
                }
                info!(
                    "Waiting for {} missing transactions at height {}",
                    ctx.missing_transactions.len(),
                    ctx.block_index()
                );
                Ok(())
            }
            Err(verdict) => {
                warn!("Proposal refused: {verdict}");
                let reason = match verdict {
                    TransactionVerdict::RejectedByPolicy => ChangeViewReason::TxRejectedByPolicy,
                    TransactionVerdict::BlockRejectedByPolicy => ChangeViewReason::BlockRejectedByPolicy,
                    TransactionVerdict::Invalid | TransactionVerdict::NotFound(_) => ChangeViewReason::TxInvalid,
                };
                if let Some(ctx) = self.context.as_mut() {
                    ctx.reject_proposal();
                }
                self.request_change_view(reason, out)
            }
        }
    }

    fn process_transaction(&mut self, hash: Hash, out: &mut EngineOutput) -> Result<()> {
        let Some(ctx) = self.context.as_mut() else {
            return Ok(());
        };
        if !ctx.missing_transactions.remove(&hash) {
            return Ok(());
        }
        if !ctx.missing_transactions.is_empty() || ctx.response_sent() {
            return Ok(());
        }
        debug!("All proposal transactions available at height {}", ctx.block_index());
        self.verify_proposal_transactions(out)
    }

    fn on_prepare_response(
        &mut self,
        pubkey: Pubkey,
        message: &SignedMessage,
        preparation_hash: Hash,
        out: &mut EngineOutput,
    ) -> Result<()> {
        let Some(ctx) = self.ctx() else {
            return Ok(());
        };
        let sender = message.validator_index();
        if message.view_number() != ctx.view_number() {
            debug!(
                "Ignoring PrepareResponse for view {} (at view {})",
                message.view_number(),
                ctx.view_number()
            );
            return Ok(());
        }
        if sender == ctx.primary_index() {
            warn!("PrepareResponse from primary {sender}");
            self.evidence
                .record_violation(pubkey, ViolationKind::WrongPrimary);
            return Ok(());
        }
        if ctx.not_accepting_payloads_due_to_view_changing() {
            debug!("Refusing PrepareResponse while changing view");
            return Ok(());
        }
        match quorum::check_preparation(ctx, sender, &preparation_hash) {
            PreparationCheck::Duplicate => {
                debug!("Duplicate PrepareResponse from {sender}");
                return Ok(());
            }
            PreparationCheck::HashMismatch => {
                warn!("PrepareResponse from {sender} does not match the active proposal");
                self.evidence
                    .record_violation(pubkey, ViolationKind::PreparationHashMismatch);
                return Ok(());
            }
            PreparationCheck::AlreadyPrepared => {
                warn!("Conflicting PrepareResponse from {sender}");
                if let Some(ctx) = self.context.as_mut() {
                    ctx.preparations.record(
                        sender,
                        Preparation {
                            preparation_hash,
                            message: message.clone(),
                        },
                    );
                }
                return Ok(());
            }
            PreparationCheck::Accept => {}
        }

        let Some(ctx) = self.context.as_mut() else {
            return Ok(());
        };
        ctx.preparations.record(
            sender,
            Preparation {
                preparation_hash,
                message: message.clone(),
            },
        );
        if ctx.watch_only() || ctx.commit_sent() {
            return Ok(());
        }
        let request_known = ctx.request_sent_or_received();
        self.extend_timer(2, out);
        if request_known {
            self.check_preparations(out)?;
        }
        Ok(())
    }

    /// Commit once `M` preparations agree and every transaction is present.
    /// A proposal the transaction source refused is never committed.
    fn check_preparations(&mut self, out: &mut EngineOutput) -> Result<()> {
        let Some(ctx) = self.ctx() else {
            return Ok(());
        };
        let Some(block_hash) = ctx.preparation_hash() else {
            return Ok(());
        };
        if !ctx.has_preparation_quorum()
            || !ctx.missing_transactions().is_empty()
            || ctx.proposal_rejected()
        {
            return Ok(());
        }
        if let (Some(my_index), false) = (ctx.my_index(), ctx.commit_sent()) {
            let block_signature = self
                .signer
                .sign(&commit_sign_data(self.config.network_magic, &block_hash))?;
            let message = self.sign_payload(Payload::Commit(Commit {
                signature: block_signature,
            }))?;
            self.save_commit(&message)?;
            info!(
                "Sending Commit: height={} view={} hash={block_hash}",
                message.block_index(),
                message.view_number()
            );
            if let Some(ctx) = self.context.as_mut() {
                ctx.commits.record(
                    my_index,
                    CommitVote {
                        view_number: message.view_number(),
                        block_signature,
                        verified: true,
                        message: message.clone(),
                    },
                );
            }
            out.messages.push(message);
            self.arm_timer(self.config.block_time_ms, out);
        }
        self.check_commits(out)
    }

    fn on_commit(
        &mut self,
        pubkey: Pubkey,
        message: &SignedMessage,
        block_signature: solana_signature::Signature,
        out: &mut EngineOutput,
    ) -> Result<()> {
        let Some(ctx) = self.ctx() else {
            return Ok(());
        };
        let sender = message.validator_index();
        let view = message.view_number();
        let check = quorum::check_commit(
            ctx,
            self.signer.as_ref(),
            self.config.network_magic,
            sender,
            view,
            &block_signature,
        );
        let vote = CommitVote {
            view_number: view,
            block_signature,
            verified: check == CommitCheck::Verified,
            message: message.clone(),
        };
        match check {
            CommitCheck::Duplicate => {
                debug!("Duplicate Commit from {sender}");
                Ok(())
            }
            CommitCheck::AlreadyCommitted => {
                warn!("Conflicting Commit from {sender}");
                if let Some(ctx) = self.context.as_mut() {
                    ctx.commits.record(sender, vote);
                }
                Ok(())
            }
            CommitCheck::InvalidSignature => {
                warn!("Commit from {sender} does not sign the active proposal");
                self.evidence
                    .record_violation(pubkey, ViolationKind::InvalidCommitSignature);
                Ok(())
            }
            CommitCheck::Unverified => {
                if let Some(ctx) = self.context.as_mut() {
                    ctx.commits.record(sender, vote);
                }
                if view == self.ctx().map_or(view, ConsensusContext::view_number) {
                    self.extend_timer(4, out);
                }
                self.check_commit_fast_forward(out)
            }
            CommitCheck::Verified => {
                if let Some(ctx) = self.context.as_mut() {
                    ctx.commits.record(sender, vote);
                }
                self.extend_timer(4, out);
                self.check_commits(out)
            }
        }
    }

    /// Move straight to a higher view in which `f + 1` validators already
    /// committed.
    fn check_commit_fast_forward(&mut self, out: &mut EngineOutput) -> Result<()> {
        let Some(ctx) = self.ctx() else {
            return Ok(());
        };
        if ctx.commit_sent() {
            return Ok(());
        }
        let views: Vec<ViewNumber> = ctx.commits().iter().map(|(_, c)| c.view_number).collect();
        let Some(view) =
            quorum::commit_fast_forward_target(&views, ctx.view_number(), ctx.validator_count())
        else {
            return Ok(());
        };
        let was_recovering = std::mem::replace(&mut self.recovering, true);
        let result = self.change_view_to(view, ViewChangeCause::CommitFastForward, out);
        self.recovering = was_recovering;
        result?;
        self.request_recovery(out)
    }

    /// Finalize once `M` verified commits for the current view are known.
    fn check_commits(&mut self, out: &mut EngineOutput) -> Result<()> {
        let Some(ctx) = self.ctx() else {
            return Ok(());
        };
        if ctx.is_finalized() || !ctx.has_commit_quorum() {
            return Ok(());
        }
        let Some(proposal) = ctx.proposal().cloned() else {
            return Ok(());
        };
        let view = ctx.view_number();
        let witness: Vec<(ValidatorIndex, solana_signature::Signature)> = ctx
            .commits()
            .iter()
            .filter(|(_, c)| c.view_number == view && c.verified)
            .map(|(i, c)| (i, c.block_signature))
            .take(ctx.m())
            .collect();
        let block = FinalizedBlock {
            proposal,
            view_number: view,
            witness,
        };
        info!(
            "Finalized block: height={} view={} hash={} signatures={}",
            block.block_index(),
            view,
            block.hash(),
            block.witness.len()
        );
        if let Some(ctx) = self.context.as_mut() {
            ctx.set_finalized();
        }
        self.timer.cancel();
        self.ledger.persist(&block)?;
        self.block_received_ms = self.now();
        out.finalized_block = Some(block);
        self.start_height(out)
    }

    // -- Recovery --

    fn on_recovery_request(&mut self, message: &SignedMessage, out: &mut EngineOutput) -> Result<()> {
        let Some(ctx) = self.ctx() else {
            return Ok(());
        };
        let Some(my_index) = ctx.my_index() else {
            return Ok(());
        };
        let Ok(hash) = message.hash() else {
            return Ok(());
        };
        if self.answered_recovery.contains(&hash) {
            debug!("Already answered recovery request {hash}");
            return Ok(());
        }
        if !ctx.commit_sent() {
            let n = ctx.validator_count();
            let sender = usize::from(message.validator_index());
            // Only the f + 1 validators after the sender answer.
            let chosen = (1..=ctx.f().saturating_add(1))
                .any(|i| sender.saturating_add(i).checked_rem(n) == Some(usize::from(my_index)));
            if !chosen || !has_progress(ctx) {
                return Ok(());
            }
        }
        if self.answered_recovery.len() >= self.config.max_buffered_messages {
            self.answered_recovery.clear();
        }
        self.answered_recovery.insert(hash);
        self.send_recovery_message(out)
    }

    fn on_recovery_message(
        &mut self,
        relayer: Pubkey,
        message: &SignedMessage,
        recovery: &RecoveryMessage,
        out: &mut EngineOutput,
    ) -> Result<()> {
        let Some(ctx) = self.ctx() else {
            return Ok(());
        };
        debug!(
            "RecoveryMessage from {}: view={} change_views={} preparations={} commits={}",
            message.validator_index(),
            message.view_number(),
            recovery.change_views.len(),
            recovery.preparations.len(),
            recovery.commits.len()
        );
        let replay = recovery::unpack_recovery_message(
            ctx.block_index(),
            message.view_number(),
            ctx.validator_count(),
            recovery,
        );
        let was_recovering = std::mem::replace(&mut self.recovering, true);
        let result = self.replay_recovery(relayer, message.view_number(), replay, out);
        self.recovering = was_recovering;
        result
    }

    fn replay_recovery(
        &mut self,
        relayer: Pubkey,
        view: ViewNumber,
        replay: recovery::RecoveryReplay,
        out: &mut EngineOutput,
    ) -> Result<()> {
        let height = self.block_index();

        if self.ctx().is_some_and(|ctx| view > ctx.view_number() && !ctx.commit_sent()) {
            for change_view in replay.change_views {
                self.replay_entry(relayer, height, change_view, out)?;
            }
        }

        if self.ctx().is_some_and(|ctx| {
            view == ctx.view_number()
                && !ctx.not_accepting_payloads_due_to_view_changing()
                && !ctx.commit_sent()
        }) {
            let request_known = self.ctx().is_some_and(ConsensusContext::request_sent_or_received);
            if !request_known {
                match replay.prepare_request {
                    Some(request) => self.replay_entry(relayer, height, request, out)?,
                    None => {
                        if self.ctx().is_some_and(ConsensusContext::is_primary) {
                            self.send_prepare_request(out)?;
                        }
                    }
                }
            }
            for response in replay.prepare_responses {
                self.replay_entry(relayer, height, response, out)?;
            }
        }

        if self.ctx().is_some_and(|ctx| view <= ctx.view_number()) {
            for commit in replay.commits {
                self.replay_entry(relayer, height, commit, out)?;
            }
        }
        Ok(())
    }

    /// Feed one rebuilt entry through the normal path, unless consensus
    /// moved to another height meanwhile. An entry whose signature does not
    /// verify is charged to the validator that relayed it.
    fn replay_entry(
        &mut self,
        relayer: Pubkey,
        height: Option<BlockIndex>,
        message: SignedMessage,
        out: &mut EngineOutput,
    ) -> Result<()> {
        let Some(ctx) = self.ctx() else {
            return Ok(());
        };
        if Some(ctx.block_index()) != height {
            return Ok(());
        }
        if let Err(rejection) = self.authenticate(ctx.validators(), &message) {
            warn!(
                "Recovery entry {} for validator {} rejected: {rejection}",
                message.kind(),
                message.validator_index()
            );
            self.evidence
                .record_violation(relayer, ViolationKind::InvalidRecoveryEntry);
            return Ok(());
        }
        self.process_message(message, out)
    }

    // -- Recovery log --

    /// Make the Commit in `commit` durable before it is broadcast.
    fn save_commit(&mut self, commit: &SignedMessage) -> Result<()> {
        let Some(log) = self.recovery_log.as_mut() else {
            return Ok(());
        };
        let Some(ctx) = self.context.as_ref() else {
            return Ok(());
        };
        let mut preparations: Vec<SignedMessage> = ctx
            .preparations()
            .iter()
            .map(|(_, preparation)| preparation.message.clone())
            .collect();
        preparations.sort_by_key(|m| m.kind() != MessageKind::PrepareRequest);
        let saved = SavedContext {
            block_index: ctx.block_index(),
            view_number: ctx.view_number(),
            preparations,
            commit: commit.clone(),
        };
        log.save(&saved)?;
        Ok(())
    }

    /// Reinstate the Commit saved for the height just started, if any.
    fn restore_saved_commit(&mut self, out: &mut EngineOutput) -> Result<()> {
        let Some(log) = self.recovery_log.as_ref() else {
            return Ok(());
        };
        let Some(saved) = log.load()? else {
            return Ok(());
        };
        let Some(ctx) = self.context.as_mut() else {
            return Ok(());
        };
        if saved.block_index != ctx.block_index() {
            debug!(
                "Saved Commit is for height {}, starting height {}",
                saved.block_index,
                ctx.block_index()
            );
            return Ok(());
        }
        if !ctx.restore_commit(&saved) {
            warn!(
                "Saved Commit for height {} does not match the local committee",
                saved.block_index
            );
            return Ok(());
        }
        info!(
            "Restored Commit: height={} view={}",
            saved.block_index, saved.view_number
        );
        self.arm_timer(self.config.block_time_ms, out);
        Ok(())
    }
}

/// The node has something worth sending in a recovery message.
fn has_progress(ctx: &ConsensusContext) -> bool {
    ctx.view_number() > 0
        || ctx.preparations().count() > 0
        || ctx.commits().count() > 0
        || !ctx.change_view_targets().is_empty()
}
