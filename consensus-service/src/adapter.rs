//! Bridges the pure [`ConsensusEngine`] with wall-clock timers.
//!
//! The engine describes timers as `(ticket, delay)` pairs and never sleeps.
//! The adapter owns the [`TimeoutScheduler`] that turns those into real
//! deadlines, feeds expired tickets back into the engine and strips each
//! [`EngineOutput`] down to what the service acts on.

use {
    crate::timeout::TimeoutScheduler,
    dbft_consensus::{
        error::Result, BlockIndex, ConflictingPayloadEvidence, ConsensusEngine, ConsensusPhase,
        EngineOutput, FinalizedBlock, SignedMessage, ViewNumber,
    },
    log::*,
    solana_hash::Hash,
    std::time::Duration,
};

/// What the service must do after one event.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct AdapterOutput {
    /// Messages to broadcast to the network.
    pub messages: Vec<SignedMessage>,
    /// The block finalized and persisted during this event, if any.
    pub finalized: Option<FinalizedBlock>,
    /// Conflicting-payload evidence gathered since the last event.
    pub evidence: Vec<ConflictingPayloadEvidence>,
}

impl AdapterOutput {
    fn from_engine_output(output: EngineOutput, evidence: Vec<ConflictingPayloadEvidence>) -> Self {
        Self {
            messages: output.messages,
            finalized: output.finalized_block,
            evidence,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.finalized.is_none() && self.evidence.is_empty()
    }
}

/// Owns the consensus engine and its timeout scheduler.
pub struct DbftAdapter {
    /// The dBFT state machine.
    engine: ConsensusEngine,
    /// The single pending engine timer.
    timeout_scheduler: TimeoutScheduler,
}

impl DbftAdapter {
    pub fn new(engine: ConsensusEngine) -> Self {
        Self {
            engine,
            timeout_scheduler: TimeoutScheduler::new(),
        }
    }

    // -- Public API --

    /// Start consensus at the ledger's current height.
    pub fn start(&mut self) -> Result<AdapterOutput> {
        let output = self.engine.start()?;
        info!(
            "DbftAdapter: started at height {:?} (identity: {})",
            self.engine.block_index(),
            self.engine.identity()
        );
        Ok(self.process_engine_output(output))
    }

    /// Feed raw bytes from the transport.
    pub fn handle_wire(&mut self, bytes: &[u8]) -> Result<AdapterOutput> {
        let output = self.engine.handle_wire(bytes)?;
        Ok(self.process_engine_output(output))
    }

    /// Feed an already decoded message.
    pub fn handle_message(&mut self, message: SignedMessage) -> Result<AdapterOutput> {
        let output = self.engine.on_message(message)?;
        Ok(self.process_engine_output(output))
    }

    pub fn on_transaction(&mut self, hash: Hash) -> Result<AdapterOutput> {
        let output = self.engine.on_transaction(hash)?;
        Ok(self.process_engine_output(output))
    }

    pub fn on_external_block(&mut self, height: BlockIndex) -> Result<AdapterOutput> {
        let output = self.engine.on_external_block_finalized(height)?;
        Ok(self.process_engine_output(output))
    }

    /// Fire the pending timer if its deadline has passed.
    ///
    /// Called after every event and whenever the service loop wakes up.
    pub fn check_timeouts(&mut self) -> Result<AdapterOutput> {
        let Some(ticket) = self.timeout_scheduler.check_expired() else {
            return Ok(AdapterOutput::default());
        };
        debug!(
            "DbftAdapter: timeout expired at h={} v={}",
            ticket.block_index, ticket.view_number
        );
        self.timeout_scheduler.cancel();
        let output = self.engine.on_timeout(ticket)?;
        Ok(self.process_engine_output(output))
    }

    /// Returns time remaining until the next timeout, or None.
    pub fn time_to_next_timeout(&self) -> Option<Duration> {
        self.timeout_scheduler.remaining()
    }

    // -- Accessors --

    pub fn block_index(&self) -> Option<BlockIndex> {
        self.engine.block_index()
    }

    pub fn view_number(&self) -> Option<ViewNumber> {
        self.engine.view_number()
    }

    pub fn phase(&self) -> ConsensusPhase {
        self.engine.phase()
    }

    pub fn engine(&self) -> &ConsensusEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut ConsensusEngine {
        &mut self.engine
    }

    // -- Internal --

    fn process_engine_output(&mut self, output: EngineOutput) -> AdapterOutput {
        if let Some((ticket, delay)) = output.timer {
            trace!(
                "DbftAdapter: timer h={} v={} in {}ms",
                ticket.block_index,
                ticket.view_number,
                delay.as_millis()
            );
            self.timeout_scheduler.start(ticket, delay);
        } else if self.engine.armed_timer().is_none() {
            self.timeout_scheduler.cancel();
        }

        if let Some(block) = &output.finalized_block {
            info!(
                "DbftAdapter: finalized block {} ({}) with {} transactions",
                block.block_index(),
                block.hash(),
                block.proposal.transaction_hashes.len()
            );
        }

        let evidence = self.engine.evidence_mut().drain_evidence();
        if !evidence.is_empty() {
            debug!("DbftAdapter: {} new evidence records", evidence.len());
        }
        AdapterOutput::from_engine_output(output, evidence)
    }
}
