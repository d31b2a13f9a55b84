//! An in-process committee driven by an adversarial scheduler.
//!
//! Every honest validator runs a real [`ConsensusEngine`] over a
//! [`MemoryLedger`]. Messages go into one pending pool and are delivered in
//! random order, optionally more than once. Silent validators have no
//! engine: messages addressed to them vanish. When nothing is in flight the
//! shared [`ManualClock`] jumps to the earliest armed timer.
//!
//! While running, the network checks that no validator sends a ChangeView
//! at a height where it already sent a Commit.

use {
    dbft_consensus::{
        error::Result as EngineResult,
        message::commit_sign_data,
        quorum,
        test_utils::{make_committee, ManualClock, MemoryLedger, StaticTransactionSource},
        BlockIndex, ConsensusEngine, DbftConfig, EngineOutput, KeypairSigner, Ledger, MessageKind,
        SignedMessage, TimerTicket, ValidatorSet,
    },
    rand::{rngs::StdRng, Rng, SeedableRng},
    solana_hash::Hash,
    solana_keypair::Keypair,
    std::{
        collections::{BTreeMap, HashSet},
        sync::Arc,
        time::Duration,
    },
};

/// Starting reading of the shared clock.
pub const GENESIS_MS: u64 = 10_000;

struct SimNode {
    engine: Option<ConsensusEngine>,
    ledger: MemoryLedger,
    deadline: Option<(TimerTicket, u64)>,
    /// Heights at which this node sent a Commit.
    committed_at: HashSet<BlockIndex>,
}

#[derive(Clone)]
struct Delivery {
    to: usize,
    message: SignedMessage,
    duplicate: bool,
}

pub struct Network {
    config: DbftConfig,
    keypairs: Vec<Arc<Keypair>>,
    validators: ValidatorSet,
    nodes: Vec<SimNode>,
    clock: ManualClock,
    pending: Vec<Delivery>,
    rng: StdRng,
    duplicate_probability: f64,
    violations: Vec<String>,
}

impl Network {
    /// A committee of `n` validators at `start_height`. Validators listed
    /// in `silent` never send anything.
    pub fn new(n: usize, start_height: BlockIndex, silent: &[usize], seed: u64) -> Self {
        let config = DbftConfig::dev_default();
        let (keypairs, validators) = make_committee(n);
        let clock = ManualClock::new(GENESIS_MS);
        let nodes = keypairs
            .iter()
            .enumerate()
            .map(|(index, keypair)| {
                let ledger = MemoryLedger::new(start_height, validators.clone());
                let engine = (!silent.contains(&index)).then(|| {
                    let seed_byte = u8::try_from(index).unwrap_or(u8::MAX);
                    let transactions = StaticTransactionSource::new(vec![
                        Hash::new_from_array([seed_byte; 32]),
                        Hash::new_from_array([seed_byte.wrapping_add(100); 32]),
                    ]);
                    ConsensusEngine::new(
                        config.clone(),
                        Box::new(ledger.clone()),
                        Box::new(transactions),
                        Box::new(KeypairSigner::new(keypair.clone())),
                        Box::new(clock.clone()),
                    )
                });
                SimNode {
                    engine,
                    ledger,
                    deadline: None,
                    committed_at: HashSet::new(),
                }
            })
            .collect();

        Self {
            config,
            keypairs,
            validators,
            nodes,
            clock,
            pending: Vec::new(),
            rng: StdRng::seed_from_u64(seed),
            duplicate_probability: 0.0,
            violations: Vec::new(),
        }
    }

    /// Redeliver each message a second time with `probability`.
    pub fn with_duplicates(mut self, probability: f64) -> Self {
        self.duplicate_probability = probability.clamp(0.0, 1.0);
        self
    }

    /// Start every honest engine.
    pub fn start(&mut self) {
        for index in 0..self.nodes.len() {
            if let Some(engine) = self.nodes[index].engine.as_mut() {
                let result = engine.start();
                self.absorb(index, result);
            }
        }
    }

    /// Queue `message` for delivery to validator `to` only.
    pub fn inject(&mut self, to: usize, message: SignedMessage) {
        self.pending.push(Delivery {
            to,
            message,
            duplicate: false,
        });
    }

    /// Deliver messages and fire timers until `done` holds. Returns
    /// `false` if `max_steps` events pass first or the network goes quiet.
    pub fn run_until(&mut self, max_steps: usize, done: impl Fn(&Network) -> bool) -> bool {
        for _ in 0..max_steps {
            if done(self) {
                return true;
            }
            if self.pending.is_empty() {
                if !self.fire_timers() {
                    return done(self);
                }
            } else {
                self.deliver_one();
            }
        }
        done(self)
    }

    // -- Accessors --

    pub fn config(&self) -> &DbftConfig {
        &self.config
    }

    pub fn validators(&self) -> &ValidatorSet {
        &self.validators
    }

    pub fn keypair(&self, index: usize) -> &Keypair {
        &self.keypairs[index]
    }

    pub fn ledger(&self, index: usize) -> &MemoryLedger {
        &self.nodes[index].ledger
    }

    pub fn engine(&self, index: usize) -> Option<&ConsensusEngine> {
        self.nodes[index].engine.as_ref()
    }

    pub fn now_ms(&self) -> u64 {
        use dbft_consensus::Clock as _;
        self.clock.now_ms()
    }

    /// Indices of validators running an engine.
    pub fn honest(&self) -> Vec<usize> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| node.engine.is_some())
            .map(|(index, _)| index)
            .collect()
    }

    /// Lowest ledger height among honest validators.
    pub fn min_honest_height(&self) -> BlockIndex {
        self.honest()
            .into_iter()
            .map(|index| self.nodes[index].ledger.current_height())
            .min()
            .unwrap_or(0)
    }

    /// Problems noticed while running.
    pub fn violations(&self) -> &[String] {
        &self.violations
    }

    /// Check every block persisted by an honest validator: one hash per
    /// height across the committee, and a witness of `M` valid commit
    /// signatures over that hash.
    pub fn check_finalized(&self) -> Result<(), String> {
        let m = quorum::quorum(self.validators.len());
        let mut by_height: BTreeMap<BlockIndex, Hash> = BTreeMap::new();
        for index in self.honest() {
            for block in self.nodes[index].ledger.blocks() {
                let hash = block.hash();
                if let Some(existing) = by_height.insert(block.block_index(), hash) {
                    if existing != hash {
                        return Err(format!(
                            "conflicting blocks at height {}: {existing} and {hash}",
                            block.block_index()
                        ));
                    }
                }
                if block.witness.len() != m {
                    return Err(format!(
                        "block {} has {} witness signatures, expected {m}",
                        block.block_index(),
                        block.witness.len()
                    ));
                }
                let data = commit_sign_data(self.config.network_magic, &hash);
                for (signer, signature) in &block.witness {
                    let Some(pubkey) = self.validators.get(*signer) else {
                        return Err(format!("witness from unknown validator {signer}"));
                    };
                    if !signature.verify(pubkey.as_ref(), &data) {
                        return Err(format!(
                            "bad witness signature from {signer} on block {}",
                            block.block_index()
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    // -- Internal --

    fn deliver_one(&mut self) {
        let pick = self.rng.random_range(0..self.pending.len());
        let delivery = self.pending.swap_remove(pick);
        if !delivery.duplicate && self.rng.random_bool(self.duplicate_probability) {
            self.pending.push(Delivery {
                duplicate: true,
                ..delivery.clone()
            });
        }
        let to = delivery.to;
        if let Some(engine) = self.nodes[to].engine.as_mut() {
            let result = engine.on_message(delivery.message);
            self.absorb(to, result);
        }
    }

    /// Jump to the earliest deadline and fire every timer due by then.
    fn fire_timers(&mut self) -> bool {
        let Some(earliest) = self
            .nodes
            .iter()
            .filter_map(|node| node.deadline.map(|(_, at)| at))
            .min()
        else {
            return false;
        };
        if earliest > self.now_ms() {
            self.clock.set(earliest);
        }
        for index in 0..self.nodes.len() {
            let node = &mut self.nodes[index];
            let Some((ticket, at)) = node.deadline else {
                continue;
            };
            if at > earliest {
                continue;
            }
            node.deadline = None;
            if let Some(engine) = node.engine.as_mut() {
                let result = engine.on_timeout(ticket);
                self.absorb(index, result);
            }
        }
        true
    }

    fn absorb(&mut self, index: usize, result: EngineResult<EngineOutput>) {
        let output = match result {
            Ok(output) => output,
            Err(err) => {
                self.violations.push(format!("validator {index} failed: {err}"));
                return;
            }
        };

        let now = self.now_ms();
        let node = &mut self.nodes[index];
        for message in &output.messages {
            match message.kind() {
                MessageKind::Commit => {
                    node.committed_at.insert(message.block_index());
                }
                MessageKind::ChangeView if node.committed_at.contains(&message.block_index()) => {
                    self.violations.push(format!(
                        "validator {index} sent ChangeView after Commit at height {}",
                        message.block_index()
                    ));
                }
                _ => {}
            }
        }
        match output.timer {
            Some((ticket, delay)) => {
                node.deadline = Some((ticket, now.saturating_add(millis(delay))));
            }
            None => {
                if node.engine.as_ref().and_then(ConsensusEngine::armed_timer).is_none() {
                    node.deadline = None;
                }
            }
        }

        let peers = self.nodes.len();
        for message in output.messages {
            for to in (0..peers).filter(|to| *to != index) {
                self.pending.push(Delivery {
                    to,
                    message: message.clone(),
                    duplicate: false,
                });
            }
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
