//! In-memory collaborators for tests and simulations.

use {
    crate::{
        collaborators::{Clock, Ledger, TransactionSource, TransactionVerdict},
        error::PersistError,
        message::{ConsensusMessage, Payload, SignedMessage},
        recovery_log::{RecoveryLog, RecoveryLogError, SavedContext},
        signer::KeypairSigner,
        types::{BlockIndex, FinalizedBlock, ViewNumber},
        validator_set::ValidatorSet,
    },
    solana_hash::Hash,
    solana_keypair::Keypair,
    solana_pubkey::Pubkey,
    solana_signer::Signer as _,
    std::{
        collections::HashSet,
        sync::{
            atomic::{AtomicU64, Ordering},
            Arc, Mutex, MutexGuard, PoisonError,
        },
    },
};

#[derive(Debug)]
struct LedgerState {
    height: BlockIndex,
    prev_hash: Hash,
    prev_timestamp: u64,
    validators: ValidatorSet,
    blocks: Vec<FinalizedBlock>,
    fail_persist: bool,
}

/// A ledger kept in memory. Clones share state, so a test can keep a
/// handle after moving one into an engine.
#[derive(Debug, Clone)]
pub struct MemoryLedger {
    state: Arc<Mutex<LedgerState>>,
}

impl MemoryLedger {
    pub fn new(height: BlockIndex, validators: ValidatorSet) -> Self {
        Self {
            state: Arc::new(Mutex::new(LedgerState {
                height,
                prev_hash: Hash::new_from_array([0xAB; 32]),
                prev_timestamp: 1_000,
                validators,
                blocks: Vec::new(),
                fail_persist: false,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Blocks persisted so far, oldest first.
    pub fn blocks(&self) -> Vec<FinalizedBlock> {
        self.lock().blocks.clone()
    }

    pub fn block_at(&self, height: BlockIndex) -> Option<FinalizedBlock> {
        self.lock()
            .blocks
            .iter()
            .find(|b| b.block_index() == height)
            .cloned()
    }

    /// Make every following `persist` call fail.
    pub fn set_fail_persist(&self, fail: bool) {
        self.lock().fail_persist = fail;
    }

    /// Simulate a block arriving through sync instead of local consensus.
    pub fn apply_external_block(&self, hash: Hash, timestamp: u64) {
        let mut state = self.lock();
        state.height = state.height.saturating_add(1);
        state.prev_hash = hash;
        state.prev_timestamp = timestamp;
    }
}

impl Ledger for MemoryLedger {
    fn current_height(&self) -> BlockIndex {
        self.lock().height
    }

    fn previous_hash(&self) -> Hash {
        self.lock().prev_hash
    }

    fn previous_timestamp(&self) -> u64 {
        self.lock().prev_timestamp
    }

    fn validators_for(&self, _height: BlockIndex) -> ValidatorSet {
        self.lock().validators.clone()
    }

    fn persist(&mut self, block: &FinalizedBlock) -> Result<(), PersistError> {
        let mut state = self.lock();
        if state.fail_persist {
            return Err(PersistError {
                block_index: block.block_index(),
                reason: "injected failure".to_string(),
            });
        }
        if block.block_index() != state.height {
            return Err(PersistError {
                block_index: block.block_index(),
                reason: format!("expected height {}", state.height),
            });
        }
        state.height = state.height.saturating_add(1);
        state.prev_hash = block.hash();
        state.prev_timestamp = block.proposal.timestamp;
        state.blocks.push(block.clone());
        Ok(())
    }
}

/// Hands out a fixed transaction list and answers verification from a
/// configurable known set. Clones share the known set.
#[derive(Debug, Clone, Default)]
pub struct StaticTransactionSource {
    transactions: Vec<Hash>,
    /// When set, hashes outside this set are reported missing.
    known: Option<Arc<Mutex<HashSet<Hash>>>>,
    verdict: Option<TransactionVerdict>,
}

impl StaticTransactionSource {
    pub fn new(transactions: Vec<Hash>) -> Self {
        Self {
            transactions,
            ..Self::default()
        }
    }

    /// Only `known` hashes are available locally.
    pub fn with_known(mut self, known: impl IntoIterator<Item = Hash>) -> Self {
        self.known = Some(Arc::new(Mutex::new(known.into_iter().collect())));
        self
    }

    /// Make `hash` available, as if it just arrived in the pool.
    pub fn add_known(&self, hash: Hash) {
        if let Some(known) = &self.known {
            known
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(hash);
        }
    }

    /// Every verification fails with `verdict`.
    pub fn with_verdict(mut self, verdict: TransactionVerdict) -> Self {
        self.verdict = Some(verdict);
        self
    }
}

impl TransactionSource for StaticTransactionSource {
    fn select_transactions(&mut self, capacity_hint: usize) -> Vec<Hash> {
        self.transactions.iter().take(capacity_hint).copied().collect()
    }

    fn verify_transactions(&mut self, hashes: &[Hash]) -> Result<(), TransactionVerdict> {
        if let Some(verdict) = &self.verdict {
            return Err(verdict.clone());
        }
        let Some(known) = &self.known else {
            return Ok(());
        };
        let known = known.lock().unwrap_or_else(PoisonError::into_inner);
        let missing: Vec<Hash> = hashes.iter().filter(|h| !known.contains(h)).copied().collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(TransactionVerdict::NotFound(missing))
        }
    }
}

/// A recovery log kept in memory. Clones share the record, so a restarted
/// engine can be handed what the previous one saved.
#[derive(Debug, Clone, Default)]
pub struct MemoryRecoveryLog {
    saved: Arc<Mutex<Option<SavedContext>>>,
}

impl MemoryRecoveryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// The record saved last, if any.
    pub fn saved(&self) -> Option<SavedContext> {
        self.saved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl RecoveryLog for MemoryRecoveryLog {
    fn save(&mut self, saved: &SavedContext) -> Result<(), RecoveryLogError> {
        *self.saved.lock().unwrap_or_else(PoisonError::into_inner) = Some(saved.clone());
        Ok(())
    }

    fn load(&self) -> Result<Option<SavedContext>, RecoveryLogError> {
        Ok(self.saved())
    }
}

/// A clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now_ms: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(now_ms: u64) -> Self {
        Self {
            now_ms: Arc::new(AtomicU64::new(now_ms)),
        }
    }

    pub fn advance(&self, ms: u64) {
        self.now_ms.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn set(&self, now_ms: u64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// A committee of `n` fresh keypairs, in committee order.
pub fn make_committee(n: usize) -> (Vec<Arc<Keypair>>, ValidatorSet) {
    let keypairs: Vec<Arc<Keypair>> = (0..n).map(|_| Arc::new(Keypair::new())).collect();
    let pubkeys: Vec<Pubkey> = keypairs.iter().map(|kp| kp.pubkey()).collect();
    let validators = match ValidatorSet::new(pubkeys) {
        Ok(validators) => validators,
        Err(err) => panic!("generated committee is invalid: {err}"),
    };
    (keypairs, validators)
}

/// Signers for every member of a committee.
pub fn make_signers(keypairs: &[Arc<Keypair>]) -> Vec<KeypairSigner> {
    keypairs.iter().cloned().map(KeypairSigner::new).collect()
}

/// Sign `payload` as validator `index` with `keypair`.
pub fn sign_message(
    keypair: &Keypair,
    network_magic: u32,
    block_index: BlockIndex,
    index: u8,
    view: ViewNumber,
    payload: Payload,
) -> SignedMessage {
    let message = ConsensusMessage::new(block_index, index, view, payload);
    let data = match message.sign_data(network_magic) {
        Ok(data) => data,
        Err(err) => panic!("failed to encode test message: {err}"),
    };
    let signature = keypair.sign_message(&data);
    SignedMessage::new(message, signature)
}
