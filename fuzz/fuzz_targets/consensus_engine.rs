//! Fuzz the dBFT consensus engine with random event sequences.
//!
//! The fuzzer plays every other committee member with real keys, so its
//! messages pass signature checks and reach the state machine.
//!
//! Goals:
//! - Find panics or fatal errors triggered by peer input.
//! - Verify that at most one block is finalized per height.
//! - Verify that the engine never asks to change view after committing.
//! - Verify that the engine's height tracks the ledger.

#![no_main]

use {
    arbitrary::{Arbitrary, Unstructured},
    dbft_consensus::{
        message::{
            commit_sign_data, ChangeView, Commit, PrepareRequest, PrepareResponse, RecoveryRequest,
        },
        primary_index,
        test_utils::{sign_message, ManualClock, MemoryLedger, StaticTransactionSource},
        ChangeViewReason, ConsensusEngine, DbftConfig, KeypairSigner, Ledger, MessageKind,
        Payload, TimerTicket, ValidatorSet,
    },
    libfuzzer_sys::fuzz_target,
    solana_hash::Hash,
    solana_keypair::Keypair,
    solana_signer::Signer,
    std::{
        collections::{HashMap, HashSet},
        sync::Arc,
    },
};

/// A fuzzable event delivered to the engine under test.
#[derive(Debug, Arbitrary)]
enum FuzzAction {
    /// The (height, view) primary proposes, choosing a nonce.
    PrepareRequest { nonce: u8, tx_count: u8 },
    /// A peer accepts the proposal with the given nonce.
    PrepareResponse { from: u8, nonce: u8 },
    /// A peer commits to the proposal with the given nonce in `view`.
    Commit { from: u8, nonce: u8, view: u8 },
    /// A peer asks to move to `new_view`.
    ChangeView { from: u8, new_view: u8 },
    /// A peer asks for recovery.
    RecoveryRequest { from: u8 },
    /// Fire the armed timer, or a made-up one.
    Timeout { stale: bool },
    /// A transaction arrives locally.
    Transaction { byte: u8 },
    /// Raw bytes arrive from the transport.
    Wire { bytes: Vec<u8> },
    /// The ledger jumps one block ahead through sync.
    ExternalBlock,
    /// Time passes.
    Advance { ms: u16 },
}

const MAGIC: u32 = 0x334F_454E;

fuzz_target!(|data: &[u8]| {
    let mut u = Unstructured::new(data);
    let Ok(n) = u.int_in_range(4..=7usize) else {
        return;
    };

    let keypairs: Vec<Arc<Keypair>> = (0..n)
        .map(|i| Arc::new(Keypair::new_from_array([i as u8 + 1; 32])))
        .collect();
    let validators =
        ValidatorSet::new(keypairs.iter().map(|kp| kp.pubkey()).collect()).unwrap();

    let config = DbftConfig {
        network_magic: MAGIC,
        ..DbftConfig::dev_default()
    };
    let ledger = MemoryLedger::new(1, validators);
    let clock = ManualClock::new(10_000);
    // We fuzz as validator 0.
    let mut engine = ConsensusEngine::new(
        config.clone(),
        Box::new(ledger.clone()),
        Box::new(StaticTransactionSource::new(vec![Hash::new_from_array([1; 32])])),
        Box::new(KeypairSigner::new(keypairs[0].clone())),
        Box::new(clock.clone()),
    );
    engine.start().expect("start");

    let mut finalized_at: HashMap<u32, Hash> = HashMap::new();
    let mut committed_at: HashSet<u32> = HashSet::new();

    let num_actions: usize = u.int_in_range(1..=200).unwrap_or(50);
    for _ in 0..num_actions {
        let action: FuzzAction = match u.arbitrary() {
            Ok(a) => a,
            Err(_) => break,
        };
        let height = ledger.current_height();
        let view = engine.view_number().unwrap_or(0);
        let peer = |from: u8| 1 + usize::from(from) % (n - 1);
        let request = |nonce: u8, tx_count: u8| PrepareRequest {
            version: config.block_version,
            prev_hash: ledger.previous_hash(),
            timestamp: ledger.previous_timestamp() + 1,
            nonce: u64::from(nonce),
            transaction_hashes: (0..tx_count % 4)
                .map(|b| Hash::new_from_array([b; 32]))
                .collect(),
        };

        let output = match action {
            FuzzAction::PrepareRequest { nonce, tx_count } => {
                let primary = primary_index(height, view, n);
                if primary == 0 {
                    continue;
                }
                let message = sign_message(
                    &keypairs[usize::from(primary)],
                    MAGIC,
                    height,
                    primary,
                    view,
                    Payload::PrepareRequest(request(nonce, tx_count)),
                );
                engine.on_message(message)
            }
            FuzzAction::PrepareResponse { from, nonce } => {
                let from = peer(from);
                let primary = primary_index(height, view, n);
                let preparation_hash = request(nonce, 0).to_proposal(height, primary).hash();
                let message = sign_message(
                    &keypairs[from],
                    MAGIC,
                    height,
                    from as u8,
                    view,
                    Payload::PrepareResponse(PrepareResponse { preparation_hash }),
                );
                engine.on_message(message)
            }
            FuzzAction::Commit { from, nonce, view } => {
                let from = peer(from);
                let view = view % 4;
                let primary = primary_index(height, view, n);
                let hash = request(nonce, 0).to_proposal(height, primary).hash();
                let signature = keypairs[from].sign_message(&commit_sign_data(MAGIC, &hash));
                let message = sign_message(
                    &keypairs[from],
                    MAGIC,
                    height,
                    from as u8,
                    view,
                    Payload::Commit(Commit { signature }),
                );
                engine.on_message(message)
            }
            FuzzAction::ChangeView { from, new_view } => {
                let from = peer(from);
                let message = sign_message(
                    &keypairs[from],
                    MAGIC,
                    height,
                    from as u8,
                    view,
                    Payload::ChangeView(ChangeView {
                        new_view_number: new_view % 8,
                        timestamp: 10_000,
                        reason: ChangeViewReason::Timeout,
                    }),
                );
                engine.on_message(message)
            }
            FuzzAction::RecoveryRequest { from } => {
                let from = peer(from);
                let message = sign_message(
                    &keypairs[from],
                    MAGIC,
                    height,
                    from as u8,
                    view,
                    Payload::RecoveryRequest(RecoveryRequest { timestamp: 10_000 }),
                );
                engine.on_message(message)
            }
            FuzzAction::Timeout { stale } => {
                let ticket = match engine.armed_timer() {
                    Some(ticket) if !stale => ticket,
                    _ => TimerTicket {
                        block_index: height,
                        view_number: view.wrapping_add(1),
                    },
                };
                engine.on_timeout(ticket)
            }
            FuzzAction::Transaction { byte } => {
                engine.on_transaction(Hash::new_from_array([byte; 32]))
            }
            FuzzAction::Wire { bytes } => engine.handle_wire(&bytes),
            FuzzAction::ExternalBlock => {
                ledger.apply_external_block(Hash::new_from_array([height as u8; 32]), 10_000);
                engine.on_external_block_finalized(height)
            }
            FuzzAction::Advance { ms } => {
                clock.advance(u64::from(ms));
                continue;
            }
        };

        // ── Invariant checks ──

        let output = output.expect("peer input must never be fatal");

        // 1. Safety: at most one block per height.
        if let Some(block) = &output.finalized_block {
            let existing = finalized_at.insert(block.block_index(), block.hash());
            assert!(
                existing.is_none() || existing == Some(block.hash()),
                "SAFETY VIOLATION: two blocks finalized at height {}",
                block.block_index()
            );
        }

        // 2. Commit lock.
        for message in &output.messages {
            match message.kind() {
                MessageKind::Commit => {
                    committed_at.insert(message.block_index());
                }
                MessageKind::ChangeView => assert!(
                    !committed_at.contains(&message.block_index()),
                    "ChangeView sent after Commit at height {}",
                    message.block_index()
                ),
                _ => {}
            }
        }

        // 3. The engine works on the ledger's next height.
        assert_eq!(engine.block_index(), Some(ledger.current_height()));
    }
});
