//! Property-based tests for dBFT consensus invariants.
//!
//! Properties tested:
//! 1. Safety: honest validators never persist different blocks at the same
//!    height, under reordering, duplication and an equivocating primary.
//! 2. Liveness: with at most `f` silent validators, the rest keep
//!    finalizing blocks.
//! 3. Commit lock: no validator asks to change view after committing.
//! 4. Witness binding: every persisted block carries `M` valid commit
//!    signatures over its own hash.

#[cfg(test)]
mod tests {
    use {
        crate::simulation::Network,
        dbft_consensus::{
            message::{commit_sign_data, Commit, PrepareRequest, PrepareResponse},
            primary_index, quorum,
            test_utils::sign_message,
            BlockIndex, Ledger, Payload,
        },
        proptest::prelude::*,
        solana_signer::Signer,
    };

    // ── Helpers ──

    fn assert_clean(net: &Network) -> Result<(), TestCaseError> {
        prop_assert!(
            net.violations().is_empty(),
            "violations: {:?}",
            net.violations()
        );
        prop_assert_eq!(net.check_finalized(), Ok(()));
        Ok(())
    }

    /// Committee size together with up to `f` distinct silent validators.
    fn committee_with_silent() -> impl Strategy<Value = (usize, Vec<usize>)> {
        (4..=10usize).prop_flat_map(|n| {
            let f = quorum::max_faulty(n);
            (
                Just(n),
                proptest::sample::subsequence((0..n).collect::<Vec<_>>(), 0..=f),
            )
        })
    }

    /// The view-0 primary at `height` plays two proposals against each
    /// other. It and the other `byzantine` validators send every honest
    /// validator in `group_a` a full vote set for proposal A, and everyone
    /// else the same for proposal B.
    fn inject_equivocation(
        net: &mut Network,
        height: BlockIndex,
        byzantine: &[usize],
        group_a: &[usize],
    ) {
        let n = net.validators().len();
        let primary = primary_index(height, 0, n);
        let magic = net.config().network_magic;
        let version = net.config().block_version;
        let prev_hash = net.ledger(usize::from(primary)).previous_hash();
        let timestamp = net.now_ms();

        for (nonce, in_group_a) in [(1u64, true), (2u64, false)] {
            let request = PrepareRequest {
                version,
                prev_hash,
                timestamp,
                nonce,
                transaction_hashes: vec![],
            };
            let hash = request.to_proposal(height, primary).hash();
            let mut votes = vec![sign_message(
                net.keypair(usize::from(primary)),
                magic,
                height,
                primary,
                0,
                Payload::PrepareRequest(request),
            )];
            for &q in byzantine {
                let index = u8::try_from(q).unwrap();
                if index != primary {
                    votes.push(sign_message(
                        net.keypair(q),
                        magic,
                        height,
                        index,
                        0,
                        Payload::PrepareResponse(PrepareResponse {
                            preparation_hash: hash,
                        }),
                    ));
                }
                let signature = net.keypair(q).sign_message(&commit_sign_data(magic, &hash));
                votes.push(sign_message(
                    net.keypair(q),
                    magic,
                    height,
                    index,
                    0,
                    Payload::Commit(Commit { signature }),
                ));
            }
            for to in net.honest() {
                if group_a.contains(&to) == in_group_a {
                    for vote in &votes {
                        net.inject(to, vote.clone());
                    }
                }
            }
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // 1. Safety and liveness with an honest committee
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        /// Arbitrary delivery order and duplicated messages never split the
        /// committee, and every validator finalizes two blocks.
        #[test]
        fn safety_under_reordering_and_duplicates(
            n in 1..=7usize,
            start in 0..1_000u32,
            seed in any::<u64>(),
            duplicates in 0.0..0.5f64,
        ) {
            let mut net = Network::new(n, start, &[], seed).with_duplicates(duplicates);
            net.start();
            let target = start + 2;
            let reached = net.run_until(200_000, |net| net.min_honest_height() >= target);

            prop_assert!(reached, "stuck at height {}", net.min_honest_height());
            assert_clean(&net)?;
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // 2. Liveness with up to f silent validators
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        /// Silent validators, including silent primaries, only cost view
        /// changes.
        #[test]
        fn liveness_with_silent_validators(
            (n, silent) in committee_with_silent(),
            start in 0..1_000u32,
            seed in any::<u64>(),
        ) {
            let mut net = Network::new(n, start, &silent, seed);
            net.start();
            let target = start + 2;
            let reached = net.run_until(400_000, |net| net.min_honest_height() >= target);

            prop_assert!(reached, "stuck at height {}", net.min_honest_height());
            assert_clean(&net)?;
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // 3. Safety against an equivocating primary
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// `f` colluding validators led by the primary send two proposals,
        /// each with full response and commit sets, to two halves of the
        /// honest validators. At most one of them is ever persisted.
        #[test]
        fn safety_with_equivocating_primary(
            n in 4..=10usize,
            start in 0..1_000u32,
            seed in any::<u64>(),
            split in proptest::collection::vec(any::<bool>(), 10),
        ) {
            let f = quorum::max_faulty(n);
            let primary = usize::from(primary_index(start, 0, n));
            let byzantine: Vec<usize> = (0..f).map(|i| (primary + i) % n).collect();
            let group_a: Vec<usize> = (0..n).filter(|i| split[*i]).collect();

            let mut net = Network::new(n, start, &byzantine, seed).with_duplicates(0.1);
            inject_equivocation(&mut net, start, &byzantine, &group_a);
            net.start();
            net.run_until(50_000, |net| net.min_honest_height() > start);

            assert_clean(&net)?;
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // 4. Committee of seven at height 100
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    #[test]
    fn test_seven_validators_height_100() {
        let mut net = Network::new(7, 100, &[], 7);
        net.start();
        assert!(net.run_until(100_000, |net| net.min_honest_height() > 100));

        let block = net.ledger(0).block_at(100).unwrap();
        assert_eq!(block.proposal.primary_index, 2);
        assert_eq!(block.view_number, 0);
        assert_eq!(block.witness.len(), 5);
        assert!(net.violations().is_empty());
        assert_eq!(net.check_finalized(), Ok(()));
    }

    #[test]
    fn test_seven_validators_silent_primary_changes_view() {
        let mut net = Network::new(7, 100, &[2], 11);
        net.start();
        assert!(net.run_until(100_000, |net| net.min_honest_height() > 100));

        let block = net.ledger(0).block_at(100).unwrap();
        assert_eq!(block.view_number, 1);
        assert_eq!(block.proposal.primary_index, 1);

        let transitions = net.engine(0).unwrap().view_log();
        let first = transitions.iter().find(|t| t.block_index == 100).unwrap();
        assert_eq!((first.from_view, first.to_view), (0, 1));
        assert!(net.violations().is_empty());
        assert_eq!(net.check_finalized(), Ok(()));
    }
}
