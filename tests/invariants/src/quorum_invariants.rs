//! Property-based tests for quorum and primary rotation arithmetic.
//!
//! Properties tested:
//! 1. `M + f = n` and `3f < n` for every committee size.
//! 2. Any two `M`-quorums share at least `f + 1` validators.
//! 3. The primary follows `(h - v) mod n` and visits every validator once
//!    in `n` consecutive views.
//! 4. View advancement never moves backwards and never lands on a view
//!    fewer than `f + 1` validators asked for.

#[cfg(test)]
mod tests {
    use {
        dbft_consensus::{
            primary_index,
            quorum::{commit_fast_forward_target, max_faulty, quorum, should_advance_view},
            ViewChangeCause,
        },
        proptest::prelude::*,
        std::collections::HashSet,
    };

    proptest! {
        #[test]
        fn quorum_sizes_are_consistent(n in 1..=255usize) {
            let f = max_faulty(n);
            let m = quorum(n);
            prop_assert_eq!(m + f, n);
            prop_assert!(3 * f < n);
            // Two quorums overlap in more than f validators, so in at least
            // one honest one.
            prop_assert!(2 * m >= n + f + 1);
        }

        #[test]
        fn primary_matches_rotation_formula(
            height in any::<u32>(),
            view in any::<u8>(),
            n in 1..=255usize,
        ) {
            let expected = (i128::from(height) - i128::from(view)).rem_euclid(n as i128);
            prop_assert_eq!(i128::from(primary_index(height, view, n)), expected);
        }

        #[test]
        fn primary_visits_every_validator(height in any::<u32>(), n in 1..=100usize) {
            let primaries: HashSet<u8> = (0..n)
                .map(|view| primary_index(height, view as u8, n))
                .collect();
            prop_assert_eq!(primaries.len(), n);
        }

        #[test]
        fn view_advance_needs_f_plus_one(
            n in 1..=32usize,
            current in 0..8u8,
            targets in proptest::collection::vec(0..16u8, 0..32),
        ) {
            let targets: Vec<u8> = targets.into_iter().take(n).collect();
            let f = max_faulty(n);
            let m = quorum(n);
            match should_advance_view(&targets, current, n) {
                Some((view, cause)) => {
                    prop_assert!(view > current);
                    let at_or_above = targets.iter().filter(|t| **t >= view).count();
                    prop_assert!(at_or_above > f);
                    // Nobody asked for anything past the chosen view by f + 1.
                    let above = targets.iter().filter(|t| **t > view).count();
                    prop_assert!(above <= f);
                    prop_assert_eq!(cause == ViewChangeCause::ChangeViewQuorum, at_or_above >= m);
                }
                None => {
                    let above_current = targets.iter().filter(|t| **t > current).count();
                    prop_assert!(above_current <= f);
                }
            }
        }

        #[test]
        fn fast_forward_needs_f_plus_one_commits(
            n in 1..=32usize,
            current in 0..8u8,
            views in proptest::collection::vec(0..12u8, 0..32),
        ) {
            let views: Vec<u8> = views.into_iter().take(n).collect();
            let f = max_faulty(n);
            match commit_fast_forward_target(&views, current, n) {
                Some(view) => {
                    prop_assert!(view > current);
                    prop_assert!(views.iter().filter(|v| **v == view).count() > f);
                }
                None => {
                    for view in views.iter().filter(|v| **v > current) {
                        prop_assert!(views.iter().filter(|v| *v == view).count() <= f);
                    }
                }
            }
        }
    }
}
