//! dBFT Property-Based Invariant Tests
//!
//! Uses proptest to verify consensus invariants across:
//! - A simulated committee under adversarial delivery
//! - Quorum and primary rotation arithmetic

pub mod consensus_invariants;
pub mod quorum_invariants;
pub mod simulation;
