//! Delegated Byzantine Fault Tolerance (dBFT) consensus.
//!
//! A fixed committee of `n` validators agrees on one block per height,
//! tolerating `f = (n - 1) / 3` Byzantine members. Each height runs in
//! numbered views; in every view one validator is the primary:
//!
//! 1. **PrepareRequest**: the primary proposes a block skeleton.
//! 2. **PrepareResponse**: backups that accept it bind to its hash.
//! 3. **Commit**: once `M = n - f` preparations agree, each validator signs
//!    the block hash. A validator that committed never leaves the view.
//! 4. **Finalize**: `M` commit signatures form the block's witness.
//!
//! When a view stalls, validators send ChangeView messages and move to the
//! view that `f + 1` of them asked for. RecoveryRequest and RecoveryMessage
//! let a lagging validator rebuild the votes it missed.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                 ConsensusEngine                  │
//! │  ┌──────────┐  ┌───────────┐  ┌──────────────┐  │
//! │  │  Config  │  │ Validator │  │   Evidence   │  │
//! │  │          │  │    Set    │  │  Collector   │  │
//! │  └──────────┘  └───────────┘  └──────────────┘  │
//! │  ┌────────────────────────────────────────────┐  │
//! │  │            ConsensusContext                │  │
//! │  │  height, view, proposal, vote slots        │  │
//! │  └────────────────────────────────────────────┘  │
//! │  ┌─────────┐  ┌────────┐  ┌──────────────────┐  │
//! │  │ Primary │  │ Quorum │  │ TimerState       │  │
//! │  │ Rotation│  │ Rules  │  │ Recovery         │  │
//! │  └─────────┘  └────────┘  └──────────────────┘  │
//! └────────┬──────────┬───────────┬─────────┬────────┘
//!          │          │           │         │
//!       Ledger  TransactionSource Signer   Clock
//! ```
//!
//! An optional [`RecoveryLog`] keeps the local Commit across restarts.
//!
//! The engine performs no I/O. Hosts feed it events and act on the
//! returned [`EngineOutput`].

pub mod collaborators;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod evidence;
pub mod message;
pub mod primary;
pub mod quorum;
pub mod recovery;
pub mod recovery_log;
pub mod signer;
#[cfg(any(test, feature = "dev-context-only-utils"))]
pub mod test_utils;
pub mod timer;
pub mod types;
pub mod validator_set;

// Re-exports for convenience
pub use collaborators::{Clock, Ledger, Signer, SystemClock, TransactionSource, TransactionVerdict};
pub use config::{ConfigError, DbftConfig};
pub use context::ConsensusContext;
pub use engine::{ConsensusEngine, EngineOutput};
pub use error::{EngineError, PersistError, SignerError, WireError};
pub use evidence::{ConflictingPayloadEvidence, EvidenceCollector, EvidenceKind, ViolationKind};
pub use message::{ConsensusMessage, DecodeLimits, MessageKind, Payload, SignedMessage};
pub use primary::primary_index;
pub use recovery_log::{FileRecoveryLog, RecoveryLog, RecoveryLogError, SavedContext};
pub use signer::KeypairSigner;
pub use types::{
    BlockIndex, BlockProposal, ChangeViewReason, ConsensusPhase, FinalizedBlock, TimerTicket,
    ValidatorIndex, ViewChangeCause, ViewNumber, ViewTransition,
};
pub use validator_set::ValidatorSet;
