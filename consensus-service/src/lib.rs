//! Hosting for the dBFT consensus engine.
//!
//! [`dbft_consensus`] is a pure state machine. This crate gives it a thread,
//! wall-clock timers and a network boundary:
//!
//! ```text
//!  Transport ──InboundMessage──▶ DbftService ──encoded bytes──▶ Broadcaster ──▶ Transport
//!                                   │    ▲
//!  Ledger / pool ──LedgerEvent──────┘    │
//!                                  DbftAdapter
//!                                 (engine + TimeoutScheduler)
//! ```

pub mod adapter;
pub mod broadcaster;
pub mod config;
pub mod error;
pub mod service;
pub mod timeout;
pub mod transport;

pub use {
    adapter::{AdapterOutput, DbftAdapter},
    config::ServiceConfig,
    error::{ServiceError, TransportError},
    service::{DbftService, LedgerEvent, Subscribers},
    transport::{ChannelTransport, InboundMessage, Transport},
};
