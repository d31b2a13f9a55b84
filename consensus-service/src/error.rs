//! Error types for the dBFT service layer.

use {
    dbft_consensus::{ConfigError, EngineError},
    std::net::SocketAddr,
    thiserror::Error,
};

/// Errors that stop the consensus service.
#[derive(Error, Debug)]
pub enum ServiceError {
    /// A service thread could not be spawned.
    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// The engine hit a fatal collaborator failure.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// The configuration failed validation.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// The configuration could not be parsed.
    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// The outbound queue capacity must be non-zero.
    #[error("outbound_queue_capacity must be > 0")]
    InvalidQueueCapacity,

    /// The poll interval must be non-zero.
    #[error("poll_interval_ms must be > 0")]
    InvalidPollInterval,
}

/// Failures reported by a [`Transport`](crate::transport::Transport).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The peer's inbound queue is gone.
    #[error("peer {0} disconnected")]
    Disconnected(SocketAddr),

    /// The peer's inbound queue is full.
    #[error("peer {0} is not keeping up")]
    Full(SocketAddr),
}

/// Convenience result type for service operations.
pub type Result<T> = std::result::Result<T, ServiceError>;
