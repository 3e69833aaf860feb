//! Georeplica Core Library
//!
//! Multi-region active-active consistency subsystem. Keeps per-key replicated
//! state convergent across independently-writable regions using CRDTs and
//! loop-free gossip, fences writes with a process-wide safe mode when replicas
//! diverge, routes traffic away from unhealthy regions to their disaster
//! recovery partner, and audits an append-only log against a published
//! signed tree head.

pub mod audit;
pub mod config;
pub mod context;
pub mod crdt;
pub mod failover;
pub mod health;
pub mod storage;
pub mod sync;
pub mod transport;
pub mod types;

pub use config::RegionConfig;
pub use context::RegionContext;
pub use types::*;

/// Crate version, for banners and logs
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// `Georeplica vX.Y.Z`, suffixed with ` [debug]` on debug builds
pub fn version_string() -> String {
    let profile = if cfg!(debug_assertions) { " [debug]" } else { "" };
    format!("Georeplica v{VERSION}{profile}")
}

/// Result type used throughout the library
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("CRDT decode failed: {0}")]
    Decode(#[from] crdt::DecodeError),

    #[error("Unknown replica key: {0}")]
    UnknownKey(String),

    #[error("CRDT type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Storage operation failed: {0}")]
    Storage(String),

    #[error("Serialization failed: {0}")]
    Serialization(String),

    #[error("Transport operation failed: {0}")]
    Transport(String),

    #[error("Cryptographic operation failed: {0}")]
    Crypto(String),

    #[error("Service is shut down")]
    Shutdown,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
