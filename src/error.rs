//! Error taxonomy for chain membership and publication.

use thiserror::Error;

/// Errors raised while admitting candidate events into a game chain.
#[derive(Debug, Error)]
pub enum ChainError {
    /// The event's id or signature does not check out. Such an event is never
    /// treated as chain data, whatever its content claims.
    #[error("invalid event: {0}")]
    InvalidEvent(String),
    /// The event is not a legal successor of its claimed parent. This is a
    /// normal outcome under concurrent or adversarial publishers; callers
    /// discard the candidate and keep the current head.
    #[error("illegal successor: {0}")]
    IllegalSuccessor(String),
    /// No local key material is configured for publishing.
    #[error("missing identity")]
    MissingIdentity,
}
