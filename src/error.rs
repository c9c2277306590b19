use thiserror::Error;

use crate::engine::ReceiveStats;

/// Failure of an outbound transfer. Returned, never panicked: the flight
/// loop keeps running after a lossy-link timeout.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("no acknowledgment for frame {sequence} after {attempts} attempts")]
    AckTimeout { sequence: u16, attempts: u32 },

    #[error("no acknowledgment on CAN id {id:#x} after {attempts} attempts")]
    CanAckTimeout { id: u32, attempts: u32 },

    #[error("start-of-transmission announcement was not acknowledged")]
    HandshakeTimeout,

    #[error("message needs {chunks} chunks, too many to announce in one start-of-transmission frame")]
    TooManyChunks { chunks: usize },
}

/// Failure of an inbound transfer. `missing` lists the sequence numbers the
/// session never saw, so the caller can decide whether to retry later.
#[derive(Debug, Error)]
pub enum ReceiveError {
    #[error("transfer incomplete, {} frames missing", .missing.len())]
    Partial {
        missing: Vec<u16>,
        stats: ReceiveStats,
    },
}

#[derive(Debug, Error)]
pub enum LinkError {
    /// A caller named a CAN message kind that is not in the registry. This is
    /// a programming error and fails fast instead of being swallowed.
    #[error("unknown CAN message id {0:?}")]
    UnknownMessageId(String),

    #[error("invalid link configuration: {0}")]
    InvalidConfig(&'static str),

    #[error(transparent)]
    Config(#[from] toml::de::Error),

    #[error(transparent)]
    Send(#[from] SendError),

    #[error(transparent)]
    Receive(#[from] ReceiveError),
}
