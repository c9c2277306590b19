//! Reliable chunked frame transport for small-satellite links.
//!
//! One protocol core, two bindings: a narrowband packet radio (128-252
//! byte frames, ack-per-frame or bulk-plus-retransmit) and the
//! intra-spacecraft CAN bus (8-byte frames, sequence numbers in the
//! extended identifier, explicit SOT/EOT handshake). Both links lose
//! frames without warning, so the core fragments, sequences,
//! acknowledges, detects gaps, and selectively retransmits, all as
//! blocking busy-polls under a cooperative scheduler. Arrival order
//! never matters: the sequence field is the sole ordering key.

pub mod can;
pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
pub mod protocol;
pub mod transmission;
pub mod util;

pub use config::LinkConfig;
pub use engine::{BulkSender, Receiver, ReliableSender};
pub use error::{LinkError, ReceiveError, SendError};
pub use protocol::{Frame, FrameCodec, FrameKind};
