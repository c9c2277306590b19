pub mod mock;
pub mod real;

use bytes::Bytes;
use std::time::Duration;

/// A half-duplex packet radio. Implementations catch device errors at this
/// boundary: a failed send returns `false`, a failed receive reads as
/// "nothing heard this poll". A momentary RF glitch must never unwind into
/// the flight loop.
pub trait RadioLike {
    fn send(&mut self, raw: &[u8]) -> bool;

    /// Blocks at most `timeout`; `Duration::ZERO` is a non-blocking poll.
    fn receive(&mut self, timeout: Duration) -> Option<Bytes>;
}

/// One classic CAN data frame: up to 8 payload bytes, 11-bit identifier, or
/// 29-bit when `extended` (used to carry a sequence number, see
/// [`crate::can`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanMessage {
    pub id: u32,
    pub data: Vec<u8>,
    pub extended: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CanFrame {
    Message(CanMessage),
    RemoteRequest { id: u32, length: u8 },
}

/// A CAN transceiver plus listener. Same error posture as [`RadioLike`].
pub trait CanBusLike {
    fn send(&mut self, message: &CanMessage) -> bool;

    /// Frames waiting in the listener buffer.
    fn in_waiting(&self) -> usize;

    fn receive(&mut self) -> Option<CanFrame>;
}
