use std::time::Duration;

/// Two big-endian u16 fields: sequence number, total frame count.
pub const HEADER_SIZE: usize = 4;

/// Conservative default for the narrowband radio binding (typical LoRa packet).
pub const DEFAULT_MTU: u16 = 128;

/// A classic CAN data frame carries at most 8 payload bytes.
pub const CAN_MTU: usize = 8;

pub const ACK_MARKER: &[u8] = b"ACK";
pub const ACK_LENGTH: usize = 5;
pub const RETRANSMIT_MARKER: [u8; 2] = [0xFF, 0xFF];
pub const EOT_PAYLOAD: &[u8] = b"EOT";

/// Sleep between polls of the transport while waiting for a frame.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Linger after a matching ack so duplicate acks drain off the link.
pub const ACK_SETTLE: Duration = Duration::from_millis(200);
/// Pause between send attempts of the same frame.
pub const RETRY_DELAY: Duration = Duration::from_secs(1);
/// Pause before a retransmission burst, so the requesting side can turn
/// the half-duplex link around and listen.
pub const RETRANSMIT_SETTLE: Duration = Duration::from_secs(1);

/// Log a progress line every this many frames.
pub const PROGRESS_INTERVAL: usize = 10;

/// Multi-chunk CAN traffic packs `(original_id << 22) | sequence` into the
/// 29-bit extended identifier.
pub const CAN_ID_SHIFT: u32 = 22;
pub const CAN_SEQUENCE_MASK: u32 = 0x3F_FFFF;
pub const CAN_ID_MASK: u32 = 0x7F;
