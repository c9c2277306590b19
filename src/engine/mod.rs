pub mod receiving;
pub mod sending;

pub use receiving::Receiver;
pub use sending::{BulkSender, ReliableSender};

use bytes::{BufMut, Bytes, BytesMut};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Receiver-side state for one in-progress transfer. Exclusively owned by
/// the [`Receiver`] that created it; replaced wholesale (never merged) when
/// a frame announcing a different total shows up, since that means a new
/// transfer has overwritten a stale one.
#[derive(Debug)]
pub struct TransferSession {
    total: u16,
    received: BTreeMap<u16, Bytes>,
    started_at: Instant,
}

impl TransferSession {
    pub fn new(total: u16) -> Self {
        Self {
            total,
            received: BTreeMap::new(),
            started_at: Instant::now(),
        }
    }

    pub fn total(&self) -> u16 {
        self.total
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Stores a payload under its sequence number. Returns `false` for a
    /// duplicate, which leaves the stored payload untouched.
    pub fn store(&mut self, sequence: u16, payload: Bytes) -> bool {
        match self.received.entry(sequence) {
            std::collections::btree_map::Entry::Occupied(_) => false,
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(payload);
                true
            }
        }
    }

    /// Ingress classification guarantees `sequence < total`, so a full map
    /// means every sequence number is present.
    pub fn is_complete(&self) -> bool {
        self.received.len() == self.total as usize
    }

    pub fn missing(&self) -> Vec<u16> {
        (0..self.total)
            .filter(|sequence| !self.received.contains_key(sequence))
            .collect()
    }

    /// Concatenates stored payloads in sequence order; `None` while frames
    /// are still missing.
    pub fn reassemble(&self) -> Option<Bytes> {
        if !self.is_complete() {
            return None;
        }
        let mut buf = BytesMut::new();
        for payload in self.received.values() {
            buf.put_slice(payload);
        }
        Some(buf.freeze())
    }
}

/// Bookkeeping for one `receive_until_complete` call, attached to both the
/// success report and the partial-transfer error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiveStats {
    pub frames_received: u32,
    pub duplicate_frames: u32,
    pub invalid_frames: u32,
    pub retransmit_rounds: u32,
    pub elapsed: Duration,
}

#[derive(Debug)]
pub struct ReceiveReport {
    pub payload: Bytes,
    pub stats: ReceiveStats,
}

/// What a bulk send accomplished. Advisory only: the definitive completion
/// signal lives on the receiving side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkReport {
    pub frames_sent: usize,
    pub retransmit_rounds: u32,
}
