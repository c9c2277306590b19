use bytes::{BufMut, Bytes, BytesMut};
use zerocopy::byteorder::{BigEndian, U16};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::constants::{ACK_LENGTH, ACK_MARKER, HEADER_SIZE, RETRANSMIT_MARKER};

#[repr(C)]
#[derive(IntoBytes, FromBytes, Unaligned, Immutable, KnownLayout, Debug)]
pub struct FrameHeader {
    pub sequence: U16<BigEndian>,
    pub total: U16<BigEndian>,
}

/// One sequenced unit of a fragmented payload.
///
/// Invariants are upheld by [`FrameCodec::pack`] and checked again on
/// ingress: `sequence < total`, `total >= 1`, and the payload fits the
/// binding MTU minus [`HEADER_SIZE`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub sequence: u16,
    pub total: u16,
    pub payload: Bytes,
}

impl Frame {
    pub fn encode(&self) -> Bytes {
        let header = FrameHeader {
            sequence: self.sequence.into(),
            total: self.total.into(),
        };
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.payload.len());
        buf.put_slice(header.as_bytes());
        buf.put_slice(&self.payload);
        buf.freeze()
    }
}

/// Everything an inbound frame can turn out to be, decoded once at ingress.
///
/// [`FrameCodec::classify`] yields the first three variants; the CAN
/// dispatcher produces the rest from identifier-addressed frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameKind {
    Data(Frame),
    Ack(u16),
    RetransmitRequest(Vec<u16>),
    Sot { original_id: u32, expected_length: u16 },
    Eot,
    Rtr { id: u32 },
    Fault(Bytes),
}

/// Fragments payloads into sequenced frames and back, and encodes the two
/// control frames (acknowledgment, retransmit request). No I/O.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    mtu: u16,
}

impl FrameCodec {
    /// Panics if `mtu` leaves no room for payload bytes; MTUs come from a
    /// validated [`crate::config::LinkConfig`].
    pub fn new(mtu: u16) -> Self {
        assert!(mtu as usize > HEADER_SIZE, "mtu must exceed the frame header");
        Self { mtu }
    }

    pub fn payload_size(&self) -> usize {
        self.mtu as usize - HEADER_SIZE
    }

    /// Splits `payload` into `max(1, ceil(len / payload_size))` frames. An
    /// empty payload still yields one frame so the receiver sees a transfer.
    pub fn pack(&self, payload: Bytes) -> Vec<Frame> {
        let payload_size = self.payload_size();
        let total = payload.len().div_ceil(payload_size).max(1);
        assert!(total <= u16::MAX as usize, "payload does not fit a u16 frame count");

        log::debug!(
            "packing {} bytes into {} frames (payload_size={})",
            payload.len(),
            total,
            payload_size
        );

        (0..total)
            .map(|sequence| {
                let start = sequence * payload_size;
                let end = payload.len().min(start + payload_size);
                Frame {
                    sequence: sequence as u16,
                    total: total as u16,
                    payload: payload.slice(start..end),
                }
            })
            .collect()
    }

    /// Reassembles the original payload, in any arrival order. `None` unless
    /// all frames agree on `total`, exactly `total` frames are present, and
    /// their sequence numbers are `0..total` with no duplicates or gaps.
    pub fn unpack(frames: &[Frame]) -> Option<Bytes> {
        let total = frames.first()?.total;
        if frames.len() != total as usize {
            return None;
        }

        let mut ordered: Vec<&Frame> = frames.iter().collect();
        ordered.sort_by_key(|frame| frame.sequence);

        let mut buf = BytesMut::new();
        for (expected, frame) in ordered.into_iter().enumerate() {
            if frame.total != total || frame.sequence as usize != expected {
                return None;
            }
            buf.put_slice(&frame.payload);
        }
        Some(buf.freeze())
    }

    pub fn create_ack(sequence: u16) -> Bytes {
        let mut buf = BytesMut::with_capacity(ACK_LENGTH);
        buf.put_slice(ACK_MARKER);
        buf.put_u16(sequence);
        buf.freeze()
    }

    pub fn is_ack(raw: &[u8]) -> bool {
        raw.starts_with(ACK_MARKER)
    }

    pub fn get_ack_seq(raw: &[u8]) -> Option<u16> {
        if !Self::is_ack(raw) || raw.len() < ACK_LENGTH {
            return None;
        }
        Some(u16::from_be_bytes([raw[3], raw[4]]))
    }

    pub fn create_retransmit_request(missing: &[u16]) -> Bytes {
        let mut buf = BytesMut::with_capacity(4 + missing.len() * 2);
        buf.put_slice(&RETRANSMIT_MARKER);
        buf.put_u16(missing.len() as u16);
        for sequence in missing {
            buf.put_u16(*sequence);
        }
        buf.freeze()
    }

    pub fn is_retransmit_request(raw: &[u8]) -> bool {
        raw.len() >= 4 && raw[..2] == RETRANSMIT_MARKER
    }

    /// `None` for non-requests and for requests truncated short of their
    /// announced count.
    pub fn parse_retransmit_request(raw: &[u8]) -> Option<Vec<u16>> {
        if !Self::is_retransmit_request(raw) {
            return None;
        }
        let count = u16::from_be_bytes([raw[2], raw[3]]) as usize;
        if raw.len() < 4 + count * 2 {
            return None;
        }
        Some(
            (0..count)
                .map(|i| u16::from_be_bytes([raw[4 + i * 2], raw[5 + i * 2]]))
                .collect(),
        )
    }

    /// Single ingress decode for the radio binding: ack test first, then the
    /// retransmit marker, then the data header. `None` means the frame is
    /// malformed and should be logged and dropped, never session-fatal.
    pub fn classify(raw: &[u8]) -> Option<FrameKind> {
        if Self::is_ack(raw) {
            return Self::get_ack_seq(raw).map(FrameKind::Ack);
        }
        if Self::is_retransmit_request(raw) {
            return Self::parse_retransmit_request(raw).map(FrameKind::RetransmitRequest);
        }
        let (header, payload) = FrameHeader::read_from_prefix(raw).ok()?;
        let sequence = header.sequence.get();
        let total = header.total.get();
        (sequence < total).then(|| {
            FrameKind::Data(Frame {
                sequence,
                total,
                payload: Bytes::copy_from_slice(payload),
            })
        })
    }
}
