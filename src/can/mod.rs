use std::collections::{BTreeMap, HashMap};
use std::thread;

use bytes::{BufMut, Bytes, BytesMut};
use log::{debug, info, warn};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::config::LinkConfig;
use crate::constants::{
    ACK_MARKER, CAN_ID_MASK, CAN_ID_SHIFT, CAN_MTU, CAN_SEQUENCE_MASK, EOT_PAYLOAD, POLL_INTERVAL,
    RETRY_DELAY,
};
use crate::error::{LinkError, SendError};
use crate::transmission::{CanBusLike, CanFrame, CanMessage};
use crate::util::poll_until;

/// The closed registry of message kinds spoken on the intra-spacecraft bus.
/// Naming anything outside it is a programming error, not a link condition.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
pub enum MessageId {
    BootSequence = 0x01,
    CriticalPowerOperations = 0x02,
    LowPowerOperations = 0x03,
    NormalPowerOperations = 0x04,
    Fault = 0x1A4,
    Sot = 0xA5,
    Eot = 0xA6,
}

impl MessageId {
    pub fn from_name(name: &str) -> Result<Self, LinkError> {
        match name {
            "BOOT_SEQUENCE" => Ok(Self::BootSequence),
            "CRITICAL_POWER_OPERATIONS" => Ok(Self::CriticalPowerOperations),
            "LOW_POWER_OPERATIONS" => Ok(Self::LowPowerOperations),
            "NORMAL_POWER_OPERATIONS" => Ok(Self::NormalPowerOperations),
            "FAULT_ID" => Ok(Self::Fault),
            "SOT_ID" => Ok(Self::Sot),
            "EOT_ID" => Ok(Self::Eot),
            other => Err(LinkError::UnknownMessageId(other.to_string())),
        }
    }
}

/// Reassembly state for one logical message id. Re-initialized, never
/// merged, whenever a fresh start-of-transmission for the id arrives.
#[derive(Debug, Default)]
struct MultiMessageBuffer {
    expected_length: u16,
    received_chunks: BTreeMap<u16, Bytes>,
    is_complete: bool,
}

impl MultiMessageBuffer {
    fn new(expected_length: u16) -> Self {
        Self {
            expected_length,
            ..Self::default()
        }
    }

    fn reassemble(&mut self) -> Bytes {
        let mut buf = BytesMut::new();
        for chunk in self.received_chunks.values() {
            buf.put_slice(chunk);
        }
        self.is_complete = true;
        buf.freeze()
    }
}

/// What the receive dispatcher hands to the rest of the flight software.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CanEvent {
    /// A complete message: single-frame, or a reassembled multi-chunk one.
    Message { id: u32, data: Bytes },
    Fault { data: Bytes },
    RemoteRequest { id: u32 },
}

/// The CAN rendition of the transport: 8-byte frames, sequence numbers
/// carried in the extended identifier, and an explicit SOT/EOT handshake
/// because the bus has no native total-length field.
///
/// Completed messages and faults are pushed onto a flume channel returned
/// by [`CanBinding::new`]; the binding itself stays single-threaded.
pub struct CanBinding<'b, B: CanBusLike> {
    bus: &'b mut B,
    config: LinkConfig,
    buffers: HashMap<u32, MultiMessageBuffer>,
    events: flume::Sender<CanEvent>,
}

impl<'b, B: CanBusLike> CanBinding<'b, B> {
    pub fn new(bus: &'b mut B, config: &LinkConfig) -> (Self, flume::Receiver<CanEvent>) {
        let (events, consumer) = flume::unbounded();
        (
            Self {
                bus,
                config: config.clone(),
                buffers: HashMap::new(),
                events,
            },
            consumer,
        )
    }

    /// Sends `data` under a message kind named by the caller, e.g.
    /// `"BOOT_SEQUENCE"`. Unknown names fail fast.
    pub fn send_named(&mut self, id_str: &str, data: &[u8]) -> Result<(), LinkError> {
        let id = MessageId::from_name(id_str)?;
        self.send(id, data).map_err(LinkError::from)
    }

    pub fn send(&mut self, id: MessageId, data: &[u8]) -> Result<(), SendError> {
        let messages = chunk_messages(id.into(), data);
        info!("can send of {} bytes as {} frames", data.len(), messages.len());

        if messages.len() > 1 {
            self.send_sot(id.into(), messages.len())?;
        }
        for message in &messages {
            self.send_with_ack(message)?;
        }
        if messages.len() > 1 {
            self.send_eot();
        }
        Ok(())
    }

    /// The per-frame ack gate, specialized to 8-byte frames: same state
    /// machine as the radio sender, with the CAN id standing in for the
    /// sequence number.
    fn send_with_ack(&mut self, message: &CanMessage) -> Result<(), SendError> {
        for attempt in 1..=self.config.max_retries {
            if !self.bus.send(message) {
                debug!("bus rejected frame id={:#x} on attempt {attempt}", message.id);
            }
            if self.wait_for_ack(message.id) {
                return Ok(());
            }
            debug!(
                "no ack for id {:#x} (attempt {attempt}/{})",
                message.id, self.config.max_retries
            );
            if attempt < self.config.max_retries {
                thread::sleep(RETRY_DELAY);
            }
        }
        warn!(
            "giving up on CAN frame id {:#x} after {} attempts",
            message.id, self.config.max_retries
        );
        Err(SendError::CanAckTimeout {
            id: message.id,
            attempts: self.config.max_retries,
        })
    }

    /// Announce a multi-chunk transfer: `"{original_id}:{chunk_count}"` on
    /// the reserved SOT identifier, acknowledged before any data moves.
    fn send_sot(&mut self, original_id: u32, chunk_count: usize) -> Result<(), SendError> {
        let payload = format!("{original_id}:{chunk_count}");
        if payload.len() > CAN_MTU || chunk_count > u16::MAX as usize {
            return Err(SendError::TooManyChunks { chunks: chunk_count });
        }

        let message = CanMessage {
            id: MessageId::Sot.into(),
            data: payload.into_bytes(),
            extended: false,
        };
        if !self.bus.send(&message) {
            debug!("bus rejected the start-of-transmission frame");
        }
        info!("sent SOT for id {original_id} announcing {chunk_count} chunks");

        if self.wait_for_ack(MessageId::Sot.into()) {
            Ok(())
        } else {
            warn!("start-of-transmission for id {original_id} was not acknowledged");
            Err(SendError::HandshakeTimeout)
        }
    }

    fn send_eot(&mut self) {
        let message = CanMessage {
            id: MessageId::Eot.into(),
            data: EOT_PAYLOAD.to_vec(),
            extended: false,
        };
        if !self.bus.send(&message) {
            debug!("bus rejected the end-of-transmission frame");
        }
    }

    /// Drains the listener until an ack echoing `expected_id` shows up or
    /// `ack_timeout` elapses. Other traffic heard during the wait belongs
    /// to nobody (half-duplex, one session per bus) and is dropped.
    fn wait_for_ack(&mut self, expected_id: u32) -> bool {
        let bus = &mut *self.bus;
        poll_until(self.config.ack_timeout, POLL_INTERVAL, || {
            while bus.in_waiting() > 0 {
                match bus.receive() {
                    Some(CanFrame::Message(message)) if message.data == ACK_MARKER => {
                        if message.id == expected_id {
                            return Some(());
                        }
                        debug!("ack for unexpected id {:#x} dropped", message.id);
                    }
                    Some(other) => debug!("non-ack frame dropped during ack wait: {other:?}"),
                    None => break,
                }
            }
            None
        })
        .is_some()
    }

    /// Drains the listener and dispatches every waiting frame. Call this
    /// from the flight loop whenever the task owns the bus.
    pub fn poll(&mut self) {
        while self.bus.in_waiting() > 0 {
            let Some(frame) = self.bus.receive() else {
                break;
            };
            self.dispatch(frame);
        }
    }

    fn dispatch(&mut self, frame: CanFrame) {
        match frame {
            CanFrame::RemoteRequest { id, length } => {
                debug!("remote transmission request for id {id:#x}, length {length}");
                self.emit(CanEvent::RemoteRequest { id });
            }
            CanFrame::Message(message) => {
                if message.data == ACK_MARKER {
                    debug!("stray ack for id {:#x} dropped", message.id);
                    return;
                }
                // every non-RTR, non-ack frame is echo-acknowledged so the
                // peer's wait loop can advance
                self.send_ack(message.id, message.extended);

                if message.id == u32::from(MessageId::Fault) {
                    warn!("fault frame on the bus: {:?}", message.data);
                    self.emit(CanEvent::Fault {
                        data: Bytes::from(message.data),
                    });
                } else if message.id == u32::from(MessageId::Sot) {
                    self.handle_sot(&message);
                } else if message.id == u32::from(MessageId::Eot) {
                    // completion is driven by the chunk count, not by EOT
                    debug!("end-of-transmission acknowledged");
                } else if message.extended {
                    self.handle_chunk(&message);
                } else {
                    debug!("single frame for id {:#x}", message.id);
                    self.emit(CanEvent::Message {
                        id: message.id,
                        data: Bytes::from(message.data),
                    });
                }
            }
        }
    }

    fn send_ack(&mut self, id: u32, extended: bool) {
        let ack = CanMessage {
            id,
            data: ACK_MARKER.to_vec(),
            extended,
        };
        if !self.bus.send(&ack) {
            debug!("bus rejected ack for id {id:#x}");
        }
    }

    /// A fresh SOT always wins: any partial state for the id is discarded.
    fn handle_sot(&mut self, message: &CanMessage) {
        let Some((original_id, expected_length)) = parse_sot(&message.data) else {
            warn!("malformed SOT payload {:?} discarded", message.data);
            return;
        };
        info!("SOT for id {original_id}, expecting {expected_length} chunks");
        self.buffers
            .insert(original_id, MultiMessageBuffer::new(expected_length));
    }

    fn handle_chunk(&mut self, message: &CanMessage) {
        let original_id = message.id >> CAN_ID_SHIFT;
        let sequence = message.id & CAN_SEQUENCE_MASK;
        let Ok(sequence) = u16::try_from(sequence) else {
            warn!("chunk sequence {sequence} does not fit the announced range");
            return;
        };

        let Some(buffer) = self.buffers.get_mut(&original_id) else {
            warn!("unexpected chunk for unannounced id {original_id}");
            return;
        };
        if buffer.is_complete {
            debug!("late chunk {sequence} for completed id {original_id}");
            return;
        }

        buffer
            .received_chunks
            .insert(sequence, Bytes::copy_from_slice(&message.data));
        debug!(
            "stored chunk {sequence} for id {original_id} ({}/{})",
            buffer.received_chunks.len(),
            buffer.expected_length
        );

        if buffer.received_chunks.len() == buffer.expected_length as usize {
            let data = buffer.reassemble();
            info!(
                "message for id {original_id} complete, {} bytes",
                data.len()
            );
            self.emit(CanEvent::Message {
                id: original_id,
                data,
            });
        }
    }

    fn emit(&self, event: CanEvent) {
        if self.events.send(event).is_err() {
            debug!("event consumer is gone, message dropped");
        }
    }
}

/// Fragments `data` into CAN frames. A single sub-MTU message keeps its
/// plain identifier; anything larger moves on extended identifiers that
/// carry `(original_id << 22) | sequence`.
fn chunk_messages(id: u32, data: &[u8]) -> Vec<CanMessage> {
    if data.len() <= CAN_MTU {
        return vec![CanMessage {
            id,
            data: data.to_vec(),
            extended: false,
        }];
    }
    data.chunks(CAN_MTU)
        .enumerate()
        .map(|(sequence, chunk)| CanMessage {
            id: ((id & CAN_ID_MASK) << CAN_ID_SHIFT) | sequence as u32,
            data: chunk.to_vec(),
            extended: true,
        })
        .collect()
}

fn parse_sot(data: &[u8]) -> Option<(u32, u16)> {
    let text = std::str::from_utf8(data).ok()?;
    let (id, length) = text.split_once(':')?;
    Some((id.parse().ok()?, length.parse().ok()?))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::transmission::mock::MockCanBus;
    use std::time::Duration;

    fn fast_config() -> LinkConfig {
        LinkConfig {
            ack_timeout: Duration::from_millis(60),
            max_retries: 3,
            send_delay: Duration::from_millis(1),
            ..LinkConfig::default()
        }
    }

    fn sot_message(payload: &[u8]) -> CanFrame {
        CanFrame::Message(CanMessage {
            id: MessageId::Sot.into(),
            data: payload.to_vec(),
            extended: false,
        })
    }

    fn chunk_frame(original_id: u32, sequence: u32, data: &[u8]) -> CanFrame {
        CanFrame::Message(CanMessage {
            id: (original_id << CAN_ID_SHIFT) | sequence,
            data: data.to_vec(),
            extended: true,
        })
    }

    #[test]
    fn registry_rejects_unknown_names() {
        assert_eq!(
            MessageId::from_name("BOOT_SEQUENCE").unwrap(),
            MessageId::BootSequence
        );
        assert_eq!(u32::from(MessageId::Fault), 0x1A4);

        let err = MessageId::from_name("WARP_DRIVE").unwrap_err();
        assert!(matches!(err, LinkError::UnknownMessageId(name) if name == "WARP_DRIVE"));
    }

    #[test]
    fn short_messages_keep_their_plain_identifier() {
        let messages = chunk_messages(0x04, b"8 bytes!");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, 0x04);
        assert!(!messages[0].extended);
    }

    #[test]
    fn long_messages_carry_sequence_in_the_extended_identifier() {
        let messages = chunk_messages(0x04, &[0xEE; 20]);
        assert_eq!(messages.len(), 3);
        for (sequence, message) in messages.iter().enumerate() {
            assert!(message.extended);
            assert_eq!(message.id >> CAN_ID_SHIFT, 0x04);
            assert_eq!(message.id & CAN_SEQUENCE_MASK, sequence as u32);
        }
        assert_eq!(messages[2].data.len(), 4);
    }

    #[test]
    fn sot_parses_and_reinitializes_the_buffer() {
        let (mut bus, mut peer) = MockCanBus::pair();
        let config = fast_config();
        let (mut binding, events) = CanBinding::new(&mut bus, &config);

        // a partial transfer for id 1 is underway
        binding.dispatch(sot_message(b"1:3"));
        binding.dispatch(chunk_frame(1, 0, b"stale"));
        assert_eq!(binding.buffers[&1].received_chunks.len(), 1);

        // a fresh SOT discards it wholesale
        binding.dispatch(sot_message(b"1:42"));
        let buffer = &binding.buffers[&1];
        assert_eq!(buffer.expected_length, 42);
        assert!(buffer.received_chunks.is_empty());
        assert!(!buffer.is_complete);

        assert!(events.try_recv().is_err());
        // every SOT and chunk was echo-acknowledged
        let mut acks = 0;
        while let Some(CanFrame::Message(message)) = peer.receive() {
            if message.data == ACK_MARKER {
                acks += 1;
            }
        }
        assert_eq!(acks, 3);
    }

    #[test]
    fn malformed_sot_is_dropped() {
        let (mut bus, _peer) = MockCanBus::pair();
        let config = fast_config();
        let (mut binding, _events) = CanBinding::new(&mut bus, &config);

        binding.dispatch(sot_message(b"not a handshake"));
        binding.dispatch(sot_message(b"1:many"));
        assert!(binding.buffers.is_empty());
    }

    #[test]
    fn chunks_reassemble_in_sequence_order() {
        let (mut bus, _peer) = MockCanBus::pair();
        let config = fast_config();
        let (mut binding, events) = CanBinding::new(&mut bus, &config);

        binding.dispatch(sot_message(b"2:3"));
        // arrival order is not sequence order
        binding.dispatch(chunk_frame(2, 2, b"tail"));
        binding.dispatch(chunk_frame(2, 0, b"12345678"));
        binding.dispatch(chunk_frame(2, 1, b"abcdefgh"));

        let event = events.try_recv().unwrap();
        assert_eq!(
            event,
            CanEvent::Message {
                id: 2,
                data: Bytes::from_static(b"12345678abcdefghtail"),
            }
        );

        // a late duplicate chunk does not emit a second message
        binding.dispatch(chunk_frame(2, 1, b"abcdefgh"));
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn unannounced_chunks_are_ignored() {
        let (mut bus, _peer) = MockCanBus::pair();
        let config = fast_config();
        let (mut binding, events) = CanBinding::new(&mut bus, &config);

        binding.dispatch(chunk_frame(3, 0, b"orphan"));
        assert!(binding.buffers.is_empty());
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn faults_and_rtr_become_events() {
        let (mut bus, mut peer) = MockCanBus::pair();
        let config = fast_config();
        let (mut binding, events) = CanBinding::new(&mut bus, &config);

        binding.dispatch(CanFrame::Message(CanMessage {
            id: MessageId::Fault.into(),
            data: b"BATT".to_vec(),
            extended: false,
        }));
        binding.dispatch(CanFrame::RemoteRequest { id: 0x04, length: 8 });

        assert_eq!(
            events.try_recv().unwrap(),
            CanEvent::Fault {
                data: Bytes::from_static(b"BATT")
            }
        );
        assert_eq!(events.try_recv().unwrap(), CanEvent::RemoteRequest { id: 0x04 });

        // the fault was acknowledged, the RTR was not
        let mut acks = 0;
        while let Some(CanFrame::Message(message)) = peer.receive() {
            if message.data == ACK_MARKER {
                acks += 1;
            }
        }
        assert_eq!(acks, 1);
    }

    #[test]
    fn multi_chunk_send_and_receive_end_to_end() {
        let (near, far) = MockCanBus::pair();
        let config = fast_config();
        let payload: Vec<u8> = (0..30u8).collect(); // 4 chunks

        let peer = std::thread::spawn(move || {
            let mut far = far;
            let config = fast_config();
            let (mut binding, events) = CanBinding::new(&mut far, &config);
            let deadline = std::time::Instant::now() + Duration::from_secs(5);
            loop {
                binding.poll();
                if let Ok(event) = events.try_recv() {
                    return event;
                }
                if std::time::Instant::now() >= deadline {
                    panic!("no complete message before the deadline");
                }
                thread::sleep(Duration::from_millis(2));
            }
        });

        let mut near = near;
        let (mut binding, _events) = CanBinding::new(&mut near, &config);
        binding.send_named("BOOT_SEQUENCE", &payload).unwrap();

        assert_eq!(
            peer.join().unwrap(),
            CanEvent::Message {
                id: 0x01,
                data: Bytes::from(payload),
            }
        );
    }

    #[test]
    fn send_fails_fast_on_unknown_name() {
        let (mut bus, _peer) = MockCanBus::pair();
        let config = fast_config();
        let (mut binding, _events) = CanBinding::new(&mut bus, &config);

        let err = binding.send_named("TURBO_ENCABULATOR", b"x").unwrap_err();
        assert!(matches!(err, LinkError::UnknownMessageId(_)));
    }

    #[test]
    fn unacknowledged_chunk_times_out() {
        let (mut bus, _peer) = MockCanBus::pair();
        let config = fast_config();
        let (mut binding, _events) = CanBinding::new(&mut bus, &config);

        let err = binding.send(MessageId::NormalPowerOperations, b"quiet").unwrap_err();
        assert!(matches!(
            err,
            SendError::CanAckTimeout { id: 0x04, attempts: 3 }
        ));
    }
}
