use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use log::{debug, info, warn};

use super::{ReceiveReport, ReceiveStats, TransferSession};
use crate::config::LinkConfig;
use crate::error::ReceiveError;
use crate::protocol::{Frame, FrameCodec, FrameKind};
use crate::transmission::RadioLike;

/// Consumes raw inbound frames for one transfer session at a time: stores
/// data frames, answers each with an ack burst, detects completion, and
/// asks for retransmission when the link goes quiet with frames missing.
pub struct Receiver<'r, R: RadioLike> {
    radio: &'r mut R,
    config: LinkConfig,
    session: Option<TransferSession>,
    stats: ReceiveStats,
}

impl<'r, R: RadioLike> Receiver<'r, R> {
    pub fn new(radio: &'r mut R, config: &LinkConfig) -> Self {
        Self {
            radio,
            config: config.clone(),
            session: None,
            stats: ReceiveStats::default(),
        }
    }

    /// Drops any in-progress session and its bookkeeping.
    pub fn reset(&mut self) {
        self.session = None;
        self.stats = ReceiveStats::default();
    }

    pub fn stats(&self) -> &ReceiveStats {
        &self.stats
    }

    pub fn is_complete(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(TransferSession::is_complete)
    }

    /// Sequence numbers not yet stored; empty while the total is unknown.
    pub fn get_missing(&self) -> Vec<u16> {
        self.session
            .as_ref()
            .map(TransferSession::missing)
            .unwrap_or_default()
    }

    /// Classifies and consumes one raw frame. Returns `true` when it was a
    /// data frame of the current (or a freshly started) session. Acks and
    /// retransmit requests are sender-facing and ignored here; malformed
    /// frames are logged and dropped without touching the session.
    pub fn handle_frame(&mut self, raw: &[u8]) -> bool {
        match FrameCodec::classify(raw) {
            Some(FrameKind::Data(frame)) => {
                self.store_frame(frame);
                true
            }
            Some(FrameKind::Ack(sequence)) => {
                debug!("ack for frame {sequence} ignored on the receive path");
                false
            }
            Some(FrameKind::RetransmitRequest(_)) => {
                debug!("retransmit request ignored on the receive path");
                false
            }
            Some(other) => {
                debug!("control frame {other:?} has no meaning on this binding");
                false
            }
            None => {
                warn!("malformed frame of {} bytes discarded", raw.len());
                self.stats.invalid_frames += 1;
                false
            }
        }
    }

    fn store_frame(&mut self, frame: Frame) {
        let fresh = match &self.session {
            Some(session) if session.total() == frame.total => false,
            Some(session) => {
                warn!(
                    "frame announces total={} but session expects {}; starting over",
                    frame.total,
                    session.total()
                );
                true
            }
            None => {
                info!("transfer started, expecting {} frames", frame.total);
                true
            }
        };
        if fresh {
            self.session = Some(TransferSession::new(frame.total));
        }
        let Some(session) = self.session.as_mut() else {
            return;
        };

        let sequence = frame.sequence;
        if session.store(sequence, frame.payload) {
            self.stats.frames_received += 1;
            debug!("stored frame {sequence}/{}", session.total());
        } else {
            self.stats.duplicate_frames += 1;
            debug!("duplicate frame {sequence}, re-acknowledging");
        }
        self.send_ack_burst(sequence);
    }

    /// `num_acks` identical acks with `ack_delay` gaps: cheap to send, and
    /// the sender only needs one of them to land.
    fn send_ack_burst(&mut self, sequence: u16) {
        let ack = FrameCodec::create_ack(sequence);
        for i in 0..self.config.num_acks {
            if !self.radio.send(&ack) {
                debug!("radio rejected ack for frame {sequence}");
            }
            if i + 1 < self.config.num_acks {
                thread::sleep(self.config.ack_delay);
            }
        }
    }

    /// Loops reading frames until the session completes, `timeout` elapses,
    /// or the idle-triggered retransmit rounds run out. Starts from a clean
    /// session; the previous one, if any, is discarded.
    pub fn receive_until_complete(
        &mut self,
        timeout: Duration,
    ) -> Result<ReceiveReport, ReceiveError> {
        self.reset();
        let started = Instant::now();
        let mut last_frame_at = started;
        info!("receiver listening, timeout {timeout:?}");

        loop {
            if let Some(raw) = self.radio.receive(self.config.receive_delay) {
                if self.handle_frame(&raw) {
                    last_frame_at = Instant::now();
                }
                if let Some(payload) = self.try_finish() {
                    self.stats.elapsed = started.elapsed();
                    info!(
                        "transfer complete: {} bytes in {:?}",
                        payload.len(),
                        self.stats.elapsed
                    );
                    return Ok(ReceiveReport {
                        payload,
                        stats: self.stats.clone(),
                    });
                }
            }

            if started.elapsed() >= timeout {
                let missing = self.get_missing();
                warn!(
                    "receive timed out with {} frames missing: {missing:?}",
                    missing.len()
                );
                self.stats.elapsed = started.elapsed();
                return Err(ReceiveError::Partial {
                    missing,
                    stats: self.stats.clone(),
                });
            }

            if last_frame_at.elapsed() >= self.config.idle_timeout {
                let missing = self.get_missing();
                if missing.is_empty() {
                    // nothing to ask for until the total is known
                    continue;
                }
                if self.stats.retransmit_rounds >= self.config.max_retransmit_rounds {
                    warn!(
                        "retransmit rounds exhausted with {} frames missing",
                        missing.len()
                    );
                    self.stats.elapsed = started.elapsed();
                    return Err(ReceiveError::Partial {
                        missing,
                        stats: self.stats.clone(),
                    });
                }
                self.stats.retransmit_rounds += 1;
                info!(
                    "idle with {} frames missing, requesting retransmission (round {}/{})",
                    missing.len(),
                    self.stats.retransmit_rounds,
                    self.config.max_retransmit_rounds
                );
                if !self.radio.send(&FrameCodec::create_retransmit_request(&missing)) {
                    debug!("radio rejected the retransmit request");
                }
                last_frame_at = Instant::now();
            }
        }
    }

    fn try_finish(&self) -> Option<Bytes> {
        self.session.as_ref().and_then(TransferSession::reassemble)
    }
}
