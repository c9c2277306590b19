use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use log::{debug, info, warn};

use super::BulkReport;
use crate::config::LinkConfig;
use crate::constants::{ACK_SETTLE, POLL_INTERVAL, PROGRESS_INTERVAL, RETRANSMIT_SETTLE, RETRY_DELAY};
use crate::error::SendError;
use crate::protocol::{Frame, FrameCodec, FrameKind};
use crate::transmission::RadioLike;
use crate::util::poll_until;

/// Sends one frame at a time and blocks on its acknowledgment, retrying up
/// to `max_retries` before reporting the whole transfer failed. Used for
/// small or critical payloads, and by [`BulkSender`] to land frame 0.
///
/// Holds the radio exclusively for the duration of a call; one session per
/// transport handle.
pub struct ReliableSender<'r, R: RadioLike> {
    radio: &'r mut R,
    codec: FrameCodec,
    config: LinkConfig,
}

impl<'r, R: RadioLike> ReliableSender<'r, R> {
    pub fn new(radio: &'r mut R, config: &LinkConfig) -> Self {
        Self {
            radio,
            codec: FrameCodec::new(config.mtu),
            config: config.clone(),
        }
    }

    pub fn send(&mut self, payload: Bytes) -> Result<(), SendError> {
        let frames = self.codec.pack(payload);
        info!("sending {} frames, ack-gated", frames.len());

        for frame in &frames {
            if frame.sequence as usize % PROGRESS_INTERVAL == 0 {
                info!("sending frame {}/{}", frame.sequence, frame.total);
            }
            self.send_frame(frame)?;
        }

        info!("all {} frames acknowledged", frames.len());
        Ok(())
    }

    /// One frame through the full SEND -> WAIT_ACK -> RETRY machinery.
    pub fn send_frame(&mut self, frame: &Frame) -> Result<(), SendError> {
        let raw = frame.encode();
        for attempt in 1..=self.config.max_retries {
            if !self.radio.send(&raw) {
                debug!("radio rejected frame {} on attempt {attempt}", frame.sequence);
            }

            if self.wait_for_ack(frame.sequence) {
                thread::sleep(self.config.send_delay);
                return Ok(());
            }

            debug!(
                "no ack for frame {} (attempt {attempt}/{})",
                frame.sequence, self.config.max_retries
            );
            if attempt < self.config.max_retries {
                thread::sleep(RETRY_DELAY);
            }
        }

        warn!(
            "giving up on frame {} after {} attempts",
            frame.sequence, self.config.max_retries
        );
        Err(SendError::AckTimeout {
            sequence: frame.sequence,
            attempts: self.config.max_retries,
        })
    }

    /// Polls the radio until the matching ack arrives or `ack_timeout`
    /// elapses. Anything else heard during the wait is discarded.
    fn wait_for_ack(&mut self, expected: u16) -> bool {
        thread::sleep(self.config.send_delay);

        let radio = &mut *self.radio;
        let acked = poll_until(self.config.ack_timeout, POLL_INTERVAL, || {
            let raw = radio.receive(Duration::ZERO)?;
            match FrameCodec::classify(&raw) {
                Some(FrameKind::Ack(sequence)) if sequence == expected => Some(()),
                _ => {
                    debug!("ignoring frame heard while waiting for ack {expected}");
                    None
                }
            }
        })
        .is_some();

        if acked {
            // let duplicate acks from the burst drain off the link
            thread::sleep(ACK_SETTLE);
        }
        acked
    }
}

/// Streams every frame after the first without waiting for acknowledgment,
/// then listens for retransmit requests and serves them. Trades per-frame
/// latency for throughput on larger, lower-priority transfers.
pub struct BulkSender<'r, R: RadioLike> {
    radio: &'r mut R,
    codec: FrameCodec,
    config: LinkConfig,
}

impl<'r, R: RadioLike> BulkSender<'r, R> {
    pub fn new(radio: &'r mut R, config: &LinkConfig) -> Self {
        Self {
            radio,
            codec: FrameCodec::new(config.mtu),
            config: config.clone(),
        }
    }

    pub fn send(&mut self, payload: Bytes) -> Result<BulkReport, SendError> {
        let frames = self.codec.pack(payload);
        info!("bulk sending {} frames", frames.len());

        let Some(first) = frames.first() else {
            return Ok(BulkReport {
                frames_sent: 0,
                retransmit_rounds: 0,
            });
        };

        // Frame 0 travels ack-gated so the receiver learns the transfer
        // total before the unacknowledged stream starts.
        ReliableSender::new(&mut *self.radio, &self.config).send_frame(first)?;

        for frame in &frames[1..] {
            if frame.sequence as usize % PROGRESS_INTERVAL == 0 {
                info!("streaming frame {}/{}", frame.sequence, frame.total);
            }
            if !self.radio.send(&frame.encode()) {
                debug!("radio rejected streamed frame {}", frame.sequence);
            }
            // Half-duplex: anything heard while we were transmitting is
            // stale (ack bursts for stored frames), not for this path.
            while self.radio.receive(Duration::ZERO).is_some() {}
            thread::sleep(self.config.send_delay);
        }

        let retransmit_rounds = self.serve_retransmit_requests(&frames);
        info!(
            "bulk send of {} frames finished after {retransmit_rounds} retransmit rounds",
            frames.len()
        );
        Ok(BulkReport {
            frames_sent: frames.len(),
            retransmit_rounds,
        })
    }

    /// The retransmit-listening window. A served request rearms the full
    /// window; any other frame, or silence past `retransmit_wait`, ends it.
    fn serve_retransmit_requests(&mut self, frames: &[Frame]) -> u32 {
        let mut rounds = 0;
        let mut deadline = Instant::now() + self.config.retransmit_wait;
        info!("listening for retransmit requests");

        while Instant::now() < deadline {
            let Some(raw) = self.radio.receive(POLL_INTERVAL) else {
                continue;
            };

            let missing = match FrameCodec::classify(&raw) {
                Some(FrameKind::RetransmitRequest(missing)) => missing,
                // our own ack traffic, arriving late on the half-duplex
                // link; it must not starve the retransmit path
                Some(FrameKind::Ack(sequence)) => {
                    debug!("stale ack for frame {sequence} ignored in the window");
                    continue;
                }
                other => {
                    debug!("window closed by a non-retransmit frame: {other:?}");
                    break;
                }
            };

            rounds += 1;
            info!("retransmit request names {} frames", missing.len());
            thread::sleep(RETRANSMIT_SETTLE);

            for sequence in missing {
                let Some(frame) = frames.get(sequence as usize) else {
                    warn!(
                        "request names frame {sequence} outside the transfer of {}",
                        frames.len()
                    );
                    break;
                };
                let raw = frame.encode();
                for _ in 0..self.config.retransmit_redundancy {
                    debug!("retransmitting frame {sequence}");
                    if !self.radio.send(&raw) {
                        debug!("radio rejected retransmission of frame {sequence}");
                    }
                    thread::sleep(self.config.send_delay);
                }
            }

            deadline = Instant::now() + self.config.retransmit_wait;
        }

        rounds
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::transmission::mock::MockRadio;

    fn fast_config() -> LinkConfig {
        LinkConfig {
            mtu: 16,
            ack_timeout: Duration::from_millis(40),
            max_retries: 3,
            send_delay: Duration::from_millis(1),
            receive_delay: Duration::from_millis(5),
            idle_timeout: Duration::from_millis(60),
            max_retransmit_rounds: 3,
            num_acks: 1,
            ack_delay: Duration::from_millis(1),
            retransmit_wait: Duration::from_millis(400),
            retransmit_redundancy: 2,
        }
    }

    fn drain(radio: &mut MockRadio) -> Vec<Bytes> {
        let mut frames = vec![];
        while let Some(raw) = radio.receive(Duration::ZERO) {
            frames.push(raw);
        }
        frames
    }

    #[test]
    fn reliable_gives_up_after_exact_attempt_count() {
        let (mut near, mut far) = MockRadio::pair();
        let config = fast_config();

        let mut sender = ReliableSender::new(&mut near, &config);
        let err = sender.send(Bytes::from_static(b"nobody listens")).unwrap_err();
        assert!(matches!(
            err,
            SendError::AckTimeout {
                sequence: 0,
                attempts: 3
            }
        ));

        // exactly max_retries transmissions of frame 0, nothing else
        let sent = drain(&mut far);
        assert_eq!(sent.len(), 3);
        assert!(sent.iter().all(|raw| raw == &sent[0]));
    }

    #[test]
    fn reliable_advances_only_on_matching_ack() {
        let (mut near, mut far) = MockRadio::pair();
        let config = fast_config();

        // queue noise plus the ack for frame 0 before the sender polls
        far.send(b"garbage that is not an ack");
        far.send(&FrameCodec::create_ack(7));
        far.send(&FrameCodec::create_ack(0));

        let mut sender = ReliableSender::new(&mut near, &config);
        sender.send(Bytes::from_static(b"tiny")).unwrap();

        let sent = drain(&mut far);
        assert_eq!(sent.len(), 1);
        assert_eq!(
            FrameCodec::classify(&sent[0]),
            Some(FrameKind::Data(Frame {
                sequence: 0,
                total: 1,
                payload: Bytes::from_static(b"tiny"),
            }))
        );
    }

    #[test]
    fn bulk_serves_retransmit_requests_with_redundancy() {
        let (mut near, far) = MockRadio::pair();
        let config = fast_config();
        let payload = Bytes::from(crate::util::generate_random(50)); // 5 frames at mtu 16

        let peer = std::thread::spawn(move || {
            let mut far = far;
            // ack frame 0 so the stream starts
            let first = far.receive(Duration::from_secs(2)).expect("frame 0");
            let Some(FrameKind::Data(frame)) = FrameCodec::classify(&first) else {
                panic!("expected frame 0 first, got {first:?}");
            };
            assert_eq!(frame.sequence, 0);
            far.send(&FrameCodec::create_ack(0));

            // absorb the stream of frames 1..=4
            let mut streamed = 0;
            while streamed < 4 {
                if far.receive(Duration::from_secs(2)).is_some() {
                    streamed += 1;
                }
            }

            // pretend frames 2 and 4 were lost; give the sender time to
            // enter its listening window first
            std::thread::sleep(Duration::from_millis(50));
            far.send(&FrameCodec::create_retransmit_request(&[2, 4]));

            let mut resent = vec![];
            while resent.len() < 4 {
                let raw = far.receive(Duration::from_secs(2)).expect("retransmission");
                let Some(FrameKind::Data(frame)) = FrameCodec::classify(&raw) else {
                    panic!("expected a data frame, got {raw:?}");
                };
                resent.push(frame.sequence);
            }
            // the sender's window now expires on its own
            resent
        });

        let report = BulkSender::new(&mut near, &config).send(payload).unwrap();
        assert_eq!(report.frames_sent, 5);
        assert_eq!(report.retransmit_rounds, 1);

        // each requested frame went out twice, in direct succession
        assert_eq!(peer.join().unwrap(), vec![2, 2, 4, 4]);
    }

    #[test]
    fn bulk_window_ignores_out_of_range_requests() {
        let (mut near, far) = MockRadio::pair();
        let config = fast_config();

        let peer = std::thread::spawn(move || {
            let mut far = far;
            let _ = far.receive(Duration::from_secs(2)).expect("frame 0");
            far.send(&FrameCodec::create_ack(0));
            std::thread::sleep(Duration::from_millis(50));
            far.send(&FrameCodec::create_retransmit_request(&[40]));
            // nothing should come back for sequence 40
            let mut data_frames = 0;
            while let Some(raw) = far.receive(Duration::from_millis(100)) {
                if matches!(FrameCodec::classify(&raw), Some(FrameKind::Data(_))) {
                    data_frames += 1;
                }
            }
            data_frames
        });

        let report = BulkSender::new(&mut near, &config)
            .send(Bytes::from_static(b"one frame"))
            .unwrap();
        assert_eq!(report.frames_sent, 1);
        assert_eq!(report.retransmit_rounds, 1);
        assert_eq!(peer.join().unwrap(), 0);
    }
}
