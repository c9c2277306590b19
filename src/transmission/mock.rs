use super::{CanBusLike, CanFrame, CanMessage, RadioLike};
use bytes::Bytes;
use flume::{Receiver, Sender};
use rand::{Rng, SeedableRng, rngs::StdRng};
use std::time::Duration;

/// In-memory duplex radio: everything sent on one end is heard by the other.
#[derive(Clone)]
pub struct MockRadio {
    sender: Sender<Bytes>,
    receiver: Receiver<Bytes>,
}

impl MockRadio {
    pub fn pair() -> (Self, Self) {
        let (tx1, rx1) = flume::unbounded::<Bytes>();
        let (tx2, rx2) = flume::unbounded::<Bytes>();

        let radio1 = MockRadio {
            sender: tx1,
            receiver: rx2,
        };
        let radio2 = MockRadio {
            sender: tx2,
            receiver: rx1,
        };

        (radio1, radio2)
    }
}

impl RadioLike for MockRadio {
    fn send(&mut self, raw: &[u8]) -> bool {
        self.sender.send(Bytes::copy_from_slice(raw)).is_ok()
    }

    fn receive(&mut self, timeout: Duration) -> Option<Bytes> {
        if timeout.is_zero() {
            self.receiver.try_recv().ok()
        } else {
            self.receiver.recv_timeout(timeout).ok()
        }
    }
}

/// Wraps a radio and drops a fraction of outbound frames, for protocol
/// tests against a lossy link. Seeded so a failing run can be replayed.
pub struct LossyRadio<R: RadioLike> {
    inner: R,
    drop_rate: f64,
    rng: StdRng,
}

impl<R: RadioLike> LossyRadio<R> {
    pub fn new(inner: R, drop_rate: f64, seed: u64) -> Self {
        Self {
            inner,
            drop_rate,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl<R: RadioLike> RadioLike for LossyRadio<R> {
    fn send(&mut self, raw: &[u8]) -> bool {
        if self.rng.random::<f64>() < self.drop_rate {
            log::debug!("lossy link dropped an outbound frame of {} bytes", raw.len());
            return true; // the transmitter saw a successful send
        }
        self.inner.send(raw)
    }

    fn receive(&mut self, timeout: Duration) -> Option<Bytes> {
        self.inner.receive(timeout)
    }
}

/// In-memory duplex CAN bus, mirroring [`MockRadio`].
#[derive(Clone)]
pub struct MockCanBus {
    sender: Sender<CanFrame>,
    receiver: Receiver<CanFrame>,
}

impl MockCanBus {
    pub fn pair() -> (Self, Self) {
        let (tx1, rx1) = flume::unbounded::<CanFrame>();
        let (tx2, rx2) = flume::unbounded::<CanFrame>();

        let bus1 = MockCanBus {
            sender: tx1,
            receiver: rx2,
        };
        let bus2 = MockCanBus {
            sender: tx2,
            receiver: rx1,
        };

        (bus1, bus2)
    }

    /// Inject a remote transmission request at the peer, something the
    /// sending trait surface has no verb for.
    pub fn push_remote_request(&self, id: u32, length: u8) {
        let _ = self.sender.send(CanFrame::RemoteRequest { id, length });
    }
}

impl CanBusLike for MockCanBus {
    fn send(&mut self, message: &CanMessage) -> bool {
        self.sender.send(CanFrame::Message(message.clone())).is_ok()
    }

    fn in_waiting(&self) -> usize {
        self.receiver.len()
    }

    fn receive(&mut self) -> Option<CanFrame> {
        self.receiver.try_recv().ok()
    }
}
