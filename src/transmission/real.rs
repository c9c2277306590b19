use super::RadioLike;
use bytes::Bytes;
use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

/// Ground-bench stand-in for the flight radio: one UDP socket per end of
/// the link. Not flight code — it exists so the protocol can be exercised
/// between two processes during integration testing.
pub struct UdpRadio {
    socket: UdpSocket,
}

impl UdpRadio {
    pub fn bind(local: SocketAddr, remote: SocketAddr) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(local)?;
        socket.connect(remote)?;
        Ok(Self { socket })
    }
}

impl RadioLike for UdpRadio {
    fn send(&mut self, raw: &[u8]) -> bool {
        match self.socket.send(raw) {
            Ok(_) => true,
            Err(err) => {
                log::error!("udp send failed: {err}");
                false
            }
        }
    }

    fn receive(&mut self, timeout: Duration) -> Option<Bytes> {
        // set_read_timeout rejects a zero duration, so a non-blocking poll
        // is clamped to the shortest one it accepts.
        let timeout = timeout.max(Duration::from_millis(1));
        if let Err(err) = self.socket.set_read_timeout(Some(timeout)) {
            log::error!("udp set_read_timeout failed: {err}");
            return None;
        }

        let mut buffer = [0u8; 65536];
        match self.socket.recv(&mut buffer) {
            Ok(length) => Some(Bytes::copy_from_slice(&buffer[..length])),
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => None,
            Err(err) => {
                log::error!("udp receive failed: {err}");
                None
            }
        }
    }
}
