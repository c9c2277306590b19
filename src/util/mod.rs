use std::time::{Duration, Instant};

/// Bounded busy-wait: call `poll` until it yields a value or `timeout`
/// elapses, sleeping `interval` between attempts. The sleep is the yield
/// point that lets the cooperative scheduler run other tasks; cancellation
/// is timeout-only by design.
pub fn poll_until<T>(
    timeout: Duration,
    interval: Duration,
    mut poll: impl FnMut() -> Option<T>,
) -> Option<T> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(value) = poll() {
            return Some(value);
        }
        if Instant::now() >= deadline {
            return None;
        }
        std::thread::sleep(interval);
    }
}

pub fn generate_random(size: usize) -> Vec<u8> {
    use rand::Rng;
    let mut data: Vec<u8> = vec![0; size];
    for byte in data.iter_mut() {
        *byte = rand::rng().random();
    }
    data
}
