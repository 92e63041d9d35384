//! Low level frame devices the interfaces bridge to.

use std::sync::Mutex;
use std::sync::mpsc::{
    sync_channel,
    Receiver,
    SyncSender,
};

use crate::Result;

/// A low level interface for sending and receiving frames. The read and
/// write loops run on separate tasks, so both operations take `&self`.
pub trait Device: Send + Sync {
    /// Sends a frame across the link.
    fn send(&self, buffer: &[u8]) -> Result<()>;

    /// Blocks for a frame from the link, returning its size.
    ///
    /// The buffer should be at least max_transmission_unit() bytes long to
    /// avoid truncation.
    fn recv(&self, buffer: &mut [u8]) -> Result<usize>;

    /// Returns the [MTU](https://en.wikipedia.org/wiki/Maximum_transmission_unit)
    /// of the link.
    fn max_transmission_unit(&self) -> usize;
}

/// Frames a loopback device can hold before writers stall.
const LOOPBACK_QUEUE_LEN: usize = 128;

/// An in-process device whose write side feeds its read side.
pub struct Loopback {
    queue: SyncSender<Vec<u8>>,
    frames: Mutex<Receiver<Vec<u8>>>,
}

impl Loopback {
    pub fn new() -> Loopback {
        let (queue, frames) = sync_channel(LOOPBACK_QUEUE_LEN);
        Loopback {
            queue,
            frames: Mutex::new(frames),
        }
    }
}

impl Device for Loopback {
    fn send(&self, buffer: &[u8]) -> Result<()> {
        let _ = self.queue.send(buffer.to_vec());
        Ok(())
    }

    fn recv(&self, buffer: &mut [u8]) -> Result<usize> {
        let frames = self.frames.lock().unwrap();
        match frames.recv() {
            Ok(frame) => {
                let len = frame.len().min(buffer.len());
                buffer[.. len].copy_from_slice(&frame[.. len]);
                Ok(len)
            }
            Err(_) => Err(crate::Error::Dropped),
        }
    }

    fn max_transmission_unit(&self) -> usize {
        1500
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loopback_write_feeds_read() {
        let loopback = Loopback::new();
        loopback.send(&[1, 2, 3][..]).unwrap();

        let mut buffer = [0; 16];
        assert_matches!(loopback.recv(&mut buffer[..]), Ok(3));
        assert_eq!(&[1, 2, 3][..], &buffer[.. 3]);
    }

    #[test]
    fn test_loopback_preserves_frame_order() {
        let loopback = Loopback::new();
        loopback.send(&[1][..]).unwrap();
        loopback.send(&[2][..]).unwrap();

        let mut buffer = [0; 16];
        assert_matches!(loopback.recv(&mut buffer[..]), Ok(1));
        assert_eq!(1, buffer[0]);
        assert_matches!(loopback.recv(&mut buffer[..]), Ok(1));
        assert_eq!(2, buffer[0]);
    }
}
