//! Scrollback ring (C2): fixed-capacity byte buffer of recent raw PTY
//! output, oldest bytes overwritten on wrap. Generalizes the teacher's
//! `session::CircularBuffer` (hardcoded 2 MiB) to a configurable capacity
//! (spec default: 512 KiB).

use std::sync::Mutex;

pub const DEFAULT_CAPACITY_BYTES: usize = 512 * 1024;

pub struct ScrollbackRing {
    data: Mutex<Vec<u8>>,
    cap: usize,
}

impl ScrollbackRing {
    pub fn new(cap: usize) -> Self {
        Self {
            data: Mutex::new(Vec::new()),
            cap,
        }
    }

    /// Append bytes; if over capacity, drop the oldest bytes at the front.
    /// May contain a partial escape sequence at the oldest edge after a
    /// wrap — tolerated, since the snapshot prelude resets the terminal
    /// before any ring replay.
    pub fn write(&self, bytes: &[u8]) {
        let mut g = self.data.lock().expect("ring mutex poisoned");
        g.extend_from_slice(bytes);
        if g.len() > self.cap {
            let excess = g.len() - self.cap;
            g.drain(..excess);
        }
    }

    /// Linearize current contents, oldest to newest.
    pub fn read_all(&self) -> Vec<u8> {
        self.data.lock().expect("ring mutex poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.data.lock().expect("ring mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_within_capacity() {
        let ring = ScrollbackRing::new(16);
        ring.write(b"hello");
        assert_eq!(ring.read_all(), b"hello");
    }

    #[test]
    fn wraps_and_drops_oldest() {
        let ring = ScrollbackRing::new(8);
        ring.write(b"abcdefgh");
        ring.write(b"ijkl");
        // Capacity 8, last write pushed total to 12, so oldest 4 bytes drop.
        assert_eq!(ring.read_all(), b"efghijkl");
        assert!(ring.len() <= 8);
    }

    #[test]
    fn never_exceeds_capacity_across_many_writes() {
        let ring = ScrollbackRing::new(32);
        for _ in 0..1000 {
            ring.write(b"0123456789");
            assert!(ring.len() <= 32);
        }
    }
}
