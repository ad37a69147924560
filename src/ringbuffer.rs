//! Fixed-size byte sink keeping only the most recent output of a subprocess.

use std::io::{self, Write};
use std::sync::{Mutex, MutexGuard};

struct Inner {
    data: Vec<u8>,
    /// Next write position.
    pos: usize,
    /// Set once the write position went past the end at least once.
    wrapped: bool,
}

/// Thread-safe ring buffer of `capacity` bytes.
///
/// Writers never see a short write: the reported length is always the
/// length of the input, even when only its tail was kept. This keeps the
/// buffer usable behind fan-out writers sharing one error path.
pub struct RingBuffer {
    capacity: usize,
    inner: Mutex<Inner>,
}

impl RingBuffer {
    /// Creates an empty buffer. `capacity` must be greater than zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring buffer capacity must be positive");
        Self {
            capacity,
            inner: Mutex::new(Inner {
                data: vec![0; capacity],
                pos: 0,
                wrapped: false,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    // A writer panicking mid-copy leaves the buffer consistent enough to read
    // diagnostics from, so poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Appends `chunk`, overwriting the oldest bytes once full.
    pub fn push(&self, chunk: &[u8]) -> usize {
        let n = chunk.len();
        if n == 0 {
            return 0;
        }

        let size = self.capacity;
        let chunk = if n > size { &chunk[n - size..] } else { chunk };

        let mut inner = self.lock();
        let pos = inner.pos;
        let room = size - pos;
        if chunk.len() > room {
            inner.data[pos..].copy_from_slice(&chunk[..room]);
            let rest = chunk.len() - room;
            inner.data[..rest].copy_from_slice(&chunk[room..]);
            inner.pos = rest;
            inner.wrapped = true;
        } else {
            inner.data[pos..pos + chunk.len()].copy_from_slice(chunk);
            inner.pos += chunk.len();
            if inner.pos == size {
                inner.pos = 0;
                inner.wrapped = true;
            }
        }
        n
    }

    /// Snapshot of the retained bytes, oldest first.
    pub fn bytes(&self) -> Vec<u8> {
        let inner = self.lock();
        if !inner.wrapped {
            return inner.data[..inner.pos].to_vec();
        }

        let mut out = Vec::with_capacity(self.capacity);
        out.extend_from_slice(&inner.data[inner.pos..]);
        out.extend_from_slice(&inner.data[..inner.pos]);
        out
    }

    /// Retained bytes as text, with invalid UTF-8 replaced and surrounding
    /// whitespace trimmed.
    pub fn tail_string(&self) -> String {
        String::from_utf8_lossy(&self.bytes()).trim().to_string()
    }
}

impl Write for &RingBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(self.push(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Write for RingBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(self.push(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
