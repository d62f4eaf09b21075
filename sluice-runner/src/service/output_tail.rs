//! Output tail
//!
//! Keeps the last few output chunks of a running command. Both the stdout
//! and the stderr reader push into the same tail, so it reflects the
//! interleaving the command actually produced.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Bounded, thread-safe ring of output chunks
///
/// Uses Arc<Mutex<VecDeque<String>>> so clones handed to reader tasks
/// share one buffer. Memory stays bounded by `capacity` chunks no matter
/// how much the command prints.
#[derive(Clone)]
pub struct OutputTail {
    buffer: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
}

impl OutputTail {
    /// Creates an empty tail
    ///
    /// # Arguments
    /// * `capacity` - Number of chunks kept (at least one)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    /// Appends a chunk, evicting the oldest one when full
    pub fn push(&self, chunk: String) {
        if chunk.is_empty() {
            return;
        }

        let mut buffer = self.buffer.lock().unwrap();
        if buffer.len() == self.capacity {
            buffer.pop_front();
        }
        buffer.push_back(chunk);
    }

    /// Copies the current chunks, oldest first
    pub fn snapshot(&self) -> Vec<String> {
        let buffer = self.buffer.lock().unwrap();
        buffer.iter().cloned().collect()
    }
}
