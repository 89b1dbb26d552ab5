/*!
Delimiter-based frame splitting.

The sensor writes frames back to back, each terminated by `:`. This module
turns the raw byte stream into frame strings one byte at a time so the
reader can hand frames out as soon as their delimiter arrives.
*/

use crate::protocol::{DEFAULT_MAX_FRAME_LEN, FRAME_DELIMITER};
use tracing::{debug, warn};

/// Splitter state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitterState {
    /// Nothing buffered since the last delimiter
    Empty,
    /// Part of a frame has been received
    Accumulating { len: usize },
    /// Dropping the rest of an over-long frame up to its delimiter
    Discarding,
}

/// Frame splitting engine
#[derive(Debug)]
pub struct FrameSplitter {
    buffer: Vec<u8>,
    max_frame_len: usize,
    discarding: bool,
    frames_completed: u64,
    overflows: u64,
}

impl FrameSplitter {
    /// Create a splitter that discards frames longer than `max_frame_len` bytes
    pub fn new(max_frame_len: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(max_frame_len.min(DEFAULT_MAX_FRAME_LEN)),
            max_frame_len: max_frame_len.max(1),
            discarding: false,
            frames_completed: 0,
            overflows: 0,
        }
    }

    pub fn state(&self) -> SplitterState {
        if self.discarding {
            SplitterState::Discarding
        } else if self.buffer.is_empty() {
            SplitterState::Empty
        } else {
            SplitterState::Accumulating {
                len: self.buffer.len(),
            }
        }
    }

    /// Get statistics as `(frames_completed, overflows)`
    pub fn stats(&self) -> (u64, u64) {
        (self.frames_completed, self.overflows)
    }

    /// Feed one byte. Returns the frame text when `byte` is the delimiter.
    ///
    /// A frame that outgrows `max_frame_len` is dropped whole: everything up
    /// to and including its delimiter is thrown away.
    pub fn push(&mut self, byte: u8) -> Option<String> {
        if self.discarding {
            if byte == FRAME_DELIMITER {
                self.discarding = false;
            }
            return None;
        }

        if byte == FRAME_DELIMITER {
            let frame = String::from_utf8_lossy(&self.buffer).into_owned();
            self.buffer.clear();
            self.frames_completed += 1;
            return Some(frame);
        }

        if self.buffer.len() >= self.max_frame_len {
            warn!(
                "Discarding {} bytes without a frame delimiter",
                self.buffer.len()
            );
            self.buffer.clear();
            self.overflows += 1;
            self.discarding = true;
            return None;
        }
        self.buffer.push(byte);
        None
    }

    /// Feed a chunk of bytes, collecting every completed frame
    pub fn push_all(&mut self, bytes: &[u8]) -> Vec<String> {
        bytes.iter().filter_map(|&b| self.push(b)).collect()
    }

    /// Drop any partial frame (used when the transport goes away)
    pub fn reset(&mut self) {
        self.discarding = false;
        if !self.buffer.is_empty() {
            debug!("Dropping partial frame of {} bytes", self.buffer.len());
            self.buffer.clear();
        }
    }

    /// Get current partial frame (for debugging)
    pub fn current_buffer(&self) -> &[u8] {
        &self.buffer
    }
}

impl Default for FrameSplitter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN)
    }
}
