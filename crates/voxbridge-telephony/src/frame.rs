//! Fixed-size output framing
//!
//! The carrier accepts only whole 20 ms frames. Synthesis audio arrives
//! in arbitrary chunk sizes and is reassembled here; a trailing tail is
//! padded with µ-law silence.

/// Bytes per outbound frame: 20 ms of 8 kHz µ-law.
pub const FRAME_BYTES: usize = 160;

/// Duration of one frame in milliseconds.
pub const FRAME_MS: u64 = 20;

/// µ-law code for a zero sample.
pub const ULAW_SILENCE: u8 = 0xFF;

/// Reassembles arbitrary-size µ-law chunks into exact 160-byte frames.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    buf: Vec<u8>,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self { buf: Vec::with_capacity(FRAME_BYTES * 4) }
    }

    /// Append a chunk of µ-law bytes.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Take the next whole frame, if one is buffered.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        if self.buf.len() < FRAME_BYTES {
            return None;
        }
        let rest = self.buf.split_off(FRAME_BYTES);
        Some(std::mem::replace(&mut self.buf, rest))
    }

    /// Pad any remaining tail with silence and emit it as a final frame.
    ///
    /// Returns `None` when nothing is buffered.
    pub fn flush_padded(&mut self) -> Option<Vec<u8>> {
        if self.buf.is_empty() {
            return None;
        }
        let mut tail = std::mem::take(&mut self.buf);
        tail.resize(FRAME_BYTES, ULAW_SILENCE);
        Some(tail)
    }

    /// Drop all buffered bytes.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}
