//! Per-turn latency capture
//!
//! Four monotonic timestamps per turn; the interesting output is the
//! deltas between them, ending at the first synthesized audio frame.

use std::time::{Duration, Instant};

/// Capture points for one user→assistant exchange.
#[derive(Debug, Default, Clone)]
pub struct TurnTimings {
    vad_end: Option<Instant>,
    llm_call: Option<Instant>,
    llm_first_token: Option<Instant>,
    tts_first_chunk: Option<Instant>,
}

/// The four reported deltas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnLatency {
    pub vad_end_to_llm_call: Duration,
    pub llm_call_to_first_token: Duration,
    pub first_token_to_first_chunk: Duration,
    pub end_to_end: Duration,
}

impl TurnTimings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_vad_end(&mut self, at: Instant) {
        self.vad_end = Some(at);
    }

    pub fn mark_llm_call(&mut self, at: Instant) {
        self.llm_call = Some(at);
    }

    /// First token only; later calls are ignored.
    pub fn mark_llm_first_token(&mut self, at: Instant) {
        self.llm_first_token.get_or_insert(at);
    }

    /// First audio frame only; later calls are ignored.
    pub fn mark_tts_first_chunk(&mut self, at: Instant) {
        self.tts_first_chunk.get_or_insert(at);
    }

    pub fn vad_end(&self) -> Option<Instant> {
        self.vad_end
    }

    pub fn has_first_token(&self) -> bool {
        self.llm_first_token.is_some()
    }

    /// Deltas, available once all four points were captured.
    pub fn report(&self) -> Option<TurnLatency> {
        let vad_end = self.vad_end?;
        let llm_call = self.llm_call?;
        let first_token = self.llm_first_token?;
        let first_chunk = self.tts_first_chunk?;

        Some(TurnLatency {
            vad_end_to_llm_call: llm_call.duration_since(vad_end),
            llm_call_to_first_token: first_token.duration_since(llm_call),
            first_token_to_first_chunk: first_chunk.duration_since(first_token),
            end_to_end: first_chunk.duration_since(vad_end),
        })
    }

    /// Cleared on turn completion or interrupt.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
