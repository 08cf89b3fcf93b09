//! Streaming synthesis upstream
//!
//! Accepts completion tokens as they arrive and returns carrier-ready
//! 20 ms µ-law frames. Supports mid-stream interruption for barge-in:
//! once interrupted, no further audio reaches the telephony sink.

pub mod stream;
pub mod types;

pub use stream::TtsStream;
pub use types::{TtsError, TtsEvent, MARK_EVERY_FRAMES};
