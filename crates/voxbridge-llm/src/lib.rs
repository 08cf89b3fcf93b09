//! Streaming chat completion with cooperative cancellation
//!
//! Tokens are delivered in arrival order; a barge-in cancels the stream
//! mid-flight and the cancellation surfaces as an *aborted* outcome,
//! distinct from genuine failure.

pub mod stream;
pub mod types;

pub use stream::LlmStreamer;
pub use types::{ChatMessage, ChatRole, LlmEvent};
