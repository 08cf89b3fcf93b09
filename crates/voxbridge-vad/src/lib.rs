//! Voice-activity gating for the caller leg
//!
//! A `VadEngine` classifies single 20 ms frames; the `VadGate` turns the
//! per-frame decisions into utterance edges with a configurable silence
//! hangover, accumulating the utterance audio while speech is active.

pub mod engine;
pub mod gate;
pub mod webrtc;

pub use engine::{VadDecision, VadEngine, VadError};
pub use gate::{GateEvent, VadGate};
pub use webrtc::WebRtcEngine;
