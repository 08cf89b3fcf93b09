//! VAD engine seam

use thiserror::Error;

/// Per-frame classification outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadDecision {
    Voice,
    Silence,
}

#[derive(Error, Debug)]
pub enum VadError {
    #[error("classifier rejected frame: {0}")]
    Classifier(String),

    #[error("bad frame size: expected {expected} samples, got {got}")]
    FrameSize { expected: usize, got: usize },
}

/// A voice-activity classifier over single PCM frames.
///
/// Implementations are owned by one session task at a time; they carry
/// per-stream state and are deliberately `&mut self`.
pub trait VadEngine: Send {
    fn classify(&mut self, frame: &[i16]) -> Result<VadDecision, VadError>;

    /// Drop any per-stream state.
    fn reset(&mut self);
}
