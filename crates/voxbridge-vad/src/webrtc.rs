//! WebRTC VAD adapter
//!
//! Very-aggressive mode at 8 kHz over 160-sample (20 ms) frames.

use webrtc_vad::{SampleRate, Vad, VadMode};

use voxbridge_telephony::FRAME_BYTES;

use crate::engine::{VadDecision, VadEngine, VadError};

// The underlying fvad state is a plain heap allocation with no thread
// affinity; the wrapper is owned by exactly one session task and never
// shared, only moved.
struct SendVad(Vad);

unsafe impl Send for SendVad {}

/// WebRTC voice-activity classifier in very-aggressive mode.
pub struct WebRtcEngine {
    vad: SendVad,
}

impl WebRtcEngine {
    pub fn new() -> Self {
        Self {
            vad: SendVad(Self::build()),
        }
    }

    fn build() -> Vad {
        let mut vad = Vad::new();
        vad.set_mode(VadMode::VeryAggressive);
        vad.set_sample_rate(SampleRate::Rate8kHz);
        vad
    }
}

impl Default for WebRtcEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl VadEngine for WebRtcEngine {
    fn classify(&mut self, frame: &[i16]) -> Result<VadDecision, VadError> {
        if frame.len() != FRAME_BYTES {
            return Err(VadError::FrameSize {
                expected: FRAME_BYTES,
                got: frame.len(),
            });
        }

        match self.vad.0.is_voice_segment(frame) {
            Ok(true) => Ok(VadDecision::Voice),
            Ok(false) => Ok(VadDecision::Silence),
            Err(()) => Err(VadError::Classifier("frame rejected".into())),
        }
    }

    fn reset(&mut self) {
        // fvad has no reset call; a fresh instance is equivalent.
        self.vad = SendVad(Self::build());
    }
}
