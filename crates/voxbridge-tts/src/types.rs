//! Synthesis events and upstream wire shapes

use serde::Deserialize;
use thiserror::Error;

/// A mark control event follows every N-th outbound frame so the carrier
/// can acknowledge playback progress.
pub const MARK_EVERY_FRAMES: u64 = 10;

/// Events posted to the session while synthesis streams.
#[derive(Debug, Clone)]
pub enum TtsEvent {
    /// First audio frame of the turn went out.
    FirstChunk,
    /// An audio frame went out; the receiver timestamps arrival.
    AudioSent,
    /// Current generation finished (upstream final or flush-quiet); any
    /// short tail was padded and emitted first.
    Complete,
    /// Vendor error message; ends the turn without an assistant commit.
    UpstreamError { message: String },
    /// The telephony writer is gone; the session should close.
    SinkClosed,
}

#[derive(Error, Debug)]
pub enum TtsError {
    #[error("synthesis stream connect failed: {0}")]
    Connect(String),

    #[error("synthesis stream connect timed out")]
    ConnectTimeout,
}

/// Downstream frame: `{audio}` carries base64 µ-law, `{isFinal}` ends a
/// generation, `{error}` reports vendor failure.
#[derive(Debug, Deserialize)]
pub(crate) struct DownstreamFrame {
    #[serde(default)]
    pub audio: Option<String>,
    #[serde(default, rename = "isFinal")]
    pub is_final: Option<bool>,
    #[serde(default)]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downstream_audio_frame_parses() {
        let frame: DownstreamFrame =
            serde_json::from_str(r#"{"audio": "AAAA"}"#).unwrap();
        assert!(frame.audio.is_some());
        assert!(frame.is_final.is_none());
        assert!(frame.error.is_none());
    }

    #[test]
    fn downstream_final_frame_parses() {
        let frame: DownstreamFrame = serde_json::from_str(r#"{"isFinal": true}"#).unwrap();
        assert_eq!(frame.is_final, Some(true));
    }
}
