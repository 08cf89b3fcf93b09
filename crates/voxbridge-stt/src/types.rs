//! Transcript events and upstream wire shapes

use serde::Deserialize;
use thiserror::Error;

/// Incremental transcription result for the current utterance.
#[derive(Debug, Clone)]
pub enum TranscriptEvent {
    /// Ongoing hypothesis; superseded by later results for the same seq.
    Partial {
        seq: u64,
        text: String,
        confidence: f32,
    },
    /// Committed segment.
    Final {
        seq: u64,
        text: String,
        confidence: f32,
    },
    /// Upstream failed; the current turn aborts, the session may remain.
    Error { message: String },
}

#[derive(Error, Debug)]
pub enum SttError {
    #[error("transcription auth failed: {0}")]
    Auth(String),

    #[error("transcription stream connect failed: {0}")]
    Connect(String),

    #[error("transcription stream connect timed out")]
    ConnectTimeout,

    #[error("transcription request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Downstream result frame: `{seq, final, alternatives: [{text, confidence}]}`.
#[derive(Debug, Deserialize)]
pub(crate) struct ResultFrame {
    #[serde(default)]
    pub seq: u64,
    #[serde(default, rename = "final")]
    pub is_final: bool,
    #[serde(default)]
    pub alternatives: Vec<Alternative>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Alternative {
    pub text: String,
    #[serde(default)]
    pub confidence: f32,
}

impl ResultFrame {
    /// Best hypothesis, if the frame carries one with text.
    pub fn into_event(self) -> Option<TranscriptEvent> {
        let best = self.alternatives.into_iter().next()?;
        if best.text.is_empty() {
            return None;
        }
        Some(if self.is_final {
            TranscriptEvent::Final {
                seq: self.seq,
                text: best.text,
                confidence: best.confidence,
            }
        } else {
            TranscriptEvent::Partial {
                seq: self.seq,
                text: best.text,
                confidence: best.confidence,
            }
        })
    }
}
