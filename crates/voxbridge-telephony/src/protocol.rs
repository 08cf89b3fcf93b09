//! Carrier wire protocol
//!
//! JSON text frames in both directions. Inbound: `start`, `media`,
//! `stop`, plus `mark` acknowledgments. Outbound: `media`, `mark`,
//! `clear`. Unknown inbound event kinds parse into `Unknown` so the
//! ingress can warn and move on.

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TelephonyError {
    #[error("malformed telephony frame: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid media payload: {0}")]
    Payload(#[from] base64::DecodeError),
}

/// Negotiated audio format, reported in the `start` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFormat {
    pub encoding: String,
    pub sample_rate: u32,
    pub channels: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartEvent {
    pub stream_sid: String,
    pub media_format: Option<MediaFormat>,
    #[serde(default)]
    pub custom_parameters: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaEvent {
    #[serde(default)]
    pub track: Option<String>,
    #[serde(default)]
    pub chunk: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    pub payload: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarkEvent {
    pub name: String,
}

/// Inbound control frames from the carrier.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum TelephonyInbound {
    Start { start: StartEvent },
    Media { media: MediaEvent },
    Mark { mark: MarkEvent },
    Stop,
    #[serde(other)]
    Unknown,
}

impl TelephonyInbound {
    /// Decode the base64 audio payload of a `media` event.
    pub fn decode_media(media: &MediaEvent) -> Result<Vec<u8>, TelephonyError> {
        Ok(BASE64.decode(&media.payload)?)
    }
}

/// Parse one inbound text frame.
pub fn parse_inbound(text: &str) -> Result<TelephonyInbound, TelephonyError> {
    Ok(serde_json::from_str(text)?)
}

#[derive(Debug, Clone, Serialize)]
pub struct OutboundMedia {
    pub payload: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutboundMark {
    pub name: String,
}

/// Outbound frames to the carrier.
///
/// All three share a single writer per call, so serialization order on
/// the wire is the order they were enqueued.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum TelephonyOutbound {
    #[serde(rename_all = "camelCase")]
    Media {
        stream_sid: String,
        media: OutboundMedia,
    },
    #[serde(rename_all = "camelCase")]
    Mark {
        stream_sid: String,
        mark: OutboundMark,
    },
    #[serde(rename_all = "camelCase")]
    Clear { stream_sid: String },
}

impl TelephonyOutbound {
    /// Wrap a µ-law frame as a media event.
    pub fn media(stream_sid: &str, ulaw: &[u8]) -> Self {
        TelephonyOutbound::Media {
            stream_sid: stream_sid.to_string(),
            media: OutboundMedia {
                payload: BASE64.encode(ulaw),
            },
        }
    }

    pub fn mark(stream_sid: &str, name: String) -> Self {
        TelephonyOutbound::Mark {
            stream_sid: stream_sid.to_string(),
            mark: OutboundMark { name },
        }
    }

    pub fn clear(stream_sid: &str) -> Self {
        TelephonyOutbound::Clear {
            stream_sid: stream_sid.to_string(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("outbound frames serialize")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_start_with_custom_parameters() {
        let raw = r#"{
            "event": "start",
            "start": {
                "streamSid": "MZ123",
                "mediaFormat": {"encoding": "audio/x-mulaw", "sampleRate": 8000, "channels": 1},
                "customParameters": {"call_id": "call-7"}
            }
        }"#;
        match parse_inbound(raw).unwrap() {
            TelephonyInbound::Start { start } => {
                assert_eq!(start.stream_sid, "MZ123");
                assert_eq!(start.custom_parameters["call_id"], "call-7");
                assert_eq!(start.media_format.unwrap().sample_rate, 8000);
            }
            other => panic!("expected start, got {other:?}"),
        }
    }

    #[test]
    fn parses_media_and_decodes_payload() {
        let payload = BASE64.encode([0xFFu8; 160]);
        let raw = format!(
            r#"{{"event":"media","media":{{"track":"inbound","chunk":"3","timestamp":"60","payload":"{payload}"}}}}"#
        );
        match parse_inbound(&raw).unwrap() {
            TelephonyInbound::Media { media } => {
                let bytes = TelephonyInbound::decode_media(&media).unwrap();
                assert_eq!(bytes.len(), 160);
                assert!(bytes.iter().all(|&b| b == 0xFF));
            }
            other => panic!("expected media, got {other:?}"),
        }
    }

    #[test]
    fn unknown_event_kind_is_tolerated() {
        let raw = r#"{"event":"dtmf","dtmf":{"digit":"5"}}"#;
        assert!(matches!(
            parse_inbound(raw).unwrap(),
            TelephonyInbound::Unknown
        ));
    }

    #[test]
    fn outbound_media_round_trips_payload() {
        let out = TelephonyOutbound::media("MZ1", &[0xAB; 160]);
        let json: serde_json::Value = serde_json::from_str(&out.to_json()).unwrap();
        assert_eq!(json["event"], "media");
        assert_eq!(json["streamSid"], "MZ1");
        let decoded = BASE64
            .decode(json["media"]["payload"].as_str().unwrap())
            .unwrap();
        assert_eq!(decoded, vec![0xAB; 160]);
    }

    #[test]
    fn outbound_clear_has_no_body() {
        let json: serde_json::Value =
            serde_json::from_str(&TelephonyOutbound::clear("MZ1").to_json()).unwrap();
        assert_eq!(json["event"], "clear");
        assert_eq!(json["streamSid"], "MZ1");
    }
}
