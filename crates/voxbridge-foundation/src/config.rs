//! Env-backed configuration
//!
//! Every tunable the pipeline recognizes is read here, in one place.
//! Required keys fail loudly with the variable name; optional keys fall
//! back to the documented defaults.

use std::env;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

fn required(var: &'static str) -> Result<String, ConfigError> {
    env::var(var).map_err(|_| ConfigError::MissingVar(var))
}

fn optional(var: &'static str, default: &str) -> String {
    env::var(var).unwrap_or_else(|_| default.to_string())
}

fn optional_parsed<T: FromStr>(var: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(var) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| ConfigError::InvalidValue { var, value: raw }),
        Err(_) => Ok(default),
    }
}

/// Credentials and endpoints for the streaming transcription service.
#[derive(Debug, Clone)]
pub struct SttCredentials {
    pub client_id: String,
    pub client_secret: String,
    /// Token endpoint; form-encoded client_id/client_secret exchange.
    pub auth_url: String,
    /// Duplex stream endpoint; query parameters are appended at connect.
    pub stream_url: String,
}

impl SttCredentials {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            client_id: required("STT_CLIENT_ID")?,
            client_secret: required("STT_CLIENT_SECRET")?,
            auth_url: optional("STT_AUTH_URL", "https://openapi.vito.ai/v1/authenticate"),
            stream_url: optional(
                "STT_STREAM_URL",
                "wss://openapi.vito.ai/v1/transcribe:streaming",
            ),
        })
    }
}

/// Chat-completion model settings.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub endpoint: String,
}

impl LlmSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            api_key: required("LLM_API_KEY")?,
            model: optional("LLM_MODEL", "gpt-4o-mini"),
            temperature: optional_parsed("LLM_TEMPERATURE", 0.7)?,
            endpoint: optional("LLM_ENDPOINT", "https://api.openai.com/v1/chat/completions"),
        })
    }
}

/// Which synthesis path the upstream vendor exposes.
///
/// Both settings map onto the same streaming connection type; the
/// blocking vendor still honours mute-and-close interrupt semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TtsVendor {
    OpenAiBlocking,
    Streaming,
}

impl FromStr for TtsVendor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "openai-blocking" => Ok(TtsVendor::OpenAiBlocking),
            "streaming" => Ok(TtsVendor::Streaming),
            other => Err(format!("unknown TTS vendor: {other}")),
        }
    }
}

impl fmt::Display for TtsVendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TtsVendor::OpenAiBlocking => write!(f, "openai-blocking"),
            TtsVendor::Streaming => write!(f, "streaming"),
        }
    }
}

/// Voice and vendor settings for the synthesis stream.
#[derive(Debug, Clone)]
pub struct TtsSettings {
    pub vendor: TtsVendor,
    pub api_key: String,
    pub model: String,
    pub voice: String,
    pub speed: f32,
    pub stability: f32,
    pub similarity: f32,
    pub stream_url: String,
}

impl TtsSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            vendor: optional_parsed("TTS_VENDOR", TtsVendor::Streaming)?,
            api_key: required("TTS_API_KEY")?,
            model: optional("TTS_MODEL", "eleven_flash_v2_5"),
            voice: optional("TTS_VOICE", "alloy"),
            speed: optional_parsed("TTS_SPEED", 1.0)?,
            stability: optional_parsed("TTS_STABILITY", 0.5)?,
            similarity: optional_parsed("TTS_SIMILARITY", 0.75)?,
            stream_url: optional("TTS_STREAM_URL", "wss://api.elevenlabs.io/v1/text-to-speech"),
        })
    }
}

/// Core timing tunables for the dialogue state machine.
///
/// `vad_silence_ms` is the primary latency knob: how long the caller must
/// stay quiet before an utterance is considered finished.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TurnTunables {
    pub vad_silence_ms: u64,
    pub interrupt_fast_ms: u64,
    pub interrupt_safety_ms: u64,
    pub interrupt_tts_recent_ms: u64,
    pub tts_flush_quiet_ms: u64,
    pub history_rollback_ms: u64,
}

impl Default for TurnTunables {
    fn default() -> Self {
        Self {
            vad_silence_ms: 800,
            interrupt_fast_ms: 500,
            interrupt_safety_ms: 1500,
            interrupt_tts_recent_ms: 2000,
            tts_flush_quiet_ms: 500,
            history_rollback_ms: 2000,
        }
    }
}

impl TurnTunables {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            vad_silence_ms: optional_parsed("VAD_SILENCE_MS", defaults.vad_silence_ms)?,
            interrupt_fast_ms: optional_parsed("INTERRUPT_FAST_MS", defaults.interrupt_fast_ms)?,
            interrupt_safety_ms: optional_parsed(
                "INTERRUPT_SAFETY_MS",
                defaults.interrupt_safety_ms,
            )?,
            interrupt_tts_recent_ms: optional_parsed(
                "INTERRUPT_TTS_RECENT_MS",
                defaults.interrupt_tts_recent_ms,
            )?,
            tts_flush_quiet_ms: optional_parsed(
                "TTS_FLUSH_QUIET_MS",
                defaults.tts_flush_quiet_ms,
            )?,
            history_rollback_ms: optional_parsed(
                "HISTORY_ROLLBACK_MS",
                defaults.history_rollback_ms,
            )?,
        })
    }
}

/// Complete server configuration.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub bind_addr: String,
    pub stt: SttCredentials,
    pub llm: LlmSettings,
    pub tts: TtsSettings,
    pub turn: TurnTunables,
}

impl BridgeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            bind_addr: optional("BIND_ADDR", "0.0.0.0:8765"),
            stt: SttCredentials::from_env()?,
            llm: LlmSettings::from_env()?,
            tts: TtsSettings::from_env()?,
            turn: TurnTunables::from_env()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tunables_have_documented_defaults() {
        let t = TurnTunables::default();
        assert_eq!(t.vad_silence_ms, 800);
        assert_eq!(t.interrupt_fast_ms, 500);
        assert_eq!(t.interrupt_safety_ms, 1500);
        assert_eq!(t.interrupt_tts_recent_ms, 2000);
        assert_eq!(t.tts_flush_quiet_ms, 500);
    }

    #[test]
    fn tts_vendor_parses_both_variants() {
        assert_eq!(
            "openai-blocking".parse::<TtsVendor>().unwrap(),
            TtsVendor::OpenAiBlocking
        );
        assert_eq!("streaming".parse::<TtsVendor>().unwrap(), TtsVendor::Streaming);
        assert!("espeak".parse::<TtsVendor>().is_err());
    }
}
