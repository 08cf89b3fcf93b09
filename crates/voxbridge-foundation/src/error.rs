//! Error policy shared across the pipeline
//!
//! Each pipeline crate carries its own `thiserror` enum; the application
//! crate folds them into a session-level error. What lives here is the
//! vocabulary both sides agree on: how a failure is allowed to affect the
//! call.

use thiserror::Error;

/// How a failure propagates through a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Tear down the whole session (connect failure during start, auth
    /// exhaustion, telephony writer gone).
    FatalToSession,
    /// Abort the in-flight turn; the session keeps serving.
    FatalToTurn,
    /// Log and drop the offending frame, keep streaming.
    DropFrame,
    /// Expected outcome of cooperative cancellation; not a failure.
    Expected,
}

/// Configuration loading failure.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    MissingVar(&'static str),

    #[error("invalid value for {var}: {value}")]
    InvalidValue { var: &'static str, value: String },
}

/// Session-level error kinds, independent of which upstream produced them.
///
/// The policy mapping encodes the error-handling table: nothing is retried
/// within a turn, the session is the unit of recovery.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("upstream {service} unreachable: {reason}")]
    Connect { service: &'static str, reason: String },

    #[error("authentication with {service} failed: {reason}")]
    Auth { service: &'static str, reason: String },

    #[error("protocol error from {service}: {reason}")]
    Protocol { service: &'static str, reason: String },

    #[error("cancelled")]
    Cancelled,

    #[error("upstream {service} reported: {message}")]
    Upstream { service: &'static str, message: String },

    #[error("telephony writer closed")]
    TelephonyClosed,

    #[error("session {0} not found")]
    UnknownSession(String),

    #[error("fatal: {0}")]
    Fatal(String),
}

impl SessionError {
    pub fn policy(&self) -> ErrorPolicy {
        match self {
            SessionError::Config(_) | SessionError::Fatal(_) => ErrorPolicy::FatalToSession,
            SessionError::Connect { .. } => ErrorPolicy::FatalToSession,
            SessionError::Auth { .. } => ErrorPolicy::FatalToSession,
            SessionError::TelephonyClosed => ErrorPolicy::FatalToSession,
            SessionError::Protocol { .. } => ErrorPolicy::DropFrame,
            SessionError::Cancelled => ErrorPolicy::Expected,
            SessionError::Upstream { .. } => ErrorPolicy::FatalToTurn,
            SessionError::UnknownSession(_) => ErrorPolicy::FatalToSession,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_is_expected() {
        assert_eq!(SessionError::Cancelled.policy(), ErrorPolicy::Expected);
    }

    #[test]
    fn protocol_errors_drop_the_frame() {
        let err = SessionError::Protocol {
            service: "stt",
            reason: "bad json".into(),
        };
        assert_eq!(err.policy(), ErrorPolicy::DropFrame);
    }

    #[test]
    fn connect_failures_are_session_fatal() {
        let err = SessionError::Connect {
            service: "tts",
            reason: "timeout".into(),
        };
        assert_eq!(err.policy(), ErrorPolicy::FatalToSession);
    }
}
