//! Streaming transcription upstream
//!
//! One duplex stream per call: raw µ-law frames go up, incremental
//! transcript results come down. Authentication rides a process-wide
//! bearer-token cache.

pub mod auth;
pub mod stream;
pub mod types;

pub use auth::TokenCache;
pub use stream::{SttStream, STT_SHUTDOWN_GRACE};
pub use types::{SttError, TranscriptEvent};
