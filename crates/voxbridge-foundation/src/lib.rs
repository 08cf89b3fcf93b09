//! Shared foundation for the voxbridge pipeline
//!
//! Error taxonomy with explicit recovery policies, env-backed
//! configuration, and the clock abstraction used for deterministic
//! timing tests.

pub mod clock;
pub mod config;
pub mod error;

pub use clock::{real_clock, test_clock, Clock, RealClock, SharedClock, TestClock};
pub use config::{
    BridgeConfig, LlmSettings, SttCredentials, TtsSettings, TtsVendor, TurnTunables,
};
pub use error::{ConfigError, ErrorPolicy, SessionError};
