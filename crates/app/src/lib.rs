//! voxbridge: real-time voice dialogue orchestration
//!
//! Bridges a telephony media stream to streaming transcription,
//! completion, and synthesis upstreams, one session actor per call.

pub mod ingress;
pub mod registry;
pub mod runtime;
pub mod session;

pub use registry::{CallSummary, SessionRegistry};
pub use runtime::{Runtime, SharedRuntime};
