//! Telephony leg: wire protocol, µ-law codec, 20 ms framing
//!
//! The carrier streams JSON text frames over a duplex socket. Inbound
//! audio is 8 kHz µ-law in 160-byte (20 ms) chunks; outbound audio must
//! be re-framed to exactly that size.

pub mod frame;
pub mod mulaw;
pub mod protocol;

pub use frame::{FrameAssembler, FRAME_BYTES, FRAME_MS, ULAW_SILENCE};
pub use mulaw::{linear_to_ulaw, ulaw_to_linear, ulaw_to_pcm};
pub use protocol::{
    parse_inbound, MarkEvent, MediaEvent, MediaFormat, StartEvent, TelephonyError,
    TelephonyInbound, TelephonyOutbound,
};
