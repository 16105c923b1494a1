//! Burrow control-channel protocol
//!
//! Defines the JSON frames exchanged between the relay and an agent over the
//! control channel, plus the header hygiene rules both sides apply when
//! converting HTTP exchanges to and from frames.

mod frames;
mod headers;

pub use frames::{Frame, FrameError};
pub use headers::{is_hop_by_hop, HOP_BY_HOP_HEADERS};
