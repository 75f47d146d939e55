//! Transport helpers
//!
//! Frames travel as WebSocket text messages, one JSON envelope each.

pub mod codec;

pub use codec::JsonCodec;
