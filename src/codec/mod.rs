//! Codec module - typed payload conversion.
//!
//! - [`JsonCodec`] - `serde` values to and from message payloads
//!
//! # Design
//!
//! Codecs are marker structs with static methods rather than trait objects,
//! so the codec is chosen at compile time.

mod json;

pub use json::JsonCodec;
