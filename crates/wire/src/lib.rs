//! Tether Wire Library
//!
//! The wire format shared by tether clients and servers:
//!
//! - **Payload**: a typed key/value bag split across six independent
//!   namespaces, with optional layered merging against an affiliate
//!   payload at compile time
//! - **Frame**: one compiled payload transmitted as a single
//!   length-prefixed unit over a byte stream
//! - **Keys**: the well-known routing keys and control vocabulary
//!
//! A compiled payload is self-describing: `Payload::decode` reverses
//! `Payload::compile` without any external schema.

pub mod error;
mod frame;
pub mod keys;
pub mod payload;

pub use error::{CodecError, Result};
pub use frame::{read_frame, write_frame, write_frame_bytes, MAX_FRAME_SIZE};
pub use payload::{Kind, MergeMode, Payload};
