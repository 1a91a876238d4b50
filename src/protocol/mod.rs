//! Protocol module - wire format and frame assembly.
//!
//! This module implements the binary protocol on the wire:
//! - 9-byte header encoding/decoding
//! - Frame assembly (header + payload into one contiguous buffer)

mod header;

pub use header::{
    build_frame, Header, DEFAULT_MAX_HEADER_SIZE, DEFAULT_MAX_MESSAGE_SIZE, HEADER_SIZE,
};
