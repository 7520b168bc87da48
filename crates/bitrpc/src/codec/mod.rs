// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 bitrpc-team

//! Binary wire codec for BitRPC.
//!
//! Everything on the wire is little-endian. Strings and byte blobs are
//! length-prefixed with an `i32`; an empty string is written as length -1
//! (readers accept both -1 and 0 as empty). Polymorphic values are framed
//! as `i32 hash_code` followed by the type's payload, with -1 as the null
//! sentinel.
//!
//! # Wire Format
//!
//! ```text
//! +-----------+----------------------+
//! | i32 hash  | type-specific bytes  |
//! +-----------+----------------------+
//! ```
//!
//! Hash codes are part of the wire contract and must remain stable:
//!
//! | Code | Type |
//! |------|-----------|
//! | 101  | i32       |
//! | 102  | i64       |
//! | 103  | f32       |
//! | 104  | f64       |
//! | 105  | bool      |
//! | 106  | string    |
//! | 107  | bytes     |
//! | 201  | timestamp |
//! | 202  | vec3      |
//!
//! Codes 1..1000 are reserved for built-ins; generated struct codecs use
//! codes outside that range.

mod bitmask;
mod message;
mod reader;
mod registry;
mod writer;

pub use bitmask::BitMask;
pub use message::{Message, Timestamp, Vec3};
pub use registry::{
    decode_object, encode_object, register_message, registry, HandlerRegistry, MessageHandler,
    TypeHandler,
};
pub use reader::StreamReader;
pub use writer::StreamWriter;

use std::fmt;

/// Null sentinel written in place of an absent object (and empty string).
pub const NULL_SENTINEL: i32 = -1;

/// Hash codes of the built-in type handlers (wire-stable).
pub const HASH_INT32: i32 = 101;
pub const HASH_INT64: i32 = 102;
pub const HASH_FLOAT32: i32 = 103;
pub const HASH_FLOAT64: i32 = 104;
pub const HASH_BOOL: i32 = 105;
pub const HASH_STRING: i32 = 106;
pub const HASH_BYTES: i32 = 107;
pub const HASH_TIMESTAMP: i32 = 201;
pub const HASH_VEC3: i32 = 202;

/// Upper bound (exclusive) of the hash-code range reserved for built-ins.
pub const RESERVED_HASH_MAX: i32 = 1000;

/// Errors that can occur while encoding or decoding wire data
#[derive(Debug)]
pub enum CodecError {
    /// Read ran past the end of the buffer
    EndOfStream { offset: usize, needed: usize },

    /// Structurally invalid data (negative length, bad UTF-8, ...)
    Malformed(String),

    /// No handler registered for this hash code
    UnknownType(i32),

    /// Handler registered for the type but the value did not match
    HandlerMismatch(&'static str),

    /// Two distinct types registered under the same hash code
    DuplicateHashCode(i32),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EndOfStream { offset, needed } => {
                write!(
                    f,
                    "unexpected end of stream at offset {offset} (needed {needed} more bytes)"
                )
            }
            Self::Malformed(msg) => write!(f, "malformed wire data: {msg}"),
            Self::UnknownType(code) => write!(f, "no type handler for hash code {code}"),
            Self::HandlerMismatch(type_name) => {
                write!(f, "type handler mismatch for {type_name}")
            }
            Self::DuplicateHashCode(code) => {
                write!(f, "hash code {code} already registered for another type")
            }
        }
    }
}

impl std::error::Error for CodecError {}

/// Result type for codec operations
pub type Result<T> = std::result::Result<T, CodecError>;
