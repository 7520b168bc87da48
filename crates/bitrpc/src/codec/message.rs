// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 bitrpc-team

//! The `Message` trait and built-in wire types.
//!
//! `Message` is the seam generated struct codecs implement: a stable hash
//! code plus symmetric encode/decode against the stream writer/reader.
//! Every built-in wire type implements it too, so one generic
//! [`MessageHandler`](super::registry::MessageHandler) adapts any message
//! into a registry handler.

use super::reader::StreamReader;
use super::writer::StreamWriter;
use super::{Result, HASH_BOOL, HASH_BYTES, HASH_FLOAT32, HASH_FLOAT64, HASH_INT32, HASH_INT64,
            HASH_STRING, HASH_TIMESTAMP, HASH_VEC3};
use std::time::{SystemTime, UNIX_EPOCH};

/// A value with a stable wire identity.
///
/// Implementations must keep `type_hash()` constant forever: the code is
/// written to the wire and used by peers to pick the decoder.
pub trait Message: Send + Sync + Sized + 'static {
    /// Stable, non-negative wire identifier for this type
    fn type_hash() -> i32;

    /// Encode the value onto the writer
    fn encode(&self, writer: &mut StreamWriter);

    /// Decode a value from the reader
    fn decode(reader: &mut StreamReader<'_>) -> Result<Self>;

    /// True when the value equals its type's default.
    ///
    /// Used by generated codecs for presence encoding with [`BitMask`]
    /// (default-valued fields can be skipped on the wire).
    ///
    /// [`BitMask`]: super::BitMask
    fn is_default(&self) -> bool;
}

/// Seconds since the Unix epoch, as carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Construct from raw seconds
    #[must_use]
    pub fn from_secs(secs: i64) -> Self {
        Self(secs)
    }

    /// Current wall-clock time truncated to seconds
    #[must_use]
    pub fn now() -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        Self(secs)
    }

    /// Raw seconds since the epoch
    #[must_use]
    pub fn secs(self) -> i64 {
        self.0
    }
}

/// Three-float vector (x, y, z).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    /// Construct from components
    #[must_use]
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// Generate `Message` impls for scalar built-ins.
macro_rules! impl_scalar_message {
    ($type:ty, $hash:expr, $write:ident, $read:ident, $default:expr) => {
        impl Message for $type {
            fn type_hash() -> i32 {
                $hash
            }

            fn encode(&self, writer: &mut StreamWriter) {
                writer.$write(*self);
            }

            fn decode(reader: &mut StreamReader<'_>) -> Result<Self> {
                reader.$read()
            }

            fn is_default(&self) -> bool {
                *self == $default
            }
        }
    };
}

impl_scalar_message!(i32, HASH_INT32, write_i32, read_i32, 0);
impl_scalar_message!(i64, HASH_INT64, write_i64, read_i64, 0);
impl_scalar_message!(f32, HASH_FLOAT32, write_f32, read_f32, 0.0);
impl_scalar_message!(f64, HASH_FLOAT64, write_f64, read_f64, 0.0);
impl_scalar_message!(bool, HASH_BOOL, write_bool, read_bool, false);

impl Message for String {
    fn type_hash() -> i32 {
        HASH_STRING
    }

    fn encode(&self, writer: &mut StreamWriter) {
        writer.write_string(self);
    }

    fn decode(reader: &mut StreamReader<'_>) -> Result<Self> {
        reader.read_string()
    }

    fn is_default(&self) -> bool {
        self.is_empty()
    }
}

impl Message for Vec<u8> {
    fn type_hash() -> i32 {
        HASH_BYTES
    }

    fn encode(&self, writer: &mut StreamWriter) {
        writer.write_bytes(self);
    }

    fn decode(reader: &mut StreamReader<'_>) -> Result<Self> {
        reader.read_bytes()
    }

    fn is_default(&self) -> bool {
        self.is_empty()
    }
}

impl Message for Timestamp {
    fn type_hash() -> i32 {
        HASH_TIMESTAMP
    }

    fn encode(&self, writer: &mut StreamWriter) {
        writer.write_timestamp(*self);
    }

    fn decode(reader: &mut StreamReader<'_>) -> Result<Self> {
        reader.read_timestamp()
    }

    fn is_default(&self) -> bool {
        self.0 == 0
    }
}

impl Message for Vec3 {
    fn type_hash() -> i32 {
        HASH_VEC3
    }

    fn encode(&self, writer: &mut StreamWriter) {
        writer.write_vec3(self);
    }

    fn decode(reader: &mut StreamReader<'_>) -> Result<Self> {
        reader.read_vec3()
    }

    fn is_default(&self) -> bool {
        self.x == 0.0 && self.y == 0.0 && self.z == 0.0
    }
}
