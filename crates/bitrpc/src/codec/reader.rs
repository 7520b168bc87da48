// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 bitrpc-team

//! Bounds-checked wire decoder.
//!
//! `StreamReader` carries a position cursor into an immutable byte slice.
//! Every read validates the remaining length and fails with
//! `CodecError::EndOfStream` when the buffer is short; string reads
//! additionally validate the byte range and UTF-8 before constructing the
//! value.

use super::message::{Timestamp, Vec3};
use super::registry::registry;
use super::{CodecError, Result, NULL_SENTINEL};
use std::any::Any;

/// Generate read methods for fixed-width primitives.
///
/// Each generated method:
/// 1. Checks remaining length (returns `CodecError::EndOfStream` if short)
/// 2. Converts bytes with `from_le_bytes()`
/// 3. Advances the cursor
macro_rules! impl_read_le {
    ($name:ident, $type:ty, $size:expr) => {
        pub fn $name(&mut self) -> Result<$type> {
            let mut bytes = [0u8; $size];
            bytes.copy_from_slice(self.take($size)?);
            Ok(<$type>::from_le_bytes(bytes))
        }
    };
}

/// Wire decoder over an immutable byte slice.
pub struct StreamReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> StreamReader<'a> {
    /// Create a reader at the start of `data`
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    /// Take `len` bytes and advance, or fail with `EndOfStream`
    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.position + len > self.data.len() {
            return Err(CodecError::EndOfStream {
                offset: self.position,
                needed: self.position + len - self.data.len(),
            });
        }
        let slice = &self.data[self.position..self.position + len];
        self.position += len;
        Ok(slice)
    }

    impl_read_le!(read_i32, i32, 4);
    impl_read_le!(read_i64, i64, 8);
    impl_read_le!(read_u32, u32, 4);
    impl_read_le!(read_f32, f32, 4);
    impl_read_le!(read_f64, f64, 8);

    /// Read a bool encoded as `i32` (any non-zero value is true)
    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_i32()? != 0)
    }

    /// Read a length-prefixed UTF-8 string.
    ///
    /// Length -1 and 0 both decode as the empty string.
    pub fn read_string(&mut self) -> Result<String> {
        let length = self.read_i32()?;
        if length == NULL_SENTINEL || length == 0 {
            return Ok(String::new());
        }
        if length < 0 {
            return Err(CodecError::Malformed(format!(
                "negative string length {length}"
            )));
        }
        let bytes = self.take(length as usize)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| CodecError::Malformed(format!("invalid UTF-8 in string: {e}")))
    }

    /// Read a length-prefixed byte blob
    pub fn read_bytes(&mut self) -> Result<Vec<u8>> {
        let length = self.read_i32()?;
        if length < 0 {
            return Err(CodecError::Malformed(format!(
                "negative blob length {length}"
            )));
        }
        Ok(self.take(length as usize)?.to_vec())
    }

    /// Read a timestamp (`i64` seconds since the Unix epoch)
    pub fn read_timestamp(&mut self) -> Result<Timestamp> {
        Ok(Timestamp::from_secs(self.read_i64()?))
    }

    /// Read a three-float vector
    pub fn read_vec3(&mut self) -> Result<Vec3> {
        Ok(Vec3 {
            x: self.read_f32()?,
            y: self.read_f32()?,
            z: self.read_f32()?,
        })
    }

    /// Read an optional string (`i32` tag 0/1 then string)
    pub fn read_optional_string(&mut self) -> Result<Option<String>> {
        if self.read_i32()? != 0 {
            Ok(Some(self.read_string()?))
        } else {
            Ok(None)
        }
    }

    /// Read a homogeneous sequence (`i32 count` then `count` elements)
    pub fn read_seq<T>(&mut self, mut read_item: impl FnMut(&mut Self) -> Result<T>) -> Result<Vec<T>> {
        let count = self.read_i32()?;
        if count < 0 {
            return Err(CodecError::Malformed(format!(
                "negative sequence count {count}"
            )));
        }
        // A count cannot exceed the remaining bytes: every element encodes
        // to at least one byte, so a larger count is corrupt input.
        let count = count as usize;
        if count > self.remaining() {
            return Err(CodecError::Malformed(format!(
                "sequence count {count} exceeds {} remaining bytes",
                self.remaining()
            )));
        }
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            items.push(read_item(self)?);
        }
        Ok(items)
    }

    /// Read a polymorphic object framed as `i32 hash_code` + payload.
    ///
    /// The null sentinel -1 yields `None`. The handler is resolved
    /// through the global registry by hash code; an unknown code is
    /// `CodecError::UnknownType`.
    pub fn read_object(&mut self) -> Result<Option<Box<dyn Any + Send>>> {
        let hash_code = self.read_i32()?;
        if hash_code == NULL_SENTINEL {
            return Ok(None);
        }
        let handler = registry().handler_for_code(hash_code)?;
        handler.read(self).map(Some)
    }

    /// Current cursor position
    #[must_use]
    pub fn position(&self) -> usize {
        self.position
    }

    /// Bytes left to read
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.position)
    }

    /// True when the cursor is at the end of the buffer
    #[must_use]
    pub fn is_eof(&self) -> bool {
        self.position >= self.data.len()
    }
}
