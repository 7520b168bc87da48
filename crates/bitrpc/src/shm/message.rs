// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 bitrpc-team

//! Framed messages carried over the ring buffer.
//!
//! # Wire Layout (little-endian, packed, 24 bytes)
//!
//! ```text
//! Offset  Size  Field
//! 0       4     message_id   (producer-monotonic, non-zero)
//! 4       4     message_type
//! 8       4     payload_size
//! 12      8     timestamp_ms (sender-assigned, ms since Unix epoch)
//! 20      1     flags
//! 21      3     reserved
//! ```
//!
//! The payload follows immediately; header plus payload are written to
//! the ring as one `write` so the consumer always sees whole messages.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Size of the packed message header
pub const MESSAGE_HEADER_SIZE: usize = 24;

/// Message flag bits. The core only propagates them; compression,
/// encryption, and fragmentation are the caller's business.
pub mod flags {
    pub const URGENT: u8 = 0x01;
    pub const COMPRESSED: u8 = 0x02;
    pub const ENCRYPTED: u8 = 0x04;
    pub const LAST_FRAGMENT: u8 = 0x08;
}

/// Standard message types; values >= 1000 are user-defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Data,
    Control,
    Heartbeat,
    Error,
    User(u32),
}

impl MessageType {
    /// Wire code for this type
    #[must_use]
    pub fn code(self) -> u32 {
        match self {
            Self::Data => 1,
            Self::Control => 2,
            Self::Heartbeat => 3,
            Self::Error => 4,
            Self::User(code) => code,
        }
    }

    /// Decode a wire code; unknown low codes map to `User` as well
    #[must_use]
    pub fn from_code(code: u32) -> Self {
        match code {
            1 => Self::Data,
            2 => Self::Control,
            3 => Self::Heartbeat,
            4 => Self::Error,
            other => Self::User(other),
        }
    }
}

/// Packed message header in host (little-endian) layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub message_id: u32,
    pub message_type: u32,
    pub payload_size: u32,
    pub timestamp_ms: u64,
    pub flags: u8,
}

impl MessageHeader {
    /// Serialize into the 24-byte wire layout
    #[must_use]
    pub fn to_bytes(&self) -> [u8; MESSAGE_HEADER_SIZE] {
        let mut bytes = [0u8; MESSAGE_HEADER_SIZE];
        bytes[0..4].copy_from_slice(&self.message_id.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.message_type.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.payload_size.to_le_bytes());
        bytes[12..20].copy_from_slice(&self.timestamp_ms.to_le_bytes());
        bytes[20] = self.flags;
        // bytes 21..24 reserved, zero
        bytes
    }

    /// Parse the 24-byte wire layout; `None` when `data` is too short
    #[must_use]
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < MESSAGE_HEADER_SIZE {
            return None;
        }
        Some(Self {
            message_id: u32::from_le_bytes([data[0], data[1], data[2], data[3]]),
            message_type: u32::from_le_bytes([data[4], data[5], data[6], data[7]]),
            payload_size: u32::from_le_bytes([data[8], data[9], data[10], data[11]]),
            timestamp_ms: u64::from_le_bytes([
                data[12], data[13], data[14], data[15], data[16], data[17], data[18], data[19],
            ]),
            flags: data[20],
        })
    }
}

/// Producer-monotonic message id source, starting at 1.
static NEXT_ID: AtomicU32 = AtomicU32::new(1);

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A message carried over the shared-memory link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShmMessage {
    header: MessageHeader,
    payload: Vec<u8>,
}

impl ShmMessage {
    /// Build a message with a fresh id and the current timestamp
    #[must_use]
    pub fn new(message_type: MessageType, payload: &[u8]) -> Self {
        Self {
            header: MessageHeader {
                message_id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
                message_type: message_type.code(),
                payload_size: payload.len() as u32,
                timestamp_ms: now_ms(),
                flags: 0,
            },
            payload: payload.to_vec(),
        }
    }

    /// Message type
    #[must_use]
    pub fn message_type(&self) -> MessageType {
        MessageType::from_code(self.header.message_type)
    }

    /// Producer-assigned id (non-zero for valid messages)
    #[must_use]
    pub fn id(&self) -> u32 {
        self.header.message_id
    }

    /// Sender-assigned timestamp in ms since the Unix epoch
    #[must_use]
    pub fn timestamp_ms(&self) -> u64 {
        self.header.timestamp_ms
    }

    /// Payload bytes
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Raw header
    #[must_use]
    pub fn header(&self) -> &MessageHeader {
        &self.header
    }

    /// Set a flag bit
    pub fn set_flag(&mut self, flag: u8) {
        self.header.flags |= flag;
    }

    /// Check a flag bit
    #[must_use]
    pub fn has_flag(&self, flag: u8) -> bool {
        self.header.flags & flag != 0
    }

    /// Total wire size: header plus payload
    #[must_use]
    pub fn total_size(&self) -> usize {
        MESSAGE_HEADER_SIZE + self.payload.len()
    }

    /// A message is valid once it carries a non-zero id
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.header.message_id != 0
    }

    /// Serialize header + payload into one buffer
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.total_size());
        bytes.extend_from_slice(&self.header.to_bytes());
        bytes.extend_from_slice(&self.payload);
        bytes
    }

    /// Parse a message from `data`.
    ///
    /// `None` when the header is short or the declared payload size
    /// exceeds the provided bytes. Trailing bytes beyond the declared
    /// payload are ignored (they belong to the next message).
    #[must_use]
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        let header = MessageHeader::from_bytes(data)?;
        let total = MESSAGE_HEADER_SIZE + header.payload_size as usize;
        if data.len() < total {
            return None;
        }
        Some(Self {
            header,
            payload: data[MESSAGE_HEADER_SIZE..total].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_size_is_24() {
        let header = MessageHeader {
            message_id: 1,
            message_type: 1,
            payload_size: 0,
            timestamp_ms: 0,
            flags: 0,
        };
        assert_eq!(header.to_bytes().len(), MESSAGE_HEADER_SIZE);
    }

    #[test]
    fn test_header_layout() {
        let header = MessageHeader {
            message_id: 0x0102_0304,
            message_type: 3,
            payload_size: 0x10,
            timestamp_ms: 0x1122_3344_5566_7788,
            flags: flags::URGENT | flags::LAST_FRAGMENT,
        };
        let bytes = header.to_bytes();
        assert_eq!(&bytes[0..4], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&bytes[4..8], &[3, 0, 0, 0]);
        assert_eq!(&bytes[8..12], &[0x10, 0, 0, 0]);
        assert_eq!(&bytes[12..20], &0x1122_3344_5566_7788u64.to_le_bytes());
        assert_eq!(bytes[20], 0x09);
        assert_eq!(&bytes[21..24], &[0, 0, 0]);

        let parsed = MessageHeader::from_bytes(&bytes).expect("parse");
        assert_eq!(parsed, header);
    }

    #[test]
    fn test_message_type_codes() {
        assert_eq!(MessageType::Data.code(), 1);
        assert_eq!(MessageType::Control.code(), 2);
        assert_eq!(MessageType::Heartbeat.code(), 3);
        assert_eq!(MessageType::Error.code(), 4);
        assert_eq!(MessageType::User(1000).code(), 1000);
        assert_eq!(MessageType::from_code(3), MessageType::Heartbeat);
        assert_eq!(MessageType::from_code(1234), MessageType::User(1234));
    }

    #[test]
    fn test_ids_are_monotonic_and_nonzero() {
        let a = ShmMessage::new(MessageType::Data, b"a");
        let b = ShmMessage::new(MessageType::Data, b"b");
        assert!(a.id() >= 1);
        assert!(b.id() > a.id());
        assert!(a.is_valid());
    }

    #[test]
    fn test_message_roundtrip() {
        let mut msg = ShmMessage::new(MessageType::User(2000), b"payload bytes");
        msg.set_flag(flags::COMPRESSED);

        let bytes = msg.to_bytes();
        assert_eq!(bytes.len(), MESSAGE_HEADER_SIZE + 13);

        let parsed = ShmMessage::from_bytes(&bytes).expect("parse");
        assert_eq!(parsed, msg);
        assert_eq!(parsed.payload(), b"payload bytes");
        assert!(parsed.has_flag(flags::COMPRESSED));
        assert!(!parsed.has_flag(flags::ENCRYPTED));
        assert_eq!(parsed.message_type(), MessageType::User(2000));
    }

    #[test]
    fn test_parse_ignores_trailing_bytes() {
        let msg = ShmMessage::new(MessageType::Data, b"first");
        let mut bytes = msg.to_bytes();
        bytes.extend_from_slice(b"next message junk");

        let parsed = ShmMessage::from_bytes(&bytes).expect("parse");
        assert_eq!(parsed.payload(), b"first");
    }

    #[test]
    fn test_parse_rejects_truncation() {
        let msg = ShmMessage::new(MessageType::Data, b"0123456789");
        let bytes = msg.to_bytes();

        assert!(ShmMessage::from_bytes(&bytes[..MESSAGE_HEADER_SIZE - 1]).is_none());
        assert!(ShmMessage::from_bytes(&bytes[..bytes.len() - 1]).is_none());
    }

    #[test]
    fn test_timestamp_is_current() {
        let msg = ShmMessage::new(MessageType::Data, b"");
        assert!(msg.timestamp_ms() > 1_600_000_000_000);
    }
}
