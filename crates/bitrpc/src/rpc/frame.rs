// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 bitrpc-team

//! Length-prefix framing and request payload parsing.
//!
//! TCP is a stream protocol without message boundaries; every BitRPC
//! exchange is delimited by a little-endian `u32` length prefix:
//!
//! ```text
//! +----------------+-------------------+
//! | Length (4B LE) | Payload           |
//! +----------------+-------------------+
//! ```
//!
//! Request payloads carry the method name in front of the body. Two
//! layouts exist in the wild:
//!
//! - **Embedded** (current): `i32 name_len | name bytes | body`
//! - **Legacy**: a bare printable-ASCII method name directly followed by
//!   the body; the name ends at the first non-printable byte
//!
//! [`extract_method_name`] tries the embedded form first and falls back
//! to the legacy parser, which keeps the server compatible with older
//! deployed clients.

use super::{Result, RpcError, MAX_FRAME_SIZE};
use std::io::{Read, Write};

/// Read one `u32 len | len bytes` frame.
///
/// Returns `Ok(None)` on clean EOF at a frame boundary. A length above
/// [`MAX_FRAME_SIZE`] or a truncated payload is an error; callers
/// terminate the connection.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_bytes = [0u8; 4];
    match reader.read_exact(&mut len_bytes) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(RpcError::Connection(e)),
    }

    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(RpcError::FrameTooLarge(len));
    }

    let mut payload = vec![0u8; len];
    reader
        .read_exact(&mut payload)
        .map_err(|e| RpcError::Protocol(format!("truncated frame ({len} byte payload): {e}")))?;
    Ok(Some(payload))
}

/// Write one `u32 len | payload` frame.
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> Result<()> {
    if payload.len() > MAX_FRAME_SIZE {
        return Err(RpcError::FrameTooLarge(payload.len()));
    }
    writer.write_all(&(payload.len() as u32).to_le_bytes())?;
    writer.write_all(payload)?;
    writer.flush()?;
    Ok(())
}

fn is_printable_ascii(bytes: &[u8]) -> bool {
    bytes.iter().all(|&b| (32..=126).contains(&b))
}

/// Extract the method name from a request payload.
///
/// Primary path: `i32 name_len` prefix with a printable-ASCII name whose
/// length fits in the payload. Non-positive or oversized lengths (and
/// non-printable names) fall back to the legacy parser: the printable
/// ASCII prefix is the name, the remainder the request body.
///
/// Returns `(method_name, body)`.
#[must_use]
pub fn extract_method_name(payload: &[u8]) -> (String, &[u8]) {
    if payload.len() >= 4 {
        let name_len = i32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
        if name_len > 0 {
            let name_len = name_len as usize;
            if let Some(name_bytes) = payload.get(4..4 + name_len) {
                if is_printable_ascii(name_bytes) {
                    // Embedded form; name bytes were validated as ASCII.
                    let name = String::from_utf8_lossy(name_bytes).into_owned();
                    return (name, &payload[4 + name_len..]);
                }
            }
        }
    }

    // Legacy fallback: printable prefix up to the first non-printable byte.
    let end = payload
        .iter()
        .position(|&b| !(32..=126).contains(&b))
        .unwrap_or(payload.len());
    let name = String::from_utf8_lossy(&payload[..end]).into_owned();
    (name, &payload[end..])
}

/// Build a request payload in the embedded form: length-prefixed method
/// name followed by the pre-encoded request body.
#[must_use]
pub fn encode_request_payload(method: &str, body: &[u8]) -> Vec<u8> {
    let mut writer = crate::codec::StreamWriter::with_capacity(4 + method.len() + body.len());
    writer.write_string(method);
    writer.write_raw(body);
    writer.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_frame_roundtrip() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"hello").expect("write");

        let mut cursor = Cursor::new(buf);
        let frame = read_frame(&mut cursor).expect("read").expect("frame");
        assert_eq!(frame, b"hello");
    }

    #[test]
    fn test_clean_eof_is_none() {
        let mut cursor = Cursor::new(Vec::new());
        assert!(read_frame(&mut cursor).expect("read").is_none());
    }

    #[test]
    fn test_truncated_payload_is_error() {
        let mut buf = 100u32.to_le_bytes().to_vec();
        buf.extend_from_slice(b"short");
        let mut cursor = Cursor::new(buf);
        assert!(matches!(
            read_frame(&mut cursor),
            Err(RpcError::Protocol(_))
        ));
    }

    #[test]
    fn test_oversize_frame_rejected() {
        let buf = ((MAX_FRAME_SIZE + 1) as u32).to_le_bytes();
        let mut cursor = Cursor::new(buf.to_vec());
        assert!(matches!(
            read_frame(&mut cursor),
            Err(RpcError::FrameTooLarge(_))
        ));
    }

    #[test]
    fn test_extract_embedded_form() {
        let payload = encode_request_payload("Test.Echo", &[0xAB, 0xCD]);
        let (name, body) = extract_method_name(&payload);
        assert_eq!(name, "Test.Echo");
        assert_eq!(body, &[0xAB, 0xCD]);
    }

    #[test]
    fn test_extract_legacy_ascii_prefix() {
        // Old clients sent the name bare, terminated by the binary body.
        let mut payload = b"Test.Echo".to_vec();
        payload.extend_from_slice(&1001i32.to_le_bytes());
        let (name, body) = extract_method_name(&payload);
        assert_eq!(name, "Test.Echo");
        assert_eq!(body, &1001i32.to_le_bytes());
    }

    #[test]
    fn test_extract_zero_name_len_falls_back() {
        // name_len = 0 is non-positive and takes the fallback path; the
        // zero bytes are not printable so the name comes back empty.
        let mut payload = 0i32.to_le_bytes().to_vec();
        payload.push(0x01);
        let (name, body) = extract_method_name(&payload);
        assert_eq!(name, "");
        assert_eq!(body.len(), 5);
    }

    #[test]
    fn test_extract_oversized_name_len_falls_back() {
        // Claims 100 name bytes in an 8-byte payload. The length prefix
        // itself starts with 'd' (0x64), a printable byte, so the legacy
        // parser consumes it as part of the name.
        let mut payload = 100i32.to_le_bytes().to_vec();
        payload.extend_from_slice(&[0x00; 4]);
        let (name, _body) = extract_method_name(&payload);
        assert_eq!(name, "d");
    }

    #[test]
    fn test_extract_empty_payload() {
        let (name, body) = extract_method_name(&[]);
        assert_eq!(name, "");
        assert!(body.is_empty());
    }

    #[test]
    fn test_encode_request_empty_method_uses_sentinel() {
        // An empty method encodes as the -1 string sentinel; servers
        // route it through the fallback parser.
        let payload = encode_request_payload("", b"x");
        assert_eq!(&payload[..4], &(-1i32).to_le_bytes());
    }
}
