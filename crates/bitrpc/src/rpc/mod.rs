// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 bitrpc-team

//! TCP RPC transport.
//!
//! Clients issue calls identified by a `Service.Method` name; servers
//! dispatch them to registered handlers. Every message on the socket is a
//! frame: a little-endian `u32` length followed by that many payload
//! bytes.
//!
//! # Architecture
//!
//! ```text
//! +--------------------+                    +----------------------+
//! |      RpcClient     |                    |      RpcServer       |
//! |  call / stream     |   length-prefixed  |  accept thread       |
//! |  (mutex-serialized)|------ frames ----->|  worker per conn     |
//! +--------------------+                    |        |             |
//!                                           |        v             |
//!                                           |  ServiceRegistry     |
//!                                           |  stream>unary>async  |
//!                                           +----------------------+
//! ```
//!
//! # Request Framing
//!
//! ```text
//! +---------------+-------------------------------------------+
//! | u32 len (LE)  | i32 name_len | name bytes | request body   |
//! +---------------+-------------------------------------------+
//! ```
//!
//! The request body begins with the request type's `i32` hash code, which
//! is what lets the server decode it through the handler registry. Legacy
//! clients sent the method name as a bare printable-ASCII prefix; the
//! server still accepts that via a fallback parser, but this client only
//! emits the embedded form.

mod client;
mod frame;
mod server;
mod service;
mod stream;

pub use client::{ClientConfig, RpcClient};
pub use frame::{extract_method_name, read_frame, write_frame};
pub use server::{RpcServer, ServerConfig};
pub use service::{Service, ServiceRegistry};
pub use stream::ClientStream;

use crate::codec::CodecError;
use std::fmt;
use std::io;

/// Maximum frame size (10 MiB). Exceeding it is a protocol error that
/// terminates the connection.
pub const MAX_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// Errors that can occur in RPC transport operations
#[derive(Debug)]
pub enum RpcError {
    /// Socket creation, connect, send, or recv failure
    Connection(io::Error),

    /// Operation requires a connected client
    NotConnected,

    /// Unary call attempted while a stream reader is live
    StreamInProgress,

    /// Frame length exceeds the 10 MiB cap
    FrameTooLarge(usize),

    /// Truncated frame or unparseable request payload
    Protocol(String),

    /// Wire encode/decode failure
    Serialization(CodecError),

    /// Stream terminated with an error indicator
    Stream(String),

    /// Unknown service or method (server-side; clients see an empty frame)
    NotFound(String),

    /// Wait primitive returned no data within the deadline
    Timeout,
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection(e) => write!(f, "connection error: {e}"),
            Self::NotConnected => write!(f, "client is not connected"),
            Self::StreamInProgress => {
                write!(f, "unary call rejected while a stream is in progress")
            }
            Self::FrameTooLarge(size) => {
                write!(f, "frame of {size} bytes exceeds {MAX_FRAME_SIZE} byte cap")
            }
            Self::Protocol(msg) => write!(f, "protocol error: {msg}"),
            Self::Serialization(e) => write!(f, "serialization error: {e}"),
            Self::Stream(msg) => write!(f, "stream error: {msg}"),
            Self::NotFound(name) => write!(f, "service or method not found: {name}"),
            Self::Timeout => write!(f, "operation timed out"),
        }
    }
}

impl std::error::Error for RpcError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Connection(e) => Some(e),
            Self::Serialization(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for RpcError {
    fn from(e: io::Error) -> Self {
        Self::Connection(e)
    }
}

impl From<CodecError> for RpcError {
    fn from(e: CodecError) -> Self {
        Self::Serialization(e)
    }
}

/// Result type for RPC operations
pub type Result<T> = std::result::Result<T, RpcError>;

/// Split a `Service.Method` string at the first dot.
///
/// A missing dot yields the whole string as the service and an empty
/// method name.
#[must_use]
pub fn split_method(full: &str) -> (&str, &str) {
    match full.split_once('.') {
        Some((service, method)) => (service, method),
        None => (full, ""),
    }
}
