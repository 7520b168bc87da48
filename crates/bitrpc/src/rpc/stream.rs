// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 bitrpc-team

//! Client-side stream reader.
//!
//! A server-streaming response is a sequence of `u32 len | frame` pairs
//! terminated by a single `u32 0`. The reader yields frame bodies (each
//! beginning with the item type's hash code) and latches its first error:
//! once `has_error()` is set, `has_more()` is false and subsequent reads
//! fail fast.
//!
//! State machine: `Active -> Ended` on the zero-length terminator or
//! `close()`; `Active -> Errored` on any recv error or oversize frame.

use super::client::ClientInner;
use super::{Result, RpcError, MAX_FRAME_SIZE};
use crate::codec::{decode_object, Message};
use parking_lot::Mutex;
use std::io::Read;
use std::sync::Arc;

/// Reader over a server-streaming response.
///
/// Owns the client socket for the duration of the stream; the owning
/// [`RpcClient`](super::RpcClient) rejects unary calls until the stream
/// ends.
pub struct ClientStream {
    client: Arc<Mutex<ClientInner>>,
    ended: bool,
    errored: bool,
    error_message: String,
}

impl ClientStream {
    pub(crate) fn new(client: Arc<Mutex<ClientInner>>) -> Self {
        Self {
            client,
            ended: false,
            errored: false,
            error_message: String::new(),
        }
    }

    /// Read the next frame body.
    ///
    /// Returns `Ok(None)` when the stream has ended (terminator observed
    /// or reader closed). Errors latch: every later call fails with the
    /// same stream error.
    pub fn next(&mut self) -> Result<Option<Vec<u8>>> {
        if self.errored {
            return Err(RpcError::Stream(self.error_message.clone()));
        }
        if self.ended {
            return Ok(None);
        }

        let mut inner = self.client.lock();
        let Some(stream) = inner.stream.as_mut() else {
            drop(inner);
            return Err(self.mark_error("connection closed during stream", None));
        };

        let mut len_bytes = [0u8; 4];
        if let Err(e) = stream.read_exact(&mut len_bytes) {
            inner.poison();
            drop(inner);
            return Err(self.mark_error("recv failed while reading frame length", Some(e)));
        }

        let len = u32::from_le_bytes(len_bytes) as usize;
        if len == 0 {
            // Graceful end-of-stream: the connection stays usable.
            self.ended = true;
            inner.streaming = false;
            return Ok(None);
        }
        if len > MAX_FRAME_SIZE {
            inner.poison();
            drop(inner);
            return Err(self.mark_error(&format!("frame of {len} bytes exceeds cap"), None));
        }

        let mut frame = vec![0u8; len];
        if let Err(e) = stream.read_exact(&mut frame) {
            inner.poison();
            drop(inner);
            return Err(self.mark_error("recv failed while reading frame body", Some(e)));
        }

        Ok(Some(frame))
    }

    /// Read and decode the next stream item
    pub fn next_typed<T: Message>(&mut self) -> Result<Option<T>> {
        match self.next()? {
            Some(frame) => Ok(Some(
                decode_object::<T>(&frame).map_err(RpcError::Serialization)?,
            )),
            None => Ok(None),
        }
    }

    /// True while more frames may arrive
    #[must_use]
    pub fn has_more(&self) -> bool {
        !self.ended && !self.errored
    }

    /// True once the reader latched an error
    #[must_use]
    pub fn has_error(&self) -> bool {
        self.errored
    }

    /// The latched error description (empty when no error occurred)
    #[must_use]
    pub fn error_message(&self) -> &str {
        &self.error_message
    }

    /// Stop reading.
    ///
    /// Closing before the terminator leaves response frames in flight, so
    /// the underlying socket is dropped and the client must reconnect.
    /// Idempotent.
    pub fn close(&mut self) {
        if self.ended || self.errored {
            return;
        }
        self.ended = true;
        let mut inner = self.client.lock();
        log::debug!("[RPC] stream closed before terminator, dropping connection");
        inner.poison();
    }

    fn mark_error(&mut self, context: &str, cause: Option<std::io::Error>) -> RpcError {
        self.errored = true;
        self.ended = true;
        self.error_message = match cause {
            Some(e) => format!("{context}: {e}"),
            None => context.to_string(),
        };
        log::warn!("[RPC] stream error: {}", self.error_message);
        RpcError::Stream(self.error_message.clone())
    }
}

impl Drop for ClientStream {
    fn drop(&mut self) {
        self.close();
    }
}
