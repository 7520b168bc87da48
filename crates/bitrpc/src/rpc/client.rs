// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 bitrpc-team

//! Single-connection TCP RPC client.
//!
//! `RpcClient` owns one socket. An internal mutex serializes callers so
//! exactly one request/response pair is on the wire at a time; the
//! lifecycle is `Disconnected -> Connected` and back on `disconnect()` or
//! any socket error. Reconnect is an explicit new `connect()`.
//!
//! Starting a stream puts the connection in streaming mode: unary calls
//! are rejected until the stream ends. Abandoning a stream mid-way leaves
//! response frames in flight, so closing an unfinished stream drops the
//! socket; the client must reconnect.

use super::frame::{encode_request_payload, read_frame, write_frame};
use super::stream::ClientStream;
use super::{Result, RpcError};
use crate::codec::{decode_object, encode_object, Message};
use parking_lot::Mutex;
use std::io;
use std::net::TcpStream;
use std::sync::Arc;

/// Client connection configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server host name or address
    pub host: String,
    /// Server TCP port
    pub port: u16,
}

pub(crate) struct ClientInner {
    pub(crate) stream: Option<TcpStream>,
    /// Set while a `ClientStream` owns the socket
    pub(crate) streaming: bool,
}

impl ClientInner {
    /// Drop the socket after a wire error; the caller must reconnect.
    pub(crate) fn poison(&mut self) {
        self.stream = None;
        self.streaming = false;
    }
}

/// TCP RPC client: connect/disconnect, unary call, server-streaming call.
pub struct RpcClient {
    inner: Arc<Mutex<ClientInner>>,
}

impl RpcClient {
    /// Create a disconnected client
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ClientInner {
                stream: None,
                streaming: false,
            })),
        }
    }

    /// Create a client and connect in one step
    pub fn connect_to(host: &str, port: u16) -> Result<Self> {
        let client = Self::new();
        client.connect(&ClientConfig {
            host: host.to_string(),
            port,
        })?;
        Ok(client)
    }

    /// Connect to a server, replacing any existing connection.
    pub fn connect(&self, config: &ClientConfig) -> Result<()> {
        let stream = TcpStream::connect((config.host.as_str(), config.port))?;
        stream.set_nodelay(true)?;
        log::info!("[RPC] connected to {}:{}", config.host, config.port);

        let mut inner = self.inner.lock();
        inner.stream = Some(stream);
        inner.streaming = false;
        Ok(())
    }

    /// Drop the connection. Idempotent.
    pub fn disconnect(&self) {
        let mut inner = self.inner.lock();
        if inner.stream.take().is_some() {
            log::info!("[RPC] disconnected");
        }
        inner.streaming = false;
    }

    /// True while a socket is held
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.lock().stream.is_some()
    }

    /// Issue a unary call and return the raw response payload.
    ///
    /// The request bytes must be pre-encoded (`[i32 hash][body]`); the
    /// response payload is returned as-is and is empty when the server
    /// reported an unknown method or a decode failure.
    ///
    /// # Errors
    ///
    /// `NotConnected` before `connect`, `StreamInProgress` while a stream
    /// reader is live, and `Connection` on any socket error (the client
    /// transitions to Disconnected).
    pub fn call(&self, method: &str, request: &[u8]) -> Result<Vec<u8>> {
        let mut inner = self.inner.lock();
        if inner.streaming {
            return Err(RpcError::StreamInProgress);
        }
        let Some(stream) = inner.stream.as_mut() else {
            return Err(RpcError::NotConnected);
        };

        let payload = encode_request_payload(method, request);
        match Self::exchange(stream, &payload) {
            Ok(response) => Ok(response),
            Err(e) => {
                log::warn!("[RPC] call '{method}' failed: {e}");
                inner.poison();
                Err(e)
            }
        }
    }

    /// One framed request, one framed response.
    fn exchange(stream: &mut TcpStream, payload: &[u8]) -> Result<Vec<u8>> {
        write_frame(stream, payload)?;
        match read_frame(stream)? {
            Some(response) => Ok(response),
            // The server closed mid-call; for a caller awaiting its
            // response that is a connection failure, not a clean EOF.
            None => Err(RpcError::Connection(io::Error::from(
                io::ErrorKind::UnexpectedEof,
            ))),
        }
    }

    /// Typed unary call: encode the request, decode the response.
    ///
    /// An empty response payload (the server's unknown-method /
    /// decode-failure signal) is surfaced as `RpcError::NotFound`.
    pub fn call_typed<Req: Message, Resp: Message>(
        &self,
        method: &str,
        request: &Req,
    ) -> Result<Resp> {
        let response = self.call(method, &encode_object(request))?;
        if response.is_empty() {
            return Err(RpcError::NotFound(method.to_string()));
        }
        decode_object::<Resp>(&response).map_err(RpcError::Serialization)
    }

    /// Start a server-streaming call.
    ///
    /// The returned [`ClientStream`] owns the socket for the duration of
    /// the stream; unary calls are rejected until it observes the
    /// zero-length terminator.
    pub fn stream(&self, method: &str, request: &[u8]) -> Result<ClientStream> {
        let mut inner = self.inner.lock();
        if inner.streaming {
            return Err(RpcError::StreamInProgress);
        }
        let Some(stream) = inner.stream.as_mut() else {
            return Err(RpcError::NotConnected);
        };

        let payload = encode_request_payload(method, request);
        if let Err(e) = write_frame(stream, &payload) {
            log::warn!("[RPC] stream '{method}' request failed: {e}");
            inner.poison();
            return Err(e);
        }

        inner.streaming = true;
        Ok(ClientStream::new(Arc::clone(&self.inner)))
    }

    /// Typed streaming call: encodes the request for you
    pub fn stream_typed<Req: Message>(&self, method: &str, request: &Req) -> Result<ClientStream> {
        self.stream(method, &encode_object(request))
    }
}

impl Default for RpcClient {
    fn default() -> Self {
        Self::new()
    }
}
