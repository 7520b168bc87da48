// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 bitrpc-team

//! # BitRPC - Binary RPC with shared-memory IPC
//!
//! A small RPC framework combining two transport cores: a length-prefixed
//! TCP request/response (and server-streaming) transport for cross-machine
//! calls, and a cross-process single-producer/single-consumer (SPSC)
//! shared-memory ring buffer for same-host, low-latency IPC.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bitrpc::rpc::{RpcClient, RpcServer, Service, ServerConfig};
//! use std::sync::Arc;
//!
//! fn main() -> bitrpc::rpc::Result<()> {
//!     // Server side: register a service and start listening
//!     let service = Service::new("Calc");
//!     service.register_unary("Double", |x: i32| x * 2);
//!
//!     let mut server = RpcServer::new();
//!     server.services().register(Arc::new(service));
//!     server.start(ServerConfig { listen_port: 9000, ..Default::default() })?;
//!
//!     // Client side: one call, one response
//!     let client = RpcClient::connect_to("127.0.0.1", 9000)?;
//!     let doubled: i32 = client.call_typed("Calc.Double", &21)?;
//!     assert_eq!(doubled, 42);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |                        Application Layer                            |
//! |   Generated stubs -> RpcClient / Service handlers / ShmManager     |
//! +---------------------------------------------------------------------+
//! |                          RPC Layer                                  |
//! |   Frame protocol | Service registry | Unary/Async/Stream dispatch  |
//! +---------------------------------------------------------------------+
//! |                        Codec Layer                                  |
//! |   StreamWriter/Reader | Type-handler registry | Object framing     |
//! +---------------------------------------------------------------------+
//! |                      Transport Layer                                |
//! |   TCP (length-prefixed frames) | SPSC shared-memory ring buffer    |
//! +---------------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`codec::StreamWriter`] | Append-only wire encoder (little-endian) |
//! | [`codec::StreamReader`] | Bounds-checked wire decoder |
//! | [`rpc::RpcClient`] | Single-connection TCP client (unary + streaming) |
//! | [`rpc::RpcServer`] | Accept-loop server with per-connection workers |
//! | [`rpc::Service`] | Named method table (unary/async/stream dispatch) |
//! | [`shm::RingBuffer`] | SPSC byte queue in shared memory |
//! | [`shm::ShmManager`] | Framed message layer with heartbeats and stats |
//!
//! ## Modules Overview
//!
//! - [`codec`] - Wire encoding, type-handler registry, object framing
//! - [`rpc`] - TCP transport, service registry, method dispatch
//! - [`shm`] - Shared-memory ring buffer and message layer

/// Wire codec: stream writers/readers, type-handler registry, BitMask.
pub mod codec;
/// TCP RPC transport: framing, client, server, service dispatch.
pub mod rpc;
/// Cross-process SPSC ring buffer and shared-memory message layer.
pub mod shm;

pub use codec::{
    BitMask, CodecError, HandlerRegistry, Message, StreamReader, StreamWriter, Timestamp, Vec3,
};
pub use rpc::{ClientStream, RpcClient, RpcError, RpcServer, Service, ServiceRegistry};
pub use shm::{MessageType, RingBuffer, ShmError, ShmManager, ShmMessage};

/// BitRPC version string.
pub const VERSION: &str = "0.2.0";
