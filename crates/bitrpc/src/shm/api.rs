// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 bitrpc-team

//! Role-typed facades over [`ShmManager`].
//!
//! `ShmProducer` and `ShmConsumer` fix the manager's role at the type
//! level and expose only the operations that make sense for that side of
//! the link. They add nothing to the protocol; callers who need batch
//! tuning or handler dispatch can use [`ShmManager`] directly.

use super::manager::{ManagerConfig, ShmManager, StatsSnapshot};
use super::message::{MessageType, ShmMessage};
use super::Result;
use std::time::Duration;

/// Sending half of a shared-memory link.
pub struct ShmProducer {
    manager: ShmManager,
}

impl ShmProducer {
    /// Create the link and start producing
    pub fn connect(name: &str, buffer_size: usize) -> Result<Self> {
        let mut config = ManagerConfig::new(name);
        config.buffer_size = buffer_size;
        let manager = ShmManager::new(config);
        manager.start_producer()?;
        Ok(Self { manager })
    }

    /// Send raw bytes as a DATA message
    pub fn send(&self, data: &[u8]) -> Result<bool> {
        self.manager.send(MessageType::Data, data)
    }

    /// Send a string payload as a DATA message
    pub fn send_str(&self, text: &str) -> Result<bool> {
        self.send(text.as_bytes())
    }

    /// Send a pre-built message
    pub fn send_message(&self, message: &ShmMessage) -> Result<bool> {
        self.manager.send_message(message)
    }

    /// Send messages in order, stopping at the first failure
    pub fn send_batch(&self, messages: &[ShmMessage]) -> usize {
        self.manager.send_messages(messages)
    }

    /// Send a heartbeat now
    pub fn send_heartbeat(&self) -> bool {
        self.manager.send_heartbeat()
    }

    /// Block until the ring has free space
    pub fn wait_for_space(&self, timeout: Option<Duration>) -> bool {
        self.manager.wait_for_space(timeout)
    }

    /// Bytes available for writing
    #[must_use]
    pub fn free_space(&self) -> usize {
        self.manager.free_space()
    }

    /// Transfer counters
    #[must_use]
    pub fn statistics(&self) -> StatsSnapshot {
        self.manager.statistics()
    }

    /// Stop producing and release the link. Idempotent.
    pub fn disconnect(&self) {
        self.manager.stop();
    }

    /// True until `disconnect`
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.manager.is_running()
    }
}

/// Receiving half of a shared-memory link.
pub struct ShmConsumer {
    manager: ShmManager,
}

impl ShmConsumer {
    /// Attach to a link created by a producer
    pub fn connect(name: &str, buffer_size: usize) -> Result<Self> {
        let mut config = ManagerConfig::new(name);
        config.buffer_size = buffer_size;
        let manager = ShmManager::new(config);
        manager.start_consumer()?;
        Ok(Self { manager })
    }

    /// Receive one message's payload bytes
    pub fn receive(&self, timeout: Option<Duration>) -> Result<Option<Vec<u8>>> {
        Ok(self
            .manager
            .receive_message(timeout)?
            .map(|message| message.payload().to_vec()))
    }

    /// Receive one message's payload as UTF-8 text (lossy)
    pub fn receive_str(&self, timeout: Option<Duration>) -> Result<Option<String>> {
        Ok(self
            .receive(timeout)?
            .map(|payload| String::from_utf8_lossy(&payload).into_owned()))
    }

    /// Receive one full message
    pub fn receive_message(&self, timeout: Option<Duration>) -> Result<Option<ShmMessage>> {
        self.manager.receive_message(timeout)
    }

    /// Receive up to `max_count` messages under one shared deadline
    pub fn receive_batch(
        &self,
        max_count: usize,
        timeout: Option<Duration>,
    ) -> Result<Vec<ShmMessage>> {
        self.manager.receive_messages(max_count, timeout)
    }

    /// Look at the next message without consuming it
    pub fn peek_message(&self) -> Result<Option<ShmMessage>> {
        self.manager.peek_message()
    }

    /// Register a per-type handler run on the receive path
    pub fn register_handler(
        &self,
        message_type: MessageType,
        handler: impl Fn(&ShmMessage) -> bool + Send + Sync + 'static,
    ) {
        self.manager.register_handler(message_type, handler);
    }

    /// Remove a per-type handler
    pub fn unregister_handler(&self, message_type: MessageType) {
        self.manager.unregister_handler(message_type);
    }

    /// Wait for a heartbeat not seen before this call
    pub fn wait_for_heartbeat(&self, timeout: Duration) -> bool {
        self.manager.wait_for_heartbeat(timeout)
    }

    /// Timestamp of the last heartbeat in ms since the epoch (0 = none)
    #[must_use]
    pub fn last_heartbeat_ms(&self) -> u64 {
        self.manager.last_heartbeat_ms()
    }

    /// Bytes currently buffered
    #[must_use]
    pub fn used_space(&self) -> usize {
        self.manager.used_space()
    }

    /// Transfer counters
    #[must_use]
    pub fn statistics(&self) -> StatsSnapshot {
        self.manager.statistics()
    }

    /// Stop receiving and release the link. Idempotent.
    pub fn disconnect(&self) {
        self.manager.stop();
    }

    /// True until `disconnect`
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.manager.is_running()
    }
}
