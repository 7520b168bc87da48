// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 bitrpc-team

//! Shared-memory IPC: SPSC ring buffer plus a framed message layer.
//!
//! This module provides same-host, low-latency IPC using POSIX shared
//! memory with atomic cursors and named-semaphore wakeups.
//!
//! # Architecture
//!
//! ```text
//! +------------------+              +------------------+
//! |   Process A      |   Shared     |   Process B      |
//! |    Producer      |   Memory     |    Consumer      |
//! |        |         |   (mmap)     |        |         |
//! |        v         |              |        v         |
//! |   RingBuffer ----+--------------+--> RingBuffer    |
//! +------------------+  semaphores  +------------------+
//!                        (wake)
//! ```
//!
//! # Key Features
//!
//! - **Lock-free cursors**: a release store publishes written bytes, an
//!   acquire load observes them; no locks between producer and consumer
//! - **Virtual positions**: cursors never wrap; the physical offset is
//!   `pos % capacity`
//! - **Wake hints**: named counting semaphores, drained on wake; waiters
//!   always re-check the cursors, so spurious or missed wakes are safe
//! - **Strict SPSC**: one writer process and one reader process per
//!   buffer; a bidirectional link composes two buffers by name

mod api;
mod event;
mod manager;
mod message;
mod ring;
mod segment;

pub use api::{ShmConsumer, ShmProducer};
pub use event::WakeEvent;
pub use manager::{ManagerConfig, ManagerRole, ShmManager, StatsSnapshot};
pub use message::{flags, MessageHeader, MessageType, ShmMessage, MESSAGE_HEADER_SIZE};
pub use ring::{RingBuffer, RingConfig, HEADER_BYTES, RING_MAGIC, RING_VERSION};
pub use segment::ShmSegment;

use std::fmt;
use std::io;

/// Errors that can occur in shared-memory operations
#[derive(Debug)]
pub enum ShmError {
    /// Shared memory segment creation failed
    SegmentCreate(io::Error),

    /// Shared memory segment open failed
    SegmentOpen(io::Error),

    /// Memory mapping failed
    Mmap(io::Error),

    /// Named wake-event creation failed
    EventCreate(io::Error),

    /// Invalid instance or segment name
    InvalidName(String),

    /// Segment not found
    NotFound(String),

    /// Header magic, version, or initialized flag rejected
    HeaderValidation,

    /// Header capacity disagrees with the configured capacity
    CapacityMismatch { expected: u64, actual: u64 },

    /// Message exceeds the configured maximum
    MessageTooLarge { size: usize, max: usize },

    /// Operation requires a started manager
    NotRunning,

    /// Manager already started in some role
    AlreadyRunning,
}

impl fmt::Display for ShmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SegmentCreate(e) => write!(f, "shared memory segment creation failed: {e}"),
            Self::SegmentOpen(e) => write!(f, "shared memory segment open failed: {e}"),
            Self::Mmap(e) => write!(f, "memory mapping failed: {e}"),
            Self::EventCreate(e) => write!(f, "wake event creation failed: {e}"),
            Self::InvalidName(name) => write!(f, "invalid shared memory name: {name}"),
            Self::NotFound(name) => write!(f, "shared memory segment not found: {name}"),
            Self::HeaderValidation => write!(f, "ring buffer header validation failed"),
            Self::CapacityMismatch { expected, actual } => {
                write!(
                    f,
                    "ring buffer capacity mismatch: expected {expected}, found {actual}"
                )
            }
            Self::MessageTooLarge { size, max } => {
                write!(f, "message of {size} bytes exceeds {max} byte maximum")
            }
            Self::NotRunning => write!(f, "shared memory manager is not running"),
            Self::AlreadyRunning => write!(f, "shared memory manager already running"),
        }
    }
}

impl std::error::Error for ShmError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::SegmentCreate(e)
            | Self::SegmentOpen(e)
            | Self::Mmap(e)
            | Self::EventCreate(e) => Some(e),
            _ => None,
        }
    }
}

/// Result type for shared-memory operations
pub type Result<T> = std::result::Result<T, ShmError>;

/// Derive the backing-segment name for a user-supplied instance name.
///
/// Both sides of a link resolve the same POSIX object from the same
/// identifier; non-alphanumeric characters are mapped to `_`.
#[must_use]
pub fn segment_name(instance: &str) -> String {
    format!("/BitRPC_{}", sanitize(instance))
}

/// Derive the name of the producer-side "data ready" wake event
#[must_use]
pub fn data_ready_name(instance: &str) -> String {
    format!("/BitRPC_{}_data_ready", sanitize(instance))
}

/// Derive the name of the consumer-side "space available" wake event
#[must_use]
pub fn space_available_name(instance: &str) -> String {
    format!("/BitRPC_{}_space_available", sanitize(instance))
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// OS page size in bytes
#[must_use]
pub fn page_size() -> usize {
    // SAFETY: sysconf with _SC_PAGESIZE has no preconditions and returns
    // the page size or -1; a failure falls back to the common 4 KiB.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as usize
    } else {
        4096
    }
}

/// Round `size` up to a whole number of OS pages
#[must_use]
pub fn round_to_page(size: usize) -> usize {
    let page = page_size();
    size.div_ceil(page) * page
}
