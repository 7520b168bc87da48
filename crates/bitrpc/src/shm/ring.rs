// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 bitrpc-team

//! Cross-process SPSC ring buffer over shared memory.
//!
//! # Memory Layout
//!
//! ```text
//! +-------------------------------------------------------------+
//! | RingBufferHeader (64 bytes, cache-aligned)                  |
//! +-------------------------------------------------------------+
//! | data region (capacity bytes, physical index = pos % cap)    |
//! +-------------------------------------------------------------+
//! ```
//!
//! The mapping is `HEADER_BYTES + capacity` rounded up to a whole number
//! of OS pages; the logical capacity is exactly the configured byte size.
//!
//! # Synchronization Protocol
//!
//! Positions are virtual and never wrap: `used = write_pos - read_pos`,
//! `free = capacity - used`, physical index `pos % capacity`.
//!
//! Producer write:
//! 1. Load `read_pos` (Acquire), check `size <= free`
//! 2. Copy payload (split in two at the region end)
//! 3. Publish: `write_pos = write_pos + size` (Release)
//! 4. Signal `data_ready`
//!
//! Consumer read:
//! 1. Load `write_pos` (Acquire), check `used > 0`
//! 2. Copy payload out
//! 3. Publish: `read_pos = read_pos + n` (Release)
//! 4. Signal `space_available`
//!
//! The Release store pairs with the other side's Acquire load; no other
//! synchronization exists between producer and consumer. Exactly one
//! process writes and one reads; violating that breaks correctness.

use super::event::WakeEvent;
use super::segment::ShmSegment;
use super::{data_ready_name, round_to_page, segment_name, space_available_name, Result, ShmError};
use std::ptr;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::{Duration, Instant};

/// Magic number at the start of every ring buffer segment ("BRTF")
pub const RING_MAGIC: u32 = 0x4252_5446;

/// Ring buffer wire-format version
pub const RING_VERSION: u32 = 1;

/// Bytes reserved for the header at the start of the mapping
pub const HEADER_BYTES: usize = 64;

/// Ring buffer header, pinned at offset 0 of the shared mapping.
///
/// The cursors are the only fields mutated after creation; everything
/// else is written once by the producer before `initialized` is set.
#[repr(C, align(64))]
pub struct RingBufferHeader {
    /// Virtual write position (producer-owned, consumer reads)
    pub write_pos: AtomicU64,
    /// Virtual read position (consumer-owned, producer reads)
    pub read_pos: AtomicU64,
    /// Logical capacity in bytes
    pub capacity: u64,
    /// Segment magic, `RING_MAGIC`
    pub magic: u32,
    /// Wire-format version, `RING_VERSION`
    pub version: u32,
    /// Set to 1 (Release) after every other field is in place
    pub initialized: AtomicU8,
    _pad: [u8; 31],
}

/// Ring buffer configuration.
#[derive(Debug, Clone)]
pub struct RingConfig {
    /// Instance name; the cross-process coupling key
    pub name: String,
    /// Logical capacity in bytes
    pub buffer_size: usize,
    /// Create/attach the named wake events
    pub enable_events: bool,
}

impl RingConfig {
    /// Config with defaults for the given instance name
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            buffer_size: 1024 * 1024,
            enable_events: true,
        }
    }
}

/// SPSC byte queue in shared memory.
///
/// The producer side constructs with [`RingBuffer::create`], the consumer
/// with [`RingBuffer::open`]. The creator unlinks the backing objects on
/// drop.
pub struct RingBuffer {
    config: RingConfig,
    segment: ShmSegment,
    capacity: u64,
    data_ready: Option<WakeEvent>,
    space_available: Option<WakeEvent>,
    unlink_on_drop: bool,
}

impl RingBuffer {
    /// Create the ring buffer as the producer.
    ///
    /// Replaces any stale segment of the same name, zero-fills the
    /// region, writes the header, and stores `initialized = 1` last so a
    /// concurrently opening consumer never observes a half-built header.
    pub fn create(config: RingConfig) -> Result<Self> {
        let capacity = config.buffer_size as u64;
        let mapped = round_to_page(HEADER_BYTES + config.buffer_size);
        let segment = ShmSegment::create(&segment_name(&config.name), mapped)?;

        // SAFETY: the mapping starts with HEADER_BYTES zeroed bytes and is
        // page-aligned, satisfying RingBufferHeader's size and alignment.
        // No consumer can see the segment before initialized is set.
        let header = unsafe { &mut *segment.as_ptr().cast::<RingBufferHeader>() };
        header.capacity = capacity;
        header.magic = RING_MAGIC;
        header.version = RING_VERSION;
        header.write_pos.store(0, Ordering::Relaxed);
        header.read_pos.store(0, Ordering::Relaxed);
        header.initialized.store(1, Ordering::Release);

        let (data_ready, space_available) = Self::events(&config, true)?;
        log::debug!(
            "[SHM] ring '{}' created: capacity={capacity} mapped={mapped}",
            config.name
        );

        Ok(Self {
            capacity,
            segment,
            data_ready,
            space_available,
            unlink_on_drop: true,
            config,
        })
    }

    /// Open an existing ring buffer as the consumer.
    ///
    /// Rejects segments whose magic, version, capacity, or initialized
    /// flag disagree with the expected configuration.
    pub fn open(config: RingConfig) -> Result<Self> {
        let capacity = config.buffer_size as u64;
        let mapped = round_to_page(HEADER_BYTES + config.buffer_size);
        let segment = ShmSegment::open(&segment_name(&config.name), mapped)?;

        // SAFETY: the mapping is at least HEADER_BYTES long and
        // page-aligned; the header fields validated below are either
        // atomic or write-once-before-initialized.
        let header = unsafe { &*segment.as_ptr().cast::<RingBufferHeader>() };
        if header.initialized.load(Ordering::Acquire) != 1 {
            return Err(ShmError::HeaderValidation);
        }
        if header.magic != RING_MAGIC || header.version != RING_VERSION {
            return Err(ShmError::HeaderValidation);
        }
        if header.capacity != capacity {
            return Err(ShmError::CapacityMismatch {
                expected: capacity,
                actual: header.capacity,
            });
        }

        let (data_ready, space_available) = Self::events(&config, false)?;
        log::debug!("[SHM] ring '{}' opened: capacity={capacity}", config.name);

        Ok(Self {
            capacity,
            segment,
            data_ready,
            space_available,
            unlink_on_drop: false,
            config,
        })
    }

    fn events(config: &RingConfig, owner: bool) -> Result<(Option<WakeEvent>, Option<WakeEvent>)> {
        if !config.enable_events {
            return Ok((None, None));
        }
        let make = if owner { WakeEvent::create } else { WakeEvent::open };
        Ok((
            Some(make(&data_ready_name(&config.name))?),
            Some(make(&space_available_name(&config.name))?),
        ))
    }

    #[inline]
    fn header(&self) -> &RingBufferHeader {
        // SAFETY: the segment was validated (or freshly initialized) in
        // the constructor; the header lives at offset 0, is page-aligned,
        // and uses atomics for all cross-process mutation.
        unsafe { &*self.segment.as_ptr().cast::<RingBufferHeader>() }
    }

    #[inline]
    fn data_ptr(&self) -> *mut u8 {
        // SAFETY: the mapping is HEADER_BYTES + capacity (page-rounded)
        // bytes, so the data region starts in bounds.
        unsafe { self.segment.as_ptr().add(HEADER_BYTES) }
    }

    /// Append `data`, wrapping across the region end if needed.
    ///
    /// Returns false (cursors untouched) when `data` is empty or does not
    /// fit in the free space. Never blocks.
    pub fn write(&mut self, data: &[u8]) -> bool {
        if data.is_empty() {
            return false;
        }
        let header = self.header();
        let write_pos = header.write_pos.load(Ordering::Relaxed);
        let read_pos = header.read_pos.load(Ordering::Acquire);
        let free = self.capacity - (write_pos - read_pos);
        if data.len() as u64 > free {
            return false;
        }

        let cap = self.capacity as usize;
        let offset = (write_pos % self.capacity) as usize;
        let first = data.len().min(cap - offset);

        // SAFETY: offset + first <= cap and the second chunk starts at
        // offset 0 with first + second = data.len() <= free <= cap, so
        // both copies stay inside the data region. The consumer does not
        // read these bytes until write_pos is published below.
        unsafe {
            ptr::copy_nonoverlapping(data.as_ptr(), self.data_ptr().add(offset), first);
            if first < data.len() {
                ptr::copy_nonoverlapping(
                    data.as_ptr().add(first),
                    self.data_ptr(),
                    data.len() - first,
                );
            }
        }

        header
            .write_pos
            .store(write_pos + data.len() as u64, Ordering::Release);
        if let Some(event) = &self.data_ready {
            event.signal();
        }
        true
    }

    /// Append `data` only if it fits in contiguous free space.
    ///
    /// The write never wraps, so the entire record becomes visible to the
    /// consumer as one untorn span the moment `write_pos` is published.
    pub fn write_atomic(&mut self, data: &[u8]) -> bool {
        if data.is_empty() {
            return false;
        }
        let header = self.header();
        let write_pos = header.write_pos.load(Ordering::Relaxed);
        let read_pos = header.read_pos.load(Ordering::Acquire);
        let free = self.capacity - (write_pos - read_pos);
        if data.len() as u64 > free {
            return false;
        }

        let offset = (write_pos % self.capacity) as usize;
        if offset + data.len() > self.capacity as usize {
            // Would wrap: not contiguous
            return false;
        }

        // SAFETY: offset + data.len() <= capacity, checked above.
        unsafe {
            ptr::copy_nonoverlapping(data.as_ptr(), self.data_ptr().add(offset), data.len());
        }

        header
            .write_pos
            .store(write_pos + data.len() as u64, Ordering::Release);
        if let Some(event) = &self.data_ready {
            event.signal();
        }
        true
    }

    /// Copy up to `buf.len()` bytes out and advance the read cursor.
    ///
    /// Returns the number of bytes read (0 when the buffer is empty).
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let n = self.copy_out(buf);
        if n > 0 {
            let header = self.header();
            let read_pos = header.read_pos.load(Ordering::Relaxed);
            header
                .read_pos
                .store(read_pos + n as u64, Ordering::Release);
            if let Some(event) = &self.space_available {
                event.signal();
            }
        }
        n
    }

    /// Copy up to `buf.len()` bytes without advancing the read cursor
    pub fn peek(&self, buf: &mut [u8]) -> usize {
        self.copy_out(buf)
    }

    fn copy_out(&self, buf: &mut [u8]) -> usize {
        if buf.is_empty() {
            return 0;
        }
        let header = self.header();
        let write_pos = header.write_pos.load(Ordering::Acquire);
        let read_pos = header.read_pos.load(Ordering::Relaxed);
        let available = write_pos - read_pos;
        if available == 0 {
            return 0;
        }

        let to_read = buf.len().min(available as usize);
        let cap = self.capacity as usize;
        let offset = (read_pos % self.capacity) as usize;
        let first = to_read.min(cap - offset);

        // SAFETY: offset + first <= cap; the wrapped tail starts at offset
        // 0 with first + tail = to_read <= available <= cap. The Acquire
        // load of write_pos above makes the producer's bytes visible.
        unsafe {
            ptr::copy_nonoverlapping(self.data_ptr().add(offset), buf.as_mut_ptr(), first);
            if first < to_read {
                ptr::copy_nonoverlapping(
                    self.data_ptr(),
                    buf.as_mut_ptr().add(first),
                    to_read - first,
                );
            }
        }
        to_read
    }

    /// Advance the read cursor by `bytes` without copying.
    ///
    /// Returns false when fewer than `bytes` are buffered.
    pub fn skip(&mut self, bytes: usize) -> bool {
        let header = self.header();
        let write_pos = header.write_pos.load(Ordering::Acquire);
        let read_pos = header.read_pos.load(Ordering::Relaxed);
        if bytes as u64 > write_pos - read_pos {
            return false;
        }
        header
            .read_pos
            .store(read_pos + bytes as u64, Ordering::Release);
        if let Some(event) = &self.space_available {
            event.signal();
        }
        true
    }

    /// Bytes currently buffered
    #[must_use]
    pub fn used_space(&self) -> usize {
        let header = self.header();
        let write_pos = header.write_pos.load(Ordering::Acquire);
        let read_pos = header.read_pos.load(Ordering::Acquire);
        (write_pos - read_pos) as usize
    }

    /// Bytes available for writing
    #[must_use]
    pub fn free_space(&self) -> usize {
        self.capacity as usize - self.used_space()
    }

    /// Logical capacity in bytes
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    /// True when nothing is buffered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.used_space() == 0
    }

    /// True when no free space remains
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.free_space() == 0
    }

    /// Instance name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Block until data is buffered or the timeout expires.
    ///
    /// `None` waits forever. The wake is a hint: the cursor is re-checked
    /// after every wake, so spurious wakeups and racing signals are safe.
    /// Without events this degrades to a single cursor check.
    pub fn wait_for_data(&self, timeout: Option<Duration>) -> bool {
        self.wait(timeout, |ring| !ring.is_empty(), self.data_ready.as_ref())
    }

    /// Block until free space exists or the timeout expires
    pub fn wait_for_space(&self, timeout: Option<Duration>) -> bool {
        self.wait(
            timeout,
            |ring| !ring.is_full(),
            self.space_available.as_ref(),
        )
    }

    fn wait(
        &self,
        timeout: Option<Duration>,
        ready: impl Fn(&Self) -> bool,
        event: Option<&WakeEvent>,
    ) -> bool {
        let Some(event) = event else {
            return ready(self);
        };
        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            if ready(self) {
                return true;
            }
            let remaining = match deadline {
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        return ready(self);
                    }
                    Some(d - now)
                }
                None => None,
            };
            if event.wait(remaining) {
                event.drain();
            } else if remaining.is_none() {
                // sem failure with no deadline; avoid a hot spin
                return ready(self);
            }
        }
    }

    /// Signal `data_ready` without writing (used to nudge a peer)
    pub fn notify_data_ready(&self) -> bool {
        self.data_ready.as_ref().is_some_and(WakeEvent::signal)
    }

    /// Control whether the creator unlinks the backing segment on drop.
    ///
    /// Only meaningful on the creating side; openers never unlink.
    pub fn set_unlink_on_drop(&mut self, unlink: bool) {
        if !unlink {
            self.unlink_on_drop = false;
        }
    }
}

impl Drop for RingBuffer {
    fn drop(&mut self) {
        if self.unlink_on_drop {
            if let Err(e) = ShmSegment::unlink(&segment_name(&self.config.name)) {
                log::warn!("[SHM] unlink of ring '{}' failed: {e}", self.config.name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn unique_name() -> String {
        use std::time::{SystemTime, UNIX_EPOCH};
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        format!("ring_{ts}")
    }

    fn small_ring(capacity: usize) -> RingBuffer {
        let mut config = RingConfig::new(&unique_name());
        config.buffer_size = capacity;
        config.enable_events = false;
        RingBuffer::create(config).expect("create ring")
    }

    #[test]
    fn test_header_layout() {
        assert_eq!(std::mem::size_of::<RingBufferHeader>(), HEADER_BYTES);
        assert_eq!(std::mem::align_of::<RingBufferHeader>(), 64);
    }

    #[test]
    fn test_fifo_with_partial_reads() {
        // Capacity 64: write 40 As then 20 Bs, read 30, write 30 Cs,
        // then drain 60 and check byte-exact FIFO order.
        let mut ring = small_ring(64);

        assert!(ring.write(&[b'A'; 40]));
        assert!(ring.write(&[b'B'; 20]));
        assert_eq!(ring.used_space(), 60);

        let mut buf = [0u8; 30];
        assert_eq!(ring.read(&mut buf), 30);
        assert_eq!(buf, [b'A'; 30]);

        assert!(ring.write(&[b'C'; 30]));
        assert_eq!(ring.used_space(), 60);
        assert_eq!(ring.free_space(), 4);

        let mut buf = [0u8; 60];
        assert_eq!(ring.read(&mut buf), 60);
        assert_eq!(&buf[..10], &[b'A'; 10]);
        assert_eq!(&buf[10..30], &[b'B'; 20]);
        assert_eq!(&buf[30..60], &[b'C'; 30]);
        assert!(ring.is_empty());
    }

    #[test]
    fn test_wraparound() {
        // Capacity 16: writes and reads that straddle the region end.
        let mut ring = small_ring(16);

        let first: Vec<u8> = (0..12).collect();
        assert!(ring.write(&first));

        let mut buf = [0u8; 8];
        assert_eq!(ring.read(&mut buf), 8);
        assert_eq!(&buf, &[0, 1, 2, 3, 4, 5, 6, 7]);

        let second: Vec<u8> = (100..108).collect();
        assert!(ring.write(&second));

        let mut buf = [0u8; 12];
        assert_eq!(ring.read(&mut buf), 12);
        assert_eq!(
            &buf,
            &[8, 9, 10, 11, 100, 101, 102, 103, 104, 105, 106, 107]
        );
    }

    #[test]
    fn test_backpressure_leaves_cursors_unchanged() {
        let mut ring = small_ring(32);
        assert!(ring.write(&[1u8; 30]));

        let used_before = ring.used_space();
        assert!(!ring.write(&[2u8; 3]));
        assert_eq!(ring.used_space(), used_before);
        assert_eq!(ring.free_space(), 2);

        // Free three bytes; the same write now succeeds.
        let mut buf = [0u8; 3];
        assert_eq!(ring.read(&mut buf), 3);
        assert!(ring.write(&[2u8; 3]));
    }

    #[test]
    fn test_empty_write_rejected() {
        let mut ring = small_ring(16);
        assert!(!ring.write(&[]));
        assert!(!ring.write_atomic(&[]));
    }

    #[test]
    fn test_write_atomic_refuses_wrap() {
        let mut ring = small_ring(16);
        assert!(ring.write(&[0u8; 12]));
        let mut buf = [0u8; 12];
        assert_eq!(ring.read(&mut buf), 12);

        // Cursor at 12: 8 bytes would wrap, so write_atomic refuses even
        // though free space is plentiful.
        assert!(!ring.write_atomic(&[1u8; 8]));
        assert_eq!(ring.used_space(), 0);

        // Plain write accepts the wrap.
        assert!(ring.write(&[1u8; 8]));

        // write_atomic works when the span is contiguous.
        let mut ring = small_ring(16);
        assert!(ring.write_atomic(&[7u8; 8]));
        let mut buf = [0u8; 8];
        assert_eq!(ring.read(&mut buf), 8);
        assert_eq!(buf, [7u8; 8]);
    }

    #[test]
    fn test_peek_does_not_advance() {
        let mut ring = small_ring(32);
        assert!(ring.write(&[5, 6, 7]));

        let mut buf = [0u8; 3];
        assert_eq!(ring.peek(&mut buf), 3);
        assert_eq!(buf, [5, 6, 7]);
        assert_eq!(ring.used_space(), 3);

        let mut buf = [0u8; 3];
        assert_eq!(ring.read(&mut buf), 3);
        assert!(ring.is_empty());
    }

    #[test]
    fn test_skip() {
        let mut ring = small_ring(32);
        assert!(ring.write(&[1, 2, 3, 4]));

        assert!(!ring.skip(5));
        assert!(ring.skip(2));

        let mut buf = [0u8; 4];
        assert_eq!(ring.read(&mut buf), 2);
        assert_eq!(&buf[..2], &[3, 4]);
    }

    #[test]
    fn test_full_and_empty_states() {
        let mut ring = small_ring(8);
        assert!(ring.is_empty());
        assert!(!ring.is_full());

        assert!(ring.write(&[0u8; 8]));
        assert!(ring.is_full());
        assert_eq!(ring.free_space(), 0);
        assert!(!ring.write(&[0u8; 1]));
    }

    #[test]
    fn test_consumer_validates_header() {
        let name = unique_name();
        let mut config = RingConfig::new(&name);
        config.buffer_size = 4096;
        config.enable_events = false;
        let _producer = RingBuffer::create(config.clone()).expect("create");

        // Capacity mismatch is rejected.
        let mut wrong = RingConfig::new(&name);
        wrong.buffer_size = 8192;
        wrong.enable_events = false;
        assert!(matches!(
            RingBuffer::open(wrong),
            Err(ShmError::CapacityMismatch { .. })
        ));

        // Matching config opens fine.
        let consumer = RingBuffer::open(config).expect("open");
        assert_eq!(consumer.capacity(), 4096);
    }

    #[test]
    fn test_consumer_rejects_uninitialized_segment() {
        let name = unique_name();
        // A raw segment without a valid header.
        let seg_name = segment_name(&name);
        let _seg = ShmSegment::create(&seg_name, 4096).expect("raw segment");

        let mut config = RingConfig::new(&name);
        config.buffer_size = 4096 - HEADER_BYTES;
        config.enable_events = false;
        assert!(matches!(
            RingBuffer::open(config),
            Err(ShmError::HeaderValidation)
        ));

        ShmSegment::unlink(&seg_name).ok();
    }

    #[test]
    fn test_open_missing_segment() {
        let mut config = RingConfig::new(&unique_name());
        config.enable_events = false;
        assert!(matches!(RingBuffer::open(config), Err(ShmError::NotFound(_))));
    }

    #[test]
    fn test_cross_thread_fifo() {
        let name = unique_name();
        let mut config = RingConfig::new(&name);
        config.buffer_size = 256;
        let mut producer = RingBuffer::create(config.clone()).expect("create");

        let reader = thread::spawn(move || {
            let mut consumer = RingBuffer::open(config).expect("open");
            let mut received = Vec::with_capacity(1000);
            let mut buf = [0u8; 64];
            while received.len() < 1000 {
                let n = consumer.read(&mut buf);
                if n == 0 {
                    consumer.wait_for_data(Some(Duration::from_millis(100)));
                    continue;
                }
                received.extend_from_slice(&buf[..n]);
            }
            received
        });

        let mut sent = Vec::with_capacity(1000);
        let mut value: u8 = 0;
        while sent.len() < 1000 {
            let chunk: Vec<u8> = (0..25u8).map(|i| value.wrapping_add(i)).collect();
            if producer.write(&chunk) {
                sent.extend_from_slice(&chunk);
                value = value.wrapping_add(25);
            } else {
                producer.wait_for_space(Some(Duration::from_millis(100)));
            }
        }

        let received = reader.join().expect("reader thread");
        assert_eq!(received, sent);
    }

    #[test]
    fn test_wait_for_data_wakes_on_write() {
        let name = unique_name();
        let config = RingConfig::new(&name);
        let producer = RingBuffer::create(config.clone()).expect("create");
        let consumer = RingBuffer::open(config).expect("open");

        let writer = thread::spawn(move || {
            let mut producer = producer;
            thread::sleep(Duration::from_millis(30));
            assert!(producer.write(b"wake"));
            producer
        });

        let woke = consumer.wait_for_data(Some(Duration::from_secs(2)));
        assert!(woke, "consumer should wake within the timeout");
        assert!(!consumer.is_empty());

        writer.join().expect("writer thread");
    }

    #[test]
    fn test_wait_for_data_times_out() {
        let config = RingConfig::new(&unique_name());
        let ring = RingBuffer::create(config).expect("create");

        let start = Instant::now();
        assert!(!ring.wait_for_data(Some(Duration::from_millis(50))));
        assert!(start.elapsed() >= Duration::from_millis(40));
    }
}
