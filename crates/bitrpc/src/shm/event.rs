// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 bitrpc-team

//! Cross-process wake events over POSIX named semaphores.
//!
//! The wake contract is a *hint*: the producer signals after a write, the
//! consumer waits with a timeout, and a waiter must always re-check the
//! ring cursors after waking. Spurious wakeups and missed signals are
//! both tolerated. The semaphore count is drained on wake so stale
//! signals cannot accumulate across waits.

use super::{Result, ShmError};
use std::ffi::CString;
use std::io;
use std::time::Duration;

/// Named cross-process wake event.
///
/// Modeled as a counting semaphore: `signal` posts, `wait` consumes one
/// count (blocking up to the timeout), `drain` clears any backlog.
pub struct WakeEvent {
    sem: *mut libc::sem_t,
    name: String,
    /// The creator unlinks the name on drop
    owner: bool,
}

// SAFETY: sem_t handles from sem_open are process-wide and the semaphore
// operations themselves are thread-safe.
unsafe impl Send for WakeEvent {}
unsafe impl Sync for WakeEvent {}

impl WakeEvent {
    /// Create or attach to the named event as its owner
    pub fn create(name: &str) -> Result<Self> {
        Self::new(name, true)
    }

    /// Attach to the named event without owning cleanup
    pub fn open(name: &str) -> Result<Self> {
        Self::new(name, false)
    }

    fn new(name: &str, owner: bool) -> Result<Self> {
        let c_name = CString::new(name).map_err(|_| ShmError::InvalidName(name.to_string()))?;

        // SAFETY: c_name is a valid NUL-terminated string; O_CREAT with an
        // initial count of 0 creates the semaphore if missing and attaches
        // otherwise, which lets either side come up first.
        let sem = unsafe { libc::sem_open(c_name.as_ptr(), libc::O_CREAT, 0o600, 0) };
        if sem == libc::SEM_FAILED {
            return Err(ShmError::EventCreate(io::Error::last_os_error()));
        }

        Ok(Self {
            sem,
            name: name.to_string(),
            owner,
        })
    }

    /// Post one wake. Returns false if the post failed.
    pub fn signal(&self) -> bool {
        // SAFETY: self.sem is a valid handle until drop.
        unsafe { libc::sem_post(self.sem) == 0 }
    }

    /// Wait for a wake.
    ///
    /// `None` waits forever (the -1 sentinel of the wire-level API).
    /// Returns true when a signal was consumed, false on timeout.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        match timeout {
            None => loop {
                // SAFETY: self.sem is a valid handle until drop.
                if unsafe { libc::sem_wait(self.sem) } == 0 {
                    return true;
                }
                if io::Error::last_os_error().kind() != io::ErrorKind::Interrupted {
                    return false;
                }
            },
            Some(timeout) => {
                let mut ts = libc::timespec {
                    tv_sec: 0,
                    tv_nsec: 0,
                };
                // SAFETY: ts is a valid out-pointer for clock_gettime.
                if unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut ts) } != 0 {
                    return false;
                }
                ts.tv_sec += timeout.as_secs() as libc::time_t;
                ts.tv_nsec += libc::c_long::from(timeout.subsec_nanos());
                if ts.tv_nsec >= 1_000_000_000 {
                    ts.tv_sec += 1;
                    ts.tv_nsec -= 1_000_000_000;
                }

                loop {
                    // SAFETY: self.sem is valid and ts is a fully
                    // initialized absolute CLOCK_REALTIME deadline.
                    if unsafe { libc::sem_timedwait(self.sem, &ts) } == 0 {
                        return true;
                    }
                    if io::Error::last_os_error().kind() != io::ErrorKind::Interrupted {
                        return false;
                    }
                }
            }
        }
    }

    /// Clear any pending signals without blocking.
    ///
    /// Called after a wake so counts posted while we were awake anyway do
    /// not satisfy a future wait spuriously.
    pub fn drain(&self) {
        // SAFETY: self.sem is a valid handle; sem_trywait never blocks.
        while unsafe { libc::sem_trywait(self.sem) } == 0 {}
    }

    /// The event's derived name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for WakeEvent {
    fn drop(&mut self) {
        // SAFETY: self.sem came from a successful sem_open and Drop runs
        // at most once.
        unsafe {
            libc::sem_close(self.sem);
        }
        if self.owner {
            if let Ok(c_name) = CString::new(self.name.as_str()) {
                // SAFETY: unlink only touches the name; other processes
                // keep their handles until they close them.
                unsafe {
                    libc::sem_unlink(c_name.as_ptr());
                }
            }
        }
    }
}
