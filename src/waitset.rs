//! Readiness signalling: wait objects and per-node waiter sets
//!
//! A waiter is any host-signalable object implementing [`Waiter`]. Nodes
//! keep registered waiters in a [`WaitSet`] and signal the ones whose
//! interest overlaps the posted events. Signals are edge-triggered on
//! publish; waiters latch the events and the caller drains via copy before
//! waiting again. Spurious wake-ups are permitted everywhere.
//!
//! Two implementations ship with the crate: [`CondvarWaiter`] works on any
//! platform and is what test harnesses use; [`EventFdWaiter`] (Linux) backs
//! the wait with an eventfd so it can be woven into external poll loops.

use std::fmt;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::error::Result;
use crate::subscriber::SubscriberId;

/// Readiness event bits
pub mod events {
    /// A publish produced data the subscriber has not seen
    pub const DATA_READY: u32 = 1 << 0;
    /// The watched subscription was torn down
    pub const SUBSCRIPTION_CLOSED: u32 = 1 << 1;
}

/// A host-signalable wait object
pub trait Waiter: Send + Sync + fmt::Debug {
    /// Post events to the waiter, waking anything blocked on it
    fn signal(&self, events: u32) -> Result<()>;
}

/// Identity of a registered waiter, derived from the wait object itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaiterKey(usize);

impl WaiterKey {
    /// Identity of a wait object (pointer identity of its allocation)
    pub fn of(waiter: &Arc<dyn Waiter>) -> Self {
        Self(Arc::as_ptr(waiter) as *const () as usize)
    }
}

#[derive(Debug)]
struct WaitEntry {
    key: WaiterKey,
    subscriber: SubscriberId,
    interest: u32,
    waiter: Arc<dyn Waiter>,
}

/// Ordered collection of waiters registered on one node
#[derive(Debug, Default)]
pub struct WaitSet {
    entries: Vec<WaitEntry>,
}

impl WaitSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for a subscriber with the given interest mask
    ///
    /// Registering the same wait object twice for the same subscriber is a
    /// caller error.
    pub fn register(
        &mut self,
        waiter: Arc<dyn Waiter>,
        subscriber: SubscriberId,
        interest: u32,
    ) -> Result<WaiterKey> {
        let key = WaiterKey::of(&waiter);

        if self
            .entries
            .iter()
            .any(|e| e.key == key && e.subscriber == subscriber)
        {
            return Err(crate::error::SkybusError::invalid_argument(
                "waiter",
                "already registered for this subscriber",
            ));
        }

        self.entries.push(WaitEntry {
            key,
            subscriber,
            interest,
            waiter,
        });

        Ok(key)
    }

    /// Remove a previously registered waiter
    ///
    /// Removing an unknown waiter is an error, not a no-op.
    pub fn unregister(&mut self, key: WaiterKey, subscriber: SubscriberId) -> Result<()> {
        let pos = self
            .entries
            .iter()
            .position(|e| e.key == key && e.subscriber == subscriber)
            .ok_or_else(|| {
                crate::error::SkybusError::invalid_argument("waiter", "not registered")
            })?;

        self.entries.remove(pos);
        Ok(())
    }

    /// Signal every waiter whose interest overlaps `posted` and whose
    /// subscriber passes the filter
    pub fn signal_matching(&self, posted: u32, mut filter: impl FnMut(SubscriberId) -> bool) {
        for entry in &self.entries {
            let overlap = entry.interest & posted;

            if overlap != 0 && filter(entry.subscriber) {
                if let Err(e) = entry.waiter.signal(overlap) {
                    log::warn!("waiter signal failed: {}", e);
                }
            }
        }
    }

    /// Drop all waiters bound to a subscriber, telling them it is gone
    pub fn close_subscriber(&mut self, subscriber: SubscriberId) {
        self.entries.retain(|entry| {
            if entry.subscriber != subscriber {
                return true;
            }

            if let Err(e) = entry.waiter.signal(events::SUBSCRIPTION_CLOSED) {
                log::warn!("waiter close signal failed: {}", e);
            }

            false
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Condition-variable wait object
///
/// Events accumulate in a latch under a mutex; `wait` blocks until the
/// latch is non-empty or the timeout expires, then drains it.
#[derive(Debug, Default)]
pub struct CondvarWaiter {
    latch: Mutex<u32>,
    cond: Condvar,
}

impl CondvarWaiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until signalled or the timeout expires; returns the drained
    /// event mask, 0 on timeout
    pub fn wait(&self, timeout: Option<Duration>) -> u32 {
        let mut latch = self.latch.lock().unwrap();

        match timeout {
            Some(timeout) => {
                let (guard, _) = self
                    .cond
                    .wait_timeout_while(latch, timeout, |pending| *pending == 0)
                    .unwrap();
                latch = guard;
            }
            None => {
                latch = self.cond.wait_while(latch, |pending| *pending == 0).unwrap();
            }
        }

        std::mem::take(&mut *latch)
    }

    /// Drain pending events without blocking
    pub fn take_events(&self) -> u32 {
        std::mem::take(&mut *self.latch.lock().unwrap())
    }
}

impl Waiter for CondvarWaiter {
    fn signal(&self, events: u32) -> Result<()> {
        *self.latch.lock().unwrap() |= events;
        self.cond.notify_all();
        Ok(())
    }
}

/// eventfd-backed wait object (Linux)
///
/// The event mask latches in an atomic beside a nonblocking eventfd; the fd
/// is exposed so hosts can fold the waiter into their own poll loops. A
/// failed eventfd write is retried once, then surfaces as an I/O error.
#[cfg(target_os = "linux")]
pub use self::linux::EventFdWaiter;

#[cfg(target_os = "linux")]
mod linux {
    use std::os::fd::{AsRawFd, OwnedFd, RawFd};
    use std::sync::atomic::{AtomicU32, Ordering};

    use nix::errno::Errno;
    use nix::poll::{poll, PollFd, PollFlags};
    use nix::sys::eventfd::{eventfd, EfdFlags};
    use nix::unistd::read;

    use crate::error::{Result, SkybusError};

    use super::Waiter;

    #[derive(Debug)]
    pub struct EventFdWaiter {
        fd: OwnedFd,
        pending: AtomicU32,
    }

    impl EventFdWaiter {
        pub fn new() -> Result<Self> {
            let fd = eventfd(0, EfdFlags::EFD_CLOEXEC | EfdFlags::EFD_NONBLOCK)
                .map_err(|e| SkybusError::io(format!("eventfd: {}", e)))?;

            Ok(Self {
                fd,
                pending: AtomicU32::new(0),
            })
        }

        /// Raw descriptor for external poll integration
        pub fn raw_fd(&self) -> RawFd {
            self.fd.as_raw_fd()
        }

        fn write_once(&self) -> nix::Result<()> {
            let buf = 1u64.to_ne_bytes();

            match nix::unistd::write(self.fd.as_raw_fd(), &buf) {
                Ok(_) => Ok(()),
                // counter saturated: the waiter is already signalled
                Err(Errno::EAGAIN) => Ok(()),
                Err(e) => Err(e),
            }
        }

        /// Block until signalled or the timeout expires; returns the
        /// drained event mask, 0 on timeout
        pub fn wait(&self, timeout_ms: Option<u64>) -> Result<u32> {
            let mut fds = [PollFd::new(&self.fd, PollFlags::POLLIN)];
            let timeout = timeout_ms.map(|ms| ms as i32).unwrap_or(-1);

            match poll(&mut fds, timeout) {
                Ok(0) => Ok(0),
                Ok(_) => {
                    let mut buf = [0u8; 8];
                    let _ = read(self.fd.as_raw_fd(), &mut buf);
                    Ok(self.pending.swap(0, Ordering::AcqRel))
                }
                Err(e) => Err(SkybusError::io(format!("poll: {}", e))),
            }
        }

        /// Drain pending events without blocking
        pub fn take_events(&self) -> u32 {
            let mut buf = [0u8; 8];
            let _ = read(self.fd.as_raw_fd(), &mut buf);
            self.pending.swap(0, Ordering::AcqRel)
        }
    }

    impl Waiter for EventFdWaiter {
        fn signal(&self, events: u32) -> Result<()> {
            self.pending.fetch_or(events, Ordering::AcqRel);

            self.write_once().or_else(|_| self.write_once()).map_err(|e| {
                SkybusError::io(format!("eventfd write failed after retry: {}", e))
            })
        }
    }
}
