//! Multi-wait signal set.
//!
//! Up to 64 boolean signals packed into one bit mask, guarded by a mutex and a
//! condvar. Callers can block until any signal is set (reporting the lowest
//! index) or until all of them are set, with an optional timeout.
//!
//! - `timeout = None` waits forever
//! - `timeout = Some(Duration::ZERO)` is a non-blocking poll
//!
//! Setting a signal wakes every waiter; clearing one wakes nobody, since no
//! wait condition is satisfied by a signal going low.

use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

use crate::error::{Error, Result};

/// Maximum number of signals in one set.
pub const MAX_SIGNALS: usize = 64;

/// Result of a wait on a [`SignalSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// A single signal satisfied a wait-any; carries its index.
    Signaled(usize),
    /// Every signal was set.
    AllSignaled,
    /// The timeout elapsed before the wait condition held.
    TimedOut,
}

impl WaitOutcome {
    pub fn is_timed_out(&self) -> bool {
        matches!(self, WaitOutcome::TimedOut)
    }
}

pub struct SignalSet {
    len: usize,
    full: u64,
    bits: Mutex<u64>,
    changed: Condvar,
}

impl SignalSet {
    /// Create `len` signals, all set or all clear.
    ///
    /// Fails with [`Error::Configuration`] unless `len` is within `1..=64`.
    pub fn new(len: usize, initially_set: bool) -> Result<Self> {
        if !(1..=MAX_SIGNALS).contains(&len) {
            return Err(Error::Configuration { capacity: len });
        }

        let full = if len == MAX_SIGNALS {
            u64::MAX
        } else {
            (1u64 << len) - 1
        };

        Ok(Self {
            len,
            full,
            bits: Mutex::new(if initially_set { full } else { 0 }),
            changed: Condvar::new(),
        })
    }

    pub fn num_signals(&self) -> usize {
        self.len
    }

    /// Set signal `index`, waking all waiters. Returns whether it was already set.
    pub fn set(&self, index: usize) -> Result<bool> {
        let mask = self.mask(index);
        let mut bits = self.lock()?;
        let was_set = *bits & mask != 0;
        *bits |= mask;
        drop(bits);
        self.changed.notify_all();
        Ok(was_set)
    }

    /// Clear signal `index`. Returns whether it was set.
    pub fn reset(&self, index: usize) -> Result<bool> {
        let mask = self.mask(index);
        let mut bits = self.lock()?;
        let was_set = *bits & mask != 0;
        *bits &= !mask;
        Ok(was_set)
    }

    pub fn is_set(&self, index: usize) -> Result<bool> {
        let mask = self.mask(index);
        Ok(*self.lock()? & mask != 0)
    }

    /// Number of signals currently set.
    pub fn count_set(&self) -> Result<usize> {
        Ok(self.lock()?.count_ones() as usize)
    }

    /// Block until any signal is set. Reports the lowest set index.
    pub fn wait_any(&self, timeout: Option<Duration>) -> Result<WaitOutcome> {
        match self.wait_until(timeout, |bits| bits != 0)? {
            Some(bits) => Ok(WaitOutcome::Signaled(bits.trailing_zeros() as usize)),
            None => Ok(WaitOutcome::TimedOut),
        }
    }

    /// Block until every signal is set.
    pub fn wait_all(&self, timeout: Option<Duration>) -> Result<WaitOutcome> {
        let full = self.full;
        match self.wait_until(timeout, |bits| bits == full)? {
            Some(_) => Ok(WaitOutcome::AllSignaled),
            None => Ok(WaitOutcome::TimedOut),
        }
    }

    /// Block until any signal is set, then clear the lowest set one before
    /// releasing the lock. Two concurrent callers never observe the same index.
    pub fn wait_any_and_reset(&self, timeout: Option<Duration>) -> Result<WaitOutcome> {
        let Some(mut bits) = self.wait_until(timeout, |bits| bits != 0)? else {
            return Ok(WaitOutcome::TimedOut);
        };
        let index = bits.trailing_zeros() as usize;
        *bits &= !(1u64 << index);
        Ok(WaitOutcome::Signaled(index))
    }

    fn wait_until(
        &self,
        timeout: Option<Duration>,
        ready: impl Fn(u64) -> bool,
    ) -> Result<Option<MutexGuard<'_, u64>>> {
        let bits = self.lock()?;

        match timeout {
            None => {
                let bits = self
                    .changed
                    .wait_while(bits, |bits| !ready(*bits))
                    .map_err(|_| Error::wait("signal lock poisoned while waiting"))?;
                Ok(Some(bits))
            }
            Some(timeout) => {
                let (bits, _) = self
                    .changed
                    .wait_timeout_while(bits, timeout, |bits| !ready(*bits))
                    .map_err(|_| Error::wait("signal lock poisoned while waiting"))?;
                Ok(ready(*bits).then_some(bits))
            }
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, u64>> {
        self.bits
            .lock()
            .map_err(|_| Error::wait("signal lock poisoned"))
    }

    fn mask(&self, index: usize) -> u64 {
        assert!(
            index < self.len,
            "signal index {index} out of range for set of {}",
            self.len
        );
        1u64 << index
    }
}

impl std::fmt::Debug for SignalSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("SignalSet");
        s.field("len", &self.len);
        match self.bits.try_lock() {
            Ok(bits) => s.field("bits", &format!("{:#b}", *bits)),
            Err(_) => s.field("bits", &"<locked>"),
        };
        s.finish()
    }
}
