//! Bounded slot set built on a [`SignalSet`] of per-slot Free signals.
//!
//! A set bit means the slot is Free, a clear bit means it is InUse, so a slot
//! is always in exactly one of the two states. Claiming a slot (find the
//! lowest Free bit and clear it) happens under the signal set's lock; release
//! sets the bit again and wakes both kinds of waiters.

use std::sync::Arc;
use std::time::Duration;

use super::SlotToken;
use crate::error::{Error, Result};
use crate::signal::{SignalSet, WaitOutcome};

pub(crate) struct SlotSetInner {
    free: SignalSet,
}

impl SlotSetInner {
    /// Flip `slot` back to Free. Called exactly once per token, from its drop.
    pub(crate) fn release_slot(&self, slot: usize) {
        match self.free.set(slot) {
            Ok(false) => tracing::trace!(slot, "Slot released"),
            Ok(true) => {
                debug_assert!(false, "slot {slot} released while already free");
                tracing::error!(slot, "Bug: released a slot that was already free");
            }
            Err(e) => {
                tracing::error!(slot, error = %e, "Failed to release slot - capacity reduced");
            }
        }
    }
}

/// Gate admitting at most `capacity` concurrent holders.
pub struct BoundedSlotSet {
    inner: Arc<SlotSetInner>,
    capacity: usize,
}

impl BoundedSlotSet {
    /// Create a set with every slot Free.
    ///
    /// Fails with [`Error::Configuration`] unless `capacity` is within `1..=64`.
    pub fn new(capacity: usize) -> Result<Self> {
        let free = SignalSet::new(capacity, true)?;
        Ok(Self {
            inner: Arc::new(SlotSetInner { free }),
            capacity,
        })
    }

    /// Block until a slot is Free and claim it. Lowest free index wins.
    ///
    /// There is no timeout: a set whose slots are never released blocks the
    /// caller forever.
    pub fn acquire(&self) -> Result<SlotToken> {
        self.claim(None)?
            .ok_or_else(|| Error::wait("unbounded wait returned without a free slot"))
    }

    /// Claim a slot only if one is Free right now.
    pub fn try_acquire(&self) -> Result<Option<SlotToken>> {
        self.claim(Some(Duration::ZERO))
    }

    /// Claim a slot, waiting at most `timeout` for one to become Free.
    pub fn acquire_timeout(&self, timeout: Duration) -> Result<Option<SlotToken>> {
        self.claim(Some(timeout))
    }

    /// Return a token's slot to the set.
    ///
    /// Equivalent to dropping the token. A token from another set is released
    /// against the set it came from.
    pub fn release(&self, token: SlotToken) {
        if !token.belongs_to(&self.inner) {
            debug_assert!(false, "token released against a foreign slot set");
            tracing::error!(
                slot = token.slot(),
                "Bug: token released against a foreign slot set"
            );
        }
        drop(token);
    }

    /// True iff every slot is Free within `timeout`. `Duration::ZERO` polls.
    pub fn is_empty(&self, timeout: Duration) -> Result<bool> {
        let outcome = self.inner.free.wait_all(Some(timeout))?;
        Ok(outcome == WaitOutcome::AllSignaled)
    }

    /// Block until every slot is Free.
    pub fn wait_for_empty(&self) -> Result<()> {
        self.inner.free.wait_all(None)?;
        Ok(())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of slots currently held.
    pub fn in_use(&self) -> Result<usize> {
        Ok(self.capacity - self.available()?)
    }

    /// Number of slots currently Free.
    pub fn available(&self) -> Result<usize> {
        self.inner.free.count_set()
    }

    fn claim(&self, timeout: Option<Duration>) -> Result<Option<SlotToken>> {
        match self.inner.free.wait_any_and_reset(timeout)? {
            WaitOutcome::Signaled(slot) => {
                tracing::trace!(slot, "Slot acquired");
                Ok(Some(SlotToken::new(slot, Arc::clone(&self.inner))))
            }
            WaitOutcome::AllSignaled | WaitOutcome::TimedOut => Ok(None),
        }
    }
}

impl std::fmt::Debug for BoundedSlotSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedSlotSet")
            .field("capacity", &self.capacity)
            .field("free", &self.inner.free)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Instant;

    #[test]
    fn capacity_bounds_are_validated() {
        assert!(matches!(
            BoundedSlotSet::new(0),
            Err(Error::Configuration { capacity: 0 })
        ));
        assert!(matches!(
            BoundedSlotSet::new(65),
            Err(Error::Configuration { capacity: 65 })
        ));
        assert_eq!(BoundedSlotSet::new(64).unwrap().capacity(), 64);
    }

    #[test]
    fn acquire_on_released_set_never_blocks() {
        for capacity in 1..=64 {
            let set = BoundedSlotSet::new(capacity).unwrap();
            let start = Instant::now();
            let tokens: Vec<_> = (0..capacity).map(|_| set.acquire().unwrap()).collect();
            assert!(start.elapsed() < Duration::from_secs(1));
            assert_eq!(set.in_use().unwrap(), capacity);
            drop(tokens);
            assert_eq!(set.available().unwrap(), capacity);
        }
    }

    #[test]
    fn lowest_free_index_wins() {
        let set = BoundedSlotSet::new(4).unwrap();
        let t0 = set.acquire().unwrap();
        let t1 = set.acquire().unwrap();
        let t2 = set.acquire().unwrap();
        assert_eq!((t0.slot(), t1.slot(), t2.slot()), (0, 1, 2));

        drop(t1);
        let again = set.acquire().unwrap();
        assert_eq!(again.slot(), 1);
    }

    #[test]
    fn try_acquire_returns_none_when_full() {
        let set = BoundedSlotSet::new(2).unwrap();
        let _a = set.try_acquire().unwrap().unwrap();
        let _b = set.try_acquire().unwrap().unwrap();
        assert!(set.try_acquire().unwrap().is_none());
    }

    #[test]
    fn acquire_timeout_gives_up() {
        let set = BoundedSlotSet::new(1).unwrap();
        let _held = set.acquire().unwrap();

        let start = Instant::now();
        assert!(
            set.acquire_timeout(Duration::from_millis(30))
                .unwrap()
                .is_none()
        );
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn explicit_release_frees_slot() {
        let set = BoundedSlotSet::new(1).unwrap();
        let token = set.acquire().unwrap();
        assert!(!set.is_empty(Duration::ZERO).unwrap());

        set.release(token);
        assert!(set.is_empty(Duration::ZERO).unwrap());
    }

    #[test]
    fn is_empty_after_interleaved_acquire_release() {
        let set = BoundedSlotSet::new(3).unwrap();
        let a = set.acquire().unwrap();
        let b = set.acquire().unwrap();
        drop(a);
        let c = set.acquire().unwrap();
        let d = set.acquire().unwrap();
        drop(b);
        drop(d);
        assert!(!set.is_empty(Duration::ZERO).unwrap());
        drop(c);
        assert!(set.is_empty(Duration::ZERO).unwrap());
    }

    #[test]
    fn acquire_blocks_until_release() {
        let set = Arc::new(BoundedSlotSet::new(1).unwrap());
        let held = set.acquire().unwrap();
        let released = Arc::new(AtomicBool::new(false));

        let waiter = {
            let set = Arc::clone(&set);
            let released = Arc::clone(&released);
            std::thread::spawn(move || {
                let token = set.acquire().unwrap();
                assert!(released.load(Ordering::SeqCst));
                token.slot()
            })
        };

        std::thread::sleep(Duration::from_millis(30));
        released.store(true, Ordering::SeqCst);
        drop(held);

        assert_eq!(waiter.join().unwrap(), 0);
    }

    #[test]
    fn wait_for_empty_returns_once_all_released() {
        let set = Arc::new(BoundedSlotSet::new(2).unwrap());
        let a = set.acquire().unwrap();
        let b = set.acquire().unwrap();

        let releaser = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            drop(a);
            std::thread::sleep(Duration::from_millis(10));
            drop(b);
        });

        set.wait_for_empty().unwrap();
        assert_eq!(set.in_use().unwrap(), 0);
        releaser.join().unwrap();
    }

    #[test]
    fn never_more_than_capacity_outstanding() {
        for capacity in [1, 3, 8] {
            let set = Arc::new(BoundedSlotSet::new(capacity).unwrap());
            let current = Arc::new(AtomicUsize::new(0));
            let peak = Arc::new(AtomicUsize::new(0));

            let workers: Vec<_> = (0..capacity * 4)
                .map(|_| {
                    let set = Arc::clone(&set);
                    let current = Arc::clone(&current);
                    let peak = Arc::clone(&peak);
                    std::thread::spawn(move || {
                        for _ in 0..5 {
                            let token = set.acquire().unwrap();
                            let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                            peak.fetch_max(now, Ordering::SeqCst);
                            std::thread::sleep(Duration::from_millis(1));
                            current.fetch_sub(1, Ordering::SeqCst);
                            drop(token);
                        }
                    })
                })
                .collect();

            for worker in workers {
                worker.join().unwrap();
            }

            assert!(peak.load(Ordering::SeqCst) <= capacity);
            assert!(set.is_empty(Duration::ZERO).unwrap());
        }
    }
}
