use std::sync::Arc;

use super::set::SlotSetInner;

/// Proof of holding one slot of a [`BoundedSlotSet`](super::BoundedSlotSet).
///
/// Not `Clone`: the token is moved to whoever runs the work, and its slot is
/// released exactly once, when the token is dropped. Unwinding drops it too,
/// so a panicking holder cannot leak the slot.
#[must_use = "dropping a SlotToken releases its slot immediately"]
pub struct SlotToken {
    slot: usize,
    set: Arc<SlotSetInner>,
}

impl SlotToken {
    pub(crate) fn new(slot: usize, set: Arc<SlotSetInner>) -> Self {
        Self { slot, set }
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub(crate) fn belongs_to(&self, set: &Arc<SlotSetInner>) -> bool {
        Arc::ptr_eq(&self.set, set)
    }
}

impl Drop for SlotToken {
    fn drop(&mut self) {
        self.set.release_slot(self.slot);
    }
}

impl std::fmt::Debug for SlotToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotToken")
            .field("slot", &self.slot)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::permit::BoundedSlotSet;
    use std::panic::{AssertUnwindSafe, catch_unwind};
    use std::time::Duration;

    #[test]
    fn token_released_on_panic_unwind() {
        let set = BoundedSlotSet::new(1).unwrap();

        let result = catch_unwind(AssertUnwindSafe(|| {
            let _token = set.acquire().unwrap();
            panic!("holder failed");
        }));

        assert!(result.is_err());
        assert!(set.is_empty(Duration::ZERO).unwrap());
    }

    #[test]
    fn token_moves_across_threads() {
        let set = BoundedSlotSet::new(1).unwrap();
        let token = set.acquire().unwrap();

        std::thread::spawn(move || {
            assert_eq!(token.slot(), 0);
        })
        .join()
        .unwrap();

        assert!(set.is_empty(Duration::ZERO).unwrap());
    }

    #[test]
    fn token_from_other_set_releases_against_its_own_set() {
        let a = BoundedSlotSet::new(1).unwrap();
        let b = BoundedSlotSet::new(1).unwrap();
        let token = a.acquire().unwrap();

        // Debug builds fail fast on the mismatch; release builds log it.
        if cfg!(debug_assertions) {
            let result = catch_unwind(AssertUnwindSafe(|| b.release(token)));
            assert!(result.is_err());
        } else {
            b.release(token);
        }

        assert!(a.is_empty(Duration::ZERO).unwrap());
        assert!(b.is_empty(Duration::ZERO).unwrap());
    }
}
