//! Admission slots and the permits that hold them.
//!
//! A [`BoundedSlotSet`] owns N slots. Acquiring one yields a [`SlotToken`];
//! dropping (or explicitly releasing) the token frees the slot again:
//! - `acquire()` blocks until a slot is free (backpressure)
//! - `try_acquire()` / `acquire_timeout()` give up instead of blocking
//! - `is_empty()` / `wait_for_empty()` observe "every slot free"

mod set;
mod token;

pub use set::BoundedSlotSet;
pub use token::SlotToken;
