//! Point-in-time dispatcher status.

use serde::Serialize;

use crate::executor::Facility;

/// Dispatcher status for logs and reports.
///
/// Fields are read one after another, so under load the counts may not
/// describe a single instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DispatcherSnapshot {
    pub capacity: usize,
    pub in_use: usize,
    pub available: usize,
    pub facility: Facility,
    pub pending_failures: usize,
}

impl DispatcherSnapshot {
    /// Every slot is held; the next submission will block.
    pub fn is_saturated(&self) -> bool {
        self.available == 0
    }

    pub fn is_idle(&self) -> bool {
        self.in_use == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saturation_and_idle() {
        let snapshot = DispatcherSnapshot {
            capacity: 2,
            in_use: 2,
            available: 0,
            facility: Facility::SharedPool,
            pending_failures: 0,
        };
        assert!(snapshot.is_saturated());
        assert!(!snapshot.is_idle());
    }

    #[test]
    fn snapshot_serializes() {
        let snapshot = DispatcherSnapshot {
            capacity: 4,
            in_use: 1,
            available: 3,
            facility: Facility::DedicatedThread,
            pending_failures: 2,
        };
        insta::assert_json_snapshot!(snapshot, @r#"
        {
          "capacity": 4,
          "in_use": 1,
          "available": 3,
          "facility": "dedicated_thread",
          "pending_failures": 2
        }
        "#);
    }
}
