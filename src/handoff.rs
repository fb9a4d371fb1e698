//! Bigface verdicts carried forward to the OD station.
//!
//! Both stations count rollers independently, once per rising edge of their
//! own presence sensor. A lookup here is only meaningful while rollers pass
//! both presence sensors in the same order with no missed or doubled edges;
//! a missing id therefore means the two counters have drifted apart.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HandoffError {
    #[error("no bigface verdict recorded for roller {0}; station counters are out of step")]
    Missing(u64),
}

#[derive(Clone, Default)]
pub struct HandoffTable {
    inner: Arc<Mutex<HashMap<u64, bool>>>,
}

impl HandoffTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, bool>> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Records the Bigface verdict for `id`. Returns the previous flag when
    /// the id was already present, which only happens if the counter was
    /// reset mid-run.
    pub fn put(&self, id: u64, defective: bool) -> Option<bool> {
        self.lock().insert(id, defective)
    }

    /// Removes and returns the Bigface flag for `id`.
    pub fn take(&self, id: u64) -> Result<bool, HandoffError> {
        self.lock().remove(&id).ok_or(HandoffError::Missing(id))
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_take_consumes_entry() {
        let table = HandoffTable::new();
        assert_eq!(table.put(5, true), None);
        assert_eq!(table.take(5), Ok(true));
        assert!(table.is_empty());
        assert_eq!(table.take(5), Err(HandoffError::Missing(5)));
    }

    #[test]
    fn clones_share_entries() {
        let bigface = HandoffTable::new();
        let od = bigface.clone();
        bigface.put(1, false);
        bigface.put(2, true);
        assert_eq!(od.len(), 2);
        assert_eq!(od.take(2), Ok(true));
        assert_eq!(od.take(1), Ok(false));
        assert_eq!(bigface.len(), 0);
    }

    #[test]
    fn take_from_many_threads_is_exactly_once() {
        let table = HandoffTable::new();
        table.put(9, true);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let table = table.clone();
                std::thread::spawn(move || table.take(9).is_ok())
            })
            .collect();
        let successes = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(successes, 1);
    }
}
