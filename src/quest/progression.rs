//! Stage advancement
//!
//! The only code that writes to a progression store. Out-of-order and
//! duplicate completions are expected (late signals, replayed network
//! messages) and are rejected without touching the store.

use super::state::{ProgressionStore, StageProgress};

/// Outcome of a `complete_stage` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// Quest moved on to this stage index
    Advanced(usize),
    /// The last stage was completed; the store now holds the sentinel
    Completed,
    /// Quest was already complete before the call
    AlreadyComplete,
    /// `expected` was not the stored stage
    Rejected,
}

impl Advance {
    /// Whether the store was written
    pub fn is_transition(&self) -> bool {
        matches!(self, Advance::Advanced(_) | Advance::Completed)
    }
}

/// Complete stage `expected` of a quest with `stage_count` stages.
pub fn complete_stage(
    store: &dyn ProgressionStore,
    quest_id: &str,
    stage_count: usize,
    expected: usize,
) -> Advance {
    let current = match store.get(quest_id) {
        Some(StageProgress::Completed) => return Advance::AlreadyComplete,
        Some(StageProgress::Stage(index)) => index,
        None => 0,
    };

    let next = current + 1;
    if next != expected + 1 {
        return Advance::Rejected;
    }

    if next > stage_count.saturating_sub(1) {
        store.set(quest_id, StageProgress::Completed);
        Advance::Completed
    } else {
        store.set(quest_id, StageProgress::Stage(next));
        Advance::Advanced(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quest::state::MemoryProgressionStore;

    #[test]
    fn test_full_traversal() {
        let store = MemoryProgressionStore::new();

        assert_eq!(complete_stage(&store, "q", 3, 0), Advance::Advanced(1));
        assert_eq!(store.get("q").map(StageProgress::to_raw), Some(1));

        assert_eq!(complete_stage(&store, "q", 3, 1), Advance::Advanced(2));
        assert_eq!(store.get("q").map(StageProgress::to_raw), Some(2));

        assert_eq!(complete_stage(&store, "q", 3, 2), Advance::Completed);
        assert_eq!(store.get("q").map(StageProgress::to_raw), Some(-1));
    }

    #[test]
    fn test_out_of_order_never_writes() {
        for stage_count in 1..5 {
            for stored in 0..stage_count {
                for expected in 0..stage_count + 2 {
                    if expected == stored {
                        continue;
                    }
                    let store = MemoryProgressionStore::with_entries([("q", StageProgress::Stage(stored))]);
                    assert_eq!(complete_stage(&store, "q", stage_count, expected), Advance::Rejected);
                    assert_eq!(store.get("q"), Some(StageProgress::Stage(stored)));
                }
            }
        }
    }

    #[test]
    fn test_absent_entry_counts_as_first_stage() {
        let store = MemoryProgressionStore::new();
        assert_eq!(complete_stage(&store, "q", 2, 1), Advance::Rejected);
        assert_eq!(store.get("q"), None);

        assert_eq!(complete_stage(&store, "q", 2, 0), Advance::Advanced(1));
    }

    #[test]
    fn test_completed_is_terminal() {
        let store = MemoryProgressionStore::with_entries([("q", StageProgress::Completed)]);

        for expected in 0..4 {
            assert_eq!(complete_stage(&store, "q", 3, expected), Advance::AlreadyComplete);
        }
        assert_eq!(store.get("q"), Some(StageProgress::Completed));
    }

    #[test]
    fn test_single_stage_quest() {
        let store = MemoryProgressionStore::new();
        let result = complete_stage(&store, "q", 1, 0);
        assert_eq!(result, Advance::Completed);
        assert!(result.is_transition());
        assert!(!Advance::Rejected.is_transition());
    }

    #[test]
    fn test_duplicate_completion_is_rejected() {
        let store = MemoryProgressionStore::new();
        assert_eq!(complete_stage(&store, "q", 3, 0), Advance::Advanced(1));
        assert_eq!(complete_stage(&store, "q", 3, 0), Advance::Rejected);
        assert_eq!(store.get("q"), Some(StageProgress::Stage(1)));
    }
}
