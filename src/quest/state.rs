//! Quest State Tracking
//!
//! The progression store maps a quest id to the player's current stage (or
//! the completed sentinel). It is owned outside the engine and injected.

use std::collections::HashMap;

use dashmap::DashMap;

/// Where a player stands in one quest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageProgress {
    /// Stage at this index is the live one
    Stage(usize),
    /// Every stage has been completed
    Completed,
}

impl StageProgress {
    /// Raw value persisted for a completed quest
    pub const COMPLETED_SENTINEL: i32 = -1;

    /// Decode the persisted integer form. Negative values other than the
    /// sentinel are not valid progress.
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            Self::COMPLETED_SENTINEL => Some(StageProgress::Completed),
            index if index >= 0 => Some(StageProgress::Stage(index as usize)),
            _ => None,
        }
    }

    pub fn to_raw(self) -> i32 {
        match self {
            StageProgress::Stage(index) => index as i32,
            StageProgress::Completed => Self::COMPLETED_SENTINEL,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, StageProgress::Completed)
    }

    /// Live stage index, `None` once completed
    pub fn stage_index(&self) -> Option<usize> {
        match self {
            StageProgress::Stage(index) => Some(*index),
            StageProgress::Completed => None,
        }
    }
}

/// Per-save map from quest id to progress.
///
/// Implementations must not call back into the engine from `get`/`set`;
/// both run while the engine holds its state lock.
pub trait ProgressionStore: Send + Sync {
    /// `None` means the quest has not been started
    fn get(&self, quest_id: &str) -> Option<StageProgress>;

    /// Must be observable by the next `get` as soon as it returns
    fn set(&self, quest_id: &str, progress: StageProgress);
}

/// In-memory progression store
#[derive(Debug, Default)]
pub struct MemoryProgressionStore {
    entries: DashMap<String, StageProgress>,
}

impl MemoryProgressionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, StageProgress)>,
        K: Into<String>,
    {
        let store = Self::new();
        for (quest_id, progress) in entries {
            store.entries.insert(quest_id.into(), progress);
        }
        store
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy of every entry in raw integer form
    pub fn snapshot(&self) -> HashMap<String, i32> {
        self.entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().to_raw()))
            .collect()
    }

    /// Serialize to JSON for save files
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.snapshot()).unwrap_or_else(|_| "{}".to_string())
    }

    /// Load a JSON save snapshot. Invalid entries are skipped.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let raw: HashMap<String, i32> = serde_json::from_str(json)?;
        let store = Self::new();
        for (quest_id, value) in raw {
            match StageProgress::from_raw(value) {
                Some(progress) => {
                    store.entries.insert(quest_id, progress);
                }
                None => {
                    tracing::warn!("Skipping invalid progress {} for quest '{}'", value, quest_id);
                }
            }
        }
        Ok(store)
    }
}

impl ProgressionStore for MemoryProgressionStore {
    fn get(&self, quest_id: &str) -> Option<StageProgress> {
        self.entries.get(quest_id).map(|entry| *entry)
    }

    fn set(&self, quest_id: &str, progress: StageProgress) {
        self.entries.insert(quest_id.to_string(), progress);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_encoding() {
        assert_eq!(StageProgress::from_raw(0), Some(StageProgress::Stage(0)));
        assert_eq!(StageProgress::from_raw(3), Some(StageProgress::Stage(3)));
        assert_eq!(StageProgress::from_raw(-1), Some(StageProgress::Completed));
        assert_eq!(StageProgress::from_raw(-2), None);

        assert_eq!(StageProgress::Stage(2).to_raw(), 2);
        assert_eq!(StageProgress::Completed.to_raw(), -1);

        assert_eq!(StageProgress::Stage(2).stage_index(), Some(2));
        assert_eq!(StageProgress::Completed.stage_index(), None);
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryProgressionStore::new();
        assert_eq!(store.get("first_hunt"), None);

        store.set("first_hunt", StageProgress::Stage(1));
        assert_eq!(store.get("first_hunt"), Some(StageProgress::Stage(1)));

        store.set("first_hunt", StageProgress::Completed);
        assert_eq!(store.get("first_hunt"), Some(StageProgress::Completed));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_json_snapshot() {
        let store = MemoryProgressionStore::with_entries([
            ("a", StageProgress::Stage(2)),
            ("b", StageProgress::Completed),
        ]);

        let restored = MemoryProgressionStore::from_json(&store.to_json()).unwrap();
        assert_eq!(restored.get("a"), Some(StageProgress::Stage(2)));
        assert_eq!(restored.get("b"), Some(StageProgress::Completed));

        let partial = MemoryProgressionStore::from_json(r#"{"a": 1, "broken": -7}"#).unwrap();
        assert_eq!(partial.get("a"), Some(StageProgress::Stage(1)));
        assert_eq!(partial.get("broken"), None);
    }
}
