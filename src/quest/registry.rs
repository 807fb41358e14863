//! Quest Registry
//!
//! Built once at startup from a list of quest definitions (or from the TOML
//! files under `data/quests`) and read-only afterwards.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use super::definition::{Quest, RawQuestFile};

/// Content errors found while building the registry
#[derive(Debug, thiserror::Error)]
pub enum QuestLoadError {
    #[error("Failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid quest in {path:?}: {reason}")]
    Invalid { path: PathBuf, reason: String },

    #[error("Duplicate quest id '{0}'")]
    DuplicateId(String),

    #[error("Quest '{0}' has no stages")]
    NoStages(String),

    #[error("Quest '{quest}' requires unknown quest '{previous}'")]
    UnknownPrevious { quest: String, previous: String },
}

/// Registry for all quest definitions
#[derive(Debug, Default)]
pub struct QuestRegistry {
    quests: BTreeMap<String, Arc<Quest>>,
}

impl QuestRegistry {
    /// Build the registry. Invalid content is a programmer error and panics.
    pub fn new(quests: impl IntoIterator<Item = Quest>) -> Self {
        match Self::try_new(quests) {
            Ok(registry) => registry,
            Err(e) => panic!("Invalid quest content: {}", e),
        }
    }

    pub fn try_new(quests: impl IntoIterator<Item = Quest>) -> Result<Self, QuestLoadError> {
        let mut map = BTreeMap::new();

        for quest in quests {
            if quest.stages.is_empty() {
                return Err(QuestLoadError::NoStages(quest.id));
            }
            if map.contains_key(&quest.id) {
                return Err(QuestLoadError::DuplicateId(quest.id));
            }
            map.insert(quest.id.clone(), Arc::new(quest));
        }

        for quest in map.values() {
            if let Some(ref previous) = quest.previous {
                if !map.contains_key(previous) {
                    return Err(QuestLoadError::UnknownPrevious {
                        quest: quest.id.clone(),
                        previous: previous.clone(),
                    });
                }
            }
        }

        Ok(Self { quests: map })
    }

    /// Load all quest definitions from `data_dir/quests`
    pub fn load_from_directory(data_dir: &Path) -> Result<Self, QuestLoadError> {
        let quest_dir = data_dir.join("quests");
        info!("Loading quests from {:?}", quest_dir);

        if !quest_dir.exists() {
            warn!("Quest directory does not exist: {:?}", quest_dir);
            return Ok(Self::default());
        }

        let mut paths = Vec::new();
        collect_toml_files(&quest_dir, &mut paths)?;
        paths.sort();

        let mut quests = Vec::with_capacity(paths.len());
        for path in paths {
            let content = std::fs::read_to_string(&path)
                .map_err(|source| QuestLoadError::Io { path: path.clone(), source })?;

            let raw: RawQuestFile = toml::from_str(&content)
                .map_err(|source| QuestLoadError::Parse { path: path.clone(), source })?;

            let quest = Quest::from_raw(&raw.quest)
                .map_err(|reason| QuestLoadError::Invalid { path: path.clone(), reason })?;

            info!("Loaded quest: {} ({}, {} stages)", quest.name, quest.id, quest.stage_count());
            quests.push(quest);
        }

        let registry = Self::try_new(quests)?;
        info!("Loaded {} quest definitions", registry.len());
        Ok(registry)
    }

    /// Get a quest by ID
    pub fn get(&self, quest_id: &str) -> Option<&Arc<Quest>> {
        self.quests.get(quest_id)
    }

    /// Every quest, in id order
    pub fn all(&self) -> impl Iterator<Item = (&str, &Arc<Quest>)> {
        self.quests.iter().map(|(id, quest)| (id.as_str(), quest))
    }

    /// Quests whose level requirement is met at `level`
    pub fn eligible(&self, level: i32) -> impl Iterator<Item = &Arc<Quest>> {
        self.quests.values().filter(move |q| q.required_level <= level)
    }

    pub fn len(&self) -> usize {
        self.quests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quests.is_empty()
    }
}

fn collect_toml_files(dir: &Path, paths: &mut Vec<PathBuf>) -> Result<(), QuestLoadError> {
    let entries = std::fs::read_dir(dir)
        .map_err(|source| QuestLoadError::Io { path: dir.to_path_buf(), source })?;

    for entry in entries {
        let entry = entry.map_err(|source| QuestLoadError::Io { path: dir.to_path_buf(), source })?;
        let path = entry.path();

        if path.is_dir() {
            collect_toml_files(&path, paths)?;
        } else if path.extension().is_some_and(|ext| ext == "toml") {
            paths.push(path);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quest::definition::Stage;
    use tempfile::TempDir;

    fn quest(id: &str, level: i32) -> Quest {
        Quest::new(id, id, vec![Stage::new("only stage")]).with_required_level(level)
    }

    fn create_test_quest_toml() -> &'static str {
        r#"
[quest]
id = "test_quest"
name = "Test Quest"
description = "A test quest"
level_required = 1

[[quest.stages]]
description = "Kill 3 slimes"
complete_on = { type = "kill_monster", target = "slime", count = 3 }

[[quest.stages]]
description = "Report back"
complete_on = { type = "talk_to", target = "test_npc" }

[quest.rewards]
exp = 50
gold = 25
"#
    }

    #[test]
    fn test_eligible_filters_by_level() {
        let registry = QuestRegistry::new([quest("a", 1), quest("b", 5), quest("c", 3)]);

        let ids: Vec<&str> = registry.eligible(3).map(|q| q.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert_eq!(registry.eligible(0).count(), 0);
        assert_eq!(registry.all().count(), 3);
    }

    #[test]
    #[should_panic(expected = "Duplicate quest id 'a'")]
    fn test_duplicate_id_panics() {
        QuestRegistry::new([quest("a", 1), quest("a", 2)]);
    }

    #[test]
    fn test_content_errors() {
        let empty = Quest::new("empty", "Empty", Vec::new());
        assert!(matches!(QuestRegistry::try_new([empty]), Err(QuestLoadError::NoStages(_))));

        let orphan = quest("b", 1).after("missing");
        assert!(matches!(
            QuestRegistry::try_new([orphan]),
            Err(QuestLoadError::UnknownPrevious { .. })
        ));

        let chained = QuestRegistry::try_new([quest("a", 1), quest("b", 1).after("a")]);
        assert!(chained.is_ok());
    }

    #[test]
    fn test_load_quest() {
        let temp_dir = TempDir::new().unwrap();
        let quest_dir = temp_dir.path().join("quests").join("starter");
        std::fs::create_dir_all(&quest_dir).unwrap();

        std::fs::write(quest_dir.join("test.toml"), create_test_quest_toml()).unwrap();
        std::fs::write(quest_dir.join("notes.txt"), "ignored").unwrap();

        let registry = QuestRegistry::load_from_directory(temp_dir.path()).unwrap();

        let quest = registry.get("test_quest").unwrap();
        assert_eq!(quest.name, "Test Quest");
        assert_eq!(quest.stage_count(), 2);
        assert_eq!(quest.reward.xp, Some(50));
        assert_eq!(quest.reward.gold, Some(25));
    }

    #[test]
    fn test_load_rejects_duplicates_across_files() {
        let temp_dir = TempDir::new().unwrap();
        let quest_dir = temp_dir.path().join("quests");
        std::fs::create_dir_all(&quest_dir).unwrap();

        std::fs::write(quest_dir.join("a.toml"), create_test_quest_toml()).unwrap();
        std::fs::write(quest_dir.join("b.toml"), create_test_quest_toml()).unwrap();

        let result = QuestRegistry::load_from_directory(temp_dir.path());
        assert!(matches!(result, Err(QuestLoadError::DuplicateId(id)) if id == "test_quest"));
    }

    #[test]
    fn test_shipped_content_loads() {
        let data_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("data");
        let registry = QuestRegistry::load_from_directory(&data_dir).unwrap();

        let samples = registry.get("slime_samples").unwrap();
        assert_eq!(samples.previous.as_deref(), Some("first_steps"));
        assert!(registry.get("first_steps").unwrap().completion_dialogue.is_some());
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let registry = QuestRegistry::load_from_directory(temp_dir.path()).unwrap();
        assert!(registry.is_empty());
    }
}
