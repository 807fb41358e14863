//! Quest Definition Structures
//!
//! Raw structures are deserialized from TOML quest files and resolved into
//! `Quest` / `Stage` values. A resolved stage is pure content: progress for a
//! player lives in the progression store, never on the stage itself.

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use super::api::StageContext;
use super::triggers;

/// A quest definition loaded from TOML
#[derive(Debug, Clone, Deserialize)]
pub struct RawQuestFile {
    pub quest: RawQuest,
}

/// Raw quest data as it appears in TOML
#[derive(Debug, Clone, Deserialize)]
pub struct RawQuest {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub level_required: i32,
    /// Quest that must be completed before this one becomes eligible
    pub previous: Option<String>,
    /// Dialogue shown when the quest completes
    pub completion_dialogue: Option<String>,
    #[serde(default)]
    pub stages: Vec<RawStage>,
    #[serde(default)]
    pub rewards: Option<RawReward>,
}

/// Raw stage as it appears in TOML
#[derive(Debug, Clone, Deserialize)]
pub struct RawStage {
    pub description: String,
    pub target: Option<RawTarget>,
    pub dialogue: Option<String>,
    pub complete_on: Option<RawTrigger>,
}

/// Waypoint target: either `{ entity = "..." }` or `{ x = .., y = .. }`
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawTarget {
    Entity { entity: String },
    Position { x: f32, y: f32 },
}

/// Completion condition as it appears in TOML
#[derive(Debug, Clone, Deserialize)]
pub struct RawTrigger {
    #[serde(rename = "type")]
    pub trigger_type: String,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default = "default_count")]
    pub count: i32,
}

fn default_count() -> i32 {
    1
}

/// Raw reward as it appears in TOML
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawReward {
    pub exp: Option<i64>,
    pub gold: Option<i64>,
    #[serde(default)]
    pub items: Vec<RawItemReward>,
}

/// Item reward entry
#[derive(Debug, Clone, Deserialize)]
pub struct RawItemReward {
    pub id: String,
    #[serde(default = "default_count")]
    pub count: i32,
}

// ============================================================================
// Opaque handles
// ============================================================================

/// Reference to a world entity (NPC, object) a stage points at
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef(pub String);

/// World position a stage points at
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

/// Where a stage's waypoint should point. The engine only forwards it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StageTarget {
    Entity(EntityRef),
    Position(Position),
}

/// Handle to a dialogue entry owned by the dialogue system
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DialogueHandle(String);

impl DialogueHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DialogueHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Stage
// ============================================================================

/// Cleanup returned by a stage setup; reverses whatever the setup connected
pub type Disposer = Box<dyn FnOnce() + Send>;

/// Future produced by a stage setup
pub type SetupFuture = BoxFuture<'static, Option<Disposer>>;

/// Setup invoked once each time a stage goes live. The future is polled once
/// inline; without a Tokio runtime it must not create timers or IO before it
/// first suspends.
pub type OnReached = Arc<dyn Fn(StageContext) -> SetupFuture + Send + Sync>;

/// Objective kinds a stage can declare as its completion condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectiveType {
    /// Kill X monsters of type Y
    KillMonster,
    /// Collect X items of type Y
    CollectItem,
    /// Talk to a specific NPC
    TalkTo,
    /// Reach a specific location
    ReachLocation,
    /// A dialogue has been read to the end
    FinishDialogue,
}

impl ObjectiveType {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "kill_monster" | "kill" => Some(ObjectiveType::KillMonster),
            "collect_item" | "collect" => Some(ObjectiveType::CollectItem),
            "talk_to" | "talk" => Some(ObjectiveType::TalkTo),
            "reach_location" | "reach" | "location" => Some(ObjectiveType::ReachLocation),
            "finish_dialogue" | "dialogue" => Some(ObjectiveType::FinishDialogue),
            _ => None,
        }
    }
}

/// Declarative completion condition wired by the engine when a stage goes live
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageTrigger {
    /// Fires once the matching world events add up to `count`
    Objective {
        objective_type: ObjectiveType,
        target: String,
        count: i32,
    },
    /// Fires when the given dialogue (or the stage's own dialogue) finishes
    DialogueFinished(Option<DialogueHandle>),
}

impl StageTrigger {
    pub fn kill(target: impl Into<String>, count: i32) -> Self {
        Self::objective(ObjectiveType::KillMonster, target, count)
    }

    pub fn collect(target: impl Into<String>, count: i32) -> Self {
        Self::objective(ObjectiveType::CollectItem, target, count)
    }

    pub fn talk_to(npc: impl Into<String>) -> Self {
        Self::objective(ObjectiveType::TalkTo, npc, 1)
    }

    pub fn reach(location: impl Into<String>) -> Self {
        Self::objective(ObjectiveType::ReachLocation, location, 1)
    }

    fn objective(objective_type: ObjectiveType, target: impl Into<String>, count: i32) -> Self {
        Self::Objective {
            objective_type,
            target: target.into(),
            count: count.max(1),
        }
    }

    pub fn from_raw(raw: &RawTrigger) -> Result<Self, String> {
        let objective_type = ObjectiveType::from_str(&raw.trigger_type)
            .ok_or_else(|| format!("Invalid trigger type '{}'", raw.trigger_type))?;

        if objective_type == ObjectiveType::FinishDialogue {
            return Ok(Self::DialogueFinished(raw.target.as_deref().map(DialogueHandle::new)));
        }

        let target = raw
            .target
            .clone()
            .ok_or_else(|| format!("Trigger '{}' needs a target", raw.trigger_type))?;
        Ok(Self::objective(objective_type, target, raw.count))
    }
}

/// One step of a quest
pub struct Stage {
    pub description: String,
    pub target: Option<StageTarget>,
    pub dialogue: Option<DialogueHandle>,
    pub trigger: Option<StageTrigger>,
    on_reached: Option<OnReached>,
}

impl Stage {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            target: None,
            dialogue: None,
            trigger: None,
            on_reached: None,
        }
    }

    pub fn with_target(mut self, target: StageTarget) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_dialogue(mut self, dialogue: DialogueHandle) -> Self {
        self.dialogue = Some(dialogue);
        self
    }

    /// Complete the stage when `trigger` is satisfied. Replaces any custom setup.
    pub fn completed_by(mut self, trigger: StageTrigger) -> Self {
        self.on_reached = Some(triggers::setup_for(trigger.clone()));
        self.trigger = Some(trigger);
        self
    }

    /// Custom setup run every time the stage goes live
    pub fn on_reached<F>(mut self, setup: F) -> Self
    where
        F: Fn(StageContext) -> SetupFuture + Send + Sync + 'static,
    {
        self.on_reached = Some(Arc::new(setup));
        self
    }

    pub fn setup(&self) -> Option<&OnReached> {
        self.on_reached.as_ref()
    }

    pub fn from_raw(raw: &RawStage) -> Result<Self, String> {
        let mut stage = Stage::new(raw.description.clone());

        stage.target = raw.target.as_ref().map(|t| match t {
            RawTarget::Entity { entity } => StageTarget::Entity(EntityRef(entity.clone())),
            RawTarget::Position { x, y } => StageTarget::Position(Position { x: *x, y: *y }),
        });
        stage.dialogue = raw.dialogue.as_deref().map(DialogueHandle::new);

        if let Some(ref trigger) = raw.complete_on {
            stage = stage.completed_by(StageTrigger::from_raw(trigger)?);
        }

        Ok(stage)
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("description", &self.description)
            .field("target", &self.target)
            .field("dialogue", &self.dialogue)
            .field("trigger", &self.trigger)
            .field("has_setup", &self.on_reached.is_some())
            .finish()
    }
}

// ============================================================================
// Quest
// ============================================================================

/// Item reward entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemReward {
    pub item_id: String,
    pub count: i32,
}

/// Quest rewards
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Reward {
    pub xp: Option<i64>,
    pub gold: Option<i64>,
    pub items: Vec<ItemReward>,
}

impl Reward {
    pub fn from_raw(raw: &RawReward) -> Self {
        Self {
            xp: raw.exp,
            gold: raw.gold,
            items: raw.items.iter().map(|i| ItemReward {
                item_id: i.id.clone(),
                count: i.count,
            }).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.xp.is_none() && self.gold.is_none() && self.items.is_empty()
    }
}

/// A fully resolved quest definition
#[derive(Debug)]
pub struct Quest {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Minimum player level required
    pub required_level: i32,
    /// Quest that must be completed first
    pub previous: Option<String>,
    /// Ordered stages, fixed at authoring time
    pub stages: Vec<Arc<Stage>>,
    pub reward: Reward,
    pub completion_dialogue: Option<DialogueHandle>,
}

impl Quest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, stages: Vec<Stage>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            required_level: 0,
            previous: None,
            stages: stages.into_iter().map(Arc::new).collect(),
            reward: Reward::default(),
            completion_dialogue: None,
        }
    }

    pub fn with_required_level(mut self, level: i32) -> Self {
        self.required_level = level;
        self
    }

    pub fn with_reward(mut self, reward: Reward) -> Self {
        self.reward = reward;
        self
    }

    pub fn with_completion_dialogue(mut self, dialogue: DialogueHandle) -> Self {
        self.completion_dialogue = Some(dialogue);
        self
    }

    pub fn after(mut self, previous: impl Into<String>) -> Self {
        self.previous = Some(previous.into());
        self
    }

    /// Create a Quest from raw TOML data
    pub fn from_raw(raw: &RawQuest) -> Result<Self, String> {
        let stages = raw.stages
            .iter()
            .enumerate()
            .map(|(i, s)| {
                Stage::from_raw(s).map_err(|e| format!("Stage {} of '{}': {}", i, raw.id, e))
            })
            .collect::<Result<Vec<_>, _>>()?;

        if stages.is_empty() {
            return Err(format!("Quest '{}' has no stages", raw.id));
        }

        Ok(Self {
            id: raw.id.clone(),
            name: raw.name.clone(),
            description: raw.description.clone(),
            required_level: raw.level_required,
            previous: raw.previous.clone(),
            stages: stages.into_iter().map(Arc::new).collect(),
            reward: raw.rewards.as_ref()
                .map(Reward::from_raw)
                .unwrap_or_default(),
            completion_dialogue: raw.completion_dialogue.as_deref().map(DialogueHandle::new),
        })
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    pub fn stage(&self, index: usize) -> Option<&Arc<Stage>> {
        self.stages.get(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_objective_type_parsing() {
        assert_eq!(ObjectiveType::from_str("kill_monster"), Some(ObjectiveType::KillMonster));
        assert_eq!(ObjectiveType::from_str("collect"), Some(ObjectiveType::CollectItem));
        assert_eq!(ObjectiveType::from_str("TALK_TO"), Some(ObjectiveType::TalkTo));
        assert_eq!(ObjectiveType::from_str("reach_location"), Some(ObjectiveType::ReachLocation));
        assert_eq!(ObjectiveType::from_str("finish_dialogue"), Some(ObjectiveType::FinishDialogue));
        assert_eq!(ObjectiveType::from_str("invalid"), None);
    }

    #[test]
    fn test_quest_from_toml() {
        let raw: RawQuestFile = toml::from_str(r#"
[quest]
id = "first_steps"
name = "First Steps"
level_required = 2
completion_dialogue = "elder_farewell"

[[quest.stages]]
description = "Speak with the elder"
target = { entity = "elder_villager" }
dialogue = "elder_intro"
complete_on = { type = "finish_dialogue" }

[[quest.stages]]
description = "Clear the pig pen"
target = { x = 12.0, y = 4.5 }
complete_on = { type = "kill", target = "pig", count = 3 }

[quest.rewards]
exp = 50
items = [{ id = "health_potion", count = 2 }]
"#).unwrap();

        let quest = Quest::from_raw(&raw.quest).unwrap();
        assert_eq!(quest.id, "first_steps");
        assert_eq!(quest.required_level, 2);
        assert_eq!(quest.stage_count(), 2);
        assert_eq!(quest.completion_dialogue, Some(DialogueHandle::new("elder_farewell")));

        let first = &quest.stages[0];
        assert_eq!(first.target, Some(StageTarget::Entity(EntityRef("elder_villager".into()))));
        assert_eq!(first.trigger, Some(StageTrigger::DialogueFinished(None)));
        assert!(first.setup().is_some());

        let second = &quest.stages[1];
        assert_eq!(second.target, Some(StageTarget::Position(Position { x: 12.0, y: 4.5 })));
        assert_eq!(second.trigger, Some(StageTrigger::kill("pig", 3)));

        assert_eq!(quest.reward.xp, Some(50));
        assert_eq!(quest.reward.gold, None);
        assert_eq!(quest.reward.items, vec![ItemReward { item_id: "health_potion".into(), count: 2 }]);
    }

    #[test]
    fn test_quest_without_stages_is_rejected() {
        let raw: RawQuestFile = toml::from_str(r#"
[quest]
id = "empty"
name = "Empty"
"#).unwrap();

        assert!(Quest::from_raw(&raw.quest).is_err());
    }

    #[test]
    fn test_trigger_requires_target() {
        let raw = RawTrigger { trigger_type: "kill".into(), target: None, count: 2 };
        assert!(StageTrigger::from_raw(&raw).is_err());

        let raw = RawTrigger { trigger_type: "fly".into(), target: Some("x".into()), count: 1 };
        assert!(StageTrigger::from_raw(&raw).is_err());
    }
}
