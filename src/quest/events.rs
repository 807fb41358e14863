//! Quest Event Types
//!
//! World events fired by gameplay code, and the engine events fired when a
//! stage is reached or a quest completes.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::definition::{ObjectiveType, Stage, StageTrigger};
use crate::signal::Signal;

/// Events that can satisfy a stage trigger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WorldEvent {
    /// Player killed a monster
    MonsterKilled {
        /// Entity prototype ID (e.g., "pig", "elder_villager")
        entity_type: String,
        /// Level of the killed monster
        level: i32,
    },

    /// Player collected an item
    ItemCollected {
        /// Item ID (e.g., "slime_core", "health_potion")
        item_id: String,
        /// Quantity collected
        count: i32,
    },

    /// Player talked to an NPC
    NpcInteraction {
        /// NPC entity prototype ID
        npc_id: String,
    },

    /// Player reached a location
    LocationReached {
        /// Location identifier
        location_id: String,
        /// World coordinates
        x: i32,
        y: i32,
    },
}

impl WorldEvent {
    /// Get event type as string (for logging/debugging)
    pub fn event_type(&self) -> &'static str {
        match self {
            WorldEvent::MonsterKilled { .. } => "monster_killed",
            WorldEvent::ItemCollected { .. } => "item_collected",
            WorldEvent::NpcInteraction { .. } => "npc_interaction",
            WorldEvent::LocationReached { .. } => "location_reached",
        }
    }

    /// How much this event advances `trigger`, zero when it doesn't match
    pub fn progress_toward(&self, trigger: &StageTrigger) -> i32 {
        let StageTrigger::Objective { objective_type, target, .. } = trigger else {
            return 0;
        };

        match (self, objective_type) {
            (WorldEvent::MonsterKilled { entity_type, .. }, ObjectiveType::KillMonster)
                if entity_type == target => 1,
            (WorldEvent::ItemCollected { item_id, count }, ObjectiveType::CollectItem)
                if item_id == target => (*count).max(0),
            (WorldEvent::NpcInteraction { npc_id }, ObjectiveType::TalkTo)
                if npc_id == target => 1,
            (WorldEvent::LocationReached { location_id, .. }, ObjectiveType::ReachLocation)
                if location_id == target => 1,
            _ => 0,
        }
    }
}

/// A stage became the current stage of a live quest
#[derive(Debug, Clone)]
pub struct StageReached {
    pub quest_id: String,
    pub index: usize,
    pub stage: Arc<Stage>,
    /// Fire to complete this stage for the save that reached it
    pub completed: Signal<()>,
}

/// A quest reached its terminal state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestCompleted {
    pub quest_id: String,
    /// True when the quest was already complete in storage at load time;
    /// no rewards are granted for a resumed completion
    pub resumed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_toward_matching_objectives() {
        let kill = StageTrigger::kill("pig", 3);
        let event = WorldEvent::MonsterKilled { entity_type: "pig".into(), level: 2 };
        assert_eq!(event.progress_toward(&kill), 1);

        let other = WorldEvent::MonsterKilled { entity_type: "slime".into(), level: 2 };
        assert_eq!(other.progress_toward(&kill), 0);

        let collect = StageTrigger::collect("slime_core", 5);
        let picked = WorldEvent::ItemCollected { item_id: "slime_core".into(), count: 2 };
        assert_eq!(picked.progress_toward(&collect), 2);
        assert_eq!(picked.progress_toward(&kill), 0);
    }

    #[test]
    fn test_dialogue_trigger_ignores_world_events() {
        let trigger = StageTrigger::DialogueFinished(None);
        let event = WorldEvent::NpcInteraction { npc_id: "elder".into() };
        assert_eq!(event.progress_toward(&trigger), 0);
        assert_eq!(event.event_type(), "npc_interaction");
    }
}
