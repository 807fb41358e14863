//! Quest System Module
//!
//! Linear quest progression: an immutable registry of quests and stages,
//! a persisted per-quest stage index, and an engine that arms the current
//! stage of every eligible quest and advances it when that stage completes.

pub mod api;
pub mod definition;
pub mod dialogue;
pub mod engine;
pub mod events;
pub mod progression;
pub mod registry;
pub mod state;
pub mod triggers;

pub use api::{
    Analytics, CollaboratorError, Collaborators, DialogueCollaborator, LevelProvider,
    RewardDispatcher, StageContext,
};
pub use definition::{DialogueHandle, Disposer, ItemReward, Quest, Reward, Stage, StageTrigger};
pub use dialogue::DialogueBoard;
pub use engine::QuestEngine;
pub use events::{QuestCompleted, StageReached, WorldEvent};
pub use progression::Advance;
pub use registry::{QuestLoadError, QuestRegistry};
pub use state::{MemoryProgressionStore, ProgressionStore, StageProgress};
