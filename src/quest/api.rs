//! Quest Engine boundary
//!
//! The context passed to stage setups, and the collaborator contracts the
//! engine calls out to. The engine never sees their implementations.

use std::fmt;
use std::sync::Arc;

use super::definition::{DialogueHandle, Stage};
use super::events::WorldEvent;
use crate::signal::Signal;

/// Failure reported by a collaborator. Always best effort for the engine.
#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    #[error("Reward rejected: {0}")]
    Reward(String),

    #[error("Analytics unavailable: {0}")]
    Analytics(String),
}

/// Applies quest rewards to the player
#[cfg_attr(test, mockall::automock)]
pub trait RewardDispatcher: Send + Sync {
    /// Additive; never resets experience
    fn grant_xp(&self, amount: i64) -> Result<(), CollaboratorError>;

    fn grant_gold(&self, amount: i64) -> Result<(), CollaboratorError>;

    fn grant_item(&self, item_id: &str, amount: i32) -> Result<(), CollaboratorError>;
}

/// Presents dialogue and reports when a dialogue has been read through
pub trait DialogueCollaborator: Send + Sync {
    /// Start presenting; the engine does not wait for it
    fn present(&self, handle: &DialogueHandle);

    /// Fired every time `handle` finishes
    fn finished(&self, handle: &DialogueHandle) -> Signal<()>;
}

/// Funnel/step logging
#[cfg_attr(test, mockall::automock)]
pub trait Analytics: Send + Sync {
    fn log_step(&self, step_index: usize, label: &str) -> Result<(), CollaboratorError>;
}

/// Source of the player's level, used for quest eligibility
pub trait LevelProvider: Send + Sync {
    /// `None` when no level is known yet
    fn current_level(&self) -> Option<i32>;
}

/// Everything the engine hands to a stage setup
#[derive(Clone)]
pub struct StageContext {
    pub quest_id: String,
    pub index: usize,
    pub stage: Arc<Stage>,
    /// This save's completion signal for the stage
    pub completed: Signal<()>,
    /// World events fired by gameplay code
    pub world: Signal<WorldEvent>,
    pub dialogue: Option<Arc<dyn DialogueCollaborator>>,
}

impl StageContext {
    /// Signal the stage is done
    pub fn complete(&self) {
        self.completed.fire(&());
    }
}

impl fmt::Debug for StageContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageContext")
            .field("quest_id", &self.quest_id)
            .field("index", &self.index)
            .field("stage", &self.stage.description)
            .finish()
    }
}

/// The collaborators an engine is built with. Any of them may be absent.
#[derive(Clone, Default)]
pub struct Collaborators {
    pub rewards: Option<Arc<dyn RewardDispatcher>>,
    pub dialogue: Option<Arc<dyn DialogueCollaborator>>,
    pub analytics: Option<Arc<dyn Analytics>>,
    pub level: Option<Arc<dyn LevelProvider>>,
    /// World event bus handed to stage setups
    pub world: Signal<WorldEvent>,
}
