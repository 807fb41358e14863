//! Quest Engine
//!
//! Brings eligible quests live, tracks which stages currently have a
//! completion handler attached, and turns stage completions into store
//! writes, `stage_reached` / `quest_completed` events and rewards.
//!
//! Stages are shared content, so the `completed` signal of a stage belongs to
//! the engine: every engine (save) has its own signal per stage, handed out
//! through `stage_completed`, `StageContext::completed` and `StageReached`.
//!
//! A stage is "live" while it sits in the engine's live set: it has exactly
//! one completion handler connected to its `completed` signal and at most one
//! setup (pending task or ready disposer). Entering and leaving the live set
//! happens under the engine lock; no user code runs while the lock is held.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use futures::FutureExt;
use futures::task::noop_waker_ref;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

use super::api::{Collaborators, StageContext};
use super::definition::{Disposer, Quest};
use super::events::{QuestCompleted, StageReached, WorldEvent};
use super::progression::{self, Advance};
use super::registry::QuestRegistry;
use super::state::{ProgressionStore, StageProgress};
use crate::signal::{Connection, Signal};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct StageKey {
    quest_id: String,
    index: usize,
}

impl StageKey {
    fn new(quest_id: &str, index: usize) -> Self {
        Self {
            quest_id: quest_id.to_string(),
            index,
        }
    }
}

enum Setup {
    /// Setup is suspended; the handle is filled once its task is spawned
    Pending(Option<AbortHandle>),
    Ready(Option<Disposer>),
}

struct LiveStage {
    /// Distinguishes successive live periods of the same stage
    live_id: u64,
    completion: Option<Connection>,
    setup: Setup,
}

impl LiveStage {
    /// Disconnect the handler and undo the setup. Runs outside the lock.
    fn release(self) {
        if let Some(conn) = self.completion {
            conn.disconnect();
        }
        self.setup.release();
    }
}

impl Setup {
    fn release(self) {
        match self {
            Setup::Pending(Some(task)) => task.abort(),
            Setup::Ready(Some(dispose)) => dispose(),
            Setup::Pending(None) | Setup::Ready(None) => {}
        }
    }
}

#[derive(Default)]
struct EngineState {
    live: HashMap<StageKey, LiveStage>,
    next_live_id: u64,
    /// Level of the most recent load, reused when a completion unlocks a chain
    last_level: Option<i32>,
    /// Quests this engine completed itself; loads do not re-broadcast them
    finished: HashSet<String>,
    shut_down: bool,
}

impl EngineState {
    /// Check-and-insert into the live set. `None` if the stage is already live.
    fn claim(&mut self, key: &StageKey) -> Option<u64> {
        if self.shut_down || self.live.contains_key(key) {
            return None;
        }
        let live_id = self.next_live_id;
        self.next_live_id += 1;
        self.live.insert(key.clone(), LiveStage {
            live_id,
            completion: None,
            setup: Setup::Pending(None),
        });
        Some(live_id)
    }

    /// Remove a live stage; with `live_id` set, only that live period.
    fn take(&mut self, key: &StageKey, live_id: Option<u64>) -> Option<LiveStage> {
        match (self.live.get(key), live_id) {
            (Some(live), Some(id)) if live.live_id != id => None,
            (Some(_), _) => self.live.remove(key),
            (None, _) => None,
        }
    }

    fn current_mut(&mut self, key: &StageKey, live_id: u64) -> Option<&mut LiveStage> {
        self.live.get_mut(key).filter(|live| live.live_id == live_id)
    }
}

struct Shared {
    registry: Arc<QuestRegistry>,
    store: Arc<dyn ProgressionStore>,
    collaborators: Collaborators,
    /// One completion signal per stage of every quest, fixed at construction
    completions: HashMap<StageKey, Signal<()>>,
    stage_reached: Signal<StageReached>,
    quest_completed: Signal<QuestCompleted>,
    state: Mutex<EngineState>,
}

/// Progression engine for one save. Dropping it tears every live stage down.
pub struct QuestEngine {
    shared: Arc<Shared>,
}

impl QuestEngine {
    pub fn new(
        registry: Arc<QuestRegistry>,
        store: Arc<dyn ProgressionStore>,
        collaborators: Collaborators,
    ) -> Self {
        let completions = registry
            .all()
            .flat_map(|(id, quest)| {
                (0..quest.stage_count()).map(move |index| (StageKey::new(id, index), Signal::new()))
            })
            .collect();

        Self {
            shared: Arc::new(Shared {
                registry,
                store,
                collaborators,
                completions,
                stage_reached: Signal::new(),
                quest_completed: Signal::new(),
                state: Mutex::new(EngineState::default()),
            }),
        }
    }

    /// Load at the level reported by the level provider. Without a provider
    /// (or without a known level) nothing is eligible.
    pub fn load_available_quests(&self) {
        let level = self
            .shared
            .collaborators
            .level
            .as_ref()
            .and_then(|provider| provider.current_level());

        match level {
            Some(level) => self.shared.load_at(level),
            None => debug!("No player level available; no quests are eligible"),
        }
    }

    /// Arm the current stage of every quest eligible at `level`. Safe to call
    /// repeatedly: a stage that is already live is left alone.
    pub fn load_available_quests_at(&self, level: i32) {
        self.shared.load_at(level);
    }

    /// Complete stage `expected` of a quest, e.g. from a network message.
    /// Stale or duplicate completions are rejected without side effects.
    pub fn complete_stage(&self, quest_id: &str, expected: usize) -> Advance {
        self.shared.complete(&StageKey::new(quest_id, expected), None)
    }

    /// This engine's `completed` signal for a stage. Firing it completes the
    /// stage for this save only, and only while the stage is live.
    pub fn stage_completed(&self, quest_id: &str, index: usize) -> Option<&Signal<()>> {
        self.shared.completions.get(&StageKey::new(quest_id, index))
    }

    pub fn on_stage_reached<F>(&self, handler: F) -> Connection
    where
        F: Fn(&StageReached) + Send + Sync + 'static,
    {
        self.shared.stage_reached.connect(handler)
    }

    pub fn on_quest_completed<F>(&self, handler: F) -> Connection
    where
        F: Fn(&QuestCompleted) + Send + Sync + 'static,
    {
        self.shared.quest_completed.connect(handler)
    }

    /// Reload quests every time `level_changed` fires
    pub fn watch_level(&self, level_changed: &Signal<i32>) -> Connection {
        let weak = Arc::downgrade(&self.shared);
        level_changed.connect(move |level| {
            if let Some(shared) = weak.upgrade() {
                shared.load_at(*level);
            }
        })
    }

    pub fn progress(&self, quest_id: &str) -> Option<StageProgress> {
        self.shared.store.get(quest_id)
    }

    pub fn is_live(&self, quest_id: &str, index: usize) -> bool {
        self.shared.lock().live.contains_key(&StageKey::new(quest_id, index))
    }

    pub fn live_count(&self) -> usize {
        self.shared.lock().live.len()
    }

    /// World event bus handed to stage setups
    pub fn world(&self) -> &Signal<WorldEvent> {
        &self.shared.collaborators.world
    }

    pub fn registry(&self) -> &Arc<QuestRegistry> {
        &self.shared.registry
    }

    /// Dispose every live stage and stop accepting loads
    pub fn shutdown(&self) {
        self.shared.shutdown();
    }
}

impl Drop for QuestEngine {
    fn drop(&mut self) {
        self.shared.shutdown();
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn load_at(self: &Arc<Self>, level: i32) {
        let mut armed = Vec::new();
        let mut resumed = Vec::new();

        {
            let mut state = self.lock();
            if state.shut_down {
                return;
            }
            state.last_level = Some(level);

            for quest in self.registry.eligible(level) {
                if let Some(ref previous) = quest.previous {
                    if !self.store.get(previous).is_some_and(|p| p.is_completed()) {
                        continue;
                    }
                }

                let index = match self.store.get(&quest.id) {
                    Some(StageProgress::Completed) => {
                        if !state.finished.contains(&quest.id) {
                            resumed.push(quest.clone());
                        }
                        continue;
                    }
                    Some(StageProgress::Stage(index)) => index,
                    None => 0,
                };

                if index >= quest.stage_count() {
                    warn!(
                        "Stored stage {} of '{}' is past its {} stages; skipping",
                        index,
                        quest.id,
                        quest.stage_count()
                    );
                    continue;
                }

                let key = StageKey::new(&quest.id, index);
                if let Some(live_id) = state.claim(&key) {
                    armed.push((quest.clone(), key, live_id));
                }
            }
        }

        debug!(
            "Loaded quests at level {}: {} stages armed, {} completed quests resumed",
            level,
            armed.len(),
            resumed.len()
        );

        for (quest, key, live_id) in armed {
            self.arm(&quest, key, live_id);
        }
        for quest in resumed {
            self.finish_quest(&quest, true);
        }
    }

    /// Wire a freshly claimed stage: completion handler, announcement, setup.
    fn arm(self: &Arc<Self>, quest: &Arc<Quest>, key: StageKey, live_id: u64) {
        let (Some(stage), Some(completed)) =
            (quest.stage(key.index).cloned(), self.completions.get(&key).cloned())
        else {
            self.lock().live.remove(&key);
            return;
        };

        let completion = {
            let weak = Arc::downgrade(self);
            let key = key.clone();
            completed.connect(move |_| {
                if let Some(shared) = weak.upgrade() {
                    shared.complete(&key, Some(live_id));
                }
            })
        };

        let orphaned = {
            let mut state = self.lock();
            match state.current_mut(&key, live_id) {
                Some(live) => {
                    live.completion = Some(completion);
                    None
                }
                None => Some(completion),
            }
        };
        if let Some(completion) = orphaned {
            // Completed or torn down while connecting
            completion.disconnect();
            return;
        }

        self.announce(quest, key.index);

        let Some(on_reached) = stage.setup().cloned() else {
            self.install_setup(&key, live_id, Setup::Ready(None));
            return;
        };

        let ctx = StageContext {
            quest_id: quest.id.clone(),
            index: key.index,
            stage: stage.clone(),
            completed,
            world: self.collaborators.world.clone(),
            dialogue: self.collaborators.dialogue.clone(),
        };

        // Drive the setup here until it first suspends. Outside a runtime the
        // first poll still runs, so setups must not create Tokio resources
        // before their first suspension point.
        let mut setup = on_reached(ctx);
        let mut cx = Context::from_waker(noop_waker_ref());
        match setup.poll_unpin(&mut cx) {
            Poll::Ready(disposer) => self.install_setup(&key, live_id, Setup::Ready(disposer)),
            Poll::Pending => match Handle::try_current() {
                Ok(runtime) => {
                    let weak = Arc::downgrade(self);
                    let task_key = key.clone();
                    let task = runtime.spawn(async move {
                        let disposer = setup.await;
                        match weak.upgrade() {
                            Some(shared) => shared.setup_finished(&task_key, live_id, disposer),
                            None => {
                                if let Some(dispose) = disposer {
                                    dispose();
                                }
                            }
                        }
                    });
                    self.install_setup(&key, live_id, Setup::Pending(Some(task.abort_handle())));
                }
                Err(e) => {
                    error!(
                        "Setup for stage {} of '{}' suspended outside a Tokio runtime: {}",
                        key.index, key.quest_id, e
                    );
                    self.install_setup(&key, live_id, Setup::Ready(None));
                }
            },
        }
    }

    /// Record the setup of a live period, or undo it if the period is over
    fn install_setup(&self, key: &StageKey, live_id: u64, setup: Setup) {
        let leftover = {
            let mut state = self.lock();
            match state.current_mut(key, live_id) {
                // A spawned task may already have reported back
                Some(live) if matches!(live.setup, Setup::Pending(None)) => {
                    live.setup = setup;
                    None
                }
                Some(_) => None,
                None => Some(setup),
            }
        };

        if let Some(setup) = leftover {
            setup.release();
        }
    }

    /// Called from a setup task once the suspended setup returns
    fn setup_finished(&self, key: &StageKey, live_id: u64, disposer: Option<Disposer>) {
        let leftover = {
            let mut state = self.lock();
            match state.current_mut(key, live_id) {
                Some(live) => {
                    live.setup = Setup::Ready(disposer);
                    None
                }
                None => disposer,
            }
        };

        if let Some(dispose) = leftover {
            dispose();
        }
    }

    /// Completion handler body, shared with network-originated completions.
    fn complete(self: &Arc<Self>, key: &StageKey, live_id: Option<u64>) -> Advance {
        let Some(quest) = self.registry.get(&key.quest_id).cloned() else {
            warn!("Completion for unknown quest '{}'", key.quest_id);
            return Advance::Rejected;
        };

        let (outcome, released, next) = {
            let mut state = self.lock();
            let released = state.take(key, live_id);
            if live_id.is_some() && released.is_none() {
                // Handler from a live period that has already ended
                return Advance::Rejected;
            }

            let outcome = progression::complete_stage(
                self.store.as_ref(),
                &quest.id,
                quest.stage_count(),
                key.index,
            );

            let next = match outcome {
                Advance::Advanced(index) if released.is_some() => {
                    let next_key = StageKey::new(&quest.id, index);
                    state.claim(&next_key).map(|id| (next_key, id))
                }
                _ => None,
            };

            if outcome == Advance::Completed {
                state.finished.insert(quest.id.clone());
            }

            (outcome, released, next)
        };

        if let Some(live) = released {
            live.release();
        }

        match outcome {
            Advance::Advanced(index) => {
                debug!("Quest '{}' advanced to stage {}", quest.id, index);
                // Stages advanced while not live are armed by the next load
                if let Some((next_key, id)) = next {
                    self.arm(&quest, next_key, id);
                }
            }
            Advance::Completed => self.finish_quest(&quest, false),
            Advance::AlreadyComplete => {
                debug!("Ignoring completion of stage {} of finished quest '{}'", key.index, quest.id);
            }
            Advance::Rejected => {
                debug!("Rejected stale completion of stage {} of '{}'", key.index, quest.id);
            }
        }

        outcome
    }

    fn announce(&self, quest: &Quest, index: usize) {
        let (Some(stage), Some(completed)) = (
            quest.stage(index).cloned(),
            self.completions.get(&StageKey::new(&quest.id, index)).cloned(),
        ) else {
            return;
        };
        info!("Stage reached: {} [{}] {}", quest.id, index, stage.description);

        if let Some(ref analytics) = self.collaborators.analytics {
            let label = format!("{}: {}", quest.id, stage.description);
            if let Err(e) = analytics.log_step(index, &label) {
                warn!("Analytics step for '{}' failed: {}", quest.id, e);
            }
        }

        self.stage_reached.fire(&StageReached {
            quest_id: quest.id.clone(),
            index,
            stage,
            completed,
        });
    }

    /// Terminal transition. A resumed completion only re-broadcasts.
    fn finish_quest(self: &Arc<Self>, quest: &Quest, resumed: bool) {
        if resumed {
            debug!("Quest '{}' already completed in storage", quest.id);
        } else {
            info!("Quest completed: {} ({})", quest.name, quest.id);
        }

        self.quest_completed.fire(&QuestCompleted {
            quest_id: quest.id.clone(),
            resumed,
        });

        if resumed {
            return;
        }

        self.grant_rewards(quest);

        if let (Some(dialogue), Some(handle)) =
            (&self.collaborators.dialogue, &quest.completion_dialogue)
        {
            dialogue.present(handle);
        }

        let unlocks_chain = self
            .registry
            .all()
            .any(|(_, q)| q.previous.as_deref() == Some(quest.id.as_str()));
        if unlocks_chain {
            let level = self.lock().last_level;
            if let Some(level) = level {
                self.load_at(level);
            }
        }
    }

    /// Best effort: the store write has already happened and is not undone
    fn grant_rewards(&self, quest: &Quest) {
        let reward = &quest.reward;
        let Some(ref rewards) = self.collaborators.rewards else {
            if !reward.is_empty() {
                warn!("No reward dispatcher; rewards for '{}' were not granted", quest.id);
            }
            return;
        };

        if let Some(xp) = reward.xp {
            if let Err(e) = rewards.grant_xp(xp) {
                warn!("Failed to grant {} xp for '{}': {}", xp, quest.id, e);
            }
        }

        if let Some(gold) = reward.gold {
            if let Err(e) = rewards.grant_gold(gold) {
                warn!("Failed to grant {} gold for '{}': {}", gold, quest.id, e);
            }
        }

        for item in &reward.items {
            if let Err(e) = rewards.grant_item(&item.item_id, item.count) {
                warn!("Failed to grant {}x {} for '{}': {}", item.count, item.item_id, quest.id, e);
            }
        }
    }

    fn shutdown(&self) {
        let drained: Vec<LiveStage> = {
            let mut state = self.lock();
            state.shut_down = true;
            state.live.drain().map(|(_, live)| live).collect()
        };

        if !drained.is_empty() {
            debug!("Tearing down {} live stages", drained.len());
        }
        for live in drained {
            live.release();
        }
    }
}
