//! Player profile
//!
//! Experience, gold and inventory for the player a save belongs to. Quest
//! rewards land here and level-ups are broadcast on `level_changed`.

use std::sync::{Mutex, PoisonError};

use dashmap::DashMap;
use tracing::info;

use crate::quest::api::{CollaboratorError, LevelProvider, RewardDispatcher};
use crate::signal::Signal;

pub const MAX_LEVEL: i32 = 99;

/// Total XP required to reach a level (RuneScape curve)
pub fn total_xp_for_level(level: i32) -> i64 {
    if level <= 1 {
        return 0;
    }
    let mut total = 0.0;
    for l in 1..level.min(MAX_LEVEL) {
        total += (l as f64 + 300.0 * 2.0_f64.powf(l as f64 / 7.0)) / 4.0;
    }
    total.floor() as i64
}

/// Level for a total XP amount (inverse of total_xp_for_level)
pub fn level_for_xp(xp: i64) -> i32 {
    let mut low = 1;
    let mut high = MAX_LEVEL;

    while low < high {
        let mid = (low + high + 1) / 2;
        if total_xp_for_level(mid) <= xp {
            low = mid;
        } else {
            high = mid - 1;
        }
    }
    low
}

#[derive(Debug)]
struct Ledger {
    xp: i64,
    gold: i64,
}

#[derive(Debug)]
pub struct PlayerProfile {
    ledger: Mutex<Ledger>,
    inventory: DashMap<String, i32>,
    /// Fired with the new level after experience crosses a level boundary
    pub level_changed: Signal<i32>,
}

impl PlayerProfile {
    pub fn new(starting_xp: i64) -> Self {
        Self {
            ledger: Mutex::new(Ledger {
                xp: starting_xp.max(0),
                gold: 0,
            }),
            inventory: DashMap::new(),
            level_changed: Signal::new(),
        }
    }

    fn ledger(&self) -> std::sync::MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn xp(&self) -> i64 {
        self.ledger().xp
    }

    pub fn level(&self) -> i32 {
        level_for_xp(self.xp())
    }

    pub fn gold(&self) -> i64 {
        self.ledger().gold
    }

    pub fn item_count(&self, item_id: &str) -> i32 {
        self.inventory.get(item_id).map(|count| *count).unwrap_or(0)
    }

    /// Inventory contents sorted by item id
    pub fn inventory(&self) -> Vec<(String, i32)> {
        let mut items: Vec<(String, i32)> = self
            .inventory
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        items.sort();
        items
    }

    /// Add experience. Returns the new level if it changed.
    pub fn add_xp(&self, amount: i64) -> Result<Option<i32>, CollaboratorError> {
        if amount < 0 {
            return Err(CollaboratorError::Reward(format!("negative xp {}", amount)));
        }

        let (old_level, new_level) = {
            let mut ledger = self.ledger();
            let old_level = level_for_xp(ledger.xp);
            ledger.xp = ledger.xp.saturating_add(amount);
            (old_level, level_for_xp(ledger.xp))
        };

        if new_level == old_level {
            return Ok(None);
        }

        info!("Level up: {} -> {}", old_level, new_level);
        self.level_changed.fire(&new_level);
        Ok(Some(new_level))
    }
}

impl Default for PlayerProfile {
    fn default() -> Self {
        Self::new(0)
    }
}

impl RewardDispatcher for PlayerProfile {
    fn grant_xp(&self, amount: i64) -> Result<(), CollaboratorError> {
        self.add_xp(amount).map(|_| ())
    }

    fn grant_gold(&self, amount: i64) -> Result<(), CollaboratorError> {
        if amount < 0 {
            return Err(CollaboratorError::Reward(format!("negative gold {}", amount)));
        }
        let mut ledger = self.ledger();
        ledger.gold = ledger.gold.saturating_add(amount);
        Ok(())
    }

    fn grant_item(&self, item_id: &str, amount: i32) -> Result<(), CollaboratorError> {
        if amount <= 0 {
            return Err(CollaboratorError::Reward(format!(
                "invalid amount {} of '{}'",
                amount, item_id
            )));
        }
        *self.inventory.entry(item_id.to_string()).or_insert(0) += amount;
        Ok(())
    }
}

impl LevelProvider for PlayerProfile {
    fn current_level(&self) -> Option<i32> {
        Some(self.level())
    }
}
