//! SQLite persistence
//!
//! The `quest_progress` table holds one row per (save, quest) with the raw
//! stage index, and `SqliteProgressionStore` serves it to the engine.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

use crate::quest::state::{ProgressionStore, StageProgress};

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        // Run migrations
        Self::migrate(&pool).await?;

        Ok(Self { pool })
    }

    async fn migrate(pool: &SqlitePool) -> Result<(), sqlx::Error> {
        // stage_index holds the stage a quest is on, or -1 once completed
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS quest_progress (
                save_id TEXT NOT NULL,
                quest_id TEXT NOT NULL,
                stage_index INTEGER NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY(save_id, quest_id)
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_quest_progress_save ON quest_progress(save_id)")
            .execute(pool)
            .await?;

        Ok(())
    }

    /// Raw stage indices of every quest in a save
    pub async fn load_progress(&self, save_id: &str) -> Result<HashMap<String, i32>, sqlx::Error> {
        let rows = sqlx::query("SELECT quest_id, stage_index FROM quest_progress WHERE save_id = ?")
            .bind(save_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| (row.get::<String, _>("quest_id"), row.get::<i32, _>("stage_index")))
            .collect())
    }

    pub async fn save_progress(
        &self,
        save_id: &str,
        quest_id: &str,
        stage_index: i32,
    ) -> Result<(), sqlx::Error> {
        let now = chrono::Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO quest_progress (save_id, quest_id, stage_index, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(save_id, quest_id) DO UPDATE SET
                stage_index = excluded.stage_index,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(save_id)
        .bind(quest_id)
        .bind(stage_index)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Remove every progress row of a save
    pub async fn delete_save(&self, save_id: &str) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM quest_progress WHERE save_id = ?")
            .bind(save_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

enum WriteOp {
    Save { quest_id: String, stage_index: i32 },
    Flush(oneshot::Sender<()>),
}

/// Progression store backed by the `quest_progress` table.
///
/// Reads come from an in-memory cache loaded at open. Writes update the cache
/// before returning and are persisted in order by a background task.
pub struct SqliteProgressionStore {
    save_id: String,
    cache: DashMap<String, StageProgress>,
    writes: mpsc::UnboundedSender<WriteOp>,
}

impl SqliteProgressionStore {
    /// Load a save and start its writer task. Must be called inside a Tokio runtime.
    pub async fn open(db: Arc<Database>, save_id: impl Into<String>) -> Result<Self, sqlx::Error> {
        let save_id = save_id.into();
        let cache = DashMap::new();

        for (quest_id, raw) in db.load_progress(&save_id).await? {
            match StageProgress::from_raw(raw) {
                Some(progress) => {
                    cache.insert(quest_id, progress);
                }
                None => warn!("Ignoring invalid stored progress {} for quest '{}'", raw, quest_id),
            }
        }
        info!("Loaded {} quest progress entries for save '{}'", cache.len(), save_id);

        let (writes, rx) = mpsc::unbounded_channel();
        tokio::spawn(write_back(db, save_id.clone(), rx));

        Ok(Self { save_id, cache, writes })
    }

    pub fn save_id(&self) -> &str {
        &self.save_id
    }

    /// Wait until every write queued so far has reached the database
    pub async fn flush(&self) {
        let (done, rx) = oneshot::channel();
        if self.writes.send(WriteOp::Flush(done)).is_err() {
            return;
        }
        let _ = rx.await;
    }
}

impl ProgressionStore for SqliteProgressionStore {
    fn get(&self, quest_id: &str) -> Option<StageProgress> {
        self.cache.get(quest_id).map(|entry| *entry)
    }

    fn set(&self, quest_id: &str, progress: StageProgress) {
        self.cache.insert(quest_id.to_string(), progress);

        let op = WriteOp::Save {
            quest_id: quest_id.to_string(),
            stage_index: progress.to_raw(),
        };
        if self.writes.send(op).is_err() {
            error!("Progress writer stopped; '{}' will not be persisted", quest_id);
        }
    }
}

async fn write_back(db: Arc<Database>, save_id: String, mut rx: mpsc::UnboundedReceiver<WriteOp>) {
    while let Some(op) = rx.recv().await {
        match op {
            WriteOp::Save { quest_id, stage_index } => {
                if let Err(e) = db.save_progress(&save_id, &quest_id, stage_index).await {
                    error!("Failed to save progress of '{}' for save '{}': {}", quest_id, save_id, e);
                }
            }
            WriteOp::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open_db(dir: &TempDir) -> Arc<Database> {
        let url = format!("sqlite:{}?mode=rwc", dir.path().join("quests.db").display());
        Arc::new(Database::new(&url).await.unwrap())
    }

    #[tokio::test]
    async fn test_progress_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir).await;

        let store = SqliteProgressionStore::open(db.clone(), "slot1").await.unwrap();
        assert_eq!(store.get("a"), None);

        store.set("a", StageProgress::Stage(1));
        store.set("a", StageProgress::Stage(2));
        store.set("b", StageProgress::Completed);
        assert_eq!(store.get("a"), Some(StageProgress::Stage(2)));
        store.flush().await;

        let reopened = SqliteProgressionStore::open(db.clone(), "slot1").await.unwrap();
        assert_eq!(reopened.get("a"), Some(StageProgress::Stage(2)));
        assert_eq!(reopened.get("b"), Some(StageProgress::Completed));

        let other = SqliteProgressionStore::open(db, "slot2").await.unwrap();
        assert_eq!(other.get("a"), None);
    }

    #[tokio::test]
    async fn test_invalid_rows_are_skipped() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir).await;
        db.save_progress("slot", "bad", -7).await.unwrap();
        db.save_progress("slot", "good", 3).await.unwrap();

        let store = SqliteProgressionStore::open(db.clone(), "slot").await.unwrap();
        assert_eq!(store.get("bad"), None);
        assert_eq!(store.get("good"), Some(StageProgress::Stage(3)));

        assert_eq!(db.delete_save("slot").await.unwrap(), 2);
        assert!(db.load_progress("slot").await.unwrap().is_empty());
    }
}
