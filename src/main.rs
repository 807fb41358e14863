use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use quest_engine::config::Config;
use quest_engine::db::{Database, SqliteProgressionStore};
use quest_engine::Signal;
use quest_engine::profile::PlayerProfile;
use quest_engine::quest::{
    Analytics, CollaboratorError, Collaborators, DialogueBoard, DialogueHandle, QuestEngine,
    QuestRegistry, WorldEvent,
};

/// Step analytics written to the log
struct LogAnalytics;

impl Analytics for LogAnalytics {
    fn log_step(&self, step_index: usize, label: &str) -> Result<(), CollaboratorError> {
        info!(target: "analytics", step = step_index, "{}", label);
        Ok(())
    }
}

#[derive(Debug, PartialEq)]
enum Command {
    Kill { monster: String, count: u32 },
    Collect { item: String, count: i32 },
    Talk(String),
    Reach(String),
    Finish(String),
    Complete { quest: String, stage: usize },
    Status,
    Quit,
}

impl Command {
    fn parse(line: &str) -> Result<Self, String> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Err("empty command".to_string());
        };
        let arg = words.next();
        let number = words.next();

        let required = |what: &str| arg.map(str::to_string).ok_or_else(|| format!("usage: {} <{}>", verb, what));
        let count = || -> Result<i32, String> {
            number.map_or(Ok(1), |n| n.parse().map_err(|_| format!("not a count: {}", n)))
        };

        match verb {
            "kill" => Ok(Command::Kill {
                monster: required("monster")?,
                count: count()?.max(1) as u32,
            }),
            "collect" => Ok(Command::Collect { item: required("item")?, count: count()?.max(1) }),
            "talk" => Ok(Command::Talk(required("npc")?)),
            "reach" => Ok(Command::Reach(required("location")?)),
            "finish" => Ok(Command::Finish(required("dialogue")?)),
            "complete" => {
                let quest = required("quest")?;
                let stage = number
                    .ok_or_else(|| "usage: complete <quest> <stage>".to_string())?
                    .parse()
                    .map_err(|_| "stage must be an index".to_string())?;
                Ok(Command::Complete { quest, stage })
            }
            "status" => Ok(Command::Status),
            "quit" | "exit" => Ok(Command::Quit),
            other => Err(format!("unknown command: {}", other)),
        }
    }
}

fn print_status(engine: &QuestEngine, profile: &PlayerProfile) {
    println!(
        "level {} ({} xp), {} gold, inventory {:?}",
        profile.level(),
        profile.xp(),
        profile.gold(),
        profile.inventory()
    );

    for (id, quest) in engine.registry().all() {
        let state = match engine.progress(id).map(|progress| progress.stage_index()) {
            Some(None) => "completed".to_string(),
            Some(Some(index)) => format!("stage {}/{}", index, quest.stage_count()),
            None if quest.required_level > profile.level() => {
                format!("requires level {}", quest.required_level)
            }
            None => format!("stage 0/{}", quest.stage_count()),
        };
        let live: Vec<usize> = (0..quest.stage_count()).filter(|i| engine.is_live(id, *i)).collect();
        println!("  {} ({}): {}, live {:?}", quest.name, id, state, live);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let db = Arc::new(
        Database::new(&config.database_url)
            .await
            .with_context(|| format!("opening {}", config.database_url))?,
    );
    let store = Arc::new(SqliteProgressionStore::open(db, config.save_id.clone()).await?);

    let registry = QuestRegistry::load_from_directory(&config.data_dir).context("loading quests")?;
    let registry = Arc::new(registry);

    let profile = Arc::new(PlayerProfile::new(config.starting_xp));
    let board = Arc::new(DialogueBoard::new());
    let world: Signal<WorldEvent> = Signal::new();

    let engine = QuestEngine::new(
        registry,
        store.clone(),
        Collaborators {
            rewards: Some(profile.clone()),
            dialogue: Some(board.clone()),
            analytics: Some(Arc::new(LogAnalytics)),
            level: Some(profile.clone()),
            world: world.clone(),
        },
    );

    let _level_watch = engine.watch_level(&profile.level_changed);
    let _reached = engine.on_stage_reached(|event| {
        println!("> {}: {}", event.quest_id, event.stage.description);
    });
    let _completed = engine.on_quest_completed(|event| {
        if !event.resumed {
            println!("> quest complete: {}", event.quest_id);
        }
    });
    let _presented = board.presented.connect(|handle: &DialogueHandle| {
        println!("> dialogue: {} (type `finish {}` when done)", handle, handle);
    });

    // Spawn auto-save loop (every 30 seconds)
    let autosave = {
        let store = store.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(30));
            loop {
                interval.tick().await;
                store.flush().await;
            }
        })
    };

    engine.load_available_quests();
    info!(
        "Save '{}' ready: {} quests, {} stages live",
        store.save_id(),
        engine.registry().len(),
        engine.live_count()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let command = match Command::parse(&line) {
            Ok(command) => command,
            Err(e) => {
                println!("{}", e);
                continue;
            }
        };

        match command {
            Command::Kill { monster, count } => {
                for _ in 0..count {
                    world.fire(&WorldEvent::MonsterKilled { entity_type: monster.clone(), level: 1 });
                }
            }
            Command::Collect { item, count } => {
                world.fire(&WorldEvent::ItemCollected { item_id: item, count });
            }
            Command::Talk(npc) => world.fire(&WorldEvent::NpcInteraction { npc_id: npc }),
            Command::Reach(location) => world.fire(&WorldEvent::LocationReached {
                location_id: location,
                x: 0,
                y: 0,
            }),
            Command::Finish(dialogue) => board.finish(&DialogueHandle::new(dialogue)),
            Command::Complete { quest, stage } => {
                let outcome = engine.complete_stage(&quest, stage);
                if outcome.is_transition() {
                    info!("'{}': {:?}", quest, outcome);
                } else {
                    warn!("Completion of stage {} of '{}' was not applied: {:?}", stage, quest, outcome);
                }
            }
            Command::Status => print_status(&engine, &profile),
            Command::Quit => break,
        }
    }

    autosave.abort();
    engine.shutdown();
    store.flush().await;
    info!("Progress saved");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            Command::parse("kill pig 3"),
            Ok(Command::Kill { monster: "pig".into(), count: 3 })
        );
        assert_eq!(
            Command::parse("collect slime_core"),
            Ok(Command::Collect { item: "slime_core".into(), count: 1 })
        );
        assert_eq!(Command::parse("  talk   elder "), Ok(Command::Talk("elder".into())));
        assert_eq!(
            Command::parse("complete first_steps 2"),
            Ok(Command::Complete { quest: "first_steps".into(), stage: 2 })
        );
        assert_eq!(Command::parse("exit"), Ok(Command::Quit));
    }

    #[test]
    fn test_parse_errors() {
        assert!(Command::parse("").is_err());
        assert!(Command::parse("talk").is_err());
        assert!(Command::parse("kill pig lots").is_err());
        assert!(Command::parse("complete first_steps").is_err());
        assert!(Command::parse("dance").is_err());
    }
}
