//! Built-in stage setups
//!
//! Turns a declarative `StageTrigger` into the setup the engine runs when a
//! stage goes live. Each setup connects to a world or dialogue signal, fires
//! the context's `completed` signal once the condition holds, and returns a
//! disposer that disconnects it again.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use futures::FutureExt;
use tracing::warn;

use super::api::StageContext;
use super::definition::{DialogueHandle, Disposer, OnReached, StageTrigger};

/// Setup for a stage completed by `trigger`
pub fn setup_for(trigger: StageTrigger) -> OnReached {
    Arc::new(move |ctx: StageContext| {
        let disposer = wire(&trigger, &ctx);
        async move { disposer }.boxed()
    })
}

fn wire(trigger: &StageTrigger, ctx: &StageContext) -> Option<Disposer> {
    match trigger {
        StageTrigger::Objective { count, .. } => Some(wire_objective(trigger, *count, ctx)),
        StageTrigger::DialogueFinished(handle) => wire_dialogue(handle.as_ref(), ctx),
    }
}

fn wire_objective(trigger: &StageTrigger, count: i32, ctx: &StageContext) -> Disposer {
    let progress = Arc::new(AtomicI32::new(0));
    let fired = Arc::new(AtomicBool::new(false));
    let trigger = trigger.clone();
    let completed = ctx.completed.clone();

    let conn = ctx.world.connect(move |event| {
        let amount = event.progress_toward(&trigger);
        if amount <= 0 {
            return;
        }
        let total = progress.fetch_add(amount, Ordering::SeqCst) + amount;
        if total >= count && !fired.swap(true, Ordering::SeqCst) {
            completed.fire(&());
        }
    });

    Box::new(move || conn.disconnect())
}

fn wire_dialogue(handle: Option<&DialogueHandle>, ctx: &StageContext) -> Option<Disposer> {
    let Some(handle) = handle.or(ctx.stage.dialogue.as_ref()) else {
        warn!(
            "Stage {} of '{}' waits on a dialogue but has none",
            ctx.index, ctx.quest_id
        );
        return None;
    };
    let Some(ref dialogue) = ctx.dialogue else {
        warn!(
            "No dialogue collaborator; stage {} of '{}' must be completed externally",
            ctx.index, ctx.quest_id
        );
        return None;
    };

    let fired = Arc::new(AtomicBool::new(false));
    let completed = ctx.completed.clone();
    let conn = dialogue.finished(handle).connect(move |_| {
        if !fired.swap(true, Ordering::SeqCst) {
            completed.fire(&());
        }
    });

    Some(Box::new(move || conn.disconnect()))
}
