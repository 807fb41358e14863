//! In-process dialogue collaborator
//!
//! Keeps one `finished` signal per dialogue handle and a `presented` signal
//! a UI can listen to. Text and typing are someone else's concern.

use dashmap::DashMap;
use tracing::debug;

use super::api::DialogueCollaborator;
use super::definition::DialogueHandle;
use crate::signal::Signal;

#[derive(Debug, Default)]
pub struct DialogueBoard {
    finished: DashMap<DialogueHandle, Signal<()>>,
    /// Fired whenever the engine asks for a dialogue to be shown
    pub presented: Signal<DialogueHandle>,
}

impl DialogueBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report that `handle` was read to the end
    pub fn finish(&self, handle: &DialogueHandle) {
        debug!("Dialogue finished: {}", handle);
        // Clone out of the map so no shard lock is held during dispatch
        let signal = self.finished.get(handle).map(|entry| entry.value().clone());
        if let Some(signal) = signal {
            signal.fire(&());
        }
    }
}

impl DialogueCollaborator for DialogueBoard {
    fn present(&self, handle: &DialogueHandle) {
        debug!("Presenting dialogue: {}", handle);
        self.presented.fire(handle);
    }

    fn finished(&self, handle: &DialogueHandle) -> Signal<()> {
        self.finished.entry(handle.clone()).or_default().clone()
    }
}
