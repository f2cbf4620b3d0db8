//! Source registry: owns every active source, grouped by category.
//!
//! Four collections live behind one mutex:
//! - **Layers**: background ambience, any number, insertion ordered
//! - **Buttons**: one-shot sounds, separate id namespace
//! - **Queue**: the current item plus a FIFO of pending items
//! - **TTS**: a single slot
//!
//! A source is held by at most one collection; adding it elsewhere detaches
//! it first. Critical sections only move handles around. Source cleanup and
//! queue-empty callbacks always run after the lock is released.

use crate::source::{Category, SourceHandle};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info};
use uuid::Uuid;

/// Identifier returned by `add_layer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LayerId(pub Uuid);

impl LayerId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier returned by `add_button_sound`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ButtonId(pub Uuid);

impl ButtonId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ButtonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Called when the queue runs dry.
pub type QueueEmptyCallback = Arc<dyn Fn() + Send + Sync>;

/// Point-in-time copy of everything that should be mixed.
pub type Snapshot = Vec<(Category, SourceHandle)>;

#[derive(Default)]
struct Collections {
    layers: Vec<(LayerId, SourceHandle)>,
    buttons: Vec<(ButtonId, SourceHandle)>,
    current: Option<SourceHandle>,
    pending: VecDeque<SourceHandle>,
    tts: Option<SourceHandle>,
    queue_empty: Vec<QueueEmptyCallback>,
}

impl Collections {
    /// Remove `source` from wherever it is held, without cleaning it up.
    fn detach(&mut self, source: &SourceHandle) -> Option<Category> {
        if let Some(pos) = self.layers.iter().position(|(_, s)| s == source) {
            self.layers.remove(pos);
            return Some(Category::Layer);
        }
        if let Some(pos) = self.buttons.iter().position(|(_, s)| s == source) {
            self.buttons.remove(pos);
            return Some(Category::Button);
        }
        if self.tts.as_ref() == Some(source) {
            self.tts = None;
            return Some(Category::Tts);
        }
        if self.current.as_ref() == Some(source) {
            self.current = None;
            return Some(Category::Queue);
        }
        if let Some(pos) = self.pending.iter().position(|s| s == source) {
            self.pending.remove(pos);
            return Some(Category::Queue);
        }
        None
    }

    /// Decide the queue's next state once the current item is gone.
    ///
    /// Either promotes the FIFO head, or hands back the callbacks to fire.
    fn advance_queue(&mut self) -> Vec<QueueEmptyCallback> {
        debug_assert!(self.current.is_none());
        match self.pending.pop_front() {
            Some(next) => {
                info!("Queue advanced to source {}", next.id());
                self.current = Some(next);
                Vec::new()
            }
            None => {
                info!("Queue empty");
                self.queue_empty.clone()
            }
        }
    }
}

/// Registry of all sources for one session.
#[derive(Default)]
pub struct SourceRegistry {
    state: Mutex<Collections>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Collections> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // === Layers ===

    /// Register a background layer, returning its id.
    pub fn add_layer(&self, source: SourceHandle) -> LayerId {
        let id = LayerId::new();
        let mut state = self.lock();
        state.detach(&source);
        debug!("Added layer {} (source {})", id, source.id());
        state.layers.push((id, source));
        id
    }

    /// Remove and clean up a layer. Unknown ids are ignored.
    pub fn remove_layer(&self, id: LayerId) {
        let removed = {
            let mut state = self.lock();
            let pos = state.layers.iter().position(|(lid, _)| *lid == id);
            pos.map(|pos| state.layers.remove(pos).1)
        };
        if let Some(source) = removed {
            debug!("Removed layer {}", id);
            source.cleanup();
        }
    }

    /// Remove a layer without cleaning it up, handing the source back.
    pub fn detach_layer(&self, id: LayerId) -> Option<SourceHandle> {
        let mut state = self.lock();
        let pos = state.layers.iter().position(|(lid, _)| *lid == id)?;
        debug!("Detached layer {}", id);
        Some(state.layers.remove(pos).1)
    }

    pub fn has_layer(&self, id: LayerId) -> bool {
        self.lock().layers.iter().any(|(lid, _)| *lid == id)
    }

    /// The layer id under which `source` is registered, if any.
    pub fn layer_id_of(&self, source: &SourceHandle) -> Option<LayerId> {
        self.lock()
            .layers
            .iter()
            .find(|(_, s)| s == source)
            .map(|(id, _)| *id)
    }

    pub fn layer_count(&self) -> usize {
        self.lock().layers.len()
    }

    // === Buttons ===

    /// Register a one-shot button sound, returning its id.
    pub fn add_button_sound(&self, source: SourceHandle) -> ButtonId {
        let id = ButtonId::new();
        let mut state = self.lock();
        state.detach(&source);
        debug!("Added button sound {} (source {})", id, source.id());
        state.buttons.push((id, source));
        id
    }

    /// Remove and clean up a button sound. Unknown ids are ignored.
    pub fn remove_button_sound(&self, id: ButtonId) {
        let removed = {
            let mut state = self.lock();
            let pos = state.buttons.iter().position(|(bid, _)| *bid == id);
            pos.map(|pos| state.buttons.remove(pos).1)
        };
        if let Some(source) = removed {
            debug!("Removed button sound {}", id);
            source.cleanup();
        }
    }

    pub fn button_count(&self) -> usize {
        self.lock().buttons.len()
    }

    // === Queue ===

    /// Append to the queue. Plays immediately when nothing is current.
    pub fn add_to_queue(&self, source: SourceHandle) {
        let mut state = self.lock();
        state.detach(&source);
        if state.current.is_none() {
            info!("Queue playing source {}", source.id());
            state.current = Some(source);
        } else {
            debug!(
                "Queued source {} ({} pending)",
                source.id(),
                state.pending.len() + 1
            );
            state.pending.push_back(source);
        }
    }

    /// Replace the current queue item without touching pending items.
    pub fn set_queue_source(&self, source: Option<SourceHandle>) {
        let previous = {
            let mut state = self.lock();
            if let Some(source) = &source {
                state.detach(source);
            }
            std::mem::replace(&mut state.current, source)
        };
        if let Some(previous) = previous {
            previous.cleanup();
        }
    }

    /// Drop the current queue item without advancing.
    pub fn clear_queue_source(&self) {
        self.set_queue_source(None);
    }

    pub fn queue_source(&self) -> Option<SourceHandle> {
        self.lock().current.clone()
    }

    /// Number of items waiting behind the current one.
    pub fn queue_len(&self) -> usize {
        self.lock().pending.len()
    }

    /// Clean up the current item and everything pending.
    ///
    /// Queue-empty callbacks are not fired; this is a stop, not a finish.
    pub fn clear_queue(&self) {
        let drained: Vec<SourceHandle> = {
            let mut state = self.lock();
            let mut drained: Vec<_> = state.current.take().into_iter().collect();
            drained.extend(state.pending.drain(..));
            drained
        };
        if !drained.is_empty() {
            info!("Cleared queue ({} sources)", drained.len());
        }
        for source in drained {
            source.cleanup();
        }
    }

    /// Finish the current item early and advance.
    pub fn skip_queue(&self) {
        if let Some(current) = self.queue_source() {
            self.notify_track_finished(&current);
        }
    }

    /// Register a callback fired whenever the queue goes from playing to empty.
    pub fn on_queue_empty(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.lock().queue_empty.push(Arc::new(callback));
    }

    /// The current queue item finished on its own: clean it up and advance.
    ///
    /// Ignored when `source` is not the current item.
    pub fn notify_track_finished(&self, source: &SourceHandle) {
        let callbacks = {
            let mut state = self.lock();
            if state.current.as_ref() != Some(source) {
                return;
            }
            state.current = None;
            state.advance_queue()
        };
        source.cleanup();
        run_queue_empty(callbacks);
    }

    // === TTS ===

    /// Set or clear the TTS slot. The previous occupant is cleaned up.
    pub fn set_tts_track(&self, source: Option<SourceHandle>) {
        let previous = {
            let mut state = self.lock();
            if let Some(source) = &source {
                state.detach(source);
            }
            std::mem::replace(&mut state.tts, source)
        };
        if let Some(previous) = previous {
            debug!("Replaced TTS track {}", previous.id());
            previous.cleanup();
        }
    }

    pub fn tts_track(&self) -> Option<SourceHandle> {
        self.lock().tts.clone()
    }

    // === Whole registry ===

    /// Everything that should be mixed this tick.
    ///
    /// Order: layers, buttons, current queue item, TTS.
    pub fn get_playing_sounds(&self) -> Snapshot {
        let state = self.lock();
        let mut snapshot =
            Vec::with_capacity(state.layers.len() + state.buttons.len() + 2);
        snapshot.extend(
            state
                .layers
                .iter()
                .map(|(_, s)| (Category::Layer, s.clone())),
        );
        snapshot.extend(
            state
                .buttons
                .iter()
                .map(|(_, s)| (Category::Button, s.clone())),
        );
        if let Some(current) = &state.current {
            snapshot.push((Category::Queue, current.clone()));
        }
        if let Some(tts) = &state.tts {
            snapshot.push((Category::Tts, tts.clone()));
        }
        snapshot
    }

    /// Remove a finished source from whichever collection holds it.
    ///
    /// Finishing the current queue item advances the queue. Returns the
    /// category it was found in, or `None` if nothing held it.
    pub fn remove_finished_source(&self, source: &SourceHandle) -> Option<Category> {
        let (category, callbacks) = {
            let mut state = self.lock();
            let was_current = state.current.as_ref() == Some(source);
            let category = state.detach(source);
            let callbacks = if was_current {
                state.advance_queue()
            } else {
                Vec::new()
            };
            (category, callbacks)
        };
        if category.is_some() {
            source.cleanup();
        }
        run_queue_empty(callbacks);
        category
    }

    /// Clean up every source in every collection.
    pub fn cleanup_all(&self) {
        let drained: Vec<SourceHandle> = {
            let mut state = self.lock();
            let mut drained: Vec<SourceHandle> =
                state.layers.drain(..).map(|(_, s)| s).collect();
            drained.extend(state.buttons.drain(..).map(|(_, s)| s));
            drained.extend(state.current.take());
            drained.extend(state.pending.drain(..));
            drained.extend(state.tts.take());
            drained
        };
        info!("Cleaning up {} sources", drained.len());
        for source in drained {
            source.cleanup();
        }
    }
}

fn run_queue_empty(callbacks: Vec<QueueEmptyCallback>) {
    for callback in callbacks {
        if catch_unwind(AssertUnwindSafe(|| callback())).is_err() {
            error!("Queue-empty callback panicked");
        }
    }
}
