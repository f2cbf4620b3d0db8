//! Frame mixer: one fixed-size output frame per tick.
//!
//! Each call to [`FrameMixer::read`] runs one tick:
//! - **Dispatch**: snapshot the registry, submit a read for every source that
//!   does not already have one in flight
//! - **Prune**: cancel in-flight reads whose source left the registry; a
//!   pruned read that already started keeps the source out of dispatch until
//!   it returns, so no producer is ever read twice at once
//! - **Collect**: wait for reads until the tick's read deadline; late reads
//!   stay pending and are picked up on a later tick
//! - **Mix**: sum into a wide buffer, clip to `i16`
//! - **Finalize**: retire ended sources, notify observers, tell the registry
//!
//! The frame is always `FRAME_SIZE` bytes, silent when nothing plays. No
//! single source can stall or break the output: failed and panicking reads
//! count as end of stream, failing observers are logged and skipped.

use crate::frame::{silence, MixBuffer, FRAME_SIZE};
use crate::read_pool::{PendingRead, ReadOutcome, ReadPool};
use crate::registry::SourceRegistry;
use crate::source::{Category, SourceHandle, SourceId};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Errors constructing a mixer.
#[derive(Debug, thiserror::Error)]
pub enum MixerError {
    #[error("Failed to spawn mixer reader threads: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Mixer tuning.
#[derive(Debug, Clone)]
pub struct MixerConfig {
    /// Upper bound on how long one tick waits for reads
    pub read_timeout: Duration,
    /// Reader thread count
    pub read_workers: usize,
    /// How long shutdown waits for reader threads before detaching them
    pub shutdown_grace: Duration,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_millis(50),
            read_workers: 16,
            shutdown_grace: Duration::from_millis(100),
        }
    }
}

impl From<&voiceconf::MixerSettings> for MixerConfig {
    fn from(settings: &voiceconf::MixerSettings) -> Self {
        Self {
            read_timeout: Duration::from_millis(settings.read_timeout_ms),
            read_workers: settings.read_workers,
            ..Self::default()
        }
    }
}

/// Events observers can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    TrackEnd,
    QueueEnd,
}

/// What an observer is told.
#[derive(Debug, Clone)]
pub enum MixerEvent {
    /// Layers that ended this tick, in snapshot order
    TrackEnd { sources: Vec<SourceHandle> },
    /// The current queue item ended
    QueueEnd { source: SourceHandle },
}

impl MixerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            MixerEvent::TrackEnd { .. } => EventKind::TrackEnd,
            MixerEvent::QueueEnd { .. } => EventKind::QueueEnd,
        }
    }
}

pub type Observer = Arc<dyn Fn(&MixerEvent) -> anyhow::Result<()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Mixer counters.
#[derive(Debug, Default)]
pub struct MixerStats {
    ticks: AtomicU64,
    timeouts: AtomicU64,
    failures: AtomicU64,
    retired: AtomicU64,
}

/// Point-in-time copy of [`MixerStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MixerStatsSnapshot {
    pub ticks: u64,
    pub submissions: u64,
    /// Reads still running when a tick's deadline passed
    pub timeouts: u64,
    pub failures: u64,
    pub retired: u64,
}

/// Reads owned by the mixer between ticks.
#[derive(Default)]
struct InFlight {
    /// Reads for sources still in the registry
    pending: HashMap<SourceId, PendingRead>,
    /// Pruned reads that may still be running on a worker
    draining: HashMap<SourceId, PendingRead>,
}

pub struct FrameMixer {
    registry: Arc<SourceRegistry>,
    pool: ReadPool,
    config: MixerConfig,
    /// Serializes ticks; never held by `shutdown` or the accessors
    tick: Mutex<()>,
    in_flight: Mutex<InFlight>,
    observers: RwLock<Vec<(ObserverId, EventKind, Observer)>>,
    next_observer: AtomicU64,
    active: AtomicBool,
    shut_down: AtomicBool,
    stats: MixerStats,
}

impl FrameMixer {
    pub fn new(registry: Arc<SourceRegistry>, config: MixerConfig) -> Result<Self, MixerError> {
        let pool = ReadPool::new(config.read_workers)?;
        Ok(Self {
            registry,
            pool,
            config,
            tick: Mutex::new(()),
            in_flight: Mutex::new(InFlight::default()),
            observers: RwLock::new(Vec::new()),
            next_observer: AtomicU64::new(0),
            active: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
            stats: MixerStats::default(),
        })
    }

    pub fn registry(&self) -> &Arc<SourceRegistry> {
        &self.registry
    }

    // === Observers ===

    pub fn add_observer(
        &self,
        kind: EventKind,
        observer: impl Fn(&MixerEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> ObserverId {
        let id = ObserverId(self.next_observer.fetch_add(1, Ordering::Relaxed));
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, kind, Arc::new(observer)));
        id
    }

    /// Returns false if `id` was not registered.
    pub fn remove_observer(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.write().unwrap_or_else(PoisonError::into_inner);
        let before = observers.len();
        observers.retain(|(oid, _, _)| *oid != id);
        observers.len() != before
    }

    fn notify(&self, event: &MixerEvent) {
        // Copy out so observers may add/remove observers re-entrantly
        let matching: Vec<Observer> = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, kind, _)| *kind == event.kind())
            .map(|(_, _, observer)| observer.clone())
            .collect();

        for observer in matching {
            match catch_unwind(AssertUnwindSafe(|| observer(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("{:?} observer failed: {:#}", event.kind(), e),
                Err(_) => error!("{:?} observer panicked", event.kind()),
            }
        }
    }

    // === Ticking ===

    /// Produce the next output frame. Always exactly `FRAME_SIZE` bytes.
    pub fn read(&self) -> Bytes {
        if self.shut_down.load(Ordering::Acquire) {
            return silence();
        }
        let _tick = self.tick.lock().unwrap_or_else(PoisonError::into_inner);
        self.stats.ticks.fetch_add(1, Ordering::Relaxed);

        let snapshot = self.registry.get_playing_sounds();
        let mut buffer = MixBuffer::new();
        let mut retired: Vec<(Category, SourceHandle)> = Vec::new();
        let mut waiting = false;

        // Reads are taken out of the map so the lock is not held while waiting
        let mut collecting: Vec<(Category, SourceHandle, PendingRead)> =
            Vec::with_capacity(snapshot.len());
        {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            let InFlight { pending, draining } = &mut *in_flight;

            draining.retain(|_, read| read.poll().is_none());

            let live: HashSet<SourceId> = snapshot.iter().map(|(_, s)| s.id()).collect();
            let stale: Vec<SourceId> = pending
                .keys()
                .filter(|id| !live.contains(id))
                .copied()
                .collect();
            for id in stale {
                if let Some(read) = pending.remove(&id) {
                    read.cancel();
                    draining.insert(id, read);
                }
            }

            for (category, source) in &snapshot {
                let id = source.id();
                if draining.contains_key(&id) {
                    debug!("Source {} still finishing a pruned read", id);
                    waiting = true;
                    continue;
                }
                let read = match pending.remove(&id) {
                    Some(read) => read,
                    None => match self.pool.submit(source.clone()) {
                        Some(read) => read,
                        None => continue,
                    },
                };
                collecting.push((*category, source.clone(), read));
            }
        }

        let deadline = Instant::now() + self.config.read_timeout;
        let mut unresolved: Vec<(SourceId, PendingRead)> = Vec::new();
        for (category, source, read) in collecting {
            let Some(outcome) = read.wait_until(deadline) else {
                self.stats.timeouts.fetch_add(1, Ordering::Relaxed);
                waiting = true;
                unresolved.push((source.id(), read));
                continue;
            };

            match outcome {
                ReadOutcome::Data(data) if data.is_empty() => {
                    retired.push((category, source));
                }
                ReadOutcome::Data(data) => {
                    if data.len() > FRAME_SIZE {
                        warn!(
                            "Source {} returned {} bytes, truncating to {}",
                            source.id(),
                            data.len(),
                            FRAME_SIZE
                        );
                    }
                    buffer.accumulate(&data);
                    // A short frame is the last one: mix it and retire now
                    if data.len() < FRAME_SIZE {
                        retired.push((category, source));
                    }
                }
                ReadOutcome::Failed(reason) => {
                    error!("Read from {} source {} failed: {}", category, source.id(), reason);
                    self.stats.failures.fetch_add(1, Ordering::Relaxed);
                    retired.push((category, source));
                }
                // Cancelled before it started; resubmitted next tick
                ReadOutcome::Cancelled => {}
            }
        }

        if !unresolved.is_empty() {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            for (id, read) in unresolved {
                // Shutdown may have cleared the map while we were waiting
                if self.shut_down.load(Ordering::Acquire) {
                    read.cancel();
                } else {
                    in_flight.pending.insert(id, read);
                }
            }
        }

        self.active
            .store(buffer.sources_mixed() > 0 || waiting, Ordering::Release);

        if !retired.is_empty() {
            self.finalize(retired);
        }

        buffer.finish()
    }

    fn finalize(&self, retired: Vec<(Category, SourceHandle)>) {
        self.stats
            .retired
            .fetch_add(retired.len() as u64, Ordering::Relaxed);

        let mut ended_layers = Vec::new();
        for (category, source) in &retired {
            debug!("Retiring {} source {}", category, source.id());
            match category {
                Category::Layer => ended_layers.push(source.clone()),
                Category::Queue => {
                    self.notify(&MixerEvent::QueueEnd {
                        source: source.clone(),
                    });
                    self.registry.notify_track_finished(source);
                }
                // The slot is cleared below, only if this source still holds it
                Category::Tts => {}
                Category::Button => {}
            }
        }

        if !ended_layers.is_empty() {
            self.notify(&MixerEvent::TrackEnd {
                sources: ended_layers,
            });
        }

        for (_, source) in &retired {
            self.registry.remove_finished_source(source);
        }
    }

    /// True when the last tick mixed audio or is still waiting on a read.
    pub fn has_active_tracks(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Reads carried over to a later tick, not counting pruned ones.
    pub fn pending_reads(&self) -> usize {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pending
            .len()
    }

    pub fn stats(&self) -> MixerStatsSnapshot {
        MixerStatsSnapshot {
            ticks: self.stats.ticks.load(Ordering::Relaxed),
            submissions: self.pool.submissions(),
            timeouts: self.stats.timeouts.load(Ordering::Relaxed),
            failures: self.stats.failures.load(Ordering::Relaxed),
            retired: self.stats.retired.load(Ordering::Relaxed),
        }
    }

    // === Lifecycle ===

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Stop mixing for good. Later `read` calls return silence immediately.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let cancelled = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            let InFlight { pending, draining } = &mut *in_flight;
            for read in pending.values().chain(draining.values()) {
                read.cancel();
            }
            let n = pending.len();
            pending.clear();
            draining.clear();
            n
        };
        self.pool.shutdown(self.config.shutdown_grace);
        self.active.store(false, Ordering::Release);
        info!("Mixer shut down ({} pending reads cancelled)", cancelled);
    }
}

impl Drop for FrameMixer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
