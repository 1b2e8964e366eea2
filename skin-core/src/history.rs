//! Per-surface undo/redo history.
//!
//! A [`HistoryManager`] subscribes to one surface's change events. User
//! edits are coalesced through a [`Debounce`] and captured as snapshots;
//! untracked changes (restores, base loads) are never recorded. A base load
//! resets the history to the state right after the load; the reset happens
//! on the next history operation even if the listener has not yet seen the
//! load event.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::debounce::Debounce;
use crate::error::SkinResult;
use crate::event::SurfaceEventKind;
use crate::snapshot::SurfaceSnapshot;
use crate::surface::{Surface, SurfaceHandle};

/// History limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryConfig {
    /// Maximum undo entries kept, oldest trimmed first.
    pub capacity: usize,
    /// Quiet period before a burst of edits is captured.
    pub debounce: Duration,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            capacity: 6,
            debounce: Duration::from_millis(150),
        }
    }
}

#[derive(Debug)]
struct Stacks {
    undo: VecDeque<SurfaceSnapshot>,
    redo: Vec<SurfaceSnapshot>,
    capacity: usize,
    /// Base epoch the stacks belong to.
    epoch: u64,
    /// Surface revision of the newest recorded state.
    revision: u64,
}

impl Stacks {
    fn push_undo(&mut self, snapshot: SurfaceSnapshot) {
        self.undo.push_back(snapshot);
        while self.undo.len() > self.capacity {
            self.undo.pop_front();
        }
    }

    /// Record a new edit. Returns `false` if it matches the current top.
    fn record(&mut self, snapshot: SurfaceSnapshot) -> bool {
        if self
            .undo
            .back()
            .is_some_and(|top| top.same_state(&snapshot))
        {
            return false;
        }
        self.push_undo(snapshot);
        self.redo.clear();
        true
    }

    fn reset(&mut self, baseline: SurfaceSnapshot, epoch: u64, revision: u64) {
        self.undo.clear();
        self.redo.clear();
        self.undo.push_back(baseline);
        self.epoch = epoch;
        self.revision = revision;
    }

    /// Restart from the surface's base baseline if a base load happened
    /// since the stacks were last synced.
    fn sync_epoch(&mut self, surface: &Surface) {
        let base = surface.base_epoch();
        if base.epoch == self.epoch {
            return;
        }
        let baseline = match &base.baseline {
            Some(baseline) => Ok(baseline.clone()),
            None => surface.snapshot(),
        };
        match baseline {
            Ok(baseline) => {
                self.reset(baseline, base.epoch, base.revision);
                debug!(surface = %surface.key(), epoch = base.epoch, "History reset after base load");
            }
            Err(e) => warn!("Failed to capture history baseline: {}", e),
        }
    }
}

// Lock order: stacks, then surface.

fn lock_stacks(stacks: &Mutex<Stacks>) -> std::sync::MutexGuard<'_, Stacks> {
    stacks.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read_surface(surface: &SurfaceHandle) -> std::sync::RwLockReadGuard<'_, Surface> {
    surface.read().unwrap_or_else(PoisonError::into_inner)
}

/// Record the surface state if a tracked edit happened since the last
/// capture.
fn record_pending(stacks: &mut Stacks, surface: &Surface) {
    stacks.sync_epoch(surface);
    if surface.revision() == stacks.revision {
        return;
    }
    match surface.snapshot() {
        Ok(snapshot) => {
            stacks.revision = surface.revision();
            if stacks.record(snapshot) {
                debug!(entries = stacks.undo.len(), "History snapshot captured");
            }
        }
        Err(e) => warn!("Failed to capture history snapshot: {}", e),
    }
}

fn capture(surface: &SurfaceHandle, stacks: &Mutex<Stacks>) {
    record_pending(&mut lock_stacks(stacks), &read_surface(surface));
}

fn sync(surface: &SurfaceHandle, stacks: &Mutex<Stacks>) {
    let mut stacks = lock_stacks(stacks);
    stacks.sync_epoch(&read_surface(surface));
}

/// Undo/redo stacks for one surface.
#[derive(Debug)]
pub struct HistoryManager {
    surface: SurfaceHandle,
    stacks: Arc<Mutex<Stacks>>,
    debounce: Arc<Debounce>,
    listener: JoinHandle<()>,
}

impl HistoryManager {
    /// Attach to a surface, capturing its current state as the first entry.
    ///
    /// Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`crate::SkinError::Serialization`] if the initial snapshot
    /// cannot be taken.
    pub fn attach(surface: SurfaceHandle, config: HistoryConfig) -> SkinResult<Self> {
        let (mut events, initial, epoch, revision) = {
            let guard = read_surface(&surface);
            (
                guard.on_change(),
                guard.snapshot()?,
                guard.base_epoch().epoch,
                guard.revision(),
            )
        };
        let mut undo = VecDeque::with_capacity(config.capacity + 1);
        undo.push_back(initial);
        let stacks = Arc::new(Mutex::new(Stacks {
            undo,
            redo: Vec::new(),
            capacity: config.capacity.max(1),
            epoch,
            revision,
        }));
        let debounce = Arc::new(Debounce::new(config.debounce));

        let weak_surface: Weak<_> = Arc::downgrade(&surface);
        let task_stacks = Arc::clone(&stacks);
        let task_debounce = Arc::clone(&debounce);
        let listener = tokio::spawn(async move {
            loop {
                let edited = match events.recv().await {
                    Ok(event) if event.kind == SurfaceEventKind::BaseLoaded => {
                        task_debounce.cancel();
                        if let Some(surface) = weak_surface.upgrade() {
                            sync(&surface, &task_stacks);
                        }
                        continue;
                    }
                    Ok(event) => event.is_user_edit(),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "History listener lagged");
                        true
                    }
                    Err(RecvError::Closed) => break,
                };
                if !edited {
                    continue;
                }
                let Some(surface) = weak_surface.upgrade() else {
                    break;
                };
                let stacks = Arc::clone(&task_stacks);
                task_debounce.schedule(move || capture(&surface, &stacks));
            }
        });

        Ok(Self {
            surface,
            stacks,
            debounce,
            listener,
        })
    }

    fn stacks(&self) -> std::sync::MutexGuard<'_, Stacks> {
        lock_stacks(&self.stacks)
    }

    /// Capture any tracked edit not yet recorded, skipping the debounce
    /// window. Does nothing when there is none.
    pub fn flush(&self) {
        self.debounce.cancel();
        capture(&self.surface, &self.stacks);
    }

    /// Discard all history and record the current state as the baseline.
    pub fn reset(&self) {
        self.debounce.cancel();
        let mut stacks = self.stacks();
        let surface = read_surface(&self.surface);
        match surface.snapshot() {
            Ok(baseline) => {
                stacks.reset(baseline, surface.base_epoch().epoch, surface.revision());
                debug!(surface = %surface.key(), "History reset");
            }
            Err(e) => warn!("Failed to capture history baseline: {}", e),
        }
    }

    /// Restore the previous snapshot. Returns whether anything was undone.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be restored; the history is
    /// unchanged in that case.
    pub fn undo(&self) -> SkinResult<bool> {
        self.debounce.cancel();
        let mut stacks = self.stacks();
        record_pending(&mut stacks, &read_surface(&self.surface));
        if stacks.undo.len() < 2 {
            return Ok(false);
        }
        let target = stacks.undo[stacks.undo.len() - 2].clone();
        self.surface
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .restore(&target)?;
        if let Some(top) = stacks.undo.pop_back() {
            stacks.redo.push(top);
        }
        debug!(undo = stacks.undo.len(), redo = stacks.redo.len(), "Undo");
        Ok(true)
    }

    /// Re-apply the most recently undone snapshot. Returns whether anything
    /// was redone.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be restored; the history is
    /// unchanged in that case.
    pub fn redo(&self) -> SkinResult<bool> {
        self.debounce.cancel();
        let mut stacks = self.stacks();
        record_pending(&mut stacks, &read_surface(&self.surface));
        let Some(target) = stacks.redo.last().cloned() else {
            return Ok(false);
        };
        self.surface
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .restore(&target)?;
        stacks.redo.pop();
        stacks.push_undo(target);
        debug!(undo = stacks.undo.len(), redo = stacks.redo.len(), "Redo");
        Ok(true)
    }

    /// Whether [`HistoryManager::undo`] would do anything.
    #[must_use]
    pub fn can_undo(&self) -> bool {
        let mut stacks = self.stacks();
        stacks.sync_epoch(&read_surface(&self.surface));
        stacks.undo.len() >= 2
    }

    /// Whether [`HistoryManager::redo`] would do anything.
    #[must_use]
    pub fn can_redo(&self) -> bool {
        !self.stacks().redo.is_empty()
    }

    /// Number of undo entries, the current state included.
    #[must_use]
    pub fn undo_len(&self) -> usize {
        self.stacks().undo.len()
    }

    /// Number of redo entries.
    #[must_use]
    pub fn redo_len(&self) -> usize {
        self.stacks().redo.len()
    }

    /// Whether an edit burst is waiting out the debounce window.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.debounce.is_pending()
    }

    /// The surface this history tracks.
    #[must_use]
    pub fn surface(&self) -> &SurfaceHandle {
        &self.surface
    }
}

impl Drop for HistoryManager {
    fn drop(&mut self) {
        self.listener.abort();
        self.debounce.cancel();
    }
}
