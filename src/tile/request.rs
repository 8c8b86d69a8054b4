use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use crate::foundation::core::TileIndex;
use crate::foundation::error::{TileError, TileResult};
use crate::tile::listener::{TileComputationListener, guarded};
use crate::tile::source::TileSource;

/// Lifecycle state of one tile within one request.
///
/// `Pending -> Processing -> {Computed | Failed}`, with `Cancelled` reachable from both
/// non-terminal states. Terminal states never change.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TileStatus {
    /// Queued, not yet picked up by a worker.
    Pending = 0,
    /// A worker is computing the tile.
    Processing = 1,
    /// Computed and delivered.
    Computed = 2,
    /// Cancelled before delivery.
    Cancelled = 3,
    /// Computation failed.
    Failed = 4,
}

impl TileStatus {
    /// Whether no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Computed | Self::Cancelled | Self::Failed)
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Pending,
            1 => Self::Processing,
            2 => Self::Computed,
            3 => Self::Cancelled,
            _ => Self::Failed,
        }
    }
}

/// A batch of tiles of one image queued with the scheduler, plus the listeners to notify.
///
/// Returned by [`crate::TileScheduler::schedule_tiles`]. Status queries and cancellation never
/// block on computation.
pub struct TileRequest {
    image: Arc<dyn TileSource>,
    indices: Vec<TileIndex>,
    slots: HashMap<TileIndex, usize>,
    statuses: Vec<AtomicU8>,
    listeners: Vec<Arc<dyn TileComputationListener>>,
    track_status: bool,
    remaining: Mutex<usize>,
    settled: Condvar,
}

impl std::fmt::Debug for TileRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileRequest")
            .field("image", &self.image.id())
            .field("tiles", &self.indices.len())
            .field("listeners", &self.listeners.len())
            .field("track_status", &self.track_status)
            .finish_non_exhaustive()
    }
}

impl TileRequest {
    /// Duplicate indices are collapsed onto their first occurrence.
    pub(crate) fn new(
        image: Arc<dyn TileSource>,
        indices: &[TileIndex],
        listeners: Vec<Arc<dyn TileComputationListener>>,
        track_status: bool,
    ) -> Self {
        let mut slots = HashMap::with_capacity(indices.len());
        let mut unique = Vec::with_capacity(indices.len());
        for &index in indices {
            if !slots.contains_key(&index) {
                slots.insert(index, unique.len());
                unique.push(index);
            }
        }
        let statuses = unique
            .iter()
            .map(|_| AtomicU8::new(TileStatus::Pending as u8))
            .collect();
        let remaining = unique.len();
        Self {
            image,
            indices: unique,
            slots,
            statuses,
            listeners,
            track_status,
            remaining: Mutex::new(remaining),
            settled: Condvar::new(),
        }
    }

    /// The image whose tiles were requested.
    pub fn image(&self) -> &Arc<dyn TileSource> {
        &self.image
    }

    /// Requested tile indices, in request order.
    pub fn tile_indices(&self) -> &[TileIndex] {
        &self.indices
    }

    /// Listeners registered with this request.
    pub fn listeners(&self) -> &[Arc<dyn TileComputationListener>] {
        &self.listeners
    }

    /// Whether [`TileRequest::tile_status`] is supported for this request.
    pub fn is_status_available(&self) -> bool {
        self.track_status
    }

    /// Current status of tile `(x, y)`.
    ///
    /// Fails with [`TileError::Unsupported`] when status tracking is disabled and with
    /// [`TileError::UnknownTile`] when the tile is not part of this request.
    pub fn tile_status(&self, x: i32, y: i32) -> TileResult<TileStatus> {
        if !self.track_status {
            return Err(TileError::unsupported(
                "tile status tracking is disabled for this request",
            ));
        }
        let slot = self
            .slot(TileIndex::new(x, y))
            .ok_or(TileError::UnknownTile { x, y })?;
        Ok(self.status_at(slot))
    }

    /// Cancel the listed tiles, or every tile when `indices` is `None` or empty.
    ///
    /// Only pending or processing tiles change state; each of them gets exactly one
    /// `tile_cancelled` callback. Indices not in this request are ignored. A tile that is
    /// already being computed keeps running but its result is not delivered to this request.
    pub fn cancel_tiles(self: &Arc<Self>, indices: Option<&[TileIndex]>) {
        let slots: Vec<usize> = match indices {
            None | Some([]) => (0..self.indices.len()).collect(),
            Some(list) => list.iter().filter_map(|i| self.slot(*i)).collect(),
        };

        let mut cancelled = 0usize;
        let requests = [Arc::clone(self)];
        for slot in slots {
            if !self.try_cancel(slot) {
                continue;
            }
            cancelled += 1;
            let index = self.indices[slot];
            for listener in &self.listeners {
                guarded(index, || listener.tile_cancelled(&requests, &self.image, index));
            }
        }
        if cancelled > 0 {
            tracing::debug!(image = %self.image.id(), cancelled, "cancelled tiles");
        }
    }

    /// Whether every tile has reached a terminal state.
    pub fn is_complete(&self) -> bool {
        *self.remaining.lock().unwrap_or_else(PoisonError::into_inner) == 0
    }

    /// Block until every tile is terminal or `timeout` elapses. Returns whether the request
    /// completed.
    pub fn wait(&self, timeout: Duration) -> bool {
        let guard = self.remaining.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = self
            .settled
            .wait_timeout_while(guard, timeout, |remaining| *remaining > 0)
            .unwrap_or_else(PoisonError::into_inner);
        *guard == 0
    }

    pub(crate) fn slot(&self, index: TileIndex) -> Option<usize> {
        self.slots.get(&index).copied()
    }

    pub(crate) fn status_at(&self, slot: usize) -> TileStatus {
        TileStatus::from_u8(self.statuses[slot].load(Ordering::Acquire))
    }

    /// `Pending -> Processing`.
    pub(crate) fn try_begin(&self, slot: usize) -> bool {
        self.transition(slot, TileStatus::Pending, TileStatus::Processing)
    }

    /// `Processing -> Computed | Failed`.
    pub(crate) fn try_finish(&self, slot: usize, outcome: TileStatus) -> bool {
        debug_assert!(matches!(outcome, TileStatus::Computed | TileStatus::Failed));
        let won = self.transition(slot, TileStatus::Processing, outcome);
        if won {
            self.settle_one();
        }
        won
    }

    /// `Pending | Processing -> Cancelled`.
    pub(crate) fn try_cancel(&self, slot: usize) -> bool {
        let cell = &self.statuses[slot];
        let mut current = cell.load(Ordering::Acquire);
        loop {
            if TileStatus::from_u8(current).is_terminal() {
                return false;
            }
            match cell.compare_exchange_weak(
                current,
                TileStatus::Cancelled as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.settle_one();
                    return true;
                }
                Err(actual) => current = actual,
            }
        }
    }

    fn transition(&self, slot: usize, from: TileStatus, to: TileStatus) -> bool {
        self.statuses[slot]
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn settle_one(&self) {
        let mut remaining = self.remaining.lock().unwrap_or_else(PoisonError::into_inner);
        *remaining = remaining.saturating_sub(1);
        if *remaining == 0 {
            self.settled.notify_all();
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/tile/request.rs"]
mod tests;
