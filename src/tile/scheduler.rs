use std::collections::{HashMap, HashSet};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use rayon::prelude::*;
use smallvec::SmallVec;

use crate::foundation::core::{TileCost, TileIndex, TileKey};
use crate::foundation::error::{TileError, TileResult};
use crate::tile::cache::{MemoryTileCache, TileCache};
use crate::tile::factory::{RecyclingTileFactory, TileFactory, TileRecycler, recycle_shared};
use crate::tile::listener::{TileComputationListener, guarded};
use crate::tile::raster::Raster;
use crate::tile::request::{TileRequest, TileStatus};
use crate::tile::source::TileSource;

/// Worker-pool sizing and request defaults for [`TileScheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerOpts {
    /// Worker threads for scheduled tiles. Zero computes on the calling thread.
    pub parallelism: usize,
    /// Worker threads for prefetches. Zero computes on the calling thread.
    pub prefetch_parallelism: usize,
    /// Whether new requests support [`TileRequest::tile_status`].
    pub track_status: bool,
}

impl Default for SchedulerOpts {
    fn default() -> Self {
        Self {
            parallelism: 2,
            prefetch_parallelism: 1,
            track_status: true,
        }
    }
}

const MAX_WORKERS: usize = 1024;

impl SchedulerOpts {
    /// Reject worker counts above 1024.
    pub fn validate(&self) -> TileResult<()> {
        for (name, n) in [
            ("parallelism", self.parallelism),
            ("prefetch_parallelism", self.prefetch_parallelism),
        ] {
            if n > MAX_WORKERS {
                return Err(TileError::config(format!(
                    "scheduler {name} must be at most {MAX_WORKERS}, got {n}"
                )));
            }
        }
        Ok(())
    }
}

/// Scheduler counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct SchedulerStats {
    /// Tiles computed by a source.
    pub computed: u64,
    /// Tile computations that failed or panicked.
    pub failed: u64,
    /// Queued tiles dropped because every waiting request cancelled them first.
    pub cancelled_before_start: u64,
    /// Tiles served from the cache instead of being computed.
    pub cache_hits: u64,
    /// Request tiles that joined an already queued computation.
    pub coalesced: u64,
    /// Tiles computed by prefetches.
    pub prefetched: u64,
}

#[derive(Default)]
struct Counters {
    computed: AtomicU64,
    failed: AtomicU64,
    cancelled_before_start: AtomicU64,
    cache_hits: AtomicU64,
    coalesced: AtomicU64,
    prefetched: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

struct Waiter {
    request: Arc<TileRequest>,
    slot: usize,
}

struct InFlight {
    source: Arc<dyn TileSource>,
    waiters: SmallVec<[Waiter; 2]>,
}

struct Shared {
    opts: SchedulerOpts,
    cache: Arc<dyn TileCache>,
    factory: Arc<dyn TileFactory>,
    recycler: Option<Arc<dyn TileRecycler>>,
    pool: Option<rayon::ThreadPool>,
    prefetch_pool: Option<rayon::ThreadPool>,
    in_flight: Mutex<HashMap<TileKey, InFlight>>,
    prefetching: Mutex<HashSet<TileKey>>,
    counters: Counters,
}

/// Dispatches tile computations to a worker pool.
///
/// Tiles are looked up in the cache first; missing tiles get a buffer from the factory, are
/// filled by the image's [`TileSource`] and stored in the cache. The same tile queued by several
/// requests is computed once. Cloning yields another handle to the same scheduler.
#[derive(Clone)]
pub struct TileScheduler {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for TileScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileScheduler")
            .field("opts", &self.shared.opts)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl TileScheduler {
    /// Scheduler with a default [`MemoryTileCache`] and a [`RecyclingTileFactory`] that also
    /// recycles unused tiles.
    pub fn new(opts: SchedulerOpts) -> TileResult<Self> {
        let factory = Arc::new(RecyclingTileFactory::default());
        let cache = Arc::new(MemoryTileCache::default().with_recycler(factory.clone()));
        Self::with_parts(opts, cache, factory.clone(), Some(factory))
    }

    /// Scheduler over caller-supplied parts. `recycler` receives buffers of results nobody
    /// accepted and of failed computations.
    pub fn with_parts(
        opts: SchedulerOpts,
        cache: Arc<dyn TileCache>,
        factory: Arc<dyn TileFactory>,
        recycler: Option<Arc<dyn TileRecycler>>,
    ) -> TileResult<Self> {
        opts.validate()?;
        let pool = build_thread_pool(opts.parallelism, "tile-worker")?;
        let prefetch_pool = build_thread_pool(opts.prefetch_parallelism, "tile-prefetch")?;
        Ok(Self {
            shared: Arc::new(Shared {
                opts,
                cache,
                factory,
                recycler,
                pool,
                prefetch_pool,
                in_flight: Mutex::new(HashMap::new()),
                prefetching: Mutex::new(HashSet::new()),
                counters: Counters::default(),
            }),
        })
    }

    /// Scheduler options.
    pub fn opts(&self) -> SchedulerOpts {
        self.shared.opts
    }

    /// Worker threads for scheduled tiles.
    pub fn parallelism(&self) -> usize {
        self.shared.opts.parallelism
    }

    /// Worker threads for prefetches.
    pub fn prefetch_parallelism(&self) -> usize {
        self.shared.opts.prefetch_parallelism
    }

    /// Cache the scheduler reads and fills.
    pub fn cache(&self) -> &Arc<dyn TileCache> {
        &self.shared.cache
    }

    /// Factory the scheduler allocates tile buffers from.
    pub fn factory(&self) -> &Arc<dyn TileFactory> {
        &self.shared.factory
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> SchedulerStats {
        let c = &self.shared.counters;
        SchedulerStats {
            computed: c.computed.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            cancelled_before_start: c.cancelled_before_start.load(Ordering::Relaxed),
            cache_hits: c.cache_hits.load(Ordering::Relaxed),
            coalesced: c.coalesced.load(Ordering::Relaxed),
            prefetched: c.prefetched.load(Ordering::Relaxed),
        }
    }

    /// Queue tiles of `image` and return immediately.
    ///
    /// Every tile ends in exactly one of `tile_computed`, `tile_cancelled` or
    /// `tile_computation_failure` on each listener. Fails with [`TileError::InvalidArgument`]
    /// when `indices` is empty or names a tile outside the image's grid.
    #[tracing::instrument(skip_all, fields(image = %image.id(), tiles = indices.len()))]
    pub fn schedule_tiles(
        &self,
        image: Arc<dyn TileSource>,
        indices: &[TileIndex],
        listeners: Vec<Arc<dyn TileComputationListener>>,
    ) -> TileResult<Arc<TileRequest>> {
        validate_indices(image.as_ref(), indices)?;
        let request = Arc::new(TileRequest::new(
            Arc::clone(&image),
            indices,
            listeners,
            self.shared.opts.track_status,
        ));

        let id = image.id();
        let mut jobs = Vec::new();
        {
            let mut in_flight = self.shared.lock_in_flight();
            for (slot, index) in request.tile_indices().iter().enumerate() {
                let key = TileKey::new(id, *index);
                let waiter = Waiter {
                    request: Arc::clone(&request),
                    slot,
                };
                match in_flight.get_mut(&key) {
                    Some(entry) => {
                        entry.waiters.push(waiter);
                        bump(&self.shared.counters.coalesced);
                    }
                    None => {
                        let mut waiters = SmallVec::new();
                        waiters.push(waiter);
                        in_flight.insert(
                            key,
                            InFlight {
                                source: Arc::clone(&image),
                                waiters,
                            },
                        );
                        jobs.push(key);
                    }
                }
            }
        }

        tracing::debug!(queued = jobs.len(), "scheduled tiles");
        for key in jobs {
            match &self.shared.pool {
                Some(pool) => {
                    let shared = Arc::clone(&self.shared);
                    pool.spawn(move || shared.run_job(key));
                }
                None => self.shared.run_job(key),
            }
        }
        Ok(request)
    }

    /// Cancel tiles of `request`; see [`TileRequest::cancel_tiles`].
    pub fn cancel_tiles(&self, request: &Arc<TileRequest>, indices: Option<&[TileIndex]>) {
        request.cancel_tiles(indices);
    }

    /// Compute (or fetch from the cache) one tile, blocking until it is available.
    pub fn schedule_tile(
        &self,
        image: &Arc<dyn TileSource>,
        index: TileIndex,
    ) -> TileResult<Arc<Raster>> {
        validate_indices(image.as_ref(), &[index])?;
        self.shared.fetch(image.as_ref(), index)
    }

    /// Compute (or fetch) several tiles in parallel, blocking until all are available.
    ///
    /// Results are in `indices` order. The first failure is returned.
    #[tracing::instrument(skip_all, fields(image = %image.id(), tiles = indices.len()))]
    pub fn schedule_tiles_blocking(
        &self,
        image: &Arc<dyn TileSource>,
        indices: &[TileIndex],
    ) -> TileResult<Vec<Arc<Raster>>> {
        validate_indices(image.as_ref(), indices)?;
        let source = image.as_ref();
        match &self.shared.pool {
            Some(pool) => pool.install(|| {
                indices
                    .par_iter()
                    .map(|index| self.shared.fetch(source, *index))
                    .collect()
            }),
            None => indices
                .iter()
                .map(|index| self.shared.fetch(source, *index))
                .collect(),
        }
    }

    /// Warm the cache with tiles of `image` at low priority. Tiles already cached or already
    /// being prefetched are skipped; failures are only logged.
    pub fn prefetch_tiles(
        &self,
        image: &Arc<dyn TileSource>,
        indices: &[TileIndex],
    ) -> TileResult<()> {
        validate_indices(image.as_ref(), indices)?;
        let id = image.id();
        for index in indices {
            let key = TileKey::new(id, *index);
            if self.shared.cache.contains(&key) {
                continue;
            }
            if !self.shared.lock_prefetching().insert(key) {
                continue;
            }
            match &self.shared.prefetch_pool {
                Some(pool) => {
                    let shared = Arc::clone(&self.shared);
                    let image = Arc::clone(image);
                    pool.spawn(move || shared.prefetch(image.as_ref(), key));
                }
                None => self.shared.prefetch(image.as_ref(), key),
            }
        }
        Ok(())
    }
}

impl Shared {
    fn lock_in_flight(&self) -> MutexGuard<'_, HashMap<TileKey, InFlight>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_prefetching(&self) -> MutexGuard<'_, HashSet<TileKey>> {
        self.prefetching.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn recycle(&self, tile: Raster) {
        if let Some(recycler) = &self.recycler
            && let Err(e) = recycler.recycle_tile(tile)
        {
            tracing::debug!(error = %e, "tile buffer not recycled");
        }
    }

    fn recycle_unused(&self, tile: Arc<Raster>) {
        if let Some(recycler) = &self.recycler {
            let _ = recycle_shared(recycler.as_ref(), tile);
        }
    }

    // Allocate, fill and time one tile; compute errors and panics become `Computation`.
    fn compute(&self, source: &dyn TileSource, index: TileIndex) -> TileResult<(Raster, TileCost)> {
        let layout = source.layout();
        let mut tile = self
            .factory
            .create_tile(layout.raster_layout(), layout.tile_origin(index))?;
        let started = Instant::now();
        let error = match catch_unwind(AssertUnwindSafe(|| source.compute_tile(index, &mut tile))) {
            Ok(Ok(())) => {
                let micros = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX);
                return Ok((tile, TileCost(micros)));
            }
            Ok(Err(e)) => TileError::computation(format!("{}: {e:#}", source.name())),
            Err(payload) => TileError::computation(format!(
                "{} panicked: {}",
                source.name(),
                panic_message(payload.as_ref())
            )),
        };
        self.recycle(tile);
        Err(error)
    }

    fn fetch(&self, source: &dyn TileSource, index: TileIndex) -> TileResult<Arc<Raster>> {
        let key = TileKey::new(source.id(), index);
        if let Some(hit) = self.cache.get(&key) {
            bump(&self.counters.cache_hits);
            return Ok(hit);
        }
        match self.compute(source, index) {
            Ok((tile, cost)) => {
                bump(&self.counters.computed);
                let tile = Arc::new(tile);
                self.cache.add(key, Arc::clone(&tile), cost);
                Ok(tile)
            }
            Err(e) => {
                bump(&self.counters.failed);
                Err(e)
            }
        }
    }

    fn prefetch(&self, source: &dyn TileSource, key: TileKey) {
        if !self.cache.contains(&key) {
            match self.compute(source, key.index) {
                Ok((tile, cost)) => {
                    bump(&self.counters.prefetched);
                    self.cache.add(key, Arc::new(tile), cost);
                }
                Err(e) => tracing::debug!(tile = %key.index, error = %e, "prefetch failed"),
            }
        }
        self.lock_prefetching().remove(&key);
    }

    fn run_job(&self, key: TileKey) {
        let Some(InFlight { source, waiters }) = self.lock_in_flight().remove(&key) else {
            return;
        };

        let claimed: SmallVec<[Waiter; 2]> = waiters
            .into_iter()
            .filter(|w| w.request.try_begin(w.slot))
            .collect();
        if claimed.is_empty() {
            bump(&self.counters.cancelled_before_start);
            return;
        }

        let outcome = match self.cache.get(&key) {
            Some(hit) => {
                bump(&self.counters.cache_hits);
                Ok((hit, None))
            }
            None => self
                .compute(source.as_ref(), key.index)
                .map(|(tile, cost)| (Arc::new(tile), Some(cost))),
        };

        match outcome {
            Ok((tile, cost)) => {
                let winners = settle(claimed, TileStatus::Computed);
                if winners.is_empty() {
                    if cost.is_some() {
                        self.recycle_unused(tile);
                    }
                    return;
                }
                if let Some(cost) = cost {
                    bump(&self.counters.computed);
                    self.cache.add(key, Arc::clone(&tile), cost);
                }
                for (listener, requests) in group_by_listener(&winners) {
                    let image = requests.first().map_or(&source, |r| r.image());
                    guarded(key.index, || {
                        listener.tile_computed(&requests, image, key.index, &tile)
                    });
                }
            }
            Err(error) => {
                bump(&self.counters.failed);
                tracing::warn!(
                    image = %key.image,
                    tile = %key.index,
                    error = %error,
                    "tile computation failed"
                );
                let winners = settle(claimed, TileStatus::Failed);
                for (listener, requests) in group_by_listener(&winners) {
                    let image = requests.first().map_or(&source, |r| r.image());
                    guarded(key.index, || {
                        listener.tile_computation_failure(&requests, image, key.index, &error)
                    });
                }
            }
        }
    }
}

// Move claimed waiters to `outcome`; waiters cancelled meanwhile already got their callback.
fn settle(claimed: SmallVec<[Waiter; 2]>, outcome: TileStatus) -> SmallVec<[Waiter; 2]> {
    claimed
        .into_iter()
        .filter(|w| w.request.try_finish(w.slot, outcome))
        .collect()
}

type ListenerGroup = (Arc<dyn TileComputationListener>, Vec<Arc<TileRequest>>);

// Each distinct listener once, with every winning request it is registered with. The listener
// sees the image handle of the first of those requests.
fn group_by_listener(winners: &[Waiter]) -> Vec<ListenerGroup> {
    let mut groups: Vec<ListenerGroup> = Vec::new();
    for w in winners {
        for listener in w.request.listeners() {
            let existing = groups
                .iter_mut()
                .find(|(l, _)| std::ptr::addr_eq(Arc::as_ptr(l), Arc::as_ptr(listener)));
            match existing {
                Some((_, requests)) => {
                    if !requests.iter().any(|r| Arc::ptr_eq(r, &w.request)) {
                        requests.push(Arc::clone(&w.request));
                    }
                }
                None => groups.push((Arc::clone(listener), vec![Arc::clone(&w.request)])),
            }
        }
    }
    groups
}

fn validate_indices(image: &dyn TileSource, indices: &[TileIndex]) -> TileResult<()> {
    let layout = image.layout();
    layout.validate()?;
    if indices.is_empty() {
        return Err(TileError::invalid_argument("no tile indices given"));
    }
    if let Some(bad) = indices.iter().find(|i| !layout.contains_tile(**i)) {
        return Err(TileError::invalid_argument(format!(
            "tile {bad} is outside the {}x{} tile grid of {}",
            layout.num_x_tiles(),
            layout.num_y_tiles(),
            image.name()
        )));
    }
    Ok(())
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

fn build_thread_pool(threads: usize, name: &'static str) -> TileResult<Option<rayon::ThreadPool>> {
    if threads == 0 {
        return Ok(None);
    }
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(move |i| format!("{name}-{i}"))
        .panic_handler(|_| tracing::error!("tile worker job panicked"))
        .build()
        .map(Some)
        .map_err(|e| TileError::config(format!("failed to build rayon thread pool: {e}")))
}

#[cfg(test)]
#[path = "../../tests/unit/tile/scheduler.rs"]
mod tests;
