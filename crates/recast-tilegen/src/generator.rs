//! Tiled navmesh generator
//!
//! [`NavMeshGenerator`] owns the tile grid, turns dirty areas into tile
//! builds, runs them through the [`BuildScheduler`] and integrates the
//! finished layers into the host's [`RuntimeMeshSink`]. All bookkeeping
//! happens inside [`NavMeshGenerator::tick`] on the calling thread; only
//! [`TileGenerator::generate`] runs on workers.

use crate::config::{
    max_polys_for_tile_bits, tile_bits_for_grid, NavGeneratorConfig, TileBuildConfig,
    AVG_LAYERS_PER_TILE, MAX_QUEUED_GENERATORS,
};
use crate::dirty::{grow_dirty_bounds, DirtyArea, DirtyFlags, DirtyState, DirtyTracker, GridLayout};
use crate::geometry::GeometrySource;
use crate::io::{LayerCompressor, Lz4Compressor};
use crate::modifiers::{AreaClassRegistry, AreaOrdering, CostOrdering};
use crate::scheduler::{tile_order_key, BuildMode, BuildScheduler, Completion};
use crate::scratch::ScratchPool;
use crate::sink::{remove_tile_layers, SharedMeshSink};
use crate::tile_generator::{BuildEnv, TileBuildOutput, TileGenerator, TileStatus};
use glam::Vec3;
use log::{debug, error, info, warn};
use recast::RecastContext;
use recast_common::{Bounds, Error, Result};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;

/// Area the navmesh is generated for
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NavigationBounds {
    /// Explicit generation bounds. When unset the union of the inclusion
    /// volumes is used.
    pub world: Option<Bounds>,
    /// Volumes walkable surface is kept in
    pub inclusion_volumes: Vec<Bounds>,
}

impl NavigationBounds {
    pub fn from_world(world: Bounds) -> Self {
        Self {
            world: Some(world),
            inclusion_volumes: Vec::new(),
        }
    }

    pub fn with_inclusion_volume(mut self, volume: Bounds) -> Self {
        self.inclusion_volumes.push(volume);
        self
    }
}

/// Counters accumulated over the generator's lifetime
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildStats {
    pub tiles_built: usize,
    pub layers_built: usize,
    /// Layers that built successfully without polygons
    pub empty_layers: usize,
    pub failed_layers: usize,
    pub stale_discarded: usize,
    pub aborted: usize,
    pub transient_failures: usize,
    pub capacity_errors: usize,
}

/// State shared with running builds. Tasks only hold a weak handle so a
/// dropped generator is noticed instead of kept alive.
struct GeneratorShared {
    abort: Arc<AtomicBool>,
    version: AtomicU32,
    scratch: ScratchPool,
}

impl GeneratorShared {
    fn new(slots: usize, version: u32) -> Self {
        Self {
            abort: Arc::new(AtomicBool::new(false)),
            version: AtomicU32::new(version),
            scratch: ScratchPool::new(slots),
        }
    }
}

pub struct NavMeshGenerator {
    settings: NavGeneratorConfig,
    config: Arc<TileBuildConfig>,
    registry: Arc<AreaClassRegistry>,
    ordering: Arc<dyn AreaOrdering>,
    compressor: Arc<dyn LayerCompressor>,
    source: Arc<dyn GeometrySource>,
    sink: SharedMeshSink,
    shared: Arc<GeneratorShared>,
    scheduler: BuildScheduler,
    tracker: DirtyTracker,
    tiles: Vec<Arc<TileGenerator>>,
    layout: GridLayout,
    nav_bounds: Bounds,
    inclusion_volumes: Vec<Bounds>,
    failures: HashMap<(i32, i32), usize>,
    stats: BuildStats,
    released: Vec<Vec<u8>>,
    locked: bool,
    rebuild_all_deferred: bool,
}

impl NavMeshGenerator {
    pub fn new(
        settings: NavGeneratorConfig,
        source: Arc<dyn GeometrySource>,
        sink: SharedMeshSink,
        mode: BuildMode,
    ) -> Result<Self> {
        let config = settings.build_config()?;
        let slots = if mode.is_background() {
            let parallelism = std::thread::available_parallelism().map_or(1, |n| n.get());
            settings.max_concurrent_builds(parallelism)
        } else {
            1
        };
        let layout = GridLayout {
            origin: Vec3::ZERO,
            tile_world_size: config.tile_world_size(),
            tiles_w: 0,
            tiles_h: 0,
        };

        Ok(Self {
            settings,
            config: Arc::new(config),
            registry: Arc::new(AreaClassRegistry::default()),
            ordering: Arc::new(CostOrdering),
            compressor: Arc::new(Lz4Compressor),
            source,
            sink,
            shared: Arc::new(GeneratorShared::new(slots, 0)),
            scheduler: BuildScheduler::new(mode, slots),
            tracker: DirtyTracker::new(),
            tiles: Vec::new(),
            layout,
            nav_bounds: Bounds::empty(),
            inclusion_volumes: Vec::new(),
            failures: HashMap::new(),
            stats: BuildStats::default(),
            released: Vec::new(),
            locked: false,
            rebuild_all_deferred: false,
        })
    }

    pub fn with_area_classes(mut self, registry: AreaClassRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    pub fn with_area_ordering<O: AreaOrdering + 'static>(mut self, ordering: O) -> Self {
        self.ordering = Arc::new(ordering);
        self
    }

    pub fn with_compressor<C: LayerCompressor + 'static>(mut self, compressor: C) -> Self {
        self.compressor = Arc::new(compressor);
        self
    }

    /// Overrides the number of build slots. Synchronous generators always use one.
    pub fn with_max_concurrent_builds(mut self, max: usize) -> Self {
        if self.scheduler.mode().is_background() {
            let max = max.clamp(1, MAX_QUEUED_GENERATORS);
            self.scheduler.set_max_concurrent(max);
            self.shared = Arc::new(GeneratorShared::new(max, self.version()));
        }
        self
    }

    /// Lays out the tile grid over `bounds`. A changed grid drops every tile
    /// and all of their layers; an unchanged one only refreshes the
    /// inclusion volumes.
    pub fn init(&mut self, bounds: NavigationBounds) -> Result<()> {
        let volumes: Vec<Bounds> = bounds
            .inclusion_volumes
            .iter()
            .filter(|v| {
                let size = v.size();
                v.is_valid() && size.x * size.y * size.z > 0.0
            })
            .copied()
            .collect();
        let nav = match bounds.world {
            Some(world) => world,
            None => volumes.iter().fold(Bounds::empty(), |acc, v| acc.union(v)),
        };
        if !nav.is_valid() {
            return Err(Error::InvalidConfig(
                "navigation bounds are empty".to_string(),
            ));
        }

        let cs = self.config.recast.cs;
        let nav = nav.expand_by(cs);
        let size = nav.size();
        let grid_w = self.grid_cells(size.x, cs);
        let grid_h = self.grid_cells(size.z, cs);

        let tile_size = i64::from(self.config.recast.tile_size.max(1));
        let tiles_w = ((i64::from(grid_w) + tile_size - 1) / tile_size) as i32;
        let tiles_h = ((i64::from(grid_h) + tile_size - 1) / tile_size) as i32;

        let tile_bits = tile_bits_for_grid(tiles_w, tiles_h);
        let max_tiles = 1u64 << tile_bits;
        let wanted = tiles_w as u64 * tiles_h as u64 * u64::from(AVG_LAYERS_PER_TILE);
        if wanted > max_tiles {
            error!(
                "navmesh grid of {}x{} tiles exceeds the tile address budget ({} tiles)",
                tiles_w, tiles_h, max_tiles
            );
            return Err(Error::InvalidConfig(format!(
                "{}x{} tiles exceed the tile address budget",
                tiles_w, tiles_h
            )));
        }
        Arc::make_mut(&mut self.config).max_polys_per_tile = max_polys_for_tile_bits(tile_bits);

        let layout = GridLayout {
            origin: nav.min,
            tile_world_size: self.config.tile_world_size(),
            tiles_w,
            tiles_h,
        };
        let changed = self.tiles.is_empty() || layout != self.layout;
        self.layout = layout;
        self.nav_bounds = nav;
        self.inclusion_volumes = volumes;

        if changed {
            let version = self.shared.version.fetch_add(1, Ordering::AcqRel) + 1;
            self.tracker.reset();
            for index in self.scheduler.clear_queue() {
                self.tiles[index].cancel_pending();
            }
            self.remove_all_layers();
            self.failures.clear();
            self.rebuild_all_deferred = false;

            self.tiles = (0..tiles_h)
                .flat_map(|y| (0..tiles_w).map(move |x| (x, y)))
                .enumerate()
                .map(|(index, (x, y))| {
                    let tile = TileGenerator::new(x, y, index, version);
                    tile.init(self.grid_tile_bounds(x, y), &self.inclusion_volumes);
                    Arc::new(tile)
                })
                .collect();
            debug!(
                "navmesh grid {}x{} tiles, version {}",
                tiles_w, tiles_h, version
            );
        } else {
            for tile in &self.tiles {
                tile.init(
                    self.grid_tile_bounds(tile.tile_x(), tile.tile_y()),
                    &self.inclusion_volumes,
                );
            }
        }
        Ok(())
    }

    fn grid_cells(&self, extent: f32, cs: f32) -> i32 {
        let cells = (f64::from(extent) / f64::from(cs)).ceil();
        if cells > f64::from(i32::MAX) {
            warn!(
                "navigation bounds of {} units exceed the voxel grid, clamping",
                extent
            );
            return i32::MAX;
        }
        (cells as i32).max(1)
    }

    fn grid_tile_bounds(&self, x: i32, y: i32) -> Bounds {
        let size = self.layout.tile_world_size;
        let origin = self.layout.origin;
        Bounds::new(
            Vec3::new(
                origin.x + x as f32 * size,
                self.nav_bounds.min.y,
                origin.z + y as f32 * size,
            ),
            Vec3::new(
                origin.x + (x + 1) as f32 * size,
                self.nav_bounds.max.y,
                origin.z + (y + 1) as f32 * size,
            ),
        )
    }

    fn remove_all_layers(&mut self) {
        let mut sink = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
        for tile in &self.tiles {
            self.released
                .extend(remove_tile_layers(&mut *sink, tile.tile_x(), tile.tile_y()));
        }
    }

    fn tile_at(&self, x: i32, y: i32) -> Option<&Arc<TileGenerator>> {
        if x < 0 || y < 0 || x >= self.layout.tiles_w || y >= self.layout.tiles_h {
            return None;
        }
        self.tiles.get(self.layout.tile_index(x, y))
    }

    /// Runs one orchestration step: integrates finished builds, runs a
    /// scheduling pass when the queue is empty and starts queued builds.
    /// Synchronous generators build every queued tile before returning.
    pub fn tick(&mut self) {
        self.process_completions();
        if self.scheduler.in_flight() == 0 {
            self.shared.abort.store(false, Ordering::Release);
            if self.rebuild_all_deferred {
                self.rebuild_all_deferred = false;
                self.request_rebuild_all();
            }
        }

        let aborting = self.shared.abort.load(Ordering::Acquire);
        if !self.locked && !aborting && self.scheduler.queue_len() == 0 && !self.tracker.is_idle() {
            self.schedule_dirty_tiles();
        }

        while self.update_workers() > 0 && !self.scheduler.mode().is_background() {
            self.process_completions();
        }
    }

    fn process_completions(&mut self) {
        for completion in self.scheduler.drain() {
            self.handle_completion(completion);
        }
    }

    fn handle_completion(&mut self, completion: Completion) {
        let Completion {
            tile,
            version,
            result,
        } = completion;
        let (x, y) = (tile.tile_x(), tile.tile_y());

        if version != self.version() {
            debug!(
                "discarding stale build of tile ({}, {}) from version {}",
                x, y, version
            );
            self.stats.stale_discarded += 1;
            return;
        }
        if self.shared.abort.load(Ordering::Acquire) || matches!(result, Err(Error::Aborted)) {
            tile.abort_rebuild();
            // a cancel empties the tracker, the owed work has to be found again
            if tile.is_dirty() {
                self.tracker.mark_tile(tile.index());
            }
            self.stats.aborted += 1;
            return;
        }

        match result {
            Ok(output) => {
                self.integrate(&tile, output);
                tile.finish_rebuild();
                self.stats.tiles_built += 1;
            }
            Err(err) if err.is_structural() => {
                error!("tile ({}, {}) failed to build: {}", x, y, err);
                tile.abandon();
                *self.failures.entry((x, y)).or_default() += 1;
            }
            Err(err) => {
                warn!("tile ({}, {}) build failed, retrying: {}", x, y, err);
                self.stats.transient_failures += 1;
                let owed = tile.abort_rebuild();
                self.mark_aborted_generator(&tile, &owed);
            }
        }
    }

    /// Swaps the built layers into the sink. Replaced blobs are kept for
    /// [`NavMeshGenerator::take_released_blobs`].
    fn integrate(&mut self, tile: &TileGenerator, output: TileBuildOutput) {
        let (x, y) = (tile.tile_x(), tile.tile_y());
        let failed: HashSet<i32> = output.failed_layers.iter().map(|(layer, _)| *layer).collect();
        let mut released = Vec::new();
        let mut capacity_errors = 0;

        {
            let mut sink = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
            if output.rebuilt_geometry {
                released.extend(remove_tile_layers(&mut *sink, x, y));
            }
            for result in output.layers {
                if !output.rebuilt_geometry {
                    if let Some(old) = sink.layer_at(x, y, result.layer) {
                        released.extend(sink.remove(old));
                    }
                }
                let Some(blob) = result.blob else {
                    if !failed.contains(&result.layer) {
                        self.stats.empty_layers += 1;
                    }
                    continue;
                };
                match sink.insert(x, y, result.layer, blob) {
                    Ok(_) => self.stats.layers_built += 1,
                    Err((err, rejected)) => {
                        error!("dropping layer {} of tile ({}, {}): {}", result.layer, x, y, err);
                        released.push(rejected);
                        capacity_errors += 1;
                    }
                }
            }
        }

        self.released.extend(released);
        self.stats.capacity_errors += capacity_errors;
        self.stats.failed_layers += failed.len();
        let failures = capacity_errors + failed.len();
        if failures > 0 {
            *self.failures.entry((x, y)).or_default() += failures;
        }
    }

    /// Re-queues a tile whose build failed for a transient reason
    fn mark_aborted_generator(&self, tile: &TileGenerator, owed: &DirtyState) {
        let flags = if owed.rebuild_geometry {
            DirtyFlags::ALL
        } else {
            DirtyFlags::DYNAMIC_MODIFIER
        };
        // shrunk so the area stays off the neighbouring tiles
        let bounds = tile.bounds();
        let shrunk = bounds.expand_by_vec(Vec3::new(-1.0, 0.0, -1.0));
        let area = if shrunk.is_valid() {
            shrunk
        } else {
            Bounds::new(bounds.center(), bounds.center())
        };
        self.tracker.push(DirtyArea::new(area, flags));
    }

    /// Applies the pending dirty areas to the tiles they touch
    fn mark_dirty_generators(&mut self) {
        let border = self.config.border_world_size();
        let agent_height = self.config.agent_height;
        for area in self.tracker.take_pending() {
            let grown = grow_dirty_bounds(
                &area.bounds,
                border,
                agent_height,
                area.has_flag(DirtyFlags::USE_AGENT_HEIGHT),
            );
            let Some(range) = self.layout.tile_range(&grown) else {
                continue;
            };
            for (x, y) in range.iter() {
                let index = self.layout.tile_index(x, y);
                self.tiles[index].set_dirty(&area, &grown);
                self.tracker.mark_tile(index);
            }
        }
    }

    fn schedule_dirty_tiles(&mut self) {
        self.mark_dirty_generators();

        let (w, h) = (self.layout.tiles_w, self.layout.tiles_h);
        let mut order: Vec<usize> = self.tracker.dirty_tiles().collect();
        order.sort_by_key(|&index| {
            let tile = &self.tiles[index];
            tile_order_key(w, h, tile.tile_x(), tile.tile_y())
        });

        let pad = self.config.border_world_size();
        for index in order {
            if self.scheduler.queue_len() >= MAX_QUEUED_GENERATORS {
                break;
            }
            let tile = Arc::clone(&self.tiles[index]);
            if tile.is_being_rebuilt() {
                debug!(
                    "tile ({}, {}) is still building, postponed",
                    tile.tile_x(),
                    tile.tile_y()
                );
                continue;
            }

            let state = tile.prepare();
            if state.rebuild_geometry {
                tile.init(
                    self.grid_tile_bounds(tile.tile_x(), tile.tile_y()),
                    &self.inclusion_volumes,
                );
            }
            self.tracker.unmark_tile(index);
            if !state.is_dirty() {
                tile.cancel_pending();
                self.scheduler.dequeue(index);
                continue;
            }

            let query = tile.bounds().expand_by_vec(Vec3::new(pad, 0.0, pad));
            tile.fill(self.source.as_ref(), &query);
            tile.mark_pending();
            self.scheduler.enqueue(index);
        }
    }

    /// Starts queued builds while slots are free. Returns how many started.
    fn update_workers(&mut self) -> usize {
        let mut started = 0;
        while let Some(index) = self.scheduler.next_ready() {
            let tile = Arc::clone(&self.tiles[index]);
            if !tile.initiate_rebuild() {
                tile.cancel_pending();
                self.tracker.mark_tile(index);
                continue;
            }
            let job = self.build_job(tile);
            self.scheduler.dispatch(job);
            started += 1;
        }
        started
    }

    fn build_job(&self, tile: Arc<TileGenerator>) -> impl FnOnce() -> Completion + Send + 'static {
        let shared = Arc::downgrade(&self.shared);
        let version = self.version();
        let config = Arc::clone(&self.config);
        let registry = Arc::clone(&self.registry);
        let ordering = Arc::clone(&self.ordering);
        let compressor = Arc::clone(&self.compressor);

        move || {
            let result = match shared.upgrade() {
                Some(shared) if shared.version.load(Ordering::Acquire) == version => {
                    let env = BuildEnv {
                        config: &config,
                        registry: &registry,
                        ordering: ordering.as_ref(),
                        compressor: compressor.as_ref(),
                    };
                    let mut ctx =
                        RecastContext::for_tile(tile.tile_x(), tile.tile_y(), Arc::clone(&shared.abort));
                    let mut scratch = shared.scratch.checkout();
                    let result = tile.generate(&env, &mut ctx, &mut scratch);
                    shared.scratch.checkin(scratch);
                    result
                }
                _ => Err(Error::Aborted),
            };
            Completion {
                tile,
                version,
                result,
            }
        }
    }

    fn request_rebuild_all(&self) {
        if self.nav_bounds.is_valid() {
            self.tracker
                .replace_pending(DirtyArea::new(self.nav_bounds, DirtyFlags::ALL));
        }
    }

    /// Rebuilds every tile from scratch. Deferred while builds are running.
    pub fn rebuild_all(&mut self) {
        if self.scheduler.in_flight() > 0 {
            self.rebuild_all_deferred = true;
            return;
        }
        self.request_rebuild_all();
    }

    /// Queues dirty areas for the next scheduling pass. The batch is ignored
    /// when none of it touches the navigation bounds.
    pub fn rebuild_dirty_areas(&mut self, areas: &[DirtyArea]) -> bool {
        if self.tiles.is_empty() || !areas.iter().any(|a| a.bounds.intersects(&self.nav_bounds)) {
            return false;
        }
        self.tracker.extend(areas);
        true
    }

    /// Marks a single tile for a full rebuild
    pub fn build_tile(&mut self, x: i32, y: i32) -> Result<()> {
        let Some(tile) = self.tile_at(x, y) else {
            return Err(Error::NavMeshGeneration(format!(
                "tile ({}, {}) is outside the {}x{} grid",
                x, y, self.layout.tiles_w, self.layout.tiles_h
            )));
        };
        let bounds = tile.bounds();
        tile.set_dirty(&DirtyArea::new(bounds, DirtyFlags::ALL), &bounds);
        let index = tile.index();
        self.tracker.mark_tile(index);
        Ok(())
    }

    /// Drops queued work and tells running builds to stop. Their results are
    /// discarded when they report back.
    pub fn cancel_build(&mut self) {
        info!(
            "cancelling navmesh build: {} running, {} queued",
            self.scheduler.in_flight(),
            self.scheduler.queue_len()
        );
        self.shared.abort.store(true, Ordering::Release);
        for index in self.scheduler.clear_queue() {
            self.tiles[index].cancel_pending();
        }
        self.tracker.reset();
        self.rebuild_all_deferred = false;
    }

    /// Stops scheduling passes until [`NavMeshGenerator::unlock_building`]
    pub fn lock_building(&mut self) {
        self.locked = true;
    }

    /// Resumes scheduling; `force` also requests a rebuild from scratch
    pub fn unlock_building(&mut self, force: bool) {
        self.locked = false;
        if force {
            self.rebuild_all();
        }
    }

    pub fn is_building_locked(&self) -> bool {
        self.locked
    }

    pub fn is_build_in_progress(&self, check_dirty: bool) -> bool {
        self.scheduler.in_flight() > 0
            || self.scheduler.queue_len() > 0
            || (check_dirty && (self.has_dirty_tiles() || self.rebuild_all_deferred))
    }

    pub fn are_any_tiles_being_built(&self, check_dirty: bool) -> bool {
        self.scheduler.in_flight() > 0 || (check_dirty && self.scheduler.queue_len() > 0)
    }

    /// Dirty areas or tiles waiting for a scheduling pass
    pub fn has_dirty_tiles(&self) -> bool {
        !self.tracker.is_idle()
    }

    pub fn is_tile_fresh(&self, x: i32, y: i32, freshness: Duration) -> bool {
        self.tile_at(x, y).is_some_and(|tile| tile.is_fresh(freshness))
    }

    pub fn num_remaining_build_tasks(&self) -> usize {
        self.scheduler.queue_len() + self.scheduler.in_flight()
    }

    /// Bytes held by tile inputs, compressed layers and unreleased blobs
    pub fn used_memory(&self) -> usize {
        let tiles: usize = self.tiles.iter().map(|t| t.used_memory()).sum();
        let released: usize = self.released.iter().map(Vec::len).sum();
        tiles + released + self.tiles.len() * std::mem::size_of::<TileGenerator>()
    }

    /// Structural failures recorded for a tile
    pub fn failure_count(&self, x: i32, y: i32) -> usize {
        self.failures.get(&(x, y)).copied().unwrap_or(0)
    }

    pub fn build_stats(&self) -> &BuildStats {
        &self.stats
    }

    /// Blobs removed from the sink since the last call. The host frees them
    /// once no reader can still see the old tiles.
    pub fn take_released_blobs(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.released)
    }

    /// Grid version; bumped whenever the grid is laid out anew
    pub fn version(&self) -> u32 {
        self.shared.version.load(Ordering::Acquire)
    }

    pub fn max_concurrent_builds(&self) -> usize {
        self.scheduler.max_concurrent()
    }

    pub fn settings(&self) -> &NavGeneratorConfig {
        &self.settings
    }

    pub fn config(&self) -> &TileBuildConfig {
        &self.config
    }

    pub fn navigation_bounds(&self) -> Bounds {
        self.nav_bounds
    }

    /// Tiles along x and z
    pub fn grid_size(&self) -> (i32, i32) {
        (self.layout.tiles_w, self.layout.tiles_h)
    }

    pub fn tile_bounds(&self, x: i32, y: i32) -> Option<Bounds> {
        self.tile_at(x, y).map(|tile| tile.bounds())
    }

    pub fn tile_status(&self, x: i32, y: i32) -> Option<TileStatus> {
        self.tile_at(x, y).map(|tile| tile.status())
    }

    pub fn tile_dirty_state(&self, x: i32, y: i32) -> Option<DirtyState> {
        self.tile_at(x, y).map(|tile| tile.dirty_state())
    }

    pub fn tile_layer_count(&self, x: i32, y: i32) -> Option<usize> {
        self.tile_at(x, y).map(|tile| tile.layer_bounds().len())
    }
}

impl Drop for NavMeshGenerator {
    fn drop(&mut self) {
        self.shared.abort.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{ElementIndex, NavigationElement};
    use crate::io::{GeometryCache, NavTileData};
    use crate::modifiers::{AreaClass, AreaModifier, AreaShape, CompositeModifier};
    use crate::sink::{InMemoryMeshSink, RuntimeMeshSink};
    use crate::tile_generator::TileLayerResult;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    const WATER: AreaClass = AreaClass(7);
    const ROAD: AreaClass = AreaClass(8);

    struct MostExpensiveFirst;

    impl AreaOrdering for MostExpensiveFirst {
        fn sort_areas(&self, areas: &mut [AreaModifier], registry: &AreaClassRegistry) {
            areas.sort_by(|a, b| {
                registry
                    .class_cost(b.class)
                    .total_cmp(&registry.class_cost(a.class))
            });
        }
    }

    struct CountingCompressor(Arc<AtomicUsize>);

    impl LayerCompressor for CountingCompressor {
        fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
            self.0.fetch_add(1, Ordering::Relaxed);
            Lz4Compressor.compress(data)
        }

        fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
            Lz4Compressor.decompress(data)
        }
    }

    struct World {
        index: Arc<ElementIndex>,
        sink: Arc<Mutex<InMemoryMeshSink>>,
        generator: NavMeshGenerator,
    }

    fn settings(tile_size: f32) -> NavGeneratorConfig {
        NavGeneratorConfig::new()
            .with_cell_size(1.0, 0.5)
            .with_agent(1.0, 2.0, 0.5)
            .with_tile_size(tile_size)
            .with_region_sizes(0.0, 4.0)
            .with_detail_sampling(0.0, 1.0)
    }

    fn floor(id: u64, y: f32, min: f32, max: f32) -> NavigationElement {
        let quad = GeometryCache::new(
            vec![
                Vec3::new(min, y, min),
                Vec3::new(min, y, max),
                Vec3::new(max, y, max),
                Vec3::new(max, y, min),
            ],
            vec![0, 1, 2, 0, 2, 3],
        );
        NavigationElement::new(id, Bounds::empty())
            .with_geometry(&quad)
            .unwrap()
    }

    fn world(tile_size: f32, capacity: usize, mode: BuildMode) -> World {
        world_with(settings(tile_size), capacity, mode)
    }

    fn world_with(settings: NavGeneratorConfig, capacity: usize, mode: BuildMode) -> World {
        let index = Arc::new(ElementIndex::new());
        let sink = InMemoryMeshSink::shared(capacity);
        let shared_sink: SharedMeshSink = sink.clone();
        let mut registry = AreaClassRegistry::new();
        registry.register(WATER, 5, 0x4, 10.0).unwrap();
        let generator = NavMeshGenerator::new(settings, index.clone(), shared_sink, mode)
            .unwrap()
            .with_area_classes(registry);
        World {
            index,
            sink,
            generator,
        }
    }

    fn bounds(min: (f32, f32, f32), max: (f32, f32, f32)) -> Bounds {
        Bounds::new(Vec3::new(min.0, min.1, min.2), Vec3::new(max.0, max.1, max.2))
    }

    impl World {
        fn run_until_idle(&mut self) {
            for _ in 0..32 {
                self.generator.tick();
                if !self.generator.is_build_in_progress(true) {
                    return;
                }
            }
            panic!("generator did not settle");
        }

        fn layer_count(&self, x: i32, y: i32) -> usize {
            self.sink.lock().unwrap().query(x, y).len()
        }

        fn tile_data(&self, x: i32, y: i32) -> Vec<NavTileData> {
            let sink = self.sink.lock().unwrap();
            let tiles = sink
                .tile_blobs(x, y)
                .into_iter()
                .map(|blob| NavTileData::decode(blob).unwrap())
                .collect();
            tiles
        }
    }

    /// 2x2 tiles of 24 units over a flat floor
    fn two_by_two() -> World {
        let mut world = world(24.0, 64, BuildMode::Synchronous);
        world.index.insert(floor(1, 0.0, -1.0, 47.0));
        world
            .generator
            .init(NavigationBounds::from_world(bounds((0.0, -1.0, 0.0), (46.0, 5.0, 46.0))))
            .unwrap();
        world
    }

    #[test]
    fn test_init_lays_out_grid() {
        let world = two_by_two();
        let gen = &world.generator;
        assert_eq!(gen.grid_size(), (2, 2));
        assert_eq!(gen.version(), 1);
        assert_eq!(gen.max_concurrent_builds(), 1);
        let tile = gen.tile_bounds(1, 0).unwrap();
        assert_eq!(tile.min, Vec3::new(23.0, -2.0, -1.0));
        assert_eq!(tile.max, Vec3::new(47.0, 6.0, 23.0));
        assert!(gen.tile_bounds(2, 0).is_none());
        assert_eq!(gen.navigation_bounds().min, Vec3::new(-1.0, -2.0, -1.0));
        assert_eq!(gen.tile_status(0, 0), Some(TileStatus::Idle));
        assert_eq!(gen.tile_status(0, 2), None);
        assert_eq!(gen.config().max_polys_per_tile, max_polys_for_tile_bits(5));
    }

    /// Floor over the whole world plus a ledge at y=3 over x,z 4..12, in one element
    fn floor_with_ledge() -> NavigationElement {
        let mut verts = Vec::new();
        for (y, min, max) in [(0.0, -1.0, 70.0), (3.0, 4.0, 12.0)] {
            verts.extend([
                Vec3::new(min, y, min),
                Vec3::new(min, y, max),
                Vec3::new(max, y, max),
                Vec3::new(max, y, min),
            ]);
        }
        let geometry = GeometryCache::new(verts, vec![0, 1, 2, 0, 2, 3, 4, 5, 6, 4, 6, 7]);
        NavigationElement::new(1, Bounds::empty())
            .with_geometry(&geometry)
            .unwrap()
    }

    #[test]
    fn test_voxel_cache_does_not_replay_into_moved_grid() {
        let moved = NavigationBounds::from_world(bounds((20.0, -1.0, 20.0), (66.0, 5.0, 66.0)));

        let mut cached = world_with(settings(24.0).with_voxel_cache(true), 64, BuildMode::Synchronous);
        cached.index.insert(floor_with_ledge());
        cached
            .generator
            .init(NavigationBounds::from_world(bounds((0.0, -1.0, 0.0), (46.0, 5.0, 46.0))))
            .unwrap();
        cached.generator.rebuild_all();
        cached.run_until_idle();
        assert!(cached.layer_count(0, 0) > 1);

        cached.generator.init(moved.clone()).unwrap();
        cached.generator.rebuild_all();
        cached.run_until_idle();

        let mut fresh = world(24.0, 64, BuildMode::Synchronous);
        fresh.index.insert(floor_with_ledge());
        fresh.generator.init(moved).unwrap();
        fresh.generator.rebuild_all();
        fresh.run_until_idle();

        assert_eq!(cached.generator.grid_size(), fresh.generator.grid_size());
        for y in 0..2 {
            for x in 0..2 {
                assert_eq!(
                    cached.layer_count(x, y),
                    fresh.layer_count(x, y),
                    "tile ({}, {})",
                    x,
                    y
                );
                assert_eq!(
                    cached.generator.tile_layer_count(x, y),
                    fresh.generator.tile_layer_count(x, y)
                );
            }
        }
        assert_eq!(cached.layer_count(0, 0), 1);
    }

    #[test]
    fn test_init_rejects_bad_bounds() {
        let mut world = world(16.0, 8, BuildMode::Synchronous);
        assert!(world.generator.init(NavigationBounds::default()).is_err());

        let huge = NavigationBounds::from_world(bounds((0.0, 0.0, 0.0), (1.0e9, 1.0, 1.0e9)));
        assert!(matches!(world.generator.init(huge), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_inclusion_volume_limits_walkable_tiles() {
        let mut world = world(8.0, 64, BuildMode::Synchronous);
        world.index.insert(floor(1, 0.0, -1.0, 31.0));
        let nav = NavigationBounds::from_world(bounds((0.0, -1.0, 0.0), (30.0, 5.0, 30.0)))
            .with_inclusion_volume(bounds((10.0, -1.0, 10.0), (20.0, 3.0, 20.0)));
        world.generator.init(nav).unwrap();
        assert_eq!(world.generator.grid_size(), (4, 4));

        world.generator.rebuild_all();
        world.run_until_idle();
        assert_eq!(world.generator.build_stats().tiles_built, 16);

        for y in 0..4 {
            for x in 0..4 {
                let inside = (1..=2).contains(&x) && (1..=2).contains(&y);
                if inside {
                    let layers = world.tile_data(x, y);
                    assert!(!layers.is_empty(), "tile ({}, {}) has no layers", x, y);
                    assert!(layers.iter().any(|l| l.poly_count() > 0));
                } else {
                    assert_eq!(world.layer_count(x, y), 0, "tile ({}, {})", x, y);
                    assert_eq!(world.generator.tile_layer_count(x, y), Some(0));
                }
                assert_eq!(world.generator.failure_count(x, y), 0);
            }
        }
    }

    #[test]
    fn test_dynamic_modifier_touches_one_tile() {
        let mut world = two_by_two();
        world.generator.rebuild_all();
        world.run_until_idle();
        assert_eq!(world.generator.build_stats().tiles_built, 4);
        assert_eq!(world.generator.build_stats().layers_built, 4);

        let pond = AreaModifier::new(
            WATER,
            AreaShape::Box {
                center: Vec3::new(11.0, 0.0, 11.0),
                extent: Vec3::splat(0.5),
            },
        );
        let element = NavigationElement::new(2, Bounds::empty())
            .with_modifier(CompositeModifier::default().with_area(pond));
        let area = DirtyArea::new(element.bounds, DirtyFlags::DYNAMIC_MODIFIER);
        world.index.insert(element);
        assert!(world.generator.rebuild_dirty_areas(&[area]));

        world.generator.mark_dirty_generators();
        let state = world.generator.tile_dirty_state(0, 0).unwrap();
        assert!(!state.rebuild_geometry);
        assert!(state.has_dirty_layer(0));
        assert_eq!(state.dirty_layer_count(), 1);
        for (x, y) in [(1, 0), (0, 1), (1, 1)] {
            assert!(!world.generator.tile_dirty_state(x, y).unwrap().is_dirty());
        }

        world.run_until_idle();
        assert_eq!(world.generator.build_stats().tiles_built, 5);
        let layers = world.tile_data(0, 0);
        assert_eq!(layers.len(), 1);
        assert!(layers[0].poly_areas.contains(&5));
        assert_eq!(world.generator.take_released_blobs().len(), 1);
    }

    #[test]
    fn test_geometry_rebuild_leaves_no_orphaned_layers() {
        let mut world = world(16.0, 64, BuildMode::Synchronous);
        world.index.insert(floor(1, 0.0, -1.0, 15.0));
        world.index.insert(floor(2, 5.0, -1.0, 15.0));
        world
            .generator
            .init(NavigationBounds::from_world(bounds((0.0, -1.0, 0.0), (14.0, 8.0, 14.0))))
            .unwrap();
        assert_eq!(world.generator.grid_size(), (1, 1));

        world.generator.rebuild_all();
        world.run_until_idle();
        assert_eq!(world.layer_count(0, 0), 2);

        let upper = world.index.remove(2).unwrap();
        assert!(world
            .generator
            .rebuild_dirty_areas(&[DirtyArea::new(upper.bounds, DirtyFlags::GEOMETRY)]));
        world.run_until_idle();

        assert_eq!(world.layer_count(0, 0), 1);
        assert_eq!(world.generator.tile_layer_count(0, 0), Some(1));
        assert_eq!(world.generator.take_released_blobs().len(), 2);
        assert!(world.generator.is_tile_fresh(0, 0, Duration::from_secs(60)));
    }

    #[test]
    fn test_custom_area_ordering_and_compressor() {
        let mut world = two_by_two();
        let mut registry = AreaClassRegistry::new();
        registry.register(WATER, 5, 0x4, 10.0).unwrap();
        registry.register(ROAD, 6, 0x1, 0.5).unwrap();
        let compressed = Arc::new(AtomicUsize::new(0));
        world.generator = world
            .generator
            .with_area_classes(registry)
            .with_area_ordering(MostExpensiveFirst)
            .with_compressor(CountingCompressor(Arc::clone(&compressed)));

        let shape = AreaShape::Box {
            center: Vec3::new(11.0, 0.0, 11.0),
            extent: Vec3::splat(0.5),
        };
        let overlapping = CompositeModifier::default()
            .with_area(AreaModifier::new(WATER, shape.clone()))
            .with_area(AreaModifier::new(ROAD, shape));
        world
            .index
            .insert(NavigationElement::new(2, Bounds::empty()).with_modifier(overlapping));

        world.generator.rebuild_all();
        world.run_until_idle();
        assert_eq!(compressed.load(Ordering::Relaxed), 4);

        // the cheap road is painted last and wins
        let layers = world.tile_data(0, 0);
        assert!(layers[0].poly_areas.contains(&6));
        assert!(!layers[0].poly_areas.contains(&5));
    }

    #[test]
    fn test_stale_results_are_discarded() {
        let mut world = two_by_two();
        let tile = Arc::clone(&world.generator.tiles[0]);
        let output = TileBuildOutput {
            rebuilt_geometry: true,
            layer_count: 1,
            layers: vec![TileLayerResult {
                layer: 0,
                blob: Some(vec![1, 2, 3]),
            }],
            failed_layers: Vec::new(),
        };
        world.generator.handle_completion(Completion {
            tile,
            version: world.generator.version() - 1,
            result: Ok(output),
        });
        assert_eq!(world.generator.build_stats().stale_discarded, 1);
        assert!(world.sink.lock().unwrap().is_empty());
    }

    #[test]
    fn test_cancelled_results_never_reach_sink() {
        let mut world = two_by_two();
        world.generator.rebuild_all();
        world.run_until_idle();
        let before = world.sink.lock().unwrap().len();

        world.generator.cancel_build();
        let tile = Arc::clone(&world.generator.tiles[0]);
        world.generator.handle_completion(Completion {
            tile,
            version: world.generator.version(),
            result: Ok(TileBuildOutput {
                rebuilt_geometry: true,
                layer_count: 0,
                layers: Vec::new(),
                failed_layers: Vec::new(),
            }),
        });
        assert_eq!(world.generator.build_stats().aborted, 1);
        assert_eq!(world.sink.lock().unwrap().len(), before);
        assert!(!world.generator.has_dirty_tiles());

        world.generator.tick();
        assert!(!world.generator.shared.abort.load(Ordering::Acquire));
    }

    #[test]
    fn test_cancelled_build_keeps_owed_work_tracked() {
        let mut world = two_by_two();
        let tile = Arc::clone(&world.generator.tiles[2]);
        tile.set_dirty(&DirtyArea::new(tile.bounds(), DirtyFlags::ALL), &tile.bounds());
        tile.prepare();
        tile.mark_pending();
        assert!(tile.initiate_rebuild());

        world.generator.cancel_build();
        assert!(!world.generator.has_dirty_tiles());
        world.generator.handle_completion(Completion {
            tile: Arc::clone(&tile),
            version: world.generator.version(),
            result: Err(Error::Aborted),
        });
        assert_eq!(world.generator.build_stats().aborted, 1);
        assert!(tile.dirty_state().rebuild_geometry);
        assert!(world.generator.has_dirty_tiles());
        assert!(world.generator.is_build_in_progress(true));

        world.run_until_idle();
        assert!(!tile.is_dirty());
        assert_eq!(world.layer_count(0, 1), 1);
        assert_eq!(world.generator.build_stats().tiles_built, 1);
    }

    #[test]
    fn test_transient_failure_requeues_tile() {
        let mut world = two_by_two();
        world.generator.build_tile(1, 1).unwrap();
        world.generator.mark_dirty_generators();
        let tile = Arc::clone(&world.generator.tiles[3]);
        tile.prepare();
        tile.mark_pending();
        assert!(tile.initiate_rebuild());
        world.generator.tracker.reset();

        world.generator.handle_completion(Completion {
            tile: Arc::clone(&tile),
            version: world.generator.version(),
            result: Err(Error::Recast("allocation failed".to_string())),
        });
        assert_eq!(world.generator.build_stats().transient_failures, 1);
        assert_eq!(tile.status(), TileStatus::Idle);
        assert!(tile.dirty_state().rebuild_geometry);
        assert!(world.generator.has_dirty_tiles());

        // the retry area is grown by the border, so neighbours rebuild too
        world.run_until_idle();
        assert_eq!(tile.status(), TileStatus::Idle);
        assert!(!tile.is_dirty());
        assert_eq!(world.layer_count(1, 1), 1);
    }

    #[test]
    fn test_structural_failure_is_counted_not_retried() {
        let mut world = two_by_two();
        let tile = Arc::clone(&world.generator.tiles[0]);
        tile.set_dirty(&DirtyArea::new(tile.bounds(), DirtyFlags::ALL), &tile.bounds());
        tile.prepare();
        tile.mark_pending();
        assert!(tile.initiate_rebuild());

        world.generator.handle_completion(Completion {
            tile: Arc::clone(&tile),
            version: world.generator.version(),
            result: Err(Error::VertexLimitExceeded { count: 70000, max: 65535 }),
        });
        assert_eq!(world.generator.failure_count(0, 0), 1);
        assert!(!tile.is_dirty());
        assert!(!world.generator.has_dirty_tiles());
    }

    #[test]
    fn test_pipeline_limit_is_not_retried() {
        let mut world = two_by_two();
        let tile = Arc::clone(&world.generator.tiles[1]);
        tile.set_dirty(&DirtyArea::new(tile.bounds(), DirtyFlags::ALL), &tile.bounds());
        tile.prepare();
        tile.mark_pending();
        assert!(tile.initiate_rebuild());

        world.generator.handle_completion(Completion {
            tile: Arc::clone(&tile),
            version: world.generator.version(),
            result: Err(Error::LimitExceeded {
                what: "tile layer",
                count: 256,
                max: 255,
            }),
        });
        assert_eq!(world.generator.failure_count(1, 0), 1);
        assert_eq!(world.generator.build_stats().transient_failures, 0);
        assert_eq!(tile.status(), TileStatus::Idle);
        assert!(!tile.is_dirty());
        assert!(!world.generator.has_dirty_tiles());

        world.run_until_idle();
        assert_eq!(world.generator.build_stats().tiles_built, 0);
        assert_eq!(world.generator.failure_count(1, 0), 1);
        assert_eq!(world.layer_count(1, 0), 0);
    }

    #[test]
    fn test_sink_capacity_is_a_tile_failure() {
        let mut world = world(24.0, 1, BuildMode::Synchronous);
        world.index.insert(floor(1, 0.0, -1.0, 47.0));
        world
            .generator
            .init(NavigationBounds::from_world(bounds((0.0, -1.0, 0.0), (46.0, 5.0, 46.0))))
            .unwrap();
        world.generator.rebuild_all();
        world.run_until_idle();

        let stats = world.generator.build_stats().clone();
        assert_eq!(stats.tiles_built, 4);
        assert_eq!(stats.layers_built, 1);
        assert_eq!(stats.capacity_errors, 3);
        let failures: usize = (0..2)
            .flat_map(|y| (0..2).map(move |x| (x, y)))
            .map(|(x, y)| world.generator.failure_count(x, y))
            .sum();
        assert_eq!(failures, 3);
        assert!(!world.generator.has_dirty_tiles());
        assert_eq!(world.generator.take_released_blobs().len(), 3);
    }

    #[test]
    fn test_dirt_during_build_is_postponed() {
        let mut world = two_by_two();
        let tile = Arc::clone(&world.generator.tiles[0]);
        tile.prepare();
        tile.mark_pending();
        assert!(tile.initiate_rebuild());

        world.generator.rebuild_all();
        world.generator.tick();
        assert_eq!(tile.status(), TileStatus::Building);
        assert_eq!(world.layer_count(0, 0), 0);
        assert_eq!(world.generator.build_stats().tiles_built, 3);
        assert!(world.generator.has_dirty_tiles());

        tile.finish_rebuild();
        world.run_until_idle();
        assert_eq!(world.layer_count(0, 0), 1);
        assert_eq!(world.generator.build_stats().tiles_built, 4);
    }

    #[test]
    fn test_locked_generator_does_not_schedule() {
        let mut world = two_by_two();
        world.generator.lock_building();
        assert!(world.generator.is_building_locked());
        world.generator.rebuild_all();
        world.generator.tick();
        assert_eq!(world.generator.build_stats().tiles_built, 0);
        assert_eq!(world.generator.num_remaining_build_tasks(), 0);
        assert!(!world.generator.are_any_tiles_being_built(true));
        assert!(world.generator.is_build_in_progress(true));
        assert!(!world.generator.is_build_in_progress(false));

        world.generator.unlock_building(false);
        assert!(!world.generator.is_building_locked());
        world.run_until_idle();
        assert_eq!(world.generator.build_stats().tiles_built, 4);
    }

    #[test]
    fn test_dirty_area_intake_filter() {
        let mut world = two_by_two();
        let far = DirtyArea::new(bounds((500.0, 0.0, 500.0), (501.0, 1.0, 501.0)), DirtyFlags::ALL);
        assert!(!world.generator.rebuild_dirty_areas(&[far]));
        let near = DirtyArea::new(bounds((1.0, 0.0, 1.0), (2.0, 1.0, 2.0)), DirtyFlags::ALL);
        assert!(world.generator.rebuild_dirty_areas(&[far, near]));
        assert!(world.generator.has_dirty_tiles());
        assert!(world.generator.build_tile(2, 0).is_err());
    }

    #[test]
    fn test_reinit_with_new_grid_bumps_version() {
        let mut world = two_by_two();
        world.generator.rebuild_all();
        world.run_until_idle();
        assert_eq!(world.sink.lock().unwrap().len(), 4);

        world
            .generator
            .init(NavigationBounds::from_world(bounds((0.0, -1.0, 0.0), (22.0, 5.0, 22.0))))
            .unwrap();
        assert_eq!(world.generator.version(), 2);
        assert_eq!(world.generator.grid_size(), (1, 1));
        assert!(world.sink.lock().unwrap().is_empty());
        assert_eq!(world.generator.take_released_blobs().len(), 4);

        // same grid again keeps the version
        world
            .generator
            .init(NavigationBounds::from_world(bounds((0.0, -1.0, 0.0), (22.0, 5.0, 22.0))))
            .unwrap();
        assert_eq!(world.generator.version(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_background_builds_respect_slot_limit() {
        let mut world = world(8.0, 64, BuildMode::current());
        world.generator = world.generator.with_max_concurrent_builds(2);
        world.index.insert(floor(1, 0.0, -1.0, 31.0));
        world
            .generator
            .init(NavigationBounds::from_world(bounds((0.0, -1.0, 0.0), (30.0, 5.0, 30.0))))
            .unwrap();
        assert_eq!(world.generator.max_concurrent_builds(), 2);
        world.generator.rebuild_all();

        for _ in 0..2000 {
            world.generator.tick();
            let building = world
                .generator
                .tiles
                .iter()
                .filter(|t| t.status() == TileStatus::Building)
                .count();
            assert!(building <= 2);
            assert!(world.generator.num_remaining_build_tasks() <= 16);
            if building > 0 {
                assert!(world.generator.are_any_tiles_being_built(false));
            }
            if !world.generator.is_build_in_progress(true) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        assert!(!world.generator.is_build_in_progress(true));
        assert_eq!(world.generator.build_stats().tiles_built, 16);
        assert_eq!(world.sink.lock().unwrap().len(), 16);
    }
}
