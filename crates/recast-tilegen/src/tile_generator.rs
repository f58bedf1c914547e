//! Single-tile build pipeline
//!
//! A [`TileGenerator`] owns the inputs and dirty state of one tile and turns
//! them into encoded layer blobs. The build runs in two phases:
//!
//! 1. Geometry: voxelize the collision inputs, filter, compact, erode, bake
//!    static area modifiers and split the result into compressed layers.
//! 2. Layers: for every dirty layer, decompress, paint dynamic modifiers and
//!    build regions, contours, clusters, polygons and the detail mesh.
//!
//! Layer-only rebuilds skip the first phase and reuse the compressed layers
//! kept from the last geometry build.

use crate::config::TileBuildConfig;
use crate::dirty::{DirtyArea, DirtyFlags, DirtyState};
use crate::geometry::{GeometrySnapshot, GeometrySource};
use crate::io::{
    CompressedLayer, GeometryCache, LayerCompressor, NavTileData, OffMeshConnection,
    SegmentConnection, TileCluster, VoxelGrid, OFFMESH_BIDIR, OFFMESH_POINT, OFFMESH_SEGMENT,
};
use crate::modifiers::{
    AreaClass, AreaClassRegistry, AreaModifier, AreaOrdering, AreaShape, OffMeshLink, SegmentLink,
};
use crate::scratch::{zeroed_areas, HeightfieldSlot, TileScratch};
use glam::Vec3;
use recast::{
    build_contours, build_heightfield_layers, build_poly_mesh_detail, build_poly_mesh_limited,
    build_regions, erode_walkable_area, grow_convex_hull, mark_box_area, mark_convex_poly_area,
    mark_cylinder_area, mark_walkable_triangles_cos, rasterize_triangles, ClusterSet,
    CompactHeightfield, Heightfield, PolyMesh, PolyMeshDetail, RecastContext, SpanCache,
    TimerCategory, NULL_AREA,
};
use recast_common::{Bounds, Error, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use web_time::Instant;

/// Where a tile is in its build cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileStatus {
    Idle,
    /// Inputs gathered, waiting for a build slot
    Queued,
    Building,
}

/// Failure of a single layer build
#[derive(Debug, thiserror::Error)]
pub enum LayerBuildError {
    /// The attempt failed but a retry may succeed; the whole tile is re-queued
    #[error("layer build failed: {0}")]
    Transient(#[source] Error),
    /// Retrying reproduces the failure; the layer is left empty
    #[error("layer build failed permanently: {0}")]
    Structural(#[source] Error),
}

impl From<Error> for LayerBuildError {
    fn from(err: Error) -> Self {
        if err.is_structural() {
            LayerBuildError::Structural(err)
        } else {
            LayerBuildError::Transient(err)
        }
    }
}

impl LayerBuildError {
    pub fn is_structural(&self) -> bool {
        matches!(self, LayerBuildError::Structural(_))
    }

    pub fn into_error(self) -> Error {
        match self {
            LayerBuildError::Transient(err) | LayerBuildError::Structural(err) => err,
        }
    }
}

/// Outcome of one rebuilt layer
#[derive(Debug, Clone, PartialEq)]
pub struct TileLayerResult {
    pub layer: i32,
    /// Encoded [`NavTileData`]; `None` when the layer has no polygons or failed
    pub blob: Option<Vec<u8>>,
}

/// Everything a finished tile build hands back for integration
#[derive(Debug, Default)]
pub struct TileBuildOutput {
    /// The geometry phase ran, so every previous layer of the tile is stale
    pub rebuilt_geometry: bool,
    /// Layers the tile has after this build
    pub layer_count: usize,
    pub layers: Vec<TileLayerResult>,
    /// Layers that failed with a structural error
    pub failed_layers: Vec<(i32, Error)>,
}

/// Read-only collaborators shared by every build of a session
#[derive(Clone, Copy)]
pub struct BuildEnv<'a> {
    pub config: &'a TileBuildConfig,
    pub registry: &'a AreaClassRegistry,
    pub ordering: &'a dyn AreaOrdering,
    pub compressor: &'a dyn LayerCompressor,
}

#[derive(Debug, Default)]
struct TileState {
    bounds: Bounds,
    inclusion_bounds: Vec<Bounds>,
    fully_encapsulated: bool,
    outside_inclusion: bool,
    /// Dirtiness no scheduling pass has picked up yet
    dirty: DirtyState,
    /// Dirtiness the queued build was prepared for
    prepared: DirtyState,
    /// Dirtiness the running build works off
    generating: DirtyState,
    pending: bool,
    being_rebuilt: bool,
    /// Bounds of every built layer, padded vertically by the agent step height
    layer_bounds: Vec<Bounds>,
    last_build: Option<Instant>,
}

#[derive(Debug, Default)]
struct TileInputs {
    geometry: Vec<GeometrySnapshot>,
    static_areas: Vec<AreaModifier>,
    dynamic_areas: Vec<AreaModifier>,
    links: Vec<OffMeshLink>,
    segment_links: Vec<SegmentLink>,
}

#[derive(Debug, Default)]
struct TileData {
    inputs: TileInputs,
    layers: Vec<CompressedLayer>,
}

impl TileData {
    fn memory_size(&self) -> usize {
        let layers: usize = self.layers.iter().map(CompressedLayer::memory_size).sum();
        let inputs = &self.inputs;
        layers
            + inputs.geometry.len() * std::mem::size_of::<GeometrySnapshot>()
            + (inputs.static_areas.len() + inputs.dynamic_areas.len())
                * std::mem::size_of::<AreaModifier>()
            + inputs.links.len() * std::mem::size_of::<OffMeshLink>()
            + inputs.segment_links.len() * std::mem::size_of::<SegmentLink>()
    }
}

/// Build state and inputs of one tile
///
/// State flags are only changed from the orchestrating thread; the build
/// itself holds the data lock for its whole duration.
#[derive(Debug)]
pub struct TileGenerator {
    tile_x: i32,
    tile_y: i32,
    index: usize,
    version: u32,
    state: Mutex<TileState>,
    data: Mutex<TileData>,
    memory: AtomicUsize,
}

impl TileGenerator {
    pub fn new(tile_x: i32, tile_y: i32, index: usize, version: u32) -> Self {
        Self {
            tile_x,
            tile_y,
            index,
            version,
            state: Mutex::new(TileState::default()),
            data: Mutex::new(TileData::default()),
            memory: AtomicUsize::new(0),
        }
    }

    pub fn tile_x(&self) -> i32 {
        self.tile_x
    }

    pub fn tile_y(&self) -> i32 {
        self.tile_y
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Grid version the tile was created under
    pub fn version(&self) -> u32 {
        self.version
    }

    fn lock_state(&self) -> MutexGuard<'_, TileState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_data(&self) -> MutexGuard<'_, TileData> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sets the tile bounds and keeps the inclusion volumes touching them.
    ///
    /// A tile outside every configured volume still builds; the voxel filter
    /// leaves it without walkable spans.
    pub fn init(&self, bounds: Bounds, inclusion_volumes: &[Bounds]) {
        let mut state = self.lock_state();
        state.bounds = bounds;
        state.inclusion_bounds = inclusion_volumes
            .iter()
            .filter(|volume| volume.intersects(&bounds))
            .copied()
            .collect();
        state.fully_encapsulated = inclusion_volumes.is_empty()
            || inclusion_volumes.iter().any(|volume| volume.contains(&bounds));
        state.outside_inclusion = !inclusion_volumes.is_empty() && state.inclusion_bounds.is_empty();
    }

    pub fn bounds(&self) -> Bounds {
        self.lock_state().bounds
    }

    pub fn is_outside_inclusion(&self) -> bool {
        self.lock_state().outside_inclusion
    }

    /// Merges a dirty area into the tile. `area_bounds` is the grown box the
    /// area was mapped onto the grid with.
    pub fn set_dirty(&self, area: &DirtyArea, area_bounds: &Bounds) {
        let mut state = self.lock_state();
        let TileState {
            dirty,
            layer_bounds,
            ..
        } = &mut *state;

        if area.has_flag(DirtyFlags::GEOMETRY) {
            dirty.append(&DirtyState::all());
            return;
        }
        // only layers that exist can be repainted
        if area.has_flag(DirtyFlags::DYNAMIC_MODIFIER) {
            for (layer, bounds) in layer_bounds.iter().enumerate() {
                if bounds.intersects(area_bounds) {
                    dirty.mark_dirty_layer(layer);
                }
            }
        }
    }

    pub fn status(&self) -> TileStatus {
        let state = self.lock_state();
        if state.being_rebuilt {
            TileStatus::Building
        } else if state.pending {
            TileStatus::Queued
        } else {
            TileStatus::Idle
        }
    }

    pub fn is_being_rebuilt(&self) -> bool {
        self.lock_state().being_rebuilt
    }

    pub fn is_pending(&self) -> bool {
        self.lock_state().pending
    }

    /// Work the tile owes that has not started building yet
    pub fn dirty_state(&self) -> DirtyState {
        let state = self.lock_state();
        let mut merged = state.prepared.clone();
        merged.append(&state.dirty);
        merged
    }

    pub fn is_dirty(&self) -> bool {
        let state = self.lock_state();
        state.dirty.is_dirty() || state.prepared.is_dirty()
    }

    /// Folds new dirtiness into the state the next build is prepared for
    pub fn prepare(&self) -> DirtyState {
        let mut state = self.lock_state();
        let dirty = std::mem::take(&mut state.dirty);
        state.prepared.append(&dirty);
        state.prepared.clone()
    }

    /// Collects the elements around the tile from `source`. Modifiers of
    /// elements whose geometry is being rebuilt are baked statically; all
    /// other modifiers are painted per layer.
    pub fn fill(&self, source: &dyn GeometrySource, query_bounds: &Bounds) {
        let geometry_dirty = self.lock_state().prepared.rebuild_geometry;
        let mut inputs = TileInputs::default();
        for element in source.elements_in(query_bounds) {
            let baked = geometry_dirty && element.has_geometry();
            let modifier = &element.modifier;
            if baked {
                inputs.static_areas.extend(modifier.areas.iter().cloned());
            } else {
                inputs.dynamic_areas.extend(modifier.areas.iter().cloned());
            }
            inputs.links.extend(modifier.links.iter().cloned());
            inputs.segment_links.extend(modifier.segment_links.iter().cloned());
            if baked {
                inputs.geometry.push(element.snapshot());
            }
        }

        let mut data = self.lock_data();
        data.inputs = inputs;
        self.memory.store(data.memory_size(), Ordering::Relaxed);
    }

    pub fn mark_pending(&self) {
        self.lock_state().pending = true;
    }

    /// Takes the tile out of the queue without building it
    pub fn cancel_pending(&self) {
        let mut state = self.lock_state();
        let prepared = std::mem::take(&mut state.prepared);
        state.dirty.append(&prepared);
        state.pending = false;
    }

    /// Moves the prepared work into the running build. Fails when a build is
    /// already running.
    pub fn initiate_rebuild(&self) -> bool {
        let mut state = self.lock_state();
        if state.being_rebuilt {
            return false;
        }
        state.generating = std::mem::take(&mut state.prepared);
        state.pending = false;
        state.being_rebuilt = true;
        true
    }

    /// Ends a failed or cancelled build. The work it owed is handed back to
    /// the dirty state and returned.
    pub fn abort_rebuild(&self) -> DirtyState {
        let mut state = self.lock_state();
        let generating = std::mem::take(&mut state.generating);
        state.dirty.append(&generating);
        state.being_rebuilt = false;
        generating
    }

    pub fn finish_rebuild(&self) {
        let mut state = self.lock_state();
        state.generating.clear();
        state.being_rebuilt = false;
        state.last_build = Some(Instant::now());
    }

    /// Drops the running and queued work without retrying it. Dirtiness that
    /// arrived during the build is kept.
    pub fn abandon(&self) {
        let mut state = self.lock_state();
        state.generating.clear();
        state.prepared.clear();
        state.pending = false;
        state.being_rebuilt = false;
    }

    pub fn layer_bounds(&self) -> Vec<Bounds> {
        self.lock_state().layer_bounds.clone()
    }

    pub fn last_build_time(&self) -> Option<Instant> {
        self.lock_state().last_build
    }

    /// True when the last successful build finished less than `freshness` ago
    pub fn is_fresh(&self, freshness: Duration) -> bool {
        self.last_build_time()
            .is_some_and(|built| built.elapsed() < freshness)
    }

    /// Bytes held by inputs and compressed layers, as of the last fill or build
    pub fn used_memory(&self) -> usize {
        self.memory.load(Ordering::Relaxed)
    }

    /// Runs the build prepared by [`TileGenerator::initiate_rebuild`]
    pub fn generate(
        &self,
        env: &BuildEnv<'_>,
        ctx: &mut RecastContext,
        scratch: &mut TileScratch,
    ) -> Result<TileBuildOutput> {
        let (mut work, bounds, inclusion, encapsulated) = {
            let state = self.lock_state();
            if !state.being_rebuilt {
                return Err(Error::NavMeshGeneration(format!(
                    "tile ({}, {}) was not scheduled for a rebuild",
                    self.tile_x, self.tile_y
                )));
            }
            (
                state.generating.clone(),
                state.bounds,
                state.inclusion_bounds.clone(),
                state.fully_encapsulated,
            )
        };

        let mut data = self.lock_data();
        let data = &mut *data;
        ctx.start_timer(TimerCategory::Total);

        let result = (|| -> Result<TileBuildOutput> {
            let rebuilt_geometry = work.rebuild_geometry;
            if rebuilt_geometry {
                ctx.check_abort()?;
                let layers = self.build_compressed_layers(
                    env,
                    ctx,
                    scratch,
                    &data.inputs,
                    &bounds,
                    &inclusion,
                    encapsulated,
                )?;
                let climb = env.config.agent_max_climb;
                let layer_bounds = layers
                    .iter()
                    .map(|layer| {
                        let mut b = layer.bounds();
                        b.min.y -= climb;
                        b.max.y += climb;
                        b
                    })
                    .collect();
                data.layers = layers;

                let mut state = self.lock_state();
                state.layer_bounds = layer_bounds;
                drop(state);

                work.rebuild_layers = true;
                work.rebuild_all_layers = true;
            }

            let mut output = TileBuildOutput {
                rebuilt_geometry,
                layer_count: data.layers.len(),
                ..TileBuildOutput::default()
            };
            for (index, layer) in data.layers.iter().enumerate() {
                if !work.has_dirty_layer(index) {
                    continue;
                }
                ctx.check_abort()?;
                let index = index as i32;
                match self.build_layer(env, ctx, &data.inputs, layer, index) {
                    Ok(blob) => output.layers.push(TileLayerResult { layer: index, blob }),
                    Err(LayerBuildError::Structural(err)) => {
                        ctx.log_error(format!("layer {}: {}", index, err));
                        output.layers.push(TileLayerResult {
                            layer: index,
                            blob: None,
                        });
                        output.failed_layers.push((index, err));
                    }
                    Err(LayerBuildError::Transient(err)) => return Err(err),
                }
            }
            Ok(output)
        })();

        ctx.stop_timer(TimerCategory::Total);
        self.memory.store(data.memory_size(), Ordering::Relaxed);
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn build_compressed_layers(
        &self,
        env: &BuildEnv<'_>,
        ctx: &mut RecastContext,
        scratch: &mut TileScratch,
        inputs: &TileInputs,
        bounds: &Bounds,
        inclusion: &[Bounds],
        encapsulated: bool,
    ) -> Result<Vec<CompressedLayer>> {
        let cfg = env.config;
        let rc = &cfg.recast;
        let Bounds { min: bmin, max: bmax } = cfg.heightfield_bounds(bounds);

        let TileScratch {
            solid,
            voxel,
            tri_areas,
        } = scratch;

        let mut cached = Vec::new();
        if cfg.use_voxel_cache {
            ctx.timed(TimerCategory::Rasterization, |ctx| -> Result<()> {
                for snapshot in &inputs.geometry {
                    cached.push(self.element_spans(ctx, cfg, snapshot, voxel, tri_areas, bmin, bmax)?);
                }
                Ok(())
            })?;
        }

        let hf = solid.prepare(rc.width, rc.height, bmin, bmax, rc.cs, rc.ch)?;
        ctx.timed(TimerCategory::Rasterization, |ctx| -> Result<()> {
            if cfg.use_voxel_cache {
                for spans in &cached {
                    hf.add_spans(spans, rc.walkable_climb)?;
                }
            } else {
                for snapshot in &inputs.geometry {
                    rasterize_snapshot(ctx, cfg, snapshot, hf, tri_areas)?;
                }
            }
            Ok(())
        })?;

        if hf.is_empty() {
            ctx.log_debug("empty tile");
            return Ok(Vec::new());
        }
        ctx.check_abort()?;

        ctx.timed(TimerCategory::Filtering, |_| {
            if cfg.perform_voxel_filtering && !encapsulated {
                let pad = rc.walkable_radius as f32 * rc.cs;
                let boxes: Vec<Bounds> = inclusion
                    .iter()
                    .map(|b| b.expand_by_vec(Vec3::new(pad, 0.0, pad)))
                    .collect();
                hf.null_spans_outside(&boxes);
            }
            hf.filter_low_hanging_walkable_obstacles(rc.walkable_climb);
            hf.filter_ledge_spans(rc.walkable_height, rc.walkable_climb);
            hf.filter_walkable_low_height_spans(rc.walkable_height);
        });

        let mut chf = ctx.timed(TimerCategory::CompactHeightfield, |_| {
            CompactHeightfield::build_from_heightfield(hf, rc.walkable_height, rc.walkable_climb)
        })?;
        ctx.check_abort()?;

        if rc.walkable_radius > 0 {
            ctx.timed(TimerCategory::Erosion, |_| {
                erode_walkable_area(&mut chf, rc.walkable_radius)
            })?;
        }

        ctx.timed(TimerCategory::AreaMarking, |_| {
            mark_static_areas(env, &mut chf, &inputs.static_areas)
        });
        ctx.check_abort()?;

        let set = ctx.timed(TimerCategory::Layers, |_| {
            build_heightfield_layers(
                &mut chf,
                rc.border_size,
                rc.walkable_height,
                rc.layer_partitioning,
                rc.layer_chunk_size,
            )
        })?;

        ctx.timed(TimerCategory::LayerCodec, |_| {
            set.layers
                .iter()
                .enumerate()
                .map(|(i, layer)| {
                    CompressedLayer::encode(layer, self.tile_x, self.tile_y, i as i32, env.compressor)
                })
                .collect::<Result<Vec<_>>>()
        })
    }

    /// Spans of one element inside this tile, from the element's voxel cache
    /// when it has them, otherwise rasterized and stored back
    #[allow(clippy::too_many_arguments)]
    fn element_spans(
        &self,
        ctx: &mut RecastContext,
        cfg: &TileBuildConfig,
        snapshot: &GeometrySnapshot,
        voxel: &mut HeightfieldSlot,
        tri_areas: &mut Vec<u8>,
        bmin: Vec3,
        bmax: Vec3,
    ) -> Result<Vec<SpanCache>> {
        let element = &snapshot.element;
        let rc = &cfg.recast;
        let grid = VoxelGrid::new(bmin, rc.cs, rc.ch);
        match element.cached_spans(self.tile_x, self.tile_y, &grid, snapshot.version) {
            Ok(Some(spans)) => return Ok(spans),
            Ok(None) => {}
            Err(err) => ctx.log_warning(format!("element {}: dropping voxel cache: {}", element.id, err)),
        }

        let hf = voxel.prepare(rc.width, rc.height, bmin, bmax, rc.cs, rc.ch)?;
        rasterize_snapshot(ctx, cfg, snapshot, hf, tri_areas)?;
        let spans = hf.cache_spans();
        if let Err(err) = element.store_spans(self.tile_x, self.tile_y, grid, snapshot.version, spans.clone()) {
            ctx.log_warning(format!("element {}: could not store voxel cache: {}", element.id, err));
        }
        Ok(spans)
    }

    fn build_layer(
        &self,
        env: &BuildEnv<'_>,
        ctx: &mut RecastContext,
        inputs: &TileInputs,
        layer: &CompressedLayer,
        index: i32,
    ) -> std::result::Result<Option<Vec<u8>>, LayerBuildError> {
        let cfg = env.config;
        let rc = &cfg.recast;

        let decoded = ctx.timed(TimerCategory::LayerCodec, |_| layer.decompress(env.compressor))?;
        let mut chf = decoded.to_compact_heightfield(rc.walkable_height, rc.walkable_climb);
        let layer_bounds = layer.bounds();

        ctx.timed(TimerCategory::AreaMarking, |_| {
            mark_dynamic_areas(env, &mut chf, inputs, &layer_bounds)
        });

        ctx.timed(TimerCategory::Regions, |_| {
            build_regions(
                &mut chf,
                rc.region_partitioning,
                0,
                rc.min_region_area,
                rc.merge_region_area,
                rc.region_chunk_size,
            )
        })?;
        ctx.check_abort()?;

        let cset = ctx.timed(TimerCategory::Contours, |_| {
            build_contours(&chf, rc.max_simplification_error, rc.max_edge_len)
        })?;
        let mut clusters = ctx.timed(TimerCategory::Clusters, |_| ClusterSet::build(&cset))?;

        let mesh = ctx.timed(TimerCategory::PolyMesh, |_| {
            build_poly_mesh_limited(&cset, rc.max_verts_per_poly, cfg.max_mesh_verts)
        })?;
        if mesh.npolys > cfg.max_polys_per_tile {
            return Err(LayerBuildError::Structural(Error::PolyLimitExceeded {
                count: mesh.npolys,
                max: cfg.max_polys_per_tile,
            }));
        }
        if mesh.npolys == 0 {
            ctx.log_debug(format!(
                "layer {} has no polygons ({} contour vertices)",
                index,
                cset.vertex_count()
            ));
            return Ok(None);
        }
        clusters.update_poly_map(&mesh);

        let dmesh = ctx.timed(TimerCategory::DetailMesh, |_| {
            build_poly_mesh_detail(&mesh, &chf, rc.detail_sample_dist, rc.detail_sample_max_error)
        })?;
        ctx.check_abort()?;

        let blob = ctx.timed(TimerCategory::Encoding, |ctx| {
            self.layer_tile_data(env, ctx, index, mesh, dmesh, &clusters, inputs, &layer_bounds)
                .encode()
        })?;
        Ok(Some(blob))
    }

    #[allow(clippy::too_many_arguments)]
    fn layer_tile_data(
        &self,
        env: &BuildEnv<'_>,
        ctx: &mut RecastContext,
        index: i32,
        mesh: PolyMesh,
        dmesh: PolyMeshDetail,
        clusters: &ClusterSet,
        inputs: &TileInputs,
        layer_bounds: &Bounds,
    ) -> NavTileData {
        let cfg = env.config;
        let registry = env.registry;

        // links are stored with the layer their start point lies on
        let climb = cfg.agent_max_climb;
        let link_bounds = Bounds::new(
            layer_bounds.min - Vec3::new(0.0, climb, 0.0),
            layer_bounds.max + Vec3::new(0.0, climb, 0.0),
        );

        let mut off_mesh = Vec::new();
        for link in inputs.links.iter().filter(|l| link_bounds.contains_point(l.left)) {
            let (area, flags) = link_area(ctx, registry, link.area_class);
            off_mesh.push(OffMeshConnection {
                start: link.left,
                end: link.right,
                radius: link.snap_radius,
                flags,
                area,
                kind: OFFMESH_POINT | direction_bit(link.bidirectional),
                user_id: link.user_id,
            });
        }

        let mut segments = Vec::new();
        for link in inputs
            .segment_links
            .iter()
            .filter(|l| link_bounds.contains_point(l.left_start))
        {
            let (area, flags) = link_area(ctx, registry, link.area_class);
            segments.push(SegmentConnection {
                start_a: link.left_start,
                start_b: link.left_end,
                end_a: link.right_start,
                end_b: link.right_end,
                radius: link.snap_radius,
                flags,
                area,
                kind: OFFMESH_SEGMENT | direction_bit(link.bidirectional),
                user_id: link.user_id,
            });
        }

        let poly_flags = mesh.areas.iter().map(|&area| registry.flags(area)).collect();
        NavTileData {
            tile_x: self.tile_x,
            tile_y: self.tile_y,
            layer: index,
            walkable_height: cfg.agent_height,
            walkable_radius: cfg.agent_radius,
            walkable_climb: cfg.agent_max_climb,
            bmin: mesh.bmin,
            bmax: mesh.bmax,
            cs: mesh.cs,
            ch: mesh.ch,
            max_verts_per_poly: mesh.nvp as u8,
            verts: mesh.verts,
            polys: mesh.polys,
            poly_flags,
            poly_areas: mesh.areas,
            poly_clusters: clusters.poly_map.clone(),
            detail_meshes: dmesh.meshes,
            detail_verts: dmesh.verts,
            detail_tris: dmesh.tris,
            off_mesh,
            segments,
            clusters: clusters
                .clusters
                .iter()
                .map(|c| TileCluster {
                    center: c.center,
                    links: c.links.clone(),
                })
                .collect(),
        }
    }
}

fn direction_bit(bidirectional: bool) -> u8 {
    if bidirectional {
        OFFMESH_BIDIR
    } else {
        0
    }
}

fn link_area(
    ctx: &mut RecastContext,
    registry: &AreaClassRegistry,
    class: Option<AreaClass>,
) -> (u8, u16) {
    let class = class.unwrap_or_else(|| registry.default_class());
    match registry.area_id(class) {
        Some(area) => (area, registry.flags(area)),
        None => {
            ctx.log_warning(format!("off-mesh link uses unregistered area class {}", class.0));
            (NULL_AREA, 0)
        }
    }
}

/// Decodes one collision blob and rasterizes it. Unreadable blobs are skipped.
fn rasterize_snapshot(
    ctx: &mut RecastContext,
    cfg: &TileBuildConfig,
    snapshot: &GeometrySnapshot,
    hf: &mut Heightfield,
    tri_areas: &mut Vec<u8>,
) -> Result<()> {
    let cache = match GeometryCache::decode(&snapshot.collision) {
        Ok(cache) => cache,
        Err(err) => {
            ctx.log_warning(format!(
                "element {}: skipping unreadable collision data: {}",
                snapshot.element.id, err
            ));
            return Ok(());
        }
    };
    let slope_cos = cache
        .slope_override
        .map_or_else(|| cfg.walkable_slope_cos(), |degrees| degrees.to_radians().cos());
    let areas = zeroed_areas(tri_areas, cache.face_count());
    mark_walkable_triangles_cos(slope_cos, &cache.verts, &cache.indices, areas)?;
    rasterize_triangles(hf, &cache.verts, &cache.indices, areas, cfg.recast.walkable_climb)
}

fn sorted_areas(env: &BuildEnv<'_>, mut areas: Vec<AreaModifier>) -> Vec<AreaModifier> {
    if env.config.sort_navigation_areas_by_cost && areas.len() > 1 {
        env.ordering.sort_areas(&mut areas, env.registry);
    }
    areas
}

/// Bakes modifiers gathered with geometry into the tile's compact heightfield
fn mark_static_areas(env: &BuildEnv<'_>, chf: &mut CompactHeightfield, areas: &[AreaModifier]) {
    if areas.is_empty() {
        return;
    }
    let cfg = env.config;
    let expand = cfg.agent_radius * 1.5;
    for modifier in sorted_areas(env, areas.to_vec()) {
        let Some(area) = env.registry.area_id(modifier.class) else {
            continue;
        };
        let offset = vertical_offset(cfg, &modifier);
        paint_area(chf, &modifier.shape, area, expand, offset, cfg.recast.ch);
    }
}

/// Paints modifiers onto one decompressed layer. Static modifiers are painted
/// again so a cheap dynamic area never overrides an expensive baked one.
fn mark_dynamic_areas(
    env: &BuildEnv<'_>,
    chf: &mut CompactHeightfield,
    inputs: &TileInputs,
    layer_bounds: &Bounds,
) {
    if inputs.dynamic_areas.is_empty() {
        return;
    }
    let cfg = env.config;
    let combined = inputs
        .static_areas
        .iter()
        .chain(&inputs.dynamic_areas)
        .cloned()
        .collect();
    for modifier in sorted_areas(env, combined) {
        let Some(area) = env.registry.area_id(modifier.class) else {
            continue;
        };
        let mut bounds = modifier.bounds();
        if modifier.include_agent_height {
            bounds.min.y -= cfg.agent_height;
        }
        if !layer_bounds.intersects(&bounds) {
            continue;
        }
        let offset = vertical_offset(cfg, &modifier);
        paint_area(chf, &modifier.shape, area, cfg.agent_radius, offset, cfg.recast.ch);
    }
}

fn vertical_offset(cfg: &TileBuildConfig, modifier: &AreaModifier) -> f32 {
    let agent = if modifier.include_agent_height {
        cfg.agent_height
    } else {
        0.0
    };
    cfg.recast.ch + agent
}

fn paint_area(
    chf: &mut CompactHeightfield,
    shape: &AreaShape,
    area: u8,
    expand: f32,
    offset_y: f32,
    ch: f32,
) -> usize {
    match shape {
        AreaShape::Cylinder {
            origin,
            radius,
            height,
        } => mark_cylinder_area(chf, *origin, radius + expand, height + offset_y, area),
        AreaShape::Box { center, extent } => {
            let extent = *extent + Vec3::new(expand, offset_y, expand);
            mark_box_area(chf, *center - extent, *center + extent, area)
        }
        AreaShape::Convex {
            points,
            min_y,
            max_y,
        } => {
            let hull = grow_convex_hull(expand, points);
            if hull.is_empty() {
                return 0;
            }
            mark_convex_poly_area(chf, &hull, min_y - offset_y, max_y + ch, area)
        }
    }
}
