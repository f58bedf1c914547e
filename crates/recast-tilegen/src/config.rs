//! Generator configuration
//!
//! [`NavGeneratorConfig`] is what a host fills in, in world units. It is
//! turned into the voxel-space [`TileBuildConfig`] every tile build reads.

use glam::Vec3;
use recast::{PartitionType, RecastConfig, MAX_MESH_VERTS, MAX_VERTS_PER_POLY};
use recast_common::{ilog2, next_pow2, Bounds, Error, Result};

/// Upper bound on tiles waiting in the build queue
pub const MAX_QUEUED_GENERATORS: usize = 64;
/// Expected layers per tile when sizing the tile address space
pub const AVG_LAYERS_PER_TILE: u32 = 8;
/// Most bits a tile index may use
pub const MAX_TILE_BITS: u32 = 30;
/// Bits reserved for the salt of a polygon reference
pub const SALT_BITS: u32 = 16;

/// World-unit configuration for the tiled generator
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct NavGeneratorConfig {
    pub cell_size: f32,
    pub cell_height: f32,
    pub agent_radius: f32,
    pub agent_height: f32,
    /// Tallest agent the mesh is built for; sizes the polygon height range
    pub agent_max_height: f32,
    /// Maximum walkable slope in degrees
    pub agent_max_slope: f32,
    /// Maximum step height
    pub agent_max_climb: f32,
    /// Edge length of one tile
    pub tile_size_world: f32,
    /// Regions smaller than this area (world units, one side) are dropped
    pub min_region_area: f32,
    /// Regions up to this size (world units, one side) get merged
    pub merge_region_size: f32,
    /// Longest contour edge in world units
    pub max_edge_length: f32,
    pub max_simplification_error: f32,
    pub detail_sample_dist: f32,
    pub detail_sample_max_error: f32,
    pub region_chunk_splits: i32,
    pub layer_chunk_splits: i32,
    pub region_partitioning: PartitionType,
    pub layer_partitioning: PartitionType,
    /// Null spans outside every inclusion volume
    pub perform_voxel_filtering: bool,
    /// Keep rasterized spans per element and tile so later geometry
    /// rebuilds can skip triangle rasterization
    pub use_voxel_cache: bool,
    pub sort_navigation_areas_by_cost: bool,
    /// Build slots per spare worker thread
    pub max_concurrent_builds_multiplier: usize,
    /// Distinct vertices one layer may produce
    pub max_mesh_verts: usize,
}

impl Default for NavGeneratorConfig {
    fn default() -> Self {
        Self {
            cell_size: 19.0,
            cell_height: 10.0,
            agent_radius: 34.0,
            agent_height: 144.0,
            agent_max_height: 160.0,
            agent_max_slope: 55.0,
            agent_max_climb: 35.0,
            tile_size_world: 1000.0,
            min_region_area: 0.0,
            merge_region_size: 400.0,
            max_edge_length: 1200.0,
            max_simplification_error: 1.3,
            detail_sample_dist: 600.0,
            detail_sample_max_error: 1.0,
            region_chunk_splits: 2,
            layer_chunk_splits: 2,
            region_partitioning: PartitionType::Watershed,
            layer_partitioning: PartitionType::Watershed,
            perform_voxel_filtering: true,
            use_voxel_cache: false,
            sort_navigation_areas_by_cost: true,
            max_concurrent_builds_multiplier: 1,
            max_mesh_verts: MAX_MESH_VERTS,
        }
    }
}

impl NavGeneratorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cell_size(mut self, cell_size: f32, cell_height: f32) -> Self {
        self.cell_size = cell_size;
        self.cell_height = cell_height;
        self
    }

    pub fn with_agent(mut self, radius: f32, height: f32, max_climb: f32) -> Self {
        self.agent_radius = radius;
        self.agent_height = height;
        self.agent_max_climb = max_climb;
        self.agent_max_height = self.agent_max_height.max(height);
        self
    }

    pub fn with_agent_max_slope(mut self, degrees: f32) -> Self {
        self.agent_max_slope = degrees;
        self
    }

    pub fn with_tile_size(mut self, tile_size_world: f32) -> Self {
        self.tile_size_world = tile_size_world;
        self
    }

    pub fn with_region_sizes(mut self, min_region_area: f32, merge_region_size: f32) -> Self {
        self.min_region_area = min_region_area;
        self.merge_region_size = merge_region_size;
        self
    }

    pub fn with_max_edge_length(mut self, length: f32) -> Self {
        self.max_edge_length = length;
        self
    }

    pub fn with_detail_sampling(mut self, sample_dist: f32, max_error: f32) -> Self {
        self.detail_sample_dist = sample_dist;
        self.detail_sample_max_error = max_error;
        self
    }

    pub fn with_partitioning(mut self, regions: PartitionType, layers: PartitionType) -> Self {
        self.region_partitioning = regions;
        self.layer_partitioning = layers;
        self
    }

    pub fn with_voxel_filtering(mut self, enabled: bool) -> Self {
        self.perform_voxel_filtering = enabled;
        self
    }

    pub fn with_voxel_cache(mut self, enabled: bool) -> Self {
        self.use_voxel_cache = enabled;
        self
    }

    pub fn with_area_sorting(mut self, enabled: bool) -> Self {
        self.sort_navigation_areas_by_cost = enabled;
        self
    }

    pub fn with_max_mesh_verts(mut self, max_verts: usize) -> Self {
        self.max_mesh_verts = max_verts;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.cell_size <= 0.0 || self.cell_height <= 0.0 {
            return Err(Error::InvalidConfig(
                "cell size and cell height must be positive".to_string(),
            ));
        }
        if self.agent_height <= 0.0 || self.agent_radius < 0.0 || self.agent_max_climb < 0.0 {
            return Err(Error::InvalidConfig(format!(
                "invalid agent dimensions: radius {}, height {}, climb {}",
                self.agent_radius, self.agent_height, self.agent_max_climb
            )));
        }
        if self.tile_size_world < self.cell_size {
            return Err(Error::InvalidConfig(format!(
                "tile size {} is smaller than one cell",
                self.tile_size_world
            )));
        }
        if self.region_chunk_splits < 1 || self.layer_chunk_splits < 1 {
            return Err(Error::InvalidConfig(
                "chunk splits must be at least 1".to_string(),
            ));
        }
        if self.max_mesh_verts == 0 || self.max_mesh_verts > MAX_MESH_VERTS {
            return Err(Error::InvalidConfig(format!(
                "max mesh verts must be in 1..={}",
                MAX_MESH_VERTS
            )));
        }
        Ok(())
    }

    /// Derives the voxel-space configuration of a single tile build
    pub fn build_config(&self) -> Result<TileBuildConfig> {
        self.validate()?;

        let cs = self.cell_size;
        let ch = self.cell_height;
        let walkable_radius = (self.agent_radius / cs).ceil() as i32;
        let border_size = walkable_radius + 3;
        let tile_size = (self.tile_size_world / cs) as i32;

        let recast = RecastConfig {
            width: tile_size + border_size * 2,
            height: tile_size + border_size * 2,
            tile_size,
            border_size,
            cs,
            ch,
            walkable_slope_angle: self.agent_max_slope,
            walkable_height: (self.agent_height / ch).ceil() as i32,
            walkable_climb: (self.agent_max_climb / ch).ceil() as i32,
            walkable_radius,
            max_edge_len: (self.max_edge_length / cs) as i32,
            max_simplification_error: self.max_simplification_error,
            min_region_area: ((self.min_region_area / cs) * (self.min_region_area / cs)) as i32,
            merge_region_area: ((self.merge_region_size / cs) * (self.merge_region_size / cs)) as i32,
            max_verts_per_poly: MAX_VERTS_PER_POLY,
            detail_sample_dist: self.detail_sample_dist,
            detail_sample_max_error: self.detail_sample_max_error,
            layer_partitioning: self.layer_partitioning,
            layer_chunk_size: (tile_size / self.layer_chunk_splits).max(1),
            region_partitioning: self.region_partitioning,
            region_chunk_size: (tile_size / self.region_chunk_splits).max(1),
            ..RecastConfig::default()
        };
        recast.validate()?;

        Ok(TileBuildConfig {
            recast,
            agent_radius: self.agent_radius,
            agent_height: self.agent_height,
            agent_max_climb: self.agent_max_climb,
            poly_max_height: (self.agent_max_height / ch).ceil() as i32,
            max_polys_per_tile: max_polys_for_tile_bits(0),
            max_mesh_verts: self.max_mesh_verts,
            perform_voxel_filtering: self.perform_voxel_filtering,
            use_voxel_cache: self.use_voxel_cache,
            sort_navigation_areas_by_cost: self.sort_navigation_areas_by_cost,
        })
    }

    /// Number of tiles allowed to build at once for the given worker count
    pub fn max_concurrent_builds(&self, available_parallelism: usize) -> usize {
        let spare = available_parallelism.saturating_sub(1).max(1);
        (spare * self.max_concurrent_builds_multiplier.max(1)).min(MAX_QUEUED_GENERATORS)
    }
}

/// Voxel-space settings shared read-only by every tile build of one session
#[derive(Debug, Clone)]
pub struct TileBuildConfig {
    /// Per-tile recast settings; `bmin`/`bmax` are filled in per tile
    pub recast: RecastConfig,
    pub agent_radius: f32,
    pub agent_height: f32,
    pub agent_max_climb: f32,
    pub poly_max_height: i32,
    pub max_polys_per_tile: usize,
    pub max_mesh_verts: usize,
    pub perform_voxel_filtering: bool,
    pub use_voxel_cache: bool,
    pub sort_navigation_areas_by_cost: bool,
}

impl TileBuildConfig {
    /// World size of one tile along x and z
    pub fn tile_world_size(&self) -> f32 {
        self.recast.tile_size as f32 * self.recast.cs
    }

    /// World distance the heightfield reaches past the tile edge
    pub fn border_world_size(&self) -> f32 {
        self.recast.border_size as f32 * self.recast.cs
    }

    /// Heightfield bounds of a tile: its bounds grown by the border along x and z
    pub fn heightfield_bounds(&self, tile_bounds: &Bounds) -> Bounds {
        let pad = self.border_world_size();
        tile_bounds.expand_by_vec(Vec3::new(pad, 0.0, pad))
    }

    pub fn walkable_slope_cos(&self) -> f32 {
        self.recast.walkable_slope_angle.to_radians().cos()
    }
}

/// Bits needed to address every layer of a `tiles_w` x `tiles_h` grid
pub fn tile_bits_for_grid(tiles_w: i32, tiles_h: i32) -> u32 {
    let wanted = (tiles_w.max(1) as u64) * (tiles_h.max(1) as u64) * AVG_LAYERS_PER_TILE as u64;
    let wanted = wanted.min(1 << 31) as u32;
    ilog2(next_pow2(wanted)).min(MAX_TILE_BITS)
}

/// Polygons a single layer may hold once `tile_bits` are spent on the tile index
pub fn max_polys_for_tile_bits(tile_bits: u32) -> usize {
    let poly_bits = MAX_TILE_BITS.min(64 - SALT_BITS - tile_bits.min(MAX_TILE_BITS));
    1usize << poly_bits
}
