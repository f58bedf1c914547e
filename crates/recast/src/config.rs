//! Voxel-space configuration for one tile build

use glam::Vec3;

/// Algorithm used to split walkable spans into regions or layers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub enum PartitionType {
    /// Sweep-line partitioning. Fast, may produce long thin regions.
    Monotone,
    /// Distance field flood fill. Best region shapes, slowest.
    #[default]
    Watershed,
    /// Watershed run independently inside fixed-size chunks
    Chunky,
}

/// Configuration parameters for the voxel pipeline, all in voxel units
/// unless noted otherwise
#[derive(Debug, Clone)]
pub struct RecastConfig {
    /// Heightfield width along x, including the border
    pub width: i32,
    /// Heightfield depth along z, including the border
    pub height: i32,
    /// Tile width/depth in cells, excluding the border
    pub tile_size: i32,
    /// Cells added on every side of the tile so erosion and regions see the neighbourhood
    pub border_size: i32,

    /// Cell size on the xz plane (world units)
    pub cs: f32,
    /// Cell height (world units)
    pub ch: f32,

    /// Heightfield bounds including the border (world units)
    pub bmin: Vec3,
    pub bmax: Vec3,

    /// Maximum walkable slope in degrees
    pub walkable_slope_angle: f32,
    pub walkable_height: i32,
    pub walkable_climb: i32,
    pub walkable_radius: i32,

    pub max_edge_len: i32,
    pub max_simplification_error: f32,
    pub min_region_area: i32,
    pub merge_region_area: i32,
    pub max_verts_per_poly: usize,

    /// Detail mesh sampling distance (world units); zero disables interior sampling
    pub detail_sample_dist: f32,
    pub detail_sample_max_error: f32,

    /// Partitioning used when splitting the compact heightfield into layers
    pub layer_partitioning: PartitionType,
    pub layer_chunk_size: i32,
    /// Partitioning used when building regions inside one layer
    pub region_partitioning: PartitionType,
    pub region_chunk_size: i32,
}

impl Default for RecastConfig {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            tile_size: 0,
            border_size: 0,
            cs: 0.3,
            ch: 0.2,
            bmin: Vec3::ZERO,
            bmax: Vec3::ZERO,
            walkable_slope_angle: 45.0,
            walkable_height: 10,
            walkable_climb: 4,
            walkable_radius: 2,
            max_edge_len: 40,
            max_simplification_error: 1.3,
            min_region_area: 0,
            merge_region_area: 400,
            max_verts_per_poly: 6,
            detail_sample_dist: 6.0,
            detail_sample_max_error: 1.0,
            layer_partitioning: PartitionType::Watershed,
            layer_chunk_size: 0,
            region_partitioning: PartitionType::Watershed,
            region_chunk_size: 0,
        }
    }
}

impl RecastConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the bounds and derives the grid size from them
    pub fn calculate_grid_size(&mut self, bmin: Vec3, bmax: Vec3) {
        self.bmin = bmin;
        self.bmax = bmax;
        self.width = ((bmax.x - bmin.x) / self.cs + 0.5) as i32;
        self.height = ((bmax.z - bmin.z) / self.cs + 0.5) as i32;
    }

    /// Validates the configuration parameters
    pub fn validate(&self) -> recast_common::Result<()> {
        use recast_common::Error;

        if self.width <= 0 || self.height <= 0 {
            return Err(Error::InvalidConfig(format!(
                "invalid grid size {}x{}",
                self.width, self.height
            )));
        }
        if self.cs <= 0.0 || self.ch <= 0.0 {
            return Err(Error::InvalidConfig(
                "cell size and cell height must be positive".to_string(),
            ));
        }
        if !(0.0..=90.0).contains(&self.walkable_slope_angle) {
            return Err(Error::InvalidConfig(format!(
                "walkable slope angle {} out of range",
                self.walkable_slope_angle
            )));
        }
        if self.walkable_height < 3 {
            return Err(Error::InvalidConfig(
                "walkable height must be at least 3 voxels".to_string(),
            ));
        }
        if !(3..=crate::MAX_VERTS_PER_POLY).contains(&self.max_verts_per_poly) {
            return Err(Error::InvalidConfig(format!(
                "max verts per poly must be in 3..={}",
                crate::MAX_VERTS_PER_POLY
            )));
        }
        if self.border_size < 0 || self.walkable_radius < 0 || self.walkable_climb < 0 {
            return Err(Error::InvalidConfig(
                "negative border, radius or climb".to_string(),
            ));
        }
        Ok(())
    }
}
