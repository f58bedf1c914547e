//! Recast component for navigation mesh generation
//!
//! Turns triangle soup into walkable voxels, splits them into vertically
//! separated layers and turns each layer into a polygon mesh with a detail
//! mesh on top. The tiled generator in `recast-tilegen` drives these stages
//! one tile at a time; every stage here works on a single tile and keeps no
//! global state.
//!
//! Coordinates are y-up. Heightfield columns are addressed `(x, z)`.

mod area;
mod cluster;
mod compact_heightfield;
mod config;
mod context;
mod contour;
mod detail_mesh;
mod distance_field;
mod geom;
mod heightfield;
mod heightfield_layers;
mod polymesh;
mod rasterization;
mod regions;

pub use area::{
    erode_walkable_area, grow_convex_hull, mark_box_area, mark_convex_poly_area,
    mark_cylinder_area,
};
pub use cluster::{Cluster, ClusterSet, NULL_CLUSTER};
pub use compact_heightfield::{CompactCell, CompactHeightfield, CompactSpan, NOT_CONNECTED};
pub use config::{PartitionType, RecastConfig};
pub use context::{LogEntry, LogLevel, RecastContext, TimerCategory, TimerEntry};
pub use contour::{
    build_contours, Contour, ContourSet, ContourVertex, AREA_BORDER, BORDER_VERTEX,
    CONTOUR_REG_MASK, PORTAL_EDGE,
};
pub use detail_mesh::{build_poly_mesh_detail, PolyMeshDetail};
pub use distance_field::build_distance_field;
pub use heightfield::{Heightfield, Span, SpanCache, SPAN_MAX_HEIGHT};
pub use heightfield_layers::{
    build_heightfield_layers, HeightfieldLayer, HeightfieldLayerSet, LAYER_EMPTY_HEIGHT,
};
pub use polymesh::{
    build_poly_mesh, build_poly_mesh_limited, PolyMesh, MAX_MESH_VERTS, MESH_NULL_IDX, PORTAL_FLAG,
};
pub use rasterization::{
    mark_walkable_triangles, mark_walkable_triangles_cos, rasterize_triangle,
    rasterize_triangles,
};
pub use regions::{build_regions, BORDER_REG};

/// Area id of unwalkable spans
pub const NULL_AREA: u8 = 0;
/// Default area id of walkable spans
pub const WALKABLE_AREA: u8 = 63;
/// Upper bound on vertices per polygon
pub const MAX_VERTS_PER_POLY: usize = 6;

const DIR_OFFSET_X: [i32; 4] = [-1, 0, 1, 0];
const DIR_OFFSET_Z: [i32; 4] = [0, 1, 0, -1];

/// X offset of the neighbour cell in direction `dir` (0 = -x, 1 = +z, 2 = +x, 3 = -z)
#[inline]
pub fn dir_offset_x(dir: usize) -> i32 {
    DIR_OFFSET_X[dir & 3]
}

/// Z offset of the neighbour cell in direction `dir`
#[inline]
pub fn dir_offset_z(dir: usize) -> i32 {
    DIR_OFFSET_Z[dir & 3]
}
