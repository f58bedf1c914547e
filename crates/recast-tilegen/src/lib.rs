//! Tiled, incrementally rebuildable navigation mesh generation
//!
//! This crate splits the world into a grid of tiles and keeps a navigation
//! mesh for each of them up to date as geometry and area modifiers change.
//! Every tile is voxelized once into compressed heightfield layers; later
//! modifier changes only repaint and re-polygonize the layers they touch.
//!
//! # Features
//!
//! - **Dirty tracking**: world changes arrive as dirty boxes and are mapped
//!   onto the tiles and layers they affect
//! - **Bounded concurrency**: tile builds run on a tokio blocking pool, a
//!   fixed number at a time, admitted in Hilbert order
//! - **Layer-only rebuilds**: dynamic area modifiers never re-voxelize
//! - **Versioned results**: builds started under an older grid are discarded
//! - **Pluggable runtime**: finished layers go to any [`RuntimeMeshSink`]
//!
//! # Example
//!
//! ```rust,ignore
//! use recast_tilegen::{
//!     BuildMode, ElementIndex, GeometryCache, InMemoryMeshSink, NavGeneratorConfig,
//!     NavMeshGenerator, NavigationBounds, NavigationElement,
//! };
//! use recast_common::Bounds;
//! use std::sync::Arc;
//!
//! let index = Arc::new(ElementIndex::new());
//! index.insert(NavigationElement::new(1, Bounds::empty()).with_geometry(&floor)?);
//!
//! let sink = InMemoryMeshSink::shared(1024);
//! let mut generator =
//!     NavMeshGenerator::new(NavGeneratorConfig::new(), index, sink.clone(), BuildMode::current())?;
//! generator.init(NavigationBounds::from_world(world_bounds))?;
//! generator.rebuild_all();
//!
//! while generator.is_build_in_progress(true) {
//!     generator.tick();
//! }
//! ```
//!
//! # Architecture
//!
//! - [`NavMeshGenerator`]: owns the tile grid, schedules builds and
//!   integrates their results
//! - [`TileGenerator`]: inputs, dirty state and build pipeline of one tile
//! - [`io`]: binary formats for collision input, voxel caches, compressed
//!   layers and finished tiles

pub mod config;
pub mod dirty;
pub mod generator;
pub mod geometry;
pub mod io;
pub mod modifiers;
pub mod scheduler;
pub mod scratch;
pub mod sink;
pub mod tile_generator;

pub use config::*;
pub use dirty::*;
pub use generator::*;
pub use geometry::*;
pub use io::{
    CompressedLayer, GeometryCache, LayerCompressor, Lz4Compressor, NavTileData,
    OffMeshConnection, SegmentConnection, TileCluster, VoxelCache, VoxelGrid,
};
pub use modifiers::*;
pub use scheduler::{hilbert_index, tile_order_key, BuildMode};
pub use scratch::{ScratchPool, TileScratch};
pub use sink::*;
pub use tile_generator::*;
