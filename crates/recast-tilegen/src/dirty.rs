//! Dirty areas and per-tile dirty state
//!
//! World changes arrive as [`DirtyArea`]s. The [`DirtyTracker`] holds them
//! until the next scheduling pass, maps each one onto the tile grid and
//! remembers which tiles picked up new work.

use bitflags::bitflags;
use glam::Vec3;
use recast_common::Bounds;
use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

bitflags! {
    /// What a dirty area invalidates
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DirtyFlags: u8 {
        /// Collision geometry changed; the tile must be voxelized again
        const GEOMETRY = 1 << 0;
        /// Only area modifiers changed; affected layers are repainted
        const DYNAMIC_MODIFIER = 1 << 1;
        /// Grow the area downwards by the agent height
        const USE_AGENT_HEIGHT = 1 << 2;
        const ALL = Self::GEOMETRY.bits() | Self::DYNAMIC_MODIFIER.bits();
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirtyArea {
    pub bounds: Bounds,
    pub flags: DirtyFlags,
}

impl DirtyArea {
    pub fn new(bounds: Bounds, flags: DirtyFlags) -> Self {
        Self { bounds, flags }
    }

    pub fn has_flag(&self, flag: DirtyFlags) -> bool {
        self.flags.contains(flag)
    }
}

/// Rebuild work a tile owes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirtyState {
    pub rebuild_geometry: bool,
    pub rebuild_layers: bool,
    pub rebuild_all_layers: bool,
    dirty_layers: Vec<u64>,
}

impl DirtyState {
    /// State of a tile that needs everything rebuilt
    pub fn all() -> Self {
        Self {
            rebuild_geometry: true,
            rebuild_layers: true,
            rebuild_all_layers: true,
            dirty_layers: Vec::new(),
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.rebuild_geometry || self.rebuild_layers
    }

    pub fn clear(&mut self) {
        self.rebuild_geometry = false;
        self.rebuild_layers = false;
        self.rebuild_all_layers = false;
        self.dirty_layers.clear();
    }

    pub fn mark_dirty_layer(&mut self, layer: usize) {
        let word = layer / 64;
        if self.dirty_layers.len() <= word {
            self.dirty_layers.resize(word + 1, 0);
        }
        self.dirty_layers[word] |= 1 << (layer % 64);
        self.rebuild_layers = true;
    }

    /// True when `layer` has to be rebuilt by the layer phase
    pub fn has_dirty_layer(&self, layer: usize) -> bool {
        if !self.rebuild_layers {
            return false;
        }
        self.rebuild_all_layers
            || self
                .dirty_layers
                .get(layer / 64)
                .is_some_and(|word| word & (1 << (layer % 64)) != 0)
    }

    pub fn dirty_layer_count(&self) -> usize {
        self.dirty_layers
            .iter()
            .map(|word| word.count_ones() as usize)
            .sum()
    }

    /// Merges `other` into this state
    pub fn append(&mut self, other: &DirtyState) {
        self.rebuild_geometry |= other.rebuild_geometry;
        self.rebuild_layers |= other.rebuild_layers;
        self.rebuild_all_layers |= other.rebuild_all_layers;
        if self.dirty_layers.len() < other.dirty_layers.len() {
            self.dirty_layers.resize(other.dirty_layers.len(), 0);
        }
        for (word, other) in self.dirty_layers.iter_mut().zip(&other.dirty_layers) {
            *word |= other;
        }
    }
}

/// Inclusive tile index rectangle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRange {
    pub min_x: i32,
    pub min_y: i32,
    pub max_x: i32,
    pub max_y: i32,
}

impl TileRange {
    pub fn iter(&self) -> impl Iterator<Item = (i32, i32)> {
        let (min_x, max_x) = (self.min_x, self.max_x);
        (self.min_y..=self.max_y).flat_map(move |y| (min_x..=max_x).map(move |x| (x, y)))
    }
}

/// Grid placement the tracker maps areas onto
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridLayout {
    pub origin: Vec3,
    pub tile_world_size: f32,
    pub tiles_w: i32,
    pub tiles_h: i32,
}

impl GridLayout {
    /// Tiles whose footprint `bounds` touches, or `None` when it misses the grid
    pub fn tile_range(&self, bounds: &Bounds) -> Option<TileRange> {
        if !bounds.is_valid() || self.tiles_w <= 0 || self.tiles_h <= 0 {
            return None;
        }
        let to_tile = |v: f32, o: f32| ((v - o) / self.tile_world_size).floor();
        let min_x = to_tile(bounds.min.x, self.origin.x);
        let max_x = to_tile(bounds.max.x, self.origin.x);
        let min_y = to_tile(bounds.min.z, self.origin.z);
        let max_y = to_tile(bounds.max.z, self.origin.z);
        if max_x < 0.0 || max_y < 0.0 || min_x >= self.tiles_w as f32 || min_y >= self.tiles_h as f32 {
            return None;
        }
        Some(TileRange {
            min_x: (min_x as i32).max(0),
            min_y: (min_y as i32).max(0),
            max_x: (max_x as i32).min(self.tiles_w - 1),
            max_y: (max_y as i32).min(self.tiles_h - 1),
        })
    }

    pub fn tile_index(&self, x: i32, y: i32) -> usize {
        (x + y * self.tiles_w) as usize
    }
}

/// Pending dirty areas plus the set of tiles that received new dirtiness
#[derive(Debug, Default)]
pub struct DirtyTracker {
    pending: Mutex<Vec<DirtyArea>>,
    dirty_tiles: BTreeSet<usize>,
}

impl DirtyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_pending(&self) -> MutexGuard<'_, Vec<DirtyArea>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, area: DirtyArea) {
        self.lock_pending().push(area);
    }

    pub fn extend(&self, areas: &[DirtyArea]) {
        self.lock_pending().extend_from_slice(areas);
    }

    /// Replaces every pending area with `area`
    pub fn replace_pending(&self, area: DirtyArea) {
        let mut pending = self.lock_pending();
        pending.clear();
        pending.push(area);
    }

    /// Detaches the current batch. Areas pushed afterwards start a new one.
    pub fn take_pending(&self) -> Vec<DirtyArea> {
        std::mem::take(&mut *self.lock_pending())
    }

    pub fn pending_count(&self) -> usize {
        self.lock_pending().len()
    }

    pub fn mark_tile(&mut self, index: usize) {
        self.dirty_tiles.insert(index);
    }

    pub fn unmark_tile(&mut self, index: usize) {
        self.dirty_tiles.remove(&index);
    }

    pub fn dirty_tiles(&self) -> impl Iterator<Item = usize> + '_ {
        self.dirty_tiles.iter().copied()
    }

    pub fn dirty_tile_count(&self) -> usize {
        self.dirty_tiles.len()
    }

    pub fn is_idle(&self) -> bool {
        self.dirty_tiles.is_empty() && self.pending_count() == 0
    }

    /// Drops all pending areas and dirty tiles
    pub fn reset(&mut self) {
        self.lock_pending().clear();
        self.dirty_tiles.clear();
    }
}

/// Grows a dirty box so it reaches every tile whose border rasterizes it.
/// With `include_agent_height` the box is also extended downwards.
pub fn grow_dirty_bounds(
    bounds: &Bounds,
    border_world_size: f32,
    agent_height: f32,
    include_agent_height: bool,
) -> Bounds {
    let pad = 2.0 * border_world_size;
    let mut grown = bounds.expand_by_vec(Vec3::new(pad, 0.0, pad));
    if include_agent_height {
        grown.min.y -= agent_height;
    }
    grown
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> GridLayout {
        GridLayout {
            origin: Vec3::new(-1.0, 0.0, -1.0),
            tile_world_size: 8.0,
            tiles_w: 4,
            tiles_h: 4,
        }
    }

    #[test]
    fn test_layer_bits() {
        let mut state = DirtyState::default();
        assert!(!state.is_dirty());
        state.mark_dirty_layer(0);
        state.mark_dirty_layer(70);
        assert!(state.has_dirty_layer(0));
        assert!(state.has_dirty_layer(70));
        assert!(!state.has_dirty_layer(1));
        assert_eq!(state.dirty_layer_count(), 2);
        assert!(state.is_dirty());

        state.rebuild_all_layers = true;
        assert!(state.has_dirty_layer(5));
    }

    #[test]
    fn test_append_merges_geometry_and_layers() {
        let mut a = DirtyState::default();
        a.mark_dirty_layer(1);
        let b = DirtyState::all();
        a.append(&b);
        assert!(a.rebuild_geometry);
        assert!(a.rebuild_all_layers);
        assert!(a.has_dirty_layer(1));

        let mut c = DirtyState::default();
        c.append(&a);
        assert_eq!(c, a);
    }

    #[test]
    fn test_tile_range_clamps_to_grid() {
        let grid = layout();
        let inside = Bounds::new(Vec3::new(1.0, 0.0, 1.0), Vec3::new(3.0, 1.0, 3.0));
        assert_eq!(
            grid.tile_range(&inside),
            Some(TileRange { min_x: 0, min_y: 0, max_x: 0, max_y: 0 })
        );

        let spanning = Bounds::new(Vec3::new(-50.0, 0.0, 6.0), Vec3::new(8.0, 1.0, 100.0));
        assert_eq!(
            grid.tile_range(&spanning),
            Some(TileRange { min_x: 0, min_y: 0, max_x: 1, max_y: 3 })
        );

        let outside = Bounds::new(Vec3::new(40.0, 0.0, 0.0), Vec3::new(41.0, 1.0, 1.0));
        assert_eq!(grid.tile_range(&outside), None);
        let left = Bounds::new(Vec3::new(-5.0, 0.0, 0.0), Vec3::new(-2.0, 1.0, 1.0));
        assert_eq!(grid.tile_range(&left), None);
    }

    #[test]
    fn test_range_iteration_order() {
        let range = TileRange { min_x: 1, min_y: 2, max_x: 2, max_y: 3 };
        let tiles: Vec<_> = range.iter().collect();
        assert_eq!(tiles, vec![(1, 2), (2, 2), (1, 3), (2, 3)]);
    }

    #[test]
    fn test_tracker_batches() {
        let mut tracker = DirtyTracker::new();
        let area = DirtyArea::new(Bounds::new(Vec3::ZERO, Vec3::ONE), DirtyFlags::GEOMETRY);
        tracker.push(area);
        tracker.push(area);
        let batch = tracker.take_pending();
        assert_eq!(batch.len(), 2);
        tracker.push(area);
        assert_eq!(tracker.pending_count(), 1);

        tracker.mark_tile(3);
        tracker.mark_tile(1);
        tracker.mark_tile(3);
        assert_eq!(tracker.dirty_tiles().collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(tracker.dirty_tile_count(), 2);
        tracker.unmark_tile(1);
        assert_eq!(tracker.dirty_tile_count(), 1);
        tracker.reset();
        assert!(tracker.is_idle());
    }

    #[test]
    fn test_grow_dirty_bounds() {
        let b = Bounds::new(Vec3::ZERO, Vec3::ONE);
        let grown = grow_dirty_bounds(&b, 0.5, 2.0, true);
        assert_eq!(grown.min, Vec3::new(-1.0, -2.0, -1.0));
        assert_eq!(grown.max, Vec3::new(2.0, 1.0, 2.0));
        assert_eq!(grow_dirty_bounds(&b, 0.5, 2.0, false).min.y, 0.0);
    }

    #[test]
    fn test_all_flag() {
        assert!(DirtyFlags::ALL.contains(DirtyFlags::GEOMETRY));
        assert!(DirtyFlags::ALL.contains(DirtyFlags::DYNAMIC_MODIFIER));
        assert!(!DirtyFlags::ALL.contains(DirtyFlags::USE_AGENT_HEIGHT));
    }
}
