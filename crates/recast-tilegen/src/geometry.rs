//! Geometry input
//!
//! The generator never touches meshes directly. It asks a [`GeometrySource`]
//! for the [`NavigationElement`]s around a tile and reads their exported
//! collision blobs and modifiers.

use crate::io::{GeometryCache, VoxelCache, VoxelCacheTile, VoxelGrid};
use crate::modifiers::CompositeModifier;
use recast::SpanCache;
use recast_common::{Bounds, Result};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

#[derive(Debug)]
struct ElementGeometry {
    /// Encoded [`GeometryCache`], empty when the element has no collision
    collision: Arc<[u8]>,
    version: u32,
    /// Encoded [`VoxelCache`] built against `voxel_version`
    voxels: Vec<u8>,
    voxel_version: u32,
}

impl Default for ElementGeometry {
    fn default() -> Self {
        Self {
            collision: Arc::from(Vec::new()),
            version: 0,
            voxels: Vec::new(),
            voxel_version: 0,
        }
    }
}

/// One entry of the spatial index: collision geometry and/or modifiers
#[derive(Debug)]
pub struct NavigationElement {
    pub id: u64,
    pub bounds: Bounds,
    pub modifier: CompositeModifier,
    geometry: Mutex<ElementGeometry>,
}

/// Collision blob of an element at the moment it was gathered for a tile
#[derive(Debug, Clone)]
pub struct GeometrySnapshot {
    pub element: Arc<NavigationElement>,
    pub collision: Arc<[u8]>,
    pub version: u32,
}

impl NavigationElement {
    pub fn new(id: u64, bounds: Bounds) -> Self {
        Self {
            id,
            bounds,
            modifier: CompositeModifier::default(),
            geometry: Mutex::new(ElementGeometry::default()),
        }
    }

    /// Attaches collision geometry; the element bounds grow to cover it
    pub fn with_geometry(mut self, cache: &GeometryCache) -> Result<Self> {
        self.bounds = self.bounds.union(&cache.bounds());
        self.set_geometry(cache)?;
        Ok(self)
    }

    pub fn with_modifier(mut self, modifier: CompositeModifier) -> Self {
        self.bounds = self.bounds.union(&modifier.bounds());
        self.modifier = modifier;
        self
    }

    fn lock(&self) -> MutexGuard<'_, ElementGeometry> {
        self.geometry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replaces the collision blob. Cached voxels of the old blob are dropped.
    pub fn set_geometry(&self, cache: &GeometryCache) -> Result<()> {
        let bytes = cache.encode()?;
        let mut geometry = self.lock();
        geometry.collision = bytes.into();
        geometry.version = geometry.version.wrapping_add(1);
        geometry.voxels.clear();
        Ok(())
    }

    pub fn has_geometry(&self) -> bool {
        !self.lock().collision.is_empty()
    }

    pub fn cache_version(&self) -> u32 {
        self.lock().version
    }

    pub fn snapshot(self: &Arc<Self>) -> GeometrySnapshot {
        let geometry = self.lock();
        GeometrySnapshot {
            element: Arc::clone(self),
            collision: Arc::clone(&geometry.collision),
            version: geometry.version,
        }
    }

    /// Spans cached for a tile, as long as they were built from `version`
    /// into a heightfield placed at `grid`
    pub fn cached_spans(
        &self,
        tile_x: i32,
        tile_y: i32,
        grid: &VoxelGrid,
        version: u32,
    ) -> Result<Option<Vec<SpanCache>>> {
        let geometry = self.lock();
        if geometry.voxels.is_empty() || geometry.voxel_version != version {
            return Ok(None);
        }
        let cache = VoxelCache::decode(&geometry.voxels)?;
        Ok(cache.find(tile_x, tile_y, grid).map(|t| t.spans.clone()))
    }

    /// Stores spans for a tile. Ignored when the geometry changed since `version`.
    pub fn store_spans(
        &self,
        tile_x: i32,
        tile_y: i32,
        grid: VoxelGrid,
        version: u32,
        spans: Vec<SpanCache>,
    ) -> Result<()> {
        let mut geometry = self.lock();
        if geometry.version != version {
            return Ok(());
        }
        let mut cache = if geometry.voxels.is_empty() || geometry.voxel_version != version {
            VoxelCache::default()
        } else {
            VoxelCache::decode(&geometry.voxels)?
        };
        cache.insert(VoxelCacheTile {
            tile_x,
            tile_y,
            grid,
            spans,
        });
        geometry.voxels = cache.encode()?;
        geometry.voxel_version = version;
        Ok(())
    }

    pub fn memory_size(&self) -> usize {
        let geometry = self.lock();
        geometry.collision.len() + geometry.voxels.len()
    }
}

/// Spatial index the generator pulls tile inputs from
pub trait GeometrySource: Send + Sync {
    /// Elements whose bounds intersect `bounds`, in a stable order
    fn elements_in(&self, bounds: &Bounds) -> Vec<Arc<NavigationElement>>;
}

/// Linear-scan element list. Enough for tests and small worlds.
#[derive(Debug, Default)]
pub struct ElementIndex {
    elements: RwLock<Vec<Arc<NavigationElement>>>,
}

impl ElementIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, element: NavigationElement) -> Arc<NavigationElement> {
        let element = Arc::new(element);
        let mut elements = self.elements.write().unwrap_or_else(PoisonError::into_inner);
        elements.retain(|e| e.id != element.id);
        elements.push(Arc::clone(&element));
        element
    }

    pub fn remove(&self, id: u64) -> Option<Arc<NavigationElement>> {
        let mut elements = self.elements.write().unwrap_or_else(PoisonError::into_inner);
        let pos = elements.iter().position(|e| e.id == id)?;
        Some(elements.remove(pos))
    }

    pub fn get(&self, id: u64) -> Option<Arc<NavigationElement>> {
        self.elements
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|e| e.id == id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.elements.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl GeometrySource for ElementIndex {
    fn elements_in(&self, bounds: &Bounds) -> Vec<Arc<NavigationElement>> {
        let mut found: Vec<_> = self
            .elements
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.bounds.intersects(bounds))
            .cloned()
            .collect();
        found.sort_by_key(|e| e.id);
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn floor(size: f32) -> GeometryCache {
        GeometryCache::new(
            vec![
                Vec3::new(0.0, 0.0, 0.0),
                Vec3::new(0.0, 0.0, size),
                Vec3::new(size, 0.0, size),
                Vec3::new(size, 0.0, 0.0),
            ],
            vec![0, 1, 2, 0, 2, 3],
        )
    }

    fn span() -> SpanCache {
        SpanCache {
            x: 1,
            z: 1,
            smin: 0,
            smax: 2,
            area: 63,
        }
    }

    #[test]
    fn test_geometry_extends_bounds() {
        let element = NavigationElement::new(1, Bounds::empty())
            .with_geometry(&floor(4.0))
            .unwrap();
        assert!(element.has_geometry());
        assert_eq!(element.bounds.max, Vec3::new(4.0, 0.0, 4.0));
        assert_eq!(element.cache_version(), 1);
    }

    #[test]
    fn test_voxel_cache_follows_geometry_version() {
        let element = Arc::new(
            NavigationElement::new(1, Bounds::empty())
                .with_geometry(&floor(4.0))
                .unwrap(),
        );
        let snap = element.snapshot();
        let grid = VoxelGrid::new(Vec3::new(-1.0, 0.0, -1.0), 0.5, 0.5);
        assert_eq!(element.cached_spans(0, 0, &grid, snap.version).unwrap(), None);

        element.store_spans(0, 0, grid, snap.version, vec![span()]).unwrap();
        element.store_spans(1, 0, grid, snap.version, vec![]).unwrap();
        assert_eq!(element.cached_spans(0, 0, &grid, snap.version).unwrap(), Some(vec![span()]));
        assert_eq!(element.cached_spans(1, 0, &grid, snap.version).unwrap(), Some(vec![]));

        element.set_geometry(&floor(8.0)).unwrap();
        assert_eq!(element.cached_spans(0, 0, &grid, snap.version).unwrap(), None);
        element.store_spans(0, 0, grid, snap.version, vec![span()]).unwrap();
        assert_eq!(element.cached_spans(0, 0, &grid, element.cache_version()).unwrap(), None);
    }

    #[test]
    fn test_voxel_cache_ignores_moved_heightfield() {
        let element = Arc::new(
            NavigationElement::new(1, Bounds::empty())
                .with_geometry(&floor(4.0))
                .unwrap(),
        );
        let version = element.cache_version();
        let old = VoxelGrid::new(Vec3::new(-1.0, 0.0, -1.0), 0.5, 0.5);
        let moved = VoxelGrid::new(Vec3::new(19.0, 0.0, 19.0), 0.5, 0.5);
        element.store_spans(0, 0, old, version, vec![span()]).unwrap();
        assert_eq!(element.cached_spans(0, 0, &moved, version).unwrap(), None);

        element.store_spans(0, 0, moved, version, vec![]).unwrap();
        assert_eq!(element.cached_spans(0, 0, &moved, version).unwrap(), Some(vec![]));
        assert_eq!(element.cached_spans(0, 0, &old, version).unwrap(), None);
    }

    #[test]
    fn test_index_query() {
        let index = ElementIndex::new();
        index.insert(NavigationElement::new(2, Bounds::new(Vec3::ZERO, Vec3::ONE)));
        index.insert(NavigationElement::new(
            1,
            Bounds::new(Vec3::splat(0.5), Vec3::splat(2.0)),
        ));
        index.insert(NavigationElement::new(
            3,
            Bounds::new(Vec3::splat(10.0), Vec3::splat(11.0)),
        ));

        let hits = index.elements_in(&Bounds::new(Vec3::splat(0.8), Vec3::splat(0.9)));
        assert_eq!(hits.iter().map(|e| e.id).collect::<Vec<_>>(), vec![1, 2]);

        assert!(index.remove(3).is_some());
        assert!(index.remove(3).is_none());
        assert_eq!(index.len(), 2);
        assert!(index.get(2).is_some());
    }
}
