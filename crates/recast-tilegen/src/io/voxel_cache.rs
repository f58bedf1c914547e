//! Pre-rasterized spans of one element, keyed by tile
//!
//! Span coordinates are local to the heightfield they were rasterized into,
//! so every entry records that heightfield's origin and cell size. An entry
//! only replays into a heightfield placed the same way.

use super::{checked_count, read_header, read_vec3, remaining, write_header, write_vec3, CodecResultExt};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use glam::Vec3;
use recast::SpanCache;
use recast_common::Result;
use std::io::Cursor;

pub const VOXEL_CACHE_MAGIC: u32 = u32::from_le_bytes(*b"NVOX");
pub const VOXEL_CACHE_VERSION: u32 = 2;

const SPAN_RECORD_SIZE: usize = 9;
const TILE_RECORD_SIZE: usize = 32;

/// Placement of the heightfield a tile's spans were rasterized into
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VoxelGrid {
    pub bmin: Vec3,
    pub cs: f32,
    pub ch: f32,
}

impl VoxelGrid {
    pub fn new(bmin: Vec3, cs: f32, ch: f32) -> Self {
        Self { bmin, cs, ch }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VoxelCacheTile {
    pub tile_x: i32,
    pub tile_y: i32,
    pub grid: VoxelGrid,
    pub spans: Vec<SpanCache>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VoxelCache {
    pub tiles: Vec<VoxelCacheTile>,
}

impl VoxelCache {
    /// Entry of a tile, unless it was built for a differently placed heightfield
    pub fn find(&self, tile_x: i32, tile_y: i32, grid: &VoxelGrid) -> Option<&VoxelCacheTile> {
        self.tiles
            .iter()
            .find(|t| t.tile_x == tile_x && t.tile_y == tile_y && t.grid == *grid)
    }

    /// Adds or replaces the entry of `tile`'s coordinate, whatever its grid
    pub fn insert(&mut self, tile: VoxelCacheTile) {
        match self
            .tiles
            .iter_mut()
            .find(|t| t.tile_x == tile.tile_x && t.tile_y == tile.tile_y)
        {
            Some(existing) => *existing = tile,
            None => self.tiles.push(tile),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let spans: usize = self.tiles.iter().map(|t| t.spans.len()).sum();
        let mut out =
            Vec::with_capacity(12 + self.tiles.len() * TILE_RECORD_SIZE + spans * SPAN_RECORD_SIZE);
        write_header(&mut out, VOXEL_CACHE_MAGIC, VOXEL_CACHE_VERSION)?;
        out.write_i32::<LittleEndian>(self.tiles.len() as i32)?;
        for tile in &self.tiles {
            out.write_i32::<LittleEndian>(tile.tile_x)?;
            out.write_i32::<LittleEndian>(tile.tile_y)?;
            write_vec3(&mut out, tile.grid.bmin)?;
            out.write_f32::<LittleEndian>(tile.grid.cs)?;
            out.write_f32::<LittleEndian>(tile.grid.ch)?;
            out.write_i32::<LittleEndian>(tile.spans.len() as i32)?;
            for span in &tile.spans {
                out.write_u16::<LittleEndian>(span.x)?;
                out.write_u16::<LittleEndian>(span.z)?;
                out.write_u16::<LittleEndian>(span.smin)?;
                out.write_u16::<LittleEndian>(span.smax)?;
                out.write_u8(span.area)?;
            }
        }
        Ok(out)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut r = Cursor::new(data);
        read_header(&mut r, VOXEL_CACHE_MAGIC, VOXEL_CACHE_VERSION, "voxel cache")?;
        let num_tiles = r.read_i32::<LittleEndian>().codec("voxel cache header")?;
        let num_tiles = checked_count(num_tiles, TILE_RECORD_SIZE, remaining(&r), "voxel cache tiles")?;

        let mut tiles = Vec::with_capacity(num_tiles);
        for _ in 0..num_tiles {
            let tile_x = r.read_i32::<LittleEndian>().codec("voxel cache tile")?;
            let tile_y = r.read_i32::<LittleEndian>().codec("voxel cache tile")?;
            let grid = VoxelGrid {
                bmin: read_vec3(&mut r, "voxel cache grid")?,
                cs: r.read_f32::<LittleEndian>().codec("voxel cache grid")?,
                ch: r.read_f32::<LittleEndian>().codec("voxel cache grid")?,
            };
            let num_spans = r.read_i32::<LittleEndian>().codec("voxel cache tile")?;
            let num_spans =
                checked_count(num_spans, SPAN_RECORD_SIZE, remaining(&r), "voxel cache spans")?;
            let mut spans = Vec::with_capacity(num_spans);
            for _ in 0..num_spans {
                spans.push(SpanCache {
                    x: r.read_u16::<LittleEndian>().codec("voxel cache span")?,
                    z: r.read_u16::<LittleEndian>().codec("voxel cache span")?,
                    smin: r.read_u16::<LittleEndian>().codec("voxel cache span")?,
                    smax: r.read_u16::<LittleEndian>().codec("voxel cache span")?,
                    area: r.read_u8().codec("voxel cache span")?,
                });
            }
            tiles.push(VoxelCacheTile {
                tile_x,
                tile_y,
                grid,
                spans,
            });
        }
        Ok(Self { tiles })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recast_common::Error;

    fn span(x: u16, smax: u16) -> SpanCache {
        SpanCache {
            x,
            z: 2,
            smin: 0,
            smax,
            area: 63,
        }
    }

    fn grid(x: f32) -> VoxelGrid {
        VoxelGrid::new(Vec3::new(x, 0.0, -2.0), 0.5, 0.25)
    }

    #[test]
    fn test_insert_replaces_same_tile() {
        let mut cache = VoxelCache::default();
        cache.insert(VoxelCacheTile {
            tile_x: 1,
            tile_y: 2,
            grid: grid(0.0),
            spans: vec![span(0, 1)],
        });
        cache.insert(VoxelCacheTile {
            tile_x: 1,
            tile_y: 2,
            grid: grid(0.0),
            spans: vec![span(3, 4), span(5, 6)],
        });
        assert_eq!(cache.tiles.len(), 1);
        assert_eq!(cache.find(1, 2, &grid(0.0)).map(|t| t.spans.len()), Some(2));
        assert!(cache.find(2, 1, &grid(0.0)).is_none());

        let decoded = VoxelCache::decode(&cache.encode().unwrap()).unwrap();
        assert_eq!(decoded, cache);
    }

    #[test]
    fn test_moved_grid_misses_and_replaces() {
        let mut cache = VoxelCache::default();
        cache.insert(VoxelCacheTile {
            tile_x: 0,
            tile_y: 0,
            grid: grid(0.0),
            spans: vec![span(0, 1)],
        });
        assert!(cache.find(0, 0, &grid(20.0)).is_none());
        let finer = VoxelGrid::new(grid(0.0).bmin, 0.25, 0.25);
        assert!(cache.find(0, 0, &finer).is_none());

        cache.insert(VoxelCacheTile {
            tile_x: 0,
            tile_y: 0,
            grid: grid(20.0),
            spans: vec![span(7, 8)],
        });
        assert_eq!(cache.tiles.len(), 1);
        assert!(cache.find(0, 0, &grid(0.0)).is_none());

        let decoded = VoxelCache::decode(&cache.encode().unwrap()).unwrap();
        assert_eq!(decoded.find(0, 0, &grid(20.0)).map(|t| t.spans[0].x), Some(7));
    }

    #[test]
    fn test_rejects_oversized_counts() {
        let mut bytes = VoxelCache::default().encode().unwrap();
        let n = bytes.len();
        bytes[n - 4..].copy_from_slice(&1000i32.to_le_bytes());
        assert!(matches!(VoxelCache::decode(&bytes), Err(Error::Codec(_))));
        assert!(matches!(VoxelCache::decode(&bytes[..6]), Err(Error::Codec(_))));
    }
}
