//! Compact heightfield: the open space above walkable spans
//!
//! Each cell stores a run of spans in one flat array; every span keeps a
//! packed link to the neighbouring span it can step to in each of the four
//! directions.

use crate::heightfield::Heightfield;
use crate::{dir_offset_x, dir_offset_z, NULL_AREA};
use glam::Vec3;
use recast_common::{Error, Result};

/// Connection value meaning "no neighbour in this direction"
pub const NOT_CONNECTED: u8 = 0x3f;

/// Maximum number of spans a neighbour cell may have for a link to be stored
const MAX_LAYERS: usize = NOT_CONNECTED as usize - 1;

const MAX_HEIGHT: i32 = 0xffff;

/// Range of spans belonging to one grid cell
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactCell {
    pub index: u32,
    pub count: u32,
}

/// Open span above a walkable surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactSpan {
    /// Floor height (voxels)
    pub y: u16,
    /// Clearance above the floor (voxels)
    pub h: u16,
    /// Region id, 0 when unassigned
    pub reg: u16,
    /// Four 6-bit neighbour links
    con: u32,
}

impl Default for CompactSpan {
    fn default() -> Self {
        Self {
            y: 0,
            h: 0,
            reg: 0,
            con: 0x00ff_ffff,
        }
    }
}

impl CompactSpan {
    pub fn new(y: u16, h: u16) -> Self {
        Self {
            y,
            h,
            ..Self::default()
        }
    }

    /// Index of the neighbour span within its cell, or [`NOT_CONNECTED`]
    #[inline]
    pub fn con(&self, dir: usize) -> u8 {
        ((self.con >> (dir * 6)) & 0x3f) as u8
    }

    #[inline]
    pub fn is_connected(&self, dir: usize) -> bool {
        self.con(dir) != NOT_CONNECTED
    }

    #[inline]
    pub fn set_con(&mut self, dir: usize, value: u8) {
        let shift = dir * 6;
        self.con = (self.con & !(0x3f << shift)) | (((value & 0x3f) as u32) << shift);
    }
}

/// Compact representation of the walkable space of a tile
#[derive(Debug, Clone)]
pub struct CompactHeightfield {
    pub width: i32,
    pub height: i32,
    pub walkable_height: i32,
    pub walkable_climb: i32,
    pub border_size: i32,
    pub max_distance: u16,
    pub max_regions: u16,
    pub bmin: Vec3,
    pub bmax: Vec3,
    pub cs: f32,
    pub ch: f32,
    pub cells: Vec<CompactCell>,
    pub spans: Vec<CompactSpan>,
    /// Distance to the nearest boundary, filled by the distance field pass
    pub dist: Vec<u16>,
    pub areas: Vec<u8>,
    /// Per-span 4-bit mask of edges that continue into a neighbouring tile or layer.
    /// Empty unless the field was expanded from a heightfield layer.
    pub portals: Vec<u8>,
}

impl CompactHeightfield {
    /// Creates an empty field of the given size. Used when expanding layers.
    pub fn with_size(width: i32, height: i32, bmin: Vec3, bmax: Vec3, cs: f32, ch: f32) -> Self {
        Self {
            width,
            height,
            walkable_height: 0,
            walkable_climb: 0,
            border_size: 0,
            max_distance: 0,
            max_regions: 0,
            bmin,
            bmax,
            cs,
            ch,
            cells: vec![CompactCell::default(); (width.max(0) * height.max(0)) as usize],
            spans: Vec::new(),
            dist: Vec::new(),
            areas: Vec::new(),
            portals: Vec::new(),
        }
    }

    /// Builds the compact representation of the walkable spans of `hf` and
    /// links every span to the neighbours an agent can step to.
    pub fn build_from_heightfield(
        hf: &Heightfield,
        walkable_height: i32,
        walkable_climb: i32,
    ) -> Result<Self> {
        let w = hf.width;
        let h = hf.height;
        let mut chf = Self::with_size(
            w,
            h,
            hf.bmin,
            hf.bmax + Vec3::new(0.0, walkable_height as f32 * hf.ch, 0.0),
            hf.cs,
            hf.ch,
        );
        chf.walkable_height = walkable_height;
        chf.walkable_climb = walkable_climb;

        let span_count: usize = (0..h)
            .flat_map(|z| (0..w).map(move |x| (x, z)))
            .map(|(x, z)| {
                hf.column(x, z)
                    .iter()
                    .filter(|s| s.area != NULL_AREA)
                    .count()
            })
            .sum();
        chf.spans.reserve(span_count);
        chf.areas.reserve(span_count);

        for z in 0..h {
            for x in 0..w {
                let column = hf.column(x, z);
                let cell_index = (x + z * w) as usize;
                chf.cells[cell_index].index = chf.spans.len() as u32;
                for (si, span) in column.iter().enumerate() {
                    if span.area == NULL_AREA {
                        continue;
                    }
                    let bot = span.smax as i32;
                    let top = column.get(si + 1).map_or(MAX_HEIGHT, |n| n.smin as i32);
                    chf.spans.push(CompactSpan::new(
                        bot.clamp(0, 0xffff) as u16,
                        (top - bot).clamp(0, 0xffff) as u16,
                    ));
                    chf.areas.push(span.area);
                    chf.cells[cell_index].count += 1;
                }
            }
        }

        let mut too_many_layers = 0;
        for z in 0..h {
            for x in 0..w {
                let cell = chf.cells[(x + z * w) as usize];
                for i in cell.index..cell.index + cell.count {
                    let i = i as usize;
                    for dir in 0..4 {
                        let nx = x + dir_offset_x(dir);
                        let nz = z + dir_offset_z(dir);
                        if nx < 0 || nz < 0 || nx >= w || nz >= h {
                            continue;
                        }
                        let s = chf.spans[i];
                        let ncell = chf.cells[(nx + nz * w) as usize];
                        for k in ncell.index..ncell.index + ncell.count {
                            let ns = chf.spans[k as usize];
                            let bot = (s.y as i32).max(ns.y as i32);
                            let top = (s.y as i32 + s.h as i32).min(ns.y as i32 + ns.h as i32);
                            if top - bot >= walkable_height
                                && (ns.y as i32 - s.y as i32).abs() <= walkable_climb
                            {
                                let layer = (k - ncell.index) as usize;
                                if layer > MAX_LAYERS {
                                    too_many_layers = too_many_layers.max(layer);
                                    continue;
                                }
                                chf.spans[i].set_con(dir, layer as u8);
                                break;
                            }
                        }
                    }
                }
            }
        }

        if too_many_layers > 0 {
            log::warn!(
                "compact heightfield has {} stacked spans in one cell, links above {} dropped",
                too_many_layers,
                MAX_LAYERS
            );
        }

        if chf.spans.len() != span_count {
            return Err(Error::Recast(
                "compact heightfield span count mismatch".to_string(),
            ));
        }
        Ok(chf)
    }

    pub fn span_count(&self) -> usize {
        self.spans.len()
    }

    #[inline]
    pub fn cell(&self, x: i32, z: i32) -> CompactCell {
        self.cells[(x + z * self.width) as usize]
    }

    /// Index of the span reached from span `i` at (x, z) going `dir`, if linked
    #[inline]
    pub fn neighbour(&self, x: i32, z: i32, i: usize, dir: usize) -> Option<usize> {
        let con = self.spans[i].con(dir);
        if con == NOT_CONNECTED {
            return None;
        }
        let cell = self.cell(x + dir_offset_x(dir), z + dir_offset_z(dir));
        Some(cell.index as usize + con as usize)
    }

    /// True when span `i` has a portal edge in direction `dir`
    #[inline]
    pub fn is_portal(&self, i: usize, dir: usize) -> bool {
        self.portals
            .get(i)
            .is_some_and(|mask| mask & (1 << dir) != 0)
    }

    /// Iterates `(x, z, span index)` over every span
    pub fn iter_spans(&self) -> impl Iterator<Item = (i32, i32, usize)> + '_ {
        (0..self.height).flat_map(move |z| {
            (0..self.width).flat_map(move |x| {
                let c = self.cell(x, z);
                (c.index as usize..(c.index + c.count) as usize).map(move |i| (x, z, i))
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::WALKABLE_AREA;

    fn two_floor_field() -> Heightfield {
        let mut hf =
            Heightfield::new(3, 3, Vec3::ZERO, Vec3::new(3.0, 20.0, 3.0), 1.0, 0.5).unwrap();
        for z in 0..3 {
            for x in 0..3 {
                hf.add_span(x, z, 0, 2, WALKABLE_AREA, 1).unwrap();
                hf.add_span(x, z, 20, 22, WALKABLE_AREA, 1).unwrap();
            }
        }
        hf
    }

    #[test]
    fn test_con_packing() {
        let mut s = CompactSpan::new(0, 0);
        for dir in 0..4 {
            assert!(!s.is_connected(dir));
        }
        s.set_con(2, 5);
        s.set_con(0, 1);
        assert_eq!(s.con(2), 5);
        assert_eq!(s.con(0), 1);
        assert_eq!(s.con(1), NOT_CONNECTED);
        s.set_con(2, NOT_CONNECTED);
        assert!(!s.is_connected(2));
    }

    #[test]
    fn test_build_links_floors_separately() {
        let hf = two_floor_field();
        let chf = CompactHeightfield::build_from_heightfield(&hf, 4, 2).unwrap();
        assert_eq!(chf.span_count(), 18);

        let centre = chf.cell(1, 1);
        assert_eq!(centre.count, 2);
        let lower = centre.index as usize;
        let upper = lower + 1;
        for dir in 0..4 {
            let n = chf.neighbour(1, 1, lower, dir).unwrap();
            assert_eq!(chf.spans[n].y, 2);
            let n = chf.neighbour(1, 1, upper, dir).unwrap();
            assert_eq!(chf.spans[n].y, 22);
        }
        // the corner has no neighbour to the -x side
        let corner = chf.cell(0, 0).index as usize;
        assert!(chf.neighbour(0, 0, corner, 0).is_none());
        assert_eq!(chf.iter_spans().count(), 18);
    }

    #[test]
    fn test_low_clearance_blocks_links() {
        let hf = two_floor_field();
        // lower floor has 18 voxels of clearance, ask for more
        let chf = CompactHeightfield::build_from_heightfield(&hf, 19, 2).unwrap();
        let lower = chf.cell(1, 1).index as usize;
        assert!(chf.neighbour(1, 1, lower, 0).is_none());
    }
}
