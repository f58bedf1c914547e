//! Heightfield layers
//!
//! Splits the walkable spans of a tile into 2D layers that never overlap
//! themselves. Each layer is a flat grid over the tile interior holding one
//! height, area and connection mask per cell, which makes it cheap to store
//! and to rebuild navigation data from when only area markings change.

use crate::compact_heightfield::{CompactHeightfield, CompactSpan};
use crate::config::PartitionType;
use crate::regions::{partition_spans, BORDER_REG};
use crate::{dir_offset_x, dir_offset_z, NULL_AREA};
use glam::Vec3;
use recast_common::{Error, Result};
use std::collections::HashMap;

/// Marker for cells of a layer grid that hold no span
pub const LAYER_EMPTY_HEIGHT: u8 = 0xff;

const MAX_LAYERS: usize = 255;
const NO_LAYER: u8 = 0xff;
const MAX_HEIGHT_RANGE: u16 = 255;

/// One vertically separated layer of a tile
#[derive(Debug, Clone, PartialEq)]
pub struct HeightfieldLayer {
    /// World bounds; y covers `hmin..=hmax`
    pub bmin: Vec3,
    pub bmax: Vec3,
    pub cs: f32,
    pub ch: f32,
    /// Grid size (tile interior)
    pub width: i32,
    pub height: i32,
    /// Used cell range inside the grid
    pub minx: i32,
    pub maxx: i32,
    pub minz: i32,
    pub maxz: i32,
    /// Height range relative to the owning tile's heightfield origin
    pub hmin: i32,
    pub hmax: i32,
    /// Per cell floor height above `hmin`, [`LAYER_EMPTY_HEIGHT`] when empty
    pub heights: Vec<u8>,
    pub areas: Vec<u8>,
    /// Low nibble: walkable links inside the layer. High nibble: portals.
    pub cons: Vec<u8>,
}

impl HeightfieldLayer {
    pub fn cell_count(&self) -> usize {
        self.heights
            .iter()
            .filter(|&&h| h != LAYER_EMPTY_HEIGHT)
            .count()
    }

    /// Expands the layer back into a single-span-per-cell compact field with
    /// no border. Connections come from the stored masks and portal bits are
    /// kept in `portals`.
    pub fn to_compact_heightfield(
        &self,
        walkable_height: i32,
        walkable_climb: i32,
    ) -> CompactHeightfield {
        let mut chf = CompactHeightfield::with_size(
            self.width,
            self.height,
            self.bmin,
            self.bmax,
            self.cs,
            self.ch,
        );
        chf.walkable_height = walkable_height;
        chf.walkable_climb = walkable_climb;

        let mut span_of_cell = vec![None; self.heights.len()];
        for (idx, &h) in self.heights.iter().enumerate() {
            chf.cells[idx].index = chf.spans.len() as u32;
            if h == LAYER_EMPTY_HEIGHT || self.areas[idx] == NULL_AREA {
                continue;
            }
            span_of_cell[idx] = Some(chf.spans.len());
            chf.cells[idx].count = 1;
            chf.spans.push(CompactSpan::new(h as u16, 0xff));
            chf.areas.push(self.areas[idx]);
            chf.portals.push(self.cons[idx] >> 4);
        }

        for z in 0..self.height {
            for x in 0..self.width {
                let idx = (x + z * self.width) as usize;
                let Some(i) = span_of_cell[idx] else {
                    continue;
                };
                let con = self.cons[idx] & 0xf;
                for dir in 0..4 {
                    if con & (1 << dir) == 0 {
                        continue;
                    }
                    let nx = x + dir_offset_x(dir);
                    let nz = z + dir_offset_z(dir);
                    if nx < 0 || nz < 0 || nx >= self.width || nz >= self.height {
                        continue;
                    }
                    if span_of_cell[(nx + nz * self.width) as usize].is_some() {
                        chf.spans[i].set_con(dir, 0);
                    }
                }
            }
        }
        chf
    }
}

/// All layers of one tile, ordered by id
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeightfieldLayerSet {
    pub layers: Vec<HeightfieldLayer>,
}

impl HeightfieldLayerSet {
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

#[derive(Debug, Clone)]
struct LayerRegion {
    ymin: u16,
    ymax: u16,
    layer_id: u8,
    base: bool,
    neis: Vec<u16>,
    /// Regions sharing a column with this one
    overlaps: Vec<u16>,
}

impl Default for LayerRegion {
    fn default() -> Self {
        Self {
            ymin: u16::MAX,
            ymax: 0,
            layer_id: NO_LAYER,
            base: false,
            neis: Vec::new(),
            overlaps: Vec::new(),
        }
    }
}

fn add_unique(list: &mut Vec<u16>, v: u16) {
    if !list.contains(&v) {
        list.push(v);
    }
}

fn overlap_range(amin: u16, amax: u16, bmin: u16, bmax: u16) -> bool {
    !(amin > bmax || amax < bmin)
}

/// Gives every repeat of a region within one column a fresh id so that no
/// region stacks on top of itself
fn split_column_conflicts(chf: &CompactHeightfield, src_reg: &mut [u16], next_id: u16) -> Result<u16> {
    let mut next = next_id as u32;
    let mut aliases: HashMap<(u16, usize), u16> = HashMap::new();
    let mut seen: Vec<u16> = Vec::new();

    for cell in &chf.cells {
        seen.clear();
        for i in cell.index as usize..(cell.index + cell.count) as usize {
            let r = src_reg[i];
            if r == 0 || r & BORDER_REG != 0 {
                continue;
            }
            let repeats = seen.iter().filter(|&&s| s == r).count();
            seen.push(r);
            if repeats == 0 {
                continue;
            }
            let alias = match aliases.get(&(r, repeats)) {
                Some(&a) => a,
                None => {
                    if next >= BORDER_REG as u32 {
                        return Err(Error::LimitExceeded {
                            what: "layer region id",
                            count: next as usize,
                            max: BORDER_REG as usize - 1,
                        });
                    }
                    let a = next as u16;
                    next += 1;
                    aliases.insert((r, repeats), a);
                    a
                }
            };
            src_reg[i] = alias;
        }
    }
    Ok(next as u16)
}

/// Partitions the walkable spans of `chf` into non-overlapping layers.
///
/// Regions are formed with `partition`, then flood-filled into layers so that
/// no layer covers a column twice and no layer spans more than 255 voxels of
/// height. Layers closer than `walkable_height * 4` that do not overlap are
/// merged. Only the tile interior (`border_size` cells in from each side) is
/// stored.
pub fn build_heightfield_layers(
    chf: &mut CompactHeightfield,
    border_size: i32,
    walkable_height: i32,
    partition: PartitionType,
    chunk_size: i32,
) -> Result<HeightfieldLayerSet> {
    let (mut src_reg, next_id) = partition_spans(chf, partition, border_size, chunk_size)?;
    let nregs = split_column_conflicts(chf, &mut src_reg, next_id)? as usize;

    let valid = |r: u16| r != 0 && r & BORDER_REG == 0 && (r as usize) < nregs;
    let mut regs = vec![LayerRegion::default(); nregs];

    for (x, z, i) in chf.iter_spans() {
        let ri = src_reg[i];
        if !valid(ri) {
            continue;
        }
        let y = chf.spans[i].y;
        {
            let reg = &mut regs[ri as usize];
            reg.ymin = reg.ymin.min(y);
            reg.ymax = reg.ymax.max(y);
        }

        for dir in 0..4 {
            if let Some(ai) = chf.neighbour(x, z, i, dir) {
                let rai = src_reg[ai];
                if valid(rai) && rai != ri {
                    add_unique(&mut regs[ri as usize].neis, rai);
                }
            }
        }

        let cell = chf.cell(x, z);
        for j in cell.index as usize..(cell.index + cell.count) as usize {
            let rj = src_reg[j];
            if j != i && valid(rj) && rj != ri {
                add_unique(&mut regs[ri as usize].overlaps, rj);
            }
        }
    }

    // flood regions into layers
    let mut layer_count = 0_usize;
    let mut stack = Vec::new();
    for start in 1..nregs {
        if regs[start].layer_id != NO_LAYER || regs[start].ymin > regs[start].ymax {
            continue;
        }
        if layer_count >= MAX_LAYERS {
            return Err(Error::LimitExceeded {
                what: "tile layer",
                count: layer_count + 1,
                max: MAX_LAYERS,
            });
        }
        let lid = layer_count as u8;
        layer_count += 1;

        regs[start].layer_id = lid;
        regs[start].base = true;
        let mut root_overlaps = regs[start].overlaps.clone();
        let (mut ymin, mut ymax) = (regs[start].ymin, regs[start].ymax);

        stack.clear();
        stack.push(start);
        while let Some(ri) = stack.pop() {
            for k in 0..regs[ri].neis.len() {
                let nei = regs[ri].neis[k] as usize;
                let other = &regs[nei];
                if other.layer_id != NO_LAYER || root_overlaps.contains(&(nei as u16)) {
                    continue;
                }
                let nmin = ymin.min(other.ymin);
                let nmax = ymax.max(other.ymax);
                if nmax - nmin >= MAX_HEIGHT_RANGE {
                    continue;
                }
                ymin = nmin;
                ymax = nmax;
                for &o in &regs[nei].overlaps {
                    add_unique(&mut root_overlaps, o);
                }
                regs[nei].layer_id = lid;
                stack.push(nei);
            }
        }
        regs[start].overlaps = root_overlaps;
        regs[start].ymin = ymin;
        regs[start].ymax = ymax;
    }

    // merge layers that sit close together without overlapping
    let merge_height = (walkable_height * 4).clamp(0, u16::MAX as i32) as u16;
    for i in 1..nregs {
        if !regs[i].base {
            continue;
        }
        loop {
            let new_id = regs[i].layer_id;
            let mut merged = None;
            for j in 1..nregs {
                if i == j || !regs[j].base || regs[j].layer_id == new_id {
                    continue;
                }
                let (ri, rj) = (&regs[i], &regs[j]);
                if !overlap_range(
                    ri.ymin,
                    ri.ymax.saturating_add(merge_height),
                    rj.ymin,
                    rj.ymax.saturating_add(merge_height),
                ) {
                    continue;
                }
                let ymin = ri.ymin.min(rj.ymin);
                let ymax = ri.ymax.max(rj.ymax);
                if ymax - ymin >= MAX_HEIGHT_RANGE {
                    continue;
                }
                let old_id = rj.layer_id;
                let overlaps = (1..nregs).any(|k| {
                    regs[k].layer_id == old_id && ri.overlaps.contains(&(k as u16))
                });
                if !overlaps {
                    merged = Some(j);
                    break;
                }
            }

            let Some(j) = merged else {
                break;
            };
            let old_id = regs[j].layer_id;
            let overlaps = std::mem::take(&mut regs[j].overlaps);
            for o in overlaps {
                add_unique(&mut regs[i].overlaps, o);
            }
            regs[i].ymin = regs[i].ymin.min(regs[j].ymin);
            regs[i].ymax = regs[i].ymax.max(regs[j].ymax);
            regs[j].base = false;
            for r in regs.iter_mut() {
                if r.layer_id == old_id {
                    r.layer_id = new_id;
                }
            }
        }
    }

    // compact layer ids
    let mut remap = [NO_LAYER; 256];
    let mut nlayers = 0_usize;
    for r in regs.iter_mut().skip(1) {
        if r.layer_id == NO_LAYER {
            continue;
        }
        let slot = &mut remap[r.layer_id as usize];
        if *slot == NO_LAYER {
            *slot = nlayers as u8;
            nlayers += 1;
        }
        r.layer_id = *slot;
    }

    if nlayers == 0 {
        return Ok(HeightfieldLayerSet::default());
    }

    let w = chf.width;
    let h = chf.height;
    let lw = w - border_size * 2;
    let lh = h - border_size * 2;
    if lw <= 0 || lh <= 0 {
        return Ok(HeightfieldLayerSet::default());
    }

    let mut bmin = chf.bmin;
    let mut bmax = chf.bmax;
    bmin.x += border_size as f32 * chf.cs;
    bmin.z += border_size as f32 * chf.cs;
    bmax.x -= border_size as f32 * chf.cs;
    bmax.z -= border_size as f32 * chf.cs;

    let layer_of = |i: usize| -> u8 {
        let r = src_reg[i];
        if valid(r) {
            regs[r as usize].layer_id
        } else {
            NO_LAYER
        }
    };

    let mut set = HeightfieldLayerSet::default();
    for lid in 0..nlayers as u8 {
        let (mut hmin, mut hmax) = (u16::MAX, 0_u16);
        for r in regs.iter().skip(1) {
            if r.layer_id == lid && r.ymin <= r.ymax {
                hmin = hmin.min(r.ymin);
                hmax = hmax.max(r.ymax);
            }
        }
        let hmin = hmin as i32;

        let cells = (lw * lh) as usize;
        let mut layer = HeightfieldLayer {
            bmin: Vec3::new(bmin.x, chf.bmin.y + hmin as f32 * chf.ch, bmin.z),
            bmax: Vec3::new(bmax.x, chf.bmin.y + hmax as f32 * chf.ch, bmax.z),
            cs: chf.cs,
            ch: chf.ch,
            width: lw,
            height: lh,
            minx: lw,
            maxx: 0,
            minz: lh,
            maxz: 0,
            hmin,
            hmax: hmax as i32,
            heights: vec![LAYER_EMPTY_HEIGHT; cells],
            areas: vec![NULL_AREA; cells],
            cons: vec![0; cells],
        };

        for z in 0..lh {
            for x in 0..lw {
                let cx = x + border_size;
                let cz = z + border_size;
                let cell = chf.cell(cx, cz);
                for i in cell.index as usize..(cell.index + cell.count) as usize {
                    if layer_of(i) != lid {
                        continue;
                    }
                    let idx = (x + z * lw) as usize;
                    let s = chf.spans[i];
                    layer.minx = layer.minx.min(x);
                    layer.maxx = layer.maxx.max(x);
                    layer.minz = layer.minz.min(z);
                    layer.maxz = layer.maxz.max(z);
                    layer.heights[idx] = (s.y as i32 - hmin).clamp(0, 254) as u8;
                    layer.areas[idx] = chf.areas[i];

                    let mut portal = 0_u8;
                    let mut con = 0_u8;
                    for dir in 0..4 {
                        let Some(ai) = chf.neighbour(cx, cz, i, dir) else {
                            continue;
                        };
                        let alid = layer_of(ai);
                        if alid != lid {
                            if chf.areas[ai] == NULL_AREA {
                                continue;
                            }
                            portal |= 1 << dir;
                            // heights match on both sides of a portal
                            let ay = chf.spans[ai].y as i32;
                            if ay > hmin {
                                let raised = (ay - hmin).clamp(0, 254) as u8;
                                layer.heights[idx] = layer.heights[idx].max(raised);
                            }
                        } else {
                            let nx = cx + dir_offset_x(dir) - border_size;
                            let nz = cz + dir_offset_z(dir) - border_size;
                            if nx >= 0 && nz >= 0 && nx < lw && nz < lh {
                                con |= 1 << dir;
                            }
                        }
                    }
                    layer.cons[idx] = (portal << 4) | con;
                }
            }
        }

        if layer.minx > layer.maxx || layer.minz > layer.maxz {
            // only border spans belong to this layer
            continue;
        }
        set.layers.push(layer);
    }

    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heightfield::Heightfield;
    use crate::WALKABLE_AREA;

    fn build(size: i32, floors: &[(u16, u16)]) -> CompactHeightfield {
        let s = size as f32;
        let mut hf = Heightfield::new(size, size, Vec3::ZERO, Vec3::new(s, 200.0, s), 1.0, 1.0)
            .unwrap();
        for z in 0..size {
            for x in 0..size {
                for &(smin, smax) in floors {
                    hf.add_span(x, z, smin, smax, WALKABLE_AREA, 1).unwrap();
                }
            }
        }
        CompactHeightfield::build_from_heightfield(&hf, 2, 1).unwrap()
    }

    #[test]
    fn test_single_floor_one_layer() {
        let mut chf = build(8, &[(0, 1)]);
        let set = build_heightfield_layers(&mut chf, 2, 2, PartitionType::Monotone, 0).unwrap();
        assert_eq!(set.len(), 1);
        let layer = &set.layers[0];
        assert_eq!(layer.width, 4);
        assert_eq!(layer.height, 4);
        assert_eq!(layer.cell_count(), 16);
        assert_eq!((layer.minx, layer.maxx, layer.minz, layer.maxz), (0, 3, 0, 3));
        assert!((layer.bmin.x - 2.0).abs() < 1e-6);
        assert!((layer.bmax.x - 6.0).abs() < 1e-6);

        // corner cell: links to +x and +z, portals to -x and -z (the border)
        let corner = layer.cons[0];
        assert_eq!(corner & 0xf, (1 << 1) | (1 << 2));
        assert_eq!(corner >> 4, (1 << 0) | (1 << 3));
        // interior cell has no portals
        assert_eq!(layer.cons[(1 + 1 * 4) as usize] >> 4, 0);
    }

    #[test]
    fn test_stacked_floors_split_into_layers() {
        let mut chf = build(6, &[(0, 1), (40, 41)]);
        let set = build_heightfield_layers(&mut chf, 0, 2, PartitionType::Watershed, 0).unwrap();
        assert_eq!(set.len(), 2);
        let mut hmins: Vec<i32> = set.layers.iter().map(|l| l.hmin).collect();
        hmins.sort_unstable();
        assert_eq!(hmins, vec![1, 41]);
        for layer in &set.layers {
            assert_eq!(layer.cell_count(), 36);
        }
    }

    #[test]
    fn test_layer_expands_to_compact_field() {
        let mut chf = build(6, &[(0, 1)]);
        let set = build_heightfield_layers(&mut chf, 1, 2, PartitionType::Monotone, 0).unwrap();
        let layer = &set.layers[0];
        let lchf = layer.to_compact_heightfield(2, 1);
        assert_eq!(lchf.span_count(), 16);
        assert_eq!(lchf.border_size, 0);
        let corner = lchf.cell(0, 0).index as usize;
        assert!(lchf.neighbour(0, 0, corner, 2).is_some());
        assert!(lchf.neighbour(0, 0, corner, 0).is_none());
        assert!(lchf.is_portal(corner, 0));
        assert!(!lchf.is_portal(corner, 2));
    }

    #[test]
    fn test_empty_field_has_no_layers() {
        let mut chf = build(4, &[]);
        let set = build_heightfield_layers(&mut chf, 0, 2, PartitionType::Monotone, 0).unwrap();
        assert!(set.is_empty());
    }
}
