//! Region partitioning of the compact heightfield
//!
//! Three partitioners share one entry point:
//! - watershed grows regions outwards from the distance field peaks,
//! - monotone sweeps rows and joins runs that line up,
//! - chunky runs the watershed independently inside fixed-size chunks.
//!
//! All of them finish with the same filter and merge pass.

use crate::compact_heightfield::CompactHeightfield;
use crate::config::PartitionType;
use crate::distance_field::build_distance_field;
use crate::{dir_offset_x, dir_offset_z, NULL_AREA};
use recast_common::{Error, Result};

/// Flag set on region ids painted into the tile border
pub const BORDER_REG: u16 = 0x8000;

const NULL_NEI: u16 = 0xffff;
const EXPAND_ITERS: usize = 8;

/// Assigns a region id to every walkable span of `chf`.
///
/// Spans inside `border_size` cells of the field edge get [`BORDER_REG`]
/// ids. Regions smaller than `min_region_area` that do not touch the border
/// are removed; regions up to `merge_region_area` spans are merged into a
/// neighbour. `chunk_size` is only used by [`PartitionType::Chunky`].
pub fn build_regions(
    chf: &mut CompactHeightfield,
    partition: PartitionType,
    border_size: i32,
    min_region_area: i32,
    merge_region_area: i32,
    chunk_size: i32,
) -> Result<()> {
    let (mut src_reg, next_id) = partition_spans(chf, partition, border_size, chunk_size)?;
    let max_regions = merge_and_filter(chf, min_region_area, merge_region_area, next_id, &mut src_reg)?;

    for (span, reg) in chf.spans.iter_mut().zip(src_reg) {
        span.reg = reg;
    }
    chf.max_regions = max_regions;
    Ok(())
}

/// Raw partition without filtering or merging. Returns the per-span ids and
/// the next unused id.
pub(crate) fn partition_spans(
    chf: &mut CompactHeightfield,
    partition: PartitionType,
    border_size: i32,
    chunk_size: i32,
) -> Result<(Vec<u16>, u16)> {
    let mut src_reg = vec![0_u16; chf.spans.len()];
    let first_id = paint_border(chf, border_size, &mut src_reg);
    chf.border_size = border_size;

    let next_id = match partition {
        PartitionType::Monotone => monotone(chf, border_size, first_id, &mut src_reg)?,
        PartitionType::Watershed | PartitionType::Chunky => {
            if chf.dist.len() != chf.spans.len() {
                build_distance_field(chf)?;
            }
            let chunk = match partition {
                PartitionType::Chunky if chunk_size > 0 => Some(chunk_size),
                _ => None,
            };
            watershed(chf, chunk, first_id, &mut src_reg)?
        }
    };
    Ok((src_reg, next_id))
}

fn paint_rect(
    chf: &CompactHeightfield,
    (minx, maxx, minz, maxz): (i32, i32, i32, i32),
    reg: u16,
    src_reg: &mut [u16],
) {
    for z in minz..maxz {
        for x in minx..maxx {
            let cell = chf.cell(x, z);
            for i in cell.index as usize..(cell.index + cell.count) as usize {
                if chf.areas[i] != NULL_AREA {
                    src_reg[i] = reg;
                }
            }
        }
    }
}

/// Paints the four border strips, returns the next free region id
fn paint_border(chf: &CompactHeightfield, border_size: i32, src_reg: &mut [u16]) -> u16 {
    let mut id = 1;
    if border_size <= 0 {
        return id;
    }
    let w = chf.width;
    let h = chf.height;
    let bw = w.min(border_size);
    let bh = h.min(border_size);
    for rect in [
        (0, bw, 0, h),
        (w - bw, w, 0, h),
        (0, w, 0, bh),
        (0, w, h - bh, h),
    ] {
        paint_rect(chf, rect, id | BORDER_REG, src_reg);
        id += 1;
    }
    id
}

fn check_region_limit(id: u32) -> Result<u16> {
    if id >= BORDER_REG as u32 {
        return Err(Error::LimitExceeded {
            what: "region id",
            count: id as usize,
            max: BORDER_REG as usize - 1,
        });
    }
    Ok(id as u16)
}

#[derive(Debug, Clone, Copy, Default)]
struct SweepSpan {
    /// Row-local id
    rid: u16,
    /// Final id
    id: u16,
    /// Samples connected to `nei`
    ns: u16,
    /// Neighbour region in the previous row
    nei: u16,
}

fn monotone(
    chf: &CompactHeightfield,
    border: i32,
    first_id: u16,
    src_reg: &mut [u16],
) -> Result<u16> {
    let w = chf.width;
    let h = chf.height;
    let mut id = first_id as u32;
    let mut prev: Vec<u16> = vec![0; 256];
    let mut sweeps: Vec<SweepSpan> = Vec::new();

    for z in border..h - border {
        prev.iter_mut().for_each(|p| *p = 0);
        sweeps.clear();
        sweeps.push(SweepSpan::default());

        for x in border..w - border {
            let cell = chf.cell(x, z);
            for i in cell.index as usize..(cell.index + cell.count) as usize {
                if chf.areas[i] == NULL_AREA {
                    continue;
                }

                let mut previd = chf
                    .neighbour(x, z, i, 0)
                    .filter(|&a| src_reg[a] & BORDER_REG == 0 && chf.areas[a] == chf.areas[i])
                    .map_or(0, |a| src_reg[a]);

                if previd == 0 {
                    previd = sweeps.len() as u16;
                    sweeps.push(SweepSpan {
                        rid: previd,
                        ..SweepSpan::default()
                    });
                }

                if let Some(a) = chf.neighbour(x, z, i, 3) {
                    let nr = src_reg[a];
                    if nr != 0 && nr & BORDER_REG == 0 && chf.areas[a] == chf.areas[i] {
                        let sweep = &mut sweeps[previd as usize];
                        if sweep.nei == 0 || sweep.nei == nr {
                            sweep.nei = nr;
                            sweep.ns += 1;
                            if prev.len() <= nr as usize {
                                prev.resize(nr as usize + 1, 0);
                            }
                            prev[nr as usize] += 1;
                        } else {
                            sweep.nei = NULL_NEI;
                        }
                    }
                }

                src_reg[i] = previd;
            }
        }

        // a run keeps the id of the run above only if they connect one to one
        for sweep in sweeps.iter_mut().skip(1) {
            let joins = sweep.nei != NULL_NEI
                && sweep.nei != 0
                && prev.get(sweep.nei as usize).copied() == Some(sweep.ns);
            if joins {
                sweep.id = sweep.nei;
            } else {
                sweep.id = check_region_limit(id)?;
                id += 1;
            }
        }

        for x in border..w - border {
            let cell = chf.cell(x, z);
            for i in cell.index as usize..(cell.index + cell.count) as usize {
                let r = src_reg[i];
                if r > 0 && (r as usize) < sweeps.len() {
                    src_reg[i] = sweeps[r as usize].id;
                }
            }
        }
    }

    check_region_limit(id)
}

/// Neighbour lookup that treats other chunks as unconnected
struct ChunkedNeighbours<'a> {
    chf: &'a CompactHeightfield,
    chunk: Option<i32>,
}

impl ChunkedNeighbours<'_> {
    fn get(&self, x: i32, z: i32, i: usize, dir: usize) -> Option<(i32, i32, usize)> {
        let n = self.chf.neighbour(x, z, i, dir)?;
        let nx = x + dir_offset_x(dir);
        let nz = z + dir_offset_z(dir);
        if let Some(size) = self.chunk {
            if x.div_euclid(size) != nx.div_euclid(size) || z.div_euclid(size) != nz.div_euclid(size) {
                return None;
            }
        }
        Some((nx, nz, n))
    }
}

fn watershed(
    chf: &CompactHeightfield,
    chunk: Option<i32>,
    first_id: u16,
    src_reg: &mut [u16],
) -> Result<u16> {
    let nb = ChunkedNeighbours { chf, chunk };
    let mut src_dist = vec![0_u16; chf.spans.len()];
    let mut region_id = first_id as u32;

    let mut level = (chf.max_distance as u32 + 1) & !1;
    while level > 0 {
        level = level.saturating_sub(2);
        let lvl = level as u16;

        expand_regions(&nb, Some(EXPAND_ITERS), lvl, src_reg, &mut src_dist);

        for (x, z, i) in chf.iter_spans() {
            if chf.dist[i] < lvl || src_reg[i] != 0 || chf.areas[i] == NULL_AREA {
                continue;
            }
            let id = check_region_limit(region_id)?;
            if flood_region(&nb, (x, z, i), lvl, id, src_reg, &mut src_dist) {
                region_id += 1;
            }
        }
    }

    // pick up whatever the level sweep left behind
    expand_regions(&nb, Some(EXPAND_ITERS * 8), 0, src_reg, &mut src_dist);
    check_region_limit(region_id)
}

fn flood_region(
    nb: &ChunkedNeighbours<'_>,
    seed: (i32, i32, usize),
    level: u16,
    r: u16,
    src_reg: &mut [u16],
    src_dist: &mut [u16],
) -> bool {
    let chf = nb.chf;
    let area = chf.areas[seed.2];
    let lev = level.saturating_sub(2);
    let mut stack = vec![seed];
    src_reg[seed.2] = r;
    src_dist[seed.2] = 0;
    let mut count = 0;

    while let Some((cx, cz, ci)) = stack.pop() {
        // stop at spans that already border another region, including diagonals
        let mut touches_other = false;
        'dirs: for dir in 0..4 {
            let Some((ax, az, ai)) = nb.get(cx, cz, ci, dir) else {
                continue;
            };
            if chf.areas[ai] != area {
                continue;
            }
            let nr = src_reg[ai];
            if nr & BORDER_REG != 0 {
                continue;
            }
            if nr != 0 && nr != r {
                touches_other = true;
                break;
            }
            if let Some((_, _, bi)) = nb.get(ax, az, ai, (dir + 1) & 3) {
                if chf.areas[bi] != area {
                    continue 'dirs;
                }
                let nr2 = src_reg[bi];
                if nr2 != 0 && nr2 & BORDER_REG == 0 && nr2 != r {
                    touches_other = true;
                    break;
                }
            }
        }
        if touches_other {
            src_reg[ci] = 0;
            continue;
        }
        count += 1;

        for dir in 0..4 {
            if let Some((ax, az, ai)) = nb.get(cx, cz, ci, dir) {
                if chf.areas[ai] == area && chf.dist[ai] >= lev && src_reg[ai] == 0 {
                    src_reg[ai] = r;
                    src_dist[ai] = 0;
                    stack.push((ax, az, ai));
                }
            }
        }
    }
    count > 0
}

fn expand_regions(
    nb: &ChunkedNeighbours<'_>,
    max_iter: Option<usize>,
    level: u16,
    src_reg: &mut [u16],
    src_dist: &mut [u16],
) {
    let chf = nb.chf;
    let mut pending: Vec<(i32, i32, usize)> = chf
        .iter_spans()
        .filter(|&(_, _, i)| chf.dist[i] >= level && src_reg[i] == 0 && chf.areas[i] != NULL_AREA)
        .collect();

    let mut iter = 0;
    let mut dirty: Vec<(usize, u16, u16)> = Vec::new();
    while !pending.is_empty() {
        dirty.clear();
        pending.retain(|&(x, z, i)| {
            let mut r = 0;
            let mut d2 = u16::MAX;
            for dir in 0..4 {
                let Some((_, _, ai)) = nb.get(x, z, i, dir) else {
                    continue;
                };
                if chf.areas[ai] != chf.areas[i] {
                    continue;
                }
                let nr = src_reg[ai];
                if nr > 0 && nr & BORDER_REG == 0 {
                    let d = src_dist[ai].saturating_add(2);
                    if d < d2 {
                        r = nr;
                        d2 = d;
                    }
                }
            }
            if r != 0 {
                dirty.push((i, r, d2));
                false
            } else {
                true
            }
        });

        if dirty.is_empty() {
            break;
        }
        for &(i, r, d) in &dirty {
            src_reg[i] = r;
            src_dist[i] = d;
        }

        iter += 1;
        if max_iter.is_some_and(|m| level > 0 && iter >= m) {
            break;
        }
    }
}

#[derive(Debug, Clone)]
struct Region {
    span_count: usize,
    id: u16,
    area: u8,
    visited: bool,
    overlap: bool,
    /// Neighbouring region ids, 0 for walls
    connections: Vec<u16>,
    /// Regions stacked above or below in the same columns
    floors: Vec<u16>,
}

impl Region {
    fn new(id: u16) -> Self {
        Self {
            span_count: 0,
            id,
            area: NULL_AREA,
            visited: false,
            overlap: false,
            connections: Vec::new(),
            floors: Vec::new(),
        }
    }

    fn touches_wall(&self) -> bool {
        self.connections.contains(&0)
    }

    fn can_merge_with(&self, other: &Region) -> bool {
        self.area == other.area
            && self.connections.iter().filter(|&&c| c == other.id).count() <= 1
            && !self.floors.contains(&other.id)
    }

    fn replace_neighbour(&mut self, old: u16, new: u16) {
        for c in self.connections.iter_mut().chain(self.floors.iter_mut()) {
            if *c == old {
                *c = new;
            }
        }
        self.connections.sort_unstable();
        self.connections.dedup();
        self.floors.sort_unstable();
        self.floors.dedup();
    }
}

fn add_unique(list: &mut Vec<u16>, v: u16) {
    if !list.contains(&v) {
        list.push(v);
    }
}

/// Removes tiny islands, merges small regions and compacts ids to `1..n`.
/// Returns the new id count.
fn merge_and_filter(
    chf: &CompactHeightfield,
    min_region_area: i32,
    merge_region_area: i32,
    max_region_id: u16,
    src_reg: &mut [u16],
) -> Result<u16> {
    let nreg = max_region_id as usize;
    let mut regions: Vec<Region> = (0..nreg).map(|i| Region::new(i as u16)).collect();

    for (x, z, i) in chf.iter_spans() {
        let r = src_reg[i];
        if r == 0 || r as usize >= nreg {
            continue;
        }
        let cell = chf.cell(x, z);
        let reg = &mut regions[r as usize];
        reg.span_count += 1;
        reg.area = chf.areas[i];

        for j in cell.index as usize..(cell.index + cell.count) as usize {
            if i == j {
                continue;
            }
            let floor = src_reg[j];
            if floor == 0 || floor as usize >= nreg {
                continue;
            }
            if floor == r {
                reg.overlap = true;
            }
            add_unique(&mut reg.floors, floor);
        }

        for dir in 0..4 {
            let nr = chf.neighbour(x, z, i, dir).map_or(0, |n| {
                if chf.areas[n] == chf.areas[i] || src_reg[n] & BORDER_REG != 0 {
                    src_reg[n]
                } else {
                    0
                }
            });
            if nr != r {
                add_unique(&mut reg.connections, nr);
            }
        }
    }

    // remove islands that are too small and never reach the tile border
    let mut trace = Vec::new();
    for start in 1..nreg {
        let reg = &regions[start];
        if reg.id == 0 || reg.id & BORDER_REG != 0 || reg.span_count == 0 || reg.visited {
            continue;
        }

        let mut span_count = 0;
        let mut connects_to_border = false;
        trace.clear();
        let mut stack = vec![start];
        regions[start].visited = true;
        while let Some(ri) = stack.pop() {
            trace.push(ri);
            span_count += regions[ri].span_count;
            for k in 0..regions[ri].connections.len() {
                let nei = regions[ri].connections[k];
                if nei & BORDER_REG != 0 {
                    connects_to_border = true;
                    continue;
                }
                if nei == 0 || nei as usize >= nreg {
                    continue;
                }
                let neireg = &mut regions[nei as usize];
                if neireg.visited || neireg.id == 0 {
                    continue;
                }
                neireg.visited = true;
                stack.push(nei as usize);
            }
        }

        if span_count < min_region_area.max(0) as usize && !connects_to_border {
            for &ri in &trace {
                regions[ri].span_count = 0;
                regions[ri].id = 0;
            }
        }
    }

    // merge small regions into their smallest compatible neighbour
    loop {
        let mut merged = 0;
        for ri in 1..nreg {
            let reg = &regions[ri];
            if reg.id == 0 || reg.id & BORDER_REG != 0 || reg.overlap || reg.span_count == 0 {
                continue;
            }
            if reg.span_count > merge_region_area.max(0) as usize && reg.touches_wall() {
                continue;
            }

            let mut smallest = usize::MAX;
            let mut merge_id = reg.id;
            for &nei in &reg.connections {
                if nei == 0 || nei & BORDER_REG != 0 || nei as usize >= nreg {
                    continue;
                }
                let other = &regions[nei as usize];
                if other.id == 0 || other.id & BORDER_REG != 0 || other.overlap {
                    continue;
                }
                if other.span_count < smallest
                    && reg.can_merge_with(other)
                    && other.can_merge_with(reg)
                {
                    smallest = other.span_count;
                    merge_id = other.id;
                }
            }

            if merge_id == reg.id {
                continue;
            }
            let old_id = reg.id;
            let source = regions[ri].clone();
            let target = &mut regions[merge_id as usize];
            target.span_count += source.span_count;
            for c in source.connections {
                if c != merge_id && c != old_id {
                    add_unique(&mut target.connections, c);
                }
            }
            for f in source.floors {
                add_unique(&mut target.floors, f);
            }
            target.connections.retain(|&c| c != old_id);
            regions[ri].span_count = 0;
            regions[ri].connections.clear();

            for region in regions.iter_mut() {
                if region.id == old_id {
                    region.id = merge_id;
                }
                region.replace_neighbour(old_id, merge_id);
            }
            merged += 1;
        }
        if merged == 0 {
            break;
        }
    }

    // compact ids
    let mut remap = vec![0_u16; nreg];
    let mut next = 1_u16;
    for ri in 1..nreg {
        let id = regions[ri].id;
        if id == 0 || id & BORDER_REG != 0 {
            continue;
        }
        if remap[id as usize] == 0 {
            remap[id as usize] = next;
            next += 1;
        }
    }

    for r in src_reg.iter_mut() {
        if *r != 0 && *r & BORDER_REG == 0 && (*r as usize) < nreg {
            let id = regions[*r as usize].id;
            *r = if id == 0 { 0 } else { remap[id as usize] };
        }
    }

    Ok(next)
}
