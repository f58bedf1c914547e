//! Region outlines
//!
//! Walks the boundary of every region in the compact heightfield and
//! simplifies it into a polygon. Every simplified vertex records what lies
//! across the edge that starts at it: a neighbour region, a wall, an area
//! change or a portal into the next tile or layer.

use crate::compact_heightfield::CompactHeightfield;
use crate::geom::{dist_pt_seg_sqr, intersect, left, left_on, P2};
use crate::regions::BORDER_REG;
use crate::{dir_offset_x, dir_offset_z};
use glam::Vec3;
use recast_common::{Error, Result};

/// Neighbour region id bits of a vertex flag word
pub const CONTOUR_REG_MASK: u32 = 0xffff;
/// Vertex lies on the tile border and may be removed when stitching tiles
pub const BORDER_VERTEX: u32 = 0x10000;
/// Edge separates two different area types
pub const AREA_BORDER: u32 = 0x20000;
/// Edge leads out of the layer; the region bits hold the direction
pub const PORTAL_EDGE: u32 = 0x40000;

const MAX_WALK_ITERATIONS: usize = 40_000;

/// Contour point in voxel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContourVertex {
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub flags: u32,
}

impl ContourVertex {
    pub fn new(x: i32, y: i32, z: i32, flags: u32) -> Self {
        Self { x, y, z, flags }
    }

    /// Region across the edge starting at this vertex, 0 for walls.
    /// `None` when the edge is a portal.
    pub fn neighbour_region(&self) -> Option<u16> {
        if self.flags & PORTAL_EDGE != 0 {
            None
        } else {
            Some((self.flags & CONTOUR_REG_MASK) as u16)
        }
    }

    /// Portal direction of the edge starting at this vertex
    pub fn portal_dir(&self) -> Option<u8> {
        (self.flags & PORTAL_EDGE != 0).then_some((self.flags & 0x3) as u8)
    }

    #[inline]
    fn xz(&self) -> P2 {
        (self.x, self.z)
    }
}

/// Key telling edges apart: neighbour region or portal direction
#[inline]
fn edge_key(flags: u32) -> u32 {
    flags & (CONTOUR_REG_MASK | PORTAL_EDGE)
}

/// Closed outline of one region
#[derive(Debug, Clone, PartialEq)]
pub struct Contour {
    pub verts: Vec<ContourVertex>,
    pub raw_verts: Vec<ContourVertex>,
    pub reg: u16,
    pub area: u8,
}

/// All outlines of a field
#[derive(Debug, Clone)]
pub struct ContourSet {
    pub contours: Vec<Contour>,
    pub bmin: Vec3,
    pub bmax: Vec3,
    pub cs: f32,
    pub ch: f32,
    pub width: i32,
    pub height: i32,
    pub border_size: i32,
    pub max_error: f32,
}

impl ContourSet {
    pub fn vertex_count(&self) -> usize {
        self.contours.iter().map(|c| c.verts.len()).sum()
    }
}

fn corner_height(chf: &CompactHeightfield, x: i32, z: i32, i: usize, dir: usize) -> (i32, bool) {
    let s = chf.spans[i];
    let mut ch = s.y as i32;
    let dirp = (dir + 1) & 3;
    let mut regs = [0_u32; 4];
    let key = |i: usize| chf.spans[i].reg as u32 | ((chf.areas[i] as u32) << 16);

    regs[0] = key(i);

    if let Some(ai) = chf.neighbour(x, z, i, dir) {
        let ax = x + dir_offset_x(dir);
        let az = z + dir_offset_z(dir);
        ch = ch.max(chf.spans[ai].y as i32);
        regs[1] = key(ai);
        if let Some(ai2) = chf.neighbour(ax, az, ai, dirp) {
            ch = ch.max(chf.spans[ai2].y as i32);
            regs[2] = key(ai2);
        }
    }
    if let Some(ai) = chf.neighbour(x, z, i, dirp) {
        let ax = x + dir_offset_x(dirp);
        let az = z + dir_offset_z(dirp);
        ch = ch.max(chf.spans[ai].y as i32);
        regs[3] = key(ai);
        if let Some(ai2) = chf.neighbour(ax, az, ai, dir) {
            ch = ch.max(chf.spans[ai2].y as i32);
            regs[2] = key(ai2);
        }
    }

    // a vertex between two border regions and two same-area interior
    // regions sits on the tile edge
    let border = BORDER_REG as u32;
    let mut is_border_vertex = false;
    for j in 0..4 {
        let a = j;
        let b = (j + 1) & 3;
        let c = (j + 2) & 3;
        let d = (j + 3) & 3;
        let two_same_exts = (regs[a] & regs[b] & border) != 0 && regs[a] == regs[b];
        let two_ints = ((regs[c] | regs[d]) & border) == 0;
        let ints_same_area = (regs[c] >> 16) == (regs[d] >> 16);
        let no_zeros = regs.iter().all(|&r| r != 0);
        if two_same_exts && two_ints && ints_same_area && no_zeros {
            is_border_vertex = true;
            break;
        }
    }
    (ch, is_border_vertex)
}

fn walk_contour(
    chf: &CompactHeightfield,
    mut x: i32,
    mut z: i32,
    mut i: usize,
    flags: &mut [u8],
) -> Vec<ContourVertex> {
    let mut points = Vec::new();
    let mut dir = 0;
    while flags[i] & (1 << dir) == 0 {
        dir += 1;
    }
    let start_dir = dir;
    let start_i = i;
    let area = chf.areas[i];

    for _ in 0..MAX_WALK_ITERATIONS {
        if flags[i] & (1 << dir) != 0 {
            let (py, is_border_vertex) = corner_height(chf, x, z, i, dir);
            let (px, pz) = match dir {
                0 => (x, z + 1),
                1 => (x + 1, z + 1),
                2 => (x + 1, z),
                _ => (x, z),
            };
            let mut r = 0_u32;
            let mut is_area_border = false;
            if let Some(ai) = chf.neighbour(x, z, i, dir) {
                r = chf.spans[ai].reg as u32;
                if area != chf.areas[ai] {
                    is_area_border = true;
                }
            } else if chf.is_portal(i, dir) {
                r = PORTAL_EDGE | dir as u32;
            }
            if is_border_vertex {
                r |= BORDER_VERTEX;
            }
            if is_area_border {
                r |= AREA_BORDER;
            }
            points.push(ContourVertex::new(px, py, pz, r));
            flags[i] &= !(1 << dir);
            dir = (dir + 1) & 3;
        } else {
            let Some(ni) = chf.neighbour(x, z, i, dir) else {
                // unreachable for consistent edge flags
                return points;
            };
            x += dir_offset_x(dir);
            z += dir_offset_z(dir);
            i = ni;
            dir = (dir + 3) & 3;
        }
        if start_i == i && start_dir == dir {
            break;
        }
    }
    points
}

/// Simplified vertex: position plus the raw index it came from
#[derive(Clone, Copy)]
struct Simplified {
    x: i32,
    y: i32,
    z: i32,
    idx: usize,
}

fn simplify_contour(
    raw: &[ContourVertex],
    max_error: f32,
    max_edge_len: i32,
) -> Vec<ContourVertex> {
    let pn = raw.len();
    let mut simplified: Vec<Simplified> = Vec::new();
    let at = |idx: usize| Simplified {
        x: raw[idx].x,
        y: raw[idx].y,
        z: raw[idx].z,
        idx,
    };

    let has_connections = raw.iter().any(|v| edge_key(v.flags) != 0);
    if has_connections {
        for i in 0..pn {
            let ii = (i + 1) % pn;
            let different = edge_key(raw[i].flags) != edge_key(raw[ii].flags);
            let area_borders = (raw[i].flags & AREA_BORDER) != (raw[ii].flags & AREA_BORDER);
            if different || area_borders {
                simplified.push(at(i));
            }
        }
    }

    if simplified.is_empty() {
        // no connections: start from the lower-left and upper-right vertices
        let mut ll = 0;
        let mut ur = 0;
        for (i, v) in raw.iter().enumerate() {
            let l = raw[ll];
            let u = raw[ur];
            if v.x < l.x || (v.x == l.x && v.z < l.z) {
                ll = i;
            }
            if v.x > u.x || (v.x == u.x && v.z > u.z) {
                ur = i;
            }
        }
        simplified.push(at(ll));
        simplified.push(at(ur));
    }

    let max_err_sq = max_error * max_error;
    let mut i = 0;
    while i < simplified.len() {
        let ii = (i + 1) % simplified.len();
        let (mut a, mut b) = (simplified[i], simplified[ii]);

        let (cinc, mut ci, endi) = if b.x > a.x || (b.x == a.x && b.z > a.z) {
            (1, (a.idx + 1) % pn, b.idx)
        } else {
            std::mem::swap(&mut a, &mut b);
            (pn - 1, (a.idx + pn - 1) % pn, b.idx)
        };
        // segment endpoints in lexical order so both directions tessellate alike
        let (ax, az, bx, bz) = (a.x, a.z, b.x, b.z);

        let mut maxd = 0.0;
        let mut maxi = None;
        let tessellate = edge_key(raw[ci].flags) == 0 || raw[ci].flags & AREA_BORDER != 0;
        if tessellate {
            while ci != endi {
                let d = dist_pt_seg_sqr(raw[ci].xz(), (ax, az), (bx, bz));
                if d > maxd {
                    maxd = d;
                    maxi = Some(ci);
                }
                ci = (ci + cinc) % pn;
            }
        }

        match maxi {
            Some(m) if maxd > max_err_sq => simplified.insert(i + 1, at(m)),
            _ => i += 1,
        }
    }

    if max_edge_len > 0 {
        let max_sq = (max_edge_len * max_edge_len) as i64;
        let mut i = 0;
        while i < simplified.len() {
            let ii = (i + 1) % simplified.len();
            let a = simplified[i];
            let b = simplified[ii];
            let ci = (a.idx + 1) % pn;

            let mut maxi = None;
            if edge_key(raw[ci].flags) == 0 {
                let dx = (b.x - a.x) as i64;
                let dz = (b.z - a.z) as i64;
                if dx * dx + dz * dz > max_sq {
                    let n = if b.idx < a.idx {
                        b.idx + pn - a.idx
                    } else {
                        b.idx - a.idx
                    };
                    if n > 1 {
                        maxi = Some(if b.x > a.x || (b.x == a.x && b.z > a.z) {
                            (a.idx + n / 2) % pn
                        } else {
                            (a.idx + (n + 1) / 2) % pn
                        });
                    }
                }
            }

            match maxi {
                Some(m) => simplified.insert(i + 1, at(m)),
                None => i += 1,
            }
        }
    }

    simplified
        .iter()
        .map(|s| {
            // the edge flags come from the raw point after the vertex
            let ai = (s.idx + 1) % pn;
            let flags = (raw[ai].flags & (CONTOUR_REG_MASK | PORTAL_EDGE | AREA_BORDER))
                | (raw[s.idx].flags & BORDER_VERTEX);
            ContourVertex::new(s.x, s.y, s.z, flags)
        })
        .collect()
}

fn remove_degenerate_segments(verts: &mut Vec<ContourVertex>) {
    let mut i = 0;
    while verts.len() > 1 && i < verts.len() {
        let ni = (i + 1) % verts.len();
        if verts[i].x == verts[ni].x && verts[i].z == verts[ni].z {
            verts.remove(ni);
            if ni < i {
                i = i.saturating_sub(1);
            }
        } else {
            i += 1;
        }
    }
}

fn signed_area(verts: &[ContourVertex]) -> i64 {
    let n = verts.len();
    let mut area = 0_i64;
    for i in 0..n {
        let j = (i + n - 1) % n;
        let vi = verts[i];
        let vj = verts[j];
        area += vi.x as i64 * vj.z as i64 - vj.x as i64 * vi.z as i64;
    }
    (area + 1) / 2
}

fn in_cone(i: usize, verts: &[ContourVertex], pj: P2) -> bool {
    let n = verts.len();
    let pi = verts[i].xz();
    let pi1 = verts[(i + 1) % n].xz();
    let pin1 = verts[(i + n - 1) % n].xz();
    if left_on(pin1, pi, pi1) {
        return left(pi, pj, pin1) && left(pj, pi, pi1);
    }
    !(left_on(pi, pj, pi1) && left_on(pj, pi, pin1))
}

fn intersects_contour(d0: P2, d1: P2, skip: Option<usize>, verts: &[ContourVertex]) -> bool {
    let n = verts.len();
    for k in 0..n {
        let k1 = (k + 1) % n;
        if skip == Some(k) || skip == Some(k1) {
            continue;
        }
        let p0 = verts[k].xz();
        let p1 = verts[k1].xz();
        if d0 == p0 || d1 == p0 || d0 == p1 || d1 == p1 {
            continue;
        }
        if intersect(d0, d1, p0, p1) {
            return true;
        }
    }
    false
}

fn merge_contours(outline: &[ContourVertex], ia: usize, hole: &[ContourVertex], ib: usize) -> Vec<ContourVertex> {
    let na = outline.len();
    let nb = hole.len();
    let mut verts = Vec::with_capacity(na + nb + 2);
    for k in 0..=na {
        verts.push(outline[(ia + k) % na]);
    }
    for k in 0..=nb {
        verts.push(hole[(ib + k) % nb]);
    }
    verts
}

/// Connects `hole` into `outline` through the shortest diagonal that stays
/// inside the outline. Returns false when no such diagonal exists.
fn merge_hole(outline: &mut Vec<ContourVertex>, hole: &[ContourVertex], others: &[&[ContourVertex]]) -> bool {
    // start from the leftmost hole vertex
    let leftmost = hole
        .iter()
        .enumerate()
        .min_by_key(|(_, v)| (v.x, v.z))
        .map_or(0, |(i, _)| i);

    for step in 0..hole.len() {
        let ib = (leftmost + step) % hole.len();
        let corner = hole[ib].xz();

        let mut candidates: Vec<(i64, usize)> = (0..outline.len())
            .filter(|&j| in_cone(j, outline, corner))
            .map(|j| {
                let dx = (outline[j].x - corner.0) as i64;
                let dz = (outline[j].z - corner.1) as i64;
                (dx * dx + dz * dz, j)
            })
            .collect();
        candidates.sort_unstable();

        for (_, j) in candidates {
            let pt = outline[j].xz();
            if intersects_contour(pt, corner, Some(j), outline) {
                continue;
            }
            if intersects_contour(pt, corner, Some(ib), hole) {
                continue;
            }
            if others.iter().any(|o| intersects_contour(pt, corner, None, o)) {
                continue;
            }
            *outline = merge_contours(outline, j, hole, ib);
            return true;
        }
    }
    false
}

/// Builds simplified outlines for every region of `chf`.
///
/// `max_error` is the largest allowed distance (in cells) of a raw boundary
/// point from the simplified wall edges; `max_edge_len` splits long wall
/// edges, 0 disables splitting. Holes are stitched into their region's
/// outline so each region yields a single simple polygon.
pub fn build_contours(chf: &CompactHeightfield, max_error: f32, max_edge_len: i32) -> Result<ContourSet> {
    let w = chf.width;
    let h = chf.height;
    let border = chf.border_size;

    let mut bmin = chf.bmin;
    let mut bmax = chf.bmax;
    if border > 0 {
        let pad = border as f32 * chf.cs;
        bmin.x += pad;
        bmin.z += pad;
        bmax.x -= pad;
        bmax.z -= pad;
    }

    let mut set = ContourSet {
        contours: Vec::new(),
        bmin,
        bmax,
        cs: chf.cs,
        ch: chf.ch,
        width: w - border * 2,
        height: h - border * 2,
        border_size: border,
        max_error,
    };

    // edge flags: bit set where the neighbour belongs to another region
    let mut flags = vec![0_u8; chf.spans.len()];
    for (x, z, i) in chf.iter_spans() {
        let reg = chf.spans[i].reg;
        if reg == 0 || reg & BORDER_REG != 0 {
            continue;
        }
        let mut same = 0_u8;
        for dir in 0..4 {
            if let Some(ai) = chf.neighbour(x, z, i, dir) {
                if chf.spans[ai].reg == reg {
                    same |= 1 << dir;
                }
            }
        }
        flags[i] = same ^ 0xf;
    }

    for (x, z, i) in chf.iter_spans() {
        if flags[i] == 0 || flags[i] == 0xf {
            // isolated single spans cannot form a polygon
            flags[i] = 0;
            continue;
        }
        let reg = chf.spans[i].reg;
        if reg == 0 || reg & BORDER_REG != 0 {
            continue;
        }
        let area = chf.areas[i];

        let mut raw = walk_contour(chf, x, z, i, &mut flags);
        let mut verts = simplify_contour(&raw, max_error, max_edge_len);
        remove_degenerate_segments(&mut verts);

        if border > 0 {
            for v in raw.iter_mut().chain(verts.iter_mut()) {
                v.x -= border;
                v.z -= border;
            }
        }

        if verts.len() >= 3 {
            set.contours.push(Contour {
                verts,
                raw_verts: raw,
                reg,
                area,
            });
        }
    }

    merge_region_holes(&mut set)?;
    Ok(set)
}

fn merge_region_holes(set: &mut ContourSet) -> Result<()> {
    let has_holes = set.contours.iter().any(|c| signed_area(&c.verts) < 0);
    if !has_holes {
        return Ok(());
    }

    let max_reg = set.contours.iter().map(|c| c.reg).max().unwrap_or(0) as usize;
    let mut outlines: Vec<Option<usize>> = vec![None; max_reg + 1];
    let mut holes: Vec<Vec<usize>> = vec![Vec::new(); max_reg + 1];
    for (ci, c) in set.contours.iter().enumerate() {
        let reg = c.reg as usize;
        if signed_area(&c.verts) < 0 {
            holes[reg].push(ci);
        } else if outlines[reg].is_none() {
            outlines[reg] = Some(ci);
        } else {
            log::warn!("region {} has more than one outline", reg);
        }
    }

    let mut dropped = Vec::new();
    for reg in 0..=max_reg {
        if holes[reg].is_empty() {
            continue;
        }
        let Some(oi) = outlines[reg] else {
            log::warn!("region {} has holes but no outline", reg);
            dropped.extend(holes[reg].iter().copied());
            continue;
        };

        // leftmost holes first so later diagonals see earlier merges
        let mut region_holes = holes[reg].clone();
        region_holes.sort_by_key(|&hi| {
            set.contours[hi]
                .verts
                .iter()
                .map(|v| (v.x, v.z))
                .min()
                .unwrap_or((i32::MAX, i32::MAX))
        });

        for (k, &hi) in region_holes.iter().enumerate() {
            let hole = set.contours[hi].verts.clone();
            let others: Vec<&[ContourVertex]> = region_holes[k + 1..]
                .iter()
                .map(|&o| set.contours[o].verts.as_slice())
                .collect();
            let mut outline = set.contours[oi].verts.clone();
            if merge_hole(&mut outline, &hole, &others) {
                set.contours[oi].verts = outline;
            } else {
                log::warn!("failed to find a merge point for a hole in region {}", reg);
            }
            dropped.push(hi);
        }
    }

    dropped.sort_unstable();
    dropped.dedup();
    for hi in dropped.into_iter().rev() {
        set.contours.remove(hi);
    }

    if set.contours.iter().any(|c| c.verts.len() < 3) {
        return Err(Error::Recast("degenerate contour after hole merge".to_string()));
    }
    Ok(())
}
