//! Convex polygon mesh built from region outlines
//!
//! Each outline is triangulated by ear clipping, then triangles are merged
//! greedily along their longest shared edge while the result stays convex
//! and under the vertex limit. Edges on the tile boundary that continue into
//! a neighbouring tile are tagged as portals.

use crate::contour::ContourSet;
use crate::geom::{intersect, intersect_prop, left, left_on, P2};
use crate::MAX_VERTS_PER_POLY;
use glam::Vec3;
use recast_common::{Error, Result};
use std::collections::HashMap;

/// Unused vertex or neighbour slot
pub const MESH_NULL_IDX: u16 = 0xffff;
/// Neighbour slot flag marking a portal edge; the low bits hold the direction
pub const PORTAL_FLAG: u16 = 0x8000;
/// Largest vertex count a mesh may hold; indices are 16-bit and `0xffff` is reserved
pub const MAX_MESH_VERTS: usize = 0xffff;

const CAN_REMOVE: usize = 1 << 31;
const INDEX_MASK: usize = !CAN_REMOVE;

/// Polygon mesh in voxel coordinates
#[derive(Debug, Clone, PartialEq)]
pub struct PolyMesh {
    /// Vertices as `[x, y, z]` voxel coordinates
    pub verts: Vec<[u16; 3]>,
    /// `npolys * nvp * 2` entries: vertex indices then neighbour slots
    pub polys: Vec<u16>,
    pub regs: Vec<u16>,
    pub flags: Vec<u16>,
    pub areas: Vec<u8>,
    pub npolys: usize,
    pub nvp: usize,
    pub bmin: Vec3,
    pub bmax: Vec3,
    pub cs: f32,
    pub ch: f32,
    pub border_size: i32,
    pub max_edge_error: f32,
}

impl PolyMesh {
    fn empty(cset: &ContourSet, nvp: usize) -> Self {
        Self {
            verts: Vec::new(),
            polys: Vec::new(),
            regs: Vec::new(),
            flags: Vec::new(),
            areas: Vec::new(),
            npolys: 0,
            nvp,
            bmin: cset.bmin,
            bmax: cset.bmax,
            cs: cset.cs,
            ch: cset.ch,
            border_size: cset.border_size,
            max_edge_error: cset.max_error,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.npolys == 0
    }

    /// Vertex slots of polygon `i`, padded with [`MESH_NULL_IDX`]
    pub fn poly(&self, i: usize) -> &[u16] {
        let start = i * self.nvp * 2;
        &self.polys[start..start + self.nvp]
    }

    /// Neighbour slots of polygon `i`
    pub fn neighbours(&self, i: usize) -> &[u16] {
        let start = i * self.nvp * 2 + self.nvp;
        &self.polys[start..start + self.nvp]
    }

    pub fn poly_vert_count(&self, i: usize) -> usize {
        self.poly(i).iter().take_while(|&&v| v != MESH_NULL_IDX).count()
    }

    /// World position of vertex `v`
    pub fn world_vert(&self, v: usize) -> Vec3 {
        let [x, y, z] = self.verts[v];
        self.bmin + Vec3::new(x as f32 * self.cs, y as f32 * self.ch, z as f32 * self.cs)
    }
}

#[inline]
fn xz(v: &[u16; 3]) -> P2 {
    (v[0] as i32, v[2] as i32)
}

fn prev(i: usize, n: usize) -> usize {
    if i == 0 {
        n - 1
    } else {
        i - 1
    }
}

fn next(i: usize, n: usize) -> usize {
    if i + 1 >= n {
        0
    } else {
        i + 1
    }
}

struct Triangulator<'a> {
    verts: &'a [[u16; 3]],
    indices: Vec<usize>,
}

impl Triangulator<'_> {
    fn p(&self, i: usize) -> P2 {
        xz(&self.verts[self.indices[i] & INDEX_MASK])
    }

    fn diagonalie(&self, i: usize, j: usize, loose: bool) -> bool {
        let n = self.indices.len();
        let d0 = self.p(i);
        let d1 = self.p(j);
        for k in 0..n {
            let k1 = next(k, n);
            if k == i || k1 == i || k == j || k1 == j {
                continue;
            }
            let p0 = self.p(k);
            let p1 = self.p(k1);
            if d0 == p0 || d1 == p0 || d0 == p1 || d1 == p1 {
                continue;
            }
            let hit = if loose {
                intersect_prop(d0, d1, p0, p1)
            } else {
                intersect(d0, d1, p0, p1)
            };
            if hit {
                return false;
            }
        }
        true
    }

    fn in_cone(&self, i: usize, j: usize, loose: bool) -> bool {
        let n = self.indices.len();
        let pi = self.p(i);
        let pj = self.p(j);
        let pi1 = self.p(next(i, n));
        let pin1 = self.p(prev(i, n));
        let l = |a, b, c| if loose { left_on(a, b, c) } else { left(a, b, c) };
        if left_on(pin1, pi, pi1) {
            return l(pi, pj, pin1) && l(pj, pi, pi1);
        }
        !(left_on(pi, pj, pi1) && left_on(pj, pi, pin1))
    }

    fn diagonal(&self, i: usize, j: usize, loose: bool) -> bool {
        self.in_cone(i, j, loose) && self.diagonalie(i, j, loose)
    }

    fn shortest_ear(&self, loose: bool) -> Option<usize> {
        let n = self.indices.len();
        let mut best: Option<(i64, usize)> = None;
        for i in 0..n {
            let i1 = next(i, n);
            let i2 = next(i1, n);
            let candidate = if loose {
                self.diagonal(i, i2, true)
            } else {
                self.indices[i1] & CAN_REMOVE != 0
            };
            if !candidate {
                continue;
            }
            let p0 = self.p(i);
            let p2 = self.p(i2);
            let dx = (p2.0 - p0.0) as i64;
            let dz = (p2.1 - p0.1) as i64;
            let len = dx * dx + dz * dz;
            if best.map_or(true, |(l, _)| len < l) {
                best = Some((len, i));
            }
        }
        best.map(|(_, i)| i)
    }

    /// Returns the triangles and whether the outline was fully triangulated
    fn run(mut self) -> (Vec<[usize; 3]>, bool) {
        let mut tris = Vec::new();
        let mut n = self.indices.len();
        for i in 0..n {
            let i2 = next(next(i, n), n);
            if self.diagonal(i, i2, false) {
                let i1 = next(i, n);
                self.indices[i1] |= CAN_REMOVE;
            }
        }

        while n > 3 {
            let Some(i) = self.shortest_ear(false).or_else(|| self.shortest_ear(true)) else {
                return (tris, false);
            };
            let i1 = next(i, n);
            let i2 = next(i1, n);
            tris.push([
                self.indices[i] & INDEX_MASK,
                self.indices[i1] & INDEX_MASK,
                self.indices[i2] & INDEX_MASK,
            ]);

            self.indices.remove(i1);
            n -= 1;
            let i1 = if i1 >= n { 0 } else { i1 };
            let i = prev(i1, n);

            if self.diagonal(prev(i, n), i1, false) {
                self.indices[i] |= CAN_REMOVE;
            } else {
                self.indices[i] &= INDEX_MASK;
            }
            if self.diagonal(i, next(i1, n), false) {
                self.indices[i1] |= CAN_REMOVE;
            } else {
                self.indices[i1] &= INDEX_MASK;
            }
        }

        tris.push([
            self.indices[0] & INDEX_MASK,
            self.indices[1] & INDEX_MASK,
            self.indices[2] & INDEX_MASK,
        ]);
        (tris, true)
    }
}

fn uleft(a: &[u16; 3], b: &[u16; 3], c: &[u16; 3]) -> bool {
    left(xz(a), xz(b), xz(c))
}

/// Length of the shared edge if `pa` and `pb` can merge into a convex polygon
fn merge_value(pa: &[u16], pb: &[u16], verts: &[[u16; 3]], nvp: usize) -> Option<(i64, usize, usize)> {
    let na = pa.len();
    let nb = pb.len();
    if na + nb - 2 > nvp {
        return None;
    }

    let mut shared = None;
    'outer: for i in 0..na {
        let (mut va0, mut va1) = (pa[i], pa[(i + 1) % na]);
        if va0 > va1 {
            std::mem::swap(&mut va0, &mut va1);
        }
        for j in 0..nb {
            let (mut vb0, mut vb1) = (pb[j], pb[(j + 1) % nb]);
            if vb0 > vb1 {
                std::mem::swap(&mut vb0, &mut vb1);
            }
            if va0 == vb0 && va1 == vb1 {
                shared = Some((i, j));
                break 'outer;
            }
        }
    }
    let (ea, eb) = shared?;

    let v = |i: u16| &verts[i as usize];
    if !uleft(v(pa[(ea + na - 1) % na]), v(pa[ea]), v(pb[(eb + 2) % nb])) {
        return None;
    }
    if !uleft(v(pb[(eb + nb - 1) % nb]), v(pb[eb]), v(pa[(ea + 2) % na])) {
        return None;
    }

    let a = v(pa[ea]);
    let b = v(pa[(ea + 1) % na]);
    let dx = a[0] as i64 - b[0] as i64;
    let dz = a[2] as i64 - b[2] as i64;
    Some((dx * dx + dz * dz, ea, eb))
}

fn merge_polys(pa: &[u16], pb: &[u16], ea: usize, eb: usize) -> Vec<u16> {
    let na = pa.len();
    let nb = pb.len();
    let mut merged = Vec::with_capacity(na + nb - 2);
    for i in 0..na - 1 {
        merged.push(pa[(ea + 1 + i) % na]);
    }
    for i in 0..nb - 1 {
        merged.push(pb[(eb + 1 + i) % nb]);
    }
    merged
}

struct VertexWelder {
    buckets: HashMap<(u16, u16), Vec<u16>>,
    max_verts: usize,
}

impl VertexWelder {
    /// Returns the index of an existing vertex within two voxels of height,
    /// or appends a new one
    fn add(&mut self, verts: &mut Vec<[u16; 3]>, v: [u16; 3]) -> Result<u16> {
        let bucket = self.buckets.entry((v[0], v[2])).or_default();
        for &idx in bucket.iter() {
            let existing = verts[idx as usize];
            if (existing[1] as i32 - v[1] as i32).abs() <= 2 {
                return Ok(idx);
            }
        }
        if verts.len() >= self.max_verts {
            log::error!(
                "polygon mesh vertex limit exceeded: {} > {}",
                verts.len() + 1,
                self.max_verts
            );
            return Err(Error::VertexLimitExceeded {
                count: verts.len() + 1,
                max: self.max_verts,
            });
        }
        let idx = verts.len() as u16;
        verts.push(v);
        bucket.push(idx);
        Ok(idx)
    }
}

fn to_u16(v: i32) -> u16 {
    v.clamp(0, u16::MAX as i32) as u16
}

/// Builds a polygon mesh with at most `nvp` vertices per polygon
pub fn build_poly_mesh(cset: &ContourSet, nvp: usize) -> Result<PolyMesh> {
    build_poly_mesh_limited(cset, nvp, MAX_MESH_VERTS)
}

/// Like [`build_poly_mesh`] but fails with [`Error::VertexLimitExceeded`]
/// once more than `max_verts` distinct vertices are needed
pub fn build_poly_mesh_limited(cset: &ContourSet, nvp: usize, max_verts: usize) -> Result<PolyMesh> {
    if !(3..=MAX_VERTS_PER_POLY).contains(&nvp) {
        return Err(Error::InvalidConfig(format!(
            "max verts per poly must be in 3..={}, got {}",
            MAX_VERTS_PER_POLY, nvp
        )));
    }
    let max_verts = max_verts.min(MAX_MESH_VERTS);

    let mut mesh = PolyMesh::empty(cset, nvp);
    let mut welder = VertexWelder {
        buckets: HashMap::new(),
        max_verts,
    };

    for (ci, contour) in cset.contours.iter().enumerate() {
        if contour.verts.len() < 3 {
            continue;
        }

        let mut local = Vec::with_capacity(contour.verts.len());
        for v in &contour.verts {
            local.push([to_u16(v.x), to_u16(v.y), to_u16(v.z)]);
        }

        let (tris, complete) = Triangulator {
            verts: &local,
            indices: (0..local.len()).collect(),
        }
        .run();
        if !complete {
            log::warn!("bad triangulation of contour {}", ci);
        }

        let mut map = Vec::with_capacity(local.len());
        for v in &local {
            map.push(welder.add(&mut mesh.verts, *v)?);
        }

        let mut polys: Vec<Vec<u16>> = tris
            .iter()
            .map(|t| [map[t[0]], map[t[1]], map[t[2]]])
            .filter(|t| t[0] != t[1] && t[0] != t[2] && t[1] != t[2])
            .map(|t| t.to_vec())
            .collect();

        if nvp > 3 {
            loop {
                let mut best: Option<(i64, usize, usize, usize, usize)> = None;
                for j in 0..polys.len() {
                    for k in j + 1..polys.len() {
                        if let Some((v, ea, eb)) = merge_value(&polys[j], &polys[k], &mesh.verts, nvp) {
                            if best.map_or(true, |b| v > b.0) {
                                best = Some((v, j, k, ea, eb));
                            }
                        }
                    }
                }
                let Some((_, a, b, ea, eb)) = best else {
                    break;
                };
                polys[a] = merge_polys(&polys[a], &polys[b], ea, eb);
                polys.swap_remove(b);
            }
        }

        for p in polys {
            let start = mesh.polys.len();
            mesh.polys.resize(start + nvp * 2, MESH_NULL_IDX);
            mesh.polys[start..start + p.len()].copy_from_slice(&p);
            mesh.regs.push(contour.reg);
            mesh.areas.push(contour.area);
            mesh.npolys += 1;
        }
    }

    build_adjacency(&mut mesh);
    mark_portal_edges(&mut mesh, cset);
    mesh.flags = vec![0; mesh.npolys];
    Ok(mesh)
}

fn build_adjacency(mesh: &mut PolyMesh) {
    let nvp = mesh.nvp;
    // (v0, v1) with v0 < v1 -> (poly, edge) of the first owner
    let mut edges: HashMap<(u16, u16), (usize, usize)> = HashMap::new();
    let mut pairs = Vec::new();

    for i in 0..mesh.npolys {
        let n = mesh.poly_vert_count(i);
        for j in 0..n {
            let v0 = mesh.poly(i)[j];
            let v1 = mesh.poly(i)[(j + 1) % n];
            if v0 < v1 {
                edges.insert((v0, v1), (i, j));
            }
        }
    }
    for i in 0..mesh.npolys {
        let n = mesh.poly_vert_count(i);
        for j in 0..n {
            let v0 = mesh.poly(i)[j];
            let v1 = mesh.poly(i)[(j + 1) % n];
            if v0 > v1 {
                if let Some(&(p0, e0)) = edges.get(&(v1, v0)) {
                    if p0 != i {
                        pairs.push((p0, e0, i, j));
                    }
                }
            }
        }
    }
    for (p0, e0, p1, e1) in pairs {
        mesh.polys[p0 * nvp * 2 + nvp + e0] = p1 as u16;
        mesh.polys[p1 * nvp * 2 + nvp + e1] = p0 as u16;
    }
}

/// Tags boundary edges that overlap a portal stretch of the outline
fn mark_portal_edges(mesh: &mut PolyMesh, cset: &ContourSet) {
    // (dir, fixed coordinate, range start, range end)
    let mut portals: Vec<(u8, i32, i32, i32)> = Vec::new();
    for contour in &cset.contours {
        let n = contour.verts.len();
        for k in 0..n {
            let a = contour.verts[k];
            let b = contour.verts[(k + 1) % n];
            let Some(dir) = a.portal_dir() else {
                continue;
            };
            let (fixed, lo, hi) = match dir {
                0 | 2 => (a.x, a.z.min(b.z), a.z.max(b.z)),
                _ => (a.z, a.x.min(b.x), a.x.max(b.x)),
            };
            portals.push((dir, fixed, lo, hi));
        }
    }
    if portals.is_empty() {
        return;
    }

    let w = cset.width;
    let h = cset.height;
    let nvp = mesh.nvp;
    for i in 0..mesh.npolys {
        let n = mesh.poly_vert_count(i);
        for j in 0..n {
            let slot = i * nvp * 2 + nvp + j;
            if mesh.polys[slot] != MESH_NULL_IDX {
                continue;
            }
            let va = mesh.verts[mesh.poly(i)[j] as usize];
            let vb = mesh.verts[mesh.poly(i)[(j + 1) % n] as usize];
            let (ax, az, bx, bz) = (va[0] as i32, va[2] as i32, vb[0] as i32, vb[2] as i32);

            let side = if ax == 0 && bx == 0 {
                Some((0, 0, az.min(bz), az.max(bz)))
            } else if az == h && bz == h {
                Some((1, h, ax.min(bx), ax.max(bx)))
            } else if ax == w && bx == w {
                Some((2, w, az.min(bz), az.max(bz)))
            } else if az == 0 && bz == 0 {
                Some((3, 0, ax.min(bx), ax.max(bx)))
            } else {
                None
            };
            let Some((dir, fixed, lo, hi)) = side else {
                continue;
            };
            let overlaps = portals.iter().any(|&(pd, pf, plo, phi)| {
                pd == dir && pf == fixed && lo.max(plo) < hi.min(phi)
            });
            if overlaps {
                mesh.polys[slot] = PORTAL_FLAG | dir as u16;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contour::{Contour, ContourVertex, PORTAL_EDGE};

    fn contour_set(contours: Vec<Contour>, size: i32) -> ContourSet {
        ContourSet {
            contours,
            bmin: Vec3::ZERO,
            bmax: Vec3::new(size as f32, 10.0, size as f32),
            cs: 1.0,
            ch: 1.0,
            width: size,
            height: size,
            border_size: 0,
            max_error: 1.3,
        }
    }

    fn contour(reg: u16, pts: &[(i32, i32, u32)]) -> Contour {
        let verts: Vec<ContourVertex> = pts
            .iter()
            .map(|&(x, z, f)| ContourVertex::new(x, 0, z, f))
            .collect();
        Contour {
            raw_verts: verts.clone(),
            verts,
            reg,
            area: 63,
        }
    }

    // positive-area winding as produced by the contour walker
    fn square(reg: u16, x0: i32, z0: i32, s: i32) -> Contour {
        contour(
            reg,
            &[(x0, z0 + s, 0), (x0 + s, z0 + s, 0), (x0 + s, z0, 0), (x0, z0, 0)],
        )
    }

    #[test]
    fn test_square_becomes_one_quad() {
        let mesh = build_poly_mesh(&contour_set(vec![square(1, 0, 0, 4)], 4), 6).unwrap();
        assert_eq!(mesh.npolys, 1);
        assert_eq!(mesh.verts.len(), 4);
        assert_eq!(mesh.poly_vert_count(0), 4);
        assert_eq!(mesh.regs, vec![1]);
        assert_eq!(mesh.areas, vec![63]);
        assert_eq!(mesh.flags, vec![0]);
    }

    #[test]
    fn test_triangles_only() {
        let mesh = build_poly_mesh(&contour_set(vec![square(1, 0, 0, 4)], 4), 3).unwrap();
        assert_eq!(mesh.npolys, 2);
        // the two triangles share the diagonal
        let shared = (0..3).filter(|&j| mesh.neighbours(0)[j] == 1).count();
        assert_eq!(shared, 1);
    }

    #[test]
    fn test_adjacent_regions_share_vertices_and_link() {
        let cset = contour_set(vec![square(1, 0, 0, 4), square(2, 4, 0, 4)], 8);
        let mesh = build_poly_mesh(&cset, 6).unwrap();
        assert_eq!(mesh.npolys, 2);
        assert_eq!(mesh.verts.len(), 6);
        assert!(mesh.neighbours(0).contains(&1));
        assert!(mesh.neighbours(1).contains(&0));
    }

    #[test]
    fn test_portal_edges_marked_on_tile_boundary() {
        // left side of the outline is a portal (dir 0)
        let c = contour(
            1,
            &[
                (0, 4, 0),
                (4, 4, 0),
                (4, 0, 0),
                (0, 0, PORTAL_EDGE),
            ],
        );
        let mesh = build_poly_mesh(&contour_set(vec![c], 4), 6).unwrap();
        let portals: Vec<u16> = mesh
            .neighbours(0)
            .iter()
            .copied()
            .filter(|&n| n != MESH_NULL_IDX && n & PORTAL_FLAG != 0)
            .collect();
        assert_eq!(portals, vec![PORTAL_FLAG]);
    }

    #[test]
    fn test_vertex_limit() {
        let contours: Vec<Contour> = (0..3).map(|i| square(i + 1, i as i32 * 10, 0, 4)).collect();
        let cset = contour_set(contours, 40);
        let err = build_poly_mesh_limited(&cset, 6, 10).unwrap_err();
        assert!(matches!(err, Error::VertexLimitExceeded { count: 11, max: 10 }));
        assert!(err.is_structural());
        assert!(build_poly_mesh_limited(&cset, 6, 12).is_ok());
    }

    #[test]
    fn test_rejects_bad_nvp() {
        let cset = contour_set(vec![square(1, 0, 0, 4)], 4);
        assert!(build_poly_mesh(&cset, 2).is_err());
        assert!(build_poly_mesh(&cset, 7).is_err());
    }
}
