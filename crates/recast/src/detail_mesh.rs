//! Height detail for the polygon mesh
//!
//! Polygon edges are resampled against the compact heightfield so the
//! runtime can recover accurate surface heights. Each polygon gets its own
//! small triangle fan over the resampled outline.

use crate::compact_heightfield::CompactHeightfield;
use crate::polymesh::{PolyMesh, MESH_NULL_IDX};
use glam::Vec3;
use recast_common::{Error, Result};

const MAX_VERTS_PER_EDGE: usize = 32;
const HEIGHT_SEARCH_RADIUS: i32 = 2;

/// Per-polygon triangle soup with world-space vertices
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolyMeshDetail {
    /// Per polygon: `[vert_base, vert_count, tri_base, tri_count]`
    pub meshes: Vec<[u32; 4]>,
    pub verts: Vec<Vec3>,
    /// Vertex indices local to the polygon's block, plus edge flags.
    /// Flag bits `2*k..2*k+1` are set when edge `k` lies on the polygon outline.
    pub tris: Vec<[u8; 4]>,
}

impl PolyMeshDetail {
    pub fn tri_count(&self) -> usize {
        self.tris.len()
    }
}

/// Surface height at a world position, closest to `hint`
fn sample_height(chf: &CompactHeightfield, p: Vec3, hint: f32) -> f32 {
    let ix = ((p.x - chf.bmin.x) / chf.cs).floor() as i32;
    let iz = ((p.z - chf.bmin.z) / chf.cs).floor() as i32;
    let ix = ix.clamp(0, chf.width - 1);
    let iz = iz.clamp(0, chf.height - 1);

    for r in 0..=HEIGHT_SEARCH_RADIUS {
        let mut best: Option<f32> = None;
        for dz in -r..=r {
            for dx in -r..=r {
                if dx.abs() != r && dz.abs() != r {
                    continue;
                }
                let x = ix + dx;
                let z = iz + dz;
                if x < 0 || z < 0 || x >= chf.width || z >= chf.height {
                    continue;
                }
                let cell = chf.cell(x, z);
                for i in cell.index as usize..(cell.index + cell.count) as usize {
                    let y = chf.bmin.y + chf.spans[i].y as f32 * chf.ch;
                    if best.map_or(true, |b| (y - hint).abs() < (b - hint).abs()) {
                        best = Some(y);
                    }
                }
            }
        }
        if let Some(y) = best {
            return y;
        }
    }
    hint
}

fn dist_pt_seg_sqr(p: Vec3, a: Vec3, b: Vec3) -> f32 {
    let ab = b - a;
    let d = ab.length_squared();
    let t = if d > 0.0 {
        ((p - a).dot(ab) / d).clamp(0.0, 1.0)
    } else {
        0.0
    };
    (a + ab * t - p).length_squared()
}

fn dist_2d(a: Vec3, b: Vec3) -> f32 {
    let dx = b.x - a.x;
    let dz = b.z - a.z;
    (dx * dx + dz * dz).sqrt()
}

/// Samples the edge `a -> b` and returns the interior points that had to be
/// kept to stay within `max_error` of the surface
fn sample_edge(
    chf: &CompactHeightfield,
    a: Vec3,
    b: Vec3,
    sample_dist: f32,
    max_error: f32,
) -> Vec<Vec3> {
    // sample in lexical order so neighbouring polygons agree
    let swapped = b.x < a.x || (b.x == a.x && b.z < a.z);
    let (a, b) = if swapped { (b, a) } else { (a, b) };

    let d = dist_2d(a, b);
    let nn = ((d / sample_dist).floor() as usize + 1).min(MAX_VERTS_PER_EDGE - 1);
    if nn < 2 {
        return Vec::new();
    }

    let mut samples = Vec::with_capacity(nn + 1);
    for k in 0..=nn {
        let u = k as f32 / nn as f32;
        let mut p = a.lerp(b, u);
        p.y = sample_height(chf, p, p.y);
        samples.push(p);
    }
    // endpoints keep the polygon heights
    samples[0] = a;
    samples[nn] = b;

    let mut keep = vec![0_usize, nn];
    let max_err_sq = max_error * max_error;
    let mut k = 0;
    while k + 1 < keep.len() {
        let (s0, s1) = (keep[k], keep[k + 1]);
        let mut worst = None;
        let mut maxd = 0.0;
        for m in s0 + 1..s1 {
            let dev = dist_pt_seg_sqr(samples[m], samples[s0], samples[s1]);
            if dev > maxd {
                maxd = dev;
                worst = Some(m);
            }
        }
        match worst {
            Some(m) if maxd > max_err_sq => keep.insert(k + 1, m),
            _ => k += 1,
        }
    }

    let mut interior: Vec<Vec3> = keep[1..keep.len() - 1].iter().map(|&m| samples[m]).collect();
    if swapped {
        interior.reverse();
    }
    interior
}

/// Fans the hull starting from the original-vertex ear with the shortest
/// perimeter, then zips inwards from both sides
fn triangulate_hull(verts: &[Vec3], hull: &[usize], nin: usize) -> Vec<[usize; 3]> {
    let n = hull.len();
    let prev = |i: usize| if i == 0 { n - 1 } else { i - 1 };
    let next = |i: usize| if i + 1 >= n { 0 } else { i + 1 };

    let mut start = 0;
    let mut left = 1;
    let mut right = n - 1;
    let mut dmin = f32::MAX;
    for i in 0..n {
        if hull[i] >= nin {
            continue;
        }
        let (pi, ni) = (prev(i), next(i));
        let pv = verts[hull[pi]];
        let cv = verts[hull[i]];
        let nv = verts[hull[ni]];
        let d = dist_2d(pv, cv) + dist_2d(cv, nv) + dist_2d(nv, pv);
        if d < dmin {
            start = i;
            left = ni;
            right = pi;
            dmin = d;
        }
    }

    let mut tris = vec![[hull[start], hull[left], hull[right]]];
    while next(left) != right {
        let nleft = next(left);
        let nright = prev(right);
        let cvleft = verts[hull[left]];
        let nvleft = verts[hull[nleft]];
        let cvright = verts[hull[right]];
        let nvright = verts[hull[nright]];
        let dleft = dist_2d(cvleft, nvleft) + dist_2d(nvleft, cvright);
        let dright = dist_2d(cvright, nvright) + dist_2d(cvleft, nvright);
        if dleft < dright {
            tris.push([hull[left], hull[nleft], hull[right]]);
            left = nleft;
        } else {
            tris.push([hull[left], hull[nright], hull[right]]);
            right = nright;
        }
    }
    tris
}

fn hull_edge_flags(tri: [usize; 3], n: usize) -> u8 {
    let mut flags = 0;
    for k in 0..3 {
        let a = tri[k];
        let b = tri[(k + 1) % 3];
        if (a + 1) % n == b || (b + 1) % n == a {
            flags |= 1 << (k * 2);
        }
    }
    flags
}

/// Builds the detail mesh for every polygon of `mesh`.
///
/// `sample_dist` is the world spacing of edge samples; values below 0.9 of
/// the cell size disable sampling and copy the polygons as-is.
/// `max_error` bounds the vertical deviation of the kept samples.
pub fn build_poly_mesh_detail(
    mesh: &PolyMesh,
    chf: &CompactHeightfield,
    sample_dist: f32,
    max_error: f32,
) -> Result<PolyMeshDetail> {
    let mut dmesh = PolyMeshDetail::default();
    if mesh.npolys == 0 {
        return Ok(dmesh);
    }
    if chf.width <= 0 || chf.height <= 0 {
        return Err(Error::Recast("detail mesh needs a non-empty heightfield".to_string()));
    }

    let sampling = sample_dist >= chf.cs * 0.9;
    for i in 0..mesh.npolys {
        let poly: Vec<Vec3> = mesh
            .poly(i)
            .iter()
            .take_while(|&&v| v != MESH_NULL_IDX)
            .map(|&v| mesh.world_vert(v as usize))
            .collect();
        let nin = poly.len();

        let mut verts = poly.clone();
        let mut hull = Vec::with_capacity(nin * 2);
        for j in 0..nin {
            hull.push(j);
            if sampling {
                let a = poly[j];
                let b = poly[(j + 1) % nin];
                for p in sample_edge(chf, a, b, sample_dist, max_error) {
                    hull.push(verts.len());
                    verts.push(p);
                }
            }
        }

        if verts.len() > u8::MAX as usize {
            return Err(Error::LimitExceeded {
                what: "detail polygon vertex",
                count: verts.len(),
                max: u8::MAX as usize,
            });
        }

        let tris = triangulate_hull(&verts, &hull, nin);
        // hull positions, for boundary edge flags
        let mut pos_in_hull = vec![0_usize; verts.len()];
        for (k, &v) in hull.iter().enumerate() {
            pos_in_hull[v] = k;
        }

        let vert_base = dmesh.verts.len() as u32;
        let tri_base = dmesh.tris.len() as u32;
        dmesh.meshes.push([vert_base, verts.len() as u32, tri_base, tris.len() as u32]);
        dmesh.verts.extend(verts);
        for t in tris {
            let hull_pos = [pos_in_hull[t[0]], pos_in_hull[t[1]], pos_in_hull[t[2]]];
            dmesh.tris.push([
                t[0] as u8,
                t[1] as u8,
                t[2] as u8,
                hull_edge_flags(hull_pos, hull.len()),
            ]);
        }
    }
    Ok(dmesh)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PartitionType;
    use crate::contour::build_contours;
    use crate::heightfield::Heightfield;
    use crate::polymesh::build_poly_mesh;
    use crate::regions::build_regions;
    use crate::WALKABLE_AREA;

    fn flat(size: i32) -> CompactHeightfield {
        let s = size as f32;
        let mut hf = Heightfield::new(size, size, Vec3::ZERO, Vec3::new(s, 10.0, s), 1.0, 0.5)
            .unwrap();
        for z in 0..size {
            for x in 0..size {
                hf.add_span(x, z, 0, 4, WALKABLE_AREA, 1).unwrap();
            }
        }
        CompactHeightfield::build_from_heightfield(&hf, 2, 1).unwrap()
    }

    #[test]
    fn test_flat_quad_detail() {
        let mut chf = flat(8);
        build_regions(&mut chf, PartitionType::Monotone, 0, 0, 0, 0).unwrap();
        let cset = build_contours(&chf, 1.3, 0).unwrap();
        let mesh = build_poly_mesh(&cset, 6).unwrap();
        let dmesh = build_poly_mesh_detail(&mesh, &chf, 2.0, 0.5).unwrap();

        assert_eq!(dmesh.meshes.len(), mesh.npolys);
        let [_, nverts, _, ntris] = dmesh.meshes[0];
        // flat ground needs no extra samples
        assert_eq!(nverts, 4);
        assert_eq!(ntris, 2);
        for v in &dmesh.verts {
            assert!((v.y - 2.0).abs() < 1e-5);
        }
        // every triangle of a quad fan has two outline edges
        for t in &dmesh.tris {
            assert_eq!((t[3] & 0x15).count_ones(), 2);
        }
    }

    #[test]
    fn test_hull_triangulation_covers_all_vertices() {
        let verts = vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(0.0, 0.0, 4.0),
            Vec3::new(4.0, 0.0, 4.0),
            Vec3::new(4.0, 0.0, 0.0),
            Vec3::new(2.0, 0.0, 0.0),
        ];
        let hull = vec![0, 1, 2, 3, 4];
        let tris = triangulate_hull(&verts, &hull, 4);
        assert_eq!(tris.len(), 3);
    }

    #[test]
    fn test_sample_edge_follows_step() {
        let mut hf = Heightfield::new(8, 1, Vec3::ZERO, Vec3::new(8.0, 10.0, 1.0), 1.0, 1.0)
            .unwrap();
        for x in 0..8 {
            let top = if x < 4 { 1 } else { 3 };
            hf.add_span(x, 0, 0, top, WALKABLE_AREA, 1).unwrap();
        }
        let chf = CompactHeightfield::build_from_heightfield(&hf, 2, 4).unwrap();
        let a = Vec3::new(0.0, 1.0, 0.5);
        let b = Vec3::new(8.0, 1.0, 0.5);
        let kept = sample_edge(&chf, a, b, 1.0, 0.5);
        assert!(kept.iter().any(|p| (p.y - 3.0).abs() < 1e-5));
    }

    #[test]
    fn test_empty_mesh() {
        let chf = flat(4);
        let cset = build_contours(&chf, 1.3, 0).unwrap();
        let mesh = build_poly_mesh(&cset, 6).unwrap();
        let dmesh = build_poly_mesh_detail(&mesh, &chf, 2.0, 0.5).unwrap();
        assert_eq!(dmesh.tri_count(), 0);
    }
}
