//! Area operations on the compact heightfield
//!
//! Erosion shrinks the walkable surface away from walls by the agent radius.
//! The `mark_*` functions stamp an area id onto every walkable span whose
//! floor falls inside a shape.

use crate::compact_heightfield::CompactHeightfield;
use crate::NULL_AREA;
use glam::{Vec2, Vec3};
use recast_common::{point_in_poly_2d, Result};

const EPSILON: f32 = 1e-6;

/// Removes walkable spans closer than `radius` cells to an obstacle or edge
pub fn erode_walkable_area(chf: &mut CompactHeightfield, radius: i32) -> Result<()> {
    let w = chf.width;
    let h = chf.height;
    let mut dist = vec![0xff_u8; chf.spans.len()];

    for z in 0..h {
        for x in 0..w {
            let cell = chf.cell(x, z);
            for i in cell.index as usize..(cell.index + cell.count) as usize {
                if chf.areas[i] == NULL_AREA {
                    dist[i] = 0;
                    continue;
                }
                let interior = (0..4).all(|dir| {
                    chf.neighbour(x, z, i, dir)
                        .is_some_and(|n| chf.areas[n] != NULL_AREA)
                });
                if !interior {
                    dist[i] = 0;
                }
            }
        }
    }

    let relax = |dist: &mut [u8], i: usize, n: usize, cost: u8| {
        let d = dist[n].saturating_add(cost);
        if d < dist[i] {
            dist[i] = d;
        }
    };

    // forward pass: -x, -x-z, -z, +x-z
    for z in 0..h {
        for x in 0..w {
            let cell = chf.cell(x, z);
            for i in cell.index as usize..(cell.index + cell.count) as usize {
                if let Some(a) = chf.neighbour(x, z, i, 0) {
                    relax(&mut dist, i, a, 2);
                    if let Some(b) = chf.neighbour(x - 1, z, a, 3) {
                        relax(&mut dist, i, b, 3);
                    }
                }
                if let Some(a) = chf.neighbour(x, z, i, 3) {
                    relax(&mut dist, i, a, 2);
                    if let Some(b) = chf.neighbour(x, z - 1, a, 2) {
                        relax(&mut dist, i, b, 3);
                    }
                }
            }
        }
    }

    // backward pass: +x, +x+z, +z, -x+z
    for z in (0..h).rev() {
        for x in (0..w).rev() {
            let cell = chf.cell(x, z);
            for i in cell.index as usize..(cell.index + cell.count) as usize {
                if let Some(a) = chf.neighbour(x, z, i, 2) {
                    relax(&mut dist, i, a, 2);
                    if let Some(b) = chf.neighbour(x + 1, z, a, 1) {
                        relax(&mut dist, i, b, 3);
                    }
                }
                if let Some(a) = chf.neighbour(x, z, i, 1) {
                    relax(&mut dist, i, a, 2);
                    if let Some(b) = chf.neighbour(x, z + 1, a, 0) {
                        relax(&mut dist, i, b, 3);
                    }
                }
            }
        }
    }

    let threshold = (radius * 2).clamp(0, 255) as u8;
    for (area, d) in chf.areas.iter_mut().zip(dist) {
        if d < threshold {
            *area = NULL_AREA;
        }
    }
    Ok(())
}

/// Grid footprint of a world-space box, clamped to the field.
/// Returns `None` when the box misses the field entirely.
fn footprint(chf: &CompactHeightfield, bmin: Vec3, bmax: Vec3) -> Option<(i32, i32, i32, i32, i32, i32)> {
    let minx = ((bmin.x - chf.bmin.x) / chf.cs).floor() as i32;
    let miny = ((bmin.y - chf.bmin.y) / chf.ch).floor() as i32;
    let minz = ((bmin.z - chf.bmin.z) / chf.cs).floor() as i32;
    let maxx = ((bmax.x - chf.bmin.x) / chf.cs).floor() as i32;
    let maxy = ((bmax.y - chf.bmin.y) / chf.ch).floor() as i32;
    let maxz = ((bmax.z - chf.bmin.z) / chf.cs).floor() as i32;

    if maxx < 0 || minx >= chf.width || maxz < 0 || minz >= chf.height {
        return None;
    }
    Some((
        minx.max(0),
        miny,
        minz.max(0),
        maxx.min(chf.width - 1),
        maxy,
        maxz.min(chf.height - 1),
    ))
}

/// Stamps `area` onto walkable spans for which `inside(x, z)` holds and
/// whose floor lies in `[miny, maxy]`. Returns the number of spans touched.
fn mark_spans(
    chf: &mut CompactHeightfield,
    (minx, miny, minz, maxx, maxy, maxz): (i32, i32, i32, i32, i32, i32),
    area: u8,
    inside: impl Fn(f32, f32) -> bool,
) -> usize {
    let mut marked = 0;
    for z in minz..=maxz {
        for x in minx..=maxx {
            let cx = chf.bmin.x + (x as f32 + 0.5) * chf.cs;
            let cz = chf.bmin.z + (z as f32 + 0.5) * chf.cs;
            if !inside(cx, cz) {
                continue;
            }
            let cell = chf.cell(x, z);
            for i in cell.index as usize..(cell.index + cell.count) as usize {
                if chf.areas[i] == NULL_AREA {
                    continue;
                }
                let y = chf.spans[i].y as i32;
                if y >= miny && y <= maxy {
                    chf.areas[i] = area;
                    marked += 1;
                }
            }
        }
    }
    marked
}

/// Marks walkable spans inside an axis-aligned box
pub fn mark_box_area(chf: &mut CompactHeightfield, bmin: Vec3, bmax: Vec3, area: u8) -> usize {
    match footprint(chf, bmin, bmax) {
        Some(fp) => mark_spans(chf, fp, area, |_, _| true),
        None => 0,
    }
}

/// Marks walkable spans inside an upright cylinder. `pos` is the centre of
/// the bottom cap.
pub fn mark_cylinder_area(
    chf: &mut CompactHeightfield,
    pos: Vec3,
    radius: f32,
    height: f32,
    area: u8,
) -> usize {
    let bmin = Vec3::new(pos.x - radius, pos.y, pos.z - radius);
    let bmax = Vec3::new(pos.x + radius, pos.y + height, pos.z + radius);
    let r2 = radius * radius;
    match footprint(chf, bmin, bmax) {
        Some(fp) => mark_spans(chf, fp, area, |cx, cz| {
            let dx = cx - pos.x;
            let dz = cz - pos.z;
            dx * dx + dz * dz < r2
        }),
        None => 0,
    }
}

/// Marks walkable spans whose cell centre lies inside the xz outline of a
/// convex polygon and whose floor lies between `min_y` and `max_y`
pub fn mark_convex_poly_area(
    chf: &mut CompactHeightfield,
    verts: &[Vec3],
    min_y: f32,
    max_y: f32,
    area: u8,
) -> usize {
    if verts.len() < 3 {
        return 0;
    }
    let mut bmin = Vec3::new(verts[0].x, min_y, verts[0].z);
    let mut bmax = Vec3::new(verts[0].x, max_y, verts[0].z);
    for v in &verts[1..] {
        bmin.x = bmin.x.min(v.x);
        bmin.z = bmin.z.min(v.z);
        bmax.x = bmax.x.max(v.x);
        bmax.z = bmax.z.max(v.z);
    }
    match footprint(chf, bmin, bmax) {
        Some(fp) => mark_spans(chf, fp, area, |cx, cz| {
            point_in_poly_2d(Vec3::new(cx, 0.0, cz), verts)
        }),
        None => 0,
    }
}

fn cross2(a: Vec2, b: Vec2) -> f32 {
    a.x * b.y - a.y * b.x
}

/// Grows a convex outline by `expand` in the xz plane, keeping its winding.
///
/// Each edge is pushed outwards along its normal and consecutive edges are
/// intersected. Corners that would spike further than twice `expand` are
/// clamped to a bevel along the corner bisector. The first output vertex
/// corresponds to `verts[1]`. Degenerate input yields an empty outline.
pub fn grow_convex_hull(expand: f32, verts: &[Vec3]) -> Vec<Vec3> {
    let n = verts.len();
    if n < 3 {
        return Vec::new();
    }

    let mut area = 0.0;
    for i in 0..n {
        let a = verts[i];
        let b = verts[(i + 1) % n];
        area += a.x * b.z - b.x * a.z;
    }
    if area.abs() < EPSILON {
        return Vec::new();
    }

    let outward = |dir: Vec2| -> Vec2 {
        if area > 0.0 {
            Vec2::new(dir.y, -dir.x)
        } else {
            Vec2::new(-dir.y, dir.x)
        }
    };

    let mut out = Vec::with_capacity(n);
    for k in 1..=n {
        let prev = verts[k - 1];
        let cur = verts[k % n];
        let next = verts[(k + 1) % n];

        let p = Vec2::new(prev.x, prev.z);
        let v = Vec2::new(cur.x, cur.z);
        let q = Vec2::new(next.x, next.z);

        let d1 = (v - p).normalize_or_zero();
        let d2 = (q - v).normalize_or_zero();
        if d1 == Vec2::ZERO || d2 == Vec2::ZERO {
            return Vec::new();
        }
        let n1 = outward(d1);
        let n2 = outward(d2);

        let a1 = p + n1 * expand;
        let a2 = v + n2 * expand;
        let denom = cross2(d1, d2);

        let mut grown = if denom.abs() < EPSILON {
            a2
        } else {
            let t = cross2(a2 - a1, d2) / denom;
            a1 + d1 * t
        };

        if grown.distance(v) > 2.0 * expand {
            let dir = (grown - v).normalize_or_zero();
            grown = v + dir * expand * 1.4142;
        }
        out.push(Vec3::new(grown.x, cur.y, grown.y));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heightfield::Heightfield;
    use crate::WALKABLE_AREA;

    fn flat_field(size: i32) -> CompactHeightfield {
        let s = size as f32;
        let mut hf = Heightfield::new(size, size, Vec3::ZERO, Vec3::new(s, 10.0, s), 1.0, 1.0)
            .unwrap();
        for z in 0..size {
            for x in 0..size {
                hf.add_span(x, z, 0, 1, WALKABLE_AREA, 1).unwrap();
            }
        }
        CompactHeightfield::build_from_heightfield(&hf, 2, 1).unwrap()
    }

    fn walkable(chf: &CompactHeightfield) -> usize {
        chf.areas.iter().filter(|&&a| a != NULL_AREA).count()
    }

    #[test]
    fn test_erode_strips_outer_ring() {
        let mut chf = flat_field(5);
        erode_walkable_area(&mut chf, 1).unwrap();
        assert_eq!(walkable(&chf), 9);
        let corner = chf.cell(0, 0).index as usize;
        assert_eq!(chf.areas[corner], NULL_AREA);
        let centre = chf.cell(2, 2).index as usize;
        assert_eq!(chf.areas[centre], WALKABLE_AREA);
    }

    #[test]
    fn test_erode_zero_radius_is_noop() {
        let mut chf = flat_field(4);
        erode_walkable_area(&mut chf, 0).unwrap();
        assert_eq!(walkable(&chf), 16);
    }

    #[test]
    fn test_mark_box() {
        let mut chf = flat_field(6);
        let marked = mark_box_area(&mut chf, Vec3::new(1.0, 0.0, 1.0), Vec3::new(2.5, 2.0, 2.5), 7);
        assert_eq!(marked, 4);
        assert_eq!(chf.areas.iter().filter(|&&a| a == 7).count(), 4);
    }

    #[test]
    fn test_mark_box_outside_height_range() {
        let mut chf = flat_field(6);
        let marked = mark_box_area(&mut chf, Vec3::new(0.0, 5.0, 0.0), Vec3::new(6.0, 8.0, 6.0), 7);
        assert_eq!(marked, 0);
    }

    #[test]
    fn test_mark_cylinder() {
        let mut chf = flat_field(8);
        let marked = mark_cylinder_area(&mut chf, Vec3::new(4.0, 0.0, 4.0), 1.0, 3.0, 9);
        // centres at 3.5/4.5 on both axes are within 1.0 of (4, 4)
        assert_eq!(marked, 4);
    }

    #[test]
    fn test_mark_convex_skips_null_spans() {
        let mut chf = flat_field(4);
        chf.areas[0] = NULL_AREA;
        let square = [
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(0.0, 0.0, 4.0),
            Vec3::new(4.0, 0.0, 4.0),
            Vec3::new(4.0, 0.0, 0.0),
        ];
        let marked = mark_convex_poly_area(&mut chf, &square, 0.0, 2.0, 5);
        assert_eq!(marked, 15);
        assert_eq!(chf.areas[0], NULL_AREA);
    }

    #[test]
    fn test_grow_unit_square() {
        let square = [
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 1.0),
            Vec3::new(0.0, 0.0, 1.0),
        ];
        let grown = grow_convex_hull(1.0, &square);
        assert_eq!(grown.len(), 4);

        let b = recast_common::Bounds::from_points(grown.iter());
        assert!((b.size().x - 3.0).abs() < 1e-4);
        assert!((b.size().z - 3.0).abs() < 1e-4);

        // first output corresponds to verts[1]
        assert!((grown[0] - Vec3::new(2.0, 0.0, -1.0)).length() < 1e-4);

        let signed = |v: &[Vec3]| {
            (0..v.len())
                .map(|i| {
                    let a = v[i];
                    let b = v[(i + 1) % v.len()];
                    a.x * b.z - b.x * a.z
                })
                .sum::<f32>()
        };
        assert!(signed(&grown) > 0.0);
        assert!(signed(&square) > 0.0);
    }

    #[test]
    fn test_grow_degenerate() {
        let line = [Vec3::ZERO, Vec3::X, Vec3::X * 2.0];
        assert!(grow_convex_hull(1.0, &line).is_empty());
        assert!(grow_convex_hull(1.0, &line[..2]).is_empty());
    }
}
