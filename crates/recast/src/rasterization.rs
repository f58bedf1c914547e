//! Triangle rasterization into a solid heightfield
//!
//! Triangles are clipped against every row and then every cell of the grid;
//! the vertical extent of each clipped piece becomes a span.

use crate::heightfield::{Heightfield, SPAN_MAX_HEIGHT};
use crate::WALKABLE_AREA;
use glam::Vec3;
use recast_common::{Error, Result};

/// Sets `areas[i]` to [`WALKABLE_AREA`] for every triangle whose slope is below
/// `walkable_slope_angle` degrees. Other entries are left untouched.
pub fn mark_walkable_triangles(
    walkable_slope_angle: f32,
    verts: &[Vec3],
    indices: &[i32],
    areas: &mut [u8],
) -> Result<()> {
    let cos = walkable_slope_angle.to_radians().cos();
    mark_walkable_triangles_cos(cos, verts, indices, areas)
}

/// Same as [`mark_walkable_triangles`] with the slope limit given as the cosine
pub fn mark_walkable_triangles_cos(
    walkable_slope_cos: f32,
    verts: &[Vec3],
    indices: &[i32],
    areas: &mut [u8],
) -> Result<()> {
    let ntris = indices.len() / 3;
    if areas.len() < ntris {
        return Err(Error::InvalidMesh(format!(
            "{} triangles but only {} area slots",
            ntris,
            areas.len()
        )));
    }
    for (t, tri) in indices.chunks_exact(3).enumerate() {
        let [a, b, c] = tri_verts(verts, tri)?;
        let normal = (b - a).cross(c - a).normalize_or_zero();
        if normal.y > walkable_slope_cos {
            areas[t] = WALKABLE_AREA;
        }
    }
    Ok(())
}

fn tri_verts(verts: &[Vec3], tri: &[i32]) -> Result<[Vec3; 3]> {
    let mut out = [Vec3::ZERO; 3];
    for (slot, &idx) in out.iter_mut().zip(tri) {
        *slot = *usize::try_from(idx)
            .ok()
            .and_then(|i| verts.get(i))
            .ok_or_else(|| Error::InvalidMesh(format!("vertex index {} out of range", idx)))?;
    }
    Ok(out)
}

/// Rasterizes an indexed triangle list. `areas` holds one area id per triangle.
pub fn rasterize_triangles(
    hf: &mut Heightfield,
    verts: &[Vec3],
    indices: &[i32],
    areas: &[u8],
    flag_merge_threshold: i32,
) -> Result<()> {
    let mut scratch = ClipBuffers::default();
    for (t, tri) in indices.chunks_exact(3).enumerate() {
        let [a, b, c] = tri_verts(verts, tri)?;
        let area = areas.get(t).copied().unwrap_or(0);
        rasterize_tri(hf, a, b, c, area, flag_merge_threshold, &mut scratch)?;
    }
    Ok(())
}

/// Rasterizes a single triangle
pub fn rasterize_triangle(
    hf: &mut Heightfield,
    v0: Vec3,
    v1: Vec3,
    v2: Vec3,
    area: u8,
    flag_merge_threshold: i32,
) -> Result<()> {
    rasterize_tri(
        hf,
        v0,
        v1,
        v2,
        area,
        flag_merge_threshold,
        &mut ClipBuffers::default(),
    )
}

#[derive(Default)]
struct ClipBuffers {
    input: Vec<Vec3>,
    row: Vec<Vec3>,
    rest: Vec<Vec3>,
    cell: Vec<Vec3>,
    cell_rest: Vec<Vec3>,
}

/// Splits `poly` along the plane `axis = line`. Vertices at or below the line
/// go to `below`, vertices at or above go to `above`.
fn divide_poly(poly: &[Vec3], below: &mut Vec<Vec3>, above: &mut Vec<Vec3>, line: f32, axis: usize) {
    below.clear();
    above.clear();
    let n = poly.len();
    if n == 0 {
        return;
    }
    let d: Vec<f32> = poly.iter().map(|v| line - v[axis]).collect();

    let mut j = n - 1;
    for i in 0..n {
        let in_a = d[j] >= 0.0;
        let in_b = d[i] >= 0.0;
        if in_a != in_b {
            let s = d[j] / (d[j] - d[i]);
            let p = poly[j] + (poly[i] - poly[j]) * s;
            below.push(p);
            above.push(p);
            if d[i] > 0.0 {
                below.push(poly[i]);
            } else if d[i] < 0.0 {
                above.push(poly[i]);
            }
        } else {
            if d[i] >= 0.0 {
                below.push(poly[i]);
                if d[i] != 0.0 {
                    j = i;
                    continue;
                }
            }
            above.push(poly[i]);
        }
        j = i;
    }
}

fn rasterize_tri(
    hf: &mut Heightfield,
    v0: Vec3,
    v1: Vec3,
    v2: Vec3,
    area: u8,
    flag_merge_threshold: i32,
    buf: &mut ClipBuffers,
) -> Result<()> {
    let tmin = v0.min(v1).min(v2);
    let tmax = v0.max(v1).max(v2);

    if tmin.x > hf.bmax.x
        || tmax.x < hf.bmin.x
        || tmin.y > hf.bmax.y
        || tmax.y < hf.bmin.y
        || tmin.z > hf.bmax.z
        || tmax.z < hf.bmin.z
    {
        return Ok(());
    }

    let ics = 1.0 / hf.cs;
    let ich = 1.0 / hf.ch;
    let by = hf.bmax.y - hf.bmin.y;
    let w = hf.width;
    let h = hf.height;

    let z0 = (((tmin.z - hf.bmin.z) * ics).floor() as i32).clamp(-1, h - 1);
    let z1 = (((tmax.z - hf.bmin.z) * ics).floor() as i32).clamp(0, h - 1);

    buf.input.clear();
    buf.input.extend_from_slice(&[v0, v1, v2]);

    for z in z0..=z1 {
        let cz = hf.bmin.z + z as f32 * hf.cs;
        divide_poly(&buf.input, &mut buf.row, &mut buf.rest, cz + hf.cs, 2);
        std::mem::swap(&mut buf.input, &mut buf.rest);
        if z < 0 || buf.row.len() < 3 {
            continue;
        }

        let (mut minx, mut maxx) = (buf.row[0].x, buf.row[0].x);
        for v in &buf.row[1..] {
            minx = minx.min(v.x);
            maxx = maxx.max(v.x);
        }
        let x0 = ((minx - hf.bmin.x) * ics).floor() as i32;
        let x1 = ((maxx - hf.bmin.x) * ics).floor() as i32;
        if x1 < 0 || x0 >= w {
            continue;
        }
        let x0 = x0.clamp(-1, w - 1);
        let x1 = x1.clamp(0, w - 1);

        buf.cell_rest.clear();
        buf.cell_rest.extend_from_slice(&buf.row);
        for x in x0..=x1 {
            let cx = hf.bmin.x + x as f32 * hf.cs;
            let remaining = std::mem::take(&mut buf.cell_rest);
            divide_poly(&remaining, &mut buf.cell, &mut buf.cell_rest, cx + hf.cs, 0);
            if x < 0 || buf.cell.len() < 3 {
                continue;
            }

            let mut smin = buf.cell[0].y;
            let mut smax = buf.cell[0].y;
            for v in &buf.cell[1..] {
                smin = smin.min(v.y);
                smax = smax.max(v.y);
            }
            smin -= hf.bmin.y;
            smax -= hf.bmin.y;
            if smax < 0.0 || smin > by {
                continue;
            }
            let smin = smin.max(0.0);
            let smax = smax.min(by);

            let ismin = ((smin * ich).floor() as i32).clamp(0, SPAN_MAX_HEIGHT as i32);
            let ismax = ((smax * ich).ceil() as i32).clamp(ismin + 1, SPAN_MAX_HEIGHT as i32);
            hf.add_span(x, z, ismin as u16, ismax as u16, area, flag_merge_threshold)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NULL_AREA;

    fn quad(size: f32, y: f32) -> (Vec<Vec3>, Vec<i32>) {
        let verts = vec![
            Vec3::new(0.0, y, 0.0),
            Vec3::new(0.0, y, size),
            Vec3::new(size, y, size),
            Vec3::new(size, y, 0.0),
        ];
        (verts, vec![0, 1, 2, 0, 2, 3])
    }

    #[test]
    fn test_walkable_triangles_by_slope() {
        let (verts, indices) = quad(4.0, 0.0);
        let mut areas = vec![NULL_AREA; 2];
        mark_walkable_triangles(45.0, &verts, &indices, &mut areas).unwrap();
        assert_eq!(areas, vec![WALKABLE_AREA, WALKABLE_AREA]);

        // a vertical wall is never walkable
        let wall = vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(0.0, 4.0, 0.0),
            Vec3::new(4.0, 0.0, 0.0),
        ];
        let mut wall_area = vec![NULL_AREA];
        mark_walkable_triangles(45.0, &wall, &[0, 1, 2], &mut wall_area).unwrap();
        assert_eq!(wall_area[0], NULL_AREA);
    }

    #[test]
    fn test_rasterize_flat_quad_fills_grid() {
        let mut hf =
            Heightfield::new(4, 4, Vec3::new(0.0, -1.0, 0.0), Vec3::new(4.0, 3.0, 4.0), 1.0, 0.5)
                .unwrap();
        let (verts, indices) = quad(4.0, 0.0);
        let areas = vec![WALKABLE_AREA; 2];
        rasterize_triangles(&mut hf, &verts, &indices, &areas, 1).unwrap();

        for z in 0..4 {
            for x in 0..4 {
                let col = hf.column(x, z);
                assert_eq!(col.len(), 1, "column ({}, {})", x, z);
                // y = 0 is voxel 2 above bmin.y = -1; spans are at least one voxel tall
                assert_eq!(col[0].smin, 2);
                assert_eq!(col[0].smax, 3);
                assert_eq!(col[0].area, WALKABLE_AREA);
            }
        }
    }

    #[test]
    fn test_rasterize_skips_outside_geometry() {
        let mut hf =
            Heightfield::new(2, 2, Vec3::ZERO, Vec3::new(2.0, 2.0, 2.0), 1.0, 0.5).unwrap();
        rasterize_triangle(
            &mut hf,
            Vec3::new(10.0, 0.5, 10.0),
            Vec3::new(10.0, 0.5, 11.0),
            Vec3::new(11.0, 0.5, 10.0),
            WALKABLE_AREA,
            1,
        )
        .unwrap();
        assert!(hf.is_empty());
    }

    #[test]
    fn test_bad_index_is_an_error() {
        let mut hf =
            Heightfield::new(2, 2, Vec3::ZERO, Vec3::new(2.0, 2.0, 2.0), 1.0, 0.5).unwrap();
        let verts = vec![Vec3::ZERO; 2];
        assert!(rasterize_triangles(&mut hf, &verts, &[0, 1, 5], &[WALKABLE_AREA], 1).is_err());
    }
}
