//! Distance to the nearest region boundary for every span
//!
//! Used by watershed partitioning to grow regions outwards from the middle
//! of open areas.

use crate::compact_heightfield::CompactHeightfield;
use recast_common::Result;

/// Fills `chf.dist` with the chamfer distance (2 per step, 3 per diagonal)
/// from each span to the closest boundary, then smooths it with a 3x3 box
/// blur. Sets `chf.max_distance`.
pub fn build_distance_field(chf: &mut CompactHeightfield) -> Result<()> {
    let src = calculate_distance_field(chf);
    chf.max_distance = src.iter().copied().max().unwrap_or(0);
    chf.dist = box_blur(chf, 1, &src);
    Ok(())
}

fn calculate_distance_field(chf: &CompactHeightfield) -> Vec<u16> {
    let w = chf.width;
    let h = chf.height;
    let mut dist = vec![0xffff_u16; chf.spans.len()];

    // a span is on the boundary when any neighbour is missing or has another area
    for (x, z, i) in chf.iter_spans() {
        let area = chf.areas[i];
        let same = (0..4)
            .filter(|&dir| {
                chf.neighbour(x, z, i, dir)
                    .is_some_and(|n| chf.areas[n] == area)
            })
            .count();
        if same != 4 {
            dist[i] = 0;
        }
    }

    let relax = |dist: &mut [u16], i: usize, n: usize, cost: u16| {
        let d = dist[n].saturating_add(cost);
        if d < dist[i] {
            dist[i] = d;
        }
    };

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
    dist
}

fn box_blur(chf: &CompactHeightfield, threshold: u16, src: &[u16]) -> Vec<u16> {
    let thr = threshold as u32 * 2;
    let mut dst = vec![0_u16; src.len()];

    for (x, z, i) in chf.iter_spans() {
        let cd = src[i] as u32;
        if cd <= thr {
            dst[i] = cd as u16;
            continue;
        }

        let mut d = cd;
        for dir in 0..4 {
            match chf.neighbour(x, z, i, dir) {
                Some(a) => {
                    d += src[a] as u32;
                    let ax = x + crate::dir_offset_x(dir);
                    let az = z + crate::dir_offset_z(dir);
                    let dir2 = (dir + 1) & 3;
                    match chf.neighbour(ax, az, a, dir2) {
                        Some(b) => d += src[b] as u32,
                        None => d += cd,
                    }
                }
                None => d += cd * 2,
            }
        }
        dst[i] = ((d + 5) / 9) as u16;
    }
    dst
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heightfield::Heightfield;
    use crate::WALKABLE_AREA;
    use glam::Vec3;

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

    #[test]
    fn test_distance_grows_towards_centre() {
        let mut chf = flat_field(9);
        build_distance_field(&mut chf).unwrap();
        let edge = chf.cell(0, 4).index as usize;
        let mid = chf.cell(4, 4).index as usize;
        assert_eq!(chf.dist[edge], 0);
        assert!(chf.dist[mid] > chf.dist[chf.cell(2, 4).index as usize]);
        assert_eq!(chf.max_distance, 8);
    }

    #[test]
    fn test_area_change_is_boundary() {
        let mut chf = flat_field(5);
        let centre = chf.cell(2, 2).index as usize;
        chf.areas[centre] = 5;
        let dist = calculate_distance_field(&chf);
        assert_eq!(dist[centre], 0);
        // direct neighbours of the odd span are boundaries as well
        assert_eq!(dist[chf.cell(1, 2).index as usize], 0);
    }
}
