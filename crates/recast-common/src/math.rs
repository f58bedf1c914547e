//! Scalar and 2D geometry helpers
//!
//! The 2D helpers work on the horizontal (x, z) plane, which is where the
//! voxel grid and the tile grid live.

use glam::Vec3;

/// Clamps a value between min and max
#[inline]
pub fn clamp<T: PartialOrd>(v: T, min: T, max: T) -> T {
    if v < min {
        min
    } else if v > max {
        max
    } else {
        v
    }
}

/// Rounds up to the next power of two (0 stays 0)
pub fn next_pow2(mut v: u32) -> u32 {
    if v == 0 {
        return 0;
    }
    v -= 1;
    v |= v >> 1;
    v |= v >> 2;
    v |= v >> 4;
    v |= v >> 8;
    v |= v >> 16;
    v.wrapping_add(1)
}

/// Integer base-2 logarithm, rounded down. `ilog2(0)` is 0.
pub fn ilog2(v: u32) -> u32 {
    if v == 0 {
        0
    } else {
        31 - v.leading_zeros()
    }
}

/// Even-odd point in polygon test on the xz plane
pub fn point_in_poly_2d(pt: Vec3, verts: &[Vec3]) -> bool {
    let mut inside = false;
    let n = verts.len();
    if n < 3 {
        return false;
    }
    let mut j = n - 1;
    for i in 0..n {
        let vi = verts[i];
        let vj = verts[j];
        if ((vi.z > pt.z) != (vj.z > pt.z))
            && (pt.x < (vj.x - vi.x) * (pt.z - vi.z) / (vj.z - vi.z) + vi.x)
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Squared distance from `pt` to segment pq on the xz plane
pub fn dist_pt_seg_sqr_2d(pt: Vec3, p: Vec3, q: Vec3) -> f32 {
    let pqx = q.x - p.x;
    let pqz = q.z - p.z;
    let dx = pt.x - p.x;
    let dz = pt.z - p.z;
    let d = pqx * pqx + pqz * pqz;
    let mut t = pqx * dx + pqz * dz;
    if d > 0.0 {
        t /= d;
    }
    let t = clamp(t, 0.0, 1.0);
    let dx = p.x + t * pqx - pt.x;
    let dz = p.z + t * pqz - pt.z;
    dx * dx + dz * dz
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_pow2_and_ilog2() {
        assert_eq!(next_pow2(0), 0);
        assert_eq!(next_pow2(1), 1);
        assert_eq!(next_pow2(17), 32);
        assert_eq!(next_pow2(128), 128);
        assert_eq!(ilog2(1), 0);
        assert_eq!(ilog2(128), 7);
        assert_eq!(ilog2(130), 7);
    }

    #[test]
    fn test_point_in_poly() {
        let square = [
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(0.0, 0.0, 2.0),
            Vec3::new(2.0, 0.0, 2.0),
            Vec3::new(2.0, 0.0, 0.0),
        ];
        assert!(point_in_poly_2d(Vec3::new(1.0, 10.0, 1.0), &square));
        assert!(!point_in_poly_2d(Vec3::new(3.0, 0.0, 1.0), &square));
    }

    #[test]
    fn test_dist_pt_seg() {
        let d = dist_pt_seg_sqr_2d(
            Vec3::new(1.0, 0.0, 1.0),
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(2.0, 0.0, 0.0),
        );
        assert!((d - 1.0).abs() < 1e-6);
    }
}
