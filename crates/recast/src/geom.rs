//! Integer 2D predicates on the xz plane shared by contour and polygon building

/// Point on the xz grid
pub(crate) type P2 = (i32, i32);

/// Twice the signed area of the triangle `a, b, c`
#[inline]
pub(crate) fn area2(a: P2, b: P2, c: P2) -> i64 {
    (b.0 - a.0) as i64 * (c.1 - a.1) as i64 - (c.0 - a.0) as i64 * (b.1 - a.1) as i64
}

/// True when `c` is strictly to the left of the directed line `a -> b`
#[inline]
pub(crate) fn left(a: P2, b: P2, c: P2) -> bool {
    area2(a, b, c) < 0
}

#[inline]
pub(crate) fn left_on(a: P2, b: P2, c: P2) -> bool {
    area2(a, b, c) <= 0
}

#[inline]
pub(crate) fn collinear(a: P2, b: P2, c: P2) -> bool {
    area2(a, b, c) == 0
}

/// Proper intersection: the segments cross at a point interior to both
pub(crate) fn intersect_prop(a: P2, b: P2, c: P2, d: P2) -> bool {
    if collinear(a, b, c) || collinear(a, b, d) || collinear(c, d, a) || collinear(c, d, b) {
        return false;
    }
    (left(a, b, c) ^ left(a, b, d)) && (left(c, d, a) ^ left(c, d, b))
}

/// True when `c` lies on the closed segment `a b`
fn between(a: P2, b: P2, c: P2) -> bool {
    if !collinear(a, b, c) {
        return false;
    }
    if a.0 != b.0 {
        (a.0 <= c.0 && c.0 <= b.0) || (a.0 >= c.0 && c.0 >= b.0)
    } else {
        (a.1 <= c.1 && c.1 <= b.1) || (a.1 >= c.1 && c.1 >= b.1)
    }
}

/// True when the closed segments `a b` and `c d` touch
pub(crate) fn intersect(a: P2, b: P2, c: P2, d: P2) -> bool {
    intersect_prop(a, b, c, d)
        || between(a, b, c)
        || between(a, b, d)
        || between(c, d, a)
        || between(c, d, b)
}

/// Squared distance from `p` to the segment `a b`, in grid units
pub(crate) fn dist_pt_seg_sqr(p: P2, a: P2, b: P2) -> f32 {
    let pqx = (b.0 - a.0) as f32;
    let pqz = (b.1 - a.1) as f32;
    let mut dx = (p.0 - a.0) as f32;
    let mut dz = (p.1 - a.1) as f32;
    let d = pqx * pqx + pqz * pqz;
    let mut t = pqx * dx + pqz * dz;
    if d > 0.0 {
        t /= d;
    }
    let t = t.clamp(0.0, 1.0);
    dx = a.0 as f32 + t * pqx - p.0 as f32;
    dz = a.1 as f32 + t * pqz - p.1 as f32;
    dx * dx + dz * dz
}
