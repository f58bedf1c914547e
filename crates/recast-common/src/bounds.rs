//! Axis-aligned bounding boxes

use glam::Vec3;

/// Axis-aligned bounding box in world space.
///
/// An "empty" box has `min > max` on every axis and absorbs the first point
/// or box it is unioned with.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct Bounds {
    pub min: Vec3,
    pub max: Vec3,
}

impl Default for Bounds {
    fn default() -> Self {
        Self::empty()
    }
}

impl Bounds {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Creates a box from a center point and half extents
    pub fn from_center_extent(center: Vec3, extent: Vec3) -> Self {
        Self {
            min: center - extent,
            max: center + extent,
        }
    }

    /// An inverted box that contains nothing
    pub fn empty() -> Self {
        Self {
            min: Vec3::splat(f32::MAX),
            max: Vec3::splat(f32::MIN),
        }
    }

    /// Builds the tightest box around the given points
    pub fn from_points<'a, I: IntoIterator<Item = &'a Vec3>>(points: I) -> Self {
        let mut bounds = Self::empty();
        for p in points {
            bounds.add_point(*p);
        }
        bounds
    }

    pub fn is_valid(&self) -> bool {
        self.min.x <= self.max.x && self.min.y <= self.max.y && self.min.z <= self.max.z
    }

    pub fn add_point(&mut self, p: Vec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    /// Returns the union of both boxes. Empty boxes are ignored.
    pub fn union(&self, other: &Bounds) -> Bounds {
        if !other.is_valid() {
            return *self;
        }
        if !self.is_valid() {
            return *other;
        }
        Bounds {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Inclusive overlap test on all three axes
    pub fn intersects(&self, other: &Bounds) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    /// True when `other` lies entirely inside this box
    pub fn contains(&self, other: &Bounds) -> bool {
        self.min.x <= other.min.x
            && self.min.y <= other.min.y
            && self.min.z <= other.min.z
            && self.max.x >= other.max.x
            && self.max.y >= other.max.y
            && self.max.z >= other.max.z
    }

    pub fn contains_point(&self, p: Vec3) -> bool {
        p.x >= self.min.x
            && p.x <= self.max.x
            && p.y >= self.min.y
            && p.y <= self.max.y
            && p.z >= self.min.z
            && p.z <= self.max.z
    }

    /// Grows the box by `amount` on every side (negative values shrink it)
    pub fn expand_by(&self, amount: f32) -> Bounds {
        Bounds {
            min: self.min - Vec3::splat(amount),
            max: self.max + Vec3::splat(amount),
        }
    }

    pub fn expand_by_vec(&self, amount: Vec3) -> Bounds {
        Bounds {
            min: self.min - amount,
            max: self.max + amount,
        }
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Half size of the box
    pub fn extent(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_union_with_empty() {
        let a = Bounds::new(Vec3::ZERO, Vec3::ONE);
        assert_eq!(a.union(&Bounds::empty()), a);
        assert_eq!(Bounds::empty().union(&a), a);
        assert!(!Bounds::empty().is_valid());
    }

    #[test]
    fn test_intersects_touching_edges() {
        let a = Bounds::new(Vec3::ZERO, Vec3::ONE);
        let b = Bounds::new(Vec3::new(1.0, 0.0, 0.0), Vec3::new(2.0, 1.0, 1.0));
        let c = Bounds::new(Vec3::new(1.5, 0.0, 0.0), Vec3::new(2.0, 1.0, 1.0));
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
    }

    #[test]
    fn test_contains_and_expand() {
        let outer = Bounds::new(Vec3::ZERO, Vec3::splat(10.0));
        let inner = Bounds::new(Vec3::splat(1.0), Vec3::splat(2.0));
        assert!(outer.contains(&inner));
        assert!(!inner.contains(&outer));

        let grown = inner.expand_by(1.0);
        assert_eq!(grown.min, Vec3::ZERO);
        assert_eq!(grown.max, Vec3::splat(3.0));
        assert_eq!(grown.extent(), Vec3::splat(1.5));
        assert_eq!(grown.center(), Vec3::splat(1.5));
    }

    #[test]
    fn test_from_points() {
        let pts = [Vec3::new(1.0, 5.0, -2.0), Vec3::new(-1.0, 0.0, 3.0)];
        let b = Bounds::from_points(pts.iter());
        assert_eq!(b.min, Vec3::new(-1.0, 0.0, -2.0));
        assert_eq!(b.max, Vec3::new(1.0, 5.0, 3.0));
        assert!(b.contains_point(Vec3::new(0.0, 1.0, 0.0)));
    }
}
