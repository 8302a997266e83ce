//! Axis-aligned boxes in world space

use glam::DVec3;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: DVec3,
    pub max: DVec3,
}

impl Aabb {
    pub fn new(min: DVec3, max: DVec3) -> Self {
        Self {
            min: min.min(max),
            max: min.max(max),
        }
    }

    /// Box of a standing body: `feet` is the bottom-center point.
    pub fn from_feet(feet: DVec3, width: f64, height: f64) -> Self {
        let half = width * 0.5;
        Self {
            min: DVec3::new(feet.x - half, feet.y, feet.z - half),
            max: DVec3::new(feet.x + half, feet.y + height, feet.z + half),
        }
    }

    pub fn from_points(points: impl IntoIterator<Item = DVec3>) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let (min, max) = iter.fold((first, first), |(min, max), p| (min.min(p), max.max(p)));
        Some(Self { min, max })
    }

    pub fn size(&self) -> DVec3 {
        self.max - self.min
    }

    pub fn center(&self) -> DVec3 {
        (self.min + self.max) * 0.5
    }

    /// True when any axis has zero (or negative) extent.
    pub fn is_degenerate(&self) -> bool {
        let size = self.size();
        size.x <= 0.0 || size.y <= 0.0 || size.z <= 0.0
    }

    /// Strict overlap test; touching faces do not intersect.
    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.x < other.max.x
            && self.max.x > other.min.x
            && self.min.y < other.max.y
            && self.max.y > other.min.y
            && self.min.z < other.max.z
            && self.max.z > other.min.z
    }

    pub fn intersects_yz(&self, other: &Aabb) -> bool {
        self.min.y < other.max.y
            && self.max.y > other.min.y
            && self.min.z < other.max.z
            && self.max.z > other.min.z
    }

    pub fn intersects_xz(&self, other: &Aabb) -> bool {
        self.min.x < other.max.x
            && self.max.x > other.min.x
            && self.min.z < other.max.z
            && self.max.z > other.min.z
    }

    pub fn intersects_xy(&self, other: &Aabb) -> bool {
        self.min.x < other.max.x
            && self.max.x > other.min.x
            && self.min.y < other.max.y
            && self.max.y > other.min.y
    }

    pub fn moved(&self, delta: DVec3) -> Self {
        Self {
            min: self.min + delta,
            max: self.max + delta,
        }
    }

    pub fn expanded(&self, amount: DVec3) -> Self {
        Self {
            min: self.min - amount,
            max: self.max + amount,
        }
    }

    pub fn union(&self, other: &Aabb) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn touching_boxes_do_not_intersect() {
        let a = Aabb::new(DVec3::ZERO, DVec3::ONE);
        let b = Aabb::new(DVec3::new(1.0, 0.0, 0.0), DVec3::new(2.0, 1.0, 1.0));
        let c = Aabb::new(DVec3::splat(0.5), DVec3::splat(1.5));

        assert!(!a.intersects(&b));
        assert!(a.intersects(&c));
    }

    #[test]
    fn feet_box_is_centered_horizontally() {
        let b = Aabb::from_feet(DVec3::new(10.0, 64.0, -3.0), 0.6, 1.8);
        assert!((b.center().x - 10.0).abs() < 1e-12);
        assert!((b.min.y - 64.0).abs() < 1e-12);
        assert!((b.max.y - 65.8).abs() < 1e-12);
        assert!((b.size().z - 0.6).abs() < 1e-12);
    }

    #[test]
    fn degenerate_detects_flat_boxes() {
        let flat = Aabb::new(DVec3::ZERO, DVec3::new(1.0, 0.0, 1.0));
        assert!(flat.is_degenerate());
        assert!(!Aabb::new(DVec3::ZERO, DVec3::ONE).is_degenerate());
    }
}
