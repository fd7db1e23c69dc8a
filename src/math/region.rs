//! Integer voxel boxes

use std::collections::BTreeSet;

use crate::core::types::{IVec3, UVec3};

/// Horizontal size of a replication chunk column, as a shift.
pub const CHUNK_SHIFT: i32 = 4;

/// Axis-aligned voxel box, `min` inclusive and `max` exclusive.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Region {
    pub min: IVec3,
    pub max: IVec3,
}

impl Region {
    /// Create a region from corners; `max` is exclusive.
    pub fn new(min: IVec3, max: IVec3) -> Self {
        Self { min, max }
    }

    /// Region starting at `origin` with the given extents.
    pub fn from_origin_size(origin: IVec3, size: UVec3) -> Self {
        Self {
            min: origin,
            max: origin + size.as_ivec3(),
        }
    }

    /// Smallest region containing every point, or `None` for no points.
    pub fn bounding(points: impl IntoIterator<Item = IVec3>) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let (min, max) = iter.fold((first, first), |(lo, hi), p| (lo.min(p), hi.max(p)));
        Some(Self::new(min, max + IVec3::ONE))
    }

    pub fn size(&self) -> UVec3 {
        (self.max - self.min).max(IVec3::ZERO).as_uvec3()
    }

    pub fn volume(&self) -> u64 {
        let s = self.size();
        s.x as u64 * s.y as u64 * s.z as u64
    }

    pub fn is_empty(&self) -> bool {
        self.volume() == 0
    }

    pub fn contains(&self, p: IVec3) -> bool {
        p.cmpge(self.min).all() && p.cmplt(self.max).all()
    }

    pub fn intersects(&self, other: &Region) -> bool {
        self.intersection(other).is_some()
    }

    /// Overlapping part of two regions.
    pub fn intersection(&self, other: &Region) -> Option<Region> {
        let r = Region::new(self.min.max(other.min), self.max.min(other.max));
        if r.is_empty() { None } else { Some(r) }
    }

    /// Grow by `n` voxels on every side.
    pub fn expanded(&self, n: i32) -> Region {
        Region::new(self.min - IVec3::splat(n), self.max + IVec3::splat(n))
    }

    /// Chunk columns `(cx, cz)` touched by this region.
    pub fn chunk_columns(&self) -> BTreeSet<(i32, i32)> {
        let mut columns = BTreeSet::new();
        if self.is_empty() {
            return columns;
        }
        for cx in (self.min.x >> CHUNK_SHIFT)..=((self.max.x - 1) >> CHUNK_SHIFT) {
            for cz in (self.min.z >> CHUNK_SHIFT)..=((self.max.z - 1) >> CHUNK_SHIFT) {
                columns.insert((cx, cz));
            }
        }
        columns
    }
}

/// Chunk column containing a world position.
pub fn chunk_column_of(p: IVec3) -> (i32, i32) {
    (p.x >> CHUNK_SHIFT, p.z >> CHUNK_SHIFT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_half_open() {
        let r = Region::from_origin_size(IVec3::new(1, 2, 3), UVec3::new(2, 2, 2));
        assert!(r.contains(IVec3::new(1, 2, 3)));
        assert!(r.contains(IVec3::new(2, 3, 4)));
        assert!(!r.contains(IVec3::new(3, 3, 4)));
        assert_eq!(r.volume(), 8);
    }

    #[test]
    fn test_intersection() {
        let a = Region::new(IVec3::ZERO, IVec3::splat(4));
        let b = Region::new(IVec3::splat(2), IVec3::splat(6));
        let c = Region::new(IVec3::splat(4), IVec3::splat(5));
        assert_eq!(a.intersection(&b), Some(Region::new(IVec3::splat(2), IVec3::splat(4))));
        assert!(!a.intersects(&c));
    }

    #[test]
    fn test_bounding() {
        let r = Region::bounding([IVec3::new(3, 0, 1), IVec3::new(-1, 2, 1)]).unwrap();
        assert_eq!(r.min, IVec3::new(-1, 0, 1));
        assert_eq!(r.max, IVec3::new(4, 3, 2));
        assert!(Region::bounding(std::iter::empty()).is_none());
    }

    #[test]
    fn test_chunk_columns_negative() {
        let r = Region::new(IVec3::new(-1, 0, 15), IVec3::new(1, 1, 17));
        let cols: Vec<_> = r.chunk_columns().into_iter().collect();
        assert_eq!(cols, vec![(-1, 0), (-1, 1), (0, 0), (0, 1)]);
        assert_eq!(chunk_column_of(IVec3::new(-1, 5, 16)), (-1, 1));
    }
}
