//! Orientation of a snapshot relative to the world grid.
//!
//! The eight orientations are the quarter turns about +Y, each optionally
//! preceded by a mirror of the X axis. They form a closed group; composition
//! and inverses are looked up in tables rather than derived from angles.

use serde::{Deserialize, Serialize};

use crate::core::types::{IVec3, UVec3, Vec3};

const MIRROR_BIT: u8 = 0b100;
const ROTATION_MASK: u8 = 0b011;

/// `a` applied after `b`.
///
/// A mirror conjugates a rotation into its inverse (M R = R^-1 M), so a
/// mirrored `a` subtracts `b`'s turns instead of adding them.
const fn compose_raw(a: u8, b: u8) -> u8 {
    let (ra, ma) = (a & ROTATION_MASK, a & MIRROR_BIT);
    let (rb, mb) = (b & ROTATION_MASK, b & MIRROR_BIT);
    if ma != 0 {
        ((ra + 4 - rb) & ROTATION_MASK) | (MIRROR_BIT ^ mb)
    } else {
        ((ra + rb) & ROTATION_MASK) | mb
    }
}

const fn build_compose_table() -> [[u8; 8]; 8] {
    let mut table = [[0u8; 8]; 8];
    let mut a = 0;
    while a < 8 {
        let mut b = 0;
        while b < 8 {
            table[a][b] = compose_raw(a as u8, b as u8);
            b += 1;
        }
        a += 1;
    }
    table
}

/// `COMPOSE[a][b]` is orientation `a` applied after `b`.
const COMPOSE: [[u8; 8]; 8] = build_compose_table();

/// Mirrored orientations are their own inverse.
const INVERSE: [u8; 8] = [0, 3, 2, 1, 4, 5, 6, 7];

/// One of the eight grid-preserving orientations about the vertical axis.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Orientation(u8);

impl Orientation {
    pub const IDENTITY: Orientation = Orientation(0);

    /// All eight orientations, unmirrored first.
    pub const ALL: [Orientation; 8] = [
        Orientation(0), Orientation(1), Orientation(2), Orientation(3),
        Orientation(4), Orientation(5), Orientation(6), Orientation(7),
    ];

    /// `quarter_turns` clockwise (seen from above), after an optional X mirror.
    pub fn new(quarter_turns: u8, mirrored: bool) -> Self {
        let mirror = if mirrored { MIRROR_BIT } else { 0 };
        Self((quarter_turns & ROTATION_MASK) | mirror)
    }

    pub fn quarter_turns(self) -> u8 {
        self.0 & ROTATION_MASK
    }

    pub fn is_mirrored(self) -> bool {
        self.0 & MIRROR_BIT != 0
    }

    pub fn is_identity(self) -> bool {
        self.0 == 0
    }

    /// True when the X and Z extents trade places.
    pub fn swaps_axes(self) -> bool {
        self.quarter_turns() & 1 == 1
    }

    /// `self` applied after `other`.
    pub fn compose(self, other: Orientation) -> Orientation {
        Orientation(COMPOSE[self.0 as usize][other.0 as usize])
    }

    pub fn inverse(self) -> Orientation {
        Orientation(INVERSE[self.0 as usize])
    }

    /// Transform an integer offset (rotation about the origin voxel).
    pub fn apply_offset(self, v: IVec3) -> IVec3 {
        let x = if self.is_mirrored() { -v.x } else { v.x };
        let (x, z) = match self.quarter_turns() {
            0 => (x, v.z),
            1 => (-v.z, x),
            2 => (-x, -v.z),
            _ => (v.z, -x),
        };
        IVec3::new(x, v.y, z)
    }

    /// Transform a continuous vector.
    pub fn apply_vec(self, v: Vec3) -> Vec3 {
        let x = if self.is_mirrored() { -v.x } else { v.x };
        let (x, z) = match self.quarter_turns() {
            0 => (x, v.z),
            1 => (-v.z, x),
            2 => (-x, -v.z),
            _ => (v.z, -x),
        };
        Vec3::new(x, v.y, z)
    }

    /// Extents of a box after transformation.
    pub fn transform_size(self, size: UVec3) -> UVec3 {
        if self.swaps_axes() {
            UVec3::new(size.z, size.y, size.x)
        } else {
            size
        }
    }

    /// Minimum corner of the image of the box `[0, size)` under this orientation.
    ///
    /// Adding an image offset minus this corner yields an index inside the
    /// transformed box.
    pub fn image_min_corner(self, size: UVec3) -> IVec3 {
        let far = IVec3::new(size.x as i32 - 1, 0, size.z as i32 - 1);
        self.apply_offset(IVec3::ZERO).min(self.apply_offset(far))
    }

    /// Yaw in degrees, measured from +Z toward +X.
    pub fn transform_yaw(self, yaw: f32) -> f32 {
        let yaw = if self.is_mirrored() { -yaw } else { yaw };
        (yaw - 90.0 * self.quarter_turns() as f32).rem_euclid(360.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inverse_composes_to_identity() {
        for o in Orientation::ALL {
            assert_eq!(o.compose(o.inverse()), Orientation::IDENTITY, "{:?}", o);
            assert_eq!(o.inverse().compose(o), Orientation::IDENTITY, "{:?}", o);
        }
    }

    #[test]
    fn test_compose_matches_pointwise() {
        let p = IVec3::new(3, 7, -2);
        for a in Orientation::ALL {
            for b in Orientation::ALL {
                let direct = a.apply_offset(b.apply_offset(p));
                assert_eq!(a.compose(b).apply_offset(p), direct, "{:?} after {:?}", a, b);
            }
        }
    }

    #[test]
    fn test_four_quarter_turns() {
        let quarter = Orientation::new(1, false);
        let full = quarter.compose(quarter).compose(quarter).compose(quarter);
        assert_eq!(full, Orientation::IDENTITY);
        assert_eq!(quarter.apply_offset(IVec3::new(1, 0, 0)), IVec3::new(0, 0, 1));
    }

    #[test]
    fn test_mirror_flips_x() {
        let m = Orientation::new(0, true);
        assert_eq!(m.apply_offset(IVec3::new(2, 1, 3)), IVec3::new(-2, 1, 3));
        assert_eq!(m.inverse(), m);
    }

    #[test]
    fn test_image_min_corner() {
        let size = UVec3::new(4, 2, 3);
        let o = Orientation::new(1, false);
        // (x, z) -> (-z, x): x spans [-2, 0], z spans [0, 3]
        assert_eq!(o.image_min_corner(size), IVec3::new(-2, 0, 0));
        assert_eq!(o.transform_size(size), UVec3::new(3, 2, 4));
    }

    #[test]
    fn test_yaw_follows_vectors() {
        for o in Orientation::ALL {
            let yaw = 30.0_f32;
            let dir = Vec3::new(yaw.to_radians().sin(), 0.0, yaw.to_radians().cos());
            let turned = o.apply_vec(dir);
            let expected = o.transform_yaw(yaw).to_radians();
            assert!((turned.x - expected.sin()).abs() < 1e-4, "{:?}", o);
            assert!((turned.z - expected.cos()).abs() < 1e-4, "{:?}", o);
        }
    }
}
