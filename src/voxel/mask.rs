//! Dense voxel selection masks.
//!
//! A `VoxelMask` is one bit per voxel of a box. Queries outside the box
//! answer `false` and writes outside it are ignored, so callers can query
//! neighbours without bounds checks.

use bitvec::prelude::*;

use crate::core::error::Error;
use crate::core::types::{IVec3, Result, UVec3};
use crate::math::Orientation;

/// Largest extent allowed on any axis of a selection.
///
/// Padded working copies from [`VoxelMask::reoriented_with_border`] may
/// exceed it by the padding.
pub const MAX_MASK_DIMENSION: u32 = 256;

/// Grid axis
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
    Z,
}

const NEIGHBOURS: [IVec3; 6] = [
    IVec3::X, IVec3::NEG_X,
    IVec3::Y, IVec3::NEG_Y,
    IVec3::Z, IVec3::NEG_Z,
];

/// One bit per voxel of a `size`-sized box.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VoxelMask {
    size: UVec3,
    bits: BitVec<u64, Lsb0>,
}

impl VoxelMask {
    /// Zero-filled mask.
    pub fn new(size: UVec3) -> Result<Self> {
        for (axis, extent) in [('x', size.x), ('y', size.y), ('z', size.z)] {
            if extent > MAX_MASK_DIMENSION {
                return Err(Error::DimensionTooLarge { axis, size: extent, max: MAX_MASK_DIMENSION });
            }
        }
        Ok(Self::zeroed(size))
    }

    fn zeroed(size: UVec3) -> Self {
        let volume = size.x as usize * size.y as usize * size.z as usize;
        Self {
            size,
            bits: BitVec::repeat(false, volume),
        }
    }

    /// Mask with every voxel set.
    pub fn filled(size: UVec3) -> Result<Self> {
        let mut mask = Self::new(size)?;
        mask.set_all();
        Ok(mask)
    }

    /// Zero-filled mask of the same size.
    pub fn empty_like(&self) -> VoxelMask {
        VoxelMask {
            size: self.size,
            bits: BitVec::repeat(false, self.bits.len()),
        }
    }

    pub fn size(&self) -> UVec3 {
        self.size
    }

    pub fn volume(&self) -> usize {
        self.bits.len()
    }

    /// Linear index of `p`, or `None` outside the box.
    pub fn index_of(&self, p: IVec3) -> Option<usize> {
        if p.cmplt(IVec3::ZERO).any() || p.as_uvec3().cmpge(self.size).any() {
            return None;
        }
        let (x, y, z) = (p.x as usize, p.y as usize, p.z as usize);
        let (w, d) = (self.size.x as usize, self.size.z as usize);
        Some((y * d + z) * w + x)
    }

    /// Position of a linear index.
    pub fn position_of(&self, index: usize) -> IVec3 {
        let (w, d) = (self.size.x as usize, self.size.z as usize);
        let x = index % w;
        let rest = index / w;
        IVec3::new(x as i32, (rest / d) as i32, (rest % d) as i32)
    }

    pub fn test(&self, p: IVec3) -> bool {
        self.index_of(p).is_some_and(|i| self.bits[i])
    }

    pub fn set(&mut self, p: IVec3) {
        if let Some(i) = self.index_of(p) {
            self.bits.set(i, true);
        }
    }

    pub fn clear(&mut self, p: IVec3) {
        if let Some(i) = self.index_of(p) {
            self.bits.set(i, false);
        }
    }

    pub fn test_index(&self, index: usize) -> bool {
        self.bits.get(index).is_some_and(|b| *b)
    }

    pub fn set_index(&mut self, index: usize, value: bool) {
        if index < self.bits.len() {
            self.bits.set(index, value);
        }
    }

    pub fn set_all(&mut self) {
        self.bits.fill(true);
    }

    pub fn clear_all(&mut self) {
        self.bits.fill(false);
    }

    /// Number of set voxels.
    pub fn count(&self) -> usize {
        self.bits.count_ones()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.not_any()
    }

    /// First set index at or after `from`.
    pub fn next_set_from(&self, from: usize) -> Option<usize> {
        if from >= self.bits.len() {
            return None;
        }
        self.bits[from..].first_one().map(|i| i + from)
    }

    /// Positions of all set voxels in index order.
    pub fn iter_set(&self) -> impl Iterator<Item = IVec3> + '_ {
        self.bits.iter_ones().map(|i| self.position_of(i))
    }

    pub fn iter_set_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.bits.iter_ones()
    }

    fn check_same_size(&self, other: &VoxelMask) -> Result<()> {
        if self.size != other.size {
            return Err(Error::MaskSizeMismatch {
                left: self.size.to_array(),
                right: other.size.to_array(),
            });
        }
        Ok(())
    }

    /// In-place union.
    pub fn union_with(&mut self, other: &VoxelMask) -> Result<()> {
        self.check_same_size(other)?;
        for i in other.bits.iter_ones() {
            self.bits.set(i, true);
        }
        Ok(())
    }

    /// Clear every voxel set in `other`.
    pub fn subtract(&mut self, other: &VoxelMask) -> Result<()> {
        self.check_same_size(other)?;
        for i in other.bits.iter_ones() {
            self.bits.set(i, false);
        }
        Ok(())
    }

    /// Keep only voxels also set in `other`.
    pub fn intersect_with(&mut self, other: &VoxelMask) -> Result<()> {
        self.check_same_size(other)?;
        let cleared: Vec<usize> = self.bits.iter_ones().filter(|&i| !other.bits[i]).collect();
        for i in cleared {
            self.bits.set(i, false);
        }
        Ok(())
    }

    /// True when every voxel set in `other` is also set here.
    pub fn contains_all(&self, other: &VoxelMask) -> Result<bool> {
        self.check_same_size(other)?;
        Ok(other.bits.iter_ones().all(|i| self.bits[i]))
    }

    /// Clear voxels whose coordinate on `axis` falls outside `lo..=hi`.
    pub fn clip_to_axis_range(&mut self, axis: Axis, lo: i32, hi: i32) {
        let outside: Vec<usize> = self
            .bits
            .iter_ones()
            .filter(|&i| {
                let p = self.position_of(i);
                let c = match axis {
                    Axis::X => p.x,
                    Axis::Y => p.y,
                    Axis::Z => p.z,
                };
                c < lo || c > hi
            })
            .collect();
        for i in outside {
            self.bits.set(i, false);
        }
    }

    /// Every unset voxel 6-adjacent to a set voxel.
    pub fn derive_border_mask(&self) -> VoxelMask {
        let mut border = self.empty_like();
        for p in self.iter_set() {
            for n in NEIGHBOURS {
                let q = p + n;
                if let Some(i) = self.index_of(q) {
                    if !self.bits[i] {
                        border.bits.set(i, true);
                    }
                }
            }
        }
        border
    }

    /// Copy transformed by `orientation` and padded by `border` voxels on every
    /// side. The padding is not counted against [`MAX_MASK_DIMENSION`].
    ///
    /// Also returns the displacement of the new mask's index origin: a voxel
    /// at offset `p` from an anchor lands at `anchor + orientation(p)`, which
    /// is `anchor + displacement + new_index`.
    pub fn reoriented_with_border(&self, orientation: Orientation, border: u32) -> Result<(VoxelMask, IVec3)> {
        let turned = orientation.transform_size(self.size);
        let mut out = VoxelMask::zeroed(turned + UVec3::splat(border * 2));
        let min_corner = orientation.image_min_corner(self.size);
        let displacement = min_corner - IVec3::splat(border as i32);
        for p in self.iter_set() {
            out.set(orientation.apply_offset(p) - displacement);
        }
        Ok((out, displacement))
    }

    /// Sub-box starting at `offset`; voxels outside this mask read as unset.
    pub fn cropped(&self, offset: IVec3, size: UVec3) -> Result<VoxelMask> {
        let mut out = VoxelMask::new(size)?;
        for p in self.iter_set() {
            out.set(p - offset);
        }
        Ok(out)
    }

    /// Remove `border` voxels of padding from every side.
    pub fn strip_border(&self, border: u32) -> Result<VoxelMask> {
        let inner = self.size.saturating_sub(UVec3::splat(border * 2));
        self.cropped(IVec3::splat(border as i32), inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn l_shape() -> VoxelMask {
        let mut mask = VoxelMask::new(UVec3::new(3, 2, 4)).unwrap();
        mask.set(IVec3::new(0, 0, 0));
        mask.set(IVec3::new(1, 0, 0));
        mask.set(IVec3::new(2, 0, 0));
        mask.set(IVec3::new(0, 0, 1));
        mask.set(IVec3::new(0, 1, 3));
        mask
    }

    #[test]
    fn test_out_of_range_is_silent() {
        let mut mask = VoxelMask::new(UVec3::splat(2)).unwrap();
        mask.set(IVec3::new(5, 0, 0));
        mask.set(IVec3::new(-1, 0, 0));
        assert!(!mask.test(IVec3::new(5, 0, 0)));
        assert!(!mask.test(IVec3::new(0, -1, 0)));
        assert_eq!(mask.count(), 0);
        mask.clear(IVec3::new(9, 9, 9));
    }

    #[test]
    fn test_dimension_limit() {
        assert!(VoxelMask::new(UVec3::new(256, 1, 1)).is_ok());
        let err = VoxelMask::new(UVec3::new(1, 257, 1)).unwrap_err();
        assert!(matches!(err, Error::DimensionTooLarge { axis: 'y', .. }));
    }

    #[test]
    fn test_border_padding_past_limit() {
        let full = VoxelMask::filled(UVec3::new(MAX_MASK_DIMENSION, 1, 2)).unwrap();
        let (padded, displacement) = full.reoriented_with_border(Orientation::new(1, false), 1).unwrap();
        assert_eq!(padded.size(), UVec3::new(4, 3, MAX_MASK_DIMENSION + 2));
        assert_eq!(padded.count(), full.count());

        let (back, _) = padded.reoriented_with_border(Orientation::new(1, false).inverse(), 0).unwrap();
        assert_eq!(back.strip_border(1).unwrap(), full);
        assert_eq!(displacement.y, -1);
    }

    #[test]
    fn test_index_position_roundtrip() {
        let mask = VoxelMask::new(UVec3::new(3, 4, 5)).unwrap();
        for i in 0..mask.volume() {
            assert_eq!(mask.index_of(mask.position_of(i)), Some(i));
        }
    }

    #[test]
    fn test_union_and_contains() {
        let mut a = VoxelMask::new(UVec3::splat(3)).unwrap();
        let mut b = VoxelMask::new(UVec3::splat(3)).unwrap();
        a.set(IVec3::ZERO);
        b.set(IVec3::ONE);
        assert!(!a.contains_all(&b).unwrap());
        a.union_with(&b).unwrap();
        assert!(a.contains_all(&b).unwrap());
        assert_eq!(a.count(), 2);

        let c = VoxelMask::new(UVec3::splat(2)).unwrap();
        assert!(matches!(a.union_with(&c), Err(Error::MaskSizeMismatch { .. })));
    }

    #[test]
    fn test_subtract_and_intersect() {
        let mut a = VoxelMask::filled(UVec3::splat(2)).unwrap();
        let mut b = VoxelMask::new(UVec3::splat(2)).unwrap();
        b.set(IVec3::ZERO);
        b.set(IVec3::X);

        let mut inter = a.clone();
        inter.intersect_with(&b).unwrap();
        assert_eq!(inter, b);

        a.subtract(&b).unwrap();
        assert_eq!(a.count(), 6);
        assert!(!a.test(IVec3::ZERO));
    }

    #[test]
    fn test_clip_to_axis_range() {
        let mut mask = VoxelMask::filled(UVec3::new(2, 5, 2)).unwrap();
        mask.clip_to_axis_range(Axis::Y, 1, 2);
        assert_eq!(mask.count(), 8);
        assert!(!mask.test(IVec3::new(0, 0, 0)));
        assert!(mask.test(IVec3::new(1, 2, 1)));
        assert!(!mask.test(IVec3::new(1, 3, 1)));
    }

    #[test]
    fn test_border_of_single_voxel() {
        let mut mask = VoxelMask::new(UVec3::splat(3)).unwrap();
        mask.set(IVec3::ONE);
        let border = mask.derive_border_mask();
        assert_eq!(border.count(), 6);
        assert!(!border.test(IVec3::ONE));
        assert!(border.test(IVec3::new(1, 0, 1)));
        assert!(!border.test(IVec3::ZERO));
    }

    #[test]
    fn test_reorient_roundtrip_all_orientations() {
        let source = l_shape();
        for o in Orientation::ALL {
            for border in [0, 1, 2] {
                let (turned, _) = source.reoriented_with_border(o, border).unwrap();
                assert_eq!(turned.count(), source.count());
                let (back, _) = turned.reoriented_with_border(o.inverse(), 0).unwrap();
                let stripped = back.strip_border(border).unwrap();
                assert_eq!(stripped, source, "orientation {:?} border {}", o, border);
            }
        }
    }

    #[test]
    fn test_reorient_displacement_places_voxels() {
        let source = l_shape();
        let anchor = IVec3::new(10, 20, 30);
        for o in Orientation::ALL {
            let (turned, displacement) = source.reoriented_with_border(o, 1).unwrap();
            for p in source.iter_set() {
                let world = anchor + o.apply_offset(p);
                assert!(turned.test(world - anchor - displacement), "{:?} {:?}", o, p);
            }
        }
    }

    #[test]
    fn test_quarter_turn_swaps_extents() {
        let source = l_shape();
        let (turned, _) = source.reoriented_with_border(Orientation::new(1, false), 1).unwrap();
        assert_eq!(turned.size(), UVec3::new(6, 4, 5));
    }

    #[test]
    fn test_next_set_from() {
        let mut mask = VoxelMask::new(UVec3::new(4, 1, 1)).unwrap();
        mask.set(IVec3::new(2, 0, 0));
        assert_eq!(mask.next_set_from(0), Some(2));
        assert_eq!(mask.next_set_from(3), None);
        assert_eq!(mask.next_set_from(99), None);
    }
}
