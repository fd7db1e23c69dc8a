//! Simple edits: a handful of voxel placements applied at once.

use crate::core::error::Error;
use crate::core::types::{IVec3, Result};
use crate::math::Region;
use crate::snapshot::RegionSnapshot;
use crate::task::LockedRegion;
use crate::voxel::VoxelRecord;

/// Voxel placements in world coordinates; a later placement of the same
/// position wins.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SimpleEdit {
    placements: Vec<(IVec3, VoxelRecord)>,
}

impl SimpleEdit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`SimpleEdit::push`].
    pub fn set(mut self, pos: IVec3, record: VoxelRecord) -> Self {
        self.push(pos, record);
        self
    }

    pub fn push(&mut self, pos: IVec3, record: VoxelRecord) {
        self.placements.push((pos, record));
    }

    pub fn len(&self) -> usize {
        self.placements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.placements.is_empty()
    }

    pub fn placements(&self) -> &[(IVec3, VoxelRecord)] {
        &self.placements
    }

    /// Bounding box of the placements.
    pub fn region(&self) -> Option<Region> {
        Region::bounding(self.placements.iter().map(|(p, _)| *p))
    }

    /// Split into the placements outside `locked` and those inside it.
    pub fn split_by(self, locked: &LockedRegion) -> (SimpleEdit, SimpleEdit) {
        let (held, free): (Vec<_>, Vec<_>) = self.placements.into_iter().partition(|(p, _)| locked.contains(*p));
        (SimpleEdit { placements: free }, SimpleEdit { placements: held })
    }

    /// Snapshot of the edit plus the world position of its local origin.
    pub fn to_snapshot(&self) -> Result<(RegionSnapshot, IVec3)> {
        let region = self.region().ok_or(Error::EmptyEdit)?;
        let snapshot = RegionSnapshot::from_voxels(
            region.size(),
            self.placements.iter().map(|(p, record)| (*p - region.min, record.clone())),
        )?;
        Ok((snapshot, region.min))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::UVec3;
    use crate::voxel::VoxelMask;

    #[test]
    fn test_to_snapshot_bounds() {
        let edit = SimpleEdit::new()
            .set(IVec3::new(5, 2, -1), VoxelRecord::new(1, 0))
            .set(IVec3::new(3, 4, 0), VoxelRecord::new(2, 0));
        let (snapshot, origin) = edit.to_snapshot().unwrap();
        assert_eq!(origin, IVec3::new(3, 2, -1));
        assert_eq!(snapshot.size(), UVec3::new(3, 3, 2));
        assert_eq!(snapshot.voxel_count(), 2);
        assert_eq!(snapshot.voxel(IVec3::new(2, 0, 0)).unwrap().type_code, 1);
    }

    #[test]
    fn test_empty_edit_is_rejected() {
        assert!(matches!(SimpleEdit::new().to_snapshot(), Err(Error::EmptyEdit)));
    }

    #[test]
    fn test_split_by_locked_region() {
        let locked = LockedRegion::new(IVec3::new(10, 0, 10), VoxelMask::filled(UVec3::splat(2)).unwrap());
        let edit = SimpleEdit::new()
            .set(IVec3::new(10, 0, 10), VoxelRecord::new(1, 0))
            .set(IVec3::new(0, 0, 0), VoxelRecord::new(2, 0))
            .set(IVec3::new(11, 1, 11), VoxelRecord::new(3, 0));
        let (now, later) = edit.split_by(&locked);
        assert_eq!(now.len(), 1);
        assert_eq!(later.len(), 2);
        assert_eq!(now.placements()[0].0, IVec3::ZERO);
    }
}
