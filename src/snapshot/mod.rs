//! Region snapshots: captured voxel, event and entity data for a box.
//!
//! A snapshot lives in its own local frame. `Placement` maps that frame into
//! the world: local voxel `p` sits at `origin + orientation(p)`. Capturing and
//! applying with the same placement is symmetric, so applying a capture over
//! its own source reproduces the source.

pub mod store;
pub mod capture;
pub mod apply;

use std::collections::BTreeMap;

use crate::core::types::{IVec3, Result, UVec3, Vec3};
use crate::host::VoxelHost;
use crate::math::{Orientation, Region};
use crate::voxel::{EntityRecord, ScheduledEvent, VoxelMask, VoxelRecord};

pub use apply::{ApplyReport, ApplyStage, ApplyTask};
pub use capture::{CaptureStage, CaptureTask};
pub use store::{SnapshotStore, StoreKind, VoxelStore, SPARSE_FILL_THRESHOLD};

const HALF: Vec3 = Vec3::splat(0.5);

/// Maps a snapshot's local frame into the world.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Placement {
    /// World position of local voxel (0, 0, 0)
    pub origin: IVec3,
    pub orientation: Orientation,
}

impl Placement {
    pub fn new(origin: IVec3, orientation: Orientation) -> Self {
        Self { origin, orientation }
    }

    /// Unrotated placement at `origin`.
    pub fn at(origin: IVec3) -> Self {
        Self::new(origin, Orientation::IDENTITY)
    }

    pub fn world_of(&self, local: IVec3) -> IVec3 {
        self.origin + self.orientation.apply_offset(local)
    }

    pub fn local_of(&self, world: IVec3) -> IVec3 {
        self.orientation.inverse().apply_offset(world - self.origin)
    }

    /// Continuous position; voxel centres map to voxel centres.
    pub fn world_point(&self, local: Vec3) -> Vec3 {
        self.origin.as_vec3() + self.orientation.apply_vec(local - HALF) + HALF
    }

    pub fn local_point(&self, world: Vec3) -> Vec3 {
        self.orientation.inverse().apply_vec(world - self.origin.as_vec3() - HALF) + HALF
    }

    /// World box covered by a local box of `size`.
    pub fn world_region(&self, size: UVec3) -> Region {
        let min = self.origin + self.orientation.image_min_corner(size);
        Region::from_origin_size(min, self.orientation.transform_size(size))
    }
}

/// Tunables applied at capture time.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CaptureOptions {
    pub sparse_fill_threshold: f32,
    /// Extra voxels searched around the box for entities
    pub entity_search_margin: u32,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            sparse_fill_threshold: SPARSE_FILL_THRESHOLD,
            entity_search_margin: 1,
        }
    }
}

/// Everything a snapshot holds for one voxel.
#[derive(Clone, Debug, PartialEq)]
pub struct VoxelData {
    pub record: VoxelRecord,
    pub event: Option<ScheduledEvent>,
    pub entities: Vec<EntityRecord>,
}

/// Captured data for the set voxels of a box.
///
/// A voxel's data is defined exactly when its bit is set in `has_data`.
#[derive(Clone, Debug)]
pub struct RegionSnapshot {
    has_data: VoxelMask,
    store: SnapshotStore,
    /// Entities keyed by the index of their containing voxel, local frame
    entities: BTreeMap<usize, Vec<EntityRecord>>,
}

impl RegionSnapshot {
    /// Snapshot with no data yet, backend picked from the expected fill.
    pub fn empty(size: UVec3, expected: usize, threshold: f32) -> Result<Self> {
        Ok(Self::shaped_like(&VoxelMask::new(size)?, expected, threshold))
    }

    /// Empty snapshot the size of `mask`.
    pub fn shaped_like(mask: &VoxelMask, expected: usize, threshold: f32) -> Self {
        let has_data = mask.empty_like();
        let store = SnapshotStore::for_fill(has_data.volume(), expected, threshold);
        Self {
            has_data,
            store,
            entities: BTreeMap::new(),
        }
    }

    /// Build a snapshot from local-frame placements; later duplicates win.
    pub fn from_voxels(size: UVec3, voxels: impl IntoIterator<Item = (IVec3, VoxelRecord)>) -> Result<Self> {
        let voxels: Vec<(IVec3, VoxelRecord)> = voxels.into_iter().collect();
        let mut snapshot = Self::empty(size, voxels.len(), SPARSE_FILL_THRESHOLD)?;
        for (p, record) in voxels {
            snapshot.put_voxel(p, record, None);
        }
        Ok(snapshot)
    }

    /// Every voxel of the box set to `record` (an erase uses `AIR`).
    pub fn filled(size: UVec3, record: VoxelRecord) -> Result<Self> {
        let mut snapshot = Self::empty(size, usize::MAX, SPARSE_FILL_THRESHOLD)?;
        for i in 0..snapshot.has_data.volume() {
            snapshot.store.put(i, record.clone());
        }
        snapshot.has_data.set_all();
        Ok(snapshot)
    }

    /// Capture synchronously. See [`CaptureTask`] for the resumable form.
    pub fn capture(
        host: &mut dyn VoxelHost,
        mask: &VoxelMask,
        origin: IVec3,
        orientation: Orientation,
    ) -> Result<Self> {
        let mut task = CaptureTask::new(mask.clone(), Placement::new(origin, orientation), CaptureOptions::default())?;
        Ok(task.run_to_completion(host))
    }

    /// Apply synchronously. See [`ApplyTask`] for the resumable form.
    pub fn apply(
        &self,
        host: &mut dyn VoxelHost,
        origin: IVec3,
        write_mask: Option<&VoxelMask>,
        orientation: Orientation,
    ) -> Result<ApplyReport> {
        let mut task = ApplyTask::new(
            std::sync::Arc::new(self.clone()),
            Placement::new(origin, orientation),
            write_mask.cloned(),
        )?;
        Ok(task.run_to_completion(host))
    }

    pub fn size(&self) -> UVec3 {
        self.has_data.size()
    }

    pub fn has_data(&self) -> &VoxelMask {
        &self.has_data
    }

    pub fn store_kind(&self) -> StoreKind {
        self.store.kind()
    }

    /// Number of voxels holding data.
    pub fn voxel_count(&self) -> usize {
        self.has_data.count()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.values().map(Vec::len).sum()
    }

    pub fn voxel(&self, local: IVec3) -> Option<VoxelRecord> {
        self.has_data.index_of(local).and_then(|i| self.voxel_at(i))
    }

    pub fn voxel_at(&self, index: usize) -> Option<VoxelRecord> {
        if self.has_data.test_index(index) { self.store.get(index) } else { None }
    }

    pub fn event_at(&self, index: usize) -> Option<ScheduledEvent> {
        if self.has_data.test_index(index) { self.store.event(index) } else { None }
    }

    pub fn entities_at(&self, index: usize) -> &[EntityRecord] {
        self.entities.get(&index).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Entities with the index of their containing voxel.
    pub fn entities(&self) -> impl Iterator<Item = (usize, &EntityRecord)> + '_ {
        self.entities.iter().flat_map(|(i, list)| list.iter().map(move |e| (*i, e)))
    }

    /// Store a voxel; positions outside the box are ignored.
    pub fn put_voxel(&mut self, local: IVec3, record: VoxelRecord, event: Option<ScheduledEvent>) {
        if let Some(i) = self.has_data.index_of(local) {
            self.put_at(i, record, event);
        }
    }

    pub(crate) fn put_at(&mut self, index: usize, record: VoxelRecord, event: Option<ScheduledEvent>) {
        self.store.put(index, record);
        self.store.put_event(index, event);
        self.has_data.set_index(index, true);
    }

    /// Attach an entity (local frame) to the voxel containing it.
    pub fn add_entity(&mut self, entity: EntityRecord) {
        if let Some(i) = self.has_data.index_of(entity.voxel()) {
            self.entities.entry(i).or_default().push(entity);
        }
    }

    pub(crate) fn push_entity_at(&mut self, index: usize, entity: EntityRecord) {
        self.entities.entry(index).or_default().push(entity);
    }

    pub(crate) fn sort_entities(&mut self) {
        for list in self.entities.values_mut() {
            list.sort_by(|a, b| a.sort_key_cmp(b));
        }
    }

    /// All data held for the voxel at `index`.
    pub fn data_at(&self, index: usize) -> Option<VoxelData> {
        Some(VoxelData {
            record: self.voxel_at(index)?,
            event: self.store.event(index),
            entities: self.entities_at(index).to_vec(),
        })
    }

    /// Replace everything held for the voxel at `local`.
    pub fn replace_data(&mut self, local: IVec3, data: VoxelData) {
        let Some(i) = self.has_data.index_of(local) else {
            return;
        };
        self.put_at(i, data.record, data.event);
        if data.entities.is_empty() {
            self.entities.remove(&i);
        } else {
            self.entities.insert(i, data.entities);
        }
    }
}

impl PartialEq for RegionSnapshot {
    /// Content equality, independent of the storage backend.
    fn eq(&self, other: &Self) -> bool {
        self.has_data == other.has_data
            && self.entities == other.entities
            && self
                .has_data
                .iter_set_indices()
                .all(|i| self.store.get(i) == other.store.get(i) && self.store.event(i) == other.store.event(i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MemoryWorld;
    use crate::voxel::{Facing, Payload};

    fn furnished_world() -> MemoryWorld {
        let mut world = MemoryWorld::default();
        for x in 0..4 {
            for z in 0..4 {
                world.set_voxel(IVec3::new(x, 10, z), VoxelRecord::new(1, 0).with_light(15));
            }
        }
        world.set_voxel(
            IVec3::new(1, 11, 1),
            VoxelRecord::new(54, 0).with_payload(Payload { facing: Some(Facing::East), data: vec![4, 2] }),
        );
        world.set_voxel(IVec3::new(2, 11, 2), VoxelRecord::new(8, 3));
        world.set_pending_event(IVec3::new(2, 11, 2), ScheduledEvent { type_code: 8, delay: 20, priority: 1 });
        let mut painting = EntityRecord::new(30, Vec3::new(3.5, 11.5, 0.5));
        painting.facing = Some(Facing::South);
        painting.span = 2;
        world.add_entity(painting);
        world.add_entity(EntityRecord::new(40, Vec3::new(1.25, 11.0, 2.75)));
        world
    }

    #[test]
    fn test_placement_roundtrip() {
        for o in Orientation::ALL {
            let placement = Placement::new(IVec3::new(5, 0, -3), o);
            let p = IVec3::new(2, 1, 3);
            assert_eq!(placement.local_of(placement.world_of(p)), p);
            let q = Vec3::new(1.5, 2.25, 0.5);
            assert!((placement.local_point(placement.world_point(q)) - q).length() < 1e-5);
            let region = placement.world_region(UVec3::new(3, 2, 4));
            assert!(region.contains(placement.world_of(p)));
        }
    }

    #[test]
    fn test_capture_apply_recapture_identical() {
        let mut world = furnished_world();
        let mask = VoxelMask::filled(UVec3::new(4, 3, 4)).unwrap();
        let origin = IVec3::new(0, 10, 0);

        let first = RegionSnapshot::capture(&mut world, &mask, origin, Orientation::IDENTITY).unwrap();
        assert_eq!(first.entity_count(), 2);

        let report = first.apply(&mut world, origin, None, Orientation::IDENTITY).unwrap();
        assert!(report.failed.is_empty());

        let second = RegionSnapshot::capture(&mut world, &mask, origin, Orientation::IDENTITY).unwrap();
        assert_eq!(first, second);
        assert_eq!(world.entity_count(), 2);
    }

    #[test]
    fn test_copy_with_rotation_reorients_payload() {
        let mut world = furnished_world();
        let mask = VoxelMask::filled(UVec3::new(4, 3, 4)).unwrap();
        let snapshot = RegionSnapshot::capture(&mut world, &mask, IVec3::new(0, 10, 0), Orientation::IDENTITY).unwrap();

        let quarter = Orientation::new(1, false);
        let target = IVec3::new(50, 10, 50);
        snapshot.apply(&mut world, target, None, quarter).unwrap();

        let placed = Placement::new(target, quarter).world_of(IVec3::new(1, 1, 1));
        let record = world.voxel(placed);
        assert_eq!(record.type_code, 54);
        assert_eq!(record.payload.unwrap().facing, Some(Facing::South));
        assert_eq!(world.entity_count(), 4);
    }

    #[test]
    fn test_copy_rotated_back_matches_source() {
        let mut world = furnished_world();
        let mask = VoxelMask::filled(UVec3::new(4, 3, 4)).unwrap();
        let origin = IVec3::new(0, 10, 0);
        let source = RegionSnapshot::capture(&mut world, &mask, origin, Orientation::IDENTITY).unwrap();

        for o in Orientation::ALL {
            let mut scratch = MemoryWorld::default();
            let target = IVec3::new(100, 10, 100);
            source.apply(&mut scratch, target, None, o).unwrap();
            let recaptured = RegionSnapshot::capture(&mut scratch, &mask, target, o).unwrap();
            assert_eq!(recaptured, source, "orientation {:?}", o);
        }
    }

    #[test]
    fn test_sparse_and_dense_compare_equal() {
        let mut world = furnished_world();
        let mut thin = VoxelMask::new(UVec3::new(4, 3, 4)).unwrap();
        thin.set(IVec3::new(1, 1, 1));
        let sparse = RegionSnapshot::capture(&mut world, &thin, IVec3::new(0, 10, 0), Orientation::IDENTITY).unwrap();
        assert_eq!(sparse.store_kind(), StoreKind::Sparse);

        let mut dense = RegionSnapshot::filled(UVec3::new(4, 3, 4), VoxelRecord::AIR).unwrap();
        assert_eq!(dense.store_kind(), StoreKind::Dense);
        assert_ne!(dense, sparse);

        dense = RegionSnapshot::empty(UVec3::new(4, 3, 4), 48, SPARSE_FILL_THRESHOLD).unwrap();
        let index = thin.index_of(IVec3::new(1, 1, 1)).unwrap();
        dense.replace_data(IVec3::new(1, 1, 1), sparse.data_at(index).unwrap());
        assert_eq!(dense.store_kind(), StoreKind::Dense);
        assert_eq!(dense, sparse);
    }

    #[test]
    fn test_from_voxels_later_wins() {
        let snapshot = RegionSnapshot::from_voxels(
            UVec3::splat(2),
            [(IVec3::ZERO, VoxelRecord::new(1, 0)), (IVec3::ZERO, VoxelRecord::new(2, 0))],
        )
        .unwrap();
        assert_eq!(snapshot.voxel(IVec3::ZERO).unwrap().type_code, 2);
        assert_eq!(snapshot.voxel_count(), 1);
        assert_eq!(snapshot.voxel(IVec3::ONE), None);
    }
}
