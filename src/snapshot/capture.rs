//! Resumable snapshot capture.

use crate::core::types::Result;
use crate::host::VoxelHost;
use crate::math::Aabb;
use crate::snapshot::{CaptureOptions, Placement, RegionSnapshot};
use crate::task::{fraction, weighted_progress, AsyncTask, Deadline, LockedRegion, TaskStatus};
use crate::voxel::{EntityRecord, VoxelMask};

const STAGE_WEIGHTS: [f32; 3] = [0.02, 0.78, 0.20];

/// Capture state: stage plus the cursor within it.
#[derive(Clone, Debug, PartialEq)]
pub enum CaptureStage {
    /// Pick the storage backend
    Setup,
    /// Read voxels in mask order; `cursor` is the next mask index to examine
    BulkVoxelData { cursor: usize, visited: usize },
    /// Bucket entities; `found` is fetched on the first step
    EntityData { found: Option<Vec<EntityRecord>>, cursor: usize },
    Complete,
    Aborted,
}

impl CaptureStage {
    fn index(&self) -> usize {
        match self {
            CaptureStage::Setup => 0,
            CaptureStage::BulkVoxelData { .. } => 1,
            CaptureStage::EntityData { .. } => 2,
            CaptureStage::Complete | CaptureStage::Aborted => 3,
        }
    }
}

/// Reads the voxels selected by a local-frame mask into a snapshot.
pub struct CaptureTask {
    mask: VoxelMask,
    selected: usize,
    placement: Placement,
    options: CaptureOptions,
    stage: CaptureStage,
    deadline: Deadline,
    snapshot: Option<RegionSnapshot>,
    locked: LockedRegion,
}

impl CaptureTask {
    /// Capture the voxels of `mask`, local voxel `p` being read from
    /// `placement.world_of(p)`.
    pub fn new(mask: VoxelMask, placement: Placement, options: CaptureOptions) -> Result<Self> {
        let (world_mask, displacement) = mask.reoriented_with_border(placement.orientation, 0)?;
        let locked = LockedRegion::new(placement.origin + displacement, world_mask);
        Ok(Self {
            selected: mask.count(),
            mask,
            placement,
            options,
            stage: CaptureStage::Setup,
            deadline: Deadline::Immediate,
            snapshot: None,
            locked,
        })
    }

    pub fn stage(&self) -> &CaptureStage {
        &self.stage
    }

    pub fn mask(&self) -> &VoxelMask {
        &self.mask
    }

    /// Run with no deadline and hand back the snapshot (empty if aborted).
    pub fn run_to_completion(&mut self, host: &mut dyn VoxelHost) -> RegionSnapshot {
        self.set_deadline(Deadline::Never);
        self.resume(host);
        self.take_snapshot().unwrap_or_else(|| {
            RegionSnapshot::shaped_like(&self.mask, 0, self.options.sparse_fill_threshold)
        })
    }

    /// The finished snapshot; `None` before completion or once taken.
    pub fn take_snapshot(&mut self) -> Option<RegionSnapshot> {
        if self.stage == CaptureStage::Complete { self.snapshot.take() } else { None }
    }

    /// One unit of work.
    fn step(&mut self, host: &mut dyn VoxelHost) {
        let stage = std::mem::replace(&mut self.stage, CaptureStage::Aborted);
        self.stage = match stage {
            CaptureStage::Setup => {
                let snapshot = RegionSnapshot::shaped_like(&self.mask, self.selected, self.options.sparse_fill_threshold);
                log::debug!(
                    "capture setup: {} of {} voxels, {:?} store",
                    self.selected,
                    self.mask.volume(),
                    snapshot.store_kind()
                );
                self.snapshot = Some(snapshot);
                CaptureStage::BulkVoxelData { cursor: 0, visited: 0 }
            }
            CaptureStage::BulkVoxelData { cursor, visited } => match self.mask.next_set_from(cursor) {
                Some(index) => {
                    self.read_voxel(host, index);
                    CaptureStage::BulkVoxelData { cursor: index + 1, visited: visited + 1 }
                }
                None => CaptureStage::EntityData { found: None, cursor: 0 },
            },
            CaptureStage::EntityData { found: None, .. } => {
                let bounds = Aabb::from_region(&self.locked.region())
                    .expanded(self.options.entity_search_margin as f32);
                let found: Vec<EntityRecord> = host
                    .entities_in_bounds(&bounds)
                    .into_iter()
                    .map(|(_, record)| record)
                    .collect();
                CaptureStage::EntityData { found: Some(found), cursor: 0 }
            }
            CaptureStage::EntityData { found: Some(found), cursor } => {
                if let Some(entity) = found.get(cursor) {
                    self.bucket_entity(entity);
                    CaptureStage::EntityData { found: Some(found), cursor: cursor + 1 }
                } else {
                    if let Some(snapshot) = self.snapshot.as_mut() {
                        snapshot.sort_entities();
                    }
                    CaptureStage::Complete
                }
            }
            terminal => terminal,
        };
    }

    fn read_voxel(&mut self, host: &mut dyn VoxelHost, index: usize) {
        let world = self.placement.world_of(self.mask.position_of(index));
        if !host.in_vertical_range(world.y) {
            return;
        }
        let record = host.read_voxel(world).reoriented(self.placement.orientation.inverse());
        let event = host.pending_event(world);
        if let Some(snapshot) = self.snapshot.as_mut() {
            snapshot.put_at(index, record, event);
        }
    }

    fn bucket_entity(&mut self, entity: &EntityRecord) {
        let inverse = self.placement.orientation.inverse();
        let local = entity.reoriented(inverse, self.placement.local_point(entity.position));
        let Some(snapshot) = self.snapshot.as_mut() else {
            return;
        };
        let key = local.voxel();
        if let Some(index) = snapshot.has_data().index_of(key) {
            if snapshot.has_data().test_index(index) {
                snapshot.push_entity_at(index, local);
            }
        }
    }
}

impl AsyncTask for CaptureTask {
    fn set_deadline(&mut self, deadline: Deadline) {
        self.deadline = deadline;
    }

    fn resume(&mut self, host: &mut dyn VoxelHost) -> TaskStatus {
        while !self.status().is_terminal() {
            if self.deadline.expired() {
                break;
            }
            self.step(host);
        }
        self.status()
    }

    fn abort(&mut self) {
        if !self.status().is_terminal() {
            log::debug!("capture aborted in {:?}", self.stage.index());
            self.stage = CaptureStage::Aborted;
        }
    }

    fn status(&self) -> TaskStatus {
        match self.stage {
            CaptureStage::Complete => TaskStatus::Complete,
            CaptureStage::Aborted => TaskStatus::Aborted,
            _ => TaskStatus::Running,
        }
    }

    fn progress(&self) -> f32 {
        let within = match &self.stage {
            CaptureStage::Setup => 0.0,
            CaptureStage::BulkVoxelData { visited, .. } => fraction(*visited, self.selected),
            CaptureStage::EntityData { found, cursor } => {
                found.as_ref().map_or(0.0, |f| fraction(*cursor, f.len()))
            }
            CaptureStage::Complete | CaptureStage::Aborted => 1.0,
        };
        weighted_progress(&STAGE_WEIGHTS, self.stage.index(), within)
    }

    fn locked_region(&self) -> Option<&LockedRegion> {
        match self.stage {
            CaptureStage::Complete | CaptureStage::Aborted => None,
            _ => Some(&self.locked),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{IVec3, UVec3, Vec3};
    use crate::host::MemoryWorld;
    use crate::math::Orientation;
    use crate::voxel::{ScheduledEvent, VoxelRecord};

    fn busy_world() -> MemoryWorld {
        let mut world = MemoryWorld::default();
        for x in 0..10 {
            for z in 0..10 {
                world.set_voxel(IVec3::new(x, 0, z), VoxelRecord::new(2, 0));
            }
        }
        world.add_entity(EntityRecord::new(5, Vec3::new(4.5, 1.0, 4.5)));
        world.set_pending_event(IVec3::new(3, 0, 3), ScheduledEvent { type_code: 2, delay: 40, priority: 0 });
        world
    }

    fn full_mask() -> VoxelMask {
        VoxelMask::filled(UVec3::splat(10)).unwrap()
    }

    #[test]
    fn test_immediate_deadline_never_completes() {
        let mut world = busy_world();
        let mut task = CaptureTask::new(full_mask(), Placement::at(IVec3::ZERO), CaptureOptions::default()).unwrap();
        task.set_deadline(Deadline::Immediate);
        for _ in 0..100 {
            assert_eq!(task.resume(&mut world), TaskStatus::Running);
        }
        assert_eq!(task.stage(), &CaptureStage::Setup);
        assert_eq!(task.progress(), 0.0);
        assert!(task.locked_region().is_some());
    }

    #[test]
    fn test_infinite_deadline_completes() {
        let mut world = busy_world();
        let mut task = CaptureTask::new(full_mask(), Placement::at(IVec3::ZERO), CaptureOptions::default()).unwrap();
        task.set_deadline(Deadline::Never);
        assert_eq!(task.resume(&mut world), TaskStatus::Complete);
        assert_eq!(task.progress(), 1.0);
        assert!(task.locked_region().is_none());

        let snapshot = task.take_snapshot().unwrap();
        assert_eq!(snapshot.voxel_count(), 1000);
        assert_eq!(snapshot.entity_count(), 1);
        let index = snapshot.has_data().index_of(IVec3::new(3, 0, 3)).unwrap();
        assert_eq!(snapshot.event_at(index).unwrap().delay, 40);
    }

    #[test]
    fn test_progress_is_monotone_across_slices() {
        let mut world = busy_world();
        let mut task = CaptureTask::new(full_mask(), Placement::at(IVec3::ZERO), CaptureOptions::default()).unwrap();
        let mut last = task.progress();
        let mut guard = 0;
        while task.status() == TaskStatus::Running {
            // Single-step through the task
            task.step(&mut world);
            let now = task.progress();
            assert!(now >= last, "{} < {}", now, last);
            last = now;
            guard += 1;
            assert!(guard < 10_000);
        }
        assert_eq!(last, 1.0);
    }

    #[test]
    fn test_abort_is_terminal() {
        let mut world = busy_world();
        let mut task = CaptureTask::new(full_mask(), Placement::at(IVec3::ZERO), CaptureOptions::default()).unwrap();
        assert!(task.locked_region().is_some());
        task.abort();
        assert!(task.locked_region().is_none());
        task.set_deadline(Deadline::Never);
        assert_eq!(task.resume(&mut world), TaskStatus::Aborted);
        assert!(task.take_snapshot().is_none());
    }

    #[test]
    fn test_vertical_clamp_skips_out_of_range() {
        let mut world = MemoryWorld::new((0, 4));
        let mask = VoxelMask::filled(UVec3::new(1, 6, 1)).unwrap();
        let snapshot = RegionSnapshot::capture(&mut world, &mask, IVec3::new(0, -1, 0), Orientation::IDENTITY).unwrap();
        // y = -1 and y = 4 fall outside [0, 4)
        assert_eq!(snapshot.voxel_count(), 4);
        assert!(!snapshot.has_data().test(IVec3::new(0, 0, 0)));
        assert!(!snapshot.has_data().test(IVec3::new(0, 5, 0)));
    }

    #[test]
    fn test_entities_outside_mask_are_ignored() {
        let mut world = busy_world();
        let mut mask = VoxelMask::new(UVec3::splat(10)).unwrap();
        mask.set(IVec3::new(0, 1, 0));
        let snapshot = RegionSnapshot::capture(&mut world, &mask, IVec3::ZERO, Orientation::IDENTITY).unwrap();
        assert_eq!(snapshot.entity_count(), 0);
    }
}
