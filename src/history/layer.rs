//! Undo layers: one reversible region edit.
//!
//! A layer stores the "before" picture of every voxel an edit may have
//! changed, in the world frame at `origin`. The changed mask starts as the
//! write mask plus a one-voxel border and loses border voxels whose data the
//! edit provably left alone.
//!
//! Layers over the same environment are ordered by `stamp`. Reversing a layer
//! never writes over a voxel a later layer also changed; the before value is
//! handed to that later layer instead, so undoing it restores transitively.

use std::sync::Arc;

use crate::core::types::{IVec3, Result};
use crate::host::VoxelHost;
use crate::math::{Orientation, Region};
use crate::snapshot::{ApplyReport, ApplyTask, CaptureOptions, CaptureTask, Placement, RegionSnapshot, VoxelData};
use crate::task::{weighted_progress, AsyncTask, Deadline, LockedRegion, TaskStatus};
use crate::voxel::VoxelMask;

const WRITE_WEIGHTS: [f32; 4] = [0.30, 0.55, 0.10, 0.05];

/// One reversible edit.
#[derive(Clone, Debug)]
pub struct UndoLayer {
    before: Arc<RegionSnapshot>,
    changed: VoxelMask,
    /// World position of index (0, 0, 0) of `before` and `changed`
    origin: IVec3,
    stamp: u64,
}

impl UndoLayer {
    /// Apply `snapshot` and return the layer that undoes it, synchronously.
    pub fn apply_with_undo(
        host: &mut dyn VoxelHost,
        snapshot: Arc<RegionSnapshot>,
        origin: IVec3,
        orientation: Orientation,
        stamp: u64,
        options: CaptureOptions,
    ) -> Result<(UndoLayer, ApplyReport)> {
        let mut task = LayerWriteTask::new(snapshot, origin, orientation, stamp, options)?;
        task.set_deadline(Deadline::Never);
        task.resume(host);
        let report = task.apply_report().clone();
        Ok((task.build_layer(), report))
    }

    pub fn stamp(&self) -> u64 {
        self.stamp
    }

    pub fn origin(&self) -> IVec3 {
        self.origin
    }

    pub fn changed(&self) -> &VoxelMask {
        &self.changed
    }

    pub fn before(&self) -> &RegionSnapshot {
        &self.before
    }

    /// World box covered by the layer.
    pub fn region(&self) -> Region {
        Region::from_origin_size(self.origin, self.changed.size())
    }

    /// True if reversing would restore nothing.
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty()
    }

    pub fn changes(&self, world: IVec3) -> bool {
        self.changed.test(world - self.origin)
    }

    /// Hand the before values of voxels a later layer also changed to the
    /// earliest such layer, and drop them from this one.
    ///
    /// `later` are the newer layers of the same environment, in stamp order.
    /// Returns the number of voxels handed over.
    pub fn migrate_into(&mut self, later: &mut [&mut UndoLayer]) -> usize {
        let mut migrated = 0;
        for index in self.changed.iter_set_indices().collect::<Vec<_>>() {
            let world = self.origin + self.changed.position_of(index);
            let Some(target) = later.iter_mut().find(|layer| layer.changes(world)) else {
                continue;
            };
            assert!(target.stamp > self.stamp, "later layer {} is not newer than {}", target.stamp, self.stamp);
            if let Some(data) = self.before.data_at(index) {
                target.adopt(world, data, self.origin);
                migrated += 1;
            }
            self.changed.set_index(index, false);
        }
        migrated
    }

    /// Start reversing this layer.
    ///
    /// Voxels a later layer also changed are migrated here and now (see
    /// [`UndoLayer::migrate_into`]); the returned task writes back only the
    /// voxels no later layer touched.
    pub fn reverse_task(&self, later: &mut [&mut UndoLayer]) -> Result<ApplyTask> {
        let mut rest = self.clone();
        let migrated = rest.migrate_into(later);
        let mut write_mask = rest.changed;
        write_mask.intersect_with(self.before.has_data())?;
        log::debug!(
            "reversing layer {}: {} voxels migrated, {} to restore",
            self.stamp,
            migrated,
            write_mask.count()
        );
        ApplyTask::new(self.before.clone(), Placement::at(self.origin), Some(write_mask))
    }

    /// Reverse synchronously.
    pub fn reverse(&self, host: &mut dyn VoxelHost, later: &mut [&mut UndoLayer]) -> Result<ApplyReport> {
        let mut task = self.reverse_task(later)?;
        Ok(task.run_to_completion(host))
    }

    /// Take over an earlier layer's before value for `world`.
    fn adopt(&mut self, world: IVec3, mut data: VoxelData, from_origin: IVec3) {
        let shift = (from_origin - self.origin).as_vec3();
        for entity in data.entities.iter_mut() {
            entity.position += shift;
        }
        Arc::make_mut(&mut self.before).replace_data(world - self.origin, data);
    }

    /// Give up the ability to undo this layer.
    ///
    /// Earlier layers can no longer restore past it, so its changed voxels are
    /// cleared from each of `preceding` (same environment, older stamps).
    pub fn make_permanent(&self, preceding: &mut [&mut UndoLayer]) {
        for layer in preceding.iter_mut() {
            assert!(layer.stamp < self.stamp, "preceding layer {} is not older than {}", layer.stamp, self.stamp);
            if !layer.region().intersects(&self.region()) {
                continue;
            }
            for p in self.changed.iter_set() {
                layer.changed.clear(self.origin + p - layer.origin);
            }
        }
    }

    /// Split off the voxels held by `locked` into their own layer.
    ///
    /// Both halves share the before picture and stamp. Returns `None` when no
    /// changed voxel is locked.
    pub fn split_off(&mut self, locked: &LockedRegion) -> Option<UndoLayer> {
        if !locked.region().intersects(&self.region()) {
            return None;
        }
        let mut held = self.changed.empty_like();
        for index in self.changed.iter_set_indices() {
            if locked.contains(self.origin + self.changed.position_of(index)) {
                held.set_index(index, true);
            }
        }
        if held.is_empty() {
            return None;
        }
        for index in held.iter_set_indices() {
            self.changed.set_index(index, false);
        }
        Some(UndoLayer {
            before: self.before.clone(),
            changed: held,
            origin: self.origin,
            stamp: self.stamp,
        })
    }
}

/// Where a layer write stands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LayerWriteStage {
    CaptureBefore,
    Apply,
    CaptureAfter,
    /// Drop border voxels whose data did not change
    Prune { cursor: usize },
    Complete,
    Aborted,
}

impl LayerWriteStage {
    fn index(self) -> usize {
        match self {
            LayerWriteStage::CaptureBefore => 0,
            LayerWriteStage::Apply => 1,
            LayerWriteStage::CaptureAfter => 2,
            LayerWriteStage::Prune { .. } => 3,
            LayerWriteStage::Complete | LayerWriteStage::Aborted => 4,
        }
    }
}

/// Resumable edit that records its own undo layer.
pub struct LayerWriteTask {
    stage: LayerWriteStage,
    deadline: Deadline,
    stamp: u64,
    origin: IVec3,
    options: CaptureOptions,
    changed: VoxelMask,
    border: VoxelMask,
    locked: LockedRegion,
    capture_before: CaptureTask,
    apply: ApplyTask,
    capture_after: CaptureTask,
    before: Option<RegionSnapshot>,
    after: Option<RegionSnapshot>,
}

impl LayerWriteTask {
    /// Prepare to apply `snapshot` at `origin` turned by `orientation`.
    pub fn new(
        snapshot: Arc<RegionSnapshot>,
        origin: IVec3,
        orientation: Orientation,
        stamp: u64,
        options: CaptureOptions,
    ) -> Result<Self> {
        let (write, displacement) = snapshot.has_data().reoriented_with_border(orientation, 1)?;
        let layer_origin = origin + displacement;
        let border = write.derive_border_mask();
        let mut changed = write;
        changed.union_with(&border)?;

        let capture_before = CaptureTask::new(changed.clone(), Placement::at(layer_origin), options)?;
        let apply = ApplyTask::new(snapshot, Placement::new(origin, orientation), None)?;
        let capture_after = CaptureTask::new(border.clone(), Placement::at(layer_origin), options)?;
        Ok(Self {
            stage: LayerWriteStage::CaptureBefore,
            deadline: Deadline::Immediate,
            stamp,
            origin: layer_origin,
            options,
            locked: LockedRegion::new(layer_origin, changed.clone()),
            changed,
            border,
            capture_before,
            apply,
            capture_after,
            before: None,
            after: None,
        })
    }

    pub fn stage(&self) -> LayerWriteStage {
        self.stage
    }

    pub fn stamp(&self) -> u64 {
        self.stamp
    }

    /// Counters from the apply stage.
    pub fn apply_report(&self) -> &ApplyReport {
        self.apply.report()
    }

    /// True once the before picture is complete.
    pub fn has_before(&self) -> bool {
        self.before.is_some()
    }

    /// The finished layer.
    ///
    /// An aborted write still yields a layer if its before picture was
    /// complete, so the partial edit can be undone.
    pub fn into_layer(self) -> Option<UndoLayer> {
        match self.stage {
            LayerWriteStage::Complete => Some(self.build_layer()),
            LayerWriteStage::Aborted if self.before.is_some() => Some(self.build_layer()),
            _ => None,
        }
    }

    fn build_layer(self) -> UndoLayer {
        let before = self
            .before
            .unwrap_or_else(|| RegionSnapshot::shaped_like(&self.changed, 0, self.options.sparse_fill_threshold));
        let mut changed = self.changed;
        // Voxels outside the vertical range hold no data and restore nothing
        for index in changed.iter_set_indices().collect::<Vec<_>>() {
            if !before.has_data().test_index(index) {
                changed.set_index(index, false);
            }
        }
        UndoLayer {
            before: Arc::new(before),
            changed,
            origin: self.origin,
            stamp: self.stamp,
        }
    }

    /// Run one sub-task against the current deadline.
    fn drive(task: &mut dyn AsyncTask, deadline: Deadline, host: &mut dyn VoxelHost) -> TaskStatus {
        task.set_deadline(deadline);
        task.resume(host)
    }

    fn prune_one(&mut self, index: usize) {
        let (Some(before), Some(after)) = (self.before.as_ref(), self.after.as_ref()) else {
            return;
        };
        if before.data_at(index) == after.data_at(index) {
            self.changed.set_index(index, false);
        }
    }
}

impl AsyncTask for LayerWriteTask {
    fn set_deadline(&mut self, deadline: Deadline) {
        self.deadline = deadline;
    }

    fn resume(&mut self, host: &mut dyn VoxelHost) -> TaskStatus {
        loop {
            let next = match self.stage {
                LayerWriteStage::CaptureBefore => match Self::drive(&mut self.capture_before, self.deadline, host) {
                    TaskStatus::Running => break,
                    TaskStatus::Complete => {
                        self.before = self.capture_before.take_snapshot();
                        LayerWriteStage::Apply
                    }
                    TaskStatus::Aborted => LayerWriteStage::Aborted,
                },
                LayerWriteStage::Apply => match Self::drive(&mut self.apply, self.deadline, host) {
                    TaskStatus::Running => break,
                    TaskStatus::Complete => LayerWriteStage::CaptureAfter,
                    TaskStatus::Aborted => LayerWriteStage::Aborted,
                },
                LayerWriteStage::CaptureAfter => match Self::drive(&mut self.capture_after, self.deadline, host) {
                    TaskStatus::Running => break,
                    TaskStatus::Complete => {
                        self.after = self.capture_after.take_snapshot();
                        LayerWriteStage::Prune { cursor: 0 }
                    }
                    TaskStatus::Aborted => LayerWriteStage::Aborted,
                },
                LayerWriteStage::Prune { cursor } => {
                    if self.deadline.expired() {
                        break;
                    }
                    match self.border.next_set_from(cursor) {
                        Some(index) => {
                            self.prune_one(index);
                            LayerWriteStage::Prune { cursor: index + 1 }
                        }
                        None => {
                            log::debug!(
                                "layer {} written: {} voxels changed",
                                self.stamp,
                                self.changed.count()
                            );
                            LayerWriteStage::Complete
                        }
                    }
                }
                LayerWriteStage::Complete | LayerWriteStage::Aborted => break,
            };
            self.stage = next;
        }
        self.status()
    }

    fn abort(&mut self) {
        match self.stage {
            LayerWriteStage::CaptureBefore => self.capture_before.abort(),
            LayerWriteStage::Apply => self.apply.abort(),
            LayerWriteStage::CaptureAfter => self.capture_after.abort(),
            LayerWriteStage::Prune { .. } => {}
            LayerWriteStage::Complete | LayerWriteStage::Aborted => return,
        }
        log::debug!("layer write {} aborted in stage {}", self.stamp, self.stage.index());
        self.stage = LayerWriteStage::Aborted;
    }

    fn status(&self) -> TaskStatus {
        match self.stage {
            LayerWriteStage::Complete => TaskStatus::Complete,
            LayerWriteStage::Aborted => TaskStatus::Aborted,
            _ => TaskStatus::Running,
        }
    }

    fn progress(&self) -> f32 {
        let within = match self.stage {
            LayerWriteStage::CaptureBefore => self.capture_before.progress(),
            LayerWriteStage::Apply => self.apply.progress(),
            LayerWriteStage::CaptureAfter => self.capture_after.progress(),
            LayerWriteStage::Prune { cursor } => {
                let done = self.border.iter_set_indices().take_while(|&i| i < cursor).count();
                crate::task::fraction(done, self.border.count())
            }
            LayerWriteStage::Complete | LayerWriteStage::Aborted => 1.0,
        };
        weighted_progress(&WRITE_WEIGHTS, self.stage.index(), within)
    }

    fn locked_region(&self) -> Option<&LockedRegion> {
        match self.stage {
            LayerWriteStage::Complete | LayerWriteStage::Aborted => None,
            _ => Some(&self.locked),
        }
    }
}
