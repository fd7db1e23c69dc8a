//! Resumable snapshot application.
//!
//! Applying runs in fixed stages: clear the entities standing in the target,
//! write voxels, then the side effects (lighting, neighbour updates,
//! replication), then respawn entities and reschedule events. Each stage
//! keeps its own cursor so a tick can stop anywhere.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::core::error::Error;
use crate::core::types::{IVec3, Result};
use crate::host::{EntityId, VoxelHost};
use crate::math::{chunk_column_of, Aabb};
use crate::snapshot::{Placement, RegionSnapshot};
use crate::task::{fraction, weighted_progress, AsyncTask, Deadline, LockedRegion, TaskStatus};
use crate::voxel::{EntityRecord, ScheduledEvent, VoxelMask};

const STAGE_WEIGHTS: [f32; 7] = [0.05, 0.60, 0.10, 0.10, 0.02, 0.08, 0.05];

/// Apply state: stage plus the cursor within it.
#[derive(Clone, Debug, PartialEq)]
pub enum ApplyStage {
    /// Entities in the target are listed on the first step, then removed
    RemoveEntities { found: Option<Vec<EntityId>>, cursor: usize },
    /// `cursor` is the next write-mask index to examine
    WriteVoxels { cursor: usize, visited: usize },
    RelightColumns { columns: Vec<(i32, i32)>, cursor: usize },
    NotifyNeighbours { cursor: usize },
    MarkDirty { chunks: Vec<(i32, i32)>, cursor: usize },
    /// World-frame entity records are built on the first step
    SpawnEntities { pending: Option<Vec<EntityRecord>>, cursor: usize },
    ScheduleEvents { cursor: usize },
    Complete,
    Aborted,
}

impl ApplyStage {
    fn index(&self) -> usize {
        match self {
            ApplyStage::RemoveEntities { .. } => 0,
            ApplyStage::WriteVoxels { .. } => 1,
            ApplyStage::RelightColumns { .. } => 2,
            ApplyStage::NotifyNeighbours { .. } => 3,
            ApplyStage::MarkDirty { .. } => 4,
            ApplyStage::SpawnEntities { .. } => 5,
            ApplyStage::ScheduleEvents { .. } => 6,
            ApplyStage::Complete | ApplyStage::Aborted => 7,
        }
    }
}

/// What an apply did to the world.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ApplyReport {
    pub written: usize,
    /// Voxels outside the host's vertical range
    pub skipped: usize,
    /// World positions the host refused to write
    pub failed: Vec<IVec3>,
    pub entities_removed: usize,
    pub entities_spawned: usize,
    pub events_scheduled: usize,
}

/// Writes a snapshot's data into the world at a placement.
pub struct ApplyTask {
    snapshot: Arc<RegionSnapshot>,
    placement: Placement,
    write_mask: VoxelMask,
    selected: usize,
    locked: LockedRegion,
    stage: ApplyStage,
    deadline: Deadline,
    /// Successfully written world positions, in write order
    written: Vec<IVec3>,
    touched_columns: BTreeSet<(i32, i32)>,
    events: Vec<(IVec3, ScheduledEvent)>,
    report: ApplyReport,
}

impl ApplyTask {
    /// Apply `snapshot` at `placement`, limited to `write_mask` (local frame)
    /// when given. The mask must select only voxels the snapshot has data for.
    pub fn new(snapshot: Arc<RegionSnapshot>, placement: Placement, write_mask: Option<VoxelMask>) -> Result<Self> {
        let write_mask = match write_mask {
            Some(mask) => {
                if !snapshot.has_data().contains_all(&mask)? {
                    return Err(Error::MaskNotSubset);
                }
                mask
            }
            None => snapshot.has_data().clone(),
        };
        let (world_mask, displacement) = write_mask.reoriented_with_border(placement.orientation, 0)?;
        let locked = LockedRegion::new(placement.origin + displacement, world_mask);
        Ok(Self {
            selected: write_mask.count(),
            snapshot,
            placement,
            write_mask,
            locked,
            stage: ApplyStage::RemoveEntities { found: None, cursor: 0 },
            deadline: Deadline::Immediate,
            written: Vec::new(),
            touched_columns: BTreeSet::new(),
            events: Vec::new(),
            report: ApplyReport::default(),
        })
    }

    pub fn stage(&self) -> &ApplyStage {
        &self.stage
    }

    pub fn snapshot(&self) -> &Arc<RegionSnapshot> {
        &self.snapshot
    }

    pub fn placement(&self) -> Placement {
        self.placement
    }

    pub fn write_mask(&self) -> &VoxelMask {
        &self.write_mask
    }

    /// Counters so far; final once complete.
    pub fn report(&self) -> &ApplyReport {
        &self.report
    }

    /// Run with no deadline and return the report.
    pub fn run_to_completion(&mut self, host: &mut dyn VoxelHost) -> ApplyReport {
        self.set_deadline(Deadline::Never);
        self.resume(host);
        self.report.clone()
    }

    /// One unit of work.
    fn step(&mut self, host: &mut dyn VoxelHost) {
        let stage = std::mem::replace(&mut self.stage, ApplyStage::Aborted);
        self.stage = match stage {
            ApplyStage::RemoveEntities { found: None, .. } => {
                let bounds = Aabb::from_region(&self.locked.region());
                let found: Vec<EntityId> = host
                    .entities_in_bounds(&bounds)
                    .into_iter()
                    .filter(|(_, record)| self.locked.contains(record.voxel()))
                    .map(|(id, _)| id)
                    .collect();
                ApplyStage::RemoveEntities { found: Some(found), cursor: 0 }
            }
            ApplyStage::RemoveEntities { found: Some(found), cursor } => match found.get(cursor) {
                Some(id) => {
                    host.remove_entity(*id);
                    self.report.entities_removed += 1;
                    ApplyStage::RemoveEntities { found: Some(found), cursor: cursor + 1 }
                }
                None => ApplyStage::WriteVoxels { cursor: 0, visited: 0 },
            },
            ApplyStage::WriteVoxels { cursor, visited } => match self.write_mask.next_set_from(cursor) {
                Some(index) => {
                    self.write_voxel(host, index);
                    ApplyStage::WriteVoxels { cursor: index + 1, visited: visited + 1 }
                }
                None => ApplyStage::RelightColumns {
                    columns: self.touched_columns.iter().copied().collect(),
                    cursor: 0,
                },
            },
            ApplyStage::RelightColumns { columns, cursor } => match columns.get(cursor) {
                Some(&(x, z)) => {
                    host.recompute_column_lighting(x, z);
                    ApplyStage::RelightColumns { columns, cursor: cursor + 1 }
                }
                None => ApplyStage::NotifyNeighbours { cursor: 0 },
            },
            ApplyStage::NotifyNeighbours { cursor } => match self.written.get(cursor) {
                Some(&pos) => {
                    host.notify_neighbors(pos);
                    ApplyStage::NotifyNeighbours { cursor: cursor + 1 }
                }
                None => {
                    let chunks: BTreeSet<(i32, i32)> = self.written.iter().map(|p| chunk_column_of(*p)).collect();
                    ApplyStage::MarkDirty { chunks: chunks.into_iter().collect(), cursor: 0 }
                }
            },
            ApplyStage::MarkDirty { chunks, cursor } => match chunks.get(cursor) {
                Some(&(cx, cz)) => {
                    host.mark_dirty_for_replication(cx, cz);
                    ApplyStage::MarkDirty { chunks, cursor: cursor + 1 }
                }
                None => ApplyStage::SpawnEntities { pending: None, cursor: 0 },
            },
            ApplyStage::SpawnEntities { pending: None, .. } => ApplyStage::SpawnEntities {
                pending: Some(self.world_entities()),
                cursor: 0,
            },
            ApplyStage::SpawnEntities { pending: Some(pending), cursor } => match pending.get(cursor) {
                Some(entity) => {
                    if host.spawn_entity(entity).is_some() {
                        self.report.entities_spawned += 1;
                    } else {
                        log::warn!("host refused to spawn entity kind {} at {:?}", entity.kind, entity.position);
                    }
                    ApplyStage::SpawnEntities { pending: Some(pending), cursor: cursor + 1 }
                }
                None => ApplyStage::ScheduleEvents { cursor: 0 },
            },
            ApplyStage::ScheduleEvents { cursor } => match self.events.get(cursor) {
                Some(&(pos, event)) => {
                    let mut event = event;
                    event.delay = event.delay.clamp(0, host.max_event_delay().max(0));
                    host.schedule_event(pos, &event);
                    self.report.events_scheduled += 1;
                    ApplyStage::ScheduleEvents { cursor: cursor + 1 }
                }
                None => {
                    log::debug!(
                        "apply complete: {} written, {} skipped, {} failed",
                        self.report.written,
                        self.report.skipped,
                        self.report.failed.len()
                    );
                    ApplyStage::Complete
                }
            },
            terminal => terminal,
        };
    }

    fn write_voxel(&mut self, host: &mut dyn VoxelHost, index: usize) {
        let world = self.placement.world_of(self.write_mask.position_of(index));
        if !host.in_vertical_range(world.y) {
            self.report.skipped += 1;
            return;
        }
        let Some(record) = self.snapshot.voxel_at(index) else {
            return;
        };
        let record = record.reoriented(self.placement.orientation);
        if host.write_voxel(world, &record) {
            self.report.written += 1;
            self.written.push(world);
            self.touched_columns.insert((world.x, world.z));
            if let Some(event) = self.snapshot.event_at(index) {
                self.events.push((world, event));
            }
        } else {
            log::warn!("host refused write of type {} at {:?}", record.type_code, world);
            self.report.failed.push(world);
        }
    }

    /// Snapshot entities under the write mask, moved into the world frame.
    fn world_entities(&self) -> Vec<EntityRecord> {
        let orientation = self.placement.orientation;
        self.snapshot
            .entities()
            .filter(|(index, _)| self.write_mask.test_index(*index))
            .map(|(_, e)| e.reoriented(orientation, self.placement.world_point(e.position)))
            .collect()
    }
}

impl AsyncTask for ApplyTask {
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
            log::debug!(
                "apply aborted in stage {} after {} writes",
                self.stage.index(),
                self.report.written
            );
            self.stage = ApplyStage::Aborted;
        }
    }

    fn status(&self) -> TaskStatus {
        match self.stage {
            ApplyStage::Complete => TaskStatus::Complete,
            ApplyStage::Aborted => TaskStatus::Aborted,
            _ => TaskStatus::Running,
        }
    }

    fn progress(&self) -> f32 {
        let within = match &self.stage {
            ApplyStage::RemoveEntities { found, cursor } => {
                found.as_ref().map_or(0.0, |f| fraction(*cursor, f.len()))
            }
            ApplyStage::WriteVoxels { visited, .. } => fraction(*visited, self.selected),
            ApplyStage::RelightColumns { columns, cursor } => fraction(*cursor, columns.len()),
            ApplyStage::NotifyNeighbours { cursor } => fraction(*cursor, self.written.len()),
            ApplyStage::MarkDirty { chunks, cursor } => fraction(*cursor, chunks.len()),
            ApplyStage::SpawnEntities { pending, cursor } => {
                pending.as_ref().map_or(0.0, |p| fraction(*cursor, p.len()))
            }
            ApplyStage::ScheduleEvents { cursor } => fraction(*cursor, self.events.len()),
            ApplyStage::Complete | ApplyStage::Aborted => 1.0,
        };
        weighted_progress(&STAGE_WEIGHTS, self.stage.index(), within)
    }

    fn locked_region(&self) -> Option<&LockedRegion> {
        match self.stage {
            ApplyStage::Complete | ApplyStage::Aborted => None,
            _ => Some(&self.locked),
        }
    }
}
