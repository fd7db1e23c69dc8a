//! Capabilities the engine needs from a live voxel environment.
//!
//! Hosts supply one adapter implementing [`VoxelHost`]; the engine never
//! touches concrete world types.

pub mod memory;

use crate::core::types::IVec3;
use crate::math::Aabb;
use crate::voxel::{EntityRecord, ScheduledEvent, VoxelRecord};

pub use memory::MemoryWorld;

/// Opaque handle to a live entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(pub u64);

/// Read/write access to one environment.
pub trait VoxelHost {
    /// Valid vertical range, `min` inclusive and `max` exclusive.
    fn vertical_range(&self) -> (i32, i32);

    fn read_voxel(&self, pos: IVec3) -> VoxelRecord;

    /// Returns false when the host refuses the write.
    fn write_voxel(&mut self, pos: IVec3, record: &VoxelRecord) -> bool;

    fn entities_in_bounds(&self, bounds: &Aabb) -> Vec<(EntityId, EntityRecord)>;

    fn remove_entity(&mut self, id: EntityId);

    fn spawn_entity(&mut self, record: &EntityRecord) -> Option<EntityId>;

    fn schedule_event(&mut self, pos: IVec3, event: &ScheduledEvent);

    fn pending_event(&self, pos: IVec3) -> Option<ScheduledEvent>;

    /// Longest delay the host accepts for a scheduled event.
    fn max_event_delay(&self) -> i64;

    /// Rebuild height map and sky light for the column at `(x, z)`.
    fn recompute_column_lighting(&mut self, x: i32, z: i32);

    fn notify_neighbors(&mut self, pos: IVec3);

    /// Flag the chunk column `(cx, cz)` for resending to participants.
    fn mark_dirty_for_replication(&mut self, cx: i32, cz: i32);

    fn in_vertical_range(&self, y: i32) -> bool {
        let (lo, hi) = self.vertical_range();
        y >= lo && y < hi
    }
}
