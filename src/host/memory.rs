//! In-memory reference host.
//!
//! Backs the engine tests and the demo driver. Voxels and pending events live
//! in hash maps; entities live in a `hecs::World` so handles behave like a
//! real engine's (ids are recycled with a new generation after despawn).

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::core::types::IVec3;
use crate::host::{EntityId, VoxelHost};
use crate::math::Aabb;
use crate::voxel::{EntityRecord, ScheduledEvent, VoxelRecord};

/// Comparable dump of a world's state.
#[derive(Clone, Debug, PartialEq)]
pub struct WorldContent {
    pub voxels: HashMap<IVec3, VoxelRecord>,
    pub events: HashMap<IVec3, ScheduledEvent>,
    /// Sorted with `EntityRecord::sort_key_cmp`
    pub entities: Vec<EntityRecord>,
}

/// Hash-map voxel world with hook counters.
pub struct MemoryWorld {
    voxels: HashMap<IVec3, VoxelRecord>,
    events: HashMap<IVec3, ScheduledEvent>,
    entities: hecs::World,
    vertical_range: (i32, i32),
    max_event_delay: i64,
    /// Types whose writes are refused (simulates unplaceable blocks)
    refused_types: HashSet<u16>,
    lit_columns: BTreeSet<(i32, i32)>,
    dirty_columns: BTreeSet<(i32, i32)>,
    notifications: usize,
    writes: usize,
}

impl Default for MemoryWorld {
    fn default() -> Self {
        Self::new((0, 256))
    }
}

impl MemoryWorld {
    /// Create an empty world with the given vertical range (`max` exclusive).
    pub fn new(vertical_range: (i32, i32)) -> Self {
        Self {
            voxels: HashMap::new(),
            events: HashMap::new(),
            entities: hecs::World::new(),
            vertical_range,
            max_event_delay: 1_000_000,
            refused_types: HashSet::new(),
            lit_columns: BTreeSet::new(),
            dirty_columns: BTreeSet::new(),
            notifications: 0,
            writes: 0,
        }
    }

    pub fn with_max_event_delay(mut self, max: i64) -> Self {
        self.max_event_delay = max;
        self
    }

    /// Refuse all future writes of `type_code`.
    pub fn refuse_type(&mut self, type_code: u16) {
        self.refused_types.insert(type_code);
    }

    /// Set a voxel directly, bypassing hooks and refusal.
    pub fn set_voxel(&mut self, pos: IVec3, record: VoxelRecord) {
        if record == VoxelRecord::AIR {
            self.voxels.remove(&pos);
        } else {
            self.voxels.insert(pos, record);
        }
    }

    pub fn voxel(&self, pos: IVec3) -> VoxelRecord {
        self.voxels.get(&pos).cloned().unwrap_or(VoxelRecord::AIR)
    }

    /// Spawn an entity directly.
    pub fn add_entity(&mut self, record: EntityRecord) -> EntityId {
        EntityId(self.entities.spawn((record,)).to_bits().get())
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len() as usize
    }

    pub fn set_pending_event(&mut self, pos: IVec3, event: ScheduledEvent) {
        self.events.insert(pos, event);
    }

    /// Columns whose lighting was recomputed, in order.
    pub fn lit_columns(&self) -> &BTreeSet<(i32, i32)> {
        &self.lit_columns
    }

    pub fn dirty_columns(&self) -> &BTreeSet<(i32, i32)> {
        &self.dirty_columns
    }

    pub fn notification_count(&self) -> usize {
        self.notifications
    }

    /// Successful voxel writes so far.
    pub fn write_count(&self) -> usize {
        self.writes
    }

    pub fn content(&self) -> WorldContent {
        let mut entities: Vec<EntityRecord> = self
            .entities
            .query::<&EntityRecord>()
            .iter()
            .map(|(_, record)| record.clone())
            .collect();
        entities.sort_by(|a, b| a.sort_key_cmp(b));
        WorldContent {
            voxels: self.voxels.clone(),
            events: self.events.clone(),
            entities,
        }
    }
}

impl VoxelHost for MemoryWorld {
    fn vertical_range(&self) -> (i32, i32) {
        self.vertical_range
    }

    fn read_voxel(&self, pos: IVec3) -> VoxelRecord {
        self.voxel(pos)
    }

    fn write_voxel(&mut self, pos: IVec3, record: &VoxelRecord) -> bool {
        if !self.in_vertical_range(pos.y) || self.refused_types.contains(&record.type_code) {
            return false;
        }
        // Replacing a block cancels its pending tick
        self.events.remove(&pos);
        self.set_voxel(pos, record.clone());
        self.writes += 1;
        true
    }

    fn entities_in_bounds(&self, bounds: &Aabb) -> Vec<(EntityId, EntityRecord)> {
        let mut found: Vec<(EntityId, EntityRecord)> = self
            .entities
            .query::<&EntityRecord>()
            .iter()
            .filter(|(_, record)| bounds.contains_point(record.position))
            .map(|(entity, record)| (EntityId(entity.to_bits().get()), record.clone()))
            .collect();
        found.sort_by_key(|(id, _)| *id);
        found
    }

    fn remove_entity(&mut self, id: EntityId) {
        if let Some(entity) = hecs::Entity::from_bits(id.0) {
            if self.entities.despawn(entity).is_err() {
                log::debug!("remove_entity: {:?} already gone", id);
            }
        }
    }

    fn spawn_entity(&mut self, record: &EntityRecord) -> Option<EntityId> {
        Some(self.add_entity(record.clone()))
    }

    fn schedule_event(&mut self, pos: IVec3, event: &ScheduledEvent) {
        self.events.insert(pos, *event);
    }

    fn pending_event(&self, pos: IVec3) -> Option<ScheduledEvent> {
        self.events.get(&pos).copied()
    }

    fn max_event_delay(&self) -> i64 {
        self.max_event_delay
    }

    fn recompute_column_lighting(&mut self, x: i32, z: i32) {
        self.lit_columns.insert((x, z));
    }

    fn notify_neighbors(&mut self, _pos: IVec3) {
        self.notifications += 1;
    }

    fn mark_dirty_for_replication(&mut self, cx: i32, cz: i32) {
        self.dirty_columns.insert((cx, cz));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Vec3;

    #[test]
    fn test_write_respects_range_and_refusal() {
        let mut world = MemoryWorld::new((0, 8));
        assert!(world.write_voxel(IVec3::new(0, 7, 0), &VoxelRecord::new(1, 0)));
        assert!(!world.write_voxel(IVec3::new(0, 8, 0), &VoxelRecord::new(1, 0)));

        world.refuse_type(5);
        assert!(!world.write_voxel(IVec3::ZERO, &VoxelRecord::new(5, 0)));
        assert_eq!(world.write_count(), 1);
    }

    #[test]
    fn test_air_is_not_stored() {
        let mut world = MemoryWorld::default();
        world.set_voxel(IVec3::ONE, VoxelRecord::new(3, 1));
        world.set_voxel(IVec3::ONE, VoxelRecord::AIR);
        assert!(world.content().voxels.is_empty());
    }

    #[test]
    fn test_entity_lifecycle() {
        let mut world = MemoryWorld::default();
        let id = world.add_entity(EntityRecord::new(7, Vec3::new(1.5, 1.0, 1.5)));
        world.add_entity(EntityRecord::new(7, Vec3::new(9.5, 1.0, 1.5)));

        let bounds = Aabb::new(Vec3::ZERO, Vec3::splat(4.0));
        let found = world.entities_in_bounds(&bounds);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].0, id);

        world.remove_entity(id);
        world.remove_entity(id);
        assert_eq!(world.entity_count(), 1);
    }
}
