//! Per-voxel and per-entity data carried by snapshots

use serde::{Deserialize, Serialize};

use crate::core::types::{IVec3, Vec3};
use crate::math::Orientation;

/// Direction a block or entity faces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Facing {
    North,
    South,
    West,
    East,
    Up,
    Down,
}

impl Facing {
    /// Unit grid vector (north is -Z, east is +X).
    pub fn dir(self) -> IVec3 {
        match self {
            Facing::North => IVec3::NEG_Z,
            Facing::South => IVec3::Z,
            Facing::West => IVec3::NEG_X,
            Facing::East => IVec3::X,
            Facing::Up => IVec3::Y,
            Facing::Down => IVec3::NEG_Y,
        }
    }

    pub fn from_dir(dir: IVec3) -> Option<Facing> {
        [Facing::North, Facing::South, Facing::West, Facing::East, Facing::Up, Facing::Down]
            .into_iter()
            .find(|f| f.dir() == dir)
    }

    pub fn is_horizontal(self) -> bool {
        !matches!(self, Facing::Up | Facing::Down)
    }

    pub fn reoriented(self, orientation: Orientation) -> Facing {
        Facing::from_dir(orientation.apply_offset(self.dir())).unwrap_or(self)
    }

    /// Direction along which a wide object extends from its anchor, seen
    /// from the front: one quarter turn from the facing.
    pub fn tangent(self) -> IVec3 {
        Orientation::new(1, false).apply_offset(self.dir())
    }
}

/// Variable data attached to a block (container contents, sign text, ...).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    /// Orientation-sensitive field rewritten when the block is reoriented
    pub facing: Option<Facing>,
    /// Opaque host data
    pub data: Vec<u8>,
}

/// Everything stored for one voxel of a snapshot.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoxelRecord {
    /// Block type code (0 is empty)
    pub type_code: u16,
    /// Variant / metadata code
    pub variant: u8,
    /// Optional block payload
    pub payload: Option<Payload>,
    /// Packed light byte
    pub light: u8,
}

impl VoxelRecord {
    /// Empty voxel
    pub const AIR: VoxelRecord = VoxelRecord {
        type_code: 0,
        variant: 0,
        payload: None,
        light: 0,
    };

    pub fn new(type_code: u16, variant: u8) -> Self {
        Self {
            type_code,
            variant,
            payload: None,
            light: 0,
        }
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_light(mut self, light: u8) -> Self {
        self.light = light;
        self
    }

    /// Copy with orientation-sensitive payload fields transformed.
    pub fn reoriented(&self, orientation: Orientation) -> VoxelRecord {
        let mut out = self.clone();
        if let Some(payload) = out.payload.as_mut() {
            payload.facing = payload.facing.map(|f| f.reoriented(orientation));
        }
        out
    }
}

/// A pending block update captured with its remaining delay.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledEvent {
    pub type_code: u16,
    /// Ticks until the event fires
    pub delay: i64,
    pub priority: i32,
}

/// A point entity as seen by the snapshot engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub kind: u16,
    /// Position; the containing voxel is `position.floor()`
    pub position: Vec3,
    /// Degrees from +Z toward +X
    pub yaw: f32,
    /// Wall-mounted objects record the direction they face
    pub facing: Option<Facing>,
    /// Voxels covered along the facing's tangent (1 for ordinary entities)
    pub span: u8,
    pub payload: Vec<u8>,
}

impl EntityRecord {
    pub fn new(kind: u16, position: Vec3) -> Self {
        Self {
            kind,
            position,
            yaw: 0.0,
            facing: None,
            span: 1,
            payload: Vec::new(),
        }
    }

    /// Containing voxel.
    pub fn voxel(&self) -> IVec3 {
        self.position.floor().as_ivec3()
    }

    /// Copy placed at `position` with yaw and facing reoriented.
    ///
    /// Mirroring reverses the direction a wide object extends from its
    /// anchor, so the anchor moves to the far end to keep covering the
    /// mirrored voxels.
    pub fn reoriented(&self, orientation: Orientation, position: Vec3) -> EntityRecord {
        let mut out = self.clone();
        out.position = position;
        out.yaw = orientation.transform_yaw(self.yaw);
        out.facing = self.facing.map(|f| f.reoriented(orientation));
        if let Some(facing) = out.facing {
            if orientation.is_mirrored() && self.span > 1 && facing.is_horizontal() {
                let shift = facing.tangent().as_vec3() * (self.span - 1) as f32;
                out.position -= shift;
            }
        }
        out
    }

    /// Total order used to make entity lists deterministic.
    pub fn sort_key_cmp(&self, other: &EntityRecord) -> std::cmp::Ordering {
        self.kind
            .cmp(&other.kind)
            .then(self.position.x.total_cmp(&other.position.x))
            .then(self.position.y.total_cmp(&other.position.y))
            .then(self.position.z.total_cmp(&other.position.z))
            .then(self.yaw.total_cmp(&other.yaw))
            .then_with(|| self.payload.cmp(&other.payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_facing_rotation() {
        let quarter = Orientation::new(1, false);
        // (x, z) -> (-z, x): north (0, -1) becomes east (1, 0)
        assert_eq!(Facing::North.reoriented(quarter), Facing::East);
        assert_eq!(Facing::Up.reoriented(quarter), Facing::Up);
    }

    #[test]
    fn test_facing_mirror() {
        let mirror = Orientation::new(0, true);
        assert_eq!(Facing::East.reoriented(mirror), Facing::West);
        assert_eq!(Facing::North.reoriented(mirror), Facing::North);
    }

    #[test]
    fn test_payload_facing_reoriented() {
        let record = VoxelRecord::new(54, 2).with_payload(Payload {
            facing: Some(Facing::South),
            data: vec![1, 2, 3],
        });
        let turned = record.reoriented(Orientation::new(2, false));
        assert_eq!(turned.payload.unwrap().facing, Some(Facing::North));
        assert_eq!(turned.type_code, 54);
    }

    #[test]
    fn test_wide_entity_anchor_shift_on_mirror() {
        let mut painting = EntityRecord::new(9, Vec3::new(0.5, 1.5, 0.5));
        painting.facing = Some(Facing::South);
        painting.span = 3;

        // Mirrored across X it still faces south, but the covered voxels now
        // run the other way from the mirrored anchor.
        let mirrored = painting.reoriented(Orientation::new(0, true), Vec3::new(-0.5, 1.5, 0.5));
        assert_eq!(mirrored.facing, Some(Facing::South));
        let tangent = Facing::South.tangent().as_vec3();
        assert_eq!(mirrored.position, Vec3::new(-0.5, 1.5, 0.5) - tangent * 2.0);

        let rotated = painting.reoriented(Orientation::new(1, false), Vec3::new(0.5, 1.5, 0.5));
        assert_eq!(rotated.position, Vec3::new(0.5, 1.5, 0.5));
    }

    #[test]
    fn test_entity_voxel_floor() {
        let e = EntityRecord::new(1, Vec3::new(-0.25, 2.0, 3.99));
        assert_eq!(e.voxel(), IVec3::new(-1, 2, 3));
    }
}
