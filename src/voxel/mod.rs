//! Voxel data structures: selection masks and captured records

pub mod mask;
pub mod record;

pub use mask::{Axis, VoxelMask, MAX_MASK_DIMENSION};
pub use record::{EntityRecord, Facing, Payload, ScheduledEvent, VoxelRecord};
