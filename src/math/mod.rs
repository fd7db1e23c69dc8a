//! Grid math: voxel boxes, entity boxes and orientations

pub mod aabb;
pub mod region;
pub mod orientation;

pub use aabb::Aabb;
pub use region::{Region, chunk_column_of};
pub use orientation::Orientation;
