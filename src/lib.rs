//! voxundo - Resumable region capture/apply with layered undo for shared
//! voxel worlds

pub mod core;
pub mod math;
pub mod voxel;
pub mod host;
pub mod task;
pub mod snapshot;
pub mod history;
