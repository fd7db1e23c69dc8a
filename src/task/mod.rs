//! Cooperative, interruptible tasks.
//!
//! A task advances one unit of work per step and checks its deadline before
//! every step. Returning `Running` leaves the cursor in place; the owner calls
//! `resume` again on a later tick. Nothing runs in the background.

use std::time::{Duration, Instant};

use crate::core::types::IVec3;
use crate::host::VoxelHost;
use crate::math::Region;
use crate::voxel::VoxelMask;

/// When a resumed task must hand control back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Deadline {
    /// Process nothing; useful for peeking at state
    Immediate,
    /// Run to completion in one call
    Never,
    /// Stop once this instant has passed
    At(Instant),
}

impl Deadline {
    /// Deadline `budget` from now.
    pub fn after(budget: Duration) -> Self {
        Deadline::At(Instant::now() + budget)
    }

    pub fn expired(&self) -> bool {
        match self {
            Deadline::Immediate => true,
            Deadline::Never => false,
            Deadline::At(t) => Instant::now() >= *t,
        }
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Deadline::Immediate
    }
}

/// Where a task stands after `resume`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskStatus {
    Running,
    Complete,
    Aborted,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TaskStatus::Running)
    }
}

/// World-space voxels a task currently holds.
#[derive(Clone, Debug, PartialEq)]
pub struct LockedRegion {
    /// World position of the mask's index origin
    pub origin: IVec3,
    pub mask: VoxelMask,
}

impl LockedRegion {
    pub fn new(origin: IVec3, mask: VoxelMask) -> Self {
        Self { origin, mask }
    }

    pub fn region(&self) -> Region {
        Region::from_origin_size(self.origin, self.mask.size())
    }

    pub fn contains(&self, world: IVec3) -> bool {
        self.mask.test(world - self.origin)
    }

    /// True if any set voxel of `mask` placed at `origin` is held here.
    pub fn overlaps(&self, origin: IVec3, mask: &VoxelMask) -> bool {
        let other = Region::from_origin_size(origin, mask.size());
        if !self.region().intersects(&other) {
            return false;
        }
        mask.iter_set().any(|p| self.contains(origin + p))
    }
}

/// A resumable unit of engine work.
pub trait AsyncTask {
    fn set_deadline(&mut self, deadline: Deadline);

    /// Continue until finished or the deadline passes. A no-op once terminal.
    fn resume(&mut self, host: &mut dyn VoxelHost) -> TaskStatus;

    /// Stop for good. Writes already made stay in the world.
    fn abort(&mut self);

    fn status(&self) -> TaskStatus;

    /// Fraction done, 0.0 to 1.0.
    fn progress(&self) -> f32;

    /// Voxels held until the task finishes; `None` once complete or aborted.
    fn locked_region(&self) -> Option<&LockedRegion>;
}

/// Overall progress given per-stage weights, the current stage and the
/// fraction of it already done.
pub fn weighted_progress(weights: &[f32], stage: usize, fraction: f32) -> f32 {
    let total: f32 = weights.iter().sum();
    if total <= 0.0 {
        return 0.0;
    }
    let done: f32 = weights.iter().take(stage).sum();
    let current = weights.get(stage).copied().unwrap_or(0.0) * fraction.clamp(0.0, 1.0);
    ((done + current) / total).clamp(0.0, 1.0)
}

/// Fraction of `total` units done, treating an empty stage as finished.
pub fn fraction(done: usize, total: usize) -> f32 {
    if total == 0 { 1.0 } else { done as f32 / total as f32 }
}
