//! The history manager: undo pools, the in-flight complex task and eviction.
//!
//! Two pools hold undo entries. The complex pool is fed by resumable region
//! operations, of which at most one runs at a time across all environments.
//! The simple pool holds instant edits, capped per actor. Simple work that
//! collides with the in-flight task's locked region is split, and the locked
//! part is queued until that task finishes.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use serde::Serialize;

use crate::core::config::HistoryConfig;
use crate::core::error::{Error, Rejection};
use crate::core::types::{IVec3, Result};
use crate::history::layer::{LayerWriteTask, UndoLayer};
use crate::history::pool::{ActorId, EnvironmentId, HandleRegistry, PoolEntry, TransactionId};
use crate::history::simple::SimpleEdit;
use crate::host::VoxelHost;
use crate::math::Orientation;
use crate::snapshot::{ApplyReport, ApplyTask, RegionSnapshot};
use crate::task::{AsyncTask, Deadline, LockedRegion, TaskStatus};

/// What a complex task does.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum OperationKind {
    Write,
    Undo,
}

/// Which pool an entry lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum PoolKind {
    Complex,
    Simple,
}

/// Identifies an accepted complex operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct TaskTicket {
    pub kind: OperationKind,
    pub actor: ActorId,
    pub environment: EnvironmentId,
    pub transaction: TransactionId,
}

/// Result of one tick.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TickOutcome {
    /// No complex task for this environment
    Idle,
    Running { progress: f32 },
    Completed(TaskTicket),
    Aborted(TaskTicket),
}

/// Result of a simple write.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SimpleOutcome {
    /// Voxels written now
    pub applied: usize,
    /// Placements queued behind the in-flight task
    pub deferred: usize,
    /// Positions the host refused
    pub failed: Vec<IVec3>,
}

/// Status exposed to the command layer.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HistoryStatus {
    pub busy: bool,
    pub operation: Option<OperationKind>,
    /// 0 to 100
    pub percent: f32,
    pub actor: Option<ActorId>,
    pub transaction: Option<TransactionId>,
    pub complex_entries: usize,
    pub simple_entries: usize,
    pub deferred: usize,
}

/// Summary of one pool entry.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EntrySummary {
    pub pool: PoolKind,
    pub stamp: u64,
    pub actor: ActorId,
    pub environment: EnvironmentId,
    pub transaction: TransactionId,
    pub changed_voxels: usize,
    pub undo_commenced: bool,
}

enum Work {
    Write(Box<LayerWriteTask>),
    /// Reversal of the complex entry with this stamp
    Undo { stamp: u64, task: ApplyTask },
}

struct InFlight {
    ticket: TaskTicket,
    work: Work,
}

impl InFlight {
    fn task(&self) -> &dyn AsyncTask {
        match &self.work {
            Work::Write(task) => &**task,
            Work::Undo { task, .. } => task,
        }
    }

    fn task_mut(&mut self) -> &mut dyn AsyncTask {
        match &mut self.work {
            Work::Write(task) => &mut **task,
            Work::Undo { task, .. } => task,
        }
    }
}

/// Simple work waiting for the in-flight task.
enum Deferred {
    Write { actor: ActorId, environment: EnvironmentId, edit: SimpleEdit },
    Undo { environment: EnvironmentId, layer: UndoLayer },
}

impl Deferred {
    fn environment(&self) -> EnvironmentId {
        match self {
            Deferred::Write { environment, .. } | Deferred::Undo { environment, .. } => *environment,
        }
    }
}

/// Owns the undo pools of every actor and environment.
pub struct HistoryManager {
    config: HistoryConfig,
    actors: HandleRegistry<ActorId>,
    environments: HandleRegistry<EnvironmentId>,
    /// Both pools are kept in stamp order
    complex: Vec<PoolEntry>,
    simple: Vec<PoolEntry>,
    in_flight: Option<InFlight>,
    deferred: VecDeque<Deferred>,
    next_stamp: u64,
    next_transaction: u64,
    cull_pending: bool,
}

impl HistoryManager {
    pub fn new(config: HistoryConfig) -> Self {
        Self {
            config,
            actors: HandleRegistry::new(),
            environments: HandleRegistry::new(),
            complex: Vec::new(),
            simple: Vec::new(),
            in_flight: None,
            deferred: VecDeque::new(),
            next_stamp: 1,
            next_transaction: TransactionId::GENERATED_BASE,
            cull_pending: false,
        }
    }

    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    pub fn register_actor(&mut self) -> ActorId {
        self.actors.allocate()
    }

    /// The actor is gone; its entries become permanent at the next cull.
    pub fn actor_disconnected(&mut self, actor: ActorId) {
        if self.actors.release(actor) {
            log::info!("actor {:?} disconnected", actor);
            self.cull();
        }
    }

    pub fn register_environment(&mut self) -> EnvironmentId {
        self.environments.allocate()
    }

    /// The environment is gone: its in-flight task, deferred work and entries
    /// are dropped.
    pub fn environment_unloaded(&mut self, environment: EnvironmentId) {
        if !self.environments.release(environment) {
            return;
        }
        if self.in_flight_environment() == Some(environment) {
            if let Some(mut flight) = self.in_flight.take() {
                flight.task_mut().abort();
                log::warn!("environment unloaded under in-flight {:?}", flight.ticket);
            }
        }
        self.deferred.retain(|op| op.environment() != environment);
        log::info!("environment {:?} unloaded", environment);
        self.cull();
    }

    /// Start applying `snapshot` at `origin` as a complex, undoable edit.
    ///
    /// The task is driven by [`HistoryManager::resume`] and filed into the
    /// complex pool when it finishes.
    pub fn write_complex(
        &mut self,
        actor: ActorId,
        environment: EnvironmentId,
        snapshot: Arc<RegionSnapshot>,
        origin: IVec3,
        orientation: Orientation,
        transaction: Option<TransactionId>,
    ) -> Result<TaskTicket> {
        self.check_handles(actor, environment)?;
        self.check_idle()?;
        if let Some(tx) = transaction {
            if self.complex.iter().any(|e| e.transaction == tx) {
                log::warn!("write rejected: {} already filed", tx);
                return Err(Rejection::DuplicateTransaction(tx.0).into());
            }
        }
        let stamp = self.take_stamp();
        let task = LayerWriteTask::new(snapshot, origin, orientation, stamp, self.config.capture_options())?;
        let transaction = transaction.unwrap_or_else(|| self.take_transaction());
        let ticket = TaskTicket {
            kind: OperationKind::Write,
            actor,
            environment,
            transaction,
        };
        log::info!("complex write {} started for {:?}", transaction, actor);
        self.in_flight = Some(InFlight {
            ticket,
            work: Work::Write(Box::new(task)),
        });
        Ok(ticket)
    }

    /// Start undoing the actor's newest complex entry, or the one filed
    /// under `transaction`.
    pub fn undo_complex(
        &mut self,
        actor: ActorId,
        environment: EnvironmentId,
        transaction: Option<TransactionId>,
    ) -> Result<TaskTicket> {
        self.check_handles(actor, environment)?;
        self.check_idle()?;
        let found = self.complex.iter().rposition(|e| {
            e.belongs_to(actor, environment)
                && !e.undo_commenced
                && transaction.is_none_or(|tx| e.transaction == tx)
        });
        let Some(index) = found else {
            return Err(Rejection::NothingToUndo.into());
        };

        let mut entry = self.complex.remove(index);
        let task = {
            let mut later = later_layers(&mut self.complex, &mut self.simple, environment, entry.stamp);
            entry.layer.reverse_task(&mut later)
        };
        entry.undo_commenced = task.is_ok();
        let (stamp, transaction) = (entry.stamp, entry.transaction);
        self.complex.insert(index, entry);
        let task = task?;

        let ticket = TaskTicket {
            kind: OperationKind::Undo,
            actor,
            environment,
            transaction,
        };
        log::info!("complex undo of {} started for {:?}", transaction, actor);
        self.in_flight = Some(InFlight {
            ticket,
            work: Work::Undo { stamp, task },
        });
        Ok(ticket)
    }

    /// Apply a simple edit now and file it in the simple pool.
    ///
    /// Placements under the in-flight task's locked region are queued and
    /// applied, as their own entry, once that task finishes.
    pub fn write_simple(
        &mut self,
        actor: ActorId,
        environment: EnvironmentId,
        host: &mut dyn VoxelHost,
        edit: SimpleEdit,
    ) -> Result<SimpleOutcome> {
        self.check_handles(actor, environment)?;
        if edit.is_empty() {
            return Err(Error::EmptyEdit);
        }
        let (now, later) = match self.locked_region_in(environment) {
            Some(locked) => edit.split_by(locked),
            None => (edit, SimpleEdit::new()),
        };

        let mut outcome = SimpleOutcome::default();
        if !later.is_empty() {
            log::debug!("deferring {} locked placements for {:?}", later.len(), actor);
            outcome.deferred = later.len();
            self.deferred.push_back(Deferred::Write { actor, environment, edit: later });
        }
        if !now.is_empty() {
            let report = self.apply_simple(actor, environment, host, &now)?;
            outcome.applied = report.written;
            outcome.failed = report.failed;
        }
        self.cull();
        Ok(outcome)
    }

    /// Undo the actor's newest simple entry. Returns false if there is none.
    ///
    /// The part of the entry under the in-flight task's locked region is
    /// undone once that task finishes.
    pub fn undo_simple(&mut self, actor: ActorId, environment: EnvironmentId, host: &mut dyn VoxelHost) -> bool {
        if let Err(err) = self.check_handles(actor, environment) {
            log::warn!("simple undo refused: {}", err);
            return false;
        }
        let Some(index) = self
            .simple
            .iter()
            .rposition(|e| e.belongs_to(actor, environment) && !e.undo_commenced)
        else {
            return false;
        };

        let mut entry = self.simple.remove(index);
        let held = self.locked_region_in(environment).and_then(|locked| entry.layer.split_off(locked));
        if let Some(mut layer) = held {
            // Migrate against the pool as it stands now; later entries may be
            // undone before the deferred part runs.
            let mut later = later_layers(&mut self.complex, &mut self.simple, environment, entry.stamp);
            let migrated = layer.migrate_into(&mut later);
            if !layer.is_empty() {
                log::debug!(
                    "deferring {} locked voxels of undo {} ({} migrated)",
                    layer.changed().count(),
                    entry.stamp,
                    migrated
                );
                self.deferred.push_back(Deferred::Undo { environment, layer });
            }
        }
        if let Err(err) = self.reverse_now(environment, host, &entry.layer) {
            log::warn!("simple undo {} failed: {}", entry.stamp, err);
        }
        true
    }

    /// Tick entry point: give the in-flight task of `environment` time until
    /// `deadline`, and settle it if it finishes.
    pub fn resume(&mut self, environment: EnvironmentId, host: &mut dyn VoxelHost, deadline: Deadline) -> TickOutcome {
        let Some(flight) = self.in_flight.as_mut() else {
            if self.cull_pending {
                self.cull();
            }
            return TickOutcome::Idle;
        };
        if flight.ticket.environment != environment {
            return TickOutcome::Idle;
        }
        let task = flight.task_mut();
        task.set_deadline(deadline);
        if task.resume(host) == TaskStatus::Running {
            return TickOutcome::Running { progress: task.progress() };
        }
        self.settle(host)
    }

    /// Abort the in-flight task of `environment`. Writes already made stay.
    pub fn abort_complex(&mut self, environment: EnvironmentId, host: &mut dyn VoxelHost) -> Option<TaskTicket> {
        let flight = self.in_flight.as_mut()?;
        if flight.ticket.environment != environment {
            return None;
        }
        flight.task_mut().abort();
        match self.settle(host) {
            TickOutcome::Completed(ticket) | TickOutcome::Aborted(ticket) => Some(ticket),
            TickOutcome::Idle | TickOutcome::Running { .. } => None,
        }
    }

    /// The in-flight task, if any.
    pub fn task(&self) -> Option<&dyn AsyncTask> {
        self.in_flight.as_ref().map(InFlight::task)
    }

    pub fn in_flight_environment(&self) -> Option<EnvironmentId> {
        self.in_flight.as_ref().map(|f| f.ticket.environment)
    }

    pub fn status(&self) -> HistoryStatus {
        let flight = self.in_flight.as_ref();
        HistoryStatus {
            busy: flight.is_some(),
            operation: flight.map(|f| f.ticket.kind),
            percent: flight.map_or(0.0, |f| f.task().progress() * 100.0),
            actor: flight.map(|f| f.ticket.actor),
            transaction: flight.map(|f| f.ticket.transaction),
            complex_entries: self.complex.len(),
            simple_entries: self.simple.len(),
            deferred: self.deferred.len(),
        }
    }

    /// `(complex, simple)` entry counts.
    pub fn pool_sizes(&self) -> (usize, usize) {
        (self.complex.len(), self.simple.len())
    }

    pub fn entry_count(&self, pool: PoolKind, actor: ActorId) -> usize {
        self.pool(pool).iter().filter(|e| e.actor == actor).count()
    }

    pub fn entries(&self) -> Vec<EntrySummary> {
        [PoolKind::Complex, PoolKind::Simple]
            .into_iter()
            .flat_map(|kind| {
                self.pool(kind).iter().map(move |e| EntrySummary {
                    pool: kind,
                    stamp: e.stamp,
                    actor: e.actor,
                    environment: e.environment,
                    transaction: e.transaction,
                    changed_voxels: e.layer.changed().count(),
                    undo_commenced: e.undo_commenced,
                })
            })
            .collect()
    }

    fn pool(&self, kind: PoolKind) -> &[PoolEntry] {
        match kind {
            PoolKind::Complex => &self.complex,
            PoolKind::Simple => &self.simple,
        }
    }

    fn check_handles(&self, actor: ActorId, environment: EnvironmentId) -> Result<()> {
        if !self.actors.is_live(actor) {
            return Err(Rejection::UnknownActor.into());
        }
        if !self.environments.is_live(environment) {
            return Err(Rejection::UnknownEnvironment.into());
        }
        Ok(())
    }

    fn check_idle(&self) -> Result<()> {
        match &self.in_flight {
            Some(flight) => {
                log::warn!("rejected: {:?} in flight", flight.ticket);
                Err(Rejection::Busy.into())
            }
            None => Ok(()),
        }
    }

    fn locked_region_in(&self, environment: EnvironmentId) -> Option<&LockedRegion> {
        let flight = self.in_flight.as_ref()?;
        if flight.ticket.environment != environment {
            return None;
        }
        flight.task().locked_region()
    }

    fn take_stamp(&mut self) -> u64 {
        let stamp = self.next_stamp;
        self.next_stamp += 1;
        stamp
    }

    fn take_transaction(&mut self) -> TransactionId {
        let tx = TransactionId(self.next_transaction);
        self.next_transaction += 1;
        tx
    }

    fn apply_simple(
        &mut self,
        actor: ActorId,
        environment: EnvironmentId,
        host: &mut dyn VoxelHost,
        edit: &SimpleEdit,
    ) -> Result<ApplyReport> {
        let (snapshot, origin) = edit.to_snapshot()?;
        let stamp = self.take_stamp();
        let (layer, report) = UndoLayer::apply_with_undo(
            host,
            Arc::new(snapshot),
            origin,
            Orientation::IDENTITY,
            stamp,
            self.config.capture_options(),
        )?;
        let transaction = self.take_transaction();
        self.simple.push(PoolEntry::new(environment, actor, layer, transaction));
        Ok(report)
    }

    fn reverse_now(&mut self, environment: EnvironmentId, host: &mut dyn VoxelHost, layer: &UndoLayer) -> Result<ApplyReport> {
        let mut later = later_layers(&mut self.complex, &mut self.simple, environment, layer.stamp());
        layer.reverse(host, &mut later)
    }

    /// File or drop the finished in-flight task, then run deferred work and
    /// any pending cull.
    fn settle(&mut self, host: &mut dyn VoxelHost) -> TickOutcome {
        let Some(flight) = self.in_flight.take() else {
            return TickOutcome::Idle;
        };
        let ticket = flight.ticket;
        let status = flight.task().status();
        match flight.work {
            Work::Write(task) => match task.into_layer() {
                Some(layer) => {
                    if status == TaskStatus::Aborted {
                        log::warn!("complex write {} aborted; filing the partial edit", ticket.transaction);
                    } else {
                        log::info!("complex write {} filed", ticket.transaction);
                    }
                    self.complex
                        .push(PoolEntry::new(ticket.environment, ticket.actor, layer, ticket.transaction));
                }
                None => log::warn!("complex write {} aborted before anything changed", ticket.transaction),
            },
            Work::Undo { stamp, .. } => {
                if let Some(index) = self.complex.iter().position(|e| e.stamp == stamp) {
                    if status == TaskStatus::Complete {
                        self.complex.remove(index);
                        log::info!("complex undo of {} done", ticket.transaction);
                    } else {
                        self.complex[index].undo_commenced = false;
                        log::warn!("complex undo of {} aborted; entry kept", ticket.transaction);
                    }
                }
            }
        }
        self.run_deferred(host);
        self.cull();
        if status == TaskStatus::Complete {
            TickOutcome::Completed(ticket)
        } else {
            TickOutcome::Aborted(ticket)
        }
    }

    fn run_deferred(&mut self, host: &mut dyn VoxelHost) {
        while let Some(op) = self.deferred.pop_front() {
            match op {
                Deferred::Write { actor, environment, edit } => {
                    if let Err(err) = self.apply_simple(actor, environment, host, &edit) {
                        log::warn!("deferred write for {:?} failed: {}", actor, err);
                    }
                }
                Deferred::Undo { environment, layer } => {
                    if let Err(err) = self.reverse_now(environment, host, &layer) {
                        log::warn!("deferred undo {} failed: {}", layer.stamp(), err);
                    }
                }
            }
        }
    }

    /// Enforce pool limits and drop stale entries. Postponed while a complex
    /// task is in flight.
    fn cull(&mut self) {
        if self.in_flight.is_some() {
            self.cull_pending = true;
            return;
        }
        self.cull_pending = false;

        let environments = &self.environments;
        let before = self.complex.len() + self.simple.len();
        self.complex.retain(|e| environments.is_live(e.environment));
        self.simple.retain(|e| environments.is_live(e.environment));
        let dropped = before - self.complex.len() - self.simple.len();
        if dropped > 0 {
            log::info!("dropped {} entries of unloaded environments", dropped);
        }

        while let Some((pool, index)) = self.oldest_of_departed_actor() {
            self.retire(pool, index);
        }

        let cap = self.config.max_simple_per_actor;
        while let Some(index) = oldest_over_share(&self.simple, |_| cap) {
            self.retire(PoolKind::Simple, index);
        }

        let max = self.config.max_complex_entries;
        while self.complex.len() > max {
            let actors = per_actor_counts(&self.complex).len().max(1);
            let share = (max / actors).max(1);
            let victim = oldest_over_share(&self.complex, |_| share)
                .or_else(|| oldest_index(self.complex.iter().enumerate()));
            match victim {
                Some(index) => self.retire(PoolKind::Complex, index),
                None => break,
            }
        }
    }

    fn oldest_of_departed_actor(&self) -> Option<(PoolKind, usize)> {
        let actors = &self.actors;
        let complex = oldest_index(self.complex.iter().enumerate().filter(|(_, e)| !actors.is_live(e.actor)));
        let simple = oldest_index(self.simple.iter().enumerate().filter(|(_, e)| !actors.is_live(e.actor)));
        match (complex, simple) {
            (Some(c), Some(s)) if self.simple[s].stamp < self.complex[c].stamp => Some((PoolKind::Simple, s)),
            (Some(c), _) => Some((PoolKind::Complex, c)),
            (None, Some(s)) => Some((PoolKind::Simple, s)),
            (None, None) => None,
        }
    }

    /// Evict an entry, making it permanent against every earlier entry of
    /// its environment.
    fn retire(&mut self, pool: PoolKind, index: usize) {
        let entry = match pool {
            PoolKind::Complex => self.complex.remove(index),
            PoolKind::Simple => self.simple.remove(index),
        };
        let mut preceding: Vec<&mut UndoLayer> = self
            .complex
            .iter_mut()
            .chain(self.simple.iter_mut())
            .filter(|e| e.environment == entry.environment && e.stamp < entry.stamp)
            .map(|e| &mut e.layer)
            .collect();
        entry.layer.make_permanent(&mut preceding);
        log::info!(
            "evicted {:?} entry {} of {:?}; it can no longer be undone",
            pool,
            entry.stamp,
            entry.actor
        );
    }
}

/// Newer entries of `environment` that are not being undone, oldest first.
fn later_layers<'a>(
    complex: &'a mut [PoolEntry],
    simple: &'a mut [PoolEntry],
    environment: EnvironmentId,
    stamp: u64,
) -> Vec<&'a mut UndoLayer> {
    let mut later: Vec<&'a mut PoolEntry> = complex
        .iter_mut()
        .chain(simple.iter_mut())
        .filter(|e| e.environment == environment && e.stamp > stamp && !e.undo_commenced)
        .collect();
    later.sort_by_key(|e| e.stamp);
    later.into_iter().map(|e| &mut e.layer).collect()
}

fn per_actor_counts(pool: &[PoolEntry]) -> BTreeMap<ActorId, usize> {
    let mut counts = BTreeMap::new();
    for entry in pool {
        *counts.entry(entry.actor).or_insert(0) += 1;
    }
    counts
}

/// Oldest entry of any actor holding more than `share(actor)` entries.
fn oldest_over_share(pool: &[PoolEntry], share: impl Fn(ActorId) -> usize) -> Option<usize> {
    let counts = per_actor_counts(pool);
    oldest_index(
        pool.iter()
            .enumerate()
            .filter(|(_, e)| counts.get(&e.actor).copied().unwrap_or(0) > share(e.actor)),
    )
}

fn oldest_index<'a>(entries: impl Iterator<Item = (usize, &'a PoolEntry)>) -> Option<usize> {
    entries.min_by_key(|(_, e)| e.stamp).map(|(i, _)| i)
}
