//! voxundo demo driver
//!
//! Runs a scripted editing session against an in-memory world: a few simple
//! edits, a rotated region copy driven tick by tick, and the undos of both.
//!
//! Usage: `voxundo [config.json] [--debug-port PORT] [--linger]`

use std::sync::Arc;

use tokio::sync::Mutex;

use voxundo::core::{HistoryConfig, Result, logging};
use voxundo::core::types::{IVec3, UVec3, Vec3};
use voxundo::history::{
    ActorId, EntrySummary, EnvironmentId, Handle, HistoryManager, HistoryStatus, OperationKind, PoolKind,
    SimpleEdit, TaskTicket, TickOutcome,
};
use voxundo::host::MemoryWorld;
use voxundo::math::Orientation;
use voxundo::snapshot::RegionSnapshot;
use voxundo::task::Deadline;
use voxundo::voxel::{EntityRecord, ScheduledEvent, VoxelMask, VoxelRecord};
use voxundo_debug::{
    HandleInfo, PoolEntryInfo, ResponseData, StatusCommand, StatusHandler, StatusResponse, StatusServer,
};

const STONE: u16 = 1;
const GRASS: u16 = 2;
const LAMP: u16 = 3;
const SAND: u16 = 4;

/// Command-line options
struct Args {
    config: Option<String>,
    debug_port: Option<u16>,
    linger: bool,
}

impl Args {
    fn parse() -> Self {
        let mut args = Args {
            config: None,
            debug_port: None,
            linger: false,
        };
        let mut iter = std::env::args().skip(1);
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--debug-port" => match iter.next().and_then(|p| p.parse().ok()) {
                    Some(port) => args.debug_port = Some(port),
                    None => log::warn!("--debug-port needs a port number, using {}", voxundo_debug::DEFAULT_PORT),
                },
                "--linger" => args.linger = true,
                other => args.config = Some(other.to_string()),
            }
        }
        if args.linger && args.debug_port.is_none() {
            args.debug_port = Some(voxundo_debug::DEFAULT_PORT);
        }
        args
    }
}

/// Everything the session and the status server share
struct Session {
    manager: HistoryManager,
    world: MemoryWorld,
    environment: EnvironmentId,
}

impl StatusHandler for Session {
    fn handle_command(&mut self, cmd: StatusCommand) -> StatusResponse {
        match cmd {
            StatusCommand::Ping => StatusResponse::pong(),
            StatusCommand::GetStatus => StatusResponse::ok(status_data(&self.manager.status())),
            StatusCommand::GetPools => StatusResponse::ok(ResponseData::Pools {
                entries: self.manager.entries().iter().map(entry_info).collect(),
            }),
            StatusCommand::AbortComplex => match self.manager.abort_complex(self.environment, &mut self.world) {
                Some(ticket) => StatusResponse::ok(ResponseData::Aborted {
                    operation: operation_name(ticket.kind).into(),
                    transaction: ticket.transaction.to_string(),
                }),
                None => StatusResponse::error("no complex operation in flight"),
            },
        }
    }
}

fn handle_info<H: Handle>(handle: H) -> HandleInfo {
    HandleInfo {
        index: handle.index(),
        generation: handle.generation(),
    }
}

fn operation_name(kind: OperationKind) -> &'static str {
    match kind {
        OperationKind::Write => "write",
        OperationKind::Undo => "undo",
    }
}

fn status_data(status: &HistoryStatus) -> ResponseData {
    ResponseData::Status {
        busy: status.busy,
        operation: status.operation.map(|k| operation_name(k).to_string()),
        percent: status.percent,
        actor: status.actor.map(handle_info),
        transaction: status.transaction.map(|t| t.to_string()),
        complex_entries: status.complex_entries,
        simple_entries: status.simple_entries,
        deferred: status.deferred,
    }
}

fn entry_info(entry: &EntrySummary) -> PoolEntryInfo {
    PoolEntryInfo {
        pool: match entry.pool {
            PoolKind::Complex => "complex",
            PoolKind::Simple => "simple",
        }
        .into(),
        stamp: entry.stamp,
        actor: handle_info(entry.actor),
        environment: handle_info(entry.environment),
        transaction: entry.transaction.to_string(),
        changed_voxels: entry.changed_voxels,
        undo_commenced: entry.undo_commenced,
    }
}

/// A stone floor with a small grass hut, a lamp and a resident.
fn build_world() -> MemoryWorld {
    let mut world = MemoryWorld::new((0, 64));
    for x in -16..32 {
        for z in -16..32 {
            world.set_voxel(IVec3::new(x, 0, z), VoxelRecord::new(STONE, 0));
        }
    }
    for x in 0..6 {
        for z in 0..4 {
            for y in 1..4 {
                let wall = x == 0 || x == 5 || z == 0 || z == 3 || y == 3;
                if wall {
                    world.set_voxel(IVec3::new(x, y, z), VoxelRecord::new(GRASS, 0));
                }
            }
        }
    }
    world.set_voxel(IVec3::new(2, 1, 1), VoxelRecord::new(LAMP, 0).with_light(14));
    world.set_pending_event(IVec3::new(2, 1, 1), ScheduledEvent { type_code: LAMP, delay: 20, priority: 0 });
    world.add_entity(EntityRecord::new(7, Vec3::new(3.5, 1.0, 2.5)));
    world
}

/// Drive the in-flight task one budget slice per tick until it settles.
async fn drive(session: &Arc<Mutex<Session>>, budget: std::time::Duration) -> Option<TaskTicket> {
    let mut ticks = 0u32;
    loop {
        let outcome = {
            let mut guard = session.lock().await;
            let Session {
                manager,
                world,
                environment,
            } = &mut *guard;
            manager.resume(*environment, world, Deadline::after(budget))
        };
        ticks += 1;
        match outcome {
            TickOutcome::Running { progress } => {
                log::debug!("tick {}: {:.1}%", ticks, progress * 100.0);
                tokio::time::sleep(budget).await;
            }
            TickOutcome::Completed(ticket) => {
                log::info!("{} {} completed after {} ticks", operation_name(ticket.kind), ticket.transaction, ticks);
                return Some(ticket);
            }
            TickOutcome::Aborted(ticket) => {
                log::warn!("{} {} aborted after {} ticks", operation_name(ticket.kind), ticket.transaction, ticks);
                return Some(ticket);
            }
            TickOutcome::Idle => return None,
        }
    }
}

async fn run_session(session: &Arc<Mutex<Session>>, actor: ActorId, budget: std::time::Duration) -> Result<()> {
    // Simple edits: a sand path in front of the hut
    {
        let mut guard = session.lock().await;
        let Session {
            manager,
            world,
            environment,
        } = &mut *guard;
        for step in 0..3 {
            let edit = SimpleEdit::new()
                .set(IVec3::new(step * 2, 0, -2), VoxelRecord::new(SAND, 0))
                .set(IVec3::new(step * 2 + 1, 0, -2), VoxelRecord::new(SAND, 0));
            let outcome = manager.write_simple(actor, *environment, world, edit)?;
            log::info!("simple edit {}: {} voxels written", step, outcome.applied);
        }
    }

    // Copy the hut, turned a quarter and mirrored, further along the floor
    let ticket = {
        let mut guard = session.lock().await;
        let Session {
            manager,
            world,
            environment,
        } = &mut *guard;
        let mask = VoxelMask::filled(UVec3::new(6, 4, 4))?;
        let hut = RegionSnapshot::capture(world, &mask, IVec3::new(0, 1, 0), Orientation::IDENTITY)?;
        log::info!(
            "captured hut: {} voxels, {} entities, {:?} store",
            hut.voxel_count(),
            hut.entity_count(),
            hut.store_kind()
        );
        manager.write_complex(
            actor,
            *environment,
            Arc::new(hut),
            IVec3::new(12, 1, 4),
            Orientation::new(1, true),
            None,
        )?
    };
    log::info!("copy {} accepted", ticket.transaction);

    // A simple edit landing on the copy while it is still in flight is queued
    {
        let mut guard = session.lock().await;
        let Session {
            manager,
            world,
            environment,
        } = &mut *guard;
        let edit = SimpleEdit::new().set(IVec3::new(13, 1, 5), VoxelRecord::new(SAND, 0));
        let outcome = manager.write_simple(actor, *environment, world, edit)?;
        log::info!("edit on the copy: {} applied, {} deferred", outcome.applied, outcome.deferred);
    }
    drive(session, budget).await;

    {
        let guard = session.lock().await;
        let (complex, simple) = guard.manager.pool_sizes();
        log::info!(
            "after copy: {} complex, {} simple entries; world holds {} entities",
            complex,
            simple,
            guard.world.entity_count()
        );
    }

    // Undo the copy, then the path
    {
        let mut guard = session.lock().await;
        let environment = guard.environment;
        guard.manager.undo_complex(actor, environment, Some(ticket.transaction))?;
    }
    drive(session, budget).await;

    let mut guard = session.lock().await;
    let Session {
        manager,
        world,
        environment,
    } = &mut *guard;
    let mut undone = 0;
    while manager.undo_simple(actor, *environment, world) {
        undone += 1;
    }
    log::info!(
        "undid {} simple edits; world holds {} entities, {} voxel writes in total",
        undone,
        world.entity_count(),
        world.write_count()
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => HistoryConfig::load(path)?,
        None => HistoryConfig::default(),
    };
    log::info!("voxundo demo starting with {:?}", config);
    let budget = config.tick_budget();

    let mut manager = HistoryManager::new(config);
    let actor = manager.register_actor();
    let environment = manager.register_environment();
    let session = Arc::new(Mutex::new(Session {
        manager,
        world: build_world(),
        environment,
    }));

    let _server = match args.debug_port {
        Some(port) => Some(StatusServer::start(session.clone(), port).await?),
        None => None,
    };

    run_session(&session, actor, budget).await?;

    if args.linger {
        log::info!("session finished; status server stays up until interrupted");
        std::future::pending::<()>().await;
    }
    Ok(())
}
