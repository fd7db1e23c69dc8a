//! Undo history: layers, pools and the manager that owns them

pub mod layer;
pub mod manager;
pub mod pool;
pub mod simple;

pub use layer::{LayerWriteStage, LayerWriteTask, UndoLayer};
pub use manager::{
    EntrySummary, HistoryManager, HistoryStatus, OperationKind, PoolKind, SimpleOutcome, TaskTicket, TickOutcome,
};
pub use pool::{ActorId, EnvironmentId, Handle, HandleRegistry, PoolEntry, TransactionId};
pub use simple::SimpleEdit;
