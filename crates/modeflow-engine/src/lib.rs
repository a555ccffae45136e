/*!
 * Modeflow Engine
 *
 * This crate provides the recoverable hierarchical state machine engine for
 * the Modeflow automation system: the declarative graph model, per-state
 * lifecycle hooks with auto-timeouts, bounded transition history with
 * last-state recovery, and the transport-facing router adapter.
 */

#![warn(missing_docs)]

// Re-export core types for convenience
pub use modeflow_core::prelude;
pub use modeflow_core::types::{Id, StateId, TriggerName};

pub mod error;
pub mod graph;
pub mod history;
pub mod hooks;
pub mod machine;
pub mod router;
pub mod timeout;

// Re-export main types for convenience
pub use error::{Error, HookPhase, Result};
pub use graph::{Graph, GraphBuilder, GraphDescription, GraphEdge, SourceSpec, TransitionRule};
pub use history::{HistoryEntry, HistoryLedger, DEFAULT_HISTORY_SIZE};
pub use hooks::{Hook, HookContext, HookRegistry, HookRegistryBuilder, HookSet, TimeoutSpec};
pub use machine::{
    Checkpoint, Machine, MachineBuilder, MachineHandle, MachineSettings, TransitionReport,
};
pub use router::{HistoryPayload, RouterAdapter, StateSnapshot};
pub use timeout::TimeoutManager;

/// Modeflow engine crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the engine
pub fn init() -> Result<()> {
    tracing::info!("Modeflow Engine {} initialized", VERSION);
    Ok(())
}
