/*!
 * Prelude module for Modeflow Core.
 *
 * This module re-exports commonly used types and functions from the Modeflow
 * Core crate to make them easier to import.
 */

// Re-export error types
pub use crate::error::{Error, Result};

// Re-export core types
pub use crate::types::{Id, StateId, Timestamp, TriggerName};

// Re-export config types
pub use crate::config::{Config, ConfigBuilder, SharedConfig};

// Re-export utility functions
pub use crate::utils::{
    duration_to_millis, elapsed_millis, millis_to_duration, spawn_and_log, spawn_task,
};

// Re-export logging macros
pub use tracing::{debug, error, info, trace, warn};

// Re-export core initialization
pub use crate::init;
