/*!
 * Logging functionality for Modeflow.
 *
 * This module provides tracing setup and utilities for consistent logging
 * across the Modeflow crates.
 */
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{Error, Result};

/// Initialize the logging system with default configuration
pub fn init() -> Result<()> {
    init_with_filter("info")
}

/// Initialize the logging system with a specific filter
///
/// # Arguments
///
/// * `filter` - The log filter string (e.g., "info", "debug", "modeflow=trace")
pub fn init_with_filter(filter: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .try_init()
        .map_err(|e| Error::logging(format!("Failed to initialize logging: {}", e)))?;

    Ok(())
}

/// Initialize the logging system from a [`LoggingConfig`]
pub fn init_from_config(config: &LoggingConfig) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    if config.json_format {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_target(true))
            .with(filter)
            .try_init()
            .map_err(|e| Error::logging(format!("Failed to initialize logging: {}", e)))?;
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(true))
            .with(filter)
            .try_init()
            .map_err(|e| Error::logging(format!("Failed to initialize logging: {}", e)))?;
    }

    Ok(())
}

/// A type alias for a tracing span
pub type Span = tracing::Span;

/// Create a new span for a machine instance
///
/// # Arguments
///
/// * `name` - The machine name
/// * `id` - An optional ID for the machine instance
pub fn machine_span(name: &str, id: Option<&str>) -> Span {
    match id {
        Some(id) => tracing::info_span!("machine", name = %name, id = %id),
        None => tracing::info_span!("machine", name = %name),
    }
}

/// Create a new span for a transition
///
/// # Arguments
///
/// * `trigger` - The trigger being executed
/// * `machine` - The machine executing it
pub fn transition_span(trigger: &str, machine: &str) -> Span {
    tracing::info_span!("transition", trigger = %trigger, machine = %machine)
}
