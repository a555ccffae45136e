/*!
 * Modeflow Core
 *
 * This crate provides the shared foundation for the Modeflow system:
 * the state/trigger vocabulary types, error type, configuration, and
 * logging setup used by the engine crate.
 */

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod logging;
pub mod prelude;
pub mod types;
pub mod utils;

/// Re-export of dependencies that are part of the public API
pub mod deps {
    pub use chrono;
    pub use futures;
    pub use serde;
    pub use tokio;
    pub use tracing;
    pub use uuid;
}

/// Modeflow core crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library initialization
pub fn init() -> Result<(), error::Error> {
    logging::init()?;
    tracing::info!("Modeflow Core {} initialized", VERSION);
    Ok(())
}
