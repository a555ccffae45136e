/*!
 * Utility functions and helpers for Modeflow.
 */
use std::future::Future;
use std::time::Duration;

use tracing::error;

use crate::types::Timestamp;

/// Convert a duration to whole milliseconds
pub fn duration_to_millis(duration: Duration) -> u64 {
    duration.as_millis() as u64
}

/// Convert milliseconds to a duration
pub fn millis_to_duration(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

/// Milliseconds elapsed between two timestamps, clamped at zero
pub fn elapsed_millis(from: Timestamp, to: Timestamp) -> u64 {
    (to - from).num_milliseconds().max(0) as u64
}

/// Create a task that runs in the background
///
/// # Arguments
///
/// * `fut` - The future to run
///
/// # Returns
///
/// A handle to the spawned task
pub fn spawn_task<F>(fut: F) -> tokio::task::JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::spawn(fut)
}

/// Create a task that runs in the background and logs any errors
///
/// # Arguments
///
/// * `name` - A name for the task (for logging)
/// * `fut` - The future to run
pub fn spawn_and_log<F, T, E>(name: &str, fut: F) -> tokio::task::JoinHandle<()>
where
    F: Future<Output = std::result::Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let task_name = name.to_string();
    tokio::spawn(async move {
        if let Err(e) = fut.await {
            error!("Task {} failed: {}", task_name, e);
        }
    })
}
