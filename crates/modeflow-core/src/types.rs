/*!
 * Core data types for Modeflow.
 *
 * This module defines the state and trigger vocabulary shared by every
 * Modeflow component.
 */
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The designated initial state of every machine
pub const READY_STATE: &str = "ready";

/// The global error sink state of every machine
pub const FAULT_STATE: &str = "fault";

/// Prefix of the reserved recovery trigger namespace
pub const RECOVERY_PREFIX: &str = "recover__";

/// A timestamp in UTC
pub type Timestamp = DateTime<Utc>;

/// A unique identifier for Modeflow resources
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Id(String);

impl Id {
    /// Create a new ID with a random UUID
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create an ID from a string
    pub fn from_string<S: AsRef<str>>(s: S) -> Self {
        Self(s.as_ref().to_string())
    }

    /// Get the string representation of the ID
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Default for Id {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for Id {
    fn from(s: &str) -> Self {
        Self::from_string(s)
    }
}

impl From<String> for Id {
    fn from(s: String) -> Self {
        Self::from_string(s)
    }
}

/// Identifier of a leaf state in a machine's graph
///
/// Hierarchical groups contribute only a name prefix: a group `G` with a
/// leaf `x` yields the StateId `G_x`. Groups themselves never appear at
/// runtime.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StateId(String);

impl StateId {
    /// Create a new state ID
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    /// The built-in `ready` state
    pub fn ready() -> Self {
        Self::new(READY_STATE)
    }

    /// The built-in `fault` state
    pub fn fault() -> Self {
        Self::new(FAULT_STATE)
    }

    /// Create the ID of a leaf inside a named group
    pub fn scoped<G: AsRef<str>, L: AsRef<str>>(group: G, leaf: L) -> Self {
        Self(format!("{}_{}", group.as_ref(), leaf.as_ref()))
    }

    /// Get the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is one of the built-in `ready`/`fault` states
    pub fn is_builtin(&self) -> bool {
        self.0 == READY_STATE || self.0 == FAULT_STATE
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StateId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for StateId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Name of an event that may cause a transition
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TriggerName(String);

impl TriggerName {
    /// Create a new trigger name
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self(name.into())
    }

    /// The built-in `start` trigger
    pub fn start() -> Self {
        Self::new("start")
    }

    /// The built-in `reset` trigger
    pub fn reset() -> Self {
        Self::new("reset")
    }

    /// The built-in `to_fault` trigger
    pub fn to_fault() -> Self {
        Self::new("to_fault")
    }

    /// The recovery trigger for a state, `recover__<state>`
    pub fn recover(state: &StateId) -> Self {
        Self(format!("{}{}", RECOVERY_PREFIX, state.as_str()))
    }

    /// Get the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is one of the built-in `start`/`reset`/`to_fault` triggers
    pub fn is_builtin(&self) -> bool {
        matches!(self.0.as_str(), "start" | "reset" | "to_fault")
    }

    /// Whether this name lives in the reserved `recover__` namespace
    pub fn is_recovery(&self) -> bool {
        self.0.starts_with(RECOVERY_PREFIX)
    }
}

impl fmt::Display for TriggerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TriggerName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for TriggerName {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}
