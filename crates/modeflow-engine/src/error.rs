/*!
 * Error types for the Modeflow engine crate.
 */
use thiserror::Error;

use modeflow_core::types::{StateId, TriggerName};

/// Which hook phase an error originated from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPhase {
    /// State entry hook
    Enter,
    /// State exit hook
    Exit,
}

impl std::fmt::Display for HookPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HookPhase::Enter => write!(f, "enter"),
            HookPhase::Exit => write!(f, "exit"),
        }
    }
}

/// Error type for Modeflow engine operations
#[derive(Error, Debug)]
pub enum Error {
    /// A state identifier was declared more than once
    #[error("Duplicate state ID: {0}")]
    DuplicateState(StateId),

    /// A trigger identifier collides with another declaration
    #[error("Duplicate trigger: {0}")]
    DuplicateTrigger(TriggerName),

    /// A transition rule names a state that was never declared
    #[error("Dangling reference: trigger {trigger} names undeclared state {state}")]
    DanglingReference {
        /// Trigger owning the offending rule
        trigger: TriggerName,
        /// The undeclared state
        state: StateId,
    },

    /// A trigger name that is not declared anywhere in the graph
    #[error("Unknown trigger: {0}")]
    UnknownTrigger(TriggerName),

    /// A declared trigger that has no applicable rule in the current state
    #[error("Invalid transition: trigger {trigger} is not applicable in state {state}")]
    InvalidTransition {
        /// The requested trigger
        trigger: TriggerName,
        /// The state the machine was in when the trigger executed
        state: StateId,
    },

    /// A hook reported a failure
    #[error("Hook failure in {phase} hook of state {state}: {message}")]
    Hook {
        /// State the hook belongs to
        state: StateId,
        /// Hook phase
        phase: HookPhase,
        /// Failure description
        message: String,
    },

    /// Machine lifecycle error
    #[error("Machine error: {0}")]
    Machine(String),

    /// Checkpoint error
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// Core error
    #[error("Core error: {0}")]
    Core(#[from] modeflow_core::error::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for Modeflow engine operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a new duplicate state error
    pub fn duplicate_state<S: Into<StateId>>(state: S) -> Self {
        Error::DuplicateState(state.into())
    }

    /// Create a new duplicate trigger error
    pub fn duplicate_trigger<T: Into<TriggerName>>(trigger: T) -> Self {
        Error::DuplicateTrigger(trigger.into())
    }

    /// Create a new dangling reference error
    pub fn dangling_reference<T: Into<TriggerName>, S: Into<StateId>>(trigger: T, state: S) -> Self {
        Error::DanglingReference {
            trigger: trigger.into(),
            state: state.into(),
        }
    }

    /// Create a new unknown trigger error
    pub fn unknown_trigger<T: Into<TriggerName>>(trigger: T) -> Self {
        Error::UnknownTrigger(trigger.into())
    }

    /// Create a new invalid transition error
    pub fn invalid_transition<T: Into<TriggerName>, S: Into<StateId>>(trigger: T, state: S) -> Self {
        Error::InvalidTransition {
            trigger: trigger.into(),
            state: state.into(),
        }
    }

    /// Create a new hook failure error
    pub fn hook<S: Into<StateId>, M: AsRef<str>>(state: S, phase: HookPhase, msg: M) -> Self {
        Error::Hook {
            state: state.into(),
            phase,
            message: msg.as_ref().to_string(),
        }
    }

    /// Create a new machine lifecycle error
    pub fn machine<S: AsRef<str>>(msg: S) -> Self {
        Error::Machine(msg.as_ref().to_string())
    }

    /// Create a new checkpoint error
    pub fn checkpoint<S: AsRef<str>>(msg: S) -> Self {
        Error::Checkpoint(msg.as_ref().to_string())
    }

    /// Whether this error leaves the machine state untouched and the caller
    /// free to retry with a different trigger
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Error::UnknownTrigger(_) | Error::InvalidTransition { .. }
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
