/*!
 * Router adapter: the machine's externally addressable surface.
 *
 * A thin pass-through between a transport (HTTP, RPC) and the transition
 * engine. It owns no business logic; it shapes engine data into the wire
 * DTOs and optionally restricts which triggers are externally invocable.
 */
use std::collections::HashSet;

use serde::Serialize;
use tracing::debug;

use modeflow_core::config::Config;
use modeflow_core::types::{StateId, TriggerName};

use crate::error::{Error, Result};
use crate::graph::GraphDescription;
use crate::history::HistoryEntry;
use crate::machine::{Machine, TransitionReport};

/// The `GET /state` payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateSnapshot {
    /// Current state
    pub state: StateId,
    /// Last recorded recoverable state
    pub last_state: Option<StateId>,
}

/// The `GET /history` payload
#[derive(Debug, Clone, Serialize)]
pub struct HistoryPayload {
    /// Entries in insertion order, oldest first
    pub history: Vec<HistoryEntry>,
}

/// Transport-facing adapter over one machine instance
#[derive(Debug, Clone)]
pub struct RouterAdapter {
    machine: Machine,
    allowed: Option<HashSet<TriggerName>>,
}

impl RouterAdapter {
    /// Create an adapter exposing every declared trigger
    pub fn new(machine: Machine) -> Self {
        Self {
            machine,
            allowed: None,
        }
    }

    /// Restrict the externally invocable triggers to an allow-list
    pub fn with_allowed_triggers<I, T>(mut self, triggers: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<TriggerName>,
    {
        self.allowed = Some(triggers.into_iter().map(Into::into).collect());
        self
    }

    /// Create an adapter honoring the `machine.external_triggers` config
    /// list (empty list means every trigger is exposed)
    pub fn from_config(machine: Machine, config: &Config) -> Self {
        let adapter = Self::new(machine);
        if config.machine.external_triggers.is_empty() {
            adapter
        } else {
            adapter.with_allowed_triggers(config.machine.external_triggers.iter().cloned())
        }
    }

    /// The machine behind this adapter
    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    /// Current and last recorded state
    pub async fn state(&self) -> StateSnapshot {
        StateSnapshot {
            state: self.machine.current_state().await,
            last_state: self.machine.last_state().await,
        }
    }

    /// The `limit` most recent history entries, in insertion order
    pub async fn history(&self, limit: usize) -> HistoryPayload {
        HistoryPayload {
            history: self.machine.history(limit).await,
        }
    }

    /// Static graph description for external diagram rendering
    pub fn graph(&self) -> GraphDescription {
        self.machine.graph().description()
    }

    /// Graphviz DOT document for the external `/diagram.svg` renderer
    pub fn diagram_dot(&self) -> String {
        self.graph().to_dot()
    }

    /// Trigger names a transport should mount, ordered by name
    pub fn routes(&self) -> Vec<TriggerName> {
        self.machine
            .graph()
            .triggers()
            .into_iter()
            .filter(|t| self.exposes(t))
            .collect()
    }

    /// Whether a trigger is externally invocable through this adapter
    pub fn exposes(&self, trigger: &TriggerName) -> bool {
        match &self.allowed {
            Some(allowed) => allowed.contains(trigger),
            None => true,
        }
    }

    /// Execute an externally requested trigger
    ///
    /// Names outside the allow-list are reported as unknown, matching a
    /// transport that never mounted a route for them.
    pub async fn invoke<T: Into<TriggerName>>(&self, trigger: T) -> Result<TransitionReport> {
        let trigger = trigger.into();
        if !self.exposes(&trigger) {
            debug!(trigger = %trigger, "Trigger not exposed to the transport");
            return Err(Error::unknown_trigger(trigger));
        }
        self.machine.trigger(trigger).await
    }
}
