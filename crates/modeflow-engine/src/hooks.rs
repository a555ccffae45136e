/*!
 * State lifecycle hooks.
 *
 * The original decorator-discovered handlers are replaced by explicit
 * builder-style registration: each state may carry an enter hook, an exit
 * hook, and an auto-timeout spec. Hooks run synchronously inside the
 * engine's critical section and must not block; long-running work is
 * spawned through the [`HookContext`].
 */
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;

use modeflow_core::types::{StateId, TriggerName};

use crate::error::{HookPhase, Result};
use crate::machine::MachineHandle;

/// A state lifecycle hook
///
/// Hooks receive a [`HookContext`] through which they may request timeout
/// arming and background task spawning. A returned error is caught by the
/// engine and converted into a forced transition to `fault`.
pub type Hook = Arc<dyn Fn(&mut HookContext<'_>) -> Result<()> + Send + Sync>;

/// An auto-timeout armed when its state is entered
#[derive(Debug, Clone)]
pub struct TimeoutSpec {
    /// How long the state may be occupied
    pub deadline: Duration,
    /// Trigger fired if the deadline elapses first
    pub trigger: TriggerName,
}

impl TimeoutSpec {
    /// Create a new timeout spec
    pub fn new<T: Into<TriggerName>>(deadline: Duration, trigger: T) -> Self {
        Self {
            deadline,
            trigger: trigger.into(),
        }
    }

    /// A timeout spec firing the default `to_fault` trigger
    pub fn to_fault(deadline: Duration) -> Self {
        Self::new(deadline, TriggerName::to_fault())
    }
}

/// Context handed to a hook while it runs inside the critical section
pub struct HookContext<'a> {
    state: &'a StateId,
    trigger: &'a TriggerName,
    phase: HookPhase,
    handle: MachineHandle,
    pub(crate) timeout_request: Option<TimeoutSpec>,
    pub(crate) spawn_requests: Vec<BoxFuture<'static, ()>>,
}

impl<'a> HookContext<'a> {
    pub(crate) fn new(
        state: &'a StateId,
        trigger: &'a TriggerName,
        phase: HookPhase,
        handle: MachineHandle,
    ) -> Self {
        Self {
            state,
            trigger,
            phase,
            handle,
            timeout_request: None,
            spawn_requests: Vec::new(),
        }
    }

    /// The state this hook belongs to
    pub fn state(&self) -> &StateId {
        self.state
    }

    /// The trigger that caused the transition
    pub fn trigger(&self) -> &TriggerName {
        self.trigger
    }

    /// Whether this is an enter or exit hook invocation
    pub fn phase(&self) -> HookPhase {
        self.phase
    }

    /// A handle for submitting triggers from spawned tasks
    pub fn handle(&self) -> MachineHandle {
        self.handle.clone()
    }

    /// Request an auto-timeout for the state being entered
    ///
    /// Overrides the statically registered [`TimeoutSpec`] for this entry.
    /// Only meaningful from enter hooks; exit-hook requests are ignored.
    pub fn arm_timeout<T: Into<TriggerName>>(&mut self, deadline: Duration, trigger: T) {
        self.timeout_request = Some(TimeoutSpec::new(deadline, trigger));
    }

    /// Spawn a background task once the hook returns
    ///
    /// The spawn itself is deferred until the hook finishes but happens
    /// before the critical section is released. The task is tracked against
    /// the state the machine occupies after this transition and receives a
    /// cancellation (abort) when that state is exited.
    pub fn spawn<F>(&mut self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.spawn_requests.push(Box::pin(fut));
    }
}

impl fmt::Debug for HookContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookContext")
            .field("state", &self.state)
            .field("trigger", &self.trigger)
            .field("phase", &self.phase)
            .field("timeout_request", &self.timeout_request)
            .field("spawn_requests", &self.spawn_requests.len())
            .finish()
    }
}

/// Hooks registered for one state
#[derive(Clone, Default)]
pub struct HookSet {
    /// Enter hook, if registered
    pub on_enter: Option<Hook>,
    /// Exit hook, if registered
    pub on_exit: Option<Hook>,
    /// Auto-timeout armed on entry, if registered
    pub timeout: Option<TimeoutSpec>,
}

impl fmt::Debug for HookSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookSet")
            .field("on_enter", &self.on_enter.is_some())
            .field("on_exit", &self.on_exit.is_some())
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Registry mapping states to their hooks
#[derive(Debug, Clone, Default)]
pub struct HookRegistry {
    hooks: HashMap<StateId, HookSet>,
}

impl HookRegistry {
    /// Create a builder for a new registry
    pub fn builder() -> HookRegistryBuilder {
        HookRegistryBuilder::default()
    }

    /// Get the hooks registered for a state
    pub fn get(&self, state: &StateId) -> Option<&HookSet> {
        self.hooks.get(state)
    }

    /// States that have at least one registration
    pub fn states(&self) -> impl Iterator<Item = &StateId> {
        self.hooks.keys()
    }
}

/// Builder for [`HookRegistry`]
#[derive(Debug, Clone, Default)]
pub struct HookRegistryBuilder {
    hooks: HashMap<StateId, HookSet>,
}

impl HookRegistryBuilder {
    /// Register an enter hook for a state
    pub fn on_enter<S, F>(mut self, state: S, hook: F) -> Self
    where
        S: Into<StateId>,
        F: Fn(&mut HookContext<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.hooks.entry(state.into()).or_default().on_enter = Some(Arc::new(hook));
        self
    }

    /// Register an exit hook for a state
    pub fn on_exit<S, F>(mut self, state: S, hook: F) -> Self
    where
        S: Into<StateId>,
        F: Fn(&mut HookContext<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.hooks.entry(state.into()).or_default().on_exit = Some(Arc::new(hook));
        self
    }

    /// Register an auto-timeout armed whenever a state is entered
    pub fn auto_timeout<S, T>(mut self, state: S, deadline: Duration, trigger: T) -> Self
    where
        S: Into<StateId>,
        T: Into<TriggerName>,
    {
        self.hooks.entry(state.into()).or_default().timeout =
            Some(TimeoutSpec::new(deadline, trigger));
        self
    }

    /// Build the registry
    pub fn build(self) -> HookRegistry {
        HookRegistry { hooks: self.hooks }
    }
}
