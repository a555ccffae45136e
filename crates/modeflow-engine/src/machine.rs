/*!
 * Transition engine: the machine instance itself.
 *
 * A [`Machine`] holds the current state, serializes every trigger through
 * one fair critical section, invokes hooks, drives the timeout manager and
 * history ledger, and enforces the global fault/reset behavior. All trigger
 * sources (transport calls, timer expiry, hook-spawned tasks) go through
 * the same section, so two transitions never run concurrently on one
 * instance.
 */
use std::fmt;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use modeflow_core::config::{Config, MachineConfig};
use modeflow_core::types::{Id, StateId, Timestamp, TriggerName};
use modeflow_core::utils::spawn_and_log;

use crate::error::{Error, HookPhase, Result};
use crate::graph::{Graph, GraphBuilder, SourceSpec};
use crate::history::{HistoryEntry, HistoryLedger, DEFAULT_HISTORY_SIZE};
use crate::hooks::{HookContext, HookRegistry, HookRegistryBuilder, TimeoutSpec};
use crate::timeout::TimeoutManager;

/// Capacity of the transition event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 100;

/// Outcome of one executed trigger
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransitionReport {
    /// The trigger that was executed
    pub trigger: TriggerName,
    /// State before the transition
    pub from: StateId,
    /// State after the transition
    pub to: StateId,
    /// When the destination was entered
    pub at: Timestamp,
    /// Set when a hook failure forced the machine into `fault`; carries the
    /// hook's error message
    pub fault: Option<String>,
}

impl TransitionReport {
    /// Whether a hook failure diverted this transition into `fault`
    pub fn is_faulted(&self) -> bool {
        self.fault.is_some()
    }
}

/// External persistence seam for the recovery snapshot
///
/// The engine only defines when the snapshot is read (during
/// [`Machine::start`]) and written (after each recorded leaf state); where
/// it lives between process runs is the implementor's concern. Saves are
/// fire-and-forget so the critical section never blocks on storage.
#[async_trait]
pub trait Checkpoint: fmt::Debug + Send + Sync {
    /// Persist the last recorded state
    async fn save(&self, state: &StateId) -> Result<()>;

    /// Load the previously persisted state, if any
    async fn load(&self) -> Result<Option<StateId>>;
}

/// Machine tuning knobs
#[derive(Debug, Clone)]
pub struct MachineSettings {
    /// Maximum number of retained history entries
    pub history_size: usize,
    /// Whether `start()` may resume at the last recorded state
    pub enable_recovery: bool,
}

impl Default for MachineSettings {
    fn default() -> Self {
        Self {
            history_size: DEFAULT_HISTORY_SIZE,
            enable_recovery: true,
        }
    }
}

impl From<&MachineConfig> for MachineSettings {
    fn from(config: &MachineConfig) -> Self {
        Self {
            history_size: config.history_size,
            enable_recovery: config.enable_recovery,
        }
    }
}

#[derive(Debug)]
struct OwnedTask {
    owner: StateId,
    handle: JoinHandle<()>,
}

#[derive(Debug)]
struct Inner {
    current: StateId,
    ledger: HistoryLedger,
    timeout: TimeoutManager,
    tasks: Vec<OwnedTask>,
}

impl Inner {
    /// Abort tasks owned by the exiting state; finished tasks are reaped
    fn cancel_tasks_owned_by(&mut self, state: &StateId) {
        self.tasks.retain(|task| {
            if task.owner == *state || task.handle.is_finished() {
                task.handle.abort();
                false
            } else {
                true
            }
        });
    }

    fn cancel_all_tasks(&mut self) {
        for task in self.tasks.drain(..) {
            task.handle.abort();
        }
    }
}

#[derive(Debug)]
struct Shared {
    id: Id,
    name: String,
    graph: Arc<Graph>,
    hooks: HookRegistry,
    settings: MachineSettings,
    checkpoint: Option<Arc<dyn Checkpoint>>,
    events: broadcast::Sender<TransitionReport>,
    inner: Mutex<Inner>,
}

/// A single recoverable state machine instance
///
/// Clones are cheap and share the same instance; pass them freely to
/// transports and background tasks.
#[derive(Debug, Clone)]
pub struct Machine {
    shared: Arc<Shared>,
}

impl Machine {
    /// Create a builder for a new machine
    pub fn builder() -> MachineBuilder {
        MachineBuilder::new()
    }

    /// Get the machine ID
    pub fn id(&self) -> &Id {
        &self.shared.id
    }

    /// Get the machine name
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Get the machine's transition graph
    pub fn graph(&self) -> &Graph {
        &self.shared.graph
    }

    /// Get the current state
    pub async fn current_state(&self) -> StateId {
        self.shared.inner.lock().await.current.clone()
    }

    /// Get the last recorded recoverable state, if any
    pub async fn last_state(&self) -> Option<StateId> {
        self.shared
            .inner
            .lock()
            .await
            .ledger
            .snapshot_last_state()
            .cloned()
    }

    /// Get the `n` most recently entered states, in insertion order
    pub async fn history(&self, n: usize) -> Vec<HistoryEntry> {
        self.shared.inner.lock().await.ledger.last(n)
    }

    /// Subscribe to transition reports
    pub fn subscribe(&self) -> broadcast::Receiver<TransitionReport> {
        self.shared.events.subscribe()
    }

    /// Get a weak handle for submitting triggers from background tasks
    pub fn handle(&self) -> MachineHandle {
        MachineHandle {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Seed the recovery snapshot, e.g. from an external checkpoint
    pub async fn restore_last_state<S: Into<StateId>>(&self, state: S) -> Result<()> {
        let state = state.into();
        if state.is_builtin() || !self.shared.graph.has_state(&state) {
            return Err(Error::machine(format!(
                "state {} is not a recoverable leaf",
                state
            )));
        }
        self.shared.inner.lock().await.ledger.restore_last_state(state);
        Ok(())
    }

    /// Execute a named trigger
    ///
    /// Triggers are serialized in arrival order. Unknown or inapplicable
    /// triggers are rejected without any state change; hook failures are
    /// caught and force the machine into `fault` (see
    /// [`TransitionReport::is_faulted`]).
    pub async fn trigger<T: Into<TriggerName>>(&self, trigger: T) -> Result<TransitionReport> {
        Self::execute(self.shared.clone(), trigger.into(), None).await
    }

    /// Enter the machine from `ready`
    ///
    /// With recovery enabled and a recorded (or checkpointed) last state
    /// `S`, fires `recover__S` when the graph declares it and falls back to
    /// the plain `start` trigger otherwise.
    pub async fn start(&self) -> Result<TransitionReport> {
        let shared = &self.shared;
        if shared.settings.enable_recovery {
            if let Some(checkpoint) = &shared.checkpoint {
                match checkpoint.load().await {
                    Ok(Some(state)) => {
                        if !state.is_builtin() && shared.graph.has_state(&state) {
                            shared.inner.lock().await.ledger.restore_last_state(state);
                        } else {
                            warn!(
                                machine = %shared.name, state = %state,
                                "Checkpointed state is not a recoverable leaf; ignoring"
                            );
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!(machine = %shared.name, "Failed to load checkpoint: {}", e),
                }
            }

            let last = shared
                .inner
                .lock()
                .await
                .ledger
                .snapshot_last_state()
                .cloned();
            if let Some(last) = last {
                let recover = TriggerName::recover(&last);
                if shared.graph.is_declared(&recover) {
                    info!(machine = %shared.name, state = %last, "Recovering at last recorded state");
                    return Self::execute(self.shared.clone(), recover, None).await;
                }
                warn!(
                    machine = %shared.name, state = %last,
                    "No recovery rule for last recorded state; starting normally"
                );
            }
        }
        Self::execute(self.shared.clone(), TriggerName::start(), None).await
    }

    /// Tear the machine down: disarm the timer and cancel tracked tasks
    pub async fn shutdown(&self) {
        let mut inner = self.shared.inner.lock().await;
        inner.timeout.disarm();
        inner.cancel_all_tasks();
        info!(machine = %self.shared.name, "Machine shut down");
    }

    async fn execute(
        shared: Arc<Shared>,
        trigger: TriggerName,
        expiry_epoch: Option<u64>,
    ) -> Result<TransitionReport> {
        let mut inner = shared.inner.lock().await;
        // No await points below this line. The body must stay synchronous:
        // a task cancelled while executing here would otherwise release the
        // lock with the machine half-mutated.

        if let Some(epoch) = expiry_epoch {
            if !inner.timeout.is_current(epoch) {
                return Err(Error::invalid_transition(trigger, inner.current.clone()));
            }
        }

        let current = inner.current.clone();
        if !shared.graph.is_declared(&trigger) {
            debug!(machine = %shared.name, trigger = %trigger, "Unknown trigger");
            return Err(Error::unknown_trigger(trigger));
        }
        let resolution = match shared.graph.resolve(&current, &trigger) {
            Some(resolution) => resolution,
            None => {
                debug!(
                    machine = %shared.name, trigger = %trigger, state = %current,
                    "Trigger not applicable"
                );
                return Err(Error::invalid_transition(trigger, current));
            }
        };
        // Self-transitions require an explicitly declared self-loop; a
        // wildcard resolving back to the current state is a no-op guard.
        if resolution.dest == current && !resolution.exact {
            return Err(Error::invalid_transition(trigger, current));
        }
        let dest = resolution.dest;

        // Leaving `current`: its timer and tasks die inside this critical
        // section, before any hook of the next state runs.
        inner.timeout.disarm();
        inner.cancel_tasks_owned_by(&current);
        if dest == StateId::fault() {
            inner.cancel_all_tasks();
        }

        if let Some(on_exit) = shared.hooks.get(&current).and_then(|s| s.on_exit.clone()) {
            let handle = MachineHandle {
                shared: Arc::downgrade(&shared),
            };
            let mut cx = HookContext::new(&current, &trigger, HookPhase::Exit, handle);
            if let Err(e) = on_exit(&mut cx) {
                let err = Error::hook(current.clone(), HookPhase::Exit, e.to_string());
                return Ok(Self::force_fault(&shared, &mut inner, &trigger, &current, err));
            }
            // Exit-spawned work outlives the exiting state and is tracked
            // against the destination.
            let spawns = cx.spawn_requests;
            for fut in spawns {
                inner.tasks.push(OwnedTask {
                    owner: dest.clone(),
                    handle: tokio::spawn(fut),
                });
            }
        }

        let now = Utc::now();
        match Self::enter_state(&shared, &mut inner, &dest, &trigger, now) {
            Ok(()) => {
                let report = TransitionReport {
                    trigger,
                    from: current,
                    to: dest,
                    at: now,
                    fault: None,
                };
                info!(
                    machine = %shared.name, from = %report.from, to = %report.to,
                    trigger = %report.trigger, "Transition executed"
                );
                // No subscribers is fine.
                let _ = shared.events.send(report.clone());
                Ok(report)
            }
            Err(e) => Ok(Self::force_fault(&shared, &mut inner, &trigger, &current, e)),
        }
    }

    /// Switch to `state`, record it, arm its timeout, and run its enter hook
    fn enter_state(
        shared: &Arc<Shared>,
        inner: &mut Inner,
        state: &StateId,
        trigger: &TriggerName,
        now: Timestamp,
    ) -> Result<()> {
        inner.current = state.clone();
        inner.ledger.record(state.clone(), now);
        if *state == StateId::ready() && !shared.settings.enable_recovery {
            inner.ledger.clear_last_state();
        }

        if let (Some(checkpoint), false) = (&shared.checkpoint, state.is_builtin()) {
            let checkpoint = checkpoint.clone();
            let state = state.clone();
            let _ = spawn_and_log("checkpoint-save", async move {
                checkpoint.save(&state).await
            });
        }

        let set = shared.hooks.get(state);
        let mut timeout_spec = set.and_then(|s| s.timeout.clone());
        let mut spawns = Vec::new();
        if let Some(on_enter) = set.and_then(|s| s.on_enter.clone()) {
            let handle = MachineHandle {
                shared: Arc::downgrade(shared),
            };
            let mut cx = HookContext::new(state, trigger, HookPhase::Enter, handle);
            on_enter(&mut cx)
                .map_err(|e| Error::hook(state.clone(), HookPhase::Enter, e.to_string()))?;
            if cx.timeout_request.is_some() {
                timeout_spec = cx.timeout_request.take();
            }
            spawns = cx.spawn_requests;
        }

        if let Some(spec) = timeout_spec {
            Self::arm_timeout(shared, inner, state.clone(), spec);
        }
        for fut in spawns {
            inner.tasks.push(OwnedTask {
                owner: state.clone(),
                handle: tokio::spawn(fut),
            });
        }
        Ok(())
    }

    /// Hook failures never leave the machine stuck: force it into `fault`
    fn force_fault(
        shared: &Arc<Shared>,
        inner: &mut Inner,
        trigger: &TriggerName,
        from: &StateId,
        cause: Error,
    ) -> TransitionReport {
        error!(
            machine = %shared.name, from = %from, trigger = %trigger,
            "{}; forcing fault", cause
        );
        inner.timeout.disarm();
        inner.cancel_all_tasks();

        let fault = StateId::fault();
        let now = Utc::now();
        if let Err(e) = Self::enter_state(shared, inner, &fault, trigger, now) {
            // The machine is in fault regardless; a failing fault hook only
            // loses its own side effects.
            error!(machine = %shared.name, "Fault enter hook failed: {}", e);
        }

        let report = TransitionReport {
            trigger: trigger.clone(),
            from: from.clone(),
            to: fault,
            at: now,
            fault: Some(cause.to_string()),
        };
        let _ = shared.events.send(report.clone());
        report
    }

    fn arm_timeout(shared: &Arc<Shared>, inner: &mut Inner, state: StateId, spec: TimeoutSpec) {
        let weak = Arc::downgrade(shared);
        let trigger = spec.trigger.clone();
        inner.timeout.arm(state, spec.deadline, move |epoch| {
            Box::pin(async move {
                if let Some(shared) = weak.upgrade() {
                    Machine::fire_expired(shared, epoch, trigger).await;
                }
            })
        });
    }

    async fn fire_expired(shared: Arc<Shared>, epoch: u64, trigger: TriggerName) {
        let name = shared.name.clone();
        match Self::execute(shared, trigger.clone(), Some(epoch)).await {
            Ok(report) => info!(
                machine = %name, trigger = %report.trigger, to = %report.to,
                "State timeout expired"
            ),
            Err(e) if e.is_rejection() => {
                debug!(machine = %name, trigger = %trigger, "Timeout expiry dropped: {}", e)
            }
            Err(e) => warn!(machine = %name, trigger = %trigger, "Timeout expiry failed: {}", e),
        }
    }
}

/// A weak, cloneable handle to a machine
///
/// Handed to hook-spawned tasks and transports. It never keeps the machine
/// alive; operations on a dropped machine return an error.
#[derive(Debug, Clone)]
pub struct MachineHandle {
    shared: Weak<Shared>,
}

impl MachineHandle {
    /// Execute a named trigger on the machine
    pub async fn trigger<T: Into<TriggerName>>(&self, trigger: T) -> Result<TransitionReport> {
        let shared = self.upgrade()?;
        Machine::execute(shared, trigger.into(), None).await
    }

    /// Get the machine's current state
    pub async fn current_state(&self) -> Result<StateId> {
        let shared = self.upgrade()?;
        let inner = shared.inner.lock().await;
        Ok(inner.current.clone())
    }

    fn upgrade(&self) -> Result<Arc<Shared>> {
        self.shared
            .upgrade()
            .ok_or_else(|| Error::machine("machine no longer exists"))
    }
}

/// Builder for [`Machine`]
///
/// Declares the graph (states, groups, rules), registers hooks, and applies
/// settings. All validation happens in [`MachineBuilder::build`].
#[derive(Debug, Default)]
pub struct MachineBuilder {
    name: Option<String>,
    graph: GraphBuilder,
    hooks: HookRegistryBuilder,
    settings: MachineSettings,
    checkpoint: Option<Arc<dyn Checkpoint>>,
}

impl MachineBuilder {
    /// Create a new machine builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the machine name
    pub fn with_name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Declare a leaf state
    pub fn state<S: Into<StateId>>(mut self, state: S) -> Self {
        self.graph = self.graph.state(state);
        self
    }

    /// Declare a group of leaf states (name prefix only)
    pub fn group<G, I, L>(mut self, group: G, leaves: I) -> Self
    where
        G: AsRef<str>,
        I: IntoIterator<Item = L>,
        L: AsRef<str>,
    {
        self.graph = self.graph.group(group, leaves);
        self
    }

    /// Declare a transition rule
    pub fn rule<T, S, D>(mut self, trigger: T, source: S, dest: D) -> Self
    where
        T: Into<TriggerName>,
        S: Into<SourceSpec>,
        D: Into<StateId>,
    {
        self.graph = self.graph.rule(trigger, source, dest);
        self
    }

    /// Declare a trigger that owns no rules
    pub fn trigger<T: Into<TriggerName>>(mut self, trigger: T) -> Self {
        self.graph = self.graph.trigger(trigger);
        self
    }

    /// Register an enter hook for a state
    pub fn on_enter<S, F>(mut self, state: S, hook: F) -> Self
    where
        S: Into<StateId>,
        F: Fn(&mut HookContext<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.hooks = self.hooks.on_enter(state, hook);
        self
    }

    /// Register an exit hook for a state
    pub fn on_exit<S, F>(mut self, state: S, hook: F) -> Self
    where
        S: Into<StateId>,
        F: Fn(&mut HookContext<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.hooks = self.hooks.on_exit(state, hook);
        self
    }

    /// Register an auto-timeout armed whenever a state is entered
    pub fn auto_timeout<S, T>(
        mut self,
        state: S,
        deadline: std::time::Duration,
        trigger: T,
    ) -> Self
    where
        S: Into<StateId>,
        T: Into<TriggerName>,
    {
        self.hooks = self.hooks.auto_timeout(state, deadline, trigger);
        self
    }

    /// Replace the hook registrations with a prebuilt registry builder
    pub fn with_hooks(mut self, hooks: HookRegistryBuilder) -> Self {
        self.hooks = hooks;
        self
    }

    /// Set the retained history size
    pub fn with_history_size(mut self, size: usize) -> Self {
        self.settings.history_size = size;
        self
    }

    /// Enable or disable last-state recovery
    pub fn with_recovery(mut self, enabled: bool) -> Self {
        self.settings.enable_recovery = enabled;
        self
    }

    /// Replace the settings wholesale
    pub fn with_settings(mut self, settings: MachineSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Apply the machine section of a loaded configuration
    pub fn with_config(mut self, config: &Config) -> Self {
        self.settings = MachineSettings::from(&config.machine);
        self
    }

    /// Attach an external checkpoint for the recovery snapshot
    pub fn with_checkpoint<C: Checkpoint + 'static>(mut self, checkpoint: C) -> Self {
        self.checkpoint = Some(Arc::new(checkpoint));
        self
    }

    /// Validate the declarations and build the machine
    pub fn build(self) -> Result<Machine> {
        let graph = self.graph.build()?;
        let hooks = self.hooks.build();

        for state in hooks.states() {
            if !graph.has_state(state) {
                return Err(Error::machine(format!(
                    "hooks registered for undeclared state {}",
                    state
                )));
            }
        }
        for state in graph.states() {
            if let Some(spec) = hooks.get(state).and_then(|s| s.timeout.as_ref()) {
                if !graph.is_declared(&spec.trigger) {
                    return Err(Error::unknown_trigger(spec.trigger.clone()));
                }
            }
        }

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let history_size = self.settings.history_size;
        let machine = Machine {
            shared: Arc::new(Shared {
                id: Id::new(),
                name: self.name.unwrap_or_else(|| "machine".to_string()),
                graph: Arc::new(graph),
                hooks,
                settings: self.settings,
                checkpoint: self.checkpoint,
                events,
                inner: Mutex::new(Inner {
                    current: StateId::ready(),
                    ledger: HistoryLedger::new(history_size),
                    timeout: TimeoutManager::new(),
                    tasks: Vec::new(),
                }),
            }),
        };
        info!(
            machine = %machine.shared.name, id = %machine.shared.id,
            states = machine.shared.graph.states().len(),
            "Machine created"
        );
        Ok(machine)
    }
}
