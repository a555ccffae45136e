/*!
 * Graph model: declared states, hierarchical groups, and triggers compiled
 * into a flat, validated transition table.
 *
 * The graph is pure data. It is built once, validated at construction, and
 * shared read-only with the transition engine and the router adapter.
 */
use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use modeflow_core::types::{StateId, TriggerName};

use crate::error::{Error, Result};

/// Source of a transition rule: a specific state or any state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    /// The rule applies from any current state
    Any,
    /// The rule applies only from the given state
    From(StateId),
}

impl SourceSpec {
    /// Render the source the way the wire contract spells it (`"*"` for any)
    pub fn as_label(&self) -> &str {
        match self {
            SourceSpec::Any => "*",
            SourceSpec::From(state) => state.as_str(),
        }
    }
}

impl From<&str> for SourceSpec {
    fn from(s: &str) -> Self {
        if s == "*" {
            SourceSpec::Any
        } else {
            SourceSpec::From(StateId::new(s))
        }
    }
}

impl From<StateId> for SourceSpec {
    fn from(state: StateId) -> Self {
        SourceSpec::From(state)
    }
}

/// A declared transition rule
#[derive(Debug, Clone)]
pub struct TransitionRule {
    /// Trigger owning the rule
    pub trigger: TriggerName,
    /// Source specification
    pub source: SourceSpec,
    /// Destination state
    pub dest: StateId,
}

impl TransitionRule {
    /// Create a new transition rule
    pub fn new<T, S, D>(trigger: T, source: S, dest: D) -> Self
    where
        T: Into<TriggerName>,
        S: Into<SourceSpec>,
        D: Into<StateId>,
    {
        Self {
            trigger: trigger.into(),
            source: source.into(),
            dest: dest.into(),
        }
    }
}

/// Result of resolving a `(current state, trigger)` pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Destination state
    pub dest: StateId,
    /// Whether an exact-source rule matched (wildcard otherwise)
    pub exact: bool,
}

/// Compiled rules of one trigger
#[derive(Debug, Clone, Default)]
struct CompiledTrigger {
    /// Exact-source rules, source -> destination
    exact: BTreeMap<StateId, StateId>,
    /// Wildcard rule destination, if declared
    wildcard: Option<StateId>,
}

/// An edge of the graph description, for external diagram rendering
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphEdge {
    /// Trigger labeling the edge
    pub trigger: TriggerName,
    /// Source state, or `"*"` for wildcard rules
    pub source: String,
    /// Destination state
    pub dest: StateId,
}

/// Static description of a machine's graph: states as nodes, triggers as edges
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphDescription {
    /// All states, declared leaves first, built-ins last
    pub states: Vec<StateId>,
    /// All transition rules
    pub edges: Vec<GraphEdge>,
}

impl GraphDescription {
    /// Render the description as a Graphviz DOT document
    ///
    /// Wildcard rules are expanded to one edge per concrete source state;
    /// wildcard self-edges are no-ops at runtime and are omitted.
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph machine {\n    rankdir=LR;\n    node [shape=box, style=rounded];\n");
        for state in &self.states {
            out.push_str(&format!("    \"{}\";\n", state));
        }
        for edge in &self.edges {
            if edge.source == "*" {
                for state in &self.states {
                    if state != &edge.dest {
                        out.push_str(&format!(
                            "    \"{}\" -> \"{}\" [label=\"{}\"];\n",
                            state, edge.dest, edge.trigger
                        ));
                    }
                }
            } else {
                out.push_str(&format!(
                    "    \"{}\" -> \"{}\" [label=\"{}\"];\n",
                    edge.source, edge.dest, edge.trigger
                ));
            }
        }
        out.push_str("}\n");
        out
    }
}

/// Immutable, validated transition table
#[derive(Debug, Clone)]
pub struct Graph {
    /// All states, declared leaves first, then `ready` and `fault`
    states: Vec<StateId>,
    /// Fast membership lookup
    state_set: HashSet<StateId>,
    /// Compiled triggers, ordered by name
    triggers: BTreeMap<TriggerName, CompiledTrigger>,
    /// First declared leaf, target of the default `start` rule
    first_leaf: Option<StateId>,
}

impl Graph {
    /// Create a builder for a new graph
    pub fn builder() -> GraphBuilder {
        GraphBuilder::new()
    }

    /// Resolve a `(current state, trigger)` pair to a destination
    ///
    /// Exact-source rules are preferred over wildcard rules. Returns `None`
    /// when the trigger has no applicable rule in the given state.
    pub fn resolve(&self, current: &StateId, trigger: &TriggerName) -> Option<Resolution> {
        let compiled = self.triggers.get(trigger)?;
        if let Some(dest) = compiled.exact.get(current) {
            return Some(Resolution {
                dest: dest.clone(),
                exact: true,
            });
        }
        compiled.wildcard.as_ref().map(|dest| Resolution {
            dest: dest.clone(),
            exact: false,
        })
    }

    /// Whether a trigger is declared anywhere in the graph
    pub fn is_declared(&self, trigger: &TriggerName) -> bool {
        self.triggers.contains_key(trigger)
    }

    /// Whether a state exists in the graph
    pub fn has_state(&self, state: &StateId) -> bool {
        self.state_set.contains(state)
    }

    /// All states, declared leaves first, built-ins last
    pub fn states(&self) -> &[StateId] {
        &self.states
    }

    /// All declared triggers, ordered by name
    pub fn triggers(&self) -> Vec<TriggerName> {
        self.triggers.keys().cloned().collect()
    }

    /// First declared leaf state, if any
    pub fn first_leaf(&self) -> Option<&StateId> {
        self.first_leaf.as_ref()
    }

    /// Produce the static graph description for introspection and rendering
    pub fn description(&self) -> GraphDescription {
        let mut edges = Vec::new();
        for (trigger, compiled) in &self.triggers {
            for (source, dest) in &compiled.exact {
                edges.push(GraphEdge {
                    trigger: trigger.clone(),
                    source: source.as_str().to_string(),
                    dest: dest.clone(),
                });
            }
            if let Some(dest) = &compiled.wildcard {
                edges.push(GraphEdge {
                    trigger: trigger.clone(),
                    source: "*".to_string(),
                    dest: dest.clone(),
                });
            }
        }
        GraphDescription {
            states: self.states.clone(),
            edges,
        }
    }
}

/// Builder for [`Graph`]
///
/// States and groups are declared first, then triggers and their rules.
/// All validation happens in [`GraphBuilder::build`]; the built-in states
/// and triggers are merged in there as well.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    states: Vec<StateId>,
    rules: Vec<TransitionRule>,
    declared_triggers: Vec<TriggerName>,
}

impl GraphBuilder {
    /// Create a new graph builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a leaf state
    pub fn state<S: Into<StateId>>(mut self, state: S) -> Self {
        self.states.push(state.into());
        self
    }

    /// Declare a group of leaf states
    ///
    /// The group contributes only a name prefix: `group("Running",
    /// ["picking"])` declares the single leaf `Running_picking`.
    pub fn group<G, I, L>(mut self, group: G, leaves: I) -> Self
    where
        G: AsRef<str>,
        I: IntoIterator<Item = L>,
        L: AsRef<str>,
    {
        for leaf in leaves {
            self.states.push(StateId::scoped(group.as_ref(), leaf));
        }
        self
    }

    /// Declare a transition rule
    pub fn rule<T, S, D>(mut self, trigger: T, source: S, dest: D) -> Self
    where
        T: Into<TriggerName>,
        S: Into<SourceSpec>,
        D: Into<StateId>,
    {
        self.rules.push(TransitionRule::new(trigger, source, dest));
        self
    }

    /// Declare a trigger that owns no rules (yet)
    ///
    /// The trigger appears in introspection output and resolves to
    /// "not applicable" in every state.
    pub fn trigger<T: Into<TriggerName>>(mut self, trigger: T) -> Self {
        self.declared_triggers.push(trigger.into());
        self
    }

    /// Validate the declarations and build the graph with the built-in
    /// states and triggers merged in
    pub fn build(self) -> Result<Graph> {
        let mut states = Vec::with_capacity(self.states.len() + 2);
        let mut state_set = HashSet::new();

        for state in self.states {
            if state.is_builtin() || !state_set.insert(state.clone()) {
                return Err(Error::duplicate_state(state));
            }
            states.push(state);
        }
        let first_leaf = states.first().cloned();
        for builtin in [StateId::ready(), StateId::fault()] {
            state_set.insert(builtin.clone());
            states.push(builtin);
        }

        let mut triggers: BTreeMap<TriggerName, CompiledTrigger> = BTreeMap::new();

        for trigger in &self.declared_triggers {
            if trigger.is_recovery() || triggers.contains_key(trigger) {
                return Err(Error::duplicate_trigger(trigger.clone()));
            }
            triggers.insert(trigger.clone(), CompiledTrigger::default());
        }

        // Caller rules first; each (trigger, source) pair may be bound once.
        for rule in &self.rules {
            if rule.trigger.is_recovery() {
                return Err(Error::duplicate_trigger(rule.trigger.clone()));
            }
            Self::check_rule_states(&state_set, rule)?;
            let compiled = triggers.entry(rule.trigger.clone()).or_default();
            match &rule.source {
                SourceSpec::Any => {
                    if compiled.wildcard.is_some() {
                        return Err(Error::duplicate_trigger(rule.trigger.clone()));
                    }
                    compiled.wildcard = Some(rule.dest.clone());
                }
                SourceSpec::From(source) => {
                    if compiled
                        .exact
                        .insert(source.clone(), rule.dest.clone())
                        .is_some()
                    {
                        return Err(Error::duplicate_trigger(rule.trigger.clone()));
                    }
                }
            }
        }

        // Built-in triggers: caller rules win over the defaults.
        let start = triggers.entry(TriggerName::start()).or_default();
        if start.exact.is_empty() && start.wildcard.is_none() {
            if let Some(leaf) = &first_leaf {
                start.exact.insert(StateId::ready(), leaf.clone());
            }
        }

        let to_fault = triggers.entry(TriggerName::to_fault()).or_default();
        if to_fault.wildcard.is_none() {
            to_fault.wildcard = Some(StateId::fault());
        }

        let reset = triggers.entry(TriggerName::reset()).or_default();
        reset
            .exact
            .entry(StateId::fault())
            .or_insert_with(StateId::ready);

        // One recovery trigger per declared leaf.
        for leaf in states.iter().filter(|s| !s.is_builtin()) {
            let mut compiled = CompiledTrigger::default();
            compiled.exact.insert(StateId::ready(), leaf.clone());
            triggers.insert(TriggerName::recover(leaf), compiled);
        }

        Ok(Graph {
            states,
            state_set,
            triggers,
            first_leaf,
        })
    }

    fn check_rule_states(state_set: &HashSet<StateId>, rule: &TransitionRule) -> Result<()> {
        if let SourceSpec::From(source) = &rule.source {
            if !state_set.contains(source) {
                return Err(Error::dangling_reference(
                    rule.trigger.clone(),
                    source.clone(),
                ));
            }
        }
        if !state_set.contains(&rule.dest) {
            return Err(Error::dangling_reference(
                rule.trigger.clone(),
                rule.dest.clone(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pick_place_graph() -> Graph {
        Graph::builder()
            .group("Running", ["picking", "placing"])
            .rule("start", "ready", "Running_picking")
            .rule("finished_picking", "Running_picking", "Running_placing")
            .build()
            .unwrap()
    }

    #[test]
    fn test_group_expands_to_prefixed_leaves() {
        let graph = pick_place_graph();
        assert!(graph.has_state(&StateId::new("Running_picking")));
        assert!(graph.has_state(&StateId::new("Running_placing")));
        assert!(graph.has_state(&StateId::ready()));
        assert!(graph.has_state(&StateId::fault()));
        assert_eq!(graph.states().len(), 4);
    }

    #[test]
    fn test_builtin_triggers_merged() {
        let graph = pick_place_graph();
        for name in ["start", "reset", "to_fault", "recover__Running_picking"] {
            assert!(graph.is_declared(&TriggerName::new(name)), "{}", name);
        }
    }

    #[test]
    fn test_default_start_rule_targets_first_leaf() {
        let graph = Graph::builder()
            .state("homing")
            .state("idle")
            .build()
            .unwrap();
        let res = graph
            .resolve(&StateId::ready(), &TriggerName::start())
            .unwrap();
        assert_eq!(res.dest, StateId::new("homing"));
    }

    #[test]
    fn test_declared_start_rule_wins_over_default() {
        let graph = pick_place_graph();
        let res = graph
            .resolve(&StateId::ready(), &TriggerName::start())
            .unwrap();
        assert_eq!(res.dest, StateId::new("Running_picking"));
        assert!(res.exact);
    }

    #[test]
    fn test_exact_rule_beats_wildcard() {
        let graph = Graph::builder()
            .state("holding")
            .state("parked")
            .rule("halt", "*", "fault")
            .rule("halt", "holding", "parked")
            .build()
            .unwrap();

        let from_holding = graph
            .resolve(&StateId::new("holding"), &TriggerName::new("halt"))
            .unwrap();
        assert_eq!(from_holding.dest, StateId::new("parked"));
        assert!(from_holding.exact);

        let from_parked = graph
            .resolve(&StateId::new("parked"), &TriggerName::new("halt"))
            .unwrap();
        assert_eq!(from_parked.dest, StateId::fault());
        assert!(!from_parked.exact);
    }

    #[test]
    fn test_unmatched_pair_resolves_to_none() {
        let graph = pick_place_graph();
        assert!(graph
            .resolve(&StateId::ready(), &TriggerName::new("finished_picking"))
            .is_none());
        assert!(graph
            .resolve(&StateId::ready(), &TriggerName::new("undeclared"))
            .is_none());
    }

    #[test]
    fn test_reset_only_from_fault() {
        let graph = pick_place_graph();
        let res = graph
            .resolve(&StateId::fault(), &TriggerName::reset())
            .unwrap();
        assert_eq!(res.dest, StateId::ready());
        assert!(graph
            .resolve(&StateId::ready(), &TriggerName::reset())
            .is_none());
    }

    #[test]
    fn test_duplicate_state_rejected() {
        let err = Graph::builder().state("a").state("a").build().unwrap_err();
        assert!(matches!(err, Error::DuplicateState(_)));

        let err = Graph::builder().state("ready").build().unwrap_err();
        assert!(matches!(err, Error::DuplicateState(_)));
    }

    #[test]
    fn test_duplicate_rule_rejected() {
        let err = Graph::builder()
            .state("a")
            .state("b")
            .rule("go", "a", "b")
            .rule("go", "a", "fault")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateTrigger(_)));
    }

    #[test]
    fn test_reserved_recovery_namespace_rejected() {
        let err = Graph::builder()
            .state("a")
            .rule("recover__a", "ready", "a")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateTrigger(_)));
    }

    #[test]
    fn test_dangling_reference_rejected() {
        let err = Graph::builder()
            .state("a")
            .rule("go", "a", "nowhere")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::DanglingReference { .. }));

        let err = Graph::builder()
            .state("a")
            .rule("go", "nowhere", "a")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::DanglingReference { .. }));
    }

    #[test]
    fn test_ruleless_trigger_declared_but_never_applicable() {
        let graph = Graph::builder().state("a").trigger("noop").build().unwrap();
        let noop = TriggerName::new("noop");
        assert!(graph.is_declared(&noop));
        assert!(graph.resolve(&StateId::ready(), &noop).is_none());
        assert!(graph.resolve(&StateId::new("a"), &noop).is_none());
    }

    #[test]
    fn test_description_edges() {
        let graph = pick_place_graph();
        let desc = graph.description();
        assert_eq!(desc.states, graph.states());

        let to_fault = desc
            .edges
            .iter()
            .find(|e| e.trigger == TriggerName::to_fault())
            .unwrap();
        assert_eq!(to_fault.source, "*");
        assert_eq!(to_fault.dest, StateId::fault());

        let start = desc
            .edges
            .iter()
            .find(|e| e.trigger == TriggerName::start())
            .unwrap();
        assert_eq!(start.source, "ready");
    }

    #[test]
    fn test_dot_rendering() {
        let dot = pick_place_graph().description().to_dot();
        assert!(dot.starts_with("digraph machine {"));
        assert!(dot.contains("\"ready\" -> \"Running_picking\" [label=\"start\"]"));
        // Wildcard expansion skips the self-edge on fault
        assert!(dot.contains("\"Running_picking\" -> \"fault\" [label=\"to_fault\"]"));
        assert!(!dot.contains("\"fault\" -> \"fault\""));
    }
}
