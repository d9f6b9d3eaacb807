//! # Statechart Model
//!
//! The immutable, arena-backed representation of a statechart document.
//!
//! ## Structure
//!
//! * [`StateChart`] owns every [`StateNode`] and [`Transition`] in two flat vectors.
//! * Nodes are addressed by [`StateId`], which is assigned in document order
//!   (pre-order), so sorting ids sorts states in document order.
//! * Each node stores its full ancestor chain, making "ancestor at depth n"
//!   and "is descendant of" constant time.
//!
//! ## Lifecycle
//!
//! A chart is produced once by [`ChartBuilder::build`], validated there, and
//! shared read-only (`Arc<StateChart>`) across every executor that runs it.
//! Running sessions refer back to it by [`StateId`] and are persisted by the
//! document ids of their states.

pub mod action;
pub mod builder;
pub mod node;
pub mod transition;

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use action::*;
pub use builder::{ChartBuilder, StateDef, TransitionDef};
pub use node::{HistoryKind, StateKind, StateNode};
pub use transition::{EventDescriptor, Transition, TransitionKind, TransitionPath};

/// Index of a node in its chart. Ordering is document order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StateId(pub(crate) u32);

impl StateId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransitionId(pub(crate) u32);

impl TransitionId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("Statechart has no states")]
    EmptyChart,
    #[error("Duplicate state id: {id}")]
    DuplicateId { id: String },
    #[error("Invalid state id: {id}")]
    InvalidId { id: String },
    #[error("Transition from {source_id} targets unknown state {target}")]
    UnknownTarget { source_id: String, target: String },
    #[error("Invalid initial for {state}: {message}")]
    InvalidInitial { state: String, message: String },
    #[error("History {id} needs exactly one eventless, unguarded default transition")]
    HistoryWithoutDefault { id: String },
    #[error("Default transition of history {id} must target states inside {parent}")]
    InvalidHistoryDefault { id: String, parent: String },
    #[error("{parent} ({kind}) cannot contain {child}")]
    IllegalChild {
        parent: String,
        kind: String,
        child: String,
    },
    #[error("Invalid event descriptor `{descriptor}` on {state}")]
    InvalidEvent { state: String, descriptor: String },
    #[error("Unknown custom action {namespace}:{local_name}")]
    UnknownAction {
        namespace: String,
        local_name: String,
    },
    #[error("Unknown state id: {id}")]
    UnknownState { id: String },
}

pub type ModelResult<T> = Result<T, ModelError>;

/// A validated statechart document.
#[derive(Debug)]
pub struct StateChart {
    pub(crate) name: Option<String>,
    pub(crate) datamodel_name: Option<String>,
    pub(crate) nodes: Vec<StateNode>,
    pub(crate) transitions: Vec<Transition>,
    pub(crate) top_level: Vec<StateId>,
    pub(crate) initial: TransitionId,
    pub(crate) datamodel: Vec<DataDef>,
    pub(crate) script: Vec<Action>,
    pub(crate) ids: HashMap<String, StateId>,
}

impl StateChart {
    pub fn builder() -> ChartBuilder {
        ChartBuilder::new()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Datamodel requested by the document, if any.
    pub fn datamodel_name(&self) -> Option<&str> {
        self.datamodel_name.as_deref()
    }

    pub fn node(&self, id: StateId) -> &StateNode {
        &self.nodes[id.index()]
    }

    pub fn transition(&self, id: TransitionId) -> &Transition {
        &self.transitions[id.index()]
    }

    pub fn nodes(&self) -> impl Iterator<Item = &StateNode> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn top_level(&self) -> &[StateId] {
        &self.top_level
    }

    pub fn initial_transition(&self) -> &Transition {
        self.transition(self.initial)
    }

    pub fn global_datamodel(&self) -> &[DataDef] {
        &self.datamodel
    }

    pub fn global_script(&self) -> &[Action] {
        &self.script
    }

    pub fn find(&self, id: &str) -> Option<StateId> {
        self.ids.get(id).copied()
    }

    pub fn resolve(&self, id: &str) -> ModelResult<StateId> {
        self.find(id).ok_or_else(|| ModelError::UnknownState { id: id.to_string() })
    }

    /// `state` is a proper descendant of `ancestor`.
    pub fn is_descendant(&self, state: StateId, ancestor: StateId) -> bool {
        let depth = self.node(ancestor).depth();
        self.node(state).ancestor_at(depth) == Some(ancestor)
    }

    /// Proper ancestors of `state`, nearest first, stopping before `upper`
    /// (`None` walks to the top).
    pub fn proper_ancestors(
        &self,
        state: StateId,
        upper: Option<StateId>,
    ) -> impl Iterator<Item = StateId> + '_ {
        self.node(state)
            .ancestors
            .iter()
            .rev()
            .copied()
            .take_while(move |a| Some(*a) != upper)
    }

    /// Least common ancestor of two nodes.
    ///
    /// A node is its own LCA; if one node contains the other the container is
    /// returned. `None` stands for the document root.
    pub fn lca(&self, a: StateId, b: StateId) -> Option<StateId> {
        if a == b {
            return Some(a);
        }
        if self.is_descendant(a, b) {
            return Some(b);
        }
        if self.is_descendant(b, a) {
            return Some(a);
        }
        let seen: HashSet<StateId> = self.node(a).ancestors.iter().copied().collect();
        self.node(b)
            .ancestors
            .iter()
            .rev()
            .find(|candidate| seen.contains(candidate))
            .copied()
    }

    /// Least common compound ancestor: the nearest proper ancestor of
    /// `states[0]` that is a `<state>` (not a parallel) and contains every
    /// other node. `None` stands for the document root.
    pub fn lcca(&self, states: &[StateId]) -> Option<StateId> {
        let (head, tail) = states.split_first()?;
        self.proper_ancestors(*head, None).find(|anc| {
            self.node(*anc).kind() == StateKind::State
                && tail.iter().all(|s| self.is_descendant(*s, *anc))
        })
    }

    /// Every state in `states` plus all their ancestors strictly below `upper`.
    pub fn ancestor_closure<I>(&self, states: I, upper: Option<StateId>) -> BTreeSet<StateId>
    where
        I: IntoIterator<Item = StateId>,
    {
        let mut closure = BTreeSet::new();
        for state in states {
            closure.insert(state);
            closure.extend(self.proper_ancestors(state, upper));
        }
        closure
    }

    /// Custom actions used anywhere in the document.
    pub fn custom_actions(&self) -> Vec<&CustomActionCall> {
        let mut out = Vec::new();
        let blocks = self
            .nodes
            .iter()
            .flat_map(|n| n.on_entry.iter().chain(n.on_exit.iter()))
            .flat_map(|b| b.actions.iter());
        let others = self
            .transitions
            .iter()
            .flat_map(|t| t.actions.iter())
            .chain(self.nodes.iter().flat_map(|n| n.invokes.iter().flat_map(|i| i.finalize.iter())))
            .chain(self.script.iter());
        for action in blocks.chain(others) {
            action.collect_custom(&mut out);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample_chart() -> StateChart {
        ChartBuilder::new()
            .state(
                StateDef::parallel("P")
                    .child(
                        StateDef::state("A")
                            .child(StateDef::state("A1"))
                            .child(StateDef::state("A2")),
                    )
                    .child(
                        StateDef::state("B")
                            .child(StateDef::state("B1"))
                            .child(StateDef::state("B2")),
                    ),
            )
            .state(StateDef::state("X"))
            .build()
            .unwrap()
    }

    #[test]
    fn test_document_order_ids() {
        let chart = sample_chart();
        let ids: Vec<&str> = chart.nodes().map(|n| n.id()).collect();
        assert_eq!(ids, vec!["P", "A", "A1", "A2", "B", "B1", "B2", "X"]);
    }

    #[test]
    fn test_lca_basics() {
        let chart = sample_chart();
        let id = |s: &str| chart.find(s).unwrap();
        assert_eq!(chart.lca(id("A1"), id("A1")), Some(id("A1")));
        assert_eq!(chart.lca(id("A1"), id("A2")), Some(id("A")));
        assert_eq!(chart.lca(id("A1"), id("B2")), Some(id("P")));
        assert_eq!(chart.lca(id("A"), id("A2")), Some(id("A")));
        assert_eq!(chart.lca(id("A2"), id("X")), None);
    }

    #[test]
    fn test_lcca_skips_parallel() {
        let chart = sample_chart();
        let id = |s: &str| chart.find(s).unwrap();
        assert_eq!(chart.lcca(&[id("A1"), id("A2")]), Some(id("A")));
        // P is the only common ancestor and it is parallel
        assert_eq!(chart.lcca(&[id("A1"), id("B1")]), None);
    }

    #[test]
    fn test_ancestor_closure_with_bound() {
        let chart = sample_chart();
        let id = |s: &str| chart.find(s).unwrap();
        let closure = chart.ancestor_closure([id("A1"), id("B2")], Some(id("P")));
        let expected: BTreeSet<_> = [id("A"), id("A1"), id("B"), id("B2")].into_iter().collect();
        assert_eq!(closure, expected);
        let full = chart.ancestor_closure([id("A1")], None);
        assert!(full.contains(&id("P")));
    }

    /// Random tree shapes, as nesting depth per node in pre-order.
    fn tree_strategy() -> impl Strategy<Value = Vec<usize>> {
        prop::collection::vec(0usize..4, 1..24).prop_map(|raw| {
            let mut depths = vec![0];
            for d in raw {
                let prev = *depths.last().unwrap();
                depths.push(d.min(prev + 1));
            }
            depths
        })
    }

    fn chart_from_depths(depths: &[usize]) -> StateChart {
        fn build(depths: &[usize], pos: &mut usize, depth: usize) -> StateDef {
            let mut def = StateDef::state(format!("n{}", *pos));
            *pos += 1;
            while *pos < depths.len() && depths[*pos] == depth + 1 {
                def = def.child(build(depths, pos, depth + 1));
            }
            def
        }
        let mut builder = ChartBuilder::new();
        let mut pos = 0;
        while pos < depths.len() {
            builder = builder.state(build(depths, &mut pos, 0));
        }
        builder.build().unwrap()
    }

    proptest! {
        #[test]
        fn lca_is_the_closest_common_ancestor(
            depths in tree_strategy(),
            a in any::<prop::sample::Index>(),
            b in any::<prop::sample::Index>(),
        ) {
            let chart = chart_from_depths(&depths);
            let a = StateId(a.index(chart.len()) as u32);
            let b = StateId(b.index(chart.len()) as u32);
            let contains = |anc: StateId, s: StateId| anc == s || chart.is_descendant(s, anc);
            match chart.lca(a, b) {
                Some(l) => {
                    prop_assert!(contains(l, a) && contains(l, b));
                    for child in chart.node(l).children() {
                        prop_assert!(!(contains(*child, a) && contains(*child, b)));
                    }
                }
                None => {
                    let top = |s: StateId| chart.node(s).ancestors().first().copied().unwrap_or(s);
                    prop_assert_ne!(top(a), top(b));
                }
            }
            prop_assert_eq!(chart.lca(a, a), Some(a));
        }
    }
}
