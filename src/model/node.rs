use serde::{Deserialize, Serialize};

use super::action::{DataDef, DoneData, ExecutableBlock, InvokeDef};
use super::{StateId, TransitionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum HistoryKind {
    Shallow,
    Deep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum StateKind {
    State,
    Parallel,
    Final,
    History(HistoryKind),
}

/// A node of the statechart arena.
///
/// Nodes are compared by their [`StateId`] only; two nodes with identical
/// content are still distinct states.
#[derive(Debug)]
pub struct StateNode {
    pub(crate) index: StateId,
    pub(crate) id: String,
    pub(crate) kind: StateKind,
    pub(crate) parent: Option<StateId>,
    /// Document root first, immediate parent last.
    pub(crate) ancestors: Vec<StateId>,
    /// Enterable children (states, parallels, finals) in document order.
    pub(crate) children: Vec<StateId>,
    pub(crate) history: Vec<StateId>,
    /// Initial transition of a compound state, or the default transition of a history node.
    pub(crate) initial: Option<TransitionId>,
    pub(crate) transitions: Vec<TransitionId>,
    pub(crate) on_entry: Vec<ExecutableBlock>,
    pub(crate) on_exit: Vec<ExecutableBlock>,
    pub(crate) invokes: Vec<InvokeDef>,
    pub(crate) datamodel: Vec<DataDef>,
    pub(crate) done_data: Option<DoneData>,
}

impl PartialEq for StateNode {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl Eq for StateNode {}

impl StateNode {
    pub fn index(&self) -> StateId {
        self.index
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> StateKind {
        self.kind
    }

    pub fn parent(&self) -> Option<StateId> {
        self.parent
    }

    pub fn ancestors(&self) -> &[StateId] {
        &self.ancestors
    }

    /// Nesting depth; top-level states are at depth 0.
    pub fn depth(&self) -> usize {
        self.ancestors.len()
    }

    /// Ancestor at the given depth, if this node is deeper than that.
    pub fn ancestor_at(&self, depth: usize) -> Option<StateId> {
        self.ancestors.get(depth).copied()
    }

    pub fn children(&self) -> &[StateId] {
        &self.children
    }

    pub fn history(&self) -> &[StateId] {
        &self.history
    }

    pub fn initial(&self) -> Option<TransitionId> {
        self.initial
    }

    pub fn transitions(&self) -> &[TransitionId] {
        &self.transitions
    }

    pub fn on_entry(&self) -> &[ExecutableBlock] {
        &self.on_entry
    }

    pub fn on_exit(&self) -> &[ExecutableBlock] {
        &self.on_exit
    }

    pub fn invokes(&self) -> &[InvokeDef] {
        &self.invokes
    }

    pub fn datamodel(&self) -> &[DataDef] {
        &self.datamodel
    }

    pub fn done_data(&self) -> Option<&DoneData> {
        self.done_data.as_ref()
    }

    pub fn is_atomic(&self) -> bool {
        match self.kind {
            StateKind::State => self.children.is_empty(),
            StateKind::Final => true,
            StateKind::Parallel | StateKind::History(_) => false,
        }
    }

    /// A `<state>` with enterable children.
    pub fn is_compound(&self) -> bool {
        self.kind == StateKind::State && !self.children.is_empty()
    }

    pub fn is_parallel(&self) -> bool {
        self.kind == StateKind::Parallel
    }

    pub fn is_final(&self) -> bool {
        self.kind == StateKind::Final
    }

    pub fn is_history(&self) -> bool {
        matches!(self.kind, StateKind::History(_))
    }

    pub fn history_kind(&self) -> Option<HistoryKind> {
        match self.kind {
            StateKind::History(kind) => Some(kind),
            _ => None,
        }
    }
}
