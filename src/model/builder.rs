//! Programmatic construction of a [`StateChart`].
//!
//! Documents are described with [`StateDef`] / [`TransitionDef`] trees and
//! compiled by [`ChartBuilder::build`], which flattens them into the arena,
//! resolves every target id, fills in default initial transitions and
//! precomputes transition domains and paths. All structural problems surface
//! here as [`ModelError`]s; a chart that builds is safe to execute.

use std::collections::HashMap;

use lazy_static::lazy_static;
use regex::Regex;
use tracing::debug;

use super::action::{Action, DataDef, DoneData, ExecutableBlock, InvokeDef};
use super::node::{HistoryKind, StateKind, StateNode};
use super::transition::{EventDescriptor, Transition, TransitionKind, TransitionPath};
use super::{ModelError, ModelResult, StateChart, StateId, TransitionId};

lazy_static! {
    static ref STATE_ID: Regex = Regex::new(r"^[A-Za-z_][\w.\-:]*$").unwrap();
    static ref EVENT_DESCRIPTOR: Regex = Regex::new(r"^(\*|[\w\-:]+(\.[\w\-:]+)*(\.\*|\.)?)$").unwrap();
}

const GENERATED_ID_PREFIX: &str = "_generated_id_";
const DOCUMENT: &str = "scxml";

#[derive(Debug, Clone)]
pub struct StateDef {
    id: Option<String>,
    kind: StateKind,
    initial: Vec<String>,
    initial_actions: Vec<Action>,
    children: Vec<StateDef>,
    transitions: Vec<TransitionDef>,
    on_entry: Vec<ExecutableBlock>,
    on_exit: Vec<ExecutableBlock>,
    invokes: Vec<InvokeDef>,
    datamodel: Vec<DataDef>,
    done_data: Option<DoneData>,
}

impl StateDef {
    /// A state without an id; one is generated at build time.
    pub fn anonymous(kind: StateKind) -> Self {
        Self {
            id: None,
            kind,
            initial: Vec::new(),
            initial_actions: Vec::new(),
            children: Vec::new(),
            transitions: Vec::new(),
            on_entry: Vec::new(),
            on_exit: Vec::new(),
            invokes: Vec::new(),
            datamodel: Vec::new(),
            done_data: None,
        }
    }

    fn with_id(id: impl Into<String>, kind: StateKind) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::anonymous(kind)
        }
    }

    pub fn state(id: impl Into<String>) -> Self {
        Self::with_id(id, StateKind::State)
    }

    pub fn parallel(id: impl Into<String>) -> Self {
        Self::with_id(id, StateKind::Parallel)
    }

    pub fn final_state(id: impl Into<String>) -> Self {
        Self::with_id(id, StateKind::Final)
    }

    pub fn history(id: impl Into<String>, kind: HistoryKind) -> Self {
        Self::with_id(id, StateKind::History(kind))
    }

    pub fn child(mut self, child: StateDef) -> Self {
        self.children.push(child);
        self
    }

    pub fn children(mut self, children: impl IntoIterator<Item = StateDef>) -> Self {
        self.children.extend(children);
        self
    }

    /// Adds a target of the `initial` attribute.
    pub fn initial(mut self, target: impl Into<String>) -> Self {
        self.initial.push(target.into());
        self
    }

    /// Content of the `<initial>` element's transition.
    pub fn initial_actions(mut self, actions: Vec<Action>) -> Self {
        self.initial_actions = actions;
        self
    }

    pub fn transition(mut self, transition: TransitionDef) -> Self {
        self.transitions.push(transition);
        self
    }

    pub fn on_entry(self, actions: Vec<Action>) -> Self {
        self.on_entry_block(ExecutableBlock::new(actions))
    }

    pub fn on_entry_block(mut self, block: ExecutableBlock) -> Self {
        self.on_entry.push(block);
        self
    }

    pub fn on_exit(self, actions: Vec<Action>) -> Self {
        self.on_exit_block(ExecutableBlock::new(actions))
    }

    pub fn on_exit_block(mut self, block: ExecutableBlock) -> Self {
        self.on_exit.push(block);
        self
    }

    pub fn invoke(mut self, invoke: InvokeDef) -> Self {
        self.invokes.push(invoke);
        self
    }

    pub fn data(mut self, data: DataDef) -> Self {
        self.datamodel.push(data);
        self
    }

    pub fn done_data(mut self, done_data: DoneData) -> Self {
        self.done_data = Some(done_data);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct TransitionDef {
    events: Vec<String>,
    cond: Option<String>,
    targets: Vec<String>,
    kind: TransitionKind,
    actions: Vec<Action>,
}

impl TransitionDef {
    /// Transition triggered by a space separated list of event descriptors.
    pub fn on(events: impl AsRef<str>) -> Self {
        Self {
            events: events
                .as_ref()
                .split_whitespace()
                .map(str::to_string)
                .collect(),
            ..Default::default()
        }
    }

    pub fn eventless() -> Self {
        Self::default()
    }

    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.targets.push(target.into());
        self
    }

    pub fn cond(mut self, cond: impl Into<String>) -> Self {
        self.cond = Some(cond.into());
        self
    }

    pub fn internal(mut self) -> Self {
        self.kind = TransitionKind::Internal;
        self
    }

    pub fn action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    pub fn actions(mut self, actions: Vec<Action>) -> Self {
        self.actions.extend(actions);
        self
    }
}

#[derive(Debug, Default)]
pub struct ChartBuilder {
    name: Option<String>,
    datamodel_name: Option<String>,
    initial: Vec<String>,
    datamodel: Vec<DataDef>,
    script: Vec<Action>,
    states: Vec<StateDef>,
}

impl ChartBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn datamodel(mut self, datamodel: impl Into<String>) -> Self {
        self.datamodel_name = Some(datamodel.into());
        self
    }

    pub fn initial(mut self, target: impl Into<String>) -> Self {
        self.initial.push(target.into());
        self
    }

    pub fn data(mut self, data: DataDef) -> Self {
        self.datamodel.push(data);
        self
    }

    pub fn script(mut self, actions: Vec<Action>) -> Self {
        self.script.extend(actions);
        self
    }

    pub fn state(mut self, state: StateDef) -> Self {
        self.states.push(state);
        self
    }

    pub fn build(self) -> ModelResult<StateChart> {
        if self.states.is_empty() {
            return Err(ModelError::EmptyChart);
        }

        let mut flat = Flattener::default();
        let mut top_level = Vec::with_capacity(self.states.len());
        for def in self.states {
            if matches!(def.kind, StateKind::History(_)) {
                return Err(ModelError::IllegalChild {
                    parent: DOCUMENT.to_string(),
                    kind: DOCUMENT.to_string(),
                    child: def.id.unwrap_or_default(),
                });
            }
            top_level.push(flat.flatten(def, None, Vec::new())?);
        }

        let mut chart = StateChart {
            name: self.name,
            datamodel_name: self.datamodel_name,
            nodes: flat.nodes,
            transitions: Vec::new(),
            top_level,
            initial: TransitionId(0),
            datamodel: self.datamodel,
            script: self.script,
            ids: flat.ids,
        };

        for pending in flat.pending {
            resolve_state(&mut chart, pending)?;
        }

        let initial_targets = if self.initial.is_empty() {
            vec![chart.top_level[0]]
        } else {
            resolve_targets(&chart, DOCUMENT, &self.initial)?
        };
        check_orthogonal(&chart, DOCUMENT, &initial_targets)?;
        chart.initial = push_transition(
            &mut chart,
            None,
            Vec::new(),
            None,
            initial_targets,
            TransitionKind::External,
            Vec::new(),
        );

        for index in 0..chart.transitions.len() {
            let (domain, paths) = {
                let t = &chart.transitions[index];
                let domain = transition_domain(&chart, t);
                (domain, transition_paths(&chart, t, domain))
            };
            chart.transitions[index].domain = domain;
            chart.transitions[index].paths = paths;
        }

        debug!(
            states = chart.nodes.len(),
            transitions = chart.transitions.len(),
            "statechart built"
        );
        Ok(chart)
    }
}

/// Transitions and initial targets waiting for every id to be known.
struct PendingState {
    state: StateId,
    transitions: Vec<TransitionDef>,
    initial: Vec<String>,
    initial_actions: Vec<Action>,
}

#[derive(Default)]
struct Flattener {
    nodes: Vec<StateNode>,
    pending: Vec<PendingState>,
    ids: HashMap<String, StateId>,
    generated: usize,
}

impl Flattener {
    fn flatten(
        &mut self,
        def: StateDef,
        parent: Option<StateId>,
        ancestors: Vec<StateId>,
    ) -> ModelResult<StateId> {
        let index = StateId(self.nodes.len() as u32);
        let id = match def.id {
            Some(id) => {
                if !STATE_ID.is_match(&id) {
                    return Err(ModelError::InvalidId { id });
                }
                id
            }
            None => loop {
                let candidate = format!("{}{}", GENERATED_ID_PREFIX, self.generated);
                self.generated += 1;
                if !self.ids.contains_key(&candidate) {
                    break candidate;
                }
            },
        };
        if self.ids.insert(id.clone(), index).is_some() {
            return Err(ModelError::DuplicateId { id });
        }

        match def.kind {
            StateKind::Final | StateKind::History(_) if !def.children.is_empty() => {
                return Err(ModelError::IllegalChild {
                    kind: def.kind.to_string(),
                    child: def.children[0].id.clone().unwrap_or_default(),
                    parent: id,
                });
            }
            StateKind::Parallel | StateKind::Final | StateKind::History(_)
                if !def.initial.is_empty() =>
            {
                return Err(ModelError::InvalidInitial {
                    state: id,
                    message: format!("a {} cannot declare an initial", def.kind),
                });
            }
            StateKind::State if def.children.is_empty() && !def.initial.is_empty() => {
                return Err(ModelError::InvalidInitial {
                    state: id,
                    message: "atomic state cannot declare an initial".to_string(),
                });
            }
            _ => {}
        }

        self.nodes.push(StateNode {
            index,
            id,
            kind: def.kind,
            parent,
            ancestors: ancestors.clone(),
            children: Vec::new(),
            history: Vec::new(),
            initial: None,
            transitions: Vec::new(),
            on_entry: def.on_entry,
            on_exit: def.on_exit,
            invokes: def.invokes,
            datamodel: def.datamodel,
            done_data: def.done_data,
        });
        self.pending.push(PendingState {
            state: index,
            transitions: def.transitions,
            initial: def.initial,
            initial_actions: def.initial_actions,
        });

        let mut child_ancestors = ancestors;
        child_ancestors.push(index);
        for child in def.children {
            let is_history = matches!(child.kind, StateKind::History(_));
            let child_index = self.flatten(child, Some(index), child_ancestors.clone())?;
            let node = &mut self.nodes[index.index()];
            if is_history {
                node.history.push(child_index);
            } else {
                node.children.push(child_index);
            }
        }
        if self.nodes[index.index()].children.is_empty()
            && self.nodes[index.index()].kind == StateKind::Parallel
        {
            debug!(state = %self.nodes[index.index()].id, "parallel state without regions");
        }
        Ok(index)
    }
}

fn resolve_targets(chart: &StateChart, source: &str, targets: &[String]) -> ModelResult<Vec<StateId>> {
    targets
        .iter()
        .map(|target| {
            chart.find(target).ok_or_else(|| ModelError::UnknownTarget {
                source_id: source.to_string(),
                target: target.clone(),
            })
        })
        .collect()
}

fn push_transition(
    chart: &mut StateChart,
    source: Option<StateId>,
    events: Vec<EventDescriptor>,
    cond: Option<String>,
    targets: Vec<StateId>,
    kind: TransitionKind,
    actions: Vec<Action>,
) -> TransitionId {
    let index = TransitionId(chart.transitions.len() as u32);
    chart.transitions.push(Transition {
        index,
        source,
        events,
        cond,
        targets,
        kind,
        actions,
        domain: None,
        paths: Vec::new(),
    });
    index
}

fn resolve_state(chart: &mut StateChart, pending: PendingState) -> ModelResult<()> {
    let state = pending.state;
    let node_id = chart.node(state).id.clone();

    if let Some(kind) = chart.node(state).history_kind() {
        return resolve_history(chart, state, kind, pending.transitions);
    }

    for def in pending.transitions {
        let mut events = Vec::with_capacity(def.events.len());
        for raw in &def.events {
            if !EVENT_DESCRIPTOR.is_match(raw) {
                return Err(ModelError::InvalidEvent {
                    state: node_id.clone(),
                    descriptor: raw.clone(),
                });
            }
            events.push(EventDescriptor::new(raw));
        }
        let targets = resolve_targets(chart, &node_id, &def.targets)?;
        let tid = push_transition(
            chart,
            Some(state),
            events,
            def.cond,
            targets,
            def.kind,
            def.actions,
        );
        chart.nodes[state.index()].transitions.push(tid);
    }

    if chart.node(state).is_compound() {
        let targets = if pending.initial.is_empty() {
            vec![chart.node(state).children[0]]
        } else {
            resolve_targets(chart, &node_id, &pending.initial)?
        };
        if let Some(bad) = targets.iter().find(|t| !chart.is_descendant(**t, state)) {
            return Err(ModelError::InvalidInitial {
                state: node_id,
                message: format!("{} is not a descendant", chart.node(*bad).id),
            });
        }
        check_orthogonal(chart, &node_id, &targets)?;
        let tid = push_transition(
            chart,
            Some(state),
            Vec::new(),
            None,
            targets,
            TransitionKind::Internal,
            pending.initial_actions,
        );
        chart.nodes[state.index()].initial = Some(tid);
    } else if chart.node(state).kind == StateKind::State && !pending.initial.is_empty() {
        return Err(ModelError::InvalidInitial {
            state: node_id,
            message: "state has no children".to_string(),
        });
    }
    Ok(())
}

/// Several initial targets must sit in different regions of a parallel
/// state, otherwise the start configuration would be illegal.
fn check_orthogonal(chart: &StateChart, owner: &str, targets: &[StateId]) -> ModelResult<()> {
    for (i, a) in targets.iter().enumerate() {
        for b in &targets[i + 1..] {
            let orthogonal = match chart.lca(*a, *b) {
                Some(lca) => lca != *a && lca != *b && chart.node(lca).is_parallel(),
                None => false,
            };
            if !orthogonal {
                return Err(ModelError::InvalidInitial {
                    state: owner.to_string(),
                    message: format!(
                        "{} and {} cannot be active together",
                        chart.node(*a).id,
                        chart.node(*b).id
                    ),
                });
            }
        }
    }
    Ok(())
}

fn resolve_history(
    chart: &mut StateChart,
    state: StateId,
    kind: HistoryKind,
    transitions: Vec<TransitionDef>,
) -> ModelResult<()> {
    let node_id = chart.node(state).id.clone();
    let missing_default = || ModelError::HistoryWithoutDefault {
        id: node_id.clone(),
    };
    let mut transitions = transitions.into_iter();
    let def = transitions.next().ok_or_else(missing_default)?;
    if transitions.next().is_some()
        || !def.events.is_empty()
        || def.cond.is_some()
        || def.targets.is_empty()
    {
        return Err(missing_default());
    }

    let targets = resolve_targets(chart, &node_id, &def.targets)?;
    // history nodes always have a parent, the builder rejects top-level ones
    let parent = chart.node(state).parent.ok_or_else(missing_default)?;
    let valid = targets.iter().all(|t| match kind {
        HistoryKind::Shallow => chart.node(*t).parent == Some(parent),
        HistoryKind::Deep => chart.is_descendant(*t, parent),
    });
    if !valid {
        return Err(ModelError::InvalidHistoryDefault {
            id: node_id,
            parent: chart.node(parent).id.clone(),
        });
    }

    let tid = push_transition(
        chart,
        Some(state),
        Vec::new(),
        None,
        targets,
        TransitionKind::External,
        def.actions,
    );
    chart.nodes[state.index()].initial = Some(tid);
    Ok(())
}

fn transition_domain(chart: &StateChart, t: &Transition) -> Option<StateId> {
    let source = t.source?;
    if t.targets.is_empty() {
        return None;
    }
    if t.kind == TransitionKind::Internal
        && chart.node(source).is_compound()
        && t.targets.iter().all(|s| chart.is_descendant(*s, source))
    {
        return Some(source);
    }
    let mut states = Vec::with_capacity(t.targets.len() + 1);
    states.push(source);
    states.extend_from_slice(&t.targets);
    chart.lcca(&states)
}

/// Paths run through the transition domain, so the upward segment is
/// exactly the chain of states the transition leaves.
fn transition_paths(chart: &StateChart, t: &Transition, domain: Option<StateId>) -> Vec<TransitionPath> {
    t.targets
        .iter()
        .map(|target| {
            let Some(source) = t.source else {
                let mut downward: Vec<StateId> = chart.node(*target).ancestors.clone();
                downward.push(*target);
                return TransitionPath {
                    lca: None,
                    upward: Vec::new(),
                    downward,
                    cross_region: false,
                };
            };

            let upward: Vec<StateId> = if domain == Some(source) {
                Vec::new()
            } else {
                std::iter::once(source)
                    .chain(chart.proper_ancestors(source, domain))
                    .collect()
            };
            let mut downward: Vec<StateId> = chart.proper_ancestors(*target, domain).collect();
            downward.reverse();
            if domain != Some(*target) {
                downward.push(*target);
            }
            let cross_region = upward.iter().any(|s| {
                chart
                    .node(*s)
                    .parent
                    .is_some_and(|p| chart.node(p).is_parallel())
            });

            TransitionPath {
                lca: domain,
                upward,
                downward,
                cross_region,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn region_chart() -> StateChart {
        ChartBuilder::new()
            .state(
                StateDef::state("root")
                    .child(
                        StateDef::parallel("P")
                            .child(
                                StateDef::state("A")
                                    .child(
                                        StateDef::state("A1")
                                            .transition(TransitionDef::on("go").target("A2"))
                                            .transition(TransitionDef::on("jump").target("B2")),
                                    )
                                    .child(
                                        StateDef::state("A2")
                                            .transition(TransitionDef::on("out").target("X")),
                                    ),
                            )
                            .child(
                                StateDef::state("B")
                                    .child(StateDef::state("B1"))
                                    .child(StateDef::state("B2")),
                            ),
                    )
                    .child(StateDef::state("X").transition(TransitionDef::on("self").target("X"))),
            )
            .build()
            .unwrap()
    }

    fn transition_of<'a>(chart: &'a StateChart, state: &str, nth: usize) -> &'a Transition {
        let id = chart.find(state).unwrap();
        chart.transition(chart.node(id).transitions()[nth])
    }

    #[test]
    fn test_default_initial_is_first_child() {
        let chart = region_chart();
        let root = chart.find("root").unwrap();
        let initial = chart.transition(chart.node(root).initial().unwrap());
        assert_eq!(initial.targets(), &[chart.find("P").unwrap()]);
        let doc = chart.initial_transition();
        assert_eq!(doc.targets(), &[root]);
        assert_eq!(doc.source(), None);
    }

    #[test]
    fn test_domains() {
        let chart = region_chart();
        let id = |s: &str| chart.find(s).unwrap();
        assert_eq!(transition_of(&chart, "A1", 0).domain(), Some(id("A")));
        // crossing regions leaves the parallel entirely
        assert_eq!(transition_of(&chart, "A1", 1).domain(), Some(id("root")));
        assert_eq!(transition_of(&chart, "A2", 0).domain(), Some(id("root")));
        assert_eq!(transition_of(&chart, "X", 0).domain(), Some(id("root")));
    }

    #[test]
    fn test_paths() {
        let chart = region_chart();
        let id = |s: &str| chart.find(s).unwrap();

        let local = &transition_of(&chart, "A1", 0).paths()[0];
        assert_eq!(local.lca, Some(id("A")));
        assert_eq!(local.upward, vec![id("A1")]);
        assert_eq!(local.downward, vec![id("A2")]);
        assert!(!local.cross_region);

        // the domain of a cross-region jump is above the parallel
        let jump = &transition_of(&chart, "A1", 1).paths()[0];
        assert_eq!(jump.lca, Some(id("root")));
        assert_eq!(jump.upward, vec![id("A1"), id("A"), id("P")]);
        assert_eq!(jump.downward, vec![id("P"), id("B"), id("B2")]);
        assert!(jump.cross_region);

        let out = &transition_of(&chart, "A2", 0).paths()[0];
        assert_eq!(out.lca, Some(id("root")));
        assert_eq!(out.upward, vec![id("A2"), id("A"), id("P")]);
        assert_eq!(out.downward, vec![id("X")]);
        assert!(out.cross_region);

        let own = &transition_of(&chart, "X", 0).paths()[0];
        assert_eq!(own.lca, Some(id("root")));
        assert_eq!(own.upward, vec![id("X")]);
        assert_eq!(own.downward, vec![id("X")]);
    }

    #[test]
    fn test_model_errors() {
        assert_eq!(ChartBuilder::new().build().unwrap_err(), ModelError::EmptyChart);

        let dup = ChartBuilder::new()
            .state(StateDef::state("a").child(StateDef::state("a")))
            .build();
        assert_eq!(
            dup.unwrap_err(),
            ModelError::DuplicateId {
                id: "a".to_string()
            }
        );

        let unknown = ChartBuilder::new()
            .state(StateDef::state("a").transition(TransitionDef::on("e").target("nowhere")))
            .build();
        assert!(matches!(
            unknown.unwrap_err(),
            ModelError::UnknownTarget { target, .. } if target == "nowhere"
        ));

        let bad_initial = ChartBuilder::new()
            .state(StateDef::state("a").initial("b").child(StateDef::state("c")))
            .state(StateDef::state("b"))
            .build();
        assert!(matches!(
            bad_initial.unwrap_err(),
            ModelError::InvalidInitial { .. }
        ));

        let split_initial = ChartBuilder::new()
            .initial("a")
            .initial("b")
            .state(StateDef::state("a"))
            .state(StateDef::state("b"))
            .build();
        assert!(matches!(
            split_initial.unwrap_err(),
            ModelError::InvalidInitial { state, .. } if state == DOCUMENT
        ));

        let same_region = ChartBuilder::new()
            .state(
                StateDef::state("s")
                    .initial("x")
                    .initial("y")
                    .child(StateDef::state("x"))
                    .child(StateDef::state("y")),
            )
            .build();
        assert!(matches!(
            same_region.unwrap_err(),
            ModelError::InvalidInitial { state, .. } if state == "s"
        ));

        let across_regions = ChartBuilder::new()
            .initial("a2")
            .initial("b2")
            .state(
                StateDef::parallel("p")
                    .child(StateDef::state("a").child(StateDef::state("a1")).child(StateDef::state("a2")))
                    .child(StateDef::state("b").child(StateDef::state("b1")).child(StateDef::state("b2"))),
            )
            .build()
            .unwrap();
        assert_eq!(across_regions.initial_transition().targets().len(), 2);

        let history = ChartBuilder::new()
            .state(
                StateDef::state("a")
                    .child(StateDef::history("h", HistoryKind::Shallow))
                    .child(StateDef::state("b")),
            )
            .build();
        assert!(matches!(
            history.unwrap_err(),
            ModelError::HistoryWithoutDefault { .. }
        ));

        let final_child = ChartBuilder::new()
            .state(StateDef::final_state("f").child(StateDef::state("x")))
            .build();
        assert!(matches!(final_child.unwrap_err(), ModelError::IllegalChild { .. }));

        let bad_event = ChartBuilder::new()
            .state(StateDef::state("a").transition(TransitionDef::on("a..b").target("a")))
            .build();
        assert!(matches!(bad_event.unwrap_err(), ModelError::InvalidEvent { .. }));

        let bad_id = ChartBuilder::new().state(StateDef::state("1st")).build();
        assert!(matches!(bad_id.unwrap_err(), ModelError::InvalidId { .. }));
    }

    #[test]
    fn test_generated_ids_and_history_slots() {
        let chart = ChartBuilder::new()
            .state(
                StateDef::state("a")
                    .child(
                        StateDef::history("h", HistoryKind::Deep)
                            .transition(TransitionDef::eventless().target("leaf")),
                    )
                    .child(StateDef::anonymous(StateKind::State).child(StateDef::state("leaf"))),
            )
            .build()
            .unwrap();
        let a = chart.node(chart.find("a").unwrap());
        assert_eq!(a.history().len(), 1);
        assert_eq!(a.children().len(), 1);
        assert!(chart.node(a.children()[0]).id().starts_with(GENERATED_ID_PREFIX));
    }
}
