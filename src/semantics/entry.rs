use std::collections::{BTreeSet, HashMap};

use super::HistoryValues;
use crate::model::{StateChart, StateId, TransitionId};

/// States a microstep enters, plus the content that must run on the way in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntrySet {
    pub states: BTreeSet<StateId>,
    /// Compound states entered through their initial transition.
    pub default_entry: BTreeSet<StateId>,
    /// Parent state -> history default transition whose content runs on entry.
    pub history_content: HashMap<StateId, TransitionId>,
}

impl EntrySet {
    fn add_descendants(&mut self, chart: &StateChart, history: &HistoryValues, state: StateId) {
        let node = chart.node(state);
        if node.is_history() {
            let Some(parent) = node.parent() else {
                return;
            };
            match history.get(state) {
                Some(stored) => {
                    for s in stored {
                        self.add_descendants(chart, history, *s);
                    }
                    for s in stored {
                        self.add_ancestors(chart, history, *s, Some(parent));
                    }
                }
                None => {
                    let Some(default) = node.initial() else {
                        return;
                    };
                    self.history_content.insert(parent, default);
                    let targets = chart.transition(default).targets();
                    for s in targets {
                        self.add_descendants(chart, history, *s);
                    }
                    for s in targets {
                        self.add_ancestors(chart, history, *s, Some(parent));
                    }
                }
            }
            return;
        }

        self.states.insert(state);
        if node.is_compound() {
            self.default_entry.insert(state);
            if let Some(initial) = node.initial() {
                let targets = chart.transition(initial).targets();
                for s in targets {
                    self.add_descendants(chart, history, *s);
                }
                for s in targets {
                    self.add_ancestors(chart, history, *s, Some(state));
                }
            }
        } else if node.is_parallel() {
            self.fill_regions(chart, history, state);
        }
    }

    fn add_ancestors(
        &mut self,
        chart: &StateChart,
        history: &HistoryValues,
        state: StateId,
        upper: Option<StateId>,
    ) {
        let mut ancestors = chart.ancestor_closure([state], upper);
        ancestors.remove(&state);
        self.states.extend(ancestors.iter().copied());
        for ancestor in ancestors {
            if chart.node(ancestor).is_parallel() {
                self.fill_regions(chart, history, ancestor);
            }
        }
    }

    /// Enters the default of every region nothing else enters yet.
    fn fill_regions(&mut self, chart: &StateChart, history: &HistoryValues, parallel: StateId) {
        for child in chart.node(parallel).children() {
            let covered = self
                .states
                .iter()
                .any(|s| s == child || chart.is_descendant(*s, *child));
            if !covered {
                self.add_descendants(chart, history, *child);
            }
        }
    }
}

/// Targets of a transition with history pseudo-states replaced by the
/// states they stand for.
pub fn effective_targets(
    chart: &StateChart,
    history: &HistoryValues,
    transition: TransitionId,
) -> BTreeSet<StateId> {
    let mut targets = BTreeSet::new();
    for target in chart.transition(transition).targets() {
        collect_effective(chart, history, *target, &mut targets);
    }
    targets
}

fn collect_effective(
    chart: &StateChart,
    history: &HistoryValues,
    state: StateId,
    out: &mut BTreeSet<StateId>,
) {
    let node = chart.node(state);
    if !node.is_history() {
        out.insert(state);
        return;
    }
    match (history.get(state), node.initial()) {
        (Some(stored), _) => out.extend(stored.iter().copied()),
        (None, Some(default)) => {
            for target in chart.transition(default).targets() {
                collect_effective(chart, history, *target, out);
            }
        }
        (None, None) => {}
    }
}

/// Entry set of a microstep.
pub fn compute_entry_set(
    chart: &StateChart,
    history: &HistoryValues,
    transitions: &[TransitionId],
) -> EntrySet {
    let mut entry = EntrySet::default();
    for tid in transitions {
        let transition = chart.transition(*tid);
        for target in transition.targets() {
            entry.add_descendants(chart, history, *target);
        }
        for target in effective_targets(chart, history, *tid) {
            entry.add_ancestors(chart, history, target, transition.domain());
        }
    }
    entry
}
