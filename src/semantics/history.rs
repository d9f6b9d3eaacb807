use std::collections::{BTreeMap, BTreeSet};

use crate::configuration::StateConfiguration;
use crate::model::{HistoryKind, StateChart, StateId};

/// Recorded history, keyed by history pseudo-state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryValues {
    values: BTreeMap<StateId, BTreeSet<StateId>>,
}

impl HistoryValues {
    pub fn get(&self, history: StateId) -> Option<&BTreeSet<StateId>> {
        self.values.get(&history)
    }

    pub fn insert(&mut self, history: StateId, states: BTreeSet<StateId>) {
        self.values.insert(history, states);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&StateId, &BTreeSet<StateId>)> {
        self.values.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

/// Records history for every state about to be exited. Must run before the
/// configuration changes.
pub fn record_history(
    chart: &StateChart,
    configuration: &StateConfiguration,
    exit_set: &BTreeSet<StateId>,
    history: &mut HistoryValues,
) {
    for state in exit_set {
        for h in chart.node(*state).history() {
            let recorded: BTreeSet<StateId> = match chart.node(*h).history_kind() {
                Some(HistoryKind::Deep) => configuration
                    .states()
                    .iter()
                    .filter(|s| chart.is_descendant(**s, *state))
                    .copied()
                    .collect(),
                Some(HistoryKind::Shallow) => configuration
                    .active_states()
                    .iter()
                    .filter(|s| chart.node(**s).parent() == Some(*state))
                    .copied()
                    .collect(),
                None => continue,
            };
            history.insert(*h, recorded);
        }
    }
}
