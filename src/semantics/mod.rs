//! # Step Semantics
//!
//! Pure functions computing what a microstep does, given a chart and the
//! current configuration. Nothing here runs content or mutates a session;
//! the [`executor`](crate::executor) applies the results.
//!
//! ## Ordering
//!
//! * Candidates are collected per active atomic state in document order,
//!   then up its ancestor chain; the first enabled transition of the nearest
//!   state wins for that atomic state.
//! * Two selected transitions conflict when their exit sets intersect. The
//!   earlier one is kept unless the later one's source is a descendant of
//!   the earlier one's source.
//! * States are exited in reverse document order and entered in document
//!   order, which `BTreeSet<StateId>` iteration gives for free.

mod entry;
mod history;
mod legal;

use std::collections::BTreeSet;

use crate::configuration::StateConfiguration;
use crate::model::{StateChart, StateId, Transition, TransitionId};

pub use entry::{compute_entry_set, effective_targets, EntrySet};
pub use history::{record_history, HistoryValues};
pub use legal::{is_in_final_state, is_legal_configuration};

/// Enabled transitions for `event` (`None` selects eventless transitions),
/// conflict-free and in document order.
///
/// `enabled` evaluates guards; it is only called for transitions whose
/// event descriptor already matched.
pub fn select_transitions<F>(
    chart: &StateChart,
    configuration: &StateConfiguration,
    event: Option<&str>,
    mut enabled: F,
) -> Vec<TransitionId>
where
    F: FnMut(&Transition) -> bool,
{
    let mut selected: Vec<TransitionId> = Vec::new();
    for atomic in configuration.states() {
        let chain = std::iter::once(*atomic).chain(chart.proper_ancestors(*atomic, None));
        'chain: for state in chain {
            for tid in chart.node(state).transitions() {
                let transition = chart.transition(*tid);
                let matches = match event {
                    None => transition.is_eventless(),
                    Some(name) => !transition.is_eventless() && transition.matches_event(name),
                };
                if matches && enabled(transition) {
                    if !selected.contains(tid) {
                        selected.push(*tid);
                    }
                    break 'chain;
                }
            }
        }
    }
    remove_conflicting_transitions(chart, configuration, selected)
}

/// Drops transitions preempted by an earlier one with an overlapping exit set.
pub fn remove_conflicting_transitions(
    chart: &StateChart,
    configuration: &StateConfiguration,
    enabled: Vec<TransitionId>,
) -> Vec<TransitionId> {
    let mut filtered: Vec<(TransitionId, BTreeSet<StateId>)> = Vec::new();
    for t1 in enabled {
        let exit1 = states_exited(chart, chart.transition(t1), configuration.active_states());
        let source1 = chart.transition(t1).source();
        let mut preempted = false;
        let mut replaced = Vec::new();
        for (index, (t2, exit2)) in filtered.iter().enumerate() {
            if exit1.is_disjoint(exit2) {
                continue;
            }
            let source2 = chart.transition(*t2).source();
            match (source1, source2) {
                (Some(s1), Some(s2)) if chart.is_descendant(s1, s2) => replaced.push(index),
                _ => {
                    preempted = true;
                    break;
                }
            }
        }
        if !preempted {
            for index in replaced.into_iter().rev() {
                filtered.remove(index);
            }
            filtered.push((t1, exit1));
        }
    }
    filtered.into_iter().map(|(t, _)| t).collect()
}

/// Active states a transition leaves, read off its precomputed paths: the
/// upward segment, the active descendants of the source, and for
/// cross-region paths every active state in the sibling regions of the
/// parallel states left on the way. Empty for a targetless transition.
pub fn states_exited(
    chart: &StateChart,
    transition: &Transition,
    active: &BTreeSet<StateId>,
) -> BTreeSet<StateId> {
    let mut exited = BTreeSet::new();
    let Some(source) = transition.source() else {
        return exited;
    };
    for path in transition.paths() {
        extend_active_below(chart, active, source, &mut exited);
        exited.extend(path.upward.iter().filter(|s| active.contains(*s)));
        if path.cross_region {
            for state in &path.upward {
                if chart.node(*state).is_parallel() {
                    extend_active_below(chart, active, *state, &mut exited);
                }
            }
        }
    }
    exited
}

fn extend_active_below(
    chart: &StateChart,
    active: &BTreeSet<StateId>,
    ancestor: StateId,
    out: &mut BTreeSet<StateId>,
) {
    out.extend(active.iter().filter(|s| chart.is_descendant(**s, ancestor)));
}

/// Union of the exit sets of every transition in a microstep.
pub fn compute_exit_set(
    chart: &StateChart,
    configuration: &StateConfiguration,
    transitions: &[TransitionId],
) -> BTreeSet<StateId> {
    transitions
        .iter()
        .flat_map(|t| states_exited(chart, chart.transition(*t), configuration.active_states()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChartBuilder, StateDef, TransitionDef};
    use pretty_assertions::assert_eq;

    fn parallel_chart() -> StateChart {
        ChartBuilder::new()
            .state(
                StateDef::parallel("P")
                    .child(
                        StateDef::state("A")
                            .child(StateDef::state("A1").transition(TransitionDef::on("go").target("A2")))
                            .child(StateDef::state("A2").transition(TransitionDef::on("out").target("Z"))),
                    )
                    .child(
                        StateDef::state("B")
                            .child(StateDef::state("B1").transition(TransitionDef::on("go").target("B2")))
                            .child(StateDef::state("B2")),
                    )
                    .transition(TransitionDef::on("go").target("Z")),
            )
            .state(StateDef::state("Z"))
            .build()
            .unwrap()
    }

    fn activate(chart: &StateChart, ids: &[&str]) -> StateConfiguration {
        let mut configuration = StateConfiguration::new();
        for id in ids {
            configuration
                .enter_state(chart.node(chart.find(id).unwrap()))
                .unwrap();
        }
        configuration
    }

    fn sources(chart: &StateChart, selected: &[TransitionId]) -> Vec<String> {
        selected
            .iter()
            .map(|t| chart.node(chart.transition(*t).source().unwrap()).id().to_string())
            .collect()
    }

    #[test]
    fn test_select_per_region_in_document_order() {
        let chart = parallel_chart();
        let configuration = activate(&chart, &["P", "A", "A1", "B", "B1"]);
        let selected = select_transitions(&chart, &configuration, Some("go"), |_| true);
        assert_eq!(sources(&chart, &selected), vec!["A1", "B1"]);

        let exit = compute_exit_set(&chart, &configuration, &selected);
        let ids: Vec<&str> = exit.iter().map(|s| chart.node(*s).id()).collect();
        assert_eq!(ids, vec!["A1", "B1"]);
    }

    #[test]
    fn test_guards_fall_through_to_ancestor() {
        let chart = parallel_chart();
        let configuration = activate(&chart, &["P", "A", "A1", "B", "B1"]);
        let selected = select_transitions(&chart, &configuration, Some("go"), |t| {
            t.source() == chart.find("P")
        });
        // both regions select P's transition once
        assert_eq!(sources(&chart, &selected), vec!["P"]);
    }

    #[test]
    fn test_cross_region_exit_set() {
        let chart = parallel_chart();
        let configuration = activate(&chart, &["P", "A", "A2", "B", "B1"]);
        let selected = select_transitions(&chart, &configuration, Some("out"), |_| true);
        let exit = compute_exit_set(&chart, &configuration, &selected);
        assert_eq!(exit, configuration.active_states().clone());
    }

    #[test]
    fn test_exit_sets_follow_paths() {
        let chart = ChartBuilder::new()
            .state(
                StateDef::state("root")
                    .child(
                        StateDef::parallel("P")
                            .child(
                                StateDef::state("A")
                                    .child(StateDef::state("A1").transition(TransitionDef::on("jump").target("B2")))
                                    .child(StateDef::state("A2")),
                            )
                            .child(
                                StateDef::state("B")
                                    .child(StateDef::state("B1"))
                                    .child(StateDef::state("B2")),
                            ),
                    )
                    .child(StateDef::state("X"))
                    .transition(TransitionDef::on("inner").internal().target("X")),
            )
            .build()
            .unwrap();
        let configuration = activate(&chart, &["root", "P", "A", "A1", "B", "B1"]);
        let names = |exit: BTreeSet<StateId>| -> Vec<String> {
            exit.iter().map(|s| chart.node(*s).id().to_string()).collect()
        };

        // jumping across regions leaves the parallel and its other region
        let jump = chart.transition(chart.node(chart.find("A1").unwrap()).transitions()[0]);
        assert!(jump.paths()[0].cross_region);
        assert_eq!(
            names(states_exited(&chart, jump, configuration.active_states())),
            vec!["P", "A", "A1", "B", "B1"]
        );

        // an internal transition keeps its source
        let inner = chart.transition(chart.node(chart.find("root").unwrap()).transitions()[0]);
        assert!(inner.paths()[0].upward.is_empty());
        assert_eq!(
            names(states_exited(&chart, inner, configuration.active_states())),
            vec!["P", "A", "A1", "B", "B1"]
        );
    }

    #[test]
    fn test_conflict_keeps_first_unless_descendant() {
        let chart = parallel_chart();
        let configuration = activate(&chart, &["P", "A", "A2", "B", "B1"]);
        let a2_out = chart.node(chart.find("A2").unwrap()).transitions()[0];
        let b1_go = chart.node(chart.find("B1").unwrap()).transitions()[0];
        let p_go = chart.node(chart.find("P").unwrap()).transitions()[0];

        // A2 -> Z leaves the whole parallel, so B1 -> B2 loses
        let kept = remove_conflicting_transitions(&chart, &configuration, vec![a2_out, b1_go]);
        assert_eq!(kept, vec![a2_out]);

        // a descendant source preempts an earlier ancestor transition
        let kept = remove_conflicting_transitions(&chart, &configuration, vec![p_go, a2_out]);
        assert_eq!(kept, vec![a2_out]);
    }

    #[test]
    fn test_eventless_selection_ignores_event_transitions() {
        let chart = ChartBuilder::new()
            .state(
                StateDef::state("s")
                    .transition(TransitionDef::on("e").target("t"))
                    .transition(TransitionDef::eventless().target("t")),
            )
            .state(StateDef::state("t"))
            .build()
            .unwrap();
        let configuration = activate(&chart, &["s"]);
        let eventless = select_transitions(&chart, &configuration, None, |_| true);
        assert_eq!(eventless.len(), 1);
        assert!(chart.transition(eventless[0]).is_eventless());

        let on_event = select_transitions(&chart, &configuration, Some("e"), |_| true);
        assert!(!chart.transition(on_event[0]).is_eventless());
    }

    #[test]
    fn test_targetless_exits_nothing() {
        let chart = ChartBuilder::new()
            .state(StateDef::state("s").transition(TransitionDef::on("e")))
            .build()
            .unwrap();
        let configuration = activate(&chart, &["s"]);
        let selected = select_transitions(&chart, &configuration, Some("e"), |_| true);
        assert_eq!(selected.len(), 1);
        assert!(compute_exit_set(&chart, &configuration, &selected).is_empty());
    }
}
