use std::collections::BTreeSet;

use crate::configuration::StateConfiguration;
use crate::model::{StateChart, StateId, StateKind};
use crate::reporter::{ErrorCode, ErrorReport, ErrorReporter};

/// Checks the structural invariants of a configuration, reporting every
/// violation as `IllegalConfig`:
///
/// * a parallel state has all its regions active,
/// * a compound state has at most one active child,
/// * exactly one top-level state is active.
pub fn is_legal_configuration(
    chart: &StateChart,
    active: &BTreeSet<StateId>,
    reporter: &dyn ErrorReporter,
) -> bool {
    let mut legal = true;
    let mut violation = |detail: String, source: &str| {
        legal = false;
        reporter.on_error(&ErrorReport::new(ErrorCode::IllegalConfig, detail).source(source));
    };

    for state in active {
        let node = chart.node(*state);
        let active_children = node
            .children()
            .iter()
            .filter(|c| active.contains(*c))
            .count();
        match node.kind() {
            StateKind::Parallel if active_children != node.children().len() => violation(
                format!(
                    "{} of {} regions active",
                    active_children,
                    node.children().len()
                ),
                node.id(),
            ),
            StateKind::State if active_children > 1 => violation(
                format!("{} children active", active_children),
                node.id(),
            ),
            _ => {}
        }
    }

    let top_level = chart
        .top_level()
        .iter()
        .filter(|s| active.contains(*s))
        .count();
    if !active.is_empty() && top_level != 1 {
        violation(format!("{} top-level states active", top_level), "scxml");
    }
    legal
}

/// A compound state with an active final child, or a parallel state whose
/// regions are all in a final state.
pub fn is_in_final_state(
    chart: &StateChart,
    configuration: &StateConfiguration,
    state: StateId,
) -> bool {
    let node = chart.node(state);
    if node.is_compound() {
        node.children()
            .iter()
            .any(|c| chart.node(*c).is_final() && configuration.is_active(*c))
    } else if node.is_parallel() {
        node.children()
            .iter()
            .all(|c| is_in_final_state(chart, configuration, *c))
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChartBuilder, StateDef};
    use crate::reporter::MockErrorReporter;

    fn chart() -> StateChart {
        ChartBuilder::new()
            .state(
                StateDef::parallel("p")
                    .child(StateDef::state("r1").child(StateDef::state("a")).child(StateDef::final_state("af")))
                    .child(StateDef::state("r2").child(StateDef::state("b")).child(StateDef::final_state("bf"))),
            )
            .state(StateDef::state("other"))
            .build()
            .unwrap()
    }

    fn set(chart: &StateChart, ids: &[&str]) -> BTreeSet<StateId> {
        ids.iter().map(|id| chart.find(id).unwrap()).collect()
    }

    #[test]
    fn test_legal_configuration_reports_nothing() {
        let chart = chart();
        let mut reporter = MockErrorReporter::new();
        reporter.expect_on_error().never();
        assert!(is_legal_configuration(
            &chart,
            &set(&chart, &["p", "r1", "a", "r2", "b"]),
            &reporter
        ));
    }

    #[test]
    fn test_violations_are_reported() {
        let chart = chart();
        let mut reporter = MockErrorReporter::new();
        reporter
            .expect_on_error()
            .withf(|r| r.code == ErrorCode::IllegalConfig)
            .times(3)
            .return_const(());
        // missing region r2, two children of r1, two top-level states
        assert!(!is_legal_configuration(
            &chart,
            &set(&chart, &["p", "r1", "a", "af", "other"]),
            &reporter
        ));
    }

    #[test]
    fn test_final_detection() {
        let chart = chart();
        let mut configuration = StateConfiguration::new();
        for id in ["p", "r1", "af", "r2", "b"] {
            configuration
                .enter_state(chart.node(chart.find(id).unwrap()))
                .unwrap();
        }
        let p = chart.find("p").unwrap();
        assert!(is_in_final_state(&chart, &configuration, chart.find("r1").unwrap()));
        assert!(!is_in_final_state(&chart, &configuration, p));

        configuration.exit_state(chart.node(chart.find("b").unwrap())).unwrap();
        configuration.enter_state(chart.node(chart.find("bf").unwrap())).unwrap();
        assert!(is_in_final_state(&chart, &configuration, p));
    }
}
