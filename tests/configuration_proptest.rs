//! Random charts driven by random events never reach an illegal configuration.

mod common;

use common::{collecting_system, shared};
use proptest::prelude::*;
use proptest::sample::Index;
use scxml_runtime::reporter::CollectingErrorReporter;
use scxml_runtime::semantics::is_legal_configuration;
use scxml_runtime::{ChartBuilder, ErrorCode, StateChart, StateDef, TransitionDef, TriggerEvent};

const EVENTS: [&str; 4] = ["a", "b", "c", "d"];
const MAX_NODES: usize = 20;

#[derive(Debug, Clone)]
struct Shape {
    /// Nesting depth per node, in document order.
    depths: Vec<usize>,
    /// 0 compound or atomic, 1 parallel, 2 final.
    kinds: Vec<u8>,
    edges: Vec<(Index, Index, usize)>,
}

fn shape_strategy() -> impl Strategy<Value = Shape> {
    let depths = prop::collection::vec(0usize..4, 0..MAX_NODES).prop_map(|raw| {
        let mut depths = vec![0];
        for d in raw {
            let prev = depths[depths.len() - 1];
            depths.push(d.min(prev + 1));
        }
        depths
    });
    let kinds = prop::collection::vec(0u8..3, MAX_NODES);
    let edges = prop::collection::vec(
        (any::<Index>(), any::<Index>(), 0..EVENTS.len()),
        1..16,
    );
    (depths, kinds, edges).prop_map(|(depths, kinds, edges)| Shape {
        depths,
        kinds,
        edges,
    })
}

fn chart_from_shape(shape: &Shape) -> StateChart {
    let depths = &shape.depths;
    let has_children = |pos: usize| pos + 1 < depths.len() && depths[pos + 1] == depths[pos] + 1;
    // 0 state, 1 parallel, 2 final; kinds that cannot hold the shape fall back to state
    let kinds: Vec<u8> = (0..depths.len())
        .map(|pos| match shape.kinds[pos] {
            1 if has_children(pos) => 1,
            2 if !has_children(pos) => 2,
            _ => 0,
        })
        .collect();

    let sources: Vec<usize> = (0..depths.len()).filter(|pos| kinds[*pos] != 2).collect();
    let mut transitions: Vec<Vec<(usize, usize)>> = vec![Vec::new(); depths.len()];
    if !sources.is_empty() {
        for (source, target, event) in &shape.edges {
            let source = sources[source.index(sources.len())];
            transitions[source].push((*event, target.index(depths.len())));
        }
    }

    fn build(
        depths: &[usize],
        kinds: &[u8],
        transitions: &[Vec<(usize, usize)>],
        pos: &mut usize,
    ) -> StateDef {
        let here = *pos;
        let name = format!("n{}", here);
        let mut def = match kinds[here] {
            1 => StateDef::parallel(name),
            2 => StateDef::final_state(name),
            _ => StateDef::state(name),
        };
        for (event, target) in &transitions[here] {
            def = def.transition(TransitionDef::on(EVENTS[*event]).target(format!("n{}", target)));
        }
        *pos += 1;
        while *pos < depths.len() && depths[*pos] == depths[here] + 1 {
            def = def.child(build(depths, kinds, transitions, pos));
        }
        def
    }

    let mut builder = ChartBuilder::new();
    let mut pos = 0;
    while pos < depths.len() {
        builder = builder.state(build(depths, &kinds, &transitions, &mut pos));
    }
    builder.build().unwrap()
}

fn events() -> impl Strategy<Value = Vec<&'static str>> {
    prop::collection::vec(prop::sample::select(EVENTS.to_vec()), 0..30)
}

proptest! {
    #[test]
    fn test_configuration_stays_legal(shape in shape_strategy(), sequence in events()) {
        let (system, reporter) = collecting_system();
        let mut executor = system.new_executor(shared(chart_from_shape(&shape))).unwrap();
        executor.go().unwrap();

        let violations = CollectingErrorReporter::new();
        if executor.is_running() {
            prop_assert!(is_legal_configuration(
                executor.chart(),
                executor.configuration().states(),
                &violations,
            ));
        }
        for name in sequence {
            if !executor.is_running() {
                break;
            }
            executor.trigger_event(TriggerEvent::signal(name)).unwrap();
            if executor.is_running() {
                let legal = is_legal_configuration(
                    executor.chart(),
                    executor.configuration().states(),
                    &violations,
                );
                prop_assert!(legal, "after {}: {:?}", name, violations.reports());
            }
        }
        prop_assert!(!reporter.codes().contains(&ErrorCode::IllegalConfig));
    }
}
