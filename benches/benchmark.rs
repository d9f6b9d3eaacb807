use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use scxml_runtime::evaluator::parser::parse_expression;
use scxml_runtime::{
    Action, ChartBuilder, DataDef, StateChart, StateDef, System, TransitionDef, TriggerEvent,
};
use serde_json::json;

fn toggle_chart() -> Arc<StateChart> {
    let chart = ChartBuilder::new()
        .data(DataDef::value("count", json!(0)))
        .state(
            StateDef::parallel("p")
                .child(
                    StateDef::state("a")
                        .child(StateDef::state("on").transition(
                            TransitionDef::on("flip")
                                .target("off")
                                .action(Action::assign("count", "count + 1")),
                        ))
                        .child(StateDef::state("off").transition(TransitionDef::on("flip").target("on"))),
                )
                .child(
                    StateDef::state("b")
                        .child(StateDef::state("idle").transition(
                            TransitionDef::on("flip").cond("count % 2 == 0").target("busy"),
                        ))
                        .child(StateDef::state("busy").transition(TransitionDef::eventless().target("idle"))),
                ),
        )
        .build()
        .expect("benchmark chart is valid");
    Arc::new(chart)
}

fn bench_macrosteps(c: &mut Criterion) {
    let system = System::builder().build();
    let chart = toggle_chart();
    c.bench_function("1000 external events", |b| {
        b.iter_batched(
            || {
                let mut executor = system.new_executor(chart.clone()).unwrap();
                executor.go().unwrap();
                executor
            },
            |mut executor| {
                let events = (0..1000).map(|_| TriggerEvent::signal("flip")).collect();
                executor.trigger_events(events).unwrap();
                executor
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_snapshot(c: &mut Criterion) {
    let system = System::builder().build();
    let chart = toggle_chart();
    let mut executor = system.new_executor(chart.clone()).unwrap();
    executor.go().unwrap();
    c.bench_function("snapshot and restore", |b| {
        b.iter(|| {
            let json = executor.snapshot().unwrap().to_json().unwrap();
            let snapshot = scxml_runtime::Snapshot::from_json(&json).unwrap();
            black_box(System::builder().build().restore_executor(chart.clone(), snapshot).unwrap())
        })
    });
}

fn bench_expressions(c: &mut Criterion) {
    c.bench_function("parse expression", |b| {
        b.iter(|| parse_expression(black_box("_event.data.items[2] * (count + 1) >= 10 && !done")))
    });
}

criterion_group!(benches, bench_macrosteps, bench_snapshot, bench_expressions);
criterion_main!(benches);
