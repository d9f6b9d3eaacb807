#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::Arc;

use scxml_runtime::reporter::CollectingErrorReporter;
use scxml_runtime::{StateChart, System, SystemConfig};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[ctor::ctor]
fn init_tests() {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

pub fn collecting_system() -> (Arc<System>, Arc<CollectingErrorReporter>) {
    collecting_system_with(SystemConfig::default())
}

pub fn collecting_system_with(config: SystemConfig) -> (Arc<System>, Arc<CollectingErrorReporter>) {
    let reporter = Arc::new(CollectingErrorReporter::new());
    let system = System::builder()
        .config(config)
        .reporter(reporter.clone())
        .build();
    (system, reporter)
}

pub fn shared(chart: StateChart) -> Arc<StateChart> {
    Arc::new(chart)
}

pub fn ids(ids: &[&str]) -> BTreeSet<String> {
    ids.iter().map(|s| s.to_string()).collect()
}
