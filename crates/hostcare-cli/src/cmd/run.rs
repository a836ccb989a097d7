use anyhow::Context;
use hostcare_core::orchestrator::Orchestrator;
use tracing::debug;

use crate::output::{print_json, print_table, step_rows, STEP_HEADERS};
use crate::root::Settings;

/// Run one operation against `target`. Returns the step's code.
pub fn run(settings: &Settings, operation: &str, target: &str) -> anyhow::Result<i32> {
    let (config, source) = settings.load_config()?;
    debug!(%source, "catalog loaded");

    let invoker = super::invoker(settings)?;
    let probe = super::probe(settings, &config);
    let mut sink = super::sink(settings, &config, operation)?;

    let record = Orchestrator::new(&config, &invoker, &probe)
        .run_operation(operation, target, &mut sink)
        .with_context(|| format!("cannot run '{operation}' on '{target}'"))?;

    if settings.json {
        print_json(&record)?;
    } else {
        print_table(STEP_HEADERS, step_rows(std::slice::from_ref(&record)));
        println!();
        println!("records: {}", sink.dir().display());
    }
    Ok(record.code)
}
