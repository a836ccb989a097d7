use anyhow::Context;
use hostcare_core::orchestrator::Orchestrator;
use tracing::debug;

use crate::output::{print_json, print_table, step_rows, STEP_HEADERS};
use crate::root::Settings;

/// Run the named campaign against `target`. Returns the campaign's code.
pub fn run(settings: &Settings, name: &str, target: &str) -> anyhow::Result<i32> {
    let (config, source) = settings.load_config()?;
    debug!(%source, "catalog loaded");

    let invoker = super::invoker(settings)?;
    let probe = super::probe(settings, &config);
    let mut sink = super::sink(settings, &config, name)?;

    let report = Orchestrator::new(&config, &invoker, &probe)
        .run_campaign(name, target, &mut sink)
        .with_context(|| format!("cannot run campaign '{name}' on '{target}'"))?;

    if settings.json {
        print_json(&report)?;
    } else {
        let s = &report.summary;
        print_table(STEP_HEADERS, step_rows(&report.steps));
        println!();
        println!(
            "campaign {} ({}) on {}: {}, code {} ({}), {}/{} steps run",
            s.campaign,
            s.profile,
            s.target,
            if report.halted() { "halted" } else { "done" },
            s.code,
            s.result,
            s.steps_run,
            s.steps_total,
        );
        println!("records: {}", sink.dir().display());
    }
    Ok(report.code().code())
}
