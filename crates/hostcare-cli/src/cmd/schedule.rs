use anyhow::Context;
use clap::Subcommand;
use hostcare_core::registry::{AddOutcome, ModeFilter, ScheduleEntry, ScheduleMode};

use crate::output::{print_json, print_table};
use crate::root::Settings;

// ---------------------------------------------------------------------------
// Subcommand types
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum ScheduleSubcommand {
    /// Queue a check of TARGET for the next restart (no-op if already queued)
    Add {
        target: String,
        /// check, recover or dismount
        #[arg(long, default_value = "check")]
        mode: ScheduleMode,
    },

    /// Remove queued checks of TARGET
    Remove {
        target: String,
        /// check, recover, dismount or any
        #[arg(long, default_value = "any")]
        mode: ModeFilter,
    },

    /// Report per-mode presence for each target
    Query {
        #[arg(required = true)]
        targets: Vec<String>,
    },

    /// Show every stored line
    List,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(settings: &Settings, subcmd: ScheduleSubcommand) -> anyhow::Result<i32> {
    let (config, _) = settings.load_config()?;
    let schedule = super::schedule(settings, &config);
    let store = settings.registry_path(&config);

    match subcmd {
        ScheduleSubcommand::Add { target, mode } => {
            let entry = ScheduleEntry::new(&target, mode)?;
            let outcome = schedule
                .add(&entry)
                .with_context(|| format!("failed to update {}", store.display()))?;
            if settings.json {
                print_json(&serde_json::json!({
                    "target": entry.target,
                    "mode": entry.mode,
                    "line": entry.encode(),
                    "outcome": outcome,
                }))?;
            } else {
                match outcome {
                    AddOutcome::Added => println!("Added: {}", entry.encode()),
                    AddOutcome::AlreadyPresent => println!("Already present: {}", entry.encode()),
                }
            }
        }
        ScheduleSubcommand::Remove { target, mode } => {
            let removed = schedule
                .remove(&target, mode)
                .with_context(|| format!("failed to update {}", store.display()))?;
            if settings.json {
                print_json(&serde_json::json!({ "target": target, "removed": removed }))?;
            } else {
                println!("Removed {removed} entr{} for {target}", if removed == 1 { "y" } else { "ies" });
            }
        }
        ScheduleSubcommand::Query { targets } => {
            let statuses = schedule.query(&targets)?;
            if settings.json {
                print_json(&statuses)?;
            } else {
                let mut headers = vec!["TARGET"];
                headers.extend(ScheduleMode::all().iter().map(|m| m.as_str()));
                let rows = statuses
                    .iter()
                    .map(|s| {
                        let mut row = vec![s.target.clone()];
                        row.extend(
                            s.modes
                                .iter()
                                .map(|m| if m.present { "yes" } else { "no" }.to_string()),
                        );
                        row
                    })
                    .collect();
                print_table(&headers, rows);
            }
        }
        ScheduleSubcommand::List => {
            let lines = schedule.list()?;
            if settings.json {
                print_json(&lines)?;
            } else if lines.is_empty() {
                println!("No boot-schedule entries.");
            } else {
                let rows = lines
                    .iter()
                    .map(|l| {
                        vec![
                            l.target.clone().unwrap_or_else(|| "-".into()),
                            l.mode.map(|m| m.to_string()).unwrap_or_else(|| "-".into()),
                            l.raw.clone(),
                        ]
                    })
                    .collect();
                print_table(&["TARGET", "MODE", "LINE"], rows);
            }
        }
    }
    Ok(0)
}
