use hostcare_core::operation::{RestartPolicy, ScheduledPolicy};

use crate::output::{print_json, print_table};
use crate::root::Settings;

pub fn run(settings: &Settings) -> anyhow::Result<i32> {
    let (config, _) = settings.load_config()?;

    if settings.json {
        print_json(&serde_json::json!({
            "operations": config.operations,
            "campaigns": config.campaigns,
        }))?;
        return Ok(0);
    }

    let rows = config
        .operations
        .iter()
        .map(|op| {
            let mut flags = Vec::new();
            if op.policy.restart == RestartPolicy::Gate {
                flags.push("restart-gate");
            }
            if op.policy.when_scheduled == ScheduledPolicy::ShortCircuit {
                flags.push("skip-if-scheduled");
            }
            if op.policy.observe_scheduling {
                flags.push("observes-scheduling");
            }
            vec![
                op.name.clone(),
                op.mode.to_string(),
                format!("{}s", op.timeout_seconds),
                if flags.is_empty() { "-".to_string() } else { flags.join(",") },
                op.description.clone().unwrap_or_default(),
            ]
        })
        .collect();
    print_table(&["OPERATION", "MODE", "TIMEOUT", "POLICY", "DESCRIPTION"], rows);

    println!();
    let rows = config
        .campaigns
        .iter()
        .map(|(name, c)| {
            let steps: Vec<&str> = c.steps.iter().map(|s| s.operation.as_str()).collect();
            vec![name.clone(), c.profile.to_string(), steps.join(" → ")]
        })
        .collect();
    print_table(&["CAMPAIGN", "PROFILE", "STEPS"], rows);
    Ok(0)
}
