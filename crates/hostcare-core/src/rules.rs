//! The built-in catalog: the stock disk, image and file-integrity tools with
//! their rule lists. Everything here can be overridden by a `hostcare.yaml`;
//! `hostcare config init` writes exactly this catalog out for editing.
//!
//! Rule order matters. Failure and blocked patterns come first, success
//! patterns last, so output that mentions both never reads as clean.

use std::collections::BTreeMap;

use crate::config::{CampaignDefinition, CampaignStep};
use crate::operation::{
    ClassificationRule, CommandSpec, Operation, PreconditionPolicy, RestartPolicy, ScheduledPolicy,
};
use crate::types::{OperationMode, Profile, ResultCode};

use crate::types::ResultCode::{IssuesOrRepaired as Issues, Ok as Clean, ScheduledOrBlocked as Blocked};

fn rules(list: &[(&str, &str, ResultCode)]) -> Vec<ClassificationRule> {
    list.iter()
        .map(|(name, pattern, code)| ClassificationRule::new(name, pattern, *code))
        .collect()
}

fn volume_policy() -> PreconditionPolicy {
    PreconditionPolicy::default()
}

fn image_policy(restart: RestartPolicy) -> PreconditionPolicy {
    PreconditionPolicy {
        requires_target: false,
        restart,
        ..PreconditionPolicy::default()
    }
}

fn disk_scan() -> Operation {
    Operation {
        name: "disk-scan".into(),
        description: Some("Online read-only scan of a volume's file system".into()),
        command: CommandSpec::new("chkdsk", &["{target}", "/scan"]),
        mode: OperationMode::ReadOnly,
        timeout_seconds: 1800,
        policy: volume_policy(),
        rules: rules(&[
            ("locked", r"cannot lock|in use by another process", Blocked),
            ("problems-found", r"found problems|errors found|corruption", Issues),
            ("clean", r"no problems found|found no problems", Clean),
        ]),
        default_code: Issues,
    }
}

fn disk_repair() -> Operation {
    let mut command = CommandSpec::new("chkdsk", &["{target}", "/f", "/x"]);
    command.stdin = Some("Y\n".into());
    Operation {
        name: "disk-repair".into(),
        description: Some("Fix file system errors, dismounting the volume first".into()),
        command,
        mode: OperationMode::WriteCapable,
        timeout_seconds: 7200,
        policy: PreconditionPolicy {
            when_scheduled: ScheduledPolicy::ShortCircuit,
            observe_scheduling: true,
            ..volume_policy()
        },
        rules: rules(&[
            (
                "deferred",
                r"will be checked the next time the system restarts",
                Blocked,
            ),
            ("locked", r"cannot lock|in use by another process", Blocked),
            ("corrected", r"made corrections|fixed", Issues),
            ("clean", r"no problems found|found no problems", Clean),
        ]),
        default_code: Issues,
    }
}

fn image_check() -> Operation {
    Operation {
        name: "image-check".into(),
        description: Some("Quick check of the component store's corruption flag".into()),
        command: CommandSpec::new("DISM", &["/Online", "/Cleanup-Image", "/CheckHealth"]),
        mode: OperationMode::ReadOnly,
        timeout_seconds: 600,
        policy: image_policy(RestartPolicy::Advisory),
        rules: rules(&[
            ("not-repairable", r"not repairable", Blocked),
            ("repairable", r"component store is repairable", Issues),
            ("clean", r"no component store corruption detected", Clean),
        ]),
        default_code: Issues,
    }
}

fn image_scan() -> Operation {
    Operation {
        name: "image-scan".into(),
        description: Some("Full scan of the component store".into()),
        command: CommandSpec::new("DISM", &["/Online", "/Cleanup-Image", "/ScanHealth"]),
        mode: OperationMode::ReadOnly,
        timeout_seconds: 3600,
        policy: image_policy(RestartPolicy::Advisory),
        rules: rules(&[
            ("not-repairable", r"not repairable", Blocked),
            ("repairable", r"component store is repairable", Issues),
            ("clean", r"no component store corruption detected", Clean),
        ]),
        default_code: Issues,
    }
}

fn image_restore() -> Operation {
    Operation {
        name: "image-restore".into(),
        description: Some("Repair the component store from its servicing source".into()),
        command: CommandSpec::new("DISM", &["/Online", "/Cleanup-Image", "/RestoreHealth"]),
        mode: OperationMode::WriteCapable,
        timeout_seconds: 7200,
        policy: image_policy(RestartPolicy::Gate),
        rules: rules(&[
            (
                "source-missing",
                r"source files could not be found|0x800f081f",
                Blocked,
            ),
            ("repaired", r"corruption was repaired", Issues),
            ("error", r"\berror\b", Issues),
            ("clean", r"operation completed successfully", Clean),
        ]),
        default_code: Issues,
    }
}

fn file_verify() -> Operation {
    Operation {
        name: "file-verify".into(),
        description: Some("Verify protected system files without repairing".into()),
        command: CommandSpec::new("sfc", &["/verifyonly"]),
        mode: OperationMode::ReadOnly,
        timeout_seconds: 3600,
        policy: image_policy(RestartPolicy::Advisory),
        rules: rules(&[
            (
                "blocked",
                r"could not perform the requested operation|system repair pending",
                Blocked,
            ),
            ("violations", r"found integrity violations", Issues),
            ("clean", r"did not find any integrity violations", Clean),
        ]),
        default_code: Issues,
    }
}

fn file_repair() -> Operation {
    Operation {
        name: "file-repair".into(),
        description: Some("Scan protected system files and repair them".into()),
        command: CommandSpec::new("sfc", &["/scannow"]),
        mode: OperationMode::WriteCapable,
        timeout_seconds: 3600,
        policy: image_policy(RestartPolicy::Gate),
        rules: rules(&[
            (
                "blocked",
                r"could not perform the requested operation|system repair pending",
                Blocked,
            ),
            ("unfixable", r"unable to fix", Blocked),
            ("repaired", r"successfully repaired", Issues),
            ("clean", r"did not find any integrity violations", Clean),
        ]),
        default_code: Issues,
    }
}

pub fn builtin_operations() -> Vec<Operation> {
    vec![
        disk_scan(),
        disk_repair(),
        image_check(),
        image_scan(),
        image_restore(),
        file_verify(),
        file_repair(),
    ]
}

pub fn builtin_campaigns() -> BTreeMap<String, CampaignDefinition> {
    let campaign = |profile, description: &str, steps: &[&str]| CampaignDefinition {
        profile,
        description: Some(description.to_string()),
        steps: steps.iter().map(|s| CampaignStep::new(s)).collect(),
    };
    let mut m = BTreeMap::new();
    m.insert(
        "validate".to_string(),
        campaign(
            Profile::Validation,
            "Read-only health check of volume, image and system files",
            &["disk-scan", "image-check", "file-verify"],
        ),
    );
    m.insert(
        "repair".to_string(),
        campaign(
            Profile::Repair,
            "Restore the image, then system files, then the volume",
            &["image-restore", "file-repair", "disk-repair"],
        ),
    );
    m
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
