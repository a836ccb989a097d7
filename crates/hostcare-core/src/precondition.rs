use std::cell::Cell;
use std::path::PathBuf;
use tracing::{debug, warn};

use crate::error::PreconditionError;
use crate::operation::{Operation, RestartPolicy, ScheduledPolicy};
use crate::paths::target_probe_path;
use crate::registry::{BootSchedule, ScheduleStore};
use crate::types::HostStateSnapshot;

// ---------------------------------------------------------------------------
// HostProbe
// ---------------------------------------------------------------------------

/// Read-only view of the host signals that gate an operation.
pub trait HostProbe {
    fn privileged(&self) -> bool;
    fn restart_pending(&self) -> bool;
    fn target_available(&self, target: &str) -> bool;
    fn already_scheduled(&self, target: &str) -> bool;
}

/// Probes the running host. `already_scheduled` is answered by the
/// boot-schedule registry.
pub struct SystemProbe<S> {
    restart_markers: Vec<PathBuf>,
    schedule: BootSchedule<S>,
}

impl<S: ScheduleStore> SystemProbe<S> {
    pub fn new(restart_markers: Vec<PathBuf>, schedule: BootSchedule<S>) -> Self {
        Self {
            restart_markers,
            schedule,
        }
    }

    pub fn schedule(&self) -> &BootSchedule<S> {
        &self.schedule
    }
}

impl<S: ScheduleStore> HostProbe for SystemProbe<S> {
    fn privileged(&self) -> bool {
        is_elevated()
    }

    fn restart_pending(&self) -> bool {
        self.restart_markers.iter().any(|m| m.exists())
    }

    fn target_available(&self, target: &str) -> bool {
        target_probe_path(target).exists()
    }

    fn already_scheduled(&self, target: &str) -> bool {
        self.schedule.is_scheduled(target).unwrap_or_else(|e| {
            warn!(%target, "boot-schedule query failed: {e}");
            false
        })
    }
}

#[cfg(unix)]
fn is_elevated() -> bool {
    // Uid: real effective saved fs
    if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
        if let Some(uids) = status.lines().find_map(|l| l.strip_prefix("Uid:")) {
            return uids.split_whitespace().nth(1) == Some("0");
        }
    }
    std::process::Command::new("id")
        .arg("-u")
        .output()
        .map(|o| String::from_utf8_lossy(&o.stdout).trim() == "0")
        .unwrap_or(false)
}

#[cfg(windows)]
fn is_elevated() -> bool {
    // `net session` only succeeds from an elevated token.
    std::process::Command::new("net")
        .arg("session")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

#[cfg(not(any(unix, windows)))]
fn is_elevated() -> bool {
    false
}

/// Fixed answers, for simulations and tests. Counts probe calls.
#[derive(Debug, Default)]
pub struct StaticProbe {
    pub privileged: bool,
    pub restart_pending: bool,
    pub target_available: bool,
    pub already_scheduled: bool,
    /// Value `already_scheduled` switches to after the first query.
    pub scheduled_after_first_query: Option<bool>,
    pub(crate) queries: Cell<usize>,
}

impl StaticProbe {
    /// A host where every gate passes.
    pub fn healthy() -> Self {
        Self {
            privileged: true,
            target_available: true,
            ..Self::default()
        }
    }

    pub fn scheduled_queries(&self) -> usize {
        self.queries.get()
    }
}

impl HostProbe for StaticProbe {
    fn privileged(&self) -> bool {
        self.privileged
    }

    fn restart_pending(&self) -> bool {
        self.restart_pending
    }

    fn target_available(&self, _target: &str) -> bool {
        self.target_available
    }

    fn already_scheduled(&self, _target: &str) -> bool {
        let n = self.queries.get();
        self.queries.set(n + 1);
        match (n, self.scheduled_after_first_query) {
            (0, _) | (_, None) => self.already_scheduled,
            (_, Some(later)) => later,
        }
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// An operation that may not run, with the state observed up to the block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blocked {
    pub reason: PreconditionError,
    pub snapshot: HostStateSnapshot,
}

/// Gate `op` against the host.
///
/// Hard gates run first and stop probing as soon as one fails: privilege,
/// then target availability, then a restart-sensitive operation's pending
/// restart. The soft `already_scheduled` signal only blocks operations that
/// declare scheduled work as sufficient.
pub fn evaluate<P: HostProbe>(
    probe: &P,
    op: &Operation,
    target: &str,
) -> Result<HostStateSnapshot, Blocked> {
    let policy = &op.policy;
    let mut snapshot = HostStateSnapshot::default();

    snapshot.privilege_sufficient = probe.privileged();
    if policy.requires_privilege && !snapshot.privilege_sufficient {
        return Err(Blocked {
            reason: PreconditionError::InsufficientPrivilege,
            snapshot,
        });
    }

    snapshot.target_available = !policy.requires_target || probe.target_available(target);
    if !snapshot.target_available {
        return Err(Blocked {
            reason: PreconditionError::TargetUnavailable(target.to_string()),
            snapshot,
        });
    }

    snapshot.restart_pending = probe.restart_pending();
    snapshot.already_scheduled = probe.already_scheduled(target);
    debug!(operation = %op.name, mode = %op.mode, %target, ?snapshot, "host state captured");

    if snapshot.restart_pending && policy.restart == RestartPolicy::Gate {
        return Err(Blocked {
            reason: PreconditionError::RestartPending,
            snapshot,
        });
    }

    if snapshot.already_scheduled && policy.when_scheduled == ScheduledPolicy::ShortCircuit {
        return Err(Blocked {
            reason: PreconditionError::AlreadyScheduled(target.to_string()),
            snapshot,
        });
    }

    Ok(snapshot)
}

/// Re-probe after a run, without gating.
pub fn capture<P: HostProbe>(probe: &P, op: &Operation, target: &str) -> HostStateSnapshot {
    HostStateSnapshot {
        privilege_sufficient: probe.privileged(),
        restart_pending: probe.restart_pending(),
        target_available: !op.policy.requires_target || probe.target_available(target),
        already_scheduled: probe.already_scheduled(target),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{CommandSpec, PreconditionPolicy};
    use crate::registry::{MemoryStore, ScheduleEntry, ScheduleMode};
    use crate::types::{OperationMode, ResultCode};
    use tempfile::TempDir;

    fn op(policy: PreconditionPolicy) -> Operation {
        Operation {
            name: "disk-repair".into(),
            description: None,
            command: CommandSpec::new("chkdsk", &["{target}", "/f"]),
            mode: OperationMode::WriteCapable,
            timeout_seconds: 60,
            policy,
            rules: vec![],
            default_code: ResultCode::IssuesOrRepaired,
        }
    }

    #[test]
    fn healthy_host_passes() {
        let snap = evaluate(&StaticProbe::healthy(), &op(PreconditionPolicy::default()), "C:")
            .unwrap();
        assert!(snap.privilege_sufficient);
        assert!(snap.target_available);
        assert!(!snap.restart_pending);
        assert!(!snap.already_scheduled);
    }

    #[test]
    fn privilege_is_checked_before_anything_else() {
        let probe = StaticProbe {
            privileged: false,
            target_available: false,
            already_scheduled: true,
            ..StaticProbe::default()
        };
        let blocked = evaluate(&probe, &op(PreconditionPolicy::default()), "C:").unwrap_err();
        assert_eq!(blocked.reason, PreconditionError::InsufficientPrivilege);
        assert_eq!(blocked.reason.code(), ResultCode::PrecheckOrTimeoutFailure);
        assert_eq!(probe.scheduled_queries(), 0);
    }

    #[test]
    fn unavailable_target_is_hard_gate() {
        let probe = StaticProbe {
            privileged: true,
            ..StaticProbe::default()
        };
        let blocked = evaluate(&probe, &op(PreconditionPolicy::default()), "Q:").unwrap_err();
        assert_eq!(blocked.reason, PreconditionError::TargetUnavailable("Q:".into()));
        assert_eq!(blocked.reason.code(), ResultCode::PrecheckOrTimeoutFailure);
    }

    #[test]
    fn target_not_required_skips_availability() {
        let probe = StaticProbe {
            privileged: true,
            ..StaticProbe::default()
        };
        let policy = PreconditionPolicy {
            requires_target: false,
            ..PreconditionPolicy::default()
        };
        let snap = evaluate(&probe, &op(policy), "C:").unwrap();
        assert!(snap.target_available);
    }

    #[test]
    fn restart_pending_gate_versus_advisory() {
        let probe = StaticProbe {
            restart_pending: true,
            ..StaticProbe::healthy()
        };
        let gated = PreconditionPolicy {
            restart: RestartPolicy::Gate,
            ..PreconditionPolicy::default()
        };
        let blocked = evaluate(&probe, &op(gated), "C:").unwrap_err();
        assert_eq!(blocked.reason, PreconditionError::RestartPending);
        assert!(blocked.snapshot.restart_pending);

        let snap = evaluate(&probe, &op(PreconditionPolicy::default()), "C:").unwrap();
        assert!(snap.restart_pending);
    }

    #[test]
    fn already_scheduled_short_circuits_only_when_declared() {
        let probe = StaticProbe {
            already_scheduled: true,
            ..StaticProbe::healthy()
        };
        let short = PreconditionPolicy {
            when_scheduled: ScheduledPolicy::ShortCircuit,
            ..PreconditionPolicy::default()
        };
        let blocked = evaluate(&probe, &op(short), "C:").unwrap_err();
        assert_eq!(blocked.reason.code(), ResultCode::ScheduledOrBlocked);

        let snap = evaluate(&probe, &op(PreconditionPolicy::default()), "C:").unwrap();
        assert!(snap.already_scheduled);
    }

    #[test]
    fn system_probe_reads_markers_and_registry() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("reboot-required");
        let schedule = BootSchedule::new(MemoryStore::new());
        schedule
            .add(&ScheduleEntry::new("C:", ScheduleMode::Check).unwrap())
            .unwrap();
        let probe = SystemProbe::new(vec![marker.clone()], schedule);

        assert!(!probe.restart_pending());
        std::fs::write(&marker, b"").unwrap();
        assert!(probe.restart_pending());

        assert!(probe.already_scheduled("c:"));
        assert!(!probe.already_scheduled("D:"));
        assert!(probe.target_available(dir.path().to_str().unwrap()));
        assert!(!probe.target_available("/definitely/not/mounted/here"));
    }
}
