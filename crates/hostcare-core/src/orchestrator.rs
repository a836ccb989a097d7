//! Campaign orchestration.
//!
//! Every step runs the same pipeline, strictly in sequence:
//!
//! ```text
//! lookup → resolve program → preconditions → bounded run → (re-probe) → classify → record
//! ```
//!
//! Any stage may settle the step early; whatever happens, the step leaves
//! with exactly one [`ResultCode`]. Errors never cross into escalation.

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::classifier::{Classifier, Reason};
use crate::config::Config;
use crate::error::Result;
use crate::executor::{ExecFailure, Invoker};
use crate::operation::Operation;
use crate::paths::normalize_target;
use crate::precondition::{self, HostProbe};
use crate::record::{CampaignSummary, LogSink, StepRecord, TerminalState};
use crate::types::{Profile, ResultCode};

// ---------------------------------------------------------------------------
// CampaignState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignState {
    Pending,
    Running { step: usize },
    Halted(ResultCode),
    Done(ResultCode),
}

impl CampaignState {
    pub fn code(self) -> Option<ResultCode> {
        match self {
            CampaignState::Halted(code) | CampaignState::Done(code) => Some(code),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Escalation
// ---------------------------------------------------------------------------

/// Folds step codes into a campaign code and decides early halts.
///
/// Validation keeps the most severe code seen. Repair keeps the latest, so a
/// recoverable `issues_or_repaired` is superseded by the steps that follow.
#[derive(Debug, Clone, Copy)]
pub struct Escalation {
    profile: Profile,
    code: ResultCode,
}

impl Escalation {
    pub fn new(profile: Profile) -> Self {
        Self {
            profile,
            code: ResultCode::Ok,
        }
    }

    /// Fold in one step's code. Returns true when the campaign must stop.
    pub fn observe(&mut self, code: ResultCode, halt_at: Option<ResultCode>) -> bool {
        self.code = match self.profile {
            Profile::Validation => self.code.max(code),
            Profile::Repair => code,
        };
        let threshold = halt_at.unwrap_or(self.profile.default_halt_at());
        code.is_fatal() || code >= threshold
    }

    pub fn code(&self) -> ResultCode {
        self.code
    }
}

// ---------------------------------------------------------------------------
// CampaignReport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct CampaignReport {
    pub state: CampaignState,
    pub summary: CampaignSummary,
    pub steps: Vec<StepRecord>,
}

impl CampaignReport {
    pub fn code(&self) -> ResultCode {
        self.summary.result
    }

    pub fn halted(&self) -> bool {
        matches!(self.state, CampaignState::Halted(_))
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator<'a, I, P> {
    config: &'a Config,
    invoker: &'a I,
    probe: &'a P,
}

impl<'a, I: Invoker, P: HostProbe> Orchestrator<'a, I, P> {
    pub fn new(config: &'a Config, invoker: &'a I, probe: &'a P) -> Self {
        Self {
            config,
            invoker,
            probe,
        }
    }

    /// Run a single operation outside any campaign.
    pub fn run_operation(
        &self,
        name: &str,
        target: &str,
        sink: &mut dyn LogSink,
    ) -> Result<StepRecord> {
        let target = normalize_target(target)?;
        Ok(self.run_step(0, name, &target, None, sink))
    }

    pub fn run_campaign(
        &self,
        name: &str,
        target: &str,
        sink: &mut dyn LogSink,
    ) -> Result<CampaignReport> {
        let definition = self.config.campaign(name)?;
        let target = normalize_target(target)?;
        let campaign_id = Uuid::new_v4();
        let started_at = Utc::now();
        let total = definition.steps.len();

        let mut escalation = Escalation::new(definition.profile);
        let mut state = CampaignState::Pending;
        let mut steps = Vec::with_capacity(total);
        info!(campaign = %name, profile = %definition.profile, %target, steps = total, "campaign started");

        for (i, step) in definition.steps.iter().enumerate() {
            state = CampaignState::Running { step: i };
            debug!(campaign = %name, ?state, operation = %step.operation);
            let record = self.run_step(i, &step.operation, &target, Some(campaign_id), sink);
            let halt = escalation.observe(record.result, step.halt_at);
            steps.push(record);
            if halt {
                state = CampaignState::Halted(escalation.code());
                warn!(
                    campaign = %name,
                    step = i + 1,
                    operation = %step.operation,
                    code = escalation.code().code(),
                    skipped = total - i - 1,
                    "campaign halted"
                );
                break;
            }
        }
        if state.code().is_none() {
            state = CampaignState::Done(escalation.code());
        }

        let code = escalation.code();
        let summary = CampaignSummary {
            campaign_id,
            campaign: name.to_string(),
            profile: definition.profile,
            target,
            started_at,
            finished_at: Utc::now(),
            state: match state {
                CampaignState::Halted(_) => TerminalState::Halted,
                _ => TerminalState::Done,
            },
            result: code,
            code: code.code(),
            steps_run: steps.len(),
            steps_total: total,
        };
        if let Err(e) = sink.record_summary(&summary) {
            error!(campaign = %name, error = %e, "failed to write campaign summary");
        }
        info!(campaign = %name, code = code.code(), ?state, "campaign finished");

        Ok(CampaignReport {
            state,
            summary,
            steps,
        })
    }

    /// One pass of the step pipeline. Always yields a settled record.
    pub fn run_step(
        &self,
        index: usize,
        name: &str,
        target: &str,
        campaign_id: Option<Uuid>,
        sink: &mut dyn LogSink,
    ) -> StepRecord {
        let (record, output) = match self.config.operation(name) {
            Some(op) => {
                let mut record = StepRecord::new(&op.name, target, Some(op.mode), campaign_id);
                let output = self.execute(op, target, &mut record);
                (record, output)
            }
            None => {
                let mut record = StepRecord::new(name, target, None, campaign_id);
                record.settle(ResultCode::PrecheckOrTimeoutFailure, Reason::Unresolved);
                record.detail = Some(format!("operation '{name}' is not defined"));
                warn!(operation = %name, "step references an unknown operation");
                (record, String::new())
            }
        };
        if let Err(e) = sink.record_step(index, &record, &output) {
            error!(operation = %record.operation, error = %e, "failed to write step record");
        }
        record
    }

    fn execute(&self, op: &Operation, target: &str, record: &mut StepRecord) -> String {
        let fatal = ResultCode::PrecheckOrTimeoutFailure;
        let invocation = op.command.render(target);

        if !self.invoker.resolve(invocation.program()) {
            record.settle(fatal, Reason::Unresolved);
            record.detail = Some(format!("cannot resolve program '{}'", invocation.program()));
            warn!(operation = %op.name, program = %invocation.program(), "program not found");
            return String::new();
        }
        let classifier = match Classifier::for_operation(op) {
            Ok(c) => c,
            Err(e) => {
                record.settle(fatal, Reason::Unresolved);
                record.detail = Some(e.to_string());
                warn!(operation = %op.name, error = %e, "operation rules do not compile");
                return String::new();
            }
        };

        match precondition::evaluate(self.probe, op, target) {
            Ok(snapshot) => record.pre_state = snapshot,
            Err(blocked) => {
                record.pre_state = blocked.snapshot;
                record.settle(blocked.reason.code(), Reason::Precondition);
                record.detail = Some(blocked.reason.to_string());
                warn!(operation = %op.name, %target, reason = %blocked.reason, "precondition blocked step");
                return String::new();
            }
        }

        info!(operation = %op.name, %target, command = %invocation.display(), "step started");
        let execution = self.invoker.invoke(&invocation, op.timeout());
        record.completed = execution.completed;
        record.exit_code = execution.exit_code;
        record.set_duration(execution.duration);

        if !execution.completed {
            let reason = match &execution.failure {
                Some(ExecFailure::SpawnFailed(_)) => Reason::SpawnFailed,
                _ => Reason::Timeout,
            };
            record.settle(fatal, reason);
            record.detail = execution.failure.as_ref().map(|f| f.to_string());
            warn!(operation = %op.name, %target, reason = reason.as_str(), "step did not complete");
            return execution.output;
        }

        let post = op
            .policy
            .observe_scheduling
            .then(|| precondition::capture(self.probe, op, target));
        record.post_state = post;
        let classification = classifier.classify(&execution.output, &record.pre_state, post.as_ref());
        record.settle_classified(classification);
        info!(
            operation = %op.name,
            %target,
            code = record.code,
            reason = record.reason.as_str(),
            rule = record.matched_rule.as_deref().unwrap_or("-"),
            "step finished"
        );
        execution.output
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CampaignDefinition, CampaignStep, HostConfig, RegistryConfig};
    use crate::error::HostcareError;
    use crate::executor::Execution;
    use crate::operation::{
        ClassificationRule, CommandSpec, Invocation, PreconditionPolicy, RestartPolicy,
        ScheduledPolicy,
    };
    use crate::precondition::StaticProbe;
    use crate::record::MemorySink;
    use crate::types::OperationMode;
    use std::cell::RefCell;
    use std::collections::{BTreeMap, VecDeque};
    use std::time::Duration;

    /// Plays back canned executions in order and counts invocations.
    #[derive(Default)]
    struct ScriptedInvoker {
        script: RefCell<VecDeque<Execution>>,
        calls: RefCell<Vec<String>>,
        missing: Vec<String>,
    }

    impl ScriptedInvoker {
        fn outputs(codes: &[i32]) -> Self {
            let script = codes
                .iter()
                .map(|c| Execution::finished(format!("result code={c}"), Some(0), Duration::ZERO))
                .collect();
            Self {
                script: RefCell::new(script),
                ..Self::default()
            }
        }

        fn with(executions: Vec<Execution>) -> Self {
            Self {
                script: RefCell::new(executions.into()),
                ..Self::default()
            }
        }

        fn invocations(&self) -> usize {
            self.calls.borrow().len()
        }
    }

    impl Invoker for ScriptedInvoker {
        fn resolve(&self, program: &str) -> bool {
            !self.missing.iter().any(|m| m == program)
        }

        fn invoke(&self, invocation: &Invocation, _timeout: Duration) -> Execution {
            self.calls.borrow_mut().push(invocation.display());
            self.script
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Execution::finished("", Some(0), Duration::ZERO))
        }
    }

    fn coded_op(name: &str, mode: OperationMode) -> Operation {
        Operation {
            name: name.into(),
            description: None,
            command: CommandSpec::new("tool", &[name, "{target}"]),
            mode,
            timeout_seconds: 5,
            policy: PreconditionPolicy::default(),
            rules: vec![
                ClassificationRule::new("fatal", "code=3", ResultCode::PrecheckOrTimeoutFailure),
                ClassificationRule::new("blocked", "code=2", ResultCode::ScheduledOrBlocked),
                ClassificationRule::new("issues", "code=1", ResultCode::IssuesOrRepaired),
                ClassificationRule::new("clean", "code=0", ResultCode::Ok),
            ],
            default_code: ResultCode::IssuesOrRepaired,
        }
    }

    fn config(profile: Profile, steps: Vec<CampaignStep>) -> Config {
        let mode = profile.expected_mode();
        let mut campaigns = BTreeMap::new();
        campaigns.insert(
            "test".to_string(),
            CampaignDefinition {
                profile,
                description: None,
                steps,
            },
        );
        Config {
            version: 1,
            log_dir: None,
            registry: RegistryConfig::default(),
            host: HostConfig::default(),
            operations: vec![coded_op("a", mode), coded_op("b", mode), coded_op("c", mode)],
            campaigns,
        }
    }

    fn three_steps(profile: Profile) -> Config {
        config(
            profile,
            vec![CampaignStep::new("a"), CampaignStep::new("b"), CampaignStep::new("c")],
        )
    }

    fn run(cfg: &Config, invoker: &ScriptedInvoker, probe: &StaticProbe) -> (CampaignReport, MemorySink) {
        let mut sink = MemorySink::default();
        let report = Orchestrator::new(cfg, invoker, probe)
            .run_campaign("test", "C:", &mut sink)
            .unwrap();
        (report, sink)
    }

    fn codes(report: &CampaignReport) -> Vec<i32> {
        report.steps.iter().map(|s| s.code).collect()
    }

    // -- escalation, validation profile ------------------------------------

    #[test]
    fn validation_aggregates_max_severity_issues() {
        let cfg = three_steps(Profile::Validation);
        let invoker = ScriptedInvoker::outputs(&[0, 1, 0]);
        let (report, _) = run(&cfg, &invoker, &StaticProbe::healthy());
        assert_eq!(codes(&report), vec![0, 1, 0]);
        assert_eq!(report.state, CampaignState::Done(ResultCode::IssuesOrRepaired));
        assert_eq!(report.summary.code, 1);
    }

    #[test]
    fn validation_scheduled_does_not_halt() {
        let cfg = three_steps(Profile::Validation);
        let invoker = ScriptedInvoker::outputs(&[0, 2, 0]);
        let (report, _) = run(&cfg, &invoker, &StaticProbe::healthy());
        assert_eq!(report.state, CampaignState::Done(ResultCode::ScheduledOrBlocked));
        assert_eq!(invoker.invocations(), 3);
    }

    #[test]
    fn validation_fatal_halts_before_third_step() {
        let cfg = three_steps(Profile::Validation);
        let invoker = ScriptedInvoker::outputs(&[0, 3, 0]);
        let (report, sink) = run(&cfg, &invoker, &StaticProbe::healthy());
        assert_eq!(report.state, CampaignState::Halted(ResultCode::PrecheckOrTimeoutFailure));
        assert_eq!(report.summary.steps_run, 2);
        assert_eq!(report.summary.steps_total, 3);
        assert_eq!(invoker.invocations(), 2);
        assert_eq!(sink.steps.len(), 2);
        assert_eq!(sink.summaries[0].state, TerminalState::Halted);
    }

    // -- escalation, repair profile ----------------------------------------

    #[test]
    fn repair_recoverable_issues_are_superseded() {
        let cfg = three_steps(Profile::Repair);
        let invoker = ScriptedInvoker::outputs(&[1, 1, 0]);
        let (report, _) = run(&cfg, &invoker, &StaticProbe::healthy());
        assert_eq!(report.state, CampaignState::Done(ResultCode::Ok));
        assert_eq!(invoker.invocations(), 3);
    }

    #[test]
    fn repair_scheduled_halts_with_two() {
        let cfg = three_steps(Profile::Repair);
        let invoker = ScriptedInvoker::outputs(&[1, 2, 0]);
        let (report, _) = run(&cfg, &invoker, &StaticProbe::healthy());
        assert_eq!(report.state, CampaignState::Halted(ResultCode::ScheduledOrBlocked));
        assert_eq!(codes(&report), vec![1, 2]);
        assert_eq!(invoker.invocations(), 2);
        assert!(report.halted());
    }

    #[test]
    fn step_halt_threshold_override() {
        let cfg = config(
            Profile::Repair,
            vec![
                CampaignStep {
                    operation: "a".into(),
                    halt_at: Some(ResultCode::IssuesOrRepaired),
                },
                CampaignStep::new("b"),
            ],
        );
        let invoker = ScriptedInvoker::outputs(&[1, 0]);
        let (report, _) = run(&cfg, &invoker, &StaticProbe::healthy());
        assert_eq!(report.state, CampaignState::Halted(ResultCode::IssuesOrRepaired));
        assert_eq!(invoker.invocations(), 1);
    }

    #[test]
    fn escalation_fold_is_pure() {
        let mut e = Escalation::new(Profile::Validation);
        assert!(!e.observe(ResultCode::ScheduledOrBlocked, None));
        assert!(!e.observe(ResultCode::Ok, None));
        assert_eq!(e.code(), ResultCode::ScheduledOrBlocked);

        let mut e = Escalation::new(Profile::Repair);
        assert!(!e.observe(ResultCode::IssuesOrRepaired, None));
        assert!(e.observe(ResultCode::PrecheckOrTimeoutFailure, Some(ResultCode::PrecheckOrTimeoutFailure)));
        assert_eq!(e.code(), ResultCode::PrecheckOrTimeoutFailure);
    }

    // -- step pipeline -----------------------------------------------------

    #[test]
    fn insufficient_privilege_never_invokes_executor() {
        let cfg = three_steps(Profile::Validation);
        let invoker = ScriptedInvoker::outputs(&[0, 0, 0]);
        let probe = StaticProbe {
            privileged: false,
            ..StaticProbe::healthy()
        };
        let (report, _) = run(&cfg, &invoker, &probe);
        assert_eq!(invoker.invocations(), 0);
        assert_eq!(report.steps[0].code, 3);
        assert_eq!(report.steps[0].reason, Reason::Precondition);
        assert!(!report.steps[0].pre_state.privilege_sufficient);
        assert_eq!(report.state, CampaignState::Halted(ResultCode::PrecheckOrTimeoutFailure));
    }

    #[test]
    fn timeout_is_fatal_and_never_classified() {
        let cfg = three_steps(Profile::Validation);
        // Partial output would classify as clean if it were consulted.
        let invoker = ScriptedInvoker::with(vec![Execution::timed_out(
            "result code=0",
            Duration::from_secs(5),
            Duration::from_secs(5),
        )]);
        let (report, sink) = run(&cfg, &invoker, &StaticProbe::healthy());
        let step = &report.steps[0];
        assert_eq!(step.code, 3);
        assert_eq!(step.reason, Reason::Timeout);
        assert!(step.matched_rule.is_none());
        assert!(!step.completed);
        assert_eq!(sink.steps[0].1, "result code=0");
        assert_eq!(report.state, CampaignState::Halted(ResultCode::PrecheckOrTimeoutFailure));
    }

    #[test]
    fn spawn_failure_is_fatal() {
        let cfg = three_steps(Profile::Repair);
        let invoker = ScriptedInvoker::with(vec![Execution::spawn_failed(
            "permission denied",
            Duration::ZERO,
        )]);
        let (report, _) = run(&cfg, &invoker, &StaticProbe::healthy());
        assert_eq!(report.steps[0].reason, Reason::SpawnFailed);
        assert_eq!(report.code(), ResultCode::PrecheckOrTimeoutFailure);
    }

    #[test]
    fn unresolvable_program_is_fatal_without_execution() {
        let cfg = three_steps(Profile::Validation);
        let invoker = ScriptedInvoker {
            missing: vec!["tool".into()],
            ..ScriptedInvoker::default()
        };
        let (report, _) = run(&cfg, &invoker, &StaticProbe::healthy());
        assert_eq!(invoker.invocations(), 0);
        assert_eq!(report.steps[0].reason, Reason::Unresolved);
        assert_eq!(report.code(), ResultCode::PrecheckOrTimeoutFailure);
    }

    #[test]
    fn unknown_operation_halts_campaign() {
        let cfg = config(
            Profile::Validation,
            vec![CampaignStep::new("a"), CampaignStep::new("ghost"), CampaignStep::new("c")],
        );
        let invoker = ScriptedInvoker::outputs(&[0, 0]);
        let (report, _) = run(&cfg, &invoker, &StaticProbe::healthy());
        assert_eq!(report.steps[1].operation, "ghost");
        assert!(report.steps[1].mode.is_none());
        assert_eq!(report.state, CampaignState::Halted(ResultCode::PrecheckOrTimeoutFailure));
        assert_eq!(invoker.invocations(), 1);
    }

    #[test]
    fn already_scheduled_short_circuits_repair() {
        let mut cfg = three_steps(Profile::Repair);
        cfg.operations[0].policy.when_scheduled = ScheduledPolicy::ShortCircuit;
        let invoker = ScriptedInvoker::outputs(&[0, 0, 0]);
        let probe = StaticProbe {
            already_scheduled: true,
            ..StaticProbe::healthy()
        };
        let (report, _) = run(&cfg, &invoker, &probe);
        assert_eq!(invoker.invocations(), 0);
        assert_eq!(report.steps[0].reason, Reason::Precondition);
        assert_eq!(report.state, CampaignState::Halted(ResultCode::ScheduledOrBlocked));
    }

    #[test]
    fn operation_that_schedules_work_reads_as_scheduled() {
        let mut cfg = three_steps(Profile::Repair);
        cfg.operations[0].policy.observe_scheduling = true;
        let invoker = ScriptedInvoker::outputs(&[0]);
        let probe = StaticProbe {
            scheduled_after_first_query: Some(true),
            ..StaticProbe::healthy()
        };
        let (report, _) = run(&cfg, &invoker, &probe);
        let step = &report.steps[0];
        assert_eq!(step.reason, Reason::ScheduledTransition);
        assert_eq!(step.code, 2);
        assert!(!step.pre_state.already_scheduled);
        assert_eq!(step.post_state.map(|s| s.already_scheduled), Some(true));
    }

    #[test]
    fn restart_gate_blocks_only_gated_operations() {
        let mut cfg = three_steps(Profile::Validation);
        cfg.operations[1].policy.restart = RestartPolicy::Gate;
        let invoker = ScriptedInvoker::outputs(&[0, 0, 0]);
        let probe = StaticProbe {
            restart_pending: true,
            ..StaticProbe::healthy()
        };
        let (report, _) = run(&cfg, &invoker, &probe);
        assert_eq!(report.steps[0].code, 0);
        assert!(report.steps[0].pre_state.restart_pending);
        assert_eq!(report.steps[1].reason, Reason::Precondition);
        assert_eq!(report.state, CampaignState::Halted(ResultCode::PrecheckOrTimeoutFailure));
    }

    #[test]
    fn records_carry_campaign_identity() {
        let cfg = three_steps(Profile::Validation);
        let invoker = ScriptedInvoker::outputs(&[0, 0, 0]);
        let (report, sink) = run(&cfg, &invoker, &StaticProbe::healthy());
        let id = report.summary.campaign_id;
        assert!(sink.steps.iter().all(|(r, _)| r.campaign_id == Some(id)));
        assert_eq!(sink.summaries.len(), 1);
        assert_eq!(sink.summaries[0].code, 0);
        assert_eq!(invoker.calls.borrow()[0], "tool a C:");
    }

    #[test]
    fn single_operation_run_normalizes_target() {
        let cfg = three_steps(Profile::Validation);
        let invoker = ScriptedInvoker::outputs(&[1]);
        let probe = StaticProbe::healthy();
        let mut sink = MemorySink::default();
        let orch = Orchestrator::new(&cfg, &invoker, &probe);

        let record = orch.run_operation("b", "c:\\", &mut sink).unwrap();
        assert_eq!(record.target, "C:");
        assert_eq!(record.code, 1);
        assert!(record.campaign_id.is_none());
        assert!(sink.summaries.is_empty());

        let err = orch.run_operation("b", "  ", &mut sink).unwrap_err();
        assert!(matches!(err, HostcareError::InvalidTarget(_)));
    }

    #[test]
    fn unknown_campaign_is_an_error() {
        let cfg = three_steps(Profile::Validation);
        let invoker = ScriptedInvoker::default();
        let probe = StaticProbe::healthy();
        let mut sink = MemorySink::default();
        let err = Orchestrator::new(&cfg, &invoker, &probe)
            .run_campaign("nope", "C:", &mut sink)
            .unwrap_err();
        assert!(matches!(err, HostcareError::CampaignNotFound(_)));
    }
}
