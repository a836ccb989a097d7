use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::types::{OperationMode, ResultCode};

// ---------------------------------------------------------------------------
// CommandSpec
// ---------------------------------------------------------------------------

pub const TARGET_PLACEHOLDER: &str = "{target}";

/// The invocable behind an operation. Opaque to the engine apart from
/// placeholder substitution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Written to the command's stdin, which is then closed. Answers the
    /// confirmation prompts some repair tools raise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdin: Option<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
            stdin: None,
        }
    }

    /// Build the concrete invocation for `target`.
    pub fn render(&self, target: &str) -> Invocation {
        let mut argv = Vec::with_capacity(self.args.len() + 1);
        argv.push(self.program.replace(TARGET_PLACEHOLDER, target));
        argv.extend(
            self.args
                .iter()
                .map(|a| a.replace(TARGET_PLACEHOLDER, target)),
        );
        Invocation {
            argv,
            stdin: self.stdin.clone(),
        }
    }
}

/// A fully rendered command line, ready for the executor.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub argv: Vec<String>,
    pub stdin: Option<String>,
}

impl Invocation {
    pub fn program(&self) -> &str {
        self.argv.first().map(String::as_str).unwrap_or("")
    }

    pub fn display(&self) -> String {
        self.argv.join(" ")
    }
}

// ---------------------------------------------------------------------------
// Precondition policy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartPolicy {
    /// A pending restart blocks the operation with a precheck failure.
    Gate,
    /// A pending restart is recorded and the operation proceeds.
    Advisory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduledPolicy {
    /// Work already queued for the target is sufficient; skip the body.
    ShortCircuit,
    Proceed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PreconditionPolicy {
    #[serde(default = "default_true")]
    pub requires_privilege: bool,
    #[serde(default = "default_true")]
    pub requires_target: bool,
    #[serde(default = "default_restart")]
    pub restart: RestartPolicy,
    #[serde(default = "default_when_scheduled")]
    pub when_scheduled: ScheduledPolicy,
    /// Re-probe host state after the run to notice work the operation itself
    /// deferred to the next restart.
    #[serde(default)]
    pub observe_scheduling: bool,
}

fn default_true() -> bool {
    true
}

fn default_restart() -> RestartPolicy {
    RestartPolicy::Advisory
}

fn default_when_scheduled() -> ScheduledPolicy {
    ScheduledPolicy::Proceed
}

impl Default for PreconditionPolicy {
    fn default() -> Self {
        Self {
            requires_privilege: true,
            requires_target: true,
            restart: default_restart(),
            when_scheduled: default_when_scheduled(),
            observe_scheduling: false,
        }
    }
}

// ---------------------------------------------------------------------------
// ClassificationRule
// ---------------------------------------------------------------------------

/// One entry of an operation's ordered rule list. `pattern` is a regular
/// expression matched case-insensitively anywhere in the captured output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClassificationRule {
    pub name: String,
    pub pattern: String,
    pub code: ResultCode,
}

impl ClassificationRule {
    pub fn new(name: &str, pattern: &str, code: ResultCode) -> Self {
        Self {
            name: name.to_string(),
            pattern: pattern.to_string(),
            code,
        }
    }
}

// ---------------------------------------------------------------------------
// Operation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Operation {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub command: CommandSpec,
    pub mode: OperationMode,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub policy: PreconditionPolicy,
    #[serde(default)]
    pub rules: Vec<ClassificationRule>,
    /// Code used when no rule matches. Ambiguous output is non-clean.
    #[serde(default = "default_code")]
    pub default_code: ResultCode,
}

fn default_timeout() -> u64 {
    3600
}

fn default_code() -> ResultCode {
    ResultCode::IssuesOrRepaired
}

impl Operation {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
