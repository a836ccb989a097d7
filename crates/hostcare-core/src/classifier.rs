//! Maps captured tool output to a [`ResultCode`].
//!
//! Precedence, highest first:
//! 1. the operation itself queued work for the next restart
//!    (`post.already_scheduled` became true) → `ScheduledOrBlocked`
//! 2. the first rule, in declared order, whose pattern matches the output
//! 3. the operation's declared default
//!
//! Timeouts never reach the classifier; the orchestrator settles them first.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::error::{HostcareError, Result};
use crate::operation::{ClassificationRule, Operation};
use crate::types::{HostStateSnapshot, ResultCode};

// ---------------------------------------------------------------------------
// Classification (output)
// ---------------------------------------------------------------------------

/// Why a step ended with its code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    Rule,
    Default,
    ScheduledTransition,
    Precondition,
    Timeout,
    SpawnFailed,
    Unresolved,
}

impl Reason {
    pub fn as_str(self) -> &'static str {
        match self {
            Reason::Rule => "rule",
            Reason::Default => "default",
            Reason::ScheduledTransition => "scheduled_transition",
            Reason::Precondition => "precondition",
            Reason::Timeout => "timeout",
            Reason::SpawnFailed => "spawn_failed",
            Reason::Unresolved => "unresolved",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub code: ResultCode,
    pub reason: Reason,
    pub matched_rule: Option<String>,
}

// ---------------------------------------------------------------------------
// Classifier
// ---------------------------------------------------------------------------

struct CompiledRule {
    name: String,
    regex: Regex,
    code: ResultCode,
}

pub struct Classifier {
    rules: Vec<CompiledRule>,
    default_code: ResultCode,
}

impl Classifier {
    /// Compile `rules` case-insensitively. `operation` only labels errors.
    pub fn new(
        operation: &str,
        rules: &[ClassificationRule],
        default_code: ResultCode,
    ) -> Result<Self> {
        let compiled = rules
            .iter()
            .map(|r| {
                RegexBuilder::new(&r.pattern)
                    .case_insensitive(true)
                    .multi_line(true)
                    .build()
                    .map(|regex| CompiledRule {
                        name: r.name.clone(),
                        regex,
                        code: r.code,
                    })
                    .map_err(|source| HostcareError::InvalidPattern {
                        operation: operation.to_string(),
                        rule: r.name.clone(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            rules: compiled,
            default_code,
        })
    }

    pub fn for_operation(op: &Operation) -> Result<Self> {
        Self::new(&op.name, &op.rules, op.default_code)
    }

    pub fn classify(
        &self,
        output: &str,
        pre: &HostStateSnapshot,
        post: Option<&HostStateSnapshot>,
    ) -> Classification {
        if let Some(post) = post {
            if post.already_scheduled && !pre.already_scheduled {
                return Classification {
                    code: ResultCode::ScheduledOrBlocked,
                    reason: Reason::ScheduledTransition,
                    matched_rule: None,
                };
            }
        }

        for rule in &self.rules {
            if rule.regex.is_match(output) {
                return Classification {
                    code: rule.code,
                    reason: Reason::Rule,
                    matched_rule: Some(rule.name.clone()),
                };
            }
        }

        Classification {
            code: self.default_code,
            reason: Reason::Default,
            matched_rule: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
