use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::HostcareError;

// ---------------------------------------------------------------------------
// ResultCode
// ---------------------------------------------------------------------------

/// Normalized outcome of a step or campaign.
///
/// Variants are declared in escalation order, so the derived `Ord` is the
/// severity order used when aggregating a validation campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultCode {
    Ok,
    IssuesOrRepaired,
    ScheduledOrBlocked,
    PrecheckOrTimeoutFailure,
}

impl ResultCode {
    pub fn all() -> &'static [ResultCode] {
        &[
            ResultCode::Ok,
            ResultCode::IssuesOrRepaired,
            ResultCode::ScheduledOrBlocked,
            ResultCode::PrecheckOrTimeoutFailure,
        ]
    }

    /// Numeric value surfaced as the process exit status.
    pub fn code(self) -> i32 {
        match self {
            ResultCode::Ok => 0,
            ResultCode::IssuesOrRepaired => 1,
            ResultCode::ScheduledOrBlocked => 2,
            ResultCode::PrecheckOrTimeoutFailure => 3,
        }
    }

    pub fn from_code(code: i32) -> Option<ResultCode> {
        ResultCode::all().iter().copied().find(|c| c.code() == code)
    }

    pub fn is_fatal(self) -> bool {
        self == ResultCode::PrecheckOrTimeoutFailure
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ResultCode::Ok => "ok",
            ResultCode::IssuesOrRepaired => "issues_or_repaired",
            ResultCode::ScheduledOrBlocked => "scheduled_or_blocked",
            ResultCode::PrecheckOrTimeoutFailure => "precheck_or_timeout_failure",
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ResultCode {
    type Err = HostcareError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(n) = s.parse::<i32>() {
            return ResultCode::from_code(n).ok_or_else(|| HostcareError::InvalidValue {
                kind: "result code",
                value: s.to_string(),
            });
        }
        let normalized = s.replace('-', "_");
        ResultCode::all()
            .iter()
            .copied()
            .find(|c| c.as_str() == normalized)
            .ok_or_else(|| HostcareError::InvalidValue {
                kind: "result code",
                value: s.to_string(),
            })
    }
}

// ---------------------------------------------------------------------------
// OperationMode
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationMode {
    #[serde(alias = "read-only")]
    ReadOnly,
    #[serde(alias = "write-capable")]
    WriteCapable,
}

impl OperationMode {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationMode::ReadOnly => "read-only",
            OperationMode::WriteCapable => "write-capable",
        }
    }
}

impl fmt::Display for OperationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Profile
// ---------------------------------------------------------------------------

/// Escalation profile of a campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Profile {
    Validation,
    Repair,
}

impl Profile {
    pub fn as_str(self) -> &'static str {
        match self {
            Profile::Validation => "validation",
            Profile::Repair => "repair",
        }
    }

    /// Lowest code that halts the remaining steps unless a step overrides it.
    pub fn default_halt_at(self) -> ResultCode {
        match self {
            Profile::Validation => ResultCode::PrecheckOrTimeoutFailure,
            Profile::Repair => ResultCode::ScheduledOrBlocked,
        }
    }

    /// Mode that steps of this profile are expected to declare.
    pub fn expected_mode(self) -> OperationMode {
        match self {
            Profile::Validation => OperationMode::ReadOnly,
            Profile::Repair => OperationMode::WriteCapable,
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// HostStateSnapshot
// ---------------------------------------------------------------------------

/// Host-state signals captured before (and for some operations after) a step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostStateSnapshot {
    pub privilege_sufficient: bool,
    pub restart_pending: bool,
    pub target_available: bool,
    pub already_scheduled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_order_follows_codes() {
        let mut codes = vec![
            ResultCode::PrecheckOrTimeoutFailure,
            ResultCode::Ok,
            ResultCode::ScheduledOrBlocked,
            ResultCode::IssuesOrRepaired,
        ];
        codes.sort();
        let numeric: Vec<i32> = codes.iter().map(|c| c.code()).collect();
        assert_eq!(numeric, vec![0, 1, 2, 3]);
    }

    #[test]
    fn parse_by_name_or_number() {
        assert_eq!("2".parse::<ResultCode>().unwrap(), ResultCode::ScheduledOrBlocked);
        assert_eq!(
            "issues-or-repaired".parse::<ResultCode>().unwrap(),
            ResultCode::IssuesOrRepaired
        );
        assert!("7".parse::<ResultCode>().is_err());
        assert!("fine".parse::<ResultCode>().is_err());
    }

    #[test]
    fn mode_accepts_hyphenated_yaml() {
        let mode: OperationMode = serde_yaml::from_str("read-only").unwrap();
        assert_eq!(mode, OperationMode::ReadOnly);
        let mode: OperationMode = serde_yaml::from_str("write_capable").unwrap();
        assert_eq!(mode, OperationMode::WriteCapable);
    }

    #[test]
    fn profile_halt_thresholds() {
        assert_eq!(
            Profile::Validation.default_halt_at(),
            ResultCode::PrecheckOrTimeoutFailure
        );
        assert_eq!(Profile::Repair.default_halt_at(), ResultCode::ScheduledOrBlocked);
    }
}
