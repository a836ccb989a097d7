use crate::types::ResultCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HostcareError {
    #[error("config not found: {0}")]
    ConfigNotFound(String),

    #[error("operation not found: {0}")]
    OperationNotFound(String),

    #[error("campaign not found: {0}")]
    CampaignNotFound(String),

    #[error("invalid target '{0}': must be a drive designator or path without whitespace")]
    InvalidTarget(String),

    #[error("invalid {kind} '{value}'")]
    InvalidValue { kind: &'static str, value: String },

    #[error("rule '{rule}' of operation '{operation}' has an invalid pattern: {source}")]
    InvalidPattern {
        operation: String,
        rule: String,
        #[source]
        source: regex::Error,
    },

    #[error("registry write failed: {0}")]
    RegistryWrite(String),

    #[error("registry changed underneath this update: re-read and retry")]
    RegistryConflict,

    #[error("executor runtime unavailable: {0}")]
    Runtime(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, HostcareError>;

/// Host-state conditions that stop an operation before it is spawned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PreconditionError {
    #[error("insufficient privilege: elevated rights are required")]
    InsufficientPrivilege,

    #[error("target '{0}' is not available")]
    TargetUnavailable(String),

    #[error("work is already scheduled for '{0}' at next restart")]
    AlreadyScheduled(String),

    #[error("a restart is pending; this operation refuses to run until it completes")]
    RestartPending,
}

impl PreconditionError {
    pub fn code(&self) -> ResultCode {
        match self {
            PreconditionError::AlreadyScheduled(_) => ResultCode::ScheduledOrBlocked,
            _ => ResultCode::PrecheckOrTimeoutFailure,
        }
    }
}
