//! Result records: what each step observed and concluded, in a schema meant
//! for machines. One session directory per invocation:
//!
//! ```text
//! <log_dir>/20260118-031500-validate-1a2b3c4d/
//!     records.jsonl        one step record per line, then the summary
//!     01-disk-scan.log     raw output of step 1
//!     02-image-check.log
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

use crate::classifier::{Classification, Reason};
use crate::error::Result;
use crate::io;
use crate::paths::RECORDS_FILE;
use crate::types::{HostStateSnapshot, OperationMode, Profile, ResultCode};

// ---------------------------------------------------------------------------
// StepRecord
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub campaign_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
    pub operation: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<OperationMode>,
    pub result: ResultCode,
    pub code: i32,
    pub reason: Reason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_rule: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub pre_state: HostStateSnapshot,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_state: Option<HostStateSnapshot>,
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
}

impl StepRecord {
    /// A fresh record. It starts out fatal and unresolved, so a step that
    /// never reaches `settle` still carries a terminal code.
    pub fn new(
        operation: &str,
        target: &str,
        mode: Option<OperationMode>,
        campaign_id: Option<Uuid>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            campaign_id,
            timestamp: Utc::now(),
            operation: operation.to_string(),
            target: target.to_string(),
            mode,
            result: ResultCode::PrecheckOrTimeoutFailure,
            code: ResultCode::PrecheckOrTimeoutFailure.code(),
            reason: Reason::Unresolved,
            matched_rule: None,
            detail: None,
            pre_state: HostStateSnapshot::default(),
            post_state: None,
            completed: false,
            exit_code: None,
            duration_ms: 0,
        }
    }

    pub fn settle(&mut self, code: ResultCode, reason: Reason) {
        self.result = code;
        self.code = code.code();
        self.reason = reason;
    }

    pub fn settle_classified(&mut self, classification: Classification) {
        self.settle(classification.code, classification.reason);
        self.matched_rule = classification.matched_rule;
    }

    pub fn set_duration(&mut self, duration: Duration) {
        self.duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
    }
}

// ---------------------------------------------------------------------------
// CampaignSummary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalState {
    Done,
    Halted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignSummary {
    pub campaign_id: Uuid,
    pub campaign: String,
    pub profile: Profile,
    pub target: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub state: TerminalState,
    pub result: ResultCode,
    pub code: i32,
    pub steps_run: usize,
    pub steps_total: usize,
}

/// One line of `records.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogEntry {
    Step(StepRecord),
    Summary(CampaignSummary),
}

// ---------------------------------------------------------------------------
// LogSink
// ---------------------------------------------------------------------------

/// Append-only destination for records. Failures are reported to the caller,
/// which logs them; they never change a step's code.
pub trait LogSink {
    fn record_step(&mut self, index: usize, record: &StepRecord, raw_output: &str) -> Result<()>;
    fn record_summary(&mut self, summary: &CampaignSummary) -> Result<()>;
}

pub struct JsonlSink {
    dir: PathBuf,
}

impl JsonlSink {
    /// Create a new session directory under `log_dir`.
    pub fn create(log_dir: &Path, label: &str) -> Result<Self> {
        let session = Uuid::new_v4().simple().to_string();
        let name = format!(
            "{}-{}-{}",
            Utc::now().format("%Y%m%d-%H%M%S"),
            file_safe(label),
            &session[..8]
        );
        let dir = log_dir.join(name);
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn records_path(&self) -> PathBuf {
        self.dir.join(RECORDS_FILE)
    }

    fn append(&self, entry: &LogEntry) -> Result<()> {
        let line = serde_json::to_string(entry)?;
        io::append_line(&self.records_path(), &line)
    }
}

impl LogSink for JsonlSink {
    fn record_step(&mut self, index: usize, record: &StepRecord, raw_output: &str) -> Result<()> {
        let raw_path = self
            .dir
            .join(format!("{:02}-{}.log", index + 1, file_safe(&record.operation)));
        io::atomic_write(&raw_path, raw_output.as_bytes())?;
        self.append(&LogEntry::Step(record.clone()))
    }

    fn record_summary(&mut self, summary: &CampaignSummary) -> Result<()> {
        self.append(&LogEntry::Summary(summary.clone()))
    }
}

/// Read back a `records.jsonl` file.
pub fn read_entries(path: &Path) -> Result<Vec<LogEntry>> {
    let content = std::fs::read_to_string(path)?;
    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).map_err(Into::into))
        .collect()
}

fn file_safe(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[derive(Debug, Default)]
pub struct MemorySink {
    pub steps: Vec<(StepRecord, String)>,
    pub summaries: Vec<CampaignSummary>,
}

impl LogSink for MemorySink {
    fn record_step(&mut self, _index: usize, record: &StepRecord, raw_output: &str) -> Result<()> {
        self.steps.push((record.clone(), raw_output.to_string()));
        Ok(())
    }

    fn record_summary(&mut self, summary: &CampaignSummary) -> Result<()> {
        self.summaries.push(summary.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
