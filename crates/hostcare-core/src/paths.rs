use crate::error::{HostcareError, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// File constants
// ---------------------------------------------------------------------------

pub const CONFIG_FILE: &str = "hostcare.yaml";
pub const STATE_DIR: &str = ".hostcare";
pub const LOG_DIR: &str = ".hostcare/logs";
pub const REGISTRY_FILE: &str = ".hostcare/boot-schedule.txt";

pub const RECORDS_FILE: &str = "records.jsonl";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn default_log_dir(root: &Path) -> PathBuf {
    root.join(LOG_DIR)
}

pub fn default_registry_path(root: &Path) -> PathBuf {
    root.join(REGISTRY_FILE)
}

/// Resolve a configured path relative to `root` unless it is already absolute.
pub fn resolve_under(root: &Path, configured: &Path) -> PathBuf {
    if configured.is_absolute() {
        configured.to_path_buf()
    } else {
        root.join(configured)
    }
}

// ---------------------------------------------------------------------------
// Target normalization
// ---------------------------------------------------------------------------

static DRIVE_RE: OnceLock<Regex> = OnceLock::new();

fn drive_re() -> &'static Regex {
    DRIVE_RE.get_or_init(|| Regex::new(r"^[A-Za-z]:$").unwrap())
}

/// True for a bare drive designator such as `C:`.
pub fn is_drive_designator(target: &str) -> bool {
    drive_re().is_match(target)
}

/// Canonical form of a target identifier.
///
/// Trims whitespace, drops a trailing separator (`C:\` → `C:`, `/mnt/data/`
/// → `/mnt/data`) and upper-cases drive letters.
pub fn normalize_target(target: &str) -> Result<String> {
    let trimmed = target.trim();
    if trimmed.is_empty() || trimmed.chars().any(char::is_whitespace) {
        return Err(HostcareError::InvalidTarget(target.to_string()));
    }
    let mut t = trimmed.to_string();
    while t.len() > 1 && (t.ends_with('\\') || t.ends_with('/')) {
        t.pop();
    }
    if is_drive_designator(&t) {
        t = t.to_ascii_uppercase();
    }
    Ok(t)
}

/// Filesystem path probed for availability of `target`.
pub fn target_probe_path(target: &str) -> PathBuf {
    if is_drive_designator(target) {
        PathBuf::from(format!("{target}\\"))
    } else {
        PathBuf::from(target)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
