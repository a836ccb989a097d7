//! Boot-schedule registry: the durable, ordered list of work deferred to the
//! next restart.
//!
//! Layout: one encoded line per entry, in order.
//!
//! ```text
//! autocheck autochk *
//! autocheck autochk /r \??\D:
//! ```
//!
//! Uniqueness is exact string equality of the encoded line, so one target
//! may carry several entries with different modes. Lines that do not decode
//! to a target (the stock `*` entry) are never touched by `remove`.
//!
//! Every mutation is a read-modify-write of the whole sequence, committed
//! through [`ScheduleStore::compare_and_write`] so a concurrent writer turns
//! into a [`HostcareError::RegistryConflict`] instead of a lost update.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, info, warn};

use crate::error::{HostcareError, Result};
use crate::io;
use crate::paths::normalize_target;

pub const ENTRY_PREFIX: &str = "autocheck autochk";
const NT_PREFIX: &str = r"\??\";

// ---------------------------------------------------------------------------
// ScheduleMode
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleMode {
    /// Full check at boot (`/p`).
    Check,
    /// Locate bad sectors and recover readable data (`/r`).
    Recover,
    /// Force the volume to dismount first (`/x`).
    Dismount,
}

impl ScheduleMode {
    pub fn all() -> &'static [ScheduleMode] {
        &[
            ScheduleMode::Check,
            ScheduleMode::Recover,
            ScheduleMode::Dismount,
        ]
    }

    pub fn flag(self) -> &'static str {
        match self {
            ScheduleMode::Check => "/p",
            ScheduleMode::Recover => "/r",
            ScheduleMode::Dismount => "/x",
        }
    }

    pub fn from_flag(flag: &str) -> Option<ScheduleMode> {
        ScheduleMode::all()
            .iter()
            .copied()
            .find(|m| m.flag().eq_ignore_ascii_case(flag))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ScheduleMode::Check => "check",
            ScheduleMode::Recover => "recover",
            ScheduleMode::Dismount => "dismount",
        }
    }
}

impl fmt::Display for ScheduleMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ScheduleMode {
    type Err = HostcareError;

    fn from_str(s: &str) -> Result<Self> {
        ScheduleMode::all()
            .iter()
            .copied()
            .find(|m| m.as_str() == s)
            .or_else(|| ScheduleMode::from_flag(s))
            .ok_or_else(|| HostcareError::InvalidValue {
                kind: "schedule mode (check | recover | dismount)",
                value: s.to_string(),
            })
    }
}

/// Mode selector for `remove`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeFilter {
    Any,
    Only(ScheduleMode),
}

impl ModeFilter {
    pub fn matches(self, mode: Option<ScheduleMode>) -> bool {
        match self {
            ModeFilter::Any => true,
            ModeFilter::Only(m) => mode == Some(m),
        }
    }
}

impl std::str::FromStr for ModeFilter {
    type Err = HostcareError;

    fn from_str(s: &str) -> Result<Self> {
        if s == "any" || s == "*" {
            return Ok(ModeFilter::Any);
        }
        s.parse().map(ModeFilter::Only)
    }
}

// ---------------------------------------------------------------------------
// ScheduleEntry / StoredLine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub target: String,
    pub mode: ScheduleMode,
}

impl ScheduleEntry {
    pub fn new(target: &str, mode: ScheduleMode) -> Result<Self> {
        Ok(Self {
            target: normalize_target(target)?,
            mode,
        })
    }

    /// The part of the line that identifies this (target, mode) pair.
    pub fn fragment(&self) -> String {
        format!("{} {NT_PREFIX}{}", self.mode.flag(), self.target)
    }

    pub fn encode(&self) -> String {
        format!("{ENTRY_PREFIX} {}", self.fragment())
    }
}

/// A stored line with whatever could be decoded from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredLine {
    pub raw: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<ScheduleMode>,
}

impl StoredLine {
    pub fn parse(raw: &str) -> Self {
        let mut target = None;
        let mut mode = None;
        let is_entry = raw
            .trim_start()
            .get(..ENTRY_PREFIX.len())
            .is_some_and(|p| p.eq_ignore_ascii_case(ENTRY_PREFIX));
        if is_entry {
            for token in raw.split_whitespace().skip(2) {
                if let Some(t) = token.strip_prefix(NT_PREFIX) {
                    target = normalize_target(t).ok();
                } else if mode.is_none() {
                    mode = ScheduleMode::from_flag(token);
                }
            }
        }
        Self {
            raw: raw.to_string(),
            target,
            mode,
        }
    }

    fn targets(&self, target: &str) -> bool {
        self.target.as_deref() == Some(target)
    }
}

// ---------------------------------------------------------------------------
// ScheduleStore
// ---------------------------------------------------------------------------

/// The durable sequence behind the registry. Stores have no partial-update
/// primitive: callers read everything and write everything.
pub trait ScheduleStore {
    fn read(&self) -> Result<Vec<String>>;

    fn write(&self, lines: &[String]) -> Result<()>;

    /// Write `updated` only if the store still holds `expected`.
    fn compare_and_write(&self, expected: &[String], updated: &[String]) -> Result<()> {
        if self.read()? != expected {
            return Err(HostcareError::RegistryConflict);
        }
        self.write(updated)
    }
}

/// In-process store, used for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    lines: Mutex<Vec<String>>,
    writes: Mutex<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lines(lines: &[&str]) -> Self {
        Self {
            lines: Mutex::new(lines.iter().map(|l| l.to_string()).collect()),
            writes: Mutex::new(0),
        }
    }

    /// Number of committed writes.
    pub fn write_count(&self) -> usize {
        self.writes.lock().map(|w| *w).unwrap_or(0)
    }

    fn poisoned() -> HostcareError {
        HostcareError::RegistryWrite("memory store lock poisoned".into())
    }
}

impl ScheduleStore for MemoryStore {
    fn read(&self) -> Result<Vec<String>> {
        self.lines
            .lock()
            .map(|l| l.clone())
            .map_err(|_| Self::poisoned())
    }

    fn write(&self, lines: &[String]) -> Result<()> {
        let mut current = self.lines.lock().map_err(|_| Self::poisoned())?;
        *current = lines.to_vec();
        *self.writes.lock().map_err(|_| Self::poisoned())? += 1;
        Ok(())
    }

    fn compare_and_write(&self, expected: &[String], updated: &[String]) -> Result<()> {
        let mut current = self.lines.lock().map_err(|_| Self::poisoned())?;
        if current.as_slice() != expected {
            return Err(HostcareError::RegistryConflict);
        }
        *current = updated.to_vec();
        *self.writes.lock().map_err(|_| Self::poisoned())? += 1;
        Ok(())
    }
}

/// Plain-text store, one line per entry. A missing file is an empty sequence.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
    lock_wait: Duration,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock_wait: Duration::from_secs(2),
        }
    }

    pub fn with_lock_wait(mut self, wait: Duration) -> Self {
        self.lock_wait = wait;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".lock");
        PathBuf::from(name)
    }
}

impl ScheduleStore for FileStore {
    fn read(&self) -> Result<Vec<String>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        Ok(content
            .lines()
            .map(str::trim_end)
            .filter(|l| !l.trim().is_empty())
            .map(str::to_string)
            .collect())
    }

    fn write(&self, lines: &[String]) -> Result<()> {
        let mut data = lines.join("\n");
        if !data.is_empty() {
            data.push('\n');
        }
        io::atomic_write(&self.path, data.as_bytes()).map_err(|e| {
            HostcareError::RegistryWrite(format!("{}: {e}", self.path.display()))
        })
    }

    fn compare_and_write(&self, expected: &[String], updated: &[String]) -> Result<()> {
        let _guard = LockFile::acquire(&self.lock_path(), self.lock_wait)?;
        if self.read()? != expected {
            return Err(HostcareError::RegistryConflict);
        }
        self.write(updated)
    }
}

/// A lock older than this was left by a writer that died mid-update.
const STALE_LOCK: Duration = Duration::from_secs(300);

/// Exclusive lock held for the duration of one read-modify-write. The file
/// records the owner's pid; its age decides staleness.
struct LockFile {
    path: PathBuf,
}

impl LockFile {
    fn acquire(path: &Path, wait: Duration) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let deadline = Instant::now() + wait;
        loop {
            match std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(path)
            {
                Ok(mut file) => {
                    use std::io::Write;
                    let _ = writeln!(file, "{}", std::process::id());
                    return Ok(Self {
                        path: path.to_path_buf(),
                    })
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if is_stale(path) {
                        let owner = std::fs::read_to_string(path).unwrap_or_default();
                        warn!(lock = %path.display(), owner = owner.trim(), "removing stale lock");
                        if std::fs::remove_file(path).is_ok() {
                            continue;
                        }
                    }
                    if Instant::now() >= deadline {
                        return Err(HostcareError::RegistryWrite(format!(
                            "store is locked by another writer ({})",
                            path.display()
                        )));
                    }
                    std::thread::sleep(Duration::from_millis(25));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

fn is_stale(path: &Path) -> bool {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| SystemTime::now().duration_since(t).ok())
        .is_some_and(|age| age > STALE_LOCK)
}

impl Drop for LockFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

// ---------------------------------------------------------------------------
// BootSchedule
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddOutcome {
    Added,
    AlreadyPresent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModePresence {
    pub mode: ScheduleMode,
    pub present: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetStatus {
    pub target: String,
    pub modes: Vec<ModePresence>,
}

impl TargetStatus {
    pub fn any(&self) -> bool {
        self.modes.iter().any(|m| m.present)
    }
}

pub struct BootSchedule<S> {
    store: S,
}

impl<S: ScheduleStore> BootSchedule<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Append `entry` unless an identical line is already stored.
    pub fn add(&self, entry: &ScheduleEntry) -> Result<AddOutcome> {
        let line = entry.encode();
        let current = self.store.read()?;
        if current.iter().any(|l| *l == line) {
            debug!(%line, "boot-schedule entry already present");
            return Ok(AddOutcome::AlreadyPresent);
        }
        let mut updated = current.clone();
        updated.push(line.clone());
        self.store.compare_and_write(&current, &updated)?;
        info!(%line, "boot-schedule entry added");
        Ok(AddOutcome::Added)
    }

    /// Drop every line for `target` whose mode passes `filter`. Returns how
    /// many lines were removed; zero is a normal outcome.
    pub fn remove(&self, target: &str, filter: ModeFilter) -> Result<usize> {
        let target = normalize_target(target)?;
        let current = self.store.read()?;
        let kept: Vec<String> = current
            .iter()
            .filter(|raw| {
                let line = StoredLine::parse(raw);
                !(line.targets(&target) && filter.matches(line.mode))
            })
            .cloned()
            .collect();
        let removed = current.len() - kept.len();
        if removed > 0 {
            self.store.compare_and_write(&current, &kept)?;
            info!(%target, removed, "boot-schedule entries removed");
        }
        Ok(removed)
    }

    /// Per target, per known mode: is its canonical fragment in any line?
    pub fn query(&self, targets: &[String]) -> Result<Vec<TargetStatus>> {
        let lines = self.store.read()?;
        targets
            .iter()
            .map(|t| {
                let target = normalize_target(t)?;
                let modes = ScheduleMode::all()
                    .iter()
                    .map(|&mode| {
                        let fragment = ScheduleEntry {
                            target: target.clone(),
                            mode,
                        }
                        .fragment();
                        ModePresence {
                            mode,
                            present: lines.iter().any(|l| l.contains(&fragment)),
                        }
                    })
                    .collect();
                Ok(TargetStatus { target, modes })
            })
            .collect()
    }

    /// Whether any stored entry decodes to exactly `target`, in any mode.
    pub fn is_scheduled(&self, target: &str) -> Result<bool> {
        let target = normalize_target(target)?;
        Ok(self
            .store
            .read()?
            .iter()
            .any(|raw| StoredLine::parse(raw).targets(&target)))
    }

    pub fn list(&self) -> Result<Vec<StoredLine>> {
        Ok(self
            .store
            .read()?
            .iter()
            .map(|l| StoredLine::parse(l))
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
