use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use crate::classifier::Classifier;
use crate::error::{HostcareError, Result};
use crate::operation::Operation;
use crate::paths;
use crate::rules;
use crate::types::{Profile, ResultCode};

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

impl ConfigWarning {
    fn warning(message: String) -> Self {
        Self {
            level: WarnLevel::Warning,
            message,
        }
    }

    fn error(message: String) -> Self {
        Self {
            level: WarnLevel::Error,
            message,
        }
    }
}

// ---------------------------------------------------------------------------
// Campaigns
// ---------------------------------------------------------------------------

/// One step of a campaign. In YAML either a bare operation name or
/// `{ operation: NAME, halt_at: CODE }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "StepSpec")]
pub struct CampaignStep {
    pub operation: String,
    /// Lowest code that halts the campaign after this step. Falls back to the
    /// profile's threshold.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub halt_at: Option<ResultCode>,
}

impl CampaignStep {
    pub fn new(operation: &str) -> Self {
        Self {
            operation: operation.to_string(),
            halt_at: None,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StepSpec {
    Name(String),
    Full(StepFields),
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct StepFields {
    operation: String,
    #[serde(default)]
    halt_at: Option<ResultCode>,
}

impl From<StepSpec> for CampaignStep {
    fn from(spec: StepSpec) -> Self {
        match spec {
            StepSpec::Name(operation) => Self {
                operation,
                halt_at: None,
            },
            StepSpec::Full(StepFields { operation, halt_at }) => Self { operation, halt_at },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CampaignDefinition {
    pub profile: Profile,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub steps: Vec<CampaignStep>,
}

// ---------------------------------------------------------------------------
// Registry / host sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegistryConfig {
    /// Durable boot-schedule store. Defaults to `.hostcare/boot-schedule.txt`
    /// under the working root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HostConfig {
    /// Any of these existing means a restart is pending.
    #[serde(default = "default_restart_markers")]
    pub restart_markers: Vec<PathBuf>,
}

fn default_restart_markers() -> Vec<PathBuf> {
    vec![PathBuf::from("/var/run/reboot-required")]
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            restart_markers: default_restart_markers(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub host: HostConfig,
    #[serde(default)]
    pub operations: Vec<Operation>,
    #[serde(default)]
    pub campaigns: BTreeMap<String, CampaignDefinition>,
}

fn default_version() -> u32 {
    1
}

/// Where the active catalog came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    BuiltIn,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::File(p) => write!(f, "{}", p.display()),
            ConfigSource::BuiltIn => f.write_str("built-in catalog"),
        }
    }
}

impl Config {
    /// The catalog shipped with the binary.
    pub fn builtin() -> Self {
        Self {
            version: default_version(),
            log_dir: None,
            registry: RegistryConfig::default(),
            host: HostConfig::default(),
            operations: rules::builtin_operations(),
            campaigns: rules::builtin_campaigns(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(HostcareError::ConfigNotFound(path.display().to_string()));
        }
        let data = std::fs::read_to_string(path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    /// An explicit path must exist. Without one, `hostcare.yaml` under `root`
    /// is used when present, else the built-in catalog.
    pub fn resolve(explicit: Option<&Path>, root: &Path) -> Result<(Self, ConfigSource)> {
        if let Some(path) = explicit {
            let path = paths::resolve_under(root, path);
            return Ok((Self::load(&path)?, ConfigSource::File(path)));
        }
        let path = paths::config_path(root);
        if path.exists() {
            return Ok((Self::load(&path)?, ConfigSource::File(path)));
        }
        Ok((Self::builtin(), ConfigSource::BuiltIn))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(path, data.as_bytes())
    }

    pub fn operation(&self, name: &str) -> Option<&Operation> {
        self.operations.iter().find(|op| op.name == name)
    }

    pub fn campaign(&self, name: &str) -> Result<&CampaignDefinition> {
        self.campaigns
            .get(name)
            .ok_or_else(|| HostcareError::CampaignNotFound(name.to_string()))
    }

    pub fn log_dir(&self, root: &Path) -> PathBuf {
        match &self.log_dir {
            Some(dir) => paths::resolve_under(root, dir),
            None => paths::default_log_dir(root),
        }
    }

    pub fn registry_path(&self, root: &Path) -> PathBuf {
        match &self.registry.path {
            Some(path) => paths::resolve_under(root, path),
            None => paths::default_registry_path(root),
        }
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        let mut seen = HashSet::new();
        for op in &self.operations {
            if !seen.insert(op.name.as_str()) {
                warnings.push(ConfigWarning::error(format!(
                    "duplicate operation '{}'",
                    op.name
                )));
            }
            if op.command.program.trim().is_empty() {
                warnings.push(ConfigWarning::error(format!(
                    "operation '{}' has an empty command program",
                    op.name
                )));
            }
            if op.timeout_seconds == 0 {
                warnings.push(ConfigWarning::error(format!(
                    "operation '{}' has a zero timeout",
                    op.name
                )));
            }
            if let Err(e) = Classifier::for_operation(op) {
                warnings.push(ConfigWarning::error(e.to_string()));
            }
            if op.default_code == ResultCode::Ok {
                warnings.push(ConfigWarning::warning(format!(
                    "operation '{}' defaults to ok: unmatched output will read as success",
                    op.name
                )));
            }
            for (i, rule) in op.rules.iter().enumerate() {
                if rule.code != ResultCode::Ok {
                    continue;
                }
                if let Some(later) = op.rules[i + 1..].iter().find(|r| r.code > ResultCode::Ok) {
                    warnings.push(ConfigWarning::warning(format!(
                        "operation '{}': ok rule '{}' precedes more severe rule '{}' and may shadow it",
                        op.name, rule.name, later.name
                    )));
                }
            }
        }

        for (name, campaign) in &self.campaigns {
            if campaign.steps.is_empty() {
                warnings.push(ConfigWarning::error(format!(
                    "campaign '{name}' has no steps"
                )));
            }
            for step in &campaign.steps {
                let Some(op) = self.operation(&step.operation) else {
                    warnings.push(ConfigWarning::error(format!(
                        "campaign '{name}' names unknown operation '{}'",
                        step.operation
                    )));
                    continue;
                };
                if op.mode != campaign.profile.expected_mode() {
                    warnings.push(ConfigWarning::warning(format!(
                        "campaign '{name}' ({}) runs {} operation '{}'",
                        campaign.profile, op.mode, op.name
                    )));
                }
            }
        }

        warnings
    }
}

pub fn has_errors(warnings: &[ConfigWarning]) -> bool {
    warnings.iter().any(|w| w.level == WarnLevel::Error)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{ClassificationRule, CommandSpec, PreconditionPolicy};
    use crate::types::OperationMode;
    use tempfile::TempDir;

    fn op(name: &str, mode: OperationMode) -> Operation {
        Operation {
            name: name.into(),
            description: None,
            command: CommandSpec::new("echo", &["{target}"]),
            mode,
            timeout_seconds: 5,
            policy: PreconditionPolicy::default(),
            rules: vec![],
            default_code: ResultCode::IssuesOrRepaired,
        }
    }

    fn minimal() -> Config {
        let mut campaigns = BTreeMap::new();
        campaigns.insert(
            "check".to_string(),
            CampaignDefinition {
                profile: Profile::Validation,
                description: None,
                steps: vec![CampaignStep::new("scan")],
            },
        );
        Config {
            version: 1,
            log_dir: None,
            registry: RegistryConfig::default(),
            host: HostConfig::default(),
            operations: vec![op("scan", OperationMode::ReadOnly)],
            campaigns,
        }
    }

    fn messages(cfg: &Config, level: WarnLevel) -> Vec<String> {
        cfg.validate()
            .into_iter()
            .filter(|w| w.level == level)
            .map(|w| w.message)
            .collect()
    }

    #[test]
    fn builtin_config_roundtrip() {
        let cfg = Config::builtin();
        let yaml = serde_yaml::to_string(&cfg).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, cfg);
    }

    #[test]
    fn minimal_config_has_no_warnings() {
        assert!(minimal().validate().is_empty());
    }

    #[test]
    fn campaign_steps_accept_short_and_long_form() {
        let yaml = r#"
operations:
  - name: scan
    command: { program: echo }
    mode: read-only
campaigns:
  check:
    profile: repair
    steps:
      - scan
      - operation: scan
        halt_at: issues_or_repaired
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        let steps = &cfg.campaign("check").unwrap().steps;
        assert_eq!(steps[0], CampaignStep::new("scan"));
        assert_eq!(steps[1].halt_at, Some(ResultCode::IssuesOrRepaired));
        assert_eq!(cfg.host.restart_markers, default_restart_markers());
    }

    #[test]
    fn unknown_operation_field_is_rejected() {
        let yaml = r#"
operations:
  - name: scan
    command: { program: echo }
    mode: read-only
    retries: 3
"#;
        assert!(serde_yaml::from_str::<Config>(yaml).is_err());
    }

    #[test]
    fn misspelled_step_field_is_rejected() {
        let yaml = r#"
operations:
  - name: scan
    command: { program: echo }
    mode: read-only
campaigns:
  check:
    profile: repair
    steps:
      - operation: scan
        halt_on: issues_or_repaired
"#;
        assert!(serde_yaml::from_str::<Config>(yaml).is_err());
    }

    #[test]
    fn validate_structural_errors() {
        let mut cfg = minimal();
        cfg.operations.push(op("scan", OperationMode::ReadOnly));
        let mut empty = op("empty", OperationMode::ReadOnly);
        empty.command.program = " ".into();
        empty.timeout_seconds = 0;
        empty.rules.push(ClassificationRule::new("bad", "(oops", ResultCode::Ok));
        cfg.operations.push(empty);
        cfg.campaigns.insert(
            "broken".into(),
            CampaignDefinition {
                profile: Profile::Validation,
                description: None,
                steps: vec![CampaignStep::new("missing")],
            },
        );
        cfg.campaigns.insert(
            "hollow".into(),
            CampaignDefinition {
                profile: Profile::Repair,
                description: None,
                steps: vec![],
            },
        );

        let errors = messages(&cfg, WarnLevel::Error);
        assert!(errors.iter().any(|m| m.contains("duplicate operation 'scan'")));
        assert!(errors.iter().any(|m| m.contains("empty command program")));
        assert!(errors.iter().any(|m| m.contains("zero timeout")));
        assert!(errors.iter().any(|m| m.contains("'bad'")));
        assert!(errors.iter().any(|m| m.contains("unknown operation 'missing'")));
        assert!(errors.iter().any(|m| m.contains("'hollow' has no steps")));
        assert!(has_errors(&cfg.validate()));
    }

    #[test]
    fn validate_authoring_hazards() {
        let mut cfg = minimal();
        let scan = &mut cfg.operations[0];
        scan.rules = vec![
            ClassificationRule::new("done", "completed", ResultCode::Ok),
            ClassificationRule::new("broken", "error", ResultCode::IssuesOrRepaired),
        ];
        scan.default_code = ResultCode::Ok;
        cfg.operations.push(op("fix", OperationMode::WriteCapable));
        cfg.campaigns
            .get_mut("check")
            .unwrap()
            .steps
            .push(CampaignStep::new("fix"));

        let warnings = messages(&cfg, WarnLevel::Warning);
        assert!(warnings.iter().any(|m| m.contains("ok rule 'done' precedes")));
        assert!(warnings.iter().any(|m| m.contains("defaults to ok")));
        assert!(warnings.iter().any(|m| m.contains("write-capable operation 'fix'")));
        assert!(!has_errors(&cfg.validate()));
    }

    #[test]
    fn resolve_prefers_explicit_then_root_then_builtin() {
        let dir = TempDir::new().unwrap();

        let (cfg, source) = Config::resolve(None, dir.path()).unwrap();
        assert_eq!(source, ConfigSource::BuiltIn);
        assert!(cfg.operation("disk-scan").is_some());

        minimal().save(&paths::config_path(dir.path())).unwrap();
        let (cfg, source) = Config::resolve(None, dir.path()).unwrap();
        assert_eq!(source, ConfigSource::File(paths::config_path(dir.path())));
        assert!(cfg.operation("scan").is_some());

        let err = Config::resolve(Some(Path::new("nope.yaml")), dir.path()).unwrap_err();
        assert!(matches!(err, HostcareError::ConfigNotFound(_)));
    }

    #[test]
    fn paths_resolve_under_root() {
        let root = Path::new("/srv/host");
        let mut cfg = minimal();
        assert_eq!(cfg.log_dir(root), root.join(paths::LOG_DIR));
        assert_eq!(cfg.registry_path(root), root.join(paths::REGISTRY_FILE));
        cfg.log_dir = Some(PathBuf::from("logs"));
        cfg.registry.path = Some(PathBuf::from("/etc/hostcare/schedule"));
        assert_eq!(cfg.log_dir(root), root.join("logs"));
        assert_eq!(cfg.registry_path(root), PathBuf::from("/etc/hostcare/schedule"));
    }

    #[test]
    fn unknown_campaign_is_an_error() {
        assert!(matches!(
            minimal().campaign("nope"),
            Err(HostcareError::CampaignNotFound(_))
        ));
    }
}
