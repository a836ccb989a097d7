use anyhow::Context;
use hostcare_core::config::{Config, ConfigSource};
use hostcare_core::paths;
use std::path::{Path, PathBuf};

/// Resolve the working root.
///
/// Priority:
/// 1. `--root` flag / `HOSTCARE_ROOT` env var (passed in as `explicit`)
/// 2. Walk upward from `cwd` looking for `hostcare.yaml` or `.hostcare/`
/// 3. Fall back to `cwd`
pub fn resolve_root(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }

    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

    let mut dir = cwd.clone();
    loop {
        if dir.join(paths::CONFIG_FILE).is_file() || dir.join(paths::STATE_DIR).is_dir() {
            return dir;
        }
        match dir.parent() {
            Some(p) => dir = p.to_path_buf(),
            None => break,
        }
    }

    cwd
}

/// Global options shared by every command.
#[derive(Debug, Clone)]
pub struct Settings {
    pub root: PathBuf,
    pub config: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
    pub registry: Option<PathBuf>,
    pub json: bool,
}

impl Settings {
    pub fn load_config(&self) -> anyhow::Result<(Config, ConfigSource)> {
        Config::resolve(self.config.as_deref(), &self.root).context("failed to load config")
    }

    /// Where `config init` writes.
    pub fn config_path(&self) -> PathBuf {
        match &self.config {
            Some(p) => paths::resolve_under(&self.root, p),
            None => paths::config_path(&self.root),
        }
    }

    pub fn log_dir(&self, config: &Config) -> PathBuf {
        match &self.log_dir {
            Some(p) => paths::resolve_under(&self.root, p),
            None => config.log_dir(&self.root),
        }
    }

    pub fn registry_path(&self, config: &Config) -> PathBuf {
        match &self.registry {
            Some(p) => paths::resolve_under(&self.root, p),
            None => config.registry_path(&self.root),
        }
    }

    pub fn restart_markers(&self, config: &Config) -> Vec<PathBuf> {
        config
            .host
            .restart_markers
            .iter()
            .map(|m| paths::resolve_under(&self.root, m))
            .collect()
    }
}
