pub mod campaign;
pub mod config;
pub mod operations;
pub mod run;
pub mod schedule;

use anyhow::Context;
use hostcare_core::config::Config;
use hostcare_core::executor::ProcessInvoker;
use hostcare_core::precondition::SystemProbe;
use hostcare_core::record::JsonlSink;
use hostcare_core::registry::{BootSchedule, FileStore};

use crate::root::Settings;

pub(crate) fn invoker(settings: &Settings) -> anyhow::Result<ProcessInvoker> {
    Ok(ProcessInvoker::new()
        .context("failed to start executor runtime")?
        .with_cwd(&settings.root))
}

pub(crate) fn schedule(settings: &Settings, config: &Config) -> BootSchedule<FileStore> {
    BootSchedule::new(FileStore::new(settings.registry_path(config)))
}

pub(crate) fn probe(settings: &Settings, config: &Config) -> SystemProbe<FileStore> {
    SystemProbe::new(settings.restart_markers(config), schedule(settings, config))
}

pub(crate) fn sink(settings: &Settings, config: &Config, label: &str) -> anyhow::Result<JsonlSink> {
    let dir = settings.log_dir(config);
    JsonlSink::create(&dir, label)
        .with_context(|| format!("failed to create log session under {}", dir.display()))
}
