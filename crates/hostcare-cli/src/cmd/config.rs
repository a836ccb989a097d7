use anyhow::Context;
use clap::Subcommand;
use hostcare_core::config::{has_errors, Config, WarnLevel};

use crate::output::print_json;
use crate::root::Settings;

// ---------------------------------------------------------------------------
// Subcommand types
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Print the active catalog and where it came from
    Show,

    /// Validate the catalog for common mistakes
    Validate,

    /// Write the built-in catalog to disk for editing
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(settings: &Settings, subcmd: ConfigSubcommand) -> anyhow::Result<i32> {
    match subcmd {
        ConfigSubcommand::Show => show(settings),
        ConfigSubcommand::Validate => validate(settings),
        ConfigSubcommand::Init { force } => init(settings, force),
    }
}

fn show(settings: &Settings) -> anyhow::Result<i32> {
    let (config, source) = settings.load_config()?;
    if settings.json {
        print_json(&config)?;
    } else {
        println!("# source: {source}");
        print!("{}", serde_yaml::to_string(&config)?);
    }
    Ok(0)
}

fn validate(settings: &Settings) -> anyhow::Result<i32> {
    let (config, source) = settings.load_config()?;
    let warnings = config.validate();

    if settings.json {
        let value = serde_json::json!({
            "source": source.to_string(),
            "warnings": warnings,
        });
        print_json(&value)?;
    } else if warnings.is_empty() {
        println!("Config is valid ({source}). No warnings.");
    } else {
        for w in &warnings {
            let prefix = match w.level {
                WarnLevel::Warning => "warning",
                WarnLevel::Error => "error",
            };
            println!("[{prefix}] {}", w.message);
        }
    }

    Ok(if has_errors(&warnings) { 1 } else { 0 })
}

fn init(settings: &Settings, force: bool) -> anyhow::Result<i32> {
    let path = settings.config_path();
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }
    Config::builtin()
        .save(&path)
        .with_context(|| format!("failed to write {}", path.display()))?;
    if settings.json {
        print_json(&serde_json::json!({ "path": path }))?;
    } else {
        println!("Wrote built-in catalog to {}", path.display());
    }
    Ok(0)
}
