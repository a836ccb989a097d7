use clap::{Parser, Subcommand};
use hostcare_cli::cmd;
use hostcare_cli::cmd::{config::ConfigSubcommand, schedule::ScheduleSubcommand};
use hostcare_cli::root::{self, Settings};
use hostcare_core::ResultCode;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "hostcare",
    about = "Unattended disk, image and system-file maintenance with gated steps and escalation",
    version,
    propagate_version = true
)]
struct Cli {
    /// Catalog file (default: hostcare.yaml under the root, else the built-in catalog)
    #[arg(long, global = true, env = "HOSTCARE_CONFIG")]
    config: Option<PathBuf>,

    /// Working root (default: auto-detect from hostcare.yaml or .hostcare/)
    #[arg(long, global = true, env = "HOSTCARE_ROOT")]
    root: Option<PathBuf>,

    /// Directory for result records
    #[arg(long, global = true, env = "HOSTCARE_LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// Boot-schedule store
    #[arg(long, global = true, env = "HOSTCARE_REGISTRY")]
    registry: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one operation and exit with its result code
    Run { operation: String, target: String },

    /// Run a named campaign and exit with its result code
    Campaign { name: String, target: String },

    /// Run the `validate` campaign (read-only checks)
    Validate { target: String },

    /// Run the `repair` campaign
    Repair { target: String },

    /// List the catalog's operations and campaigns
    Operations,

    /// Manage checks queued for the next restart
    Schedule {
        #[command(subcommand)]
        subcommand: ScheduleSubcommand,
    },

    /// Inspect, validate or initialize the catalog
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Run { .. }
        | Commands::Campaign { .. }
        | Commands::Validate { .. }
        | Commands::Repair { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let settings = Settings {
        root: root::resolve_root(cli.root.as_deref()),
        config: cli.config,
        log_dir: cli.log_dir,
        registry: cli.registry,
        json: cli.json,
    };

    let result = match cli.command {
        Commands::Run { operation, target } => cmd::run::run(&settings, &operation, &target),
        Commands::Campaign { name, target } => cmd::campaign::run(&settings, &name, &target),
        Commands::Validate { target } => cmd::campaign::run(&settings, "validate", &target),
        Commands::Repair { target } => cmd::campaign::run(&settings, "repair", &target),
        Commands::Operations => cmd::operations::run(&settings),
        Commands::Schedule { subcommand } => cmd::schedule::run(&settings, subcommand),
        Commands::Config { subcommand } => cmd::config::run(&settings, subcommand),
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            // Print the full error chain (anyhow's alternate Display)
            eprintln!("error: {e:#}");
            std::process::exit(ResultCode::PrecheckOrTimeoutFailure.code());
        }
    }
}
