use clap::{Args as ClapArgs, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "taskcue", version, about = "Run, schedule and supervise local task scripts")]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file to use instead of ~/.taskcue/config.toml or ./config.toml.
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Task catalog (TOML). Overrides `catalog_path` from the config.
    #[arg(long, global = true)]
    pub catalog: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Execute one task from the catalog and print its result as JSON.
    Run(RunArgs),
    /// Restore enabled schedules, start configured services, run until Ctrl-C.
    Daemon(DaemonArgs),
    /// Inspect or edit persisted schedule state.
    Schedules(SchedulesArgs),
}

#[derive(ClapArgs, Debug, Clone)]
pub struct RunArgs {
    pub task: String,

    /// Task argument as NAME=VALUE. Can be specified multiple times.
    #[arg(long = "arg", action = clap::ArgAction::Append)]
    pub args: Vec<String>,

    /// Overrides the configured execution timeout.
    #[arg(long)]
    pub timeout_ms: Option<u64>,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct DaemonArgs {
    /// Additional background services to start, on top of `services` from the config.
    #[arg(long = "service", action = clap::ArgAction::Append)]
    pub services: Vec<String>,

    /// Do not start any background service.
    #[arg(long)]
    pub no_services: bool,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct SchedulesArgs {
    #[command(subcommand)]
    pub action: Option<ScheduleAction>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ScheduleAction {
    /// List persisted schedules (default).
    List {
        #[arg(long)]
        json: bool,
    },
    /// Enable a task's schedule, creating it with `--interval` if needed.
    Enable {
        task: String,
        /// Interval in seconds.
        #[arg(long)]
        interval: Option<u64>,
    },
    /// Keep the record but stop restoring it on daemon start.
    Disable { task: String },
}
