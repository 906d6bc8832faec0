use clap::Parser;
mod catalog;
mod commands;
use commands::cli;
use std::path::Path;
use taskcue_core::error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

static LOG_GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
    std::sync::OnceLock::new();

#[tokio::main]
async fn main() {
    let exit = match real_main().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{e}");
            exit_code_for_error(&e)
        }
    };

    std::process::exit(exit);
}

async fn real_main() -> Result<i32, error::CliError> {
    let args = cli::Args::parse();
    let cfg = match args.config.as_deref() {
        Some(path) => taskcue_core::config::load_file(Path::new(path)),
        None => taskcue_core::config::load_default(),
    }
    .map_err(|e| error::CliError::Config(e.to_string()))?;
    init_tracing(&cfg.logging).map_err(error::CliError::Command)?;

    dispatch(args, cfg).await
}

fn exit_code_for_error(e: &error::CliError) -> i32 {
    // 0: success
    // 1: task ran and reported failure (not an error)
    // 11: config error
    // 12: unknown task
    // 20: IO / command error
    // 30: scheduler / supervisor / settings error
    // 50: internal/uncategorized
    match e {
        error::CliError::Config(_) => 11,
        error::CliError::UnknownTask(_) => 12,
        error::CliError::Io(_) => 20,
        error::CliError::Command(_) => 20,
        error::CliError::Scheduler(_) => 30,
        error::CliError::Supervisor(_) => 30,
        error::CliError::Settings(_) => 30,
        error::CliError::Anyhow(_) => 50,
    }
}

async fn dispatch(
    args: cli::Args,
    cfg: taskcue_core::config::AppConfig,
) -> Result<i32, error::CliError> {
    let load_catalog = || {
        let path = args.catalog.clone().unwrap_or_else(|| cfg.catalog_path.clone());
        catalog::Catalog::load(Path::new(&path)).map_err(|e| error::CliError::Config(e.to_string()))
    };

    match args.command {
        cli::Commands::Run(run_args) => {
            let catalog = load_catalog()?;
            commands::run::run_task(&cfg, &catalog, run_args).await
        }
        cli::Commands::Daemon(daemon_args) => {
            let catalog = load_catalog()?;
            commands::daemon::daemon_cmd(&cfg, &catalog, daemon_args).await
        }
        cli::Commands::Schedules(schedule_args) => {
            commands::schedules::schedules_cmd(&cfg.scheduler.settings_path, schedule_args.action)
        }
    }
}

fn init_tracing(logging: &taskcue_core::config::LoggingConfig) -> Result<(), String> {
    if !logging.enabled {
        return Ok(());
    }

    let filter = match std::env::var("RUST_LOG") {
        Ok(v) if !v.trim().is_empty() => EnvFilter::from_default_env(),
        _ => EnvFilter::try_new(logging.level.clone()).map_err(|e| e.to_string())?,
    };

    let mut maybe_writer = None;

    if logging.file {
        let dir = match logging
            .directory
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            Some(d) => std::path::PathBuf::from(d),
            None => std::env::temp_dir().join("taskcue"),
        };

        std::fs::create_dir_all(&dir).map_err(|e| format!("create log dir failed: {e}"))?;
        let appender = tracing_appender::rolling::daily(dir, "taskcue.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);
        let _ = LOG_GUARD.set(guard);
        maybe_writer = Some(non_blocking);
    }

    if !logging.console && maybe_writer.is_none() {
        return Err("logging disabled for both console and file".to_string());
    }

    let console_layer = logging.console.then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(atty::is(atty::Stream::Stderr))
    });

    let file_layer = maybe_writer.map(|w| {
        tracing_subscriber::fmt::layer()
            .with_writer(w)
            .with_ansi(false)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(())
}
