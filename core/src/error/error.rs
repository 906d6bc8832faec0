use thiserror::Error;

use super::{SchedulerError, SettingsError, SupervisorError};

#[derive(Error, Debug)]
pub enum CliError {
    #[error("scheduler failed: {0}")]
    Scheduler(#[from] SchedulerError),
    #[error("supervisor failed: {0}")]
    Supervisor(#[from] SupervisorError),
    #[error("settings failed: {0}")]
    Settings(#[from] SettingsError),
    #[error("task not found: {0}")]
    UnknownTask(String),
    #[error("command failed: {0}")]
    Command(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}
