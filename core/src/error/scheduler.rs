use thiserror::Error;

use super::SettingsError;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("interval {seconds}s is outside [{min}s, {max}s]")]
    Range { seconds: u64, min: u64, max: u64 },

    #[error("schedule for '{0}' is already active")]
    AlreadyExists(String),

    #[error("schedule for '{0}' not found")]
    NotFound(String),

    #[error("execution of '{0}' is already in flight")]
    Busy(String),

    #[error("scheduler is shut down")]
    ShutDown,

    #[error("persistence error: {0}")]
    Persistence(#[from] SettingsError),
}
