#[allow(clippy::module_inception)]
pub mod error;
pub mod scheduler;
pub mod settings;
pub mod supervisor;

pub use error::CliError;
pub use scheduler::SchedulerError;
pub use settings::SettingsError;
pub use supervisor::SupervisorError;
