mod load;
mod types;

pub use load::{get_taskcue_data_dir, load_default, load_file, load_from_path};
pub use types::{
    AppConfig, EngineConfig, LogRotationConfig, LoggingConfig, SchedulerConfig, SupervisorConfig,
};
