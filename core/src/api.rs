//! Stable re-exports for consumers (`cli` and external crates).
//!
//! Prefer importing from `taskcue_core::api` instead of reaching into internal modules.

pub use crate::config::{
    get_taskcue_data_dir, load_default, load_file, load_from_path, AppConfig, EngineConfig,
    LogRotationConfig, LoggingConfig, SchedulerConfig, SupervisorConfig,
};
pub use crate::engine::{
    CacheStats, CodeUnit, ExecutionEngine, ExecutionResult, FailureKind, FnUnit, NativeUnitRegistry,
    ScriptScope, UnitLoader,
};
pub use crate::error::{CliError, SchedulerError, SettingsError, SupervisorError};
pub use crate::scheduler::{
    validate_interval, EngineCallback, FnCallback, ScheduleCallback, ScheduleHandle, ScheduleInfo,
    ScheduleState, Scheduler, SchedulerEvent, MAX_INTERVAL_SECS, MIN_INTERVAL_SECS,
};
pub use crate::settings::{
    JsonFileSettings, MemorySettings, PersistedSchedule, ScheduleStore, SettingsStore,
};
pub use crate::supervisor::{
    PolicyOverrides, ServiceEvent, ServiceHandle, ServiceInfo, ServicePolicy, ServiceState,
    Supervisor,
};
pub use crate::task::{
    validate_arguments, ArgSpec, ArgType, InvocationKind, TaskArgs, TaskDescriptor,
};
