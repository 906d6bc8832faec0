//! Interval scheduler: one recurring timer per task name, at most one
//! execution in flight per name, optional persistence of run timestamps.

mod callback;
mod entry;
mod events;
mod runtime;

pub use callback::{EngineCallback, FnCallback, ScheduleCallback};
pub use entry::{
    validate_interval, ScheduleInfo, ScheduleState, MAX_INTERVAL_SECS, MIN_INTERVAL_SECS,
};
pub use events::SchedulerEvent;
pub use runtime::{ScheduleHandle, Scheduler};
