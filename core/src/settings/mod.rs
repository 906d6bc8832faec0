//! Key-value settings collaborator and the persisted schedule records stored in it.

mod schedules;
mod store;

pub use schedules::{PersistedSchedule, ScheduleStore, SCHEDULE_KEY_PREFIX};
pub use store::{JsonFileSettings, MemorySettings, SettingsStore};
