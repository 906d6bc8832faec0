use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::store::SettingsStore;
use crate::error::SettingsError;

pub const SCHEDULE_KEY_PREFIX: &str = "schedules.";

/// What survives a restart for one scheduled task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedSchedule {
    #[serde(default)]
    pub enabled: bool,
    pub interval_secs: u64,
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub next_run: Option<DateTime<Utc>>,
}

impl PersistedSchedule {
    pub fn new(interval_secs: u64) -> Self {
        Self {
            enabled: true,
            interval_secs,
            last_run: None,
            next_run: None,
        }
    }
}

/// Typed view over the `schedules.<task>` keys of a settings store.
#[derive(Clone)]
pub struct ScheduleStore {
    store: Arc<dyn SettingsStore>,
}

impl ScheduleStore {
    pub fn new(store: Arc<dyn SettingsStore>) -> Self {
        Self { store }
    }

    pub fn load(&self, task: &str) -> Result<Option<PersistedSchedule>, SettingsError> {
        match self.store.get(&key(task))? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub fn save(&self, task: &str, record: &PersistedSchedule) -> Result<(), SettingsError> {
        self.store.set(&key(task), serde_json::to_value(record)?)
    }

    /// Updates the timestamps of an existing record, creating an enabled one
    /// with `interval_secs` otherwise.
    pub fn record_run(
        &self,
        task: &str,
        interval_secs: u64,
        last_run: Option<DateTime<Utc>>,
        next_run: DateTime<Utc>,
    ) -> Result<(), SettingsError> {
        let mut record = self.load(task)?.unwrap_or_else(|| PersistedSchedule::new(interval_secs));
        record.interval_secs = interval_secs;
        record.last_run = last_run;
        record.next_run = Some(next_run);
        self.save(task, &record)
    }

    /// Returns false when there is no record for `task`.
    pub fn set_enabled(&self, task: &str, enabled: bool) -> Result<bool, SettingsError> {
        let Some(mut record) = self.load(task)? else {
            return Ok(false);
        };
        record.enabled = enabled;
        self.save(task, &record)?;
        Ok(true)
    }

    pub fn all(&self) -> Result<Vec<(String, PersistedSchedule)>, SettingsError> {
        let mut out = Vec::new();
        for k in self.store.keys(SCHEDULE_KEY_PREFIX)? {
            let task = &k[SCHEDULE_KEY_PREFIX.len()..];
            if let Some(record) = self.load(task)? {
                out.push((task.to_string(), record));
            }
        }
        Ok(out)
    }

    pub fn enabled_tasks(&self) -> Result<Vec<(String, PersistedSchedule)>, SettingsError> {
        Ok(self.all()?.into_iter().filter(|(_, r)| r.enabled).collect())
    }
}

fn key(task: &str) -> String {
    format!("{SCHEDULE_KEY_PREFIX}{task}")
}
