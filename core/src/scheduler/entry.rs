use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::AbortHandle;

use super::callback::ScheduleCallback;
use crate::error::SchedulerError;
use crate::settings::ScheduleStore;

pub const MIN_INTERVAL_SECS: u64 = 10;

/// Largest interval whose millisecond count fits in an `i32`.
pub const MAX_INTERVAL_SECS: u64 = 2_147_483;

pub fn validate_interval(seconds: u64) -> Result<Duration, SchedulerError> {
    if (MIN_INTERVAL_SECS..=MAX_INTERVAL_SECS).contains(&seconds) {
        Ok(Duration::from_secs(seconds))
    } else {
        Err(SchedulerError::Range {
            seconds,
            min: MIN_INTERVAL_SECS,
            max: MAX_INTERVAL_SECS,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleState {
    Stopped,
    Scheduled,
    Running,
    Error,
}

/// Read-only snapshot of one entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduleInfo {
    pub task: String,
    pub interval_secs: u64,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: DateTime<Utc>,
    pub in_flight: bool,
    pub state: ScheduleState,
    /// Set while the last completed run failed.
    pub last_error: Option<String>,
    pub running_since: Option<DateTime<Utc>>,
}

pub(super) struct Entry {
    pub(super) task: String,
    state: Mutex<EntryState>,
}

pub(super) struct EntryState {
    pub(super) interval: Duration,
    pub(super) last_run: Option<DateTime<Utc>>,
    pub(super) next_run: DateTime<Utc>,
    pub(super) state: ScheduleState,
    pub(super) in_flight: bool,
    pub(super) running_since: Option<DateTime<Utc>>,
    pub(super) last_error: Option<String>,
    /// Bumped on every re-arm and on stop; fires carrying an older value are stale.
    pub(super) generation: u64,
    pub(super) timer: Option<AbortHandle>,
    pub(super) callback: Arc<dyn ScheduleCallback>,
    pub(super) store: Option<ScheduleStore>,
}

impl Entry {
    pub(super) fn new(task: String, st: EntryState) -> Arc<Self> {
        Arc::new(Self {
            task,
            state: Mutex::new(st),
        })
    }

    pub(super) fn lock(&self) -> MutexGuard<'_, EntryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl EntryState {
    pub(super) fn snapshot(&self, task: &str) -> ScheduleInfo {
        ScheduleInfo {
            task: task.to_string(),
            interval_secs: self.interval.as_secs(),
            last_run: self.last_run,
            next_run: self.next_run,
            in_flight: self.in_flight,
            state: self.state,
            last_error: self.last_error.clone(),
            running_since: self.running_since,
        }
    }

    pub(super) fn disarm(&mut self) {
        self.generation += 1;
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }

    pub(super) fn persist(&self, task: &str) {
        let Some(store) = self.store.as_ref() else {
            return;
        };
        let interval_secs = self.interval.as_secs();
        if let Err(e) = store.record_run(task, interval_secs, self.last_run, self.next_run) {
            tracing::warn!(task = %task, error = %e, "failed to persist schedule state");
        }
    }
}
