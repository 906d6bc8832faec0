use chrono::{DateTime, Utc};
use serde::Serialize;

/// Broadcast to every [`Scheduler::subscribe`](super::Scheduler::subscribe)
/// receiver. Events of one task arrive in the order their operations completed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SchedulerEvent {
    #[serde(rename = "schedule_started")]
    Started {
        task: String,
        interval_secs: u64,
        next_run: DateTime<Utc>,
    },
    #[serde(rename = "schedule_stopped")]
    Stopped { task: String },
    #[serde(rename = "schedule_executed")]
    Executed {
        task: String,
        finished_at: DateTime<Utc>,
    },
    #[serde(rename = "schedule_error")]
    Error { task: String, message: String },
    /// A fire found the previous execution still running and was skipped.
    #[serde(rename = "schedule_execution_blocked")]
    ExecutionBlocked { task: String },
}

impl SchedulerEvent {
    pub fn task(&self) -> &str {
        match self {
            Self::Started { task, .. }
            | Self::Stopped { task }
            | Self::Executed { task, .. }
            | Self::Error { task, .. }
            | Self::ExecutionBlocked { task } => task,
        }
    }
}
