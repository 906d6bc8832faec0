use std::sync::Arc;

use taskcue_core::api::{validate_interval, JsonFileSettings, PersistedSchedule, ScheduleStore};
use taskcue_core::error::CliError;

use super::cli::ScheduleAction;

pub fn open_store(settings_path: &str) -> Result<ScheduleStore, CliError> {
    let settings = JsonFileSettings::open(settings_path)?;
    Ok(ScheduleStore::new(Arc::new(settings)))
}

pub fn schedules_cmd(settings_path: &str, action: Option<ScheduleAction>) -> Result<i32, CliError> {
    let store = open_store(settings_path)?;
    match action.unwrap_or(ScheduleAction::List { json: false }) {
        ScheduleAction::List { json } => {
            let all = store.all()?;
            if json {
                let map: serde_json::Map<String, serde_json::Value> = all
                    .into_iter()
                    .map(|(name, record)| (name, serde_json::to_value(record).unwrap_or_default()))
                    .collect();
                let rendered = serde_json::to_string_pretty(&map)
                    .map_err(|e| CliError::Command(e.to_string()))?;
                println!("{rendered}");
            } else if all.is_empty() {
                println!("no schedules in {settings_path}");
            } else {
                println!(
                    "{:<24} {:<8} {:>10}  {:<20} {:<20}",
                    "TASK", "ENABLED", "INTERVAL", "LAST RUN", "NEXT RUN"
                );
                for (name, record) in all {
                    println!(
                        "{:<24} {:<8} {:>9}s  {:<20} {:<20}",
                        name,
                        if record.enabled { "yes" } else { "no" },
                        record.interval_secs,
                        display_time(record.last_run, "never"),
                        display_time(record.next_run, "not scheduled"),
                    );
                }
            }
            Ok(0)
        }
        ScheduleAction::Enable { task, interval } => {
            let mut record = match (store.load(&task)?, interval) {
                (Some(record), None) => record,
                (Some(mut record), Some(secs)) => {
                    validate_interval(secs)?;
                    record.interval_secs = secs;
                    record
                }
                (None, Some(secs)) => {
                    validate_interval(secs)?;
                    PersistedSchedule::new(secs)
                }
                (None, None) => {
                    return Err(CliError::Command(format!(
                        "no schedule for '{task}' yet; pass --interval <seconds>"
                    )))
                }
            };
            record.enabled = true;
            store.save(&task, &record)?;
            println!("enabled '{task}' every {}s", record.interval_secs);
            Ok(0)
        }
        ScheduleAction::Disable { task } => {
            if store.set_enabled(&task, false)? {
                println!("disabled '{task}'");
                Ok(0)
            } else {
                Err(CliError::UnknownTask(task))
            }
        }
    }
}

fn display_time(at: Option<chrono::DateTime<chrono::Utc>>, empty: &str) -> String {
    at.map(|t| t.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| empty.to_string())
}
