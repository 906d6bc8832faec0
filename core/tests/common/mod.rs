#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use taskcue_core::config::{EngineConfig, SchedulerConfig, SupervisorConfig};
use taskcue_core::scheduler::SchedulerEvent;
use taskcue_core::supervisor::ServiceEvent;
use taskcue_core::task::{InvocationKind, TaskDescriptor};
use tokio::sync::broadcast;

/// Writes an executable `sh` script. The `.sh` extension routes it through the
/// `sh` interpreter mapping.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }
    path
}

pub fn task(name: &str, path: impl Into<PathBuf>, kind: InvocationKind) -> TaskDescriptor {
    TaskDescriptor::new(name, path, kind)
}

pub fn engine_config() -> EngineConfig {
    EngineConfig {
        timeout_ms: 5_000,
        kill_grace_ms: 500,
        ..EngineConfig::default()
    }
}

pub fn scheduler_config() -> SchedulerConfig {
    SchedulerConfig::default()
}

pub fn supervisor_config(logs: &Path) -> SupervisorConfig {
    SupervisorConfig {
        logs_directory: logs.display().to_string(),
        backoff_base_ms: 50,
        backoff_max_ms: 200,
        stop_grace_ms: 2_000,
        ..SupervisorConfig::default()
    }
}

/// Everything currently buffered in `rx`.
pub fn drain<T: Clone>(rx: &mut broadcast::Receiver<T>) -> Vec<T> {
    let mut out = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        out.push(ev);
    }
    out
}

pub fn count_blocked(events: &[SchedulerEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, SchedulerEvent::ExecutionBlocked { .. }))
        .count()
}

/// Receives service events until `pred` matches one, failing after `limit`.
pub async fn wait_for_service_event<F>(
    rx: &mut broadcast::Receiver<ServiceEvent>,
    limit: Duration,
    mut pred: F,
) -> ServiceEvent
where
    F: FnMut(&ServiceEvent) -> bool,
{
    tokio::time::timeout(limit, async {
        loop {
            match rx.recv().await {
                Ok(ev) if pred(&ev) => return ev,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => panic!("event channel closed: {e}"),
            }
        }
    })
    .await
    .expect("timed out waiting for service event")
}

#[cfg(unix)]
pub fn process_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}
