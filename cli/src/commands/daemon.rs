use std::sync::Arc;
use std::time::Duration;

use taskcue_core::api::{
    AppConfig, EngineCallback, ExecutionEngine, InvocationKind, NativeUnitRegistry,
    ScheduleCallback, Scheduler, SchedulerEvent, ServiceEvent, Supervisor,
};
use taskcue_core::error::CliError;
use tokio::sync::broadcast::error::RecvError;

use super::cli::DaemonArgs;
use super::schedules::open_store;
use crate::catalog::Catalog;

pub async fn daemon_cmd(
    cfg: &AppConfig,
    catalog: &Catalog,
    args: DaemonArgs,
) -> Result<i32, CliError> {
    let engine = ExecutionEngine::new(cfg.engine.clone(), Arc::new(NativeUnitRegistry::new()));
    let scheduler = Scheduler::new(&cfg.scheduler);
    let supervisor = Supervisor::new(cfg.supervisor.clone(), cfg.engine.interpreters.clone());
    spawn_event_logging(&scheduler, &supervisor);

    let store = open_store(&cfg.scheduler.settings_path)?;
    let restored = scheduler.restore_from(&store, |name| {
        let entry = catalog.get(name)?;
        if entry.descriptor.kind == InvocationKind::BackgroundService {
            tracing::warn!(task = %name, "background services cannot be scheduled");
            return None;
        }
        let callback =
            EngineCallback::new(engine.clone(), entry.descriptor.clone(), entry.args.clone());
        Some(Arc::new(callback) as Arc<dyn ScheduleCallback>)
    })?;
    tracing::info!(count = restored.len(), tasks = ?restored, "schedules restored");

    let mut started = 0usize;
    if !args.no_services {
        let mut names = cfg.services.clone();
        names.extend(args.services.iter().cloned());
        names.sort();
        names.dedup();
        for name in &names {
            let Some(entry) = catalog.get(name) else {
                tracing::warn!(service = %name, "service not found in catalog");
                continue;
            };
            let policy = supervisor.default_policy().with_overrides(&entry.restart);
            match supervisor.start_service_with_policy(&entry.descriptor, &entry.args, policy) {
                Ok(handle) => {
                    started += 1;
                    tracing::info!(
                        service = %name,
                        pid = handle.pid,
                        log = %handle.log_path.display(),
                        "service up"
                    );
                }
                Err(e) => tracing::error!(service = %name, error = %e, "failed to start service"),
            }
        }
    }

    if restored.is_empty() && started == 0 {
        tracing::warn!("nothing to do: no enabled schedules and no services");
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");

    let schedules = scheduler.shutdown();
    let services = supervisor.stop_all_services().await;
    // Let the log writers drain what the services printed last.
    tokio::time::sleep(Duration::from_millis(100)).await;
    tracing::info!(schedules, services, "daemon stopped");
    Ok(0)
}

fn spawn_event_logging(scheduler: &Scheduler, supervisor: &Supervisor) {
    let mut schedule_rx = scheduler.subscribe();
    tokio::spawn(async move {
        loop {
            let event = match schedule_rx.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "schedule event log fell behind, events dropped");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            match event {
                SchedulerEvent::Started { task, next_run, .. } => {
                    tracing::debug!("Schedule {} armed, next run {}", task, next_run);
                }
                SchedulerEvent::Executed { task, .. } => {
                    tracing::debug!("Schedule {} executed", task);
                }
                SchedulerEvent::Error { task, message } => {
                    tracing::warn!("Schedule {} failed: {}", task, message);
                }
                SchedulerEvent::ExecutionBlocked { task } => {
                    tracing::warn!("Schedule {} skipped a fire, previous run still active", task);
                }
                SchedulerEvent::Stopped { .. } => {}
            }
        }
    });

    let mut service_rx = supervisor.subscribe();
    tokio::spawn(async move {
        loop {
            let event = match service_rx.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "service event log fell behind, events dropped");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            match event {
                ServiceEvent::StateChanged { service, from, to } => {
                    tracing::debug!("Service {} {:?} -> {:?}", service, from, to);
                }
                ServiceEvent::RestartLimitReached { service, restarts } => {
                    tracing::error!("Service {} gave up after {} restarts", service, restarts);
                }
                _ => {}
            }
        }
    });
}
