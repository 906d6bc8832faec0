//! Long-lived background services: detached launch, output tailing into
//! rotating logs, crash detection with bounded restarts, graceful stop.

mod events;
mod log_sink;
mod monitor;
mod policy;
mod state;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::SupervisorConfig;
use crate::error::SupervisorError;
use crate::process::{Launcher, ProcessSpec};
use crate::task::{validate_arguments, InvocationKind, TaskArgs, TaskDescriptor};

pub use events::ServiceEvent;
pub use log_sink::ServiceLog;
pub use policy::{PolicyOverrides, ServicePolicy};
pub use state::{ServiceState, ServiceTransition, TransitionError};

use monitor::{Command, Monitor, ServiceShared};

/// Returned by [`Supervisor::start_service`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceHandle {
    pub name: String,
    pub pid: u32,
    pub log_path: PathBuf,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceInfo {
    pub name: String,
    pub state: ServiceState,
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub uptime_secs: Option<u64>,
    pub restart_count: u32,
    pub last_exit_code: Option<i32>,
    pub log_path: PathBuf,
}

struct ServiceRecord {
    instance: u64,
    shared: Arc<ServiceShared>,
    commands: mpsc::Sender<Command>,
    log_path: PathBuf,
    monitor: JoinHandle<()>,
}

impl ServiceRecord {
    /// A crashed record whose monitor gave up may be replaced.
    fn is_live(&self) -> bool {
        !self.monitor.is_finished() || self.shared.lock().state.is_live()
    }

    fn info(&self) -> ServiceInfo {
        let st = self.shared.lock().clone();
        let uptime_secs = match (st.state, st.started_at) {
            (ServiceState::Running, Some(at)) => {
                Some((Utc::now() - at).num_seconds().max(0) as u64)
            }
            _ => None,
        };
        ServiceInfo {
            name: self.shared.service.clone(),
            state: st.state,
            pid: st.pid,
            started_at: st.started_at,
            uptime_secs,
            restart_count: st.restart_count,
            last_exit_code: st.last_exit_code,
            log_path: self.log_path.clone(),
        }
    }
}

/// Registry of background services. Cloning yields another handle to the same
/// registry. Dropping the last handle kills every service it started.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

struct Inner {
    cfg: SupervisorConfig,
    interpreters: HashMap<String, String>,
    services: Mutex<HashMap<String, ServiceRecord>>,
    /// Created by the first start, inside the caller's runtime.
    launcher: Mutex<Option<Arc<Launcher>>>,
    events: broadcast::Sender<ServiceEvent>,
    next_instance: AtomicU64,
}

impl Supervisor {
    /// `interpreters` maps file extensions to launch programs, as for the engine.
    pub fn new(cfg: SupervisorConfig, interpreters: HashMap<String, String>) -> Self {
        let (events, _) = broadcast::channel(cfg.event_channel_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                cfg,
                interpreters,
                services: Mutex::new(HashMap::new()),
                launcher: Mutex::new(None),
                events,
                next_instance: AtomicU64::new(1),
            }),
        }
    }

    /// Same delivery as the scheduler's bus: receivers lagging more than
    /// `event_channel_capacity` events behind lose the oldest ones.
    pub fn subscribe(&self) -> broadcast::Receiver<ServiceEvent> {
        self.inner.events.subscribe()
    }

    /// Restart policy used by [`Supervisor::start_service`].
    pub fn default_policy(&self) -> ServicePolicy {
        ServicePolicy::from(&self.inner.cfg)
    }

    /// Launches `desc` detached with the configured restart policy and starts
    /// its monitor. Must be called inside a tokio runtime.
    pub fn start_service(
        &self,
        desc: &TaskDescriptor,
        args: &TaskArgs,
    ) -> Result<ServiceHandle, SupervisorError> {
        self.start_service_with_policy(desc, args, self.default_policy())
    }

    /// Like [`Supervisor::start_service`] with a per-service restart policy.
    pub fn start_service_with_policy(
        &self,
        desc: &TaskDescriptor,
        args: &TaskArgs,
        policy: ServicePolicy,
    ) -> Result<ServiceHandle, SupervisorError> {
        if desc.kind != InvocationKind::BackgroundService {
            return Err(SupervisorError::InvalidInvocationKind {
                name: desc.name.clone(),
                kind: desc.kind,
            });
        }
        let validated = validate_arguments(desc, args)
            .map_err(|errors| SupervisorError::Validation(errors.join("; ")))?;

        let mut services = self.inner.registry();
        if services.get(&desc.name).is_some_and(ServiceRecord::is_live) {
            return Err(SupervisorError::AlreadyExists(desc.name.clone()));
        }

        let cfg = &self.inner.cfg;
        let log = ServiceLog::open(
            PathBuf::from(&cfg.logs_directory).as_path(),
            &log_file_stem(&desc.name),
            &cfg.log_rotation,
        )?;
        let spec = ProcessSpec::for_task(&desc.path, validated.to_argv(), &self.inner.interpreters)
            .detached();
        let launcher = self.inner.launcher().map_err(|source| SupervisorError::Launch {
            name: desc.name.clone(),
            source,
        })?;

        let shared = ServiceShared::new(desc.name.clone(), self.inner.events.clone());
        shared.transition(ServiceState::Starting);
        let proc = match monitor::launch(&launcher, &spec, &log) {
            Ok(proc) => proc,
            Err(source) => {
                tracing::error!(
                    service = %desc.name,
                    cmd = %spec.display(),
                    error = %source,
                    "service launch failed"
                );
                log.note(format!("launch failed: {source}"));
                return Err(SupervisorError::Launch {
                    name: desc.name.clone(),
                    source,
                });
            }
        };
        let pid = proc.pid();
        shared.running(pid);

        let (commands, commands_rx) = mpsc::channel(4);
        let log_path = log.path().to_path_buf();
        let monitor = tokio::spawn(
            Monitor {
                shared: shared.clone(),
                spec,
                log,
                policy,
                launcher,
                commands: commands_rx,
            }
            .run(proc),
        );

        let started_at = shared.lock().started_at.unwrap_or_else(Utc::now);
        let instance = self.inner.next_instance.fetch_add(1, Ordering::Relaxed);
        services.insert(
            desc.name.clone(),
            ServiceRecord {
                instance,
                shared,
                commands,
                log_path: log_path.clone(),
                monitor,
            },
        );
        tracing::info!(service = %desc.name, pid, log = %log_path.display(), "service started");

        Ok(ServiceHandle {
            name: desc.name.clone(),
            pid,
            log_path,
            started_at,
        })
    }

    /// Asks the service to terminate, escalating to a kill of its whole group
    /// after `grace`. Returns false for unknown names.
    pub async fn stop_service(&self, name: &str, grace: Duration) -> bool {
        let Some((instance, shared, commands)) = self
            .inner
            .registry()
            .get(name)
            .map(|r| (r.instance, r.shared.clone(), r.commands.clone()))
        else {
            return false;
        };

        let (done, done_rx) = oneshot::channel();
        let acked = match commands.send(Command::Stop { grace, done }).await {
            Ok(()) => done_rx.await.ok(),
            Err(_) => None,
        };
        match acked {
            Some(graceful) => tracing::info!(service = %name, graceful, "service stop completed"),
            // Monitor already gone: the record was a terminal crash.
            None => {
                shared.transition(ServiceState::Stopped);
            }
        }

        let mut services = self.inner.registry();
        if services.get(name).is_some_and(|r| r.instance == instance) {
            services.remove(name);
        }
        true
    }

    /// Stops every service concurrently with the configured grace. Returns how
    /// many were stopped.
    pub async fn stop_all_services(&self) -> usize {
        let names: Vec<String> = self.inner.registry().keys().cloned().collect();
        let grace = Duration::from_millis(self.inner.cfg.stop_grace_ms);
        let stops = names.iter().map(|n| self.stop_service(n, grace));
        let stopped = futures::future::join_all(stops).await;
        stopped.into_iter().filter(|ok| *ok).count()
    }

    /// Unknown names report `Stopped`.
    pub fn get_service_state(&self, name: &str) -> ServiceState {
        self.inner
            .registry()
            .get(name)
            .map(|r| r.shared.lock().state)
            .unwrap_or(ServiceState::Stopped)
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.get_service_state(name) == ServiceState::Running
    }

    pub fn get_service_info(&self, name: &str) -> Option<ServiceInfo> {
        self.inner.registry().get(name).map(ServiceRecord::info)
    }

    pub fn get_all_services(&self) -> Vec<ServiceInfo> {
        let mut out: Vec<ServiceInfo> =
            self.inner.registry().values().map(ServiceRecord::info).collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// Gives a service a fresh restart budget. Returns false for unknown names.
    pub fn reset_restart_count(&self, name: &str) -> bool {
        match self.inner.registry().get(name) {
            Some(r) => {
                r.shared.lock().restart_count = 0;
                tracing::info!(service = %name, "restart count reset");
                true
            }
            None => false,
        }
    }
}

impl Inner {
    fn registry(&self) -> MutexGuard<'_, HashMap<String, ServiceRecord>> {
        self.services.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn launcher(&self) -> std::io::Result<Arc<Launcher>> {
        let mut slot = self.launcher.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(launcher) = slot.as_ref() {
            return Ok(launcher.clone());
        }
        let launcher = Arc::new(Launcher::start("taskcue-launcher")?);
        *slot = Some(launcher.clone());
        Ok(launcher)
    }
}

fn log_file_stem(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_file_names_are_flat() {
        assert_eq!(log_file_stem("sync/remote"), "sync_remote");
        assert_eq!(log_file_stem("watch-dir_2.x"), "watch-dir_2.x");
    }

    #[tokio::test]
    async fn rejects_non_service_descriptors() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = SupervisorConfig {
            logs_directory: dir.path().display().to_string(),
            ..SupervisorConfig::default()
        };
        let sup = Supervisor::new(cfg, HashMap::new());
        let desc = TaskDescriptor::new(
            "once",
            dir.path().join("once.sh"),
            InvocationKind::ExternalProcess,
        );

        let err = sup.start_service(&desc, &TaskArgs::new()).unwrap_err();
        assert!(matches!(err, SupervisorError::InvalidInvocationKind { .. }));
        assert_eq!(sup.get_service_state("once"), ServiceState::Stopped);
        assert!(!sup.stop_service("once", Duration::from_secs(1)).await);
    }
}
