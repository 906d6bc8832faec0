use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, oneshot};

use super::events::ServiceEvent;
use super::log_sink::ServiceLog;
use super::policy::ServicePolicy;
use super::state::{ServiceState, ServiceTransition};
use crate::process::io_pump::{self, LineStream, LineTapSink};
use crate::process::{ExitInfo, Launcher, ProcessSpec, TaskProcess};

pub(super) enum Command {
    Stop {
        grace: Duration,
        done: oneshot::Sender<bool>,
    },
}

#[derive(Debug, Clone)]
pub(super) struct Status {
    pub(super) state: ServiceState,
    pub(super) pid: Option<u32>,
    pub(super) started_at: Option<DateTime<Utc>>,
    pub(super) restart_count: u32,
    pub(super) last_exit_code: Option<i32>,
}

/// Status of one service instance, written by its monitor and read by queries.
pub(super) struct ServiceShared {
    pub(super) service: String,
    status: Mutex<Status>,
    events: broadcast::Sender<ServiceEvent>,
}

impl ServiceShared {
    pub(super) fn new(service: String, events: broadcast::Sender<ServiceEvent>) -> Arc<Self> {
        Arc::new(Self {
            service,
            status: Mutex::new(Status {
                state: ServiceState::Stopped,
                pid: None,
                started_at: None,
                restart_count: 0,
                last_exit_code: None,
            }),
            events,
        })
    }

    pub(super) fn lock(&self) -> MutexGuard<'_, Status> {
        self.status.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(super) fn emit(&self, event: ServiceEvent) {
        let _ = self.events.send(event);
    }

    /// Applies `to` if the transition table allows it, emitting `state_changed`.
    pub(super) fn transition(&self, to: ServiceState) -> bool {
        let mut st = self.lock();
        self.transition_locked(&mut st, to)
    }

    fn transition_locked(&self, st: &mut Status, to: ServiceState) -> bool {
        let from = st.state;
        if let Err(e) = ServiceTransition::validate(from, to) {
            if from != to {
                tracing::warn!(service = %self.service, error = %e, "ignoring service transition");
            }
            return false;
        }
        st.state = to;
        if matches!(to, ServiceState::Stopped | ServiceState::Crashed) {
            st.pid = None;
        }
        tracing::debug!(service = %self.service, from = ?from, to = ?to, "service state changed");
        self.emit(ServiceEvent::StateChanged {
            service: self.service.clone(),
            from,
            to,
        });
        true
    }

    pub(super) fn running(&self, pid: u32) {
        let mut st = self.lock();
        st.pid = Some(pid);
        st.started_at = Some(Utc::now());
        self.transition_locked(&mut st, ServiceState::Running);
    }

    fn crashed(&self, exit_code: i32) {
        let mut st = self.lock();
        st.last_exit_code = Some(exit_code);
        self.transition_locked(&mut st, ServiceState::Crashed);
        self.emit(ServiceEvent::Crashed {
            service: self.service.clone(),
            exit_code,
        });
    }
}

/// Spawns the service and wires both output streams into its log.
pub(super) fn launch(
    launcher: &Launcher,
    spec: &ProcessSpec,
    log: &ServiceLog,
) -> io::Result<TaskProcess> {
    let mut proc = launcher.spawn(spec)?;
    let sink: Arc<dyn LineTapSink> = Arc::new(log.clone());
    if let Some(rd) = proc.take_stdout() {
        io_pump::pump(rd, None, Some(sink.clone()), LineStream::Stdout);
    }
    if let Some(rd) = proc.take_stderr() {
        io_pump::pump(rd, None, Some(sink), LineStream::Stderr);
    }
    log.note(format!("started pid {}: {}", proc.pid(), spec.display()));
    Ok(proc)
}

/// `base * 2^attempt`, capped at `max`.
pub(super) fn backoff(base: Duration, max: Duration, attempt: u32) -> Duration {
    base.checked_mul(1u32 << attempt.min(31)).unwrap_or(max).min(max)
}

enum Wake {
    Exited(io::Result<ExitInfo>),
    Command(Option<Command>),
}

/// Owns the child of one service for its whole life, including restarts.
pub(super) struct Monitor {
    pub(super) shared: Arc<ServiceShared>,
    pub(super) spec: ProcessSpec,
    pub(super) log: ServiceLog,
    pub(super) policy: ServicePolicy,
    pub(super) launcher: Arc<Launcher>,
    pub(super) commands: mpsc::Receiver<Command>,
}

impl Monitor {
    pub(super) async fn run(mut self, mut proc: TaskProcess) {
        loop {
            let wake = tokio::select! {
                exit = proc.wait() => Wake::Exited(exit),
                cmd = self.commands.recv() => Wake::Command(cmd),
            };

            match wake {
                Wake::Command(cmd) => {
                    self.stop(&mut proc, cmd).await;
                    return;
                }
                Wake::Exited(exit) => {
                    let code = match exit {
                        Ok(exit) => exit.reported_code(),
                        Err(e) => {
                            tracing::warn!(
                                service = %self.shared.service,
                                error = %e,
                                "lost track of service process"
                            );
                            -1
                        }
                    };
                    match self.recover(code).await {
                        Some(next) => proc = next,
                        None => return,
                    }
                }
            }
        }
    }

    /// `None` means the supervisor is gone; the child is killed without grace.
    async fn stop(&mut self, proc: &mut TaskProcess, cmd: Option<Command>) {
        let (grace, done) = match cmd {
            Some(Command::Stop { grace, done }) => (grace, Some(done)),
            None => (Duration::ZERO, None),
        };
        let service = self.shared.service.clone();
        self.shared.transition(ServiceState::Stopping);
        self.log.note(format!("stopping (grace {} ms)", grace.as_millis()));

        let graceful = match proc.shutdown(grace).await {
            Ok((exit, graceful)) => {
                let exit_code = exit.reported_code();
                tracing::info!(service = %service, exit_code, graceful, "service stopped");
                self.log.note(format!("stopped with code {}", exit.reported_code()));
                graceful
            }
            Err(e) => {
                tracing::error!(service = %service, error = %e, "failed to stop service process");
                false
            }
        };
        self.shared.transition(ServiceState::Stopped);
        if let Some(done) = done {
            let _ = done.send(graceful);
        }
    }

    /// Handles an unexpected exit: restarts with backoff while the budget
    /// allows. Returns the replacement process, or `None` once the service is
    /// terminally crashed or was stopped during the backoff.
    async fn recover(&mut self, exit_code: i32) -> Option<TaskProcess> {
        let service = self.shared.service.clone();
        tracing::error!(service = %service, exit_code, "service exited unexpectedly");
        self.log.note(format!("exited unexpectedly with code {exit_code}"));
        self.shared.crashed(exit_code);

        if !self.policy.auto_restart {
            tracing::warn!(service = %service, "auto-restart disabled, leaving service crashed");
            self.log.note("auto-restart disabled");
            return None;
        }
        let (base, max) = (self.policy.base_delay(), self.policy.max_delay());

        loop {
            let restarts = self.shared.lock().restart_count;
            if restarts >= self.policy.restart_budget() {
                tracing::error!(service = %service, restarts, "restart limit reached, giving up");
                self.log.note(format!("giving up after {restarts} restarts"));
                self.shared.emit(ServiceEvent::RestartLimitReached {
                    service: service.clone(),
                    restarts,
                });
                return None;
            }

            self.shared.transition(ServiceState::Restarting);
            let delay = backoff(base, max, restarts);
            tracing::info!(
                service = %service,
                attempt = restarts + 1,
                delay_ms = delay.as_millis() as u64,
                "restarting service"
            );

            let interrupted = tokio::select! {
                _ = tokio::time::sleep(delay) => None,
                cmd = self.commands.recv() => Some(cmd),
            };
            if let Some(cmd) = interrupted {
                self.shared.transition(ServiceState::Stopping);
                self.shared.transition(ServiceState::Stopped);
                self.log.note("stopped while waiting to restart");
                if let Some(Command::Stop { done, .. }) = cmd {
                    let _ = done.send(true);
                }
                return None;
            }

            let attempt = {
                let mut st = self.shared.lock();
                st.restart_count += 1;
                st.restart_count
            };
            self.shared.transition(ServiceState::Starting);
            match launch(&self.launcher, &self.spec, &self.log) {
                Ok(proc) => {
                    let pid = proc.pid();
                    self.shared.running(pid);
                    tracing::info!(service = %service, attempt, pid, "service restarted");
                    self.shared.emit(ServiceEvent::Restarted {
                        service: service.clone(),
                        attempt,
                        pid,
                    });
                    return Some(proc);
                }
                Err(e) => {
                    tracing::error!(
                        service = %service,
                        attempt,
                        error = %e,
                        "service restart failed"
                    );
                    self.log.note(format!("restart failed: {e}"));
                    self.shared.emit(ServiceEvent::RestartFailed {
                        service: service.clone(),
                        error: e.to_string(),
                    });
                    self.shared.transition(ServiceState::Crashed);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let base = Duration::from_secs(5);
        let max = Duration::from_secs(300);
        assert_eq!(backoff(base, max, 0), Duration::from_secs(5));
        assert_eq!(backoff(base, max, 1), Duration::from_secs(10));
        assert_eq!(backoff(base, max, 3), Duration::from_secs(40));
        assert_eq!(backoff(base, max, 10), max);
        assert_eq!(backoff(base, max, 40), max);
    }
}
