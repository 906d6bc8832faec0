use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{Instant, MissedTickBehavior};

use super::callback::ScheduleCallback;
use super::entry::{validate_interval, Entry, EntryState, ScheduleInfo, ScheduleState};
use super::events::SchedulerEvent;
use crate::config::SchedulerConfig;
use crate::error::SchedulerError;
use crate::settings::ScheduleStore;
use crate::util::time;

/// Timer tick for one entry, stamped with the generation that armed it.
#[derive(Debug)]
struct Fire {
    task: String,
    generation: u64,
}

/// Owns every schedule entry. Cloning yields another handle to the same
/// registry. Must be created inside a tokio runtime.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

struct Inner {
    entries: Mutex<HashMap<String, Arc<Entry>>>,
    events: broadcast::Sender<SchedulerEvent>,
    fire_tx: mpsc::Sender<Fire>,
    closed: AtomicBool,
}

/// Returned by [`Scheduler::start_schedule`].
#[derive(Clone)]
pub struct ScheduleHandle {
    task: String,
    scheduler: Scheduler,
}

impl ScheduleHandle {
    pub fn task(&self) -> &str {
        &self.task
    }

    pub fn info(&self) -> Option<ScheduleInfo> {
        self.scheduler.get_schedule_info(&self.task)
    }

    pub fn update_interval(&self, interval_secs: u64) -> Result<(), SchedulerError> {
        self.scheduler.update_interval(&self.task, interval_secs)
    }

    pub fn stop(&self) -> bool {
        self.scheduler.stop_schedule(&self.task)
    }
}

impl Scheduler {
    pub fn new(cfg: &SchedulerConfig) -> Self {
        let (events, _) = broadcast::channel(cfg.event_channel_capacity.max(1));
        let (fire_tx, fire_rx) = mpsc::channel(cfg.fire_channel_capacity.max(1));
        let inner = Arc::new(Inner {
            entries: Mutex::new(HashMap::new()),
            events,
            fire_tx,
            closed: AtomicBool::new(false),
        });
        tokio::spawn(dispatch(Arc::downgrade(&inner), fire_rx));
        Self { inner }
    }

    /// Events are delivered to every receiver subscribed at the time. A
    /// receiver that falls more than `event_channel_capacity` events behind
    /// loses the oldest ones and is told so with `RecvError::Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.inner.events.subscribe()
    }

    /// Arms a recurring timer for `task`. With a `store`, a previously
    /// persisted `last_run`/`next_run` pair for the same interval is resumed
    /// instead of starting a fresh cadence, and every completed run is written
    /// back. A record stored with another interval keeps its `last_run` and
    /// is rewritten with the new interval right away.
    pub fn start_schedule(
        &self,
        task: &str,
        interval_secs: u64,
        callback: Arc<dyn ScheduleCallback>,
        store: Option<ScheduleStore>,
    ) -> Result<ScheduleHandle, SchedulerError> {
        let interval = validate_interval(interval_secs)?;
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(SchedulerError::ShutDown);
        }

        let persisted = match store.as_ref() {
            Some(store) => store.load(task)?,
            None => None,
        };
        let now = time::now();
        // A stored record is resumed as is only when it was written for the
        // same interval; otherwise the cadence restarts from now.
        let (last_run, next_run, resumed) = match persisted {
            Some(p) if p.interval_secs == interval_secs => {
                let next = p.next_run.unwrap_or_else(|| time::add(now, interval));
                (p.last_run, next, true)
            }
            Some(p) => (p.last_run, time::add(now, interval), false),
            None => (None, time::add(now, interval), false),
        };

        let entry = Entry::new(
            task.to_string(),
            EntryState {
                interval,
                last_run,
                next_run,
                state: ScheduleState::Scheduled,
                in_flight: false,
                running_since: None,
                last_error: None,
                generation: 0,
                timer: None,
                callback,
                store,
            },
        );

        // Lock order is registry, then entry.
        let mut st = {
            let mut entries = self.inner.registry();
            if entries.contains_key(task) {
                return Err(SchedulerError::AlreadyExists(task.to_string()));
            }
            entries.insert(task.to_string(), entry.clone());
            entry.lock()
        };

        let first = time::until(next_run);
        self.inner.arm(&entry.task, &mut st, first);
        if !resumed {
            st.persist(task);
        }
        tracing::info!(
            task = %task,
            interval_secs,
            next_run = %next_run,
            resumed,
            "schedule started"
        );
        self.inner.emit(SchedulerEvent::Started {
            task: task.to_string(),
            interval_secs,
            next_run,
        });
        drop(st);

        Ok(ScheduleHandle {
            task: task.to_string(),
            scheduler: self.clone(),
        })
    }

    /// Re-arms the timer with the new interval counted from now. An execution
    /// in flight keeps running.
    pub fn update_interval(&self, task: &str, interval_secs: u64) -> Result<(), SchedulerError> {
        let interval = validate_interval(interval_secs)?;
        let entry = self
            .inner
            .get(task)
            .ok_or_else(|| SchedulerError::NotFound(task.to_string()))?;

        let mut st = entry.lock();
        if st.state == ScheduleState::Stopped {
            return Err(SchedulerError::NotFound(task.to_string()));
        }
        st.interval = interval;
        st.next_run = time::add(time::now(), interval);
        self.inner.arm(task, &mut st, interval);
        st.persist(task);
        tracing::info!(
            task = %task,
            interval_secs,
            next_run = %st.next_run,
            "schedule interval updated"
        );
        Ok(())
    }

    /// Disarms the timer and forgets the entry. Returns false when nothing was
    /// scheduled. An execution in flight is not interrupted.
    pub fn stop_schedule(&self, task: &str) -> bool {
        let Some(entry) = self.inner.registry().remove(task) else {
            return false;
        };
        self.inner.stop_entry(&entry);
        true
    }

    pub fn stop_all_schedules(&self) -> usize {
        let drained: Vec<Arc<Entry>> = self.inner.registry().drain().map(|(_, e)| e).collect();
        for entry in &drained {
            self.inner.stop_entry(entry);
        }
        if !drained.is_empty() {
            tracing::info!(count = drained.len(), "all schedules stopped");
        }
        drained.len()
    }

    /// Stops everything and refuses new schedules from now on.
    pub fn shutdown(&self) -> usize {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.stop_all_schedules()
    }

    pub fn is_scheduled(&self, task: &str) -> bool {
        self.inner.get(task).is_some()
    }

    pub fn get_schedule_info(&self, task: &str) -> Option<ScheduleInfo> {
        let entry = self.inner.get(task)?;
        let st = entry.lock();
        Some(st.snapshot(&entry.task))
    }

    /// Snapshots sorted by task name.
    pub fn get_all_schedules(&self) -> Vec<ScheduleInfo> {
        let entries: Vec<Arc<Entry>> = self.inner.registry().values().cloned().collect();
        let mut out: Vec<ScheduleInfo> =
            entries.iter().map(|e| e.lock().snapshot(&e.task)).collect();
        out.sort_by(|a, b| a.task.cmp(&b.task));
        out
    }

    /// Triggers an execution outside the timer cadence. Goes through the same
    /// in-flight gate as a timer fire.
    pub fn run_now(&self, task: &str) -> Result<(), SchedulerError> {
        let entry = self
            .inner
            .get(task)
            .ok_or_else(|| SchedulerError::NotFound(task.to_string()))?;
        let mut st = entry.lock();
        if st.state == ScheduleState::Stopped {
            return Err(SchedulerError::NotFound(task.to_string()));
        }
        if st.in_flight {
            return Err(SchedulerError::Busy(task.to_string()));
        }
        self.inner.begin_run(&entry, &mut st);
        Ok(())
    }

    /// Starts every enabled schedule found in `store`. `callback_for` maps a
    /// task name to its callback; names it cannot resolve are skipped.
    /// Returns the names that were started.
    pub fn restore_from<F>(
        &self,
        store: &ScheduleStore,
        callback_for: F,
    ) -> Result<Vec<String>, SchedulerError>
    where
        F: Fn(&str) -> Option<Arc<dyn ScheduleCallback>>,
    {
        let mut started = Vec::new();
        for (task, record) in store.enabled_tasks()? {
            let Some(callback) = callback_for(&task) else {
                tracing::warn!(task = %task, "no callback for persisted schedule, skipping");
                continue;
            };
            match self.start_schedule(&task, record.interval_secs, callback, Some(store.clone())) {
                Ok(_) => started.push(task),
                Err(e) => tracing::warn!(task = %task, error = %e, "failed to restore schedule"),
            }
        }
        Ok(started)
    }
}

impl Inner {
    fn registry(&self) -> MutexGuard<'_, HashMap<String, Arc<Entry>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn get(&self, task: &str) -> Option<Arc<Entry>> {
        self.registry().get(task).cloned()
    }

    fn emit(&self, event: SchedulerEvent) {
        let _ = self.events.send(event);
    }

    /// Replaces the entry's timer: first tick after `first`, then every interval.
    fn arm(&self, task: &str, st: &mut EntryState, first: Duration) {
        st.disarm();
        let generation = st.generation;
        let period = st.interval;
        let tx = self.fire_tx.clone();
        let task = task.to_string();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + first, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let fire = Fire {
                    task: task.clone(),
                    generation,
                };
                if tx.send(fire).await.is_err() {
                    break;
                }
            }
        });
        st.timer = Some(handle.abort_handle());
    }

    fn stop_entry(&self, entry: &Arc<Entry>) {
        let mut st = entry.lock();
        st.disarm();
        st.state = ScheduleState::Stopped;
        tracing::info!(task = %entry.task, in_flight = st.in_flight, "schedule stopped");
        self.emit(SchedulerEvent::Stopped {
            task: entry.task.clone(),
        });
    }

    fn on_fire(self: &Arc<Self>, fire: Fire) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let Some(entry) = self.get(&fire.task) else {
            return;
        };
        let mut st = entry.lock();
        if st.generation != fire.generation || st.state == ScheduleState::Stopped {
            return;
        }
        if st.in_flight {
            tracing::warn!(task = %entry.task, "previous execution still running, skipping fire");
            self.emit(SchedulerEvent::ExecutionBlocked {
                task: entry.task.clone(),
            });
            return;
        }
        self.begin_run(&entry, &mut st);
    }

    /// Marks the entry in flight and runs its callback on a separate task.
    /// Caller holds the entry lock and has checked `in_flight`.
    fn begin_run(self: &Arc<Self>, entry: &Arc<Entry>, st: &mut EntryState) {
        st.in_flight = true;
        st.state = ScheduleState::Running;
        st.running_since = Some(time::now());
        tracing::debug!(task = %entry.task, "schedule fired");

        let callback = st.callback.clone();
        let inner = self.clone();
        let entry = entry.clone();
        tokio::spawn(async move {
            let outcome = AssertUnwindSafe(callback.run(&entry.task))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(anyhow::anyhow!("schedule callback panicked")));
            inner.complete(&entry, outcome);
        });
    }

    fn complete(&self, entry: &Arc<Entry>, outcome: anyhow::Result<()>) {
        let mut st = entry.lock();
        st.in_flight = false;
        st.running_since = None;
        if st.state == ScheduleState::Stopped {
            tracing::debug!(task = %entry.task, "execution finished after stop");
            return;
        }

        let now = time::now();
        let interval = st.interval;
        st.last_run = Some(now);
        st.next_run = time::add(now, interval);
        // The next fire lines up with the reported next_run.
        self.arm(&entry.task, &mut st, interval);
        st.persist(&entry.task);

        match outcome {
            Ok(()) => {
                st.state = ScheduleState::Scheduled;
                st.last_error = None;
                tracing::info!(
                    task = %entry.task,
                    next_run = %st.next_run,
                    "scheduled execution finished"
                );
                self.emit(SchedulerEvent::Executed {
                    task: entry.task.clone(),
                    finished_at: now,
                });
            }
            Err(e) => {
                let message = format!("{e:#}");
                st.state = ScheduleState::Error;
                st.last_error = Some(message.clone());
                tracing::error!(task = %entry.task, error = %message, "scheduled execution failed");
                self.emit(SchedulerEvent::Error {
                    task: entry.task.clone(),
                    message,
                });
            }
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let entries = self.entries.get_mut().unwrap_or_else(|e| e.into_inner());
        for entry in entries.values() {
            entry.lock().disarm();
        }
    }
}

/// Single consumer of timer ticks. Exits once the scheduler is gone.
async fn dispatch(inner: Weak<Inner>, mut rx: mpsc::Receiver<Fire>) {
    while let Some(fire) = rx.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.on_fire(fire);
    }
}
