mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use pretty_assertions::assert_eq;
use taskcue_core::config::SchedulerConfig;
use taskcue_core::error::SchedulerError;
use taskcue_core::scheduler::{
    FnCallback, ScheduleCallback, ScheduleState, Scheduler, SchedulerEvent,
};
use taskcue_core::settings::{MemorySettings, PersistedSchedule, ScheduleStore};
use tokio::sync::broadcast::error::TryRecvError;

use common::{count_blocked, drain, scheduler_config};

/// Callback that sleeps for `busy` and tracks how many runs overlap.
struct BusyCallback {
    busy: Duration,
    runs: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl BusyCallback {
    fn new(busy: Duration) -> Arc<Self> {
        Arc::new(Self {
            busy,
            runs: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        })
    }
}

#[async_trait::async_trait]
impl ScheduleCallback for BusyCallback {
    async fn run(&self, _task: &str) -> anyhow::Result<()> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.busy).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn noop() -> Arc<dyn ScheduleCallback> {
    Arc::new(FnCallback::new(|_task: String| async { Ok::<(), anyhow::Error>(()) }))
}

#[tokio::test(start_paused = true)]
async fn valid_intervals_start_and_report_next_run() {
    let scheduler = Scheduler::new(&scheduler_config());
    let mut events = scheduler.subscribe();

    for (i, secs) in [10u64, 60, 3_600, 2_147_483].into_iter().enumerate() {
        let name = format!("task{i}");
        let before = Utc::now();
        scheduler.start_schedule(&name, secs, noop(), None).unwrap();

        let info = scheduler.get_schedule_info(&name).unwrap();
        assert_eq!(info.state, ScheduleState::Scheduled);
        assert_eq!(info.interval_secs, secs);
        assert_eq!(info.last_run, None);
        assert!(!info.in_flight);
        let expected = before + chrono::Duration::seconds(secs as i64);
        assert!((info.next_run - expected).num_milliseconds().abs() < 1_000);
    }

    let started = drain(&mut events);
    assert_eq!(started.len(), 4);
    assert!(started.iter().all(|e| matches!(e, SchedulerEvent::Started { .. })));
    assert_eq!(scheduler.get_all_schedules().len(), 4);
}

#[tokio::test(start_paused = true)]
async fn out_of_range_intervals_change_nothing() {
    let scheduler = Scheduler::new(&scheduler_config());
    let mut events = scheduler.subscribe();

    for secs in [0u64, 9, 2_147_484, u64::MAX] {
        let err = scheduler.start_schedule("t", secs, noop(), None).err().unwrap();
        assert!(matches!(err, SchedulerError::Range { .. }), "{err:?}");
    }
    assert!(!scheduler.is_scheduled("t"));
    assert!(drain(&mut events).is_empty());

    scheduler.start_schedule("t", 60, noop(), None).unwrap();
    let before = scheduler.get_schedule_info("t").unwrap();
    assert!(matches!(scheduler.update_interval("t", 5), Err(SchedulerError::Range { .. })));
    assert_eq!(scheduler.get_schedule_info("t").unwrap(), before);
    assert!(matches!(
        scheduler.update_interval("missing", 60),
        Err(SchedulerError::NotFound(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn starting_twice_keeps_the_original_entry() {
    let scheduler = Scheduler::new(&scheduler_config());
    scheduler.start_schedule("t", 30, noop(), None).unwrap();
    let original = scheduler.get_schedule_info("t").unwrap();

    tokio::time::sleep(Duration::from_secs(1)).await;
    let err = scheduler.start_schedule("t", 90, noop(), None).err().unwrap();
    assert!(matches!(err, SchedulerError::AlreadyExists(ref n) if n == "t"));
    assert_eq!(scheduler.get_schedule_info("t").unwrap(), original);
}

#[tokio::test(start_paused = true)]
async fn overlapping_fire_is_blocked_once() {
    let scheduler = Scheduler::new(&scheduler_config());
    let mut events = scheduler.subscribe();
    let busy = BusyCallback::new(Duration::from_secs(15));

    scheduler.start_schedule("slow", 10, busy.clone(), None).unwrap();

    // t=10 starts a 15s run, t=20 is blocked, t=25 completes and re-arms for t=35.
    tokio::time::sleep(Duration::from_secs(12)).await;
    let info = scheduler.get_schedule_info("slow").unwrap();
    assert!(info.in_flight);
    assert_eq!(info.state, ScheduleState::Running);

    tokio::time::sleep(Duration::from_secs(18)).await;
    let seen = drain(&mut events);
    assert_eq!(count_blocked(&seen), 1, "{seen:?}");
    assert_eq!(busy.runs.load(Ordering::SeqCst), 1);
    assert_eq!(busy.max_active.load(Ordering::SeqCst), 1);

    let kinds: Vec<&str> = seen
        .iter()
        .map(|e| match e {
            SchedulerEvent::Started { .. } => "started",
            SchedulerEvent::ExecutionBlocked { .. } => "blocked",
            SchedulerEvent::Executed { .. } => "executed",
            SchedulerEvent::Error { .. } => "error",
            SchedulerEvent::Stopped { .. } => "stopped",
        })
        .collect();
    assert_eq!(kinds, vec!["started", "blocked", "executed"]);

    let info = scheduler.get_schedule_info("slow").unwrap();
    assert_eq!(info.state, ScheduleState::Scheduled);
    assert!(!info.in_flight);
    assert!(info.last_run.is_some());
}

#[tokio::test(start_paused = true)]
async fn nothing_is_reported_after_stop_all() {
    let scheduler = Scheduler::new(&scheduler_config());
    let mut events = scheduler.subscribe();
    let slow = BusyCallback::new(Duration::from_secs(5));
    let fast = BusyCallback::new(Duration::ZERO);

    scheduler.start_schedule("slow", 10, slow.clone(), None).unwrap();
    scheduler.start_schedule("fast", 11, fast.clone(), None).unwrap();

    // "slow" is mid-run at t=12; "fast" ran at t=11.
    tokio::time::sleep(Duration::from_secs(12)).await;
    assert_eq!(scheduler.stop_all_schedules(), 2);
    drain(&mut events);

    tokio::time::sleep(Duration::from_secs(60)).await;
    let after = drain(&mut events);
    assert!(after.is_empty(), "{after:?}");
    // The in-flight run was allowed to finish.
    assert_eq!(slow.runs.load(Ordering::SeqCst), 1);
    assert_eq!(fast.runs.load(Ordering::SeqCst), 1);
    assert!(scheduler.get_all_schedules().is_empty());
}

#[tokio::test(start_paused = true)]
async fn failures_emit_errors_and_keep_the_timer() {
    let scheduler = Scheduler::new(&scheduler_config());
    let mut events = scheduler.subscribe();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let flaky = Arc::new(FnCallback::new(move |_task: String| {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        async move {
            if n == 0 {
                anyhow::bail!("first run fails")
            }
            Ok::<(), anyhow::Error>(())
        }
    }));

    scheduler.start_schedule("flaky", 10, flaky, None).unwrap();
    tokio::time::sleep(Duration::from_secs(15)).await;
    let info = scheduler.get_schedule_info("flaky").unwrap();
    assert_eq!(info.state, ScheduleState::Error);
    assert_eq!(info.last_error.as_deref(), Some("first run fails"));

    tokio::time::sleep(Duration::from_secs(10)).await;
    let info = scheduler.get_schedule_info("flaky").unwrap();
    assert_eq!(info.state, ScheduleState::Scheduled);
    assert_eq!(info.last_error, None);
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let seen = drain(&mut events);
    assert!(seen.iter().any(|e| matches!(
        e,
        SchedulerEvent::Error { message, .. } if message == "first run fails"
    )));
    assert!(seen.iter().any(|e| matches!(e, SchedulerEvent::Executed { .. })));
}

#[tokio::test(start_paused = true)]
async fn restore_resumes_persisted_cadence() {
    let store = ScheduleStore::new(Arc::new(MemorySettings::new()));
    let t = Utc::now() - chrono::Duration::seconds(60);
    store
        .save(
            "backup",
            &PersistedSchedule {
                enabled: true,
                interval_secs: 3_600,
                last_run: Some(t),
                next_run: Some(t + chrono::Duration::seconds(3_600)),
            },
        )
        .unwrap();
    let mut disabled = PersistedSchedule::new(60);
    disabled.enabled = false;
    store.save("paused", &disabled).unwrap();

    let scheduler = Scheduler::new(&scheduler_config());
    let started = scheduler.restore_from(&store, |_| Some(noop())).unwrap();
    assert_eq!(started, vec!["backup".to_string()]);

    let info = scheduler.get_schedule_info("backup").unwrap();
    assert_eq!(info.interval_secs, 3_600);
    assert_eq!(info.last_run, Some(t));
    assert_eq!(info.next_run, t + chrono::Duration::seconds(3_600));
    assert!(!scheduler.is_scheduled("paused"));
}

#[tokio::test(start_paused = true)]
async fn changed_interval_restarts_the_stored_cadence() {
    let store = ScheduleStore::new(Arc::new(MemorySettings::new()));
    let t = Utc::now() - chrono::Duration::seconds(60);
    store
        .save(
            "backup",
            &PersistedSchedule {
                enabled: true,
                interval_secs: 3_600,
                last_run: Some(t),
                next_run: Some(t + chrono::Duration::seconds(3_600)),
            },
        )
        .unwrap();

    let scheduler = Scheduler::new(&scheduler_config());
    scheduler.start_schedule("backup", 600, noop(), Some(store.clone())).unwrap();

    let info = scheduler.get_schedule_info("backup").unwrap();
    let expected = Utc::now() + chrono::Duration::seconds(600);
    assert!((info.next_run - expected).num_milliseconds().abs() < 1_000);
    assert_eq!(info.last_run, Some(t));

    let record = store.load("backup").unwrap().unwrap();
    assert_eq!(record.interval_secs, 600);
    assert_eq!(record.next_run, Some(info.next_run));
    assert_eq!(record.last_run, Some(t));
}

#[tokio::test(start_paused = true)]
async fn completed_runs_are_persisted() {
    let store = ScheduleStore::new(Arc::new(MemorySettings::new()));
    let scheduler = Scheduler::new(&scheduler_config());
    scheduler.start_schedule("sync", 10, noop(), Some(store.clone())).unwrap();
    assert_eq!(store.load("sync").unwrap().unwrap().last_run, None);

    tokio::time::sleep(Duration::from_secs(11)).await;
    let record = store.load("sync").unwrap().unwrap();
    let info = scheduler.get_schedule_info("sync").unwrap();
    assert!(record.enabled);
    assert_eq!(record.last_run, info.last_run);
    assert_eq!(record.next_run, Some(info.next_run));
}

#[tokio::test(start_paused = true)]
async fn manual_runs_share_the_in_flight_gate() {
    let scheduler = Scheduler::new(&scheduler_config());
    let busy = BusyCallback::new(Duration::from_secs(5));
    scheduler.start_schedule("manual", 600, busy.clone(), None).unwrap();

    scheduler.run_now("manual").unwrap();
    tokio::task::yield_now().await;
    assert!(matches!(scheduler.run_now("manual"), Err(SchedulerError::Busy(_))));
    assert!(matches!(scheduler.run_now("missing"), Err(SchedulerError::NotFound(_))));

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(busy.runs.load(Ordering::SeqCst), 1);
    assert!(scheduler.get_schedule_info("manual").unwrap().last_run.is_some());
}

#[tokio::test(start_paused = true)]
async fn stop_and_update_interval() {
    let scheduler = Scheduler::new(&scheduler_config());
    let mut events = scheduler.subscribe();
    let handle = scheduler.start_schedule("t", 60, noop(), None).unwrap();

    handle.update_interval(120).unwrap();
    let info = handle.info().unwrap();
    assert_eq!(info.interval_secs, 120);
    let expected = Utc::now() + chrono::Duration::seconds(120);
    assert!((info.next_run - expected).num_milliseconds().abs() < 1_000);

    assert!(scheduler.stop_schedule("t"));
    assert!(!scheduler.stop_schedule("t"));
    assert!(!scheduler.is_scheduled("t"));
    assert!(handle.info().is_none());

    let seen = drain(&mut events);
    assert!(matches!(seen.last(), Some(SchedulerEvent::Stopped { task }) if task == "t"));

    assert_eq!(scheduler.shutdown(), 0);
    assert!(matches!(
        scheduler.start_schedule("t", 60, noop(), None),
        Err(SchedulerError::ShutDown)
    ));
}

#[tokio::test(start_paused = true)]
async fn lagging_subscriber_learns_how_many_events_it_lost() {
    let cfg = SchedulerConfig {
        event_channel_capacity: 2,
        ..scheduler_config()
    };
    let scheduler = Scheduler::new(&cfg);
    let mut events = scheduler.subscribe();
    for i in 0..5 {
        scheduler.start_schedule(&format!("t{i}"), 60, noop(), None).unwrap();
    }

    assert!(matches!(events.try_recv(), Err(TryRecvError::Lagged(3))));
    assert!(matches!(
        events.try_recv(),
        Ok(SchedulerEvent::Started { task, .. }) if task == "t3"
    ));
    assert!(matches!(
        events.try_recv(),
        Ok(SchedulerEvent::Started { task, .. }) if task == "t4"
    ));
}
