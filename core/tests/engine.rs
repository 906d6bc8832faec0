mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::json;
use taskcue_core::engine::{CodeUnit, ExecutionEngine, FailureKind, FnUnit, NativeUnitRegistry};
use taskcue_core::task::{ArgSpec, ArgType, InvocationKind, TaskArgs};

use common::{engine_config, task, write_script};

fn engine_with(registry: &NativeUnitRegistry) -> ExecutionEngine {
    ExecutionEngine::new(engine_config(), Arc::new(registry.clone()))
}

fn args(pairs: &[(&str, serde_json::Value)]) -> TaskArgs {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

#[cfg(unix)]
#[tokio::test]
async fn reports_success_from_last_json_line() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_script(
        dir.path(),
        "hello.sh",
        r#"echo "working"
echo '{"success": true, "message": "ok", "data": {"n": 1}}'"#,
    );
    let engine = engine_with(&NativeUnitRegistry::new());

    let result = engine
        .execute(&task("hello", &path, InvocationKind::ExternalProcess), &TaskArgs::new())
        .await;

    assert!(result.success, "{result:?}");
    assert_eq!(result.message, "ok");
    assert_eq!(result.data, Some(json!({"n": 1})));
    assert_eq!(result.output.as_deref(), Some("working"));
    assert_eq!(result.exit_code, Some(0));
    assert_eq!(result.failure, None);
}

#[cfg(unix)]
#[tokio::test]
async fn non_json_output_is_a_protocol_error_with_raw_text() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_script(dir.path(), "plain.sh", "echo 'just text'\necho 'more text'");
    let engine = engine_with(&NativeUnitRegistry::new());

    let result = engine
        .execute(&task("plain", &path, InvocationKind::ExternalProcess), &TaskArgs::new())
        .await;

    assert!(!result.success);
    assert!(result.is_failure(FailureKind::Protocol));
    assert!(result.message.starts_with("ProtocolError: "), "{}", result.message);
    assert_eq!(result.output.as_deref(), Some("just text\nmore text\n"));
}

#[cfg(unix)]
#[tokio::test]
async fn task_reported_failure_keeps_its_message() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_script(
        dir.path(),
        "fail.sh",
        r#"echo "disk full" >&2
echo '{"success": false, "message": "backup failed"}'
exit 2"#,
    );
    let engine = engine_with(&NativeUnitRegistry::new());

    let result = engine
        .execute(&task("fail", &path, InvocationKind::ExternalProcess), &TaskArgs::new())
        .await;

    assert!(!result.success);
    assert!(result.is_failure(FailureKind::Runtime));
    assert_eq!(result.message, "backup failed");
    assert_eq!(result.error.as_deref(), Some("disk full"));
    assert_eq!(result.exit_code, Some(2));
}

#[cfg(unix)]
#[tokio::test]
async fn timeout_kills_the_child() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("pid");
    let path = write_script(
        dir.path(),
        "hang.sh",
        &format!("echo $$ > '{}'\nexec sleep 30", pid_file.display()),
    );
    let mut cfg = engine_config();
    cfg.timeout_ms = 1_000;
    cfg.kill_grace_ms = 200;
    let engine = ExecutionEngine::new(cfg, Arc::new(NativeUnitRegistry::new()));

    let result = engine
        .execute(&task("hang", &path, InvocationKind::ExternalProcess), &TaskArgs::new())
        .await;

    assert!(result.is_failure(FailureKind::Timeout), "{result:?}");
    assert_eq!(result.message, "TimeoutError: Task execution timed out (1 seconds)");
    let pid: u32 = std::fs::read_to_string(&pid_file).unwrap().trim().parse().unwrap();
    assert!(!common::process_alive(pid));
}

#[cfg(unix)]
#[tokio::test]
async fn arguments_are_passed_in_schema_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_script(
        dir.path(),
        "echo_args.sh",
        r#"printf '{"success": true, "message": "%s"}\n' "$*""#,
    );
    let desc = task("echo_args", &path, InvocationKind::ExternalProcess)
        .with_argument(ArgSpec::new("mode").with_choices(["fast", "slow"]).required())
        .with_argument(ArgSpec::new("count").with_type(ArgType::Int).with_default(json!(3)))
        .with_argument(ArgSpec::new("note"));
    let engine = engine_with(&NativeUnitRegistry::new());

    let result = engine
        .execute(&desc, &args(&[("mode", json!("fast")), ("note", json!(""))]))
        .await;

    assert!(result.success, "{result:?}");
    assert_eq!(result.message, "--mode fast --count 3");
}

#[tokio::test]
async fn invalid_arguments_never_launch() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("launched");
    let path = write_script(dir.path(), "guarded.sh", &format!("touch '{}'", marker.display()));
    let desc = task("guarded", &path, InvocationKind::ExternalProcess)
        .with_argument(ArgSpec::new("mode").with_choices(["a", "b"]).required())
        .with_argument(ArgSpec::new("level").with_type(ArgType::Int));
    let engine = engine_with(&NativeUnitRegistry::new());

    let supplied = args(&[("mode", json!("c")), ("level", json!("high")), ("bogus", json!(1))]);
    let result = engine.execute(&desc, &supplied).await;

    assert!(result.is_failure(FailureKind::Validation));
    assert!(result.message.contains("Unknown argument 'bogus'"), "{}", result.message);
    assert!(result.message.contains("must be one of: a, b"), "{}", result.message);
    assert!(result.message.contains("'level'"), "{}", result.message);
    assert!(!marker.exists());
}

#[tokio::test]
async fn background_services_are_rejected() {
    let engine = engine_with(&NativeUnitRegistry::new());
    let desc = task("svc", "/nonexistent/svc.sh", InvocationKind::BackgroundService);
    let result = engine.execute(&desc, &TaskArgs::new()).await;

    assert!(!result.success);
    assert!(result.is_failure(FailureKind::InvalidInvocationKind));
}

#[tokio::test]
async fn missing_program_is_a_launch_error() {
    let engine = engine_with(&NativeUnitRegistry::new());
    let desc = task("ghost", "/nonexistent/ghost", InvocationKind::ExternalProcess);
    let result = engine.execute(&desc, &TaskArgs::new()).await;

    assert!(result.is_failure(FailureKind::Launch), "{result:?}");
}

#[tokio::test]
async fn in_process_call_loads_once_per_file_version() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("count.task");
    std::fs::write(&path, "").unwrap();

    let loads = Arc::new(AtomicUsize::new(0));
    let registry = NativeUnitRegistry::new();
    let counter = loads.clone();
    registry.register(&path, move || {
        counter.fetch_add(1, Ordering::SeqCst);
        let unit = FnUnit::new()
            .entry("main", || Ok(json!({"message": "counted", "total": 7})))
            .entry("broken", || anyhow::bail!("database unreachable"))
            .entry("explode", || panic!("kaboom"));
        Ok(Arc::new(unit) as Arc<dyn CodeUnit>)
    });
    let engine = engine_with(&registry);
    let desc = task("count", &path, InvocationKind::InProcessCall);

    let first = engine.execute(&desc, &TaskArgs::new()).await;
    let second = engine.execute(&desc, &TaskArgs::new()).await;
    assert!(first.success && second.success);
    assert_eq!(first.message, "counted");
    assert_eq!(first.data, Some(json!({"message": "counted", "total": 7})));
    assert_eq!(loads.load(Ordering::SeqCst), 1);
    assert_eq!(engine.cache_stats().cached_units, 1);

    let broken = engine.execute(&desc.clone().with_entry("broken"), &TaskArgs::new()).await;
    assert!(broken.is_failure(FailureKind::Runtime));
    assert!(broken.message.contains("database unreachable"), "{}", broken.message);

    let exploded = engine.execute(&desc.clone().with_entry("explode"), &TaskArgs::new()).await;
    assert!(exploded.is_failure(FailureKind::Runtime));
    assert!(exploded.message.contains("kaboom"), "{}", exploded.message);

    let missing = engine.execute(&desc.clone().with_entry("absent"), &TaskArgs::new()).await;
    assert!(missing.is_failure(FailureKind::Launch));

    assert_eq!(engine.clear_cache(), 1);
    engine.execute(&desc, &TaskArgs::new()).await;
    assert_eq!(loads.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn scripts_run_in_a_fresh_scope_each_time() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("report.task");
    std::fs::write(&path, "").unwrap();

    let registry = NativeUnitRegistry::new();
    registry.register(&path, || {
        let unit = FnUnit::new().body(|scope| {
            let seen = scope.get("runs").and_then(|v| v.as_u64()).unwrap_or(0);
            scope.set("runs", json!(seen + 1));
            let line = format!("runs={} argv={}", seen + 1, scope.argv()[1..].join(" "));
            scope.println(line);
            Ok(())
        });
        Ok(Arc::new(unit) as Arc<dyn CodeUnit>)
    });
    let engine = engine_with(&registry);
    let desc =
        task("report", &path, InvocationKind::InProcessScript).with_argument(ArgSpec::new("day"));

    for _ in 0..2 {
        let result = engine.execute(&desc, &args(&[("day", json!("mon"))])).await;
        assert!(result.success, "{result:?}");
        assert_eq!(result.output.as_deref(), Some("runs=1 argv=--day mon"));
    }
    assert_eq!(engine.cache_stats().cached_units, 0);
}

#[test]
fn blocking_wrapper_runs_outside_a_runtime() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sync.task");
    std::fs::write(&path, "").unwrap();
    let registry = NativeUnitRegistry::new();
    registry.register(&path, || {
        Ok(Arc::new(FnUnit::new().entry("main", || Ok(json!("fine")))) as Arc<dyn CodeUnit>)
    });

    let engine = engine_with(&registry);
    let desc = task("sync", &path, InvocationKind::InProcessCall);
    let result = engine.execute_blocking(&desc, &TaskArgs::new());
    assert!(result.success);
    assert_eq!(result.message, "fine");
}
