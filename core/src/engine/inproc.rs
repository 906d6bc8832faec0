//! In-process invocation: cached entry-function calls and isolated script bodies.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;

use serde_json::Value;

use crate::task::{TaskDescriptor, ValidatedArgs};

use super::cache::UnitCache;
use super::result::{non_empty, ExecutionResult, FailureKind};
use super::unit::{ScriptScope, UnitLoader};

const DEFAULT_MESSAGE: &str = "Task executed successfully";

/// Calls the descriptor's entry function on the cached unit. Runs on the
/// blocking pool; the unit's code is not preemptible.
pub(super) async fn run_call(
    desc: &TaskDescriptor,
    loader: Arc<dyn UnitLoader>,
    cache: Arc<UnitCache>,
) -> ExecutionResult {
    let path = desc.path.clone();
    let entry = desc.entry_name().to_string();
    let name = desc.name.clone();

    let joined = tokio::task::spawn_blocking(move || {
        let unit = match cache.get_or_load(&path, loader.as_ref()) {
            Ok(unit) => unit,
            Err(e) => return load_failed(&name, &path, &e),
        };
        if !unit.has_entry(&entry) {
            return ExecutionResult::failed(
                FailureKind::Launch,
                format!("entry function '{entry}' not found in {}", path.display()),
            );
        }

        match panic::catch_unwind(AssertUnwindSafe(|| unit.call(&entry))) {
            Ok(Ok(value)) => normalize(value),
            Ok(Err(e)) => {
                let message = format!("Function execution failed: {e:#}");
                ExecutionResult::failed(FailureKind::Runtime, message)
                    .with_error(Some(format!("{e:?}")))
            }
            Err(payload) => ExecutionResult::failed(
                FailureKind::Runtime,
                format!("Function execution failed: {}", panic_message(payload.as_ref())),
            ),
        }
    })
    .await;

    joined.unwrap_or_else(worker_failed)
}

/// Runs the unit's top-level body in a fresh scope. The unit is loaded anew on
/// every call so no state carries over between runs.
pub(super) async fn run_script(
    desc: &TaskDescriptor,
    args: &ValidatedArgs,
    loader: Arc<dyn UnitLoader>,
) -> ExecutionResult {
    let path = desc.path.clone();
    let name = desc.name.clone();
    let mut argv = vec![path.display().to_string()];
    argv.extend(args.to_argv());

    let joined = tokio::task::spawn_blocking(move || {
        let unit = match loader.load(&path) {
            Ok(unit) => unit,
            Err(e) => return load_failed(&name, &path, &e),
        };

        let mut scope = ScriptScope::new(argv);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| unit.run_body(&mut scope)));
        let output = non_empty(scope.output());
        match outcome {
            Ok(Ok(())) => ExecutionResult::ok(DEFAULT_MESSAGE).with_output(output),
            Ok(Err(e)) => {
                let message = format!("Script execution failed: {e:#}");
                ExecutionResult::failed(FailureKind::Runtime, message)
                    .with_output(output)
                    .with_error(Some(format!("{e:?}")))
            }
            Err(payload) => ExecutionResult::failed(
                FailureKind::Runtime,
                format!("Script execution failed: {}", panic_message(payload.as_ref())),
            )
            .with_output(output),
        }
    })
    .await;

    joined.unwrap_or_else(worker_failed)
}

fn load_failed(task: &str, path: &Path, e: &anyhow::Error) -> ExecutionResult {
    let error = format!("{e:#}");
    tracing::error!(task = %task, path = %path.display(), error = %error, "failed to load unit");
    let message = format!("could not load {}: {error}", path.display());
    ExecutionResult::failed(FailureKind::Launch, message)
}

fn worker_failed(e: tokio::task::JoinError) -> ExecutionResult {
    ExecutionResult::failed(FailureKind::Runtime, format!("worker task failed: {e}"))
}

/// Maps an entry function's return value onto a result.
pub(super) fn normalize(value: Value) -> ExecutionResult {
    match value {
        Value::Null => ExecutionResult::ok(DEFAULT_MESSAGE),
        Value::Object(map) => {
            let success = map.get("success").and_then(Value::as_bool).unwrap_or(true);
            let message = map
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or(DEFAULT_MESSAGE)
                .to_string();
            let output = map.get("output").and_then(Value::as_str).and_then(non_empty);
            let error = map.get("error").and_then(Value::as_str).and_then(non_empty);
            let base = if success {
                ExecutionResult::ok(message)
            } else {
                ExecutionResult {
                    success: false,
                    message,
                    failure: Some(FailureKind::Runtime),
                    ..ExecutionResult::ok("")
                }
            };
            base.with_data(Some(Value::Object(map)))
                .with_output(output)
                .with_error(error)
        }
        Value::String(s) => ExecutionResult::ok(s),
        Value::Bool(true) => ExecutionResult::ok(DEFAULT_MESSAGE),
        Value::Bool(false) => ExecutionResult {
            success: false,
            message: "Task execution failed".to_string(),
            failure: Some(FailureKind::Runtime),
            ..ExecutionResult::ok("")
        },
        other => ExecutionResult::ok(other.to_string()),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalizes_entry_return_values() {
        let r = normalize(Value::Null);
        assert!(r.success);
        assert_eq!(r.message, DEFAULT_MESSAGE);

        let r = normalize(json!({"message": "done", "count": 2}));
        assert!(r.success);
        assert_eq!(r.message, "done");
        assert_eq!(r.data, Some(json!({"message": "done", "count": 2})));

        let r = normalize(json!({"success": false, "message": "nope"}));
        assert!(!r.success);
        assert!(r.is_failure(FailureKind::Runtime));
        assert_eq!(r.message, "nope");

        assert_eq!(normalize(json!("hello")).message, "hello");
        assert!(!normalize(json!(false)).success);
        assert_eq!(normalize(json!(42)).message, "42");
        assert_eq!(normalize(json!([1, 2])).message, "[1,2]");
    }

    #[test]
    fn panic_payloads_are_readable() {
        let payload = panic::catch_unwind(|| panic!("boom")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "panicked: boom");
        let payload = panic::catch_unwind(|| panic!("{}", String::from("x"))).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "panicked: x");
    }
}
