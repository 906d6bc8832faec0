use std::time::Duration;

use crate::config::EngineConfig;
use crate::process::io_pump::{self, LineStream};
use crate::process::{ProcessSpec, TaskProcess};
use crate::task::{TaskDescriptor, ValidatedArgs};
use crate::util::RingBytes;

use super::protocol;
use super::result::{non_empty, ExecutionResult, FailureKind};

/// How long the pumps may keep draining after the child is gone. A grandchild
/// that inherited the pipes must not hold the execution hostage.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

pub(super) async fn run_external(
    desc: &TaskDescriptor,
    args: &ValidatedArgs,
    cfg: &EngineConfig,
) -> ExecutionResult {
    let spec = ProcessSpec::for_task(&desc.path, args.to_argv(), &cfg.interpreters);

    let mut proc = match TaskProcess::spawn(&spec) {
        Ok(p) => p,
        Err(e) => {
            tracing::error!(task = %desc.name, cmd = %spec.display(), error = %e, "spawn failed");
            return ExecutionResult::failed(
                FailureKind::Launch,
                format!("could not start '{}': {e}", spec.display()),
            );
        }
    };
    let pid = proc.pid();

    let ring_out = RingBytes::new(cfg.capture_bytes);
    let ring_err = RingBytes::new(cfg.capture_bytes);
    let out_task = proc
        .take_stdout()
        .map(|rd| io_pump::pump(rd, Some(ring_out.clone()), None, LineStream::Stdout));
    let err_task = proc
        .take_stderr()
        .map(|rd| io_pump::pump(rd, Some(ring_err.clone()), None, LineStream::Stderr));

    let budget = Duration::from_millis(cfg.timeout_ms);
    let (exit, timed_out) = match tokio::time::timeout(budget, proc.wait()).await {
        Ok(Ok(exit)) => (exit, false),
        Ok(Err(e)) => {
            tracing::error!(task = %desc.name, pid, error = %e, "wait failed");
            let _ = proc.shutdown(Duration::ZERO).await;
            let message = format!("lost track of process {pid}: {e}");
            return ExecutionResult::failed(FailureKind::Runtime, message);
        }
        Err(_) => {
            tracing::warn!(
                task = %desc.name,
                pid,
                timeout_ms = cfg.timeout_ms,
                "execution timed out, terminating"
            );
            match proc.shutdown(Duration::from_millis(cfg.kill_grace_ms)).await {
                Ok((exit, _graceful)) => (exit, true),
                Err(e) => {
                    tracing::error!(
                        task = %desc.name,
                        pid,
                        error = %e,
                        "failed to terminate timed-out process"
                    );
                    return ExecutionResult::failed(
                        FailureKind::Timeout,
                        format!(
                            "Task execution timed out ({}) and could not be terminated: {e}",
                            fmt_budget(budget)
                        ),
                    );
                }
            }
        }
    };

    for task in [out_task, err_task].into_iter().flatten() {
        let abort = task.abort_handle();
        if tokio::time::timeout(DRAIN_TIMEOUT, task).await.is_err() {
            abort.abort();
        }
    }

    let stdout = ring_out.to_string_lossy();
    let stderr = ring_err.to_string_lossy();

    if timed_out {
        return ExecutionResult::failed(
            FailureKind::Timeout,
            format!("Task execution timed out ({})", fmt_budget(budget)),
        )
        .with_output(non_empty(&stdout))
        .with_error(non_empty(&stderr))
        .with_exit_code(exit.reported_code());
    }

    protocol::interpret(&stdout, &stderr, exit)
}

fn fmt_budget(budget: Duration) -> String {
    if budget.subsec_millis() == 0 {
        format!("{} seconds", budget.as_secs())
    } else {
        format!("{} ms", budget.as_millis())
    }
}
