use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, ChildStderr, ChildStdout, Command};

use super::group::ProcessGroup;
use super::types::{ExitInfo, Signal};

/// What to launch. Built from a task file plus its serialized arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// No controlling terminal/console; used for background services.
    pub detached: bool,
}

impl ProcessSpec {
    /// Runs `path` through the interpreter registered for its extension, or
    /// directly when none is registered.
    pub fn for_task(
        path: &Path,
        argv: Vec<String>,
        interpreters: &HashMap<String, String>,
    ) -> Self {
        let interpreter = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .and_then(|e| interpreters.get(&e));

        let (program, args) = match interpreter {
            Some(interp) => {
                let mut args = Vec::with_capacity(argv.len() + 1);
                args.push(path.to_string_lossy().into_owned());
                args.extend(argv);
                (PathBuf::from(interp), args)
            }
            None => (path.to_path_buf(), argv),
        };

        Self {
            program,
            args,
            cwd: path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(Path::to_path_buf),
            detached: false,
        }
    }

    pub fn detached(mut self) -> Self {
        self.detached = true;
        self
    }

    pub fn display(&self) -> String {
        let mut s = self.program.to_string_lossy().into_owned();
        for a in &self.args {
            s.push(' ');
            s.push_str(a);
        }
        s
    }
}

/// A spawned child living in its own process group (Unix) or job object (Windows).
///
/// Dropping it kills the child.
#[derive(Debug)]
pub struct TaskProcess {
    child: Child,
    pid: u32,
    group: ProcessGroup,
}

impl TaskProcess {
    pub fn spawn(spec: &ProcessSpec) -> io::Result<Self> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = spec.cwd.as_ref() {
            cmd.current_dir(cwd);
        }
        ProcessGroup::configure(&mut cmd, spec.detached);

        let child = cmd.spawn()?;
        let group = ProcessGroup::attach(&child)?;
        let pid = child.id().unwrap_or_default();
        tracing::debug!(pid, cmd = %spec.display(), detached = spec.detached, "process spawned");

        Ok(Self { child, pid, group })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    pub fn signal(&mut self, signal: Signal) -> io::Result<()> {
        let grouped = self.group.signal(signal);
        if signal == Signal::Kill {
            // Covers the leader when the group could not be created.
            let _ = self.child.start_kill();
        }
        grouped
    }

    pub async fn wait(&mut self) -> io::Result<ExitInfo> {
        Ok(self.child.wait().await?.into())
    }

    pub fn try_wait(&mut self) -> io::Result<Option<ExitInfo>> {
        Ok(self.child.try_wait()?.map(ExitInfo::from))
    }

    /// Graceful-then-forceful stop. Returns the exit and whether the child
    /// left within `grace`.
    pub async fn shutdown(&mut self, grace: Duration) -> io::Result<(ExitInfo, bool)> {
        if let Some(exit) = self.try_wait()? {
            return Ok((exit, true));
        }

        if let Err(e) = self.signal(Signal::Term) {
            tracing::warn!(pid = self.pid, error = %e, "graceful termination request failed");
        }

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(status) => Ok((status?.into(), true)),
            Err(_) => {
                let grace_ms = grace.as_millis() as u64;
                tracing::warn!(pid = self.pid, grace_ms, "grace expired, killing");
                self.signal(Signal::Kill)?;
                let status = self.child.wait().await?;
                Ok((status.into(), false))
            }
        }
    }
}
