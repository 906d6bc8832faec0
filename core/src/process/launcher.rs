//! A dedicated thread that forks long-lived children.
//!
//! On Linux the parent-death signal of a child fires when the thread that
//! forked it exits, not the whole process. Services therefore must not be
//! forked from whatever thread happens to call in (a blocking-pool thread may
//! retire minutes later); they are forked here instead, and die with this
//! thread once its owner drops the last [`Launcher`] handle.

use std::io;
use std::sync::mpsc;

use super::child::{ProcessSpec, TaskProcess};

struct Request {
    spec: ProcessSpec,
    reply: mpsc::SyncSender<io::Result<TaskProcess>>,
}

#[derive(Debug)]
pub struct Launcher {
    requests: mpsc::Sender<Request>,
}

impl Launcher {
    /// Starts the launcher thread. Must be called inside a tokio runtime; the
    /// thread spawns every child within that runtime's context.
    pub fn start(name: &str) -> io::Result<Self> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        let (requests, rx) = mpsc::channel::<Request>();
        std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let _ctx = runtime.enter();
                while let Ok(req) = rx.recv() {
                    let _ = req.reply.send(TaskProcess::spawn(&req.spec));
                }
                tracing::debug!("launcher thread exiting");
            })?;
        Ok(Self { requests })
    }

    /// Forks `spec` on the launcher thread and waits for the result.
    pub fn spawn(&self, spec: &ProcessSpec) -> io::Result<TaskProcess> {
        let (reply, result) = mpsc::sync_channel(1);
        self.requests
            .send(Request {
                spec: spec.clone(),
                reply,
            })
            .map_err(|_| gone())?;
        result.recv().map_err(|_| gone())?
    }
}

fn gone() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "launcher thread is gone")
}

#[cfg(all(test, unix))]
mod tests {
    use std::collections::HashMap;
    use std::path::Path;
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn spawns_and_reports_failures() {
        let launcher = Launcher::start("launcher-test").unwrap();

        let argv = vec!["-c".to_string(), "exit 4".to_string()];
        let spec = ProcessSpec::for_task(Path::new("/bin/sh"), argv, &HashMap::new());
        let mut proc = launcher.spawn(&spec).unwrap();
        let exit = tokio::time::timeout(Duration::from_secs(5), proc.wait())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(exit.code, Some(4));

        let missing = Path::new("/nonexistent/taskcue-bin");
        let missing = ProcessSpec::for_task(missing, Vec::new(), &HashMap::new());
        assert!(launcher.spawn(&missing).is_err());
    }

    #[test]
    fn requires_a_runtime() {
        assert!(Launcher::start("no-runtime").is_err());
    }
}
