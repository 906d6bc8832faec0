//! OS-level grouping of a child and all of its descendants, so that they can
//! be signalled together and die with the supervisor.

pub use imp::ProcessGroup;

#[cfg(unix)]
mod imp {
    use std::io;

    use tokio::process::{Child, Command};

    use crate::process::Signal;

    /// Unix process group led by the child (`pgid == pid`).
    #[derive(Debug)]
    pub struct ProcessGroup {
        pgid: i32,
    }

    impl ProcessGroup {
        /// Detached children get their own session (no controlling terminal);
        /// others only their own process group. On Linux the child is also
        /// killed when the spawning thread goes away, so long-lived children
        /// are spawned through a [`crate::process::Launcher`].
        pub fn configure(cmd: &mut Command, detached: bool) {
            // SAFETY: only async-signal-safe libc calls between fork and exec.
            unsafe {
                cmd.pre_exec(move || {
                    let rc = if detached {
                        libc::setsid()
                    } else {
                        libc::setpgid(0, 0)
                    };
                    if rc == -1 {
                        return Err(io::Error::last_os_error());
                    }
                    #[cfg(target_os = "linux")]
                    {
                        let sig = libc::SIGKILL as libc::c_ulong;
                        if libc::prctl(libc::PR_SET_PDEATHSIG, sig) == -1 {
                            return Err(io::Error::last_os_error());
                        }
                    }
                    Ok(())
                });
            }
        }

        pub fn attach(child: &Child) -> io::Result<Self> {
            let pid = child.id().ok_or_else(|| {
                io::Error::new(io::ErrorKind::Other, "child exited before grouping")
            })?;
            Ok(Self { pgid: pid as i32 })
        }

        pub fn signal(&self, signal: Signal) -> io::Result<()> {
            let sig = match signal {
                Signal::Term => libc::SIGTERM,
                Signal::Kill => libc::SIGKILL,
            };
            // SAFETY: plain syscall on a pgid we created.
            let rc = unsafe { libc::kill(-self.pgid, sig) };
            if rc == -1 {
                let err = io::Error::last_os_error();
                if err.raw_os_error() == Some(libc::ESRCH) {
                    return Ok(());
                }
                return Err(err);
            }
            Ok(())
        }
    }
}

#[cfg(windows)]
mod imp {
    use std::io;
    use std::mem::size_of;

    use tokio::process::{Child, Command};
    use windows::core::PCWSTR;
    use windows::Win32::Foundation::{CloseHandle, HANDLE};
    use windows::Win32::System::Console::{GenerateConsoleCtrlEvent, CTRL_BREAK_EVENT};
    use windows::Win32::System::JobObjects::{
        AssignProcessToJobObject, CreateJobObjectW, JobObjectExtendedLimitInformation,
        SetInformationJobObject, TerminateJobObject, JOBOBJECT_EXTENDED_LIMIT_INFORMATION,
        JOB_OBJECT_LIMIT_BREAKAWAY_OK, JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE,
    };

    use crate::process::Signal;

    const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
    const DETACHED_PROCESS: u32 = 0x0000_0008;
    const CREATE_NO_WINDOW: u32 = 0x0800_0000;

    struct JobHandle(HANDLE);

    // SAFETY: a job handle is a kernel object reference usable from any thread.
    unsafe impl Send for JobHandle {}
    unsafe impl Sync for JobHandle {}

    impl Drop for JobHandle {
        fn drop(&mut self) {
            // Closing the last handle kills every process still in the job.
            unsafe {
                let _ = CloseHandle(self.0);
            }
        }
    }

    /// Win32 Job Object with kill-on-close, plus the console process group id.
    pub struct ProcessGroup {
        pid: u32,
        job: Option<JobHandle>,
    }

    impl std::fmt::Debug for ProcessGroup {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("ProcessGroup")
                .field("pid", &self.pid)
                .field("job", &self.job.is_some())
                .finish()
        }
    }

    impl ProcessGroup {
        pub fn configure(cmd: &mut Command, detached: bool) {
            let flags = if detached {
                CREATE_NEW_PROCESS_GROUP | DETACHED_PROCESS | CREATE_NO_WINDOW
            } else {
                CREATE_NEW_PROCESS_GROUP | CREATE_NO_WINDOW
            };
            cmd.creation_flags(flags);
        }

        pub fn attach(child: &Child) -> io::Result<Self> {
            let pid = child.id().ok_or_else(|| {
                io::Error::new(io::ErrorKind::Other, "child exited before grouping")
            })?;
            let job = match child.raw_handle() {
                Some(raw) => match create_job(HANDLE(raw)) {
                    Ok(job) => Some(job),
                    Err(e) => {
                        tracing::warn!(pid, error = %e, "failed to create job object");
                        None
                    }
                },
                None => None,
            };
            Ok(Self { pid, job })
        }

        pub fn signal(&self, signal: Signal) -> io::Result<()> {
            match signal {
                Signal::Term => {
                    let sent = unsafe { GenerateConsoleCtrlEvent(CTRL_BREAK_EVENT, self.pid) };
                    if let Err(e) = sent {
                        tracing::debug!(
                            pid = self.pid,
                            error = %e,
                            "CTRL_BREAK failed, terminating job"
                        );
                        return self.signal(Signal::Kill);
                    }
                    Ok(())
                }
                Signal::Kill => match self.job.as_ref() {
                    Some(job) => unsafe { TerminateJobObject(job.0, 1) }
                        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string())),
                    None => Ok(()),
                },
            }
        }
    }

    fn create_job(process: HANDLE) -> windows::core::Result<JobHandle> {
        unsafe {
            let job = JobHandle(CreateJobObjectW(None, PCWSTR::null())?);
            let mut info = JOBOBJECT_EXTENDED_LIMIT_INFORMATION::default();
            info.BasicLimitInformation.LimitFlags =
                JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE | JOB_OBJECT_LIMIT_BREAKAWAY_OK;
            SetInformationJobObject(
                job.0,
                JobObjectExtendedLimitInformation,
                &info as *const _ as *const core::ffi::c_void,
                size_of::<JOBOBJECT_EXTENDED_LIMIT_INFORMATION>() as u32,
            )?;
            AssignProcessToJobObject(job.0, process)?;
            Ok(job)
        }
    }
}
