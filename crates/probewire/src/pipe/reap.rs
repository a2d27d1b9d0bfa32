//! Collecting worker exit status.

use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;

use crate::config::ReapPolicy;
use crate::error::Result;
use crate::scheme::WorkerExit;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

pub(crate) fn reap(pid: Pid, policy: ReapPolicy) -> Result<WorkerExit> {
    match policy {
        ReapPolicy::NonBlocking => Ok(try_reap(pid)?.unwrap_or(WorkerExit::StillRunning { pid })),
        ReapPolicy::Grace(grace) => {
            let deadline = Instant::now() + grace;
            loop {
                if let Some(exit) = try_reap(pid)? {
                    return Ok(exit);
                }
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                std::thread::sleep(POLL_INTERVAL.min(deadline - now));
            }

            tracing::warn!(%pid, ?grace, "Worker still running after grace period, killing");
            match signal::kill(pid, Signal::SIGKILL) {
                // Exited between the last check and the kill
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(e) => return Err(e.into()),
            }
            wait(pid)
        }
    }
}

fn try_reap(pid: Pid) -> Result<Option<WorkerExit>> {
    loop {
        match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(status) => return Ok(exit_of(status)),
            Err(Errno::EINTR) => {}
            Err(e) => return Err(e.into()),
        }
    }
}

/// Blocking wait for a worker that is known to be terminating.
pub(crate) fn wait(pid: Pid) -> Result<WorkerExit> {
    loop {
        match waitpid(pid, None) {
            Ok(status) => {
                if let Some(exit) = exit_of(status) {
                    return Ok(exit);
                }
            }
            Err(Errno::EINTR) => {}
            Err(e) => return Err(e.into()),
        }
    }
}

fn exit_of(status: WaitStatus) -> Option<WorkerExit> {
    match status {
        WaitStatus::Exited(_, code) => Some(WorkerExit::Exited(code)),
        WaitStatus::Signaled(_, sig, _) => Some(WorkerExit::Signaled(sig)),
        _ => None,
    }
}
