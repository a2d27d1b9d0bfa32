//! Starting worker processes.
//!
//! ## Safety contracts
//!
//! Between `fork` and `exec` the child may run alongside other threads' locks
//! frozen in an unknown state. Everything it needs (program path, argv,
//! descriptor numbers) is prepared in the parent, and the child only makes
//! async-signal-safe calls: close, open, dup2, fcntl, signal, write, execv
//! and `_exit`. It never returns into caller code.

use std::ffi::{CStr, CString};
use std::io::Read;
use std::os::fd::{AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::ptr;

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::libc;
use nix::sys::signal::{Signal, kill};
use nix::unistd::{ForkResult, Pid, fork, pipe2};

use crate::config::StderrMode;
use crate::error::{Error, Result};
use crate::pipe::reap;
use crate::resolve::ResolvedPath;

/// What to start and how to wire it.
#[derive(Debug, Clone, Copy)]
pub struct WorkerSpec<'a> {
    pub path: &'a ResolvedPath,
    pub stderr: StderrMode,
    /// Wait until the worker image has replaced the forked child.
    pub verify_exec: bool,
}

/// Starts a worker with one end of its channel on stdin and stdout.
pub trait WorkerLauncher: Send + Sync {
    /// `child_end` belongs to the worker and is closed in the caller before
    /// this returns. `parent_end` must not stay open in the worker.
    fn launch(
        &self,
        spec: &WorkerSpec<'_>,
        child_end: OwnedFd,
        parent_end: BorrowedFd<'_>,
    ) -> Result<Pid>;
}

/// `fork` + `execv`, inheriting the caller's environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ForkExec;

impl WorkerLauncher for ForkExec {
    fn launch(
        &self,
        spec: &WorkerSpec<'_>,
        child_end: OwnedFd,
        parent_end: BorrowedFd<'_>,
    ) -> Result<Pid> {
        let program = CString::new(spec.path.as_path().as_os_str().as_bytes())
            .map_err(|_| Error::InvalidIdentifier("contains a NUL byte".to_string()))?;
        let argv: [*const libc::c_char; 2] = [program.as_ptr(), ptr::null()];

        let status_pipe = if spec.verify_exec {
            Some(pipe2(OFlag::O_CLOEXEC).map_err(Error::ChannelCreation)?)
        } else {
            None
        };

        let plan = ChildPlan {
            program: &program,
            argv: &argv,
            channel: child_end.as_raw_fd(),
            parent: parent_end.as_raw_fd(),
            stderr: spec.stderr,
            status: status_pipe.as_ref().map(|(_, w)| w.as_raw_fd()),
        };

        // Safety: the child branch only runs `ChildPlan::exec`, which is
        // restricted to async-signal-safe calls (see module docs).
        match unsafe { fork() } {
            Err(errno) => Err(Error::ProcessCreation(errno)),
            Ok(ForkResult::Child) => unsafe { plan.exec() },
            Ok(ForkResult::Parent { child: pid }) => {
                drop(child_end);
                if let Some((status_read, status_write)) = status_pipe {
                    drop(status_write);
                    let status = read_exec_status(status_read).inspect_err(|e| {
                        tracing::warn!(%pid, error = %e, "Lost worker exec status");
                        abandon(pid);
                    })?;
                    if let Some(errno) = status {
                        tracing::debug!(%pid, %errno, path = %spec.path, "Worker exec failed");
                        reap::wait(pid)?;
                        return Err(Error::ChildExecFailed(errno));
                    }
                }
                Ok(pid)
            }
        }
    }
}

/// Everything the forked child touches, prepared before `fork`.
struct ChildPlan<'a> {
    program: &'a CStr,
    argv: &'a [*const libc::c_char; 2],
    channel: RawFd,
    parent: RawFd,
    stderr: StderrMode,
    status: Option<RawFd>,
}

impl ChildPlan<'_> {
    /// # Safety
    ///
    /// Only call in the child of a `fork`.
    unsafe fn exec(&self) -> ! {
        unsafe {
            libc::close(self.parent);
            // Ignored dispositions survive exec; the worker expects defaults.
            libc::signal(libc::SIGPIPE, libc::SIG_DFL);

            if let Err(errno) = self.redirect() {
                self.fail(errno);
            }
            libc::execv(self.program.as_ptr(), self.argv.as_ptr());
            self.fail(Errno::last())
        }
    }

    unsafe fn redirect(&self) -> std::result::Result<(), Errno> {
        unsafe {
            move_to(self.channel, libc::STDIN_FILENO)?;
            move_to(self.channel, libc::STDOUT_FILENO)?;
            if self.stderr == StderrMode::Discard {
                let null = libc::open(c"/dev/null".as_ptr(), libc::O_WRONLY | libc::O_CLOEXEC);
                if null < 0 {
                    return Err(Errno::last());
                }
                move_to(null, libc::STDERR_FILENO)?;
            }
        }
        Ok(())
    }

    /// Report `errno` to the parent if it is listening, then exit with it.
    unsafe fn fail(&self, errno: Errno) -> ! {
        unsafe {
            if let Some(fd) = self.status {
                let code = (errno as i32).to_ne_bytes();
                libc::write(fd, code.as_ptr().cast(), code.len());
            }
            libc::_exit(errno as i32)
        }
    }
}

/// Make `fd` available as `target` across exec.
///
/// `dup2` onto itself is a no-op that keeps close-on-exec set, so that case
/// clears the flag instead.
unsafe fn move_to(fd: RawFd, target: RawFd) -> std::result::Result<(), Errno> {
    let rc = unsafe {
        if fd == target {
            libc::fcntl(fd, libc::F_SETFD, 0)
        } else {
            libc::dup2(fd, target)
        }
    };
    if rc < 0 { Err(Errno::last()) } else { Ok(()) }
}

/// Kill and reap a child whose exec outcome is unknown.
fn abandon(pid: Pid) {
    if let Err(errno) = kill(pid, Signal::SIGKILL) {
        tracing::debug!(%pid, %errno, "Kill of abandoned worker failed");
    }
    if let Err(e) = reap::wait(pid) {
        tracing::warn!(%pid, error = %e, "Abandoned worker was not reaped");
    }
}

/// EOF without data means exec succeeded and closed the write end.
fn read_exec_status(read_end: OwnedFd) -> Result<Option<Errno>> {
    let mut file = std::fs::File::from(read_end);
    let mut buf = Vec::with_capacity(4);
    file.read_to_end(&mut buf)?;
    Ok(match <[u8; 4]>::try_from(buf.as_slice()) {
        Ok(code) => Some(Errno::from_raw(i32::from_ne_bytes(code))),
        Err(_) => None,
    })
}
