//! Process-channel scheme: one worker subprocess per descriptor, talking over
//! a Unix stream socket pair mapped onto the worker's stdin and stdout.
//!
//! Lifecycle is `Unconnected -> Connected -> Closed`. Every resource taken
//! during connect is an owned value, so any early return releases exactly
//! what was acquired so far.

mod launch;
pub(crate) mod reap;

use std::mem;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};
use std::time::Duration;

use nix::sys::socket::{self, AddressFamily, MsgFlags, SockFlag, SockType};
use nix::unistd::Pid;

pub use launch::{ForkExec, WorkerLauncher, WorkerSpec};

use crate::config::{ConnectOptions, ReapPolicy};
use crate::error::{Error, Result};
use crate::readiness;
use crate::resolve::ResolvedPath;
use crate::scheme::{Direction, Readiness, Scheme, SchemeId, WorkerExit};

/// Live connection to a worker.
struct Connection {
    pid: Pid,
    channel: OwnedFd,
    path: ResolvedPath,
    reap_policy: ReapPolicy,
}

enum State {
    Unconnected,
    Connected(Connection),
    Closed,
}

pub struct PipeScheme {
    state: State,
}

impl Default for PipeScheme {
    fn default() -> Self {
        Self::new()
    }
}

impl PipeScheme {
    pub fn new() -> Self {
        Self {
            state: State::Unconnected,
        }
    }

    /// Worker process id while connected.
    pub fn pid(&self) -> Option<Pid> {
        self.connection().map(|c| c.pid)
    }

    /// Executable the worker was started from while connected.
    pub fn path(&self) -> Option<&ResolvedPath> {
        self.connection().map(|c| &c.path)
    }

    /// Parent end of the channel while connected.
    pub fn channel(&self) -> Option<BorrowedFd<'_>> {
        self.connection().map(|c| c.channel.as_fd())
    }

    fn connection(&self) -> Option<&Connection> {
        match &self.state {
            State::Connected(conn) => Some(conn),
            _ => None,
        }
    }

    fn connected(&self) -> Result<&Connection> {
        self.connection().ok_or(Error::NotConnected)
    }

    fn unsupported(operation: &'static str) -> Error {
        Error::Unsupported {
            scheme: SchemeId::Pipe,
            operation,
        }
    }
}

impl Scheme for PipeScheme {
    fn id(&self) -> SchemeId {
        SchemeId::Pipe
    }

    fn is_open(&self) -> bool {
        matches!(self.state, State::Connected(_))
    }

    fn connect(&mut self, identifier: &str, opts: &ConnectOptions) -> Result<()> {
        match self.state {
            State::Unconnected => {}
            State::Connected(_) => return Err(Error::AlreadyConnected),
            State::Closed => return Err(Error::NotConnected),
        }

        let path = opts.resolver().resolve(identifier)?;

        let (parent_end, child_end) = socket::socketpair(
            AddressFamily::Unix,
            SockType::Stream,
            None,
            SockFlag::SOCK_CLOEXEC,
        )
        .map_err(Error::ChannelCreation)?;

        let spec = WorkerSpec {
            path: &path,
            stderr: opts.stderr,
            verify_exec: opts.verify_exec,
        };
        let pid = opts.launcher.launch(&spec, child_end, parent_end.as_fd())?;

        tracing::debug!(
            %pid,
            path = %path,
            fd = parent_end.as_raw_fd(),
            "Connected to worker"
        );

        self.state = State::Connected(Connection {
            pid,
            channel: parent_end,
            path,
            reap_policy: opts.reap_policy,
        });
        Ok(())
    }

    fn open_fd(&mut self, _fd: BorrowedFd<'_>) -> Result<()> {
        Err(Self::unsupported("open_fd"))
    }

    fn open_fd_pair(&mut self, _input: BorrowedFd<'_>, _output: BorrowedFd<'_>) -> Result<()> {
        Err(Self::unsupported("open_fd_pair"))
    }

    fn send(&mut self, buf: &[u8]) -> Result<usize> {
        let conn = self.connected()?;
        // MSG_NOSIGNAL: a dead worker surfaces as EPIPE, not SIGPIPE
        let n = socket::send(conn.channel.as_raw_fd(), buf, MsgFlags::MSG_NOSIGNAL)?;
        tracing::trace!(pid = %conn.pid, bytes = n, "send");
        Ok(n)
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        let conn = self.connected()?;
        let n = socket::recv(conn.channel.as_raw_fd(), buf, MsgFlags::empty())?;
        tracing::trace!(pid = %conn.pid, bytes = n, "recv");
        Ok(n)
    }

    fn poll_ready(&mut self, direction: Direction, timeout: Option<Duration>) -> Result<Readiness> {
        let conn = self.connected()?;
        readiness::wait(conn.channel.as_fd(), direction, timeout)
    }

    fn close(&mut self) -> Result<WorkerExit> {
        let conn = match mem::replace(&mut self.state, State::Closed) {
            State::Connected(conn) => conn,
            previous => {
                self.state = previous;
                return Err(Error::NotConnected);
            }
        };

        let Connection {
            pid,
            channel,
            path,
            reap_policy,
        } = conn;
        // Worker sees EOF on stdin
        drop(channel);

        let exit = reap::reap(pid, reap_policy)?;
        tracing::debug!(%pid, path = %path, %exit, "Closed worker channel");
        Ok(exit)
    }
}

impl Drop for PipeScheme {
    fn drop(&mut self) {
        if !self.is_open() {
            return;
        }
        let pid = self.pid();
        match self.close() {
            Ok(WorkerExit::StillRunning { pid }) => {
                tracing::debug!(%pid, "Dropped descriptor left worker running");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(pid = ?pid, error = %e, "Failed to tear down worker on drop");
            }
        }
    }
}

/// Write lock while a test writes an executable, read lock around each fork.
/// A child forked mid-write holds the write descriptor until its own exec and
/// would make exec of that file fail with `ETXTBSY`.
#[cfg(test)]
pub(crate) static TEST_EXECUTABLES: std::sync::RwLock<()> = std::sync::RwLock::new(());

#[cfg(test)]
pub(crate) fn test_fork_guard() -> std::sync::RwLockReadGuard<'static, ()> {
    TEST_EXECUTABLES
        .read()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}
