//! Scheme contract shared by every transport.
//!
//! A scheme owns the private state behind a [`Descriptor`](crate::Descriptor):
//! how the peer is reached, how bytes move, how the peer is torn down. The
//! descriptor forwards each operation through `dyn Scheme` so callers never
//! see which concrete transport they hold.

use std::fmt;
use std::os::fd::BorrowedFd;
use std::str::FromStr;
use std::time::Duration;

use nix::sys::signal::Signal;
use nix::unistd::Pid;

use crate::config::ConnectOptions;
use crate::error::{Error, Result};
use crate::pipe::PipeScheme;
use crate::writer::{self, Encode};

/// Separator between scheme name and identifier in a descriptor URI.
const URI_SEPARATOR: &str = "://";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchemeId {
    /// Spawned subprocess over a duplex byte stream.
    Pipe,
}

impl SchemeId {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pipe => "pipe",
        }
    }

    /// Fresh, unconnected scheme state.
    pub fn instantiate(self) -> Box<dyn Scheme> {
        match self {
            Self::Pipe => Box::new(PipeScheme::new()),
        }
    }
}

impl fmt::Display for SchemeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SchemeId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pipe" => Ok(Self::Pipe),
            other => Err(Error::InvalidIdentifier(format!("unknown scheme {other:?}"))),
        }
    }
}

/// Split `pipe://probe_file` into its scheme and worker identifier.
pub fn parse_uri(uri: &str) -> Result<(SchemeId, &str)> {
    let (scheme, identifier) = uri
        .split_once(URI_SEPARATOR)
        .ok_or_else(|| Error::InvalidIdentifier(format!("not a descriptor URI: {uri:?}")))?;
    Ok((scheme.parse()?, identifier))
}

/// One I/O direction to wait for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

impl Direction {
    pub const READ_BIT: u8 = 0x01;
    pub const WRITE_BIT: u8 = 0x02;

    /// Convert a raw direction mask.
    ///
    /// # Panics
    ///
    /// Panics unless exactly one of `READ_BIT` and `WRITE_BIT` is set. Asking
    /// for both or neither is a caller bug, not a runtime condition.
    pub fn from_bits(bits: u8) -> Self {
        match bits {
            Self::READ_BIT => Self::Read,
            Self::WRITE_BIT => Self::Write,
            other => panic!("readiness mask {other:#04x} must name exactly one direction"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    TimedOut,
}

impl Readiness {
    pub fn is_ready(self) -> bool {
        self == Self::Ready
    }
}

/// What `close` learned about the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    Exited(i32),
    Signaled(Signal),
    /// Not yet terminated when the single non-blocking check ran. The
    /// process is no longer tracked and will be reaped by whoever waits on it.
    StillRunning { pid: Pid },
}

impl WorkerExit {
    pub fn success(self) -> bool {
        self == Self::Exited(0)
    }

    pub fn code(self) -> Option<i32> {
        match self {
            Self::Exited(code) => Some(code),
            _ => None,
        }
    }
}

impl fmt::Display for WorkerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exited with status {code}"),
            Self::Signaled(sig) => write!(f, "killed by {sig}"),
            Self::StillRunning { pid } => write!(f, "still running as pid {pid}"),
        }
    }
}

/// Operations every transport provides.
///
/// All calls block the caller's thread. Implementations report misuse of the
/// lifecycle (`send` before `connect`, double `close`) as errors.
pub trait Scheme: Send {
    fn id(&self) -> SchemeId;

    fn is_open(&self) -> bool;

    /// Reach the worker named by `identifier`. On error no state is kept.
    fn connect(&mut self, identifier: &str, opts: &ConnectOptions) -> Result<()>;

    /// Adopt an already open bidirectional descriptor.
    fn open_fd(&mut self, fd: BorrowedFd<'_>) -> Result<()>;

    /// Adopt an already open input/output descriptor pair.
    fn open_fd_pair(&mut self, input: BorrowedFd<'_>, output: BorrowedFd<'_>) -> Result<()>;

    fn send(&mut self, buf: &[u8]) -> Result<usize>;

    /// Returns 0 once the worker has closed its end.
    fn recv(&mut self, buf: &mut [u8]) -> Result<usize>;

    fn poll_ready(&mut self, direction: Direction, timeout: Option<Duration>) -> Result<Readiness>;

    fn close(&mut self) -> Result<WorkerExit>;

    /// Encode `value` and send it whole. Nothing is sent if encoding fails.
    fn send_value(&mut self, value: &dyn Encode) -> Result<usize> {
        writer::send_value(self, value)
    }
}
