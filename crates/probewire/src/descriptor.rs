use std::fmt;
use std::os::fd::BorrowedFd;
use std::time::Duration;

use uuid::Uuid;

use crate::config::ConnectOptions;
use crate::error::Result;
use crate::scheme::{self, Direction, Readiness, Scheme, SchemeId, WorkerExit};
use crate::writer::Encode;

/// Identifies a descriptor in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorId(Uuid);

impl DescriptorId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for DescriptorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Scheme-agnostic handle to one worker.
///
/// Operations take `&mut self`, so a descriptor is used by one thread at a
/// time. It can be moved between threads. Dropping an open descriptor tears
/// the worker down the same way `close` does.
pub struct Descriptor {
    id: DescriptorId,
    scheme: Box<dyn Scheme>,
}

impl Descriptor {
    pub fn new(scheme: SchemeId) -> Self {
        Self::with_scheme(scheme.instantiate())
    }

    pub fn with_scheme(scheme: Box<dyn Scheme>) -> Self {
        Self {
            id: DescriptorId::new(),
            scheme,
        }
    }

    /// Create and connect a descriptor from `scheme://identifier`.
    pub fn connect_uri(uri: &str, opts: &ConnectOptions) -> Result<Self> {
        let (scheme, identifier) = scheme::parse_uri(uri)?;
        let mut desc = Self::new(scheme);
        desc.connect(identifier, opts)?;
        Ok(desc)
    }

    pub fn id(&self) -> DescriptorId {
        self.id
    }

    pub fn scheme(&self) -> SchemeId {
        self.scheme.id()
    }

    pub fn is_open(&self) -> bool {
        self.scheme.is_open()
    }

    pub fn connect(&mut self, identifier: &str, opts: &ConnectOptions) -> Result<()> {
        let span = tracing::debug_span!("connect", descriptor = %self.id, scheme = %self.scheme());
        let _enter = span.enter();
        self.scheme.connect(identifier, opts).inspect_err(|e| {
            tracing::debug!(identifier, error = %e, "Connect failed");
        })
    }

    pub fn open_fd(&mut self, fd: BorrowedFd<'_>) -> Result<()> {
        self.scheme.open_fd(fd)
    }

    pub fn open_fd_pair(&mut self, input: BorrowedFd<'_>, output: BorrowedFd<'_>) -> Result<()> {
        self.scheme.open_fd_pair(input, output)
    }

    pub fn send(&mut self, buf: &[u8]) -> Result<usize> {
        self.scheme.send(buf)
    }

    pub fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.scheme.recv(buf)
    }

    pub fn send_value(&mut self, value: &dyn Encode) -> Result<usize> {
        self.scheme.send_value(value)
    }

    pub fn poll_ready(&mut self, direction: Direction, timeout: Option<Duration>) -> Result<Readiness> {
        self.scheme.poll_ready(direction, timeout)
    }

    pub fn close(&mut self) -> Result<WorkerExit> {
        let span = tracing::debug_span!("close", descriptor = %self.id);
        let _enter = span.enter();
        self.scheme.close()
    }
}

impl fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Descriptor")
            .field("id", &self.id)
            .field("scheme", &self.scheme())
            .field("open", &self.is_open())
            .finish()
    }
}
