use nix::errno::Errno;
use thiserror::Error;

use crate::resolve::ResolveError;
use crate::scheme::SchemeId;

/// Errors returned by descriptor operations.
///
/// Connect-path failures leave no live state behind: the caller may retry
/// with another identifier. I/O failures are surfaced as-is and never retried
/// here.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed worker identifier (empty, too much leading whitespace, NUL).
    #[error("invalid worker identifier: {0}")]
    InvalidIdentifier(String),

    /// No executable matched the identifier.
    #[error("no executable found for {0:?}")]
    NotFound(String),

    #[error("failed to create channel: {0}")]
    ChannelCreation(#[source] Errno),

    #[error("failed to create worker process: {0}")]
    ProcessCreation(#[source] Errno),

    /// The worker process started but could not replace its image.
    #[error("worker exec failed: {0}")]
    ChildExecFailed(#[source] Errno),

    #[error("{operation} is not supported by the {scheme} scheme")]
    Unsupported {
        scheme: SchemeId,
        operation: &'static str,
    },

    #[error("descriptor is not connected")]
    NotConnected,

    #[error("descriptor is already connected")]
    AlreadyConnected,

    /// Send, receive or poll failure. The OS error code is preserved.
    #[error("channel I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out waiting for the worker")]
    TimedOut,

    /// Worker closed the channel before a complete value arrived.
    #[error("worker closed the channel")]
    Closed,

    /// The value could not be serialized; nothing was written.
    #[error("failed to encode value: {0}")]
    Encode(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("malformed value from worker: {0}")]
    Decode(#[from] sexp::DecodeError),
}

impl Error {
    /// Underlying OS error code, when there is one.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::ChannelCreation(e) | Self::ProcessCreation(e) | Self::ChildExecFailed(e) => {
                Some(*e as i32)
            }
            Self::Io(e) => e.raw_os_error(),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut)
    }
}

impl From<ResolveError> for Error {
    fn from(e: ResolveError) -> Self {
        match e {
            ResolveError::InvalidIdentifier(reason) => Self::InvalidIdentifier(reason),
            ResolveError::NotFound(identifier) => Self::NotFound(identifier),
        }
    }
}

impl From<Errno> for Error {
    fn from(e: Errno) -> Self {
        Self::Io(e.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
