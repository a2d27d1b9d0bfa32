//! Waiting for a channel to become readable or writable.

use std::os::fd::BorrowedFd;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};

use crate::error::Result;
use crate::scheme::{Direction, Readiness};

impl Direction {
    fn poll_flags(self) -> PollFlags {
        match self {
            Self::Read => PollFlags::POLLIN,
            Self::Write => PollFlags::POLLOUT,
        }
    }
}

/// Block until `fd` is ready in `direction` or `timeout` elapses.
///
/// `None` and a zero duration both wait indefinitely. Hang-up and error
/// conditions count as ready: the next `send`/`recv` reports them. Signal
/// interruptions resume the wait with whatever time is left.
pub fn wait(fd: BorrowedFd<'_>, direction: Direction, timeout: Option<Duration>) -> Result<Readiness> {
    let deadline = timeout
        .filter(|t| !t.is_zero())
        .map(|t| Instant::now() + t);

    loop {
        let poll_timeout = match deadline {
            None => PollTimeout::NONE,
            Some(deadline) => {
                let left = deadline.saturating_duration_since(Instant::now());
                if left.is_zero() {
                    return Ok(Readiness::TimedOut);
                }
                // Round up so a sub-millisecond remainder does not spin
                i32::try_from(left.as_micros().div_ceil(1000))
                    .ok()
                    .and_then(|millis| PollTimeout::try_from(millis).ok())
                    .unwrap_or(PollTimeout::MAX)
            }
        };

        let mut fds = [PollFd::new(fd, direction.poll_flags())];
        match poll(&mut fds, poll_timeout) {
            // Deadline is rechecked at the top of the loop
            Ok(0) => continue,
            Ok(_) => {
                let revents = fds[0].revents().unwrap_or(PollFlags::empty());
                tracing::trace!(?direction, ?revents, "Channel ready");
                return Ok(Readiness::Ready);
            }
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(e.into()),
        }
    }
}
