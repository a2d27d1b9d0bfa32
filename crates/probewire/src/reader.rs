//! Reading whole values back from a worker.
//!
//! `recv` is unframed: one call may return part of a value or several values.
//! [`ValueReader`] keeps the leftover bytes between calls and hands out one
//! decoded value at a time. A [`Framer`] tracks how much of the next value
//! has arrived, so each value is decoded once.

use std::io;
use std::time::{Duration, Instant};

use sexp::{Decoder, Framer, Sexp};

use crate::descriptor::Descriptor;
use crate::error::{Error, Result};
use crate::scheme::{Direction, Readiness};

const READ_CHUNK: usize = 4096;

#[derive(Debug)]
pub struct ValueReader {
    buf: Vec<u8>,
    decoder: Decoder,
    framer: Framer,
}

impl Default for ValueReader {
    fn default() -> Self {
        Self::with_decoder(Decoder::new())
    }
}

impl ValueReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use custom decoder limits.
    pub fn with_decoder(decoder: Decoder) -> Self {
        Self {
            buf: Vec::new(),
            framer: decoder.framer(),
            decoder,
        }
    }

    /// Bytes received but not yet returned as a value.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Next value from `desc`.
    ///
    /// `timeout` bounds the whole call; `None` or zero waits indefinitely.
    /// After a `Decode` error the stream position is lost and the descriptor
    /// should be closed.
    pub fn read_value(&mut self, desc: &mut Descriptor, timeout: Option<Duration>) -> Result<Sexp> {
        let deadline = timeout
            .filter(|t| !t.is_zero())
            .map(|t| Instant::now() + t);
        let mut chunk = [0u8; READ_CHUNK];

        loop {
            if let Some(len) = self.framer.frame_len(&self.buf) {
                self.framer.reset();
                if let Some((value, used)) = self.decoder.decode(&self.buf[..len])? {
                    self.buf.drain(..used);
                    tracing::trace!(bytes = used, "Decoded value");
                    return Ok(value);
                }
            }

            let wait = match deadline {
                None => None,
                Some(deadline) => {
                    let left = deadline.saturating_duration_since(Instant::now());
                    if left.is_zero() {
                        return Err(Error::TimedOut);
                    }
                    Some(left)
                }
            };
            if desc.poll_ready(Direction::Read, wait)? == Readiness::TimedOut {
                return Err(Error::TimedOut);
            }

            let n = match desc.recv(&mut chunk) {
                Ok(n) => n,
                Err(Error::Io(e)) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            if n == 0 {
                if !self.buf.is_empty() {
                    tracing::debug!(buffered = self.buf.len(), "Worker closed mid-value");
                }
                return Err(Error::Closed);
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }
}
