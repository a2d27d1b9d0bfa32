//! Structured-value writer.
//!
//! A value is encoded into a scratch buffer first and sent only when encoding
//! succeeded, so a peer never sees half a message because of a serialization
//! error. The encoding is self-delimiting; no extra framing is added.

use std::io;

use serde::Serialize;
use sexp::Sexp;

use crate::error::{Error, Result};
use crate::scheme::Scheme;

/// Starting size of the scratch buffer. It grows as needed.
pub const INITIAL_CAPACITY: usize = 1024;

pub type EncodeError = Box<dyn std::error::Error + Send + Sync>;

/// A value that can be written to a worker.
pub trait Encode {
    /// Append the wire form of `self` to `out`.
    fn encode_into(&self, out: &mut Vec<u8>) -> std::result::Result<(), EncodeError>;
}

impl Encode for Sexp {
    fn encode_into(&self, out: &mut Vec<u8>) -> std::result::Result<(), EncodeError> {
        self.encode(out).map_err(Into::into)
    }
}

impl<E: Encode + ?Sized> Encode for &E {
    fn encode_into(&self, out: &mut Vec<u8>) -> std::result::Result<(), EncodeError> {
        (**self).encode_into(out)
    }
}

/// Newline-delimited compact JSON.
///
/// Compact `serde_json` output escapes control characters, so the trailing
/// newline is the only one in the message.
#[derive(Debug, Clone)]
pub struct Json<T>(pub T);

impl<T: Serialize> Encode for Json<T> {
    fn encode_into(&self, out: &mut Vec<u8>) -> std::result::Result<(), EncodeError> {
        serde_json::to_writer(&mut *out, &self.0)?;
        out.push(b'\n');
        Ok(())
    }
}

/// Encode `value` and write all of it through `scheme`.
///
/// Returns the number of bytes written. Short writes are continued; the first
/// I/O error is returned as-is and the remainder is not sent. A descriptor
/// that is not open fails with `NotConnected` before anything is encoded.
pub fn send_value<S: Scheme + ?Sized>(scheme: &mut S, value: &dyn Encode) -> Result<usize> {
    if !scheme.is_open() {
        return Err(Error::NotConnected);
    }
    let mut buf = Vec::with_capacity(INITIAL_CAPACITY);
    value.encode_into(&mut buf).map_err(Error::Encode)?;
    write_all(scheme, &buf)?;
    tracing::trace!(bytes = buf.len(), "Sent value");
    Ok(buf.len())
}

fn write_all<S: Scheme + ?Sized>(scheme: &mut S, mut buf: &[u8]) -> Result<()> {
    while !buf.is_empty() {
        match scheme.send(buf) {
            Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
            Ok(n) => buf = &buf[n..],
            Err(Error::Io(e)) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::os::fd::BorrowedFd;
    use std::time::Duration;

    use serde::ser::{Serialize, Serializer};

    use super::*;
    use crate::config::ConnectOptions;
    use crate::scheme::{Direction, Readiness, SchemeId, WorkerExit};

    /// Accepts at most `chunk` bytes per send and fails after `fail_after` calls.
    #[derive(Default)]
    struct Recorder {
        sent: Vec<u8>,
        calls: usize,
        chunk: usize,
        fail_after: Option<usize>,
    }

    impl Scheme for Recorder {
        fn id(&self) -> SchemeId {
            SchemeId::Pipe
        }

        fn is_open(&self) -> bool {
            true
        }

        fn connect(&mut self, _: &str, _: &ConnectOptions) -> Result<()> {
            Ok(())
        }

        fn open_fd(&mut self, _: BorrowedFd<'_>) -> Result<()> {
            unreachable!()
        }

        fn open_fd_pair(&mut self, _: BorrowedFd<'_>, _: BorrowedFd<'_>) -> Result<()> {
            unreachable!()
        }

        fn send(&mut self, buf: &[u8]) -> Result<usize> {
            if self.fail_after == Some(self.calls) {
                return Err(nix::errno::Errno::EPIPE.into());
            }
            self.calls += 1;
            let n = buf.len().min(self.chunk);
            self.sent.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn recv(&mut self, _: &mut [u8]) -> Result<usize> {
            Ok(0)
        }

        fn poll_ready(&mut self, _: Direction, _: Option<Duration>) -> Result<Readiness> {
            Ok(Readiness::Ready)
        }

        fn close(&mut self) -> Result<WorkerExit> {
            Ok(WorkerExit::Exited(0))
        }
    }

    fn recorder(chunk: usize) -> Recorder {
        Recorder {
            chunk,
            ..Default::default()
        }
    }

    #[test]
    fn short_writes_are_continued() {
        let mut sink = recorder(3);
        let value = Sexp::list([Sexp::from("probe_file"), Sexp::from(7i64)]);
        let n = sink.send_value(&value).unwrap();
        assert_eq!(sink.sent, value.to_canonical().unwrap());
        assert_eq!(n, sink.sent.len());
        assert_eq!(sink.calls, n.div_ceil(3));
    }

    #[test]
    fn encode_failure_writes_nothing() {
        let mut sink = recorder(64);
        let value = Sexp::list([Sexp::from("x"), Sexp::from(f64::NAN)]);
        let err = sink.send_value(&value).unwrap_err();
        assert!(matches!(err, Error::Encode(_)));
        assert!(sink.sent.is_empty());
        assert_eq!(sink.calls, 0);
    }

    struct Unserializable;

    impl Serialize for Unserializable {
        fn serialize<S: Serializer>(&self, _: S) -> std::result::Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("refusing to serialize"))
        }
    }

    #[test]
    fn json_encode_failure_writes_nothing() {
        let mut sink = recorder(64);
        let err = sink.send_value(&Json(Unserializable)).unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"failed to encode value: refusing to serialize");
        assert!(sink.sent.is_empty());
    }

    #[test]
    fn json_is_newline_delimited() {
        let mut sink = recorder(1024);
        let msg = serde_json::json!({"probe": "file", "path": "/etc/\nshadow"});
        sink.send_value(&Json(&msg)).unwrap();
        let text = String::from_utf8(sink.sent).unwrap();
        assert!(text.ends_with('\n'));
        assert_eq!(text.matches('\n').count(), 1);
        let back: serde_json::Value = serde_json::from_str(text.trim_end()).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn first_io_error_is_returned() {
        let mut sink = Recorder {
            chunk: 2,
            fail_after: Some(1),
            ..Default::default()
        };
        let err = sink.send_value(&Sexp::from("abcdef")).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(nix::errno::Errno::EPIPE as i32));
        assert_eq!(sink.sent, b"6:");
    }

    #[test]
    fn large_values_grow_past_initial_capacity() {
        let mut sink = recorder(usize::MAX);
        let value = Sexp::string(vec![b'x'; INITIAL_CAPACITY * 4]);
        let n = sink.send_value(&value).unwrap();
        assert_eq!(n, INITIAL_CAPACITY * 4 + "4096:".len());
    }
}
