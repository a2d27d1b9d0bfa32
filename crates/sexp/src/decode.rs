//! Incremental decoder for the canonical encoding.
//!
//! `decode` is called with everything buffered so far. It returns `Ok(None)`
//! until a complete value is present, then the value and the number of bytes
//! it occupied. Bytes past the value are left for the next call.

use crate::error::DecodeError;
use crate::frame::Framer;
use crate::value::Sexp;

/// Deepest list nesting accepted from a peer.
pub const MAX_DEPTH: usize = 128;

/// Largest single string accepted from a peer by default.
pub const DEFAULT_MAX_STRING_LEN: usize = 16 * 1024 * 1024;

type Step<T> = Result<Option<T>, DecodeError>;

macro_rules! need {
    ($e:expr) => {
        match $e? {
            Some(v) => v,
            None => return Ok(None),
        }
    };
}

#[derive(Debug, Clone, Copy)]
pub struct Decoder {
    max_string_len: usize,
    max_depth: usize,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            max_string_len: DEFAULT_MAX_STRING_LEN,
            max_depth: MAX_DEPTH,
        }
    }

    pub fn with_max_string_len(mut self, limit: usize) -> Self {
        self.max_string_len = limit;
        self
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// A [`Framer`] that stops at the same limits as this decoder.
    pub fn framer(&self) -> Framer {
        Framer::new(self.max_string_len, self.max_depth)
    }

    /// Decode one value from the front of `buf`.
    ///
    /// Returns `(value, bytes_consumed)` or `None` if more input is needed.
    pub fn decode(&self, buf: &[u8]) -> Step<(Sexp, usize)> {
        let mut cur = Cursor { buf, pos: 0 };
        let value = need!(self.value(&mut cur, 0));
        Ok(Some((value, cur.pos)))
    }

    fn value(&self, cur: &mut Cursor<'_>, depth: usize) -> Step<Sexp> {
        let Some(b) = cur.peek() else {
            return Ok(None);
        };
        match b {
            b'(' => {
                if depth >= self.max_depth {
                    return Err(DecodeError::TooDeep(self.max_depth));
                }
                cur.pos += 1;
                let mut items = Vec::new();
                loop {
                    match cur.peek() {
                        None => return Ok(None),
                        Some(b')') => {
                            cur.pos += 1;
                            return Ok(Some(Sexp::List(items)));
                        }
                        Some(_) => items.push(need!(self.value(cur, depth + 1))),
                    }
                }
            }
            b'[' => {
                cur.pos += 1;
                let hint = need!(self.string(cur));
                match cur.peek() {
                    None => return Ok(None),
                    Some(b']') => cur.pos += 1,
                    Some(byte) => {
                        return Err(DecodeError::UnexpectedByte {
                            byte,
                            offset: cur.pos,
                        });
                    }
                }
                let body = need!(self.string(cur));
                hinted(hint, body).map(Some)
            }
            b'0'..=b'9' => Ok(Some(Sexp::string(need!(self.string(cur))))),
            b')' => Err(DecodeError::UnbalancedClose { offset: cur.pos }),
            byte => Err(DecodeError::UnexpectedByte {
                byte,
                offset: cur.pos,
            }),
        }
    }

    fn string<'a>(&self, cur: &mut Cursor<'a>) -> Step<&'a [u8]> {
        let start = cur.pos;
        let mut len: usize = 0;
        let mut digits = 0usize;
        loop {
            match cur.peek() {
                None => return Ok(None),
                Some(d @ b'0'..=b'9') => {
                    if digits == 1 && len == 0 {
                        return Err(DecodeError::LeadingZero { offset: start });
                    }
                    len = len
                        .checked_mul(10)
                        .and_then(|l| l.checked_add(usize::from(d - b'0')))
                        .filter(|l| *l <= self.max_string_len)
                        .ok_or(DecodeError::TooLong {
                            offset: start,
                            limit: self.max_string_len,
                        })?;
                    digits += 1;
                    cur.pos += 1;
                }
                Some(b':') if digits > 0 => {
                    cur.pos += 1;
                    break;
                }
                Some(byte) => {
                    return Err(DecodeError::UnexpectedByte {
                        byte,
                        offset: cur.pos,
                    });
                }
            }
        }
        if cur.remaining() < len {
            return Ok(None);
        }
        let buf = cur.buf;
        let bytes = &buf[cur.pos..cur.pos + len];
        cur.pos += len;
        Ok(Some(bytes))
    }
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl Cursor<'_> {
    fn peek(&self) -> Option<u8> {
        self.buf.get(self.pos).copied()
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }
}

fn hinted(hint: &[u8], body: &[u8]) -> Result<Sexp, DecodeError> {
    let text = || String::from_utf8_lossy(body).into_owned();
    match hint {
        b"i" => std::str::from_utf8(body)
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .map(Sexp::Integer)
            .ok_or_else(|| DecodeError::InvalidInteger(text())),
        b"f" => std::str::from_utf8(body)
            .ok()
            .and_then(|s| s.parse::<f64>().ok())
            .filter(|f| f.is_finite())
            .map(Sexp::Float)
            .ok_or_else(|| DecodeError::InvalidFloat(text())),
        other => Err(DecodeError::UnknownHint(
            String::from_utf8_lossy(other).into_owned(),
        )),
    }
}
