//! Finding where the next value ends without decoding it.
//!
//! [`Framer`] remembers how far it has scanned, so a value that arrives in
//! many small reads is looked at once per byte instead of once per read.
//! Only structure is tracked. The first byte that cannot continue a value
//! closes the frame early and leaves the error to
//! [`Decoder::decode`](crate::Decoder::decode).

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Between tokens.
    Token,
    /// Inside a length prefix.
    Length(usize),
    /// Inside string contents, with this many bytes left.
    Body(usize),
}

#[derive(Debug, Clone)]
pub struct Framer {
    max_string_len: usize,
    max_depth: usize,
    scanned: usize,
    depth: usize,
    in_hint: bool,
    awaiting_body: bool,
    state: State,
}

impl Framer {
    pub(crate) fn new(max_string_len: usize, max_depth: usize) -> Self {
        Self {
            max_string_len,
            max_depth,
            scanned: 0,
            depth: 0,
            in_hint: false,
            awaiting_body: false,
            state: State::Token,
        }
    }

    /// Bytes of `buf` already accounted for.
    pub fn scanned(&self) -> usize {
        self.scanned
    }

    /// Forget all progress. Call after removing bytes from the front.
    pub fn reset(&mut self) {
        *self = Self::new(self.max_string_len, self.max_depth);
    }

    /// Length of the first value in `buf` once all of it has arrived.
    ///
    /// Successive calls must pass the same buffer, possibly extended at the
    /// end. Malformed input yields a frame ending at the offending byte.
    pub fn frame_len(&mut self, buf: &[u8]) -> Option<usize> {
        while self.scanned < buf.len() {
            match self.state {
                State::Body(left) => {
                    let take = left.min(buf.len() - self.scanned);
                    self.scanned += take;
                    if take < left {
                        self.state = State::Body(left - take);
                        return None;
                    }
                    if self.string_done() {
                        return Some(self.scanned);
                    }
                }
                State::Length(len) => match self.next_byte(buf) {
                    d @ b'0'..=b'9' if len != 0 => {
                        match len
                            .checked_mul(10)
                            .and_then(|l| l.checked_add(usize::from(d - b'0')))
                            .filter(|l| *l <= self.max_string_len)
                        {
                            Some(next) => self.state = State::Length(next),
                            None => return Some(self.scanned),
                        }
                    }
                    b':' => {
                        self.state = State::Body(len);
                        if len == 0 && self.string_done() {
                            return Some(self.scanned);
                        }
                    }
                    _ => return Some(self.scanned),
                },
                State::Token => {
                    let byte = self.next_byte(buf);
                    if self.awaiting_body && !byte.is_ascii_digit() {
                        return Some(self.scanned);
                    }
                    match byte {
                        b'(' if !self.in_hint && self.depth < self.max_depth => self.depth += 1,
                        b')' if !self.in_hint && self.depth > 1 => self.depth -= 1,
                        b'[' if !self.in_hint => self.in_hint = true,
                        b']' if self.in_hint => {
                            self.in_hint = false;
                            self.awaiting_body = true;
                        }
                        d @ b'0'..=b'9' if usize::from(d - b'0') <= self.max_string_len => {
                            self.state = State::Length(usize::from(d - b'0'));
                        }
                        // `)` closing the outermost list, or a byte no value continues with
                        _ => return Some(self.scanned),
                    }
                }
            }
        }
        None
    }

    fn next_byte(&mut self, buf: &[u8]) -> u8 {
        let byte = buf[self.scanned];
        self.scanned += 1;
        byte
    }

    /// A string just ended. Reports whether it completed a top-level value.
    fn string_done(&mut self) -> bool {
        self.state = State::Token;
        if self.in_hint {
            return false;
        }
        self.awaiting_body = false;
        self.depth == 0
    }
}
