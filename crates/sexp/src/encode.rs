use std::io::Write;

use crate::error::EncodeError;
use crate::value::Sexp;

const INTEGER_HINT: &[u8] = b"[1:i]";
const FLOAT_HINT: &[u8] = b"[1:f]";

impl Sexp {
    /// Append the canonical encoding of `self` to `out`.
    ///
    /// On error `out` may hold a partial encoding; callers that must not emit
    /// partial output encode into a scratch buffer first.
    pub fn encode(&self, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        match self {
            Self::List(items) => {
                out.push(b'(');
                for item in items {
                    item.encode(out)?;
                }
                out.push(b')');
            }
            Self::String(bytes) => put_string(out, bytes),
            Self::Integer(n) => {
                out.extend_from_slice(INTEGER_HINT);
                put_string(out, n.to_string().as_bytes());
            }
            Self::Float(x) => {
                if !x.is_finite() {
                    return Err(EncodeError::NonFiniteFloat(*x));
                }
                out.extend_from_slice(FLOAT_HINT);
                put_string(out, x.to_string().as_bytes());
            }
        }
        Ok(())
    }

    /// Canonical encoding in a fresh buffer.
    pub fn to_canonical(&self) -> Result<Vec<u8>, EncodeError> {
        let mut out = Vec::new();
        self.encode(&mut out)?;
        Ok(out)
    }
}

fn put_string(out: &mut Vec<u8>, bytes: &[u8]) {
    // Writing into a Vec cannot fail.
    let _ = write!(out, "{}:", bytes.len());
    out.extend_from_slice(bytes);
}
