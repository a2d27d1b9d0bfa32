//! sexp: S-expression values exchanged with probe workers.
//!
//! Values travel in canonical form, which is self-delimiting: a reader can
//! tell where one value ends without any length prefix or separator.
//!
//! | value   | canonical form          | example            |
//! |---------|-------------------------|--------------------|
//! | string  | `<len>:<bytes>`         | `4:ping`           |
//! | list    | `(` items `)`           | `(4:ping3:foo)`    |
//! | integer | `[1:i]<len>:<decimal>`  | `[1:i]2:42`        |
//! | float   | `[1:f]<len>:<repr>`     | `[1:f]4:1.25`      |

mod decode;
mod encode;
mod error;
mod frame;
mod value;

pub use decode::{DEFAULT_MAX_STRING_LEN, Decoder, MAX_DEPTH};
pub use error::{DecodeError, EncodeError};
pub use frame::Framer;
pub use value::Sexp;
