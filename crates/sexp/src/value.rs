use std::fmt;

/// A structured value.
#[derive(Debug, Clone, PartialEq)]
pub enum Sexp {
    List(Vec<Sexp>),
    String(Vec<u8>),
    Integer(i64),
    Float(f64),
}

impl Sexp {
    pub fn list(items: impl IntoIterator<Item = Sexp>) -> Self {
        Self::List(items.into_iter().collect())
    }

    pub fn string(bytes: impl Into<Vec<u8>>) -> Self {
        Self::String(bytes.into())
    }

    pub fn is_list(&self) -> bool {
        matches!(self, Self::List(_))
    }

    pub fn as_list(&self) -> Option<&[Sexp]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::String(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// String contents, if this is a string holding valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        self.as_bytes().and_then(|b| std::str::from_utf8(b).ok())
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// First element of a list, conventionally the message keyword.
    pub fn head(&self) -> Option<&Sexp> {
        self.as_list().and_then(|items| items.first())
    }
}

impl From<&str> for Sexp {
    fn from(s: &str) -> Self {
        Self::String(s.as_bytes().to_vec())
    }
}

impl From<String> for Sexp {
    fn from(s: String) -> Self {
        Self::String(s.into_bytes())
    }
}

impl From<&[u8]> for Sexp {
    fn from(b: &[u8]) -> Self {
        Self::String(b.to_vec())
    }
}

impl From<i64> for Sexp {
    fn from(n: i64) -> Self {
        Self::Integer(n)
    }
}

impl From<f64> for Sexp {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<Vec<Sexp>> for Sexp {
    fn from(items: Vec<Sexp>) -> Self {
        Self::List(items)
    }
}

/// Human-readable form for logs. Not the wire encoding.
impl fmt::Display for Sexp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::List(items) => {
                f.write_str("(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str(")")
            }
            Self::String(bytes) => write!(f, "\"{}\"", bytes.escape_ascii()),
            Self::Integer(n) => write!(f, "{n}"),
            Self::Float(x) => write!(f, "{x:?}"),
        }
    }
}
