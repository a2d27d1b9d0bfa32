use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EncodeError {
    #[error("cannot encode non-finite float {0}")]
    NonFiniteFloat(f64),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unexpected byte 0x{byte:02x} at offset {offset}")]
    UnexpectedByte { byte: u8, offset: usize },

    #[error("unbalanced ')' at offset {offset}")]
    UnbalancedClose { offset: usize },

    #[error("length prefix at offset {offset} has a leading zero")]
    LeadingZero { offset: usize },

    #[error("string at offset {offset} exceeds the {limit} byte limit")]
    TooLong { offset: usize, limit: usize },

    #[error("nesting deeper than {0} levels")]
    TooDeep(usize),

    #[error("unknown display hint {0:?}")]
    UnknownHint(String),

    #[error("invalid integer literal {0:?}")]
    InvalidInteger(String),

    #[error("invalid float literal {0:?}")]
    InvalidFloat(String),
}
