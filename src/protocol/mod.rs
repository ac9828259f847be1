//! Wire protocol shared by nodes and clients.
//!
//! Commands travel as arrays of length-prefixed arguments:
//!
//! ```text
//! *<argc>\r\n
//! $<len>\r\n<bytes>\r\n      (repeated argc times)
//! ```
//!
//! Replies use the same framing family (`+status`, `-error`, `:integer`,
//! `$bulk`, `*array`).
//!
//! - [`command`] - Owned command buffers and the argument-array encoder
//! - [`request`] - Incremental request parser (multibulk and inline)
//! - [`reply`] - Reply model and incremental reply reader

pub mod command;
pub mod reply;
pub mod request;

pub use command::{encode_command, CommandBuffer};
pub use reply::{Reply, ReplyReader};
pub use request::{ParseMode, ParsedCommand, RequestParser};

/// Malformed protocol input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A length or count header was not a valid integer.
    InvalidLength(String),
    /// A multibulk header declared too many arguments.
    TooManyArguments(i64),
    /// A bulk header declared a length over the limit.
    BulkTooLarge(i64),
    /// An inline command line exceeded the limit without a terminator.
    InlineTooLong(usize),
    /// A `*` or `$` header line exceeded the limit without a terminator.
    HeaderTooLong(usize),
    /// Expected one marker byte, found another.
    UnexpectedByte {
        /// What the parser was looking for.
        expected: char,
        /// What it found.
        found: u8,
    },
    /// A bulk payload was not followed by `\r\n`.
    MissingTerminator,
    /// Inline command had an unbalanced quote.
    UnbalancedQuotes,
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidLength(raw) => write!(f, "Protocol error: invalid length '{raw}'"),
            Self::TooManyArguments(n) => write!(f, "Protocol error: invalid multibulk length {n}"),
            Self::BulkTooLarge(n) => write!(f, "Protocol error: invalid bulk length {n}"),
            Self::InlineTooLong(n) => write!(f, "Protocol error: too big inline request ({n} bytes)"),
            Self::HeaderTooLong(n) => write!(f, "Protocol error: too big length header ({n} bytes)"),
            Self::UnexpectedByte { expected, found } => write!(
                f,
                "Protocol error: expected '{expected}', got '{}'",
                char::from(*found)
            ),
            Self::MissingTerminator => write!(f, "Protocol error: missing CRLF after bulk payload"),
            Self::UnbalancedQuotes => write!(f, "Protocol error: unbalanced quotes in request"),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Find the first `\r\n` in `buf` starting at `from`, returning the index of `\r`.
pub(crate) fn find_crlf(buf: &[u8], from: usize) -> Option<usize> {
    buf.get(from..)?
        .windows(2)
        .position(|w| w == b"\r\n")
        .map(|i| from + i)
}

/// Parse a signed decimal header such as the `3` in `*3\r\n`.
pub(crate) fn parse_int(raw: &[u8]) -> Result<i64, ProtocolError> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| ProtocolError::InvalidLength(String::from_utf8_lossy(raw).into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_crlf() {
        assert_eq!(find_crlf(b"*1\r\n$4\r\n", 0), Some(2));
        assert_eq!(find_crlf(b"*1\r\n$4\r\n", 3), Some(6));
        assert_eq!(find_crlf(b"*1\r", 0), None);
        assert_eq!(find_crlf(b"ab", 5), None);
    }

    #[test]
    fn test_parse_int() {
        assert_eq!(parse_int(b"42"), Ok(42));
        assert_eq!(parse_int(b"-1"), Ok(-1));
        assert!(matches!(parse_int(b"4x"), Err(ProtocolError::InvalidLength(_))));
        assert!(parse_int(b"").is_err());
    }
}
