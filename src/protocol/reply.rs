//! Replies and the reply reader.
//!
//! [`Reply`] is what a dispatcher produces for a command. [`ReplyReader`]
//! reassembles replies from a byte stream; Transport uses it only to decide
//! that one complete reply has arrived.

use super::{find_crlf, parse_int, ProtocolError};

/// A protocol reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `+OK`
    Status(String),
    /// `-ERR message`
    Error(String),
    /// `:42`
    Integer(i64),
    /// `$3\r\nfoo`
    Bulk(Vec<u8>),
    /// `$-1`
    Nil,
    /// `*2\r\n...`
    Array(Vec<Reply>),
}

impl Reply {
    /// The shared `+OK` acknowledgement.
    pub fn ok() -> Self {
        Self::Status("OK".to_string())
    }

    /// An error reply. `msg` should start with an error code such as `ERR`.
    pub fn error(msg: impl Into<String>) -> Self {
        Self::Error(msg.into())
    }

    /// A bulk reply from anything byte-like.
    pub fn bulk(data: impl AsRef<[u8]>) -> Self {
        Self::Bulk(data.as_ref().to_vec())
    }

    /// True for `-ERR` style replies.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Element count for arrays, `None` for scalar replies.
    pub fn cardinality(&self) -> Option<usize> {
        match self {
            Self::Array(items) => Some(items.len()),
            _ => None,
        }
    }

    /// Encode into wire format.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_into(&mut out);
        out
    }

    /// Append the wire encoding to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            Self::Status(s) => {
                out.push(b'+');
                out.extend_from_slice(s.as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            Self::Error(e) => {
                out.push(b'-');
                out.extend_from_slice(e.as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            Self::Integer(n) => out.extend_from_slice(format!(":{n}\r\n").as_bytes()),
            Self::Bulk(data) => {
                out.extend_from_slice(format!("${}\r\n", data.len()).as_bytes());
                out.extend_from_slice(data);
                out.extend_from_slice(b"\r\n");
            }
            Self::Nil => out.extend_from_slice(b"$-1\r\n"),
            Self::Array(items) => {
                out.extend_from_slice(format!("*{}\r\n", items.len()).as_bytes());
                for item in items {
                    item.encode_into(out);
                }
            }
        }
    }
}

/// Incremental reader for replies arriving on a socket.
#[derive(Debug, Default)]
pub struct ReplyReader {
    buf: Vec<u8>,
}

impl ReplyReader {
    /// Create a reader with an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes read from the socket.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Take the next complete reply, or `Ok(None)` if more bytes are needed.
    pub fn next_reply(&mut self) -> Result<Option<Reply>, ProtocolError> {
        match parse_reply(&self.buf, 0)? {
            Some((reply, consumed)) => {
                self.buf.drain(..consumed);
                Ok(Some(reply))
            }
            None => Ok(None),
        }
    }

    /// Returns true if the reader has buffered partial data.
    pub fn has_partial(&self) -> bool {
        !self.buf.is_empty()
    }
}

/// Parse one reply starting at `pos`, returning it and the position after it.
fn parse_reply(buf: &[u8], pos: usize) -> Result<Option<(Reply, usize)>, ProtocolError> {
    let Some(&marker) = buf.get(pos) else {
        return Ok(None);
    };
    let Some(cr) = find_crlf(buf, pos) else {
        return Ok(None);
    };
    let line = &buf[pos + 1..cr];
    let next = cr + 2;

    let parsed = match marker {
        b'+' => (Reply::Status(String::from_utf8_lossy(line).into_owned()), next),
        b'-' => (Reply::Error(String::from_utf8_lossy(line).into_owned()), next),
        b':' => (Reply::Integer(parse_int(line)?), next),
        b'$' => {
            let len = parse_int(line)?;
            if len < 0 {
                return Ok(Some((Reply::Nil, next)));
            }
            let len = len as usize;
            if buf.len() < next + len + 2 {
                return Ok(None);
            }
            if &buf[next + len..next + len + 2] != b"\r\n" {
                return Err(ProtocolError::MissingTerminator);
            }
            (Reply::Bulk(buf[next..next + len].to_vec()), next + len + 2)
        }
        b'*' => {
            let count = parse_int(line)?;
            if count < 0 {
                return Ok(Some((Reply::Nil, next)));
            }
            let mut items = Vec::with_capacity((count as usize).min(1024));
            let mut at = next;
            for _ in 0..count {
                let Some((item, after)) = parse_reply(buf, at)? else {
                    return Ok(None);
                };
                items.push(item);
                at = after;
            }
            (Reply::Array(items), at)
        }
        other => {
            return Err(ProtocolError::UnexpectedByte {
                expected: '+',
                found: other,
            })
        }
    };
    Ok(Some(parsed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_scalars() {
        assert_eq!(Reply::ok().encode(), b"+OK\r\n");
        assert_eq!(Reply::error("ERR nope").encode(), b"-ERR nope\r\n");
        assert_eq!(Reply::Integer(-7).encode(), b":-7\r\n");
        assert_eq!(Reply::bulk("hi").encode(), b"$2\r\nhi\r\n");
        assert_eq!(Reply::Nil.encode(), b"$-1\r\n");
    }

    #[test]
    fn test_encode_nested_array() {
        let reply = Reply::Array(vec![
            Reply::bulk("message"),
            Reply::Array(vec![Reply::Integer(1)]),
        ]);
        assert_eq!(reply.encode(), b"*2\r\n$7\r\nmessage\r\n*1\r\n:1\r\n");
        assert_eq!(reply.cardinality(), Some(2));
        assert_eq!(Reply::ok().cardinality(), None);
    }

    #[test]
    fn test_reader_pong() {
        let mut reader = ReplyReader::new();
        reader.feed(b"+PONG\r\n");
        assert_eq!(reader.next_reply().unwrap(), Some(Reply::Status("PONG".into())));
        assert!(!reader.has_partial());
    }

    #[test]
    fn test_reader_waits_for_full_array() {
        let full = Reply::Array(vec![Reply::bulk("subscribe"), Reply::bulk("ch"), Reply::Integer(1)])
            .encode();
        let mut reader = ReplyReader::new();

        reader.feed(&full[..full.len() - 3]);
        assert_eq!(reader.next_reply().unwrap(), None);

        reader.feed(&full[full.len() - 3..]);
        let reply = reader.next_reply().unwrap().unwrap();
        assert_eq!(reply.cardinality(), Some(3));
    }

    #[test]
    fn test_reader_splits_pipelined_replies() {
        let mut reader = ReplyReader::new();
        reader.feed(b"+OK\r\n$-1\r\n:3\r\n");
        assert_eq!(reader.next_reply().unwrap(), Some(Reply::ok()));
        assert_eq!(reader.next_reply().unwrap(), Some(Reply::Nil));
        assert_eq!(reader.next_reply().unwrap(), Some(Reply::Integer(3)));
        assert_eq!(reader.next_reply().unwrap(), None);
    }

    #[test]
    fn test_reader_rejects_garbage() {
        let mut reader = ReplyReader::new();
        reader.feed(b"?what\r\n");
        assert!(reader.next_reply().is_err());
    }
}
