//! Owned command buffers.
//!
//! A [`CommandBuffer`] holds one or more wire-encoded commands. It is moved
//! into whichever layer consumes it (Transport or the virtual executor) and
//! released when that layer returns, on every path.

/// An owned buffer of wire-encoded commands.
///
/// Not `Clone`: a buffer has exactly one owner at a time.
#[derive(Debug, PartialEq, Eq)]
pub struct CommandBuffer {
    bytes: Vec<u8>,
}

impl CommandBuffer {
    /// Encode one command from its arguments.
    pub fn from_args<A: AsRef<[u8]>>(args: &[A]) -> Self {
        Self {
            bytes: encode_command(args),
        }
    }

    /// Take ownership of bytes that are already wire-encoded.
    ///
    /// The bytes are not validated here; the consumer's parser rejects
    /// malformed input.
    pub fn from_encoded(bytes: impl Into<Vec<u8>>) -> Self {
        Self { bytes: bytes.into() }
    }

    /// The single-argument liveness probe (`*1\r\n$4\r\nPING\r\n`).
    pub fn probe() -> Self {
        Self::from_args(&[crate::constants::PROBE_KEYWORD])
    }

    /// Borrow the encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True if the buffer holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Consume the buffer, yielding its bytes without copying.
    pub fn into_vec(self) -> Vec<u8> {
        self.bytes
    }
}

/// Encode arguments as one command array.
///
/// `["SET", "k", "v"]` becomes `*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n`.
/// Empty arguments are encoded as `$0\r\n\r\n`.
pub fn encode_command<A: AsRef<[u8]>>(args: &[A]) -> Vec<u8> {
    let payload: usize = args.iter().map(|a| a.as_ref().len() + 16).sum();
    let mut out = Vec::with_capacity(16 + payload);
    out.extend_from_slice(format!("*{}\r\n", args.len()).as_bytes());
    for arg in args {
        let arg = arg.as_ref();
        out.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
        out.extend_from_slice(arg);
        out.extend_from_slice(b"\r\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_set() {
        assert_eq!(
            encode_command(&["SET", "k", "v"]),
            b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n".to_vec()
        );
    }

    #[test]
    fn test_encode_empty_argument() {
        assert_eq!(encode_command(&["ECHO", ""]), b"*2\r\n$4\r\nECHO\r\n$0\r\n\r\n".to_vec());
    }

    #[test]
    fn test_encode_binary_argument() {
        let arg: &[u8] = &[0x00, b'\r', b'\n', 0xff];
        let encoded = encode_command(&[arg]);
        assert_eq!(encoded, b"*1\r\n$4\r\n\x00\r\n\xff\r\n".to_vec());
    }

    #[test]
    fn test_probe_bytes() {
        assert_eq!(CommandBuffer::probe().as_bytes(), b"*1\r\n$4\r\nPING\r\n");
    }

    #[test]
    fn test_from_encoded_keeps_bytes_verbatim() {
        let buf = CommandBuffer::from_encoded(b"PING\r\n".to_vec());
        assert_eq!(buf.len(), 6);
        assert!(!buf.is_empty());
        assert_eq!(buf.into_vec(), b"PING\r\n".to_vec());
    }
}
