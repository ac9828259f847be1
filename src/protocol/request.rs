//! Incremental request parser.
//!
//! Feed bytes via [`RequestParser::feed`] (or attach a whole
//! [`CommandBuffer`] with [`RequestParser::with_buffer`]) and pull complete
//! commands with [`RequestParser::next_command`]. Partial input stays
//! buffered, together with the parse state, until more bytes arrive.
//!
//! Two request forms are accepted, chosen by the first byte of each command:
//!
//! - multibulk: `*2\r\n$4\r\nECHO\r\n$2\r\nhi\r\n`
//! - inline: `ECHO hi\r\n` (what a human types into a terminal)

use super::{find_crlf, parse_int, CommandBuffer, ProtocolError};
use crate::constants::{MAX_BULK_LEN, MAX_INLINE_LEN, MAX_MULTIBULK_ARGS};

/// Which request form the parser is in the middle of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    /// Between commands; the next byte decides the form.
    Idle,
    /// Reading a `*<argc>` array of bulk arguments.
    MultiBulk,
    /// Reading a whitespace-separated line.
    Inline,
}

/// One fully parsed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    args: Vec<Vec<u8>>,
}

impl ParsedCommand {
    /// Build a command from raw arguments. `args` must not be empty.
    pub fn new(args: Vec<Vec<u8>>) -> Self {
        debug_assert!(!args.is_empty(), "command without a name");
        Self { args }
    }

    /// Command name, uppercased for dispatch-table lookup.
    pub fn name(&self) -> String {
        self.args
            .first()
            .map(|n| String::from_utf8_lossy(n).to_ascii_uppercase())
            .unwrap_or_default()
    }

    /// Argument count including the command name.
    pub fn argc(&self) -> usize {
        self.args.len()
    }

    /// Argument `i` (0 is the command name).
    pub fn arg(&self, i: usize) -> Option<&[u8]> {
        self.args.get(i).map(Vec::as_slice)
    }

    /// All arguments including the command name.
    pub fn args(&self) -> &[Vec<u8>] {
        &self.args
    }

    /// Consume the command, yielding its arguments.
    pub fn into_args(self) -> Vec<Vec<u8>> {
        self.args
    }
}

/// Incremental parser for client requests.
#[derive(Debug)]
pub struct RequestParser {
    buf: Vec<u8>,
    /// Read cursor into `buf`; bytes before it are consumed.
    pos: usize,
    mode: ParseMode,
    /// Arguments still expected in the current multibulk command.
    multibulk_remaining: Option<usize>,
    /// Length of the bulk argument whose header has been read.
    bulk_len: Option<usize>,
    args: Vec<Vec<u8>>,
}

impl RequestParser {
    /// Create a parser with an empty buffer.
    pub fn new() -> Self {
        Self::from_vec(Vec::new())
    }

    /// Create a parser that owns `buffer` as its input.
    ///
    /// The bytes are moved in, not copied.
    pub fn with_buffer(buffer: CommandBuffer) -> Self {
        Self::from_vec(buffer.into_vec())
    }

    fn from_vec(buf: Vec<u8>) -> Self {
        Self {
            buf,
            pos: 0,
            mode: ParseMode::Idle,
            multibulk_remaining: None,
            bulk_len: None,
            args: Vec::new(),
        }
    }

    /// Append bytes read from a connection.
    pub fn feed(&mut self, bytes: &[u8]) {
        if self.pos > 0 {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }
        self.buf.extend_from_slice(bytes);
    }

    /// Current parse mode.
    pub fn mode(&self) -> ParseMode {
        self.mode
    }

    /// Arguments still expected by the multibulk command being parsed.
    pub fn pending_args(&self) -> usize {
        self.multibulk_remaining.unwrap_or(0)
    }

    /// True if unconsumed bytes remain (a partial command).
    pub fn has_partial(&self) -> bool {
        self.pos < self.buf.len() || self.mode != ParseMode::Idle
    }

    /// Parse the next complete command.
    ///
    /// Returns `Ok(None)` when more data is needed. After an error the
    /// parser state is undefined and the input should be discarded.
    pub fn next_command(&mut self) -> Result<Option<ParsedCommand>, ProtocolError> {
        loop {
            if self.mode == ParseMode::Idle {
                let Some(&first) = self.buf.get(self.pos) else {
                    return Ok(None);
                };
                self.mode = if first == b'*' {
                    ParseMode::MultiBulk
                } else {
                    ParseMode::Inline
                };
            }

            let parsed = if self.mode == ParseMode::Inline {
                self.parse_inline()?
            } else {
                self.parse_multibulk()?
            };

            match parsed {
                Step::Command(cmd) => return Ok(Some(cmd)),
                Step::NeedMore => return Ok(None),
                Step::Skip => {}
            }
        }
    }

    fn parse_inline(&mut self) -> Result<Step, ProtocolError> {
        let Some(nl) = self.buf[self.pos..].iter().position(|&b| b == b'\n') else {
            let pending = self.buf.len() - self.pos;
            if pending > MAX_INLINE_LEN {
                return Err(ProtocolError::InlineTooLong(pending));
            }
            return Ok(Step::NeedMore);
        };

        let mut line = &self.buf[self.pos..self.pos + nl];
        if let Some(stripped) = line.strip_suffix(b"\r") {
            line = stripped;
        }
        let args = split_inline(line)?;
        self.pos += nl + 1;
        self.mode = ParseMode::Idle;

        if args.is_empty() {
            return Ok(Step::Skip);
        }
        Ok(Step::Command(ParsedCommand::new(args)))
    }

    /// A `*<count>` or `$<len>` line without its CRLF yet. Headers are a
    /// few digits, so one longer than an inline line is garbage.
    fn await_header(&self) -> Result<Step, ProtocolError> {
        let pending = self.buf.len() - self.pos;
        if pending > MAX_INLINE_LEN {
            return Err(ProtocolError::HeaderTooLong(pending));
        }
        Ok(Step::NeedMore)
    }

    fn parse_multibulk(&mut self) -> Result<Step, ProtocolError> {
        if self.multibulk_remaining.is_none() {
            let Some(cr) = find_crlf(&self.buf, self.pos) else {
                return self.await_header();
            };
            let count = parse_int(&self.buf[self.pos + 1..cr])?;
            self.pos = cr + 2;

            if count <= 0 {
                // `*0` and `*-1` are empty requests.
                self.mode = ParseMode::Idle;
                return Ok(Step::Skip);
            }
            if count as usize > MAX_MULTIBULK_ARGS {
                return Err(ProtocolError::TooManyArguments(count));
            }
            self.multibulk_remaining = Some(count as usize);
            self.args = Vec::with_capacity((count as usize).min(1024));
        }

        while let Some(remaining) = self.multibulk_remaining.filter(|&r| r > 0) {
            let len = match self.bulk_len {
                Some(len) => len,
                None => {
                    let Some(cr) = find_crlf(&self.buf, self.pos) else {
                        return self.await_header();
                    };
                    let marker = self.buf[self.pos];
                    if marker != b'$' {
                        return Err(ProtocolError::UnexpectedByte {
                            expected: '$',
                            found: marker,
                        });
                    }
                    let len = parse_int(&self.buf[self.pos + 1..cr])?;
                    if len < 0 || len as usize > MAX_BULK_LEN {
                        return Err(ProtocolError::BulkTooLarge(len));
                    }
                    self.pos = cr + 2;
                    self.bulk_len = Some(len as usize);
                    len as usize
                }
            };

            if self.buf.len() - self.pos < len + 2 {
                return Ok(Step::NeedMore);
            }
            if &self.buf[self.pos + len..self.pos + len + 2] != b"\r\n" {
                return Err(ProtocolError::MissingTerminator);
            }
            self.args.push(self.buf[self.pos..self.pos + len].to_vec());
            self.pos += len + 2;
            self.bulk_len = None;
            self.multibulk_remaining = Some(remaining - 1);
        }

        self.multibulk_remaining = None;
        self.mode = ParseMode::Idle;
        Ok(Step::Command(ParsedCommand::new(std::mem::take(&mut self.args))))
    }
}

impl Default for RequestParser {
    fn default() -> Self {
        Self::new()
    }
}

enum Step {
    Command(ParsedCommand),
    NeedMore,
    /// Empty request consumed; keep going.
    Skip,
}

/// Split an inline command line into arguments.
///
/// Whitespace separates arguments. Double-quoted arguments support `\"`,
/// `\\`, `\n`, `\r` and `\t`; single-quoted arguments support `\'`.
fn split_inline(line: &[u8]) -> Result<Vec<Vec<u8>>, ProtocolError> {
    let mut args = Vec::new();
    let mut i = 0;

    while i < line.len() {
        while i < line.len() && line[i].is_ascii_whitespace() {
            i += 1;
        }
        if i >= line.len() {
            break;
        }

        let mut arg = Vec::new();
        match line[i] {
            quote @ (b'"' | b'\'') => {
                i += 1;
                loop {
                    let Some(&b) = line.get(i) else {
                        return Err(ProtocolError::UnbalancedQuotes);
                    };
                    if b == quote {
                        i += 1;
                        break;
                    }
                    if b == b'\\' && i + 1 < line.len() {
                        let next = line[i + 1];
                        let escaped = match (quote, next) {
                            (b'"', b'n') => Some(b'\n'),
                            (b'"', b'r') => Some(b'\r'),
                            (b'"', b't') => Some(b'\t'),
                            (b'"', b'"' | b'\\') | (b'\'', b'\'') => Some(next),
                            _ => None,
                        };
                        if let Some(e) = escaped {
                            arg.push(e);
                            i += 2;
                            continue;
                        }
                    }
                    arg.push(b);
                    i += 1;
                }
                // A closing quote must be followed by whitespace or end of line.
                if line.get(i).is_some_and(|b| !b.is_ascii_whitespace()) {
                    return Err(ProtocolError::UnbalancedQuotes);
                }
            }
            _ => {
                while i < line.len() && !line[i].is_ascii_whitespace() {
                    arg.push(line[i]);
                    i += 1;
                }
            }
        }
        args.push(arg);
    }

    Ok(args)
}
