//! Streaming Command Decoder
//!
//! Reads commands straight off a buffered async byte stream. Two request
//! encodings share the same connection:
//!
//! 1. **Multi-bulk arrays**: `*<count>\r\n` followed by `count` elements.
//!    An element is a bulk string (`$<len>\r\n<payload>\r\n`), an integer
//!    (`:<digits>\r\n`) or another array. Nested arrays are flattened into
//!    the enclosing command, so `*2\r\n$3\r\nDEL\r\n*2\r\n$1\r\na\r\n$1\r\nb\r\n`
//!    decodes to `DEL a b`.
//! 2. **Inline commands**: a single text line such as `SET "a b" 1\r\n`,
//!    split on spaces, with double-quoted tokens kept whole.
//!
//! ## Line Scanning
//!
//! Lines are scanned byte by byte up to `\n`. Bulk payloads are read by
//! accumulating whole lines until the declared length plus the trailing
//! CRLF is covered, then cutting at the declared length. The length is
//! authoritative, so payloads may contain `\r\n` themselves.
//!
//! ## Errors
//!
//! [`DecodeError::is_malformed`] separates bad input (which the session
//! reports to the client before closing) from transport failures.

use crate::protocol::command::Command;
use crate::protocol::types::{prefix, CRLF};
use bytes::Bytes;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, BufReader};
use tracing::trace;

/// Maximum length of an inline command or a header line (64 KB)
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Maximum size for a single bulk string (512 MB, same as Redis)
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Maximum array nesting depth
pub const MAX_NESTING_DEPTH: usize = 32;

/// Errors that can occur while decoding a command.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The peer closed the stream between two commands
    #[error("connection closed")]
    ConnectionClosed,

    /// Read failure, including end of stream in the middle of a command
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An inline token opened a double quote that was never closed
    #[error("unbalanced quotes in request")]
    UnbalancedQuotes,

    /// An array element started with a byte other than `$`, `:` or `*`
    #[error("unknown type marker: {0:#04x}")]
    UnknownMarker(u8),

    /// A count or length line is not a decimal integer
    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    #[error("invalid bulk length: {0}")]
    InvalidBulkLength(i64),

    #[error("invalid multibulk length: {0}")]
    InvalidArrayLength(i64),

    #[error("maximum nesting depth exceeded: {0}")]
    NestingTooDeep(usize),

    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}

impl DecodeError {
    /// Returns true when the input itself was bad, as opposed to the
    /// connection failing or closing.
    pub fn is_malformed(&self) -> bool {
        !matches!(self, DecodeError::ConnectionClosed | DecodeError::Io(_))
    }
}

/// Result type for decoding operations.
pub type DecodeResult<T> = Result<T, DecodeError>;

/// Reads [`Command`]s from an async byte stream.
///
/// # Example
///
/// ```
/// use emberkv::protocol::CommandReader;
///
/// # tokio_test::block_on(async {
/// let input: &[u8] = b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\nEXISTS foo\r\n";
/// let mut reader = CommandReader::new(input);
///
/// let cmd = reader.read_command().await.unwrap().unwrap();
/// assert_eq!(cmd.to_string(), "GET foo");
///
/// let cmd = reader.read_command().await.unwrap().unwrap();
/// assert_eq!(cmd.to_string(), "EXISTS foo");
/// # });
/// ```
#[derive(Debug)]
pub struct CommandReader<R> {
    reader: BufReader<R>,
}

impl<R: AsyncRead + Unpin> CommandReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
        }
    }

    /// Reads the next command from the stream.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(command))` - A command with at least one argument
    /// - `Ok(None)` - The request was empty (blank line, empty array); read again
    /// - `Err(e)` - The stream failed or the input was malformed
    pub async fn read_command(&mut self) -> DecodeResult<Option<Command>> {
        let first = match self.reader.read_u8().await {
            Ok(byte) => byte,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(DecodeError::ConnectionClosed)
            }
            Err(e) => return Err(e.into()),
        };

        let args = if first == prefix::ARRAY {
            let mut args = Vec::new();
            self.read_array(&mut args).await?;
            args
        } else {
            let mut line = vec![first];
            if first != b'\n' {
                self.read_raw_line_into(&mut line, MAX_LINE_LENGTH).await?;
            }
            trace!(line = %String::from_utf8_lossy(&line).trim_end(), "Inline command");
            split_inline(strip_terminator(&line))?
        };

        if args.is_empty() {
            trace!("Empty request, nothing to execute");
            return Ok(None);
        }

        Ok(Some(Command::new(args)))
    }

    /// Reads a multi-bulk array whose `*` marker was already consumed.
    ///
    /// Nested arrays are tracked with an explicit stack of remaining element
    /// counts, one per open array, and their elements land in `args`.
    async fn read_array(&mut self, args: &mut Vec<Bytes>) -> DecodeResult<()> {
        let mut pending = vec![self.read_array_len().await?];

        while let Some(remaining) = pending.last_mut() {
            if *remaining == 0 {
                pending.pop();
                continue;
            }
            *remaining -= 1;

            match self.reader.read_u8().await? {
                prefix::INTEGER => {
                    let line = self.read_line().await?;
                    args.push(Bytes::from(line));
                }
                prefix::BULK_STRING => {
                    if let Some(payload) = self.read_bulk().await? {
                        args.push(payload);
                    }
                }
                prefix::ARRAY => {
                    if pending.len() >= MAX_NESTING_DEPTH {
                        return Err(DecodeError::NestingTooDeep(MAX_NESTING_DEPTH));
                    }
                    let count = self.read_array_len().await?;
                    pending.push(count);
                }
                other => return Err(DecodeError::UnknownMarker(other)),
            }
        }

        Ok(())
    }

    /// Reads the element count line of an array. A null array counts as empty.
    async fn read_array_len(&mut self) -> DecodeResult<usize> {
        let line = self.read_line().await?;
        let count = parse_integer(&line)?;
        trace!(elements = count, "Multi-bulk header");

        match count {
            -1 => Ok(0),
            n if n < 0 => Err(DecodeError::InvalidArrayLength(n)),
            n => Ok(n as usize),
        }
    }

    /// Reads a bulk string whose `$` marker was already consumed.
    ///
    /// Returns `None` for the null bulk string `$-1`.
    async fn read_bulk(&mut self) -> DecodeResult<Option<Bytes>> {
        let line = self.read_line().await?;
        let length = parse_integer(&line)?;

        if length == -1 {
            return Ok(None);
        }
        if length < 0 {
            return Err(DecodeError::InvalidBulkLength(length));
        }

        let length = length as usize;
        if length > MAX_BULK_SIZE {
            return Err(DecodeError::MessageTooLarge {
                size: length,
                max: MAX_BULK_SIZE,
            });
        }

        // Payload plus its terminator, gathered one full line at a time. The
        // declared length is untrusted, so the buffer grows with the data.
        let needed = length + CRLF.len();
        let mut payload = Vec::with_capacity(needed.min(MAX_LINE_LENGTH));
        while payload.len() < needed {
            self.read_raw_line_into(&mut payload, needed + MAX_LINE_LENGTH)
                .await?;
        }
        payload.truncate(length);

        Ok(Some(Bytes::from(payload)))
    }

    /// Reads one line and strips its terminator.
    async fn read_line(&mut self) -> DecodeResult<Vec<u8>> {
        let mut line = Vec::new();
        self.read_raw_line_into(&mut line, MAX_LINE_LENGTH).await?;
        let len = strip_terminator(&line).len();
        line.truncate(len);
        Ok(line)
    }

    /// Appends bytes up to and including the next `\n` to `buf`.
    ///
    /// Fails once `buf` would grow beyond `limit` bytes.
    async fn read_raw_line_into(&mut self, buf: &mut Vec<u8>, limit: usize) -> DecodeResult<()> {
        loop {
            let byte = self.reader.read_u8().await?;
            buf.push(byte);

            if byte == b'\n' {
                return Ok(());
            }
            if buf.len() > limit {
                return Err(DecodeError::MessageTooLarge {
                    size: buf.len(),
                    max: limit,
                });
            }
        }
    }
}

/// Removes a trailing `\r\n` (or bare `\n`) from a line.
fn strip_terminator(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Parses a signed decimal integer from a header line.
fn parse_integer(line: &[u8]) -> DecodeResult<i64> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| DecodeError::InvalidInteger(String::from_utf8_lossy(line).into_owned()))
}

/// Splits an inline command line into arguments.
///
/// Tokens are separated by spaces; runs of spaces produce no empty tokens.
/// A token starting with `"` extends to the next unescaped `"`, and `\"`
/// inside it stands for a literal quote.
fn split_inline(line: &[u8]) -> DecodeResult<Vec<Bytes>> {
    let mut args = Vec::new();
    let mut pos = 0;

    while pos < line.len() {
        match line[pos] {
            b' ' => pos += 1,
            b'"' => {
                let (token, next) = read_quoted(line, pos + 1)?;
                if !token.is_empty() {
                    args.push(Bytes::from(token));
                }
                pos = next;
            }
            _ => {
                let start = pos;
                while pos < line.len() && line[pos] != b' ' {
                    pos += 1;
                }
                args.push(Bytes::copy_from_slice(&line[start..pos]));
            }
        }
    }

    Ok(args)
}

/// Reads a quoted token starting just after its opening quote.
///
/// Returns the token and the position right after the closing quote.
fn read_quoted(line: &[u8], start: usize) -> DecodeResult<(Vec<u8>, usize)> {
    let mut token = Vec::new();
    let mut pos = start;

    while pos < line.len() {
        match line[pos] {
            b'"' => return Ok((token, pos + 1)),
            b'\\' if line.get(pos + 1) == Some(&b'"') => {
                token.push(b'"');
                pos += 2;
            }
            byte => {
                token.push(byte);
                pos += 1;
            }
        }
    }

    Err(DecodeError::UnbalancedQuotes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    async fn decode_one(input: &[u8]) -> DecodeResult<Option<Command>> {
        CommandReader::new(input).read_command().await
    }

    async fn decode_args(input: &[u8]) -> Vec<String> {
        decode_one(input)
            .await
            .unwrap()
            .unwrap()
            .args()
            .iter()
            .map(|a| String::from_utf8_lossy(a).into_owned())
            .collect()
    }

    #[tokio::test]
    async fn test_decode_array() {
        let args = decode_args(b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n").await;
        assert_eq!(args, vec!["GET", "foo"]);
    }

    #[tokio::test]
    async fn test_decode_inline_with_quoted_token() {
        let args = decode_args(b"SET \"a b\" 1\r\n").await;
        assert_eq!(args, vec!["SET", "a b", "1"]);
    }

    #[tokio::test]
    async fn test_decode_inline_escaped_quote() {
        let args = decode_args(b"SET k \"say \\\"hi\\\"\"\r\n").await;
        assert_eq!(args, vec!["SET", "k", "say \"hi\""]);
    }

    #[tokio::test]
    async fn test_decode_inline_drops_empty_tokens() {
        let args = decode_args(b"   GET    foo  \r\n").await;
        assert_eq!(args, vec!["GET", "foo"]);
    }

    #[tokio::test]
    async fn test_decode_inline_bare_newline() {
        let args = decode_args(b"EXISTS foo\n").await;
        assert_eq!(args, vec!["EXISTS", "foo"]);
    }

    #[tokio::test]
    async fn test_decode_inline_unbalanced_quotes() {
        let result = decode_one(b"SET \"oops 1\r\n").await;
        let err = result.unwrap_err();
        assert!(matches!(err, DecodeError::UnbalancedQuotes));
        assert!(err.is_malformed());
    }

    #[tokio::test]
    async fn test_empty_inline_yields_no_command() {
        let mut reader = CommandReader::new(&b"\r\n   \r\nQUIT\r\n"[..]);
        assert!(reader.read_command().await.unwrap().is_none());
        assert!(reader.read_command().await.unwrap().is_none());
        let cmd = reader.read_command().await.unwrap().unwrap();
        assert_eq!(cmd.name_upper(), "QUIT");
    }

    #[tokio::test]
    async fn test_empty_array_yields_no_command() {
        assert!(decode_one(b"*0\r\n").await.unwrap().is_none());
        assert!(decode_one(b"*-1\r\n").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_decode_integer_element() {
        let args = decode_args(b"*3\r\n$3\r\nSET\r\n$1\r\nn\r\n:42\r\n").await;
        assert_eq!(args, vec!["SET", "n", "42"]);
    }

    #[tokio::test]
    async fn test_nested_array_is_flattened() {
        let args = decode_args(b"*2\r\n$3\r\nDEL\r\n*2\r\n$1\r\na\r\n*1\r\n$1\r\nb\r\n").await;
        assert_eq!(args, vec!["DEL", "a", "b"]);
    }

    #[tokio::test]
    async fn test_elements_after_nested_array() {
        let args = decode_args(b"*3\r\n$3\r\nDEL\r\n*1\r\n$1\r\na\r\n$1\r\nb\r\n").await;
        assert_eq!(args, vec!["DEL", "a", "b"]);
    }

    #[tokio::test]
    async fn test_bulk_payload_containing_crlf() {
        let args = decode_args(b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$4\r\na\r\nb\r\n").await;
        assert_eq!(args, vec!["SET", "k", "a\r\nb"]);
    }

    #[tokio::test]
    async fn test_empty_bulk_string() {
        let cmd = decode_one(b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$0\r\n\r\n")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cmd.args()[2], Bytes::new());
    }

    #[tokio::test]
    async fn test_null_bulk_contributes_nothing() {
        let args = decode_args(b"*3\r\n$3\r\nDEL\r\n$-1\r\n$1\r\nk\r\n").await;
        assert_eq!(args, vec!["DEL", "k"]);
    }

    #[tokio::test]
    async fn test_binary_safe_bulk_string() {
        let cmd = decode_one(b"*2\r\n$3\r\nGET\r\n$5\r\nhel\x00o\r\n")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cmd.args()[1], Bytes::from_static(b"hel\x00o"));
    }

    #[tokio::test]
    async fn test_unknown_marker_is_malformed() {
        let err = decode_one(b"*1\r\n+GET\r\n").await.unwrap_err();
        assert!(matches!(err, DecodeError::UnknownMarker(b'+')));
        assert!(err.is_malformed());
    }

    #[tokio::test]
    async fn test_invalid_count_is_rejected() {
        let err = decode_one(b"*x\r\n").await.unwrap_err();
        assert!(matches!(err, DecodeError::InvalidInteger(ref s) if s == "x"));

        let err = decode_one(b"*1\r\n$abc\r\nfoo\r\n").await.unwrap_err();
        assert!(matches!(err, DecodeError::InvalidInteger(_)));
    }

    #[tokio::test]
    async fn test_negative_lengths_are_rejected() {
        let err = decode_one(b"*-2\r\n").await.unwrap_err();
        assert!(matches!(err, DecodeError::InvalidArrayLength(-2)));

        let err = decode_one(b"*1\r\n$-5\r\n").await.unwrap_err();
        assert!(matches!(err, DecodeError::InvalidBulkLength(-5)));
    }

    #[tokio::test]
    async fn test_nesting_depth_limit() {
        let mut input = Vec::new();
        for _ in 0..=MAX_NESTING_DEPTH {
            input.extend_from_slice(b"*1\r\n");
        }
        input.extend_from_slice(b"$1\r\na\r\n");

        let err = decode_one(&input).await.unwrap_err();
        assert!(matches!(err, DecodeError::NestingTooDeep(_)));
    }

    #[tokio::test]
    async fn test_inline_line_too_long() {
        let mut input = vec![b'A'; MAX_LINE_LENGTH + 10];
        input.extend_from_slice(b"\r\n");

        let err = decode_one(&input).await.unwrap_err();
        assert!(matches!(err, DecodeError::MessageTooLarge { .. }));
    }

    #[tokio::test]
    async fn test_clean_close_between_commands() {
        let mut reader = CommandReader::new(&b"QUIT\r\n"[..]);
        assert!(reader.read_command().await.unwrap().is_some());

        let err = reader.read_command().await.unwrap_err();
        assert!(matches!(err, DecodeError::ConnectionClosed));
        assert!(!err.is_malformed());
    }

    #[tokio::test]
    async fn test_eof_mid_command_is_io_error() {
        let err = decode_one(b"*2\r\n$3\r\nGET\r\n").await.unwrap_err();
        assert!(matches!(err, DecodeError::Io(ref e) if e.kind() == std::io::ErrorKind::UnexpectedEof));
        assert!(!err.is_malformed());
    }

    #[tokio::test]
    async fn test_huge_declared_bulk_without_payload() {
        let err = decode_one(b"*1\r\n$536870912\r\n").await.unwrap_err();
        assert!(matches!(err, DecodeError::Io(ref e) if e.kind() == std::io::ErrorKind::UnexpectedEof));
    }

    #[tokio::test]
    async fn test_large_bulk_arriving_in_chunks() {
        let size = MAX_LINE_LENGTH * 3;
        let payload = vec![b'x'; size];
        let header = format!("*2\r\n$3\r\nGET\r\n${}\r\n", size);

        let stream = Builder::new()
            .read(header.as_bytes())
            .read(&payload[..size / 2])
            .read(&payload[size / 2..])
            .read(b"\r\n")
            .build();
        let mut reader = CommandReader::new(stream);

        let cmd = reader.read_command().await.unwrap().unwrap();
        assert_eq!(cmd.args()[1].len(), size);
    }

    #[tokio::test]
    async fn test_command_split_across_reads() {
        let stream = Builder::new()
            .read(b"*2\r\n$3\r\nGE")
            .read(b"T\r\n$3")
            .read(b"\r\nfoo\r\n")
            .build();
        let mut reader = CommandReader::new(stream);

        let cmd = reader.read_command().await.unwrap().unwrap();
        assert_eq!(cmd, Command::from_strs(&["GET", "foo"]));
    }

    #[tokio::test]
    async fn test_read_error_propagates() {
        let stream = Builder::new()
            .read(b"GET ")
            .read_error(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "reset",
            ))
            .build();
        let mut reader = CommandReader::new(stream);

        let err = reader.read_command().await.unwrap_err();
        assert!(matches!(err, DecodeError::Io(ref e) if e.kind() == std::io::ErrorKind::ConnectionReset));
    }

    #[test]
    fn test_split_inline_quote_adjacent_to_token() {
        let args = split_inline(b"ECHO \"a\"b").unwrap();
        assert_eq!(args, vec![Bytes::from("a"), Bytes::from("b")]);
    }

    #[test]
    fn test_split_inline_drops_empty_quoted_token() {
        let args = split_inline(b"GET \"\" k").unwrap();
        assert_eq!(args, vec![Bytes::from("GET"), Bytes::from("k")]);
    }

    #[test]
    fn test_strip_terminator() {
        assert_eq!(strip_terminator(b"abc\r\n"), b"abc");
        assert_eq!(strip_terminator(b"abc\n"), b"abc");
        assert_eq!(strip_terminator(b"abc"), b"abc");
    }
}
