//! Quoted value handling for GET-family replies.
//!
//! A value stored as a double-quoted literal, e.g. the 7 bytes `"a\tb"`,
//! is sent back with one level of quoting removed (`a`, TAB, `b`), and the
//! bulk length header counts the unquoted bytes. Values that do not start
//! with `"`, or are not well-formed quoted literals, are returned as stored.

use bytes::Bytes;

/// Returns the bytes to send back for a stored value.
pub fn reply_value(value: Bytes) -> Bytes {
    if value.first() != Some(&b'"') {
        return value;
    }
    match unquote(&value) {
        Some(unquoted) => Bytes::from(unquoted),
        None => value,
    }
}

/// Removes surrounding double quotes and decodes escape sequences.
///
/// Supported escapes: `\a \b \f \n \r \t \v \\ \"`, `\xHH`, three-digit
/// octal `\OOO`, `\uXXXX` and `\UXXXXXXXX`. Returns `None` when the input
/// is not a complete quoted literal: missing quotes, a bare quote or newline
/// inside, or an invalid escape.
pub fn unquote(raw: &[u8]) -> Option<Vec<u8>> {
    let inner = raw.strip_prefix(b"\"")?.strip_suffix(b"\"")?;
    let mut out = Vec::with_capacity(inner.len());
    let mut pos = 0;

    while pos < inner.len() {
        let byte = inner[pos];
        pos += 1;
        match byte {
            b'"' | b'\n' => return None,
            b'\\' => {
                let escape = *inner.get(pos)?;
                pos += 1;
                match escape {
                    b'a' => out.push(0x07),
                    b'b' => out.push(0x08),
                    b'f' => out.push(0x0c),
                    b'n' => out.push(b'\n'),
                    b'r' => out.push(b'\r'),
                    b't' => out.push(b'\t'),
                    b'v' => out.push(0x0b),
                    b'\\' => out.push(b'\\'),
                    b'"' => out.push(b'"'),
                    b'x' => {
                        let value = parse_radix(inner.get(pos..pos + 2)?, 16)?;
                        pos += 2;
                        out.push(value as u8);
                    }
                    b'0'..=b'7' => {
                        let value = parse_radix(inner.get(pos - 1..pos + 2)?, 8)?;
                        if value > 0xff {
                            return None;
                        }
                        pos += 2;
                        out.push(value as u8);
                    }
                    b'u' | b'U' => {
                        let width = if escape == b'u' { 4 } else { 8 };
                        let value = parse_radix(inner.get(pos..pos + width)?, 16)?;
                        pos += width;
                        let ch = char::from_u32(value)?;
                        let mut utf8 = [0u8; 4];
                        out.extend_from_slice(ch.encode_utf8(&mut utf8).as_bytes());
                    }
                    _ => return None,
                }
            }
            other => out.push(other),
        }
    }

    Some(out)
}

fn parse_radix(digits: &[u8], radix: u32) -> Option<u32> {
    let text = std::str::from_utf8(digits).ok()?;
    if !text.chars().all(|c| c.is_digit(radix)) {
        return None;
    }
    u32::from_str_radix(text, radix).ok()
}
