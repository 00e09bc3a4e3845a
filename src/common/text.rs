//! Text and number helpers shared by the command line and the module engine
//!
//! Numbers accept the prefixes operators are used to from the console:
//! `0x`/`x` hex, `0o`/`o`/leading `0` octal, `0b`/`b` binary, otherwise decimal.

use thiserror::Error;

/// Error produced while decoding operator or module supplied text
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TextError {
    /// Not a number in any accepted notation
    #[error("'{0}' is not a valid number")]
    InvalidNumber(String),

    /// Unknown or truncated backslash escape
    #[error("invalid escape sequence at offset {offset} in '{input}'")]
    InvalidEscape {
        /// Input that contained the escape
        input: String,
        /// Byte offset of the backslash
        offset: usize,
    },

    /// Hex data with odd length or non-hex digits
    #[error("'{0}' is not valid hex data")]
    InvalidHex(String),
}

/// Parse an integer with an optional radix prefix
pub fn parse_int(input: &str) -> Result<i64, TextError> {
    let invalid = || TextError::InvalidNumber(input.to_string());
    let (negative, body) = match input.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, input),
    };
    if body.is_empty() {
        return Err(invalid());
    }

    let (digits, radix) = if let Some(rest) = body.strip_prefix("0x").or_else(|| body.strip_prefix('x')) {
        (rest, 16)
    } else if let Some(rest) = body.strip_prefix("0o").or_else(|| body.strip_prefix('o')) {
        (rest, 8)
    } else if let Some(rest) = body.strip_prefix("0b").or_else(|| body.strip_prefix('b')) {
        (rest, 2)
    } else if body.len() > 1 && body.starts_with('0') {
        (&body[1..], 8)
    } else {
        (body, 10)
    };
    if digits.starts_with(['+', '-']) {
        return Err(invalid());
    }

    let value = i64::from_str_radix(digits, radix).map_err(|_| invalid())?;
    Ok(if negative { -value } else { value })
}

/// Decode backslash escapes into raw bytes
///
/// Supported: `\\ \n \r \t \b \f \v \0 \xHH` and three-digit octal `\NNN`.
pub fn decode_escapes(input: &str) -> Result<Vec<u8>, TextError> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut idx = 0;

    while idx < bytes.len() {
        let b = bytes[idx];
        if b != b'\\' {
            out.push(b);
            idx += 1;
            continue;
        }

        let invalid = || TextError::InvalidEscape { input: input.to_string(), offset: idx };
        let next = *bytes.get(idx + 1).ok_or_else(invalid)?;
        match next {
            b'\\' => out.push(b'\\'),
            b'n' => out.push(b'\n'),
            b'r' => out.push(b'\r'),
            b't' => out.push(b'\t'),
            b'b' => out.push(0x08),
            b'f' => out.push(0x0c),
            b'v' => out.push(0x0b),
            b'x' => {
                let digits = input.get(idx + 2..idx + 4).ok_or_else(invalid)?;
                out.push(u8::from_str_radix(digits, 16).map_err(|_| invalid())?);
                idx += 2;
            }
            b'0'..=b'7' => {
                // A lone \0 is NUL, three octal digits are a byte value
                match input.get(idx + 1..idx + 4).and_then(|d| u8::from_str_radix(d, 8).ok()) {
                    Some(value) => {
                        out.push(value);
                        idx += 2;
                    }
                    None if next == b'0' => out.push(0),
                    None => return Err(invalid()),
                }
            }
            _ => return Err(invalid()),
        }
        idx += 2;
    }

    Ok(out)
}

/// Decode hex data, ignoring whitespace between digits
pub fn decode_hex(input: &str) -> Result<Vec<u8>, TextError> {
    let compact: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    hex::decode(&compact).map_err(|_| TextError::InvalidHex(input.to_string()))
}

/// Render bytes as printable text, escaping everything else as `\xHH`
pub fn escape_bytes(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len());
    for &b in data {
        match b {
            b'\\' => out.push_str("\\\\"),
            0x20..=0x7e | b'\t' | b'\n' | b'\r' => out.push(b as char),
            _ => out.push_str(&format!("\\x{:02X}", b)),
        }
    }
    out
}

/// Render bytes without control characters, in a form [`decode_escapes`] turns back into them
///
/// Used when a stored value is spliced into a command line, where raw
/// control characters would be lost to tokenizing.
pub fn escape_token(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len());
    for &b in data {
        match b {
            b'\\' => out.push_str("\\\\"),
            b'\r' => out.push_str("\\r"),
            b'\n' => out.push_str("\\n"),
            b'\t' => out.push_str("\\t"),
            0x20..=0x7e => out.push(b as char),
            _ => out.push_str(&format!("\\x{:02X}", b)),
        }
    }
    out
}
