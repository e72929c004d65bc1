//! Census line reading and field parsing.
//!
//! A census record is one line of eight double-quoted, comma-separated
//! fields:
//!
//! ```text
//! "start","end","cc","country","region","city","latitude","longitude"
//! ```
//!
//! A field holding a single `-` stands for the empty string. Fields are
//! raw bytes (census files are Latin-1), only the addresses and
//! coordinates have to be ASCII.

use std::io::{BufRead, Read};

use crate::binary::MAX_INTERVALS;
use crate::error::CompileError;

/// Longest accepted record, excluding the line feed.
pub const MAX_LINE_LEN: usize = 1023;

/// Number of fields in a census record.
pub const FIELD_COUNT: usize = 8;

/// Line reader enforcing the census line limits.
pub struct CensusLines<R> {
    reader: R,
    buf: Vec<u8>,
    line: u32,
}

impl<R: BufRead> CensusLines<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::with_capacity(MAX_LINE_LEN + 1),
            line: 0,
        }
    }

    /// Read the next line without its `\n` or `\r\n` terminator, paired
    /// with its 1-based line number.
    ///
    /// Returns `Ok(None)` at end of input. Every line, the last included,
    /// must be terminated.
    pub fn next_line(&mut self) -> Result<Option<(u32, &[u8])>, CompileError> {
        self.buf.clear();
        let limit = (MAX_LINE_LEN + 1) as u64;
        let read = (&mut self.reader)
            .take(limit)
            .read_until(b'\n', &mut self.buf)?;
        if read == 0 {
            return Ok(None);
        }

        self.line += 1;
        if self.line as usize > MAX_INTERVALS {
            return Err(CompileError::TooManyLines);
        }

        let mut len = self.buf.len();
        if self.buf[len - 1] == b'\n' {
            len -= 1;
        } else if len > MAX_LINE_LEN {
            return Err(CompileError::LineTooLong { line: self.line });
        } else {
            return Err(CompileError::PrematureEof { line: self.line });
        }
        if len > 0 && self.buf[len - 1] == b'\r' {
            len -= 1;
        }
        Ok(Some((self.line, &self.buf[..len])))
    }
}

/// Split a record into its eight fields.
///
/// Each field must be enclosed in double quotes, fields are separated by
/// exactly one comma and nothing may follow the last field. Quotes cannot
/// be escaped: a field ends at the next `"`.
pub fn tokenize(line: &[u8]) -> Option<[&[u8]; FIELD_COUNT]> {
    let mut fields: [&[u8]; FIELD_COUNT] = [&[]; FIELD_COUNT];
    let mut rest = line;

    for (i, field) in fields.iter_mut().enumerate() {
        rest = rest.strip_prefix(b"\"")?;
        let end = rest.iter().position(|&b| b == b'"')?;
        let token = &rest[..end];
        *field = if token == b"-" { &[] } else { token };
        rest = &rest[end + 1..];

        if i + 1 < FIELD_COUNT {
            rest = rest.strip_prefix(b",")?;
        }
    }

    if rest.is_empty() {
        Some(fields)
    } else {
        None
    }
}

/// Parse a decimal 32-bit address.
///
/// Accepts 1 to 10 ASCII digits, no sign and no leading zero unless the
/// whole value is `0`.
pub fn parse_unsigned(token: &[u8]) -> Option<u32> {
    if token.is_empty() || token.len() > 10 {
        return None;
    }
    if token.len() > 1 && token[0] == b'0' {
        return None;
    }

    let mut value: u64 = 0;
    for &b in token {
        if !b.is_ascii_digit() {
            return None;
        }
        value = value * 10 + u64::from(b - b'0');
    }
    u32::try_from(value).ok()
}

/// Check for an optional `-`, digits and at most one `.`, with at least
/// one digit overall.
pub fn is_simple_float(token: &[u8]) -> bool {
    let body = token.strip_prefix(b"-").unwrap_or(token);
    let mut digits = 0usize;
    let mut dots = 0usize;
    for &b in body {
        match b {
            b'0'..=b'9' => digits += 1,
            b'.' => dots += 1,
            _ => return false,
        }
    }
    digits > 0 && dots <= 1
}

/// Parse a coordinate token accepted by [`is_simple_float`].
pub fn parse_coordinate(token: &[u8]) -> Option<f64> {
    if !is_simple_float(token) {
        return None;
    }
    // Only ASCII digits, '-' and '.' remain at this point.
    let text = std::str::from_utf8(token).ok()?;
    let (sign, body) = match text.strip_prefix('-') {
        Some(body) => ("-", body),
        None => ("", text),
    };

    // `str::parse::<f64>` rejects a bare leading or trailing '.', pad them.
    let mut normalized = String::with_capacity(text.len() + 2);
    normalized.push_str(sign);
    if body.starts_with('.') {
        normalized.push('0');
    }
    normalized.push_str(body);
    if body.ends_with('.') {
        normalized.push('0');
    }
    normalized.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(input: &[u8]) -> Result<Vec<Vec<u8>>, CompileError> {
        let mut reader = CensusLines::new(input);
        let mut out = Vec::new();
        while let Some((_, line)) = reader.next_line()? {
            out.push(line.to_vec());
        }
        Ok(out)
    }

    #[test]
    fn test_lines_strip_lf_and_crlf() {
        let out = lines(b"a\r\nb\n\nc\n").unwrap();
        assert_eq!(out, vec![b"a".to_vec(), b"b".to_vec(), vec![], b"c".to_vec()]);
    }

    #[test]
    fn test_unterminated_last_line_is_rejected() {
        let err = lines(b"a\nb\nc").unwrap_err();
        assert!(matches!(err, CompileError::PrematureEof { line: 3 }));

        let err = lines(b"a\r").unwrap_err();
        assert!(matches!(err, CompileError::PrematureEof { line: 1 }));

        // unterminated and over the limit
        let err = lines(&[b'x'; MAX_LINE_LEN + 1]).unwrap_err();
        assert!(matches!(err, CompileError::LineTooLong { line: 1 }));
    }

    #[test]
    fn test_line_count_limit() {
        let input = vec![b'\n'; MAX_INTERVALS + 1];
        let mut reader = CensusLines::new(&input[..]);
        for expected in 1..=MAX_INTERVALS as u32 {
            let (line, text) = reader.next_line().unwrap().unwrap();
            assert_eq!(line, expected);
            assert!(text.is_empty());
        }
        assert!(matches!(
            reader.next_line(),
            Err(CompileError::TooManyLines)
        ));
    }

    #[test]
    fn test_line_length_limit() {
        let mut ok = vec![b'x'; MAX_LINE_LEN];
        ok.push(b'\n');
        assert_eq!(lines(&ok).unwrap().len(), 1);

        let mut long = vec![b'x'; MAX_LINE_LEN + 1];
        long.push(b'\n');
        long.extend_from_slice(b"next\n");
        let err = lines(&long).unwrap_err();
        assert!(matches!(err, CompileError::LineTooLong { line: 1 }));

        let mut second = b"first\n".to_vec();
        second.extend(std::iter::repeat(b'y').take(5000));
        let err = lines(&second).unwrap_err();
        assert!(matches!(err, CompileError::LineTooLong { line: 2 }));
    }

    #[test]
    fn test_tokenize_record() {
        let line = br#""0","100","US","UNITED STATES","CA","-","34.05","-118.25""#;
        let fields = tokenize(line).unwrap();
        assert_eq!(fields[0], b"0");
        assert_eq!(fields[3], b"UNITED STATES");
        assert_eq!(fields[5], b"");
        assert_eq!(fields[7], b"-118.25");
    }

    #[test]
    fn test_tokenize_rejects_malformed() {
        // seven fields
        assert!(tokenize(br#""0","1","a","b","c","d","e""#).is_none());
        // nine fields
        assert!(tokenize(br#""0","1","a","b","c","d","e","f","g""#).is_none());
        // space after a comma
        assert!(tokenize(br#""0", "1","a","b","c","d","e","f""#).is_none());
        // trailing bytes
        assert!(tokenize(br#""0","1","a","b","c","d","e","f" "#).is_none());
        // unterminated quote
        assert!(tokenize(br#""0","1","a","b","c","d","e","f"#).is_none());
        assert!(tokenize(b"").is_none());
    }

    #[test]
    fn test_tokenize_only_whole_dash_is_empty() {
        let fields = tokenize(br#""0","1","--","-x","","-","1","2""#).unwrap();
        assert_eq!(fields[2], b"--");
        assert_eq!(fields[3], b"-x");
        assert_eq!(fields[4], b"");
        assert_eq!(fields[5], b"");
    }

    #[test]
    fn test_parse_unsigned() {
        assert_eq!(parse_unsigned(b"0"), Some(0));
        assert_eq!(parse_unsigned(b"101"), Some(101));
        assert_eq!(parse_unsigned(b"4294967295"), Some(u32::MAX));
        assert_eq!(parse_unsigned(b"4294967296"), None);
        assert_eq!(parse_unsigned(b"9999999999"), None);
        assert_eq!(parse_unsigned(b"01"), None);
        assert_eq!(parse_unsigned(b"00"), None);
        assert_eq!(parse_unsigned(b"12345678901"), None);
        assert_eq!(parse_unsigned(b""), None);
        assert_eq!(parse_unsigned(b"+1"), None);
        assert_eq!(parse_unsigned(b"1 "), None);
    }

    #[test]
    fn test_simple_float() {
        for ok in [&b"0"[..], b"-0", b"34.05", b"-118.25", b".5", b"1.", b"-.5"] {
            assert!(is_simple_float(ok), "{:?}", String::from_utf8_lossy(ok));
        }
        for bad in [&b""[..], b"-", b".", b"-.", b"1.2.3", b"1e5", b"+1", b"--1", b" 1", b"nan"] {
            assert!(!is_simple_float(bad), "{:?}", String::from_utf8_lossy(bad));
        }
    }

    #[test]
    fn test_parse_coordinate() {
        assert_eq!(parse_coordinate(b"34.05"), Some(34.05));
        assert_eq!(parse_coordinate(b"-0.12"), Some(-0.12));
        assert_eq!(parse_coordinate(b".5"), Some(0.5));
        assert_eq!(parse_coordinate(b"-.5"), Some(-0.5));
        assert_eq!(parse_coordinate(b"7."), Some(7.0));
        assert_eq!(parse_coordinate(b"007"), Some(7.0));
        assert_eq!(parse_coordinate(b"1e5"), None);
    }
}
